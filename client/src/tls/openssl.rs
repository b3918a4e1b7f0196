use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    os::fd::{AsRawFd, RawFd},
};

use openssl::ssl::{ErrorCode, HandshakeError, SslConnector, SslMethod, SslStream};

use crate::error::{Error, TlsError};

use super::{TlsIo, TlsUpgrade};

pub(super) struct Connector {
    inner: SslConnector,
}

impl Connector {
    pub(super) fn new() -> Self {
        let builder = SslConnector::builder(SslMethod::tls())
            .unwrap_or_else(|e| panic!("cannot set up ssl context: {e:?}"));
        Self {
            inner: builder.build(),
        }
    }
}

impl TlsUpgrade for Connector {
    fn upgrade(&self, stream: TcpStream, domain: &str) -> Result<Box<dyn TlsIo>, Error> {
        // connect verifies the certificate chain and the hostname
        let stream = self.inner.connect(domain, stream).map_err(|e| match e {
            HandshakeError::SetupFailure(e) => Error::Tls(TlsError::Handshake(Box::new(e))),
            HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => {
                let err = mid.into_error();
                if err.code() == ErrorCode::ZERO_RETURN {
                    // peer closed the tls channel during the handshake
                    Error::Tls(TlsError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)))
                } else if err.code() == ErrorCode::SYSCALL {
                    let io_err = err
                        .into_io_error()
                        .unwrap_or_else(|_| io::Error::from(io::ErrorKind::UnexpectedEof));
                    Error::Tls(TlsError::Io(io_err))
                } else {
                    // certificate or protocol failure raised by the tls layer
                    Error::Tls(TlsError::Handshake(Box::new(err)))
                }
            }
        })?;
        Ok(Box::new(Session { stream }))
    }
}

struct Session {
    stream: SslStream<TcpStream>,
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl AsRawFd for Session {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }
}

impl TlsIo for Session {
    fn peer_cert_der(&self) -> Option<Vec<u8>> {
        self.stream
            .ssl()
            .peer_certificate()
            .and_then(|cert| cert.to_der().ok())
    }

    fn cipher(&self) -> Option<String> {
        self.stream
            .ssl()
            .current_cipher()
            .map(|cipher| cipher.name().to_owned())
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.get_ref().set_nonblocking(nonblocking)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.stream.get_ref().shutdown(Shutdown::Both)
    }
}
