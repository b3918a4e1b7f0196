use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    os::fd::{AsRawFd, RawFd},
    sync::Arc,
};

use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned, pki_types::ServerName};

use crate::error::{Error, TlsError};

use super::{TlsIo, TlsUpgrade};

pub(super) struct Connector {
    config: Arc<ClientConfig>,
}

impl Connector {
    pub(super) fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            config: Arc::new(config),
        }
    }
}

impl TlsUpgrade for Connector {
    fn upgrade(&self, stream: TcpStream, domain: &str) -> Result<Box<dyn TlsIo>, Error> {
        let name =
            ServerName::try_from(domain.to_owned()).map_err(|_| TlsError::InvalidDnsName)?;
        let conn = ClientConnection::new(self.config.clone(), name)
            .map_err(|e| TlsError::Handshake(Box::new(e)))?;
        let mut stream = StreamOwned::new(conn, stream);

        // chain and hostname verification happen during the handshake
        while stream.conn.is_handshaking() {
            stream.conn.complete_io(&mut stream.sock).map_err(|e| {
                if e.kind() == io::ErrorKind::InvalidData {
                    // certificate or protocol failure raised by the tls layer
                    Error::Tls(TlsError::Handshake(Box::new(e)))
                } else {
                    // socket level failure underneath the handshake
                    Error::Tls(TlsError::Io(e))
                }
            })?;
        }

        Ok(Box::new(Session { stream }))
    }
}

struct Session {
    stream: StreamOwned<ClientConnection, TcpStream>,
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
        self.stream.sock.as_raw_fd()
    }
}

impl TlsIo for Session {
    fn peer_cert_der(&self) -> Option<Vec<u8>> {
        self.stream
            .conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.as_ref().to_vec())
    }

    fn cipher(&self) -> Option<String> {
        self.stream
            .conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.sock.set_nonblocking(nonblocking)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.stream.sock.shutdown(Shutdown::Both)
    }
}
