//! tls upgrade seam of the connection.
//!
//! The engine consumes tls as a capability: something that takes the
//! connected socket plus the server hostname and hands back an established
//! session. The feature gated backends provide ready made capabilities;
//! anything else can be plugged in through [TlsUpgrade].

use std::{
    io::{self, Read, Write},
    net::TcpStream,
    os::fd::AsRawFd,
};

use crate::error::Error;

#[cfg(feature = "openssl")]
mod openssl;

#[cfg(feature = "rustls")]
mod rustls;

/// An established tls session on top of the connection socket.
///
/// Reads and writes follow the socket's blocking mode; a non-blocking
/// session reports `WouldBlock` like a plain socket does.
pub trait TlsIo: Read + Write + AsRawFd + Send {
    /// der encoded certificate the peer presented.
    fn peer_cert_der(&self) -> Option<Vec<u8>>;

    /// name of the negotiated cipher suite.
    fn cipher(&self) -> Option<String>;

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn shutdown(&self) -> io::Result<()>;
}

/// Capability upgrading a connected socket to a tls session.
///
/// The handshake runs on the still blocking socket. Certificate chain and
/// hostname verification happen inside `upgrade`; a verification failure
/// must fail the upgrade (the socket is consumed either way).
pub trait TlsUpgrade: Send {
    fn upgrade(&self, stream: TcpStream, domain: &str) -> Result<Box<dyn TlsIo>, Error>;
}

/// Tls layer configuration of a connection.
///
/// `Off` speaks plain http. Connections with any other variant upgrade the
/// socket right after connecting (and tunneling) and default to port 443.
pub enum TlsConnector {
    Off,
    Custom(Box<dyn TlsUpgrade>),
}

impl Default for TlsConnector {
    fn default() -> Self {
        Self::Off
    }
}

impl TlsConnector {
    /// rustls backed capability trusting the webpki root certificates.
    #[cfg(feature = "rustls")]
    pub fn rustls() -> Self {
        Self::custom(rustls::Connector::new())
    }

    /// openssl backed capability using the system default certificate store.
    #[cfg(feature = "openssl")]
    pub fn openssl() -> Self {
        Self::custom(openssl::Connector::new())
    }

    pub fn custom(upgrade: impl TlsUpgrade + 'static) -> Self {
        Self::Custom(Box::new(upgrade))
    }

    pub(crate) fn is_off(&self) -> bool {
        matches!(self, Self::Off)
    }

    pub(crate) fn capability(&self) -> Option<&dyn TlsUpgrade> {
        match self {
            Self::Off => None,
            Self::Custom(upgrade) => Some(&**upgrade),
        }
    }
}
