//! strongly typed library error.

use std::{error, fmt, io};

use crate::io::net::ResolveError;

/// Top level error type of the crate. Every failure of a connection
/// operation is converted into one of these variants.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// address resolution failed before a socket could be opened.
    Resolve(ResolveError),
    State(StateError),
    /// more request body bytes offered than announced in Content-Length.
    ExcessBodyData { given: usize, remaining: u64 },
    InvalidResponse(InvalidResponse),
    UnsupportedResponse(UnsupportedResponse),
    /// peer closed the socket in the middle of an exchange.
    ConnectionClosed(&'static str),
    /// proxy refused to establish a CONNECT tunnel.
    Tunnel { status: u16, reason: String },
    Argument(ArgumentError),
    Tls(TlsError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => fmt::Display::fmt(e, f),
            Self::Resolve(e) => write!(f, "address resolution failed: {e}"),
            Self::State(e) => fmt::Display::fmt(e, f),
            Self::ExcessBodyData { given, remaining } => {
                write!(f, "trying to write {given} bytes, but only {remaining} bytes pending")
            }
            Self::InvalidResponse(e) => write!(f, "server sent invalid response: {e}"),
            Self::UnsupportedResponse(e) => write!(f, "server sent unsupported response: {e}"),
            Self::ConnectionClosed(msg) => f.write_str(msg),
            Self::Tunnel { status, reason } => {
                write!(f, "tunnel connection failed: {status} {reason}")
            }
            Self::Argument(e) => fmt::Display::fmt(e, f),
            Self::Tls(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

/// Raised when attempting an operation that does not make sense in the
/// current connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// a prior request body has not been sent completely yet.
    BodyDataOwed,
    /// no active request with pending body data.
    NoPendingBody,
    /// the request body must not be sent before the 100 response arrived.
    AwaitingContinue,
    /// there is no request whose response could be read.
    NoPendingRequest,
    /// the previous response body has not been read completely.
    ResponseNotRead,
    /// no active response with body data.
    NoActiveResponse,
    /// the operation has already run to completion.
    Finished,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BodyDataOwed => f.write_str("body data has not been sent completely yet"),
            Self::NoPendingBody => f.write_str("no active request with pending body data"),
            Self::AwaitingContinue => f.write_str("cannot write while waiting for 100-continue"),
            Self::NoPendingRequest => f.write_str("no pending requests"),
            Self::ResponseNotRead => f.write_str("previous response not read completely"),
            Self::NoActiveResponse => f.write_str("no active response with body"),
            Self::Finished => f.write_str("operation already finished"),
        }
    }
}

impl error::Error for StateError {}

impl From<StateError> for Error {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

/// The server produced something that is not proper HTTP 1.0 or 1.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidResponse {
    StatusLineTooLong,
    HeaderTooLong,
    /// next chunk size marker not found within the line length limit.
    ChunkMarkerMissing,
    MalformedStatus(String),
    StatusOutOfRange(u16),
    ChunkSize(String),
    ContentLength(String),
    TransferEncoding(String),
}

impl fmt::Display for InvalidResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusLineTooLong => f.write_str("status line exceeds maximum length"),
            Self::HeaderTooLong => f.write_str("header section exceeds maximum length"),
            Self::ChunkMarkerMissing => f.write_str("could not find next chunk marker"),
            Self::MalformedStatus(s) => write!(f, "{s:?} is not a valid status"),
            Self::StatusOutOfRange(n) => write!(f, "{n} is not a valid status"),
            Self::ChunkSize(s) => write!(f, "cannot read chunk size {s:?}"),
            Self::ContentLength(s) => write!(f, "cannot read content length {s:?}"),
            Self::TransferEncoding(s) => write!(f, "cannot handle {s:?} encoding"),
        }
    }
}

impl error::Error for InvalidResponse {}

impl From<InvalidResponse> for Error {
    fn from(e: InvalidResponse) -> Self {
        Self::InvalidResponse(e)
    }
}

/// The server produced a response this client cannot stay in sync with.
/// Synchronization with the server is lost; the connection has to be reset
/// with [disconnect](crate::Connection::disconnect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedResponse {
    Version(String),
    MissingContentLength,
}

impl fmt::Display for UnsupportedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(v) => write!(f, "{v:?} is not supported"),
            Self::MissingContentLength => {
                f.write_str("no content-length and no chunked encoding")
            }
        }
    }
}

impl error::Error for UnsupportedResponse {}

impl From<UnsupportedResponse> for Error {
    fn from(e: UnsupportedResponse) -> Self {
        Self::UnsupportedResponse(e)
    }
}

/// Caller side argument violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// expect_100 is only allowed for a separately sent body.
    ExpectWithoutBody,
    /// header names, header values and request targets must encode as
    /// latin-1.
    NotLatin1(String),
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectWithoutBody => f.write_str("expect_100 only allowed for separate body"),
            Self::NotLatin1(s) => write!(f, "{s:?} cannot be encoded as latin-1"),
        }
    }
}

impl error::Error for ArgumentError {}

impl From<ArgumentError> for Error {
    fn from(e: ArgumentError) -> Self {
        Self::Argument(e)
    }
}

#[derive(Debug)]
pub enum TlsError {
    InvalidDnsName,
    /// certificate or protocol failure raised by the tls layer itself.
    Handshake(Box<dyn error::Error + Send + Sync>),
    /// socket level failure underneath the tls layer (unexpected eof,
    /// connection reset, other syscall errors).
    Io(io::Error),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDnsName => f.write_str("hostname is not a valid tls server name"),
            Self::Handshake(e) => write!(f, "tls handshake failed: {e}"),
            Self::Io(e) => write!(f, "tls io error: {e}"),
        }
    }
}

impl error::Error for TlsError {}

impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        Self::Tls(e)
    }
}

/// Return true if *err* represents a potentially temporary network problem.
///
/// Useful for upper layers that want to retry a request on a fresh
/// connection. Resolution failures count only when the resolver reported
/// `EAI_AGAIN` or `EAI_NONAME` (the latter also shows up while the dns
/// server is unreachable). Tls failures count only at the io layer; a
/// certificate or protocol failure stays permanent.
pub fn is_temp_network_error(err: &Error) -> bool {
    match err {
        Error::ConnectionClosed(_) => true,
        Error::Resolve(e) => e.is_temporary(),
        Error::Io(e) => is_temp_io_error(e),
        // only ever built from eof/zero-return/syscall class failures
        Error::Tls(TlsError::Io(_)) => true,
        _ => false,
    }
}

fn is_temp_io_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn temp_network_errors() {
        assert!(is_temp_network_error(&Error::ConnectionClosed(
            "connection closed unexpectedly"
        )));
        assert!(is_temp_network_error(&Error::Io(io::Error::from(
            io::ErrorKind::ConnectionReset
        ))));
        assert!(is_temp_network_error(&Error::Tls(TlsError::Io(
            io::Error::from(io::ErrorKind::UnexpectedEof)
        ))));

        assert!(!is_temp_network_error(&Error::State(StateError::NoPendingRequest)));
        assert!(!is_temp_network_error(&Error::InvalidResponse(
            InvalidResponse::StatusLineTooLong
        )));
        assert!(!is_temp_network_error(&Error::Io(io::Error::from(
            io::ErrorKind::PermissionDenied
        ))));
        assert!(!is_temp_network_error(&Error::Tls(TlsError::InvalidDnsName)));
        assert!(!is_temp_network_error(&Error::Tls(TlsError::Handshake(
            "self signed certificate".into()
        ))));
    }

    #[test]
    fn resolve_errors_classify_by_gai_code() {
        // `.invalid` names never resolve: EAI_NONAME normally, EAI_AGAIN
        // when no resolver is reachable. Both count as temporary.
        let err = crate::io::net::lookup_host("name.invalid", 80).unwrap_err();
        assert!(is_temp_network_error(&Error::Resolve(err)));

        assert!(!is_temp_network_error(&Error::Resolve(ResolveError::other(
            "name resolved to no addresses"
        ))));
    }
}
