//! Pipelined HTTP/1.1 client engine with caller driven readiness.
//!
//! The engine speaks the wire protocol directly to a TCP (optionally TLS)
//! endpoint. No operation ever blocks on the socket: whatever would block
//! instead suspends with a [PollRequest] naming the file descriptor and the
//! readiness it waits for, so one thread can drive any number of connections
//! from its own poll loop. Each operation also carries a blocking form
//! through [Operation::wait] for callers that do not need that control.
//!
//! ```no_run
//! use lamprey_client::{Connection, Operation, RequestBody, TlsConnector};
//!
//! # fn main() -> Result<(), lamprey_client::Error> {
//! let mut conn = Connection::new("example.com", None, TlsConnector::Off, None);
//!
//! conn.send_request("GET", "/", None, RequestBody::Empty, false).wait()?;
//! let res = conn.read_response().wait()?;
//! println!("{} {}", res.status(), res.reason());
//! let body = conn.read_all().wait()?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```
//!
//! Requests are pipelined: several can be sent before the first response is
//! read, and responses always come back in request order.

#![forbid(unsafe_code)]

macro_rules! ready {
    ($e:expr) => {
        match $e? {
            $crate::io::Step::Ready(value) => value,
            $crate::io::Step::Pending(req) => return Ok($crate::io::Step::Pending(req)),
        }
    };
}

pub(crate) use ready;

mod body;
mod buffer;
mod connection;
mod headers;
mod proto;
mod response;
mod tls;

pub mod error;

pub use self::body::{Discard, ReadAll, ReadBody, ReadInto};
pub use self::connection::{Connection, RequestBody, SendRequest, WriteBody};
pub use self::error::{Error, is_temp_network_error};
pub use self::headers::HeaderMap;
pub use self::response::{ReadResponse, Response};
pub use self::tls::{TlsConnector, TlsIo, TlsUpgrade};

// re-export of the suspendable io vocabulary crate.
pub use lamprey_io as io;

pub use lamprey_io::{Interest, Operation, PollRequest, Step};
