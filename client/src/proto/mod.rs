//! wire level pieces of the protocol: request head serialization, response
//! head parsing and the body transfer encodings.

pub(crate) mod decode;
pub(crate) mod encode;

use crate::error::{Error, InvalidResponse, UnsupportedResponse};

/// Internal read buffer size.
pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

/// Maximal length of the HTTP status line. A longer line fails with
/// [InvalidResponse::StatusLineTooLong].
pub(crate) const MAX_LINE_SIZE: usize = BUFFER_SIZE - 1;

/// Maximal length of a response header section (all header lines together).
pub(crate) const MAX_HEADER_SIZE: usize = BUFFER_SIZE - 1;

/// Transfer encoding of the active response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Encoding {
    Identity,
    Chunked,
    /// The response head declared a body this client cannot decode. The
    /// error is stored instead of raised so status and headers can still be
    /// returned; it surfaces on the first body read attempt.
    Deferred(DeferredError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeferredError {
    BadTransferEncoding(String),
    MissingContentLength,
}

impl DeferredError {
    pub(crate) fn to_error(&self) -> Error {
        match self {
            Self::BadTransferEncoding(tc) => {
                Error::InvalidResponse(InvalidResponse::TransferEncoding(tc.clone()))
            }
            Self::MissingContentLength => {
                Error::UnsupportedResponse(UnsupportedResponse::MissingContentLength)
            }
        }
    }
}
