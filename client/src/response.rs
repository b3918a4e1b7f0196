//! response head reading and the descriptor handed back to the caller.

use std::mem;

use tracing::{debug, trace, warn};

use crate::{
    connection::{BodyProgress, Connection, HeaderRead, Inflight, LineLimit, OutBody, ReadUntil},
    error::{Error, InvalidResponse, StateError},
    headers::HeaderMap,
    io::Step,
    proto::{DeferredError, Encoding, MAX_LINE_SIZE, decode},
    ready,
};

/// Status, reason and headers of one response.
///
/// Body data is read from the [Connection](crate::Connection) itself, not
/// from this descriptor.
#[derive(Debug)]
pub struct Response {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
    pub(crate) length: Option<u64>,
}

impl Response {
    /// Method of the request this response answers.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path of the request this response answers.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Declared body length; `None` when the length is not known up front
    /// (chunked transfer encoding).
    pub fn length(&self) -> Option<u64> {
        self.length
    }
}

enum ReadState {
    Init,
    Status { read: ReadUntil },
    Header { status: u16, reason: String, read: HeaderRead },
    Done,
}

/// Operation reading the next pipelined response head. See
/// [Connection::read_response].
pub struct ReadResponse<'c> {
    conn: &'c mut Connection,
    state: ReadState,
}

impl<'c> ReadResponse<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            state: ReadState::Init,
        }
    }
}

impl crate::io::Operation for ReadResponse<'_> {
    type Output = Response;
    type Error = Error;

    fn step(&mut self) -> Result<Step<Response>, Error> {
        loop {
            match &mut self.state {
                ReadState::Init => {
                    if self.conn.inflight.is_empty() {
                        return Err(Error::State(StateError::NoPendingRequest));
                    }
                    if self.conn.in_remaining.is_some() {
                        return Err(Error::State(StateError::ResponseNotRead));
                    }
                    self.state = ReadState::Status {
                        read: ReadUntil::new(b"\r\n", MAX_LINE_SIZE, LineLimit::StatusLine),
                    };
                }
                ReadState::Status { read } => {
                    let line = ready!(read.poll(self.conn));
                    let (status, reason) = decode::status_line(&line)?;
                    debug!(target: "h1_decode", "got {} {}", status, reason);
                    self.state = ReadState::Header {
                        status,
                        reason,
                        read: HeaderRead::new(),
                    };
                }
                ReadState::Header {
                    status,
                    reason,
                    read,
                } => {
                    let block = ready!(read.poll(self.conn));
                    let status = *status;
                    let headers = decode::header_block(&block);

                    let awaiting_continue = matches!(
                        self.conn.inflight.front(),
                        Some(Inflight {
                            body: BodyProgress::AwaitingContinue(_),
                            ..
                        })
                    );
                    if (100..200).contains(&status) && !(status == 100 && awaiting_continue) {
                        // informational response: discard it and parse the
                        // next status line
                        trace!(target: "h1_decode", "skipping {} response", status);
                        self.state = ReadState::Status {
                            read: ReadUntil::new(b"\r\n", MAX_LINE_SIZE, LineLimit::StatusLine),
                        };
                        continue;
                    }

                    let reason = mem::take(reason);
                    let response = self.conn.finish_response(status, reason, headers)?;
                    self.state = ReadState::Done;
                    return Ok(Step::Ready(response));
                }
                ReadState::Done => return Err(Error::State(StateError::Finished)),
            }
        }
    }
}

impl Connection {
    /// Apply the state transitions for a freshly parsed response head and
    /// build the descriptor. Runs without touching the socket.
    fn finish_response(
        &mut self,
        status: u16,
        reason: String,
        headers: HeaderMap,
    ) -> Result<Response, Error> {
        // an expected 100: the server asks for the request body. Move the
        // owed length back into the outbound remainder and return without
        // arming a body reader.
        if status == 100 {
            let head = match self.inflight.pop_front() {
                Some(head) => head,
                None => unreachable!("100-continue handling requires an in flight request"),
            };
            let length = match head.body {
                BodyProgress::AwaitingContinue(length) => length,
                BodyProgress::FullySent => unreachable!("unexpected 100 was filtered out earlier"),
            };
            debug_assert!(matches!(self.out_body, Some(OutBody::AwaitingContinue)));
            debug!(target: "conn", "server requests the body, {} bytes pending", length);
            self.out_body = Some(OutBody::Owed {
                method: head.method.clone(),
                path: head.path.clone(),
                remaining: length,
            });
            self.in_remaining = None;
            return Ok(Response {
                method: head.method,
                path: head.path,
                status,
                reason,
                headers,
                length: Some(0),
            });
        }

        let (method, path, awaiting_continue) = match self.inflight.front() {
            Some(head) => (
                head.method.clone(),
                head.path.clone(),
                matches!(head.body, BodyProgress::AwaitingContinue(_)),
            ),
            None => unreachable!("read_response checked for an in flight request"),
        };

        if awaiting_continue {
            // final status before the body was sent: the body stays unsent.
            // The queue entry is popped by the terminal body read, keeping
            // response_pending truthful until then.
            debug!(target: "conn", "final status {} before body data was sent", status);
            self.out_body = None;
        }

        let mut length = None;

        let te = headers
            .get("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase());
        match te.as_deref() {
            Some("chunked") => {
                debug!(target: "h1_decode", "chunked encoding detected");
                self.encoding = Encoding::Chunked;
                self.in_remaining = Some(0);
            }
            Some(other) if !other.is_empty() && other != "identity" => {
                // a server must not send anything else. Poison the body
                // instead of failing so status and headers still reach the
                // caller; the error surfaces on the first read.
                warn!(target: "h1_decode", "server uses invalid response encoding {:?}", other);
                self.encoding =
                    Encoding::Deferred(DeferredError::BadTransferEncoding(other.to_owned()));
            }
            _ => {
                self.encoding = Encoding::Identity;
            }
        }

        if status == 204 || status == 304 || (100..200).contains(&status) || method == "HEAD" {
            // no content by RFC. There is not even a zero chunk to read.
            debug!(target: "h1_decode", "no content by rfc");
            length = Some(0);
            self.in_remaining = Some(0);
            self.encoding = Encoding::Identity;
        } else if self.encoding == Encoding::Chunked {
            // chunked does not need a content length
        } else {
            match headers.get("Content-Length") {
                Some(value) => {
                    let n = value.trim().parse::<u64>().map_err(|_| {
                        Error::InvalidResponse(InvalidResponse::ContentLength(value.to_owned()))
                    })?;
                    self.in_remaining = Some(n);
                    length = Some(n);
                }
                None => {
                    if self.encoding == Encoding::Identity {
                        // without a length there is no way to tell where this
                        // response ends. Poison the body, report on read.
                        debug!(target: "h1_decode", "no content length and no chunked encoding");
                        self.encoding = Encoding::Deferred(DeferredError::MissingContentLength);
                    }
                    self.in_remaining = Some(0);
                }
            }
        }

        debug!(target: "h1_decode", "response open, in_remaining={:?}", self.in_remaining);

        Ok(Response {
            method,
            path,
            status,
            reason,
            headers,
            length,
        })
    }
}
