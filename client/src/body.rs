//! response body framing: identity and chunked decoding on top of the
//! shared read buffer and suspension contract.

use std::{cmp, io, mem};

use tracing::{debug, trace};

use crate::{
    connection::{Connection, HeaderRead, LineLimit, ReadUntil},
    error::{Error, StateError},
    io::{Interest, Step},
    proto::{BUFFER_SIZE, Encoding, MAX_LINE_SIZE, decode},
    ready,
};

/// State machine of a single body read call.
///
/// An identity body moves straight to `Data`. A chunked body inserts chunk
/// size parsing whenever the current chunk is used up, and consumes the
/// trailing CRLF (an empty header section) after each drained chunk as well
/// as the trailer section after the terminating zero chunk.
pub(crate) enum BodyRead {
    Init,
    ChunkLine(ReadUntil),
    Data,
    ChunkEnd { result: Vec<u8>, read: HeaderRead },
}

fn poll_read(conn: &mut Connection, n: usize, state: &mut BodyRead) -> Result<Step<Vec<u8>>, Error> {
    loop {
        match state {
            BodyRead::Init => {
                if n == 0 {
                    return Ok(Step::Ready(Vec::new()));
                }
                if conn.in_remaining.is_none() {
                    return Err(Error::State(StateError::NoActiveResponse));
                }
                match conn.encoding {
                    Encoding::Deferred(ref e) => return Err(e.to_error()),
                    Encoding::Identity => *state = BodyRead::Data,
                    Encoding::Chunked => {
                        if conn.in_remaining == Some(0) {
                            *state = BodyRead::ChunkLine(ReadUntil::new(
                                b"\r\n",
                                MAX_LINE_SIZE,
                                LineLimit::ChunkMarker,
                            ));
                        } else {
                            *state = BodyRead::Data;
                        }
                    }
                }
            }
            BodyRead::ChunkLine(read) => {
                let line = ready!(read.poll(conn));
                let size = decode::chunk_size(&line)?;
                trace!(target: "h1_decode", "chunk size is {}", size);
                if size == 0 {
                    // terminating chunk: the response is complete once the
                    // trailer section is consumed
                    conn.in_remaining = None;
                    conn.inflight.pop_front();
                    *state = BodyRead::ChunkEnd {
                        result: Vec::new(),
                        read: HeaderRead::new(),
                    };
                } else {
                    conn.in_remaining = Some(size);
                    *state = BodyRead::Data;
                }
            }
            BodyRead::Data => {
                let buf = ready!(conn.poll_identity_read(n));
                if conn.encoding == Encoding::Chunked && conn.in_remaining == Some(0) {
                    // chunk drained; its trailing CRLF reads as an empty
                    // header section
                    *state = BodyRead::ChunkEnd {
                        result: buf,
                        read: HeaderRead::new(),
                    };
                } else {
                    return Ok(Step::Ready(buf));
                }
            }
            BodyRead::ChunkEnd { result, read } => {
                ready!(read.poll(conn));
                return Ok(Step::Ready(mem::take(result)));
            }
        }
    }
}

/// Identity read-into progress that survives suspension.
pub(crate) struct IdentityInto {
    limit: Option<usize>,
    pos: usize,
}

impl IdentityInto {
    fn new() -> Self {
        Self {
            limit: None,
            pos: 0,
        }
    }
}

pub(crate) enum BodyReadInto {
    Init,
    ChunkLine(ReadUntil),
    Data(IdentityInto),
    ChunkEnd { n: usize, read: HeaderRead },
}

fn poll_read_into(
    conn: &mut Connection,
    buf: &mut [u8],
    state: &mut BodyReadInto,
) -> Result<Step<usize>, Error> {
    loop {
        match state {
            BodyReadInto::Init => {
                if buf.is_empty() {
                    return Ok(Step::Ready(0));
                }
                if conn.in_remaining.is_none() {
                    return Err(Error::State(StateError::NoActiveResponse));
                }
                match conn.encoding {
                    Encoding::Deferred(ref e) => return Err(e.to_error()),
                    Encoding::Identity => *state = BodyReadInto::Data(IdentityInto::new()),
                    Encoding::Chunked => {
                        if conn.in_remaining == Some(0) {
                            *state = BodyReadInto::ChunkLine(ReadUntil::new(
                                b"\r\n",
                                MAX_LINE_SIZE,
                                LineLimit::ChunkMarker,
                            ));
                        } else {
                            *state = BodyReadInto::Data(IdentityInto::new());
                        }
                    }
                }
            }
            BodyReadInto::ChunkLine(read) => {
                let line = ready!(read.poll(conn));
                let size = decode::chunk_size(&line)?;
                trace!(target: "h1_decode", "chunk size is {}", size);
                if size == 0 {
                    conn.in_remaining = None;
                    conn.inflight.pop_front();
                    *state = BodyReadInto::ChunkEnd {
                        n: 0,
                        read: HeaderRead::new(),
                    };
                } else {
                    conn.in_remaining = Some(size);
                    *state = BodyReadInto::Data(IdentityInto::new());
                }
            }
            BodyReadInto::Data(progress) => {
                let n = ready!(conn.poll_identity_read_into(buf, progress));
                if conn.encoding == Encoding::Chunked && conn.in_remaining == Some(0) {
                    *state = BodyReadInto::ChunkEnd {
                        n,
                        read: HeaderRead::new(),
                    };
                } else {
                    return Ok(Step::Ready(n));
                }
            }
            BodyReadInto::ChunkEnd { n, read } => {
                ready!(read.poll(conn));
                return Ok(Step::Ready(*n));
            }
        }
    }
}

impl Connection {
    /// Read up to `n` body bytes assuming identity framing. Returns an empty
    /// buffer exactly once when the body (or current chunk) is used up, which
    /// also closes the response and pops the pipelining queue.
    pub(crate) fn poll_identity_read(&mut self, n: usize) -> Result<Step<Vec<u8>>, Error> {
        let remaining = match self.in_remaining {
            Some(remaining) => remaining,
            None => return Err(Error::State(StateError::NoActiveResponse)),
        };
        if remaining == 0 {
            // body retrieved completely, clean up
            self.in_remaining = None;
            self.inflight.pop_front();
            return Ok(Step::Ready(Vec::new()));
        }

        let want = cmp::min(n as u64, remaining) as usize;

        // pull from the socket while more could be returned than is buffered
        while self.rbuf.len() < want && !self.rbuf.is_full() {
            match self.try_fill_buffer()? {
                Some(_) => {}
                None if self.rbuf.is_empty() => {
                    return Ok(Step::Pending(self.readiness(Interest::READABLE)));
                }
                None => break,
            }
        }

        let take = cmp::min(want, self.rbuf.len());
        self.in_remaining = Some(remaining - take as u64);
        let buf = if take < self.rbuf.len() {
            let buf = self.rbuf.chunk()[..take].to_vec();
            self.rbuf.advance(take);
            buf
        } else {
            self.rbuf.exhaust()
        };
        trace!(target: "conn", "got {} body bytes", buf.len());
        Ok(Step::Ready(buf))
    }

    /// Identity read directly into the caller's buffer: buffered data first,
    /// then the socket, bypassing the read buffer.
    pub(crate) fn poll_identity_read_into(
        &mut self,
        buf: &mut [u8],
        progress: &mut IdentityInto,
    ) -> Result<Step<usize>, Error> {
        let remaining = match self.in_remaining {
            Some(remaining) => remaining,
            None => return Err(Error::State(StateError::NoActiveResponse)),
        };
        if remaining == 0 {
            debug_assert_eq!(progress.pos, 0);
            self.in_remaining = None;
            self.inflight.pop_front();
            return Ok(Step::Ready(0));
        }

        let limit = match progress.limit {
            Some(limit) => limit,
            None => {
                let limit = cmp::min(buf.len() as u64, remaining) as usize;
                progress.limit = Some(limit);
                limit
            }
        };

        if !self.rbuf.is_empty() && progress.pos < limit {
            let take = cmp::min(self.rbuf.len(), limit - progress.pos);
            buf[progress.pos..progress.pos + take].copy_from_slice(&self.rbuf.chunk()[..take]);
            self.rbuf.advance(take);
            self.in_remaining = Some(remaining - take as u64);
            progress.pos += take;
            if progress.pos == limit {
                trace!(target: "conn", "got all we need from the buffer, {} bytes", limit);
                return Ok(Step::Ready(limit));
            }
        }

        loop {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected))),
            };
            match io::Read::read(stream, &mut buf[progress.pos..limit]) {
                Ok(0) => return Err(Error::ConnectionClosed("connection closed unexpectedly")),
                Ok(n) => {
                    let remaining = match self.in_remaining {
                        Some(remaining) => remaining,
                        None => unreachable!("identity read keeps the response open"),
                    };
                    self.in_remaining = Some(remaining - n as u64);
                    progress.pos += n;
                    if progress.pos == limit {
                        return Ok(Step::Ready(limit));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return if progress.pos > 0 {
                        Ok(Step::Ready(progress.pos))
                    } else {
                        Ok(Step::Pending(self.readiness(Interest::READABLE)))
                    };
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

/// Operation reading up to `n` body bytes. See [Connection::read].
pub struct ReadBody<'c> {
    conn: &'c mut Connection,
    n: usize,
    state: BodyRead,
}

impl<'c> ReadBody<'c> {
    pub(crate) fn new(conn: &'c mut Connection, n: usize) -> Self {
        Self {
            conn,
            n,
            state: BodyRead::Init,
        }
    }
}

impl crate::io::Operation for ReadBody<'_> {
    type Output = Vec<u8>;
    type Error = Error;

    fn step(&mut self) -> Result<Step<Vec<u8>>, Error> {
        poll_read(self.conn, self.n, &mut self.state)
    }
}

/// Operation reading body bytes into a caller buffer. See
/// [Connection::read_into].
pub struct ReadInto<'c, 'b> {
    conn: &'c mut Connection,
    buf: &'b mut [u8],
    state: BodyReadInto,
}

impl<'c, 'b> ReadInto<'c, 'b> {
    pub(crate) fn new(conn: &'c mut Connection, buf: &'b mut [u8]) -> Self {
        Self {
            conn,
            buf,
            state: BodyReadInto::Init,
        }
    }
}

impl crate::io::Operation for ReadInto<'_, '_> {
    type Output = usize;
    type Error = Error;

    fn step(&mut self) -> Result<Step<usize>, Error> {
        poll_read_into(self.conn, self.buf, &mut self.state)
    }
}

/// Operation collecting the complete response body. See
/// [Connection::read_all].
pub struct ReadAll<'c> {
    conn: &'c mut Connection,
    parts: Vec<Vec<u8>>,
    state: BodyRead,
}

impl<'c> ReadAll<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            parts: Vec::new(),
            state: BodyRead::Init,
        }
    }
}

impl crate::io::Operation for ReadAll<'_> {
    type Output = Vec<u8>;
    type Error = Error;

    fn step(&mut self) -> Result<Step<Vec<u8>>, Error> {
        loop {
            let buf = ready!(poll_read(self.conn, BUFFER_SIZE, &mut self.state));
            self.state = BodyRead::Init;
            if buf.is_empty() {
                let parts = mem::take(&mut self.parts);
                let body = parts.concat();
                debug!(target: "conn", "read {} byte body", body.len());
                return Ok(Step::Ready(body));
            }
            self.parts.push(buf);
        }
    }
}

/// Operation draining and discarding the response body. See
/// [Connection::discard].
pub struct Discard<'c> {
    conn: &'c mut Connection,
    state: BodyRead,
}

impl<'c> Discard<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            state: BodyRead::Init,
        }
    }
}

impl crate::io::Operation for Discard<'_> {
    type Output = ();
    type Error = Error;

    fn step(&mut self) -> Result<Step<()>, Error> {
        loop {
            let buf = ready!(poll_read(self.conn, BUFFER_SIZE, &mut self.state));
            self.state = BodyRead::Init;
            if buf.is_empty() {
                return Ok(Step::Ready(()));
            }
            trace!(target: "conn", "discarding {} bytes", buf.len());
        }
    }
}
