//! connection state machine: socket lifecycle, request emission, the send
//! path and the pipelining queue.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    mem,
    net::{Shutdown, TcpStream},
    os::fd::{AsRawFd, RawFd},
};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::{
    body::{Discard, ReadAll, ReadBody, ReadInto},
    buffer::ReadBuffer,
    error::{ArgumentError, Error, StateError},
    headers::HeaderMap,
    io::{
        Interest, PollRequest, Step,
        net::{ResolveError, lookup_host},
    },
    proto::{BUFFER_SIZE, Encoding, MAX_HEADER_SIZE, MAX_LINE_SIZE, decode, encode},
    response::ReadResponse,
    tls::TlsConnector,
};

/// Request body argument of [Connection::send_request].
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    /// request without a body. Content-Length is set to zero.
    Empty,
    /// body sent together with the request head. A Content-MD5 header is
    /// derived from it unless the caller provided one.
    Inline(&'a [u8]),
    /// body data of the announced length follows through
    /// [Connection::write] calls.
    Following(u64),
}

/// One entry per request whose response has not been consumed yet, in FIFO
/// order. A request sent with Expect: 100-continue is queued while its body
/// is still owed; the owed length travels with the entry so reading the 100
/// response can restore it.
pub(crate) struct Inflight {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) body: BodyProgress,
}

pub(crate) enum BodyProgress {
    FullySent,
    AwaitingContinue(u64),
}

/// Outbound remainder: the part of the current request body the server is
/// still owed.
pub(crate) enum OutBody {
    Owed {
        method: String,
        path: String,
        remaining: u64,
    },
    /// body may only be sent once the 100 response arrived.
    AwaitingContinue,
}

pub(crate) enum Stream {
    Tcp(TcpStream),
    Tls(Box<dyn crate::tls::TlsIo>),
}

impl Stream {
    pub(crate) fn fd(&self) -> RawFd {
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Tls(s) => s.as_raw_fd(),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_nonblocking(nonblocking),
            Self::Tls(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            Self::Tls(s) => s.shutdown(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// An HTTP/1.1 connection to one server.
///
/// Requests are pipelined: any number can be sent before their responses are
/// read, and responses come back strictly in request order. Methods that
/// touch the socket return operation values implementing
/// [Operation](crate::Operation); drive them with `step` from an event loop,
/// or `wait` for the blocking form.
///
/// A connection is not safe for concurrent use; a single driver must run one
/// operation to completion (or [disconnect](Connection::disconnect)) before
/// starting the next.
pub struct Connection {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    tls: TlsConnector,
    proxy: Option<(String, u16)>,
    pub(crate) stream: Option<Stream>,
    pub(crate) rbuf: ReadBuffer,
    pub(crate) inflight: VecDeque<Inflight>,
    pub(crate) out_body: Option<OutBody>,
    /// remaining bytes of the active response body (or current chunk).
    /// `None` while no response is open for reading.
    pub(crate) in_remaining: Option<u64>,
    pub(crate) encoding: Encoding,
}

impl Connection {
    /// Create a disconnected connection to `hostname:port`.
    ///
    /// Without an explicit port the scheme default applies: 443 when a tls
    /// connector is configured, 80 otherwise. With a `proxy` endpoint the
    /// connection runs through an HTTP CONNECT tunnel.
    pub fn new(
        hostname: impl Into<String>,
        port: Option<u16>,
        tls: TlsConnector,
        proxy: Option<(String, u16)>,
    ) -> Self {
        let tls_off = tls.is_off();
        Self {
            hostname: hostname.into(),
            port: port.unwrap_or(if tls_off { 80 } else { 443 }),
            tls,
            proxy,
            stream: None,
            rbuf: ReadBuffer::with_capacity(BUFFER_SIZE),
            inflight: VecDeque::new(),
            out_body: None,
            in_remaining: None,
            encoding: Encoding::Identity,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn default_port(&self) -> u16 {
        if self.tls.is_off() { 80 } else { 443 }
    }

    /// File descriptor of the underlying socket, for registration with an
    /// external readiness poller. `None` while disconnected.
    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(Stream::fd)
    }

    /// True while responses (including partially read ones) are outstanding.
    pub fn response_pending(&self) -> bool {
        !self.inflight.is_empty()
    }

    /// der encoded certificate of the peer, `None` when not connected over
    /// tls.
    pub fn peer_cert(&self) -> Option<Vec<u8>> {
        match self.stream {
            Some(Stream::Tls(ref s)) => s.peer_cert_der(),
            _ => None,
        }
    }

    /// Negotiated cipher suite name, `None` when not connected over tls.
    pub fn peer_cipher(&self) -> Option<String> {
        match self.stream {
            Some(Stream::Tls(ref s)) => s.cipher(),
            _ => None,
        }
    }

    /// Connect to the remote server, tunneling through the proxy and
    /// upgrading to tls when configured.
    ///
    /// Called automatically by the first request; connecting by hand is only
    /// needed to inspect tls state up front.
    pub fn connect(&mut self) -> Result<(), Error> {
        let (host, port) = match self.proxy {
            Some((ref host, port)) => (host.clone(), port),
            None => (self.hostname.clone(), self.port),
        };
        debug!(target: "conn", "connecting to {}:{}", host, port);

        let sock = connect_to(&host, port)?;
        self.stream = Some(Stream::Tcp(sock));
        self.rbuf.clear();
        self.inflight.clear();
        self.out_body = None;
        self.in_remaining = None;
        self.encoding = Encoding::Identity;

        if self.proxy.is_some() {
            if let Err(e) = self.tunnel() {
                self.disconnect();
                return Err(e);
            }
        }

        if let Some(upgrade) = self.tls.capability() {
            debug!(target: "conn", "establishing tls layer");
            let sock = match self.stream.take() {
                Some(Stream::Tcp(sock)) => sock,
                _ => unreachable!("tls upgrade runs directly on the fresh tcp socket"),
            };
            match upgrade.upgrade(sock, &self.hostname) {
                Ok(tls) => self.stream = Some(Stream::Tls(tls)),
                Err(e) => {
                    // socket ownership went into the failed handshake
                    self.rbuf.clear();
                    return Err(e);
                }
            }
        }

        // every wire exchange from here on is caller driven
        if let Some(ref stream) = self.stream {
            stream.set_nonblocking(true)?;
        }

        debug!(target: "conn", "connected");
        Ok(())
    }

    /// Set up a CONNECT tunnel to the destination through the proxy the
    /// socket is connected to.
    fn tunnel(&mut self) -> Result<(), Error> {
        debug!(target: "conn", "tunneling to {}:{}", self.hostname, self.port);

        let mut buf = BytesMut::new();
        encode::put_latin1(
            &mut buf,
            &format!("CONNECT {}:{} HTTP/1.0\r\n\r\n", self.hostname, self.port),
        )?;

        let mut sent = 0;
        while sent < buf.len() {
            match self.try_send(&buf[sent..])? {
                Some(n) => sent += n,
                None => {
                    self.readiness(Interest::WRITABLE).wait(None)?;
                }
            }
        }

        let mut read = ReadUntil::new(b"\r\n", MAX_LINE_SIZE, LineLimit::StatusLine);
        let line = loop {
            match read.poll(self)? {
                Step::Ready(line) => break line,
                Step::Pending(req) => {
                    req.wait(None)?;
                }
            }
        };
        let (status, reason) = decode::status_line(&line)?;
        debug!(target: "conn", "tunnel response {} {}", status, reason);

        // discard the header section of the proxy response
        let mut read = HeaderRead::new();
        loop {
            match read.poll(self)? {
                Step::Ready(_) => break,
                Step::Pending(req) => {
                    req.wait(None)?;
                }
            }
        }

        if status != 200 {
            self.disconnect();
            return Err(Error::Tunnel { status, reason });
        }
        Ok(())
    }

    /// Best effort shutdown and close. The connection may be connected again
    /// afterwards.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            // the peer may have torn the socket down already
            let _ = stream.shutdown();
            self.rbuf.clear();
        } else {
            debug!(target: "conn", "already closed");
        }
        self.inflight.clear();
        self.out_body = None;
        self.in_remaining = None;
    }

    /// Send a new request to the server.
    ///
    /// Headers named by the protocol (Content-Length, Host, Accept-Encoding,
    /// and Connection/Content-MD5/Expect unless provided) are filled in. With
    /// [RequestBody::Following] the body is supplied afterwards through
    /// [Connection::write]; `expect_100` additionally asks the server for
    /// permission first and is only allowed for a following body.
    pub fn send_request<'b>(
        &mut self,
        method: &str,
        path: &str,
        headers: Option<HeaderMap>,
        body: RequestBody<'b>,
        expect_100: bool,
    ) -> SendRequest<'_, 'b> {
        SendRequest {
            state: SendRequestState::Init {
                method: method.to_owned(),
                path: path.to_owned(),
                headers,
                body,
                expect_100,
            },
            conn: self,
        }
    }

    /// Supply body data for a request sent with [RequestBody::Following].
    pub fn write<'b>(&mut self, buf: &'b [u8]) -> WriteBody<'_, 'b> {
        WriteBody {
            conn: self,
            buf,
            sent: 0,
            state: WriteState::Check,
        }
    }

    /// Read the status line and header section of the next pipelined
    /// response. Body data is consumed separately; even for an empty body one
    /// of the body reading operations has to run to its terminal value before
    /// the next response can be read.
    pub fn read_response(&mut self) -> ReadResponse<'_> {
        ReadResponse::new(self)
    }

    /// Read up to `n` bytes of response body data. Returns an empty buffer
    /// exactly once when the body is complete; reading further is a state
    /// error.
    pub fn read(&mut self, n: usize) -> ReadBody<'_> {
        ReadBody::new(self, n)
    }

    /// Read response body data into `buf`, returning the count written. Zero
    /// marks the completed body, once.
    pub fn read_into<'b>(&mut self, buf: &'b mut [u8]) -> ReadInto<'_, 'b> {
        ReadInto::new(self, buf)
    }

    /// Read and return the complete response body.
    pub fn read_all(&mut self) -> ReadAll<'_> {
        ReadAll::new(self)
    }

    /// Read and throw away the rest of the response body.
    pub fn discard(&mut self) -> Discard<'_> {
        Discard::new(self)
    }

    pub(crate) fn readiness(&self, interest: Interest) -> PollRequest {
        let fd = match self.stream {
            Some(ref stream) => stream.fd(),
            None => unreachable!("suspended io requires an open socket"),
        };
        PollRequest::new(fd, interest)
    }

    /// Read once from the socket into the buffer. `Ok(None)` means the
    /// socket has nothing to offer right now.
    pub(crate) fn try_fill_buffer(&mut self) -> Result<Option<usize>, Error> {
        debug_assert!(!self.rbuf.is_full());
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected))),
        };
        loop {
            return match stream.read(self.rbuf.chunk_mut()) {
                Ok(0) => Err(Error::ConnectionClosed("connection closed unexpectedly")),
                Ok(n) => {
                    self.rbuf.advance_filled(n);
                    trace!(target: "conn", "buffered {} bytes", n);
                    Ok(Some(n))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(Error::Io(e)),
            };
        }
    }

    /// Write once to the socket. `Ok(None)` means the socket cannot take
    /// data right now.
    pub(crate) fn try_send(&mut self, buf: &[u8]) -> Result<Option<usize>, Error> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected))),
        };
        loop {
            return match stream.write(buf) {
                Ok(0) => Err(Error::ConnectionClosed("zero length write")),
                Ok(n) => {
                    trace!(target: "conn", "sent {} bytes", n);
                    Ok(Some(n))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                // no data was sent before the interruption, try again
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(classify_write_error(e)),
            };
        }
    }

    pub(crate) fn try_flush(&mut self) -> Result<Option<()>, Error> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::Io(io::Error::from(io::ErrorKind::NotConnected))),
        };
        match stream.flush() {
            Ok(()) => Ok(Some(())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(classify_write_error(e)),
        }
    }
}

fn classify_write_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::BrokenPipe {
        Error::ConnectionClosed("found closed when trying to write")
    } else if e.raw_os_error() == Some(libc::EINVAL) {
        // blackhole routing, according to ip(7)
        Error::ConnectionClosed("ip route goes into black hole")
    } else {
        Error::Io(e)
    }
}

fn connect_to(host: &str, port: u16) -> Result<TcpStream, Error> {
    let addrs = lookup_host(host, port)?;
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(sock) => return Ok(sock),
            Err(e) => last = Some(e),
        }
    }
    Err(match last {
        Some(e) => Error::Io(e),
        None => Error::Resolve(ResolveError::other("name resolved to no addresses")),
    })
}

/// Line length limits and the error raised when one is exceeded.
pub(crate) enum LineLimit {
    StatusLine,
    HeaderBlock,
    ChunkMarker,
}

impl LineLimit {
    fn error(&self) -> Error {
        use crate::error::InvalidResponse::*;
        Error::InvalidResponse(match self {
            Self::StatusLine => StatusLineTooLong,
            Self::HeaderBlock => HeaderTooLong,
            Self::ChunkMarker => ChunkMarkerMissing,
        })
    }
}

/// Delimiter bounded read: pull from the socket until `delim` is found and
/// hand back everything up to and including it, decoded as latin-1.
///
/// When the buffer fills up without a match its contents spill into a part
/// list; a delimiter straddling the spill boundary is detected by joining
/// the tail of the last part with the head of the refreshed buffer.
pub(crate) struct ReadUntil {
    delim: &'static [u8],
    max_size: usize,
    limit: LineLimit,
    parts: Vec<Vec<u8>>,
}

impl ReadUntil {
    pub(crate) fn new(delim: &'static [u8], max_size: usize, limit: LineLimit) -> Self {
        Self {
            delim,
            max_size,
            limit,
            parts: Vec::new(),
        }
    }

    pub(crate) fn poll(&mut self, conn: &mut Connection) -> Result<Step<String>, Error> {
        let sub_len = self.delim.len();
        debug_assert!(conn.rbuf.capacity() > sub_len);

        let consumed = loop {
            // the delimiter may be split between the last spilled part and
            // the current buffer contents
            if sub_len > 1 {
                if let Some(last) = self.parts.last() {
                    let tail = &last[last.len().saturating_sub(sub_len)..];
                    let window = conn.rbuf.chunk();
                    let head = &window[..window.len().min(sub_len - 1)];
                    let mut joined = Vec::with_capacity(tail.len() + head.len());
                    joined.extend_from_slice(tail);
                    joined.extend_from_slice(head);
                    if let Some(i) = find(&joined, self.delim) {
                        break i + sub_len - tail.len();
                    }
                }
            }

            if let Some(i) = conn.rbuf.find_delimiter(self.delim, self.max_size) {
                break i + sub_len;
            }
            if self.max_size < conn.rbuf.len() {
                return Err(self.limit.error());
            }

            if conn.rbuf.is_full() {
                trace!(target: "h1_decode", "buffer is full, storing part");
                let part = conn.rbuf.exhaust();
                self.max_size -= part.len();
                self.parts.push(part);
            }

            if conn.try_fill_buffer()?.is_none() {
                return Ok(Step::Pending(conn.readiness(Interest::READABLE)));
            }
        };

        let mut line = conn.rbuf.chunk()[..consumed].to_vec();
        conn.rbuf.advance(consumed);
        if !self.parts.is_empty() {
            self.parts.push(line);
            line = self.parts.concat();
            self.parts.clear();
        }
        Ok(Step::Ready(decode::latin1(&line)))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Header section read with the empty section shortcut: a section starting
/// with CRLF consumes just those two bytes (searching for the CRLFCRLF
/// terminator would fail on it).
pub(crate) enum HeaderRead {
    Peek,
    Until(ReadUntil),
}

impl HeaderRead {
    pub(crate) fn new() -> Self {
        Self::Peek
    }

    pub(crate) fn poll(&mut self, conn: &mut Connection) -> Result<Step<String>, Error> {
        loop {
            match self {
                Self::Peek => {
                    while conn.rbuf.len() < 2 {
                        if conn.rbuf.is_full() {
                            conn.rbuf.compact();
                        }
                        if conn.try_fill_buffer()?.is_none() {
                            return Ok(Step::Pending(conn.readiness(Interest::READABLE)));
                        }
                    }
                    if conn.rbuf.chunk()[..2] == *b"\r\n" {
                        trace!(target: "h1_decode", "empty header section");
                        conn.rbuf.advance(2);
                        return Ok(Step::Ready(String::new()));
                    }
                    *self = Self::Until(ReadUntil::new(
                        b"\r\n\r\n",
                        MAX_HEADER_SIZE,
                        LineLimit::HeaderBlock,
                    ));
                }
                Self::Until(read) => return read.poll(conn),
            }
        }
    }
}

enum SendRequestState<'b> {
    Init {
        method: String,
        path: String,
        headers: Option<HeaderMap>,
        body: RequestBody<'b>,
        expect_100: bool,
    },
    Sending {
        buf: BytesMut,
        sent: usize,
        method: String,
        path: String,
        after: AfterSend,
    },
    Done,
}

enum AfterSend {
    /// request fully on the wire, expect its response.
    Enqueue,
    /// request head sent, `length` body bytes owed.
    OweBody { length: u64 },
    /// request head sent with Expect: 100-continue; the body may only go out
    /// once the server said so.
    AwaitContinue { length: u64 },
}

/// Operation emitting one request. See [Connection::send_request].
pub struct SendRequest<'c, 'b> {
    conn: &'c mut Connection,
    state: SendRequestState<'b>,
}

impl crate::io::Operation for SendRequest<'_, '_> {
    type Output = ();
    type Error = Error;

    fn step(&mut self) -> Result<Step<()>, Error> {
        loop {
            match mem::replace(&mut self.state, SendRequestState::Done) {
                SendRequestState::Init {
                    method,
                    path,
                    headers,
                    body,
                    expect_100,
                } => {
                    if expect_100 && !matches!(body, RequestBody::Following(_)) {
                        return Err(Error::Argument(ArgumentError::ExpectWithoutBody));
                    }
                    if self.conn.stream.is_none() {
                        self.conn.connect()?;
                    }
                    if self.conn.out_body.is_some() {
                        return Err(Error::State(StateError::BodyDataOwed));
                    }

                    let mut headers = headers.unwrap_or_default();
                    let after = match body {
                        RequestBody::Empty => {
                            headers.insert("Content-Length", "0");
                            AfterSend::Enqueue
                        }
                        RequestBody::Following(length) => {
                            debug!(target: "conn", "preparing to send {} bytes of body data", length);
                            if expect_100 {
                                headers.insert("Expect", "100-continue");
                            }
                            headers.insert("Content-Length", length.to_string());
                            if expect_100 {
                                AfterSend::AwaitContinue { length }
                            } else {
                                AfterSend::OweBody { length }
                            }
                        }
                        RequestBody::Inline(body) => {
                            headers.insert("Content-Length", body.len().to_string());
                            if !headers.contains("Content-MD5") {
                                headers.insert("Content-MD5", encode::content_md5(body));
                            }
                            AfterSend::Enqueue
                        }
                    };

                    // host header: bracket names containing a colon, elide
                    // the default port of the scheme
                    let host = if self.conn.hostname.contains(':') {
                        format!("[{}]", self.conn.hostname)
                    } else {
                        self.conn.hostname.clone()
                    };
                    if self.conn.port == self.conn.default_port() {
                        headers.insert("Host", host);
                    } else {
                        headers.insert("Host", format!("{}:{}", host, self.conn.port));
                    }
                    headers.insert("Accept-Encoding", "identity");
                    if !headers.contains("Connection") {
                        headers.insert("Connection", "keep-alive");
                    }

                    let mut buf = BytesMut::new();
                    encode::request_head(&mut buf, &method, &path, &headers)?;
                    if let RequestBody::Inline(body) = body {
                        buf.extend_from_slice(body);
                    }

                    debug!(target: "conn", "sending {} {}", method, path);
                    self.state = SendRequestState::Sending {
                        buf,
                        sent: 0,
                        method,
                        path,
                        after,
                    };
                }
                SendRequestState::Sending {
                    buf,
                    mut sent,
                    method,
                    path,
                    after,
                } => {
                    while sent < buf.len() {
                        match self.conn.try_send(&buf[sent..]) {
                            Ok(Some(n)) => sent += n,
                            Ok(None) => {
                                let req = self.conn.readiness(Interest::WRITABLE);
                                self.state = SendRequestState::Sending {
                                    buf,
                                    sent,
                                    method,
                                    path,
                                    after,
                                };
                                return Ok(Step::Pending(req));
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    match self.conn.try_flush() {
                        Ok(Some(())) => {}
                        Ok(None) => {
                            let req = self.conn.readiness(Interest::WRITABLE);
                            self.state = SendRequestState::Sending {
                                buf,
                                sent,
                                method,
                                path,
                                after,
                            };
                            return Ok(Step::Pending(req));
                        }
                        Err(e) => return Err(e),
                    }

                    match after {
                        AfterSend::Enqueue => self.conn.inflight.push_back(Inflight {
                            method,
                            path,
                            body: BodyProgress::FullySent,
                        }),
                        AfterSend::OweBody { length } => {
                            self.conn.out_body = Some(OutBody::Owed {
                                method,
                                path,
                                remaining: length,
                            });
                        }
                        AfterSend::AwaitContinue { length } => {
                            self.conn.out_body = Some(OutBody::AwaitingContinue);
                            self.conn.inflight.push_back(Inflight {
                                method,
                                path,
                                body: BodyProgress::AwaitingContinue(length),
                            });
                        }
                    }
                    return Ok(Step::Ready(()));
                }
                SendRequestState::Done => return Err(Error::State(StateError::Finished)),
            }
        }
    }
}

enum WriteState {
    Check,
    Send,
    Done,
}

/// Operation sending body data for a request announced with
/// [RequestBody::Following]. See [Connection::write].
pub struct WriteBody<'c, 'b> {
    conn: &'c mut Connection,
    buf: &'b [u8],
    sent: usize,
    state: WriteState,
}

impl crate::io::Operation for WriteBody<'_, '_> {
    type Output = ();
    type Error = Error;

    fn step(&mut self) -> Result<Step<()>, Error> {
        loop {
            match self.state {
                WriteState::Check => {
                    let remaining = match self.conn.out_body {
                        None => return Err(Error::State(StateError::NoPendingBody)),
                        Some(OutBody::AwaitingContinue) => {
                            return Err(Error::State(StateError::AwaitingContinue));
                        }
                        Some(OutBody::Owed { remaining, .. }) => remaining,
                    };
                    if self.buf.len() as u64 > remaining {
                        return Err(Error::ExcessBodyData {
                            given: self.buf.len(),
                            remaining,
                        });
                    }
                    trace!(target: "conn", "writing {} body bytes", self.buf.len());
                    self.state = WriteState::Send;
                }
                WriteState::Send => {
                    while self.sent < self.buf.len() {
                        match self.conn.try_send(&self.buf[self.sent..])? {
                            Some(n) => self.sent += n,
                            None => {
                                return Ok(Step::Pending(self.conn.readiness(Interest::WRITABLE)));
                            }
                        }
                    }
                    if self.conn.try_flush()?.is_none() {
                        return Ok(Step::Pending(self.conn.readiness(Interest::WRITABLE)));
                    }

                    let sent = self.buf.len() as u64;
                    match self.conn.out_body.take() {
                        Some(OutBody::Owed {
                            method,
                            path,
                            remaining,
                        }) => {
                            if sent == remaining {
                                debug!(target: "conn", "body sent fully");
                                self.conn.inflight.push_back(Inflight {
                                    method,
                                    path,
                                    body: BodyProgress::FullySent,
                                });
                            } else {
                                self.conn.out_body = Some(OutBody::Owed {
                                    method,
                                    path,
                                    remaining: remaining - sent,
                                });
                            }
                        }
                        _ => unreachable!("write ran without an owed request body"),
                    }
                    self.state = WriteState::Done;
                    return Ok(Step::Ready(()));
                }
                WriteState::Done => return Err(Error::State(StateError::Finished)),
            }
        }
    }
}
