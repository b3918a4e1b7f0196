//! end to end exchanges against scripted localhost servers.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use lamprey_client::{
    Connection, Error, HeaderMap, Operation, RequestBody, Step, TlsConnector,
    error::{ArgumentError, InvalidResponse, StateError, UnsupportedResponse},
    is_temp_network_error,
};

/// Spawn a server answering a single connection with `script`. Join the
/// handle at the end of the test so server side assertions propagate.
fn serve<F>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });
    (addr, handle)
}

fn connection(addr: SocketAddr) -> Connection {
    Connection::new("127.0.0.1", Some(addr.port()), TlsConnector::Off, None)
}

/// Read one request head (up to and including the blank line).
fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        assert_eq!(stream.read(&mut byte).unwrap(), 1, "peer closed early");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

fn read_exact(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn bodyless_get_with_keep_alive_reuse() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.starts_with("GET /x HTTP/1.1\r\n"), "{head:?}");
        assert!(head.contains("\r\nConnection: keep-alive\r\n"));
        assert!(head.contains("\r\nAccept-Encoding: identity\r\n"));
        assert!(head.contains("\r\nContent-Length: 0\r\n"));
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();

        let head = read_head(&mut s);
        assert!(head.starts_with("GET /y HTTP/1.1\r\n"), "{head:?}");
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/x", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.reason(), "OK");
    assert_eq!(res.method(), "GET");
    assert_eq!(res.path(), "/x");
    assert_eq!(res.length(), Some(5));
    assert_eq!(conn.read_all().wait().unwrap(), b"hello");

    conn.send_request("GET", "/y", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(conn.read_all().wait().unwrap(), b"hi");
    assert!(!conn.response_pending());

    // plain http connections have no tls state to report
    assert_eq!(conn.peer_cert(), None);
    assert_eq!(conn.peer_cipher(), None);

    server.join().unwrap();
}

#[test]
fn inline_body_gets_content_md5() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.contains("\r\nContent-Length: 3\r\n"));
        assert!(head.contains("\r\nContent-MD5: kAFQmDzST7DWlj99KOF/cg==\r\n"));
        assert_eq!(read_exact(&mut s, 3), b"abc");
        s.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("POST", "/submit", None, RequestBody::Inline(b"abc"), false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 204);
    assert_eq!(res.length(), Some(0));

    // empty exactly once, then the response is closed
    assert_eq!(conn.read(64).wait().unwrap(), b"");
    match conn.read(64).wait() {
        Err(Error::State(StateError::NoActiveResponse)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn caller_content_md5_wins() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.contains("\r\nContent-MD5: provided\r\n"));
        read_exact(&mut s, 3);
        s.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
    });

    let mut conn = connection(addr);
    let headers: HeaderMap = [("Content-MD5", "provided")].into_iter().collect();
    conn.send_request("POST", "/", Some(headers), RequestBody::Inline(b"abc"), false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();
    conn.discard().wait().unwrap();

    server.join().unwrap();
}

#[test]
fn expect_continue_accepted() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.contains("\r\nExpect: 100-continue\r\n"));
        assert!(head.contains("\r\nContent-Length: 4\r\n"));
        s.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").unwrap();
        assert_eq!(read_exact(&mut s, 4), b"data");
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("PUT", "/upload", None, RequestBody::Following(4), true)
        .wait()
        .unwrap();

    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 100);
    assert_eq!(res.length(), Some(0));

    conn.write(b"data").wait().unwrap();

    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(conn.read_all().wait().unwrap(), b"");
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn expect_continue_rejected() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.contains("\r\nExpect: 100-continue\r\n"));
        s.write_all(b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("PUT", "/upload", None, RequestBody::Following(4), true)
        .wait()
        .unwrap();

    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 413);

    // the owed body is dropped; writing it now is a state error
    match conn.write(b"data").wait() {
        Err(Error::State(StateError::NoPendingBody)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // the queue entry stays until the terminal body read
    assert!(conn.response_pending());
    assert_eq!(conn.read_all().wait().unwrap(), b"");
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn expect_continue_requires_following_body() {
    let (addr, _server) = serve(|_s| {});
    let mut conn = connection(addr);
    match conn
        .send_request("PUT", "/", None, RequestBody::Inline(b"x"), true)
        .wait()
    {
        Err(Error::Argument(ArgumentError::ExpectWithoutBody)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn chunked_decode() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/stream", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.length(), None);
    assert_eq!(conn.read_all().wait().unwrap(), b"hello world");
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn chunked_decode_with_extensions_and_trailer() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              5;ext=1\r\nhello\r\n0\r\nX-Trailer: yes\r\n\r\n",
        )
        .unwrap();
        // the connection stays usable after the trailer
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/stream", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();
    assert_eq!(conn.read_all().wait().unwrap(), b"hello");

    conn.send_request("GET", "/after", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();
    assert_eq!(conn.read_all().wait().unwrap(), b"ok");

    server.join().unwrap();
}

#[test]
fn chunked_small_reads_reassemble() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n",
        )
        .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();

    let mut body = Vec::new();
    loop {
        let piece = conn.read(2).wait().unwrap();
        if piece.is_empty() {
            break;
        }
        body.extend_from_slice(&piece);
    }
    assert_eq!(body, b"abcdef");

    server.join().unwrap();
}

#[test]
fn pipelined_responses_come_back_in_order() {
    let (addr, server) = serve(|mut s| {
        for _ in 0..3 {
            read_head(&mut s);
        }
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none")
            .unwrap();
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo")
            .unwrap();
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nthree")
            .unwrap();
    });

    let mut conn = connection(addr);
    for path in ["/1", "/2", "/3"] {
        conn.send_request("GET", path, None, RequestBody::Empty, false)
            .wait()
            .unwrap();
    }

    for (path, body) in [("/1", &b"one"[..]), ("/2", b"two"), ("/3", b"three")] {
        assert!(conn.response_pending());
        let res = conn.read_response().wait().unwrap();
        assert_eq!(res.path(), path);
        assert_eq!(conn.read_all().wait().unwrap(), body);
    }
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn send_request_while_body_owed() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        // drain whatever else arrives until the peer closes
        let mut sink = Vec::new();
        let _ = s.read_to_end(&mut sink);
    });

    let mut conn = connection(addr);
    conn.send_request("PUT", "/big", None, RequestBody::Following(8), false)
        .wait()
        .unwrap();
    match conn
        .send_request("GET", "/other", None, RequestBody::Empty, false)
        .wait()
    {
        Err(Error::State(StateError::BodyDataOwed)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // partial write keeps the remainder armed
    conn.write(b"1234").wait().unwrap();
    match conn.write(b"56789").wait() {
        Err(Error::ExcessBodyData { given: 5, remaining: 4 }) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    conn.write(b"5678").wait().unwrap();
    assert!(conn.response_pending());

    drop(conn);
    server.join().unwrap();
}

#[test]
fn invalid_status_line() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 abc OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    match conn.read_response().wait() {
        Err(Error::InvalidResponse(InvalidResponse::MalformedStatus(s))) => assert_eq!(s, "abc"),
        other => panic!("unexpected result: {other:?}"),
    }
    conn.disconnect();
    assert_eq!(conn.fd(), None);

    server.join().unwrap();
}

#[test]
fn non_http_response() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"SSH-2.0-OpenSSH_9.5\r\n\r\n").unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    match conn.read_response().wait() {
        Err(Error::UnsupportedResponse(UnsupportedResponse::Version(v))) => {
            assert_eq!(v, "SSH-2.0-OpenSSH_9.5")
        }
        other => panic!("unexpected result: {other:?}"),
    }

    server.join().unwrap();
}

#[test]
fn missing_content_length_poisons_body() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();

    // status and headers still come through
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.length(), None);

    let err = conn.read_all().wait().unwrap_err();
    match &err {
        Error::UnsupportedResponse(UnsupportedResponse::MissingContentLength) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!is_temp_network_error(&err));

    server.join().unwrap();
}

#[test]
fn invalid_transfer_encoding_poisons_body() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\nContent-Length: 4\r\n\r\nbody")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    match conn.read(4).wait() {
        Err(Error::InvalidResponse(InvalidResponse::TransferEncoding(te))) => {
            assert_eq!(te, "gzip")
        }
        other => panic!("unexpected result: {other:?}"),
    }

    server.join().unwrap();
}

#[test]
fn peer_close_mid_body() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();

    let err = conn.read_all().wait().unwrap_err();
    match &err {
        Error::ConnectionClosed(_) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(is_temp_network_error(&err));

    server.join().unwrap();
}

#[test]
fn head_response_has_no_body() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.starts_with("HEAD / HTTP/1.1\r\n"));
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("HEAD", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    // content length of a head response does not announce body data
    assert_eq!(res.length(), Some(0));
    assert_eq!(conn.read_all().wait().unwrap(), b"");
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn informational_responses_are_skipped() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 102 Processing\r\n\r\n").unwrap();
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(conn.read_all().wait().unwrap(), b"ok");

    server.join().unwrap();
}

#[test]
fn read_into_granularities() {
    let body = b"granularity";
    for buf_len in [4usize, 11, 32] {
        let (addr, server) = serve(move |mut s| {
            read_head(&mut s);
            s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\ngranularity")
                .unwrap();
        });

        let mut conn = connection(addr);
        conn.send_request("GET", "/", None, RequestBody::Empty, false)
            .wait()
            .unwrap();
        conn.read_response().wait().unwrap();

        let mut collected = Vec::new();
        let mut buf = vec![0u8; buf_len];
        loop {
            let n = conn.read_into(&mut buf).wait().unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, body, "buffer length {buf_len}");

        match conn.read_into(&mut buf).wait() {
            Err(Error::State(StateError::NoActiveResponse)) => {}
            other => panic!("unexpected result: {other:?}"),
        }

        server.join().unwrap();
    }
}

#[test]
fn zero_length_reads_do_not_disturb_state() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();

    assert_eq!(conn.read(0).wait().unwrap(), b"");
    assert_eq!(conn.read_into(&mut []).wait().unwrap(), 0);
    assert_eq!(conn.read_all().wait().unwrap(), b"body");

    server.join().unwrap();
}

#[test]
fn discard_terminates_response_like_read_all() {
    let (addr, server) = serve(|mut s| {
        for _ in 0..2 {
            read_head(&mut s);
        }
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nignored")
            .unwrap();
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nkeep")
            .unwrap();
    });

    let mut conn = connection(addr);
    for path in ["/drop", "/keep"] {
        conn.send_request("GET", path, None, RequestBody::Empty, false)
            .wait()
            .unwrap();
    }

    conn.read_response().wait().unwrap();
    conn.discard().wait().unwrap();
    assert!(conn.response_pending());

    conn.read_response().wait().unwrap();
    assert_eq!(conn.read_all().wait().unwrap(), b"keep");
    assert!(!conn.response_pending());

    server.join().unwrap();
}

#[test]
fn caller_connection_header_is_kept() {
    let (addr, server) = serve(|mut s| {
        let head = read_head(&mut s);
        assert!(head.contains("\r\nConnection: close\r\n"));
        assert!(!head.contains("keep-alive"));
        assert!(head.contains("\r\nx-custom-header: 1\r\n"));
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let mut conn = connection(addr);
    let headers: HeaderMap = [("Connection", "close"), ("x-custom-header", "1")]
        .into_iter()
        .collect();
    conn.send_request("GET", "/", Some(headers), RequestBody::Empty, false)
        .wait()
        .unwrap();
    conn.read_response().wait().unwrap();
    conn.read_all().wait().unwrap();

    server.join().unwrap();
}

#[test]
fn tunnel_through_proxy() {
    let (addr, server) = serve(|mut s| {
        let connect = read_head(&mut s);
        assert_eq!(connect, "CONNECT example.test:80 HTTP/1.0\r\n\r\n");
        s.write_all(b"HTTP/1.0 200 Connection established\r\n\r\n")
            .unwrap();

        // act as the origin from here on
        let head = read_head(&mut s);
        assert!(head.starts_with("GET / HTTP/1.1\r\n"));
        assert!(head.contains("\r\nHost: example.test\r\n"));
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
    });

    let mut conn = Connection::new(
        "example.test",
        None,
        TlsConnector::Off,
        Some(("127.0.0.1".to_owned(), addr.port())),
    );
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let res = conn.read_response().wait().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(conn.read_all().wait().unwrap(), b"ok");

    server.join().unwrap();
}

#[test]
fn tunnel_refused_by_proxy() {
    let (addr, server) = serve(|mut s| {
        read_head(&mut s);
        s.write_all(b"HTTP/1.0 403 Forbidden\r\n\r\n").unwrap();
    });

    let mut conn = Connection::new(
        "example.test",
        None,
        TlsConnector::Off,
        Some(("127.0.0.1".to_owned(), addr.port())),
    );
    match conn.connect() {
        Err(Error::Tunnel { status: 403, reason }) => assert_eq!(reason, "Forbidden"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(conn.fd(), None);

    server.join().unwrap();
}

#[test]
fn step_contract_surfaces_poll_requests() {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (addr, server) = serve(move |mut s| {
        read_head(&mut s);
        release_rx.recv().unwrap();
        s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let mut conn = connection(addr);
    conn.send_request("GET", "/", None, RequestBody::Empty, false)
        .wait()
        .unwrap();
    let fd = conn.fd().unwrap();

    let mut op = conn.read_response();
    let req = match op.step().unwrap() {
        Step::Pending(req) => req,
        Step::Ready(_) => panic!("no response bytes are on the wire yet"),
    };
    assert_eq!(req.fd(), fd);
    assert!(req.interest().is_readable());

    release_tx.send(()).unwrap();

    let res = loop {
        match op.step().unwrap() {
            Step::Ready(res) => break res,
            Step::Pending(req) => {
                assert!(req.wait(Some(Duration::from_secs(5))).unwrap());
            }
        }
    };
    assert_eq!(res.status(), 200);
    assert_eq!(conn.read_all().wait().unwrap(), b"");

    server.join().unwrap();
}
