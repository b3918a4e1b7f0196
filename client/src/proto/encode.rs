//! request head serialization.

use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use md5::{Digest as _, Md5};

use crate::{
    error::{ArgumentError, Error},
    headers::HeaderMap,
};

/// Serialize request line and header section:
///
/// ```text
/// METHOD PATH HTTP/1.1\r\n
/// Name: Value\r\n       (per header, insertion order)
/// \r\n
/// ```
///
/// Names and values are encoded as latin-1.
pub(crate) fn request_head(
    buf: &mut BytesMut,
    method: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<(), Error> {
    buf.reserve(method.len() + path.len() + 16);

    put_latin1(buf, method)?;
    buf.put_slice(b" ");
    put_latin1(buf, path)?;
    buf.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers {
        put_latin1(buf, name)?;
        buf.put_slice(b": ");
        put_latin1(buf, value)?;
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");

    Ok(())
}

pub(crate) fn put_latin1(buf: &mut BytesMut, s: &str) -> Result<(), Error> {
    for ch in s.chars() {
        match u32::from(ch) {
            c @ 0..=0xff => buf.put_u8(c as u8),
            _ => return Err(Error::Argument(ArgumentError::NotLatin1(s.to_owned()))),
        }
    }
    Ok(())
}

/// base64 encoded md5 digest for the Content-MD5 header of an inline body.
pub(crate) fn content_md5(body: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Md5::digest(body))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_head_in_insertion_order() {
        let mut headers = HeaderMap::new();
        headers.insert("Host", "example.com");
        headers.insert("Content-Length", "0");

        let mut buf = BytesMut::new();
        request_head(&mut buf, "GET", "/index.html", &headers).unwrap();

        assert_eq!(
            buf.as_ref(),
            b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn empty_header_map_ends_head_at_once() {
        let mut buf = BytesMut::new();
        request_head(&mut buf, "HEAD", "/", &HeaderMap::new()).unwrap();
        assert_eq!(buf.as_ref(), b"HEAD / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn latin1_round_trip_and_rejection() {
        let mut buf = BytesMut::new();
        put_latin1(&mut buf, "na\u{ef}ve").unwrap();
        assert_eq!(buf.as_ref(), b"na\xefve");

        let mut headers = HeaderMap::new();
        headers.insert("X-Note", "\u{2603}");
        let mut buf = BytesMut::new();
        match request_head(&mut buf, "GET", "/", &headers) {
            Err(Error::Argument(ArgumentError::NotLatin1(_))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn content_md5_of_known_body() {
        assert_eq!(content_md5(b"abc"), "kAFQmDzST7DWlj99KOF/cg==");
    }
}
