//! response head parsing.

use tracing::warn;

use crate::{
    error::{Error, InvalidResponse, UnsupportedResponse},
    headers::HeaderMap,
};

/// Decode raw wire bytes as latin-1 text.
///
/// Every byte value maps to a char, so this never fails.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Parse a status line (with or without the trailing CRLF) into status code
/// and reason phrase.
pub(crate) fn status_line(line: &str) -> Result<(u16, String), Error> {
    let mut rest = line.trim_start();
    let version = take_word(&mut rest);
    let status = take_word(&mut rest);
    let reason = rest.trim();

    if !version.starts_with("HTTP/1") {
        return Err(Error::UnsupportedResponse(UnsupportedResponse::Version(
            version.to_owned(),
        )));
    }

    let code = status
        .parse::<u16>()
        .map_err(|_| Error::InvalidResponse(InvalidResponse::MalformedStatus(status.to_owned())))?;
    if !(100..=999).contains(&code) {
        return Err(Error::InvalidResponse(InvalidResponse::StatusOutOfRange(code)));
    }

    Ok((code, reason.to_owned()))
}

fn take_word<'a>(s: &mut &'a str) -> &'a str {
    let trimmed = s.trim_start();
    let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    let (word, rest) = trimmed.split_at(end);
    *s = rest;
    word
}

/// Parse a header section into a [HeaderMap].
///
/// Lines are CRLF separated; a line starting with space or horizontal tab
/// continues the previous header value (the fold is replaced by a single
/// space). Names and values are trimmed. A line without a colon is ignored,
/// matching the leniency of mail style header parsers. Duplicate names
/// collapse through the map; the later occurrence wins.
pub(crate) fn header_block(block: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, String)> = None;

    for line in block.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.insert(name, value);
        }
        match line.split_once(':') {
            Some((name, value)) => {
                current = Some((name.trim().to_owned(), value.trim().to_owned()));
            }
            None => warn!(target: "h1_decode", "ignoring malformed header line {:?}", line),
        }
    }
    if let Some((name, value)) = current.take() {
        headers.insert(name, value);
    }

    headers
}

/// Parse a chunk size line: hexadecimal size, optionally followed by
/// `;`-separated chunk extensions which are stripped.
pub(crate) fn chunk_size(line: &str) -> Result<u64, Error> {
    let line = line.trim_end_matches(['\r', '\n']);
    let size = match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    };
    u64::from_str_radix(size.trim(), 16).map_err(|_| {
        Error::InvalidResponse(InvalidResponse::ChunkSize(line.chars().take(20).collect()))
    })
}
