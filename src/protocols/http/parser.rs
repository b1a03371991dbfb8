//! HTTP/1.x request head parser.
//!
//! Works on a complete header block (request line, header lines and the
//! terminating blank line) already sitting in the connection's read buffer.
//! The request line and header fields are consumed byte by byte through an
//! explicit state machine; lines end at `LF`, a preceding `CR` is optional.

use crate::protocols::http::request::HttpRequest;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Header terminator.
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Smallest header block worth parsing.
const MIN_HEAD_LEN: usize = 6;

/// Errors from parsing a request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Header block too short to hold a request line.
    TooShort(usize),
    /// Request line lacks a method, path or version.
    IncompleteRequestLine,
    /// `Content-Length` is not a non-negative integer.
    InvalidContentLength(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort(len) => write!(f, "header block too short ({len} bytes)"),
            ParseError::IncompleteRequestLine => write!(f, "incomplete request line"),
            ParseError::InvalidContentLength(value) => {
                write!(f, "invalid Content-Length '{value}'")
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadState {
    Method,
    Path,
    Version,
    ParamKey,
    ParamValue,
}

/// Find the end of the header block.
///
/// Returns the index one past the terminating `CRLFCRLF`.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_END.len())
        .position(|w| w == HEAD_END)
        .map(|pos| pos + HEAD_END.len())
}

/// Parse a header block into `request`.
///
/// Overwrites `method`, `path` and `version` and adds to `headers`. For GET
/// requests the query string is split off `path` into `query_params`.
pub fn parse_head(data: &[u8], request: &mut HttpRequest) -> Result<(), ParseError> {
    if data.len() < MIN_HEAD_LEN {
        return Err(ParseError::TooShort(data.len()));
    }

    let mut state = HeadState::Method;
    let mut method = Vec::new();
    let mut path = Vec::new();
    let mut version = Vec::new();

    for line in data.split_inclusive(|&b| b == b'\n') {
        let mut key = Vec::new();
        let mut value = Vec::new();

        for &b in line {
            match state {
                HeadState::Method => match b {
                    b' ' => state = HeadState::Path,
                    _ => method.push(b),
                },
                HeadState::Path => match b {
                    b' ' => state = HeadState::Version,
                    _ => path.push(b),
                },
                HeadState::Version => match b {
                    b'\n' => state = HeadState::ParamKey,
                    b'\r' => {}
                    _ => version.push(b),
                },
                // A colon is dropped without ending the key; the space after
                // it starts the value.
                HeadState::ParamKey => match b {
                    b' ' => state = HeadState::ParamValue,
                    b':' | b'\r' | b'\n' => {}
                    _ => key.push(b),
                },
                HeadState::ParamValue => match b {
                    b'\r' | b'\n' => {
                        request
                            .headers
                            .insert(lossy(&key).into_owned(), lossy(&value).into_owned());
                        key.clear();
                        value.clear();
                        state = HeadState::ParamKey;
                    }
                    _ => value.push(b),
                },
            }
        }
    }

    if matches!(
        state,
        HeadState::Method | HeadState::Path | HeadState::Version
    ) || method.is_empty()
    {
        return Err(ParseError::IncompleteRequestLine);
    }

    request.method = lossy(&method).into_owned();
    request.path = lossy(&path).into_owned();
    request.version = lossy(&version).into_owned();

    if request.method == "GET" {
        split_query(request);
    }
    Ok(())
}

/// Move the query string of `request.path` into `request.query_params`.
fn split_query(request: &mut HttpRequest) {
    if let Some(pos) = request.path.find('?') {
        parse_parameters(&request.path.as_bytes()[pos + 1..], &mut request.query_params);
        request.path.truncate(pos);
    }
}

/// Parse `key1=value1&key2=value2` pairs into `params`.
///
/// A key without `=` maps to an empty value. Nothing is percent-decoded.
pub fn parse_parameters(data: &[u8], params: &mut HashMap<String, String>) {
    let mut pre = 0;
    while pre < data.len() {
        let rest = &data[pre..];
        let end = rest.iter().position(|&b| b == b'&').unwrap_or(rest.len());
        let pair = &rest[..end];
        match pair.iter().position(|&b| b == b'=') {
            Some(eq) => {
                params.insert(
                    lossy(&pair[..eq]).into_owned(),
                    lossy(&pair[eq + 1..]).into_owned(),
                );
            }
            None => {
                params.insert(lossy(pair).into_owned(), String::new());
            }
        }
        pre += end + 1;
    }
}

/// Read the body length advertised by `Content-Length`.
///
/// A missing header means no body.
pub fn parse_content_length(headers: &HashMap<String, String>) -> Result<usize, ParseError> {
    match headers.get("Content-Length") {
        None => Ok(0),
        Some(value) => value
            .trim()
            .parse::<u32>()
            .map(|len| len as usize)
            .map_err(|_| ParseError::InvalidContentLength(value.clone())),
    }
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
