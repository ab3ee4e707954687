//! Just enough HTTP/1.1 for a persistent, strictly ordered request/response
//! link: request serialization and an incremental response parser.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use memchr::memmem;
use std::str;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";
const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 1024;

/// Largest response body accepted, content-length or de-chunked.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- Request ---------------------------------------------------------------

/// Serialize a request with a `Content-Length` body.
///
/// Header names and values must already be validated with
/// [`is_header_name`] / [`is_header_value`].
pub fn write_request<'a>(
    buf: &mut BytesMut,
    method: &str,
    path: &str,
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    body: &[u8],
) {
    buf.reserve(256 + body.len());

    buf.extend_from_slice(method.as_bytes());
    buf.put_u8(b' ');
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers {
        put_header(buf, name, value);
    }
    put_header(buf, "Content-Length", &body.len().to_string());

    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(body);
}

/// RFC 9110 `token`.
pub fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

/// Visible ASCII, spaces and tabs; nothing that could end the header line.
pub fn is_header_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b == b'\t' || (0x20..0x7F).contains(&b) || b >= 0x80)
}

// -----------------------------------------------------------------------------
// ----- HttpResponse ----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,

    /// Lower-cased names, wire order, duplicates kept.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// 1xx responses precede the real one and do not answer the request.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Response decoding -----------------------------------------------------

/// Pull one complete response off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the response is still
/// incomplete. On success exactly the response's bytes are consumed.
pub fn decode_response(buf: &mut BytesMut) -> Result<Option<HttpResponse>, HttpCodecError> {
    let Some(header_end) = memmem::find(&buf[..], HEADER_TERMINATOR) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(HttpCodecError::HeadersTooLarge);
        }
        return Ok(None);
    };

    let head = str::from_utf8(&buf[..header_end]).map_err(|_| HttpCodecError::InvalidUtf8)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpCodecError::BadHeader(line.to_owned()))?;
        if !is_header_name(name) {
            return Err(HttpCodecError::BadHeader(line.to_owned()));
        }
        headers.push((
            name.to_ascii_lowercase(),
            value.trim_matches([' ', '\t']).to_owned(),
        ));
    }

    let body_start = header_end + HEADER_TERMINATOR.len();
    let framing = body_framing(status, &headers)?;

    let (body, consumed) = match framing {
        BodyFraming::Empty => (Bytes::new(), body_start),

        BodyFraming::Length(len) => {
            let end = body_start
                .checked_add(len)
                .ok_or(HttpCodecError::BodyTooLarge(len))?;
            if buf.len() < end {
                return Ok(None);
            }
            let mut frame = buf.split_to(end);
            frame.advance(body_start);
            return Ok(Some(HttpResponse {
                status,
                reason,
                headers,
                body: frame.freeze(),
            }));
        }

        BodyFraming::Chunked => match decode_chunked(&buf[body_start..])? {
            Some((body, used)) => (body, body_start + used),
            None => return Ok(None),
        },
    };

    buf.advance(consumed);

    Ok(Some(HttpResponse {
        status,
        reason,
        headers,
        body,
    }))
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(CRLF);
}

fn parse_status_line(line: &str) -> Result<(u16, String), HttpCodecError> {
    let bad = || HttpCodecError::BadStatusLine(line.to_owned());

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(bad)?;
    if !version.starts_with("HTTP/1.") {
        return Err(bad());
    }

    let code = parts.next().ok_or_else(bad)?;
    if code.len() != 3 {
        return Err(bad());
    }
    let status = code.parse::<u16>().map_err(|_| bad())?;
    let reason = parts.next().unwrap_or_default().to_owned();

    Ok((status, reason))
}

fn body_framing(status: u16, headers: &[(String, String)]) -> Result<BodyFraming, HttpCodecError> {
    if (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(BodyFraming::Empty);
    }

    let chunked = headers
        .iter()
        .filter(|(n, _)| n == "transfer-encoding")
        .any(|(_, v)| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    let mut length = None;
    for (_, value) in headers.iter().filter(|(n, _)| n == "content-length") {
        let parsed = value
            .parse::<usize>()
            .map_err(|_| HttpCodecError::BadContentLength(value.clone()))?;
        if length.is_some_and(|l| l != parsed) {
            return Err(HttpCodecError::BadContentLength(value.clone()));
        }
        if parsed > MAX_BODY_BYTES {
            return Err(HttpCodecError::BodyTooLarge(parsed));
        }
        length = Some(parsed);
    }

    length
        .map(BodyFraming::Length)
        .ok_or(HttpCodecError::UndelimitedBody)
}

/// Returns the de-chunked body and the number of bytes it occupied on the wire.
fn decode_chunked(input: &[u8]) -> Result<Option<(Bytes, usize)>, HttpCodecError> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let Some(line_len) = memmem::find(&input[pos..], CRLF) else {
            if input.len() - pos > MAX_CHUNK_LINE_BYTES {
                return Err(HttpCodecError::BadChunk);
            }
            return Ok(None);
        };

        let line = str::from_utf8(&input[pos..pos + line_len]).map_err(|_| HttpCodecError::BadChunk)?;
        let size_hex = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| HttpCodecError::BadChunk)?;
        pos += line_len + CRLF.len();

        if size == 0 {
            // trailer section: zero or more header lines, then an empty line
            loop {
                let Some(trailer_len) = memmem::find(&input[pos..], CRLF) else {
                    return Ok(None);
                };
                pos += trailer_len + CRLF.len();
                if trailer_len == 0 {
                    return Ok(Some((body.freeze(), pos)));
                }
            }
        }

        let total = body.len().saturating_add(size);
        if total > MAX_BODY_BYTES {
            return Err(HttpCodecError::BodyTooLarge(total));
        }

        let data_end = pos + size;
        if input.len() < data_end + CRLF.len() {
            return Ok(None);
        }
        if &input[data_end..data_end + CRLF.len()] != CRLF {
            return Err(HttpCodecError::BadChunk);
        }

        body.extend_from_slice(&input[pos..data_end]);
        pos = data_end + CRLF.len();
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HttpCodecError {
    #[error("bad status line: {0:?}")]
    BadStatusLine(String),

    #[error("bad header line: {0:?}")]
    BadHeader(String),

    #[error("bad content-length: {0:?}")]
    BadContentLength(String),

    #[error("malformed chunked body")]
    BadChunk,

    #[error("response body of {0} bytes exceeds the limit")]
    BodyTooLarge(usize),

    #[error("response headers exceed 64 KiB")]
    HeadersTooLarge,

    #[error("response headers are not valid utf-8")]
    InvalidUtf8,

    #[error("response has neither content-length nor chunked encoding")]
    UndelimitedBody,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
