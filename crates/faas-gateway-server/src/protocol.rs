//! Captured module output is a literal HTTP/1.x response; parse it the way a client would.

use axum::body::Body;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use faas_common::{FaasError, Result};

const MAX_HEADERS: usize = 64;
const KEEP_ALIVE: &str = "keep-alive";

#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

fn protocol_error(msg: impl Into<String>) -> FaasError {
    FaasError::Protocol(msg.into())
}

/// Parse status line, headers and body. Anything short of a complete,
/// well-formed response is a protocol error.
pub fn parse_response(raw: &[u8]) -> Result<CapturedResponse> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_buf);

    let head_len = match parsed.parse(raw) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Err(protocol_error("incomplete response head")),
        Err(e) => return Err(protocol_error(format!("malformed response head: {e}"))),
    };

    let code = parsed
        .code
        .ok_or_else(|| protocol_error("missing status code"))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| protocol_error(format!("invalid status code {code}")))?;

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| protocol_error(format!("invalid header name {:?}: {e}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| protocol_error(format!("invalid value for header {name}: {e}")))?;
        headers.append(name, value);
    }

    let rest = &raw[head_len..];
    let body = if is_chunked(&headers) {
        decode_chunked(rest)?
    } else if let Some(len) = content_length(&headers)? {
        if rest.len() < len {
            return Err(protocol_error(format!(
                "body shorter than Content-Length: {} < {len}",
                rest.len()
            )));
        }
        rest[..len].to_vec()
    } else {
        rest.to_vec()
    };

    strip_hop_by_hop(&mut headers);
    if headers.contains_key(CONTENT_LENGTH) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    Ok(CapturedResponse {
        status,
        headers,
        body,
    })
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>> {
    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed: usize = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| protocol_error("invalid Content-Length"))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(protocol_error("conflicting Content-Length headers"));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn decode_chunked(mut buf: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(buf) {
            Ok(httparse::Status::Complete(chunk)) => chunk,
            Ok(httparse::Status::Partial) => return Err(protocol_error("truncated chunk header")),
            Err(_) => return Err(protocol_error("invalid chunk size")),
        };
        buf = &buf[consumed..];
        if size == 0 {
            // Trailers, if any, are dropped.
            return Ok(body);
        }

        let size = usize::try_from(size).map_err(|_| protocol_error("chunk too large"))?;
        if buf.len() < size + 2 {
            return Err(protocol_error("truncated chunk"));
        }
        if &buf[size..size + 2] != b"\r\n" {
            return Err(protocol_error("chunk not terminated by CRLF"));
        }
        body.extend_from_slice(&buf[..size]);
        buf = &buf[size + 2..];
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
    headers.remove(KEEP_ALIVE);
}

impl IntoResponse for CapturedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
