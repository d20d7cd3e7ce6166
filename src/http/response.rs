//! HTTP responses: a fluent builder, the HTTP/1.1 serializer used by the
//! server, and the parser used on upstream replies.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, StatusCode};

/// Headers describing the connection a response travelled on rather than the
/// response itself. They are dropped when a response is captured.
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "proxy-connection",
];

/// Errors produced while parsing an upstream response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing status code")]
    MissingStatus,

    #[error("status code {0} is out of range")]
    UnsupportedStatus(u16),
}

/// An HTTP response.
///
/// The body is a shared [`Bytes`] buffer, so a response can be handed to the
/// caller and to the cache at the same time: each side holds its own clone
/// and neither consumes the other's copy.
///
/// # Examples
///
/// ```
/// use offcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "text/css")
///     .body("body { color: #ebdbb2; }");
///
/// let stored = response.clone();
/// assert_eq!(stored.body_bytes(), response.body_bytes());
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 24\r\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Reassembles a response from captured parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Parses a complete upstream response read until EOF.
    ///
    /// The body is everything after the header block, truncated to
    /// `Content-Length` when the upstream sent one. Hop-by-hop headers are
    /// stripped so the captured response can be replayed on any connection.
    pub fn parse(buf: &[u8]) -> Result<Self, ResponseError> {
        Self::parse_with(buf, true)
    }

    /// Like [`parse`](Self::parse), for replies that may carry no body even
    /// though they announce a length: pass `expect_body = false` for `HEAD`.
    /// `1xx`, `204` and `304` replies are always bodyless.
    pub fn parse_with(buf: &[u8], expect_body: bool) -> Result<Self, ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw.code.ok_or(ResponseError::MissingStatus)?;
        let status = StatusCode::from_u16(code).ok_or(ResponseError::UnsupportedStatus(code))?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        let mut content_length = None;
        for header in raw.headers.iter() {
            let Ok(value) = std::str::from_utf8(header.value) else {
                continue;
            };
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
            if !HOP_BY_HOP.iter().any(|hop| header.name.eq_ignore_ascii_case(hop)) {
                header_map.insert(header.name, value);
            }
        }

        let bodyless = !expect_body
            || code < 200
            || matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED);
        let rest = &buf[body_offset..];
        let body = match content_length {
            _ if bodyless => &rest[..0],
            Some(len) if len <= rest.len() => &rest[..len],
            Some(_) => return Err(ResponseError::Incomplete),
            None => rest,
        };

        Ok(Self::from_parts(status, header_map, Bytes::copy_from_slice(body)))
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        for hop in HOP_BY_HOP {
            self.headers.remove(hop);
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or_default()
            )
            .as_bytes(),
        );
        buf.put(self.headers.to_string().as_bytes());

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn no_body_no_content_type() {
        let r = Response::new(StatusCode::NO_CONTENT);
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::OK).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn parse_strips_hop_by_hop_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";
        let r = Response::parse(raw).unwrap();
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(r.headers().get("content-type"), Some("text/html"));
        assert!(!r.headers().contains("content-length"));
        assert!(!r.headers().contains("connection"));
        assert_eq!(r.body_bytes().as_ref(), b"hello");
    }

    #[test]
    fn parse_without_length_reads_to_end() {
        let raw = b"HTTP/1.0 404 Not Found\r\n\r\ngone";
        let r = Response::parse(raw).unwrap();
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
        assert_eq!(r.body_bytes().as_ref(), b"gone");
    }

    #[test]
    fn parse_short_body_is_incomplete() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello";
        assert!(matches!(Response::parse(raw), Err(ResponseError::Incomplete)));
    }

    #[test]
    fn head_reply_has_no_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1024\r\n\r\n";
        assert!(matches!(Response::parse(raw), Err(ResponseError::Incomplete)));
        let r = Response::parse_with(raw, false).unwrap();
        assert!(r.body_bytes().is_empty());
    }

    #[test]
    fn unregistered_status_passes_through() {
        let raw = b"HTTP/1.0 207 Multi-Status\r\nContent-Type: application/xml\r\n\r\n<multistatus/>";
        let r = Response::parse(raw).unwrap();
        assert_eq!(r.status().as_u16(), 207);
        assert_eq!(r.body_bytes().as_ref(), b"<multistatus/>");

        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 207 \r\n"));
    }

    #[test]
    fn status_below_100_is_rejected() {
        let raw = b"HTTP/1.1 099 Odd\r\n\r\n";
        assert!(matches!(Response::parse(raw), Err(ResponseError::UnsupportedStatus(99))));
    }

    #[test]
    fn serialized_response_reparses() {
        let original = Response::new(StatusCode::OK)
            .header("Content-Type", "application/javascript")
            .body("main();");
        let reparsed = Response::parse(&original.clone().into_bytes()).unwrap();
        assert_eq!(reparsed, original);
    }
}
