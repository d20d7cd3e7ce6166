//! HTTP requests: parsing client requests with [`httparse`] and writing
//! upstream requests back onto the wire.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Fetch mode of a request, as a browser reports it in `Sec-Fetch-Mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => Self::Navigate,
            "no-cors" => Self::NoCors,
            "cors" => Self::Cors,
            _ => Self::SameOrigin,
        }
    }
}

/// Cache mode of a request. Only `only-if-cached` changes how the fetcher
/// treats the request; the other modes are carried for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// An HTTP request, either parsed off a client connection or built in code.
///
/// Cloning is cheap: the body is a shared [`Bytes`] buffer.
///
/// # Examples
///
/// ```
/// use offcache::http::{Method, Request};
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
///
/// let built = Request::get("/static/elm.js").header("Accept", "*/*");
/// assert_eq!(built.headers().get("accept"), Some("*/*"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    mode: RequestMode,
    cache: CacheMode,
}

impl Request {
    /// Creates a request for `target`, which may carry a query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            version: 1,
            headers: Headers::new(),
            query,
            body: Bytes::new(),
            mode: RequestMode::default(),
            cache: CacheMode::default(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target)
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn cache_mode(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Attempts to parse a complete HTTP/1.x request from `buf`.
    ///
    /// Returns the parsed [`Request`] and the byte offset where the body begins,
    /// or [`RequestError::Incomplete`] if the headers have not fully arrived.
    /// The fetch mode is read from `Sec-Fetch-Mode`, and `Cache-Control:
    /// only-if-cached` selects [`CacheMode::OnlyIfCached`].
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
            .unwrap_or_else(|never| match never {});

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = split_target(target);

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let mode = header_map
            .get("sec-fetch-mode")
            .map(RequestMode::from_header)
            .unwrap_or_default();
        let cache = if header_map
            .get_all("cache-control")
            .flat_map(|value| value.split(','))
            .any(|directive| directive.trim().eq_ignore_ascii_case("only-if-cached"))
        {
            CacheMode::OnlyIfCached
        } else {
            CacheMode::Default
        };

        let content_length: usize = header_map
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let body_end = (body_offset + content_length).min(buf.len());
        let body = Bytes::copy_from_slice(&buf[body_offset..body_end]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
                mode,
                cache,
            },
            body_offset,
        ))
    }

    /// Serializes the request as an HTTP/1.0 upstream request for `host`.
    ///
    /// HTTP/1.0 keeps the upstream from answering with chunked encoding, and
    /// the connection is closed after the response. Hop-by-hop headers from
    /// the client are dropped.
    pub fn to_wire(&self, host: &str) -> BytesMut {
        let mut headers = self.headers.clone();
        for hop in ["keep-alive", "transfer-encoding", "content-length"] {
            headers.remove(hop);
        }
        headers.set("Host", host);
        headers.set("Connection", "close");
        if !self.body.is_empty() {
            headers.insert("Content-Length", self.body.len().to_string());
        }

        let mut buf = BytesMut::with_capacity(128 + headers.len() * 64 + self.body.len());
        buf.put(format!("{} {} HTTP/1.0\r\n", self.method, self.target()).as_bytes());
        buf.put(headers.to_string().as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());
        buf
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the path followed by `?query` when there is one.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn fetch_mode(&self) -> RequestMode {
        self.mode
    }

    pub fn cache(&self) -> CacheMode {
        self.cache
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}
