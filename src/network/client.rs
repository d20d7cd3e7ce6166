use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Network, NetworkError};
use crate::http::{Method, Request, Response};

/// Maximum size of an upstream response we will buffer (8 MiB).
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 8192;

/// Fetches requests from a plain-HTTP upstream origin.
///
/// Each fetch opens a fresh connection, sends an HTTP/1.0 request and reads
/// the response until the upstream closes the connection.
///
/// # Examples
///
/// ```
/// use offcache::network::HttpNetwork;
///
/// let net = HttpNetwork::new("http://127.0.0.1:8000/").unwrap();
/// assert_eq!(net.authority(), "127.0.0.1:8000");
/// assert!(HttpNetwork::new("https://example.com").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    authority: String,
}

impl HttpNetwork {
    /// Creates a client for `origin`, e.g. `http://127.0.0.1:8000`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnsupportedOrigin`] for anything other than an
    /// `http://host[:port]` origin.
    pub fn new(origin: &str) -> Result<Self, NetworkError> {
        let unsupported = || NetworkError::UnsupportedOrigin {
            origin: origin.to_owned(),
        };
        let rest = origin.strip_prefix("http://").ok_or_else(unsupported)?;
        let host = rest.trim_end_matches('/');
        if host.is_empty() || host.contains('/') {
            return Err(unsupported());
        }
        let authority = if host.contains(':') {
            host.to_owned()
        } else {
            format!("{host}:80")
        };
        Ok(Self { authority })
    }

    /// Returns the `host:port` the client connects to.
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut stream = TcpStream::connect(&self.authority)
            .await
            .map_err(|source| NetworkError::Connect {
                addr: self.authority.clone(),
                source,
            })?;

        stream.write_all(&request.to_wire(&self.authority)).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        loop {
            if stream.read_buf(&mut buf).await? == 0 {
                break;
            }
            if buf.len() > MAX_RESPONSE_SIZE {
                return Err(NetworkError::TooLarge {
                    max_bytes: MAX_RESPONSE_SIZE,
                });
            }
        }

        let response = Response::parse_with(&buf, request.method() != &Method::Head)?;
        debug!(
            upstream = %self.authority,
            path = %request.path(),
            status = response.status().as_u16(),
            bytes = response.body_bytes().len(),
            "upstream responded"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::http::StatusCode;

    #[test]
    fn default_port() {
        let net = HttpNetwork::new("http://origin.local").unwrap();
        assert_eq!(net.authority(), "origin.local:80");
    }

    #[test]
    fn rejects_paths_in_origin() {
        assert!(matches!(
            HttpNetwork::new("http://origin.local/app"),
            Err(NetworkError::UnsupportedOrigin { .. })
        ));
    }

    #[tokio::test]
    async fn fetches_from_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(head.starts_with("GET /static/gruvbox.css HTTP/1.0\r\n"));
            socket
                .write_all(b"HTTP/1.0 200 OK\r\nContent-Type: text/css\r\n\r\nbody{}")
                .await
                .unwrap();
        });

        let net = HttpNetwork::new(&format!("http://{addr}")).unwrap();
        let response = net.fetch(&Request::get("/static/gruvbox.css")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type"), Some("text/css"));
        assert_eq!(response.body_bytes().as_ref(), b"body{}");
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let net = HttpNetwork::new(&format!("http://{addr}")).unwrap();
        let err = net.fetch(&Request::get("/")).await.unwrap_err();
        assert!(matches!(err, NetworkError::Connect { .. }));
    }
}
