//! Cache identity of a request.

use std::fmt;

use super::{Method, Request};

/// Identity of a cache entry: method plus origin-scoped URL.
///
/// The origin is the scope the cache serves (for the proxy, the upstream
/// origin), not whatever `Host` the client sent, so preloaded entries and
/// intercepted requests land on the same key.
///
/// # Examples
///
/// ```
/// use offcache::http::{Request, RequestKey};
///
/// let key = RequestKey::for_request("http://localhost:8000", &Request::get("/static/elm.js"));
/// assert_eq!(key.as_str(), "GET http://localhost:8000/static/elm.js");
///
/// // Relative keys resolve against the origin root.
/// let offline = RequestKey::resource("http://localhost:8000/", "offline.html");
/// assert_eq!(offline.as_str(), "GET http://localhost:8000/offline.html");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Builds the key for `request` within `origin`.
    pub fn for_request(origin: &str, request: &Request) -> Self {
        let mut target = normalize_path(request.path());
        if let Some(query) = request.query_string() {
            target.push('?');
            target.push_str(query);
        }
        Self::compose(request.method(), origin, &target)
    }

    /// Builds the `GET` key for a resource path such as `/` or `offline.html`.
    pub fn resource(origin: &str, path: &str) -> Self {
        Self::compose(&Method::Get, origin, &normalize_path(path))
    }

    fn compose(method: &Method, origin: &str, target: &str) -> Self {
        Self(format!("{} {}{}", method, origin.trim_end_matches('/'), target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}
