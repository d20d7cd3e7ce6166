use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{Network, NetworkError};
use crate::http::{Request, Response, StatusCode};

/// An in-memory origin.
///
/// Serves registered routes by request target (path plus query), answers
/// `404` for anything else, and fails every fetch while switched offline.
/// Scripted outcomes take precedence over routes and are consumed one per
/// fetch, which lets a test make one particular fetch fail.
///
/// # Examples
///
/// ```
/// use offcache::http::{Request, Response, StatusCode};
/// use offcache::network::{Network, StaticNetwork};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let net = StaticNetwork::new();
/// net.route("/", Response::new(StatusCode::OK).body("home"));
///
/// assert_eq!(net.fetch(&Request::get("/")).await.unwrap().status(), StatusCode::OK);
/// assert_eq!(net.fetch(&Request::get("/missing")).await.unwrap().status(), StatusCode::NOT_FOUND);
///
/// net.set_online(false);
/// assert!(net.fetch(&Request::get("/")).await.is_err());
/// assert_eq!(net.calls(), 3);
/// # }
/// ```
#[derive(Debug)]
pub struct StaticNetwork {
    routes: Mutex<HashMap<String, Response>>,
    scripted: Mutex<HashMap<String, VecDeque<Option<Response>>>>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl StaticNetwork {
    /// Creates an online origin with no routes.
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Serves `response` for `target` until replaced.
    pub fn route(&self, target: &str, response: Response) {
        lock(&self.routes).insert(target.to_owned(), response);
    }

    /// Stops serving `target`; later fetches get `404`.
    pub fn unroute(&self, target: &str) {
        lock(&self.routes).remove(target);
    }

    /// Queues a one-shot outcome for the next fetch of `target`. `None`
    /// fails that fetch as if the network were down.
    pub fn script(&self, target: &str, outcome: Option<Response>) {
        lock(&self.scripted)
            .entry(target.to_owned())
            .or_default()
            .push_back(outcome);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of fetches attempted so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Network for StaticNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target = request.target();

        let scripted = lock(&self.scripted)
            .get_mut(&target)
            .and_then(VecDeque::pop_front);
        if let Some(outcome) = scripted {
            return outcome.ok_or(NetworkError::Offline);
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetworkError::Offline);
        }

        Ok(lock(&self.routes)
            .get(&target)
            .cloned()
            .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND).body("Not Found")))
    }
}

// A poisoned map still holds consistent data; every critical section is a
// single insert, remove or lookup.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order() {
        let net = StaticNetwork::new();
        net.route("/", Response::new(StatusCode::OK).body("routed"));
        net.script("/", None);
        net.script("/", Some(Response::new(StatusCode::ACCEPTED)));

        assert!(matches!(net.fetch(&Request::get("/")).await, Err(NetworkError::Offline)));
        assert_eq!(net.fetch(&Request::get("/")).await.unwrap().status(), StatusCode::ACCEPTED);
        assert_eq!(net.fetch(&Request::get("/")).await.unwrap().body_bytes().as_ref(), b"routed");
    }

    #[tokio::test]
    async fn routes_match_query_strings() {
        let net = StaticNetwork::new();
        net.route("/search?q=rust", Response::new(StatusCode::OK));
        assert_eq!(net.fetch(&Request::get("/search?q=rust")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(net.fetch(&Request::get("/search")).await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unroute_turns_into_not_found() {
        let net = StaticNetwork::new();
        net.route("/old", Response::new(StatusCode::OK));
        net.unroute("/old");
        assert_eq!(net.fetch(&Request::get("/old")).await.unwrap().status(), StatusCode::NOT_FOUND);
    }
}
