//! Upstream feed plumbing
//!
//! All three upstream services (primary gas feed, fallback air-quality feed,
//! weather) are reached through the [`Fetcher`] trait. Production code uses
//! [`HttpFetcher`]; tests and offline demos use [`CannedFetcher`].

pub mod extract;
pub mod fallback;
pub mod primary;
pub mod rate_limit;

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub use fallback::FallbackFeed;
pub use primary::{NormalizedFeed, PrimaryFeed};
pub use rate_limit::RollingWindowLimiter;

/// Outbound request failure. Always treated as ordinary, recoverable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Request exceeded its timeout
    Timeout,
    /// Non-2xx HTTP status
    Status(u16),
    /// Connection, DNS or TLS failure
    Transport(String),
    /// Body was not JSON, or not a shape we can use
    Body(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Timeout => write!(f, "request timed out"),
            FetchError::Status(code) => write!(f, "upstream returned HTTP {code}"),
            FetchError::Transport(msg) => write!(f, "transport error: {msg}"),
            FetchError::Body(msg) => write!(f, "malformed body: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else if e.is_decode() {
            FetchError::Body(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Something that can GET a JSON document.
pub trait Fetcher: Send + Sync {
    /// Fetch `url` with the given query parameters and parse the body as JSON.
    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError>;
}

/// Blocking HTTP fetcher with a bounded per-request timeout
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("airtwin/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let resp = self.client.get(url).query(query).send()?.error_for_status()?;
        Ok(resp.json::<Value>()?)
    }
}

/// Fake fetcher: replays queued responses, then repeats the last one.
///
/// Records how many requests were made so tests can assert that caches and
/// rate limiters actually suppressed outbound calls.
pub struct CannedFetcher {
    responses: Mutex<VecDeque<Result<Value, FetchError>>>,
    last: Mutex<Option<Result<Value, FetchError>>>,
    calls: AtomicUsize,
}

impl CannedFetcher {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<Value, FetchError>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same payload.
    pub fn always(payload: Value) -> Self {
        Self::new([Ok(payload)])
    }

    /// Always fails with the same error.
    pub fn failing(error: FetchError) -> Self {
        Self::new([Err(error)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for CannedFetcher {
    fn get_json(&self, _url: &str, _query: &[(&str, String)]) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self
            .responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(next) = queue.pop_front() {
            *last = Some(next.clone());
            return next;
        }
        last.clone()
            .unwrap_or_else(|| Err(FetchError::Transport("no canned response".into())))
    }
}

/// How a feed refresh was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FeedOutcome {
    /// Fetched from upstream just now
    Fresh { mapped: usize, total: usize },
    /// Served from a cache entry still inside its TTL
    Cached,
    /// Outbound limit reached; served an expired cache entry
    StaleRateLimited,
    /// Upstream failed; served an expired cache entry
    StaleUpstreamError,
}

impl FeedOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            FeedOutcome::StaleRateLimited | FeedOutcome::StaleUpstreamError
        )
    }
}
