//! Network retrieval of remote content.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use session_relay_core::ResolutionError;
use thiserror::Error;
use url::Url;

/// Fetch error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Failed to read body: {0}")]
    Body(String),
    #[error("Request timed out")]
    TimedOut,
}

impl FetchError {
    /// Classify into the resolution taxonomy. `timeout` is the per-fetch
    /// limit reported for timeouts.
    #[must_use]
    pub fn into_resolution(self, url: &Url, timeout: Duration) -> ResolutionError {
        match self {
            Self::Status(404 | 410) => ResolutionError::NotFound(url.to_string()),
            Self::Status(401 | 403) => ResolutionError::Unauthorized(url.to_string()),
            Self::Status(code) => ResolutionError::Unreachable(format!("{url}: HTTP {code}")),
            Self::Connect(e) | Self::Body(e) => ResolutionError::Unreachable(format!("{url}: {e}")),
            Self::TimedOut => ResolutionError::Timeout(timeout),
        }
    }
}

/// Retrieves raw content for a URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the content at `url`, attaching `credentials` as a bearer
    /// token if present.
    async fn fetch(&self, url: &Url, credentials: Option<&str>) -> Result<Bytes, FetchError>;
}

/// Fetcher backed by `reqwest`.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS roots, pooling).
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
fn classify(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::TimedOut
    } else if let Some(status) = err.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Connect(err.to_string())
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, credentials: Option<&str>) -> Result<Bytes, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = credentials {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))
    }
}

enum Route {
    Content { body: Bytes, delay: Duration },
    Fail(FetchError),
}

/// In-memory fetcher serving a fixed URL map.
///
/// Unknown URLs answer 404. Supports per-URL latency and failure injection
/// and counts calls, which makes it suitable for embedding and tests.
#[derive(Default)]
pub struct MapFetcher {
    routes: Mutex<HashMap<Url, Route>>,
    calls: Mutex<HashMap<Url, usize>>,
    total_calls: AtomicUsize,
}

impl MapFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    pub fn insert(&self, url: Url, body: impl Into<Bytes>) {
        self.insert_delayed(url, body, Duration::ZERO);
    }

    /// Serve `body` at `url` after `delay`.
    pub fn insert_delayed(&self, url: Url, body: impl Into<Bytes>, delay: Duration) {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).insert(
            url,
            Route::Content {
                body: body.into(),
                delay,
            },
        );
    }

    /// Make fetches of `url` fail with `error`.
    pub fn fail(&self, url: Url, error: FetchError) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, Route::Fail(error));
    }

    /// Total number of fetches performed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Number of fetches performed for one URL.
    #[must_use]
    pub fn calls_for(&self, url: &Url) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ContentFetcher for MapFetcher {
    async fn fetch(&self, url: &Url, _credentials: Option<&str>) -> Result<Bytes, FetchError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.clone())
            .or_default() += 1;

        let outcome = match self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
        {
            Some(Route::Content { body, delay }) => Ok((body.clone(), *delay)),
            Some(Route::Fail(error)) => Err(error.clone()),
            None => Err(FetchError::Status(404)),
        };

        let (body, delay) = outcome?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use session_relay_core::ResolutionErrorKind;

    use super::*;

    #[test]
    fn test_status_classification() {
        let url = Url::parse("https://store.example/a").unwrap();
        let timeout = Duration::from_secs(3);
        let cases = [
            (FetchError::Status(404), ResolutionErrorKind::NotFound),
            (FetchError::Status(410), ResolutionErrorKind::NotFound),
            (FetchError::Status(403), ResolutionErrorKind::Unauthorized),
            (FetchError::Status(503), ResolutionErrorKind::Unreachable),
            (FetchError::Connect("refused".into()), ResolutionErrorKind::Unreachable),
            (FetchError::TimedOut, ResolutionErrorKind::Timeout),
        ];
        for (err, kind) in cases {
            assert_eq!(err.into_resolution(&url, timeout).kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_map_fetcher_counts_calls() {
        let fetcher = MapFetcher::new();
        let known = Url::parse("https://store.example/a").unwrap();
        let unknown = Url::parse("https://store.example/b").unwrap();
        fetcher.insert(known.clone(), "body");

        assert_eq!(fetcher.fetch(&known, None).await.unwrap(), "body");
        assert_eq!(
            fetcher.fetch(&unknown, None).await,
            Err(FetchError::Status(404))
        );
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fetcher.calls_for(&known), 1);
    }
}
