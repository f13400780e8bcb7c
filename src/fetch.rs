//! Plain HTTP fetching and the run-level deadline.
//!
//! Every fetch carries an explicit timeout. [`RunClock`] clips that timeout
//! to whatever is left of the run budget, so a run with a deadline stops
//! issuing requests once it has passed instead of hanging on the next one.

use once_cell::sync::Lazy;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::ScrapeError;

/// Desktop Chrome user agent sent by both the HTTP client and the browser.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_FEED: &str = "application/rss+xml, application/xml, text/xml, */*";

static COMMON_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
});

/// What kind of document a fetch expects; selects the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Feed,
    Html,
}

impl DocumentKind {
    fn accept(self) -> &'static str {
        match self {
            DocumentKind::Feed => ACCEPT_FEED,
            DocumentKind::Html => ACCEPT_HTML,
        }
    }
}

/// Fetches a document body over plain HTTP.
pub trait PageFetcher {
    /// GET `url`, failing on transport errors, non-2xx statuses and timeouts.
    async fn fetch(
        &self,
        url: &str,
        kind: DocumentKind,
        timeout: Duration,
    ) -> Result<Vec<u8>, ScrapeError>;
}

/// `reqwest` client with the common browser-like headers.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(COMMON_HEADERS.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch(
        &self,
        url: &str,
        kind: DocumentKind,
        timeout: Duration,
    ) -> Result<Vec<u8>, ScrapeError> {
        let resp = self
            .client
            .get(url)
            .header(header::ACCEPT, kind.accept())
            .timeout(timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await?;
        debug!(bytes = body.len(), %status, "Fetched document");
        Ok(body.to_vec())
    }
}

/// Optional run deadline shared by every fetch in a run.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    deadline: Option<Instant>,
}

impl RunClock {
    /// Start the clock now with an optional overall budget.
    pub fn start(budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
        }
    }

    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// `wanted` cut down to the time remaining; zero once the deadline passed.
    pub fn clip(&self, wanted: Duration) -> Duration {
        match self.deadline {
            None => wanted,
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(wanted),
        }
    }

    /// Timeout for the next fetch: `timeout` clipped to the time remaining.
    pub fn budget(&self, timeout: Duration) -> Result<Duration, ScrapeError> {
        let clipped = self.clip(timeout);
        if self.deadline.is_some() && clipped.is_zero() {
            return Err(ScrapeError::DeadlineExceeded);
        }
        Ok(clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_clock_passes_timeout_through() {
        let clock = RunClock::unbounded();
        assert_eq!(clock.budget(Duration::from_secs(20)).unwrap(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_clips_and_then_expires() {
        let clock = RunClock::start(Some(Duration::from_secs(30)));
        assert_eq!(clock.budget(Duration::from_secs(20)).unwrap(), Duration::from_secs(20));

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(clock.budget(Duration::from_secs(20)).unwrap(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(
            clock.budget(Duration::from_secs(20)),
            Err(ScrapeError::DeadlineExceeded)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clip_bounds_waits_after_the_deadline() {
        let clock = RunClock::start(Some(Duration::from_secs(10)));
        assert_eq!(clock.clip(Duration::from_secs(3)), Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(clock.clip(Duration::from_secs(15)), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.clip(Duration::from_secs(15)), Duration::ZERO);
        assert_eq!(RunClock::unbounded().clip(Duration::from_secs(15)), Duration::from_secs(15));
    }

    #[test]
    fn test_accept_header_per_kind() {
        assert!(DocumentKind::Feed.accept().starts_with("application/rss+xml"));
        assert!(DocumentKind::Html.accept().starts_with("text/html"));
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new().is_ok());
    }
}
