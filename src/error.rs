//! Error taxonomy for the scraping pipeline.
//!
//! Every failure below the fleet orchestrator is converted into a
//! zero-contribution outcome at its own level, so these errors travel only as
//! far as the strategy router or the institution loop, where they are logged.

use std::error::Error;
use std::fmt;

/// Everything that can go wrong while fetching, parsing or storing.
#[derive(Debug)]
pub enum ScrapeError {
    /// The server answered with a non-2xx status.
    HttpStatus { url: String, status: u16 },
    /// A single fetch exceeded its timeout.
    Timeout { url: String },
    /// Connection, TLS, body decoding or any other transport failure.
    Network(reqwest::Error),
    /// The run-level deadline passed before the fetch could start.
    DeadlineExceeded,
    /// The headless browser failed to launch, navigate or extract.
    Browser(String),
    /// Rendering was requested but no browser is available in this build/run.
    BrowserUnavailable,
    /// A CSS selector from the source table did not parse.
    Selector(String),
    /// The source table is malformed.
    Config(String),
    Io(std::io::Error),
    Serde(String),
    /// The store refused the record for a reason other than "already exists".
    Store(String),
}

impl ScrapeError {
    /// HTTP status code, when the failure was a status error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ScrapeError::HttpStatus { status, .. } => Some(*status),
            ScrapeError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ScrapeError::Timeout { .. } | ScrapeError::DeadlineExceeded => true,
            ScrapeError::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::HttpStatus { url, status } => write!(f, "HTTP {status} from {url}"),
            ScrapeError::Timeout { url } => write!(f, "request to {url} timed out"),
            ScrapeError::Network(e) => write!(f, "network error: {e}"),
            ScrapeError::DeadlineExceeded => write!(f, "run deadline exceeded"),
            ScrapeError::Browser(msg) => write!(f, "browser error: {msg}"),
            ScrapeError::BrowserUnavailable => write!(f, "headless browser rendering is disabled"),
            ScrapeError::Selector(msg) => write!(f, "invalid selector: {msg}"),
            ScrapeError::Config(msg) => write!(f, "invalid source configuration: {msg}"),
            ScrapeError::Io(e) => write!(f, "I/O error: {e}"),
            ScrapeError::Serde(msg) => write!(f, "serialization error: {msg}"),
            ScrapeError::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl Error for ScrapeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ScrapeError::Network(e) => Some(e),
            ScrapeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            ScrapeError::Timeout { url }
        } else if let Some(status) = e.status() {
            ScrapeError::HttpStatus {
                url,
                status: status.as_u16(),
            }
        } else {
            ScrapeError::Network(e)
        }
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(e: std::io::Error) -> Self {
        ScrapeError::Io(e)
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(e: serde_json::Error) -> Self {
        ScrapeError::Serde(e.to_string())
    }
}

impl From<serde_yaml::Error> for ScrapeError {
    fn from(e: serde_yaml::Error) -> Self {
        ScrapeError::Config(e.to_string())
    }
}
