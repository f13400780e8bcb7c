//! Link normalization.
//!
//! Turns the link found in a document into an absolute URL, using, in order:
//! the link itself when it already carries a scheme, the institution's
//! configured base URL for root-relative paths, and the URL of the document
//! the link was found in.

use tracing::warn;
use url::Url;

/// Result of normalizing one raw link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedLink {
    Absolute(String),
    /// The raw link was empty.
    Empty,
    /// Relative link with nothing to resolve it against.
    Unresolved(String),
}

impl NormalizedLink {
    /// The absolute URL, or `None` when the record must be dropped.
    pub fn into_absolute(self) -> Option<String> {
        match self {
            NormalizedLink::Absolute(url) => Some(url),
            NormalizedLink::Empty | NormalizedLink::Unresolved(_) => None,
        }
    }
}

/// Resolves links for one institution.
#[derive(Debug, Clone, Copy)]
pub struct LinkNormalizer<'a> {
    institution: &'a str,
    base_url: Option<&'a str>,
}

impl<'a> LinkNormalizer<'a> {
    pub fn new(institution: &'a str, base_url: Option<&'a str>) -> Self {
        Self {
            institution,
            base_url,
        }
    }

    /// Normalize `raw`, optionally relative to the document it came from.
    ///
    /// Feed links are normalized with `page = None`: a root-relative feed link
    /// for an institution without a base URL stays unresolved and is dropped.
    /// HTML links pass the listing page's URL.
    pub fn normalize(&self, raw: &str, page: Option<&Url>) -> NormalizedLink {
        let raw = raw.trim();
        if raw.is_empty() {
            return NormalizedLink::Empty;
        }

        // Protocol-relative: take the scheme of the page, https otherwise.
        if raw.starts_with("//") {
            let scheme = page.map(|p| p.scheme()).unwrap_or("https");
            return match Url::parse(&format!("{scheme}:{raw}")) {
                Ok(u) => NormalizedLink::Absolute(u.to_string()),
                Err(_) => self.unresolved(raw),
            };
        }

        if raw.starts_with('/') {
            if let Some(base) = self.base_url {
                return NormalizedLink::Absolute(format!("{}{}", base.trim_end_matches('/'), raw));
            }
        } else if Url::parse(raw).is_ok() {
            return NormalizedLink::Absolute(raw.to_string());
        }

        match page.map(|p| p.join(raw)) {
            Some(Ok(joined)) => NormalizedLink::Absolute(joined.to_string()),
            _ => self.unresolved(raw),
        }
    }

    fn unresolved(&self, raw: &str) -> NormalizedLink {
        warn!(institution = %self.institution, link = %raw, "Could not resolve relative link; dropping record");
        NormalizedLink::Unresolved(raw.to_string())
    }
}
