//! Source table and run settings.
//!
//! The source table lists, per institution, the feeds and listing pages to
//! scrape. It is loaded once per run from YAML (the built-in table or a file
//! given on the command line), validated, and then passed by reference into
//! the pipeline; nothing mutates it afterwards.
//!
//! ```yaml
//! institutions:
//!   - name: Brown
//!     base_url: https://news.brown.edu
//!     sources:
//!       - url: https://www.brown.edu/news/all
//!         kind: html
//!         selectors: { list: "article h3", title: a }
//!         category: news_event
//!         label: Brown University News (HTML)
//! ```

use rand::{Rng, rng};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::error::ScrapeError;

const BUILTIN_SOURCES: &str = include_str!("../config/sources.yaml");

/// Extraction strategy declared for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS 2.0 or Atom document.
    #[serde(alias = "rss", alias = "atom")]
    Feed,
    /// Listing page parsed with CSS selectors.
    Html,
}

/// Selector pair for `html` sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    /// Matches one element per listed item.
    pub list: String,
    /// Matches the title element inside each item.
    pub title: String,
}

fn default_category() -> String {
    "news_event".to_string()
}

/// One feed or page to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub url: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub selectors: Option<Selectors>,
    /// Category tag stored with every record, e.g. `news_event` or `research`.
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[cfg(test)]
impl SourceDescriptor {
    pub fn feed(url: &str, category: &str, label: &str) -> Self {
        Self {
            url: url.to_string(),
            kind: SourceKind::Feed,
            selectors: None,
            category: category.to_string(),
            label: Some(label.to_string()),
        }
    }

    pub fn html(url: &str, list: &str, title: &str, category: &str, label: &str) -> Self {
        Self {
            url: url.to_string(),
            kind: SourceKind::Html,
            selectors: Some(Selectors {
                list: list.to_string(),
                title: title.to_string(),
            }),
            category: category.to_string(),
            label: Some(label.to_string()),
        }
    }
}

impl SourceDescriptor {
    /// Human label for logs, falling back to the url.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }
}

/// An institution and its ordered sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionProfile {
    pub name: String,
    /// Prefix for root-relative links that cannot be resolved otherwise.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

/// The whole source table, in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub institutions: Vec<InstitutionProfile>,
}

impl SourcesConfig {
    /// The table compiled into the binary.
    pub fn builtin() -> Result<Self, ScrapeError> {
        Self::from_yaml(BUILTIN_SOURCES)
    }

    /// Parse and validate a YAML source table.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScrapeError> {
        let config: SourcesConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML source table from disk.
    #[instrument(level = "info")]
    pub async fn load(path: &str) -> Result<Self, ScrapeError> {
        let yaml = tokio::fs::read_to_string(path).await?;
        let config = Self::from_yaml(&yaml)?;
        debug!(institutions = config.institutions.len(), "Loaded source table");
        Ok(config)
    }

    pub fn institution(&self, name: &str) -> Option<&InstitutionProfile> {
        self.institutions.iter().find(|i| i.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.institutions.iter().map(|i| i.name.as_str()).collect()
    }

    /// Check names, urls and selectors before any network traffic.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        let mut seen = HashSet::new();
        for inst in &self.institutions {
            if inst.name.trim().is_empty() {
                return Err(ScrapeError::Config("institution with empty name".into()));
            }
            if !seen.insert(inst.name.as_str()) {
                return Err(ScrapeError::Config(format!(
                    "institution '{}' listed twice",
                    inst.name
                )));
            }
            if let Some(base) = &inst.base_url {
                Url::parse(base).map_err(|e| {
                    ScrapeError::Config(format!("{}: bad base_url '{base}': {e}", inst.name))
                })?;
            }
            for src in &inst.sources {
                Url::parse(&src.url).map_err(|e| {
                    ScrapeError::Config(format!("{}: bad source url '{}': {e}", inst.name, src.url))
                })?;
                match (src.kind, &src.selectors) {
                    (SourceKind::Html, None) => {
                        return Err(ScrapeError::Config(format!(
                            "{}: html source '{}' has no selectors",
                            inst.name,
                            src.label()
                        )));
                    }
                    (SourceKind::Html, Some(sel)) => {
                        for css in [&sel.list, &sel.title] {
                            Selector::parse(css).map_err(|e| {
                                ScrapeError::Selector(format!("'{css}' in '{}': {e}", src.label()))
                            })?;
                        }
                    }
                    (SourceKind::Feed, _) => {}
                }
            }
        }
        Ok(())
    }
}

/// Timeouts, pacing and concurrency for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeSettings {
    pub feed_timeout: Duration,
    pub html_timeout: Duration,
    /// Browser navigation bound.
    pub render_timeout: Duration,
    /// Bound on waiting for the list selector once the DOM has loaded.
    pub selector_wait: Duration,
    /// Randomized post-navigation pause, inclusive bounds.
    pub pacing_min: Duration,
    pub pacing_max: Duration,
    /// Institutions scraped at once; 1 keeps the run sequential.
    pub concurrency: usize,
    /// Overall run budget; every fetch is clipped to the time remaining.
    pub run_deadline: Option<Duration>,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            feed_timeout: Duration::from_secs(25),
            html_timeout: Duration::from_secs(20),
            render_timeout: Duration::from_secs(45),
            selector_wait: Duration::from_secs(15),
            pacing_min: Duration::from_millis(1500),
            pacing_max: Duration::from_millis(3000),
            concurrency: 1,
            run_deadline: None,
        }
    }
}

impl ScrapeSettings {
    /// Pick a pause inside the pacing window.
    pub fn pacing_delay(&self) -> Duration {
        let lo = self.pacing_min.as_millis() as u64;
        let hi = (self.pacing_max.as_millis() as u64).max(lo);
        Duration::from_millis(rng().random_range(lo..=hi))
    }
}
