//! Data models for scraped announcements and run results.
//!
//! This module defines the records that flow through the pipeline:
//! - [`RawRecord`]: a transient parser result, link possibly relative
//! - [`NewOpportunity`]: a normalized, fingerprinted record ready for the store
//! - [`StoredOpportunity`]: the shape the store keeps
//! - [`SourceReport`] and [`ScrapeResult`]: per-source and per-run reporting

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Maximum stored title length, in characters.
pub const TITLE_MAX_CHARS: usize = 500;
/// Maximum stored description length, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// A candidate record as extracted by a parser.
///
/// Produced by the feed, HTML or rendered-page parsers and consumed
/// immediately by link normalization and the dedup gate. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    /// Trimmed title text.
    pub title: String,
    /// Link as found in the document; may be relative or empty.
    pub link: String,
    /// Description text; may still contain markup for Atom summaries.
    pub description: String,
}

impl RawRecord {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A record that passed normalization and carries its fingerprint.
///
/// Title and description are already truncated to the store limits; the
/// fingerprint was computed over the full, untruncated title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOpportunity {
    pub fingerprint: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub institution: String,
    pub category: String,
}

/// A record as kept by a store.
///
/// `fingerprint` and `url` are each unique across the store. Records are
/// immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredOpportunity {
    pub fingerprint: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub institution: String,
    pub category: String,
    /// Application deadline, when a source publishes one. Never set by this pipeline.
    #[serde(default)]
    pub deadline: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredOpportunity {
    pub fn from_new(new: NewOpportunity, created_at: DateTime<Utc>) -> Self {
        Self {
            fingerprint: new.fingerprint,
            url: new.url,
            title: new.title,
            description: new.description,
            institution: new.institution,
            category: new.category,
            deadline: None,
            created_at,
        }
    }
}

/// Outcome of one source within an institution run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceReport {
    pub label: String,
    pub url: String,
    /// Name of the strategy that produced the records, if any succeeded.
    pub strategy: Option<String>,
    pub extracted: usize,
    pub new_items: usize,
    /// One human-readable line per failed strategy attempt.
    pub failures: Vec<String>,
}

/// Outcome of one institution run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstitutionReport {
    pub institution: String,
    pub new_items: usize,
    pub sources: Vec<SourceReport>,
}

/// Everything one trigger produced: the count mapping plus per-source detail.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub result: ScrapeResult,
    pub institutions: Vec<InstitutionReport>,
}

impl RunReport {
    pub fn from_institutions(institutions: Vec<InstitutionReport>) -> Self {
        let mut result = ScrapeResult::default();
        for inst in &institutions {
            result.push(inst.institution.clone(), inst.new_items);
        }
        Self {
            result,
            institutions,
        }
    }
}

/// New-record count for one institution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstitutionCount {
    pub institution: String,
    pub new_items: usize,
}

/// Fleet-wide result: institution name to new-record count, in configuration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeResult {
    pub counts: Vec<InstitutionCount>,
}

impl ScrapeResult {
    pub fn push(&mut self, institution: impl Into<String>, new_items: usize) {
        self.counts.push(InstitutionCount {
            institution: institution.into(),
            new_items,
        });
    }

    /// Count for one institution, `None` when it was not part of the run.
    #[cfg(test)]
    pub fn get(&self, institution: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|c| c.institution == institution)
            .map(|c| c.new_items)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|c| c.new_items).sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// One-line summary, e.g. `"Harvard: 3 new, MIT: 0 new"`.
    pub fn summary(&self) -> String {
        self.counts
            .iter()
            .map(|c| format!("{}: {} new", c.institution, c.new_items))
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_result_summary_and_total() {
        let mut result = ScrapeResult::default();
        result.push("Harvard", 3);
        result.push("MIT", 0);
        assert_eq!(result.summary(), "Harvard: 3 new, MIT: 0 new");
        assert_eq!(result.total(), 3);
        assert_eq!(result.get("MIT"), Some(0));
        assert_eq!(result.get("Yale"), None);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_scrape_result_serialization() {
        let mut result = ScrapeResult::default();
        result.push("Brown", 7);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"institution\":\"Brown\""));
        assert!(json.contains("\"new_items\":7"));
    }

    #[test]
    fn test_stored_opportunity_defaults_on_deserialize() {
        let json = r#"{
            "fingerprint": "ab",
            "url": "https://news.mit.edu/x",
            "title": "T",
            "institution": "MIT",
            "category": "research",
            "created_at": "2025-05-06T14:30:00Z"
        }"#;
        let stored: StoredOpportunity = serde_json::from_str(json).unwrap();
        assert_eq!(stored.description, "");
        assert_eq!(stored.deadline, None);
    }

    #[test]
    fn test_run_report_keeps_institution_order() {
        let report = RunReport::from_institutions(vec![
            InstitutionReport {
                institution: "Yale".to_string(),
                new_items: 2,
                sources: vec![],
            },
            InstitutionReport {
                institution: "Brown".to_string(),
                new_items: 0,
                sources: vec![],
            },
        ]);
        assert_eq!(report.result.summary(), "Yale: 2 new, Brown: 0 new");
    }

    #[test]
    fn test_raw_record_builder() {
        let r = RawRecord::new("A", "http://x/1").with_description("d");
        assert_eq!(r.title, "A");
        assert_eq!(r.link, "http://x/1");
        assert_eq!(r.description, "d");
    }
}
