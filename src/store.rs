//! Record stores with insert-if-absent semantics.
//!
//! The pipeline never updates or deletes; it only asks a store to create a
//! record unless one with the same fingerprint or the same url exists. The
//! check and the insert happen under one lock, so concurrent attempts at the
//! same fingerprint produce exactly one `true`.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::ScrapeError;
use crate::models::{NewOpportunity, StoredOpportunity};

/// Persistence boundary consumed by the dedup gate.
pub trait OpportunityStore {
    /// Create the record unless its fingerprint or url is already stored.
    ///
    /// Returns `Ok(true)` when a record was created and `Ok(false)` when it
    /// already existed. "Already exists" is never an error.
    async fn insert_if_absent(&self, record: NewOpportunity) -> Result<bool, ScrapeError>;
}

#[derive(Debug, Default)]
struct Records {
    fingerprints: HashSet<String>,
    urls: HashSet<String>,
    rows: Vec<StoredOpportunity>,
}

impl Records {
    fn from_rows(rows: Vec<StoredOpportunity>) -> Self {
        let mut records = Records::default();
        for row in rows {
            records.fingerprints.insert(row.fingerprint.clone());
            records.urls.insert(row.url.clone());
            records.rows.push(row);
        }
        records
    }

    fn try_insert(&mut self, record: NewOpportunity) -> bool {
        if self.fingerprints.contains(&record.fingerprint) || self.urls.contains(&record.url) {
            return false;
        }
        self.fingerprints.insert(record.fingerprint.clone());
        self.urls.insert(record.url.clone());
        self.rows.push(StoredOpportunity::from_new(record, Utc::now()));
        true
    }

    /// Undo the most recent `try_insert`.
    fn pop_last(&mut self) {
        if let Some(row) = self.rows.pop() {
            self.fingerprints.remove(&row.fingerprint);
            self.urls.remove(&row.url);
        }
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn records(&self) -> Vec<StoredOpportunity> {
        self.inner.lock().await.rows.clone()
    }
}

impl OpportunityStore for MemoryStore {
    async fn insert_if_absent(&self, record: NewOpportunity) -> Result<bool, ScrapeError> {
        Ok(self.inner.lock().await.try_insert(record))
    }
}

/// Store backed by a JSON array on disk.
///
/// The file is read once at open and rewritten after every insert, while
/// the lock is still held.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<Records>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ScrapeError> {
        let path = path.as_ref().to_path_buf();
        let rows: Vec<StoredOpportunity> = match fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(records = rows.len(), "Opened JSON store");
        Ok(Self {
            path,
            inner: Mutex::new(Records::from_rows(rows)),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    async fn persist(&self, rows: &[StoredOpportunity]) -> Result<(), ScrapeError> {
        let failed = |e: &dyn std::fmt::Display| ScrapeError::Store(format!("writing {}: {e}", self.path.display()));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| failed(&e))?;
        }
        let json = serde_json::to_string_pretty(rows).map_err(|e| failed(&e))?;
        fs::write(&self.path, json).await.map_err(|e| failed(&e))
    }
}

impl OpportunityStore for JsonFileStore {
    async fn insert_if_absent(&self, record: NewOpportunity) -> Result<bool, ScrapeError> {
        let mut guard = self.inner.lock().await;
        if !guard.try_insert(record) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&guard.rows).await {
            // Keep memory and disk in agreement.
            guard.pop_last();
            return Err(e);
        }
        debug!(path = %self.path.display(), total = guard.rows.len(), "Persisted new record");
        Ok(true)
    }
}
