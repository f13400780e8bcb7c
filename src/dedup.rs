//! Content fingerprints and the admit step.
//!
//! A fingerprint is the SHA-256 of the exact title followed by the
//! normalized link, as 64 lowercase hex characters. It is computed over the
//! full values, before truncation to the store limits.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use tracing::{debug, instrument, warn};

use crate::models::{DESCRIPTION_MAX_CHARS, NewOpportunity, TITLE_MAX_CHARS};
use crate::store::OpportunityStore;
use crate::utils::{truncate_chars, truncate_for_log};

/// SHA-256 of `title` immediately followed by `link`, hex encoded.
pub fn fingerprint(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(link.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Fingerprints candidates and hands new ones to the store.
#[derive(Debug)]
pub struct DedupGate<'a, S> {
    store: &'a S,
}

impl<'a, S: OpportunityStore> DedupGate<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Admit one normalized record; `true` when it was newly stored.
    ///
    /// Empty titles or links are rejected without touching the store. A store
    /// error is logged and counted as not new.
    #[instrument(level = "debug", skip_all, fields(%institution, %link))]
    pub async fn admit(
        &self,
        title: &str,
        link: &str,
        institution: &str,
        category: &str,
        description: &str,
    ) -> bool {
        if title.is_empty() || link.is_empty() {
            debug!("Rejected record with empty title or link");
            return false;
        }
        let record = NewOpportunity {
            fingerprint: fingerprint(title, link),
            url: link.to_string(),
            title: truncate_chars(title, TITLE_MAX_CHARS),
            description: truncate_chars(description, DESCRIPTION_MAX_CHARS),
            institution: institution.to_string(),
            category: category.to_string(),
        };
        match self.store.insert_if_absent(record).await {
            Ok(created) => {
                if created {
                    debug!(title = %truncate_for_log(title, 80), "Stored new record");
                }
                created
            }
            Err(e) => {
                warn!(error = %e, "Store rejected record; counting as not new");
                false
            }
        }
    }
}
