//! Run output.
//!
//! - [`json`]: writes a dated JSON report of each run
//!
//! Stored announcements themselves live in [`crate::store`].

pub mod json;
