//! Extraction strategies for institution sources.
//!
//! Each strategy turns one source into a list of [`RawRecord`]s:
//!
//! | Strategy | Module | Transport | Used for |
//! |----------|--------|-----------|----------|
//! | Feed | [`feed`] | HTTP | `feed` sources (RSS 2.0, Atom, mixed) |
//! | Static HTML | [`html`] | HTTP | `html` sources, first attempt |
//! | Rendered page | [`rendered`] | headless Chromium | `html` sources, fallback |
//!
//! The order in which they are tried lives in [`crate::router`].
//!
//! [`RawRecord`]: crate::models::RawRecord

pub mod feed;
pub mod html;
pub mod rendered;
