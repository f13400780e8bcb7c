//! # Ivy Scrape
//!
//! Collects announcements from university news feeds and listing pages and
//! stores each one exactly once.
//!
//! ## Features
//!
//! - RSS 2.0 and Atom feeds, namespaces and CDATA included
//! - CSS-selector listing pages, with a headless Chromium fallback for pages
//!   that only render client-side
//! - Link normalization against the listing page or an institution base URL
//! - SHA-256 fingerprints plus unique urls, so reruns never duplicate records
//! - Failure isolation: a broken source or institution never stops the run
//!
//! ## Usage
//!
//! ```sh
//! ivy_scrape --report-dir ./reports
//! ivy_scrape -u Harvard
//! ```
//!
//! ## Architecture
//!
//! 1. **Routing**: each source goes through the strategy chain (feed, static
//!    HTML, rendered page) until one succeeds
//! 2. **Normalization**: relative links are resolved or the record is dropped
//! 3. **Dedup**: fingerprinted records are inserted only when absent
//! 4. **Report**: per-institution counts, optionally written as JSON

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dedup;
mod error;
mod fetch;
mod models;
mod normalize;
mod outputs;
mod pipeline;
mod router;
mod scrapers;
mod store;
mod utils;

use cli::Cli;
use config::{ScrapeSettings, SourcesConfig};
use error::ScrapeError;
use fetch::{HttpFetcher, RunClock};
use models::ScrapeResult;
use outputs::json;
use pipeline::Scraper;
use scrapers::rendered::{DisabledRenderer, PageRenderer};
use store::{JsonFileStore, MemoryStore, OpportunityStore};
use utils::{ensure_writable_dir, truncate_for_log};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("ivy_scrape starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = match &args.sources {
        Some(path) => SourcesConfig::load(path).await?,
        None => SourcesConfig::builtin()?,
    };
    info!(institutions = config.institutions.len(), "Source table ready");

    if args.list {
        for name in config.names() {
            println!("{name}");
        }
        return Ok(());
    }

    // Fail before any network traffic if the report cannot be written.
    if let Some(dir) = &args.report_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Report directory is not writable");
            return Err(e.into());
        }
    }

    let settings = args.settings();
    let clock = RunClock::start(settings.run_deadline);
    let fetcher = HttpFetcher::new()?;

    let result = if args.dry_run {
        let store = MemoryStore::new();
        let result = dispatch(&args, &config, &store, &fetcher, &settings, clock).await?;
        for record in store.records().await {
            info!(
                institution = %record.institution,
                category = %record.category,
                url = %record.url,
                title = %truncate_for_log(&record.title, 80),
                "Dry run: would store"
            );
        }
        info!(would_store = store.len().await, "Dry run finished; store file untouched");
        result
    } else {
        let store = JsonFileStore::open(&args.store).await?;
        let result = dispatch(&args, &config, &store, &fetcher, &settings, clock).await?;
        info!(path = %args.store, stored = store.len().await, "Store up to date");
        result
    };

    if result.is_empty() {
        warn!("No institutions were scraped");
    }
    for count in &result.counts {
        println!("{}: {} new", count.institution, count.new_items);
    }

    info!(
        institutions = result.len(),
        total_new = result.total(),
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "ivy_scrape finished"
    );
    Ok(())
}

#[cfg(feature = "browser")]
async fn dispatch<S: OpportunityStore>(
    args: &Cli,
    config: &SourcesConfig,
    store: &S,
    fetcher: &HttpFetcher,
    settings: &ScrapeSettings,
    clock: RunClock,
) -> Result<ScrapeResult, ScrapeError> {
    if args.no_browser {
        return trigger(args, config, store, fetcher, &DisabledRenderer, settings, clock).await;
    }
    let renderer = scrapers::rendered::ChromiumRenderer::new(settings.clone(), clock);
    trigger(args, config, store, fetcher, &renderer, settings, clock).await
}

#[cfg(not(feature = "browser"))]
async fn dispatch<S: OpportunityStore>(
    args: &Cli,
    config: &SourcesConfig,
    store: &S,
    fetcher: &HttpFetcher,
    settings: &ScrapeSettings,
    clock: RunClock,
) -> Result<ScrapeResult, ScrapeError> {
    trigger(args, config, store, fetcher, &DisabledRenderer, settings, clock).await
}

/// With a report directory the run collects per-source detail; otherwise
/// only the institution counts are kept.
async fn trigger<S: OpportunityStore, R: PageRenderer>(
    args: &Cli,
    config: &SourcesConfig,
    store: &S,
    fetcher: &HttpFetcher,
    renderer: &R,
    settings: &ScrapeSettings,
    clock: RunClock,
) -> Result<ScrapeResult, ScrapeError> {
    let scraper = Scraper::new(config, store, fetcher, renderer, settings, clock);
    let selected = args.university.as_deref().map(str::trim).filter(|name| !name.is_empty());
    match (&args.report_dir, selected) {
        (Some(dir), _) => {
            let report = scraper.run(selected).await;
            json::write_report(&report, dir).await?;
            Ok(report.result)
        }
        (None, Some(name)) => {
            let mut result = ScrapeResult::default();
            result.push(name, scraper.scrape_one(name).await);
            Ok(result)
        }
        (None, None) => Ok(scraper.scrape_all().await),
    }
}
