//! Command-line interface definitions for the announcement scraper.
//!
//! Every option can also come from the environment, so the binary can be
//! driven by a scheduler without a wrapper script.

use clap::Parser;
use std::time::Duration;

use crate::config::ScrapeSettings;

/// Scrape university announcement feeds and listing pages into a deduplicated store.
///
/// # Examples
///
/// ```sh
/// # Every configured institution, built-in source table
/// ivy_scrape
///
/// # One institution, custom table, no browser fallback
/// ivy_scrape -u Brown --sources ./sources.yaml --no-browser
///
/// # See what a run would store without touching the store file
/// ivy_scrape --dry-run
///
/// # Whole fleet, four at a time, at most ten minutes, with a run report
/// ivy_scrape --concurrency 4 --deadline-secs 600 --report-dir ./reports
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Scrape only this institution (exact name from the source table)
    #[arg(short, long, env = "SCRAPE_UNIVERSITY")]
    pub university: Option<String>,

    /// Path to a YAML source table; the built-in table is used when omitted
    #[arg(short, long, env = "SCRAPE_SOURCES")]
    pub sources: Option<String>,

    /// JSON file holding stored announcements
    #[arg(long, env = "SCRAPE_STORE", default_value = "opportunities.json")]
    pub store: String,

    /// Directory for per-run JSON reports
    #[arg(short, long, env = "SCRAPE_REPORT_DIR")]
    pub report_dir: Option<String>,

    /// Institutions scraped at the same time
    #[arg(long, env = "SCRAPE_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Overall run budget in seconds
    #[arg(long, env = "SCRAPE_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Never launch a headless browser
    #[arg(long, env = "SCRAPE_NO_BROWSER")]
    pub no_browser: bool,

    /// Print the configured institutions and exit
    #[arg(long)]
    pub list: bool,

    /// Scrape into an in-memory store and log what would be stored
    #[arg(long, env = "SCRAPE_DRY_RUN")]
    pub dry_run: bool,

    /// Feed fetch timeout in seconds
    #[arg(long, default_value_t = 25)]
    pub feed_timeout_secs: u64,

    /// Listing page fetch timeout in seconds
    #[arg(long, default_value_t = 20)]
    pub html_timeout_secs: u64,

    /// Browser navigation timeout in seconds
    #[arg(long, default_value_t = 45)]
    pub render_timeout_secs: u64,

    /// How long the browser waits for the list selector, in seconds
    #[arg(long, default_value_t = 15)]
    pub selector_wait_secs: u64,

    /// Lower bound of the post-navigation pause, in milliseconds
    #[arg(long, default_value_t = 1500)]
    pub pacing_min_ms: u64,

    /// Upper bound of the post-navigation pause, in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub pacing_max_ms: u64,
}

impl Cli {
    pub fn settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            feed_timeout: Duration::from_secs(self.feed_timeout_secs),
            html_timeout: Duration::from_secs(self.html_timeout_secs),
            render_timeout: Duration::from_secs(self.render_timeout_secs),
            selector_wait: Duration::from_secs(self.selector_wait_secs),
            pacing_min: Duration::from_millis(self.pacing_min_ms),
            pacing_max: Duration::from_millis(self.pacing_max_ms),
            concurrency: self.concurrency.max(1),
            run_deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_match_settings_defaults() {
        let cli = Cli::parse_from(["ivy_scrape"]);
        assert_eq!(cli.university, None);
        assert_eq!(cli.store, "opportunities.json");
        assert!(!cli.no_browser);
        assert!(!cli.dry_run);
        assert_eq!(cli.settings(), ScrapeSettings::default());
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["ivy_scrape", "-u", "Brown", "-s", "/tmp/sources.yaml", "-r", "/tmp/reports"]);
        assert_eq!(cli.university.as_deref(), Some("Brown"));
        assert_eq!(cli.sources.as_deref(), Some("/tmp/sources.yaml"));
        assert_eq!(cli.report_dir.as_deref(), Some("/tmp/reports"));
    }

    #[test]
    fn test_cli_run_limits() {
        let cli = Cli::parse_from([
            "ivy_scrape",
            "--concurrency",
            "0",
            "--deadline-secs",
            "600",
            "--no-browser",
            "--dry-run",
            "--selector-wait-secs",
            "5",
        ]);
        let settings = cli.settings();
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.run_deadline, Some(Duration::from_secs(600)));
        assert_eq!(settings.selector_wait, Duration::from_secs(5));
        assert!(cli.no_browser);
        assert!(cli.dry_run);
    }
}
