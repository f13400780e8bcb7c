//! Institution scraping and the fleet orchestrator.
//!
//! An institution run walks its sources in order. Each source is routed
//! through the strategy chain, its records are normalized and admitted
//! through the dedup gate, and its failures are contained: the next source
//! always runs. The fleet runs every configured institution (or a single
//! one by name) and maps each to the number of new records it stored.

use futures::{StreamExt, stream};
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::{InstitutionProfile, ScrapeSettings, SourceDescriptor, SourcesConfig};
use crate::dedup::DedupGate;
use crate::fetch::{PageFetcher, RunClock};
use crate::models::{InstitutionReport, RunReport, ScrapeResult, SourceReport};
use crate::normalize::LinkNormalizer;
use crate::router::{RouteReport, SourceRouter};
use crate::scrapers::rendered::PageRenderer;
use crate::store::OpportunityStore;

/// Everything one scrape run needs, borrowed for the run's duration.
pub struct Scraper<'a, S, F, R> {
    config: &'a SourcesConfig,
    store: &'a S,
    router: SourceRouter<'a, F, R>,
    concurrency: usize,
}

impl<'a, S, F, R> Scraper<'a, S, F, R>
where
    S: OpportunityStore,
    F: PageFetcher,
    R: PageRenderer,
{
    /// Build a scraper whose fetches all draw on `clock`.
    pub fn new(
        config: &'a SourcesConfig,
        store: &'a S,
        fetcher: &'a F,
        renderer: &'a R,
        settings: &'a ScrapeSettings,
        clock: RunClock,
    ) -> Self {
        Self {
            config,
            store,
            router: SourceRouter::new(fetcher, renderer, settings, clock),
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Scrape one institution by name. Unknown names log a warning and count 0.
    pub async fn scrape_one(&self, name: &str) -> usize {
        match self.config.institution(name) {
            Some(profile) => self.scrape_institution(profile).await.new_items,
            None => {
                warn!(institution = %name, "Unknown institution; nothing to scrape");
                0
            }
        }
    }

    /// Scrape every configured institution; counts come back in config order.
    pub async fn scrape_all(&self) -> ScrapeResult {
        RunReport::from_institutions(self.scrape_fleet().await).result
    }

    /// Trigger entry point: one institution when `institution` names one,
    /// otherwise the whole fleet.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self, institution: Option<&str>) -> RunReport {
        let selected = institution.map(str::trim).filter(|name| !name.is_empty());
        let institutions = match selected {
            Some(name) => match self.config.institution(name) {
                Some(profile) => vec![self.scrape_institution(profile).await],
                None => {
                    warn!(institution = %name, "Unknown institution; nothing to scrape");
                    vec![InstitutionReport {
                        institution: name.to_string(),
                        new_items: 0,
                        sources: Vec::new(),
                    }]
                }
            },
            None => self.scrape_fleet().await,
        };
        let report = RunReport::from_institutions(institutions);
        info!(total = report.result.total(), summary = %report.result.summary(), "Scrape run finished");
        report
    }

    async fn scrape_fleet(&self) -> Vec<InstitutionReport> {
        let profiles = &self.config.institutions;
        if self.concurrency == 1 {
            let mut reports = Vec::with_capacity(profiles.len());
            for profile in profiles {
                reports.push(self.scrape_institution(profile).await);
            }
            return reports;
        }

        let mut indexed: Vec<(usize, InstitutionReport)> = stream::iter(profiles.iter().enumerate())
            .map(|(i, profile)| async move { (i, self.scrape_institution(profile).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    /// Scrape every source of one institution in order.
    #[instrument(level = "info", skip_all, fields(institution = %profile.name))]
    pub async fn scrape_institution(&self, profile: &InstitutionProfile) -> InstitutionReport {
        if profile.sources.is_empty() {
            warn!("Institution has no sources configured");
        }

        let mut sources = Vec::with_capacity(profile.sources.len());
        for source in &profile.sources {
            let routed = self.router.route(source).await;
            sources.push(self.store_records(profile, source, routed).await);
        }

        let new_items = sources.iter().map(|s| s.new_items).sum();
        info!(new_items, "Institution done");
        InstitutionReport {
            institution: profile.name.clone(),
            new_items,
            sources,
        }
    }

    async fn store_records(
        &self,
        profile: &InstitutionProfile,
        source: &SourceDescriptor,
        routed: RouteReport,
    ) -> SourceReport {
        let label = source.label();
        let normalizer = LinkNormalizer::new(&profile.name, profile.base_url.as_deref());
        let gate = DedupGate::new(self.store);
        let page_url = routed
            .strategy
            .filter(|s| s.has_page_context())
            .and_then(|_| Url::parse(&source.url).ok());

        let extracted = routed.records.len();
        let mut new_items = 0usize;
        for record in &routed.records {
            let Some(link) = normalizer.normalize(&record.link, page_url.as_ref()).into_absolute() else {
                continue;
            };
            let title = record.title.trim();
            if gate
                .admit(title, &link, &profile.name, &source.category, &record.description)
                .await
            {
                new_items += 1;
            }
        }

        if routed.strategy.is_some() {
            info!("{label} → {new_items} new items");
        }

        SourceReport {
            label: label.to_string(),
            url: source.url.clone(),
            strategy: routed.strategy.map(|s| s.name().to_string()),
            extracted,
            new_items,
            failures: routed.failures.iter().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::fakes::{FakeFetcher, FakeRenderer, Reply};
    use crate::store::MemoryStore;
    use std::time::Duration;

    const MIT_FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
          <item><title>Fusion milestone</title><link>https://news.mit.edu/2025/fusion</link></item>
          <item><title>Robot chef</title><link>/2025/robot-chef</link></item>
        </channel></rss>"#;

    const HARVARD_FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
          <item><title>Gazette story</title><link>/gazette/story</link></item>
        </channel></rss>"#;

    const BROWN_EVENTS: &str = r#"<?xml version="1.0"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
          <entry><title>Open house</title><link rel="alternate" href="https://events.brown.edu/event/1"/></entry>
        </feed>"#;

    const BROWN_LISTING: &str = r#"<html><body>
        <article><h3><a href="/news/2025-05-01/one">Brown one</a></h3></article>
        <article><h3><a href="https://www.brown.edu/news/two">Brown two</a></h3></article>
    </body></html>"#;

    fn config() -> SourcesConfig {
        SourcesConfig::from_yaml(
            r#"
institutions:
  - name: Harvard
    base_url: https://news.harvard.edu
    sources:
      - url: https://news.harvard.edu/feed/
        kind: feed
        label: Harvard Gazette
  - name: MIT
    base_url: https://news.mit.edu
    sources:
      - url: https://news.mit.edu/rss/feed
        kind: feed
        category: research
        label: MIT News
  - name: Brown
    sources:
      - url: https://www.brown.edu/news
        kind: html
        selectors: { list: article, title: a }
        label: Brown News
      - url: https://events.brown.edu/feed.xml
        kind: feed
        label: Brown Events
"#,
        )
        .unwrap()
    }

    fn healthy_fetcher() -> FakeFetcher {
        FakeFetcher::default()
            .with("https://news.harvard.edu/feed/", Reply::Body(HARVARD_FEED.to_string()))
            .with("https://news.mit.edu/rss/feed", Reply::Body(MIT_FEED.to_string()))
            .with("https://www.brown.edu/news", Reply::Body(BROWN_LISTING.to_string()))
            .with("https://events.brown.edu/feed.xml", Reply::Body(BROWN_EVENTS.to_string()))
    }

    #[tokio::test]
    async fn test_scrape_all_counts_in_config_order() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        let result = scraper.scrape_all().await;
        assert_eq!(result.summary(), "Harvard: 1 new, MIT: 2 new, Brown: 3 new");
        // Brown has no base url; its listing links were resolved against the page.
        assert_eq!(store.len().await, 6);

        let urls: Vec<String> = store.records().await.into_iter().map(|r| r.url).collect();
        assert!(urls.contains(&"https://news.harvard.edu/gazette/story".to_string()));
        assert!(urls.contains(&"https://news.mit.edu/2025/robot-chef".to_string()));
        assert!(urls.contains(&"https://www.brown.edu/news/2025-05-01/one".to_string()));
    }

    #[tokio::test]
    async fn test_second_run_finds_nothing_new() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        assert_eq!(scraper.scrape_all().await.total(), 6);
        let again = scraper.scrape_all().await;
        assert_eq!(again.total(), 0);
        assert_eq!(again.len(), 3);
        assert_eq!(store.len().await, 6);
    }

    #[tokio::test]
    async fn test_failing_institution_does_not_stop_the_fleet() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        fetcher.set("https://news.harvard.edu/feed/", Reply::Status(503));
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        let result = scraper.scrape_all().await;
        assert_eq!(result.get("Harvard"), Some(0));
        assert_eq!(result.get("MIT"), Some(2));
        assert_eq!(result.get("Brown"), Some(3));
    }

    #[tokio::test]
    async fn test_failing_source_does_not_stop_the_institution() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        fetcher.set("https://www.brown.edu/news", Reply::Timeout);
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        let report = scraper.run(Some("Brown")).await;
        let brown = &report.institutions[0];
        assert_eq!(brown.new_items, 1);
        assert_eq!(brown.sources[0].strategy, None);
        assert_eq!(brown.sources[0].failures.len(), 2);
        assert_eq!(brown.sources[1].strategy.as_deref(), Some("feed"));
        assert_eq!(renderer.renders(), 1);
    }

    #[tokio::test]
    async fn test_rendered_fallback_feeds_the_store() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        fetcher.set("https://www.brown.edu/news", Reply::Status(403));
        let renderer = FakeRenderer::serving(BROWN_LISTING);
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        let report = scraper.run(Some("Brown")).await;
        let listing = &report.institutions[0].sources[0];
        assert_eq!(listing.strategy.as_deref(), Some("rendered"));
        assert_eq!(listing.new_items, 2);
        assert_eq!(listing.failures, vec!["static_html: HTTP 403 from https://www.brown.edu/news".to_string()]);
        assert_eq!(renderer.renders(), 1);
    }

    #[tokio::test]
    async fn test_scrape_one_unknown_institution_is_zero() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        assert_eq!(scraper.scrape_one("Stanford").await, 0);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_run_with_blank_name_scrapes_everything() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        let report = scraper.run(Some("  ")).await;
        assert_eq!(report.result.len(), 3);
        assert_eq!(report.result.get("MIT"), Some(2));
    }

    #[tokio::test]
    async fn test_feed_links_without_base_are_dropped() {
        let config = SourcesConfig::from_yaml(
            r#"
institutions:
  - name: Cornell
    sources:
      - url: https://news.cornell.edu/feed
        kind: feed
"#,
        )
        .unwrap();
        let store = MemoryStore::new();
        let fetcher = FakeFetcher::default().with("https://news.cornell.edu/feed", Reply::Body(MIT_FEED.to_string()));
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        assert_eq!(scraper.scrape_one("Cornell").await, 1);
        assert_eq!(store.records().await[0].url, "https://news.mit.edu/2025/fusion");
    }

    #[tokio::test]
    async fn test_concurrent_fleet_keeps_config_order() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings {
            concurrency: 3,
            ..ScrapeSettings::default()
        };
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);

        let result = scraper.scrape_all().await;
        let names: Vec<&str> = result.counts.iter().map(|c| c.institution.as_str()).collect();
        assert_eq!(names, vec!["Harvard", "MIT", "Brown"]);
        assert_eq!(result.total(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_yields_zero_counts() {
        let config = config();
        let store = MemoryStore::new();
        let fetcher = healthy_fetcher();
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings {
            run_deadline: Some(Duration::from_secs(5)),
            ..ScrapeSettings::default()
        };
        let clock = RunClock::start(settings.run_deadline);
        let scraper = Scraper::new(&config, &store, &fetcher, &renderer, &settings, clock);
        tokio::time::advance(Duration::from_secs(6)).await;

        let result = scraper.scrape_all().await;
        assert_eq!(result.len(), 3);
        assert_eq!(result.total(), 0);
        assert_eq!(fetcher.calls(), 0);
    }
}
