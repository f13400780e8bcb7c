//! Strategy selection and fallback for one source.
//!
//! Strategies are tried in [`STRATEGY_CHAIN`] order, skipping those that do
//! not apply to the source kind. The first success wins. A failure moves on
//! to the next applicable strategy; when none is left the source yields no
//! records. Feed sources have a single strategy, so a feed failure (or an
//! empty feed) is final. HTML sources try the static page first and fall
//! back to the rendered page only when the static attempt errors.

use std::fmt;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::config::{ScrapeSettings, SourceDescriptor, SourceKind};
use crate::error::ScrapeError;
use crate::fetch::{DocumentKind, PageFetcher, RunClock};
use crate::models::RawRecord;
use crate::scrapers::feed::parse_feed;
use crate::scrapers::html::{ListSelectors, parse_listing};
use crate::scrapers::rendered::{PageRenderer, extract_rendered};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Feed,
    StaticHtml,
    Rendered,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Feed => "feed",
            Strategy::StaticHtml => "static_html",
            Strategy::Rendered => "rendered",
        }
    }

    /// Whether records from this strategy came from a page whose URL can
    /// resolve relative links.
    pub fn has_page_context(self) -> bool {
        !matches!(self, Strategy::Feed)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn is_feed(source: &SourceDescriptor) -> bool {
    source.kind == SourceKind::Feed
}

fn is_html(source: &SourceDescriptor) -> bool {
    source.kind == SourceKind::Html
}

/// Ordered strategies with their applicability predicate.
pub const STRATEGY_CHAIN: [(Strategy, fn(&SourceDescriptor) -> bool); 3] = [
    (Strategy::Feed, is_feed),
    (Strategy::StaticHtml, is_html),
    (Strategy::Rendered, is_html),
];

/// One failed strategy attempt.
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub error: ScrapeError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// What routing one source produced.
#[derive(Debug, Default)]
pub struct RouteReport {
    /// The strategy that succeeded, `None` when every applicable one failed.
    pub strategy: Option<Strategy>,
    pub records: Vec<RawRecord>,
    pub failures: Vec<StrategyFailure>,
}

/// Runs the strategy chain for sources, sharing one fetcher, one renderer
/// and one run clock.
pub struct SourceRouter<'a, F, R> {
    fetcher: &'a F,
    renderer: &'a R,
    settings: &'a ScrapeSettings,
    clock: RunClock,
}

impl<'a, F: PageFetcher, R: PageRenderer> SourceRouter<'a, F, R> {
    pub fn new(fetcher: &'a F, renderer: &'a R, settings: &'a ScrapeSettings, clock: RunClock) -> Self {
        Self {
            fetcher,
            renderer,
            settings,
            clock,
        }
    }

    /// Try each applicable strategy until one succeeds.
    ///
    /// Every failure is logged once: a warning when another strategy will
    /// be tried, an error when it was the last one.
    #[instrument(level = "info", skip_all, fields(label = %source.label(), url = %source.url))]
    pub async fn route(&self, source: &SourceDescriptor) -> RouteReport {
        let label = source.label();
        let applicable: Vec<Strategy> = STRATEGY_CHAIN
            .iter()
            .filter(|(_, applies)| applies(source))
            .map(|(strategy, _)| *strategy)
            .collect();

        let mut report = RouteReport::default();
        for (i, strategy) in applicable.iter().copied().enumerate() {
            match self.attempt(strategy, source).await {
                Ok(records) => {
                    info!(source = %label, %strategy, extracted = records.len(), "Strategy succeeded");
                    report.strategy = Some(strategy);
                    report.records = records;
                    return report;
                }
                Err(e) => {
                    let last = i + 1 == applicable.len();
                    log_failure(source, strategy, &e, last);
                    report.failures.push(StrategyFailure { strategy, error: e });
                }
            }
        }
        report
    }

    async fn attempt(&self, strategy: Strategy, source: &SourceDescriptor) -> Result<Vec<RawRecord>, ScrapeError> {
        match strategy {
            Strategy::Feed => {
                let timeout = self.clock.budget(self.settings.feed_timeout)?;
                let body = self.fetcher.fetch(&source.url, DocumentKind::Feed, timeout).await?;
                Ok(parse_feed(&body, source.label()))
            }
            Strategy::StaticHtml => {
                let selectors = compile_selectors(source)?;
                let page_url = parse_page_url(&source.url)?;
                let timeout = self.clock.budget(self.settings.html_timeout)?;
                let body = self.fetcher.fetch(&source.url, DocumentKind::Html, timeout).await?;
                let html = String::from_utf8_lossy(&body);
                Ok(parse_listing(&html, &page_url, &selectors))
            }
            Strategy::Rendered => {
                let selectors = compile_selectors(source)?;
                let timeout = self.clock.budget(self.settings.render_timeout)?;
                extract_rendered(self.renderer, &source.url, &selectors, timeout).await
            }
        }
    }
}

fn compile_selectors(source: &SourceDescriptor) -> Result<ListSelectors, ScrapeError> {
    let selectors = source
        .selectors
        .as_ref()
        .ok_or_else(|| ScrapeError::Config(format!("source '{}' has no selectors", source.label())))?;
    ListSelectors::parse(&selectors.list, &selectors.title)
}

fn parse_page_url(url: &str) -> Result<Url, ScrapeError> {
    Url::parse(url).map_err(|e| ScrapeError::Config(format!("bad url '{url}': {e}")))
}

fn log_failure(source: &SourceDescriptor, strategy: Strategy, err: &ScrapeError, last: bool) {
    let (label, url) = (source.label(), source.url.as_str());
    let timed_out = err.is_timeout();
    match (err.status(), last) {
        (Some(status), true) => {
            error!(%label, %url, %strategy, status, error = %err, "HTTP error; no strategies left")
        }
        (Some(status), false) => {
            warn!(%label, %url, %strategy, status, error = %err, "HTTP error; escalating")
        }
        (None, true) => {
            error!(%label, %url, %strategy, timed_out, error = %err, "Strategy failed; no strategies left")
        }
        (None, false) => {
            warn!(%label, %url, %strategy, timed_out, error = %err, "Strategy failed; escalating")
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakeFetcher, FakeRenderer, Reply};
    use super::*;
    use std::time::Duration;

    const LISTING: &str = r#"<html><body>
        <article><h3><a href="/news/one">One</a></h3></article>
        <article><h3><a href="/news/two">Two</a></h3></article>
    </body></html>"#;

    fn html_source() -> SourceDescriptor {
        SourceDescriptor::html("https://www.brown.edu/news", "article", "a", "news_event", "Brown News")
    }

    fn feed_source() -> SourceDescriptor {
        SourceDescriptor::feed("https://news.mit.edu/rss/feed", "research", "MIT News")
    }

    #[test]
    fn test_chain_applicability() {
        let html: Vec<Strategy> = STRATEGY_CHAIN
            .iter()
            .filter(|(_, f)| f(&html_source()))
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(html, vec![Strategy::StaticHtml, Strategy::Rendered]);

        let feed: Vec<Strategy> = STRATEGY_CHAIN
            .iter()
            .filter(|(_, f)| f(&feed_source()))
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(feed, vec![Strategy::Feed]);
    }

    #[tokio::test]
    async fn test_static_success_skips_browser() {
        let fetcher = FakeFetcher::default().with("https://www.brown.edu/news", Reply::Body(LISTING.to_string()));
        let renderer = FakeRenderer::serving(LISTING);
        let settings = ScrapeSettings::default();
        let router = SourceRouter::new(&fetcher, &renderer, &settings, RunClock::unbounded());

        let report = router.route(&html_source()).await;
        assert_eq!(report.strategy, Some(Strategy::StaticHtml));
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].link, "https://www.brown.edu/news/one");
        assert!(report.failures.is_empty());
        assert_eq!(renderer.renders(), 0);
    }

    #[tokio::test]
    async fn test_static_empty_result_does_not_escalate() {
        let fetcher = FakeFetcher::default().with(
            "https://www.brown.edu/news",
            Reply::Body("<html><body><div id=\"app\"></div></body></html>".to_string()),
        );
        let renderer = FakeRenderer::serving(LISTING);
        let settings = ScrapeSettings::default();
        let router = SourceRouter::new(&fetcher, &renderer, &settings, RunClock::unbounded());

        let report = router.route(&html_source()).await;
        assert_eq!(report.strategy, Some(Strategy::StaticHtml));
        assert!(report.records.is_empty());
        assert_eq!(renderer.renders(), 0);
    }

    #[tokio::test]
    async fn test_static_failure_escalates_once() {
        let fetcher = FakeFetcher::default().with("https://www.brown.edu/news", Reply::Status(403));
        let renderer = FakeRenderer::serving(LISTING);
        let settings = ScrapeSettings::default();
        let router = SourceRouter::new(&fetcher, &renderer, &settings, RunClock::unbounded());

        let report = router.route(&html_source()).await;
        assert_eq!(report.strategy, Some(Strategy::Rendered));
        assert_eq!(report.records.len(), 2);
        assert_eq!(renderer.renders(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.status(), Some(403));
    }

    #[tokio::test]
    async fn test_both_failures_are_recorded() {
        let fetcher = FakeFetcher::default().with("https://www.brown.edu/news", Reply::Timeout);
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let router = SourceRouter::new(&fetcher, &renderer, &settings, RunClock::unbounded());

        let report = router.route(&html_source()).await;
        assert_eq!(report.strategy, None);
        assert!(report.records.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].error.is_timeout());
        assert_eq!(report.failures[1].strategy, Strategy::Rendered);
        assert_eq!(renderer.renders(), 1);
    }

    #[tokio::test]
    async fn test_feed_failure_never_renders() {
        let fetcher = FakeFetcher::default().with("https://news.mit.edu/rss/feed", Reply::Status(500));
        let renderer = FakeRenderer::serving(LISTING);
        let settings = ScrapeSettings::default();
        let router = SourceRouter::new(&fetcher, &renderer, &settings, RunClock::unbounded());

        let report = router.route(&feed_source()).await;
        assert_eq!(report.strategy, None);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].to_string(), "feed: HTTP 500 from https://news.mit.edu/rss/feed");
        assert_eq!(renderer.renders(), 0);
    }

    #[tokio::test]
    async fn test_malformed_feed_is_an_empty_success() {
        let fetcher = FakeFetcher::default().with(
            "https://news.mit.edu/rss/feed",
            Reply::Body("<rss><channel><item>".to_string()),
        );
        let renderer = FakeRenderer::default();
        let settings = ScrapeSettings::default();
        let router = SourceRouter::new(&fetcher, &renderer, &settings, RunClock::unbounded());

        let report = router.route(&feed_source()).await;
        assert_eq!(report.strategy, Some(Strategy::Feed));
        assert!(report.records.is_empty());
        assert!(report.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_stops_fetching() {
        let fetcher = FakeFetcher::default().with("https://www.brown.edu/news", Reply::Body(LISTING.to_string()));
        let renderer = FakeRenderer::serving(LISTING);
        let settings = ScrapeSettings::default();
        let clock = RunClock::start(Some(Duration::from_secs(1)));
        tokio::time::advance(Duration::from_secs(2)).await;
        let router = SourceRouter::new(&fetcher, &renderer, &settings, clock);

        let report = router.route(&html_source()).await;
        assert_eq!(report.strategy, None);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, ScrapeError::DeadlineExceeded)));
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(renderer.renders(), 0);
    }
}
