//! Headless-browser extraction for JavaScript-rendered listing pages.
//!
//! The pipeline only sees the narrow [`PageRenderer`] capability: give it a
//! url, the selector worth waiting for and a navigation timeout, get the
//! rendered DOM back as HTML. The DOM then goes through the same selector
//! routine as a static page.
//!
//! With the `browser` feature, [`ChromiumRenderer`] drives a local Chromium
//! through `chromiumoxide` with basic stealth settings: automation flags
//! hidden, fixed desktop viewport, US locale and timezone, the same desktop
//! user agent as the HTTP client, and a randomized pause after navigation.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::instrument;
use url::Url;

use crate::error::ScrapeError;
use crate::models::RawRecord;
use crate::scrapers::html::{ListSelectors, parse_listing};

/// Result of a bounded wait for the list selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Found,
    /// The bound elapsed; parsing continues with whatever DOM is present.
    TimedOut,
}

/// Poll `probe` every `interval` until it reports true or `bound` elapses.
pub async fn wait_until<F, Fut>(bound: Duration, interval: Duration, mut probe: F) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polling = async {
        loop {
            if probe().await {
                return;
            }
            sleep(interval).await;
        }
    };
    match timeout(bound, polling).await {
        Ok(()) => WaitOutcome::Found,
        Err(_) => WaitOutcome::TimedOut,
    }
}

/// Produces the rendered DOM of a page.
pub trait PageRenderer {
    /// Navigate to `url` within `timeout`, wait (bounded) for
    /// `wait_selector`, and return the DOM as HTML.
    ///
    /// Implementations release every browser resource before returning,
    /// on success and on error.
    async fn render(&self, url: &str, wait_selector: &str, timeout: Duration) -> Result<String, ScrapeError>;
}

/// Render `url` and parse the DOM with the listing selectors.
#[instrument(level = "info", skip(renderer, selectors))]
pub async fn extract_rendered<R: PageRenderer>(
    renderer: &R,
    url: &str,
    selectors: &ListSelectors,
    timeout: Duration,
) -> Result<Vec<RawRecord>, ScrapeError> {
    let page_url = Url::parse(url).map_err(|e| ScrapeError::Config(format!("bad url '{url}': {e}")))?;
    let html = renderer.render(url, selectors.list_css(), timeout).await?;
    Ok(parse_listing(&html, &page_url, selectors))
}

/// Stand-in used when the build or the run has no browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRenderer;

impl PageRenderer for DisabledRenderer {
    async fn render(&self, _url: &str, _wait_selector: &str, _timeout: Duration) -> Result<String, ScrapeError> {
        Err(ScrapeError::BrowserUnavailable)
    }
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "browser")]
mod chromium {
    use chromiumoxide::Page;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::cdp::browser_protocol::emulation::{
        SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
        SetUserAgentOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
    use chromiumoxide::error::CdpError;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tracing::{debug, info, instrument, warn};

    use super::{PageRenderer, WaitOutcome, wait_until};
    use crate::config::ScrapeSettings;
    use crate::error::ScrapeError;
    use crate::fetch::{ACCEPT_LANGUAGE, RunClock, USER_AGENT};

    const VIEWPORT: (u32, u32) = (1280, 900);
    const LOCALE: &str = "en-US";
    const TIMEZONE: &str = "America/New_York";
    const HIDE_WEBDRIVER: &str = "Object.defineProperty(navigator,'webdriver',{get:()=>undefined})";
    const SELECTOR_POLL: Duration = Duration::from_millis(250);

    fn cdp(e: CdpError) -> ScrapeError {
        ScrapeError::Browser(e.to_string())
    }

    /// Launches a fresh headless Chromium per render and always tears it down.
    ///
    /// The post-navigation pause and the selector wait are both cut short by
    /// the run clock, like every fetch.
    #[derive(Debug, Clone)]
    pub struct ChromiumRenderer {
        settings: ScrapeSettings,
        clock: RunClock,
    }

    impl ChromiumRenderer {
        pub fn new(settings: ScrapeSettings, clock: RunClock) -> Self {
            Self { settings, clock }
        }

        async fn prepare(&self, page: &Page) -> Result<(), ScrapeError> {
            let user_agent = SetUserAgentOverrideParams::builder()
                .user_agent(USER_AGENT)
                .accept_language(ACCEPT_LANGUAGE)
                .build()
                .map_err(ScrapeError::Browser)?;
            page.execute(user_agent).await.map_err(cdp)?;
            page.execute(SetDeviceMetricsOverrideParams::new(
                VIEWPORT.0 as i64,
                VIEWPORT.1 as i64,
                1.0,
                false,
            ))
            .await
            .map_err(cdp)?;
            page.execute(SetTimezoneOverrideParams::new(TIMEZONE))
                .await
                .map_err(cdp)?;
            page.execute(SetLocaleOverrideParams {
                locale: Some(LOCALE.to_string()),
            })
            .await
            .map_err(cdp)?;
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER))
                .await
                .map_err(cdp)?;
            Ok(())
        }

        async fn drive(
            &self,
            page: &Page,
            url: &str,
            wait_selector: &str,
            nav_timeout: Duration,
        ) -> Result<String, ScrapeError> {
            self.prepare(page).await?;

            match timeout(nav_timeout, page.goto(url)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(cdp(e)),
                Err(_) => return Err(ScrapeError::Timeout { url: url.to_string() }),
            }

            let pause = self.clock.clip(self.settings.pacing_delay());
            debug!(?pause, "Pacing before reading the DOM");
            sleep(pause).await;

            let outcome = wait_until(self.clock.clip(self.settings.selector_wait), SELECTOR_POLL, move || async move {
                page.find_element(wait_selector).await.is_ok()
            })
            .await;
            if outcome == WaitOutcome::TimedOut {
                warn!(selector = %wait_selector, "Selector not found; scraping available DOM");
            }

            page.content().await.map_err(cdp)
        }
    }

    impl PageRenderer for ChromiumRenderer {
        #[instrument(level = "info", skip(self))]
        async fn render(
            &self,
            url: &str,
            wait_selector: &str,
            timeout: Duration,
        ) -> Result<String, ScrapeError> {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .window_size(VIEWPORT.0, VIEWPORT.1)
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-dev-shm-usage")
                .request_timeout(timeout)
                .build()
                .map_err(ScrapeError::Browser)?;

            let (mut browser, mut handler) = Browser::launch(config).await.map_err(cdp)?;
            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let result = match browser.new_page("about:blank").await {
                Ok(page) => {
                    let html = self.drive(&page, url, wait_selector, timeout).await;
                    if let Err(e) = page.close().await {
                        debug!(error = %e, "Page close failed; closing browser anyway");
                    }
                    html
                }
                Err(e) => Err(cdp(e)),
            };

            if let Err(e) = browser.close().await {
                warn!(error = %e, "Browser close failed");
            }
            if let Err(e) = browser.wait().await {
                warn!(error = %e, "Waiting for browser exit failed");
            }
            handler_task.abort();

            if let Ok(html) = &result {
                info!(bytes = html.len(), "Rendered page");
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedDom(&'static str);

    impl PageRenderer for FixedDom {
        async fn render(&self, _url: &str, _wait_selector: &str, _timeout: Duration) -> Result<String, ScrapeError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_extract_rendered_reuses_listing_parser() {
        let renderer = FixedDom(
            r#"<div id="app"><article><h3><a href="/news/a">Rendered A</a></h3></article>
               <article><h3><a href="/news/b">Rendered B</a></h3></article></div>"#,
        );
        let sel = ListSelectors::parse("article", "a").unwrap();
        let records = extract_rendered(&renderer, "https://home.dartmouth.edu/news", &sel, Duration::from_secs(45))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].link, "https://home.dartmouth.edu/news/b");
    }

    #[tokio::test]
    async fn test_disabled_renderer_fails() {
        let sel = ListSelectors::parse("article", "a").unwrap();
        let err = extract_rendered(&DisabledRenderer, "https://x.edu/news", &sel, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::BrowserUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_found_after_a_few_polls() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let outcome = wait_until(Duration::from_secs(15), Duration::from_millis(250), move || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .await;
        assert_eq!(outcome, WaitOutcome::Found);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out_and_continues() {
        let outcome = wait_until(Duration::from_secs(15), Duration::from_millis(250), || async { false }).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_with_spent_budget_checks_once() {
        assert_eq!(wait_until(Duration::ZERO, Duration::from_millis(250), || async { true }).await, WaitOutcome::Found);
        assert_eq!(wait_until(Duration::ZERO, Duration::from_millis(250), || async { false }).await, WaitOutcome::TimedOut);
    }
}
