//! Listing-page extraction with CSS selectors.
//!
//! One shared routine serves every `html` source: the selectors come from
//! the source table, never from per-site code. The same routine parses the
//! DOM a headless browser hands back.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::ScrapeError;
use crate::models::RawRecord;
use crate::utils::collapse_whitespace;

/// Compiled list/title selector pair.
#[derive(Debug, Clone)]
pub struct ListSelectors {
    list: Selector,
    title: Selector,
    anchor: Selector,
    list_css: String,
}

impl ListSelectors {
    pub fn parse(list: &str, title: &str) -> Result<Self, ScrapeError> {
        let compile = |css: &str| {
            Selector::parse(css).map_err(|e| ScrapeError::Selector(format!("'{css}': {e}")))
        };
        Ok(Self {
            list: compile(list)?,
            title: compile(title)?,
            anchor: compile("a[href]")?,
            list_css: list.to_string(),
        })
    }

    /// The list selector as written in the source table.
    pub fn list_css(&self) -> &str {
        &self.list_css
    }
}

fn visible_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn resolve(href: &str, page: &Url) -> Option<String> {
    let resolved = match Url::parse(href) {
        Ok(abs) => abs,
        Err(_) => page.join(href).ok()?,
    };
    // javascript:, mailto: and friends are not navigable records.
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

fn extract_item(item: ElementRef<'_>, page: &Url, selectors: &ListSelectors) -> Option<RawRecord> {
    let title_el = match item.select(&selectors.title).next() {
        Some(el) => el,
        None if item.value().name() == "a" => item,
        None => return None,
    };

    let title = visible_text(title_el);
    if title.is_empty() {
        return None;
    }

    let href = title_el
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or_else(|| {
            item.select(&selectors.anchor)
                .filter_map(|a| a.value().attr("href"))
                .map(str::trim)
                .find(|h| !h.is_empty())
        })?;

    let link = resolve(href, page)?;
    Some(RawRecord::new(title, link))
}

/// Extract one record per element matching the list selector.
///
/// Items without a usable title element, without title text, or without a
/// link are skipped.
#[instrument(level = "debug", skip(html, selectors), fields(list = %selectors.list_css()))]
pub fn parse_listing(html: &str, page_url: &Url, selectors: &ListSelectors) -> Vec<RawRecord> {
    let document = Html::parse_document(html);
    let mut matched = 0usize;
    let records: Vec<RawRecord> = document
        .select(&selectors.list)
        .inspect(|_| matched += 1)
        .filter_map(|item| extract_item(item, page_url, selectors))
        .collect();
    if matched == 0 {
        warn!(page = %page_url, list = %selectors.list_css(), "List selector matched nothing");
    } else {
        debug!(matched, extracted = records.len(), "Parsed listing page");
    }
    records
}
