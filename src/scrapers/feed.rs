//! RSS 2.0 and Atom feed parsing.
//!
//! Institutional feeds are produced by a zoo of CMSes and are not always
//! consistent, so the parser does not pick a dialect. It reads the whole
//! document into a small namespace-aware element tree and then collects both
//! un-namespaced RSS `<item>`s and Atom `<entry>`s, in that order.
//!
//! Text is kept the way the XML infoset lays it out: each element has the
//! `text` before its first child and the `tail` that follows its end tag.
//! The tail matters for feeds that emit `<link/>http://…` instead of
//! `<link>http://…</link>`.

use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use quick_xml::NsReader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use regex::bytes::Regex;
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, error, warn};

use crate::models::RawRecord;
use crate::utils::{html_to_text, truncate_chars};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

static DECLARED_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap()
});

/// Description length kept from RSS items after stripping markup.
const RSS_DESCRIPTION_MAX_CHARS: usize = 500;

/// The document is not well-formed XML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedParseError(pub String);

impl fmt::Display for FeedParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed XML parse error: {}", self.0)
    }
}

impl std::error::Error for FeedParseError {}

#[derive(Debug, Default)]
struct XmlElement {
    ns: Option<String>,
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    tail: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn is(&self, ns: Option<&str>, name: &str) -> bool {
        self.name == name && self.ns.as_deref() == ns
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, ns: Option<&str>, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(ns, name))
    }

    fn children_named<'a>(
        &'a self,
        ns: Option<&'a str>,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(ns, name))
    }

    /// All matching descendants in document order, `self` excluded.
    fn descendants<'a>(&'a self, ns: Option<&str>, name: &str, out: &mut Vec<&'a XmlElement>) {
        for c in &self.children {
            if c.is(ns, name) {
                out.push(c);
            }
            c.descendants(ns, name, out);
        }
    }

    /// Text of this element and all descendants, tails of children included.
    fn inner_text(&self) -> String {
        let mut out = self.text.clone();
        for c in &self.children {
            out.push_str(&c.inner_text());
            out.push_str(&c.tail);
        }
        out
    }
}

fn namespace_of(ns: &ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
        ResolveResult::Unbound => None,
        // Keep undeclared prefixes from matching un-namespaced names.
        ResolveResult::Unknown(prefix) => {
            Some(format!("unbound:{}", String::from_utf8_lossy(prefix)))
        }
    }
}

fn open_element(ns: &ResolveResult<'_>, start: &BytesStart<'_>) -> Result<XmlElement, FeedParseError> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| FeedParseError(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value).into_owned();
        let value = match unescape(&raw) {
            Ok(v) => v.into_owned(),
            Err(_) => raw,
        };
        attrs.push((key, value));
    }
    Ok(XmlElement {
        ns: namespace_of(ns),
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attrs,
        ..XmlElement::default()
    })
}

/// Append character data where the infoset puts it: the open element's
/// text, or the tail of its last closed child.
fn push_text(stack: &mut [XmlElement], s: &str) {
    if let Some(open) = stack.last_mut() {
        match open.children.last_mut() {
            Some(last) => last.tail.push_str(s),
            None => open.text.push_str(s),
        }
    }
}

fn resolve_reference(name: &str) -> String {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse::<u32>().ok(),
        };
        if let Some(c) = code.and_then(char::from_u32) {
            return c.to_string();
        }
    } else if let Some(resolved) = resolve_predefined_entity(name) {
        return resolved.to_string();
    }
    // Undeclared (often HTML) entity: keep it verbatim.
    format!("&{name};")
}

fn close_element(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), FeedParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(FeedParseError("more than one root element".into())),
    }
    Ok(())
}

fn parse_tree(doc: &str) -> Result<XmlElement, FeedParseError> {
    let mut reader = NsReader::from_str(doc);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let (ns, event) = reader
            .read_resolved_event()
            .map_err(|e| FeedParseError(e.to_string()))?;
        match event {
            Event::Start(start) => {
                let element = open_element(&ns, &start)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&ns, &start)?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| FeedParseError("unexpected end tag".into()))?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let raw = String::from_utf8_lossy(&text).into_owned();
                let decoded = match unescape(&raw) {
                    Ok(v) => v.into_owned(),
                    Err(_) => raw,
                };
                push_text(&mut stack, &decoded);
            }
            Event::CData(cdata) => push_text(&mut stack, &String::from_utf8_lossy(&cdata)),
            Event::GeneralRef(reference) => {
                let name = String::from_utf8_lossy(&reference).into_owned();
                push_text(&mut stack, &resolve_reference(&name));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(FeedParseError(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| FeedParseError("document has no root element".into()))
}

fn rss_link(item: &XmlElement) -> String {
    if let Some(link) = item.child(None, "link") {
        let text = link.inner_text();
        let text = text.trim();
        let link = if text.is_empty() { link.tail.trim() } else { text };
        if !link.is_empty() {
            return link.to_string();
        }
    }
    match item.child(None, "guid") {
        Some(guid) => {
            let permalink = guid.attr("isPermaLink").unwrap_or("true").to_lowercase();
            if permalink != "false" {
                guid.inner_text().trim().to_string()
            } else {
                String::new()
            }
        }
        None => String::new(),
    }
}

fn rss_description(item: &XmlElement) -> String {
    let stripped = |el: &XmlElement| truncate_chars(&html_to_text(&el.inner_text()), RSS_DESCRIPTION_MAX_CHARS);
    let encoded = item
        .child(Some(CONTENT_NS), "encoded")
        .map(stripped)
        .unwrap_or_default();
    if !encoded.is_empty() {
        return encoded;
    }
    item.child(None, "description").map(stripped).unwrap_or_default()
}

fn rss_record(item: &XmlElement) -> RawRecord {
    let title = item
        .child(None, "title")
        .map(|t| t.inner_text().trim().to_string())
        .unwrap_or_default();
    RawRecord::new(title, rss_link(item)).with_description(rss_description(item))
}

fn atom_link(entry: &XmlElement) -> String {
    let preferred = entry.children_named(Some(ATOM_NS), "link").find(|l| {
        let rel = l.attr("rel").unwrap_or("alternate");
        rel == "alternate" || rel.is_empty()
    });
    let mut href = preferred
        .and_then(|l| l.attr("href"))
        .unwrap_or_default()
        .trim()
        .to_string();
    if href.is_empty() {
        href = entry
            .child(Some(ATOM_NS), "link")
            .and_then(|l| l.attr("href"))
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    href
}

fn atom_record(entry: &XmlElement) -> RawRecord {
    let text_of = |name: &str| {
        entry
            .child(Some(ATOM_NS), name)
            .map(|el| el.inner_text().trim().to_string())
            .unwrap_or_default()
    };
    RawRecord::new(text_of("title"), atom_link(entry)).with_description(text_of("summary"))
}

/// Decode to UTF-8: a byte order mark wins, then the `encoding` of the XML
/// declaration, then UTF-8.
fn decode_document(document: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(document) {
        return encoding.decode_without_bom_handling(&document[bom_len..]).0;
    }
    let declared = DECLARED_ENCODING
        .captures(document)
        .and_then(|caps| caps.get(1))
        .map(|label| label.as_bytes());
    let encoding = match declared {
        Some(label) => Encoding::for_label(label).unwrap_or_else(|| {
            warn!(label = %String::from_utf8_lossy(label), "Unknown feed encoding; reading as UTF-8");
            UTF_8
        }),
        None => UTF_8,
    };
    encoding.decode_without_bom_handling(document).0
}

/// Parse a feed document, failing only when it is not well-formed XML.
///
/// Records may come back with empty titles or links; the dedup gate drops
/// those.
pub fn try_parse_feed(document: &[u8]) -> Result<Vec<RawRecord>, FeedParseError> {
    let text = decode_document(document);
    let root = parse_tree(text.trim_start_matches('\u{feff}'))?;

    let mut items = Vec::new();
    root.descendants(None, "item", &mut items);
    let mut entries = Vec::new();
    if root.is(Some(ATOM_NS), "entry") {
        entries.push(&root);
    }
    root.descendants(Some(ATOM_NS), "entry", &mut entries);

    let records: Vec<RawRecord> = items
        .into_iter()
        .map(rss_record)
        .chain(entries.into_iter().map(atom_record))
        .collect();
    debug!(count = records.len(), "Parsed feed records");
    Ok(records)
}

/// Parse a feed document; a malformed document yields no records.
pub fn parse_feed(document: &[u8], source: &str) -> Vec<RawRecord> {
    match try_parse_feed(document) {
        Ok(records) => records,
        Err(e) => {
            error!(%source, error = %e, "Could not parse feed; skipping source");
            Vec::new()
        }
    }
}
