//! Source fetcher: retrieves one source and extracts raw candidate items.
//!
//! Dispatches on the source's fetch kind: RSS/Atom feeds (quick-xml),
//! JSON APIs, and HTML page scrapes. All parsing is defensive — bare
//! ampersands and invalid entity escapes are re-escaped rather than
//! raising, a non-UTF-8 encoding declaration is logged but tolerated, and
//! any single malformed item is skipped and counted without aborting the
//! whole fetch.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::FetchError;
use crate::models::{CandidateItem, FetchKind, Source};

const USER_AGENT: &str = concat!("newsdesk/", env!("CARGO_PKG_VERSION"), " (+news collection pipeline)");
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

static ENCODING_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"encoding=["']([^"']+)["']"#).unwrap());

/// What one fetch produced: extracted items plus the number of per-item
/// parse failures that were skipped.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<CandidateItem>,
    pub failed: usize,
}

/// Fetch seam: lets the crawl job and coordinator run against stand-in
/// sources in tests while production uses [`SourceFetcher`].
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<FetchOutcome, FetchError>;
}

#[derive(Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl SourceFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?
            .error_for_status()
            .map_err(|e| self.map_reqwest(e))?;
        response.text().await.map_err(|e| self.map_reqwest(e))
    }

    fn map_reqwest(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Http(e)
        }
    }
}

#[async_trait::async_trait]
impl Fetch for SourceFetcher {
    /// Retrieve and parse one source into raw candidate items.
    #[instrument(level = "info", skip_all, fields(source = %source.id, kind = %source.kind))]
    async fn fetch(&self, source: &Source) -> Result<FetchOutcome, FetchError> {
        let body = self.get_text(&source.url).await?;
        let outcome = match source.kind {
            FetchKind::Feed => parse_feed(&body)?,
            FetchKind::Api => parse_api(&body)?,
            FetchKind::Scrape => {
                let base = Url::parse(&source.url)
                    .map_err(|e| FetchError::MalformedPayload(format!("bad source url: {e}")))?;
                parse_page(&body, &base)?
            }
        };
        info!(
            count = outcome.items.len(),
            skipped = outcome.failed,
            "Fetched source"
        );
        Ok(outcome)
    }
}

/// Parse an RSS/Atom document into candidate items.
pub(crate) fn parse_feed(raw: &str) -> Result<FetchOutcome, FetchError> {
    if !raw.trim_start().starts_with('<') {
        return Err(FetchError::MalformedPayload(
            "payload does not look like XML".to_string(),
        ));
    }
    check_encoding_declaration(raw);
    let sanitized = reescape_bare_entities(raw);

    let mut reader = Reader::from_str(&sanitized);
    reader.config_mut().trim_text(true);

    let mut outcome = FetchOutcome::default();
    let mut in_item = false;
    let mut current_tag: Vec<u8> = Vec::new();
    let mut draft = ItemDraft::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"item" | b"entry" => {
                        in_item = true;
                        draft = ItemDraft::default();
                    }
                    _ if in_item => {
                        if e.name().as_ref() == b"link" {
                            if let Some(href) = attr_value(&e, b"href") {
                                draft.link.get_or_insert(href);
                            }
                        }
                        current_tag = local;
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if !in_item {
                    continue;
                }
                match e.name().as_ref() {
                    b"link" => {
                        if let Some(href) = attr_value(&e, b"href") {
                            draft.link.get_or_insert(href);
                        }
                    }
                    b"enclosure" | b"media:thumbnail" | b"media:content" => {
                        if let Some(url) = attr_value(&e, b"url") {
                            draft.image.get_or_insert(url);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if in_item {
                    let raw_text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    let text = match quick_xml::escape::unescape(&raw_text) {
                        Ok(unescaped) => unescaped.into_owned(),
                        // Unknown entity: keep the raw text rather than fail.
                        Err(_) => raw_text,
                    };
                    draft.assign(&current_tag, text);
                }
            }
            Ok(Event::CData(t)) => {
                if in_item {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    draft.assign(&current_tag, text);
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"item" | b"entry" => {
                        in_item = false;
                        match draft.finish() {
                            Some(item) => outcome.items.push(item),
                            None => {
                                outcome.failed += 1;
                                debug!("Skipped malformed feed item");
                            }
                        }
                        draft = ItemDraft::default();
                    }
                    _ => current_tag.clear(),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                if outcome.items.is_empty() && !in_item {
                    return Err(FetchError::MalformedPayload(e.to_string()));
                }
                // Keep what parsed so far; the broken tail counts as one
                // skipped item.
                warn!(error = %e, "Feed parse error mid-document; keeping parsed items");
                outcome.failed += 1;
                break;
            }
        }
    }

    Ok(outcome)
}

#[derive(Debug, Default)]
struct ItemDraft {
    title: Option<String>,
    body: Option<String>,
    description: Option<String>,
    link: Option<String>,
    published: Option<String>,
    author: Option<String>,
    image: Option<String>,
}

impl ItemDraft {
    fn assign(&mut self, tag: &[u8], text: String) {
        if text.is_empty() {
            return;
        }
        match tag {
            b"title" => append(&mut self.title, text),
            b"encoded" | b"content" => append(&mut self.body, text),
            b"description" | b"summary" => append(&mut self.description, text),
            b"link" => {
                self.link.get_or_insert(text);
            }
            b"pubDate" | b"published" | b"updated" | b"date" => {
                self.published.get_or_insert(text);
            }
            b"author" | b"creator" => {
                self.author.get_or_insert(text);
            }
            _ => {}
        }
    }

    fn finish(self) -> Option<CandidateItem> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let url = self.link.filter(|l| !l.trim().is_empty())?;
        let body = self
            .body
            .or(self.description)
            .unwrap_or_default();
        Some(CandidateItem {
            title: title.trim().to_string(),
            body: body.trim().to_string(),
            url: url.trim().to_string(),
            published_at: self.published.as_deref().and_then(parse_feed_date),
            author: self.author,
            image_url: self.image,
        })
    }
}

fn append(slot: &mut Option<String>, text: String) {
    match slot {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(&text);
        }
        None => *slot = Some(text),
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Inspect the XML prolog's encoding declaration. A mismatch is logged,
/// never fatal: the body was already decoded by the HTTP layer.
fn check_encoding_declaration(raw: &str) {
    // get() avoids panicking on a non-boundary slice of multibyte input
    let head = raw.get(..200).unwrap_or(raw);
    if let Some(caps) = ENCODING_DECL.captures(head) {
        let declared = &caps[1];
        if !declared.eq_ignore_ascii_case("utf-8") {
            warn!(encoding = declared, "Feed declares non-UTF-8 encoding; parsing tolerantly");
        }
    }
}

/// Re-escape bare ampersands and invalid entity escapes so the XML parser
/// does not choke on sloppy feeds.
pub(crate) fn reescape_bare_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    for (i, c) in input.char_indices() {
        if c != '&' {
            out.push(c);
            continue;
        }
        let rest = &input[i + 1..];
        let valid = rest
            .char_indices()
            .take(32)
            .find(|(_, rc)| *rc == ';')
            .map(|(j, _)| looks_like_entity(&rest[..j]))
            .unwrap_or(false);
        if valid {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
    }
    out
}

fn looks_like_entity(name: &str) -> bool {
    if let Some(num) = name.strip_prefix('#') {
        if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
        }
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiItem {
    title: String,
    #[serde(alias = "body")]
    content: String,
    #[serde(alias = "link")]
    url: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl From<ApiItem> for CandidateItem {
    fn from(item: ApiItem) -> Self {
        CandidateItem {
            title: item.title,
            body: item.content,
            url: item.url,
            published_at: item.published_at,
            author: item.author,
            image_url: item.image_url,
        }
    }
}

/// Parse a JSON API payload: either a top-level array or an object with an
/// `items`/`articles` array.
pub(crate) fn parse_api(raw: &str) -> Result<FetchOutcome, FetchError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| FetchError::MalformedPayload(format!("invalid JSON: {e}")))?;
    let elements = value
        .as_array()
        .or_else(|| value.get("items").and_then(|v| v.as_array()))
        .or_else(|| value.get("articles").and_then(|v| v.as_array()))
        .ok_or_else(|| {
            FetchError::MalformedPayload("JSON payload holds no item array".to_string())
        })?;

    let mut outcome = FetchOutcome::default();
    for element in elements {
        match serde_json::from_value::<ApiItem>(element.clone()) {
            Ok(item) => outcome.items.push(item.into()),
            Err(e) => {
                outcome.failed += 1;
                debug!(error = %e, "Skipped malformed API item");
            }
        }
    }
    Ok(outcome)
}

/// Extract candidates from an HTML page: one per `<article>` block, with
/// a whole-page fallback when the page uses no article markup.
pub(crate) fn parse_page(raw: &str, base: &Url) -> Result<FetchOutcome, FetchError> {
    let document = Html::parse_document(raw);
    let article_sel = Selector::parse("article").unwrap();
    let heading_sel = Selector::parse("h1, h2, h3").unwrap();
    let para_sel = Selector::parse("p").unwrap();
    let link_sel = Selector::parse("a[href]").unwrap();

    let mut outcome = FetchOutcome::default();
    for element in document.select(&article_sel) {
        let title = element
            .select(&heading_sel)
            .next()
            .map(|h| h.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .unwrap_or_default();
        if title.is_empty() {
            outcome.failed += 1;
            continue;
        }
        let body = element
            .select(&para_sel)
            .map(|p| p.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let url = element
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| base.join(href).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| base.to_string());
        outcome.items.push(CandidateItem {
            title,
            body,
            url,
            published_at: None,
            author: None,
            image_url: None,
        });
    }

    if outcome.items.is_empty() && outcome.failed == 0 {
        let title = document
            .select(&heading_sel)
            .next()
            .map(|h| h.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .unwrap_or_default();
        if !title.is_empty() {
            let body = document
                .select(&para_sel)
                .map(|p| p.text().collect::<Vec<_>>().join(" ").trim().to_string())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");
            outcome.items.push(CandidateItem {
                title,
                body,
                url: base.to_string(),
                published_at: None,
                author: None,
                image_url: None,
            });
        }
    }

    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// Serves canned candidate lists per source id; listed ids fail the
    /// whole fetch instead.
    #[derive(Default)]
    pub(crate) struct StubFetch {
        pub outcomes: HashMap<String, Vec<CandidateItem>>,
        pub failing: HashSet<String>,
    }

    #[async_trait::async_trait]
    impl Fetch for StubFetch {
        async fn fetch(&self, source: &Source) -> Result<FetchOutcome, FetchError> {
            if self.failing.contains(&source.id) {
                return Err(FetchError::MalformedPayload("stubbed fetch failure".to_string()));
            }
            Ok(FetchOutcome {
                items: self.outcomes.get(&source.id).cloned().unwrap_or_default(),
                failed: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Feed</title>
    <link>https://example.com</link>
    <item>
      <title>Markets rally as trade &amp; industry data improves</title>
      <link>https://example.com/markets-rally</link>
      <description><![CDATA[A broad rally across European markets followed fresh data.]]></description>
      <pubDate>Tue, 05 Aug 2025 09:30:00 +0000</pubDate>
      <author>Jane Reporter</author>
      <enclosure url="https://example.com/rally.jpg" type="image/jpeg" length="1000"/>
    </item>
    <item>
      <title>Item without a link is malformed</title>
      <description>No link element at all.</description>
    </item>
    <item>
      <title>Second valid story</title>
      <link>https://example.com/second</link>
      <description>Short body.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn feed_parse_extracts_items_and_skips_malformed() {
        let outcome = parse_feed(RSS_SAMPLE).unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.failed, 1);

        let first = &outcome.items[0];
        assert_eq!(first.title, "Markets rally as trade & industry data improves");
        assert_eq!(first.url, "https://example.com/markets-rally");
        assert!(first.body.contains("broad rally"));
        assert!(first.published_at.is_some());
        assert_eq!(first.author.as_deref(), Some("Jane Reporter"));
        assert_eq!(first.image_url.as_deref(), Some("https://example.com/rally.jpg"));
    }

    #[test]
    fn feed_parse_tolerates_bare_ampersands() {
        let xml = r#"<rss><channel><item>
            <title>Profit & loss report for Q3</title>
            <link>https://example.com/p&l</link>
            <description>Revenue up &1 unknown escape.</description>
        </item></channel></rss>"#;
        let outcome = parse_feed(xml).unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].title, "Profit & loss report for Q3");
    }

    #[test]
    fn feed_parse_tolerates_foreign_encoding_declaration() {
        let xml = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<rss><channel><item>
  <title>Ein Artikel</title>
  <link>https://example.de/artikel</link>
</item></channel></rss>"#;
        let outcome = parse_feed(xml).unwrap();
        assert_eq!(outcome.items.len(), 1);
    }

    #[test]
    fn feed_parse_supports_atom_entries() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Atom entry title goes here</title>
    <link href="https://example.com/atom-entry"/>
    <summary>Atom summary body.</summary>
    <published>2025-08-05T09:30:00Z</published>
  </entry>
</feed>"#;
        let outcome = parse_feed(xml).unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].url, "https://example.com/atom-entry");
        assert!(outcome.items[0].published_at.is_some());
    }

    #[test]
    fn non_xml_payload_is_malformed() {
        assert!(matches!(
            parse_feed("definitely not xml"),
            Err(FetchError::MalformedPayload(_))
        ));
    }

    #[test]
    fn reescape_leaves_valid_entities_alone() {
        assert_eq!(
            reescape_bare_entities("a &amp; b &#38; c &#x26; d"),
            "a &amp; b &#38; c &#x26; d"
        );
        assert_eq!(reescape_bare_entities("fish & chips"), "fish &amp; chips");
        assert_eq!(reescape_bare_entities("broken &entity no end"), "broken &amp;entity no end");
    }

    #[test]
    fn api_parse_accepts_array_and_wrapped_forms() {
        let array = r#"[
            {"title": "API story", "content": "Body text.", "url": "https://e.com/1"},
            {"title": "Missing url so malformed", "content": "Body."}
        ]"#;
        let outcome = parse_api(array).unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.failed, 1);

        let wrapped = r#"{"items": [{"title": "Wrapped", "body": "B", "link": "https://e.com/2",
            "publishedAt": "2025-08-05T09:30:00Z"}]}"#;
        let outcome = parse_api(wrapped).unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].url, "https://e.com/2");
        assert!(outcome.items[0].published_at.is_some());

        assert!(matches!(
            parse_api(r#"{"no": "array"}"#),
            Err(FetchError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_api("not json"),
            Err(FetchError::MalformedPayload(_))
        ));
    }

    #[test]
    fn page_parse_extracts_article_blocks() {
        let html = r#"<html><body>
            <article>
              <h2>First page story</h2>
              <p>Paragraph one.</p>
              <p>Paragraph two.</p>
              <a href="/stories/1">read</a>
            </article>
            <article><p>No heading here.</p></article>
        </body></html>"#;
        let base = Url::parse("https://example.com/news").unwrap();
        let outcome = parse_page(html, &base).unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.items[0].title, "First page story");
        assert_eq!(outcome.items[0].url, "https://example.com/stories/1");
        assert!(outcome.items[0].body.contains("Paragraph one."));
    }

    #[test]
    fn page_parse_falls_back_to_whole_document() {
        let html = "<html><body><h1>Lone headline</h1><p>Only paragraph.</p></body></html>";
        let base = Url::parse("https://example.com/").unwrap();
        let outcome = parse_page(html, &base).unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].title, "Lone headline");
    }
}
