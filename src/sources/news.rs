use super::types::{Query, SourceKind, SourceResult};
use super::Source;
use crate::config::NewsConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, extract_domain};
use crate::text;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};

/// One entry parsed out of an RSS or Atom feed.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub feed_title: String,
    pub title: String,
    pub summary: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

pub struct NewsSource {
    config: NewsConfig,
    http: HttpClient,
}

impl NewsSource {
    pub fn new(config: NewsConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    async fn fetch_all_feeds(&self) -> Result<Vec<FeedItem>> {
        if self.config.feeds.is_empty() {
            return Ok(Vec::new());
        }

        let fetches = self.config.feeds.iter().map(|url| async move {
            let body = self.http.get_text(url).await;
            (url, body)
        });

        let mut items = Vec::new();
        let mut last_error = None;
        for (url, body) in join_all(fetches).await {
            match body {
                Ok(xml) => {
                    let mut parsed = parse_feed(&xml, url);
                    parsed.truncate(self.config.max_items_per_feed);
                    items.extend(parsed);
                }
                Err(e) => {
                    warn!(feed = %url, error = %e, "failed to fetch feed, skipping");
                    last_error = Some(e);
                }
            }
        }

        if items.is_empty()
            && let Some(e) = last_error
        {
            return Err(e);
        }
        info!(item_count = items.len(), "fetched news items");
        Ok(items)
    }
}

#[async_trait]
impl Source for NewsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::News
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<SourceResult>> {
        let items = self.fetch_all_feeds().await?;
        let terms = text::query_terms(&query.text);

        let mut scored: Vec<(f64, FeedItem)> = items
            .into_iter()
            .map(|item| {
                let r = text::relevance(&terms, &format!("{} {}", item.title, item.summary));
                (r, item)
            })
            .collect();

        let any_match = scored.iter().any(|(r, _)| *r > 0.0);
        if any_match {
            scored.retain(|(r, _)| *r > 0.0);
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.published.cmp(&a.1.published))
        });

        Ok(scored
            .into_iter()
            .map(|(relevance, item)| {
                let mut result = to_result(item);
                result.relevance = Some(relevance);
                result
            })
            .collect())
    }

    async fn latest(&self) -> Result<Vec<SourceResult>> {
        let mut items = self.fetch_all_feeds().await?;
        items.sort_by(|a, b| b.published.cmp(&a.published));
        Ok(items.into_iter().map(to_result).collect())
    }
}

fn to_result(item: FeedItem) -> SourceResult {
    let mut result = SourceResult::new(
        SourceKind::News,
        item.feed_title,
        item.title,
        item.summary,
    );
    result.url = item.link;
    result.published_at = item.published;
    result
}

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| Error::parse(format!("selector {s}: {e}")))
}

fn first_text(el: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|e| text::strip_tags(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Parse RSS 2.0 or Atom into items. Malformed input yields whatever could be
/// recovered rather than an error.
pub fn parse_feed(xml: &str, feed_url: &str) -> Vec<FeedItem> {
    // The HTML parser treats CDATA as a bogus comment; unwrap it first.
    let cleaned = xml.replace("<![CDATA[", "").replace("]]>", "");
    let document = Html::parse_document(&cleaned);

    let (Ok(item_sel), Ok(title_sel), Ok(summary_sel), Ok(date_sel), Ok(link_sel), Ok(guid_sel)) = (
        selector("item, entry"),
        selector("title"),
        selector("description, summary, content"),
        selector("pubdate, published, updated"),
        selector("link"),
        selector("guid, id"),
    ) else {
        return Vec::new();
    };

    let feed_title = selector("channel > title, feed > title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|e| e.text().collect::<String>().trim().to_string())
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| extract_domain(feed_url));

    document
        .select(&item_sel)
        .filter_map(|item| {
            let title = first_text(&item, &title_sel)?;
            let summary = first_text(&item, &summary_sel).unwrap_or_default();
            let published = first_text(&item, &date_sel).and_then(|d| parse_date(&d));
            let link = item
                .select(&link_sel)
                .next()
                .and_then(|l| link_target(&l))
                .or_else(|| first_text(&item, &guid_sel).filter(|g| g.starts_with("http")));
            Some(FeedItem {
                feed_title: feed_title.clone(),
                title,
                summary,
                link,
                published,
            })
        })
        .collect()
}

/// Atom links carry `href`; RSS `<link>` is a void element to the HTML parser,
/// so its URL ends up in the following text node.
fn link_target(link: &ElementRef<'_>) -> Option<String> {
    if let Some(href) = link.value().attr("href") {
        return Some(href.to_string());
    }
    link.next_sibling()
        .and_then(|n| n.value().as_text().map(|t| t.trim().to_string()))
        .filter(|t| t.starts_with("http"))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
  <title>Example News</title>
  <link>https://news.example.com</link>
  <item>
    <title><![CDATA[Tesla shares jump after earnings]]></title>
    <description><![CDATA[<p>Electric carmaker beats <b>expectations</b>.</p>]]></description>
    <link>https://news.example.com/tesla</link>
    <pubDate>Tue, 10 Jun 2025 14:30:00 GMT</pubDate>
  </item>
  <item>
    <title>Storms hit the coast</title>
    <description>Heavy rain and wind.</description>
    <guid>https://news.example.com/storms</guid>
  </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Wire</title>
  <entry>
    <title>Chipmakers rally</title>
    <link href="https://atom.example.com/chips"/>
    <summary>Semiconductor stocks climbed.</summary>
    <updated>2025-06-10T12:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let items = parse_feed(RSS, "https://news.example.com/rss");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].feed_title, "Example News");
        assert_eq!(items[0].title, "Tesla shares jump after earnings");
        assert_eq!(items[0].summary, "Electric carmaker beats expectations.");
        assert_eq!(items[0].link.as_deref(), Some("https://news.example.com/tesla"));
        assert!(items[0].published.is_some());
        assert_eq!(items[1].title, "Storms hit the coast");
        assert!(items[1].published.is_none());
        assert_eq!(items[1].link.as_deref(), Some("https://news.example.com/storms"));
    }

    #[test]
    fn parses_atom_entries() {
        let items = parse_feed(ATOM, "https://atom.example.com/feed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].feed_title, "Atom Wire");
        assert_eq!(items[0].link.as_deref(), Some("https://atom.example.com/chips"));
        assert_eq!(items[0].summary, "Semiconductor stocks climbed.");
        assert!(items[0].published.is_some());
    }

    #[test]
    fn garbage_yields_no_items() {
        assert!(parse_feed("not a feed at all", "https://x.example").is_empty());
    }

    #[test]
    fn dates_in_both_formats() {
        assert!(parse_date("Tue, 10 Jun 2025 14:30:00 GMT").is_some());
        assert!(parse_date("2025-06-10T12:00:00Z").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
