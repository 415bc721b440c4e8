use super::types::{Metric, Query, SourceKind, SourceResult};
use super::Source;
use crate::config::SocialConfig;
use crate::error::Result;
use crate::http::HttpClient;
use crate::text;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub subreddit: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    pub permalink: Option<String>,
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub stickied: bool,
}

pub struct SocialSource {
    config: SocialConfig,
    http: HttpClient,
}

impl SocialSource {
    pub fn new(config: SocialConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    async fn listing(&self, url: &str, params: &[(&str, &str)]) -> Result<Vec<Post>> {
        let listing: Listing = self.http.get_json_query(url, params).await?;
        Ok(posts(listing))
    }

    fn to_result(&self, post: Post) -> SourceResult {
        let body = text::truncate_chars(post.selftext.trim(), 500);
        let mut result = SourceResult::new(
            SourceKind::Social,
            format!("r/{}", post.subreddit),
            post.title,
            body,
        );
        result.url = post
            .permalink
            .map(|p| format!("{}{}", self.config.base_url.trim_end_matches('/'), p));
        result.published_at = post
            .created_utc
            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0));
        result.metrics = vec![
            Metric::new("score", post.score as f64, "upvotes"),
            Metric::new("comments", post.num_comments as f64, ""),
        ];
        result
    }
}

fn posts(listing: Listing) -> Vec<Post> {
    listing
        .data
        .children
        .into_iter()
        .map(|c| c.data)
        .filter(|p| !p.stickied)
        .collect()
}

#[async_trait]
impl Source for SocialSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Social
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<SourceResult>> {
        let url = format!("{}/search.json", self.config.base_url.trim_end_matches('/'));
        let limit = self.config.max_posts.to_string();
        let found = self
            .listing(
                &url,
                &[
                    ("q", query.text.as_str()),
                    ("sort", "relevance"),
                    ("t", "week"),
                    ("limit", limit.as_str()),
                ],
            )
            .await?;

        let terms = text::query_terms(&query.text);
        Ok(found
            .into_iter()
            .map(|p| {
                let relevance = text::relevance(&terms, &format!("{} {}", p.title, p.selftext));
                let mut r = self.to_result(p);
                r.relevance = Some(relevance);
                r
            })
            .collect())
    }

    async fn latest(&self) -> Result<Vec<SourceResult>> {
        let base = self.config.base_url.trim_end_matches('/');
        let limit = self.config.max_posts.to_string();
        let fetches = self.config.subreddits.iter().map(|sub| {
            let url = format!("{base}/r/{sub}/hot.json");
            let limit = limit.clone();
            async move { (sub, self.listing(&url, &[("limit", limit.as_str())]).await) }
        });

        let mut results = Vec::new();
        for (sub, outcome) in join_all(fetches).await {
            match outcome {
                Ok(found) => results.extend(found.into_iter().map(|p| self.to_result(p))),
                Err(e) => warn!(subreddit = %sub, error = %e, "failed to fetch subreddit"),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{"kind": "Listing", "data": {"children": [
        {"kind": "t3", "data": {"title": "Weekly discussion thread", "selftext": "", "subreddit": "stocks",
            "score": 5, "num_comments": 900, "permalink": "/r/stocks/comments/a/", "created_utc": 1718000000.0,
            "stickied": true}},
        {"kind": "t3", "data": {"title": "NVDA just passed 3 trillion", "selftext": "Chip demand keeps climbing.",
            "subreddit": "stocks", "score": 4200, "num_comments": 610,
            "permalink": "/r/stocks/comments/b/nvda/", "created_utc": 1718000500.0}}
    ]}}"#;

    fn source() -> SocialSource {
        SocialSource::new(SocialConfig::default(), HttpClient::new("test").unwrap())
    }

    #[test]
    fn stickied_posts_are_dropped() {
        let listing: Listing = serde_json::from_str(LISTING).unwrap();
        let found = posts(listing);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "NVDA just passed 3 trillion");
    }

    #[test]
    fn post_maps_to_result() {
        let listing: Listing = serde_json::from_str(LISTING).unwrap();
        let post = posts(listing).remove(0);
        let r = source().to_result(post);
        assert_eq!(r.provider, "r/stocks");
        assert_eq!(r.content, "Chip demand keeps climbing.");
        assert_eq!(
            r.url.as_deref(),
            Some("https://www.reddit.com/r/stocks/comments/b/nvda/")
        );
        assert_eq!(r.metric("score"), Some(4200.0));
        assert_eq!(r.metric("comments"), Some(610.0));
        assert!(r.published_at.is_some());
    }
}
