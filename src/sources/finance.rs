use super::types::{Metric, Query, SourceKind, SourceResult};
use super::Source;
use crate::config::FinanceConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::text;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

const PLATFORM: &str = "alphavantage";

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

/// Parsed quote for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: f64,
}

pub struct FinanceSource {
    config: FinanceConfig,
    http: HttpClient,
    api_key: Option<String>,
}

impl FinanceSource {
    pub fn new(config: FinanceConfig, http: HttpClient) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self {
            config,
            http,
            api_key,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Symbols to look up for `text`, falling back to the configured defaults.
    pub fn symbols_for(&self, text: &str) -> Vec<String> {
        let mut symbols = text::extract_tickers(text);
        if symbols.is_empty() {
            symbols = self.config.default_symbols.clone();
        }
        symbols.truncate(self.config.max_symbols);
        symbols
    }

    async fn quote(&self, key: &str, symbol: &str) -> Result<Quote> {
        let resp: QuoteResponse = self
            .http
            .get_json_query(
                &self.config.base_url,
                &[("function", "GLOBAL_QUOTE"), ("symbol", symbol), ("apikey", key)],
            )
            .await?;
        parse_quote(resp, symbol)
    }

    async fn quotes(&self, symbols: &[String]) -> Result<Vec<SourceResult>> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::missing_credentials(PLATFORM, &self.config.api_key_env))?;

        let lookups = symbols.iter().map(|s| self.quote(key, s));
        let mut results = Vec::new();
        let mut last_error = None;
        for (symbol, outcome) in symbols.iter().zip(join_all(lookups).await) {
            match outcome {
                Ok(q) => results.push(to_result(q)),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "quote lookup failed, skipping");
                    last_error = Some(e);
                }
            }
        }

        if results.is_empty()
            && let Some(e) = last_error
        {
            return Err(e);
        }
        debug!(quotes = results.len(), "fetched quotes");
        Ok(results)
    }
}

#[async_trait]
impl Source for FinanceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Finance
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<SourceResult>> {
        let symbols = self.symbols_for(&query.text);
        let named = text::extract_tickers(&query.text);
        let mut results = self.quotes(&symbols).await?;
        for r in &mut results {
            // Defaults fill in when nothing was named, so they rank lower.
            r.relevance = Some(if named.contains(&r.title) { 1.0 } else { 0.5 });
        }
        Ok(results)
    }

    async fn latest(&self) -> Result<Vec<SourceResult>> {
        let mut symbols = self.config.default_symbols.clone();
        symbols.truncate(self.config.max_symbols);
        self.quotes(&symbols).await
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn number(raw: Option<&str>) -> f64 {
    raw.map(|s| s.trim().trim_end_matches('%'))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

fn parse_quote(resp: QuoteResponse, requested: &str) -> Result<Quote> {
    if let Some(note) = resp.note {
        debug!(note = %note, "alpha vantage throttled");
        return Err(Error::RateLimit {
            platform: PLATFORM.into(),
            retry_after_secs: None,
        });
    }
    if let Some(msg) = resp.information.or(resp.error_message) {
        return Err(Error::api(PLATFORM, msg));
    }
    let q = resp
        .quote
        .filter(|q| q.price.is_some())
        .ok_or_else(|| Error::api(PLATFORM, format!("no quote for {requested}")))?;

    Ok(Quote {
        symbol: q.symbol.unwrap_or_else(|| requested.to_string()),
        price: number(q.price.as_deref()),
        change: number(q.change.as_deref()),
        change_percent: number(q.change_percent.as_deref()),
        volume: number(q.volume.as_deref()),
    })
}

fn to_result(q: Quote) -> SourceResult {
    let content = format!(
        "{} trading at ${:.2}, {:+.2}% change",
        q.symbol, q.price, q.change_percent
    );
    let mut result = SourceResult::new(SourceKind::Finance, PLATFORM, q.symbol.clone(), content);
    result.metrics = vec![
        Metric::new("price", q.price, "USD"),
        Metric::new("change", q.change, "USD"),
        Metric::new("change_percent", q.change_percent, "%"),
        Metric::new("volume", q.volume, ""),
    ];
    result
}
