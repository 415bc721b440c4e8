//! External data providers queried during fan-out.

pub mod documents;
pub mod finance;
pub mod news;
pub mod social;
pub mod types;
pub mod weather;

pub use types::{Metric, Query, SourceKind, SourceResult};

use crate::config::Config;
use crate::error::Result;
use crate::http::HttpClient;
use crate::store::DocumentStore;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Source: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Results relevant to a specific query.
    async fn fetch(&self, query: &Query) -> Result<Vec<SourceResult>>;

    /// General, query-independent feed used for background indexing.
    async fn latest(&self) -> Result<Vec<SourceResult>> {
        Ok(Vec::new())
    }

    /// False when the provider needs credentials that are not present.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Build one client per known source from config.
pub fn build_sources(
    config: &Config,
    http: &HttpClient,
    store: Arc<DocumentStore>,
) -> Vec<Arc<dyn Source>> {
    vec![
        Arc::new(news::NewsSource::new(config.news.clone(), http.clone())),
        Arc::new(finance::FinanceSource::new(config.finance.clone(), http.clone())),
        Arc::new(weather::WeatherSource::new(config.weather.clone(), http.clone())),
        Arc::new(documents::DocumentSource::new(
            store,
            config.documents.top_k,
            config.documents.min_confidence,
        )),
        Arc::new(social::SocialSource::new(config.social.clone(), http.clone())),
    ]
}
