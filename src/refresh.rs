//! Background ingestion: periodically pull the latest items from every
//! enabled source into the document store.

use crate::scoring;
use crate::sources::{Source, SourceKind};
use crate::store::{DocumentStore, NewDocument};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Items fetched per source.
    pub fetched: BTreeMap<SourceKind, usize>,
    pub indexed: usize,
    pub pruned: usize,
    pub failed_sources: Vec<SourceKind>,
    pub total_documents: usize,
}

impl CycleSummary {
    /// True when sources were asked and none of them answered.
    pub fn all_failed(&self) -> bool {
        self.fetched.is_empty() && !self.failed_sources.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshState {
    pub running: bool,
    pub cycles: u64,
    pub last_cycle: Option<CycleSummary>,
}

pub struct Refresher {
    sources: Vec<Arc<dyn Source>>,
    store: Arc<DocumentStore>,
    /// `None` keeps documents forever.
    retention: Option<chrono::Duration>,
    interval: Duration,
    retry: Duration,
    fetch_timeout: Duration,
    state: Arc<RwLock<RefreshState>>,
}

impl Refresher {
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        store: Arc<DocumentStore>,
        retention_hours: u64,
        interval: Duration,
        retry: Duration,
        state: Arc<RwLock<RefreshState>>,
    ) -> Self {
        // The index is fed by the other sources, never by itself.
        let sources = sources
            .into_iter()
            .filter(|s| s.kind() != SourceKind::Documents)
            .collect();
        Self {
            sources,
            store,
            retention: i64::try_from(retention_hours)
                .ok()
                .and_then(chrono::Duration::try_hours),
            interval,
            retry,
            fetch_timeout: interval.max(Duration::from_secs(1)),
            state,
        }
    }

    /// One pass: fetch, index, prune.
    pub async fn run_cycle(&self) -> CycleSummary {
        let started_at = Utc::now();
        let clock = Instant::now();

        let fetches = self.sources.iter().filter(|s| s.is_configured()).map(|s| async move {
            let kind = s.kind();
            let outcome = tokio::time::timeout(self.fetch_timeout, s.latest()).await;
            (kind, outcome)
        });

        let mut fetched = BTreeMap::new();
        let mut failed_sources = Vec::new();
        let mut indexed = 0;
        for (kind, outcome) in join_all(fetches).await {
            let items = match outcome {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    warn!(source = %kind, error = %e, "refresh fetch failed");
                    failed_sources.push(kind);
                    continue;
                }
                Err(_) => {
                    warn!(source = %kind, "refresh fetch timed out");
                    failed_sources.push(kind);
                    continue;
                }
            };
            fetched.insert(kind, items.len());
            for item in items {
                let confidence = scoring::confidence_for(&item);
                let added = self
                    .store
                    .add(NewDocument {
                        content: item.content,
                        title: item.title,
                        origin: kind.id().to_string(),
                        confidence,
                        url: item.url,
                    })
                    .await;
                if added.is_some() {
                    indexed += 1;
                }
            }
        }

        let cutoff = self
            .retention
            .and_then(|keep| Utc::now().checked_sub_signed(keep));
        let pruned = match cutoff {
            Some(cutoff) => self.store.prune_older_than(cutoff).await,
            None => 0,
        };
        let summary = CycleSummary {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            fetched,
            indexed,
            pruned,
            failed_sources,
            total_documents: self.store.len().await,
        };
        info!(
            indexed,
            pruned,
            failed = summary.failed_sources.len(),
            total = summary.total_documents,
            "refresh cycle complete"
        );

        let mut state = self.state.write().await;
        state.cycles += 1;
        state.last_cycle = Some(summary.clone());
        summary
    }

    /// Run cycles until `shutdown` flips to true. Each summary is broadcast to
    /// `updates`; having no subscribers is fine.
    pub fn spawn(
        self,
        updates: broadcast::Sender<CycleSummary>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.state.write().await.running = true;
            info!(interval_secs = self.interval.as_secs(), "refresher started");

            loop {
                let summary = self.run_cycle().await;
                let delay = if summary.all_failed() {
                    warn!(retry_secs = self.retry.as_secs(), "every source failed, retrying early");
                    self.retry
                } else {
                    self.interval
                };
                if updates.send(summary).is_err() {
                    debug!("no update subscribers");
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.state.write().await.running = false;
            info!("refresher stopped");
        })
    }
}
