//! Concurrent fan-out across sources and fusion of their results into one
//! ranked context.

use crate::config::FanoutConfig;
use crate::scoring;
use crate::sources::{Query, Source, SourceKind, SourceResult};
use crate::stats::{CallResult, SourceStats};
use crate::text;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const RENDER_CONTENT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Empty,
    Failed,
    TimedOut,
    Disabled,
    Unavailable,
}

/// What happened when one source was asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: SourceKind,
    pub status: OutcomeStatus,
    /// Items this source contributed after filtering and capping.
    pub items: usize,
    /// Items dropped for falling under the confidence threshold.
    pub filtered: usize,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn skipped(source: SourceKind, status: OutcomeStatus, error: Option<String>) -> Self {
        Self {
            source,
            status,
            items: 0,
            filtered: 0,
            latency_ms: 0,
            error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatherOptions {
    pub sources: Vec<SourceKind>,
    pub confidence_threshold: f64,
}

/// Results of one fan-out, in presentation order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusedContext {
    pub results: Vec<SourceResult>,
    pub outcomes: Vec<SourceOutcome>,
}

impl FusedContext {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Distinct sources that contributed at least one item, in order.
    pub fn contributing_sources(&self) -> Vec<SourceKind> {
        let mut seen = Vec::new();
        for r in &self.results {
            if !seen.contains(&r.source) {
                seen.push(r.source);
            }
        }
        seen
    }

    /// Numbered context block placed in the synthesis prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, r) in self.results.iter().enumerate() {
            let when = r.published_at.unwrap_or(r.timestamp).to_rfc3339();
            out.push_str(&format!(
                "{}. Source: {} ({})\n   Confidence: {:.2}\n   Relevance: {:.2}\n   Timestamp: {}\n   Content: {}\n",
                i + 1,
                r.source,
                r.provider,
                r.confidence.unwrap_or(0.0),
                r.relevance.unwrap_or(0.0),
                when,
                text::truncate_chars(&r.text(), RENDER_CONTENT_CHARS),
            ));
        }
        out
    }
}

/// Split client-supplied identifiers into known kinds (deduplicated, in
/// order) and unrecognised names.
pub fn resolve_sources(ids: &[String]) -> (Vec<SourceKind>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for id in ids {
        match SourceKind::parse(id) {
            Some(kind) if !known.contains(&kind) => known.push(kind),
            Some(_) => {}
            None => unknown.push(id.clone()),
        }
    }
    (known, unknown)
}

pub struct Aggregator {
    sources: HashMap<SourceKind, Arc<dyn Source>>,
    enabled: Vec<SourceKind>,
    timeout: Duration,
    max_items_per_source: usize,
    max_context_items: usize,
    stats: Arc<SourceStats>,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn Source>>, config: &FanoutConfig, stats: Arc<SourceStats>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.kind(), s)).collect(),
            enabled: config.enabled_sources.clone(),
            timeout: Duration::from_millis(config.source_timeout_ms),
            max_items_per_source: config.max_items_per_source,
            max_context_items: config.max_context_items,
            stats,
        }
    }

    pub fn source(&self, kind: SourceKind) -> Option<&Arc<dyn Source>> {
        self.sources.get(&kind)
    }

    pub fn is_enabled(&self, kind: SourceKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Enabled and registered sources, in `SourceKind::ALL` order.
    pub fn active_sources(&self) -> Vec<Arc<dyn Source>> {
        SourceKind::ALL
            .iter()
            .filter(|k| self.is_enabled(**k))
            .filter_map(|k| self.sources.get(k).cloned())
            .collect()
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    pub async fn gather(&self, query: &Query, opts: &GatherOptions) -> FusedContext {
        let mut requested: Vec<SourceKind> = Vec::new();
        for kind in &opts.sources {
            if !requested.contains(kind) {
                requested.push(*kind);
            }
        }

        let terms = text::query_terms(&query.text);
        let calls = requested.iter().map(|&kind| self.call(kind, query, opts, &terms));
        let per_source = join_all(calls).await;

        let mut context = FusedContext::default();
        for (results, outcome) in per_source {
            context.results.extend(results);
            context.outcomes.push(outcome);
        }
        if context.results.len() > self.max_context_items {
            context.results.truncate(self.max_context_items);
            recount(&mut context);
        }

        info!(
            sources = requested.len(),
            items = context.results.len(),
            "fan-out complete"
        );
        context
    }

    async fn call(
        &self,
        kind: SourceKind,
        query: &Query,
        opts: &GatherOptions,
        terms: &[String],
    ) -> (Vec<SourceResult>, SourceOutcome) {
        if !self.is_enabled(kind) {
            return (Vec::new(), SourceOutcome::skipped(kind, OutcomeStatus::Disabled, None));
        }
        let Some(source) = self.sources.get(&kind) else {
            return (
                Vec::new(),
                SourceOutcome::skipped(kind, OutcomeStatus::Unavailable, Some("no provider registered".into())),
            );
        };
        if !source.is_configured() {
            return (
                Vec::new(),
                SourceOutcome::skipped(kind, OutcomeStatus::Unavailable, Some("missing credentials".into())),
            );
        }

        let started = Instant::now();
        let fetched = tokio::time::timeout(self.timeout, source.fetch(query)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let raw = match fetched {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!(source = %kind, error = %e, "source failed");
                self.stats.record(kind, CallResult::Failure, latency_ms, Some(e.to_string()));
                let mut outcome = SourceOutcome::skipped(kind, OutcomeStatus::Failed, Some(e.to_string()));
                outcome.latency_ms = latency_ms;
                return (Vec::new(), outcome);
            }
            Err(_) => {
                let msg = format!("no response within {} ms", self.timeout.as_millis());
                warn!(source = %kind, latency_ms, "source timed out");
                self.stats.record(kind, CallResult::Timeout, latency_ms, Some(msg.clone()));
                let mut outcome = SourceOutcome::skipped(kind, OutcomeStatus::TimedOut, Some(msg));
                outcome.latency_ms = latency_ms;
                return (Vec::new(), outcome);
            }
        };

        let returned = raw.len();
        self.stats.record(kind, CallResult::Success { items: returned }, latency_ms, None);

        let mut kept: Vec<SourceResult> = raw
            .into_iter()
            .map(|r| enrich(r, terms))
            .filter(|r| r.confidence.unwrap_or(0.0) >= opts.confidence_threshold)
            .collect();
        let filtered = returned - kept.len();

        kept.sort_by(|a, b| {
            let by_relevance = b.relevance.unwrap_or(0.0).total_cmp(&a.relevance.unwrap_or(0.0));
            by_relevance.then(b.confidence.unwrap_or(0.0).total_cmp(&a.confidence.unwrap_or(0.0)))
        });
        kept.truncate(self.max_items_per_source);

        debug!(source = %kind, returned, kept = kept.len(), filtered, latency_ms, "source answered");
        let outcome = SourceOutcome {
            source: kind,
            status: if returned == 0 {
                OutcomeStatus::Empty
            } else {
                OutcomeStatus::Ok
            },
            items: kept.len(),
            filtered,
            latency_ms,
            error: None,
        };
        (kept, outcome)
    }
}

/// Fill in confidence, relevance and sentiment where the source left them out.
fn enrich(mut r: SourceResult, terms: &[String]) -> SourceResult {
    r.confidence = Some(scoring::confidence_for(&r));
    if r.relevance.is_none() {
        r.relevance = Some(text::relevance(terms, &r.text()));
    }
    if r.sentiment.is_none() && r.source.is_textual() {
        r.sentiment = Some(scoring::analyze_sentiment(&r.text()));
    }
    r
}

/// Bring outcome item counts back in line after the global cap.
fn recount(context: &mut FusedContext) {
    for outcome in &mut context.outcomes {
        outcome.items = context
            .results
            .iter()
            .filter(|r| r.source == outcome.source)
            .count();
    }
}
