use crate::cache::{AnswerCache, build_cache, cache_key};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fanout::{Aggregator, GatherOptions, SourceOutcome, resolve_sources};
use crate::http::HttpClient;
use crate::llm::{LlmClient, Provider};
use crate::refresh::{RefreshState, Refresher};
use crate::scoring::{self, Sentiment};
use crate::sources::{self, Query, Source, SourceKind, SourceResult};
use crate::stats::{SourceHealth, SourceStats};
use crate::store::{DocumentStore, StoreStats};
use crate::synthesis::{SynthesisMode, Synthesizer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

pub const MAX_QUERY_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Source identifiers; the configured defaults when absent.
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    /// When false a recent cached answer may be returned.
    #[serde(default = "default_real_time")]
    pub real_time: bool,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

fn default_real_time() -> bool {
    true
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            sources: None,
            real_time: true,
            confidence_threshold: None,
        }
    }

    pub fn with_sources(mut self, sources: &[&str]) -> Self {
        self.sources = Some(sources.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// A context item as reported back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub name: SourceKind,
    pub provider: String,
    pub title: String,
    pub confidence: f64,
    pub relevance: f64,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    pub sentiment: Option<Sentiment>,
}

impl From<&SourceResult> for SourceInfo {
    fn from(r: &SourceResult) -> Self {
        Self {
            name: r.source,
            provider: r.provider.clone(),
            title: r.title.clone(),
            confidence: r.confidence.unwrap_or(0.0),
            relevance: r.relevance.unwrap_or(0.0),
            timestamp: r.published_at.unwrap_or(r.timestamp),
            url: r.url.clone(),
            sentiment: r.sentiment,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub response: String,
    pub sources: Vec<SourceInfo>,
    pub outcomes: Vec<SourceOutcome>,
    pub unknown_sources: Vec<String>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub mode: SynthesisMode,
    pub cached: bool,
}

/// Events emitted while a streamed answer is produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Context {
        sources: Vec<SourceInfo>,
        outcomes: Vec<SourceOutcome>,
        unknown_sources: Vec<String>,
    },
    Chunk {
        content: String,
    },
    Done {
        answer: Answer,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: SourceKind,
    pub description: &'static str,
    pub enabled: bool,
    pub configured: bool,
    /// "active", "unconfigured" or "disabled".
    pub status: &'static str,
    pub health: SourceHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmStatus {
    pub provider: Provider,
    pub model: String,
    pub configured: bool,
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub llm: LlmStatus,
    pub sources: Vec<SourceStatus>,
    pub store: StoreStats,
    pub refresh: RefreshState,
    pub cache_backend: Option<&'static str>,
}

/// A request that passed validation, with defaults applied.
struct Prepared {
    query: String,
    kinds: Vec<SourceKind>,
    unknown: Vec<String>,
    threshold: f64,
    cache_key: String,
}

pub struct QueryEngine {
    aggregator: Aggregator,
    synthesizer: Synthesizer,
    store: Arc<DocumentStore>,
    cache: Option<Arc<dyn AnswerCache>>,
    refresh_state: Arc<RwLock<RefreshState>>,
    config: Config,
    started: Instant,
}

impl QueryEngine {
    pub fn new(
        config: Config,
        sources: Vec<Arc<dyn Source>>,
        store: Arc<DocumentStore>,
        synthesizer: Synthesizer,
        cache: Option<Arc<dyn AnswerCache>>,
    ) -> Self {
        let stats = Arc::new(SourceStats::new());
        Self {
            aggregator: Aggregator::new(sources, &config.fanout, stats),
            synthesizer,
            store,
            cache,
            refresh_state: Arc::new(RwLock::new(RefreshState::default())),
            config,
            started: Instant::now(),
        }
    }

    /// Wire up the real providers, LLM client and cache from config.
    pub async fn from_config(config: Config) -> Result<Self> {
        let http = HttpClient::new(concat!("livemind/", env!("CARGO_PKG_VERSION")))?;
        let store = Arc::new(DocumentStore::new(config.documents.max_documents));
        let sources = sources::build_sources(&config, &http, store.clone());

        let llm = LlmClient::from_config(
            config.llm.provider.clone(),
            config.llm.model.clone(),
            config.llm.max_tokens,
            config.llm.api_key_env.clone(),
            config.llm.base_url.clone(),
        )?
        .with_temperature(config.llm.temperature);
        if !llm.is_configured() {
            warn!(env_var = %llm.api_key_env(), "no LLM API key, answers will use demo mode");
        }

        let cache = build_cache(&config.cache).await;
        info!(
            provider = ?config.llm.provider,
            model = %config.llm.model,
            sources = sources.len(),
            "query engine ready"
        );
        Ok(Self::new(config, sources, store, Synthesizer::new(llm), cache))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    fn prepare(&self, req: &QueryRequest) -> Result<Prepared> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(Error::invalid("query must not be empty"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(Error::invalid(format!(
                "query exceeds {MAX_QUERY_CHARS} characters"
            )));
        }
        let threshold = req
            .confidence_threshold
            .unwrap_or(self.config.fanout.min_confidence);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::invalid("confidence_threshold must be between 0 and 1"));
        }

        let ids: Vec<String> = match &req.sources {
            Some(ids) => ids.clone(),
            None => self
                .config
                .fanout
                .default_sources
                .iter()
                .map(|k| k.id().to_string())
                .collect(),
        };
        let (kinds, unknown) = resolve_sources(&ids);
        if !unknown.is_empty() {
            debug!(?unknown, "ignoring unknown sources");
        }

        Ok(Prepared {
            cache_key: cache_key(query, &kinds, threshold),
            query: query.to_string(),
            kinds,
            unknown,
            threshold,
        })
    }

    async fn cached(&self, prepared: &Prepared, real_time: bool) -> Option<Answer> {
        if real_time {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let raw = match cache.get(&prepared.cache_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "cache lookup failed");
                return None;
            }
        };
        match serde_json::from_str::<Answer>(&raw) {
            Ok(mut answer) => {
                debug!(query = %prepared.query, "serving cached answer");
                answer.cached = true;
                answer.unknown_sources = prepared.unknown.clone();
                Some(answer)
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    async fn remember(&self, key: &str, answer: &Answer) {
        let Some(cache) = &self.cache else {
            return;
        };
        let encoded = match serde_json::to_string(answer) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to encode answer for cache");
                return;
            }
        };
        if let Err(e) = cache.set(key, encoded).await {
            warn!(error = %e, "failed to cache answer");
        }
    }

    pub async fn answer(&self, req: QueryRequest) -> Result<Answer> {
        let started = Instant::now();
        let prepared = self.prepare(&req)?;
        if let Some(hit) = self.cached(&prepared, req.real_time).await {
            return Ok(hit);
        }

        let query = Query::new(prepared.query.clone());
        let context = self
            .aggregator
            .gather(
                &query,
                &GatherOptions {
                    sources: prepared.kinds.clone(),
                    confidence_threshold: prepared.threshold,
                },
            )
            .await;
        let (response, mode) = self
            .synthesizer
            .synthesize(&prepared.query, &context, &prepared.kinds)
            .await;

        let answer = Answer {
            query: prepared.query.clone(),
            response,
            sources: context.results.iter().map(SourceInfo::from).collect(),
            outcomes: context.outcomes,
            unknown_sources: prepared.unknown.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            mode,
            cached: false,
        };
        info!(
            items = answer.sources.len(),
            mode = ?answer.mode,
            elapsed_ms = answer.processing_time_ms,
            "query answered"
        );
        self.remember(&prepared.cache_key, &answer).await;
        Ok(answer)
    }

    /// Answer `req`, sending `context`, `chunk` and finally `done` (or
    /// `error`) events to `events` as they become available.
    pub async fn answer_stream(
        &self,
        req: QueryRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<Answer> {
        let started = Instant::now();
        let prepared = match self.prepare(&req) {
            Ok(p) => p,
            Err(e) => {
                let _ = events
                    .send(StreamEvent::Error {
                        code: e.code().into(),
                        message: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };

        if let Some(hit) = self.cached(&prepared, req.real_time).await {
            let _ = events
                .send(StreamEvent::Context {
                    sources: hit.sources.clone(),
                    outcomes: hit.outcomes.clone(),
                    unknown_sources: hit.unknown_sources.clone(),
                })
                .await;
            let _ = events
                .send(StreamEvent::Chunk {
                    content: hit.response.clone(),
                })
                .await;
            let _ = events.send(StreamEvent::Done { answer: hit.clone() }).await;
            return Ok(hit);
        }

        let query = Query::new(prepared.query.clone());
        let context = self
            .aggregator
            .gather(
                &query,
                &GatherOptions {
                    sources: prepared.kinds.clone(),
                    confidence_threshold: prepared.threshold,
                },
            )
            .await;
        let sources: Vec<SourceInfo> = context.results.iter().map(SourceInfo::from).collect();
        let _ = events
            .send(StreamEvent::Context {
                sources: sources.clone(),
                outcomes: context.outcomes.clone(),
                unknown_sources: prepared.unknown.clone(),
            })
            .await;

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
        let synth = self
            .synthesizer
            .synthesize_stream(&prepared.query, &context, &prepared.kinds, chunk_tx);
        let forward = async {
            while let Some(content) = chunk_rx.recv().await {
                let _ = events.send(StreamEvent::Chunk { content }).await;
            }
        };
        let ((response, mode), ()) = tokio::join!(synth, forward);

        let answer = Answer {
            query: prepared.query.clone(),
            response,
            sources,
            outcomes: context.outcomes,
            unknown_sources: prepared.unknown.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            mode,
            cached: false,
        };
        self.remember(&prepared.cache_key, &answer).await;
        let _ = events
            .send(StreamEvent::Done {
                answer: answer.clone(),
            })
            .await;
        Ok(answer)
    }

    pub fn available_sources(&self) -> Vec<SourceStatus> {
        SourceKind::ALL
            .iter()
            .map(|&kind| {
                let enabled = self.aggregator.is_enabled(kind);
                let configured = self
                    .aggregator
                    .source(kind)
                    .is_some_and(|s| s.is_configured());
                let status = match (enabled, configured) {
                    (false, _) => "disabled",
                    (true, false) => "unconfigured",
                    (true, true) => "active",
                };
                SourceStatus {
                    id: kind,
                    description: kind.description(),
                    enabled,
                    configured,
                    status,
                    health: self.aggregator.stats().get(kind),
                }
            })
            .collect()
    }

    pub async fn status(&self) -> EngineStatus {
        let llm = self.synthesizer.llm();
        EngineStatus {
            status: "operational",
            uptime_secs: self.started.elapsed().as_secs(),
            llm: LlmStatus {
                provider: llm.provider().clone(),
                model: llm.model().to_string(),
                configured: llm.is_configured(),
                api_key_env: llm.api_key_env().to_string(),
            },
            sources: self.available_sources(),
            store: self.store.stats().await,
            refresh: self.refresh_state.read().await.clone(),
            cache_backend: self.cache.as_ref().map(|c| c.backend()),
        }
    }

    pub fn analyze_sentiment(&self, text: &str) -> Result<Sentiment> {
        if text.trim().is_empty() {
            return Err(Error::invalid("text must not be empty"));
        }
        Ok(scoring::analyze_sentiment(text))
    }

    /// Background refresher over the enabled sources, sharing this engine's
    /// store and status.
    pub fn refresher(&self) -> Refresher {
        Refresher::new(
            self.aggregator.active_sources(),
            self.store.clone(),
            self.config.documents.retention_hours,
            Duration::from_secs(self.config.refresh.interval_secs),
            Duration::from_secs(self.config.refresh.retry_secs),
            self.refresh_state.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> QueryEngine {
        let llm = LlmClient::new(Provider::Groq, String::new(), "m".into(), 100, None).unwrap();
        QueryEngine::new(
            Config::default(),
            Vec::new(),
            Arc::new(DocumentStore::new(10)),
            Synthesizer::new(llm),
            None,
        )
    }

    #[test]
    fn request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert!(req.real_time);
        assert!(req.sources.is_none());
        assert!(req.confidence_threshold.is_none());
    }

    #[test]
    fn validation_rules() {
        let e = engine();
        assert!(e.prepare(&QueryRequest::new("   ")).is_err());
        assert!(e.prepare(&QueryRequest::new("x".repeat(2001))).is_err());
        assert!(e.prepare(&QueryRequest::new("x".repeat(2000))).is_ok());

        let mut req = QueryRequest::new("ok");
        req.confidence_threshold = Some(1.5);
        assert_eq!(e.prepare(&req).err().map(|e| e.code()), Some("VALIDATION_ERROR"));
        req.confidence_threshold = Some(f64::NAN);
        assert!(e.prepare(&req).is_err());
    }

    #[test]
    fn default_sources_applied() {
        let e = engine();
        let p = e.prepare(&QueryRequest::new("ok")).unwrap();
        assert_eq!(
            p.kinds,
            vec![SourceKind::News, SourceKind::Weather, SourceKind::Finance]
        );
        assert!((p.threshold - 0.7).abs() < 1e-9);
    }

    #[test]
    fn sentiment_rejects_empty_text() {
        let e = engine();
        assert!(e.analyze_sentiment("  ").is_err());
        assert!(e.analyze_sentiment("great growth").is_ok());
    }
}
