use async_trait::async_trait;
use livemind::config::{Config, FanoutConfig};
use livemind::error::{Error, Result};
use livemind::fanout::{Aggregator, GatherOptions, OutcomeStatus};
use livemind::sources::{Metric, Query, Source, SourceKind, SourceResult};
use livemind::stats::SourceStats;
use std::sync::Arc;
use std::time::Duration;

struct FakeSource {
    kind: SourceKind,
    items: Vec<SourceResult>,
    delay: Duration,
    fail: bool,
    configured: bool,
}

#[async_trait]
impl Source for FakeSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, _query: &Query) -> Result<Vec<SourceResult>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::api(self.kind.id(), "upstream exploded"));
        }
        Ok(self.items.clone())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

fn make_item(kind: SourceKind, title: &str, relevance: f64) -> SourceResult {
    let mut r = SourceResult::new(kind, "fake", title, format!("{title} body"));
    r.relevance = Some(relevance);
    r
}

fn make_source(kind: SourceKind, items: Vec<SourceResult>) -> FakeSource {
    FakeSource {
        kind,
        items,
        delay: Duration::ZERO,
        fail: false,
        configured: true,
    }
}

fn make_config() -> FanoutConfig {
    let mut cfg = Config::default().fanout;
    cfg.source_timeout_ms = 150;
    cfg
}

fn make_aggregator(sources: Vec<FakeSource>, cfg: &FanoutConfig) -> (Aggregator, Arc<SourceStats>) {
    let stats = Arc::new(SourceStats::new());
    let sources: Vec<Arc<dyn Source>> = sources
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn Source>)
        .collect();
    (Aggregator::new(sources, cfg, stats.clone()), stats)
}

fn opts(sources: &[SourceKind], threshold: f64) -> GatherOptions {
    GatherOptions {
        sources: sources.to_vec(),
        confidence_threshold: threshold,
    }
}

#[tokio::test]
async fn results_follow_request_order() {
    let cfg = make_config();
    let (agg, _) = make_aggregator(
        vec![
            make_source(SourceKind::News, vec![make_item(SourceKind::News, "headline", 0.9)]),
            make_source(SourceKind::Weather, vec![make_item(SourceKind::Weather, "London", 0.1)]),
        ],
        &cfg,
    );

    let ctx = agg
        .gather(&Query::new("q"), &opts(&[SourceKind::Weather, SourceKind::News], 0.5))
        .await;
    let kinds: Vec<SourceKind> = ctx.results.iter().map(|r| r.source).collect();
    assert_eq!(kinds, vec![SourceKind::Weather, SourceKind::News]);
    assert_eq!(ctx.outcomes[0].source, SourceKind::Weather);
    assert_eq!(ctx.outcomes[1].source, SourceKind::News);
    assert!(ctx.outcomes.iter().all(|o| o.status == OutcomeStatus::Ok));
}

#[tokio::test]
async fn within_source_sorted_by_relevance_then_confidence() {
    let cfg = make_config();
    let mut dated = make_item(SourceKind::News, "dated", 0.7);
    dated.published_at = Some(chrono::Utc::now());
    let (agg, _) = make_aggregator(
        vec![make_source(
            SourceKind::News,
            vec![
                make_item(SourceKind::News, "low", 0.2),
                make_item(SourceKind::News, "undated", 0.7),
                dated,
            ],
        )],
        &cfg,
    );

    let ctx = agg.gather(&Query::new("q"), &opts(&[SourceKind::News], 0.5)).await;
    let titles: Vec<&str> = ctx.results.iter().map(|r| r.title.as_str()).collect();
    // Equal relevance: the dated item has the higher confidence (0.85 vs 0.8).
    assert_eq!(titles, vec!["dated", "undated", "low"]);
    assert!(ctx.results.iter().all(|r| r.sentiment.is_some()));
}

#[tokio::test]
async fn slow_source_times_out_without_failing_query() {
    let cfg = make_config();
    let mut slow = make_source(SourceKind::Finance, vec![make_item(SourceKind::Finance, "TSLA", 1.0)]);
    slow.delay = Duration::from_secs(3);
    let (agg, stats) = make_aggregator(
        vec![
            slow,
            make_source(SourceKind::News, vec![make_item(SourceKind::News, "fast", 1.0)]),
        ],
        &cfg,
    );

    let started = std::time::Instant::now();
    let ctx = agg
        .gather(&Query::new("q"), &opts(&[SourceKind::Finance, SourceKind::News], 0.5))
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(ctx.outcomes[0].status, OutcomeStatus::TimedOut);
    assert_eq!(ctx.outcomes[1].status, OutcomeStatus::Ok);
    assert_eq!(ctx.results.len(), 1);
    assert_eq!(ctx.results[0].title, "fast");
    assert_eq!(stats.get(SourceKind::Finance).timeouts, 1);
}

#[tokio::test]
async fn failing_source_reported() {
    let cfg = make_config();
    let mut broken = make_source(SourceKind::Social, Vec::new());
    broken.fail = true;
    let (agg, stats) = make_aggregator(
        vec![
            broken,
            make_source(SourceKind::Weather, vec![make_item(SourceKind::Weather, "Tokyo", 1.0)]),
        ],
        &cfg,
    );

    let ctx = agg
        .gather(&Query::new("q"), &opts(&[SourceKind::Social, SourceKind::Weather], 0.5))
        .await;
    let social = &ctx.outcomes[0];
    assert_eq!(social.status, OutcomeStatus::Failed);
    assert!(social.error.as_deref().unwrap().contains("upstream exploded"));
    assert_eq!(ctx.results.len(), 1);

    let health = stats.get(SourceKind::Social);
    assert_eq!(health.failures, 1);
    assert!(health.last_error.is_some());
}

#[tokio::test]
async fn low_confidence_results_filtered() {
    let cfg = make_config();
    let mut quiet = make_item(SourceKind::Social, "quiet post", 1.0);
    quiet.metrics = vec![Metric::new("score", 3.0, "upvotes")];
    let mut popular = make_item(SourceKind::Social, "popular post", 0.5);
    popular.metrics = vec![Metric::new("score", 900.0, "upvotes")];
    let (agg, _) = make_aggregator(
        vec![make_source(SourceKind::Social, vec![quiet, popular])],
        &cfg,
    );

    let ctx = agg.gather(&Query::new("q"), &opts(&[SourceKind::Social], 0.6)).await;
    assert_eq!(ctx.results.len(), 1);
    assert_eq!(ctx.results[0].title, "popular post");
    assert_eq!(ctx.outcomes[0].filtered, 1);

    let ctx = agg.gather(&Query::new("q"), &opts(&[SourceKind::Social], 0.0)).await;
    assert_eq!(ctx.results.len(), 2);
}

#[tokio::test]
async fn disabled_and_unavailable_sources_skipped() {
    let mut cfg = make_config();
    cfg.enabled_sources = vec![SourceKind::News, SourceKind::Finance, SourceKind::Weather];
    let mut no_key = make_source(SourceKind::Finance, vec![make_item(SourceKind::Finance, "AAPL", 1.0)]);
    no_key.configured = false;
    let (agg, _) = make_aggregator(
        vec![
            no_key,
            make_source(SourceKind::Social, vec![make_item(SourceKind::Social, "post", 1.0)]),
        ],
        &cfg,
    );

    let ctx = agg
        .gather(
            &Query::new("q"),
            &opts(&[SourceKind::Social, SourceKind::Finance, SourceKind::Weather], 0.0),
        )
        .await;
    assert!(ctx.is_empty());
    let statuses: Vec<OutcomeStatus> = ctx.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Disabled,
            OutcomeStatus::Unavailable,
            OutcomeStatus::Unavailable
        ]
    );
    // A source without credentials is skipped, not called and failed.
    assert_eq!(ctx.outcomes[1].error.as_deref(), Some("missing credentials"));
    assert_eq!(ctx.outcomes[2].error.as_deref(), Some("no provider registered"));
}

#[tokio::test]
async fn per_source_and_total_caps() {
    let mut cfg = make_config();
    cfg.max_items_per_source = 2;
    cfg.max_context_items = 3;
    let news: Vec<SourceResult> = (0..4)
        .map(|i| make_item(SourceKind::News, &format!("n{i}"), 1.0 - i as f64 * 0.1))
        .collect();
    let weather: Vec<SourceResult> = (0..4)
        .map(|i| make_item(SourceKind::Weather, &format!("w{i}"), 1.0 - i as f64 * 0.1))
        .collect();
    let (agg, _) = make_aggregator(
        vec![
            make_source(SourceKind::News, news),
            make_source(SourceKind::Weather, weather),
        ],
        &cfg,
    );

    let ctx = agg
        .gather(
            &Query::new("q"),
            &opts(&[SourceKind::News, SourceKind::Weather, SourceKind::News], 0.0),
        )
        .await;
    let titles: Vec<&str> = ctx.results.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["n0", "n1", "w0"]);
    assert_eq!(ctx.outcomes.len(), 2);
    assert_eq!(ctx.outcomes[0].items, 2);
    assert_eq!(ctx.outcomes[1].items, 1);
}

#[tokio::test]
async fn empty_source_reported_as_empty() {
    let cfg = make_config();
    let (agg, stats) = make_aggregator(vec![make_source(SourceKind::News, Vec::new())], &cfg);
    let ctx = agg.gather(&Query::new("q"), &opts(&[SourceKind::News], 0.5)).await;
    assert_eq!(ctx.outcomes[0].status, OutcomeStatus::Empty);
    assert_eq!(stats.get(SourceKind::News).successes, 1);
    assert!(ctx.render().is_empty());
}
