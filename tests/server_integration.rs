use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use livemind::config::Config;
use livemind::engine::QueryEngine;
use livemind::error::Result;
use livemind::llm::{LlmClient, Provider};
use livemind::server::{AppState, router};
use livemind::sources::{Query, Source, SourceKind, SourceResult};
use livemind::store::DocumentStore;
use livemind::synthesis::Synthesizer;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower::ServiceExt;

struct StaticSource(SourceKind, &'static str);

#[async_trait]
impl Source for StaticSource {
    fn kind(&self) -> SourceKind {
        self.0
    }

    async fn fetch(&self, _query: &Query) -> Result<Vec<SourceResult>> {
        let mut r = SourceResult::new(self.0, "static", self.1, "great growth reported");
        r.relevance = Some(1.0);
        Ok(vec![r])
    }
}

fn make_app() -> axum::Router {
    let llm = LlmClient::new(Provider::Groq, String::new(), "test".into(), 100, None).unwrap();
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(StaticSource(SourceKind::News, "Tesla deliveries beat estimates")),
        Arc::new(StaticSource(SourceKind::Weather, "Weather in London: 12.0°C, light rain")),
    ];
    let engine = QueryEngine::new(
        Config::default(),
        sources,
        Arc::new(DocumentStore::new(10)),
        Synthesizer::new(llm),
        None,
    );
    let (updates, _) = broadcast::channel(4);
    router(AppState::new(Arc::new(engine), updates))
}

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn root_and_health() {
    let (status, body) = send(make_app(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "LiveMind");
    assert_eq!(body["websocket"], "/ws");

    let (status, body) = send(make_app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["llm"], "demo");
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn query_answers_in_demo_mode() {
    let (status, body) = send(
        make_app(),
        post_json(
            "/api/v1/query",
            json!({"query": "How is Tesla doing?", "sources": ["news", "weather", "crypto"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "demo");
    assert_eq!(body["cached"], false);
    assert_eq!(body["unknown_sources"], json!(["crypto"]));
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    assert_eq!(body["sources"][0]["name"], "news");
    assert_eq!(body["outcomes"][1]["status"], "ok");
    assert!(body["response"].as_str().unwrap().contains("How is Tesla doing?"));
}

#[tokio::test]
async fn invalid_queries_are_400() {
    let (status, body) = send(make_app(), post_json("/api/v1/query", json!({"query": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(
        make_app(),
        post_json(
            "/api/v1/query",
            json!({"query": "ok", "confidence_threshold": 2.0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(make_app(), post_json("/api/v1/query", json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn sources_and_status() {
    let (status, body) = send(make_app(), get("/api/v1/query/sources")).await;
    assert_eq!(status, StatusCode::OK);
    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 5);
    assert_eq!(sources[0]["id"], "news");
    assert_eq!(sources[0]["status"], "active");
    // Enabled by default but nothing registered for it here.
    assert_eq!(sources[1]["status"], "unconfigured");
    assert_eq!(body["default_sources"], json!(["news", "weather", "finance"]));

    let (status, body) = send(make_app(), get("/api/v1/query/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["llm"]["configured"], false);
    assert_eq!(body["store"]["total_documents"], 0);
    assert_eq!(body["refresh"]["running"], false);
}

#[tokio::test]
async fn sentiment_endpoint() {
    let (status, body) = send(
        make_app(),
        post_json("/api/v1/analyze/sentiment", json!({"text": "Great quarter, strong growth"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sentiment"], "positive");
    assert_eq!(body["text"], "Great quarter, strong growth");

    let (status, _) = send(
        make_app(),
        post_json("/api/v1/analyze/sentiment", json!({"text": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn docs_and_route_listing() {
    let resp = make_app().oneshot(get("/docs")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/api/v1/query"));
    assert!(html.contains("LiveMind API"));

    let (status, body) = send(make_app(), get("/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["routes"].as_array().unwrap().len(), 10);

    let (_, index) = send(make_app(), get("/api/v1")).await;
    assert_eq!(index["routes"], body["routes"]);
}

#[tokio::test]
async fn unknown_route_is_json_404_with_request_id() {
    let resp = make_app().oneshot(get("/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(resp.headers().contains_key("x-request-id"));
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
