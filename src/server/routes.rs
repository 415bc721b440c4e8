use super::AppState;
use super::docs;
use crate::engine::{Answer, EngineStatus, QueryRequest, SourceStatus};
use crate::error::Error;
use crate::scoring::Sentiment;
use crate::sources::SourceKind;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

#[derive(Serialize)]
pub struct Banner {
    pub name: &'static str,
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub docs: &'static str,
    pub websocket: &'static str,
}

pub async fn root() -> Json<Banner> {
    Json(Banner {
        name: "LiveMind",
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        docs: "/docs",
        websocket: "/ws",
    })
}

#[derive(Serialize)]
pub struct Components {
    pub api: &'static str,
    pub websocket: &'static str,
    pub llm: &'static str,
    pub refresher: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub services: Components,
    pub connections: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.engine.status().await;
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        services: Components {
            api: "running",
            websocket: "running",
            llm: if status.llm.configured { "configured" } else { "demo" },
            refresher: if status.refresh.running { "running" } else { "stopped" },
        },
        connections: state.connections.load(Ordering::Relaxed),
    })
}

pub async fn api_index() -> Json<docs::RouteListing> {
    Json(docs::listing())
}

pub async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Answer>, Error> {
    let Json(req) = body.map_err(|e| Error::invalid(e.body_text()))?;
    let answer = state.engine.answer(req).await?;
    Ok(Json(answer))
}

pub async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status().await)
}

#[derive(Serialize)]
pub struct SourcesResponse {
    pub sources: Vec<SourceStatus>,
    pub default_sources: Vec<SourceKind>,
}

pub async fn sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: state.engine.available_sources(),
        default_sources: state.engine.config().fanout.default_sources.clone(),
    })
}

#[derive(Deserialize)]
pub struct SentimentRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct SentimentResponse {
    pub text: String,
    #[serde(flatten)]
    pub analysis: Sentiment,
}

pub async fn sentiment(
    State(state): State<AppState>,
    body: Result<Json<SentimentRequest>, JsonRejection>,
) -> Result<Json<SentimentResponse>, Error> {
    let Json(req) = body.map_err(|e| Error::invalid(e.body_text()))?;
    let analysis = state.engine.analyze_sentiment(&req.text)?;
    Ok(Json(SentimentResponse {
        text: req.text,
        analysis,
    }))
}
