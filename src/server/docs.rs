use crate::error::Error;
use askama::Template;
use axum::Json;
use axum::response::Html;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RouteDoc {
    pub method: &'static str,
    pub path: &'static str,
    pub summary: &'static str,
}

pub const ROUTES: &[RouteDoc] = &[
    RouteDoc {
        method: "GET",
        path: "/",
        summary: "Service banner with version and entry points",
    },
    RouteDoc {
        method: "GET",
        path: "/health",
        summary: "Liveness, component state and open WebSocket connections",
    },
    RouteDoc {
        method: "GET",
        path: "/api/v1",
        summary: "API index",
    },
    RouteDoc {
        method: "POST",
        path: "/api/v1/query",
        summary: "Answer a question from live multi-source context",
    },
    RouteDoc {
        method: "GET",
        path: "/api/v1/query/status",
        summary: "Engine status: source health, document index, refresher",
    },
    RouteDoc {
        method: "GET",
        path: "/api/v1/query/sources",
        summary: "Known sources with description and availability",
    },
    RouteDoc {
        method: "POST",
        path: "/api/v1/analyze/sentiment",
        summary: "Keyword sentiment of the posted text",
    },
    RouteDoc {
        method: "GET",
        path: "/ws",
        summary: "WebSocket: streamed answers and refresh updates",
    },
    RouteDoc {
        method: "GET",
        path: "/docs",
        summary: "This page",
    },
    RouteDoc {
        method: "GET",
        path: "/openapi.json",
        summary: "Machine-readable route listing",
    },
];

#[derive(Template)]
#[template(path = "docs.html")]
struct DocsPage {
    version: &'static str,
    routes: &'static [RouteDoc],
}

pub async fn page() -> Result<Html<String>, Error> {
    let html = DocsPage {
        version: env!("CARGO_PKG_VERSION"),
        routes: ROUTES,
    }
    .render()
    .map_err(|e| Error::Template(e.to_string()))?;
    Ok(Html(html))
}

#[derive(Serialize)]
pub struct RouteListing {
    pub name: &'static str,
    pub version: &'static str,
    pub routes: &'static [RouteDoc],
}

pub fn listing() -> RouteListing {
    RouteListing {
        name: "LiveMind",
        version: env!("CARGO_PKG_VERSION"),
        routes: ROUTES,
    }
}

pub async fn openapi() -> Json<RouteListing> {
    Json(listing())
}
