//! HTTP surface.
//!
//! - `/`        : landing page
//! - `/metrics` : Prometheus text format, rendered fresh per scrape

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;

use crate::export::{CONTENT_TYPE, SnapshotExporter};
use crate::state::MetricsStore;

const LANDING_PAGE: &str = r#"<html>
<head><title>MTR Exporter</title></head>
<body>
<h1>MTR Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    store: MetricsStore,
    exporter: Arc<SnapshotExporter>,
}

impl AppState {
    pub fn new(store: MetricsStore, exporter: SnapshotExporter) -> Self {
        Self {
            store,
            exporter: Arc::new(exporter),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state.exporter.render(&state.store.snapshot());

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}
