//! Axum trigger surface for TCR: run the report over HTTP, list past runs.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tcr_report::{ReportConfig, ReportPipeline, REPORT_SUFFIX};
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "tcr-web";

pub struct AppState {
    pipeline: ReportPipeline,
}

impl AppState {
    pub fn from_config(config: ReportConfig) -> anyhow::Result<Self> {
        Ok(Self {
            pipeline: ReportPipeline::new(config)?,
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/reports", get(reports_handler))
        .route("/reports/topics", post(run_report_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("TCR_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let state = AppState::from_config(ReportConfig::from_env())?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn index_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": CRATE_NAME,
        "endpoints": ["/reports", "/reports/topics"],
    }))
}

/// Runs the full report pipeline once. Mirrors the original HTTP-triggered
/// deployment, as a POST since a run overwrites the day's report blob.
async fn run_report_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.run_once().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => server_error(err),
    }
}

async fn reports_handler(State(state): State<Arc<AppState>>) -> Response {
    let target = &state.pipeline.config().target_container;
    match state.pipeline.blobs().list_blobs(target, "").await {
        Ok(names) => {
            let reports: Vec<String> = names
                .into_iter()
                .filter(|name| name.ends_with(REPORT_SUFFIX))
                .collect();
            Json(json!({ "reports": reports })).into_response()
        }
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
