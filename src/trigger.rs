//! Operator trigger surface: one POST per campaign, lifecycle events as
//! JSON, and the manual-escalation queue.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use outreach_engine::{Campaign, LifecycleEvent, OutreachEngine};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

pub fn router(engine: Arc<OutreachEngine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/campaigns/{name}/run", post(run_campaign))
        .route("/events", post(fire_event))
        .route("/escalations", get(list_escalations))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Bind and serve until the process exits.
pub async fn serve(engine: Arc<OutreachEngine>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Trigger surface listening on http://{addr}");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "outreach",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run one scanner and relay its summary.
async fn run_campaign(
    State(engine): State<Arc<OutreachEngine>>,
    Path(name): Path<String>,
) -> Result<Json<outreach_core::types::ScanSummary>, ApiError> {
    let campaign: Campaign = name
        .parse()
        .map_err(|e: outreach_core::OutreachError| api_error(StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(engine.run_campaign(campaign).await))
}

/// Accept a lifecycle event and handle it in the background.
async fn fire_event(
    State(engine): State<Arc<OutreachEngine>>,
    Json(event): Json<LifecycleEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    let name = event.name();
    engine.fire(event);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true, "event": name })),
    )
}

#[derive(Debug, Deserialize)]
struct EscalationParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn list_escalations(
    State(engine): State<Arc<OutreachEngine>>,
    Query(params): Query<EscalationParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let requests = engine
        .escalations(params.limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({
        "count": requests.len(),
        "escalations": requests,
    })))
}
