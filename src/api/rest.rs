// =============================================================================
// Minimal status/command surface — Axum 0.7
// =============================================================================
//
// Exactly the two endpoints a supervising process needs: read pipeline
// health, and issue a control-plane command. No authentication layer, no
// session state, no charts — this is not a web dashboard.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tracing::warn;

use crate::orchestrator::PipelineRunner;
use crate::types::Command;

pub fn router(runner: Arc<PipelineRunner>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/command", post(command))
        .with_state(runner)
}

async fn status(State(runner): State<Arc<PipelineRunner>>) -> impl IntoResponse {
    Json(runner.status())
}

async fn command(State(runner): State<Arc<PipelineRunner>>, Json(command): Json<Command>) -> impl IntoResponse {
    match runner.command(command).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(error = %e, "command rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
