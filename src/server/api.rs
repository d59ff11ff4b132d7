//! Read-only status endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde::Serialize;

use super::AppState;
use crate::batch::BatchStatus;
use crate::github::ApiStats;
use crate::health::HealthSnapshot;
use crate::queue::QueueSnapshot;

/// Body of `GET /api`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiSnapshot {
    pub repo: String,
    pub queue: QueueSnapshot,
    pub health: HealthSnapshot,
    /// Absent when batch merging is off.
    pub batch: Option<BatchStatus>,
}

pub async fn api_handler(State(app_state): State<AppState>) -> Json<ApiSnapshot> {
    Json(ApiSnapshot {
        repo: app_state.repo().to_string(),
        queue: app_state.queue().snapshot(),
        health: app_state.health().snapshot(Utc::now()),
        batch: app_state.batch().map(|b| b.snapshot()),
    })
}

pub async fn stats_handler(State(app_state): State<AppState>) -> Json<ApiStats> {
    Json(app_state.analytics().snapshot(app_state.limiter().budget()))
}

pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
