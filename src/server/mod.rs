//! HTTP surface.
//!
//! # Endpoints
//!
//! - `POST /` - GitHub webhooks (`status`, `push`), HMAC-verified
//! - `GET /api` - queue, status board, CI health and batch status as JSON
//! - `GET /api/stats` - remote API call statistics and quota
//! - `GET /health` - liveness

use std::sync::Arc;

pub mod api;
pub mod webhook;

pub use api::{ApiSnapshot, api_handler, health_handler, stats_handler};
pub use webhook::webhook_handler;

use crate::batch::SharedBatchStatus;
use crate::github::{ApiAnalytics, RateLimiter};
use crate::health::SharedHealth;
use crate::queue::SubmitQueue;
use crate::tracker::ChangeTrackers;
use crate::types::RepoId;

/// Shared handler state, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    repo: RepoId,
    webhook_secret: Vec<u8>,
    trackers: ChangeTrackers,
    queue: Arc<SubmitQueue>,
    health: SharedHealth,
    batch: Option<SharedBatchStatus>,
    analytics: Arc<ApiAnalytics>,
    limiter: Arc<RateLimiter>,
}

/// Builder for [`AppState`].
pub struct AppStateBuilder {
    inner: AppStateInner,
}

impl AppStateBuilder {
    pub fn batch_status(mut self, batch: Option<SharedBatchStatus>) -> Self {
        self.inner.batch = batch;
        self
    }

    pub fn api_usage(mut self, analytics: Arc<ApiAnalytics>, limiter: Arc<RateLimiter>) -> Self {
        self.inner.analytics = analytics;
        self.inner.limiter = limiter;
        self
    }

    pub fn build(self) -> AppState {
        AppState {
            inner: Arc::new(self.inner),
        }
    }
}

impl AppState {
    pub fn builder(
        repo: RepoId,
        webhook_secret: impl Into<Vec<u8>>,
        trackers: ChangeTrackers,
        queue: Arc<SubmitQueue>,
        health: SharedHealth,
    ) -> AppStateBuilder {
        AppStateBuilder {
            inner: AppStateInner {
                repo,
                webhook_secret: webhook_secret.into(),
                trackers,
                queue,
                health,
                batch: None,
                analytics: Arc::new(ApiAnalytics::new()),
                limiter: Arc::new(RateLimiter::default()),
            },
        }
    }

    pub fn repo(&self) -> &RepoId {
        &self.inner.repo
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn trackers(&self) -> &ChangeTrackers {
        &self.inner.trackers
    }

    pub fn queue(&self) -> &SubmitQueue {
        &self.inner.queue
    }

    pub fn health(&self) -> &SharedHealth {
        &self.inner.health
    }

    pub fn batch(&self) -> Option<&SharedBatchStatus> {
        self.inner.batch.as_ref()
    }

    pub fn analytics(&self) -> &ApiAnalytics {
        &self.inner.analytics
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }
}

pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", post(webhook_handler))
        .route("/api", get(api_handler))
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}
