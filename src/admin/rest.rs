//! REST API Handlers
//!
//! Administrative endpoints: liveness, readiness, Prometheus metrics, cache
//! statistics and health, invalidation and flush.

use crate::cache::diagnostics::{Diagnostics, HealthStatus};
use crate::cache::invalidation::{InvalidationReport, Invalidator};
use crate::cache::layer::CacheLayer;
use crate::cache::store::TieredCacheStore;
use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Invalidation request; every populated field is applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateRequest {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    /// Glob patterns
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Layer name such as `tickets` or `events`
    #[serde(default)]
    pub layer: Option<String>,
    /// Also invalidate the layer's dependents
    #[serde(default)]
    pub cascade: bool,
}

impl InvalidateRequest {
    fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.keys.is_empty() && self.patterns.is_empty() && self.layer.is_none()
    }
}

/// Flush request; must be confirmed explicitly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlushRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<TieredCacheStore>,
    pub invalidator: Arc<Invalidator>,
    pub diagnostics: Arc<Diagnostics>,
}

/// REST API router builder
pub struct RestRouter {
    state: AdminState,
}

impl RestRouter {
    pub fn new(state: AdminState) -> Self {
        Self { state }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        Router::new()
            // Cache endpoints
            .route("/v1/cache/stats", get(cache_stats))
            .route("/v1/cache/health", get(cache_health))
            .route("/v1/cache/invalidate", post(invalidate))
            .route("/v1/cache/flush", post(flush))
            // Monitoring endpoints
            .route("/metrics", get(metrics))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn cache_stats(State(state): State<AdminState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.diagnostics.stats().await))
}

async fn cache_health(State(state): State<AdminState>) -> impl IntoResponse {
    let report = state.diagnostics.health().await;
    let status = match report.status {
        HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Warning => StatusCode::OK,
    };
    (status, Json(report))
}

async fn invalidate(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> impl IntoResponse {
    if request.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiErrorResponse::new(
                "empty_request",
                "Provide at least one of tags, keys, patterns or layer",
            )),
        )
            .into_response();
    }

    let layer = match request.layer.as_deref().map(|name| (name, CacheLayer::parse(name))) {
        Some((name, None)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiErrorResponse::new(
                    "invalid_layer",
                    format!("Unknown cache layer: {name}"),
                )),
            )
                .into_response();
        }
        Some((_, layer)) => layer,
        None => None,
    };

    let mut report = InvalidationReport::default();
    if !request.tags.is_empty() {
        report.merge(state.invalidator.invalidate_by_tags(&request.tags).await);
    }
    for key in &request.keys {
        if state.invalidator.invalidate_key(key).await {
            report.deleted += 1;
        }
    }
    if !request.patterns.is_empty() {
        report.merge(state.invalidator.bulk_invalidate(&request.patterns).await);
    }
    if let Some(layer) = layer {
        report.merge(state.invalidator.invalidate_layer(layer, request.cascade).await);
    }

    info!(
        deleted = report.deleted,
        failures = report.failures.len(),
        "Invalidation requested through admin API"
    );
    (StatusCode::OK, Json(report)).into_response()
}

async fn flush(State(state): State<AdminState>, Json(request): Json<FlushRequest>) -> impl IntoResponse {
    if !request.confirm {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiErrorResponse::new(
                "confirmation_required",
                "Flushing removes every entry; send {\"confirm\": true}",
            )),
        )
            .into_response();
    }

    warn!("Cache flush requested through admin API");
    match state.invalidator.flush_all().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "flushed" }))).into_response(),
        Err(e) => {
            error!(error = %e, "Cache flush failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiErrorResponse::new("flush_failed", e.to_string())),
            )
                .into_response()
        }
    }
}

async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    match state.diagnostics.prometheus().await {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiErrorResponse::new("metrics_failed", e.to_string())),
        )
            .into_response(),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AdminState>) -> impl IntoResponse {
    let tiers = state.store.health_check().await;
    if tiers.all_healthy() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "cache tier unreachable")
    }
}
