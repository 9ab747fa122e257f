//! Health and status endpoints for the Room Controller.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we accept sessions?)
//! - `GET /status` - Controller counters as JSON, admin token guarded when
//!   one is configured
//!
//! The `/metrics` endpoint is served separately via
//! `metrics-exporter-prometheus`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::secret::{secrets_match, SecretString};
use serde::Serialize;
use tracing::warn;

use super::upload::{UploadStats, UploadTotals};
use crate::actors::{ControllerHandle, ControllerStatus};

/// Health state for the Room Controller.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once the controller is accepting sessions, false while draining.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// State for the `/status` endpoint.
#[derive(Clone)]
pub struct StatusState {
    pub controller: ControllerHandle,
    pub uploads: Arc<UploadStats>,
    /// Required bearer token. `None` leaves the endpoint open.
    pub admin_token: Option<Arc<SecretString>>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    #[serde(flatten)]
    controller: ControllerStatus,
    uploads: UploadTotals,
}

/// Create the router serving `GET /status`.
pub fn status_router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .with_state(state)
}

fn authorized(headers: &HeaderMap, expected: &SecretString) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| secrets_match(token, expected))
}

async fn status_handler(State(state): State<StatusState>, headers: HeaderMap) -> Response {
    if let Some(expected) = &state.admin_token {
        if !authorized(&headers, expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.controller.get_status().await {
        Ok(controller) => Json(StatusBody {
            controller,
            uploads: state.uploads.totals(),
        })
        .into_response(),
        Err(e) => {
            warn!(target: "rc.health", error = %e, "Controller status unavailable");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    use crate::actors::ActorMetrics;
    use crate::bus::EventBus;
    use crate::config::Config;
    use crate::services::Services;

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live(), "Should be live by default");
        assert!(!state.is_ready(), "Should not be ready by default");
    }

    #[test]
    fn test_health_state_set_ready() {
        let state = HealthState::new();

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_readiness_handler_follows_state() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            readiness_handler(State(Arc::clone(&state))).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.set_ready();
        assert_eq!(readiness_handler(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_router_endpoints() {
        let state = Arc::new(HealthState::new());
        let app = health_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app
            .oneshot(Request::builder().uri("/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn status_app(admin_token: Option<&str>) -> Router {
        let (bus, _task) = EventBus::spawn(CancellationToken::new());
        let config = Config {
            instance_id: "rc-test".to_string(),
            ..Config::default()
        };
        let controller =
            ControllerHandle::spawn(&config, bus, Services::in_memory(), ActorMetrics::new());
        status_router(StatusState {
            controller,
            uploads: Arc::new(UploadStats::default()),
            admin_token: admin_token.map(|t| Arc::new(SecretString::from(t.to_string()))),
        })
    }

    #[tokio::test]
    async fn test_status_open_without_admin_token() {
        let app = status_app(None);
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["instance_id"], "rc-test");
        assert_eq!(json["room_count"], 0);
        assert_eq!(json["is_draining"], false);
        assert_eq!(json["uploads"]["chunks_accepted"], 0);
    }

    #[tokio::test]
    async fn test_status_requires_matching_bearer() {
        let app = status_app(Some("letmein"));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .header("authorization", "Bearer letmein")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
