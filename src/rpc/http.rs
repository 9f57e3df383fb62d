//! HTTP front for a [`Service`] (feature `http`).
//!
//! - `POST /:command` dispatches the JSON body; request headers become
//!   session variables.
//! - `GET /health` returns the [`HealthReport`](crate::health::HealthReport),
//!   `200` when up and `503` when degraded.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::health::{HealthCheck, HealthStatus};

use super::service::Service;
use super::session::Session;

struct AppState<S> {
    service: Arc<Service<S>>,
    health: Arc<HealthCheck>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            health: Arc::clone(&self.health),
        }
    }
}

pub fn router<S: Send + Sync + 'static>(service: Arc<Service<S>>, health: Arc<HealthCheck>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/:command", post(command_handler::<S>))
        .with_state(AppState { service, health })
}

/// Serve at `addr` (e.g. `"0.0.0.0:3000"`) until the listener fails.
pub async fn serve<S: Send + Sync + 'static>(
    service: Arc<Service<S>>,
    health: Arc<HealthCheck>,
    addr: &str,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "serving commands over http");
    axum::serve(listener, router(service, health)).await
}

async fn health_handler<S: Send + Sync + 'static>(State(app): State<AppState<S>>) -> Response {
    match app.health.report() {
        Ok(report) => {
            let status = match report.status {
                HealthStatus::Up => StatusCode::OK,
                HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(report)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn command_handler<S: Send + Sync + 'static>(
    State(app): State<AppState<S>>,
    Path(command): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> Response {
    match app.service.dispatch(&command, input, session_from_headers(&headers)) {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

fn session_from_headers(headers: &HeaderMap) -> Session {
    let vars: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    Session::from_map(vars)
}
