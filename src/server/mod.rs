//! Inbound HTTP surface.
//!
//! # Endpoints
//!
//! - `GET /health`: liveness and version
//! - `POST /connect`: connect a document to an external table
//! - `POST /notifications`: change-notification webhook
//! - `POST /refresh`: overwrite one document from its external table
//!
//! Successful calls answer `success` as plain text.

mod handlers;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::SyncError;
use crate::sync::SyncEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/connect", post(handlers::connect))
        .route("/notifications", post(handlers::notifications))
        .route("/refresh", post(handlers::refresh))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn status_for(error: &SyncError) -> (StatusCode, &'static str) {
    match error {
        SyncError::AdapterUnavailable { .. } => (StatusCode::BAD_GATEWAY, "adapter_unavailable"),
        SyncError::MalformedTable { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "malformed_table"),
        SyncError::InconsistentSchema(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "inconsistent_schema")
        }
        SyncError::InvalidNotification(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_notification")
        }
        SyncError::HistoryUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "history_unavailable")
        }
        SyncError::RegistryLookupMiss(_) => (StatusCode::NOT_FOUND, "unknown_document"),
        SyncError::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "registry_error"),
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, code) = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: code,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
