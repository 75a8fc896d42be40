use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use super::AppState;
use crate::error::SyncError;
use crate::models::Connection;
use crate::sync::{Notification, NotificationOutcome};

const RESOURCE_URI: &str = "x-goog-resource-uri";
const RESOURCE_STATE: &str = "x-goog-resource-state";
const CHANNEL_ID: &str = "x-goog-channel-id";

/// Health check response
#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(super) async fn connect(
    State(state): State<AppState>,
    Json(connection): Json<Connection>,
) -> Result<&'static str, SyncError> {
    state.engine.connect(connection).await?;
    Ok("success")
}

pub(super) async fn notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<&'static str, SyncError> {
    let notification = notification_from_headers(&headers);
    match state.engine.handle_notification(&notification).await? {
        NotificationOutcome::Propagated { fan_out, .. } if !fan_out.is_complete() => {
            tracing::warn!(
                failed = fan_out.failures.len(),
                "Notification processed with sibling failures"
            );
        }
        _ => {}
    }
    Ok("success")
}

pub(super) async fn refresh(
    State(state): State<AppState>,
    Json(connection): Json<Connection>,
) -> Result<&'static str, SyncError> {
    state.engine.refresh(&connection).await?;
    Ok("success")
}

fn notification_from_headers(headers: &HeaderMap) -> Notification {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Notification {
        resource_uri: header(RESOURCE_URI),
        resource_state: header(RESOURCE_STATE),
        channel_id: header(CHANNEL_ID),
    }
}
