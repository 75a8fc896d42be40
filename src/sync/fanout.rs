//! Refreshing every document that mirrors a changed table.
//!
//! Siblings are refreshed through this service's own refresh endpoint so each
//! one runs as an independent unit of work. Calls run concurrently up to a
//! bound and every result is collected before the fan-out completes.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::error::SyncError;
use crate::models::Connection;

const STORE: &str = "fanout";

/// Triggers a refresh of one sibling document.
#[async_trait]
pub trait SiblingDispatcher: Send + Sync {
    async fn refresh(&self, connection: &Connection) -> Result<(), SyncError>;
}

/// Posts the sibling's connection to the refresh endpoint.
pub struct HttpDispatcher {
    http: Client,
    refresh_address: String,
}

impl HttpDispatcher {
    pub fn new(refresh_address: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::unavailable(STORE, e))?;
        Ok(Self {
            http,
            refresh_address: refresh_address.into(),
        })
    }
}

#[async_trait]
impl SiblingDispatcher for HttpDispatcher {
    async fn refresh(&self, connection: &Connection) -> Result<(), SyncError> {
        let response = self
            .http
            .post(&self.refresh_address)
            .json(connection)
            .send()
            .await
            .map_err(|e| SyncError::unavailable(STORE, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::unavailable(
                STORE,
                format!("refresh of {} returned {}: {}", connection.document_id, status, body),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SiblingFailure {
    pub document_id: String,
    pub error: SyncError,
}

/// Aggregate result of a fan-out.
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Every document a refresh was attempted for.
    pub attempted: Vec<String>,
    pub failures: Vec<SiblingFailure>,
}

impl FanOutReport {
    pub fn succeeded(&self) -> usize {
        self.attempted.len() - self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Refreshes every sibling, at most `concurrency` at a time.
///
/// A failing sibling never stops the others.
pub async fn fan_out(
    dispatcher: &dyn SiblingDispatcher,
    siblings: Vec<Connection>,
    concurrency: usize,
) -> FanOutReport {
    let results: Vec<(String, Result<(), SyncError>)> = stream::iter(siblings)
        .map(|connection| async move {
            let result = dispatcher.refresh(&connection).await;
            (connection.document_id, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = FanOutReport::default();
    for (document_id, result) in results {
        if let Err(error) = result {
            tracing::warn!(document_id = %document_id, "Sibling refresh failed: {}", error);
            report.failures.push(SiblingFailure {
                document_id: document_id.clone(),
                error,
            });
        }
        report.attempted.push(document_id);
    }
    report
}

/// Dispatcher that records refreshes instead of sending them.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    refreshed: std::sync::Mutex<Vec<String>>,
    failing: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, document_id: &str) {
        self.failing.lock().unwrap().push(document_id.to_string());
    }

    pub fn refreshed(&self) -> Vec<String> {
        let mut refreshed = self.refreshed.lock().unwrap().clone();
        refreshed.sort();
        refreshed
    }
}

#[cfg(test)]
#[async_trait]
impl SiblingDispatcher for RecordingDispatcher {
    async fn refresh(&self, connection: &Connection) -> Result<(), SyncError> {
        self.refreshed
            .lock()
            .unwrap()
            .push(connection.document_id.clone());
        if self.failing.lock().unwrap().contains(&connection.document_id) {
            return Err(SyncError::unavailable(STORE, "sibling unreachable"));
        }
        Ok(())
    }
}
