//! Sync error types.
//!
//! Every unit of work (connect, notification, refresh) reports failure through
//! [`SyncError`]. Nothing is retried internally; callers decide.

use thiserror::Error;

/// Errors that can occur while mirroring a table.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A backing store rejected the request or could not be reached.
    #[error("{store} unavailable: {reason}")]
    AdapterUnavailable { store: &'static str, reason: String },

    /// A row does not match the header length.
    #[error("Malformed table: row {row} has {found} cells, header has {expected}")]
    MalformedTable {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Records cannot be laid out under a single header.
    #[error("Inconsistent schema: {0}")]
    InconsistentSchema(String),

    /// Revision history could not be read, so authorship is unknown.
    #[error("Revision history unavailable for {document_id}: {reason}")]
    HistoryUnavailable { document_id: String, reason: String },

    /// No connection is registered for the document.
    #[error("No connection registered for document {0}")]
    RegistryLookupMiss(String),

    /// The notification did not carry a resolvable document locator.
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    /// The connection registry failed.
    #[error("Registry error: {0}")]
    Registry(#[from] sqlx::Error),
}

impl SyncError {
    pub(crate) fn unavailable(store: &'static str, reason: impl std::fmt::Display) -> Self {
        SyncError::AdapterUnavailable {
            store,
            reason: reason.to_string(),
        }
    }
}
