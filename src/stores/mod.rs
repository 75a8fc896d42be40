//! Clients for the two mirrored stores.
//!
//! The sync engine only talks to the traits in this module:
//! - [`DocumentStore`]: cell values and revision history of a spreadsheet
//! - [`WatchService`]: change-notification channels on a spreadsheet
//! - [`RecordStore`]: paged reads and batched writes of external records
//!
//! [`google::GoogleClient`] and [`airtable::AirtableClient`] implement them
//! over HTTP. [`google_auth`] keeps the Google bearer token fresh.

pub mod airtable;
pub mod google;
pub mod google_auth;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::models::{Cell, Record, StoreLocator};

pub use airtable::AirtableClient;
pub use google::GoogleClient;
pub use google_auth::{ServiceAccountKey, ServiceAccountTokens, StaticToken, TokenProvider};

/// One entry of a document's revision history.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub id: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub author: Option<RevisionAuthor>,
}

/// Who made a revision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevisionAuthor {
    /// Set by the document service when the author is the caller itself.
    pub me: bool,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Request for a new change-notification channel.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub channel_id: String,
    pub callback_address: String,
    pub expires_at: DateTime<Utc>,
}

/// A channel as acknowledged by the document service.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub expires_at: DateTime<Utc>,
}

/// One page of external records plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub offset: Option<String>,
}

/// Read and overwrite cell values of a spreadsheet document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Row-major values of the synced range. Rows may be ragged.
    async fn read_values(&self, document_id: &str) -> Result<Vec<Vec<Cell>>, SyncError>;

    async fn clear_values(&self, document_id: &str) -> Result<(), SyncError>;

    async fn write_values(&self, document_id: &str, values: &[Vec<Cell>])
        -> Result<(), SyncError>;

    /// Full revision history, oldest first.
    async fn list_revisions(&self, document_id: &str) -> Result<Vec<Revision>, SyncError>;
}

/// Change-notification channels on documents.
#[async_trait]
pub trait WatchService: Send + Sync {
    async fn watch(
        &self,
        document_id: &str,
        request: &WatchRequest,
    ) -> Result<WatchChannel, SyncError>;

    async fn stop(&self, channel: &WatchChannel) -> Result<(), SyncError>;
}

/// Paged reads and batched writes against the external table store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_page(
        &self,
        locator: &StoreLocator,
        offset: Option<&str>,
    ) -> Result<RecordPage, SyncError>;

    /// Updates existing records. Every record carries an id.
    async fn update_batch(&self, locator: &StoreLocator, records: &[Record])
        -> Result<(), SyncError>;

    /// Creates new records. No record carries an id.
    async fn create_batch(&self, locator: &StoreLocator, records: &[Record])
        -> Result<(), SyncError>;
}
