use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document mirroring one external table.
///
/// The serialized field names are the ones used on the wire by the connect
/// and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "sheetId", alias = "documentId")]
    pub document_id: String,
    #[serde(rename = "airtableAPIKey", alias = "storeApiKey")]
    pub store_api_key: String,
    #[serde(rename = "airtableBaseId", alias = "containerId")]
    pub store_container_id: String,
    #[serde(rename = "airtableTableId", alias = "tableId")]
    pub table_id: String,
}

impl Connection {
    pub fn new(
        document_id: impl Into<String>,
        store_api_key: impl Into<String>,
        store_container_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            store_api_key: store_api_key.into(),
            store_container_id: store_container_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Locator for the external side of this connection.
    pub fn store_locator(&self) -> StoreLocator {
        StoreLocator {
            api_key: self.store_api_key.clone(),
            base_id: self.store_container_id.clone(),
            table_id: self.table_id.clone(),
        }
    }

    /// Locator for the document side of this connection.
    pub fn document_locator(&self) -> DocumentLocator {
        DocumentLocator::new(self.document_id.clone())
    }
}

/// Addresses one table in the external store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocator {
    pub api_key: String,
    pub base_id: String,
    pub table_id: String,
}

/// Addresses one document in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentLocator {
    pub document_id: String,
}

impl DocumentLocator {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
        }
    }
}

/// A webhook channel watching one document for changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub document_id: String,
    pub channel_id: String,
    /// Opaque id the document service needs to stop the channel.
    pub resource_id: String,
    pub callback_address: String,
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    /// True if the channel stays open for at least `margin` from `now`.
    pub fn outlives(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at > now + margin
    }
}
