//! Airtable over REST.
//!
//! Records are listed with offset pagination and written in batches. Every
//! request authenticates with the API key stored on the connection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{RecordPage, RecordStore};
use crate::config::Config;
use crate::error::SyncError;
use crate::models::{is_empty_cell, Record, StoreLocator};

const STORE: &str = "airtable";

/// Records per list request, the Airtable maximum.
const PAGE_SIZE: u32 = 100;

/// Client for the Airtable REST API.
#[derive(Debug, Clone)]
pub struct AirtableClient {
    http: Client,
    api_url: String,
    view: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RecordResource>,
    offset: Option<String>,
}

#[derive(Deserialize)]
struct RecordResource {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl AirtableClient {
    pub fn new(
        api_url: impl Into<String>,
        view: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::unavailable(STORE, e))?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            view,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let view = Some(config.airtable_view.clone()).filter(|v| !v.is_empty());
        Self::new(&config.airtable_api_url, view, config.request_timeout())
    }

    fn table_url(&self, locator: &StoreLocator) -> String {
        format!(
            "{}/v0/{}/{}",
            self.api_url,
            urlencoding::encode(&locator.base_id),
            urlencoding::encode(&locator.table_id)
        )
    }

    async fn send(
        &self,
        operation: &str,
        locator: &StoreLocator,
        request: RequestBuilder,
    ) -> Result<Response, SyncError> {
        let response = request
            .bearer_auth(&locator.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::unavailable(STORE, format!("{} timed out", operation))
                } else {
                    SyncError::unavailable(STORE, format!("{} failed: {}", operation, e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::unavailable(
                STORE,
                format!("{} on {} returned {}: {}", operation, locator.table_id, status, body),
            ));
        }

        Ok(response)
    }
}

/// Field payload for a write. Empty cells clear the field.
fn store_fields(record: &Record) -> Map<String, Value> {
    record
        .to_store_fields()
        .into_iter()
        .map(|(k, v)| if is_empty_cell(&v) { (k, Value::Null) } else { (k, v) })
        .collect()
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn list_page(
        &self,
        locator: &StoreLocator,
        offset: Option<&str>,
    ) -> Result<RecordPage, SyncError> {
        let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
        if let Some(view) = &self.view {
            query.push(("view", view.clone()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let request = self.http.get(self.table_url(locator)).query(&query);
        let response = self.send("list", locator, request).await?;
        let page: ListResponse = response
            .json()
            .await
            .map_err(|e| SyncError::unavailable(STORE, format!("list: {}", e)))?;

        Ok(RecordPage {
            records: page
                .records
                .into_iter()
                .map(|r| Record::from_store(r.id, r.fields))
                .collect(),
            offset: page.offset,
        })
    }

    async fn update_batch(
        &self,
        locator: &StoreLocator,
        records: &[Record],
    ) -> Result<(), SyncError> {
        let mut payload = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id().ok_or_else(|| {
                SyncError::InconsistentSchema("update batch contains a record without id".into())
            })?;
            payload.push(json!({ "id": id, "fields": store_fields(record) }));
        }

        let request = self
            .http
            .patch(self.table_url(locator))
            .json(&json!({ "records": payload }));
        self.send("update", locator, request).await?;
        Ok(())
    }

    async fn create_batch(
        &self,
        locator: &StoreLocator,
        records: &[Record],
    ) -> Result<(), SyncError> {
        if records.iter().any(Record::has_id) {
            return Err(SyncError::InconsistentSchema(
                "insert batch contains a record with an id".into(),
            ));
        }
        let payload: Vec<Value> = records
            .iter()
            .map(|record| json!({ "fields": store_fields(record) }))
            .collect();

        let request = self
            .http
            .post(self.table_url(locator))
            .json(&json!({ "records": payload }));
        self.send("create", locator, request).await?;
        Ok(())
    }
}
