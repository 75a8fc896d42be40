//! Google Sheets and Drive over REST.
//!
//! Sheets holds the cell values; Drive provides revision history and webhook
//! channels. Every request asks the [`TokenProvider`] for a current bearer
//! token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::google_auth::{token_provider_from_config, TokenProvider};
use super::{DocumentStore, Revision, RevisionAuthor, WatchChannel, WatchRequest, WatchService};
use crate::config::Config;
use crate::error::SyncError;
use crate::models::Cell;

const STORE: &str = "google";

/// Revision list page size, the Drive maximum.
const REVISION_PAGE_SIZE: u32 = 1000;

/// Connection settings for the Google APIs.
#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub sheets_api_url: String,
    pub drive_api_url: String,
    /// A1 range kept in sync, usually a whole sheet such as `Sheet1`.
    pub range: String,
    pub timeout: Duration,
}

impl GoogleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sheets_api_url: config.sheets_api_url.trim_end_matches('/').to_string(),
            drive_api_url: config.drive_api_url.trim_end_matches('/').to_string(),
            range: config.sheet_range.clone(),
            timeout: config.request_timeout(),
        }
    }
}

/// Client for one Google account.
#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    settings: GoogleSettings,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionList {
    #[serde(default)]
    revisions: Vec<RevisionResource>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionResource {
    id: String,
    modified_time: Option<DateTime<Utc>>,
    last_modifying_user: Option<UserResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResource {
    #[serde(default)]
    me: bool,
    email_address: Option<String>,
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    id: String,
    resource_id: String,
    /// Milliseconds since the epoch, sent as a string.
    expiration: Option<String>,
}

impl From<RevisionResource> for Revision {
    fn from(resource: RevisionResource) -> Self {
        Revision {
            id: resource.id,
            modified_at: resource.modified_time,
            author: resource.last_modifying_user.map(|user| RevisionAuthor {
                me: user.me,
                email: user.email_address,
                display_name: user.display_name,
            }),
        }
    }
}

impl GoogleClient {
    pub fn new(
        settings: GoogleSettings,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SyncError::unavailable(STORE, e))?;
        Ok(Self {
            http,
            settings,
            tokens,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        Self::new(
            GoogleSettings::from_config(config),
            token_provider_from_config(config)?,
        )
    }

    fn values_url(&self, document_id: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.settings.sheets_api_url,
            urlencoding::encode(document_id),
            urlencoding::encode(&self.settings.range)
        )
    }

    fn drive_url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.drive_api_url, path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, SyncError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
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
                format!("{} returned {}: {}", operation, status, body),
            ));
        }

        Ok(response)
    }

    async fn revision_page(
        &self,
        document_id: &str,
        page_token: Option<&str>,
    ) -> Result<RevisionList, SyncError> {
        let mut query = vec![
            (
                "fields",
                "nextPageToken,revisions(id,modifiedTime,lastModifyingUser)".to_string(),
            ),
            ("pageSize", REVISION_PAGE_SIZE.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let url = self.drive_url(&format!(
            "files/{}/revisions",
            urlencoding::encode(document_id)
        ));
        let response = self
            .send("revisions.list", self.http.get(url).query(&query))
            .await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::unavailable(STORE, format!("revisions.list: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for GoogleClient {
    async fn read_values(&self, document_id: &str) -> Result<Vec<Vec<Cell>>, SyncError> {
        let request = self.http.get(self.values_url(document_id)).query(&[
            ("majorDimension", "ROWS"),
            ("valueRenderOption", "UNFORMATTED_VALUE"),
        ]);
        let response = self.send("values.get", request).await?;
        let range: ValueRange = response
            .json()
            .await
            .map_err(|e| SyncError::unavailable(STORE, format!("values.get: {}", e)))?;
        Ok(range.values)
    }

    async fn clear_values(&self, document_id: &str) -> Result<(), SyncError> {
        let url = format!("{}:clear", self.values_url(document_id));
        self.send("values.clear", self.http.post(url).json(&json!({})))
            .await?;
        Ok(())
    }

    async fn write_values(
        &self,
        document_id: &str,
        values: &[Vec<Cell>],
    ) -> Result<(), SyncError> {
        let body = json!({
            "range": self.settings.range,
            "majorDimension": "ROWS",
            "values": values,
        });
        let request = self
            .http
            .put(self.values_url(document_id))
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&body);
        self.send("values.update", request).await?;
        Ok(())
    }

    async fn list_revisions(&self, document_id: &str) -> Result<Vec<Revision>, SyncError> {
        let mut revisions = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .revision_page(document_id, page_token.as_deref())
                .await?;
            revisions.extend(page.revisions.into_iter().map(Revision::from));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(revisions)
    }
}

#[async_trait]
impl WatchService for GoogleClient {
    async fn watch(
        &self,
        document_id: &str,
        request: &WatchRequest,
    ) -> Result<WatchChannel, SyncError> {
        let body = json!({
            "kind": "api#channel",
            "id": request.channel_id,
            "type": "web_hook",
            "address": request.callback_address,
            "expiration": request.expires_at.timestamp_millis(),
        });
        let url = self.drive_url(&format!("files/{}/watch", urlencoding::encode(document_id)));
        let response = self.send("files.watch", self.http.post(url).json(&body)).await?;
        let channel: ChannelResource = response
            .json()
            .await
            .map_err(|e| SyncError::unavailable(STORE, format!("files.watch: {}", e)))?;

        let expires_at = channel
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(request.expires_at);

        Ok(WatchChannel {
            channel_id: channel.id,
            resource_id: channel.resource_id,
            expires_at,
        })
    }

    async fn stop(&self, channel: &WatchChannel) -> Result<(), SyncError> {
        let body = json!({
            "id": channel.channel_id,
            "resourceId": channel.resource_id,
        });
        self.send(
            "channels.stop",
            self.http.post(self.drive_url("channels/stop")).json(&body),
        )
        .await?;
        Ok(())
    }
}

/// Extracts the file id from a Drive resource URI such as
/// `https://www.googleapis.com/drive/v3/files/<id>?alt=json`.
pub fn document_id_from_resource_uri(uri: &str) -> Option<String> {
    let (_, rest) = uri.split_once("files/")?;
    let id = rest.split(['?', '/', '#']).next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::spawn_mock;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use crate::stores::google_auth::StaticToken;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(base: &str) -> GoogleSettings {
        GoogleSettings {
            sheets_api_url: format!("{}/sheets", base),
            drive_api_url: format!("{}/drive", base),
            range: "Sheet1".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn client(base: &str) -> GoogleClient {
        GoogleClient::new(settings(base), Arc::new(StaticToken::new("token"))).unwrap()
    }

    /// Hands out `token-1`, `token-2`, ... and fails once `limit` is reached.
    struct CountingTokens {
        issued: AtomicUsize,
        limit: usize,
    }

    #[async_trait]
    impl TokenProvider for CountingTokens {
        async fn access_token(&self) -> Result<String, SyncError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.limit {
                return Err(SyncError::unavailable("google", "token exchange returned 400"));
            }
            Ok(format!("token-{}", n))
        }
    }

    #[test]
    fn test_document_id_from_resource_uri() {
        let uri = concat!(
            "https://www.googleapis.com/drive/v3/files/1ghUWZXWVS8Fbga",
            "?acknowledgeAbuse=false&alt=json"
        );
        assert_eq!(
            document_id_from_resource_uri(uri),
            Some("1ghUWZXWVS8Fbga".to_string())
        );
        assert_eq!(
            document_id_from_resource_uri("https://www.googleapis.com/drive/v3/files/abc"),
            Some("abc".to_string())
        );
        assert_eq!(document_id_from_resource_uri("https://example.com/x"), None);
        assert_eq!(
            document_id_from_resource_uri("https://www.googleapis.com/drive/v3/files/?a=b"),
            None
        );
    }

    #[tokio::test]
    async fn test_read_values_sends_token_and_render_option() {
        let app = Router::new().route(
            "/sheets/spreadsheets/{doc}/values/{range}",
            get(
                |Path((doc, range)): Path<(String, String)>,
                 Query(q): Query<HashMap<String, String>>,
                 headers: HeaderMap| async move {
                    assert_eq!(doc, "D1");
                    assert_eq!(range, "Sheet1");
                    assert_eq!(q["valueRenderOption"], "UNFORMATTED_VALUE");
                    assert_eq!(headers["authorization"], "Bearer token");
                    Json(json!({"values": [["id", "name"], ["r1", "Alice"]]}))
                },
            ),
        );
        let base = spawn_mock(app).await;
        let client = client(&base);

        let values = client.read_values("D1").await.unwrap();
        assert_eq!(
            values,
            vec![vec![json!("id"), json!("name")], vec![json!("r1"), json!("Alice")]]
        );
    }

    #[tokio::test]
    async fn test_each_request_asks_for_a_current_token() {
        let app = Router::new().route(
            "/sheets/spreadsheets/{doc}/values/{range}",
            get(|headers: HeaderMap| async move {
                let auth = headers["authorization"].to_str().unwrap().to_string();
                Json(json!({"values": [[auth]]}))
            }),
        );
        let base = spawn_mock(app).await;
        let tokens = Arc::new(CountingTokens {
            issued: AtomicUsize::new(0),
            limit: 2,
        });
        let client = GoogleClient::new(settings(&base), tokens).unwrap();

        assert_eq!(client.read_values("D1").await.unwrap(), vec![vec![json!("Bearer token-1")]]);
        assert_eq!(client.read_values("D1").await.unwrap(), vec![vec![json!("Bearer token-2")]]);

        let err = client.read_values("D1").await.unwrap_err();
        assert!(matches!(err, SyncError::AdapterUnavailable { store: "google", .. }));
    }

    #[tokio::test]
    async fn test_read_values_of_empty_sheet() {
        let app = Router::new().route(
            "/sheets/spreadsheets/{doc}/values/{range}",
            get(|| async { Json(json!({"range": "Sheet1!A1:Z1000"})) }),
        );
        let base = spawn_mock(app).await;
        let client = client(&base);

        assert!(client.read_values("D1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_maps_to_adapter_unavailable() {
        let app = Router::new().route(
            "/sheets/spreadsheets/{doc}/values/{range}",
            get(|| async { (StatusCode::FORBIDDEN, "caller lacks permission") }),
        );
        let base = spawn_mock(app).await;
        let client = client(&base);

        let err = client.read_values("D1").await.unwrap_err();
        assert!(matches!(err, SyncError::AdapterUnavailable { store: "google", .. }));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_list_revisions_follows_page_tokens() {
        let app = Router::new().route(
            "/drive/files/{doc}/revisions",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("pageToken").map(String::as_str) {
                    None => Json(json!({
                        "revisions": [{"id": "1", "lastModifyingUser": {"me": false}}],
                        "nextPageToken": "p2"
                    })),
                    Some(_) => Json(json!({
                        "revisions": [{
                            "id": "2",
                            "modifiedTime": "2026-01-01T00:00:00Z",
                            "lastModifyingUser": {"me": true, "emailAddress": "bot@example.com"}
                        }]
                    })),
                }
            }),
        );
        let base = spawn_mock(app).await;
        let client = client(&base);

        let revisions = client.list_revisions("D1").await.unwrap();
        assert_eq!(revisions.len(), 2);
        let last = revisions.last().unwrap();
        assert!(last.author.as_ref().unwrap().me);
        assert!(last.modified_at.is_some());
    }

    #[tokio::test]
    async fn test_watch_reads_channel_expiration() {
        let app = Router::new().route(
            "/drive/files/{doc}/watch",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["type"], "web_hook");
                Json(json!({
                    "kind": "api#channel",
                    "id": body["id"],
                    "resourceId": "res-1",
                    "expiration": "1767225600000"
                }))
            }),
        );
        let base = spawn_mock(app).await;
        let client = client(&base);

        let request = WatchRequest {
            channel_id: "chan-1".into(),
            callback_address: "https://sync.example.com/notifications".into(),
            expires_at: Utc::now(),
        };
        let channel = client.watch("D1", &request).await.unwrap();
        assert_eq!(channel.channel_id, "chan-1");
        assert_eq!(channel.resource_id, "res-1");
        assert_eq!(channel.expires_at.timestamp_millis(), 1_767_225_600_000);
    }
}
