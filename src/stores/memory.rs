//! In-memory stores for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    DocumentStore, RecordPage, RecordStore, Revision, RevisionAuthor, WatchChannel,
    WatchRequest, WatchService,
};
use crate::error::SyncError;
use crate::models::{Cell, Record, StoreLocator, ID_FIELD};

/// Record store keyed by table id.
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    page_size: usize,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    update_calls: Mutex<Vec<Vec<Record>>>,
    create_calls: Mutex<Vec<Vec<Record>>>,
    fail_creates: AtomicBool,
    fail_lists: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            page_size,
            next_id: AtomicUsize::new(1),
            list_calls: AtomicUsize::new(0),
            update_calls: Mutex::new(Vec::new()),
            create_calls: Mutex::new(Vec::new()),
            fail_creates: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
        }
    }

    pub fn seed(&self, table_id: &str, records: Vec<Record>) {
        self.tables
            .lock()
            .unwrap()
            .insert(table_id.to_string(), records);
    }

    pub fn records(&self, table_id: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(table_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> Vec<Vec<Record>> {
        self.update_calls.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> Vec<Vec<Record>> {
        self.create_calls.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.update_calls.lock().unwrap().len() + self.create_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_page(
        &self,
        locator: &StoreLocator,
        offset: Option<&str>,
    ) -> Result<RecordPage, SyncError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(SyncError::unavailable("airtable", "list failed"));
        }
        let start: usize = offset.and_then(|o| o.parse().ok()).unwrap_or(0);
        let all = self.records(&locator.table_id);
        let end = (start + self.page_size).min(all.len());
        let records = all.get(start..end).map(<[Record]>::to_vec).unwrap_or_default();
        let offset = (end < all.len()).then(|| end.to_string());
        Ok(RecordPage { records, offset })
    }

    async fn update_batch(
        &self,
        locator: &StoreLocator,
        records: &[Record],
    ) -> Result<(), SyncError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(locator.table_id.clone()).or_default();
        for record in records {
            let id = record.id();
            if let Some(existing) = table.iter_mut().find(|r| r.id() == id) {
                for (key, value) in record.fields() {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
        self.update_calls.lock().unwrap().push(records.to_vec());
        Ok(())
    }

    async fn create_batch(
        &self,
        locator: &StoreLocator,
        records: &[Record],
    ) -> Result<(), SyncError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SyncError::unavailable("airtable", "create rejected"));
        }
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(locator.table_id.clone()).or_default();
        for record in records {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut stored = Record::from_pairs([(ID_FIELD, Value::String(format!("rec{}", n)))]);
            for (key, value) in record.fields() {
                stored.insert(key.clone(), value.clone());
            }
            table.push(stored);
        }
        self.create_calls.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

/// Document store holding one grid and one revision history per document.
#[derive(Default)]
pub struct MemoryDocumentStore {
    values: Mutex<HashMap<String, Vec<Vec<Cell>>>>,
    revisions: Mutex<HashMap<String, Vec<Revision>>>,
    writes: Mutex<Vec<String>>,
    fail_revisions: AtomicBool,
    fail_writes_for: Mutex<Vec<String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_values(&self, document_id: &str, values: Vec<Vec<Cell>>) {
        self.values
            .lock()
            .unwrap()
            .insert(document_id.to_string(), values);
    }

    pub fn values(&self, document_id: &str) -> Vec<Vec<Cell>> {
        self.values
            .lock()
            .unwrap()
            .get(document_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends a revision authored either by this service or by someone else.
    pub fn push_revision(&self, document_id: &str, by_me: bool) {
        let mut revisions = self.revisions.lock().unwrap();
        let history = revisions.entry(document_id.to_string()).or_default();
        history.push(Revision {
            id: (history.len() + 1).to_string(),
            modified_at: None,
            author: Some(RevisionAuthor {
                me: by_me,
                email: Some(if by_me {
                    "sync@service.example".to_string()
                } else {
                    "editor@example.com".to_string()
                }),
                display_name: None,
            }),
        });
    }

    pub fn set_revisions(&self, document_id: &str, history: Vec<Revision>) {
        self.revisions
            .lock()
            .unwrap()
            .insert(document_id.to_string(), history);
    }

    pub fn fail_revisions(&self, fail: bool) {
        self.fail_revisions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_for(&self, document_id: &str) {
        self.fail_writes_for
            .lock()
            .unwrap()
            .push(document_id.to_string());
    }

    /// Document ids in the order they were written.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_values(&self, document_id: &str) -> Result<Vec<Vec<Cell>>, SyncError> {
        Ok(self.values(document_id))
    }

    async fn clear_values(&self, document_id: &str) -> Result<(), SyncError> {
        if self.fail_writes_for.lock().unwrap().iter().any(|d| d == document_id) {
            return Err(SyncError::unavailable("sheets", "permission denied"));
        }
        self.set_values(document_id, Vec::new());
        Ok(())
    }

    async fn write_values(
        &self,
        document_id: &str,
        values: &[Vec<Cell>],
    ) -> Result<(), SyncError> {
        if self.fail_writes_for.lock().unwrap().iter().any(|d| d == document_id) {
            return Err(SyncError::unavailable("sheets", "permission denied"));
        }
        self.set_values(document_id, values.to_vec());
        self.writes.lock().unwrap().push(document_id.to_string());
        Ok(())
    }

    async fn list_revisions(&self, document_id: &str) -> Result<Vec<Revision>, SyncError> {
        if self.fail_revisions.load(Ordering::SeqCst) {
            return Err(SyncError::unavailable("drive", "revisions.list failed"));
        }
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Watch service that hands out channels without calling anything.
#[derive(Default)]
pub struct MemoryWatchService {
    watched: Mutex<Vec<(String, WatchRequest)>>,
    stopped: Mutex<Vec<WatchChannel>>,
    reject_watches: AtomicBool,
}

impl MemoryWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watched(&self) -> Vec<String> {
        self.watched
            .lock()
            .unwrap()
            .iter()
            .map(|(doc, _)| doc.clone())
            .collect()
    }

    pub fn stopped(&self) -> Vec<WatchChannel> {
        self.stopped.lock().unwrap().clone()
    }

    /// Makes every later `watch` call fail.
    pub fn reject_watches(&self) {
        self.reject_watches.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WatchService for MemoryWatchService {
    async fn watch(
        &self,
        document_id: &str,
        request: &WatchRequest,
    ) -> Result<WatchChannel, SyncError> {
        if self.reject_watches.load(Ordering::SeqCst) {
            return Err(SyncError::unavailable("google", "push notifications not enabled"));
        }
        self.watched
            .lock()
            .unwrap()
            .push((document_id.to_string(), request.clone()));
        Ok(WatchChannel {
            channel_id: request.channel_id.clone(),
            resource_id: format!("resource-{}", document_id),
            expires_at: request.expires_at,
        })
    }

    async fn stop(&self, channel: &WatchChannel) -> Result<(), SyncError> {
        self.stopped.lock().unwrap().push(channel.clone());
        Ok(())
    }
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_mock(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
