//! Uniform table access over both stores.

use std::sync::Arc;

use async_trait::async_trait;

use super::reconcile::{self, PushSummary, RecordPages};
use crate::error::SyncError;
use crate::models::{is_empty_cell, DocumentLocator, StoreLocator, Table, ID_FIELD};
use crate::stores::{DocumentStore, RecordStore};

/// Reads and writes a whole table addressed by a locator.
#[async_trait]
pub trait TableAdapter: Send + Sync {
    type Locator: Send + Sync;

    async fn fetch(&self, locator: &Self::Locator) -> Result<Table, SyncError>;

    /// Writes the complete desired state of the table.
    async fn replace(&self, locator: &Self::Locator, table: &Table) -> Result<(), SyncError>;
}

/// Tables held in spreadsheet documents.
#[derive(Clone)]
pub struct DocumentTables {
    store: Arc<dyn DocumentStore>,
}

impl DocumentTables {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TableAdapter for DocumentTables {
    type Locator = DocumentLocator;

    async fn fetch(&self, locator: &DocumentLocator) -> Result<Table, SyncError> {
        let values = self.store.read_values(&locator.document_id).await?;
        Table::from_grid_padded(values)
    }

    /// Clears the synced range, then writes the table into it.
    async fn replace(&self, locator: &DocumentLocator, table: &Table) -> Result<(), SyncError> {
        self.store.clear_values(&locator.document_id).await?;
        let grid = table.to_grid();
        if !grid.is_empty() {
            self.store.write_values(&locator.document_id, &grid).await?;
        }
        Ok(())
    }
}

/// Tables held in the external record store.
#[derive(Clone)]
pub struct RecordTables {
    store: Arc<dyn RecordStore>,
    max_records: usize,
}

impl RecordTables {
    pub fn new(store: Arc<dyn RecordStore>, max_records: usize) -> Self {
        Self { store, max_records }
    }

    /// Pushes a table as updates and inserts, reporting what was sent.
    ///
    /// Rows with no value at all are skipped. Rows missing from the table are
    /// left alone in the store.
    pub async fn push(
        &self,
        locator: &StoreLocator,
        table: &Table,
    ) -> Result<PushSummary, SyncError> {
        let records = reconcile::to_records(table)?
            .into_iter()
            .filter(|r| !r.fields().iter().all(|(_, v)| is_empty_cell(v)))
            .collect();
        let partition = reconcile::partition(records);
        if partition.is_empty() {
            return Ok(PushSummary::default());
        }
        reconcile::push(self.store.as_ref(), locator, &partition).await
    }
}

#[async_trait]
impl TableAdapter for RecordTables {
    type Locator = StoreLocator;

    /// Reads every record; `id` is always the first column.
    async fn fetch(&self, locator: &StoreLocator) -> Result<Table, SyncError> {
        let records = RecordPages::new(self.store.as_ref(), locator)
            .collect(self.max_records)
            .await?;
        reconcile::to_table_first_seen(&[ID_FIELD.to_string()], &records)
    }

    async fn replace(&self, locator: &StoreLocator, table: &Table) -> Result<(), SyncError> {
        self.push(locator, table).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::stores::memory::{MemoryDocumentStore, MemoryRecordStore};
    use serde_json::json;

    fn table(rows: &[&[&str]]) -> Table {
        Table::from_grid(
            rows.iter()
                .map(|r| r.iter().map(|c| json!(c)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn store_locator() -> StoreLocator {
        StoreLocator {
            api_key: "key".into(),
            base_id: "B1".into(),
            table_id: "T1".into(),
        }
    }

    #[tokio::test]
    async fn test_document_replace_is_idempotent() {
        let store = Arc::new(MemoryDocumentStore::new());
        let tables = DocumentTables::new(store.clone());
        let loc = DocumentLocator::new("D1");
        let t = table(&[&["id", "name"], &["r1", "Alice"]]);

        tables.replace(&loc, &t).await.unwrap();
        assert_eq!(tables.fetch(&loc).await.unwrap(), t);
        tables.replace(&loc, &t).await.unwrap();
        assert_eq!(tables.fetch(&loc).await.unwrap(), t);
    }

    #[tokio::test]
    async fn test_document_replace_overwrites_larger_table() {
        let store = Arc::new(MemoryDocumentStore::new());
        let tables = DocumentTables::new(store.clone());
        let loc = DocumentLocator::new("D1");

        tables
            .replace(&loc, &table(&[&["a", "b"], &["1", "2"], &["3", "4"]]))
            .await
            .unwrap();
        let smaller = table(&[&["a"], &["5"]]);
        tables.replace(&loc, &smaller).await.unwrap();

        assert_eq!(tables.fetch(&loc).await.unwrap(), smaller);
    }

    #[tokio::test]
    async fn test_document_fetch_pads_ragged_rows() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_values(
            "D1",
            vec![
                vec![json!("id"), json!("name")],
                vec![json!(""), json!("Bob")],
                vec![json!("r1")],
            ],
        );
        let tables = DocumentTables::new(store);

        let t = tables.fetch(&DocumentLocator::new("D1")).await.unwrap();
        assert_eq!(t.rows()[1], vec![json!("r1"), json!("")]);
    }

    #[tokio::test]
    async fn test_record_fetch_puts_id_first() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(
            "T1",
            vec![Record::from_pairs([("id", json!("r1")), ("name", json!("Alice"))])],
        );
        let tables = RecordTables::new(store, 1000);

        let t = tables.fetch(&store_locator()).await.unwrap();
        assert_eq!(t, table(&[&["id", "name"], &["r1", "Alice"]]));
    }

    #[tokio::test]
    async fn test_record_fetch_of_sparse_records() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(
            "T1",
            vec![
                Record::from_pairs([("id", json!("rec1")), ("name", json!("Alice"))]),
                Record::from_pairs([("id", json!("rec2")), ("email", json!("b@example.com"))]),
                Record::from_pairs([
                    ("id", json!("rec3")),
                    ("email", json!("c@example.com")),
                    ("name", json!("Carol")),
                ]),
            ],
        );
        let tables = RecordTables::new(store, 1000);

        let t = tables.fetch(&store_locator()).await.unwrap();
        assert_eq!(
            t,
            table(&[
                &["id", "name", "email"],
                &["rec1", "Alice", ""],
                &["rec2", "", "b@example.com"],
                &["rec3", "Carol", "c@example.com"],
            ])
        );
    }

    #[tokio::test]
    async fn test_record_fetch_of_empty_table_keeps_id_column() {
        let tables = RecordTables::new(Arc::new(MemoryRecordStore::new()), 1000);
        let t = tables.fetch(&store_locator()).await.unwrap();
        assert_eq!(t.header(), &["id".to_string()]);
        assert!(t.rows().is_empty());
    }

    #[tokio::test]
    async fn test_record_push_skips_blank_rows() {
        let store = Arc::new(MemoryRecordStore::new());
        let tables = RecordTables::new(store.clone(), 1000);
        let t = table(&[&["id", "name"], &["", ""], &["", "Bob"]]);

        let summary = tables.push(&store_locator(), &t).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(store.create_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_record_replace_is_idempotent_for_existing_rows() {
        let store = Arc::new(MemoryRecordStore::new());
        store.seed(
            "T1",
            vec![Record::from_pairs([("id", json!("r1")), ("name", json!("Alice"))])],
        );
        let tables = RecordTables::new(store.clone(), 1000);
        let t = table(&[&["id", "name"], &["r1", "Alicia"]]);

        tables.replace(&store_locator(), &t).await.unwrap();
        tables.replace(&store_locator(), &t).await.unwrap();

        assert_eq!(tables.fetch(&store_locator()).await.unwrap(), t);
    }
}
