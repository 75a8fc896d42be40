//! Conversion between the grid and record forms of a table, and the batched
//! push of records into the external store.
//!
//! Records with an id are updates, the rest are inserts. Each bucket is cut
//! into batches of [`BATCH_SIZE`] (the external store's per-request limit) and
//! every batch is sent concurrently.

use futures::future::join_all;
use futures::stream::{self, Stream, TryStreamExt};

use crate::error::SyncError;
use crate::models::{empty_cell, Record, StoreLocator, Table};
use crate::stores::RecordStore;

/// Maximum records per write request.
pub const BATCH_SIZE: usize = 10;

/// Zips every data row with the header.
pub fn to_records(table: &Table) -> Result<Vec<Record>, SyncError> {
    let header = table.header();
    for (index, name) in header.iter().enumerate() {
        if header[..index].contains(name) {
            return Err(SyncError::InconsistentSchema(format!(
                "duplicate column '{}'",
                name
            )));
        }
    }

    Ok(table
        .rows()
        .iter()
        .map(|row| Record::from_pairs(header.iter().cloned().zip(row.iter().cloned())))
        .collect())
}

/// Lays records out under the order-preserving union of their keys.
pub fn to_table(records: &[Record]) -> Result<Table, SyncError> {
    to_table_with_header(&[], records)
}

/// Like [`to_table`], starting from a known header so that a table with no
/// records keeps its columns.
pub fn to_table_with_header(seed: &[String], records: &[Record]) -> Result<Table, SyncError> {
    let mut header: Vec<String> = seed.to_vec();

    for record in records {
        // New keys land just before the next key the header already knows.
        let mut pending: Vec<&str> = Vec::new();
        for key in record.keys() {
            match header.iter().position(|h| h == key) {
                Some(pos) => {
                    for (offset, new_key) in pending.drain(..).enumerate() {
                        header.insert(pos + offset, new_key.to_string());
                    }
                }
                None => pending.push(key),
            }
        }
        header.extend(pending.into_iter().map(String::from));

        let mut last = None;
        for key in record.keys() {
            let pos = header.iter().position(|h| h == key);
            if pos < last {
                return Err(SyncError::InconsistentSchema(format!(
                    "column '{}' appears out of order across records",
                    key
                )));
            }
            last = pos;
        }
    }

    layout(header, records)
}

/// Lays out records as the external store returns them.
///
/// The store leaves empty fields out of each record and its key order means
/// nothing, so the header is the seed followed by every other key in the order
/// it is first seen. Never fails on key order.
pub fn to_table_first_seen(seed: &[String], records: &[Record]) -> Result<Table, SyncError> {
    let mut header: Vec<String> = seed.to_vec();
    for record in records {
        for key in record.keys() {
            if !header.iter().any(|h| h == key) {
                header.push(key.to_string());
            }
        }
    }
    layout(header, records)
}

fn layout(header: Vec<String>, records: &[Record]) -> Result<Table, SyncError> {
    let rows = records
        .iter()
        .map(|record| {
            header
                .iter()
                .map(|name| record.get(name).cloned().unwrap_or_else(empty_cell))
                .collect()
        })
        .collect();

    Table::new(header, rows)
}

/// Records split by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    /// Records with an id, sent as updates.
    pub updates: Vec<Record>,
    /// Records without an id, `id` field stripped, sent as creates.
    pub inserts: Vec<Record>,
}

impl Partition {
    pub fn update_batches(&self) -> impl Iterator<Item = &[Record]> {
        self.updates.chunks(BATCH_SIZE)
    }

    pub fn insert_batches(&self) -> impl Iterator<Item = &[Record]> {
        self.inserts.chunks(BATCH_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty()
    }
}

pub fn partition(records: Vec<Record>) -> Partition {
    let mut result = Partition::default();
    for record in records {
        if record.has_id() {
            result.updates.push(record);
        } else {
            result.inserts.push(record.without_id());
        }
    }
    result
}

/// Counts from a successful push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub updated: usize,
    pub created: usize,
    pub batches: usize,
}

/// Sends every batch of a partition concurrently.
///
/// All batches run to completion; the first failure (updates before inserts,
/// in batch order) is returned. Batches that succeeded stay applied.
pub async fn push(
    store: &dyn RecordStore,
    locator: &StoreLocator,
    partition: &Partition,
) -> Result<PushSummary, SyncError> {
    let updates = join_all(
        partition
            .update_batches()
            .map(|batch| store.update_batch(locator, batch)),
    );
    let inserts = join_all(
        partition
            .insert_batches()
            .map(|batch| store.create_batch(locator, batch)),
    );
    let (updates, inserts) = futures::join!(updates, inserts);

    let batches = updates.len() + inserts.len();
    let failed = updates
        .iter()
        .chain(inserts.iter())
        .filter(|r| r.is_err())
        .count();

    if let Some(err) = updates.into_iter().chain(inserts).find_map(Result::err) {
        tracing::warn!(
            table_id = %locator.table_id,
            "{} of {} batches failed, the rest were applied",
            failed,
            batches
        );
        return Err(err);
    }

    Ok(PushSummary {
        updated: partition.updates.len(),
        created: partition.inserts.len(),
        batches,
    })
}

/// Lazy, restartable sequence of record pages from the external store.
pub struct RecordPages<'a> {
    store: &'a dyn RecordStore,
    locator: &'a StoreLocator,
}

enum Cursor {
    Start,
    At(String),
    Done,
}

impl<'a> RecordPages<'a> {
    pub fn new(store: &'a dyn RecordStore, locator: &'a StoreLocator) -> Self {
        Self { store, locator }
    }

    /// Streams pages from the first one. Every call starts over.
    pub fn pages(&self) -> impl Stream<Item = Result<Vec<Record>, SyncError>> + 'a {
        let store = self.store;
        let locator = self.locator;
        stream::try_unfold(Cursor::Start, move |cursor| async move {
            let offset = match cursor {
                Cursor::Done => return Ok(None),
                Cursor::Start => None,
                Cursor::At(offset) => Some(offset),
            };
            let page = store.list_page(locator, offset.as_deref()).await?;
            let next = match page.offset {
                Some(offset) => Cursor::At(offset),
                None => Cursor::Done,
            };
            Ok(Some((page.records, next)))
        })
    }

    /// Collects records until the store runs out or `limit` is reached.
    pub async fn collect(&self, limit: usize) -> Result<Vec<Record>, SyncError> {
        let mut pages = Box::pin(self.pages());
        let mut records = Vec::new();
        while let Some(page) = pages.try_next().await? {
            records.extend(page);
            if records.len() >= limit {
                records.truncate(limit);
                break;
            }
        }
        Ok(records)
    }
}
