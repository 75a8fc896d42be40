//! Mirroring between spreadsheet documents and external tables.
//!
//! # Flow
//!
//! A document is connected to an external table once. After that, every edit
//! to the document arrives as a change notification:
//!
//! 1. [`loop_guard::LoopGuard`] drops notifications caused by our own writes
//! 2. the document is read as a [`crate::models::Table`] and pushed into the
//!    external table as updates and inserts ([`reconcile`])
//! 3. every document mirroring the same table is refreshed ([`fanout`])
//!
//! [`engine::SyncEngine`] ties the steps together.

pub mod adapter;
pub mod engine;
pub mod fanout;
pub mod loop_guard;
pub mod notifier;
pub mod reconcile;

pub use adapter::{DocumentTables, RecordTables, TableAdapter};
pub use engine::{
    Collaborators, EngineOptions, Notification, NotificationOutcome, SyncEngine, SyncPhase,
};
pub use fanout::{fan_out, FanOutReport, HttpDispatcher, SiblingDispatcher, SiblingFailure};
pub use loop_guard::LoopGuard;
pub use notifier::{ChangeNotifier, NotifierSettings, RenewalReport};
pub use reconcile::{
    partition, to_records, to_table, to_table_first_seen, Partition, PushSummary, RecordPages,
};
