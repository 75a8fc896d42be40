//! Tablemirror
//!
//! Keeps spreadsheet documents mirrored with an external record table.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod server;
pub mod stores;
pub mod sync;

pub use config::{Config, ConfigError};
pub use db::{init_db, ConnectionRegistry, SqliteRegistry, SubscriptionRepository};
pub use error::SyncError;
pub use models::{Connection, Record, Subscription, Table};
pub use server::{router, AppState};
pub use sync::{Notification, NotificationOutcome, SyncEngine};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
