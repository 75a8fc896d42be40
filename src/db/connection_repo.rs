use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::SyncError;
use crate::models::Connection;

/// Durable mapping from a document to the external table it mirrors.
///
/// One entry per document. Saving an existing document replaces its entry.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn save(&self, connection: &Connection) -> Result<(), SyncError>;

    async fn find_by_document(&self, document_id: &str)
        -> Result<Option<Connection>, SyncError>;

    /// Every connection mirroring `table_id`, the caller's own included.
    async fn find_siblings(&self, table_id: &str) -> Result<Vec<Connection>, SyncError>;

    /// Returns false if nothing was registered for the document.
    async fn remove(&self, document_id: &str) -> Result<bool, SyncError>;

    async fn list(&self) -> Result<Vec<Connection>, SyncError>;
}

pub struct SqliteRegistry {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    document_id: String,
    store_api_key: String,
    store_container_id: String,
    table_id: String,
}

impl From<ConnectionRow> for Connection {
    fn from(row: ConnectionRow) -> Self {
        Connection {
            document_id: row.document_id,
            store_api_key: row.store_api_key,
            store_container_id: row.store_container_id,
            table_id: row.table_id,
        }
    }
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionRegistry for SqliteRegistry {
    async fn save(&self, connection: &Connection) -> Result<(), SyncError> {
        let created_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO connections
                (document_id, store_api_key, store_container_id, table_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                store_api_key = excluded.store_api_key,
                store_container_id = excluded.store_container_id,
                table_id = excluded.table_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(&connection.document_id)
        .bind(&connection.store_api_key)
        .bind(&connection.store_container_id)
        .bind(&connection.table_id)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_document(
        &self,
        document_id: &str,
    ) -> Result<Option<Connection>, SyncError> {
        let row: Option<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT document_id, store_api_key, store_container_id, table_id
            FROM connections
            WHERE document_id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Connection::from))
    }

    async fn find_siblings(&self, table_id: &str) -> Result<Vec<Connection>, SyncError> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT document_id, store_api_key, store_container_id, table_id
            FROM connections
            WHERE table_id = ?
            ORDER BY created_at, document_id
            "#,
        )
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Connection::from).collect())
    }

    async fn remove(&self, document_id: &str) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM connections WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Connection>, SyncError> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT document_id, store_api_key, store_container_id, table_id
            FROM connections
            ORDER BY table_id, document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Connection::from).collect())
    }
}
