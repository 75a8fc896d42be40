use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::error::SyncError;
use crate::models::Subscription;

/// Tracks the live watch channel of each document so it can be renewed and
/// the superseded channel stopped.
#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    document_id: String,
    channel_id: String,
    resource_id: String,
    callback_address: String,
    expires_at: String,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = SyncError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let expires_at = DateTime::parse_from_rfc3339(&row.expires_at)
            .map_err(|e| SyncError::Registry(sqlx::Error::Decode(Box::new(e))))?
            .with_timezone(&Utc);
        Ok(Subscription {
            document_id: row.document_id,
            channel_id: row.channel_id,
            resource_id: row.resource_id,
            callback_address: row.callback_address,
            expires_at,
        })
    }
}

/// Fixed-width UTC timestamps so that text comparison orders by time.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records the current channel for a document, replacing any older one.
    pub async fn save(&self, subscription: &Subscription) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (document_id, channel_id, resource_id, callback_address, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                resource_id = excluded.resource_id,
                callback_address = excluded.callback_address,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&subscription.document_id)
        .bind(&subscription.channel_id)
        .bind(&subscription.resource_id)
        .bind(&subscription.callback_address)
        .bind(timestamp(subscription.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, document_id: &str) -> Result<Option<Subscription>, SyncError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE document_id = ?")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Subscription::try_from).transpose()
    }

    /// Subscriptions whose channel closes before `deadline`.
    pub async fn expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, SyncError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE expires_at < ? ORDER BY expires_at",
        )
        .bind(timestamp(deadline))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, SyncError> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions ORDER BY expires_at")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    pub async fn remove(&self, document_id: &str) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::Duration;

    fn subscription(doc: &str, channel: &str, expires_at: DateTime<Utc>) -> Subscription {
        Subscription {
            document_id: doc.into(),
            channel_id: channel.into(),
            resource_id: format!("res-{}", channel),
            callback_address: "https://sync.example.com/notifications".into(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_save_replaces_channel() {
        let (pool, _temp) = test_pool().await;
        let repo = SubscriptionRepository::new(pool);
        let now = Utc::now();

        repo.save(&subscription("D1", "c1", now)).await.unwrap();
        repo.save(&subscription("D1", "c2", now + Duration::hours(1)))
            .await
            .unwrap();

        let found = repo.find("D1").await.unwrap().unwrap();
        assert_eq!(found.channel_id, "c2");
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expiring_before() {
        let (pool, _temp) = test_pool().await;
        let repo = SubscriptionRepository::new(pool);
        let now = Utc::now();

        repo.save(&subscription("D1", "c1", now + Duration::minutes(10)))
            .await
            .unwrap();
        repo.save(&subscription("D2", "c2", now + Duration::hours(20)))
            .await
            .unwrap();

        let expiring = repo.expiring_before(now + Duration::hours(1)).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].document_id, "D1");
    }

    #[tokio::test]
    async fn test_remove() {
        let (pool, _temp) = test_pool().await;
        let repo = SubscriptionRepository::new(pool);

        repo.save(&subscription("D1", "c1", Utc::now())).await.unwrap();
        assert!(repo.remove("D1").await.unwrap());
        assert!(repo.find("D1").await.unwrap().is_none());
    }
}
