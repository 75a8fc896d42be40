//! Change-notification channels on documents.
//!
//! Channels expire after roughly a day. The current channel of every document
//! is kept in the subscription ledger; [`ChangeNotifier::renew_expiring`]
//! replaces channels about to close and stops the ones they supersede.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::db::SubscriptionRepository;
use crate::error::SyncError;
use crate::models::Subscription;
use crate::stores::{WatchChannel, WatchRequest, WatchService};

/// Channel lifetime and renewal window.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub callback_address: String,
    pub ttl: chrono::Duration,
    pub renewal_margin: chrono::Duration,
}

impl NotifierSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            callback_address: config.callback_address(),
            ttl: chrono::Duration::seconds(config.watch_ttl_secs as i64),
            renewal_margin: chrono::Duration::seconds(config.renewal_margin_secs as i64),
        }
    }
}

/// Outcome of one renewal pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalReport {
    pub renewed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct ChangeNotifier {
    watches: Arc<dyn WatchService>,
    ledger: SubscriptionRepository,
    settings: NotifierSettings,
}

impl ChangeNotifier {
    pub fn new(
        watches: Arc<dyn WatchService>,
        ledger: SubscriptionRepository,
        settings: NotifierSettings,
    ) -> Self {
        Self {
            watches,
            ledger,
            settings,
        }
    }

    pub fn callback_address(&self) -> &str {
        &self.settings.callback_address
    }

    /// Opens a new channel for the document.
    ///
    /// Each call creates a fresh channel. The channel it replaces in the
    /// ledger, if any, is stopped; a failed stop is only logged.
    pub async fn subscribe(
        &self,
        document_id: &str,
        callback_address: &str,
    ) -> Result<Subscription, SyncError> {
        let request = WatchRequest {
            channel_id: Uuid::new_v4().to_string(),
            callback_address: callback_address.to_string(),
            expires_at: Utc::now() + self.settings.ttl,
        };
        let channel = self.watches.watch(document_id, &request).await?;

        let subscription = Subscription {
            document_id: document_id.to_string(),
            channel_id: channel.channel_id,
            resource_id: channel.resource_id,
            callback_address: request.callback_address,
            expires_at: channel.expires_at,
        };

        let previous = match self.record(&subscription).await {
            Ok(previous) => previous,
            Err(e) => {
                // An unrecorded channel would never be renewed or stopped.
                self.stop_quietly(&subscription).await;
                return Err(e);
            }
        };
        if let Some(previous) = previous {
            self.stop_quietly(&previous).await;
        }

        tracing::info!(
            document_id,
            channel_id = %subscription.channel_id,
            expires_at = %subscription.expires_at,
            "Watching document"
        );
        Ok(subscription)
    }

    /// Returns a channel that stays open past the renewal margin, opening one
    /// only if the recorded channel is missing or about to close.
    pub async fn resubscribe(&self, document_id: &str) -> Result<Subscription, SyncError> {
        let current = self.ledger.find(document_id).await?;
        if let Some(current) = &current {
            if current.outlives(Utc::now(), self.settings.renewal_margin) {
                return Ok(current.clone());
            }
        }
        let callback = current
            .map(|s| s.callback_address)
            .unwrap_or_else(|| self.settings.callback_address.clone());
        self.subscribe(document_id, &callback).await
    }

    /// Renews every recorded channel that closes within the renewal margin.
    pub async fn renew_expiring(&self) -> Result<RenewalReport, SyncError> {
        let deadline = Utc::now() + self.settings.renewal_margin;
        let expiring = self.ledger.expiring_before(deadline).await?;

        let mut report = RenewalReport::default();
        for subscription in expiring {
            match self
                .subscribe(&subscription.document_id, &subscription.callback_address)
                .await
            {
                Ok(_) => report.renewed.push(subscription.document_id),
                Err(e) => {
                    tracing::warn!(
                        document_id = %subscription.document_id,
                        "Failed to renew watch channel: {}",
                        e
                    );
                    report.failed.push(subscription.document_id);
                }
            }
        }
        Ok(report)
    }

    /// Stops and forgets the document's channel.
    pub async fn unsubscribe(&self, document_id: &str) -> Result<bool, SyncError> {
        match self.ledger.find(document_id).await? {
            Some(subscription) => {
                self.stop_quietly(&subscription).await;
                self.ledger.remove(document_id).await
            }
            None => Ok(false),
        }
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, SyncError> {
        self.ledger.list().await
    }

    /// Runs [`ChangeNotifier::renew_expiring`] every `every` until aborted.
    pub fn spawn_renewal(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.renew_expiring().await {
                    Ok(report) if report.renewed.is_empty() && report.failed.is_empty() => {}
                    Ok(report) => tracing::info!(
                        renewed = report.renewed.len(),
                        failed = report.failed.len(),
                        "Renewed expiring watch channels"
                    ),
                    Err(e) => tracing::error!("Watch renewal pass failed: {}", e),
                }
            }
        })
    }

    /// Saves `subscription` and returns the one it replaces.
    async fn record(&self, subscription: &Subscription) -> Result<Option<Subscription>, SyncError> {
        let previous = self.ledger.find(&subscription.document_id).await?;
        self.ledger.save(subscription).await?;
        Ok(previous)
    }

    async fn stop_quietly(&self, subscription: &Subscription) {
        let channel = WatchChannel {
            channel_id: subscription.channel_id.clone(),
            resource_id: subscription.resource_id.clone(),
            expires_at: subscription.expires_at,
        };
        if let Err(e) = self.watches.stop(&channel).await {
            tracing::warn!(
                document_id = %subscription.document_id,
                channel_id = %subscription.channel_id,
                "Failed to stop channel: {}",
                e
            );
        }
    }
}
