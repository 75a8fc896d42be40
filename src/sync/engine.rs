//! The sync orchestrator.
//!
//! Three entry points, each an independent unit of work:
//! - [`SyncEngine::connect`]: register a document, fill it from the external
//!   table and start watching it
//! - [`SyncEngine::handle_notification`]: push a changed document into the
//!   external table and refresh every document mirroring that table
//! - [`SyncEngine::refresh`]: overwrite one document from the external table

use std::fmt;
use std::sync::Arc;

use super::adapter::{DocumentTables, RecordTables, TableAdapter};
use super::fanout::{fan_out, FanOutReport, SiblingDispatcher};
use super::loop_guard::LoopGuard;
use super::notifier::ChangeNotifier;
use super::reconcile::PushSummary;
use crate::config::Config;
use crate::db::ConnectionRegistry;
use crate::error::SyncError;
use crate::models::{Connection, Subscription, Table};
use crate::stores::google::document_id_from_resource_uri;
use crate::stores::{DocumentStore, RecordStore};

/// Where a unit of work currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Connecting,
    Watching,
    ProcessingNotification,
    Propagating,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Connecting => "connecting",
            SyncPhase::Watching => "watching",
            SyncPhase::ProcessingNotification => "processing_notification",
            SyncPhase::Propagating => "propagating",
        };
        write!(f, "{}", name)
    }
}

/// A change notification as delivered to the webhook.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    /// Locator of the changed resource, e.g. `.../drive/v3/files/<id>?alt=json`
    pub resource_uri: Option<String>,
    /// `sync` for the handshake sent when a channel opens
    pub resource_state: Option<String>,
    pub channel_id: Option<String>,
}

impl Notification {
    pub fn for_resource(uri: impl Into<String>) -> Self {
        Self {
            resource_uri: Some(uri.into()),
            resource_state: Some("update".to_string()),
            channel_id: None,
        }
    }

    /// True for the handshake message that carries no change.
    pub fn is_handshake(&self) -> bool {
        self.resource_state.as_deref() == Some("sync")
    }

    pub fn document_id(&self) -> Result<String, SyncError> {
        let uri = self
            .resource_uri
            .as_deref()
            .ok_or_else(|| SyncError::InvalidNotification("missing resource URI".into()))?;
        document_id_from_resource_uri(uri).ok_or_else(|| {
            SyncError::InvalidNotification(format!("no document id in '{}'", uri))
        })
    }
}

/// What handling a notification did.
#[derive(Debug)]
pub enum NotificationOutcome {
    /// Channel handshake; nothing to do.
    Acknowledged,
    /// The change was our own write; nothing was sent anywhere.
    SelfOriginated { document_id: String },
    /// The change was pushed and siblings were refreshed.
    Propagated {
        document_id: String,
        pushed: PushSummary,
        fan_out: FanOutReport,
    },
}

/// Fan-out behavior.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub fanout_concurrency: usize,
    /// Refresh the document that changed along with its siblings.
    pub fanout_include_origin: bool,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fanout_concurrency: config.fanout_concurrency,
            fanout_include_origin: config.fanout_include_origin,
        }
    }
}

/// Everything the engine talks to.
pub struct Collaborators {
    pub document_store: Arc<dyn DocumentStore>,
    pub record_store: Arc<dyn RecordStore>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub notifier: Arc<ChangeNotifier>,
    pub dispatcher: Arc<dyn SiblingDispatcher>,
}

pub struct SyncEngine {
    documents: DocumentTables,
    records: RecordTables,
    registry: Arc<dyn ConnectionRegistry>,
    notifier: Arc<ChangeNotifier>,
    guard: LoopGuard,
    dispatcher: Arc<dyn SiblingDispatcher>,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(collaborators: Collaborators, config: &Config) -> Self {
        let Collaborators {
            document_store,
            record_store,
            registry,
            notifier,
            dispatcher,
        } = collaborators;

        Self {
            documents: DocumentTables::new(document_store.clone()),
            records: RecordTables::new(record_store, config.airtable_max_records),
            guard: LoopGuard::new(document_store, config.service_identity.clone()),
            registry,
            notifier,
            dispatcher,
            options: EngineOptions::from_config(config),
        }
    }

    /// Registers the document, fills it from the external table and starts
    /// watching it.
    ///
    /// The connection is saved first and stays saved if a later step fails;
    /// connecting again overwrites it.
    #[tracing::instrument(skip_all, fields(document_id = %connection.document_id))]
    pub async fn connect(&self, connection: Connection) -> Result<Subscription, SyncError> {
        enter(&connection.document_id, SyncPhase::Connecting);

        self.registry.save(&connection).await?;
        let table = self.pull_into_document(&connection).await?;
        let subscription = self
            .notifier
            .subscribe(&connection.document_id, self.notifier.callback_address())
            .await?;

        enter(&connection.document_id, SyncPhase::Watching);
        tracing::info!(
            table_id = %connection.table_id,
            rows = table.rows().len(),
            "Connected document"
        );
        Ok(subscription)
    }

    /// Pushes a changed document into the external table, then refreshes
    /// every document mirroring that table.
    ///
    /// Sibling failures are reported in the outcome and do not fail the call.
    #[tracing::instrument(skip_all, fields(channel_id = ?notification.channel_id))]
    pub async fn handle_notification(
        &self,
        notification: &Notification,
    ) -> Result<NotificationOutcome, SyncError> {
        if notification.is_handshake() {
            tracing::debug!("Channel handshake received");
            return Ok(NotificationOutcome::Acknowledged);
        }

        let document_id = notification.document_id()?;
        enter(&document_id, SyncPhase::ProcessingNotification);

        if self.guard.is_self_originated(&document_id).await? {
            tracing::info!(%document_id, "Ignoring change made by this service");
            enter(&document_id, SyncPhase::Idle);
            return Ok(NotificationOutcome::SelfOriginated { document_id });
        }

        let connection = self
            .registry
            .find_by_document(&document_id)
            .await?
            .ok_or_else(|| SyncError::RegistryLookupMiss(document_id.clone()))?;

        let table = self.documents.fetch(&connection.document_locator()).await?;
        let pushed = self
            .records
            .push(&connection.store_locator(), &table)
            .await?;
        tracing::info!(
            %document_id,
            table_id = %connection.table_id,
            updated = pushed.updated,
            created = pushed.created,
            "Pushed document into external table"
        );

        let fan_out = self.propagate(&connection).await?;
        Ok(NotificationOutcome::Propagated {
            document_id,
            pushed,
            fan_out,
        })
    }

    /// Overwrites one document from the external table, with no loop guard.
    #[tracing::instrument(skip_all, fields(document_id = %connection.document_id))]
    pub async fn refresh(&self, connection: &Connection) -> Result<(), SyncError> {
        enter(&connection.document_id, SyncPhase::Propagating);
        self.pull_into_document(connection).await?;
        enter(&connection.document_id, SyncPhase::Idle);
        Ok(())
    }

    /// Stops watching the document and forgets its connection.
    pub async fn disconnect(&self, document_id: &str) -> Result<bool, SyncError> {
        self.notifier.unsubscribe(document_id).await?;
        self.registry.remove(document_id).await
    }

    async fn propagate(&self, origin: &Connection) -> Result<FanOutReport, SyncError> {
        enter(&origin.document_id, SyncPhase::Propagating);

        let mut siblings = self.registry.find_siblings(&origin.table_id).await?;
        if !self.options.fanout_include_origin {
            siblings.retain(|s| s.document_id != origin.document_id);
        }

        let report = fan_out(
            self.dispatcher.as_ref(),
            siblings,
            self.options.fanout_concurrency,
        )
        .await;

        if report.is_complete() {
            tracing::info!(refreshed = report.attempted.len(), "Refreshed siblings");
        } else {
            tracing::warn!(
                refreshed = report.succeeded(),
                failed = report.failures.len(),
                "Some siblings could not be refreshed"
            );
        }
        enter(&origin.document_id, SyncPhase::Idle);
        Ok(report)
    }

    async fn pull_into_document(&self, connection: &Connection) -> Result<Table, SyncError> {
        let table = self.records.fetch(&connection.store_locator()).await?;
        self.documents
            .replace(&connection.document_locator(), &table)
            .await?;
        Ok(table)
    }
}

fn enter(document_id: &str, phase: SyncPhase) {
    tracing::debug!(document_id, %phase, "Sync phase");
}
