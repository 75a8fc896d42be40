//! Feedback-loop suppression.
//!
//! Every write this service makes to a document fires the document's change
//! watch again. Notifications whose latest revision was authored by the
//! service itself are dropped here.

use std::sync::Arc;

use crate::error::SyncError;
use crate::stores::{DocumentStore, Revision};

pub struct LoopGuard {
    store: Arc<dyn DocumentStore>,
    /// Email this service writes documents as. Empty to rely on the `me` flag.
    identity: String,
}

impl LoopGuard {
    pub fn new(store: Arc<dyn DocumentStore>, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
        }
    }

    /// True iff the latest revision of the document was made by this service.
    ///
    /// Histories with fewer than two revisions are never self-originated.
    pub async fn is_self_originated(&self, document_id: &str) -> Result<bool, SyncError> {
        let revisions = self
            .store
            .list_revisions(document_id)
            .await
            .map_err(|e| SyncError::HistoryUnavailable {
                document_id: document_id.to_string(),
                reason: e.to_string(),
            })?;

        if revisions.len() < 2 {
            tracing::debug!(
                document_id,
                revisions = revisions.len(),
                "Short revision history, treating as external edit"
            );
            return Ok(false);
        }

        Ok(revisions
            .last()
            .is_some_and(|latest| self.authored_by_self(latest)))
    }

    fn authored_by_self(&self, revision: &Revision) -> bool {
        let Some(author) = &revision.author else {
            return false;
        };
        if author.me {
            return true;
        }
        !self.identity.is_empty()
            && author
                .email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(&self.identity))
    }
}
