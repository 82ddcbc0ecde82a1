//! Mutation coordinator
//!
//! Runs approve/reject: validates, applies the optimistic move, calls the
//! remote authority as the configured reviewer, and on failure reverts
//! unless a newer authoritative snapshot has already placed the record.
//! Failed calls are never retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dqr_common::events::ReviewEvent;
use dqr_common::{FileRecord, QueueName, RecordPatch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::RemoteAuthority;
use crate::store::{RecordStore, RevertOutcome};

/// Review decision on a pending record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    /// Queue the record lands in when the action succeeds
    pub fn target(self) -> QueueName {
        match self {
            ReviewAction::Approve => QueueName::Approved,
            ReviewAction::Reject => QueueName::Rejected,
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewAction::Approve => write!(f, "Approve"),
            ReviewAction::Reject => write!(f, "Reject"),
        }
    }
}

/// An optimistic action whose remote result is not yet known
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub mutation_id: Uuid,
    pub object_id: String,
    pub action: ReviewAction,
    pub origin: QueueName,
    pub target: QueueName,
    /// Record as it was in `origin`
    pub previous: FileRecord,
    pub submitted_at: DateTime<Utc>,
}

/// Executes review actions against the store and the remote authority
pub struct MutationCoordinator {
    store: Arc<RecordStore>,
    authority: Arc<dyn RemoteAuthority>,
    /// Reviewer the remote calls are attributed to
    identity: String,
    in_flight: Mutex<HashMap<String, PendingMutation>>,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        authority: Arc<dyn RemoteAuthority>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            store,
            authority,
            identity: identity.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Approve a pending record
    pub async fn approve(&self, object_id: &str) -> Result<()> {
        self.submit(object_id, ReviewAction::Approve, RecordPatch::approved())
            .await
    }

    /// Reject a pending record with reviewer feedback
    ///
    /// Blank feedback fails validation before any state change or network call.
    pub async fn reject(&self, object_id: &str, feedback: &str) -> Result<()> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(Error::Validation(format!(
                "feedback is required to reject {}",
                object_id
            )));
        }

        self.submit(object_id, ReviewAction::Reject, RecordPatch::rejected(feedback))
            .await
    }

    async fn submit(&self, object_id: &str, action: ReviewAction, patch: RecordPatch) -> Result<()> {
        let origin = QueueName::Pending;
        let target = action.target();
        let mutation_id = Uuid::new_v4();

        // Fails with StaleTarget (no state change) if the record already left pending
        let optimistic = self
            .store
            .begin_optimistic(mutation_id, object_id, origin, target, &patch)?;

        let tick = optimistic.tick;
        let mutation = PendingMutation {
            mutation_id,
            object_id: object_id.to_string(),
            action,
            origin,
            target,
            previous: optimistic.previous,
            submitted_at: Utc::now(),
        };
        self.lock().insert(object_id.to_string(), mutation);

        info!(
            mutation_id = %mutation_id,
            object_id = %object_id,
            action = %action,
            tick,
            "Optimistic move applied, calling remote"
        );

        let result = match action {
            ReviewAction::Approve => self.authority.approve(object_id, &self.identity).await,
            ReviewAction::Reject => {
                let feedback = patch.feedback.as_deref().unwrap_or_default();
                self.authority
                    .reject(object_id, &self.identity, feedback)
                    .await
            }
        };

        self.forget(object_id, mutation_id);

        match result {
            Ok(()) => {
                self.store.confirm_optimistic(object_id, mutation_id);
                debug!(mutation_id = %mutation_id, object_id = %object_id, "Remote confirmed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                match self.store.revert_optimistic(object_id, mutation_id) {
                    RevertOutcome::Reverted => {
                        warn!(
                            mutation_id = %mutation_id,
                            object_id = %object_id,
                            error = %message,
                            "{} failed, reverted to {}",
                            action,
                            origin
                        );
                        self.store.events().emit_lossy(ReviewEvent::MutationReverted {
                            mutation_id,
                            object_id: object_id.to_string(),
                            error: message.clone(),
                            timestamp: Utc::now(),
                        });
                    }
                    RevertOutcome::Superseded => {
                        warn!(
                            mutation_id = %mutation_id,
                            object_id = %object_id,
                            error = %message,
                            "{} failed after a newer snapshot placed the record; keeping snapshot",
                            action
                        );
                    }
                    RevertOutcome::Missing => {
                        debug!(
                            mutation_id = %mutation_id,
                            object_id = %object_id,
                            "Record left {} before revert",
                            target
                        );
                    }
                }

                Err(Error::MutationFailure {
                    action,
                    object_id: object_id.to_string(),
                    message,
                })
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingMutation>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, object_id: &str, mutation_id: Uuid) {
        let mut in_flight = self.lock();
        if in_flight
            .get(object_id)
            .map(|m| m.mutation_id == mutation_id)
            .unwrap_or(false)
        {
            in_flight.remove(object_id);
        }
    }

    /// Drop in-flight entries a newer snapshot has already overridden
    pub fn prune_superseded(&self) -> usize {
        let mut in_flight = self.lock();
        let before = in_flight.len();
        in_flight.retain(|object_id, m| self.store.is_guarded(object_id, m.mutation_id));
        let pruned = before - in_flight.len();
        if pruned > 0 {
            debug!(pruned, "Pruned superseded mutations");
        }
        pruned
    }

    /// Outstanding mutations that no snapshot has superseded
    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.prune_superseded();
        let mut pending: Vec<PendingMutation> = self.lock().values().cloned().collect();
        pending.sort_by_key(|m| m.submitted_at);
        pending
    }
}
