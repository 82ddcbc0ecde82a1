//! Sync orchestrator
//!
//! Loads the three queues from the remote authority and feeds the snapshots
//! into the store. Every fetch is stamped with a request token drawn from
//! the store's ordering clock; per queue, a response is applied only if it
//! is newer than every response already resolved, success or failure, so an
//! older in-flight response that lands late is discarded instead of
//! overwriting the result of the most recently issued refresh.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dqr_common::events::ReviewEvent;
use dqr_common::QueueName;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::MutationCoordinator;
use crate::error::Error;
use crate::remote::RemoteAuthority;
use crate::store::RecordStore;

/// Load state of one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub loading: bool,
    pub error: Option<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct QueueSync {
    status: SyncStatus,
    /// Token of the most recently issued fetch
    latest_issued: u64,
    /// Token of the newest response handled, whether applied or failed
    latest_resolved: u64,
}

/// Outcome of one queue fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueRefresh {
    Applied { record_count: usize },
    Failed(String),
    /// A newer request already settled this queue
    Discarded,
}

/// Per-queue outcomes of `refresh_all`
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub applied: Vec<QueueName>,
    pub failed: Vec<(QueueName, String)>,
    pub discarded: Vec<QueueName>,
}

impl RefreshReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct SyncOrchestrator {
    store: Arc<RecordStore>,
    authority: Arc<dyn RemoteAuthority>,
    coordinator: Arc<MutationCoordinator>,
    queues: Mutex<[QueueSync; 3]>,
    wake: Notify,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<RecordStore>,
        authority: Arc<dyn RemoteAuthority>,
        coordinator: Arc<MutationCoordinator>,
    ) -> Self {
        Self {
            store,
            authority,
            coordinator,
            queues: Mutex::new(Default::default()),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [QueueSync; 3]> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, queue: QueueName) -> SyncStatus {
        self.lock()[queue.index()].status.clone()
    }

    /// Statuses in `QueueName::ALL` order
    pub fn statuses(&self) -> [SyncStatus; 3] {
        let queues = self.lock();
        QueueName::ALL.map(|q| queues[q.index()].status.clone())
    }

    /// Fetch all three queues concurrently
    ///
    /// A failing queue is recorded in its own status only; the other queues
    /// still update and the call itself never fails.
    pub async fn refresh_all(&self) -> RefreshReport {
        let outcomes = join_all(
            QueueName::ALL
                .into_iter()
                .map(|queue| async move { (queue, self.refresh_queue(queue).await) }),
        )
        .await;

        let mut report = RefreshReport::default();
        for (queue, outcome) in outcomes {
            match outcome {
                QueueRefresh::Applied { .. } => report.applied.push(queue),
                QueueRefresh::Failed(message) => report.failed.push((queue, message)),
                QueueRefresh::Discarded => report.discarded.push(queue),
            }
        }

        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            discarded = report.discarded.len(),
            "Refresh complete"
        );
        report
    }

    /// Fetch one queue and apply the result if it is still the newest
    pub async fn refresh_queue(&self, queue: QueueName) -> QueueRefresh {
        let ticket = self.store.issue_fetch();
        let token = ticket.tick();
        {
            let mut queues = self.lock();
            let slot = &mut queues[queue.index()];
            slot.latest_issued = slot.latest_issued.max(token);
            slot.status.loading = true;
        }

        debug!(queue = %queue, token, "Fetching queue");
        let result = self.authority.fetch_queue(queue).await;

        match result {
            Ok(records) => {
                let mut queues = self.lock();
                let slot = &mut queues[queue.index()];

                if token <= slot.latest_resolved {
                    debug!(
                        queue = %queue,
                        token,
                        latest_resolved = slot.latest_resolved,
                        "Discarding out-of-order snapshot"
                    );
                    return QueueRefresh::Discarded;
                }

                // Applied under the sync lock so two responses cannot reorder
                // between the token check and the swap
                let replacement = self.store.replace_queue_issued(queue, records, token);
                slot.latest_resolved = token;
                slot.status.error = None;
                slot.status.last_synced = Some(Utc::now());
                if token == slot.latest_issued {
                    slot.status.loading = false;
                }
                drop(queues);

                if !replacement.superseded.is_empty() {
                    debug!(
                        queue = %queue,
                        superseded = replacement.superseded.len(),
                        "Snapshot overrode optimistic moves"
                    );
                    self.coordinator.prune_superseded();
                }

                QueueRefresh::Applied {
                    record_count: replacement.record_count,
                }
            }
            Err(e) => {
                let mut queues = self.lock();
                let slot = &mut queues[queue.index()];

                if token <= slot.latest_resolved {
                    debug!(queue = %queue, token, error = %e, "Ignoring failure of out-of-order fetch");
                    return QueueRefresh::Discarded;
                }
                slot.latest_resolved = token;
                // A newer request is still outstanding and will settle the queue
                if token != slot.latest_issued {
                    debug!(queue = %queue, token, error = %e, "Ignoring failure of superseded fetch");
                    return QueueRefresh::Discarded;
                }

                let failure = Error::FetchFailure {
                    queue,
                    message: e.to_string(),
                };
                let message = failure.to_string();
                slot.status.loading = false;
                slot.status.error = Some(message.clone());
                drop(queues);

                warn!(queue = %queue, error = %message, "Queue fetch failed");
                self.store.events().emit_lossy(ReviewEvent::SyncFailed {
                    queue,
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                QueueRefresh::Failed(message)
            }
        }
    }

    /// Ask the refresh worker for a full resync
    ///
    /// Requests made while a refresh is running collapse into one follow-up.
    pub fn request_refresh(&self) {
        self.wake.notify_one();
    }

    /// Drain refresh requests until `cancel` fires
    pub async fn run_refresh_worker(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Refresh worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {
                    let report = self.refresh_all().await;
                    if report.has_failures() {
                        debug!(failed = report.failed.len(), "Requested refresh had failures");
                    }
                }
            }
        }
        debug!("Refresh worker stopped");
    }
}
