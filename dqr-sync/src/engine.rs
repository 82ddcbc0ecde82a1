//! Review engine
//!
//! Single entry point for a front end: owns the store, filter view,
//! mutation coordinator, sync orchestrator and push-channel listener and
//! wires them together.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use dqr_common::config::ClientConfig;
use dqr_common::events::{EventBus, ReviewEvent};
use dqr_common::{FileRecord, QueueName};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::{MutationCoordinator, PendingMutation};
use crate::error::{Error, Result};
use crate::filter::{FilterPredicate, FilterView};
use crate::http::HttpAuthority;
use crate::listener::{ChangeListener, ReconnectPolicy};
use crate::orchestrator::{RefreshReport, SyncOrchestrator, SyncStatus};
use crate::remote::{ChangeFeed, RemoteAuthority};
use crate::store::RecordStore;

pub struct ReviewEngine {
    store: Arc<RecordStore>,
    view: FilterView,
    coordinator: Arc<MutationCoordinator>,
    orchestrator: Arc<SyncOrchestrator>,
    feed: Option<(Arc<dyn ChangeFeed>, ReconnectPolicy)>,
    /// Present when built from config; needed for uploads
    http: Option<Arc<HttpAuthority>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReviewEngine {
    /// Engine acting as `identity` against `authority`, without a push channel
    pub fn new(authority: Arc<dyn RemoteAuthority>, identity: impl Into<String>) -> Self {
        let store = Arc::new(RecordStore::new(EventBus::default()));
        let coordinator = Arc::new(MutationCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&authority),
            identity,
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&store),
            authority,
            Arc::clone(&coordinator),
        ));

        Self {
            view: FilterView::new(Arc::clone(&store)),
            store,
            coordinator,
            orchestrator,
            feed: None,
            http: None,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Listen on `feed` for invalidation signals once started
    pub fn with_change_feed(mut self, feed: Arc<dyn ChangeFeed>, policy: ReconnectPolicy) -> Self {
        self.feed = Some((feed, policy));
        self
    }

    /// HTTP-backed engine using the resolved client configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let http = Arc::new(HttpAuthority::new(config)?);

        let mut engine = Self::new(
            Arc::clone(&http) as Arc<dyn RemoteAuthority>,
            config.identity.clone(),
        )
        .with_change_feed(
            Arc::clone(&http) as Arc<dyn ChangeFeed>,
            ReconnectPolicy::from_config(config),
        );
        engine.http = Some(http);
        Ok(engine)
    }

    /// Initial load of all queues, then background refresh worker and listener
    pub async fn start(&self) -> RefreshReport {
        let report = self.refresh().await;

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            tasks.push(tokio::spawn(
                Arc::clone(&self.orchestrator).run_refresh_worker(self.cancel.clone()),
            ));

            if let Some((feed, policy)) = &self.feed {
                let listener = ChangeListener::new(
                    Arc::clone(feed),
                    Arc::clone(&self.orchestrator),
                    self.store.events().clone(),
                    *policy,
                )
                .after_initial_load();
                tasks.push(listener.spawn(self.cancel.clone()));
            }

            info!(
                identity = %self.coordinator.identity(),
                listening = self.feed.is_some(),
                "Review engine started"
            );
        }

        report
    }

    /// Stop the listener and refresh worker and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        info!("Review engine stopped");
    }

    /// Full resync of all queues
    pub async fn refresh(&self) -> RefreshReport {
        let report = self.orchestrator.refresh_all().await;
        self.coordinator.prune_superseded();
        report
    }

    /// Ask the background worker for a resync without waiting on it
    pub fn request_refresh(&self) {
        self.orchestrator.request_refresh();
    }

    /// Post-filter records of `queue`, in order
    pub fn visible(&self, queue: QueueName) -> Arc<[FileRecord]> {
        self.view.visible(queue)
    }

    pub fn status(&self, queue: QueueName) -> SyncStatus {
        self.orchestrator.status(queue)
    }

    pub async fn approve(&self, object_id: &str) -> Result<()> {
        self.coordinator.approve(object_id).await
    }

    pub async fn reject(&self, object_id: &str, feedback: &str) -> Result<()> {
        self.coordinator.reject(object_id, feedback).await
    }

    pub fn set_filter(&self, project: &str, uploader: &str) {
        self.view.set_filter(project, uploader);
    }

    pub fn filter(&self) -> FilterPredicate {
        self.view.predicate()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.store.events().subscribe()
    }

    /// Unfiltered record counts in `QueueName::ALL` order
    pub fn counts(&self) -> [usize; 3] {
        self.store.counts()
    }

    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.coordinator.pending_mutations()
    }

    pub fn identity(&self) -> &str {
        self.coordinator.identity()
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Upload a file as the engine's identity
    pub async fn upload(&self, path: &Path, project_id: &str) -> Result<serde_json::Value> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(Error::Validation("project id is required to upload".to_string()));
        }

        let http = self
            .http
            .as_ref()
            .ok_or_else(|| Error::Validation("upload needs an HTTP-backed engine".to_string()))?;
        http.upload(path, project_id, self.coordinator.identity()).await
    }
}

impl Drop for ReviewEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
