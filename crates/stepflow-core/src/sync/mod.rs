//! Status synchronizer - one coherent, live view per watched workflow.
//!
//! Each observer owns a [`StatusSynchronizer`]. It subscribes to the
//! notification channel, folds every event for an attached workflow into a
//! [`SyncState`], and reconciles against store snapshots:
//!
//! - on `attach` (late joiners start from the latest snapshot),
//! - after every workflow-scoped event (catches step events it missed),
//! - after the subscription lagged (events were dropped for it).
//!
//! Snapshot refreshes are debounced: triggers that arrive within
//! `SyncConfig::debounce` of the first one coalesce into a single store
//! fetch per workflow. Every change to a view bumps a revision counter that
//! observers can await through [`StatusSynchronizer::changes`].

pub mod merge;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::EngineError;
use crate::events::{NotificationChannel, Received, Subscription};
use crate::models::workflow::Workflow;
use crate::store::WorkflowStore;

pub use merge::{StepView, SyncState, WorkflowView};

/// Where the synchronizer fetches authoritative snapshots from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, workflow_id: &str) -> Result<Option<Workflow>, EngineError>;
}

#[async_trait]
impl SnapshotSource for WorkflowStore {
    async fn snapshot(&self, workflow_id: &str) -> Result<Option<Workflow>, EngineError> {
        self.get(workflow_id).await
    }
}

struct Shared {
    state: Mutex<SyncState>,
    watched: Mutex<HashSet<String>>,
    source: Arc<dyn SnapshotSource>,
    revision: watch::Sender<u64>,
    fetches: AtomicU64,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn watched(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.watched.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_watched(&self, workflow_id: &str) -> bool {
        self.watched().contains(workflow_id)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    async fn refresh(&self, workflow_id: &str) -> Result<(), EngineError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.source.snapshot(workflow_id).await?;
        let changed = match snapshot {
            Some(workflow) => self.state().apply_snapshot(&workflow),
            None => self.state().forget(workflow_id),
        };
        if changed {
            self.bump();
        }
        Ok(())
    }
}

/// Live view of one or more workflows for a single observer.
pub struct StatusSynchronizer {
    shared: Arc<Shared>,
    refresh_tx: mpsc::UnboundedSender<String>,
    listener: JoinHandle<()>,
    refresher: JoinHandle<()>,
}

impl StatusSynchronizer {
    /// Subscribe to `channel` and start the background listener and refresher.
    pub fn start(
        channel: &NotificationChannel,
        source: Arc<dyn SnapshotSource>,
        config: SyncConfig,
    ) -> Result<Self, EngineError> {
        let subscription = channel
            .subscribe("status-synchronizer")
            .ok_or_else(|| EngineError::Internal("Notification channel is closed".to_string()))?;

        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(SyncState::new()),
            watched: Mutex::new(HashSet::new()),
            source,
            revision,
            fetches: AtomicU64::new(0),
        });
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        let listener = tokio::spawn(listen(shared.clone(), subscription, refresh_tx.clone()));
        let refresher = tokio::spawn(refresh_loop(shared.clone(), refresh_rx, config));

        Ok(Self {
            shared,
            refresh_tx,
            listener,
            refresher,
        })
    }

    /// Start watching `workflow_id` and load its latest snapshot right away.
    ///
    /// Returns `None` if the workflow does not exist.
    pub async fn attach(&self, workflow_id: &str) -> Result<Option<WorkflowView>, EngineError> {
        self.shared.watched().insert(workflow_id.to_string());
        self.shared.refresh(workflow_id).await?;
        tracing::debug!("[Sync] Attached to workflow {}", workflow_id);
        Ok(self.view(workflow_id))
    }

    pub fn detach(&self, workflow_id: &str) {
        self.shared.watched().remove(workflow_id);
        if self.shared.state().forget(workflow_id) {
            self.shared.bump();
        }
    }

    pub fn view(&self, workflow_id: &str) -> Option<WorkflowView> {
        self.shared.state().view(workflow_id).cloned()
    }

    /// Revision counter bumped on every view change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Schedule a debounced snapshot refresh.
    pub fn request_refresh(&self, workflow_id: &str) {
        let _ = self.refresh_tx.send(workflow_id.to_string());
    }

    /// Number of snapshot fetches performed so far.
    pub fn fetch_count(&self) -> u64 {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    /// Wait until the view of `workflow_id` shows run `run_id` (or a later
    /// one) in a terminal status, and return that view.
    pub async fn wait_for_terminal(
        &self,
        workflow_id: &str,
        run_id: u64,
    ) -> Result<WorkflowView, EngineError> {
        let mut changes = self.changes();
        loop {
            match self.view(workflow_id) {
                Some(view) if view.run_id >= run_id && view.is_terminal() => return Ok(view),
                Some(_) => {}
                None if self.shared.is_watched(workflow_id) => {
                    return Err(EngineError::NotFound(format!(
                        "Workflow {} no longer exists",
                        workflow_id
                    )))
                }
                None => {
                    return Err(EngineError::BadRequest(format!(
                        "Workflow {} is not attached",
                        workflow_id
                    )))
                }
            }
            if changes.changed().await.is_err() {
                return Err(EngineError::Internal("Synchronizer stopped".to_string()));
            }
        }
    }

    /// Unsubscribe from the channel and stop the background tasks.
    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for StatusSynchronizer {
    fn drop(&mut self) {
        self.listener.abort();
        self.refresher.abort();
    }
}

async fn listen(
    shared: Arc<Shared>,
    mut subscription: Subscription,
    refresh_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        match subscription.recv().await {
            Received::Event(event) => {
                if !shared.is_watched(&event.workflow_id) {
                    continue;
                }
                let (changed, had_view) = {
                    let mut state = shared.state();
                    let had_view = state.contains(&event.workflow_id);
                    (state.apply_event(&event), had_view)
                };
                if changed {
                    shared.bump();
                }
                if event.is_workflow_scoped() || !had_view {
                    let _ = refresh_tx.send(event.workflow_id);
                }
            }
            Received::Lagged(missed) => {
                tracing::warn!(
                    "[Sync] Missed {} event(s); refreshing every attached workflow",
                    missed
                );
                let watched: Vec<String> = shared.watched().iter().cloned().collect();
                for workflow_id in watched {
                    let _ = refresh_tx.send(workflow_id);
                }
            }
            Received::Closed => {
                tracing::info!("[Sync] Notification channel closed; listener stopping");
                break;
            }
        }
    }
}

async fn refresh_loop(
    shared: Arc<Shared>,
    mut refresh_rx: mpsc::UnboundedReceiver<String>,
    config: SyncConfig,
) {
    let mut pending: HashSet<String> = HashSet::new();
    while let Some(first) = refresh_rx.recv().await {
        pending.insert(first);

        let deadline = tokio::time::Instant::now() + config.debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                next = refresh_rx.recv() => match next {
                    Some(workflow_id) => {
                        pending.insert(workflow_id);
                    }
                    None => break,
                },
            }
        }

        for workflow_id in pending.drain() {
            if !shared.is_watched(&workflow_id) {
                continue;
            }
            if let Err(e) = shared.refresh(&workflow_id).await {
                tracing::warn!("[Sync] Snapshot refresh for {} failed: {}", workflow_id, e);
            }
        }
    }
}
