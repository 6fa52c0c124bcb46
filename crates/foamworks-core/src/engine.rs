//! The main entry point wiring the offline-resilience pieces together.
//!
//! `DataEngine` owns the offline queue, the staged loader, the realtime
//! subscription, and the network monitor. It is constructed at app-session
//! start and shut down at sign-out; nothing in this crate lives in module
//! globals.
//!
//! Control flow: `start` kicks off a background load immediately so the UI
//! can render with whatever state exists. User writes apply optimistically
//! to local state, then either submit in the background (online) or land in
//! the durable queue (offline). While a write settles, its entity id sits
//! in the suppression set so the realtime echo of our own write does not
//! flicker the UI.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, Notice};
use crate::loader::{LoadOutcome, StagedLoader};
use crate::monitor::{drain_queue, DrainReport, NetworkMonitor};
use crate::queue::OfflineQueue;
use crate::reconcile::{RealtimeSubscription, SuppressionSet};
use crate::remote::{PushReceiver, RemoteStore};
use crate::retry::with_retry;
use crate::state::AppState;
use crate::types::{
    AppSettings, Collection, Customer, Estimate, InventoryItem, OperationKind, QueueStatus,
};

/// Offline-first data engine for the application session.
pub struct DataEngine {
    config: EngineConfig,
    state: AppState,
    queue: OfflineQueue,
    store: Arc<dyn RemoteStore>,
    suppression: SuppressionSet,
    loader: Arc<StagedLoader>,
    subscription: RealtimeSubscription,
    monitor: NetworkMonitor,
    connectivity: watch::Receiver<bool>,
    event_tx: broadcast::Sender<EngineEvent>,
    /// Background submissions and refreshes, tracked so teardown and tests
    /// can await them instead of firing-and-forgetting
    tasks: TaskTracker,
}

impl DataEngine {
    /// Create a new engine.
    ///
    /// `data_dir` holds the durable queue database; `connectivity` carries
    /// the host's online/offline signal, seeded with the current state.
    pub fn new(
        data_dir: impl AsRef<Path>,
        store: Arc<dyn RemoteStore>,
        connectivity: watch::Receiver<bool>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let data_dir = data_dir.as_ref();
        info!(?data_dir, "Initializing data engine");

        let queue = OfflineQueue::open(data_dir.join("offline_queue.redb"))?;
        let state = AppState::new();
        let suppression = SuppressionSet::new();
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        let loader = Arc::new(StagedLoader::new(
            store.clone(),
            state.clone(),
            config.retry,
            event_tx.clone(),
        ));
        let subscription =
            RealtimeSubscription::new(state.clone(), suppression.clone(), event_tx.clone());
        let monitor = NetworkMonitor::new(
            queue.clone(),
            store.clone(),
            loader.clone(),
            config.clone(),
            event_tx.clone(),
        );

        Ok(Self {
            config,
            state,
            queue,
            store,
            suppression,
            loader,
            subscription,
            monitor,
            connectivity,
            event_tx,
            tasks: TaskTracker::new(),
        })
    }

    /// Begin background operation: the initial staged load, the realtime
    /// subscription, and connectivity monitoring.
    ///
    /// Returns immediately; the UI renders with current (possibly empty)
    /// state while data arrives.
    pub fn start(&self, push_rx: PushReceiver) {
        self.subscription.start(push_rx);
        self.monitor.start(self.connectivity.clone());
        self.refresh_now();
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshots
    // ═══════════════════════════════════════════════════════════════════════

    pub fn customers(&self) -> Vec<Customer> {
        self.state.customers()
    }

    pub fn estimates(&self) -> Vec<Estimate> {
        self.state.estimates()
    }

    pub fn inventory(&self) -> Vec<InventoryItem> {
        self.state.inventory()
    }

    pub fn settings(&self) -> AppSettings {
        self.state.settings()
    }

    pub fn initial_load_complete(&self) -> bool {
        self.state.initial_load_complete()
    }

    pub fn background_sync(&self) -> bool {
        self.state.background_sync()
    }

    pub fn load_error(&self) -> Option<String> {
        self.state.load_error()
    }

    /// Pending-queue indicator. Storage trouble reads as an empty queue;
    /// the failure is logged rather than surfaced.
    pub fn queue_status(&self) -> QueueStatus {
        match self.queue.status() {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "Could not read queue status");
                QueueStatus::default()
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Imperative triggers
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one staged load cycle and wait for it to settle.
    pub async fn refresh(&self) -> LoadOutcome {
        self.loader.run_cycle().await
    }

    /// Trigger a staged load cycle in the background.
    pub fn refresh_now(&self) {
        let loader = self.loader.clone();
        self.tasks.spawn(async move {
            loader.run_cycle().await;
        });
    }

    /// Replay all queued operations now, without waiting for a
    /// connectivity transition.
    pub async fn drain_queue_now(&self) -> DrainReport {
        let report = drain_queue(&self.queue, &self.store, &self.config).await;
        let _ = self.event_tx.send(EngineEvent::QueueDrained {
            succeeded: report.succeeded,
            failed: report.failed,
        });
        report
    }

    /// Save or delete an entity.
    ///
    /// The local state update is applied synchronously before returning, so
    /// the UI never shows the write as pending. The remote submission (or
    /// queueing, when offline) happens in a tracked background task.
    ///
    /// For saves the payload is the entity document and must carry an
    /// `id`; for deletes it is the entity id as a JSON string.
    pub fn submit(
        &self,
        kind: OperationKind,
        collection: Collection,
        payload: Value,
    ) -> EngineResult<()> {
        let entity_id = entity_id_of(kind, &payload)?;

        // Optimistic update first
        match kind {
            OperationKind::Save => self.state.apply_saved(collection, payload.clone())?,
            OperationKind::Delete => self.state.apply_removed(collection, &entity_id),
        }
        let _ = self
            .event_tx
            .send(EngineEvent::CollectionUpdated { collection });

        // Shield against the realtime echo until the sync settles
        self.suppression.suppress(entity_id.clone());

        if self.is_online() {
            self.spawn_submission(kind, collection, payload, entity_id);
        } else {
            debug!(%collection, ?kind, "Offline; queueing operation");
            if let Err(err) = self.queue.enqueue(kind, collection, payload) {
                // Accepted degradation: the write is lost, the app goes on
                warn!(error = %err, "Could not queue offline operation");
            }
            self.release_after_grace(entity_id);
        }
        Ok(())
    }

    fn spawn_submission(
        &self,
        kind: OperationKind,
        collection: Collection,
        payload: Value,
        entity_id: String,
    ) {
        let store = self.store.clone();
        let state = self.state.clone();
        let queue = self.queue.clone();
        let suppression = self.suppression.clone();
        let event_tx = self.event_tx.clone();
        let config = self.config.clone();

        self.tasks.spawn(async move {
            let result = match kind {
                OperationKind::Save => {
                    with_retry(|| store.save(collection, payload.clone()), &config.retry)
                        .await
                        .map(|saved| {
                            // Merge the server's version (ids/timestamps it set)
                            if let Err(err) = state.apply_saved(collection, saved) {
                                warn!(error = %err, "Could not merge saved entity");
                            }
                        })
                }
                OperationKind::Delete => {
                    with_retry(|| store.delete(collection, &entity_id), &config.retry).await
                }
            };

            if let Err(err) = result {
                warn!(%collection, ?kind, error = %err, "Submission failed; queueing for replay");
                let _ = event_tx.send(EngineEvent::Notice(Notice::ActionFailed { collection }));
                if let Err(err) = queue.enqueue(kind, collection, payload) {
                    warn!(error = %err, "Could not queue failed operation");
                }
            }

            tokio::time::sleep(config.suppression_grace).await;
            suppression.release(&entity_id);
        });
    }

    fn release_after_grace(&self, entity_id: String) {
        let suppression = self.suppression.clone();
        let grace = self.config.suppression_grace;
        self.tasks.spawn(async move {
            tokio::time::sleep(grace).await;
            suppression.release(&entity_id);
        });
    }

    /// Drop all queued offline operations. Used by explicit data-reset flows.
    pub fn clear_queue(&self) -> EngineResult<()> {
        self.queue.clear()
    }

    /// Stop background machinery and wait for in-flight tasks to finish.
    pub async fn shutdown(self) {
        info!("Shutting down data engine");
        self.subscription.stop();
        self.monitor.stop();
        self.tasks.close();
        self.tasks.wait().await;
    }

    #[cfg(test)]
    pub(crate) fn suppression(&self) -> &SuppressionSet {
        &self.suppression
    }
}

fn entity_id_of(kind: OperationKind, payload: &Value) -> EngineResult<String> {
    let id = match kind {
        OperationKind::Save => payload.get("id").and_then(Value::as_str),
        OperationKind::Delete => payload.as_str(),
    };
    id.map(str::to_owned).ok_or_else(|| {
        EngineError::InvalidOperation("payload carries no entity id".to_string())
    })
}
