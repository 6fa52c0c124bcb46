//! Connectivity monitoring and queue drainage.
//!
//! Connectivity is modeled as a `watch` channel of booleans fed by the host
//! environment (browser online/offline events, or a probe in native use).
//! On an offline transition the monitor surfaces a one-time notice; on an
//! online transition it drains the offline queue in enqueue order and then
//! triggers one staged-load refresh to pick up whatever was missed.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::events::{EngineEvent, Notice};
use crate::loader::StagedLoader;
use crate::queue::{OfflineQueue, ReplayOutcome};
use crate::remote::RemoteStore;
use crate::retry::with_retry;
use crate::types::OperationKind;

/// Result of one drain pass over the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Operations replayed and removed
    pub succeeded: usize,
    /// Operations that failed this pass (retained or discarded per the cap)
    pub failed: usize,
}

/// Replay every queued operation against the remote store, oldest first.
///
/// Strictly sequential, across collections too: a create queued before a
/// later update to the same entity must never replay out of order, and
/// sequential replay avoids partial-failure interleaving entirely.
pub(crate) async fn drain_queue(
    queue: &OfflineQueue,
    store: &Arc<dyn RemoteStore>,
    config: &EngineConfig,
) -> DrainReport {
    let ops = match queue.list_all() {
        Ok(ops) => ops,
        Err(err) => {
            warn!(error = %err, "Could not read offline queue for drain");
            return DrainReport::default();
        }
    };
    if ops.is_empty() {
        return DrainReport::default();
    }

    info!(pending = ops.len(), "Draining offline queue");
    let mut report = DrainReport::default();

    for op in ops {
        let result = match op.kind {
            OperationKind::Save => with_retry(
                || store.save(op.collection, op.payload.clone()),
                &config.retry,
            )
            .await
            .map(|_| ()),
            OperationKind::Delete => {
                let id = op.entity_id().unwrap_or_default();
                with_retry(|| store.delete(op.collection, &id), &config.retry).await
            }
        };

        match result {
            Ok(()) => {
                if let Err(err) = queue.remove(&op.id) {
                    warn!(op_id = %op.id, error = %err, "Replayed operation but could not remove it");
                }
                report.succeeded += 1;
            }
            Err(err) => {
                debug!(op_id = %op.id, error = %err, "Replay failed");
                match queue.record_failure(&op.id, config.max_replay_attempts) {
                    Ok(ReplayOutcome::Retained(retries)) => {
                        debug!(op_id = %op.id, retries, "Operation retained for next drain");
                    }
                    Ok(ReplayOutcome::Discarded) => {
                        warn!(op_id = %op.id, "Operation discarded after replay cap");
                    }
                    Err(err) => {
                        warn!(op_id = %op.id, error = %err, "Could not record replay failure");
                    }
                }
                report.failed += 1;
            }
        }
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "Drain finished"
    );
    report
}

/// Watches connectivity transitions and drives drainage plus refresh.
pub struct NetworkMonitor {
    queue: OfflineQueue,
    store: Arc<dyn RemoteStore>,
    loader: Arc<StagedLoader>,
    config: EngineConfig,
    event_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(
        queue: OfflineQueue,
        store: Arc<dyn RemoteStore>,
        loader: Arc<StagedLoader>,
        config: EngineConfig,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            queue,
            store,
            loader,
            config,
            event_tx,
            cancel: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Start watching the connectivity signal. The current value of the
    /// channel seeds the initial state.
    pub fn start(&self, connectivity: watch::Receiver<bool>) {
        self.stop();

        let queue = self.queue.clone();
        let store = self.store.clone();
        let loader = self.loader.clone();
        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            monitor_task(connectivity, queue, store, loader, config, event_tx, cancel).await;
        });
        *self.task.lock() = Some(handle);
    }

    /// Stop watching. Safe to call when not started.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.stop();
    }
}

async fn monitor_task(
    mut connectivity: watch::Receiver<bool>,
    queue: OfflineQueue,
    store: Arc<dyn RemoteStore>,
    loader: Arc<StagedLoader>,
    config: EngineConfig,
    event_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
) {
    let mut online = *connectivity.borrow();
    info!(online, "Network monitor started");

    loop {
        let changed = tokio::select! {
            _ = cancel.cancelled() => break,
            changed = connectivity.changed() => changed,
        };
        if changed.is_err() {
            // Signal source dropped; nothing left to observe
            debug!("Connectivity signal closed");
            break;
        }

        let now_online = *connectivity.borrow_and_update();
        if now_online == online {
            continue;
        }
        online = now_online;
        let _ = event_tx.send(EngineEvent::Connectivity { online });

        if !online {
            info!("Connectivity lost");
            let _ = event_tx.send(EngineEvent::Notice(Notice::WorkingOffline));
            continue;
        }

        info!("Connectivity restored");
        let _ = event_tx.send(EngineEvent::Notice(Notice::ConnectionRestored));

        let report = drain_queue(&queue, &store, &config).await;
        let _ = event_tx.send(EngineEvent::QueueDrained {
            succeeded: report.succeeded,
            failed: report.failed,
        });
        if report.failed > 0 {
            let _ = event_tx.send(EngineEvent::Notice(Notice::SyncFailed {
                count: report.failed,
            }));
        }

        // Refresh regardless of whether anything was queued: realtime
        // events were missed while offline
        loader.run_cycle().await;
    }
}
