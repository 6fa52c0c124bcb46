//! Realtime reconciliation.
//!
//! Server-pushed change events are merged into local state unless the
//! affected entity has an optimistic local write still settling, in which
//! case the event is dropped so the UI does not flicker between the local
//! value and the server echo.
//!
//! The subscription is a bounded-lifetime object with explicit `start` and
//! `stop`, independent of any UI framework lifecycle.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EngineEvent, Notice};
use crate::remote::{PushMessage, PushReceiver};
use crate::state::AppState;
use crate::types::ChannelStatus;

/// Entity ids currently shielded from realtime events because a local
/// optimistic write is in flight.
///
/// Presence in this set is the only signal reconciliation uses to drop an
/// event. Ids are added when an optimistic update is applied and must be
/// released once the background sync settles (plus the grace delay); the
/// engine owns that lifecycle, so nothing here lingers forever.
#[derive(Clone, Default)]
pub struct SuppressionSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shield an entity id from incoming realtime events.
    pub fn suppress(&self, id: impl Into<String>) {
        self.inner.lock().insert(id.into());
    }

    /// Lift the shield. Idempotent.
    pub fn release(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Background subscription that applies push messages to state.
pub struct RealtimeSubscription {
    state: AppState,
    suppression: SuppressionSet,
    event_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RealtimeSubscription {
    pub fn new(
        state: AppState,
        suppression: SuppressionSet,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            state,
            suppression,
            event_tx,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start consuming push messages. A second call replaces the previous
    /// consumer task.
    pub fn start(&self, rx: PushReceiver) {
        self.stop_task();

        let state = self.state.clone();
        let suppression = self.suppression.clone();
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            consume_push_messages(rx, state, suppression, event_tx, cancel).await;
        });
        *self.task.lock() = Some(handle);
        info!("Realtime subscription started");
    }

    /// Stop consuming. Safe to call when not started.
    pub fn stop(&self) {
        self.stop_task();
        info!("Realtime subscription stopped");
    }

    fn stop_task(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.stop_task();
    }
}

async fn consume_push_messages(
    mut rx: PushReceiver,
    state: AppState,
    suppression: SuppressionSet,
    event_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
) {
    // "live updates paused" is surfaced at most once per subscription
    let mut paused_notified = false;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => message,
        };

        match message {
            Some(PushMessage::Change(event)) => {
                let Some(entity_id) = event.entity_id() else {
                    warn!(collection = %event.collection, "Dropping change event without entity id");
                    continue;
                };

                if suppression.contains(&entity_id) {
                    debug!(%entity_id, "Suppressed echo of local optimistic write");
                    continue;
                }

                match state.apply_change(&event) {
                    Ok(true) => {
                        let _ = event_tx.send(EngineEvent::CollectionUpdated {
                            collection: event.collection,
                        });
                    }
                    Ok(false) => {
                        debug!(%entity_id, "Change event was a no-op");
                    }
                    Err(err) => {
                        // Malformed events are dropped; the subscription lives on
                        warn!(%entity_id, error = %err, "Dropping malformed change event");
                    }
                }
            }
            Some(PushMessage::Status(status)) => match status {
                ChannelStatus::Subscribed => {
                    debug!("Push channel subscribed");
                    paused_notified = false;
                }
                ChannelStatus::Error(message) => {
                    warn!(message, "Push channel error");
                    notify_paused_once(&event_tx, &mut paused_notified);
                }
                ChannelStatus::Timeout | ChannelStatus::Closed => {
                    warn!(?status, "Push channel interrupted");
                    notify_paused_once(&event_tx, &mut paused_notified);
                }
            },
            None => {
                // Sender dropped; same as an explicit close
                warn!("Push channel ended");
                notify_paused_once(&event_tx, &mut paused_notified);
                break;
            }
        }
    }
}

fn notify_paused_once(event_tx: &broadcast::Sender<EngineEvent>, paused_notified: &mut bool) {
    if !*paused_notified {
        *paused_notified = true;
        let _ = event_tx.send(EngineEvent::Notice(Notice::LiveUpdatesPaused));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeEvent, ChangeKind, Collection};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn change(kind: ChangeKind, payload: serde_json::Value) -> PushMessage {
        PushMessage::Change(ChangeEvent {
            collection: Collection::Inventory,
            kind,
            payload,
        })
    }

    fn item_doc(id: &str, quantity: f64) -> serde_json::Value {
        json!({"id": id, "name": "Open-cell set", "quantity": quantity})
    }

    struct Fixture {
        state: AppState,
        suppression: SuppressionSet,
        subscription: RealtimeSubscription,
        tx: mpsc::Sender<PushMessage>,
        events: broadcast::Receiver<EngineEvent>,
    }

    fn start_fixture() -> Fixture {
        let state = AppState::new();
        let suppression = SuppressionSet::new();
        let (event_tx, events) = broadcast::channel(64);
        let subscription =
            RealtimeSubscription::new(state.clone(), suppression.clone(), event_tx);
        let (tx, rx) = mpsc::channel(16);
        subscription.start(rx);
        Fixture {
            state,
            suppression,
            subscription,
            tx,
            events,
        }
    }

    /// Let the subscription task run until it has drained the channel.
    async fn settle(tx: &mpsc::Sender<PushMessage>) {
        while tx.capacity() < tx.max_capacity() {
            tokio::task::yield_now().await;
        }
        // One extra yield so the last message is fully applied
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_insert_update_delete_flow() {
        let fx = start_fixture();

        fx.tx
            .send(change(ChangeKind::Insert, item_doc("inv_1", 3.0)))
            .await
            .unwrap();
        fx.tx
            .send(change(ChangeKind::Update, item_doc("inv_1", 5.0)))
            .await
            .unwrap();
        settle(&fx.tx).await;
        assert_eq!(fx.state.inventory().len(), 1);
        assert_eq!(fx.state.inventory()[0].quantity, 5.0);

        fx.tx
            .send(change(ChangeKind::Delete, json!("inv_1")))
            .await
            .unwrap();
        settle(&fx.tx).await;
        assert!(fx.state.inventory().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_deduped() {
        let fx = start_fixture();

        for _ in 0..2 {
            fx.tx
                .send(change(ChangeKind::Insert, item_doc("inv_1", 3.0)))
                .await
                .unwrap();
        }
        settle(&fx.tx).await;
        assert_eq!(fx.state.inventory().len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_entity_events_are_dropped() {
        let fx = start_fixture();

        fx.tx
            .send(change(ChangeKind::Insert, item_doc("inv_1", 3.0)))
            .await
            .unwrap();
        settle(&fx.tx).await;

        // Local optimistic write in flight for inv_1
        fx.suppression.suppress("inv_1");
        fx.tx
            .send(change(ChangeKind::Update, item_doc("inv_1", 99.0)))
            .await
            .unwrap();
        settle(&fx.tx).await;
        assert_eq!(fx.state.inventory()[0].quantity, 3.0);

        // After release, events apply normally again
        fx.suppression.release("inv_1");
        fx.tx
            .send(change(ChangeKind::Update, item_doc("inv_1", 7.0)))
            .await
            .unwrap();
        settle(&fx.tx).await;
        assert_eq!(fx.state.inventory()[0].quantity, 7.0);
    }

    #[tokio::test]
    async fn test_malformed_event_does_not_kill_subscription() {
        let fx = start_fixture();

        fx.tx
            .send(change(ChangeKind::Insert, json!({"id": "inv_1", "name": 42})))
            .await
            .unwrap();
        fx.tx
            .send(change(ChangeKind::Insert, item_doc("inv_2", 1.0)))
            .await
            .unwrap();
        settle(&fx.tx).await;

        // The bad event was dropped, the good one applied
        assert_eq!(fx.state.inventory().len(), 1);
        assert_eq!(fx.state.inventory()[0].id, "inv_2");
    }

    #[tokio::test]
    async fn test_channel_loss_notice_is_one_time() {
        let mut fx = start_fixture();

        fx.tx
            .send(PushMessage::Status(ChannelStatus::Error("boom".into())))
            .await
            .unwrap();
        fx.tx
            .send(PushMessage::Status(ChannelStatus::Timeout))
            .await
            .unwrap();
        settle(&fx.tx).await;

        let mut paused_count = 0;
        while let Ok(event) = fx.events.try_recv() {
            if event == EngineEvent::Notice(Notice::LiveUpdatesPaused) {
                paused_count += 1;
            }
        }
        assert_eq!(paused_count, 1);
    }

    #[tokio::test]
    async fn test_resubscribe_resets_paused_notice() {
        let mut fx = start_fixture();

        fx.tx
            .send(PushMessage::Status(ChannelStatus::Timeout))
            .await
            .unwrap();
        fx.tx
            .send(PushMessage::Status(ChannelStatus::Subscribed))
            .await
            .unwrap();
        fx.tx
            .send(PushMessage::Status(ChannelStatus::Closed))
            .await
            .unwrap();
        settle(&fx.tx).await;

        let mut paused_count = 0;
        while let Ok(event) = fx.events.try_recv() {
            if event == EngineEvent::Notice(Notice::LiveUpdatesPaused) {
                paused_count += 1;
            }
        }
        assert_eq!(paused_count, 2);
    }

    #[tokio::test]
    async fn test_stop_halts_consumption() {
        let fx = start_fixture();

        fx.subscription.stop();
        fx.tx
            .send(change(ChangeKind::Insert, item_doc("inv_1", 3.0)))
            .await
            .unwrap();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(fx.state.inventory().is_empty());
    }

    #[test]
    fn test_suppression_set_basics() {
        let set = SuppressionSet::new();
        assert!(set.is_empty());
        set.suppress("cust_1");
        set.suppress("cust_1");
        assert_eq!(set.len(), 1);
        assert!(set.contains("cust_1"));
        set.release("cust_1");
        set.release("cust_1");
        assert!(!set.contains("cust_1"));
    }
}
