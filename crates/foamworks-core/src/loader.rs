//! Staged, priority-ordered background loading.
//!
//! Populates [`AppState`] from the remote store in three strict phases:
//! settings first (they gate currency/units rendering), then customers and
//! estimates concurrently (what the user interacts with), then inventory.
//! The UI renders immediately with whatever state exists; nothing here ever
//! blocks a paint.
//!
//! Re-entrancy: a new cycle may start while a previous one is still in
//! flight (manual refresh, reconnect). Every cycle is tagged with a
//! monotonically increasing id and checks, before each merge, that it is
//! still the newest cycle; a superseded cycle discards its results so a
//! slow old response can never clobber newer data.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::EngineError;
use crate::events::{EngineEvent, LoadPhase, Notice};
use crate::remote::RemoteStore;
use crate::retry::with_retry;
use crate::state::AppState;
use crate::types::Collection;

/// How a load cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// All phases merged; initial-load-complete is now set
    Completed,
    /// A newer cycle started; results were discarded
    Superseded,
    /// A phase exhausted its retries; stale state was retained
    Failed { phase: LoadPhase, message: String },
}

/// Orchestrates staged load cycles against the remote store.
pub struct StagedLoader {
    store: Arc<dyn RemoteStore>,
    state: AppState,
    retry: RetryPolicy,
    event_tx: broadcast::Sender<EngineEvent>,
    /// Id of the most recently started cycle
    current_cycle: AtomicU64,
    /// Whether any cycle has ever been started (first-load special casing)
    started_once: AtomicBool,
}

impl StagedLoader {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        state: AppState,
        retry: RetryPolicy,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            store,
            state,
            retry,
            event_tx,
            current_cycle: AtomicU64::new(0),
            started_once: AtomicBool::new(false),
        }
    }

    fn is_stale(&self, cycle: u64) -> bool {
        self.current_cycle.load(Ordering::SeqCst) != cycle
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run one full load cycle. Failures are converted into state flags and
    /// notices; this never propagates an error to the caller.
    pub async fn run_cycle(&self) -> LoadOutcome {
        let cycle = self.current_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let is_first_load = !self.started_once.swap(true, Ordering::SeqCst);
        info!(cycle, is_first_load, "Starting staged load cycle");

        self.state.set_background_sync(true);
        let outcome = self.run_phases(cycle).await;
        // Only the newest cycle owns the shared flags
        if !self.is_stale(cycle) {
            self.state.set_background_sync(false);
        }

        match &outcome {
            LoadOutcome::Completed => {
                info!(cycle, "Load cycle complete");
                if !self.is_stale(cycle) {
                    self.state.set_load_error(None);
                }
            }
            LoadOutcome::Superseded => {
                debug!(cycle, "Load cycle superseded; results discarded");
            }
            LoadOutcome::Failed { phase, message } => {
                warn!(cycle, %phase, message, "Load cycle failed; keeping cached data");
                if !self.is_stale(cycle) {
                    self.state.set_load_error(Some(message.clone()));
                }
                self.emit(EngineEvent::LoadPhaseFailed {
                    phase: *phase,
                    message: message.clone(),
                });
                if !is_first_load {
                    self.emit(EngineEvent::Notice(Notice::SyncErrorUsingCached));
                }
            }
        }

        self.emit(EngineEvent::LoadFinished {
            cycle,
            success: matches!(outcome, LoadOutcome::Completed),
        });
        outcome
    }

    async fn run_phases(&self, cycle: u64) -> LoadOutcome {
        // Phase 1: settings
        let settings = match with_retry(|| self.store.fetch_all(Collection::Settings), &self.retry)
            .await
        {
            Ok(docs) => docs,
            Err(err) => return self.phase_failed(cycle, LoadPhase::Settings, err),
        };
        if self.is_stale(cycle) {
            return LoadOutcome::Superseded;
        }
        if let Err(err) = self.state.replace_collection(Collection::Settings, settings) {
            return self.phase_failed(cycle, LoadPhase::Settings, err);
        }
        self.emit(EngineEvent::CollectionUpdated {
            collection: Collection::Settings,
        });

        // Phase 2: customers and estimates, concurrently; merged together
        // only once both resolve
        let (customers, estimates) = tokio::join!(
            with_retry(|| self.store.fetch_all(Collection::Customers), &self.retry),
            with_retry(|| self.store.fetch_all(Collection::Estimates), &self.retry),
        );
        let (customers, estimates) = match (customers, estimates) {
            (Ok(c), Ok(e)) => (c, e),
            (Err(err), _) | (_, Err(err)) => {
                return self.phase_failed(cycle, LoadPhase::Records, err)
            }
        };
        if self.is_stale(cycle) {
            return LoadOutcome::Superseded;
        }
        let merged = self
            .state
            .replace_collection(Collection::Customers, customers)
            .and_then(|_| self.state.replace_collection(Collection::Estimates, estimates));
        if let Err(err) = merged {
            return self.phase_failed(cycle, LoadPhase::Records, err);
        }
        self.emit(EngineEvent::CollectionUpdated {
            collection: Collection::Customers,
        });
        self.emit(EngineEvent::CollectionUpdated {
            collection: Collection::Estimates,
        });

        // Phase 3: inventory; initial load counts as complete only after
        // this phase lands at least once
        let inventory = match with_retry(|| self.store.fetch_all(Collection::Inventory), &self.retry)
            .await
        {
            Ok(docs) => docs,
            Err(err) => return self.phase_failed(cycle, LoadPhase::Inventory, err),
        };
        if self.is_stale(cycle) {
            return LoadOutcome::Superseded;
        }
        if let Err(err) = self.state.replace_collection(Collection::Inventory, inventory) {
            return self.phase_failed(cycle, LoadPhase::Inventory, err);
        }
        self.emit(EngineEvent::CollectionUpdated {
            collection: Collection::Inventory,
        });
        self.state.set_initial_load_complete();

        LoadOutcome::Completed
    }

    fn phase_failed(&self, cycle: u64, phase: LoadPhase, err: EngineError) -> LoadOutcome {
        if self.is_stale(cycle) {
            // A newer cycle owns error reporting now
            return LoadOutcome::Superseded;
        }
        LoadOutcome::Failed {
            phase,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Scripted remote store: per-collection documents, per-collection
    /// failure counts, per-collection artificial delays, and a recorded
    /// call log for ordering assertions.
    #[derive(Default)]
    struct ScriptedStore {
        docs: Mutex<HashMap<Collection, Vec<Value>>>,
        fail_counts: Mutex<HashMap<Collection, u32>>,
        delays: Mutex<HashMap<Collection, Duration>>,
        call_log: Mutex<Vec<Collection>>,
    }

    impl ScriptedStore {
        fn with_docs(collection: Collection, docs: Vec<Value>) -> Self {
            let store = Self::default();
            store.docs.lock().insert(collection, docs);
            store
        }

        fn set_docs(&self, collection: Collection, docs: Vec<Value>) {
            self.docs.lock().insert(collection, docs);
        }

        fn fail_next(&self, collection: Collection, times: u32) {
            self.fail_counts.lock().insert(collection, times);
        }

        fn delay(&self, collection: Collection, delay: Duration) {
            self.delays.lock().insert(collection, delay);
        }

        fn calls(&self) -> Vec<Collection> {
            self.call_log.lock().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedStore {
        async fn fetch_all(&self, collection: Collection) -> EngineResult<Vec<Value>> {
            self.call_log.lock().push(collection);
            let delay = self.delays.lock().get(&collection).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut fails = self.fail_counts.lock();
                if let Some(remaining) = fails.get_mut(&collection) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(EngineError::Remote(format!("{} unavailable", collection)));
                    }
                }
            }
            Ok(self
                .docs
                .lock()
                .get(&collection)
                .cloned()
                .unwrap_or_default())
        }

        async fn save(&self, _collection: Collection, entity: Value) -> EngineResult<Value> {
            Ok(entity)
        }

        async fn delete(&self, _collection: Collection, _id: &str) -> EngineResult<()> {
            Ok(())
        }
    }

    fn test_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
        }
    }

    fn make_loader(store: Arc<ScriptedStore>) -> (StagedLoader, AppState) {
        let state = AppState::new();
        let (event_tx, _) = broadcast::channel(64);
        let loader = StagedLoader::new(store, state.clone(), test_retry(), event_tx);
        (loader, state)
    }

    fn settings_doc() -> Value {
        json!({"id": "settings", "company_name": "FoamPro", "currency": "USD"})
    }

    fn customer_doc(id: &str) -> Value {
        json!({"id": id, "name": "Customer", "created_at": 0})
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_merges_all_collections() {
        let store = Arc::new(ScriptedStore::default());
        store.set_docs(Collection::Settings, vec![settings_doc()]);
        store.set_docs(Collection::Customers, vec![customer_doc("cust_1")]);
        store.set_docs(
            Collection::Estimates,
            vec![json!({"id": "est_1", "customer_id": "cust_1", "created_at": 0})],
        );
        store.set_docs(
            Collection::Inventory,
            vec![json!({"id": "inv_1", "name": "Closed-cell set"})],
        );

        let (loader, state) = make_loader(store);
        assert!(!state.initial_load_complete());

        let outcome = loader.run_cycle().await;
        assert_eq!(outcome, LoadOutcome::Completed);
        assert_eq!(state.settings().company_name, "FoamPro");
        assert_eq!(state.customers().len(), 1);
        assert_eq!(state.estimates().len(), 1);
        assert_eq!(state.inventory().len(), 1);
        assert!(state.initial_load_complete());
        assert!(!state.background_sync());
        assert!(state.load_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_fetched_before_customers_requested() {
        let store = Arc::new(ScriptedStore::with_docs(
            Collection::Settings,
            vec![settings_doc()],
        ));
        // Even with settings slow, no phase-2 fetch may start early
        store.delay(Collection::Settings, Duration::from_millis(500));

        let (loader, _state) = make_loader(store.clone());
        loader.run_cycle().await;

        let calls = store.calls();
        assert_eq!(calls[0], Collection::Settings);
        assert!(calls[1] == Collection::Customers || calls[1] == Collection::Estimates);
        assert_eq!(*calls.last().unwrap(), Collection::Inventory);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_failure_retains_earlier_merges() {
        let store = Arc::new(ScriptedStore::default());
        store.set_docs(Collection::Settings, vec![settings_doc()]);
        store.set_docs(Collection::Customers, vec![customer_doc("cust_1")]);
        // Inventory fails all retry attempts
        store.fail_next(Collection::Inventory, 3);

        let (loader, state) = make_loader(store);
        let outcome = loader.run_cycle().await;

        assert!(matches!(
            outcome,
            LoadOutcome::Failed {
                phase: LoadPhase::Inventory,
                ..
            }
        ));
        // Earlier phases stay merged; initial load remains incomplete
        assert_eq!(state.settings().company_name, "FoamPro");
        assert_eq!(state.customers().len(), 1);
        assert!(!state.initial_load_complete());
        assert!(state.load_error().is_some());
    }

    fn collect_notices(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Notice(notice) = event {
                notices.push(notice);
            }
        }
        notices
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_data_notice_skipped_on_very_first_load() {
        let store = Arc::new(ScriptedStore::default());
        store.fail_next(Collection::Settings, 3);

        let state = AppState::new();
        let (event_tx, mut events) = broadcast::channel(64);
        let loader = StagedLoader::new(store.clone(), state.clone(), test_retry(), event_tx);

        // First-ever load failing shows the persistent retry affordance
        // (load_error), not the transient toast
        loader.run_cycle().await;
        assert!(!collect_notices(&mut events).contains(&Notice::SyncErrorUsingCached));
        assert!(state.load_error().is_some());

        // A later failing refresh does surface the toast
        store.fail_next(Collection::Settings, 3);
        loader.run_cycle().await;
        assert!(collect_notices(&mut events).contains(&Notice::SyncErrorUsingCached));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_within_cycle() {
        let store = Arc::new(ScriptedStore::default());
        store.set_docs(Collection::Settings, vec![settings_doc()]);
        // Two failures then success: within the executor's 3-attempt cap
        store.fail_next(Collection::Settings, 2);

        let (loader, state) = make_loader(store);
        let outcome = loader.run_cycle().await;
        assert_eq!(outcome, LoadOutcome::Completed);
        assert_eq!(state.settings().company_name, "FoamPro");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cycle_results_are_discarded() {
        let store = Arc::new(ScriptedStore::default());
        store.set_docs(Collection::Settings, vec![settings_doc()]);
        store.set_docs(Collection::Customers, vec![customer_doc("cust_old")]);
        // Cycle A's inventory response is very slow
        store.delay(Collection::Inventory, Duration::from_secs(30));

        let state = AppState::new();
        let (event_tx, _) = broadcast::channel(64);
        let loader = Arc::new(StagedLoader::new(
            store.clone(),
            state.clone(),
            test_retry(),
            event_tx,
        ));

        let slow_loader = loader.clone();
        let cycle_a = tokio::spawn(async move { slow_loader.run_cycle().await });

        // Let cycle A get past phase 2 and suspend on inventory
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Cycle B starts and completes with newer data
        store.set_docs(Collection::Customers, vec![customer_doc("cust_new")]);
        store.delay(Collection::Inventory, Duration::from_millis(1));
        let outcome_b = loader.run_cycle().await;
        assert_eq!(outcome_b, LoadOutcome::Completed);

        // Cycle A eventually resolves but must not clobber B's state
        let outcome_a = cycle_a.await.unwrap();
        assert_eq!(outcome_a, LoadOutcome::Superseded);
        assert_eq!(state.customers()[0].id, "cust_new");
        assert!(state.initial_load_complete());
    }
}
