//! In-memory application state shared between the loader, the
//! reconciliation subscription, and the engine facade.
//!
//! All mutation happens behind one `parking_lot::RwLock`; readers get cloned
//! snapshots, never references into the lock. Collections are replaced or
//! filtered wholesale so every reader sees a consistent snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::EngineResult;
use crate::types::{
    AppSettings, ChangeEvent, ChangeKind, Collection, Customer, Estimate, InventoryItem, Record,
};

#[derive(Default)]
struct StateInner {
    customers: Vec<Customer>,
    estimates: Vec<Estimate>,
    inventory: Vec<InventoryItem>,
    settings: Vec<AppSettings>,
    initial_load_complete: bool,
    background_sync: bool,
    load_error: Option<String>,
}

/// Shared, cheaply clonable handle to application state.
#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<RwLock<StateInner>>,
}

fn upsert<T: Record>(items: &mut Vec<T>, entity: T) {
    match items.iter().position(|e| e.record_id() == entity.record_id()) {
        Some(idx) => items[idx] = entity,
        None => items.push(entity),
    }
}

/// Insert unless an entity with the same id already exists.
/// Guards against duplicate realtime delivery.
fn insert_if_absent<T: Record>(items: &mut Vec<T>, entity: T) -> bool {
    if items.iter().any(|e| e.record_id() == entity.record_id()) {
        return false;
    }
    items.push(entity);
    true
}

/// Replace the matching entity; no-op when absent.
fn replace_existing<T: Record>(items: &mut Vec<T>, entity: T) -> bool {
    match items.iter().position(|e| e.record_id() == entity.record_id()) {
        Some(idx) => {
            items[idx] = entity;
            true
        }
        None => false,
    }
}

/// Remove the matching entity; no-op when absent.
fn remove_by_id<T: Record>(items: &mut Vec<T>, id: &str) -> bool {
    let before = items.len();
    items.retain(|e| e.record_id() != id);
    items.len() != before
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshots
    // ═══════════════════════════════════════════════════════════════════════

    pub fn customers(&self) -> Vec<Customer> {
        self.inner.read().customers.clone()
    }

    pub fn estimates(&self) -> Vec<Estimate> {
        self.inner.read().estimates.clone()
    }

    pub fn inventory(&self) -> Vec<InventoryItem> {
        self.inner.read().inventory.clone()
    }

    /// Business settings; defaults until the first settings load lands.
    pub fn settings(&self) -> AppSettings {
        self.inner
            .read()
            .settings
            .first()
            .cloned()
            .unwrap_or_default()
    }

    pub fn initial_load_complete(&self) -> bool {
        self.inner.read().initial_load_complete
    }

    pub fn background_sync(&self) -> bool {
        self.inner.read().background_sync
    }

    pub fn load_error(&self) -> Option<String> {
        self.inner.read().load_error.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Flags
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_initial_load_complete(&self) {
        self.inner.write().initial_load_complete = true;
    }

    pub fn set_background_sync(&self, active: bool) {
        self.inner.write().background_sync = active;
    }

    pub fn set_load_error(&self, error: Option<String>) {
        self.inner.write().load_error = error;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Merges
    // ═══════════════════════════════════════════════════════════════════════

    /// Replace a whole collection with freshly fetched documents.
    pub fn replace_collection(&self, collection: Collection, docs: Vec<Value>) -> EngineResult<()> {
        let mut inner = self.inner.write();
        match collection {
            Collection::Customers => inner.customers = from_docs(docs)?,
            Collection::Estimates => inner.estimates = from_docs(docs)?,
            Collection::Inventory => inner.inventory = from_docs(docs)?,
            Collection::Settings => inner.settings = from_docs(docs)?,
        }
        debug!(%collection, "Replaced collection from load");
        Ok(())
    }

    /// Optimistically upsert a saved entity (insert-or-replace by id).
    pub fn apply_saved(&self, collection: Collection, doc: Value) -> EngineResult<()> {
        let mut inner = self.inner.write();
        match collection {
            Collection::Customers => upsert(&mut inner.customers, serde_json::from_value(doc)?),
            Collection::Estimates => upsert(&mut inner.estimates, serde_json::from_value(doc)?),
            Collection::Inventory => upsert(&mut inner.inventory, serde_json::from_value(doc)?),
            Collection::Settings => upsert(&mut inner.settings, serde_json::from_value(doc)?),
        }
        Ok(())
    }

    /// Optimistically remove an entity by id.
    pub fn apply_removed(&self, collection: Collection, id: &str) {
        let mut inner = self.inner.write();
        match collection {
            Collection::Customers => remove_by_id(&mut inner.customers, id),
            Collection::Estimates => remove_by_id(&mut inner.estimates, id),
            Collection::Inventory => remove_by_id(&mut inner.inventory, id),
            Collection::Settings => remove_by_id(&mut inner.settings, id),
        };
    }

    /// Apply a realtime change event. Returns whether state actually changed.
    ///
    /// Insert events are deduped by id; update and delete are no-ops when
    /// the entity is absent. Malformed payloads surface as serialization
    /// errors for the caller to log and drop.
    pub fn apply_change(&self, event: &ChangeEvent) -> EngineResult<bool> {
        let mut inner = self.inner.write();
        let changed = match event.collection {
            Collection::Customers => apply_to(&mut inner.customers, event)?,
            Collection::Estimates => apply_to(&mut inner.estimates, event)?,
            Collection::Inventory => apply_to(&mut inner.inventory, event)?,
            Collection::Settings => apply_to(&mut inner.settings, event)?,
        };
        Ok(changed)
    }
}

fn from_docs<T: serde::de::DeserializeOwned>(docs: Vec<Value>) -> EngineResult<Vec<T>> {
    docs.into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(Into::into))
        .collect()
}

fn apply_to<T>(items: &mut Vec<T>, event: &ChangeEvent) -> EngineResult<bool>
where
    T: Record + serde::de::DeserializeOwned,
{
    match event.kind {
        ChangeKind::Insert => {
            let entity: T = serde_json::from_value(event.payload.clone())?;
            Ok(insert_if_absent(items, entity))
        }
        ChangeKind::Update => {
            let entity: T = serde_json::from_value(event.payload.clone())?;
            Ok(replace_existing(items, entity))
        }
        ChangeKind::Delete => {
            let id = event.payload.as_str().unwrap_or_default();
            Ok(remove_by_id(items, id))
        }
    }
}
