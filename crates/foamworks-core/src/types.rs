//! Core types for the Foamworks data engine

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// The remote resource families the engine manages.
///
/// Every remote fetch, queued write, and realtime change event targets
/// exactly one of these collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Customers,
    Estimates,
    Inventory,
    Settings,
}

impl Collection {
    /// All collections, in staged-load priority order.
    pub const ALL: [Collection; 4] = [
        Collection::Settings,
        Collection::Customers,
        Collection::Estimates,
        Collection::Inventory,
    ];

    /// Stable string name, used in queue ids and remote routing
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Customers => "customers",
            Collection::Estimates => "estimates",
            Collection::Inventory => "inventory",
            Collection::Settings => "settings",
        }
    }

    /// Parse from the stable string name
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "customers" => Some(Collection::Customers),
            "estimates" => Some(Collection::Estimates),
            "inventory" => Some(Collection::Inventory),
            "settings" => Some(Collection::Settings),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of deferred write operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create-or-update an entity (payload is the entity document)
    Save,
    /// Delete an entity (payload is the entity id)
    Delete,
}

/// A deferred write, persisted by the offline queue until replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique id: `<collection>-<ULID>` (timestamp + random suffix)
    pub id: String,
    /// Creation time, unix milliseconds
    pub timestamp: i64,
    /// Save or delete
    pub kind: OperationKind,
    /// Which remote resource family this targets
    pub collection: Collection,
    /// The entity document for saves, the entity id (as a JSON string) for deletes
    pub payload: Value,
    /// Number of failed replay attempts so far
    pub retry_count: u32,
}

impl QueuedOperation {
    /// Create a new queued operation with a fresh id and timestamp.
    pub fn new(kind: OperationKind, collection: Collection, payload: Value) -> Self {
        let ulid = Ulid::new();
        Self {
            id: format!("{}-{}", collection.as_str(), ulid),
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
            collection,
            payload,
            retry_count: 0,
        }
    }

    /// The id of the entity this operation targets, if it carries one.
    pub fn entity_id(&self) -> Option<String> {
        match self.kind {
            OperationKind::Save => self
                .payload
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned),
            OperationKind::Delete => self.payload.as_str().map(str::to_owned),
        }
    }
}

/// Snapshot of the offline queue, for UI indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    /// Number of pending operations
    pub count: usize,
    /// Creation time of the oldest pending operation (unix ms), if any
    pub oldest_timestamp: Option<i64>,
}

/// Kind of realtime change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A server-pushed change notification for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Collection the change belongs to
    pub collection: Collection,
    /// Insert, update, or delete
    pub kind: ChangeKind,
    /// The entity document (insert/update) or the entity id as a JSON string (delete)
    pub payload: Value,
}

impl ChangeEvent {
    /// The id of the affected entity, if the event is well-formed.
    pub fn entity_id(&self) -> Option<String> {
        match self.kind {
            ChangeKind::Delete => self.payload.as_str().map(str::to_owned),
            _ => self
                .payload
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

/// Connection-status events emitted by the push channel itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Error(String),
    Timeout,
    Closed,
}

/// Anything in local state that is addressed by an entity id.
pub trait Record {
    fn record_id(&self) -> &str;
}

fn new_entity_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// A customer of the contracting business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub notes: String,
    pub created_at: i64,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_entity_id("cust"),
            name: name.into(),
            phone: String::new(),
            email: String::new(),
            address: String::new(),
            notes: String::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl Record for Customer {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// A job estimate for a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub description: String,
    /// Quoted total in the configured currency
    #[serde(default)]
    pub total: f64,
    /// Workflow status: draft, sent, accepted, declined
    #[serde(default = "Estimate::default_status")]
    pub status: String,
    pub created_at: i64,
}

impl Estimate {
    fn default_status() -> String {
        "draft".to_string()
    }

    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            id: new_entity_id("est"),
            customer_id: customer_id.into(),
            description: String::new(),
            total: 0.0,
            status: Self::default_status(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl Record for Estimate {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// A tracked stock item (foam sets, supplies, equipment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub low_stock_threshold: f64,
}

impl InventoryItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_entity_id("inv"),
            name: name.into(),
            quantity: 0.0,
            unit: String::new(),
            low_stock_threshold: 0.0,
        }
    }
}

impl Record for InventoryItem {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Business-wide settings; gate currency/units rendering elsewhere,
/// which is why the staged loader fetches them first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub id: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default = "AppSettings::default_currency")]
    pub currency: String,
    /// "imperial" or "metric"
    #[serde(default = "AppSettings::default_units")]
    pub measurement_units: String,
    #[serde(default)]
    pub tax_rate: f64,
}

impl AppSettings {
    fn default_currency() -> String {
        "USD".to_string()
    }

    fn default_units() -> String {
        "imperial".to_string()
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            id: "settings".to_string(),
            company_name: String::new(),
            currency: Self::default_currency(),
            measurement_units: Self::default_units(),
            tax_rate: 0.0,
        }
    }
}

impl Record for AppSettings {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_name_roundtrip() {
        for c in Collection::ALL {
            assert_eq!(Collection::from_str_name(c.as_str()), Some(c));
        }
        assert_eq!(Collection::from_str_name("widgets"), None);
    }

    #[test]
    fn test_collection_display() {
        assert_eq!(format!("{}", Collection::Inventory), "inventory");
    }

    #[test]
    fn test_queued_operation_id_embeds_collection() {
        let op = QueuedOperation::new(
            OperationKind::Save,
            Collection::Customers,
            json!({"id": "cust_1"}),
        );
        assert!(op.id.starts_with("customers-"));
        assert_eq!(op.retry_count, 0);
    }

    #[test]
    fn test_queued_operation_ids_are_unique() {
        let a = QueuedOperation::new(OperationKind::Save, Collection::Settings, json!({}));
        let b = QueuedOperation::new(OperationKind::Save, Collection::Settings, json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_entity_id_for_save_and_delete() {
        let save = QueuedOperation::new(
            OperationKind::Save,
            Collection::Inventory,
            json!({"id": "inv_9", "name": "Closed-cell set"}),
        );
        assert_eq!(save.entity_id().as_deref(), Some("inv_9"));

        let delete =
            QueuedOperation::new(OperationKind::Delete, Collection::Inventory, json!("inv_9"));
        assert_eq!(delete.entity_id().as_deref(), Some("inv_9"));
    }

    #[test]
    fn test_entity_id_missing_is_none() {
        let op = QueuedOperation::new(
            OperationKind::Save,
            Collection::Customers,
            json!({"name": "no id"}),
        );
        assert_eq!(op.entity_id(), None);
    }

    #[test]
    fn test_change_event_entity_id() {
        let event = ChangeEvent {
            collection: Collection::Customers,
            kind: ChangeKind::Update,
            payload: json!({"id": "cust_3", "name": "Acme Barn"}),
        };
        assert_eq!(event.entity_id().as_deref(), Some("cust_3"));

        let delete = ChangeEvent {
            collection: Collection::Customers,
            kind: ChangeKind::Delete,
            payload: json!("cust_3"),
        };
        assert_eq!(delete.entity_id().as_deref(), Some("cust_3"));
    }

    #[test]
    fn test_queued_operation_serde_roundtrip() {
        let op = QueuedOperation::new(
            OperationKind::Delete,
            Collection::Estimates,
            json!("est_42"),
        );
        let bytes = serde_json::to_vec(&op).unwrap();
        let back: QueuedOperation = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.currency, "USD");
        assert_eq!(settings.measurement_units, "imperial");
    }
}
