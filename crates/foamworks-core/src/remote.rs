//! Remote store boundary.
//!
//! The hosted backend (CRUD per collection plus a push channel for change
//! notifications) is an external collaborator; the engine only sees these
//! interfaces. Entities cross the boundary as JSON documents and are
//! deserialized into typed state on merge.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::EngineResult;
use crate::types::{ChangeEvent, ChannelStatus, Collection};

/// Async CRUD interface to the hosted data store.
///
/// Any failure may be transient or permanent; the engine cannot tell the
/// difference and retries everything up to the executor's cap.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch every document in a collection.
    async fn fetch_all(&self, collection: Collection) -> EngineResult<Vec<Value>>;

    /// Create-or-update a document; returns the server's saved version.
    async fn save(&self, collection: Collection, entity: Value) -> EngineResult<Value>;

    /// Delete a document by id.
    async fn delete(&self, collection: Collection, id: &str) -> EngineResult<()>;
}

/// One message from the push channel: either a data change or a
/// connection-status transition of the channel itself.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Change(ChangeEvent),
    Status(ChannelStatus),
}

/// Receiving half of a push subscription, as handed to the
/// reconciliation subscription. Delivery order is preserved; the channel
/// closing is reported as `ChannelStatus::Closed` by the sender or by
/// stream end.
pub type PushReceiver = mpsc::Receiver<PushMessage>;
