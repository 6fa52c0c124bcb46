//! Foamworks Core Library
//!
//! Offline-resilience engine for the Foamworks contractor app (CRM,
//! estimating, inventory). The hosted backend and the UI both live
//! elsewhere; this crate is the layer between them that keeps the app
//! usable on a job site with bad signal:
//!
//! - **Staged loading**: settings, then customers/estimates, then
//!   inventory, in the background; the UI renders immediately.
//! - **Bounded retry**: every remote call gets exponential backoff.
//! - **Durable offline queue**: writes made offline persist across
//!   restarts and replay in order on reconnect.
//! - **Optimistic writes with echo suppression**: local edits show
//!   instantly and the realtime echo of our own write is ignored while it
//!   settles.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use foamworks_core::{DataEngine, EngineConfig};
//!
//! # async fn run(store: Arc<dyn foamworks_core::RemoteStore>,
//! #              connectivity: tokio::sync::watch::Receiver<bool>,
//! #              push_rx: foamworks_core::PushReceiver) -> anyhow::Result<()> {
//! let engine = DataEngine::new("~/.foamworks/data", store, connectivity, EngineConfig::default())?;
//! engine.start(push_rx);
//!
//! // Render immediately; snapshots fill in as phases land
//! let customers = engine.customers();
//! let pending = engine.queue_status();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod loader;
pub mod monitor;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod state;
pub mod types;

// Re-exports
pub use config::{EngineConfig, RetryPolicy};
pub use engine::DataEngine;
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, LoadPhase, Notice};
pub use loader::{LoadOutcome, StagedLoader};
pub use monitor::{DrainReport, NetworkMonitor};
pub use queue::{OfflineQueue, ReplayOutcome};
pub use reconcile::{RealtimeSubscription, SuppressionSet};
pub use remote::{PushMessage, PushReceiver, RemoteStore};
pub use retry::with_retry;
pub use state::AppState;
pub use types::*;
