//! Engine event types.
//!
//! The engine broadcasts these to its UI/caller layer over a single
//! `tokio::sync::broadcast` channel: many subscribers, lossy under
//! backpressure (slow subscribers skip, they never block the engine).

use std::fmt;

use crate::types::Collection;

/// Phases of a staged load cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Settings gate currency/units rendering, so they come first
    Settings,
    /// Customers and estimates, fetched concurrently
    Records,
    /// Inventory is supplementary and safe to arrive last
    Inventory,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::Settings => write!(f, "settings"),
            LoadPhase::Records => write!(f, "customers/estimates"),
            LoadPhase::Inventory => write!(f, "inventory"),
        }
    }
}

/// Non-blocking, toast-style notices surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Connectivity was lost; writes will queue locally
    WorkingOffline,
    /// Connectivity returned
    ConnectionRestored,
    /// The realtime push channel dropped; state will resync on next load
    LiveUpdatesPaused,
    /// A background load failed; previously loaded data is still shown
    SyncErrorUsingCached,
    /// Some queued operations could not be replayed
    SyncFailed { count: usize },
    /// A user-initiated save or delete failed outright
    ActionFailed { collection: Collection },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::WorkingOffline => write!(f, "Working offline — changes will sync when you reconnect"),
            Notice::ConnectionRestored => write!(f, "Connection restored"),
            Notice::LiveUpdatesPaused => write!(f, "Live updates paused"),
            Notice::SyncErrorUsingCached => write!(f, "Sync error — using cached data"),
            Notice::SyncFailed { count } => write!(f, "Failed to sync {} changes", count),
            Notice::ActionFailed { collection } => {
                write!(f, "Could not save your {} change — please retry", collection)
            }
        }
    }
}

/// Events emitted by the engine for UI consumption.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A collection snapshot changed (load merge, optimistic write, or
    /// reconciled realtime event)
    CollectionUpdated { collection: Collection },
    /// A staged load cycle settled
    LoadFinished { cycle: u64, success: bool },
    /// One load phase failed after exhausting retries
    LoadPhaseFailed { phase: LoadPhase, message: String },
    /// A queue drain finished
    QueueDrained { succeeded: usize, failed: usize },
    /// Connectivity transition observed by the monitor
    Connectivity { online: bool },
    /// A user-facing notice
    Notice(Notice),
}
