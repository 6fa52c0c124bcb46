//! Durable offline queue using redb.
//!
//! Writes attempted while offline (or that fail outright) are persisted here
//! and replayed when connectivity returns. The queue guarantees at-least-once
//! replay in enqueue order; it never dedups, so multiple queued writes to the
//! same entity stay distinct and replay in the order they were made.
//!
//! Records are keyed by a monotonic sequence number so store iteration order
//! is exactly enqueue order, across process restarts. The operation's own id
//! (`<collection>-<ULID>`) is what callers hold; lookups by id scan the
//! table, which is fine at offline-queue sizes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::{Collection, OperationKind, QueueStatus, QueuedOperation};

const QUEUE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("offline_queue");

/// What happened to a queued operation after a failed replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Kept for the next drain; carries the new retry count
    Retained(u32),
    /// Retry cap reached; the operation was dropped for good
    Discarded,
}

/// Durable store of deferred write operations.
///
/// Cheap to clone; all clones share the same database handle. Callers only
/// ever see whole-record snapshots, never references into the store.
#[derive(Clone)]
pub struct OfflineQueue {
    db: Arc<RwLock<Database>>,
    next_seq: Arc<AtomicU64>,
}

impl OfflineQueue {
    /// Open (or create) the queue database at the given path.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        // Initialize the table and recover the sequence counter
        let next_seq;
        {
            let write_txn = db.begin_write()?;
            {
                let table = write_txn.open_table(QUEUE_TABLE)?;
                next_seq = match table.iter()?.next_back() {
                    Some(entry) => {
                        let (key, _) = entry?;
                        key.value() + 1
                    }
                    None => 0,
                };
            }
            write_txn.commit()?;
        }

        info!(?path, next_seq, "Opened offline queue");
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            next_seq: Arc::new(AtomicU64::new(next_seq)),
        })
    }

    /// Append a deferred operation. Returns the stored record.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        collection: Collection,
        payload: serde_json::Value,
    ) -> EngineResult<QueuedOperation> {
        let op = QueuedOperation::new(kind, collection, payload);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(QUEUE_TABLE)?;
            let data = serde_json::to_vec(&op)?;
            table.insert(seq, data.as_slice())?;
        }
        write_txn.commit()?;

        debug!(op_id = %op.id, %collection, ?kind, "Queued offline operation");
        Ok(op)
    }

    /// Snapshot of all pending operations, oldest first.
    pub fn list_all(&self) -> EngineResult<Vec<QueuedOperation>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(QUEUE_TABLE)?;

        let mut ops = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let op: QueuedOperation = serde_json::from_slice(value.value())?;
            ops.push(op);
        }
        Ok(ops)
    }

    /// Remove an operation by its id. Removing a nonexistent id is a no-op.
    pub fn remove(&self, id: &str) -> EngineResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(QUEUE_TABLE)?;
            if let Some(seq) = Self::find_seq(&table, id)? {
                table.remove(seq)?;
                debug!(op_id = %id, "Removed queued operation");
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drop every pending operation. Used by explicit data-reset flows.
    pub fn clear(&self) -> EngineResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(QUEUE_TABLE)?;
            let keys: Vec<u64> = {
                let mut keys = Vec::new();
                for entry in table.iter()? {
                    let (key, _) = entry?;
                    keys.push(key.value());
                }
                keys
            };
            for key in keys {
                table.remove(key)?;
            }
        }
        write_txn.commit()?;
        info!("Cleared offline queue");
        Ok(())
    }

    /// Count and oldest-entry timestamp, for "syncing N changes" indicators.
    pub fn status(&self) -> EngineResult<QueueStatus> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(QUEUE_TABLE)?;

        let mut iter = table.iter()?;
        let oldest_timestamp = match iter.next() {
            Some(entry) => {
                let (_, value) = entry?;
                let op: QueuedOperation = serde_json::from_slice(value.value())?;
                Some(op.timestamp)
            }
            None => None,
        };
        let count = if oldest_timestamp.is_some() {
            1 + iter.count()
        } else {
            0
        };
        Ok(QueueStatus {
            count,
            oldest_timestamp,
        })
    }

    /// Record a failed replay attempt for an operation.
    ///
    /// Increments the retry count and re-persists the record, unless the
    /// count has reached `max_attempts`, in which case the operation is
    /// discarded. Data loss past the cap is an accepted degradation.
    pub fn record_failure(&self, id: &str, max_attempts: u32) -> EngineResult<ReplayOutcome> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(QUEUE_TABLE)?;
            match Self::find_seq(&table, id)? {
                // Already gone; treat as discarded
                None => ReplayOutcome::Discarded,
                Some(seq) => {
                    let mut op: QueuedOperation = {
                        let value = table.get(seq)?.ok_or_else(|| {
                            EngineError::Storage(format!("queue record vanished: {}", id))
                        })?;
                        serde_json::from_slice(value.value())?
                    };

                    op.retry_count += 1;
                    if op.retry_count >= max_attempts {
                        table.remove(seq)?;
                        warn!(op_id = %id, retries = op.retry_count, "Discarding queued operation after retry cap");
                        ReplayOutcome::Discarded
                    } else {
                        let data = serde_json::to_vec(&op)?;
                        table.insert(seq, data.as_slice())?;
                        debug!(op_id = %id, retries = op.retry_count, "Retained queued operation for next drain");
                        ReplayOutcome::Retained(op.retry_count)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    fn find_seq(
        table: &impl ReadableTable<u64, &'static [u8]>,
        id: &str,
    ) -> EngineResult<Option<u64>> {
        for entry in table.iter()? {
            let (key, value) = entry?;
            let op: QueuedOperation = serde_json::from_slice(value.value())?;
            if op.id == id {
                return Ok(Some(key.value()));
            }
        }
        Ok(None)
    }
}
