//! Worker Context - Per-Worker Running-Set Shard
//!
//! Registering a worker gives its transactions a private running set, so
//! begin and finish on that worker contend only with the watermark scan
//! instead of with every other worker in the system.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::txn::timestamp::Timestamp;

/// Identifier of a registered worker thread
pub type WorkerId = u32;

/// A worker's shard of the running-transaction set.
///
/// The set is latched shared by the watermark scan and exclusively by
/// begin/finish. Owned by the manager's registry; handles are `Arc` clones
/// and the context is dropped once the registry and all transactions on the
/// worker have released theirs.
#[derive(Debug)]
pub struct WorkerContext {
    worker_id: WorkerId,
    running_txns: RwLock<HashSet<Timestamp>>,
}

impl WorkerContext {
    pub(crate) fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            running_txns: RwLock::new(HashSet::new()),
        }
    }

    /// Id of the worker this context belongs to
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub(crate) fn insert_running(&self, start_time: Timestamp) -> bool {
        self.running_txns.write().insert(start_time)
    }

    pub(crate) fn remove_running(&self, start_time: Timestamp) -> bool {
        self.running_txns.write().remove(&start_time)
    }

    /// Oldest running start time on this worker, under the shared latch
    pub(crate) fn oldest_running(&self) -> Option<Timestamp> {
        self.running_txns.read().iter().min().copied()
    }

    /// Number of transactions currently running on this worker
    pub fn running_count(&self) -> usize {
        self.running_txns.read().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
