//! Transaction Context - Per-Transaction State
//!
//! Owns everything a single transaction accumulates while running: the undo
//! buffer (before-images, walked in reverse on abort and timestamp-flipped
//! on commit), the redo buffer (after-images destined for the log), and the
//! loose varlen list (payloads whose lifetime outlives their undo record and
//! that the GC must free).
//!
//! The undo and redo buffers are single-writer while the transaction runs;
//! after commit they are read-only to the log manager and the GC.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::layout::{TupleSlot, VarlenEntry};
use crate::storage::log::record::LogRecord;
use crate::storage::projection::Delta;
use crate::storage::record_buffer::{FinalizedBuffer, RecordBufferPool, RedoBuffer, UndoBuffer};
use crate::storage::table::UndoRecord;
use crate::txn::timestamp::{speculative_id, Timestamp};
use crate::txn::worker::WorkerContext;
use crate::Result;

// ============================================================================
// Transaction Context
// ============================================================================

/// State of one transaction from begin to commit or abort.
///
/// Shared as `Arc`: the manager's completed queue, the log manager's commit
/// record, and the caller all hold handles. Interior mutability covers the
/// append paths; the transaction id and bookkeeping flags are atomics so
/// concurrent readers of version chains see consistent values.
pub struct TxnContext {
    start_time: Timestamp,
    /// Speculative id while running; rewritten to the commit timestamp
    txn_id: AtomicU64,
    undo_buffer: Mutex<UndoBuffer>,
    redo_buffer: Mutex<RedoBuffer>,
    /// Varlen payloads awaiting reclamation by the GC
    loose_varlens: Mutex<Vec<VarlenEntry>>,
    /// No further log records will arrive for this transaction
    log_processed: AtomicBool,
    /// Guards against committing or aborting twice
    terminated: AtomicBool,
    worker: Option<Arc<WorkerContext>>,
}

impl TxnContext {
    pub(crate) fn new(
        start_time: Timestamp,
        pool: Arc<RecordBufferPool>,
        worker: Option<Arc<WorkerContext>>,
    ) -> Self {
        Self {
            start_time,
            txn_id: AtomicU64::new(speculative_id(start_time)),
            undo_buffer: Mutex::new(UndoBuffer::new(Arc::clone(&pool))),
            redo_buffer: Mutex::new(RedoBuffer::new(pool)),
            loose_varlens: Mutex::new(Vec::new()),
            log_processed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            worker,
        }
    }

    /// Start timestamp of this transaction
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Current transaction id: speculative while running, the commit
    /// timestamp afterwards
    pub fn txn_id(&self) -> u64 {
        self.txn_id.load(Ordering::SeqCst)
    }

    pub(crate) fn store_txn_id(&self, id: u64) {
        self.txn_id.store(id, Ordering::SeqCst);
    }

    /// Whether the transaction has written no undo records
    pub fn is_read_only(&self) -> bool {
        self.undo_buffer.lock().is_empty()
    }

    /// The worker context this transaction was started on, if any
    pub fn worker(&self) -> Option<&Arc<WorkerContext>> {
        self.worker.as_ref()
    }

    /// Whether the log manager has seen every record of this transaction
    pub fn log_processed(&self) -> bool {
        self.log_processed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_log_processed(&self) {
        self.log_processed.store(true, Ordering::SeqCst);
    }

    /// Mark the transaction terminated; returns whether it already was
    pub(crate) fn mark_terminated(&self) -> bool {
        self.terminated.swap(true, Ordering::SeqCst)
    }

    /// Whether commit or abort has run for this transaction
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Undo buffer
    // ========================================================================

    /// Append an undo record, returning the shared handle that the version
    /// chain will also reference once the record is installed
    pub(crate) fn append_undo(&self, record: UndoRecord) -> Result<Arc<UndoRecord>> {
        let record = Arc::new(record);
        self.undo_buffer.lock().push(Arc::clone(&record))?;
        Ok(record)
    }

    /// Snapshot of the undo records in append order
    pub(crate) fn undo_records(&self) -> Vec<Arc<UndoRecord>> {
        self.undo_buffer.lock().records().to_vec()
    }

    /// The most recently appended undo record
    pub(crate) fn last_undo(&self) -> Option<Arc<UndoRecord>> {
        self.undo_buffer.lock().last().cloned()
    }

    /// Number of undo records
    pub fn undo_len(&self) -> usize {
        self.undo_buffer.lock().len()
    }

    // ========================================================================
    // Redo buffer
    // ========================================================================

    pub(crate) fn append_redo(&self, record: LogRecord) -> Result<()> {
        self.redo_buffer.lock().push(record)
    }

    pub(crate) fn push_commit_record(&self, record: LogRecord) {
        self.redo_buffer.lock().push_commit(record);
    }

    /// Slot and after-image of the last redo record, if the last record is
    /// an after-image redo at all
    pub(crate) fn last_redo_delta(&self) -> Option<(TupleSlot, Delta)> {
        match self.redo_buffer.lock().last() {
            Some(LogRecord::Redo(r)) => Some((r.slot, r.delta.clone())),
            _ => None,
        }
    }

    /// Finalize the redo buffer: publish its records for the log manager or
    /// discard them
    pub(crate) fn finalize_redo(&self, publish: bool) -> Option<FinalizedBuffer> {
        self.redo_buffer.lock().finalize(publish)
    }

    // ========================================================================
    // Loose varlens
    // ========================================================================

    /// Defer a varlen payload for reclamation by the GC
    pub fn defer_varlen_free(&self, payload: VarlenEntry) {
        self.loose_varlens.lock().push(payload);
    }

    /// Snapshot of the deferred payloads
    pub fn loose_varlens(&self) -> Vec<VarlenEntry> {
        self.loose_varlens.lock().clone()
    }

    /// Take ownership of the deferred payloads; dropping them is the free
    pub fn take_loose_varlens(&self) -> Vec<VarlenEntry> {
        std::mem::take(&mut *self.loose_varlens.lock())
    }
}

impl std::fmt::Debug for TxnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnContext")
            .field("start_time", &self.start_time)
            .field("txn_id", &self.txn_id())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::table::UndoRecord;
    use crate::txn::timestamp::is_speculative;

    fn context() -> TxnContext {
        TxnContext::new(5, Arc::new(RecordBufferPool::new(16)), None)
    }

    #[test]
    fn test_speculative_id_until_committed() {
        let txn = context();
        assert_eq!(txn.start_time(), 5);
        assert!(is_speculative(txn.txn_id()));

        txn.store_txn_id(9);
        assert_eq!(txn.txn_id(), 9);
        assert!(!is_speculative(txn.txn_id()));
    }

    #[test]
    fn test_undo_append_order() {
        let txn = context();
        assert!(txn.is_read_only());

        for offset in 0..3 {
            txn.append_undo(UndoRecord::new_delete(
                TupleSlot::new(0, offset),
                txn.txn_id(),
            ))
            .unwrap();
        }

        assert!(!txn.is_read_only());
        let records = txn.undo_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].slot().offset, 0);
        assert_eq!(txn.last_undo().unwrap().slot().offset, 2);
    }

    #[test]
    fn test_terminated_swaps_once() {
        let txn = context();
        assert!(!txn.mark_terminated());
        assert!(txn.mark_terminated());
        assert!(txn.is_terminated());
    }

    #[test]
    fn test_loose_varlens_taken_once() {
        let txn = context();
        txn.defer_varlen_free(VarlenEntry::new(b"a"));
        txn.defer_varlen_free(VarlenEntry::new(b"b"));
        assert_eq!(txn.loose_varlens().len(), 2);

        let taken = txn.take_loose_varlens();
        assert_eq!(taken.len(), 2);
        assert!(txn.loose_varlens().is_empty());
    }

    #[test]
    fn test_last_redo_delta_only_for_redo_records() {
        let txn = context();
        assert!(txn.last_redo_delta().is_none());

        txn.append_redo(LogRecord::delete(5, TupleSlot::new(0, 1)))
            .unwrap();
        assert!(txn.last_redo_delta().is_none());

        txn.append_redo(LogRecord::redo(5, TupleSlot::new(0, 2), Delta::empty()))
            .unwrap();
        let (slot, _) = txn.last_redo_delta().unwrap();
        assert_eq!(slot, TupleSlot::new(0, 2));
    }
}
