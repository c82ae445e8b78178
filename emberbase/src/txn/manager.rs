//! Transaction Manager - Lifecycle Coordination for the MVCC Engine
//!
//! Maintains global state about all running transactions and is responsible
//! for creating, committing and aborting them. Commit order equals log order:
//! every updating commit runs inside a single exclusive critical section that
//! covers commit-timestamp allocation, commit-record publication and version
//! flipping.
//!
//! Latch ordering, documented once here because the commit latch spans
//! unrelated operations:
//! - `commit_latch`: shared in `begin`, exclusive in an updating commit,
//!   never taken in `abort`, never held across an unbounded wait (publishing
//!   to the log manager only enqueues), and never acquired while holding any
//!   other latch.
//! - `workers` -> per-worker running-set latch: only nested inside the
//!   watermark scan, released before any other latch is taken.
//! - `running_txns` and `completed_txns` guard short critical sections and
//!   nest inside nothing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::storage::layout::ColumnValue;
use crate::storage::log::manager::LogManager;
use crate::storage::log::record::{CommitCallback, LogRecord};
use crate::storage::record_buffer::RecordBufferPool;
use crate::storage::table::{UndoKind, UndoRecord};
use crate::txn::context::TxnContext;
use crate::txn::timestamp::{Timestamp, TimestampOracle};
use crate::txn::worker::{WorkerContext, WorkerId};
use crate::{EmberError, Result};

// ============================================================================
// Transaction Manager
// ============================================================================

/// Central transaction manager.
///
/// Transactions draw their undo and redo segments from the given buffer
/// pool. With `gc_enabled`, terminated transactions queue up for the garbage
/// collector; with a log manager attached, commit records flow to the WAL
/// and commit callbacks fire only after their record is durable.
pub struct TxnManager {
    buffer_pool: Arc<RecordBufferPool>,
    oracle: TimestampOracle,
    /// Shared by `begin`, exclusive by updating commits
    commit_latch: RwLock<()>,
    /// Running transactions begun without a worker context
    running_txns: Mutex<HashSet<Timestamp>>,
    /// Registered worker contexts
    workers: Mutex<HashMap<WorkerId, Arc<WorkerContext>>>,
    /// Terminated transactions awaiting GC handoff
    completed_txns: Mutex<VecDeque<Arc<TxnContext>>>,
    gc_enabled: bool,
    /// None disables logging: commit callbacks then run synchronously
    log_manager: Option<Arc<LogManager>>,
}

impl TxnManager {
    /// Create a manager drawing record segments from `buffer_pool`
    pub fn new(
        buffer_pool: Arc<RecordBufferPool>,
        gc_enabled: bool,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self {
            buffer_pool,
            oracle: TimestampOracle::new(),
            commit_latch: RwLock::new(()),
            running_txns: Mutex::new(HashSet::new()),
            workers: Mutex::new(HashMap::new()),
            completed_txns: Mutex::new(VecDeque::new()),
            gc_enabled,
            log_manager,
        }
    }

    /// Whether terminated transactions are queued for the GC
    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled
    }

    /// Issue a unique timestamp, advancing one tick
    pub fn next_timestamp(&self) -> Timestamp {
        self.oracle.next()
    }

    // ========================================================================
    // Worker registry
    // ========================================================================

    /// Register a worker so its transactions get a private running-set shard
    pub fn register_worker(&self, worker_id: WorkerId) -> Arc<WorkerContext> {
        let context = Arc::new(WorkerContext::new(worker_id));
        self.workers.lock().insert(worker_id, Arc::clone(&context));
        log::debug!("registered worker {}", worker_id);
        context
    }

    /// Unregister a worker. The caller must ensure no transactions are in
    /// flight on it.
    pub fn unregister_worker(&self, context: &Arc<WorkerContext>) {
        debug_assert_eq!(
            context.running_count(),
            0,
            "unregistering a worker with transactions in flight"
        );
        self.workers.lock().remove(&context.worker_id());
        log::debug!("unregistered worker {}", context.worker_id());
    }

    // ========================================================================
    // Begin
    // ========================================================================

    /// Begin a transaction, optionally tied to a registered worker.
    ///
    /// The commit latch is held shared across timestamp issuance and
    /// running-set insertion: otherwise a concurrent updating commit could
    /// trigger GC reclamation of version chains this transaction needs,
    /// while it is not yet visible to the watermark.
    pub fn begin(&self, worker: Option<&Arc<WorkerContext>>) -> Arc<TxnContext> {
        let _guard = self.commit_latch.read();
        let start_time = self.oracle.next();
        let txn = Arc::new(TxnContext::new(
            start_time,
            Arc::clone(&self.buffer_pool),
            worker.cloned(),
        ));
        let inserted = match worker {
            Some(worker) => worker.insert_running(start_time),
            None => self.running_txns.lock().insert(start_time),
        };
        debug_assert!(inserted, "start times are globally unique");
        txn
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Commit a transaction, making its changes visible to others.
    ///
    /// `callback` runs once the commit record is durable (immediately if
    /// logging is disabled). Returns the commit timestamp.
    pub fn commit(&self, txn: &Arc<TxnContext>, callback: CommitCallback) -> Result<Timestamp> {
        if txn.mark_terminated() {
            return Err(EmberError::TxnAlreadyTerminated(txn.start_time()));
        }
        let is_read_only = txn.is_read_only();
        let commit_time = if is_read_only {
            // No commit can ever depend on a read-only transaction; all of
            // the work stays outside the critical section. The log manager
            // is still told, so speculative reads it may be validating
            // resolve correctly.
            let commit_time = self.oracle.next();
            self.log_commit(txn, commit_time, is_read_only, callback);
            commit_time
        } else {
            // The single serialization point: timestamp allocation, commit
            // record publication and version flipping must not interleave
            // with another updating commit, or a later-timestamped commit
            // could reach the log first and a crash between the two writes
            // would lose the earlier one.
            let _guard = self.commit_latch.write();
            let commit_time = self.oracle.next();
            self.log_commit(txn, commit_time, is_read_only, callback);
            for record in txn.undo_records() {
                record.timestamp().store(commit_time, Ordering::SeqCst);
            }
            commit_time
        };
        self.finish(txn);
        Ok(commit_time)
    }

    /// Publish the commit to the log manager, or simulate it when logging
    /// is disabled.
    fn log_commit(
        &self,
        txn: &Arc<TxnContext>,
        commit_time: Timestamp,
        is_read_only: bool,
        callback: CommitCallback,
    ) {
        // Racing chain readers must see the committed id before any version
        // timestamp flips
        txn.store_txn_id(commit_time);
        match &self.log_manager {
            Some(log_manager) => {
                txn.push_commit_record(LogRecord::commit(
                    txn.start_time(),
                    commit_time,
                    is_read_only,
                    callback,
                    Arc::clone(txn),
                ));
                if let Some(buffer) = txn.finalize_redo(true) {
                    log_manager.publish(buffer);
                }
            }
            None => {
                // Pretend the record was flushed so the rest of the system
                // proceeds
                txn.set_log_processed();
                callback();
                txn.finalize_redo(false);
            }
        }
    }

    // ========================================================================
    // Abort
    // ========================================================================

    /// Abort a transaction, rolling back its changes.
    ///
    /// No commit latch: everything here is transaction-local state plus
    /// per-slot write locks this transaction already holds.
    pub fn abort(&self, txn: &Arc<TxnContext>) -> Result<()> {
        if txn.mark_terminated() {
            return Err(EmberError::TxnAlreadyTerminated(txn.start_time()));
        }
        for record in txn.undo_records().iter().rev() {
            self.rollback(txn, record)?;
        }
        self.gc_last_update_on_abort(txn);
        // Discard whatever was not yet logged out
        txn.finalize_redo(false);
        txn.set_log_processed();
        self.finish(txn);
        Ok(())
    }

    /// Undo one record's worth of changes on its slot.
    fn rollback(&self, txn: &TxnContext, record: &Arc<UndoRecord>) -> Result<()> {
        if !record.is_installed() {
            // Never reached the version chain; nothing to undo
            return Ok(());
        }
        let slot = record.slot();
        let table = record.table().ok_or(EmberError::TableDropped(slot))?;

        // What gets undone is the chain head, not necessarily `record`: each
        // undo record of this transaction on the slot gets exactly one
        // rollback call, so the chain unwinds to the pre-transaction state
        // regardless.
        let head = match table.read_version_ptr(slot)? {
            Some(head) if head.timestamp().load(Ordering::SeqCst) == txn.txn_id() => head,
            _ => return Err(EmberError::WriteLockViolation(slot)),
        };

        match head.kind() {
            UndoKind::Update => {
                let delta = head.delta();
                for (i, col) in delta.col_ids().iter().enumerate() {
                    // The payload about to be overwritten outlives this undo
                    // record; hand it to the GC before reinstating the
                    // before-image.
                    if table.layout().is_varlen(*col) {
                        if let Some(ColumnValue::Varlen(payload)) = table.column_value(slot, *col)?
                        {
                            txn.defer_varlen_free(payload);
                        }
                    }
                    table.write_column(slot, *col, delta.value_cloned(i))?;
                }
            }
            UndoKind::Insert => {
                for col in table.layout().varlen_columns() {
                    if let Some(ColumnValue::Varlen(payload)) = table.column_value(slot, col)? {
                        txn.defer_varlen_free(payload);
                    }
                }
                table.set_visible(slot, false)?;
                table.deallocate(slot)?;
            }
            UndoKind::Delete => table.set_visible(slot, true)?,
        }

        // Unlink the delta, releasing the write lock. No compare-and-swap:
        // we still hold the lock at the time of the write.
        table.write_version_ptr(slot, head.next())?;
        Ok(())
    }

    /// Reclaim varlen payloads of a last update that never got installed.
    ///
    /// A write-write conflict is detected after the redo record is appended
    /// but before the undo record enters the chain; rollback skips the
    /// uninstalled record, so its after-image payloads would leak here.
    fn gc_last_update_on_abort(&self, txn: &TxnContext) {
        let Some((slot, delta)) = txn.last_redo_delta() else {
            // No updates, or the last record is not an after-image
            return;
        };
        if let Some(last_undo) = txn.last_undo() {
            // A matching installed undo record means the update went in and
            // rollback already reclaimed its payloads. A mismatched slot
            // means the undo append itself failed, which leaks exactly like
            // a conflict does.
            if last_undo.slot() == slot && last_undo.is_installed() {
                return;
            }
        }
        for i in 0..delta.num_columns() {
            // The value tag is the layout check: only varlen columns carry
            // payload handles
            if let Some(ColumnValue::Varlen(payload)) = delta.value(i) {
                txn.defer_varlen_free(payload.clone());
            }
        }
    }

    // ========================================================================
    // Cleanup shared by commit and abort
    // ========================================================================

    fn finish(&self, txn: &Arc<TxnContext>) {
        let start_time = txn.start_time();
        let removed = match txn.worker() {
            Some(worker) => worker.remove_running(start_time),
            None => self.running_txns.lock().remove(&start_time),
        };
        debug_assert!(removed, "terminated transaction missing from its running set");
        if self.gc_enabled {
            self.completed_txns.lock().push_back(Arc::clone(txn));
        }
    }

    // ========================================================================
    // Watermark and GC handoff
    // ========================================================================

    /// A timestamp older than every transaction alive in the system.
    ///
    /// The transaction may be gone by the time this returns; the guarantee
    /// is one-sided. Returning older than actual is safe for the GC,
    /// returning younger than any live start would not be.
    pub fn oldest_transaction_start_time(&self) -> Timestamp {
        // Seed with the counter: nothing issued from here on can be older
        let mut oldest = self.oracle.current();
        {
            let workers = self.workers.lock();
            for worker in workers.values() {
                if let Some(min) = worker.oldest_running() {
                    oldest = oldest.min(min);
                }
            }
        }
        let running = self.running_txns.lock();
        if let Some(min) = running.iter().min() {
            oldest = oldest.min(*min);
        }
        oldest
    }

    /// Hand every completed transaction to the caller in one swap, leaving
    /// the internal queue empty
    pub fn completed_transactions_for_gc(&self) -> VecDeque<Arc<TxnContext>> {
        std::mem::take(&mut *self.completed_txns.lock())
    }
}

impl std::fmt::Debug for TxnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnManager")
            .field("gc_enabled", &self.gc_enabled)
            .field("logging", &self.log_manager.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::{BlockLayout, TupleSlot, VarlenEntry};
    use crate::storage::projection::Delta;
    use crate::storage::table::DataTable;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn manager() -> Arc<TxnManager> {
        Arc::new(TxnManager::new(
            Arc::new(RecordBufferPool::new(1024)),
            true,
            None,
        ))
    }

    fn manager_with_log(path: &std::path::Path) -> (Arc<TxnManager>, Arc<LogManager>) {
        let log = Arc::new(LogManager::new(path).unwrap());
        let mgr = Arc::new(TxnManager::new(
            Arc::new(RecordBufferPool::new(1024)),
            true,
            Some(Arc::clone(&log)),
        ));
        (mgr, log)
    }

    fn table() -> Arc<DataTable> {
        // col 0 fixed, col 1 varlen
        Arc::new(DataTable::new(BlockLayout::new(vec![false, true]), 0))
    }

    fn row(n: u64, s: &[u8]) -> Vec<Option<ColumnValue>> {
        vec![
            Some(ColumnValue::Integer(n)),
            Some(ColumnValue::Varlen(VarlenEntry::new(s))),
        ]
    }

    fn noop() -> CommitCallback {
        Box::new(|| {})
    }

    /// Insert a committed row and return its slot
    fn seed_row(mgr: &Arc<TxnManager>, table: &Arc<DataTable>) -> TupleSlot {
        let txn = mgr.begin(None);
        let slot = table.insert(&txn, row(1, b"original")).unwrap();
        mgr.commit(&txn, noop()).unwrap();
        mgr.completed_transactions_for_gc();
        slot
    }

    #[test]
    fn test_read_only_commit() {
        let mgr = manager();
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);

        let txn = mgr.begin(None);
        assert_eq!(txn.start_time(), 0);

        let commit_time = mgr
            .commit(&txn, Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert_eq!(commit_time, 1);
        assert!(invoked.load(Ordering::SeqCst));
        assert!(txn.log_processed());
        assert_eq!(txn.txn_id(), 1);

        // Counter advanced exactly twice, and the running set is empty
        assert_eq!(mgr.next_timestamp(), 2);
        assert_eq!(mgr.oldest_transaction_start_time(), 3);
        assert_eq!(mgr.completed_transactions_for_gc().len(), 1);
    }

    #[test]
    fn test_start_time_precedes_commit_time() {
        let mgr = manager();
        let table = table();
        for _ in 0..5 {
            let txn = mgr.begin(None);
            table.insert(&txn, row(1, b"x")).unwrap();
            let commit_time = mgr.commit(&txn, noop()).unwrap();
            assert!(txn.start_time() < commit_time);
        }
    }

    #[test]
    fn test_double_commit_rejected() {
        let mgr = manager();
        let txn = mgr.begin(None);
        mgr.commit(&txn, noop()).unwrap();

        assert!(matches!(
            mgr.commit(&txn, noop()),
            Err(EmberError::TxnAlreadyTerminated(0))
        ));
        assert!(matches!(
            mgr.abort(&txn),
            Err(EmberError::TxnAlreadyTerminated(0))
        ));
    }

    #[test]
    fn test_commit_flips_undo_timestamps() {
        let mgr = manager();
        let table = table();

        let txn = mgr.begin(None);
        let slot = table.insert(&txn, row(1, b"a")).unwrap();
        table
            .update(&txn, slot, Delta::new(vec![(0, Some(ColumnValue::Integer(2)))]))
            .unwrap();

        let commit_time = mgr.commit(&txn, noop()).unwrap();
        for record in txn.undo_records() {
            assert_eq!(record.timestamp().load(Ordering::SeqCst), commit_time);
        }
        assert_eq!(txn.txn_id(), commit_time);
    }

    #[test]
    fn test_serial_commits_ordered_in_log() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, log) = manager_with_log(&dir.path().join("wal"));
        let table = table();
        let slot = seed_row(&mgr, &table);
        log.process().unwrap();

        let t1 = mgr.begin(None);
        table
            .update(&t1, slot, Delta::new(vec![(0, Some(ColumnValue::Integer(2)))]))
            .unwrap();
        let c1 = mgr.commit(&t1, noop()).unwrap();

        let t2 = mgr.begin(None);
        table
            .update(&t2, slot, Delta::new(vec![(0, Some(ColumnValue::Integer(3)))]))
            .unwrap();
        let c2 = mgr.commit(&t2, noop()).unwrap();

        assert!(c1 < c2);
        log.process().unwrap();
        let commits = log.commit_records();
        assert_eq!(commits.len(), 3); // seed + t1 + t2
        assert_eq!(commits[1], (t1.start_time(), c1));
        assert_eq!(commits[2], (t2.start_time(), c2));
    }

    #[test]
    fn test_concurrent_commits_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, log) = manager_with_log(&dir.path().join("wal"));
        let table = table();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let mgr = Arc::clone(&mgr);
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let txn = mgr.begin(None);
                    table.insert(&txn, row(i, b"payload")).unwrap();
                    let commit_time = mgr.commit(&txn, noop()).unwrap();
                    (txn, commit_time)
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join().unwrap());
        }

        // Every undo record carries its owner's commit timestamp
        for (txn, commit_time) in &results {
            for record in txn.undo_records() {
                assert_eq!(record.timestamp().load(Ordering::SeqCst), *commit_time);
            }
        }

        // The log sees commit records in commit-timestamp order
        log.process().unwrap();
        let commits = log.commit_records();
        assert_eq!(commits.len(), 4);
        let times: Vec<Timestamp> = commits.iter().map(|(_, c)| *c).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_abort_restores_tuple() {
        let mgr = manager();
        let table = table();
        let slot = seed_row(&mgr, &table);
        let head_before = table.read_version_ptr(slot).unwrap().unwrap();

        let reader_ts = mgr.next_timestamp();

        let txn = mgr.begin(None);
        let overwritten = VarlenEntry::new(b"original");
        table
            .update(
                &txn,
                slot,
                Delta::new(vec![
                    (0, Some(ColumnValue::Integer(99))),
                    (1, Some(ColumnValue::Varlen(VarlenEntry::new(b"scratch")))),
                ]),
            )
            .unwrap();
        mgr.abort(&txn).unwrap();

        // Tuple reads exactly as before the update
        let tuple = table.select(slot, reader_ts).unwrap();
        assert_eq!(tuple[0], Some(ColumnValue::Integer(1)));
        assert_eq!(tuple[1], Some(ColumnValue::Varlen(overwritten)));

        // The chain head is the pre-transaction head again
        let head_after = table.read_version_ptr(slot).unwrap().unwrap();
        assert!(Arc::ptr_eq(&head_before, &head_after));

        // The overwritten payload went to the loose list
        let loose = txn.loose_varlens();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].as_bytes(), b"scratch");
    }

    #[test]
    fn test_abort_of_insert_deallocates_slot() {
        let mgr = manager();
        let table = table();

        let txn = mgr.begin(None);
        let slot = table.insert(&txn, row(7, b"fresh")).unwrap();
        mgr.abort(&txn).unwrap();

        assert!(table.select(slot, mgr.next_timestamp()).is_none());
        // The inserted varlen payload is reclaimed
        let loose = txn.loose_varlens();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].as_bytes(), b"fresh");
    }

    #[test]
    fn test_abort_of_delete_restores_visibility() {
        let mgr = manager();
        let table = table();
        let slot = seed_row(&mgr, &table);

        let txn = mgr.begin(None);
        table.delete(&txn, slot).unwrap();
        mgr.abort(&txn).unwrap();

        assert!(table.select(slot, mgr.next_timestamp()).is_some());
        assert!(txn.loose_varlens().is_empty());
    }

    #[test]
    fn test_abort_reclaims_uninstalled_varlen() {
        let mgr = manager();
        let table = table();
        let slot_a = seed_row(&mgr, &table);
        let slot_b = seed_row(&mgr, &table);
        let head_a_before = table.read_version_ptr(slot_a).unwrap().unwrap();

        // A concurrent writer holds the write lock on slot_b
        let blocker = mgr.begin(None);
        table
            .update(
                &blocker,
                slot_b,
                Delta::new(vec![(0, Some(ColumnValue::Integer(50)))]),
            )
            .unwrap();

        let txn = mgr.begin(None);
        // First update installs fine (fixed column only)
        table
            .update(
                &txn,
                slot_a,
                Delta::new(vec![(0, Some(ColumnValue::Integer(2)))]),
            )
            .unwrap();
        // Second update carries a varlen and hits the conflict
        let err = table
            .update(
                &txn,
                slot_b,
                Delta::new(vec![(1, Some(ColumnValue::Varlen(VarlenEntry::new(b"lost"))))]),
            )
            .unwrap_err();
        assert!(matches!(err, EmberError::WriteWriteConflict(s) if s == slot_b));

        mgr.abort(&txn).unwrap();

        // Exactly the uninstalled update's payload was reclaimed
        let loose = txn.loose_varlens();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].as_bytes(), b"lost");

        // slot_a's chain head is what it was before the transaction
        let head_a_after = table.read_version_ptr(slot_a).unwrap().unwrap();
        assert!(Arc::ptr_eq(&head_a_before, &head_a_after));

        mgr.abort(&blocker).unwrap();
    }

    #[test]
    fn test_rollback_requires_write_lock() {
        let mgr = manager();
        let table = table();
        let slot = seed_row(&mgr, &table);

        let txn = mgr.begin(None);
        table
            .update(&txn, slot, Delta::new(vec![(0, Some(ColumnValue::Integer(2)))]))
            .unwrap();

        // Sabotage: replace the head with a record owned by nobody
        let foreign = Arc::new(UndoRecord::new_delete(slot, 0xDEAD));
        table.write_version_ptr(slot, Some(foreign)).unwrap();

        assert!(matches!(
            mgr.abort(&txn),
            Err(EmberError::WriteLockViolation(s)) if s == slot
        ));
    }

    #[test]
    fn test_watermark_across_workers() {
        let mgr = manager();
        let w1 = mgr.register_worker(1);
        let w2 = mgr.register_worker(2);

        let t_a = mgr.begin(Some(&w1)); // start 0
        let t_b = mgr.begin(Some(&w2)); // start 1
        let t_c = mgr.begin(None); // start 2

        assert_eq!(t_a.start_time(), 0);
        assert_eq!(mgr.oldest_transaction_start_time(), 0);

        mgr.commit(&t_a, noop()).unwrap();
        assert_eq!(mgr.oldest_transaction_start_time(), 1);

        mgr.commit(&t_b, noop()).unwrap();
        assert_eq!(mgr.oldest_transaction_start_time(), 2);

        mgr.commit(&t_c, noop()).unwrap();
        // Nothing running: the counter value is the lower bound
        assert_eq!(mgr.oldest_transaction_start_time(), mgr.oracle.current());

        mgr.unregister_worker(&w1);
        mgr.unregister_worker(&w2);
        assert!(mgr.workers.lock().is_empty());
    }

    #[test]
    fn test_drain_completed_idempotent() {
        let mgr = manager();
        let txn = mgr.begin(None);
        mgr.commit(&txn, noop()).unwrap();

        assert_eq!(mgr.completed_transactions_for_gc().len(), 1);
        assert!(mgr.completed_transactions_for_gc().is_empty());
    }

    #[test]
    fn test_gc_disabled_skips_handoff() {
        let mgr = Arc::new(TxnManager::new(
            Arc::new(RecordBufferPool::new(64)),
            false,
            None,
        ));
        let txn = mgr.begin(None);
        mgr.commit(&txn, noop()).unwrap();
        assert!(mgr.completed_transactions_for_gc().is_empty());
    }

    #[test]
    fn test_begin_gap_blocks_updating_commit() {
        let mgr = manager();
        let table = table();
        let slot = seed_row(&mgr, &table);

        let txn = mgr.begin(None);
        table
            .update(&txn, slot, Delta::new(vec![(0, Some(ColumnValue::Integer(2)))]))
            .unwrap();

        // Emulate another thread stalled inside begin, between timestamp
        // issuance and running-set insertion
        let begin_gap = mgr.commit_latch.read();

        let committer = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || mgr.commit(&txn, noop()).unwrap())
        };

        // The updating commit cannot reach the GC handoff while the begin
        // gap is open
        thread::sleep(Duration::from_millis(50));
        assert!(mgr.completed_txns.lock().is_empty());

        drop(begin_gap);
        committer.join().unwrap();
        assert_eq!(mgr.completed_transactions_for_gc().len(), 1);
    }

    #[test]
    fn test_buffer_exhaustion_surfaces_from_update() {
        let mgr = Arc::new(TxnManager::new(
            Arc::new(RecordBufferPool::new(0)),
            false,
            None,
        ));
        let table = table();
        let txn = mgr.begin(None);
        assert!(matches!(
            table.insert(&txn, row(1, b"x")),
            Err(EmberError::BufferPoolExhausted)
        ));
        // Abort is still safe
        mgr.abort(&txn).unwrap();
    }

    #[test]
    fn test_read_only_commit_with_logging_defers_callback() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, log) = manager_with_log(&dir.path().join("wal"));
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);

        let txn = mgr.begin(None);
        mgr.commit(&txn, Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();

        // Not durable yet: callback pending, records still queued
        assert!(!invoked.load(Ordering::SeqCst));
        assert!(!txn.log_processed());

        log.process().unwrap();
        assert!(invoked.load(Ordering::SeqCst));
        assert!(txn.log_processed());
    }
}
