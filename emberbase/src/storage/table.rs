//! Data Table - In-Memory Tuples with Delta Version Chains
//!
//! Each allocated slot holds the master tuple (the newest data), a
//! visibility flag, and the head of a chain of undo records ordered newest
//! first. The chain head doubles as the slot's write lock: a head stamped
//! with a speculative transaction id belongs to that transaction, and no
//! other writer may install until it commits or rolls back.
//!
//! Installation is first-writer-wins: updating a slot whose head is owned by
//! another in-flight transaction, or committed after the updater's start
//! time, fails with a write-write conflict and leaves the freshly appended
//! undo record uninstalled. The abort path recognizes such records by their
//! unset table back-reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::storage::layout::{BlockLayout, ColId, ColumnValue, TupleSlot};
use crate::storage::log::record::LogRecord;
use crate::storage::projection::Delta;
use crate::txn::context::TxnContext;
use crate::txn::timestamp::{is_speculative, Timestamp};
use crate::{EmberError, Result};

// ============================================================================
// Undo Records
// ============================================================================

/// What a single undo record reverses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    /// Restore the before-image of the changed columns
    Update,
    /// Remove the inserted tuple
    Insert,
    /// Re-expose the deleted tuple
    Delete,
}

/// A before-image delta in a slot's version chain.
///
/// Shared between the owning transaction's undo buffer and the chain via
/// `Arc`. The timestamp starts as the owner's speculative id and is flipped
/// to the commit timestamp inside the commit critical section. The table
/// back-reference is set exactly once, at install time; a record whose
/// back-reference is unset was never installed (write-write conflict) and
/// is skipped by rollback.
#[derive(Debug)]
pub struct UndoRecord {
    kind: UndoKind,
    slot: TupleSlot,
    timestamp: AtomicU64,
    delta: Delta,
    /// Weak to break the table -> slot -> record -> table cycle
    table: OnceCell<Weak<DataTable>>,
    next: Mutex<Option<Arc<UndoRecord>>>,
}

impl UndoRecord {
    /// Before-image record for an update
    pub fn new_update(slot: TupleSlot, txn_id: u64, before_image: Delta) -> Self {
        Self::new(UndoKind::Update, slot, txn_id, before_image)
    }

    /// Record reversing an insert
    pub fn new_insert(slot: TupleSlot, txn_id: u64) -> Self {
        Self::new(UndoKind::Insert, slot, txn_id, Delta::empty())
    }

    /// Record reversing a delete
    pub fn new_delete(slot: TupleSlot, txn_id: u64) -> Self {
        Self::new(UndoKind::Delete, slot, txn_id, Delta::empty())
    }

    fn new(kind: UndoKind, slot: TupleSlot, txn_id: u64, delta: Delta) -> Self {
        Self {
            kind,
            slot,
            timestamp: AtomicU64::new(txn_id),
            delta,
            table: OnceCell::new(),
            next: Mutex::new(None),
        }
    }

    /// What this record reverses
    pub fn kind(&self) -> UndoKind {
        self.kind
    }

    /// Slot the record applies to
    pub fn slot(&self) -> TupleSlot {
        self.slot
    }

    /// Before-image delta (empty for insert and delete records)
    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    /// Version timestamp: the owner's speculative id until commit flips it
    pub fn timestamp(&self) -> &AtomicU64 {
        &self.timestamp
    }

    /// Whether the record was installed into a version chain
    pub fn is_installed(&self) -> bool {
        self.table.get().is_some()
    }

    /// The table the record was installed into, if it is still alive
    pub fn table(&self) -> Option<Arc<DataTable>> {
        self.table.get().and_then(Weak::upgrade)
    }

    /// Next older record in the chain
    pub fn next(&self) -> Option<Arc<UndoRecord>> {
        self.next.lock().clone()
    }

    fn install(&self, table: Weak<DataTable>, next: Option<Arc<UndoRecord>>) {
        *self.next.lock() = next;
        let fresh = self.table.set(table).is_ok();
        debug_assert!(fresh, "undo record installed twice");
    }

    pub(crate) fn set_next(&self, next: Option<Arc<UndoRecord>>) {
        *self.next.lock() = next;
    }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug)]
struct SlotState {
    /// Master tuple: the newest column values
    columns: Mutex<Vec<Option<ColumnValue>>>,
    /// Head of the version chain; also the slot's write lock
    version_ptr: Mutex<Option<Arc<UndoRecord>>>,
    /// Clear means logically deleted
    visible: AtomicBool,
    allocated: AtomicBool,
}

// ============================================================================
// Data Table
// ============================================================================

/// An in-memory table of versioned tuples
#[derive(Debug)]
pub struct DataTable {
    layout: BlockLayout,
    block: u32,
    slots: RwLock<HashMap<TupleSlot, Arc<SlotState>>>,
    next_offset: AtomicU32,
}

impl DataTable {
    /// Create an empty table with the given layout; `block` distinguishes
    /// this table's slots from other tables'
    pub fn new(layout: BlockLayout, block: u32) -> Self {
        Self {
            layout,
            block,
            slots: RwLock::new(HashMap::new()),
            next_offset: AtomicU32::new(0),
        }
    }

    /// Column layout of this table
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn state(&self, slot: TupleSlot) -> Result<Arc<SlotState>> {
        self.slots
            .read()
            .get(&slot)
            .cloned()
            .ok_or(EmberError::SlotNotFound(slot))
    }

    fn allocated_state(&self, slot: TupleSlot) -> Result<Arc<SlotState>> {
        let state = self.state(slot)?;
        if !state.allocated.load(Ordering::SeqCst) {
            return Err(EmberError::SlotNotFound(slot));
        }
        Ok(state)
    }

    /// A head may be replaced only when it is ours or committed no later
    /// than our start time; everything else is a write-write conflict.
    fn check_write_lock(
        &self,
        head: &Option<Arc<UndoRecord>>,
        txn: &TxnContext,
        slot: TupleSlot,
    ) -> Result<()> {
        if let Some(head) = head {
            let ts = head.timestamp().load(Ordering::SeqCst);
            let owned_by_us = ts == txn.txn_id();
            let committed_before_us = !is_speculative(ts) && ts <= txn.start_time();
            if !owned_by_us && !committed_before_us {
                return Err(EmberError::WriteWriteConflict(slot));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a tuple, allocating a fresh slot.
    ///
    /// Appends the full after-image to the redo buffer and an insert undo
    /// record to the undo buffer; the record becomes the slot's first chain
    /// head.
    pub fn insert(
        self: &Arc<Self>,
        txn: &TxnContext,
        values: Vec<Option<ColumnValue>>,
    ) -> Result<TupleSlot> {
        debug_assert_eq!(values.len(), self.layout.num_columns());
        let slot = TupleSlot::new(self.block, self.next_offset.fetch_add(1, Ordering::SeqCst));

        let after_image = Delta::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (i as ColId, v.clone()))
                .collect(),
        );
        txn.append_redo(LogRecord::redo(txn.start_time(), slot, after_image))?;
        let record = txn.append_undo(UndoRecord::new_insert(slot, txn.txn_id()))?;

        record.install(Arc::downgrade(self), None);
        let state = Arc::new(SlotState {
            columns: Mutex::new(values),
            version_ptr: Mutex::new(Some(record)),
            visible: AtomicBool::new(true),
            allocated: AtomicBool::new(true),
        });
        self.slots.write().insert(slot, state);
        Ok(slot)
    }

    /// Update the projected columns of a tuple.
    ///
    /// The redo record and the undo record are appended before the install
    /// attempt; a write-write conflict therefore leaves the last undo record
    /// uninstalled, which the abort path uses to reclaim the after-image's
    /// varlen payloads.
    pub fn update(self: &Arc<Self>, txn: &TxnContext, slot: TupleSlot, delta: Delta) -> Result<()> {
        let state = self.allocated_state(slot)?;
        txn.append_redo(LogRecord::redo(txn.start_time(), slot, delta.clone()))?;

        let before_image = {
            let columns = state.columns.lock();
            Delta::new(
                delta
                    .col_ids()
                    .iter()
                    .map(|col| (*col, columns.get(*col as usize).cloned().flatten()))
                    .collect(),
            )
        };
        let record = txn.append_undo(UndoRecord::new_update(slot, txn.txn_id(), before_image))?;

        let mut head = state.version_ptr.lock();
        self.check_write_lock(&head, txn, slot)?;
        record.install(Arc::downgrade(self), head.clone());
        *head = Some(record);
        // Holding the write lock now: apply the after-image to the master
        delta.apply_to(&mut state.columns.lock());
        Ok(())
    }

    /// Delete a tuple (logical: the master data stays for older readers)
    pub fn delete(self: &Arc<Self>, txn: &TxnContext, slot: TupleSlot) -> Result<()> {
        let state = self.allocated_state(slot)?;
        txn.append_redo(LogRecord::delete(txn.start_time(), slot))?;
        let record = txn.append_undo(UndoRecord::new_delete(slot, txn.txn_id()))?;

        let mut head = state.version_ptr.lock();
        self.check_write_lock(&head, txn, slot)?;
        record.install(Arc::downgrade(self), head.clone());
        *head = Some(record);
        state.visible.store(false, Ordering::SeqCst);
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Materialize the tuple as of `read_ts`.
    ///
    /// Starts from the master tuple and unwinds every chain record that is
    /// not committed at or before the read time. An unwound insert means the
    /// tuple did not exist yet; an unwound delete means it still did.
    pub fn select(&self, slot: TupleSlot, read_ts: Timestamp) -> Option<Vec<Option<ColumnValue>>> {
        let state = self.slots.read().get(&slot).cloned()?;
        let (mut row, mut exists, mut version) = {
            let head = state.version_ptr.lock();
            (
                state.columns.lock().clone(),
                state.allocated.load(Ordering::SeqCst) && state.visible.load(Ordering::SeqCst),
                head.clone(),
            )
        };

        while let Some(record) = version {
            let ts = record.timestamp().load(Ordering::SeqCst);
            if !is_speculative(ts) && ts <= read_ts {
                break;
            }
            match record.kind() {
                UndoKind::Update => record.delta().apply_to(&mut row),
                UndoKind::Insert => exists = false,
                UndoKind::Delete => exists = true,
            }
            version = record.next();
        }

        if exists {
            Some(row)
        } else {
            None
        }
    }

    // ========================================================================
    // Tuple accessors (rollback and GC surface)
    // ========================================================================

    /// Current value of one column, null-checked
    pub fn column_value(&self, slot: TupleSlot, col: ColId) -> Result<Option<ColumnValue>> {
        let state = self.state(slot)?;
        let columns = state.columns.lock();
        Ok(columns.get(col as usize).cloned().flatten())
    }

    /// Overwrite one column of the master tuple
    pub fn write_column(
        &self,
        slot: TupleSlot,
        col: ColId,
        value: Option<ColumnValue>,
    ) -> Result<()> {
        let state = self.state(slot)?;
        let mut columns = state.columns.lock();
        if let Some(target) = columns.get_mut(col as usize) {
            *target = value;
        }
        Ok(())
    }

    /// Set or clear the tuple's visibility flag
    pub fn set_visible(&self, slot: TupleSlot, visible: bool) -> Result<()> {
        let state = self.state(slot)?;
        state.visible.store(visible, Ordering::SeqCst);
        Ok(())
    }

    /// Return the slot to the unallocated state
    pub fn deallocate(&self, slot: TupleSlot) -> Result<()> {
        let state = self.state(slot)?;
        state.allocated.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Atomically read the slot's version-chain head
    pub fn read_version_ptr(&self, slot: TupleSlot) -> Result<Option<Arc<UndoRecord>>> {
        Ok(self.state(slot)?.version_ptr.lock().clone())
    }

    /// Atomically replace the slot's version-chain head
    pub fn write_version_ptr(
        &self,
        slot: TupleSlot,
        head: Option<Arc<UndoRecord>>,
    ) -> Result<()> {
        *self.state(slot)?.version_ptr.lock() = head;
        Ok(())
    }

    /// Remove one record from the slot's chain, wherever it sits.
    ///
    /// GC-side: the record's deltas are provably invisible to every live and
    /// future reader by the time this is called.
    pub fn unlink_version(&self, slot: TupleSlot, record: &Arc<UndoRecord>) -> bool {
        let Some(state) = self.slots.read().get(&slot).cloned() else {
            return false;
        };
        let mut head = state.version_ptr.lock();
        let Some(current) = head.as_ref() else {
            return false;
        };
        if Arc::ptr_eq(current, record) {
            *head = record.next();
            return true;
        }
        let mut cursor = Arc::clone(current);
        loop {
            match cursor.next() {
                Some(next) if Arc::ptr_eq(&next, record) => {
                    cursor.set_next(record.next());
                    return true;
                }
                Some(next) => cursor = next,
                None => return false,
            }
        }
    }

    /// Length of the version chain on a slot (diagnostics)
    pub fn version_chain_len(&self, slot: TupleSlot) -> usize {
        let mut len = 0;
        let mut version = self
            .slots
            .read()
            .get(&slot)
            .and_then(|s| s.version_ptr.lock().clone());
        while let Some(record) = version {
            len += 1;
            version = record.next();
        }
        len
    }
}

// ============================================================================
// Tests
// ============================================================================
