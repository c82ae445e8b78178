//! Log Records
//!
//! The record types a transaction appends to its redo buffer: after-image
//! redo records and delete records for replay, plus the commit record added
//! as the last entry of a committing transaction. Wire payloads are the
//! serializable projections of these records; callbacks and in-memory
//! handles never reach the WAL file.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::layout::{ColId, ColumnValue, TupleSlot, VarlenEntry};
use crate::storage::projection::Delta;
use crate::txn::context::TxnContext;
use crate::txn::timestamp::Timestamp;

/// Invoked by the log manager once a transaction's commit record is durable
pub type CommitCallback = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Record Bodies
// ============================================================================

/// After-image of one tuple change, for replay
#[derive(Debug, Clone)]
pub struct RedoRecord {
    /// Start time of the writing transaction
    pub txn_start: Timestamp,
    /// Slot the change applies to
    pub slot: TupleSlot,
    /// Changed columns and their new values
    pub delta: Delta,
}

/// Tombstone marker for a deleted tuple
#[derive(Debug, Clone)]
pub struct DeleteRecord {
    /// Start time of the deleting transaction
    pub txn_start: Timestamp,
    /// Slot that was deleted
    pub slot: TupleSlot,
}

/// The final record of a committing transaction.
///
/// Carries the callback the log manager fires after the record is durable,
/// and a handle to the transaction so `log_processed` can be flipped once no
/// further records will arrive for it.
pub struct CommitRecord {
    /// Start time of the committing transaction
    pub start_time: Timestamp,
    /// Assigned commit timestamp
    pub commit_time: Timestamp,
    /// Whether the transaction wrote no undo records
    pub is_read_only: bool,
    pub(crate) callback: Option<CommitCallback>,
    pub(crate) txn: Arc<TxnContext>,
}

impl fmt::Debug for CommitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitRecord")
            .field("start_time", &self.start_time)
            .field("commit_time", &self.commit_time)
            .field("is_read_only", &self.is_read_only)
            .finish()
    }
}

// ============================================================================
// Log Record
// ============================================================================

/// One entry in a transaction's redo buffer
#[derive(Debug)]
pub enum LogRecord {
    /// Tuple insert or update, with the after-image
    Redo(RedoRecord),
    /// Tuple delete
    Delete(DeleteRecord),
    /// Commit marker, always the last record of a committed transaction
    Commit(CommitRecord),
}

impl LogRecord {
    /// Build a redo record
    pub fn redo(txn_start: Timestamp, slot: TupleSlot, delta: Delta) -> Self {
        LogRecord::Redo(RedoRecord {
            txn_start,
            slot,
            delta,
        })
    }

    /// Build a delete record
    pub fn delete(txn_start: Timestamp, slot: TupleSlot) -> Self {
        LogRecord::Delete(DeleteRecord { txn_start, slot })
    }

    /// Build a commit record
    pub fn commit(
        start_time: Timestamp,
        commit_time: Timestamp,
        is_read_only: bool,
        callback: CommitCallback,
        txn: Arc<TxnContext>,
    ) -> Self {
        LogRecord::Commit(CommitRecord {
            start_time,
            commit_time,
            is_read_only,
            callback: Some(callback),
            txn,
        })
    }

    /// Whether this is an after-image redo record
    pub fn is_redo(&self) -> bool {
        matches!(self, LogRecord::Redo(_))
    }
}

// ============================================================================
// Wire Payloads
// ============================================================================

/// Record type byte for redo records
pub const WAL_TYPE_REDO: u8 = 1;
/// Record type byte for delete records
pub const WAL_TYPE_DELETE: u8 = 2;
/// Record type byte for commit records
pub const WAL_TYPE_COMMIT: u8 = 3;

/// Serializable column value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalValue {
    Integer(u64),
    Bytes(Vec<u8>),
}

impl From<&ColumnValue> for WalValue {
    fn from(value: &ColumnValue) -> Self {
        match value {
            ColumnValue::Integer(v) => WalValue::Integer(*v),
            ColumnValue::Varlen(v) => WalValue::Bytes(v.as_bytes().to_vec()),
        }
    }
}

impl From<&WalValue> for ColumnValue {
    fn from(value: &WalValue) -> Self {
        match value {
            WalValue::Integer(v) => ColumnValue::Integer(*v),
            WalValue::Bytes(b) => ColumnValue::Varlen(VarlenEntry::new(b)),
        }
    }
}

/// Serializable projection of a log record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalPayload {
    Redo {
        txn_start: Timestamp,
        block: u32,
        offset: u32,
        columns: Vec<(ColId, Option<WalValue>)>,
    },
    Delete {
        txn_start: Timestamp,
        block: u32,
        offset: u32,
    },
    Commit {
        start_time: Timestamp,
        commit_time: Timestamp,
        is_read_only: bool,
    },
}

impl LogRecord {
    /// Record type byte for the WAL framing
    pub fn wal_type(&self) -> u8 {
        match self {
            LogRecord::Redo(_) => WAL_TYPE_REDO,
            LogRecord::Delete(_) => WAL_TYPE_DELETE,
            LogRecord::Commit(_) => WAL_TYPE_COMMIT,
        }
    }

    /// The serializable projection of this record
    pub fn wal_payload(&self) -> WalPayload {
        match self {
            LogRecord::Redo(r) => WalPayload::Redo {
                txn_start: r.txn_start,
                block: r.slot.block,
                offset: r.slot.offset,
                columns: r
                    .delta
                    .col_ids()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (*col, r.delta.value(i).map(WalValue::from)))
                    .collect(),
            },
            LogRecord::Delete(d) => WalPayload::Delete {
                txn_start: d.txn_start,
                block: d.slot.block,
                offset: d.slot.offset,
            },
            LogRecord::Commit(c) => WalPayload::Commit {
                start_time: c.start_time,
                commit_time: c.commit_time,
                is_read_only: c.is_read_only,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
