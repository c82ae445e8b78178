//! EmberBase Transaction Engine
//!
//! The transaction-manager core of an in-memory MVCC storage engine:
//! monotonic timestamps, per-slot delta version chains, a commit critical
//! section that makes log order equal commit order, abort-time rollback with
//! varlen reclamation, and a watermark-gated garbage collector.

pub mod storage;
pub mod txn;

// Re-export main types
pub use storage::{BlockLayout, ColumnValue, DataTable, DeferredGc, Delta, RecordBufferPool,
    TupleSlot, VarlenEntry};
pub use storage::log::LogManager;
pub use txn::{Timestamp, TxnContext, TxnManager, WorkerContext};

/// Transaction engine error type
#[derive(Debug, thiserror::Error)]
pub enum EmberError {
    #[error("transaction starting at {0} was already committed or aborted")]
    TxnAlreadyTerminated(Timestamp),

    #[error("rollback on slot {0} without holding its write lock")]
    WriteLockViolation(TupleSlot),

    #[error("write-write conflict on slot {0}")]
    WriteWriteConflict(TupleSlot),

    #[error("record buffer pool exhausted")]
    BufferPoolExhausted,

    #[error("slot {0} does not exist")]
    SlotNotFound(TupleSlot),

    #[error("version chain on slot {0} refers to a dropped table")]
    TableDropped(TupleSlot),

    #[error("wal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal serialization: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, EmberError>;
