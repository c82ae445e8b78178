//! Transaction Subsystem - MVCC Lifecycle Coordination
//!
//! Provides BEGIN / COMMIT / ABORT over delta version chains, with
//! first-writer-wins conflict handling in storage.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              TxnManager                          │
//! │  - Issues monotonic start/commit timestamps      │
//! │  - Serializes updating commits (log order =      │
//! │    commit order)                                 │
//! │  - Rolls back aborts, reclaims varlen payloads   │
//! │  - Hands terminated transactions to the GC       │
//! ├──────────────────────────────────────────────────┤
//! │  TxnContext                                      │
//! │  - Undo buffer (before-images, newest-first)     │
//! │  - Redo buffer (after-images for the WAL)        │
//! │  - Loose varlens awaiting reclamation            │
//! ├──────────────────────────────────────────────────┤
//! │  WorkerContext                                   │
//! │  - Per-worker shard of the running set           │
//! │  - Feeds the oldest-start watermark              │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod manager;
pub mod timestamp;
pub mod worker;

pub use context::TxnContext;
pub use manager::TxnManager;
pub use timestamp::{is_speculative, speculative_id, Timestamp, TimestampOracle, TXN_ID_HIGH_BIT};
pub use worker::{WorkerContext, WorkerId};
