//! Write-Ahead Logging
//!
//! Record types published by committing transactions and the WAL sink that
//! makes them durable before commit callbacks fire.

pub mod manager;
pub mod record;

pub use manager::LogManager;
pub use record::{CommitCallback, CommitRecord, DeleteRecord, LogRecord, RedoRecord, WalPayload};
