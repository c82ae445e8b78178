//! Log Manager - WAL Sink for Finalized Redo Buffers
//!
//! Committing transactions publish their finalized redo buffers here from
//! inside the commit critical section (enqueue only, nothing is awaited
//! there). `process` drains the queue, appends every record to the WAL file
//! and, once the batch is durable, fires the commit callbacks and releases
//! the owning transactions (`log_processed`).
//!
//! File format:
//! ```text
//! +----------------+----------------+----------------+
//! | Header (6B)    | Record 1       | Record 2 ...   |
//! +----------------+----------------+----------------+
//!
//! Header:
//! - magic: 4 bytes "EWAL"
//! - version: 2 bytes
//!
//! Record:
//! - type: 1 byte (REDO=1, DELETE=2, COMMIT=3)
//! - payload_len: 4 bytes
//! - payload: variable (bincode serialized)
//! - crc32: 4 bytes (over the payload)
//! ```

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::storage::log::record::{CommitRecord, LogRecord, WalPayload};
use crate::storage::record_buffer::FinalizedBuffer;
use crate::txn::timestamp::Timestamp;
use crate::{EmberError, Result};

/// WAL magic bytes
const WAL_MAGIC: &[u8; 4] = b"EWAL";
/// WAL format version
const WAL_VERSION: u16 = 1;

// ============================================================================
// Log Manager
// ============================================================================

/// Append-only WAL sink with deferred commit callbacks
pub struct LogManager {
    /// Redo buffers published by committing transactions, in commit order
    queue: Mutex<VecDeque<FinalizedBuffer>>,
    writer: Mutex<BufWriter<File>>,
    /// (start, commit) pairs in durable order
    commits: Mutex<Vec<(Timestamp, Timestamp)>>,
}

impl LogManager {
    /// Create a log manager writing to a fresh WAL file at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(WAL_MAGIC)?;
        writer.write_all(&WAL_VERSION.to_le_bytes())?;
        Ok(Self {
            queue: Mutex::new(VecDeque::new()),
            writer: Mutex::new(writer),
            commits: Mutex::new(Vec::new()),
        })
    }

    /// Accept a finalized redo buffer for logging.
    ///
    /// Called inside the commit critical section; must never block on I/O.
    pub fn publish(&self, buffer: FinalizedBuffer) {
        self.queue.lock().push_back(buffer);
    }

    /// Published buffers not yet processed
    pub fn pending_buffers(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain the queue, write and sync every record, then fire commit
    /// callbacks. Returns the number of records written.
    pub fn process(&self) -> Result<usize> {
        let buffers: Vec<FinalizedBuffer> = self.queue.lock().drain(..).collect();
        if buffers.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        let mut durable_commits: Vec<CommitRecord> = Vec::new();
        {
            let mut writer = self.writer.lock();
            for mut buffer in buffers {
                for record in buffer.records.drain(..) {
                    // A read-only commit resolves speculative reads but has
                    // no changes worth persisting; it skips the file.
                    let persist =
                        !matches!(&record, LogRecord::Commit(c) if c.is_read_only);
                    if persist {
                        let payload = bincode::serialize(&record.wal_payload())
                            .map_err(|e| EmberError::Serialization(e.to_string()))?;
                        writer.write_all(&[record.wal_type()])?;
                        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
                        writer.write_all(&payload)?;
                        writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
                        written += 1;
                    }
                    if let LogRecord::Commit(commit) = record {
                        durable_commits.push(commit);
                    }
                }
                // buffer drops here, returning its segments to the pool
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        // The batch is durable: release the transactions and tell the world
        for mut commit in durable_commits {
            self.commits
                .lock()
                .push((commit.start_time, commit.commit_time));
            commit.txn.set_log_processed();
            if let Some(callback) = commit.callback.take() {
                callback();
            }
        }
        log::debug!("wal: flushed {} records", written);
        Ok(written)
    }

    /// (start, commit) pairs of every processed commit record, in log order.
    /// Read-only commits appear here even though they skip the file.
    pub fn commit_records(&self) -> Vec<(Timestamp, Timestamp)> {
        self.commits.lock().clone()
    }

    /// Read back every record payload of a WAL file, verifying framing and
    /// checksums
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<WalPayload>> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.len() < 6 || &bytes[0..4] != WAL_MAGIC {
            return Err(EmberError::Serialization("bad wal header".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != WAL_VERSION {
            return Err(EmberError::Serialization(format!(
                "unsupported wal version {}",
                version
            )));
        }

        let mut records = Vec::new();
        let mut pos = 6;
        while pos < bytes.len() {
            if pos + 5 > bytes.len() {
                return Err(EmberError::Serialization("truncated wal frame".to_string()));
            }
            let len = u32::from_le_bytes(bytes[pos + 1..pos + 5].try_into().unwrap()) as usize;
            let payload_start = pos + 5;
            let crc_start = payload_start + len;
            if crc_start + 4 > bytes.len() {
                return Err(EmberError::Serialization("truncated wal frame".to_string()));
            }
            let payload = &bytes[payload_start..crc_start];
            let stored_crc = u32::from_le_bytes(bytes[crc_start..crc_start + 4].try_into().unwrap());
            if crc32fast::hash(payload) != stored_crc {
                return Err(EmberError::Serialization("wal checksum mismatch".to_string()));
            }
            let record: WalPayload = bincode::deserialize(payload)
                .map_err(|e| EmberError::Serialization(e.to_string()))?;
            records.push(record);
            pos = crc_start + 4;
        }
        Ok(records)
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("pending_buffers", &self.pending_buffers())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::{ColumnValue, TupleSlot};
    use crate::storage::projection::Delta;
    use crate::storage::record_buffer::{RecordBufferPool, RedoBuffer};
    use crate::txn::context::TxnContext;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn commit_buffer(
        pool: &Arc<RecordBufferPool>,
        start: Timestamp,
        commit: Timestamp,
        order: &Arc<AtomicUsize>,
        expected: usize,
    ) -> (FinalizedBuffer, Arc<TxnContext>) {
        let txn = Arc::new(TxnContext::new(start, Arc::clone(pool), None));
        let mut buffer = RedoBuffer::new(Arc::clone(pool));
        buffer
            .push(LogRecord::redo(
                start,
                TupleSlot::new(0, start as u32),
                Delta::new(vec![(0, Some(ColumnValue::Integer(commit)))]),
            ))
            .unwrap();
        let order = Arc::clone(order);
        buffer.push_commit(LogRecord::commit(
            start,
            commit,
            false,
            Box::new(move || {
                order.fetch_add(1, Ordering::SeqCst);
                assert_eq!(order.load(Ordering::SeqCst), expected + 1);
            }),
            Arc::clone(&txn),
        ));
        (buffer.finalize(true).unwrap(), txn)
    }

    #[test]
    fn test_process_writes_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let log = LogManager::new(&path).unwrap();
        let pool = Arc::new(RecordBufferPool::new(16));
        let order = Arc::new(AtomicUsize::new(0));

        let (b1, t1) = commit_buffer(&pool, 0, 5, &order, 0);
        let (b2, t2) = commit_buffer(&pool, 1, 9, &order, 1);
        log.publish(b1);
        log.publish(b2);
        assert_eq!(log.pending_buffers(), 2);

        let written = log.process().unwrap();
        assert_eq!(written, 4);
        assert_eq!(log.pending_buffers(), 0);
        assert_eq!(order.load(Ordering::SeqCst), 2);
        assert!(t1.log_processed());
        assert!(t2.log_processed());

        // Processed buffers returned their segments
        assert_eq!(pool.in_use(), 0);

        // Commit records appear in publish order
        assert_eq!(log.commit_records(), vec![(0, 5), (1, 9)]);
    }

    #[test]
    fn test_wal_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let log = LogManager::new(&path).unwrap();
        let pool = Arc::new(RecordBufferPool::new(16));
        let order = Arc::new(AtomicUsize::new(0));

        let (buffer, _txn) = commit_buffer(&pool, 3, 7, &order, 0);
        log.publish(buffer);
        log.process().unwrap();

        let records = LogManager::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            WalPayload::Redo { txn_start: 3, .. }
        ));
        assert_eq!(
            records[1],
            WalPayload::Commit {
                start_time: 3,
                commit_time: 7,
                is_read_only: false,
            }
        );
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let log = LogManager::new(&path).unwrap();
        let pool = Arc::new(RecordBufferPool::new(16));
        let order = Arc::new(AtomicUsize::new(0));

        let (buffer, _txn) = commit_buffer(&pool, 0, 2, &order, 0);
        log.publish(buffer);
        log.process().unwrap();

        // Flip one payload byte
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(LogManager::read_records(&path).is_err());
    }

    #[test]
    fn test_empty_process_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogManager::new(dir.path().join("wal")).unwrap();
        assert_eq!(log.process().unwrap(), 0);
    }
}
