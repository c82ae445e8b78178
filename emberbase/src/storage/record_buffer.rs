//! Record Buffers - Segment-Pooled Undo and Redo Storage
//!
//! Every transaction appends its undo and redo records into buffers backed
//! by a shared, bounded segment pool. The pool hands out counted permits:
//! exhaustion surfaces as an error to the update operation that needed the
//! new segment, never as an abort-path failure. Permits travel with the
//! records — a redo buffer finalized for publishing keeps its segments
//! charged until the log manager has processed it.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::storage::log::record::LogRecord;
use crate::storage::table::UndoRecord;
use crate::{EmberError, Result};

/// Records per pooled segment
pub const RECORDS_PER_SEGMENT: usize = 64;

// ============================================================================
// Segment Pool
// ============================================================================

/// Bounded allocator of record-buffer segments.
///
/// Segments are accounting units: a permit represents one segment's worth of
/// records and is returned to the pool when dropped.
#[derive(Debug)]
pub struct RecordBufferPool {
    capacity: usize,
    in_use: AtomicUsize,
}

impl RecordBufferPool {
    /// Create a pool with the given segment capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Allocate one segment, or fail if the pool is exhausted
    pub fn allocate_segment(self: &Arc<Self>) -> Result<SegmentPermit> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            if current >= self.capacity {
                return Err(EmberError::BufferPoolExhausted);
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Ok(SegmentPermit {
                        pool: Arc::clone(self),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Segments currently handed out
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Total segment capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One allocated segment; returns itself to the pool on drop
#[derive(Debug)]
pub struct SegmentPermit {
    pool: Arc<RecordBufferPool>,
}

impl Drop for SegmentPermit {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Undo Buffer
// ============================================================================

/// A transaction's append-only undo record buffer, iterable newest-first
/// by walking the records slice backwards.
#[derive(Debug)]
pub struct UndoBuffer {
    pool: Arc<RecordBufferPool>,
    records: Vec<Arc<UndoRecord>>,
    permits: Vec<SegmentPermit>,
}

impl UndoBuffer {
    /// Create an empty buffer drawing segments from the given pool
    pub fn new(pool: Arc<RecordBufferPool>) -> Self {
        Self {
            pool,
            records: Vec::new(),
            permits: Vec::new(),
        }
    }

    /// Append a record, drawing a new segment at segment boundaries
    pub fn push(&mut self, record: Arc<UndoRecord>) -> Result<()> {
        if self.records.len() % RECORDS_PER_SEGMENT == 0 {
            self.permits.push(self.pool.allocate_segment()?);
        }
        self.records.push(record);
        Ok(())
    }

    /// Whether no undo records have been appended
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of appended records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The records in append order
    pub fn records(&self) -> &[Arc<UndoRecord>] {
        &self.records
    }

    /// The most recently appended record
    pub fn last(&self) -> Option<&Arc<UndoRecord>> {
        self.records.last()
    }
}

// ============================================================================
// Redo Buffer
// ============================================================================

/// A transaction's append-only redo buffer.
///
/// Finalization either publishes the records (they move, segments included,
/// into a [`FinalizedBuffer`] for the log manager) or discards them.
#[derive(Debug)]
pub struct RedoBuffer {
    pool: Arc<RecordBufferPool>,
    records: Vec<LogRecord>,
    permits: Vec<SegmentPermit>,
}

impl RedoBuffer {
    /// Create an empty buffer drawing segments from the given pool
    pub fn new(pool: Arc<RecordBufferPool>) -> Self {
        Self {
            pool,
            records: Vec::new(),
            permits: Vec::new(),
        }
    }

    /// Append a record, drawing a new segment at segment boundaries
    pub fn push(&mut self, record: LogRecord) -> Result<()> {
        if self.records.len() % RECORDS_PER_SEGMENT == 0 {
            self.permits.push(self.pool.allocate_segment()?);
        }
        self.records.push(record);
        Ok(())
    }

    /// Append the commit record.
    ///
    /// Not charged against the pool: a transaction that reached its commit
    /// point must not fail on segment allocation.
    pub fn push_commit(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    /// The most recently appended record
    pub fn last(&self) -> Option<&LogRecord> {
        self.records.last()
    }

    /// Number of appended records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Finalize the buffer.
    ///
    /// `publish` hands the records (and their segment permits) to the caller
    /// for the log manager; otherwise everything is discarded and the
    /// segments return to the pool immediately.
    pub fn finalize(&mut self, publish: bool) -> Option<FinalizedBuffer> {
        let records = mem::take(&mut self.records);
        let permits = mem::take(&mut self.permits);
        if publish && !records.is_empty() {
            Some(FinalizedBuffer {
                records,
                _permits: permits,
            })
        } else {
            None
        }
    }
}

/// Records handed off to the log manager, keeping their segments charged
/// until processed
#[derive(Debug)]
pub struct FinalizedBuffer {
    pub(crate) records: Vec<LogRecord>,
    _permits: Vec<SegmentPermit>,
}

impl FinalizedBuffer {
    /// The published records in append order
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }
}

// ============================================================================
// Tests
// ============================================================================
