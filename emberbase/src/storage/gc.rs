//! Deferred Garbage Collector - Reclaims Terminated Transactions
//!
//! Pull-based consumer of the transaction manager's completed queue. Each
//! pass reads the oldest-start watermark once, then decides per transaction
//! whether its leftovers are provably unreachable:
//!
//! - committed: reclaimable when `watermark > commit_time` — every live and
//!   future reader then reads at or after the commit, so the transaction's
//!   before-image deltas can never be applied again and are unlinked from
//!   their chains;
//! - aborted: rollback already restored the chains; reclaimable when
//!   `watermark > start_time`, at which point the loose varlen payloads are
//!   dropped.
//!
//! Anything not yet provable is deferred to the next pass. Never reclaims a
//! transaction the log manager has not finished with.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::txn::context::TxnContext;
use crate::txn::manager::TxnManager;
use crate::txn::timestamp::{is_speculative, Timestamp};

// ============================================================================
// GC Statistics
// ============================================================================

/// Statistics from one GC pass
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Transactions fully reclaimed this pass
    pub txns_processed: usize,
    /// Transactions pushed to the next pass
    pub txns_deferred: usize,
    /// Undo records unlinked from version chains
    pub versions_unlinked: usize,
    /// Varlen payloads freed
    pub varlens_freed: usize,
    /// Watermark the pass ran with
    pub watermark: Timestamp,
}

// ============================================================================
// Deferred GC
// ============================================================================

/// Garbage collector over the manager's completed-transaction handoff
#[derive(Debug, Default)]
pub struct DeferredGc {
    deferred: VecDeque<Arc<TxnContext>>,
}

impl DeferredGc {
    /// Create a collector with an empty backlog
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactions waiting on the watermark
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Run one pass over the handoff queue plus the backlog
    pub fn process(&mut self, manager: &TxnManager) -> GcStats {
        let mut stats = GcStats {
            watermark: manager.oldest_transaction_start_time(),
            ..GcStats::default()
        };

        let mut pending = std::mem::take(&mut self.deferred);
        pending.extend(manager.completed_transactions_for_gc());

        for txn in pending {
            if !self.reclaimable(&txn, stats.watermark) {
                self.deferred.push_back(txn);
                stats.txns_deferred += 1;
                continue;
            }
            if !is_speculative(txn.txn_id()) {
                // Committed: its deltas are invisible to every reader now
                for record in txn.undo_records() {
                    if let Some(table) = record.table() {
                        if table.unlink_version(record.slot(), &record) {
                            stats.versions_unlinked += 1;
                        }
                    }
                }
            }
            let freed = txn.take_loose_varlens();
            stats.varlens_freed += freed.len();
            stats.txns_processed += 1;
        }

        if stats.txns_processed > 0 || stats.versions_unlinked > 0 {
            log::debug!(
                "gc: watermark {} reclaimed {} txns ({} versions, {} varlens), {} deferred",
                stats.watermark,
                stats.txns_processed,
                stats.versions_unlinked,
                stats.varlens_freed,
                stats.txns_deferred
            );
        }
        stats
    }

    fn reclaimable(&self, txn: &TxnContext, watermark: Timestamp) -> bool {
        if !txn.log_processed() {
            // The log manager may still hand out records of this transaction
            return false;
        }
        let id = txn.txn_id();
        if is_speculative(id) {
            // Aborted: chains are already restored
            watermark > txn.start_time()
        } else {
            // Committed at `id`
            watermark > id
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
