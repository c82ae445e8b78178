//! Block Layout and Tuple Primitives
//!
//! Defines the column layout of a table (which columns carry variable-length
//! payloads), the value representation stored in tuple slots, and the slot
//! addressing scheme used by version chains and log records.

use std::fmt;
use std::sync::Arc;

// ============================================================================
// Column Identifiers
// ============================================================================

/// Index of a column within a block layout
pub type ColId = u16;

// ============================================================================
// Variable-Length Payloads
// ============================================================================

/// A variable-length payload handle.
///
/// Clones share one reference-counted buffer, so a `VarlenEntry` behaves like
/// the underlying storage engine's loose pointer: the slot, an undo record's
/// before-image, and the transaction's deferred-free list can all refer to
/// the same payload, and the final drop is the free.
#[derive(Debug, Clone)]
pub struct VarlenEntry {
    content: Arc<[u8]>,
}

impl VarlenEntry {
    /// Create a new payload from raw bytes
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            content: Arc::from(bytes),
        }
    }

    /// The payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether two handles share the same underlying buffer
    pub fn same_payload(&self, other: &VarlenEntry) -> bool {
        Arc::ptr_eq(&self.content, &other.content)
    }
}

impl PartialEq for VarlenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

impl Eq for VarlenEntry {}

// ============================================================================
// Column Values
// ============================================================================

/// A single column value inside a tuple slot or a delta.
///
/// Nullability is modeled one level up (`Option<ColumnValue>`); the variant
/// tag doubles as the runtime type check — a varlen payload can only ever
/// appear in a varlen column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// Fixed-width integer column
    Integer(u64),
    /// Variable-length column
    Varlen(VarlenEntry),
}

impl ColumnValue {
    /// Borrow the varlen handle if this value is one
    pub fn as_varlen(&self) -> Option<&VarlenEntry> {
        match self {
            ColumnValue::Varlen(v) => Some(v),
            ColumnValue::Integer(_) => None,
        }
    }
}

// ============================================================================
// Block Layout
// ============================================================================

/// Per-table column layout.
///
/// The transaction engine only needs to know how many columns a tuple has
/// and which of them carry variable-length payloads (those payloads need
/// deferred reclamation on rollback and GC).
#[derive(Debug, Clone)]
pub struct BlockLayout {
    varlen_cols: Vec<bool>,
}

impl BlockLayout {
    /// Create a layout from per-column varlen flags
    pub fn new(varlen_cols: Vec<bool>) -> Self {
        Self { varlen_cols }
    }

    /// Number of columns in the layout
    pub fn num_columns(&self) -> usize {
        self.varlen_cols.len()
    }

    /// Whether the given column stores a variable-length payload
    pub fn is_varlen(&self, col: ColId) -> bool {
        self.varlen_cols
            .get(col as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Iterator over the varlen column ids of this layout
    pub fn varlen_columns(&self) -> impl Iterator<Item = ColId> + '_ {
        self.varlen_cols
            .iter()
            .enumerate()
            .filter(|(_, v)| **v)
            .map(|(i, _)| i as ColId)
    }
}

// ============================================================================
// Tuple Slots
// ============================================================================

/// Physical address of a tuple: block id plus offset within the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleSlot {
    /// Block the tuple lives in
    pub block: u32,
    /// Offset within the block
    pub offset: u32,
}

impl TupleSlot {
    /// Create a slot address
    pub fn new(block: u32, offset: u32) -> Self {
        Self { block, offset }
    }
}

impl fmt::Display for TupleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.offset)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varlen_sharing() {
        let a = VarlenEntry::new(b"hello world");
        let b = a.clone();
        let c = VarlenEntry::new(b"hello world");

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.same_payload(&b));
        assert!(!a.same_payload(&c));
    }

    #[test]
    fn test_layout_varlen_flags() {
        let layout = BlockLayout::new(vec![false, true, false, true]);
        assert_eq!(layout.num_columns(), 4);
        assert!(!layout.is_varlen(0));
        assert!(layout.is_varlen(1));
        assert!(layout.is_varlen(3));
        // Out-of-range columns are never varlen
        assert!(!layout.is_varlen(7));

        let varlens: Vec<ColId> = layout.varlen_columns().collect();
        assert_eq!(varlens, vec![1, 3]);
    }

    #[test]
    fn test_slot_display() {
        let slot = TupleSlot::new(3, 42);
        assert_eq!(slot.to_string(), "3:42");
    }
}
