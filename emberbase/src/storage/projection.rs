//! Deltas - Partial Tuple Images
//!
//! A `Delta` is a projection over a tuple: an ordered list of column ids with
//! their (nullable) values. Undo records carry before-image deltas, redo
//! records carry after-image deltas.

use crate::storage::layout::{ColId, ColumnValue};

// ============================================================================
// Delta
// ============================================================================

/// A partial tuple image: column ids paired with nullable values
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    col_ids: Vec<ColId>,
    values: Vec<Option<ColumnValue>>,
}

impl Delta {
    /// Build a delta from (column id, value) pairs
    pub fn new(columns: Vec<(ColId, Option<ColumnValue>)>) -> Self {
        let mut col_ids = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (col, value) in columns {
            col_ids.push(col);
            values.push(value);
        }
        Self { col_ids, values }
    }

    /// An empty delta (insert and delete records carry no before-image)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of columns in the projection
    pub fn num_columns(&self) -> usize {
        self.col_ids.len()
    }

    /// Whether the projection has no columns
    pub fn is_empty(&self) -> bool {
        self.col_ids.is_empty()
    }

    /// Column ids of the projection, in projection order
    pub fn col_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    /// Value at a projection index; `None` means the column is null
    pub fn value(&self, index: usize) -> Option<&ColumnValue> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    /// Owned (nullable) value at a projection index
    pub fn value_cloned(&self, index: usize) -> Option<ColumnValue> {
        self.values.get(index).and_then(|v| v.clone())
    }

    /// Copy every projected column into a full-width row
    pub fn apply_to(&self, row: &mut [Option<ColumnValue>]) {
        for (i, col) in self.col_ids.iter().enumerate() {
            if let Some(target) = row.get_mut(*col as usize) {
                *target = self.values[i].clone();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::VarlenEntry;

    #[test]
    fn test_delta_accessors() {
        let delta = Delta::new(vec![
            (0, Some(ColumnValue::Integer(7))),
            (2, None),
            (3, Some(ColumnValue::Varlen(VarlenEntry::new(b"abc")))),
        ]);

        assert_eq!(delta.num_columns(), 3);
        assert_eq!(delta.col_ids(), &[0, 2, 3]);
        assert_eq!(delta.value(0), Some(&ColumnValue::Integer(7)));
        assert_eq!(delta.value(1), None);
        assert!(delta.value(2).unwrap().as_varlen().is_some());
    }

    #[test]
    fn test_apply_overwrites_and_nulls() {
        let mut row = vec![
            Some(ColumnValue::Integer(1)),
            Some(ColumnValue::Integer(2)),
            Some(ColumnValue::Integer(3)),
        ];
        let delta = Delta::new(vec![(0, Some(ColumnValue::Integer(9))), (2, None)]);
        delta.apply_to(&mut row);

        assert_eq!(row[0], Some(ColumnValue::Integer(9)));
        assert_eq!(row[1], Some(ColumnValue::Integer(2)));
        assert_eq!(row[2], None);
    }

    #[test]
    fn test_empty_delta() {
        let delta = Delta::empty();
        assert!(delta.is_empty());
        assert_eq!(delta.num_columns(), 0);
    }
}
