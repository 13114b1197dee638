//! This module contains the pure kernels behind the time sort: a stable argsort
//! over a float key column, and the two ways of applying the resulting
//! permutation (to table rows and to cube columns).
//!
//! The same `order` vector must be applied to every frame-indexed section of an
//! archive; that is what keeps cube column `f` paired with metadata row `f`.

use std::cmp::Ordering;

use arrow::array::{Array, Float64Array, RecordBatch, UInt64Array};
use arrow::compute::take_record_batch;
use ndarray::{Array2, Axis};

use crate::error::StitchError;

//==================================================================================
// 1. Public API
//==================================================================================

/// Returns the permutation that sorts `keys` ascending.
///
/// `order[i]` is the original index of the frame that belongs at position `i`.
/// Ties keep their original relative order, so sorting sorted data yields the
/// identity. Null and non-finite keys are rejected rather than ordered.
pub fn stable_argsort(keys: &Float64Array) -> Result<Vec<usize>, StitchError> {
    for (frame, value) in keys.iter().enumerate() {
        match value {
            Some(v) if v.is_finite() => {}
            Some(v) => {
                return Err(StitchError::InvalidSortKey {
                    frame,
                    value: v.to_string(),
                })
            }
            None => {
                return Err(StitchError::InvalidSortKey {
                    frame,
                    value: "null".to_string(),
                })
            }
        }
    }

    let values = keys.values();
    let mut order: Vec<usize> = (0..keys.len()).collect();
    // `sort_by` is a stable merge sort.
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(Ordering::Equal)
    });
    Ok(order)
}

pub fn is_identity(order: &[usize]) -> bool {
    order.iter().enumerate().all(|(pos, &idx)| pos == idx)
}

/// Reorders the rows of a table.
pub fn permute_rows(batch: &RecordBatch, order: &[usize]) -> Result<RecordBatch, StitchError> {
    let indices = UInt64Array::from_iter_values(order.iter().map(|&idx| idx as u64));
    Ok(take_record_batch(batch, &indices)?)
}

/// Reorders the columns (frame axis) of a cube. `order.len()` must equal
/// `cube.ncols()`; the caller validates this against the section's shape.
pub fn permute_columns(cube: &Array2<f64>, order: &[usize]) -> Array2<f64> {
    debug_assert_eq!(cube.ncols(), order.len());
    cube.select(Axis(1), order)
}

//==================================================================================
// 2. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use ndarray::array;
    use std::sync::Arc;

    #[test]
    fn test_argsort_orders_ascending() {
        let keys = Float64Array::from(vec![3.0, 1.0, 2.0]);
        assert_eq!(stable_argsort(&keys).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_argsort_is_stable_on_ties() {
        let keys = Float64Array::from(vec![5.0, 1.0, 5.0, 1.0, 5.0]);
        assert_eq!(stable_argsort(&keys).unwrap(), vec![1, 3, 0, 2, 4]);
    }

    #[test]
    fn test_argsort_of_sorted_keys_is_identity() {
        let keys = Float64Array::from(vec![1.0, 1.0, 2.0, 7.5]);
        let order = stable_argsort(&keys).unwrap();
        assert!(is_identity(&order));
    }

    #[test]
    fn test_argsort_rejects_nan_and_null() {
        let keys = Float64Array::from(vec![1.0, f64::NAN]);
        assert!(matches!(
            stable_argsort(&keys),
            Err(StitchError::InvalidSortKey { frame: 1, .. })
        ));

        let keys = Float64Array::from(vec![Some(1.0), None, Some(0.5)]);
        assert!(matches!(
            stable_argsort(&keys),
            Err(StitchError::InvalidSortKey { frame: 1, value }) if value == "null"
        ));

        let keys = Float64Array::from(vec![f64::NEG_INFINITY]);
        assert!(stable_argsort(&keys).is_err());
    }

    #[test]
    fn test_rows_and_columns_move_together() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("frame", DataType::Int64, false),
            Field::new("label", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1, 2])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap();
        let cube = array![[10.0, 11.0, 12.0], [20.0, 21.0, 22.0]];
        let order = vec![2, 0, 1];

        let rows = permute_rows(&batch, &order).unwrap();
        let cols = permute_columns(&cube, &order);

        let frames = rows
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(frames.values().to_vec(), vec![2, 0, 1]);
        assert_eq!(cols, array![[12.0, 10.0, 11.0], [22.0, 20.0, 21.0]]);
    }
}
