//! Exposure-time frame selection.
//!
//! A mask is computed from one archive's frame metadata and applied to that same
//! archive's frame-indexed sections only; masks are never reused across inputs.

use arrow::array::{Array, BooleanArray, RecordBatch};
use arrow::compute::filter_record_batch;
use ndarray::Axis;

use crate::archive::{float_column, Cube, IMAGELIST};
use crate::config::{ExposureMatch, StitchConfig};
use crate::error::StitchError;

#[derive(Debug, Clone, PartialEq)]
pub struct ExposureFilter {
    target: Option<f64>,
    matching: ExposureMatch,
    column: String,
}

impl ExposureFilter {
    pub fn new(target: Option<f64>, matching: ExposureMatch, column: impl Into<String>) -> Self {
        Self {
            target,
            matching,
            column: column.into(),
        }
    }

    pub fn from_config(config: &StitchConfig) -> Self {
        Self::new(
            config.exposure_filter,
            config.exposure_match,
            config.exposure_column.clone(),
        )
    }

    /// The identity filter.
    pub fn keep_all() -> Self {
        Self::new(None, ExposureMatch::Exact, "exposure")
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    /// One entry per frame; `true` keeps the frame.
    pub fn mask(&self, frames: &RecordBatch) -> Result<BooleanArray, StitchError> {
        let Some(target) = self.target else {
            return Ok(BooleanArray::from(vec![true; frames.num_rows()]));
        };

        let exposure = float_column(frames, IMAGELIST, &self.column)?;
        Ok(exposure
            .iter()
            .map(|value| Some(value.is_some_and(|v| self.matching.matches(v, target))))
            .collect())
    }
}

/// Keeps the frame-metadata rows selected by `mask`.
pub fn select_frame_rows(frames: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch, StitchError> {
    Ok(filter_record_batch(frames, mask)?)
}

/// Keeps the cube columns selected by `mask`. The mask length must equal the
/// cube's frame count.
pub fn select_cube_frames(cube: &Cube, mask: &BooleanArray) -> Cube {
    debug_assert_eq!(cube.ncols(), mask.len());
    let keep: Vec<usize> = (0..mask.len())
        .filter(|&frame| mask.is_valid(frame) && mask.value(frame))
        .collect();
    if keep.len() == cube.ncols() {
        return cube.clone();
    }
    cube.select(Axis(1), &keep)
}
