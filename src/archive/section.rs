//! The in-memory representation of archive sections.

use std::fmt;

use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use ndarray::Array2;

use crate::error::StitchError;

/// A `targets × frames` matrix of one physical quantity.
pub type Cube = Array2<f64>;

/// The kind tag stored for every section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Primary,
    Catalogue,
    Cube,
    FrameMetadata,
    /// A tag this engine does not understand, kept verbatim.
    Unrecognized(String),
}

impl SectionKind {
    pub fn tag(&self) -> &str {
        match self {
            SectionKind::Primary => "primary",
            SectionKind::Catalogue => "catalogue",
            SectionKind::Cube => "cube",
            SectionKind::FrameMetadata => "frame_metadata",
            SectionKind::Unrecognized(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "primary" => SectionKind::Primary,
            "catalogue" => SectionKind::Catalogue,
            "cube" => SectionKind::Cube,
            "frame_metadata" => SectionKind::FrameMetadata,
            other => SectionKind::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A fully decoded section.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Primary,
    Catalogue(RecordBatch),
    Cube(Cube),
    FrameMetadata(RecordBatch),
    /// Raw (decompressed) payload of a section with an unknown kind tag.
    Unrecognized { kind: String, payload: Vec<u8> },
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        match self {
            Section::Primary => SectionKind::Primary,
            Section::Catalogue(_) => SectionKind::Catalogue,
            Section::Cube(_) => SectionKind::Cube,
            Section::FrameMetadata(_) => SectionKind::FrameMetadata,
            Section::Unrecognized { kind, .. } => SectionKind::Unrecognized(kind.clone()),
        }
    }

    /// `(rows, cols)`: targets × frames for cubes, rows × columns for tables.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Section::Primary => (0, 0),
            Section::Catalogue(batch) | Section::FrameMetadata(batch) => {
                (batch.num_rows(), batch.num_columns())
            }
            Section::Cube(cube) => cube.dim(),
            Section::Unrecognized { payload, .. } => (0, payload.len()),
        }
    }
}

/// Summary of one section as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub name: String,
    pub kind: SectionKind,
    pub rows: usize,
    pub cols: usize,
}

/// Finds a table column by name (ASCII case-insensitive) and returns it as `f64`.
///
/// Integer and single-precision columns are widened; anything that can't be
/// cast is reported as a missing column of the right type.
pub fn float_column(
    batch: &RecordBatch,
    section: &str,
    column: &str,
) -> Result<Float64Array, StitchError> {
    let missing = || StitchError::MissingColumn {
        section: section.to_string(),
        column: column.to_string(),
    };

    let idx = column_index(batch, column).ok_or_else(missing)?;
    let array: ArrayRef = cast(batch.column(idx), &DataType::Float64)?;
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(missing)
}

pub fn column_index(batch: &RecordBatch, column: &str) -> Option<usize> {
    batch
        .schema()
        .fields()
        .iter()
        .position(|field| field.name().eq_ignore_ascii_case(column))
}
