// In: src/error.rs

//! This module defines the single, unified error type for the entire lcstitch library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! No error is recovered internally: every variant aborts the running stage, and the
//! output archive of a failed run is never flushed.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StitchError {
    // =========================================================================
    // === Engine Errors (stitch / sort / aggregate)
    // =========================================================================
    #[error("No input archives were supplied")]
    NoInputs,

    #[error("Section '{section}' has unrecognized kind '{kind}'; refusing to drop it")]
    UnknownSectionKind { section: String, kind: String },

    #[error("Section '{section}' is missing from '{}'", path.display())]
    MissingSection { section: String, path: PathBuf },

    #[error("Shape mismatch in section '{section}': {detail}")]
    ShapeMismatch { section: String, detail: String },

    #[error("Invalid sort key at frame {frame}: {value}")]
    InvalidSortKey { frame: usize, value: String },

    #[error("Degenerate weight for target {target} at frame {frame}: flux error is zero or squares to zero")]
    DegenerateWeight { target: usize, frame: usize },

    // =========================================================================
    // === Archive Accessor Errors
    // =========================================================================
    #[error("No section named '{0}'")]
    UnknownSection(String),

    #[error("Column '{column}' not found in section '{section}'")]
    MissingColumn { section: String, column: String },

    #[error("Archive '{}' is open read-only", .0.display())]
    ReadOnly(PathBuf),

    #[error("Refusing to modify '{}' in place without explicit confirmation", .0.display())]
    ConfirmationRequired(PathBuf),

    #[error("Archive format error: {0}")]
    Format(String),

    #[error("Buffer length mismatch: expected a multiple of {0}, got {1}")]
    BufferMismatch(usize, usize),

    #[error("Zstd operation failed: {0}")]
    ZstdError(String),

    // =========================================================================
    // === External Error Wrappers
    // =========================================================================
    /// An I/O failure, always tagged with the path that caused it.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Footer and config files are JSON.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Byte slice casting error: {0}")]
    PodCast(String), // bytemuck::PodCastError doesn't impl Error
}

impl From<bytemuck::PodCastError> for StitchError {
    fn from(err: bytemuck::PodCastError) -> Self {
        StitchError::PodCast(err.to_string())
    }
}

/// Attaches the offending path to a raw `std::io::Error`.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T, StitchError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T, StitchError> {
        self.map_err(|source| StitchError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
