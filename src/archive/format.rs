// In: src/archive/format.rs

//! Defines all on-disk structures and constants for the archive container.
//! This is the single source of truth for how an archive file is laid out:
//!
//! ```text
//! [MAGIC "LCSA"][version: u16 LE][section payloads ...][footer JSON][footer_len: u64 LE]
//! ```
//!
//! Each payload is a zstd stream (see `kernels::zstd`). Table payloads decode to an
//! Arrow IPC stream, cube payloads to `[rows: u64][cols: u64][row-major f64 ...]`.

use arrow::datatypes::Schema;
use serde::{Deserialize, Serialize};

//==================================================================================
// I. File-Level Constants
//==================================================================================

/// The magic number to identify the start of an archive file.
pub const FILE_MAGIC: &[u8; 4] = b"LCSA";
/// The current version of the archive file format.
pub const FILE_FORMAT_VERSION: u16 = 1;
/// magic(4) + version(2)
pub const HEADER_LEN: u64 = 6;
/// Length of the trailing footer-size field.
pub const FOOTER_LEN_BYTES: u64 = 8;

/// Reserved name of the per-target table.
pub const CATALOGUE: &str = "CATALOGUE";
/// Reserved name of the per-frame table.
pub const IMAGELIST: &str = "IMAGELIST";
/// Reserved name of the empty placeholder section.
pub const PRIMARY: &str = "PRIMARY";

/// Header size of a decoded cube payload: rows(8) + cols(8).
pub const CUBE_HEADER_LEN: usize = 16;

//==================================================================================
// II. Footer & Manifest
//==================================================================================

/// Where one section lives in the file and what it holds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectionManifestEntry {
    pub name: String,
    /// The stored kind tag, see `SectionKind::tag`. Unknown tags are preserved.
    pub kind: String,
    pub offset: u64,
    pub length: u64,
    /// Targets for catalogue/cubes, frames for frame metadata.
    pub rows: u64,
    /// Frames for cubes, column count for tables.
    pub cols: u64,
    /// Table schema, so sections can be listed without decoding them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

/// The file footer: section manifest in stored order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveFooter {
    pub writer_version: String,
    pub sections: Vec<SectionManifestEntry>,
}
