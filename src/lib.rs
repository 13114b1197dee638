//! This file is the root of the `lcstitch` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of our library (`archive`, `pipeline`,
//!     `kernels`, etc.) so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types and entry points the binary and other
//!     callers need, so they don't have to know the module layout.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod archive;
pub mod config;
pub mod error;
pub mod kernels;
pub mod pipeline;

//==================================================================================
// 2. Public Surface
//==================================================================================
pub use archive::{Archive, Cube, OpenMode, Section, SectionInfo, SectionKind};
pub use config::{ExposureMatch, StitchConfig};
pub use error::StitchError;
pub use pipeline::{
    recompute_statistics, resort_file, sort_by_time, sort_frames, stitch, stitch_files, ExposureFilter,
    PipelineSummary,
};
