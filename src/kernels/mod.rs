//! Pure, stateless kernels used by the archive accessor and the pipeline stages.
//!
//! Nothing in here knows about archives or sections: kernels take slices, arrays
//! and batches, and return new ones.

//==================================================================================
// 1. Module Declarations
//==================================================================================

/// Payload encoding: raw `f64` buffers <-> bytes.
pub mod bitcast;

/// Payload encoding: Zstandard entropy coding of section payloads.
pub mod zstd;

/// Frame ordering: stable argsort and permutation application.
pub mod permutation;

/// Per-target inverse-variance statistics.
pub mod weighted;
