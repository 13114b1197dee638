//! This module contains the pure, stateless kernel for moving dense `f64` data
//! in and out of raw byte buffers.
//!
//! It is a zero-copy reinterpretation on the encode side and a single memcpy into
//! an aligned `Vec<f64>` on the decode side. Byte order is the host's; callers
//! that need a fixed on-disk order convert the values first.

use bytemuck::Pod;

use crate::error::StitchError;

//==================================================================================
// 1. Public API
//==================================================================================

/// Reinterprets a typed slice as its raw bytes.
pub fn to_bytes<T: Pod>(values: &[T]) -> &[u8] {
    bytemuck::cast_slice(values)
}

/// Copies raw bytes into a freshly allocated, correctly aligned `Vec<T>`.
///
/// `bytes` comes out of a decompression buffer with alignment 1, so a direct
/// `cast_slice` would fail on most inputs; copying into the typed destination
/// avoids that.
pub fn from_bytes<T: Pod + Default>(bytes: &[u8]) -> Result<Vec<T>, StitchError> {
    let width = std::mem::size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(StitchError::BufferMismatch(width, bytes.len()));
    }

    let mut out = vec![T::default(); bytes.len() / width];
    bytemuck::try_cast_slice_mut::<T, u8>(&mut out)?.copy_from_slice(bytes);
    Ok(out)
}

//==================================================================================
// 2. Unit Tests
//==================================================================================
