//! This module contains the pure, stateless kernels for Zstandard compression and
//! decompression of section payloads.
//!
//! Every payload is stored as `[uncompressed_len: u64 LE][zstd frame]` so the
//! decoder can pre-allocate and verify the decoded size.

use std::io::Write;

use crate::error::StitchError;

//==================================================================================
// 1. Public API
//==================================================================================

/// Compresses `input_bytes`, prepending the uncompressed length.
pub fn encode(input_bytes: &[u8], level: i32) -> Result<Vec<u8>, StitchError> {
    if input_bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut output_buf = Vec::with_capacity(input_bytes.len() / 2 + 8);
    let uncompressed_len: u64 = input_bytes.len() as u64;
    output_buf.extend_from_slice(&uncompressed_len.to_le_bytes());

    let mut encoder = zstd::stream::Encoder::new(&mut output_buf, level)
        .map_err(|e| StitchError::ZstdError(e.to_string()))?;
    encoder
        .write_all(input_bytes)
        .map_err(|e| StitchError::ZstdError(e.to_string()))?;
    // `finish` is essential to finalize the Zstd frame.
    encoder
        .finish()
        .map_err(|e| StitchError::ZstdError(e.to_string()))?;

    Ok(output_buf)
}

/// Inverse of [`encode`].
pub fn decode(input_bytes: &[u8]) -> Result<Vec<u8>, StitchError> {
    if input_bytes.is_empty() {
        return Ok(Vec::new());
    }

    let (len_bytes, compressed_data) = match input_bytes.split_first_chunk::<8>() {
        Some(split) => split,
        None => {
            return Err(StitchError::ZstdError(
                "Input stream too short to contain size header.".to_string(),
            ))
        }
    };
    let uncompressed_len = u64::from_le_bytes(*len_bytes) as usize;

    // The header comes from disk, so it only bounds the result after decoding.
    let mut decompressed_data = Vec::new();
    zstd::stream::copy_decode(compressed_data, &mut decompressed_data)
        .map_err(|e| StitchError::ZstdError(e.to_string()))?;

    if decompressed_data.len() != uncompressed_len {
        return Err(StitchError::ZstdError(format!(
            "Decompressed size does not match header. Expected {}, got {}.",
            uncompressed_len,
            decompressed_data.len()
        )));
    }

    Ok(decompressed_data)
}

//==================================================================================
// 2. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_shrinks_repetitive_payload() {
        let original_bytes = vec![42u8; 10_000];
        let compressed_bytes = encode(&original_bytes, 5).unwrap();

        assert!(compressed_bytes.len() < 50);
        assert_eq!(decode(&compressed_bytes).unwrap(), original_bytes);
    }

    #[test]
    fn test_zstd_empty_payload_stays_empty() {
        assert!(encode(&[], 3).unwrap().is_empty());
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_zstd_decompress_invalid_data() {
        let result = decode(&[1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(StitchError::ZstdError(_))));
    }

    #[test]
    fn test_zstd_detects_length_header_tampering() {
        let mut compressed = encode(b"flux flux flux flux flux", 3).unwrap();
        compressed[0] = compressed[0].wrapping_add(1);
        let result = decode(&compressed);
        assert!(matches!(result, Err(StitchError::ZstdError(msg)) if msg.contains("does not match")));
    }

    #[test]
    fn test_zstd_absurd_length_header_is_an_error() {
        let mut compressed = encode(b"flux flux flux flux flux", 3).unwrap();
        compressed[..8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode(&compressed), Err(StitchError::ZstdError(_))));
    }
}
