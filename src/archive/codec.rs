//! Serialization of a single `Section` to and from its stored payload.
//! This is the only place that knows how tables and cubes look as bytes.

use std::io::Cursor;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;

use super::format::{SectionManifestEntry, CUBE_HEADER_LEN};
use super::section::{Cube, Section, SectionKind};
use crate::error::StitchError;
use crate::kernels::{bitcast, zstd};

/// An encoded section, ready to be placed in a file. `entry.offset` is filled in
/// by the writer.
#[derive(Debug, Clone)]
pub(crate) struct EncodedSection {
    pub entry: SectionManifestEntry,
    pub payload: Vec<u8>,
}

//==================================================================================
// 1. Public (crate) API
//==================================================================================

pub(crate) fn encode_section(
    name: &str,
    section: &Section,
    level: i32,
) -> Result<EncodedSection, StitchError> {
    let (rows, cols) = section.shape();
    let (raw, schema) = match section {
        Section::Primary => (Vec::new(), None),
        Section::Catalogue(batch) | Section::FrameMetadata(batch) => {
            (encode_table(batch)?, Some(batch.schema().as_ref().clone()))
        }
        Section::Cube(cube) => (encode_cube(cube), None),
        Section::Unrecognized { payload, .. } => (payload.clone(), None),
    };

    Ok(EncodedSection {
        entry: SectionManifestEntry {
            name: name.to_string(),
            kind: section.kind().tag().to_string(),
            offset: 0,
            length: 0,
            rows: rows as u64,
            cols: cols as u64,
            schema,
        },
        payload: zstd::encode(&raw, level)?,
    })
}

pub(crate) fn decode_section(entry: &SectionManifestEntry, payload: &[u8]) -> Result<Section, StitchError> {
    let raw = zstd::decode(payload)?;
    match SectionKind::from_tag(&entry.kind) {
        SectionKind::Primary => Ok(Section::Primary),
        SectionKind::Catalogue => Ok(Section::Catalogue(decode_table(&raw)?)),
        SectionKind::FrameMetadata => Ok(Section::FrameMetadata(decode_table(&raw)?)),
        SectionKind::Cube => Ok(Section::Cube(decode_cube(&entry.name, &raw)?)),
        SectionKind::Unrecognized(kind) => Ok(Section::Unrecognized { kind, payload: raw }),
    }
}

//==================================================================================
// 2. Tables (Arrow IPC stream, one batch)
//==================================================================================

fn encode_table(batch: &RecordBatch) -> Result<Vec<u8>, StitchError> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

fn decode_table(bytes: &[u8]) -> Result<RecordBatch, StitchError> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    let mut batches = reader.collect::<Result<Vec<_>, _>>()?;
    if batches.len() == 1 {
        return Ok(batches.swap_remove(0));
    }
    // Zero batches concatenate to an empty batch of `schema`.
    Ok(concat_batches(&schema, &batches)?)
}

//==================================================================================
// 3. Cubes (shape header + row-major f64)
//==================================================================================

fn encode_cube(cube: &Cube) -> Vec<u8> {
    let (rows, cols) = cube.dim();
    // Stored little-endian whatever the host order.
    let values: Vec<f64> = cube
        .iter()
        .map(|v| f64::from_bits(v.to_bits().to_le()))
        .collect();

    let mut buf = Vec::with_capacity(CUBE_HEADER_LEN + values.len() * 8);
    buf.extend_from_slice(&(rows as u64).to_le_bytes());
    buf.extend_from_slice(&(cols as u64).to_le_bytes());
    buf.extend_from_slice(bitcast::to_bytes(&values));
    buf
}

fn decode_cube(name: &str, bytes: &[u8]) -> Result<Cube, StitchError> {
    if bytes.len() < CUBE_HEADER_LEN {
        return Err(StitchError::Format(format!(
            "Cube '{}' payload is {} bytes, too short for its shape header",
            name,
            bytes.len()
        )));
    }
    let (header, body) = bytes.split_at(CUBE_HEADER_LEN);
    let (rows_bytes, cols_bytes) = header.split_at(8);
    let rows = u64::from_le_bytes(rows_bytes.try_into().map_err(|_| {
        StitchError::Format(format!("Cube '{}' has a malformed shape header", name))
    })?) as usize;
    let cols = u64::from_le_bytes(cols_bytes.try_into().map_err(|_| {
        StitchError::Format(format!("Cube '{}' has a malformed shape header", name))
    })?) as usize;

    let values: Vec<f64> = bitcast::from_bytes::<f64>(body)?
        .into_iter()
        .map(|v| f64::from_bits(u64::from_le(v.to_bits())))
        .collect();
    Cube::from_shape_vec((rows, cols), values).map_err(|e| StitchError::ShapeMismatch {
        section: name.to_string(),
        detail: format!("stored shape {}x{} does not fit payload: {}", rows, cols, e),
    })
}

//==================================================================================
// 4. Unit Tests
//==================================================================================
