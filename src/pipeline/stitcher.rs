// In: src/pipeline/stitcher.rs

//! Concatenates N archives that share one catalogue into a single archive.
//!
//! The first input's section listing drives everything: its order becomes the
//! output order, and every section it names must exist in every other input.
//! Each input's frames are masked by that input's own exposure mask, then appended
//! in input order, so output frame `f` is always the same physical frame in the
//! frame metadata and in every cube.

use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef, BooleanArray, RecordBatch};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use ndarray::Axis;

use super::exposure::{select_cube_frames, select_frame_rows, ExposureFilter};
use crate::archive::section::column_index;
use crate::archive::{Archive, Cube, Section, SectionInfo, SectionKind, CATALOGUE, IMAGELIST, PRIMARY};
use crate::error::StitchError;

/// What the stitcher does with one section of the first input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StitchStep {
    Cube(String),
    FrameMetadata,
}

//==================================================================================
// 1. Public API
//==================================================================================

/// Stitches `inputs` (in order) into `output` and hands `output` back, still open.
///
/// All validation that can be done from section listings happens before the
/// first section is staged; later failures leave `output` with staged data that
/// is discarded when the caller drops it.
pub fn stitch(
    mut inputs: Vec<Archive>,
    mut output: Archive,
    filter: &ExposureFilter,
) -> Result<Archive, StitchError> {
    if inputs.is_empty() {
        return Err(StitchError::NoInputs);
    }

    let targets = validate_catalogues(&inputs)?;
    let steps = plan(&inputs[0].sections())?;
    for input in &inputs {
        require(input, IMAGELIST)?;
    }

    // Each input is masked by its own exposure column.
    let mut frames = Vec::with_capacity(inputs.len());
    let mut masks = Vec::with_capacity(inputs.len());
    for input in inputs.iter_mut() {
        let input_frames = input.read_frame_metadata()?;
        let mask = filter.mask(&input_frames)?;
        log::info!(
            "{}: keeping {} of {} frames",
            input.path().display(),
            mask.true_count(),
            input_frames.num_rows()
        );
        frames.push(input_frames);
        masks.push(mask);
    }

    let catalogue = inputs[0].read_catalogue()?;
    output.write_section(CATALOGUE, Section::Catalogue(catalogue))?;

    for step in steps {
        match step {
            StitchStep::Cube(name) => {
                let merged = stitch_cube(&mut inputs, &masks, &name, targets)?;
                log::debug!("{}: out shape {:?}", name, merged.dim());
                output.write_section(&name, Section::Cube(merged))?;
            }
            StitchStep::FrameMetadata => {
                log::info!("Found catalogue {}", IMAGELIST);
                let merged = stitch_frames(&frames, &masks)?;
                log::debug!("{}: out rows {}", IMAGELIST, merged.num_rows());
                output.write_section(IMAGELIST, Section::FrameMetadata(merged))?;
            }
        }
    }

    Ok(output)
}

//==================================================================================
// 2. Planning & Validation
//==================================================================================

/// Turns the first input's listing into work. Unknown kinds abort here, before
/// anything is read or written.
fn plan(listing: &[SectionInfo]) -> Result<Vec<StitchStep>, StitchError> {
    let mut steps = Vec::new();
    for info in listing {
        if info.name.is_empty() || info.name.eq_ignore_ascii_case(PRIMARY) {
            continue;
        }
        match &info.kind {
            SectionKind::Primary => {}
            SectionKind::Catalogue if info.name.eq_ignore_ascii_case(CATALOGUE) => {}
            SectionKind::Cube => steps.push(StitchStep::Cube(info.name.clone())),
            SectionKind::FrameMetadata if info.name.eq_ignore_ascii_case(IMAGELIST) => {
                steps.push(StitchStep::FrameMetadata)
            }
            // A second per-target or per-frame table has no merge rule.
            SectionKind::Catalogue | SectionKind::FrameMetadata => {
                return Err(StitchError::UnknownSectionKind {
                    section: info.name.clone(),
                    kind: info.kind.tag().to_string(),
                })
            }
            SectionKind::Unrecognized(kind) => {
                return Err(StitchError::UnknownSectionKind {
                    section: info.name.clone(),
                    kind: kind.clone(),
                })
            }
        }
    }
    Ok(steps)
}

/// Every input must carry a catalogue with the same number of targets. Returns
/// that number.
fn validate_catalogues(inputs: &[Archive]) -> Result<usize, StitchError> {
    let mut expected: Option<(usize, &Archive)> = None;
    for input in inputs {
        let info = require(input, CATALOGUE)?;
        if info.kind != SectionKind::Catalogue {
            return Err(StitchError::ShapeMismatch {
                section: CATALOGUE.to_string(),
                detail: format!(
                    "'{}' stores it as a {} section",
                    input.path().display(),
                    info.kind
                ),
            });
        }
        match expected {
            None => expected = Some((info.rows, input)),
            Some((targets, first)) if targets != info.rows => {
                return Err(StitchError::ShapeMismatch {
                    section: CATALOGUE.to_string(),
                    detail: format!(
                        "'{}' has {} targets but '{}' has {}",
                        input.path().display(),
                        info.rows,
                        first.path().display(),
                        targets
                    ),
                })
            }
            Some(_) => {}
        }
    }
    Ok(expected.map(|(targets, _)| targets).unwrap_or(0))
}

fn require(input: &Archive, name: &str) -> Result<SectionInfo, StitchError> {
    input
        .section_info(name)
        .ok_or_else(|| StitchError::MissingSection {
            section: name.to_string(),
            path: input.path().to_path_buf(),
        })
}

//==================================================================================
// 3. Concatenation
//==================================================================================

fn stitch_cube(
    inputs: &mut [Archive],
    masks: &[BooleanArray],
    name: &str,
    targets: usize,
) -> Result<Cube, StitchError> {
    log::info!("Found image {}", name);

    let mut parts = Vec::with_capacity(inputs.len());
    for (input, mask) in inputs.iter_mut().zip(masks) {
        require(input, name)?;
        log::info!("Reading {} from {}", name, input.path().display());

        let cube = input.read_cube(name)?;
        if cube.nrows() != targets || cube.ncols() != mask.len() {
            return Err(StitchError::ShapeMismatch {
                section: name.to_string(),
                detail: format!(
                    "'{}' holds a {}x{} cube for {} targets and {} frames",
                    input.path().display(),
                    cube.nrows(),
                    cube.ncols(),
                    targets,
                    mask.len()
                ),
            });
        }
        let kept = select_cube_frames(&cube, mask);
        log::debug!("{}: in shape {:?}", name, kept.dim());
        parts.push(kept);
    }

    let views: Vec<_> = parts.iter().map(|part| part.view()).collect();
    ndarray::concatenate(Axis(1), &views).map_err(|e| StitchError::ShapeMismatch {
        section: name.to_string(),
        detail: e.to_string(),
    })
}

fn stitch_frames(frames: &[RecordBatch], masks: &[BooleanArray]) -> Result<RecordBatch, StitchError> {
    let kept = frames
        .iter()
        .zip(masks)
        .map(|(batch, mask)| select_frame_rows(batch, mask))
        .collect::<Result<Vec<_>, _>>()?;

    let schema = union_schema(&kept)?;
    let aligned = kept
        .iter()
        .map(|batch| conform(batch, &schema))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &aligned)?)
}

/// The union of all inputs' frame-metadata columns, in first-seen order. A column
/// missing from some input becomes nullable.
fn union_schema(batches: &[RecordBatch]) -> Result<Arc<Schema>, StitchError> {
    let mut fields: Vec<Field> = Vec::new();
    for batch in batches {
        for field in batch.schema().fields() {
            match fields
                .iter_mut()
                .find(|known| known.name().eq_ignore_ascii_case(field.name()))
            {
                Some(known) => {
                    if known.data_type() != field.data_type() {
                        let wider = widen(known.data_type(), field.data_type()).ok_or_else(|| {
                            StitchError::ShapeMismatch {
                                section: IMAGELIST.to_string(),
                                detail: format!(
                                    "column '{}' is {} in one input and {} in another",
                                    known.name(),
                                    known.data_type(),
                                    field.data_type()
                                ),
                            }
                        })?;
                        *known = known.clone().with_data_type(wider);
                    }
                    if field.is_nullable() && !known.is_nullable() {
                        *known = known.clone().with_nullable(true);
                    }
                }
                None => fields.push(field.as_ref().clone()),
            }
        }
    }

    for field in fields.iter_mut() {
        if batches
            .iter()
            .any(|batch| column_index(batch, field.name()).is_none())
        {
            *field = field.clone().with_nullable(true);
        }
    }

    let metadata = batches
        .first()
        .map(|batch| batch.schema().metadata().clone())
        .unwrap_or_default();
    let fields: Vec<FieldRef> = fields.into_iter().map(Arc::new).collect();
    Ok(Arc::new(Schema::new_with_metadata(fields, metadata)))
}

/// The common type of a numeric column stored as `a` in one input and `b` in
/// another: any float makes it `Float64`, otherwise the widest integer of matching
/// signedness. Non-numeric conflicts have no common type.
fn widen(a: &DataType, b: &DataType) -> Option<DataType> {
    let numeric = |t: &DataType| t.is_integer() || t.is_floating();
    if !numeric(a) || !numeric(b) {
        return None;
    }
    if a.is_floating() || b.is_floating() {
        return Some(DataType::Float64);
    }
    if a.is_unsigned_integer() && b.is_unsigned_integer() {
        Some(DataType::UInt64)
    } else {
        Some(DataType::Int64)
    }
}

/// Reorders `batch`'s columns to `schema`, filling absent ones with nulls and
/// widening the ones whose type was promoted.
fn conform(batch: &RecordBatch, schema: &Arc<Schema>) -> Result<RecordBatch, StitchError> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| match column_index(batch, field.name()) {
            Some(idx) if batch.column(idx).data_type() == field.data_type() => {
                Ok(batch.column(idx).clone())
            }
            Some(idx) => cast(batch.column(idx), field.data_type()),
            None => Ok(new_null_array(field.data_type(), batch.num_rows())),
        })
        .collect::<Result<Vec<ArrayRef>, _>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

//==================================================================================
// 4. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int32Array, StringArray};

    fn info(name: &str, kind: SectionKind) -> SectionInfo {
        SectionInfo {
            name: name.to_string(),
            kind,
            rows: 1,
            cols: 1,
        }
    }

    #[test]
    fn test_plan_follows_first_input_order() {
        let listing = vec![
            info(PRIMARY, SectionKind::Primary),
            info("FLUX", SectionKind::Cube),
            info(CATALOGUE, SectionKind::Catalogue),
            info(IMAGELIST, SectionKind::FrameMetadata),
            info("FLUXERR", SectionKind::Cube),
        ];
        assert_eq!(
            plan(&listing).unwrap(),
            vec![
                StitchStep::Cube("FLUX".to_string()),
                StitchStep::FrameMetadata,
                StitchStep::Cube("FLUXERR".to_string()),
            ]
        );
    }

    #[test]
    fn test_plan_rejects_unknown_kinds() {
        let listing = vec![
            info("FLUX", SectionKind::Cube),
            info("HOTPIX", SectionKind::Unrecognized("bitmask".to_string())),
        ];
        assert!(matches!(
            plan(&listing),
            Err(StitchError::UnknownSectionKind { section, kind }) if section == "HOTPIX" && kind == "bitmask"
        ));

        let listing = vec![info("APERTURES", SectionKind::Catalogue)];
        assert!(matches!(
            plan(&listing),
            Err(StitchError::UnknownSectionKind { .. })
        ));
    }

    #[test]
    fn test_plan_skips_unnamed_placeholders() {
        let listing = vec![info("", SectionKind::Unrecognized("image".to_string()))];
        assert!(plan(&listing).unwrap().is_empty());
    }

    #[test]
    fn test_frame_schemas_are_unioned() {
        let a = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("tmid", DataType::Float64, false),
                Field::new("airmass", DataType::Float64, false),
            ])),
            vec![
                Arc::new(Float64Array::from(vec![1.0, 2.0])),
                Arc::new(Float64Array::from(vec![1.1, 1.2])),
            ],
        )
        .unwrap();
        let b = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("tmid", DataType::Float64, false),
                Field::new("shift", DataType::Int32, false),
            ])),
            vec![
                Arc::new(Float64Array::from(vec![3.0])),
                Arc::new(Int32Array::from(vec![2])),
            ],
        )
        .unwrap();
        let keep_a = BooleanArray::from(vec![true, true]);
        let keep_b = BooleanArray::from(vec![true]);

        let merged = stitch_frames(&[a, b], &[keep_a, keep_b]).unwrap();

        assert_eq!(merged.num_rows(), 3);
        let names: Vec<_> = merged
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["tmid", "airmass", "shift"]);
        assert!(!merged.schema().field(0).is_nullable());
        assert!(merged.schema().field(1).is_nullable());
        assert_eq!(merged.column(1).null_count(), 1);
        assert_eq!(merged.column(2).null_count(), 2);
    }

    #[test]
    fn test_numeric_frame_columns_widen_to_the_larger_type() {
        let a = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("shift", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![1, 2]))],
        )
        .unwrap();
        let b = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("shift", DataType::Float64, false)])),
            vec![Arc::new(Float64Array::from(vec![2.5]))],
        )
        .unwrap();
        let masks = [
            BooleanArray::from(vec![true, true]),
            BooleanArray::from(vec![true]),
        ];

        let merged = stitch_frames(&[a, b], &masks).unwrap();

        assert_eq!(merged.schema().field(0).data_type(), &DataType::Float64);
        let shift = merged
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(shift.values().to_vec(), vec![1.0, 2.0, 2.5]);
    }

    #[test]
    fn test_integer_widths_widen_to_int64() {
        assert_eq!(widen(&DataType::Int16, &DataType::Int32), Some(DataType::Int64));
        assert_eq!(widen(&DataType::UInt8, &DataType::UInt32), Some(DataType::UInt64));
        assert_eq!(widen(&DataType::UInt8, &DataType::Int8), Some(DataType::Int64));
        assert_eq!(widen(&DataType::Float32, &DataType::Int64), Some(DataType::Float64));
    }

    #[test]
    fn test_text_and_number_columns_do_not_merge() {
        let a = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("filter", DataType::Float64, false)])),
            vec![Arc::new(Float64Array::from(vec![1.0]))],
        )
        .unwrap();
        let b = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("filter", DataType::Utf8, false)])),
            vec![Arc::new(StringArray::from(vec!["ng"]))],
        )
        .unwrap();
        let masks = [BooleanArray::from(vec![true]), BooleanArray::from(vec![true])];
        assert!(matches!(
            stitch_frames(&[a, b], &masks),
            Err(StitchError::ShapeMismatch { section, .. }) if section == IMAGELIST
        ));
    }
}
