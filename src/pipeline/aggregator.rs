//! Recomputes the per-target summary columns of the catalogue from the
//! (stitched, sorted) flux cubes.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, RecordBatch};
use arrow::datatypes::{Field, FieldRef, Schema};

use crate::archive::section::column_index;
use crate::archive::{Archive, Cube, Section, CATALOGUE};
use crate::config::StitchConfig;
use crate::error::StitchError;
use crate::kernels::weighted::{inverse_variance_mean, TargetStatistics};

/// Count of finite flux samples per target.
pub const NPTS_COLUMN: &str = "NPTS";
/// Inverse-variance weighted mean flux per target.
pub const FLUX_MEAN_COLUMN: &str = "FLUX_MEAN";

pub fn recompute_statistics(mut archive: Archive, config: &StitchConfig) -> Result<Archive, StitchError> {
    log::info!("Computing statistics for {}", archive.path().display());

    let flux = read_required_cube(&mut archive, &config.flux_section)?;
    let fluxerr = read_required_cube(&mut archive, &config.fluxerr_section)?;
    let catalogue = archive.read_catalogue()?;

    if flux.dim() != fluxerr.dim() {
        return Err(StitchError::ShapeMismatch {
            section: config.fluxerr_section.clone(),
            detail: format!(
                "shape {:?} does not match {} shape {:?}",
                fluxerr.dim(),
                config.flux_section,
                flux.dim()
            ),
        });
    }
    if flux.nrows() != catalogue.num_rows() {
        return Err(StitchError::ShapeMismatch {
            section: config.flux_section.clone(),
            detail: format!(
                "{} rows but {} catalogue targets",
                flux.nrows(),
                catalogue.num_rows()
            ),
        });
    }

    let stats = compute_statistics(&flux, &fluxerr)?;
    log::debug!(
        "{} of {} targets have at least one finite sample",
        stats.iter().filter(|s| s.npts > 0).count(),
        stats.len()
    );

    let updated = with_statistics(&catalogue, &stats)?;
    archive.write_section(CATALOGUE, Section::Catalogue(updated))?;
    Ok(archive)
}

/// One `TargetStatistics` per cube row. Both cubes must have the same shape.
pub fn compute_statistics(flux: &Cube, fluxerr: &Cube) -> Result<Vec<TargetStatistics>, StitchError> {
    flux.outer_iter()
        .zip(fluxerr.outer_iter())
        .enumerate()
        .map(|(target, (lc, err))| inverse_variance_mean(target, lc, err))
        .collect()
}

fn read_required_cube(archive: &mut Archive, name: &str) -> Result<Cube, StitchError> {
    if !archive.contains(name) {
        return Err(StitchError::MissingSection {
            section: name.to_string(),
            path: archive.path().to_path_buf(),
        });
    }
    archive.read_cube(name)
}

/// Replaces `NPTS`/`FLUX_MEAN` where they already exist (matched ignoring case)
/// and appends them otherwise. Every other column and the schema metadata are
/// carried over untouched.
fn with_statistics(catalogue: &RecordBatch, stats: &[TargetStatistics]) -> Result<RecordBatch, StitchError> {
    let npts: ArrayRef = Arc::new(Int64Array::from_iter_values(stats.iter().map(|s| s.npts)));
    let mean: ArrayRef = Arc::new(Float64Array::from_iter_values(
        stats.iter().map(|s| s.flux_mean),
    ));

    let schema = catalogue.schema();
    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    let mut columns: Vec<ArrayRef> = catalogue.columns().to_vec();

    for (name, values) in [(NPTS_COLUMN, npts), (FLUX_MEAN_COLUMN, mean)] {
        let field = Arc::new(Field::new(name, values.data_type().clone(), false));
        match column_index(catalogue, name) {
            Some(idx) => {
                fields[idx] = field;
                columns[idx] = values;
            }
            None => {
                fields.push(field);
                columns.push(values);
            }
        }
    }

    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}
