// In: src/pipeline/mod.rs

//! The stitching pipeline: Stitcher -> Sorter -> Statistics Aggregator.
//!
//! Each stage takes the output archive by value and hands it back, so exactly one
//! stage owns it at a time. Nothing reaches disk until the final `close()`; an
//! error anywhere drops the archive and with it every staged section.

pub mod aggregator;
pub mod exposure;
pub mod sorter;
pub mod stitcher;


use std::cmp::Ordering;
use std::path::Path;

use crate::archive::{Archive, SectionKind, CATALOGUE, IMAGELIST};
use crate::config::StitchConfig;
use crate::error::StitchError;

pub use self::aggregator::{recompute_statistics, FLUX_MEAN_COLUMN, NPTS_COLUMN};
pub use self::exposure::ExposureFilter;
pub use self::sorter::{sort_by_time, sort_frames};
pub use self::stitcher::stitch;

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub targets: usize,
    pub frames: usize,
    pub cubes: Vec<String>,
}

impl PipelineSummary {
    fn of(archive: &Archive) -> Self {
        Self {
            targets: archive.section_info(CATALOGUE).map_or(0, |info| info.rows),
            frames: archive.section_info(IMAGELIST).map_or(0, |info| info.rows),
            cubes: archive
                .sections()
                .into_iter()
                .filter(|info| info.kind == SectionKind::Cube)
                .map(|info| info.name)
                .collect(),
        }
    }
}

//==================================================================================
// 1. Entry Points
//==================================================================================

/// Stitches `inputs` into a new archive at `output`, sorts it by time and
/// recomputes the catalogue statistics.
///
/// `output` is only created (or replaced) once every stage has succeeded.
pub fn stitch_files<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
    config: &StitchConfig,
) -> Result<PipelineSummary, StitchError> {
    if inputs.is_empty() {
        return Err(StitchError::NoInputs);
    }

    let mut archives = inputs
        .iter()
        .map(|path| Archive::open(path))
        .collect::<Result<Vec<_>, _>>()?;
    if config.order_inputs_by_time {
        archives = order_by_time(archives, &config.time_column)?;
    }
    log::info!(
        "Stitching {} archives into {}",
        archives.len(),
        output.display()
    );

    let filter = ExposureFilter::from_config(config);
    let archive = Archive::create(output).with_compression_level(config.compression_level);
    let archive = stitch(archives, archive, &filter)?;
    // Every stitched cube is in stitch order, so none may be left out of the sort.
    let archive = sort_frames(archive, &config.time_column, &[])?;
    let archive = recompute_statistics(archive, config)?;
    archive.check_alignment()?;

    let summary = PipelineSummary::of(&archive);
    archive.close()?;
    log::info!(
        "Wrote {} ({} targets x {} frames)",
        output.display(),
        summary.targets,
        summary.frames
    );
    Ok(summary)
}

/// Re-sorts an existing archive in place. Refuses unless `confirmed`, before the
/// file is even opened.
pub fn resort_file(path: &Path, confirmed: bool, config: &StitchConfig) -> Result<(), StitchError> {
    if !confirmed {
        return Err(StitchError::ConfirmationRequired(path.to_path_buf()));
    }

    let archive = Archive::open_rw(path)?.with_compression_level(config.compression_level);
    let archive = sort_by_time(archive, config)?;
    archive.check_alignment()?;
    archive.close()
}

//==================================================================================
// 2. Helpers
//==================================================================================

/// Orders archives by their earliest frame time. Archives without any finite
/// time keep their relative order at the end.
fn order_by_time(archives: Vec<Archive>, time_column: &str) -> Result<Vec<Archive>, StitchError> {
    let mut keyed = Vec::with_capacity(archives.len());
    for mut archive in archives {
        let start = archive.time_range(time_column)?.map(|(start, _)| start);
        keyed.push((start, archive));
    }

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    for (start, archive) in &keyed {
        log::debug!("{} starts at {:?}", archive.path().display(), start);
    }
    Ok(keyed.into_iter().map(|(_, archive)| archive).collect())
}
