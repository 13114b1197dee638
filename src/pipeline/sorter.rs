//! Puts the frame axis of an archive into ascending time order.

use crate::archive::{float_column, Archive, Section, SectionKind, IMAGELIST};
use crate::config::StitchConfig;
use crate::error::StitchError;
use crate::kernels::permutation::{is_identity, permute_columns, permute_rows, stable_argsort};

/// Sorts the frame metadata by `config.time_column` and applies the same
/// permutation to every cube not named in `config.sort_exempt_sections`.
///
/// Exempt cubes keep their stored column order, so they no longer line up with
/// the frame metadata afterwards. Use this only on archives whose exempt cubes
/// were never in frame order to begin with.
pub fn sort_by_time(archive: Archive, config: &StitchConfig) -> Result<Archive, StitchError> {
    sort_frames(archive, &config.time_column, &config.sort_exempt_sections)
}

/// Sorts the frame metadata by `time_column` and applies the same permutation to
/// every cube except those in `exempt` (matched ignoring case).
///
/// An archive that is already in order is handed back without staging anything,
/// so closing it leaves the file byte-for-byte unchanged.
pub fn sort_frames(
    mut archive: Archive,
    time_column: &str,
    exempt: &[String],
) -> Result<Archive, StitchError> {
    log::info!("Sorting {}", archive.path().display());

    let frames = archive.read_frame_metadata()?;
    let times = float_column(&frames, IMAGELIST, time_column)?;
    let order = stable_argsort(&times)?;
    if is_identity(&order) {
        log::info!("{} frames already in time order", order.len());
        return Ok(archive);
    }

    // Every cube is checked against the frame count before anything is staged.
    let mut cubes = Vec::new();
    for info in archive.sections() {
        if info.kind != SectionKind::Cube {
            continue;
        }
        if exempt.iter().any(|name| name.eq_ignore_ascii_case(&info.name)) {
            log::info!("Leaving {} in stored order", info.name);
            continue;
        }
        if info.cols != order.len() {
            return Err(StitchError::ShapeMismatch {
                section: info.name,
                detail: format!("{} columns but {} frames", info.cols, order.len()),
            });
        }
        cubes.push(info.name);
    }

    log::info!("Sorting {}", IMAGELIST);
    let sorted = permute_rows(&frames, &order)?;
    archive.write_section(IMAGELIST, Section::FrameMetadata(sorted))?;

    for name in cubes {
        log::info!("Sorting {}", name);
        let cube = archive.read_cube(&name)?;
        archive.write_section(&name, Section::Cube(permute_columns(&cube, &order)))?;
    }

    Ok(archive)
}
