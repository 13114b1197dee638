// In: src/archive/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Archive Accessor
// ====================================================================================
//
// An `Archive` is an exclusively-owned handle on one container file. It never
// mutates the file it was opened from; every write is staged in memory (already
// encoded and compressed) and only `close()` materialises the result:
//
//   1. open / open_rw  -> read footer, build one slot per stored section (OnDisk)
//   2. read_*          -> decode a slot (staged bytes win over the on-disk copy)
//   3. write_section   -> validate shape, encode, replace or append a slot (Staged)
//   4. close           -> write all slots to `<name>.partial`, fsync, rename over
//                         the target path
//
// Dropping an archive without `close()` discards the staged writes, so a run that
// fails half-way never leaves a half-written archive under the target name.
// ====================================================================================

pub(crate) mod codec;
pub mod format;
pub mod section;

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;

use self::codec::{decode_section, encode_section};
use self::format::{
    ArchiveFooter, SectionManifestEntry, FILE_FORMAT_VERSION, FILE_MAGIC, FOOTER_LEN_BYTES,
    HEADER_LEN,
};
use crate::error::{IoResultExt, StitchError};

pub use self::format::{CATALOGUE, IMAGELIST, PRIMARY};
pub use self::section::{float_column, Cube, Section, SectionInfo, SectionKind};

/// Default zstd level for archives whose caller never sets one.
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Existing archive; replaced sections must keep their shape.
    ReadWrite,
    /// Fresh archive; sections may take any shape.
    Create,
}

#[derive(Debug)]
enum Payload {
    OnDisk,
    Staged(Vec<u8>),
}

#[derive(Debug)]
struct Slot {
    entry: SectionManifestEntry,
    payload: Payload,
}

#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    mode: OpenMode,
    file: Option<File>,
    slots: Vec<Slot>,
    compression_level: i32,
    dirty: bool,
    closed: bool,
}

//==================================================================================
// 1. Opening
//==================================================================================

impl Archive {
    /// Opens an existing archive for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        Self::open_existing(path.as_ref(), OpenMode::ReadOnly)
    }

    /// Opens an existing archive for in-place modification.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        Self::open_existing(path.as_ref(), OpenMode::ReadWrite)
    }

    /// Starts a new, empty archive. Nothing touches `path` until `close()`, which
    /// replaces any file already there.
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode: OpenMode::Create,
            file: None,
            slots: Vec::new(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            dirty: true,
            closed: false,
        }
    }

    fn open_existing(path: &Path, mode: OpenMode) -> Result<Self, StitchError> {
        let mut file = File::open(path).at(path)?;
        let footer = read_footer(&mut file, path)?;
        log::debug!(
            "Opened {} ({} sections, written by {})",
            path.display(),
            footer.sections.len(),
            footer.writer_version
        );

        let slots = footer
            .sections
            .into_iter()
            .map(|entry| Slot {
                entry,
                payload: Payload::OnDisk,
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            file: Some(file),
            slots,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            dirty: false,
            closed: false,
        })
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }
}

//==================================================================================
// 2. Listing & Reading
//==================================================================================

impl Archive {
    /// All sections in stored order, staged writes included.
    pub fn sections(&self) -> Vec<SectionInfo> {
        self.slots.iter().map(|slot| info_of(&slot.entry)).collect()
    }

    pub fn section_info(&self, name: &str) -> Option<SectionInfo> {
        self.position(name).map(|idx| info_of(&self.slots[idx].entry))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn read_section(&mut self, name: &str) -> Result<Section, StitchError> {
        let idx = self
            .position(name)
            .ok_or_else(|| StitchError::UnknownSection(name.to_string()))?;

        let slot = &self.slots[idx];
        let payload: Cow<[u8]> = match &slot.payload {
            Payload::Staged(bytes) => Cow::Borrowed(bytes),
            Payload::OnDisk => Cow::Owned(read_payload(
                self.file.as_mut(),
                &self.path,
                &slot.entry,
            )?),
        };
        decode_section(&slot.entry, &payload)
    }

    pub fn read_catalogue(&mut self) -> Result<RecordBatch, StitchError> {
        match self.read_section(CATALOGUE)? {
            Section::Catalogue(batch) => Ok(batch),
            other => Err(wrong_kind(CATALOGUE, SectionKind::Catalogue, other.kind())),
        }
    }

    pub fn read_frame_metadata(&mut self) -> Result<RecordBatch, StitchError> {
        match self.read_section(IMAGELIST)? {
            Section::FrameMetadata(batch) => Ok(batch),
            other => Err(wrong_kind(IMAGELIST, SectionKind::FrameMetadata, other.kind())),
        }
    }

    pub fn read_cube(&mut self, name: &str) -> Result<Cube, StitchError> {
        match self.read_section(name)? {
            Section::Cube(cube) => Ok(cube),
            other => Err(wrong_kind(name, SectionKind::Cube, other.kind())),
        }
    }

    /// Earliest and latest finite frame time, or `None` if there are none.
    pub fn time_range(&mut self, time_column: &str) -> Result<Option<(f64, f64)>, StitchError> {
        let frames = self.read_frame_metadata()?;
        let times = float_column(&frames, IMAGELIST, time_column)?;
        Ok(times
            .iter()
            .flatten()
            .filter(|t| t.is_finite())
            .fold(None, |range, t| match range {
                None => Some((t, t)),
                Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
            }))
    }

    /// Checks that every cube has one row per catalogue row and one column per
    /// frame-metadata row, using the manifest shapes only.
    pub fn check_alignment(&self) -> Result<(), StitchError> {
        let targets = self.section_info(CATALOGUE).map(|info| info.rows);
        let frames = self.section_info(IMAGELIST).map(|info| info.rows);

        for info in self.sections() {
            if info.kind != SectionKind::Cube {
                continue;
            }
            if let Some(targets) = targets {
                if info.rows != targets {
                    return Err(StitchError::ShapeMismatch {
                        section: info.name,
                        detail: format!("{} rows but {} catalogue targets", info.rows, targets),
                    });
                }
            }
            if let Some(frames) = frames {
                if info.cols != frames {
                    return Err(StitchError::ShapeMismatch {
                        section: info.name,
                        detail: format!("{} columns but {} frames", info.cols, frames),
                    });
                }
            }
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.entry.name.eq_ignore_ascii_case(name))
    }
}

//==================================================================================
// 3. Writing & Closing
//==================================================================================

impl Archive {
    /// Stages `section` under `name`, replacing a section of that name if one
    /// exists. Nothing reaches disk before `close()`.
    pub fn write_section(&mut self, name: &str, section: Section) -> Result<(), StitchError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(StitchError::ReadOnly(self.path.clone()));
        }

        let existing = self.position(name);
        if let (Some(idx), OpenMode::ReadWrite) = (existing, self.mode) {
            check_replacement(&self.slots[idx].entry, &section)?;
        }

        let mut encoded = encode_section(name, &section, self.compression_level)?;
        match existing {
            Some(idx) => {
                // Keep the stored spelling of the name.
                encoded.entry.name = self.slots[idx].entry.name.clone();
                self.slots[idx] = Slot {
                    entry: encoded.entry,
                    payload: Payload::Staged(encoded.payload),
                };
            }
            None => self.slots.push(Slot {
                entry: encoded.entry,
                payload: Payload::Staged(encoded.payload),
            }),
        }
        self.dirty = true;
        Ok(())
    }

    /// Flushes staged writes and releases the handle.
    ///
    /// Read-only and unmodified archives are left byte-for-byte untouched.
    pub fn close(mut self) -> Result<(), StitchError> {
        if self.mode != OpenMode::ReadOnly && self.dirty {
            self.flush()?;
            log::debug!("Wrote {}", self.path.display());
        }
        self.closed = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StitchError> {
        let partial = partial_path(&self.path);
        if let Err(err) = self.write_to(&partial) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }

        // Release the source handle before the file under it is replaced.
        self.file = None;
        if let Err(err) = fs::rename(&partial, &self.path).at(&self.path) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
        self.dirty = false;
        Ok(())
    }

    fn write_to(&mut self, target: &Path) -> Result<(), StitchError> {
        let mut writer = BufWriter::new(File::create(target).at(target)?);
        writer.write_all(FILE_MAGIC).at(target)?;
        writer
            .write_all(&FILE_FORMAT_VERSION.to_le_bytes())
            .at(target)?;

        let mut offset = HEADER_LEN;
        let mut entries = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let payload: Cow<[u8]> = match &slot.payload {
                Payload::Staged(bytes) => Cow::Borrowed(bytes),
                Payload::OnDisk => Cow::Owned(read_payload(
                    self.file.as_mut(),
                    &self.path,
                    &slot.entry,
                )?),
            };
            writer.write_all(&payload).at(target)?;

            let mut entry = slot.entry.clone();
            entry.offset = offset;
            entry.length = payload.len() as u64;
            offset += entry.length;
            entries.push(entry);
        }

        let footer = ArchiveFooter {
            writer_version: format!("lcstitch {}", crate::VERSION),
            sections: entries,
        };
        let footer_json = serde_json::to_vec(&footer)?;
        writer.write_all(&footer_json).at(target)?;
        writer
            .write_all(&(footer_json.len() as u64).to_le_bytes())
            .at(target)?;

        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .at(target)?;
        file.sync_all().at(target)
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if !self.closed && self.dirty && self.mode != OpenMode::ReadOnly {
            log::warn!(
                "Discarding unflushed changes to {}",
                self.path.display()
            );
        }
    }
}

//==================================================================================
// 4. Private Helpers
//==================================================================================

fn info_of(entry: &SectionManifestEntry) -> SectionInfo {
    SectionInfo {
        name: entry.name.clone(),
        kind: SectionKind::from_tag(&entry.kind),
        rows: entry.rows as usize,
        cols: entry.cols as usize,
    }
}

fn wrong_kind(name: &str, expected: SectionKind, found: SectionKind) -> StitchError {
    StitchError::ShapeMismatch {
        section: name.to_string(),
        detail: format!("expected a {} section, found {}", expected, found),
    }
}

/// In-place replacements may change table columns but never the frame or
/// target axis length.
fn check_replacement(old: &SectionManifestEntry, new: &Section) -> Result<(), StitchError> {
    let old_kind = SectionKind::from_tag(&old.kind);
    let new_kind = new.kind();
    if old_kind != new_kind {
        return Err(StitchError::ShapeMismatch {
            section: old.name.clone(),
            detail: format!("cannot replace a {} section with a {}", old_kind, new_kind),
        });
    }

    let (rows, cols) = new.shape();
    let same_shape = match new_kind {
        SectionKind::Cube => rows as u64 == old.rows && cols as u64 == old.cols,
        SectionKind::Catalogue | SectionKind::FrameMetadata => rows as u64 == old.rows,
        SectionKind::Primary | SectionKind::Unrecognized(_) => true,
    };
    if !same_shape {
        return Err(StitchError::ShapeMismatch {
            section: old.name.clone(),
            detail: format!(
                "replacement is {}x{}, stored section is {}x{}",
                rows, cols, old.rows, old.cols
            ),
        });
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn read_footer(file: &mut File, path: &Path) -> Result<ArchiveFooter, StitchError> {
    let file_len = file.metadata().at(path)?.len();
    if file_len < HEADER_LEN + FOOTER_LEN_BYTES {
        return Err(StitchError::Format(format!(
            "{} is {} bytes, too small to be an archive",
            path.display(),
            file_len
        )));
    }

    let mut header = [0u8; HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0)).at(path)?;
    file.read_exact(&mut header).at(path)?;
    if &header[..4] != FILE_MAGIC {
        return Err(StitchError::Format(format!(
            "{} has an invalid magic number",
            path.display()
        )));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FILE_FORMAT_VERSION {
        return Err(StitchError::Format(format!(
            "Unsupported archive version: expected {}, got {}",
            FILE_FORMAT_VERSION, version
        )));
    }

    let mut len_buf = [0u8; FOOTER_LEN_BYTES as usize];
    file.seek(SeekFrom::Start(file_len - FOOTER_LEN_BYTES))
        .at(path)?;
    file.read_exact(&mut len_buf).at(path)?;
    let footer_len = u64::from_le_bytes(len_buf);
    let body_end = file_len - FOOTER_LEN_BYTES;
    if footer_len > body_end - HEADER_LEN {
        return Err(StitchError::Format(format!(
            "Footer length {} exceeds file size {}",
            footer_len, file_len
        )));
    }

    let footer_start = body_end - footer_len;
    let mut footer_buf = vec![0u8; footer_len as usize];
    file.seek(SeekFrom::Start(footer_start)).at(path)?;
    file.read_exact(&mut footer_buf).at(path)?;
    let footer: ArchiveFooter = serde_json::from_slice(&footer_buf)?;

    for entry in &footer.sections {
        let end = entry.offset.saturating_add(entry.length);
        if entry.offset < HEADER_LEN || end > footer_start {
            return Err(StitchError::Format(format!(
                "Section '{}' lies outside the payload area",
                entry.name
            )));
        }
    }
    Ok(footer)
}

fn read_payload(
    file: Option<&mut File>,
    path: &Path,
    entry: &SectionManifestEntry,
) -> Result<Vec<u8>, StitchError> {
    let file = file.ok_or_else(|| {
        StitchError::Format(format!(
            "Section '{}' has no backing file",
            entry.name
        ))
    })?;
    let mut buf = vec![0u8; entry.length as usize];
    file.seek(SeekFrom::Start(entry.offset)).at(path)?;
    file.read_exact(&mut buf).at(path)?;
    Ok(buf)
}

//==================================================================================
// 5. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use ndarray::array;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn catalogue(targets: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "OBJ_ID",
            DataType::Int64,
            false,
        )]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from_iter_values(0..targets as i64))],
        )
        .unwrap()
    }

    fn imagelist(tmid: Vec<f64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "tmid",
            DataType::Float64,
            false,
        )]));
        RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(tmid))]).unwrap()
    }

    fn write_small_archive(path: &Path) {
        let mut archive = Archive::create(path);
        archive.write_section(PRIMARY, Section::Primary).unwrap();
        archive
            .write_section(CATALOGUE, Section::Catalogue(catalogue(2)))
            .unwrap();
        archive
            .write_section(IMAGELIST, Section::FrameMetadata(imagelist(vec![3.0, 1.0])))
            .unwrap();
        archive
            .write_section("FLUX", Section::Cube(array![[1.0, 2.0], [3.0, 4.0]]))
            .unwrap();
        archive.close().unwrap();
    }

    #[test]
    fn test_sections_listed_in_written_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);

        let archive = Archive::open(&path).unwrap();
        let listing = archive.sections();
        let names: Vec<_> = listing.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec![PRIMARY, CATALOGUE, IMAGELIST, "FLUX"]);
        assert_eq!(listing[3].kind, SectionKind::Cube);
        assert_eq!((listing[3].rows, listing[3].cols), (2, 2));
        archive.check_alignment().unwrap();
    }

    #[test]
    fn test_lookup_ignores_case() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);

        let mut archive = Archive::open(&path).unwrap();
        assert_eq!(archive.read_cube("flux").unwrap()[[1, 0]], 3.0);
        assert_eq!(archive.time_range("TMID").unwrap(), Some((1.0, 3.0)));
    }

    #[test]
    fn test_kind_specific_readers_reject_other_kinds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);

        let mut archive = Archive::open(&path).unwrap();
        assert!(matches!(
            archive.read_cube(CATALOGUE),
            Err(StitchError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            archive.read_cube("FLUXERR"),
            Err(StitchError::UnknownSection(name)) if name == "FLUXERR"
        ));
    }

    #[test]
    fn test_read_only_archive_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);

        let mut archive = Archive::open(&path).unwrap();
        let result = archive.write_section("FLUX", Section::Cube(array![[0.0, 0.0], [0.0, 0.0]]));
        assert!(matches!(result, Err(StitchError::ReadOnly(_))));
    }

    #[test]
    fn test_writes_are_invisible_until_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);
        let before = fs::read(&path).unwrap();

        let mut archive = Archive::open_rw(&path).unwrap();
        archive
            .write_section("FLUX", Section::Cube(array![[9.0, 9.0], [9.0, 9.0]]))
            .unwrap();
        // Staged data is visible through the handle...
        assert_eq!(archive.read_cube("FLUX").unwrap()[[0, 0]], 9.0);
        // ...but not on disk.
        assert_eq!(fs::read(&path).unwrap(), before);

        archive.close().unwrap();
        let mut reopened = Archive::open(&path).unwrap();
        assert_eq!(reopened.read_cube("FLUX").unwrap()[[0, 0]], 9.0);
        // Untouched sections are carried over verbatim.
        assert_eq!(reopened.read_catalogue().unwrap(), catalogue(2));
    }

    #[test]
    fn test_dropped_archive_discards_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never.lcsa");
        {
            let mut archive = Archive::create(&path);
            archive
                .write_section(CATALOGUE, Section::Catalogue(catalogue(1)))
                .unwrap();
        }
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_in_place_replacement_keeps_axes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);

        let mut archive = Archive::open_rw(&path).unwrap();
        let grown = archive.write_section("FLUX", Section::Cube(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        assert!(matches!(grown, Err(StitchError::ShapeMismatch { .. })));

        let retyped = archive.write_section("FLUX", Section::Catalogue(catalogue(2)));
        assert!(matches!(retyped, Err(StitchError::ShapeMismatch { .. })));

        // Extra catalogue columns are fine, the target count is not.
        assert!(archive
            .write_section(CATALOGUE, Section::Catalogue(catalogue(3)))
            .is_err());
    }

    #[test]
    fn test_unmodified_archive_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lcsa");
        write_small_archive(&path);
        let before = fs::read(&path).unwrap();

        let mut archive = Archive::open_rw(&path).unwrap();
        archive.read_frame_metadata().unwrap();
        archive.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_garbage_file_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.lcsa");
        fs::write(&path, b"SIMPLE  =                    T").unwrap();
        assert!(matches!(Archive::open(&path), Err(StitchError::Format(_))));
    }

    #[test]
    fn test_missing_file_reports_its_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.lcsa");
        match Archive::open(&path) {
            Err(StitchError::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected an I/O error, got {:?}", other.map(|_| ())),
        }
    }
}
