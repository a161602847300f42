//! Store writer
//!
//! Records are appended sequentially by a single [`SdfWriter`]; the store becomes
//! readable once [`SdfWriter::close`] has written the header.
//!
//! ```no_run
//! # use sdfstore::{Result, SdfWriterBuilder, SequenceType};
//! # fn main() -> Result<()> {
//! let mut writer = SdfWriterBuilder::default()
//!     .sequence_type(SequenceType::Dna)
//!     .size_limit(1 << 20)
//!     .build("reads.sdf")?;
//! writer.write_record(Some("read1"), &[1, 2, 3, 4], None)?;
//! let header = writer.close()?;
//! assert_eq!(header.number_sequences, 1);
//! # Ok(())
//! # }
//! ```

mod files;
mod names;
mod state;

pub use names::NameHandler;
pub use state::WriterState;

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, warn};

use crate::{
    alphabet::{clip_quality, Encoding, ReadArm, ReadType, SequenceType},
    codec::Packing,
    error::{Result, WriteError},
    files::{Family, QUALITY_PREFIX},
    header::{IndexHeader, SdfId},
    pointer::PointerHandler,
    source::SequenceSource,
};
use files::RecordFiles;
use names::NameWriter;

/// Smallest allowed data file size limit, in values
pub const MIN_SIZE_LIMIT: u64 = 1;
/// Largest allowed data file size limit, in values
pub const MAX_SIZE_LIMIT: u64 = i32::MAX as u64;
/// Number of warnings of one kind reported before the rest are suppressed
pub const MAX_WARNINGS: u64 = 10;

/// Counts warnings of one kind, allowing only the first [`MAX_WARNINGS`] to be shown
#[derive(Debug, Clone, Default)]
pub(crate) struct WarningLimit {
    count: u64,
}
impl WarningLimit {
    /// Registers one occurrence and returns whether it should be reported
    pub fn allow(&mut self, what: &str) -> bool {
        self.count += 1;
        if self.count == MAX_WARNINGS + 1 {
            warn!("Subsequent warnings about {what} will not be shown");
        }
        self.count <= MAX_WARNINGS
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Builder for creating configured [`SdfWriter`] instances
///
/// Every setting is optional. By default a packed DNA store with names and without
/// quality data is written, with the largest allowed data files and a random id.
#[derive(Debug, Default, Clone)]
pub struct SdfWriterBuilder {
    size_limit: Option<u64>,
    sequence_type: Option<SequenceType>,
    quality: Option<bool>,
    names: Option<bool>,
    encoding: Option<Encoding>,
    arm: Option<ReadArm>,
    read_type: Option<ReadType>,
    command_line: Option<String>,
    comment: Option<String>,
    read_group: Option<String>,
    sdf_id: Option<SdfId>,
}
impl SdfWriterBuilder {
    /// Maximum number of values per data file
    #[must_use]
    pub fn size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = Some(size_limit);
        self
    }

    #[must_use]
    pub fn sequence_type(mut self, sequence_type: SequenceType) -> Self {
        self.sequence_type = Some(sequence_type);
        self
    }

    /// Whether per-residue quality values are stored
    #[must_use]
    pub fn quality(mut self, quality: bool) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Whether record names are stored
    #[must_use]
    pub fn names(mut self, names: bool) -> Self {
        self.names = Some(names);
        self
    }

    /// Encoding of residue and quality files
    #[must_use]
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    #[must_use]
    pub fn arm(mut self, arm: ReadArm) -> Self {
        self.arm = Some(arm);
        self
    }

    #[must_use]
    pub fn read_type(mut self, read_type: ReadType) -> Self {
        self.read_type = Some(read_type);
        self
    }

    #[must_use]
    pub fn command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = Some(command_line.into());
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// SAM read group recorded in the header
    #[must_use]
    pub fn read_group(mut self, read_group: impl Into<String>) -> Self {
        self.read_group = Some(read_group.into());
        self
    }

    #[must_use]
    pub fn sdf_id(mut self, sdf_id: SdfId) -> Self {
        self.sdf_id = Some(sdf_id);
        self
    }

    /// Creates the store directory (if needed) and a writer for it
    ///
    /// # Errors
    ///
    /// [`WriteError::InvalidSizeLimit`] if the size limit is outside
    /// `MIN_SIZE_LIMIT..=MAX_SIZE_LIMIT`, or an I/O error if the directory cannot be created.
    pub fn build<P: AsRef<Path>>(self, dir: P) -> Result<SdfWriter> {
        let limit = self.size_limit.unwrap_or(MAX_SIZE_LIMIT);
        if !(MIN_SIZE_LIMIT..=MAX_SIZE_LIMIT).contains(&limit) {
            return Err(WriteError::InvalidSizeLimit(limit, MIN_SIZE_LIMIT, MAX_SIZE_LIMIT).into());
        }
        let sequence_type = self.sequence_type.unwrap_or_default();
        let encoding = self.encoding.unwrap_or_default();

        let mut header = IndexHeader::new(sequence_type);
        header.max_file_size = limit;
        header.has_quality = self.quality.unwrap_or(false);
        header.has_names = self.names.unwrap_or(true);
        header.sequence_encoding = encoding;
        header.quality_encoding = encoding;
        header.name_encoding = Encoding::Raw;
        header.arm = self.arm.unwrap_or_default();
        header.read_type = self.read_type.unwrap_or_default();
        header.sdf_id = self.sdf_id.unwrap_or_else(SdfId::random);
        header.command_line = self.command_line.unwrap_or_default();
        header.comment = self.comment.unwrap_or_default();
        header.read_group = self.read_group.unwrap_or_default();
        header.working_directory = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        header.creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        SdfWriter::new(dir.as_ref(), header)
    }
}

/// Sequential writer of a store directory
pub struct SdfWriter {
    dir: PathBuf,
    /// Configuration fields, completed with the statistics on close
    header: IndexHeader,
    state: WriterState,
    sequences: RecordFiles,
    names: Option<NameWriter>,
    name_handler: NameHandler,
    in_record: bool,
    clipped: Vec<u8>,
    no_data: WarningLimit,
}
impl SdfWriter {
    fn new(dir: &Path, header: IndexHeader) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut streams = vec![(Family::Sequence.data_prefix(), Packing::sequences(&header))];
        if header.has_quality {
            streams.push((QUALITY_PREFIX, Packing::quality(&header)));
        }
        let sequences = RecordFiles::new(
            dir,
            Family::Sequence,
            header.max_file_size,
            PointerHandler::for_sequences(&header),
            streams,
        );
        let names = header
            .has_names
            .then(|| NameWriter::new(dir, header.max_file_size));
        debug!(
            "Writing {} store {} to {:?}",
            header.sequence_type, header.sdf_id, dir
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            state: WriterState::new(header.sequence_type, header.has_quality),
            header,
            sequences,
            names,
            name_handler: NameHandler::default(),
            in_record: false,
            clipped: Vec::new(),
            no_data: WarningLimit::default(),
        })
    }

    /// Directory the store is written to
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn sequence_type(&self) -> SequenceType {
        self.header.sequence_type
    }

    #[must_use]
    pub fn has_quality(&self) -> bool {
        self.header.has_quality
    }

    /// Number of completed records
    #[must_use]
    pub fn number_sequences(&self) -> u64 {
        self.state.number_sequences()
    }

    /// Starts a new record
    ///
    /// The name is ignored if the store has no names; a missing name is replaced by a
    /// generated one.
    pub fn start_sequence(&mut self, name: Option<&str>) -> Result<()> {
        if self.in_record {
            return Err(WriteError::RecordInProgress.into());
        }
        if let Some(names) = self.names.as_mut() {
            let label = self.name_handler.handle(name.unwrap_or_default())?;
            names.add(&label)?;
        }
        self.sequences.start_record()?;
        self.state.start_record();
        self.in_record = true;
        Ok(())
    }

    /// Checks codes and quality values against the store settings
    fn check_values(&self, codes: &[u8], quality: Option<&[u8]>) -> Result<()> {
        let range = self.header.sequence_type.range();
        if let Some(&code) = codes.iter().find(|&&c| c >= range) {
            return Err(WriteError::InvalidCode { code, range }.into());
        }
        match (self.header.has_quality, quality) {
            (true, Some(quality)) if quality.len() == codes.len() => Ok(()),
            (false, None) => Ok(()),
            (expected, quality) => Err(WriteError::QualityMismatch {
                expected,
                residues: codes.len(),
                quality: quality.map_or(0, <[u8]>::len),
            }
            .into()),
        }
    }

    /// Appends residue codes (and their quality values) to the record in progress
    ///
    /// Quality values at or above the maximum are clipped. Rejected values leave the
    /// record in progress unchanged.
    ///
    /// # Errors
    ///
    /// * [`WriteError::RecordNotStarted`] outside of a record
    /// * [`WriteError::InvalidCode`] if a code is outside of the alphabet
    /// * [`WriteError::QualityMismatch`] if quality presence or length does not match
    pub fn write(&mut self, codes: &[u8], quality: Option<&[u8]>) -> Result<()> {
        if !self.in_record {
            return Err(WriteError::RecordNotStarted.into());
        }
        self.check_values(codes, quality)?;
        self.state.update_residues(codes);
        match quality {
            Some(quality) => {
                self.clipped.clear();
                self.clipped.extend_from_slice(quality);
                clip_quality(&mut self.clipped);
                self.state.update_quality(&self.clipped);
                self.sequences.write(&[codes, self.clipped.as_slice()])
            }
            None => self.sequences.write(&[codes]),
        }
    }

    /// Ends the record in progress
    ///
    /// Returns `false` (after a warning) if the record has no residues; it is still stored.
    pub fn end_sequence(&mut self) -> Result<bool> {
        if !self.in_record {
            return Err(WriteError::RecordNotStarted.into());
        }
        let (length, checksums) = self.state.end_record();
        self.sequences.end_record(checksums)?;
        self.in_record = false;
        if length == 0 && self.no_data.allow("sequences with no data") {
            warn!(
                "Sequence {} has no data",
                self.state.number_sequences() - 1
            );
        }
        Ok(length > 0)
    }

    /// Writes one complete record
    ///
    /// A record with invalid codes or quality values is rejected before anything is
    /// written, leaving the writer ready for the next record.
    pub fn write_record(
        &mut self,
        name: Option<&str>,
        codes: &[u8],
        quality: Option<&[u8]>,
    ) -> Result<bool> {
        if self.in_record {
            return Err(WriteError::RecordInProgress.into());
        }
        self.check_values(codes, quality)?;
        self.start_sequence(name)?;
        self.write(codes, quality)?;
        self.end_sequence()
    }

    /// Writes every remaining record of `source`, returning how many were written
    ///
    /// Quality values of the source are dropped if the store has no quality.
    pub fn write_source<S: SequenceSource>(&mut self, mut source: S) -> Result<u64> {
        let mut count = 0;
        while source.next_record()? {
            let quality = if self.header.has_quality {
                source.quality_bytes()
            } else {
                None
            };
            self.write_record(source.name(), source.sequence_bytes(), quality)?;
            count += 1;
        }
        Ok(count)
    }

    /// Flushes every file and writes the header
    ///
    /// Returns the header that was written.
    pub fn close(self) -> Result<IndexHeader> {
        if self.in_record {
            return Err(WriteError::RecordInProgress.into());
        }
        let index = self.sequences.close()?;
        let mut header = self.header;
        self.state.finish(&mut header);
        if let Some(names) = self.names {
            let summary = names.close(&self.dir)?;
            header.name_checksum = summary.label_checksum;
            header.suffix_checksum = summary.suffix_checksum;
            header.has_suffixes = summary.has_suffixes;
        }
        let (no_name, too_long) = self.name_handler.warnings();
        for (count, what) in [
            (no_name, "sequences with no name"),
            (too_long, "names too long and truncated"),
            (self.no_data.count(), "sequences with no data"),
        ] {
            if count > 0 {
                warn!("There were {count} {what}");
            }
        }
        header.save(&self.dir)?;
        debug!(
            "Closed store {:?}: {} sequences, {} residues in {} data files",
            self.dir,
            header.number_sequences,
            header.total_length,
            index.number_entries()
        );
        Ok(header)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{source::VecSource, SequenceStore};
    use anyhow::Result;

    #[test]
    fn test_size_limit_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let err = SdfWriterBuilder::default()
            .size_limit(0)
            .build(dir.path())
            .err()
            .expect("zero limit");
        assert!(matches!(
            err,
            crate::Error::WriteError(WriteError::InvalidSizeLimit(0, MIN_SIZE_LIMIT, MAX_SIZE_LIMIT))
        ));
        assert!(SdfWriterBuilder::default()
            .size_limit(MAX_SIZE_LIMIT + 1)
            .build(dir.path())
            .is_err());
    }

    #[test]
    fn test_write_and_close() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default()
            .size_limit(10)
            .encoding(Encoding::Raw)
            .comment("three records")
            .build(dir.path())?;
        assert!(writer.write_record(Some("first seq"), &[1, 2, 3, 4, 0], None)?);
        assert!(!writer.write_record(Some("second"), &[], None)?);
        assert!(writer.write_record(None, &[4; 10], None)?);
        let header = writer.close()?;

        assert_eq!(header.number_sequences, 3);
        assert_eq!(header.total_length, 15);
        assert!(header.has_suffixes);
        assert_eq!(header.comment, "three records");
        assert!(dir.path().join("seq0").exists());
        assert!(dir.path().join("seq1").exists());
        assert!(!dir.path().join("seq2").exists());
        assert!(dir.path().join("suffix0").exists());
        assert_eq!(IndexHeader::load(dir.path())?, header);
        Ok(())
    }

    #[test]
    fn test_quality_validation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default()
            .quality(true)
            .build(dir.path())?;
        writer.start_sequence(Some("r"))?;
        assert!(writer.write(&[1, 2], None).is_err());
        assert!(writer.write(&[1, 2], Some(&[1][..])).is_err());
        assert!(writer.write(&[1, 9], Some(&[1, 2][..])).is_err());
        writer.write(&[1, 2], Some(&[20, 90][..]))?;
        writer.end_sequence()?;
        let header = writer.close()?;
        assert!(header.has_quality);
        assert_eq!(header.checksum_width(), 2);
        Ok(())
    }

    #[test]
    fn test_rejected_record_leaves_writer_usable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default()
            .quality(true)
            .build(dir.path())?;
        writer.write_record(Some("a"), &[1, 2], Some(&[30, 30][..]))?;
        assert!(writer.write_record(Some("b"), &[1, 9], Some(&[30, 30][..])).is_err());
        assert!(writer.write_record(Some("c"), &[1, 2], Some(&[30][..])).is_err());
        assert!(writer.write_record(Some("d"), &[3], None).is_err());
        writer.write_record(Some("e"), &[3, 4, 1], Some(&[10, 20, 30][..]))?;
        let header = writer.close()?;
        assert_eq!(header.number_sequences, 2);
        assert_eq!(header.total_length, 5);

        let mut reader = crate::DefaultReader::open(dir.path())?;
        assert_eq!(reader.name(1)?, "e");
        assert_eq!(reader.read_vec(1)?, vec![3, 4, 1]);
        assert_eq!(reader.read_quality_vec(1)?, vec![10, 20, 30]);
        Ok(())
    }

    #[test]
    fn test_record_protocol() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default().names(false).build(dir.path())?;
        assert!(writer.write(&[1], None).is_err());
        assert!(writer.end_sequence().is_err());
        writer.start_sequence(None)?;
        assert!(writer.start_sequence(None).is_err());
        writer.end_sequence()?;
        writer.close()?;
        assert!(!dir.path().join("labeldataindex").exists());
        Ok(())
    }

    #[test]
    fn test_write_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = VecSource::new(SequenceType::Protein, true);
        source.push(Some("p1"), b"MKV*", Some(&[10, 10, 10, 10][..]));
        source.push(Some("p2"), b"WW", Some(&[5, 5][..]));
        let mut writer = SdfWriterBuilder::default()
            .sequence_type(SequenceType::Protein)
            .build(dir.path())?;
        assert_eq!(writer.write_source(&mut source)?, 2);
        let header = writer.close()?;
        assert_eq!(header.number_sequences, 2);
        assert!(!header.has_quality);
        assert_eq!(header.sequence_type, SequenceType::Protein);
        Ok(())
    }
}
