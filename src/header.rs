//! Header module for the sdfstore library
//!
//! The header (the `index` file of a store directory) holds dataset-wide metadata,
//! statistics and the checksums of every value stream. It is written once when a
//! writer closes and loaded once whenever a reader opens the store.
//!
//! The on-disk layout is described by a schema evolution table: an ordered list of
//! field groups, each tagged with the first format version that contains it. Loading
//! applies every group whose version is not newer than the stored version and leaves
//! the remaining fields at their defaults. Writing always emits the current version.
//!
//! Every field is folded into a running hash as it is read or written; the final
//! 8 bytes of the file hold that hash and are verified on load.

use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{BigEndian, ByteOrder};
use xxhash_rust::xxh64::Xxh64;

use crate::{
    alphabet::{Encoding, ReadArm, ReadType, SequenceType},
    error::{CorruptError, HeaderError, Result},
};

/// Current format version written by this library
pub const VERSION: u64 = 13;

/// Oldest format version this library can read
pub const MIN_VERSION: u64 = 1;

/// Version that introduced the sequence stream checksum
pub const SINGLE_CHECKSUM_VERSION: u64 = 2;
/// Version that introduced quality data
pub const QUALITY_VERSION: u64 = 3;
/// Version that introduced N histograms, quality averages, arm and read type
pub const HISTOGRAM_VERSION: u64 = 4;
/// Version that introduced the command line and comment
pub const PARAMETERS_VERSION: u64 = 6;
/// Version that introduced separate quality and name checksums
pub const SEPARATE_CHECKSUM_VERSION: u64 = 7;
/// Version that introduced encodings, the working directory and creation time
pub const ENCODINGS_VERSION: u64 = 8;
/// Version whose data-file indices store (count, size) pairs
pub const DATASIZE_INDEX_VERSION: u64 = 9;
/// Version that introduced the full 128-bit store id
pub const UUID_VERSION: u64 = 10;
/// Version whose pointer entries carry per-record checksums
pub const PER_SEQUENCE_CHECKSUM_VERSION: u64 = 11;
/// Version that introduced name suffixes
pub const FULL_NAMES_VERSION: u64 = 12;
/// Version that introduced the SAM read group
pub const READ_GROUP_VERSION: u64 = 13;

/// Number of buckets in each header histogram
pub const MAX_HISTOGRAM: usize = 1000;

/// Name of the header file inside a store directory
pub const INDEX_FILENAME: &str = "index";

/// Globally unique 128-bit identifier of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SdfId(u128);
impl SdfId {
    #[must_use]
    pub fn new(id: u128) -> Self {
        Self(id)
    }

    /// Draws a fresh random identifier
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random::<u128>())
    }

    #[must_use]
    pub fn from_parts(high: u64, low: u64) -> Self {
        Self((u128::from(high) << 64) | u128::from(low))
    }

    #[must_use]
    pub fn high(self) -> u64 {
        (self.0 >> 64) as u64
    }

    #[must_use]
    pub fn low(self) -> u64 {
        self.0 as u64
    }

    #[must_use]
    pub fn value(self) -> u128 {
        self.0
    }
}
impl fmt::Display for SdfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff
        )
    }
}

/// Dataset-wide metadata and statistics of a store
///
/// Built incrementally by the writer state and finalized at close; immutable once
/// loaded by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    /// Format version the header was read with (or [`VERSION`] when created)
    pub version: u64,
    /// Maximum number of values per data file
    pub max_file_size: u64,
    pub sequence_type: SequenceType,
    pub max_length: u64,
    pub min_length: u64,
    pub total_length: u64,
    pub number_sequences: u64,
    /// Occurrences of each residue code
    pub residue_counts: Vec<u64>,
    pub has_quality: bool,
    pub n_block_count: u64,
    pub longest_n_block: u64,
    /// Number of records by count of unknown residues
    pub n_histogram: Vec<u64>,
    /// Number of unknown residues by position
    pub pos_histogram: Vec<u64>,
    /// Mean error probability over all quality values
    pub global_quality_average: f64,
    /// Mean error probability by position
    pub position_quality_average: Vec<f64>,
    pub arm: ReadArm,
    pub read_type: ReadType,
    pub sdf_id: SdfId,
    pub command_line: String,
    pub comment: String,
    pub working_directory: String,
    /// Seconds since the unix epoch
    pub creation_time: u64,
    pub name_encoding: Encoding,
    pub sequence_encoding: Encoding,
    pub quality_encoding: Encoding,
    pub has_names: bool,
    pub has_suffixes: bool,
    pub read_group: String,
    pub data_checksum: u64,
    pub quality_checksum: u64,
    pub name_checksum: u64,
    pub suffix_checksum: u64,
}
impl IndexHeader {
    /// Creates an empty header of the current version
    #[must_use]
    pub fn new(sequence_type: SequenceType) -> Self {
        Self::empty(VERSION, sequence_type)
    }

    /// Defaults used for every field a stored version predates
    fn empty(version: u64, sequence_type: SequenceType) -> Self {
        Self {
            version,
            max_file_size: 0,
            sequence_type,
            max_length: 0,
            min_length: 0,
            total_length: 0,
            number_sequences: 0,
            residue_counts: vec![0; sequence_type.range() as usize],
            has_quality: false,
            n_block_count: 0,
            longest_n_block: 0,
            n_histogram: vec![0; MAX_HISTOGRAM],
            pos_histogram: vec![0; MAX_HISTOGRAM],
            global_quality_average: 0.0,
            position_quality_average: vec![0.0; MAX_HISTOGRAM],
            arm: ReadArm::Unknown,
            read_type: ReadType::Unknown,
            sdf_id: SdfId::default(),
            command_line: String::new(),
            comment: String::new(),
            working_directory: String::new(),
            creation_time: 0,
            name_encoding: Encoding::Raw,
            sequence_encoding: Encoding::Raw,
            quality_encoding: Encoding::Raw,
            has_names: true,
            has_suffixes: false,
            read_group: String::new(),
            data_checksum: 0,
            quality_checksum: 0,
            name_checksum: 0,
            suffix_checksum: 0,
        }
    }

    /// Whether data-file indices hold (count, size) pairs rather than counts only
    #[must_use]
    pub fn has_data_sizes(&self) -> bool {
        self.version >= DATASIZE_INDEX_VERSION
    }

    /// Whether pointer entries carry per-record checksum bytes
    #[must_use]
    pub fn has_record_checksums(&self) -> bool {
        self.version >= PER_SEQUENCE_CHECKSUM_VERSION
    }

    /// Whether the quality and name stream checksums are recorded
    #[must_use]
    pub fn has_stream_checksums(&self) -> bool {
        self.version >= SEPARATE_CHECKSUM_VERSION
    }

    /// Number of checksum bytes preceding each sequence pointer
    #[must_use]
    pub fn checksum_width(&self) -> usize {
        match (self.has_record_checksums(), self.has_quality) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        }
    }

    /// Loads the header of the store in `dir`
    ///
    /// # Errors
    ///
    /// * [`HeaderError::NotAStore`] if the directory has no header
    /// * [`HeaderError::UnsupportedVersion`] if the store is newer than [`VERSION`]
    /// * [`CorruptError`] if the header is truncated, holds illegal values or fails its hash
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(INDEX_FILENAME);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HeaderError::NotAStore(dir.to_path_buf()).into())
            }
            Err(e) => return Err(CorruptError::io(&path, None, e).into()),
        };
        Self::from_reader(&mut BufReader::new(file), &path)
    }

    /// Parses a header from any reader
    ///
    /// `path` is only used to give errors context.
    pub fn from_reader<R: Read>(reader: &mut R, path: &Path) -> Result<Self> {
        let mut fields = FieldReader::new(reader, path);
        let version = fields.count("version")?;
        if version > VERSION {
            return Err(HeaderError::UnsupportedVersion {
                found: version,
                supported: VERSION,
            }
            .into());
        }
        if version < MIN_VERSION {
            return Err(fields.invalid("version", version as i64).into());
        }

        let mut header = Self::empty(version, SequenceType::Dna);
        for group in SCHEMA.iter().filter(|g| version >= g.min_version) {
            (group.read)(&mut fields, &mut header)?;
        }

        let computed = fields.hash.digest();
        let mut buf = [0u8; 8];
        fields
            .inner
            .read_exact(&mut buf)
            .map_err(|e| CorruptError::io(path, None, e))?;
        let stored = BigEndian::read_u64(&buf);
        if stored != computed {
            return Err(CorruptError::HashMismatch {
                path: path.to_path_buf(),
                expected: stored,
                found: computed,
            }
            .into());
        }
        Ok(header)
    }

    /// Writes the header as `dir/index` in the current format version
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let path = dir.as_ref().join(INDEX_FILENAME);
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_bytes(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Serializes the header in the current format version
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.write_versioned(writer, VERSION)
    }

    /// Serializes only the field groups present in `version`
    pub(crate) fn write_versioned<W: Write>(&self, writer: &mut W, version: u64) -> Result<()> {
        let mut fields = FieldWriter::new(writer);
        fields.u64(version)?;
        for group in SCHEMA.iter().filter(|g| version >= g.min_version) {
            (group.write)(&mut fields, self)?;
        }
        let digest = fields.hash.digest();
        fields.inner.write_all(&digest.to_be_bytes())?;
        Ok(())
    }
}

/// One version-gated group of header fields
struct FieldGroup {
    min_version: u64,
    read: fn(&mut FieldReader<'_>, &mut IndexHeader) -> Result<()>,
    write: fn(&mut FieldWriter<'_>, &IndexHeader) -> Result<()>,
}

/// Header layout in file order
const SCHEMA: [FieldGroup; 11] = [
    FieldGroup {
        min_version: MIN_VERSION,
        read: read_core,
        write: write_core,
    },
    FieldGroup {
        min_version: QUALITY_VERSION,
        read: |r, h| {
            h.has_quality = r.flag()?;
            Ok(())
        },
        write: |w, h| w.flag(h.has_quality),
    },
    FieldGroup {
        min_version: HISTOGRAM_VERSION,
        read: read_histograms,
        write: write_histograms,
    },
    FieldGroup {
        min_version: PARAMETERS_VERSION,
        read: |r, h| {
            h.command_line = r.text("command line")?;
            h.comment = r.text("comment")?;
            Ok(())
        },
        write: |w, h| {
            w.text(&h.command_line)?;
            w.text(&h.comment)
        },
    },
    FieldGroup {
        min_version: ENCODINGS_VERSION,
        read: read_encodings,
        write: write_encodings,
    },
    FieldGroup {
        min_version: UUID_VERSION,
        read: |r, h| {
            let high = r.i64()? as u64;
            h.sdf_id = SdfId::from_parts(high, h.sdf_id.low());
            Ok(())
        },
        write: |w, h| w.u64(h.sdf_id.high()),
    },
    FieldGroup {
        min_version: FULL_NAMES_VERSION,
        read: |r, h| {
            h.has_suffixes = r.flag()?;
            Ok(())
        },
        write: |w, h| w.flag(h.has_suffixes),
    },
    FieldGroup {
        min_version: READ_GROUP_VERSION,
        read: |r, h| {
            h.read_group = r.text("read group")?;
            Ok(())
        },
        write: |w, h| w.text(&h.read_group),
    },
    FieldGroup {
        min_version: SINGLE_CHECKSUM_VERSION,
        read: |r, h| {
            h.data_checksum = r.i64()? as u64;
            Ok(())
        },
        write: |w, h| w.u64(h.data_checksum),
    },
    FieldGroup {
        min_version: SEPARATE_CHECKSUM_VERSION,
        read: |r, h| {
            h.quality_checksum = r.i64()? as u64;
            h.name_checksum = r.i64()? as u64;
            Ok(())
        },
        write: |w, h| {
            w.u64(h.quality_checksum)?;
            w.u64(h.name_checksum)
        },
    },
    FieldGroup {
        min_version: FULL_NAMES_VERSION,
        read: |r, h| {
            h.suffix_checksum = r.i64()? as u64;
            Ok(())
        },
        write: |w, h| w.u64(h.suffix_checksum),
    },
];

fn read_core(r: &mut FieldReader<'_>, h: &mut IndexHeader) -> Result<()> {
    h.max_file_size = r.count("max file size")?;
    let ordinal = r.i32()?;
    h.sequence_type = SequenceType::from_ordinal(ordinal)
        .ok_or_else(|| r.invalid("sequence type", i64::from(ordinal)))?;
    h.max_length = r.count("max length")?;
    h.min_length = r.count("min length")?;
    h.total_length = r.count("total length")?;
    h.number_sequences = r.count("number of sequences")?;

    let n_residues = r.i32()?;
    if n_residues < 0 {
        return Err(r.negative("residue count length", i64::from(n_residues)).into());
    }
    h.residue_counts = r.counts(n_residues as usize, "residue count")?;
    let sum = h
        .residue_counts
        .iter()
        .try_fold(0u64, |sum, &count| sum.checked_add(count))
        .ok_or_else(|| r.invalid("residue count total", i64::MAX))?;
    if sum != h.total_length {
        return Err(r.invalid("residue count total", sum as i64).into());
    }
    Ok(())
}

fn write_core(w: &mut FieldWriter<'_>, h: &IndexHeader) -> Result<()> {
    w.u64(h.max_file_size)?;
    w.i32(h.sequence_type.ordinal())?;
    w.u64(h.max_length)?;
    w.u64(h.min_length)?;
    w.u64(h.total_length)?;
    w.u64(h.number_sequences)?;
    w.i32(h.residue_counts.len() as i32)?;
    for &count in &h.residue_counts {
        w.u64(count)?;
    }
    Ok(())
}

fn read_histograms(r: &mut FieldReader<'_>, h: &mut IndexHeader) -> Result<()> {
    h.n_block_count = r.count("N block count")?;
    h.longest_n_block = r.count("longest N block")?;
    h.n_histogram = r.counts(MAX_HISTOGRAM, "N histogram")?;
    h.pos_histogram = r.counts(MAX_HISTOGRAM, "N position histogram")?;
    h.global_quality_average = r.f64()?;
    h.position_quality_average = (0..MAX_HISTOGRAM)
        .map(|_| r.f64())
        .collect::<Result<Vec<_>>>()?;

    let arm = r.i32()?;
    h.arm = ReadArm::from_ordinal(arm).ok_or_else(|| r.invalid("arm", i64::from(arm)))?;
    let read_type = r.i32()?;
    h.read_type = ReadType::from_ordinal(read_type)
        .ok_or_else(|| r.invalid("read type", i64::from(read_type)))?;
    let low = r.i64()? as u64;
    h.sdf_id = SdfId::from_parts(h.sdf_id.high(), low);
    Ok(())
}

fn write_histograms(w: &mut FieldWriter<'_>, h: &IndexHeader) -> Result<()> {
    w.u64(h.n_block_count)?;
    w.u64(h.longest_n_block)?;
    for i in 0..MAX_HISTOGRAM {
        w.u64(h.n_histogram.get(i).copied().unwrap_or(0))?;
    }
    for i in 0..MAX_HISTOGRAM {
        w.u64(h.pos_histogram.get(i).copied().unwrap_or(0))?;
    }
    w.f64(h.global_quality_average)?;
    for i in 0..MAX_HISTOGRAM {
        w.f64(h.position_quality_average.get(i).copied().unwrap_or(0.0))?;
    }
    w.i32(h.arm.ordinal())?;
    w.i32(h.read_type.ordinal())?;
    w.u64(h.sdf_id.low())
}

fn read_encodings(r: &mut FieldReader<'_>, h: &mut IndexHeader) -> Result<()> {
    h.working_directory = r.text("working directory")?;
    h.creation_time = r.count("creation time")?;
    h.name_encoding = r.encoding("name encoding")?;
    h.sequence_encoding = r.encoding("sequence encoding")?;
    h.quality_encoding = r.encoding("quality encoding")?;
    h.has_names = r.flag()?;
    Ok(())
}

fn write_encodings(w: &mut FieldWriter<'_>, h: &IndexHeader) -> Result<()> {
    w.text(&h.working_directory)?;
    w.u64(h.creation_time)?;
    w.byte(h.name_encoding.to_byte())?;
    w.byte(h.sequence_encoding.to_byte())?;
    w.byte(h.quality_encoding.to_byte())?;
    w.flag(h.has_names)
}

/// Reads big-endian fields while hashing every byte consumed
struct FieldReader<'a> {
    inner: &'a mut dyn Read,
    hash: Xxh64,
    path: &'a Path,
}
impl<'a> FieldReader<'a> {
    fn new(inner: &'a mut dyn Read, path: &'a Path) -> Self {
        Self {
            inner,
            hash: Xxh64::new(0),
            path,
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| CorruptError::io(self.path, None, e))?;
        self.hash.update(buf);
        Ok(())
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(BigEndian::read_i64(&buf))
    }

    fn i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(BigEndian::read_i32(&buf))
    }

    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    fn flag(&mut self) -> Result<bool> {
        Ok(self.byte()? != 0)
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.i64()? as u64))
    }

    /// A non-negative 64-bit quantity
    fn count(&mut self, field: &'static str) -> Result<u64> {
        let value = self.i64()?;
        u64::try_from(value).map_err(|_| self.negative(field, value).into())
    }

    fn counts(&mut self, n: usize, field: &'static str) -> Result<Vec<u64>> {
        (0..n).map(|_| self.count(field)).collect()
    }

    fn encoding(&mut self, field: &'static str) -> Result<Encoding> {
        let byte = self.byte()?;
        Encoding::from_byte(byte).ok_or_else(|| self.invalid(field, i64::from(byte)).into())
    }

    fn text(&mut self, field: &'static str) -> Result<String> {
        let len = self.i32()?;
        if len < 0 {
            return Err(self.negative(field, i64::from(len)).into());
        }
        let mut buf = Vec::new();
        (&mut *self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| CorruptError::io(self.path, None, e))?;
        if buf.len() != len as usize {
            return Err(CorruptError::Truncated {
                path: self.path.to_path_buf(),
            }
            .into());
        }
        self.hash.update(&buf);
        String::from_utf8(buf).map_err(|_| self.invalid(field, i64::from(len)).into())
    }

    fn negative(&self, field: &'static str, value: i64) -> CorruptError {
        CorruptError::NegativeValue {
            path: self.path.to_path_buf(),
            field,
            value,
        }
    }

    fn invalid(&self, field: &'static str, value: i64) -> CorruptError {
        CorruptError::InvalidField {
            path: self.path.to_path_buf(),
            field,
            value,
        }
    }
}

/// Writes big-endian fields while hashing every byte produced
struct FieldWriter<'a> {
    inner: &'a mut dyn Write,
    hash: Xxh64,
}
impl<'a> FieldWriter<'a> {
    fn new(inner: &'a mut dyn Write) -> Self {
        Self {
            inner,
            hash: Xxh64::new(0),
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.hash.update(bytes);
        self.inner.write_all(bytes)?;
        Ok(())
    }

    fn u64(&mut self, value: u64) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    fn i32(&mut self, value: i32) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    fn byte(&mut self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    fn flag(&mut self, value: bool) -> Result<()> {
        self.byte(u8::from(value))
    }

    fn f64(&mut self, value: f64) -> Result<()> {
        self.u64(value.to_bits())
    }

    fn text(&mut self, value: &str) -> Result<()> {
        self.i32(value.len() as i32)?;
        self.put(value.as_bytes())
    }
}
