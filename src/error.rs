use std::path::PathBuf;

/// Custom Result type for store operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the sdfstore library, encompassing all possible error cases
/// that can occur while writing, opening or reading a sequence store.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to header loading and format versions
    HeaderError(#[from] HeaderError),
    /// The store is damaged or inconsistent
    CorruptError(#[from] CorruptError),
    /// Errors that occur during read operations
    ReadError(#[from] ReadError),
    /// Errors that occur during write operations
    WriteError(#[from] WriteError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// UTF-8 encoding/decoding errors
    Utf8Error(#[from] std::str::Utf8Error),
    /// Generic errors that can occur in any part of the system
    AnyhowError(#[from] anyhow::Error),
}
impl Error {
    /// Returns true if this error signals a damaged store
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptError(_))
    }

    /// Returns true if this error is a sampled per-record checksum failure
    #[must_use]
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ReadError(ReadError::ChecksumMismatch { .. }))
    }

    /// Returns true if this error is a format version rejection
    #[must_use]
    pub fn is_unsupported_version(&self) -> bool {
        matches!(
            self,
            Self::HeaderError(HeaderError::UnsupportedVersion { .. })
        )
    }
}

/// Errors raised while locating or versioning a store header
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The store was written by a newer format than this library can read
    ///
    /// # Fields
    /// * `found` - The version recorded in the header
    /// * `supported` - The newest version this library understands
    #[error("Store format version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: u64, supported: u64 },

    /// The path does not contain a store index
    ///
    /// # Arguments
    /// * `PathBuf` - The directory that was opened
    #[error("The path {0:?} does not contain a valid store index")]
    NotAStore(PathBuf),
}

/// Errors describing a damaged or internally inconsistent store
///
/// Every variant names the file involved so the damage can be diagnosed.
#[derive(thiserror::Error, Debug)]
pub enum CorruptError {
    /// A low-level I/O failure while reading part of the store
    #[error("I/O failure on {path:?}{}: {source}", record_context(.record))]
    Io {
        path: PathBuf,
        record: Option<u64>,
        #[source]
        source: std::io::Error,
    },

    /// A file ended before all expected bytes were read
    #[error("File {path:?} is truncated")]
    Truncated { path: PathBuf },

    /// A file the header or index requires does not exist
    #[error("Expected file {0:?} is missing")]
    MissingFile(PathBuf),

    /// A count, length or size field held a negative value
    #[error("Negative value {value} for {field} in {path:?}")]
    NegativeValue {
        path: PathBuf,
        field: &'static str,
        value: i64,
    },

    /// A field held a value outside of its legal range
    #[error("Invalid value {value} for {field} in {path:?}")]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        value: i64,
    },

    /// The recomputed header hash differs from the stored one
    #[error("Header hash mismatch in {path:?}: stored {expected:#x}, computed {found:#x}")]
    HashMismatch {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    /// The data-file index does not agree with the header record count
    #[error("Record count mismatch in {path:?}: header has {expected}, index has {found}")]
    RecordCount {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    /// Pointer arithmetic produced a negative record length
    #[error("Negative length {length} computed for record {record} from {path:?}")]
    NegativeLength {
        path: PathBuf,
        record: u64,
        length: i64,
    },

    /// A whole-stream checksum did not match the header
    #[error("The {stream} stream of {path:?} failed its checksum: stored {expected:#x}, computed {found:#x}")]
    StreamChecksum {
        path: PathBuf,
        stream: &'static str,
        expected: u64,
        found: u64,
    },
}
impl CorruptError {
    /// Wraps an I/O error with the file (and optionally record) it occurred on
    ///
    /// Unexpected end-of-file conditions are reported as truncation.
    pub fn io(path: impl Into<PathBuf>, record: Option<u64>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated { path }
        } else if source.kind() == std::io::ErrorKind::NotFound {
            Self::MissingFile(path)
        } else {
            Self::Io {
                path,
                record,
                source,
            }
        }
    }
}

#[allow(clippy::ref_option)]
fn record_context(record: &Option<u64>) -> String {
    record.map_or_else(String::new, |r| format!(" (record {r})"))
}

/// Errors that can occur while reading records from a store
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The sampled per-record checksum failed
    ///
    /// # Fields
    /// * `record` - The region-relative record id
    /// * `stream` - Either "sequence" or "quality"
    #[error("Checksum mismatch in {stream} data of record {record}: stored {expected:#04x}, computed {found:#04x}")]
    ChecksumMismatch {
        record: u64,
        stream: &'static str,
        expected: u8,
        found: u8,
    },

    /// Attempted to access a record index that is beyond the available range
    ///
    /// # Fields
    /// * `index` - The requested record index
    /// * `limit` - The number of records available
    #[error("Requested record index ({index}) is out of record range ({limit})")]
    OutOfRange { index: u64, limit: u64 },

    /// A region could not be resolved against the store
    #[error("Invalid region [{start}, {end}) for a store of {count} records")]
    InvalidRegion { start: u64, end: u64, count: u64 },

    /// Names were requested from a store or reader without names
    #[error("Names are not available for this store")]
    NoNames,

    /// Quality was requested from a store without quality data
    #[error("Quality data is not available for this store")]
    NoQuality,

    /// The destination buffer cannot hold the requested values
    #[error("Destination buffer holds {got} values but {needed} are required")]
    BufferTooSmall { needed: usize, got: usize },
}

/// Errors that can occur while writing a store
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The requested data file size limit is outside the allowed bounds
    #[error("Size limit {0} is not within bounds of {1} and {2}")]
    InvalidSizeLimit(u64, u64, u64),

    /// A sequence name contains characters that cannot be stored
    ///
    /// # Arguments
    /// * `String` - The offending label
    #[error("Sequence name contains invalid characters: {0:?}")]
    InvalidName(String),

    /// Data was written without a preceding `start_sequence`
    #[error("No sequence has been started")]
    RecordNotStarted,

    /// A sequence was started while another was still open
    #[error("A sequence is already in progress")]
    RecordInProgress,

    /// Quality data was supplied (or omitted) inconsistently with the writer configuration
    ///
    /// # Fields
    /// * `expected` - Whether the writer stores quality
    /// * `residues` - Number of residues in the call
    /// * `quality` - Number of quality values supplied
    #[error("Quality mismatch: store quality = {expected}, {residues} residues with {quality} quality values")]
    QualityMismatch {
        expected: bool,
        residues: usize,
        quality: usize,
    },

    /// A residue code is outside of the alphabet range
    #[error("Residue code {code} is outside of the alphabet range {range}")]
    InvalidCode { code: u8, range: u8 },
}
