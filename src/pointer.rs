//! Pointer file protocol
//!
//! Every numbered data file has a pointer file with one fixed-size entry per record
//! starting in that data file, followed by a sentinel entry whose offset equals the
//! data file's size:
//!
//! ```text
//! [checksum bytes (0, 1 or 2)] [u32 BE offset]   record 0
//! [checksum bytes (0, 1 or 2)] [u32 BE offset]   record 1
//! ...
//! [zeroed checksum bytes]      [u32 BE size]     sentinel
//! ```
//!
//! The length of a record is the difference between its offset and the next entry's
//! offset. The last record of a file may continue into the following data files; its
//! length then also includes the full size of any following file in which no record
//! starts, plus the first offset of the next file in which one does.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, ByteOrder};

use crate::{
    data_index::DataFileIndex,
    error::{CorruptError, Result},
    files::numbered,
    header::IndexHeader,
    rolling::RollingFile,
};

/// Size of the offset part of a pointer entry
const OFFSET_SIZE: usize = 4;

/// Shape of the pointer entries of one stream
///
/// Selected once when a store is opened; callers never inspect versions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerHandler {
    /// Offsets only
    Legacy,
    /// Per-record checksum bytes precede every offset
    Checksummed { width: usize },
}
impl PointerHandler {
    /// Handler for the residue pointer files of a store
    #[must_use]
    pub fn for_sequences(header: &IndexHeader) -> Self {
        match header.checksum_width() {
            0 => Self::Legacy,
            width => Self::Checksummed { width },
        }
    }

    /// Handler for label and suffix pointer files
    #[must_use]
    pub fn for_names() -> Self {
        Self::Legacy
    }

    #[must_use]
    pub fn checksum_width(self) -> usize {
        match self {
            Self::Legacy => 0,
            Self::Checksummed { width } => width,
        }
    }

    #[must_use]
    pub fn entry_size(self) -> usize {
        OFFSET_SIZE + self.checksum_width()
    }

    fn parse(self, entry: &[u8]) -> (u64, [u8; 2]) {
        let width = self.checksum_width();
        let mut checksums = [0u8; 2];
        checksums[..width].copy_from_slice(&entry[..width]);
        let offset = u64::from(BigEndian::read_u32(&entry[width..width + OFFSET_SIZE]));
        (offset, checksums)
    }

    /// Appends one encoded entry to `buf`
    pub fn encode(self, checksums: [u8; 2], offset: u32, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&checksums[..self.checksum_width()]);
        buf.extend_from_slice(&offset.to_be_bytes());
    }

    /// Computes the location of record `intra` of data file `file`
    ///
    /// `record` is only used for error context. On return the pointer file of
    /// `file` is open again, even if the length computation had to visit later files.
    pub fn locate(
        self,
        pointers: &mut RollingFile,
        index: &DataFileIndex,
        file: u32,
        intra: u64,
        record: u64,
    ) -> Result<RecordLocation> {
        pointers.require(file)?;
        let entry = self.entry_size();
        let mut buf = vec![0u8; 2 * entry];
        pointers.read_at(intra * entry as u64, &mut buf)?;
        let (offset, checksums) = self.parse(&buf[..entry]);
        let (next, _) = self.parse(&buf[entry..]);

        let path = pointers.path(file);
        let mut length = checked_length(&path, record, offset, next)?;
        if intra + 1 == index.number_sequences(file) {
            check_sentinel(&path, next, index.data_size(file))?;
            length += self.carry(pointers, index, file)?;
            pointers.require(file)?;
        }
        Ok(RecordLocation {
            file,
            offset,
            length,
            checksums,
        })
    }

    /// Number of values the last record of `file` holds in later files
    ///
    /// Rolls forward through the pointer files after `file`: files in which no record
    /// starts add their whole size, the first file with records adds its first offset.
    pub fn carry(self, pointers: &mut RollingFile, index: &DataFileIndex, file: u32) -> Result<u64> {
        pointers.require(file)?;
        let mut carry = 0;
        for next in file + 1..index.number_entries() {
            pointers.roll_file()?;
            if index.number_sequences(next) == 0 {
                carry += index.data_size(next);
            } else {
                let mut buf = [0u8; OFFSET_SIZE];
                pointers.read_at(self.checksum_width() as u64, &mut buf)?;
                carry += u64::from(BigEndian::read_u32(&buf));
                break;
            }
        }
        Ok(carry)
    }

    /// Reads the entries of records `first .. first + count` of `file`, plus the entry after them
    ///
    /// The returned block holds `count + 1` offsets; the final one is either the next
    /// record's offset or the file's sentinel.
    pub fn read_block(
        self,
        pointers: &mut RollingFile,
        file: u32,
        first: u64,
        count: u64,
    ) -> Result<PointerBlock> {
        pointers.require(file)?;
        let entry = self.entry_size();
        let mut buf = vec![0u8; (count as usize + 1) * entry];
        pointers.read_at(first * entry as u64, &mut buf)?;

        let path = pointers.path(file);
        let mut offsets = Vec::with_capacity(count as usize + 1);
        let mut checksums = Vec::with_capacity(count as usize);
        for (i, chunk) in buf.chunks_exact(entry).enumerate() {
            let (offset, cs) = self.parse(chunk);
            if let Some(&previous) = offsets.last() {
                checked_length(&path, first + i as u64 - 1, previous, offset)?;
            }
            offsets.push(offset);
            if (i as u64) < count {
                checksums.push(cs);
            }
        }
        Ok(PointerBlock { offsets, checksums })
    }
}

fn checked_length(path: &Path, record: u64, offset: u64, next: u64) -> Result<u64> {
    if next < offset {
        return Err(CorruptError::NegativeLength {
            path: path.to_path_buf(),
            record,
            length: next as i64 - offset as i64,
        }
        .into());
    }
    Ok(next - offset)
}

pub(crate) fn check_sentinel(path: &Path, sentinel: u64, size: u64) -> Result<()> {
    if sentinel == size {
        Ok(())
    } else {
        Err(CorruptError::InvalidField {
            path: path.to_path_buf(),
            field: "pointer sentinel",
            value: sentinel as i64,
        }
        .into())
    }
}

/// Where a record lives and how long it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Data file in which the record starts
    pub file: u32,
    /// Value offset of the record within that file
    pub offset: u64,
    /// Number of values, possibly spanning later files
    pub length: u64,
    /// Residue and quality checksum bytes (zero when absent)
    pub checksums: [u8; 2],
}

/// Consecutive pointer entries of one file
#[derive(Debug, Clone, Default)]
pub struct PointerBlock {
    pub offsets: Vec<u64>,
    pub checksums: Vec<[u8; 2]>,
}

/// Writes the pointer file of one data file
pub struct PointerWriter {
    path: PathBuf,
    handler: PointerHandler,
    out: BufWriter<File>,
    buf: Vec<u8>,
}
impl PointerWriter {
    pub fn create(dir: &Path, prefix: &str, file: u32, handler: PointerHandler) -> Result<Self> {
        let path = numbered(dir, prefix, file);
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            handler,
            out,
            buf: Vec::with_capacity(handler.entry_size()),
        })
    }

    pub fn entry(&mut self, checksums: [u8; 2], offset: u64) -> Result<()> {
        self.buf.clear();
        self.handler.encode(checksums, offset as u32, &mut self.buf);
        self.out.write_all(&self.buf)?;
        Ok(())
    }

    /// Writes the sentinel and flushes the file
    pub fn finish(mut self, data_size: u64) -> Result<()> {
        self.entry([0, 0], data_size)?;
        self.out
            .flush()
            .map_err(|e| CorruptError::io(&self.path, None, e))?;
        Ok(())
    }
}
