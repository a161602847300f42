//! Data-file index
//!
//! Each family of rolling files has a small table with one entry per numbered data
//! file: the number of records that *start* in the file and the number of values the
//! file holds. Cumulative record counts translate a global record id into a
//! `(file, intra-file id)` pair.
//!
//! Two on-disk shapes exist:
//! - Current: big-endian `(count: i64, size: i64)` pairs
//! - Legacy: big-endian `count: i64` only; sizes come from the raw data file lengths

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use byteorder::{BigEndian, ByteOrder};

use crate::{
    error::{CorruptError, Result},
    files::{numbered, Family},
    header::IndexHeader,
};

/// Record count and size of one numbered data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataFileEntry {
    /// Records whose first value lies in this file
    pub records: u64,
    /// Values stored in this file
    pub size: u64,
}

/// Ordered table of [`DataFileEntry`] values for one file family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFileIndex {
    entries: Vec<DataFileEntry>,
    /// Global id of the first record of each file
    starts: Vec<u64>,
    total: u64,
}
impl DataFileIndex {
    #[must_use]
    pub fn new(entries: Vec<DataFileEntry>) -> Self {
        let mut starts = Vec::with_capacity(entries.len());
        let mut total = 0;
        for entry in &entries {
            starts.push(total);
            total += entry.records;
        }
        Self {
            entries,
            starts,
            total,
        }
    }

    /// Loads the index of `family` and checks it against the header record count
    pub fn load(dir: &Path, family: Family, header: &IndexHeader) -> Result<Self> {
        let path = dir.join(family.index_name());
        let bytes = fs::read(&path).map_err(|e| CorruptError::io(&path, None, e))?;

        let width = if header.has_data_sizes() { 16 } else { 8 };
        if bytes.len() % width != 0 {
            return Err(CorruptError::Truncated { path }.into());
        }

        let mut entries = Vec::with_capacity(bytes.len() / width);
        let (mut records_total, mut size_total) = (0u64, 0u64);
        for (i, chunk) in bytes.chunks_exact(width).enumerate() {
            let records = non_negative(&path, "data file record count", BigEndian::read_i64(&chunk[0..8]))?;
            let size = if header.has_data_sizes() {
                non_negative(&path, "data file size", BigEndian::read_i64(&chunk[8..16]))?
            } else {
                let data = numbered(dir, family.data_prefix(), i as u32);
                fs::metadata(&data)
                    .map_err(|e| CorruptError::io(&data, None, e))?
                    .len()
            };
            records_total = checked_total(&path, "data file record count", records_total, records)?;
            size_total = checked_total(&path, "data file size", size_total, size)?;
            entries.push(DataFileEntry { records, size });
        }

        let index = Self::new(entries);
        if index.total != header.number_sequences {
            return Err(CorruptError::RecordCount {
                path,
                expected: header.number_sequences,
                found: index.total,
            }
            .into());
        }
        Ok(index)
    }

    /// Writes the index of `family` in the current (count, size) shape
    pub fn save(&self, dir: &Path, family: Family) -> Result<()> {
        let mut writer = BufWriter::new(File::create(dir.join(family.index_name()))?);
        self.write_bytes(&mut writer, true)?;
        writer.flush()?;
        Ok(())
    }

    /// Serializes the entries, with or without sizes
    pub(crate) fn write_bytes<W: Write>(&self, writer: &mut W, with_sizes: bool) -> Result<()> {
        let mut buf = [0u8; 16];
        for entry in &self.entries {
            BigEndian::write_u64(&mut buf[0..8], entry.records);
            BigEndian::write_u64(&mut buf[8..16], entry.size);
            let width = if with_sizes { 16 } else { 8 };
            writer.write_all(&buf[..width])?;
        }
        Ok(())
    }

    /// Number of records starting in file `file`
    #[must_use]
    pub fn number_sequences(&self, file: u32) -> u64 {
        self.entries.get(file as usize).map_or(0, |e| e.records)
    }

    /// Number of values stored in file `file`
    #[must_use]
    pub fn data_size(&self, file: u32) -> u64 {
        self.entries.get(file as usize).map_or(0, |e| e.size)
    }

    /// Global id of the first record of file `file`
    #[must_use]
    pub fn first_record(&self, file: u32) -> u64 {
        self.starts.get(file as usize).copied().unwrap_or(self.total)
    }

    /// Number of data files
    #[must_use]
    pub fn number_entries(&self) -> u32 {
        self.entries.len() as u32
    }

    #[must_use]
    pub fn total_number_sequences(&self) -> u64 {
        self.total
    }

    /// Finds the file in which record `id` starts
    ///
    /// Returns `None` for ids at or beyond the record total.
    #[must_use]
    pub fn locate(&self, id: u64) -> Option<u32> {
        if id >= self.total {
            return None;
        }
        // last file whose first record is <= id and that holds records
        let upper = self.starts.partition_point(|&s| s <= id);
        (0..upper)
            .rev()
            .find(|&f| self.entries[f].records > 0)
            .map(|f| f as u32)
    }
}

fn non_negative(path: &Path, field: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        CorruptError::NegativeValue {
            path: path.to_path_buf(),
            field,
            value,
        }
        .into()
    })
}

fn checked_total(path: &Path, field: &'static str, total: u64, value: u64) -> Result<u64> {
    total.checked_add(value).ok_or_else(|| {
        CorruptError::InvalidField {
            path: path.to_path_buf(),
            field,
            value: i64::try_from(value).unwrap_or(i64::MAX),
        }
        .into()
    })
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::alphabet::SequenceType;
    use anyhow::Result;

    fn entries(pairs: &[(u64, u64)]) -> DataFileIndex {
        DataFileIndex::new(
            pairs
                .iter()
                .map(|&(records, size)| DataFileEntry { records, size })
                .collect(),
        )
    }

    #[test]
    fn test_locate_skips_empty_files() {
        let index = entries(&[(2, 10), (0, 10), (3, 10), (1, 4)]);
        assert_eq!(index.total_number_sequences(), 6);
        assert_eq!(index.locate(0), Some(0));
        assert_eq!(index.locate(1), Some(0));
        assert_eq!(index.locate(2), Some(2));
        assert_eq!(index.locate(4), Some(2));
        assert_eq!(index.locate(5), Some(3));
        assert_eq!(index.locate(6), None);
        assert_eq!(index.first_record(2), 2);
        assert_eq!(index.first_record(3), 5);
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = entries(&[(2, 10), (1, 5)]);
        index.save(dir.path(), Family::Sequence)?;

        let mut header = IndexHeader::new(SequenceType::Dna);
        header.number_sequences = 3;
        let loaded = DataFileIndex::load(dir.path(), Family::Sequence, &header)?;
        assert_eq!(loaded, index);
        assert_eq!(loaded.data_size(1), 5);

        header.number_sequences = 4;
        let err = DataFileIndex::load(dir.path(), Family::Sequence, &header)
            .expect_err("count mismatch");
        assert!(err.is_corrupt());
        Ok(())
    }

    #[test]
    fn test_legacy_shape_uses_file_lengths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = entries(&[(2, 7), (1, 3)]);
        let mut bytes = Vec::new();
        index.write_bytes(&mut bytes, false)?;
        fs::write(dir.path().join(Family::Sequence.index_name()), bytes)?;
        fs::write(dir.path().join("seq0"), [1u8; 7])?;
        fs::write(dir.path().join("seq1"), [2u8; 3])?;

        let mut header = IndexHeader::new(SequenceType::Dna);
        header.version = 8;
        header.number_sequences = 3;
        let loaded = DataFileIndex::load(dir.path(), Family::Sequence, &header)?;
        assert_eq!(loaded, index);
        Ok(())
    }

    #[test]
    fn test_negative_count_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bytes = vec![0u8; 16];
        BigEndian::write_i64(&mut bytes[0..8], -1);
        fs::write(dir.path().join(Family::Label.index_name()), bytes)?;
        let header = IndexHeader::new(SequenceType::Dna);
        let err = DataFileIndex::load(dir.path(), Family::Label, &header)
            .expect_err("negative count");
        assert!(matches!(
            err,
            crate::Error::CorruptError(CorruptError::NegativeValue { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_overflowing_totals_are_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut header = IndexHeader::new(SequenceType::Dna);
        header.number_sequences = 3;
        for (records, size) in [(i64::MAX, 3), (1, i64::MAX)] {
            let mut bytes = vec![0u8; 48];
            for chunk in bytes.chunks_exact_mut(16) {
                BigEndian::write_i64(&mut chunk[0..8], records);
                BigEndian::write_i64(&mut chunk[8..16], size);
            }
            fs::write(dir.path().join(Family::Sequence.index_name()), bytes)?;
            let err = DataFileIndex::load(dir.path(), Family::Sequence, &header)
                .expect_err("overflowing total");
            assert!(matches!(
                err,
                crate::Error::CorruptError(CorruptError::InvalidField { .. })
            ));
        }
        Ok(())
    }
}
