use crate::{
    alphabet::SequenceType,
    checksum::record_checksum,
    error::{ReadError, Result},
    header::IndexHeader,
};

/// Full reads between two per-record checksum checks
const CHECK_INTERVAL_MASK: u64 = 0xff;

/// Random access to the records of a store
///
/// Record ids are relative to the region the reader was opened with: id 0 is the
/// first record of the region. Methods take `&mut self` because disk-backed
/// readers move a cursor; use [`SequenceStore::copy`] to obtain an independent
/// reader for another thread.
pub trait SequenceStore {
    /// The header of the underlying store
    fn header(&self) -> &IndexHeader;

    /// Number of records available to this reader
    fn number_records(&self) -> u64;

    /// Length of record `id`
    fn length(&mut self, id: u64) -> Result<u64>;

    /// Copies `len` residue codes of record `id`, starting at `start`, into `dest`
    ///
    /// Returns the number of codes copied.
    fn read_range(&mut self, id: u64, dest: &mut [u8], start: u64, len: u64) -> Result<usize>;

    /// Copies `len` quality values of record `id`, starting at `start`, into `dest`
    fn read_quality_range(
        &mut self,
        id: u64,
        dest: &mut [u8],
        start: u64,
        len: u64,
    ) -> Result<usize>;

    /// Label of record `id`
    fn name(&mut self, id: u64) -> Result<String>;

    /// Name suffix of record `id` (empty if the store has no suffixes)
    fn name_suffix(&mut self, id: u64) -> Result<String>;

    /// Sum of the lengths of records `start..end`
    fn length_between(&mut self, start: u64, end: u64) -> Result<u64>;

    /// Lengths of records `start..end`
    fn sequence_lengths(&mut self, start: u64, end: u64) -> Result<Vec<u64>>;

    /// An independent reader over the same records
    fn copy(&self) -> Result<Self>
    where
        Self: Sized;

    /// Releases every open file
    fn close(&mut self) -> Result<()>;

    /// Copies every residue code of record `id` into `dest`
    fn read(&mut self, id: u64, dest: &mut [u8]) -> Result<usize> {
        let length = self.length(id)?;
        self.read_range(id, dest, 0, length)
    }

    /// Copies every quality value of record `id` into `dest`
    fn read_quality(&mut self, id: u64, dest: &mut [u8]) -> Result<usize> {
        let length = self.length(id)?;
        self.read_quality_range(id, dest, 0, length)
    }

    /// Residue codes of record `id` in a new buffer
    fn read_vec(&mut self, id: u64) -> Result<Vec<u8>> {
        let mut dest = vec![0; self.length(id)? as usize];
        self.read(id, &mut dest)?;
        Ok(dest)
    }

    /// Quality values of record `id` in a new buffer
    fn read_quality_vec(&mut self, id: u64) -> Result<Vec<u8>> {
        let mut dest = vec![0; self.length(id)? as usize];
        self.read_quality(id, &mut dest)?;
        Ok(dest)
    }

    /// Label and suffix of record `id`
    fn full_name(&mut self, id: u64) -> Result<String> {
        let mut name = self.name(id)?;
        name.push_str(&self.name_suffix(id)?);
        Ok(name)
    }

    fn sequence_type(&self) -> SequenceType {
        self.header().sequence_type
    }

    fn has_quality(&self) -> bool {
        self.header().has_quality
    }

    fn has_names(&self) -> bool {
        self.header().has_names
    }

    /// Maximum record length over the whole store
    fn max_length(&self) -> u64 {
        self.header().max_length
    }

    /// Minimum record length over the whole store
    fn min_length(&self) -> u64 {
        self.header().min_length
    }
}

/// Checks that `id` lies within a reader of `count` records
pub(crate) fn check_id(id: u64, count: u64) -> Result<()> {
    if id < count {
        Ok(())
    } else {
        Err(ReadError::OutOfRange {
            index: id,
            limit: count,
        }
        .into())
    }
}

/// Checks a `[start, start + len)` request against a record and a destination buffer
pub(crate) fn check_request(length: u64, start: u64, len: u64, dest: usize) -> Result<()> {
    if start.checked_add(len).is_none_or(|end| end > length) {
        return Err(ReadError::OutOfRange {
            index: start.saturating_add(len),
            limit: length,
        }
        .into());
    }
    if (dest as u64) < len {
        return Err(ReadError::BufferTooSmall {
            needed: len as usize,
            got: dest,
        }
        .into());
    }
    Ok(())
}

/// Checks a `[start, end)` range of record ids
pub(crate) fn check_id_range(start: u64, end: u64, count: u64) -> Result<()> {
    if start > end || end > count {
        Err(ReadError::InvalidRegion { start, end, count }.into())
    } else {
        Ok(())
    }
}

/// Verifies the per-record checksum of one full read out of every 256
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SampledCheck {
    reads: u64,
}
impl SampledCheck {
    /// Counts one full read of `values` and checks it if it falls on the sampling interval
    pub fn check(
        &mut self,
        record: u64,
        stream: &'static str,
        values: &[u8],
        expected: u8,
    ) -> Result<()> {
        let sampled = (self.reads & CHECK_INTERVAL_MASK) == 0;
        self.reads += 1;
        if !sampled {
            return Ok(());
        }
        let found = record_checksum(values);
        if found == expected {
            Ok(())
        } else {
            Err(ReadError::ChecksumMismatch {
                record,
                stream,
                expected,
                found,
            }
            .into())
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_request_checks() {
        assert!(check_id(2, 3).is_ok());
        assert!(check_id(3, 3).is_err());
        assert!(check_request(10, 2, 8, 8).is_ok());
        assert!(check_request(10, 2, 9, 9).is_err());
        assert!(check_request(10, 0, 5, 4).is_err());
        assert!(check_request(0, 0, 0, 0).is_ok());
        assert!(check_id_range(1, 3, 3).is_ok());
        assert!(check_id_range(3, 1, 3).is_err());
    }

    #[test]
    fn test_sampled_check_interval() {
        let values = [1, 2, 3];
        let good = record_checksum(&values);
        let bad = good.wrapping_add(1);

        let mut check = SampledCheck::default();
        let err = check.check(7, "sequence", &values, bad).expect_err("first read is checked");
        assert!(err.is_checksum_mismatch());
        for _ in 1..256 {
            assert!(check.check(7, "sequence", &values, bad).is_ok());
        }
        assert!(check.check(7, "sequence", &values, bad).is_err());
        assert!(check.check(7, "sequence", &values, good).is_ok());
    }
}
