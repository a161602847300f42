//! Disk-streaming reader
//!
//! [`DefaultReader`] keeps no record data in memory. Every request seeks the
//! pointer files of the store and decodes the values straight from the data files,
//! so memory use is bounded by the read windows regardless of the store size.

use std::{
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::debug;

use super::{names::PrereadNames, stream::StreamManager};
use crate::{
    codec::Packing,
    error::{CorruptError, ReadError, Result},
    files::{Family, QUALITY_PREFIX},
    header::IndexHeader,
    pointer::PointerHandler,
    region::Region,
    store::{check_id, check_id_range, check_request, SampledCheck, SequenceStore},
};

const SEQUENCE_STREAM: usize = 0;
const QUALITY_STREAM: usize = 1;

/// Random access to a store on disk
#[derive(Debug)]
pub struct DefaultReader {
    dir: PathBuf,
    header: Arc<IndexHeader>,
    region: Range<u64>,
    sequences: StreamManager,
    labels: Option<StreamManager>,
    suffixes: Option<StreamManager>,
    /// One sampler per value stream
    checks: [SampledCheck; 2],
}
impl DefaultReader {
    /// Opens every record of the store in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_region(dir, Region::NONE)
    }

    /// Opens the records of `region` of the store in `dir`
    ///
    /// # Errors
    ///
    /// * [`crate::HeaderError`] if the directory is not a store or its version is unsupported
    /// * [`ReadError::InvalidRegion`] if the region does not fit the store
    /// * [`CorruptError`] if an index file is damaged
    pub fn open_region<P: AsRef<Path>>(dir: P, region: impl Into<Region>) -> Result<Self> {
        let dir = dir.as_ref();
        let header = IndexHeader::load(dir)?;
        let region = region.into().resolve(header.number_sequences)?;
        let reader = Self::with_header(dir, Arc::new(header), region)?;
        debug!(
            "Opened {} store {} at {:?}: records {}..{} of {}, lengths {}..={}",
            reader.header.sequence_type,
            reader.header.sdf_id,
            dir,
            reader.region.start,
            reader.region.end,
            reader.header.number_sequences,
            reader.header.min_length,
            reader.header.max_length
        );
        Ok(reader)
    }

    fn with_header(dir: &Path, header: Arc<IndexHeader>, region: Range<u64>) -> Result<Self> {
        let mut streams = vec![(Family::Sequence.data_prefix(), Packing::sequences(&header))];
        if header.has_quality {
            streams.push((QUALITY_PREFIX, Packing::quality(&header)));
        }
        let sequences = StreamManager::open(
            dir,
            Family::Sequence,
            &header,
            PointerHandler::for_sequences(&header),
            streams,
        )?;
        let names = |family: Family| {
            StreamManager::open(
                dir,
                family,
                &header,
                PointerHandler::for_names(),
                vec![(family.data_prefix(), Packing::Raw)],
            )
        };
        let labels = header.has_names.then(|| names(Family::Label)).transpose()?;
        let suffixes = (header.has_names && header.has_suffixes)
            .then(|| names(Family::Suffix))
            .transpose()?;
        Ok(Self {
            dir: dir.to_path_buf(),
            header,
            region,
            sequences,
            labels,
            suffixes,
            checks: [SampledCheck::default(); 2],
        })
    }

    /// Directory of the store
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Global ids of the records this reader exposes
    #[must_use]
    pub fn region(&self) -> Range<u64> {
        self.region.clone()
    }

    /// Number of data files of the sequence family
    #[must_use]
    pub fn number_data_files(&self) -> u32 {
        self.sequences.index().number_entries()
    }

    /// Loads the labels of every record of the store, verifying their stream checksum
    pub fn names(&self) -> Result<PrereadNames> {
        if !self.header.has_names {
            return Err(ReadError::NoNames.into());
        }
        let names = PrereadNames::load(
            &self.dir,
            Family::Label,
            &self.header,
            0..self.header.number_sequences,
        )?;
        if self.header.has_stream_checksums() {
            let found = names.checksum();
            if found != self.header.name_checksum {
                return Err(CorruptError::StreamChecksum {
                    path: self.dir.clone(),
                    stream: Family::Label.stream_name(),
                    expected: self.header.name_checksum,
                    found,
                }
                .into());
            }
            debug!("Sequence names passed checksum");
        }
        Ok(names)
    }

    fn read_values(
        &mut self,
        stream: usize,
        id: u64,
        dest: &mut [u8],
        start: u64,
        len: u64,
    ) -> Result<usize> {
        check_id(id, self.number_records())?;
        let location = self.sequences.seek(self.region.start + id)?;
        check_request(location.length, start, len, dest.len())?;
        let values = &mut dest[..len as usize];
        self.sequences.read(stream, &location, start, values)?;
        if start == 0 && len == location.length && self.header.has_record_checksums() {
            let name = if stream == SEQUENCE_STREAM {
                "sequence"
            } else {
                "quality"
            };
            self.checks[stream].check(id, name, values, location.checksums[stream])?;
        }
        Ok(len as usize)
    }

    fn read_name(manager: &mut StreamManager, id: u64) -> Result<String> {
        let location = manager.seek(id)?;
        let mut bytes = vec![0; location.length as usize];
        manager.read(0, &location, 0, &mut bytes)?;
        String::from_utf8(bytes).map_err(|e| e.utf8_error().into())
    }
}

impl SequenceStore for DefaultReader {
    fn header(&self) -> &IndexHeader {
        &self.header
    }

    fn number_records(&self) -> u64 {
        self.region.end - self.region.start
    }

    fn length(&mut self, id: u64) -> Result<u64> {
        check_id(id, self.number_records())?;
        Ok(self.sequences.seek(self.region.start + id)?.length)
    }

    fn read_range(&mut self, id: u64, dest: &mut [u8], start: u64, len: u64) -> Result<usize> {
        self.read_values(SEQUENCE_STREAM, id, dest, start, len)
    }

    fn read_quality_range(
        &mut self,
        id: u64,
        dest: &mut [u8],
        start: u64,
        len: u64,
    ) -> Result<usize> {
        if !self.header.has_quality {
            return Err(ReadError::NoQuality.into());
        }
        self.read_values(QUALITY_STREAM, id, dest, start, len)
    }

    fn name(&mut self, id: u64) -> Result<String> {
        check_id(id, self.number_records())?;
        let labels = self.labels.as_mut().ok_or(ReadError::NoNames)?;
        Self::read_name(labels, self.region.start + id)
    }

    fn name_suffix(&mut self, id: u64) -> Result<String> {
        check_id(id, self.number_records())?;
        if !self.header.has_names {
            return Err(ReadError::NoNames.into());
        }
        match self.suffixes.as_mut() {
            Some(suffixes) => Self::read_name(suffixes, self.region.start + id),
            None => Ok(String::new()),
        }
    }

    fn length_between(&mut self, start: u64, end: u64) -> Result<u64> {
        check_id_range(start, end, self.number_records())?;
        let offset = self.region.start;
        Ok(self.sequences.layout(offset + start..offset + end)?.total())
    }

    fn sequence_lengths(&mut self, start: u64, end: u64) -> Result<Vec<u64>> {
        check_id_range(start, end, self.number_records())?;
        let offset = self.region.start;
        let layout = self.sequences.layout(offset + start..offset + end)?;
        Ok(layout.positions.windows(2).map(|w| w[1] - w[0]).collect())
    }

    fn copy(&self) -> Result<Self> {
        Self::with_header(&self.dir, self.header.clone(), self.region.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.sequences.close();
        for names in [self.labels.as_mut(), self.suffixes.as_mut()].into_iter().flatten() {
            names.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{
        alphabet::{Encoding, SequenceType},
        writer::SdfWriterBuilder,
    };
    use anyhow::Result;

    fn write_store(dir: &Path, limit: u64, encoding: Encoding) -> Result<Vec<Vec<u8>>> {
        let records: Vec<Vec<u8>> = (0..20u8)
            .map(|i| (0..u64::from(i % 7) * 3).map(|j| ((j + u64::from(i)) % 5) as u8).collect())
            .collect();
        let mut writer = SdfWriterBuilder::default()
            .size_limit(limit)
            .encoding(encoding)
            .quality(true)
            .build(dir)?;
        for (i, codes) in records.iter().enumerate() {
            let quality: Vec<u8> = codes.iter().map(|&c| c * 10 + 2).collect();
            writer.write_record(Some(&format!("read{i} extra")), codes, Some(&quality))?;
        }
        writer.close()?;
        Ok(records)
    }

    #[test]
    fn test_reads_match_written_records() -> Result<()> {
        for encoding in [Encoding::Raw, Encoding::Packed] {
            let dir = tempfile::tempdir()?;
            let records = write_store(dir.path(), 7, encoding)?;
            let mut reader = DefaultReader::open(dir.path())?;
            assert_eq!(reader.number_records(), 20);
            assert!(reader.number_data_files() > 1);
            // out of order on purpose
            for id in (0..20).rev().chain(0..20) {
                let codes = &records[id as usize];
                assert_eq!(reader.length(id)?, codes.len() as u64);
                assert_eq!(&reader.read_vec(id)?, codes);
                let quality: Vec<u8> = codes.iter().map(|&c| c * 10 + 2).collect();
                assert_eq!(reader.read_quality_vec(id)?, quality);
                assert_eq!(reader.name(id)?, format!("read{id}"));
                assert_eq!(reader.full_name(id)?, format!("read{id} extra"));
            }
        }
        Ok(())
    }

    #[test]
    fn test_partial_reads_and_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let records = write_store(dir.path(), 5, Encoding::Packed)?;
        let mut reader = DefaultReader::open(dir.path())?;

        let mut dest = [0u8; 4];
        assert_eq!(reader.read_range(6, &mut dest, 8, 4)?, 4);
        assert_eq!(&dest, &records[6][8..12]);

        assert!(reader.read_range(6, &mut dest, 16, 4).is_err());
        let mut small = [0u8; 2];
        assert!(reader.read_range(6, &mut small, 0, 4).is_err());
        assert!(reader.read_vec(20).is_err());
        Ok(())
    }

    #[test]
    fn test_region_and_lengths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let records = write_store(dir.path(), 9, Encoding::Packed)?;
        let mut reader = DefaultReader::open_region(dir.path(), 5..12)?;
        assert_eq!(reader.number_records(), 7);
        for id in 0..7 {
            assert_eq!(reader.read_vec(id)?, records[id as usize + 5]);
            assert_eq!(reader.name(id)?, format!("read{}", id + 5));
        }
        let lengths: Vec<u64> = records[6..10].iter().map(|r| r.len() as u64).collect();
        assert_eq!(reader.sequence_lengths(1, 5)?, lengths);
        assert_eq!(reader.length_between(1, 5)?, lengths.iter().sum::<u64>());
        // reads still work after the layout pass moved the pointer files
        assert_eq!(reader.read_vec(3)?, records[8]);
        assert!(reader.sequence_lengths(3, 8).is_err());

        let mut copy = reader.copy()?;
        reader.close()?;
        assert_eq!(copy.read_vec(6)?, records[11]);
        Ok(())
    }

    #[test]
    fn test_names_checksum_and_missing_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_store(dir.path(), 11, Encoding::Raw)?;
        let reader = DefaultReader::open(dir.path())?;
        let names = reader.names()?;
        assert_eq!(names.name(19), Some("read19"));

        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default()
            .names(false)
            .sequence_type(SequenceType::Protein)
            .build(dir.path())?;
        writer.write_record(None, &[2, 3, 4], None)?;
        writer.close()?;
        let mut reader = DefaultReader::open(dir.path())?;
        assert!(reader.name(0).is_err());
        assert!(reader.read_quality_vec(0).is_err());
        assert_eq!(reader.read_vec(0)?, vec![2, 3, 4]);
        Ok(())
    }
}
