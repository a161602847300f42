//! Placement of a region's records in the data files
//!
//! A [`RegionLayout`] is computed from the pointer files alone. It maps each record
//! of a region to a position in the concatenation of the region's values, and lists
//! the value ranges of every data file the region touches.

use std::ops::Range;

use crate::{
    codec::ValueReader,
    data_index::DataFileIndex,
    error::{CorruptError, Result},
    pointer::{check_sentinel, PointerHandler},
    rolling::RollingFile,
};

/// Values `start..end` of data file `file`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub file: u32,
    pub start: u64,
    pub end: u64,
}
impl FileSpan {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionLayout {
    /// `positions[i]..positions[i + 1]` are the values of record `i`
    pub positions: Vec<u64>,
    /// Stored checksum bytes of each record
    pub checksums: Vec<[u8; 2]>,
    pub spans: Vec<FileSpan>,
}
impl RegionLayout {
    /// Computes the layout of the records `range` of one file family
    pub fn load(
        pointers: &mut RollingFile,
        index: &DataFileIndex,
        handler: PointerHandler,
        range: Range<u64>,
    ) -> Result<Self> {
        let count = range.end - range.start;
        let mut layout = Self {
            positions: Vec::with_capacity(count as usize + 1),
            checksums: Vec::with_capacity(count as usize),
            spans: Vec::new(),
        };
        layout.positions.push(0);
        let Some(mut file) = index.locate(range.start) else {
            return Ok(layout);
        };

        let mut intra = range.start - index.first_record(file);
        let mut first_offset = None;
        let mut total = 0;
        let mut remaining = count;
        while remaining > 0 {
            if file >= index.number_entries() {
                return Err(CorruptError::MissingFile(pointers.path(file)).into());
            }
            let in_file = index.number_sequences(file);
            if intra >= in_file {
                file += 1;
                intra = 0;
                continue;
            }
            let n = (in_file - intra).min(remaining);
            let block = handler.read_block(pointers, file, intra, n)?;
            first_offset.get_or_insert(block.offsets[0]);
            for i in 0..n as usize {
                let mut length = block.offsets[i + 1] - block.offsets[i];
                if intra + i as u64 + 1 == in_file {
                    check_sentinel(&pointers.path(file), block.offsets[i + 1], index.data_size(file))?;
                    length += handler.carry(pointers, index, file)?;
                }
                total += length;
                layout.positions.push(total);
                layout.checksums.push(block.checksums[i]);
            }
            remaining -= n;
            intra += n;
        }

        // walk the data files holding the region's values
        let mut file = index.locate(range.start).unwrap_or_default();
        let mut start = first_offset.unwrap_or_default();
        let mut remaining = total;
        while remaining > 0 {
            if file >= index.number_entries() {
                return Err(CorruptError::MissingFile(pointers.path(file)).into());
            }
            let size = index.data_size(file);
            let take = size.saturating_sub(start).min(remaining);
            if take > 0 {
                layout.spans.push(FileSpan {
                    file,
                    start,
                    end: start + take,
                });
            }
            remaining -= take;
            start = 0;
            file += 1;
        }
        Ok(layout)
    }

    /// Total number of values in the region
    #[must_use]
    pub fn total(&self) -> u64 {
        self.positions.last().copied().unwrap_or_default()
    }

    /// Reads every value of the region from the data files into `dest`
    pub fn read_values(
        &self,
        data: &mut RollingFile,
        reader: &mut ValueReader,
        dest: &mut Vec<u8>,
    ) -> Result<()> {
        dest.clear();
        dest.resize(self.total() as usize, 0);
        let mut done = 0;
        for span in &self.spans {
            data.require(span.file)?;
            let len = span.len() as usize;
            reader.read(data, span.start, &mut dest[done..done + len])?;
            done += len;
        }
        data.close();
        reader.invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{
        codec::Packing,
        data_index::DataFileEntry,
        pointer::PointerWriter,
    };
    use anyhow::Result;
    use std::{fs, path::Path};

    fn pointers(dir: &Path, file: u32, offsets: &[u64], size: u64) -> Result<()> {
        let mut writer = PointerWriter::create(dir, "seqpointer", file, PointerHandler::Legacy)?;
        for &offset in offsets {
            writer.entry([0, 0], offset)?;
        }
        writer.finish(size)?;
        Ok(())
    }

    /// Records of lengths 3, 11 (spanning the empty file 1), 1 and 1
    fn fixture(dir: &Path) -> Result<DataFileIndex> {
        pointers(dir, 0, &[0, 3], 6)?;
        pointers(dir, 1, &[], 6)?;
        pointers(dir, 2, &[2, 3], 4)?;
        fs::write(dir.join("seq0"), [1, 1, 1, 2, 2, 2])?;
        fs::write(dir.join("seq1"), [2; 6])?;
        fs::write(dir.join("seq2"), [2, 2, 3, 4])?;
        Ok(DataFileIndex::new(vec![
            DataFileEntry { records: 2, size: 6 },
            DataFileEntry { records: 0, size: 6 },
            DataFileEntry { records: 2, size: 4 },
        ]))
    }

    #[test]
    fn test_full_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = fixture(dir.path())?;
        let mut ptrs = RollingFile::new(dir.path(), "seqpointer", 3);
        let layout = RegionLayout::load(&mut ptrs, &index, PointerHandler::Legacy, 0..4)?;
        assert_eq!(layout.positions, vec![0, 3, 14, 15, 16]);
        assert_eq!(layout.spans.len(), 3);
        assert_eq!(layout.total(), 16);
        Ok(())
    }

    #[test]
    fn test_partial_layout_and_values() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = fixture(dir.path())?;
        let mut ptrs = RollingFile::new(dir.path(), "seqpointer", 3);
        let layout = RegionLayout::load(&mut ptrs, &index, PointerHandler::Legacy, 1..3)?;
        assert_eq!(layout.positions, vec![0, 11, 12]);
        assert_eq!(
            layout.spans,
            vec![
                FileSpan { file: 0, start: 3, end: 6 },
                FileSpan { file: 1, start: 0, end: 6 },
                FileSpan { file: 2, start: 0, end: 3 },
            ]
        );

        let mut data = RollingFile::new(dir.path(), "seq", 3);
        let mut reader = ValueReader::new(Packing::Raw);
        let mut values = Vec::new();
        layout.read_values(&mut data, &mut reader, &mut values)?;
        assert_eq!(values, [vec![2; 11], vec![3]].concat());
        Ok(())
    }

    #[test]
    fn test_empty_region() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = fixture(dir.path())?;
        let mut ptrs = RollingFile::new(dir.path(), "seqpointer", 3);
        let layout = RegionLayout::load(&mut ptrs, &index, PointerHandler::Legacy, 4..4)?;
        assert_eq!(layout.positions, vec![0]);
        assert!(layout.checksums.is_empty());
        assert!(layout.spans.is_empty());
        Ok(())
    }
}
