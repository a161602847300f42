//! Names of a region held in memory

use std::{ops::Range, path::Path};

use super::layout::RegionLayout;
use crate::{
    checksum::StreamHash,
    codec::{Packing, ValueReader},
    data_index::DataFileIndex,
    error::Result,
    files::Family,
    header::IndexHeader,
    pointer::PointerHandler,
    rolling::RollingFile,
};

/// Labels or suffixes of consecutive records, concatenated in one buffer
#[derive(Debug, Clone)]
pub struct PrereadNames {
    /// `positions[i]..positions[i + 1]` is the name of record `i`
    positions: Vec<u64>,
    data: String,
}
impl Default for PrereadNames {
    fn default() -> Self {
        Self {
            positions: vec![0],
            data: String::new(),
        }
    }
}
impl PrereadNames {
    /// Reads the names of the records `range` of one name family
    pub fn load(
        dir: &Path,
        family: Family,
        header: &IndexHeader,
        range: Range<u64>,
    ) -> Result<Self> {
        let index = DataFileIndex::load(dir, family, header)?;
        let files = index.number_entries();
        let mut pointers = RollingFile::new(dir, family.pointer_prefix(), files);
        let layout = RegionLayout::load(&mut pointers, &index, PointerHandler::for_names(), range)?;
        pointers.close();

        let mut data = RollingFile::new(dir, family.data_prefix(), files);
        let mut bytes = Vec::new();
        layout.read_values(&mut data, &mut ValueReader::new(Packing::Raw), &mut bytes)?;
        for w in layout.positions.windows(2) {
            std::str::from_utf8(&bytes[w[0] as usize..w[1] as usize])?;
        }
        Ok(Self {
            data: String::from_utf8(bytes).map_err(|e| e.utf8_error())?,
            positions: layout.positions,
        })
    }

    /// Appends the name of the next record
    pub fn push(&mut self, name: &str) {
        self.data.push_str(name);
        self.positions.push(self.data.len() as u64);
    }

    /// Number of names
    #[must_use]
    pub fn len(&self) -> u64 {
        self.positions.len() as u64 - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of record `id`
    #[must_use]
    pub fn name(&self, id: u64) -> Option<&str> {
        let start = *self.positions.get(id as usize)? as usize;
        let end = *self.positions.get(id as usize + 1)? as usize;
        self.data.get(start..end)
    }

    /// Heap bytes used
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.data.capacity() + self.positions.capacity() * size_of::<u64>()
    }

    /// Stream checksum over every name, comparable to the header's name checksums
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash = StreamHash::default();
        for w in self.positions.windows(2) {
            hash.add_record(&self.data.as_bytes()[w[0] as usize..w[1] as usize]);
        }
        hash.value()
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::writer::SdfWriterBuilder;
    use anyhow::Result;

    #[test]
    fn test_load_region_of_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default().size_limit(4).build(dir.path())?;
        for name in ["first", "second one", "third", "fourth x y"] {
            writer.write_record(Some(name), &[1, 2, 3], None)?;
        }
        let header = writer.close()?;

        let labels = PrereadNames::load(dir.path(), Family::Label, &header, 0..4)?;
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.name(1), Some("second"));
        assert_eq!(labels.name(4), None);
        assert_eq!(labels.checksum(), header.name_checksum);

        let suffixes = PrereadNames::load(dir.path(), Family::Suffix, &header, 1..4)?;
        assert_eq!(suffixes.len(), 3);
        assert_eq!(suffixes.name(0), Some(" one"));
        assert_eq!(suffixes.name(1), Some(""));
        assert_eq!(suffixes.name(2), Some(" x y"));
        Ok(())
    }

    #[test]
    fn test_pushed_names() {
        let mut names = PrereadNames::default();
        assert!(names.is_empty());
        names.push("a");
        names.push("");
        names.push("bc");
        assert_eq!(names.len(), 3);
        assert_eq!(names.name(1), Some(""));
        assert_eq!(names.name(2), Some("bc"));

        let mut hash = StreamHash::default();
        for name in ["a", "", "bc"] {
            hash.add_record(name.as_bytes());
        }
        assert_eq!(names.checksum(), hash.value());
    }
}
