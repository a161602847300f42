//! Seekable access to one family of rolling files
//!
//! A [`StreamManager`] owns the pointer files of a family and one or more value
//! streams read in lockstep with them (residues and quality share the sequence
//! pointers). Seeking within the records of the open pointer file only repositions
//! inside it; any other id goes through the data-file index first.

use std::{ops::Range, path::Path};

use tracing::debug;

use super::layout::RegionLayout;
use crate::{
    codec::{Packing, ValueReader},
    data_index::DataFileIndex,
    error::{CorruptError, ReadError, Result},
    files::Family,
    header::IndexHeader,
    pointer::{PointerHandler, RecordLocation},
    rolling::RollingFile,
};

#[derive(Debug)]
struct ValueStream {
    file: RollingFile,
    values: ValueReader,
}

#[derive(Debug)]
pub(crate) struct StreamManager {
    index: DataFileIndex,
    handler: PointerHandler,
    pointers: RollingFile,
    streams: Vec<ValueStream>,
    /// Record ids `lower..upper` start in the open pointer file
    lower: u64,
    upper: u64,
    located: Option<(u64, RecordLocation)>,
}
impl StreamManager {
    /// Opens `family` in `dir`; no data file is opened until a record is read
    pub fn open(
        dir: &Path,
        family: Family,
        header: &IndexHeader,
        handler: PointerHandler,
        streams: Vec<(&'static str, Packing)>,
    ) -> Result<Self> {
        let index = DataFileIndex::load(dir, family, header)?;
        let files = index.number_entries();
        debug!(
            "Opened {} stream of {:?}: {} records in {files} files",
            family.stream_name(),
            dir,
            index.total_number_sequences()
        );
        Ok(Self {
            pointers: RollingFile::new(dir, family.pointer_prefix(), files),
            streams: streams
                .into_iter()
                .map(|(prefix, packing)| ValueStream {
                    file: RollingFile::new(dir, prefix, files),
                    values: ValueReader::new(packing),
                })
                .collect(),
            index,
            handler,
            lower: 0,
            upper: 0,
            located: None,
        })
    }

    pub fn index(&self) -> &DataFileIndex {
        &self.index
    }

    /// Positions the manager on global record `id`
    pub fn seek(&mut self, id: u64) -> Result<RecordLocation> {
        if let Some((located, location)) = self.located {
            if located == id {
                return Ok(location);
            }
        }
        let file = match self.pointers.current() {
            Some(file) if (self.lower..self.upper).contains(&id) => file,
            _ => {
                let file = self.index.locate(id).ok_or(ReadError::OutOfRange {
                    index: id,
                    limit: self.index.total_number_sequences(),
                })?;
                self.lower = self.index.first_record(file);
                self.upper = self.lower + self.index.number_sequences(file);
                file
            }
        };
        let location =
            self.handler
                .locate(&mut self.pointers, &self.index, file, id - self.lower, id)?;
        self.located = Some((id, location));
        Ok(location)
    }

    /// Reads values `start..start + dest.len()` of a located record from value stream `stream`
    ///
    /// The values may continue over any number of following data files.
    pub fn read(
        &mut self,
        stream: usize,
        location: &RecordLocation,
        start: u64,
        dest: &mut [u8],
    ) -> Result<()> {
        let ValueStream { file: data, values } = &mut self.streams[stream];
        let mut file = location.file;
        let mut pos = location.offset + start;
        let mut done = 0;
        while done < dest.len() {
            if file >= self.index.number_entries() {
                return Err(CorruptError::MissingFile(data.path(file)).into());
            }
            let size = self.index.data_size(file);
            if pos >= size {
                pos -= size;
                file += 1;
                continue;
            }
            let take = ((size - pos) as usize).min(dest.len() - done);
            data.require(file)?;
            values.read(data, pos, &mut dest[done..done + take])?;
            done += take;
            pos = 0;
            file += 1;
        }
        Ok(())
    }

    /// Layout of the global records `range`, computed from the pointer files
    pub fn layout(&mut self, range: Range<u64>) -> Result<RegionLayout> {
        let layout = RegionLayout::load(&mut self.pointers, &self.index, self.handler, range);
        // the open pointer file no longer matches lower..upper
        self.pointers.close();
        self.located = None;
        layout
    }

    pub fn close(&mut self) {
        self.pointers.close();
        for stream in &mut self.streams {
            stream.file.close();
            stream.values.invalidate();
        }
        self.located = None;
    }
}
