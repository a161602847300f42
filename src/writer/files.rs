//! Rolling record files
//!
//! A [`RecordFiles`] writes one family of numbered data files together with their
//! pointer files and, on close, the family's data-file index. Sequence data and
//! quality data share a family: they are written in lockstep, so `quality<N>` holds
//! exactly the values of `seq<N>`.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    codec::{Packing, ValueEncoder},
    data_index::{DataFileEntry, DataFileIndex},
    error::{Result, WriteError},
    files::{numbered, Family},
    pointer::{PointerHandler, PointerWriter},
};

/// One value stream of a family, e.g. `seq` or `quality`
struct DataStream {
    prefix: &'static str,
    encoder: ValueEncoder,
    out: Option<BufWriter<File>>,
}
impl DataStream {
    fn open(&mut self, dir: &Path, number: u32) -> Result<()> {
        self.out = Some(BufWriter::new(File::create(numbered(
            dir,
            self.prefix,
            number,
        ))?));
        Ok(())
    }

    fn push(&mut self, values: &[u8]) -> Result<()> {
        if let Some(out) = self.out.as_mut() {
            self.encoder.push(values, out)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            self.encoder.finish(&mut out)?;
            out.flush()?;
        }
        Ok(())
    }
}

/// A data file whose pointer file is still being written
struct OpenFile {
    number: u32,
    /// Values written to the file
    size: u64,
    /// Records starting in the file
    records: u64,
    pointers: PointerWriter,
}

/// Writer for one family of rolling files
pub struct RecordFiles {
    dir: PathBuf,
    family: Family,
    limit: u64,
    handler: PointerHandler,
    streams: Vec<DataStream>,
    current: Option<OpenFile>,
    /// Earlier file holding the start of the record in progress
    spanning: Option<OpenFile>,
    /// Offset of the record in progress within the file it started in
    record_start: Option<u64>,
    entries: Vec<DataFileEntry>,
}
impl RecordFiles {
    /// Creates a writer for `family` whose value streams use the given packings
    pub fn new(
        dir: &Path,
        family: Family,
        limit: u64,
        handler: PointerHandler,
        streams: Vec<(&'static str, Packing)>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            family,
            limit,
            handler,
            streams: streams
                .into_iter()
                .map(|(prefix, packing)| DataStream {
                    prefix,
                    encoder: packing.encoder(),
                    out: None,
                })
                .collect(),
            current: None,
            spanning: None,
            record_start: None,
            entries: Vec::new(),
        }
    }

    fn current_full(&self) -> bool {
        self.current.as_ref().is_none_or(|f| f.size >= self.limit)
    }

    /// Closes the current data file and opens the next one
    fn roll(&mut self) -> Result<()> {
        let next = match self.current.take() {
            Some(file) => {
                for stream in &mut self.streams {
                    stream.finish()?;
                }
                let number = file.number;
                if self.record_start.is_some() && self.spanning.is_none() && file.records > 0 {
                    // the record in progress started here, its pointer entry is still due
                    self.spanning = Some(file);
                } else {
                    self.finish_file(file)?;
                }
                number + 1
            }
            None => 0,
        };
        for stream in &mut self.streams {
            stream.open(&self.dir, next)?;
        }
        let pointers = PointerWriter::create(&self.dir, self.family.pointer_prefix(), next, self.handler)?;
        self.entries.push(DataFileEntry::default());
        self.current = Some(OpenFile {
            number: next,
            size: 0,
            records: 0,
            pointers,
        });
        debug!(
            "Opened {} data file {next}",
            self.family.stream_name()
        );
        Ok(())
    }

    fn finish_file(&mut self, file: OpenFile) -> Result<()> {
        file.pointers.finish(file.size)?;
        self.entries[file.number as usize] = DataFileEntry {
            records: file.records,
            size: file.size,
        };
        Ok(())
    }

    /// Starts a record, opening a new data file if the current one is full
    pub fn start_record(&mut self) -> Result<()> {
        if self.record_start.is_some() {
            return Err(WriteError::RecordInProgress.into());
        }
        if self.current_full() {
            self.roll()?;
        }
        if let Some(file) = self.current.as_mut() {
            self.record_start = Some(file.size);
            file.records += 1;
        }
        Ok(())
    }

    /// Appends values to the record in progress
    ///
    /// `parts` holds one equally long slice per value stream.
    pub fn write(&mut self, parts: &[&[u8]]) -> Result<()> {
        if self.record_start.is_none() {
            return Err(WriteError::RecordNotStarted.into());
        }
        debug_assert_eq!(parts.len(), self.streams.len());
        let len = parts.first().map_or(0, |p| p.len());
        let mut done = 0;
        while done < len {
            if self.current_full() {
                self.roll()?;
            }
            let size = self.current.as_ref().map_or(0, |f| f.size);
            let take = ((self.limit - size) as usize).min(len - done);
            for (stream, part) in self.streams.iter_mut().zip(parts) {
                stream.push(&part[done..done + take])?;
            }
            if let Some(file) = self.current.as_mut() {
                file.size += take as u64;
            }
            done += take;
        }
        Ok(())
    }

    /// Ends the record in progress, recording its pointer entry
    pub fn end_record(&mut self, checksums: [u8; 2]) -> Result<()> {
        let offset = self
            .record_start
            .take()
            .ok_or(WriteError::RecordNotStarted)?;
        if let Some(mut file) = self.spanning.take() {
            file.pointers.entry(checksums, offset)?;
            self.finish_file(file)?;
        } else if let Some(file) = self.current.as_mut() {
            file.pointers.entry(checksums, offset)?;
        }
        Ok(())
    }

    /// Number of data files opened so far
    #[must_use]
    pub fn file_count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Flushes every file and writes the family's data-file index
    pub fn close(mut self) -> Result<DataFileIndex> {
        if self.record_start.is_some() {
            return Err(WriteError::RecordInProgress.into());
        }
        if let Some(file) = self.current.take() {
            for stream in &mut self.streams {
                stream.finish()?;
            }
            self.finish_file(file)?;
        }
        let index = DataFileIndex::new(self.entries);
        index.save(&self.dir, self.family)?;
        Ok(index)
    }
}

/// Deletes every file of `family` written by a [`RecordFiles`] with `files` data files
pub fn remove_family(dir: &Path, family: Family, files: u32) -> Result<()> {
    for n in 0..files {
        fs::remove_file(numbered(dir, family.data_prefix(), n))?;
        fs::remove_file(numbered(dir, family.pointer_prefix(), n))?;
    }
    fs::remove_file(dir.join(family.index_name()))?;
    Ok(())
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{files::QUALITY_PREFIX, rolling::RollingFile};
    use anyhow::Result;

    fn sequence_files(dir: &Path, limit: u64) -> RecordFiles {
        RecordFiles::new(
            dir,
            Family::Sequence,
            limit,
            PointerHandler::Checksummed { width: 1 },
            vec![(Family::Sequence.data_prefix(), Packing::Raw)],
        )
    }

    fn write_record(files: &mut RecordFiles, values: &[u8], crc: u8) -> Result<()> {
        files.start_record()?;
        files.write(&[values])?;
        files.end_record([crc, 0])?;
        Ok(())
    }

    #[test]
    fn test_record_spanning_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut files = sequence_files(dir.path(), 10);
        write_record(&mut files, &[1, 2, 3, 4, 0], 7)?;
        write_record(&mut files, &[], 8)?;
        write_record(&mut files, &[4; 10], 9)?;
        let index = files.close()?;

        assert_eq!(index.number_entries(), 2);
        assert_eq!(index.number_sequences(0), 3);
        assert_eq!(index.data_size(0), 10);
        assert_eq!(index.number_sequences(1), 0);
        assert_eq!(index.data_size(1), 5);
        assert_eq!(fs::read(dir.path().join("seq1"))?, vec![4; 5]);

        let handler = PointerHandler::Checksummed { width: 1 };
        let mut pointers = RollingFile::new(dir.path(), "seqpointer", 2);
        let loc = handler.locate(&mut pointers, &index, 0, 2, 2)?;
        assert_eq!((loc.offset, loc.length, loc.checksums[0]), (5, 10, 9));
        let loc = handler.locate(&mut pointers, &index, 0, 1, 1)?;
        assert_eq!((loc.offset, loc.length), (5, 0));
        Ok(())
    }

    #[test]
    fn test_record_spanning_several_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut files = sequence_files(dir.path(), 4);
        write_record(&mut files, &[1, 1], 0)?;
        write_record(&mut files, &[2; 11], 0)?;
        write_record(&mut files, &[3; 3], 0)?;
        let index = files.close()?;

        let counts: Vec<_> = (0..index.number_entries())
            .map(|f| (index.number_sequences(f), index.data_size(f)))
            .collect();
        assert_eq!(counts, vec![(2, 4), (0, 4), (0, 4), (1, 4)]);

        let handler = PointerHandler::Checksummed { width: 1 };
        let mut pointers = RollingFile::new(dir.path(), "seqpointer", 4);
        assert_eq!(handler.locate(&mut pointers, &index, 0, 1, 1)?.length, 11);
        let loc = handler.locate(&mut pointers, &index, 3, 0, 2)?;
        assert_eq!((loc.offset, loc.length), (1, 3));
        Ok(())
    }

    #[test]
    fn test_quality_in_lockstep() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut files = RecordFiles::new(
            dir.path(),
            Family::Sequence,
            3,
            PointerHandler::Checksummed { width: 2 },
            vec![("seq", Packing::Raw), (QUALITY_PREFIX, Packing::Raw)],
        );
        files.start_record()?;
        files.write(&[&[1, 2, 3, 4], &[30, 31, 32, 33]])?;
        files.end_record([1, 2])?;
        files.close()?;
        assert_eq!(fs::read(dir.path().join("quality0"))?, vec![30, 31, 32]);
        assert_eq!(fs::read(dir.path().join("quality1"))?, vec![33]);
        assert_eq!(fs::read(dir.path().join("seq1"))?, vec![4]);
        Ok(())
    }

    #[test]
    fn test_protocol_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut files = sequence_files(dir.path(), 10);
        assert!(files.write(&[&[1]]).is_err());
        files.start_record()?;
        assert!(files.start_record().is_err());
        assert!(files.close().is_err());
        Ok(())
    }
}
