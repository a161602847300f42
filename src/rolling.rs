//! Rolling file manager
//!
//! A logical stream (residue data, quality data, pointers, names) is split over a
//! numbered series of files. A [`RollingFile`] holds at most one open handle of such
//! a series and moves between its members on request. Higher layers never open
//! data files themselves; they borrow the current handle from here.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::{
    error::{CorruptError, Result},
    files::numbered,
};

#[derive(Debug)]
enum FileState {
    Closed,
    Open { number: u32, file: File },
}

/// One numbered series of files with at most one open member
#[derive(Debug)]
pub struct RollingFile {
    dir: PathBuf,
    prefix: &'static str,
    file_count: u32,
    state: FileState,
}
impl RollingFile {
    /// Creates a closed manager for `prefix0 .. prefix{file_count - 1}` in `dir`
    #[must_use]
    pub fn new(dir: &Path, prefix: &'static str, file_count: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix,
            file_count,
            state: FileState::Closed,
        }
    }

    /// Opens member `n`, keeping the current handle if it is already open
    ///
    /// Returns `false` if the file does not exist.
    pub fn open_data_file(&mut self, n: u32) -> Result<bool> {
        if self.current() == Some(n) {
            return Ok(true);
        }
        self.close();
        let path = self.path(n);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CorruptError::io(path, None, e).into()),
        };
        self.state = FileState::Open { number: n, file };
        Ok(true)
    }

    /// Opens member `n`, treating a missing file as corruption
    pub fn require(&mut self, n: u32) -> Result<()> {
        if self.open_data_file(n)? {
            Ok(())
        } else {
            Err(CorruptError::MissingFile(self.path(n)).into())
        }
    }

    /// Advances to the next member of the series
    ///
    /// # Errors
    ///
    /// Fails with [`CorruptError::MissingFile`] if the next member is beyond the
    /// known file count or does not exist.
    pub fn roll_file(&mut self) -> Result<()> {
        let next = self.current().map_or(0, |n| n + 1);
        if next >= self.file_count {
            return Err(CorruptError::MissingFile(self.path(next)).into());
        }
        self.require(next)
    }

    /// Number of the open member, if any
    #[must_use]
    pub fn current(&self) -> Option<u32> {
        match &self.state {
            FileState::Open { number, .. } => Some(*number),
            FileState::Closed => None,
        }
    }

    /// Path of member `n`
    #[must_use]
    pub fn path(&self, n: u32) -> PathBuf {
        numbered(&self.dir, self.prefix, n)
    }

    /// Releases the open handle
    pub fn close(&mut self) {
        self.state = FileState::Closed;
    }

    /// Reads exactly `buf.len()` bytes at byte offset `pos` of the open member
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let FileState::Open { number, file } = &mut self.state else {
            return Err(closed_error(&self.dir, self.prefix));
        };
        file.seek(SeekFrom::Start(pos))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| CorruptError::io(numbered(&self.dir, self.prefix, *number), None, e).into())
    }

    /// Reads up to `buf.len()` bytes at byte offset `pos`, stopping at end of file
    pub fn read_up_to(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let FileState::Open { number, file } = &mut self.state else {
            return Err(closed_error(&self.dir, self.prefix));
        };
        let path = numbered(&self.dir, self.prefix, *number);
        file.seek(SeekFrom::Start(pos))
            .map_err(|e| CorruptError::io(&path, None, e))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(CorruptError::io(&path, None, e).into()),
            }
        }
        Ok(filled)
    }

    /// Memory-maps the open member
    pub fn map(&self) -> Result<Mmap> {
        match &self.state {
            FileState::Open { number, file } => {
                // Safety: store files are read-only once the writer has closed
                unsafe { Mmap::map(file) }
                    .map_err(|e| CorruptError::io(self.path(*number), None, e).into())
            }
            FileState::Closed => Err(closed_error(&self.dir, self.prefix)),
        }
    }
}

fn closed_error(dir: &Path, prefix: &str) -> crate::Error {
    CorruptError::io(
        dir.join(prefix),
        None,
        std::io::Error::other("no file of the series is open"),
    )
    .into()
}
