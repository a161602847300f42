use byteorder::{BigEndian, ByteOrder};

use super::{bitwise::decode_value, Packing, VALUES_PER_BLOCK};
use crate::{
    error::{CorruptError, Result},
    rolling::RollingFile,
};

/// Default size of a read window
pub const WINDOW_SIZE: usize = 1 << 20;

/// Buffered view over the open member of a [`RollingFile`]
///
/// A request inside the buffered range is served without I/O. A request slightly
/// past the end slides the window forward, keeping its tail so that short backward
/// steps stay buffered. A request far away (or before the window) discards the
/// buffer and reloads at the requested position.
#[derive(Debug)]
pub struct ByteWindow {
    buf: Vec<u8>,
    /// File position of `buf[0]`
    start: u64,
    in_use: usize,
    /// Member of the series the buffer was filled from
    file: Option<u32>,
}
impl Default for ByteWindow {
    fn default() -> Self {
        Self::with_capacity(WINDOW_SIZE)
    }
}
impl ByteWindow {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            start: 0,
            in_use: 0,
            file: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Forgets the buffered bytes
    pub fn invalidate(&mut self) {
        self.in_use = 0;
        self.file = None;
    }

    fn end(&self) -> u64 {
        self.start + self.in_use as u64
    }

    /// Returns bytes `pos .. pos + n` of the open member of `src`
    ///
    /// `keep` bytes before `pos` are retained (or loaded) along with the request.
    pub fn fetch(&mut self, src: &mut RollingFile, pos: u64, n: usize, keep: usize) -> Result<&[u8]> {
        debug_assert!(n + keep <= self.buf.len());
        if src.current() != self.file {
            self.invalidate();
        }
        if self.in_use > 0 && pos >= self.start && pos + n as u64 <= self.end() {
            let at = (pos - self.start) as usize;
            return Ok(&self.buf[at..at + n]);
        }

        let wanted = pos.saturating_sub(keep as u64);
        if self.in_use == 0
            || pos < self.start
            || pos > self.start + 2 * self.in_use as u64
            || wanted >= self.end()
        {
            self.start = wanted;
            self.in_use = 0;
        } else {
            let from = (wanted.max(self.start) - self.start) as usize;
            self.buf.copy_within(from..self.in_use, 0);
            self.in_use -= from;
            self.start += from as u64;
        }
        self.file = src.current();
        let filled = src.read_up_to(self.end(), &mut self.buf[self.in_use..])?;
        self.in_use += filled;

        if pos < self.start || pos + n as u64 > self.end() {
            let number = src.current().unwrap_or_default();
            return Err(CorruptError::Truncated {
                path: src.path(number),
            }
            .into());
        }
        let at = (pos - self.start) as usize;
        Ok(&self.buf[at..at + n])
    }
}

/// Decodes values of one packing from the open member of a [`RollingFile`]
#[derive(Debug)]
pub struct ValueReader {
    packing: Packing,
    window: ByteWindow,
}
impl ValueReader {
    #[must_use]
    pub fn new(packing: Packing) -> Self {
        Self::with_window(packing, ByteWindow::default())
    }

    #[must_use]
    pub fn with_window(packing: Packing, window: ByteWindow) -> Self {
        Self { packing, window }
    }

    #[must_use]
    pub fn packing(&self) -> &Packing {
        &self.packing
    }

    pub fn invalidate(&mut self) {
        self.window.invalidate();
    }

    /// Fills `dest` with the values starting at value position `pos` of the open file
    pub fn read(&mut self, src: &mut RollingFile, pos: u64, dest: &mut [u8]) -> Result<()> {
        match &self.packing {
            Packing::Raw => {
                let chunk = self.window.capacity();
                let mut done = 0;
                while done < dest.len() {
                    let take = chunk.min(dest.len() - done);
                    let bytes = self.window.fetch(src, pos + done as u64, take, 0)?;
                    dest[done..done + take].copy_from_slice(bytes);
                    done += take;
                }
            }
            Packing::Bitwise { bits } => {
                let bits = *bits as usize;
                let block_bytes = bits * 8;
                let mut words = [0u64; 8];
                let mut done = 0;
                while done < dest.len() {
                    let v = pos + done as u64;
                    let block = v / VALUES_PER_BLOCK;
                    let bit = v % VALUES_PER_BLOCK;
                    let take = ((VALUES_PER_BLOCK - bit) as usize).min(dest.len() - done);
                    let bytes = self.window.fetch(
                        src,
                        block * block_bytes as u64,
                        block_bytes,
                        block_bytes,
                    )?;
                    BigEndian::read_u64_into(bytes, &mut words[..bits]);
                    for (k, d) in dest[done..done + take].iter_mut().enumerate() {
                        *d = decode_value(&words[..bits], bit + k as u64);
                    }
                    done += take;
                }
            }
            Packing::Compressed(layout) => {
                let per_word = layout.per_word();
                let mut done = 0;
                while done < dest.len() {
                    let v = pos + done as u64;
                    let w = v / per_word;
                    let r = v % per_word;
                    let take = ((per_word - r) as usize).min(dest.len() - done);
                    let word = BigEndian::read_u64(self.window.fetch(src, w * 8, 8, 0)?);
                    for (k, d) in dest[done..done + take].iter_mut().enumerate() {
                        *d = layout.value(word, r + k as u64);
                    }
                    done += take;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::codec::{BitwiseArray, CompressedArray};
    use anyhow::Result;
    use std::fs;

    #[test]
    fn test_window_slides_and_reseeks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data: Vec<u8> = (0..=255).collect();
        fs::write(dir.path().join("seq0"), &data)?;
        let mut src = RollingFile::new(dir.path(), "seq", 1);
        src.require(0)?;

        let mut window = ByteWindow::with_capacity(32);
        assert_eq!(window.fetch(&mut src, 10, 4, 0)?, &data[10..14]);
        assert_eq!(window.start, 10);

        // slide: the tail before the request is kept
        assert_eq!(window.fetch(&mut src, 44, 4, 8)?, &data[44..48]);
        assert_eq!(window.start, 36);
        assert_eq!(window.fetch(&mut src, 38, 2, 0)?, &data[38..40]);

        // far jump and backward jump both reseek
        assert_eq!(window.fetch(&mut src, 200, 8, 0)?, &data[200..208]);
        assert_eq!(window.start, 200);
        assert_eq!(window.fetch(&mut src, 5, 8, 0)?, &data[5..13]);
        assert_eq!(window.start, 5);

        let err = window.fetch(&mut src, 250, 8, 0).expect_err("past end");
        assert!(err.is_corrupt());
        Ok(())
    }

    #[test]
    fn test_packed_reads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let values: Vec<u8> = (0..500).map(|i| (i * 7 % 5) as u8).collect();
        let mut array = BitwiseArray::new(5);
        array.add(&values);
        let mut bytes = Vec::new();
        array.write_words(&mut bytes)?;
        fs::write(dir.path().join("seq0"), bytes)?;

        let quality: Vec<u8> = (0..500).map(|i| (i * 11 % 64) as u8).collect();
        let mut array = CompressedArray::new(64);
        array.add(&quality);
        let mut bytes = Vec::new();
        array.write_words(&mut bytes)?;
        fs::write(dir.path().join("quality0"), bytes)?;

        let mut seq = RollingFile::new(dir.path(), "seq", 1);
        seq.require(0)?;
        let mut reader =
            ValueReader::with_window(Packing::Bitwise { bits: 3 }, ByteWindow::with_capacity(64));
        let mut dest = vec![0u8; 130];
        reader.read(&mut seq, 100, &mut dest)?;
        assert_eq!(dest, &values[100..230]);
        reader.read(&mut seq, 3, &mut dest[..10])?;
        assert_eq!(&dest[..10], &values[3..13]);

        let mut qual = RollingFile::new(dir.path(), "quality", 1);
        qual.require(0)?;
        let mut reader = ValueReader::new(Packing::quality_packed());
        let mut dest = vec![0u8; 77];
        reader.read(&mut qual, 423, &mut dest)?;
        assert_eq!(dest, &quality[423..]);
        Ok(())
    }
}
