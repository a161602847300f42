//! Packed value codecs
//!
//! Two packing strategies are used for stored values:
//!
//! * [`bitwise`] - single-field bit-plane packing, `bits` words per block of 64 values.
//!   Residue codes of packed stores use it on disk and in memory.
//! * [`compressed`] - multi-field radix packing, several values per bit-field and several
//!   fields per word. Quality values of packed stores use it on disk and in memory.
//!
//! Both write their words big-endian in exactly the layout the in-memory arrays use, so a
//! packed file region can be loaded straight into an array. [`window`] holds the buffered
//! streaming decoder used by the disk reader.

pub mod bitwise;
pub mod compressed;
pub mod window;

use std::io::Write;

pub use bitwise::{min_bits, BitwiseArray, BitwiseEncoder, VALUES_PER_BLOCK};
pub use compressed::{CompressedArray, CompressedEncoder, CompressedLayout};
pub use window::{ByteWindow, ValueReader};

use crate::{
    alphabet::{Encoding, MAX_QUAL_VALUE},
    header::IndexHeader,
};

/// How the values of one file family are laid out on disk
#[derive(Debug, Clone)]
pub enum Packing {
    /// One byte per value
    Raw,
    /// Bit-plane blocks of the given width
    Bitwise { bits: u32 },
    /// Radix-composed fields
    Compressed(CompressedLayout),
}
impl Packing {
    /// Packing of the residue files of a store
    #[must_use]
    pub fn sequences(header: &IndexHeader) -> Self {
        match header.sequence_encoding {
            Encoding::Raw => Self::Raw,
            Encoding::Packed => Self::Bitwise {
                bits: min_bits(u32::from(header.sequence_type.range())),
            },
        }
    }

    /// Packing of the quality files of a store
    #[must_use]
    pub fn quality(header: &IndexHeader) -> Self {
        match header.quality_encoding {
            Encoding::Raw => Self::Raw,
            Encoding::Packed => Self::quality_packed(),
        }
    }

    #[must_use]
    pub fn quality_packed() -> Self {
        Self::Compressed(CompressedLayout::new(u32::from(MAX_QUAL_VALUE)))
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Bytes a file of `values` values occupies
    #[must_use]
    pub fn stored_bytes(&self, values: u64) -> u64 {
        match self {
            Self::Raw => values,
            Self::Bitwise { bits } => bitwise::words_for(values, *bits) as u64 * 8,
            Self::Compressed(layout) => layout.words_for(values) as u64 * 8,
        }
    }

    #[must_use]
    pub fn encoder(&self) -> ValueEncoder {
        match self {
            Self::Raw => ValueEncoder::Raw,
            Self::Bitwise { bits } => ValueEncoder::Bitwise(BitwiseEncoder::new(1 << bits)),
            Self::Compressed(layout) => {
                ValueEncoder::Compressed(CompressedEncoder::new(layout.range()))
            }
        }
    }
}

/// Streaming writer side of a [`Packing`]
#[derive(Debug)]
pub enum ValueEncoder {
    Raw,
    Bitwise(BitwiseEncoder),
    Compressed(CompressedEncoder),
}
impl ValueEncoder {
    pub fn push<W: Write>(&mut self, values: &[u8], writer: &mut W) -> std::io::Result<()> {
        match self {
            Self::Raw => writer.write_all(values),
            Self::Bitwise(encoder) => encoder.push(values, writer),
            Self::Compressed(encoder) => encoder.push(values, writer),
        }
    }

    /// Flushes a partially filled block or word
    pub fn finish<W: Write>(&mut self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Self::Raw => Ok(()),
            Self::Bitwise(encoder) => encoder.finish(writer),
            Self::Compressed(encoder) => encoder.finish(writer),
        }
    }
}

/// Read access shared by the packed in-memory arrays
pub trait PackedArray {
    /// Number of values
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `dest.len()` values starting at `index` into `dest`
    fn get_range(&self, index: u64, dest: &mut [u8]);

    /// Heap bytes used
    fn bytes(&self) -> usize;
}
impl PackedArray for BitwiseArray {
    fn len(&self) -> u64 {
        BitwiseArray::len(self)
    }

    fn get_range(&self, index: u64, dest: &mut [u8]) {
        BitwiseArray::get_range(self, index, dest);
    }

    fn bytes(&self) -> usize {
        BitwiseArray::bytes(self)
    }
}
impl PackedArray for CompressedArray {
    fn len(&self) -> u64 {
        CompressedArray::len(self)
    }

    fn get_range(&self, index: u64, dest: &mut [u8]) {
        CompressedArray::get_range(self, index, dest);
    }

    fn bytes(&self) -> usize {
        CompressedArray::bytes(self)
    }
}

/// Values held in several independently packed arrays, addressed as one sequence
///
/// Every data file is packed from its own first value, so values loaded verbatim
/// from several files keep one array per file.
#[derive(Debug, Clone)]
pub struct ChunkedArray<A> {
    /// Position of the first value of each chunk
    starts: Vec<u64>,
    chunks: Vec<A>,
    len: u64,
}
impl<A> Default for ChunkedArray<A> {
    fn default() -> Self {
        Self {
            starts: Vec::new(),
            chunks: Vec::new(),
            len: 0,
        }
    }
}
impl<A: PackedArray> ChunkedArray<A> {
    #[must_use]
    pub fn single(array: A) -> Self {
        let mut chunked = Self::default();
        chunked.push(array);
        chunked
    }

    pub fn push(&mut self, chunk: A) {
        self.starts.push(self.len);
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn number_chunks(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.chunks.iter().map(PackedArray::bytes).sum()
    }

    /// Copies `dest.len()` values starting at `index` into `dest`
    ///
    /// # Panics
    ///
    /// Panics if the requested values are out of bounds.
    pub fn get_range(&self, index: u64, dest: &mut [u8]) {
        assert!(index + dest.len() as u64 <= self.len, "range out of bounds");
        let mut c = self.starts.partition_point(|&s| s <= index).saturating_sub(1);
        let mut pos = index;
        let mut done = 0;
        while done < dest.len() {
            let chunk = &self.chunks[c];
            let within = pos - self.starts[c];
            let take = ((chunk.len() - within) as usize).min(dest.len() - done);
            chunk.get_range(within, &mut dest[done..done + take]);
            done += take;
            pos += take as u64;
            c += 1;
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::alphabet::SequenceType;

    #[test]
    fn test_packing_selection() {
        let mut header = IndexHeader::new(SequenceType::Protein);
        header.sequence_encoding = Encoding::Packed;
        header.quality_encoding = Encoding::Packed;
        assert!(matches!(
            Packing::sequences(&header),
            Packing::Bitwise { bits: 5 }
        ));
        let quality = Packing::quality(&header);
        assert_eq!(quality.stored_bytes(21), 3 * 8);

        header.sequence_encoding = Encoding::Raw;
        assert!(Packing::sequences(&header).is_raw());
        assert_eq!(Packing::Raw.stored_bytes(21), 21);
        assert_eq!(Packing::Bitwise { bits: 3 }.stored_bytes(65), 2 * 3 * 8);
    }

    #[test]
    fn test_encoders_match_packing() {
        let values: Vec<u8> = (0..100).map(|i| (i % 5) as u8).collect();
        for packing in [Packing::Raw, Packing::Bitwise { bits: 3 }, Packing::quality_packed()] {
            let mut out = Vec::new();
            let mut encoder = packing.encoder();
            encoder.push(&values, &mut out).unwrap();
            encoder.finish(&mut out).unwrap();
            assert_eq!(out.len() as u64, packing.stored_bytes(100));
        }
    }

    #[test]
    fn test_chunked_reads_cross_chunks() {
        let values: Vec<u8> = (0..200).map(|i| (i % 5) as u8).collect();
        let mut chunked = ChunkedArray::default();
        for part in [&values[..70], &values[70..70], &values[70..150], &values[150..]] {
            let mut array = BitwiseArray::new(5);
            array.add(part);
            chunked.push(array);
        }
        assert_eq!(chunked.len(), 200);
        assert_eq!(chunked.number_chunks(), 4);

        let mut dest = vec![0u8; 100];
        chunked.get_range(60, &mut dest);
        assert_eq!(dest, &values[60..160]);
        chunked.get_range(0, &mut dest[..0]);

        let mut single = ChunkedArray::single(CompressedArray::new(64));
        assert!(single.is_empty());
        let mut quality = CompressedArray::new(64);
        quality.add(&[40, 41, 42]);
        single.push(quality);
        let mut dest = [0u8; 2];
        single.get_range(1, &mut dest);
        assert_eq!(dest, [41, 42]);
    }
}
