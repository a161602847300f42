use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

/// Number of values sharing one group of bit-plane words
pub const VALUES_PER_BLOCK: u64 = 64;

/// Number of bits required to represent every value in `0..range`
#[must_use]
pub fn min_bits(range: u32) -> u32 {
    if range <= 2 {
        1
    } else {
        32 - (range - 1).leading_zeros()
    }
}

/// Decodes the value at bit position `bit` from one block of bit-plane words
///
/// Word `b` of the block holds bit `bits - 1 - b` of every value in the block.
#[inline]
#[must_use]
pub fn decode_value(block: &[u64], bit: u64) -> u8 {
    block
        .iter()
        .fold(0u8, |acc, &word| (acc << 1) | ((word >> bit) & 1) as u8)
}

/// Single-field packed array of small values
///
/// Every run of 64 values is stored as `bits` consecutive words (a bit-plane per
/// value bit). The words written by [`BitwiseArray::write_words`] are exactly the
/// on-disk layout of a packed residue file, so a loaded file region can be turned
/// back into an array with [`BitwiseArray::from_words`] without decoding anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitwiseArray {
    bits: u32,
    words: Vec<u64>,
    /// Leading values of the first block that are not part of the array
    offset: u64,
    len: u64,
}
impl BitwiseArray {
    /// Creates an empty array for values in `0..range`
    #[must_use]
    pub fn new(range: u32) -> Self {
        Self::with_capacity(range, 0)
    }

    #[must_use]
    pub fn with_capacity(range: u32, values: u64) -> Self {
        let bits = min_bits(range);
        Self {
            bits,
            words: Vec::with_capacity(words_for(values, bits)),
            offset: 0,
            len: 0,
        }
    }

    /// Wraps words copied verbatim from a packed file
    ///
    /// `offset` is the number of values preceding the first wanted value within the
    /// first block of `words`, `len` the number of wanted values.
    #[must_use]
    pub fn from_words(bits: u32, words: Vec<u64>, offset: u64, len: u64) -> Self {
        debug_assert!(words.len() >= words_for(offset + len, bits));
        Self {
            bits,
            words,
            offset,
            len,
        }
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Heap bytes used by the packed words
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.words.len() * 8
    }

    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    fn block(&self, i: u64) -> usize {
        ((i / VALUES_PER_BLOCK) * u64::from(self.bits)) as usize
    }

    /// Value at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: u64) -> u8 {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        let i = index + self.offset;
        let base = self.block(i);
        decode_value(&self.words[base..base + self.bits as usize], i % VALUES_PER_BLOCK)
    }

    /// Copies `dest.len()` values starting at `index` into `dest`
    pub fn get_range(&self, index: u64, dest: &mut [u8]) {
        for (k, d) in dest.iter_mut().enumerate() {
            *d = self.get(index + k as u64);
        }
    }

    /// Overwrites the value at `index`, growing the array if needed
    pub fn set(&mut self, index: u64, value: u8) {
        let i = index + self.offset;
        let needed = words_for(i + 1, self.bits);
        if self.words.len() < needed {
            self.words.resize(needed, 0);
        }
        let base = self.block(i);
        let mask = 1u64 << (i % VALUES_PER_BLOCK);
        for b in 0..self.bits {
            let word = &mut self.words[base + b as usize];
            if (value >> (self.bits - 1 - b)) & 1 == 1 {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
        self.len = self.len.max(index + 1);
    }

    /// Appends values to the end of the array
    pub fn add(&mut self, values: &[u8]) {
        let needed = words_for(self.offset + self.len + values.len() as u64, self.bits);
        if self.words.len() < needed {
            self.words.resize(needed, 0);
        }
        for &v in values {
            self.set(self.len, v);
        }
    }

    /// Removes every value, keeping the allocation
    pub fn clear(&mut self) {
        self.words.clear();
        self.offset = 0;
        self.len = 0;
    }

    /// Writes the packed words big-endian, padding the last block with zeros
    pub fn write_words<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let used = words_for(self.offset + self.len, self.bits);
        for &word in &self.words[..used] {
            writer.write_u64::<BigEndian>(word)?;
        }
        Ok(())
    }
}

/// Number of words needed to hold `values` values of width `bits`
#[must_use]
pub fn words_for(values: u64, bits: u32) -> usize {
    (values.div_ceil(VALUES_PER_BLOCK) * u64::from(bits)) as usize
}

/// Streams values into bit-plane blocks, writing each block once it is full
#[derive(Debug)]
pub struct BitwiseEncoder {
    block: BitwiseArray,
}
impl BitwiseEncoder {
    #[must_use]
    pub fn new(range: u32) -> Self {
        Self {
            block: BitwiseArray::with_capacity(range, VALUES_PER_BLOCK),
        }
    }

    pub fn push<W: Write>(&mut self, values: &[u8], writer: &mut W) -> std::io::Result<()> {
        for &v in values {
            self.block.set(self.block.len(), v);
            if self.block.len() == VALUES_PER_BLOCK {
                self.block.write_words(writer)?;
                self.block.clear();
            }
        }
        Ok(())
    }

    /// Writes the partially filled block, if any
    pub fn finish<W: Write>(&mut self, writer: &mut W) -> std::io::Result<()> {
        if !self.block.is_empty() {
            self.block.write_words(writer)?;
            self.block.clear();
        }
        Ok(())
    }
}
