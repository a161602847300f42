use std::{io::Write, sync::Arc};

use byteorder::{BigEndian, WriteBytesExt};

use super::bitwise::min_bits;

/// Field arrangement of a multi-field packed word
///
/// Several values are combined into one bit-field by radix composition
/// (`field = v0 + v1 * range + v2 * range^2 ...`), and as many fields as fit are
/// packed into each 64-bit word. Unpacking is a shift, a mask and a table lookup.
#[derive(Debug, Clone)]
pub struct CompressedLayout {
    range: u32,
    /// Width of one bit-field
    bits: u32,
    /// Values composed into one bit-field
    per_field: u32,
    fields_per_word: u32,
    mask: u64,
    /// `range^k` for every position within a field
    powers: Arc<[u64]>,
    /// `table[within * field_values + field]` is the value at `within` of `field`
    table: Arc<[u8]>,
    field_values: usize,
}
impl CompressedLayout {
    #[must_use]
    pub fn new(range: u32) -> Self {
        let (per_field, bits) = match range {
            5 => (3, 7),
            22 => (2, 9),
            _ => (1, min_bits(range)),
        };
        let powers: Vec<u64> = (0..=per_field).map(|k| u64::from(range).pow(k)).collect();
        let field_values = powers[per_field as usize] as usize;
        let mut table = vec![0u8; per_field as usize * field_values];
        for within in 0..per_field as usize {
            for field in 0..field_values {
                table[within * field_values + field] =
                    (field as u64 / powers[within] % u64::from(range)) as u8;
            }
        }
        Self {
            range,
            bits,
            per_field,
            fields_per_word: 64 / bits,
            mask: (1u64 << bits) - 1,
            powers: powers.into(),
            table: table.into(),
            field_values,
        }
    }

    #[must_use]
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Values stored in one 64-bit word
    #[must_use]
    pub fn per_word(&self) -> u64 {
        u64::from(self.per_field * self.fields_per_word)
    }

    /// Words needed for `values` values
    #[must_use]
    pub fn words_for(&self, values: u64) -> usize {
        values.div_ceil(self.per_word()) as usize
    }

    fn split(&self, r: u64) -> (u64, usize) {
        let field = r / u64::from(self.per_field);
        let within = (r % u64::from(self.per_field)) as usize;
        (field * u64::from(self.bits), within)
    }

    /// Value number `r` (within the word) of `word`
    #[inline]
    #[must_use]
    pub fn value(&self, word: u64, r: u64) -> u8 {
        let (shift, within) = self.split(r);
        let field = ((word >> shift) & self.mask) as usize;
        self.table[within * self.field_values + field]
    }

    /// Replaces value number `r` of `word` with `v`
    #[inline]
    pub fn compose(&self, word: &mut u64, r: u64, v: u8) {
        let (shift, within) = self.split(r);
        let old = u64::from(self.value(*word, r));
        let field = (*word >> shift) & self.mask;
        let field = field - old * self.powers[within] + u64::from(v) * self.powers[within];
        *word = (*word & !(self.mask << shift)) | (field << shift);
    }
}

/// Multi-field packed array of small values
///
/// Denser than [`super::BitwiseArray`] for alphabets whose size is not a power of
/// two (three 5-symbol values share 7 bits). Used for quality data on disk and in
/// memory; the words written by [`CompressedArray::write_words`] are the on-disk layout.
#[derive(Debug, Clone)]
pub struct CompressedArray {
    layout: CompressedLayout,
    words: Vec<u64>,
    offset: u64,
    len: u64,
}
impl CompressedArray {
    #[must_use]
    pub fn new(range: u32) -> Self {
        Self::with_layout(CompressedLayout::new(range))
    }

    #[must_use]
    pub fn with_layout(layout: CompressedLayout) -> Self {
        Self {
            layout,
            words: Vec::new(),
            offset: 0,
            len: 0,
        }
    }

    /// Wraps words copied verbatim from a packed file
    #[must_use]
    pub fn from_words(layout: CompressedLayout, words: Vec<u64>, offset: u64, len: u64) -> Self {
        debug_assert!(words.len() >= layout.words_for(offset + len));
        Self {
            layout,
            words,
            offset,
            len,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &CompressedLayout {
        &self.layout
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
    pub fn bytes(&self) -> usize {
        self.words.len() * 8
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
        let per_word = self.layout.per_word();
        self.layout
            .value(self.words[(i / per_word) as usize], i % per_word)
    }

    pub fn get_range(&self, index: u64, dest: &mut [u8]) {
        for (k, d) in dest.iter_mut().enumerate() {
            *d = self.get(index + k as u64);
        }
    }

    pub fn set(&mut self, index: u64, value: u8) {
        let i = index + self.offset;
        let per_word = self.layout.per_word();
        let w = (i / per_word) as usize;
        if self.words.len() <= w {
            self.words.resize(w + 1, 0);
        }
        self.layout.compose(&mut self.words[w], i % per_word, value);
        self.len = self.len.max(index + 1);
    }

    pub fn add(&mut self, values: &[u8]) {
        for &v in values {
            self.set(self.len, v);
        }
    }

    pub fn clear(&mut self) {
        self.words.clear();
        self.offset = 0;
        self.len = 0;
    }

    pub fn write_words<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let used = self.layout.words_for(self.offset + self.len);
        for &word in &self.words[..used] {
            writer.write_u64::<BigEndian>(word)?;
        }
        Ok(())
    }
}

/// Streams values into multi-field words, writing each word once it is full
#[derive(Debug)]
pub struct CompressedEncoder {
    word: CompressedArray,
}
impl CompressedEncoder {
    #[must_use]
    pub fn new(range: u32) -> Self {
        Self {
            word: CompressedArray::new(range),
        }
    }

    pub fn push<W: Write>(&mut self, values: &[u8], writer: &mut W) -> std::io::Result<()> {
        let per_word = self.word.layout().per_word();
        for &v in values {
            self.word.set(self.word.len(), v);
            if self.word.len() == per_word {
                self.word.write_words(writer)?;
                self.word.clear();
            }
        }
        Ok(())
    }

    pub fn finish<W: Write>(&mut self, writer: &mut W) -> std::io::Result<()> {
        if !self.word.is_empty() {
            self.word.write_words(writer)?;
            self.word.clear();
        }
        Ok(())
    }
}
