//! Residue alphabets and the small enumerations recorded in a store header
//!
//! Residues are stored as small integer codes. Code 0 (and for proteins code 1)
//! denotes an unknown residue; every code below [`SequenceType::first_valid`] is
//! counted as an `N` block by the writer statistics.

use std::fmt;

/// Exclusive upper bound of stored quality values
pub const MAX_QUAL_VALUE: u8 = 64;

/// Quality values at or above [`MAX_QUAL_VALUE`] are clipped to this value
pub const CLIPPED_QUAL_VALUE: u8 = MAX_QUAL_VALUE - 1;

const DNA_SYMBOLS: &[u8; 5] = b"NACGT";
const PROTEIN_SYMBOLS: &[u8; 22] = b"X*ARNDCQEGHILKMFPSTWYV";

/// The residue alphabet of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceType {
    /// Nucleotides `N A C G T`
    #[default]
    Dna,
    /// Amino acids, with `X` (unknown) and `*` (stop)
    Protein,
}
impl SequenceType {
    /// Decodes the ordinal stored in the header
    #[must_use]
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Dna),
            1 => Some(Self::Protein),
            _ => None,
        }
    }

    /// Ordinal stored in the header
    #[must_use]
    pub fn ordinal(self) -> i32 {
        match self {
            Self::Dna => 0,
            Self::Protein => 1,
        }
    }

    /// Number of distinct residue codes
    #[must_use]
    pub fn range(self) -> u8 {
        self.symbols().len() as u8
    }

    /// The first code that denotes a known residue
    #[must_use]
    pub fn first_valid(self) -> u8 {
        match self {
            Self::Dna => 1,
            Self::Protein => 2,
        }
    }

    /// Printable symbol for each code
    #[must_use]
    pub fn symbols(self) -> &'static [u8] {
        match self {
            Self::Dna => DNA_SYMBOLS,
            Self::Protein => PROTEIN_SYMBOLS,
        }
    }

    /// Converts one ASCII residue into its code
    ///
    /// Unrecognised residues map to the unknown code 0.
    #[must_use]
    pub fn code(self, residue: u8) -> u8 {
        let upper = residue.to_ascii_uppercase();
        match self {
            Self::Dna => match upper {
                b'A' => 1,
                b'C' => 2,
                b'G' => 3,
                b'T' | b'U' => 4,
                _ => 0,
            },
            Self::Protein => PROTEIN_SYMBOLS
                .iter()
                .position(|&s| s == upper)
                .map_or(0, |p| p as u8),
        }
    }

    /// Converts ASCII residues into codes, appending to `dest`
    pub fn encode(self, residues: &[u8], dest: &mut Vec<u8>) {
        dest.extend(residues.iter().map(|&r| self.code(r)));
    }

    /// Converts codes back into ASCII residues, appending to `dest`
    ///
    /// Codes outside of the alphabet are written as the unknown symbol.
    pub fn decode(self, codes: &[u8], dest: &mut Vec<u8>) {
        let symbols = self.symbols();
        dest.extend(
            codes
                .iter()
                .map(|&c| symbols.get(c as usize).copied().unwrap_or(symbols[0])),
        );
    }
}
impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dna => write!(f, "DNA"),
            Self::Protein => write!(f, "PROTEIN"),
        }
    }
}

/// Which arm of a paired read a store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadArm {
    #[default]
    Unknown,
    Left,
    Right,
}
impl ReadArm {
    #[must_use]
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Unknown),
            1 => Some(Self::Left),
            2 => Some(Self::Right),
            _ => None,
        }
    }

    #[must_use]
    pub fn ordinal(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Left => 1,
            Self::Right => 2,
        }
    }
}

/// Sequencing technology the records originate from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadType {
    #[default]
    Unknown,
    Solexa,
    CompleteGenomics,
}
impl ReadType {
    #[must_use]
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Unknown),
            1 => Some(Self::Solexa),
            2 => Some(Self::CompleteGenomics),
            _ => None,
        }
    }

    #[must_use]
    pub fn ordinal(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Solexa => 1,
            Self::CompleteGenomics => 2,
        }
    }
}

/// On-disk layout of a value stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// One byte per value
    Raw,
    /// Bit-packed values (bit-planes for residues, radix fields for quality)
    #[default]
    Packed,
}
impl Encoding {
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Raw),
            1 => Some(Self::Packed),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Packed => 1,
        }
    }
}

/// Clips quality values in place to the storable maximum
pub fn clip_quality(quality: &mut [u8]) {
    for q in quality.iter_mut() {
        if *q > CLIPPED_QUAL_VALUE {
            *q = CLIPPED_QUAL_VALUE;
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_dna_codes() {
        let mut codes = Vec::new();
        SequenceType::Dna.encode(b"ACGTNacgtx", &mut codes);
        assert_eq!(codes, vec![1, 2, 3, 4, 0, 1, 2, 3, 4, 0]);

        let mut back = Vec::new();
        SequenceType::Dna.decode(&codes, &mut back);
        assert_eq!(back, b"ACGTNACGTN");
    }

    #[test]
    fn test_protein_codes() {
        let mut codes = Vec::new();
        SequenceType::Protein.encode(b"X*AV", &mut codes);
        assert_eq!(codes, vec![0, 1, 2, 21]);
        assert_eq!(SequenceType::Protein.range(), 22);
        assert_eq!(SequenceType::Protein.first_valid(), 2);
    }

    #[test]
    fn test_ordinals() {
        for t in [SequenceType::Dna, SequenceType::Protein] {
            assert_eq!(SequenceType::from_ordinal(t.ordinal()), Some(t));
        }
        assert_eq!(ReadArm::from_ordinal(3), None);
        assert_eq!(ReadType::from_ordinal(2), Some(ReadType::CompleteGenomics));
        assert_eq!(Encoding::from_byte(2), None);
    }

    #[test]
    fn test_clip_quality() {
        let mut q = vec![0, 40, 63, 64, 200];
        clip_quality(&mut q);
        assert_eq!(q, vec![0, 40, 63, 63, 63]);
    }
}
