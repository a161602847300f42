use auto_impl::auto_impl;

use crate::{alphabet::SequenceType, error::Result};

/// A pull-based supplier of records
///
/// Parsers of external formats implement this to feed a
/// [`SdfWriter`](crate::SdfWriter) or an in-memory reader. Residues are
/// supplied as alphabet codes, quality values as raw scores.
#[auto_impl(&mut, Box)]
pub trait SequenceSource {
    /// Advances to the next record, returning `false` once the source is exhausted
    fn next_record(&mut self) -> Result<bool>;

    /// Length of the current record
    fn current_length(&self) -> usize;

    /// Name of the current record, if the source has names
    fn name(&self) -> Option<&str>;

    /// Residue codes of the current record
    fn sequence_bytes(&self) -> &[u8];

    /// Quality values of the current record, if the source has quality data
    fn quality_bytes(&self) -> Option<&[u8]>;

    /// Alphabet of the residue codes
    fn sequence_type(&self) -> SequenceType;

    fn has_quality(&self) -> bool;
}

#[derive(Debug, Clone)]
struct VecRecord {
    name: Option<String>,
    codes: Vec<u8>,
    quality: Option<Vec<u8>>,
}

/// A [`SequenceSource`] over records held in memory
#[derive(Debug, Clone)]
pub struct VecSource {
    sequence_type: SequenceType,
    has_quality: bool,
    records: Vec<VecRecord>,
    /// One past the current record, zero before the first call to `next_record`
    position: usize,
}
impl VecSource {
    #[must_use]
    pub fn new(sequence_type: SequenceType, has_quality: bool) -> Self {
        Self {
            sequence_type,
            has_quality,
            records: Vec::new(),
            position: 0,
        }
    }

    /// Adds a record given as ASCII residues
    pub fn push(&mut self, name: Option<&str>, residues: &[u8], quality: Option<&[u8]>) {
        let mut codes = Vec::with_capacity(residues.len());
        self.sequence_type.encode(residues, &mut codes);
        self.push_codes(name, codes, quality.map(<[u8]>::to_vec));
    }

    /// Adds a record given as alphabet codes
    pub fn push_codes(&mut self, name: Option<&str>, codes: Vec<u8>, quality: Option<Vec<u8>>) {
        self.records.push(VecRecord {
            name: name.map(str::to_string),
            codes,
            quality,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Restarts iteration from the first record
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    fn current(&self) -> Option<&VecRecord> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.records.get(i))
    }
}
impl SequenceSource for VecSource {
    fn next_record(&mut self) -> Result<bool> {
        if self.position < self.records.len() {
            self.position += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn current_length(&self) -> usize {
        self.current().map_or(0, |r| r.codes.len())
    }

    fn name(&self) -> Option<&str> {
        self.current().and_then(|r| r.name.as_deref())
    }

    fn sequence_bytes(&self) -> &[u8] {
        self.current().map_or(&[][..], |r| r.codes.as_slice())
    }

    fn quality_bytes(&self) -> Option<&[u8]> {
        if self.has_quality {
            self.current().and_then(|r| r.quality.as_deref())
        } else {
            None
        }
    }

    fn sequence_type(&self) -> SequenceType {
        self.sequence_type
    }

    fn has_quality(&self) -> bool {
        self.has_quality
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_iteration() -> Result<()> {
        let mut source = VecSource::new(SequenceType::Dna, true);
        source.push(Some("r1"), b"ACGTN", Some(&[30, 31, 32, 33, 2][..]));
        source.push(None, b"", Some(&[][..]));
        assert_eq!(source.len(), 2);
        assert!(source.sequence_bytes().is_empty());

        assert!(source.next_record()?);
        assert_eq!(source.name(), Some("r1"));
        assert_eq!(source.sequence_bytes(), &[1, 2, 3, 4, 0]);
        assert_eq!(source.current_length(), 5);
        assert_eq!(source.quality_bytes(), Some(&[30u8, 31, 32, 33, 2][..]));

        assert!(source.next_record()?);
        assert_eq!(source.name(), None);
        assert_eq!(source.current_length(), 0);
        assert!(!source.next_record()?);

        source.rewind();
        let mut boxed: Box<dyn SequenceSource> = Box::new(source);
        assert!(boxed.next_record()?);
        Ok(())
    }
}
