//! File names of a store directory

use std::path::{Path, PathBuf};

/// Prefix of the numbered quality data files
pub const QUALITY_PREFIX: &str = "quality";

/// One family of rolling files holding a record stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Residue codes (and, sharing its index and pointers, quality values)
    Sequence,
    /// Name labels
    Label,
    /// Name suffixes
    Suffix,
}
impl Family {
    #[must_use]
    pub fn data_prefix(self) -> &'static str {
        match self {
            Self::Sequence => "seq",
            Self::Label => "label",
            Self::Suffix => "suffix",
        }
    }

    #[must_use]
    pub fn pointer_prefix(self) -> &'static str {
        match self {
            Self::Sequence => "seqpointer",
            Self::Label => "labelpointer",
            Self::Suffix => "suffixpointer",
        }
    }

    #[must_use]
    pub fn index_name(self) -> &'static str {
        match self {
            Self::Sequence => "seqdataindex",
            Self::Label => "labeldataindex",
            Self::Suffix => "suffixdataindex",
        }
    }

    /// Short name used in logs and checksum errors
    #[must_use]
    pub fn stream_name(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Label => "label",
            Self::Suffix => "suffix",
        }
    }
}

/// Path of numbered file `n` with the given prefix, e.g. `seq3`
#[must_use]
pub fn numbered(dir: &Path, prefix: &str, n: u32) -> PathBuf {
    let mut buffer = itoa::Buffer::new();
    let mut name = String::with_capacity(prefix.len() + 4);
    name.push_str(prefix);
    name.push_str(buffer.format(n));
    dir.join(name)
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_numbered_names() {
        let dir = Path::new("/store");
        assert_eq!(
            numbered(dir, Family::Sequence.data_prefix(), 0),
            PathBuf::from("/store/seq0")
        );
        assert_eq!(
            numbered(dir, Family::Label.pointer_prefix(), 12),
            PathBuf::from("/store/labelpointer12")
        );
        assert_eq!(
            numbered(dir, QUALITY_PREFIX, 7),
            PathBuf::from("/store/quality7")
        );
    }
}
