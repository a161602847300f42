use std::path::Path;

use tracing::warn;

use super::{
    files::{remove_family, RecordFiles},
    WarningLimit,
};
use crate::{
    checksum::StreamHash,
    codec::Packing,
    error::{Result, WriteError},
    files::Family,
    pointer::PointerHandler,
};

/// Longest label stored; the rest of a longer label moves to the suffix
pub const MAX_LABEL_LENGTH: usize = 240;

/// A record name split into its label and suffix
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Label {
    /// Name up to the first whitespace
    pub label: String,
    /// Remainder of the name, including the leading whitespace
    pub suffix: String,
}

/// Splits and validates record names
#[derive(Debug, Default)]
pub struct NameHandler {
    unnamed: u64,
    no_name: WarningLimit,
    too_long: WarningLimit,
}
impl NameHandler {
    /// Splits `name` on its first whitespace
    ///
    /// Empty names are replaced by `Unnamed_sequence_<k>`. Labels longer than
    /// [`MAX_LABEL_LENGTH`] are truncated, the overflow is prepended to the suffix.
    ///
    /// # Errors
    ///
    /// [`WriteError::InvalidName`] if the label has characters outside `'!'..='~'`
    /// or starts with `*`, `=` or `@`.
    pub fn handle(&mut self, name: &str) -> Result<Label> {
        let mut label;
        let mut suffix = String::new();
        if name.is_empty() {
            let mut buffer = itoa::Buffer::new();
            label = format!("Unnamed_sequence_{}", buffer.format(self.unnamed));
            self.unnamed += 1;
            if self.no_name.allow("sequences with no name") {
                warn!("Sequence with no name was assigned name \"{label}\"");
            }
        } else if let Some(split) = name.find(char::is_whitespace) {
            label = name[..split].to_string();
            suffix = name[split..].to_string();
        } else {
            label = name.to_string();
        }

        if !valid_label(&label) {
            return Err(WriteError::InvalidName(label).into());
        }
        if label.len() > MAX_LABEL_LENGTH {
            if self.too_long.allow("sequence names too long") {
                warn!("Sequence name \"{label}\" is too long and will be truncated");
            }
            suffix.insert_str(0, &label[MAX_LABEL_LENGTH..]);
            label.truncate(MAX_LABEL_LENGTH);
        }
        Ok(Label { label, suffix })
    }

    /// Number of warnings issued for unnamed and overlong names
    #[must_use]
    pub fn warnings(&self) -> (u64, u64) {
        (self.no_name.count(), self.too_long.count())
    }
}

fn valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    bytes.iter().all(|b| (b'!'..=b'~').contains(b))
        && !matches!(bytes.first(), Some(b'*' | b'=' | b'@'))
}

/// Name stream checksums and flags produced when the name files are closed
#[derive(Debug, Clone, Copy, Default)]
pub struct NameSummary {
    pub label_checksum: u64,
    pub suffix_checksum: u64,
    pub has_suffixes: bool,
}

/// Writes the label and suffix families of a store
pub struct NameWriter {
    labels: RecordFiles,
    suffixes: RecordFiles,
    label_hash: StreamHash,
    suffix_hash: StreamHash,
    has_suffixes: bool,
}
impl NameWriter {
    pub fn new(dir: &Path, limit: u64) -> Self {
        let files_for = |family: Family| {
            RecordFiles::new(
                dir,
                family,
                limit,
                PointerHandler::for_names(),
                vec![(family.data_prefix(), Packing::Raw)],
            )
        };
        Self {
            labels: files_for(Family::Label),
            suffixes: files_for(Family::Suffix),
            label_hash: StreamHash::default(),
            suffix_hash: StreamHash::default(),
            has_suffixes: false,
        }
    }

    /// Writes the name of the next record
    pub fn add(&mut self, name: &Label) -> Result<()> {
        for (files, hash, value) in [
            (&mut self.labels, &mut self.label_hash, &name.label),
            (&mut self.suffixes, &mut self.suffix_hash, &name.suffix),
        ] {
            files.start_record()?;
            files.write(&[value.as_bytes()])?;
            files.end_record([0, 0])?;
            hash.add_record(value.as_bytes());
        }
        self.has_suffixes |= !name.suffix.is_empty();
        Ok(())
    }

    /// Closes both families, removing the suffix files if no name had a suffix
    pub fn close(self, dir: &Path) -> Result<NameSummary> {
        self.labels.close()?;
        let suffix_files = self.suffixes.file_count();
        self.suffixes.close()?;
        if !self.has_suffixes {
            remove_family(dir, Family::Suffix, suffix_files)?;
        }
        Ok(NameSummary {
            label_checksum: self.label_hash.value(),
            suffix_checksum: if self.has_suffixes {
                self.suffix_hash.value()
            } else {
                0
            },
            has_suffixes: self.has_suffixes,
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_split_on_whitespace() -> Result<()> {
        let mut handler = NameHandler::default();
        let name = handler.handle("read1 extra\tstuff")?;
        assert_eq!(name.label, "read1");
        assert_eq!(name.suffix, " extra\tstuff");

        let name = handler.handle("chr1")?;
        assert_eq!(name, Label { label: "chr1".into(), suffix: String::new() });
        Ok(())
    }

    #[test]
    fn test_unnamed() -> Result<()> {
        let mut handler = NameHandler::default();
        assert_eq!(handler.handle("")?.label, "Unnamed_sequence_0");
        assert_eq!(handler.handle("")?.label, "Unnamed_sequence_1");
        assert_eq!(handler.warnings(), (2, 0));
        Ok(())
    }

    #[test]
    fn test_invalid_labels() {
        let mut handler = NameHandler::default();
        for name in ["*star", "=eq", "@at", "tab\u{7f}", "caf\u{e9}"] {
            let err = handler.handle(name).expect_err(name);
            assert!(matches!(err, crate::Error::WriteError(WriteError::InvalidName(_))));
        }
        assert!(handler.handle("a*=@").is_ok());
    }

    #[test]
    fn test_long_label_truncated() -> Result<()> {
        let mut handler = NameHandler::default();
        let long = "x".repeat(MAX_LABEL_LENGTH + 5);
        let name = handler.handle(&format!("{long} tail"))?;
        assert_eq!(name.label.len(), MAX_LABEL_LENGTH);
        assert_eq!(name.suffix, "xxxxx tail");
        assert_eq!(handler.warnings(), (0, 1));
        Ok(())
    }

    #[test]
    fn test_suffix_files_removed_when_unused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = NameWriter::new(dir.path(), 100);
        writer.add(&Label { label: "a".into(), suffix: String::new() })?;
        writer.add(&Label { label: "b".into(), suffix: String::new() })?;
        let summary = writer.close(dir.path())?;
        assert!(!summary.has_suffixes);
        assert!(dir.path().join("label0").exists());
        assert!(dir.path().join("labeldataindex").exists());
        assert!(!dir.path().join("suffix0").exists());
        assert!(!dir.path().join("suffixdataindex").exists());
        Ok(())
    }
}
