//! # sdfstore
//!
//! A persistent, random-access store for large collections of biological sequences.
//!
//! A store is a directory holding a versioned header (`index`), numbered data files
//! for residues, quality values and names that roll over at a size limit, pointer
//! files giving every record's offset and checksum, and data-file indexes that map
//! record ids to data files.
//!
//! Stores are written once, sequentially, by an [`SdfWriter`] and read by either
//! of two [`SequenceStore`] implementations:
//!
//! - [`DefaultReader`] streams records from disk with bounded memory
//! - [`MemoryReader`] loads a region of the store into packed in-memory arrays,
//!   copying the on-disk packing directly when possible
//!
//! ```no_run
//! use sdfstore::{DefaultReader, Result, SdfWriterBuilder, SequenceStore, SequenceType};
//!
//! # fn main() -> Result<()> {
//! let mut writer = SdfWriterBuilder::default()
//!     .sequence_type(SequenceType::Dna)
//!     .build("reads.sdf")?;
//! let mut codes = Vec::new();
//! SequenceType::Dna.encode(b"ACGTN", &mut codes);
//! writer.write_record(Some("read1 first"), &codes, None)?;
//! writer.close()?;
//!
//! let mut reader = DefaultReader::open("reads.sdf")?;
//! assert_eq!(reader.length(0)?, 5);
//! assert_eq!(reader.full_name(0)?, "read1 first");
//! # Ok(())
//! # }
//! ```

/// Residue alphabets, quality clipping and header enumerations
pub mod alphabet;

/// Per-record and per-stream checksums
pub mod checksum;

/// Bit-packed value codecs
pub mod codec;

/// The versioned store header
pub mod header;

/// Parallel processing of store records
pub mod parallel;

mod data_index;
mod error;
mod files;
mod pointer;
mod reader;
mod region;
mod rolling;
mod source;
mod store;
mod writer;

pub use alphabet::{Encoding, ReadArm, ReadType, SequenceType};
pub use error::{CorruptError, Error, HeaderError, ReadError, Result, WriteError};
pub use header::{IndexHeader, SdfId};
pub use parallel::{ParallelProcessor, ParallelReader};
pub use reader::{DefaultReader, MemoryOptions, MemoryReader, PrereadNames};
pub use region::Region;
pub use source::{SequenceSource, VecSource};
pub use store::SequenceStore;
pub use writer::{SdfWriter, SdfWriterBuilder, WriterState};

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{
        data_index::DataFileIndex,
        files::{numbered, Family},
    };
    use anyhow::Result;
    use std::{fs, path::Path};

    /// Rewrites a raw store in the shape of format `version`: count-only data-file
    /// indexes and pointer entries without checksum bytes
    fn downgrade(dir: &Path, version: u64) -> Result<()> {
        let header = IndexHeader::load(dir)?;
        let width = header.checksum_width();
        for family in [Family::Sequence, Family::Label] {
            let index = DataFileIndex::load(dir, family, &header)?;
            let mut bytes = Vec::new();
            index.write_bytes(&mut bytes, false)?;
            fs::write(dir.join(family.index_name()), bytes)?;
            if family == Family::Sequence {
                for n in 0..index.number_entries() {
                    let path = numbered(dir, family.pointer_prefix(), n);
                    let entries: Vec<u8> = fs::read(&path)?
                        .chunks_exact(width + 4)
                        .flat_map(|entry| entry[width..].to_vec())
                        .collect();
                    fs::write(&path, entries)?;
                }
            }
        }
        let mut bytes = Vec::new();
        header.write_versioned(&mut bytes, version)?;
        fs::write(dir.join("index"), bytes)?;
        Ok(())
    }

    #[test]
    fn test_legacy_store_is_readable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default()
            .size_limit(50)
            .quality(true)
            .encoding(Encoding::Raw)
            .build(dir.path())?;
        let records: Vec<(Vec<u8>, Vec<u8>)> = (0..40u64)
            .map(|i| {
                let len = (i * 7) % 45;
                let codes = (0..len).map(|j| ((i + j) % 5) as u8).collect();
                let quality = (0..len).map(|j| ((i * j) % 60) as u8).collect();
                (codes, quality)
            })
            .collect();
        for (i, (codes, quality)) in records.iter().enumerate() {
            writer.write_record(Some(&format!("r{i}")), codes, Some(quality))?;
        }
        writer.close()?;
        downgrade(dir.path(), 8)?;

        let header = IndexHeader::load(dir.path())?;
        assert_eq!(header.version, 8);
        assert!(!header.has_data_sizes());
        assert_eq!(header.checksum_width(), 0);

        check_legacy(&mut DefaultReader::open(dir.path())?, &records, 0)?;
        check_legacy(&mut MemoryReader::open(dir.path())?, &records, 0)?;
        check_legacy(
            &mut DefaultReader::open_region(dir.path(), 13..31)?,
            &records[13..31],
            13,
        )?;
        Ok(())
    }

    fn check_legacy<S: SequenceStore>(
        store: &mut S,
        records: &[(Vec<u8>, Vec<u8>)],
        first: usize,
    ) -> Result<()> {
        assert_eq!(store.number_records(), records.len() as u64);
        for (id, (codes, quality)) in records.iter().enumerate() {
            assert_eq!(&store.read_vec(id as u64)?, codes, "record {id}");
            assert_eq!(&store.read_quality_vec(id as u64)?, quality, "record {id}");
            assert_eq!(store.name(id as u64)?, format!("r{}", first + id));
        }
        Ok(())
    }

    #[test]
    fn test_three_record_example() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SdfWriterBuilder::default().size_limit(10).build(dir.path())?;
        let mut codes = Vec::new();
        for residues in [&b"ACGTN"[..], b"", b"TTTTTTTTTT"] {
            codes.clear();
            SequenceType::Dna.encode(residues, &mut codes);
            writer.write_record(None, &codes, None)?;
        }
        let header = writer.close()?;
        assert_eq!(header.number_sequences, 3);
        assert!(dir.path().join("seq0").exists());
        assert!(dir.path().join("seq1").exists());
        assert!(!dir.path().join("seq2").exists());

        let mut reader = DefaultReader::open(dir.path())?;
        assert_eq!(reader.number_records(), 3);
        assert_eq!(reader.length(0)?, 5);
        assert_eq!(reader.length(1)?, 0);
        assert_eq!(reader.length(2)?, 10);

        let mut residues = Vec::new();
        SequenceType::Dna.decode(&reader.read_vec(0)?, &mut residues);
        assert_eq!(residues, b"ACGTN");
        assert_eq!(reader.name(1)?, "Unnamed_sequence_1");
        Ok(())
    }
}
