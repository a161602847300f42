//! Checksums guarding records, value streams and the header
//!
//! * Per-record checksums are the low byte of a CRC32 over the record values.
//! * Stream checksums are an xxh64 over every record's values followed by its length.

use std::fmt;

use xxhash_rust::xxh64::Xxh64;

/// Computes the one-byte checksum stored alongside a record pointer
#[must_use]
pub fn record_checksum(values: &[u8]) -> u8 {
    crc32fast::hash(values) as u8
}

/// Incremental per-record checksum for records written in pieces
#[derive(Debug, Clone, Default)]
pub struct RecordChecksum {
    inner: crc32fast::Hasher,
}
impl RecordChecksum {
    pub fn update(&mut self, values: &[u8]) {
        self.inner.update(values);
    }

    /// Returns the checksum byte and resets for the next record
    pub fn finish_record(&mut self) -> u8 {
        let byte = self.inner.clone().finalize() as u8;
        self.inner.reset();
        byte
    }
}

/// Running hash over a whole value stream
#[derive(Clone)]
pub struct StreamHash {
    inner: Xxh64,
}
impl fmt::Debug for StreamHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHash")
            .field("value", &self.value())
            .finish()
    }
}
impl Default for StreamHash {
    fn default() -> Self {
        Self {
            inner: Xxh64::new(0),
        }
    }
}
impl StreamHash {
    /// Adds part of the current record's values
    pub fn update(&mut self, values: &[u8]) {
        self.inner.update(values);
    }

    /// Closes the current record by folding in its length
    pub fn end_record(&mut self, length: u64) {
        self.inner.update(&length.to_be_bytes());
    }

    /// Adds a complete record
    pub fn add_record(&mut self, values: &[u8]) {
        self.update(values);
        self.end_record(values.len() as u64);
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.inner.digest()
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_record_checksum_pieces() {
        let mut c = RecordChecksum::default();
        c.update(b"\x01\x02");
        c.update(b"\x03\x04");
        assert_eq!(c.finish_record(), record_checksum(b"\x01\x02\x03\x04"));
        // reset after each record
        c.update(b"\x01");
        assert_eq!(c.finish_record(), record_checksum(b"\x01"));
    }

    #[test]
    fn test_stream_hash_depends_on_boundaries() {
        let mut a = StreamHash::default();
        a.add_record(b"AC");
        a.add_record(b"GT");

        let mut b = StreamHash::default();
        b.add_record(b"ACG");
        b.add_record(b"T");
        assert_ne!(a.value(), b.value());

        let mut c = StreamHash::default();
        c.update(b"A");
        c.update(b"C");
        c.end_record(2);
        c.add_record(b"GT");
        assert_eq!(a.value(), c.value());
    }
}
