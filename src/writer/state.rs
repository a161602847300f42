//! Running statistics and checksums of a store being written
//!
//! A [`WriterState`] is owned by one writer, mutated only by its append path and
//! turned into the header fields exactly once when the store is closed. In-memory
//! readers built from a live source use the same state to synthesize a header.

use std::sync::LazyLock;

use tracing::warn;

use crate::{
    alphabet::{SequenceType, MAX_QUAL_VALUE},
    checksum::{RecordChecksum, StreamHash},
    header::{IndexHeader, MAX_HISTOGRAM},
};

/// Probability of error for each quality score
static ERROR: LazyLock<[f64; MAX_QUAL_VALUE as usize]> = LazyLock::new(|| {
    let mut error = [0.0; MAX_QUAL_VALUE as usize];
    for (q, e) in error.iter_mut().enumerate() {
        *e = 10f64.powf(-0.1 * q as f64);
    }
    error
});

/// Fraction of nucleotide codes above which a protein store is reported as suspicious
const NOT_PROTEIN_FRACTION: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct WriterState {
    sequence_type: SequenceType,
    has_quality: bool,

    number_sequences: u64,
    total_length: u64,
    min_length: Option<u64>,
    max_length: u64,
    residue_counts: Vec<u64>,

    n_histogram: Vec<u64>,
    pos_histogram: Vec<u64>,
    n_block_count: u64,
    longest_n_block: u64,

    quality_sum: f64,
    position_quality_sums: Vec<f64>,
    position_counts: Vec<u64>,

    // record in progress
    position: u64,
    quality_position: u64,
    n_count: u64,
    n_run: u64,

    data_hash: StreamHash,
    quality_hash: StreamHash,
    data_crc: RecordChecksum,
    quality_crc: RecordChecksum,
}
impl WriterState {
    #[must_use]
    pub fn new(sequence_type: SequenceType, has_quality: bool) -> Self {
        Self {
            sequence_type,
            has_quality,
            number_sequences: 0,
            total_length: 0,
            min_length: None,
            max_length: 0,
            residue_counts: vec![0; sequence_type.range() as usize],
            n_histogram: vec![0; MAX_HISTOGRAM],
            pos_histogram: vec![0; MAX_HISTOGRAM],
            n_block_count: 0,
            longest_n_block: 0,
            quality_sum: 0.0,
            position_quality_sums: vec![0.0; MAX_HISTOGRAM],
            position_counts: vec![0; MAX_HISTOGRAM],
            position: 0,
            quality_position: 0,
            n_count: 0,
            n_run: 0,
            data_hash: StreamHash::default(),
            quality_hash: StreamHash::default(),
            data_crc: RecordChecksum::default(),
            quality_crc: RecordChecksum::default(),
        }
    }

    #[must_use]
    pub fn number_sequences(&self) -> u64 {
        self.number_sequences
    }

    #[must_use]
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn start_record(&mut self) {
        self.position = 0;
        self.quality_position = 0;
        self.n_count = 0;
        self.n_run = 0;
    }

    /// Accounts for residue codes appended to the record in progress
    pub fn update_residues(&mut self, codes: &[u8]) {
        let first_valid = self.sequence_type.first_valid();
        for &code in codes {
            self.residue_counts[code as usize] += 1;
            if code < first_valid {
                let p = (self.position as usize).min(MAX_HISTOGRAM - 1);
                self.pos_histogram[p] += 1;
                if self.n_run == 0 {
                    self.n_block_count += 1;
                }
                self.n_run += 1;
                self.n_count += 1;
            } else {
                self.longest_n_block = self.longest_n_block.max(self.n_run);
                self.n_run = 0;
            }
            self.position += 1;
        }
        self.data_hash.update(codes);
        self.data_crc.update(codes);
    }

    /// Accounts for (already clipped) quality values appended to the record in progress
    pub fn update_quality(&mut self, quality: &[u8]) {
        for &q in quality {
            let error = ERROR[q.min(MAX_QUAL_VALUE - 1) as usize];
            self.quality_sum += error;
            if let Some(p) = usize::try_from(self.quality_position)
                .ok()
                .filter(|&p| p < MAX_HISTOGRAM)
            {
                self.position_quality_sums[p] += error;
                self.position_counts[p] += 1;
            }
            self.quality_position += 1;
        }
        self.quality_hash.update(quality);
        self.quality_crc.update(quality);
    }

    /// Closes the record in progress
    ///
    /// Returns its length and the residue and quality checksum bytes.
    pub fn end_record(&mut self) -> (u64, [u8; 2]) {
        let length = self.position;
        self.longest_n_block = self.longest_n_block.max(self.n_run);
        self.n_histogram[(self.n_count as usize).min(MAX_HISTOGRAM - 1)] += 1;

        self.number_sequences += 1;
        self.total_length += length;
        self.max_length = self.max_length.max(length);
        self.min_length = Some(self.min_length.map_or(length, |m| m.min(length)));

        self.data_hash.end_record(length);
        let mut checksums = [self.data_crc.finish_record(), 0];
        if self.has_quality {
            self.quality_hash.end_record(length);
            checksums[1] = self.quality_crc.finish_record();
        }
        (length, checksums)
    }

    /// Writes the accumulated statistics and stream checksums into `header`
    pub fn finish(&self, header: &mut IndexHeader) {
        if self.sequence_type == SequenceType::Protein && self.total_length > 0 {
            let nucleotides: u64 = b"ACGTN"
                .iter()
                .map(|&r| self.residue_counts[SequenceType::Protein.code(r) as usize])
                .sum();
            if nucleotides as f64 / self.total_length as f64 >= NOT_PROTEIN_FRACTION {
                warn!(
                    "Processed as protein, but {nucleotides} of {} residues are nucleotide codes. The data may be nucleotide sequences",
                    self.total_length
                );
            }
        }

        header.sequence_type = self.sequence_type;
        header.has_quality = self.has_quality;
        header.number_sequences = self.number_sequences;
        header.total_length = self.total_length;
        header.max_length = self.max_length;
        header.min_length = self.min_length.unwrap_or(0);
        header.residue_counts.clone_from(&self.residue_counts);
        header.n_histogram.clone_from(&self.n_histogram);
        header.pos_histogram.clone_from(&self.pos_histogram);
        header.n_block_count = self.n_block_count;
        header.longest_n_block = self.longest_n_block;
        header.data_checksum = self.data_hash.value();
        if self.has_quality {
            header.global_quality_average = if self.total_length == 0 {
                0.0
            } else {
                self.quality_sum / self.total_length as f64
            };
            header.position_quality_average = self
                .position_quality_sums
                .iter()
                .zip(&self.position_counts)
                .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { 0.0 })
                .collect();
            header.quality_checksum = self.quality_hash.value();
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    fn record(state: &mut WriterState, codes: &[u8], quality: Option<&[u8]>) -> [u8; 2] {
        state.start_record();
        state.update_residues(codes);
        if let Some(q) = quality {
            state.update_quality(q);
        }
        state.end_record().1
    }

    #[test]
    fn test_lengths_and_counts() {
        let mut state = WriterState::new(SequenceType::Dna, false);
        record(&mut state, &[1, 2, 3, 4, 0], None);
        record(&mut state, &[], None);
        record(&mut state, &[4; 10], None);

        let mut header = IndexHeader::new(SequenceType::Dna);
        state.finish(&mut header);
        assert_eq!(header.number_sequences, 3);
        assert_eq!(header.total_length, 15);
        assert_eq!((header.min_length, header.max_length), (0, 10));
        assert_eq!(header.residue_counts, vec![1, 1, 1, 1, 11]);
        assert_eq!(header.residue_counts.iter().sum::<u64>(), header.total_length);
    }

    #[test]
    fn test_n_statistics() {
        let mut state = WriterState::new(SequenceType::Dna, false);
        // N blocks of length 2 and 3, the second running to the end
        record(&mut state, &[0, 0, 1, 2, 0, 0, 0], None);
        record(&mut state, &[1, 0], None);

        let mut header = IndexHeader::new(SequenceType::Dna);
        state.finish(&mut header);
        assert_eq!(header.n_block_count, 3);
        assert_eq!(header.longest_n_block, 3);
        assert_eq!(header.n_histogram[5], 1);
        assert_eq!(header.n_histogram[1], 1);
        assert_eq!(&header.pos_histogram[..7], &[1, 2, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_quality_averages() {
        let mut state = WriterState::new(SequenceType::Dna, true);
        let checksums = record(&mut state, &[1, 2], Some(&[10, 20][..]));
        assert_eq!(checksums[1], crate::checksum::record_checksum(&[10, 20]));
        record(&mut state, &[3], Some(&[10][..]));

        let mut header = IndexHeader::new(SequenceType::Dna);
        state.finish(&mut header);
        let expected = (0.1 + 0.01 + 0.1) / 3.0;
        assert!((header.global_quality_average - expected).abs() < 1e-12);
        assert!((header.position_quality_average[0] - 0.1).abs() < 1e-12);
        assert!((header.position_quality_average[1] - 0.01).abs() < 1e-12);
        assert!(header.position_quality_average[2].abs() < f64::EPSILON);
    }

    #[test]
    fn test_debug_shows_running_hash() {
        let mut state = WriterState::new(SequenceType::Dna, true);
        record(&mut state, &[1, 2, 3], Some(&[5, 6, 7][..]));
        let mut hash = StreamHash::default();
        hash.add_record(&[1, 2, 3]);
        let debug = format!("{state:?}");
        assert!(debug.contains("number_sequences: 1"));
        assert!(debug.contains(&format!("StreamHash {{ value: {} }}", hash.value())));
    }

    #[test]
    fn test_stream_hash_matches_records() {
        let mut state = WriterState::new(SequenceType::Dna, false);
        state.start_record();
        state.update_residues(&[1, 2]);
        state.update_residues(&[3]);
        state.end_record();

        let mut hash = StreamHash::default();
        hash.add_record(&[1, 2, 3]);
        let mut header = IndexHeader::new(SequenceType::Dna);
        state.finish(&mut header);
        assert_eq!(header.data_checksum, hash.value());
    }
}
