//! In-memory reader
//!
//! A [`MemoryReader`] holds the residues of a region in packed arrays. Two ways of
//! filling them exist:
//!
//! * **direct** - the packed words of each data file are mapped and copied verbatim.
//!   Only the first file of a region starts part way into a block; the array keeps
//!   that offset instead of repacking.
//! * **recompress** - values are decoded from the data files (or pulled from a
//!   [`SequenceSource`]) and packed again.
//!
//! Quality values are loaded on first use. Clones of a reader share every array,
//! including the quality array that a clone may load on behalf of the others.

use std::{
    ops::Range,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    layout::{FileSpan, RegionLayout},
    names::PrereadNames,
};
use crate::{
    alphabet::{clip_quality, Encoding, MAX_QUAL_VALUE},
    checksum::StreamHash,
    codec::{
        bitwise::words_for, BitwiseArray, ChunkedArray, CompressedArray, CompressedLayout,
        PackedArray, Packing, ValueReader, VALUES_PER_BLOCK,
    },
    data_index::DataFileIndex,
    error::{CorruptError, ReadError, Result, WriteError},
    files::{Family, QUALITY_PREFIX},
    header::IndexHeader,
    pointer::PointerHandler,
    region::Region,
    rolling::RollingFile,
    source::SequenceSource,
    store::{check_id, check_id_range, check_request, SampledCheck, SequenceStore},
    writer::{NameHandler, WriterState},
};

/// Values decoded per read while recompressing
const RECOMPRESS_CHUNK: usize = 1 << 20;

/// Settings of a [`MemoryReader`] opened from disk
#[derive(Debug, Clone, Copy)]
pub struct MemoryOptions {
    region: Region,
    load_names: bool,
    load_full_names: bool,
    direct: bool,
}
impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            region: Region::NONE,
            load_names: true,
            load_full_names: false,
            direct: true,
        }
    }
}
impl MemoryOptions {
    /// Restricts the reader to the records of `region`
    #[must_use]
    pub fn region(mut self, region: impl Into<Region>) -> Self {
        self.region = region.into();
        self
    }

    /// Loads the labels of the region (default `true`)
    #[must_use]
    pub fn load_names(mut self, load_names: bool) -> Self {
        self.load_names = load_names;
        self
    }

    /// Also loads the name suffixes (default `false`)
    #[must_use]
    pub fn load_full_names(mut self, load_full_names: bool) -> Self {
        self.load_full_names = load_full_names;
        self
    }

    /// Copies packed files verbatim when possible (default `true`)
    #[must_use]
    pub fn direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }
}

/// Quality files of a region, read when first needed
#[derive(Debug)]
struct QualityFiles {
    dir: PathBuf,
    files: u32,
    packing: Packing,
    spans: Vec<FileSpan>,
    direct: bool,
    /// Expected stream checksum, when the region covers the whole store
    verify: Option<u64>,
}

/// Quality array initialized at most once, shared by every clone of a reader
#[derive(Debug)]
struct LazyQuality {
    cell: OnceLock<ChunkedArray<CompressedArray>>,
    lock: Mutex<()>,
    files: Option<QualityFiles>,
}
impl LazyQuality {
    fn ready(quality: ChunkedArray<CompressedArray>) -> Self {
        Self {
            cell: OnceLock::from(quality),
            lock: Mutex::new(()),
            files: None,
        }
    }

    fn deferred(files: QualityFiles) -> Self {
        Self {
            cell: OnceLock::new(),
            lock: Mutex::new(()),
            files: Some(files),
        }
    }

    fn get(&self, positions: &[u64]) -> Result<&ChunkedArray<CompressedArray>> {
        if let Some(quality) = self.cell.get() {
            return Ok(quality);
        }
        let _guard = self.lock.lock();
        if let Some(quality) = self.cell.get() {
            return Ok(quality);
        }
        let files = self.files.as_ref().ok_or(ReadError::NoQuality)?;
        let quality = if files.direct {
            let Packing::Compressed(layout) = &files.packing else {
                return Err(ReadError::NoQuality.into());
            };
            direct_quality(&files.dir, files.files, layout, &files.spans)?
        } else {
            let mut array = CompressedArray::new(u32::from(MAX_QUAL_VALUE));
            decode_spans(
                &files.dir,
                QUALITY_PREFIX,
                files.files,
                &files.packing,
                &files.spans,
                |values| array.add(values),
            )?;
            ChunkedArray::single(array)
        };
        if let Some(expected) = files.verify {
            verify_stream(&quality, positions, expected, &files.dir, "quality")?;
        }
        debug!(
            "Loaded quality data of {:?}: {} values in {} bytes",
            files.dir,
            quality.len(),
            quality.bytes()
        );
        Ok(self.cell.get_or_init(|| quality))
    }
}

/// Random access to a region of a store held in memory
///
/// Cloning is cheap: clones share the loaded arrays.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    dir: Option<PathBuf>,
    header: Arc<IndexHeader>,
    region: Range<u64>,
    /// `positions[i]..positions[i + 1]` are the values of record `i`
    positions: Arc<[u64]>,
    residues: Arc<ChunkedArray<BitwiseArray>>,
    checksums: Arc<[[u8; 2]]>,
    quality: Option<Arc<LazyQuality>>,
    labels: Option<Arc<PrereadNames>>,
    suffixes: Option<Arc<PrereadNames>>,
    checks: SampledCheck,
    quality_checks: SampledCheck,
}
impl MemoryReader {
    /// Loads the store in `dir` with default options
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with(dir, MemoryOptions::default())
    }

    /// Loads the store in `dir`
    ///
    /// # Errors
    ///
    /// Besides the errors of opening a store, [`CorruptError::StreamChecksum`] if the
    /// region covers the whole store and a loaded stream fails its checksum.
    pub fn open_with<P: AsRef<Path>>(dir: P, options: MemoryOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let header = IndexHeader::load(dir)?;
        let region = options.region.resolve(header.number_sequences)?;
        let whole = region.start == 0 && region.end == header.number_sequences;
        let verify = whole && header.has_stream_checksums();

        let index = DataFileIndex::load(dir, Family::Sequence, &header)?;
        let files = index.number_entries();
        let mut pointers = RollingFile::new(dir, Family::Sequence.pointer_prefix(), files);
        let layout = RegionLayout::load(
            &mut pointers,
            &index,
            PointerHandler::for_sequences(&header),
            region.clone(),
        )?;
        pointers.close();

        let packed = header.sequence_encoding == Encoding::Packed;
        if options.direct && !packed {
            warn!("Store {:?} is not packed, loading it by recompression", dir);
        }
        let direct = options.direct && packed;
        let packing = Packing::sequences(&header);
        let residues = match &packing {
            Packing::Bitwise { bits } if direct => direct_residues(dir, files, *bits, &layout.spans)?,
            _ => {
                let mut array = BitwiseArray::with_capacity(
                    u32::from(header.sequence_type.range()),
                    layout.total(),
                );
                decode_spans(
                    dir,
                    Family::Sequence.data_prefix(),
                    files,
                    &packing,
                    &layout.spans,
                    |values| array.add(values),
                )?;
                ChunkedArray::single(array)
            }
        };
        if verify {
            verify_stream(&residues, &layout.positions, header.data_checksum, dir, "sequence")?;
        }

        let quality = header.has_quality.then(|| {
            Arc::new(LazyQuality::deferred(QualityFiles {
                dir: dir.to_path_buf(),
                files,
                packing: Packing::quality(&header),
                spans: layout.spans.clone(),
                direct: options.direct && header.quality_encoding == Encoding::Packed,
                verify: verify.then_some(header.quality_checksum),
            }))
        });

        let load_names = |family: Family, expected: u64| -> Result<Arc<PrereadNames>> {
            let names = PrereadNames::load(dir, family, &header, region.clone())?;
            if verify {
                let found = names.checksum();
                if found != expected {
                    return Err(CorruptError::StreamChecksum {
                        path: dir.to_path_buf(),
                        stream: family.stream_name(),
                        expected,
                        found,
                    }
                    .into());
                }
            }
            Ok(Arc::new(names))
        };
        let labels = (header.has_names && options.load_names)
            .then(|| load_names(Family::Label, header.name_checksum))
            .transpose()?;
        let suffixes = (header.has_names && header.has_suffixes && options.load_full_names)
            .then(|| load_names(Family::Suffix, header.suffix_checksum))
            .transpose()?;

        let reader = Self {
            dir: Some(dir.to_path_buf()),
            header: Arc::new(header),
            region,
            positions: layout.positions.into(),
            residues: Arc::new(residues),
            checksums: layout.checksums.into(),
            quality,
            labels,
            suffixes,
            checks: SampledCheck::default(),
            quality_checks: SampledCheck::default(),
        };
        reader.log_memory_usage();
        Ok(reader)
    }

    /// Builds a reader from the records `region` of a source
    ///
    /// The source is read once; its record count need not be known in advance.
    /// Residues are recompressed and a header is computed from the records.
    pub fn from_source<S: SequenceSource>(mut source: S, region: impl Into<Region>) -> Result<Self> {
        let region = region.into();
        let sequence_type = source.sequence_type();
        let has_quality = source.has_quality();
        let range = u32::from(sequence_type.range());
        let start = region.start.unwrap_or(0);

        let mut state = WriterState::new(sequence_type, has_quality);
        let mut residues = BitwiseArray::new(range);
        let mut quality = has_quality.then(|| CompressedArray::new(u32::from(MAX_QUAL_VALUE)));
        let mut positions = vec![0];
        let mut checksums = Vec::new();
        let mut handler = NameHandler::default();
        let mut labels = PrereadNames::default();
        let mut suffixes = PrereadNames::default();
        let mut has_suffixes = false;
        let mut clipped = Vec::new();

        let mut count = 0;
        while region.end.is_none_or(|end| count < end) && source.next_record()? {
            count += 1;
            if count <= start {
                continue;
            }
            let codes = source.sequence_bytes();
            if let Some(&code) = codes.iter().find(|&&c| u32::from(c) >= range) {
                return Err(WriteError::InvalidCode {
                    code,
                    range: range as u8,
                }
                .into());
            }
            state.start_record();
            state.update_residues(codes);
            residues.add(codes);
            if let Some(array) = quality.as_mut() {
                let values = source.quality_bytes().unwrap_or_default();
                if values.len() != codes.len() {
                    return Err(WriteError::QualityMismatch {
                        expected: true,
                        residues: codes.len(),
                        quality: values.len(),
                    }
                    .into());
                }
                clipped.clear();
                clipped.extend_from_slice(values);
                clip_quality(&mut clipped);
                state.update_quality(&clipped);
                array.add(&clipped);
            }
            let name = handler.handle(source.name().unwrap_or_default())?;
            labels.push(&name.label);
            suffixes.push(&name.suffix);
            has_suffixes |= !name.suffix.is_empty();

            let (length, record_checksums) = state.end_record();
            positions.push(positions[positions.len() - 1] + length);
            checksums.push(record_checksums);
        }
        // validates the region against the records actually seen
        let resolved = region.resolve(count)?;

        let mut header = IndexHeader::new(sequence_type);
        header.sequence_encoding = Encoding::Packed;
        header.quality_encoding = Encoding::Packed;
        state.finish(&mut header);
        header.has_suffixes = has_suffixes;
        header.name_checksum = labels.checksum();
        if header.has_suffixes {
            header.suffix_checksum = suffixes.checksum();
        }

        let reader = Self {
            dir: None,
            header: Arc::new(header),
            region: 0..resolved.end - resolved.start,
            positions: positions.into(),
            residues: Arc::new(ChunkedArray::single(residues)),
            checksums: checksums.into(),
            quality: quality.map(|q| Arc::new(LazyQuality::ready(ChunkedArray::single(q)))),
            labels: Some(Arc::new(labels)),
            suffixes: Some(Arc::new(suffixes)),
            checks: SampledCheck::default(),
            quality_checks: SampledCheck::default(),
        };
        reader.log_memory_usage();
        Ok(reader)
    }

    /// Directory the reader was loaded from, `None` for readers built from a source
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Global ids of the loaded records
    #[must_use]
    pub fn region(&self) -> Range<u64> {
        self.region.clone()
    }

    /// Number of independently packed residue chunks (one per data file of the region)
    #[must_use]
    pub fn number_chunks(&self) -> usize {
        self.residues.number_chunks()
    }

    /// Whether the quality data has been loaded
    #[must_use]
    pub fn quality_loaded(&self) -> bool {
        self.quality
            .as_ref()
            .is_some_and(|q| q.cell.get().is_some())
    }

    /// Heap bytes held by the loaded arrays
    #[must_use]
    pub fn bytes(&self) -> usize {
        let names = [&self.labels, &self.suffixes]
            .into_iter()
            .flatten()
            .map(|n| n.bytes())
            .sum::<usize>();
        let quality = self
            .quality
            .as_ref()
            .and_then(|q| q.cell.get())
            .map_or(0, ChunkedArray::bytes);
        self.residues.bytes()
            + self.positions.len() * size_of::<u64>()
            + self.checksums.len() * 2
            + quality
            + names
    }

    fn log_memory_usage(&self) {
        debug!(
            "Memory usage: residues {} bytes for {} values, positions {} bytes, names {} bytes, total {} bytes",
            self.residues.bytes(),
            self.residues.len(),
            self.positions.len() * size_of::<u64>(),
            [&self.labels, &self.suffixes]
                .into_iter()
                .flatten()
                .map(|n| n.bytes())
                .sum::<usize>(),
            self.bytes()
        );
    }

    fn bounds(&self, id: u64) -> (u64, u64) {
        let start = self.positions[id as usize];
        (start, self.positions[id as usize + 1] - start)
    }
}

impl SequenceStore for MemoryReader {
    fn header(&self) -> &IndexHeader {
        &self.header
    }

    fn number_records(&self) -> u64 {
        self.region.end - self.region.start
    }

    fn length(&mut self, id: u64) -> Result<u64> {
        check_id(id, self.number_records())?;
        Ok(self.bounds(id).1)
    }

    fn read_range(&mut self, id: u64, dest: &mut [u8], start: u64, len: u64) -> Result<usize> {
        check_id(id, self.number_records())?;
        let (position, length) = self.bounds(id);
        check_request(length, start, len, dest.len())?;
        let values = &mut dest[..len as usize];
        self.residues.get_range(position + start, values);
        if start == 0 && len == length && self.header.has_record_checksums() {
            self.checks
                .check(id, "sequence", values, self.checksums[id as usize][0])?;
        }
        Ok(len as usize)
    }

    fn read_quality_range(
        &mut self,
        id: u64,
        dest: &mut [u8],
        start: u64,
        len: u64,
    ) -> Result<usize> {
        check_id(id, self.number_records())?;
        let lazy = self.quality.as_ref().ok_or(ReadError::NoQuality)?;
        let quality = lazy.get(&self.positions)?;
        let (position, length) = self.bounds(id);
        check_request(length, start, len, dest.len())?;
        let values = &mut dest[..len as usize];
        quality.get_range(position + start, values);
        if start == 0 && len == length && self.header.has_record_checksums() {
            self.quality_checks
                .check(id, "quality", values, self.checksums[id as usize][1])?;
        }
        Ok(len as usize)
    }

    fn name(&mut self, id: u64) -> Result<String> {
        check_id(id, self.number_records())?;
        let labels = self.labels.as_ref().ok_or(ReadError::NoNames)?;
        Ok(labels.name(id).unwrap_or_default().to_string())
    }

    fn name_suffix(&mut self, id: u64) -> Result<String> {
        check_id(id, self.number_records())?;
        if self.labels.is_none() {
            return Err(ReadError::NoNames.into());
        }
        match &self.suffixes {
            Some(suffixes) => Ok(suffixes.name(id).unwrap_or_default().to_string()),
            None if self.header.has_suffixes => Err(ReadError::NoNames.into()),
            None => Ok(String::new()),
        }
    }

    fn length_between(&mut self, start: u64, end: u64) -> Result<u64> {
        check_id_range(start, end, self.number_records())?;
        Ok(self.positions[end as usize] - self.positions[start as usize])
    }

    fn sequence_lengths(&mut self, start: u64, end: u64) -> Result<Vec<u64>> {
        check_id_range(start, end, self.number_records())?;
        Ok(self.positions[start as usize..=end as usize]
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect())
    }

    fn copy(&self) -> Result<Self> {
        Ok(self.clone())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Decodes the values of `spans` and hands them to `sink` in order
fn decode_spans(
    dir: &Path,
    prefix: &'static str,
    files: u32,
    packing: &Packing,
    spans: &[FileSpan],
    mut sink: impl FnMut(&[u8]),
) -> Result<()> {
    let mut data = RollingFile::new(dir, prefix, files);
    let mut reader = ValueReader::new(packing.clone());
    let mut buf = vec![0u8; RECOMPRESS_CHUNK];
    for span in spans {
        data.require(span.file)?;
        let mut pos = span.start;
        while pos < span.end {
            let n = ((span.end - pos) as usize).min(RECOMPRESS_CHUNK);
            reader.read(&mut data, pos, &mut buf[..n])?;
            sink(&buf[..n]);
            pos += n as u64;
        }
    }
    data.close();
    Ok(())
}

/// Copies words `first..end` of the data file of `span` out of a memory map
fn mapped_words(data: &mut RollingFile, span: &FileSpan, first: u64, end: u64) -> Result<Vec<u64>> {
    data.require(span.file)?;
    let map = data.map()?;
    let bytes = map
        .get(first as usize * 8..end as usize * 8)
        .ok_or_else(|| CorruptError::Truncated {
            path: data.path(span.file),
        })?;
    Ok(match bytemuck::try_cast_slice::<u8, u64>(bytes) {
        Ok(words) => words.iter().map(|&w| u64::from_be(w)).collect(),
        Err(_) => {
            // unaligned map
            let mut words = vec![0u64; bytes.len() / 8];
            BigEndian::read_u64_into(bytes, &mut words);
            words
        }
    })
}

fn direct_residues(
    dir: &Path,
    files: u32,
    bits: u32,
    spans: &[FileSpan],
) -> Result<ChunkedArray<BitwiseArray>> {
    let mut data = RollingFile::new(dir, Family::Sequence.data_prefix(), files);
    let mut residues = ChunkedArray::default();
    for span in spans {
        let block = span.start / VALUES_PER_BLOCK;
        let words = mapped_words(
            &mut data,
            span,
            block * u64::from(bits),
            words_for(span.end, bits) as u64,
        )?;
        residues.push(BitwiseArray::from_words(
            bits,
            words,
            span.start % VALUES_PER_BLOCK,
            span.len(),
        ));
    }
    data.close();
    Ok(residues)
}

fn direct_quality(
    dir: &Path,
    files: u32,
    layout: &CompressedLayout,
    spans: &[FileSpan],
) -> Result<ChunkedArray<CompressedArray>> {
    let mut data = RollingFile::new(dir, QUALITY_PREFIX, files);
    let per_word = layout.per_word();
    let mut quality = ChunkedArray::default();
    for span in spans {
        let words = mapped_words(
            &mut data,
            span,
            span.start / per_word,
            layout.words_for(span.end) as u64,
        )?;
        quality.push(CompressedArray::from_words(
            layout.clone(),
            words,
            span.start % per_word,
            span.len(),
        ));
    }
    data.close();
    Ok(quality)
}

/// Recomputes the stream checksum of loaded values
fn verify_stream<A: PackedArray>(
    values: &ChunkedArray<A>,
    positions: &[u64],
    expected: u64,
    dir: &Path,
    stream: &'static str,
) -> Result<()> {
    let mut hash = StreamHash::default();
    let mut buf = Vec::new();
    for w in positions.windows(2) {
        buf.resize((w[1] - w[0]) as usize, 0);
        values.get_range(w[0], &mut buf);
        hash.add_record(&buf);
    }
    let found = hash.value();
    if found != expected {
        return Err(CorruptError::StreamChecksum {
            path: dir.to_path_buf(),
            stream,
            expected,
            found,
        }
        .into());
    }
    debug!("Sequence {stream} data passed checksum");
    Ok(())
}
