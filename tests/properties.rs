use proptest::prelude::*;
use sdfstore::{
    DefaultReader, MemoryOptions, MemoryReader, SdfWriterBuilder, SequenceStore, SequenceType,
};

type Records = Vec<(String, Vec<u8>, Vec<u8>)>;

fn records_strategy() -> impl Strategy<Value = Records> {
    prop::collection::vec(
        (0usize..90).prop_flat_map(|length| {
            (
                "[A-Za-z0-9_]{1,12}( [a-z ]{0,6})?",
                prop::collection::vec(0u8..5, length),
                prop::collection::vec(0u8..64, length),
            )
        }),
        0..60,
    )
}

fn write_store(dir: &std::path::Path, records: &Records, size_limit: u64) {
    let mut writer = SdfWriterBuilder::default()
        .sequence_type(SequenceType::Dna)
        .quality(true)
        .size_limit(size_limit)
        .build(dir)
        .expect("build writer");
    for (name, codes, quality) in records {
        writer
            .write_record(Some(name), codes, Some(quality))
            .expect("write record");
    }
    writer.close().expect("close writer");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn round_trip_matches_input(records in records_strategy(), size_limit in 7u64..200) {
        let dir = tempfile::tempdir().expect("tempdir");
        write_store(dir.path(), &records, size_limit);

        let mut disk = DefaultReader::open(dir.path()).expect("open disk reader");
        let options = MemoryOptions::default().load_full_names(true);
        let mut memory = MemoryReader::open_with(dir.path(), options).expect("open memory reader");
        prop_assert_eq!(disk.number_records(), records.len() as u64);
        prop_assert_eq!(memory.number_records(), records.len() as u64);
        for (id, (name, codes, quality)) in records.iter().enumerate() {
            let id = id as u64;
            prop_assert_eq!(&disk.read_vec(id).expect("read"), codes);
            prop_assert_eq!(&disk.read_quality_vec(id).expect("read quality"), quality);
            prop_assert_eq!(&disk.full_name(id).expect("name"), name);
            prop_assert_eq!(&memory.read_vec(id).expect("read"), codes);
            prop_assert_eq!(&memory.read_quality_vec(id).expect("read quality"), quality);
            prop_assert_eq!(&memory.full_name(id).expect("name"), name);
        }
    }

    #[test]
    fn region_matches_full_store(
        records in records_strategy(),
        size_limit in 7u64..120,
        a in 0usize..60,
        b in 0usize..60,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        write_store(dir.path(), &records, size_limit);
        let count = records.len();
        let (start, end) = (a.min(b).min(count) as u64, a.max(b).min(count) as u64);

        let mut full = DefaultReader::open(dir.path()).expect("open full store");
        let mut disk = DefaultReader::open_region(dir.path(), start..end).expect("open disk region");
        let options = MemoryOptions::default().region(start..end);
        let mut memory = MemoryReader::open_with(dir.path(), options).expect("open memory region");
        prop_assert_eq!(disk.number_records(), end - start);
        prop_assert_eq!(memory.number_records(), end - start);
        for id in 0..end - start {
            let expected = full.read_vec(start + id).expect("read full");
            prop_assert_eq!(&disk.read_vec(id).expect("read region"), &expected);
            prop_assert_eq!(&memory.read_vec(id).expect("read memory"), &expected);
            prop_assert_eq!(
                memory.read_quality_vec(id).expect("read memory quality"),
                full.read_quality_vec(start + id).expect("read full quality")
            );
            prop_assert_eq!(disk.name(id).expect("name"), full.name(start + id).expect("name"));
        }
    }
}
