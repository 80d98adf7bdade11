use crate::{AlignmentEntry, AlignmentReader, AlignmentWriter, SequenceVariation, WriterParams};
use crate::utils;

use simple_sds::serialize;

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use std::path::{Path, PathBuf};

//-----------------------------------------------------------------------------

// Entries.

// An entry without variations where the query is fully aligned.
pub(crate) fn entry(query_index: usize, target_index: usize, position: usize, len: usize) -> AlignmentEntry {
    let mut result = AlignmentEntry::new(query_index, target_index, position);
    result.query_length = len;
    result.query_aligned_length = len;
    result.target_aligned_length = len;
    result.score = len as f32;
    result
}

// Entries at the given locations with query indexes starting from `first_query`.
pub(crate) fn entries_at(locations: &[(usize, usize)], first_query: usize, len: usize) -> Vec<AlignmentEntry> {
    locations.iter().enumerate().map(|(i, &(target_index, position))| {
        entry(first_query + i, target_index, position, len)
    }).collect()
}

// Random entries sorted by location.
pub(crate) fn random_entries(n: usize, targets: usize, max_position: usize, seed: u64) -> Vec<AlignmentEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = Vec::with_capacity(n);
    for _ in 0..n {
        let len = rng.gen_range(20..100);
        let mut entry = entry(rng.gen_range(0..n), rng.gen_range(0..targets), rng.gen_range(0..max_position), len);
        entry.score = rng.gen_range(0..200) as f32 / 2.0;
        entry.mapping_quality = rng.gen_range(0..61);
        entry.matching_reverse_strand = rng.gen_bool(0.5);
        entry.sample_index = rng.gen_range(0..3);
        if rng.gen_bool(0.3) {
            let offset = rng.gen_range(1..=len);
            let mut variation = SequenceVariation::new(b"A", b"C", offset, offset);
            variation.to_quality = vec![rng.gen_range(0..41)];
            entry.sequence_variations.push(variation);
        }
        result.push(entry);
    }
    result.sort_by_key(|entry| entry.location());
    result
}

//-----------------------------------------------------------------------------

// Stores.

pub(crate) fn temp_basename(name: &str) -> PathBuf {
    serialize::temp_file_name(name)
}

pub(crate) fn write_store(entries: &[AlignmentEntry], params: WriterParams) -> PathBuf {
    let basename = temp_basename("goby-store");
    let writer = AlignmentWriter::create(&basename, params);
    assert!(writer.is_ok(), "Failed to create store {}: {}", basename.display(), writer.err().unwrap());
    let mut writer = writer.unwrap();
    for entry in entries.iter() {
        let result = writer.append(entry.clone());
        assert!(result.is_ok(), "Failed to append an entry: {}", result.unwrap_err());
    }
    let result = writer.close();
    assert!(result.is_ok(), "Failed to close store {}: {}", basename.display(), result.unwrap_err());
    basename
}

pub(crate) fn write_sorted_store(entries: &[AlignmentEntry], entries_per_chunk: usize) -> PathBuf {
    let params = WriterParams { entries_per_chunk, ..WriterParams::sorted() };
    write_store(entries, params)
}

pub(crate) fn read_store(basename: &Path) -> Vec<AlignmentEntry> {
    let reader = AlignmentReader::open(basename);
    assert!(reader.is_ok(), "Failed to open store {}: {}", basename.display(), reader.err().unwrap());
    let entries: Result<Vec<AlignmentEntry>, _> = reader.unwrap().collect();
    assert!(entries.is_ok(), "Failed to read store {}: {}", basename.display(), entries.unwrap_err());
    entries.unwrap()
}

pub(crate) fn remove_store(basename: &Path) {
    utils::remove_store(basename);
}

//-----------------------------------------------------------------------------
