use super::*;

use crate::internal;

use gbwt::support::ByteCode;

//-----------------------------------------------------------------------------

fn full_entry() -> AlignmentEntry {
    let mut entry = AlignmentEntry::new(42, 3, 1_000_123);
    entry.query_position = 2;
    entry.query_length = 40;
    entry.query_aligned_length = 37;
    entry.target_aligned_length = 36;
    entry.score = 31.5;
    entry.mapping_quality = 60;
    entry.matching_reverse_strand = true;
    entry.multiplicity = 3;
    entry.query_index_occurrences = 2;
    entry.fragment_index = 1;
    entry.sample_index = 4;
    entry.spliced_forward_link = Some(SpliceLink { target_index: 3, position: 1_005_000, fragment_index: 2 });
    entry.spliced_backward_link = Some(SpliceLink { target_index: 2, position: 17, fragment_index: 0 });
    let mut insertion = SequenceVariation::new(b"--", b"AC", 10, 11);
    insertion.to_quality = vec![30, 0];
    entry.sequence_variations.push(SequenceVariation::new(b"A", b"G", 3, 4));
    entry.sequence_variations.push(insertion);
    entry.sequence_variations.push(SequenceVariation::new(b"T", b"-", 20, 21));
    entry
}

fn check_chunk(entries: &[AlignmentEntry], name: &str) {
    let chunk = EntryChunk::new(entries);
    assert_eq!(chunk.len(), entries.len(), "[{}]: Wrong number of entries in the chunk", name);
    let serialized = chunk.serialize();
    assert!(serialized.is_ok(), "[{}]: Failed to serialize the chunk: {}", name, serialized.unwrap_err());
    let deserialized = EntryChunk::deserialize(&serialized.unwrap());
    assert!(deserialized.is_ok(), "[{}]: Failed to deserialize the chunk: {}", name, deserialized.unwrap_err());
    let deserialized = deserialized.unwrap();
    assert_eq!(deserialized, chunk, "[{}]: Deserialized chunk differs from the original", name);
    let decoded = deserialized.decode();
    assert!(decoded.is_ok(), "[{}]: Failed to decode the chunk: {}", name, decoded.unwrap_err());
    assert_eq!(decoded.unwrap(), entries, "[{}]: Decoded entries differ from the original", name);
}

//-----------------------------------------------------------------------------

#[test]
fn reference_location_order() {
    let a = ReferenceLocation::new(1, 300);
    let b = ReferenceLocation::new(2, 0);
    let c = ReferenceLocation::new(2, 12);
    assert!(a < b, "Target index should take precedence");
    assert!(b < c, "Positions should break ties");
    assert_eq!(format!("{}", c), "(2, 12)", "Wrong display format");
}

#[test]
fn variation_types() {
    let snp = SequenceVariation::new(b"A", b"C", 5, 5);
    assert!(!snp.is_indel(), "A substitution is not an indel");
    assert_eq!(snp.reference_start(100), 104, "Wrong start for a substitution");

    let insertion = SequenceVariation::new(b"---", b"ACG", 5, 5);
    assert!(insertion.is_insertion() && !insertion.is_deletion(), "Wrong type for an insertion");
    assert_eq!(insertion.reference_len(), 0, "Insertions do not cover reference bases");
    assert_eq!(insertion.read_len(), 3, "Wrong read length for an insertion");
    assert_eq!(insertion.reference_start(100), 105, "Wrong start for an insertion");

    let deletion = SequenceVariation::new(b"AC", b"--", 3, 2);
    assert!(deletion.is_deletion() && !deletion.is_insertion(), "Wrong type for a deletion");
    assert_eq!(deletion.reference_len(), 2, "Wrong reference length for a deletion");
    assert_eq!(deletion.reference_start(0), 2, "Wrong start for a deletion");
}

#[test]
fn read_index_orientation() {
    let mut entry = AlignmentEntry::new(0, 0, 10);
    entry.query_length = 10;
    entry.query_position = 2;
    assert_eq!(entry.read_index(0), 3, "Wrong forward read index for the first aligned base");
    assert_eq!(entry.read_index(4), 7, "Wrong forward read index");
    entry.matching_reverse_strand = true;
    assert_eq!(entry.read_index(0), 8, "Wrong reverse read index for the first aligned base");
    assert_eq!(entry.read_index(7), 1, "Wrong reverse read index for the last base");
}

#[test]
fn columns_with_substitution() {
    let mut entry = internal::entry(0, 0, 100, 5);
    entry.sequence_variations.push(SequenceVariation::new(b"A", b"C", 2, 2));
    let columns = entry.columns().unwrap();
    assert_eq!(columns.len(), 5, "Wrong number of columns");
    assert_eq!(columns[0], Column::Match { ref_pos: 100, read_offset: 0 }, "Wrong first column");
    assert_eq!(
        columns[1],
        Column::Variant { ref_pos: 101, read_offset: 1, from: b'A', to: b'C', quality: None, variation: 0 },
        "Wrong variant column"
    );
    assert_eq!(columns[4], Column::Match { ref_pos: 104, read_offset: 4 }, "Wrong last column");
}

#[test]
fn columns_with_indels() {
    // Read: 3 matches, 2 inserted bases, 3 matches, 2 deleted bases, 2 matches.
    let mut entry = internal::entry(0, 0, 50, 10);
    entry.sequence_variations.push(SequenceVariation::new(b"--", b"GG", 3, 4));
    entry.sequence_variations.push(SequenceVariation::new(b"TT", b"--", 7, 8));
    let columns = entry.columns().unwrap();
    assert_eq!(columns.len(), 12, "Wrong number of columns");

    let ref_bases = columns.iter().filter(|c| c.consumes_reference()).count();
    let read_bases = columns.iter().filter(|c| c.consumes_read()).count();
    assert_eq!(ref_bases, 10, "Wrong number of reference bases");
    assert_eq!(read_bases, 10, "Wrong number of read bases");

    // Inserted bases are anchored to the preceding reference base.
    assert_eq!(columns[3], Column::Variant { ref_pos: 52, read_offset: 3, from: GAP, to: b'G', quality: None, variation: 0 });
    assert_eq!(columns[4], Column::Variant { ref_pos: 52, read_offset: 4, from: GAP, to: b'G', quality: None, variation: 0 });
    assert_eq!(columns[5], Column::Match { ref_pos: 53, read_offset: 5 });
    // Deleted bases are anchored to the preceding read base.
    assert_eq!(columns[8], Column::Variant { ref_pos: 56, read_offset: 7, from: b'T', to: GAP, quality: None, variation: 1 });
    assert_eq!(columns[9], Column::Variant { ref_pos: 57, read_offset: 7, from: b'T', to: GAP, quality: None, variation: 1 });
    assert_eq!(columns[10], Column::Match { ref_pos: 58, read_offset: 8 });
}

#[test]
fn overlapping_variations() {
    let mut entry = internal::entry(0, 0, 0, 10);
    entry.sequence_variations.push(SequenceVariation::new(b"AC", b"GT", 3, 3));
    entry.sequence_variations.push(SequenceVariation::new(b"C", b"A", 4, 4));
    assert!(entry.columns().is_err(), "Overlapping variations should be rejected");
}

#[test]
fn variation_past_the_end() {
    // A deletion of reference position 14 in an entry covering positions 0 to 9.
    let mut entry = internal::entry(0, 0, 0, 9);
    entry.target_aligned_length = 10;
    entry.sequence_variations.push(SequenceVariation::new(b"A", &[GAP], 15, 15));
    assert!(entry.columns().is_err(), "A variation past the end should be rejected");

    // The same deletion inside the entry.
    entry.sequence_variations[0].position = 5;
    let columns = entry.columns();
    assert!(columns.is_ok(), "Failed to expand a valid deletion: {}", columns.unwrap_err());
    assert!(columns.unwrap().iter().all(|column| match column {
        Column::Match { ref_pos, .. } | Column::Variant { ref_pos, .. } => *ref_pos < entry.end(),
    }), "Column past the end of the entry");
}

#[test]
fn inconsistent_aligned_lengths() {
    let mut entry = internal::entry(0, 0, 100, 5);
    entry.query_aligned_length = 6;
    assert!(entry.columns().is_err(), "Extra aligned read bases should be rejected");

    let mut entry = internal::entry(0, 0, 100, 5);
    entry.sequence_variations.push(SequenceVariation::new(&[GAP], b"T", 2, 3));
    assert!(entry.columns().is_err(), "An insertion needs an extra aligned read base");
    entry.query_aligned_length = 6;
    assert!(entry.columns().is_ok(), "Failed to expand a valid insertion");
}

//-----------------------------------------------------------------------------

#[test]
fn empty_chunk() {
    check_chunk(&[], "empty");
}

#[test]
fn chunk_with_all_fields() {
    let mut entries = vec![full_entry()];
    let mut second = full_entry();
    second.target_index = 2;
    second.position = 5;
    second.matching_reverse_strand = false;
    second.spliced_backward_link = None;
    second.score = -2.25;
    entries.push(second);
    entries.push(internal::entry(7, 9, 0, 30));
    check_chunk(&entries, "all fields");
}

#[test]
fn random_chunks() {
    let entries = internal::random_entries(500, 4, 10_000, 0x5EED);
    for chunk_size in [1, 7, 100, 500] {
        for chunk in entries.chunks(chunk_size) {
            check_chunk(chunk, &format!("chunk size {}", chunk_size));
        }
    }
}

#[test]
fn corrupt_chunk() {
    let entries = vec![full_entry(), full_entry()];
    let chunk = EntryChunk::new(&entries);
    let serialized = chunk.serialize().unwrap();

    let truncated = &serialized[..serialized.len() / 2];
    assert!(EntryChunk::deserialize(truncated).is_err(), "Truncated chunk should not deserialize");

    let mut broken = chunk.clone();
    broken.numbers.truncate(broken.numbers.len() / 2);
    assert!(broken.decode().is_err(), "Chunk with missing numbers should not decode");

    let mut broken = chunk.clone();
    broken.bytes.pop();
    assert!(broken.decode().is_err(), "Chunk with missing variation bytes should not decode");

    // Declared lengths that overflow when added together.
    let mut raw = Vec::new();
    for len in [2, u64::MAX, 1, 1] {
        raw.extend_from_slice(&len.to_le_bytes());
    }
    raw.extend_from_slice(&[0, 0, 0]);
    let compressed = zstd::stream::encode_all(&raw[..], 1).unwrap();
    assert!(matches!(EntryChunk::deserialize(&compressed), Err(StoreError::Format(_))), "Overflowing lengths should be a format error");

    // Too many entries for the flag bytes.
    let mut broken = chunk.clone();
    broken.entries = usize::MAX;
    let serialized = broken.serialize().unwrap();
    assert!(matches!(EntryChunk::deserialize(&serialized), Err(StoreError::Format(_))), "Overflowing entry count should be a format error");

    // Variation string lengths that overflow.
    let mut entry = AlignmentEntry::new(0, 0, 0);
    entry.sequence_variations.push(SequenceVariation::new(b"A", b"C", 1, 1));
    let mut broken = EntryChunk::new(&[entry]);
    let mut numbers = ByteCode::new();
    for value in [0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 1, 1, 1, usize::MAX, usize::MAX, 0] {
        numbers.write(value);
    }
    broken.numbers = Vec::from(numbers);
    assert!(matches!(broken.decode(), Err(StoreError::Format(_))), "Overflowing variation lengths should be a format error");
}

//-----------------------------------------------------------------------------
