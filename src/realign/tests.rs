use super::*;

use crate::internal;
use crate::reference::InMemoryReference;
use crate::store::SortedEntries;

//-----------------------------------------------------------------------------

const REFERENCE: &[u8] = b"ACTGACTGACTGAACTAGTTACTAGCTAAAGTTA";

const RUN_REFERENCE: &[u8] = b"GATTACAGGGGGGCTTACGATCGATCGGATCCA";

fn reference(sequence: &[u8]) -> InMemoryReference {
    InMemoryReference::new(&["chr"], vec![sequence.to_vec()]).unwrap()
}

fn substitution(reference: &[u8], ref_pos: usize, position: usize, read_base: u8, read_offset: usize) -> SequenceVariation {
    SequenceVariation::new(&[reference[ref_pos]], &[read_base], ref_pos - position + 1, read_offset + 1)
}

// The read aligned at `position` with `length` reference bases deleted after `offset` read bases.
fn deletion_entry(query_index: usize, reference: &[u8], position: usize, read: &[u8], offset: usize, length: usize) -> AlignmentEntry {
    let mut entry = AlignmentEntry::new(query_index, 0, position);
    entry.query_length = read.len();
    entry.query_aligned_length = read.len();
    entry.target_aligned_length = read.len() + length;
    for i in 0..read.len() {
        if i == offset {
            let deleted = &reference[position + offset..position + offset + length];
            entry.sequence_variations.push(SequenceVariation::new(deleted, &vec![GAP; length], offset + 1, offset + 1));
        }
        let ref_pos = if i < offset { position + i } else { position + i + length };
        if read[i] != reference[ref_pos] {
            entry.sequence_variations.push(substitution(reference, ref_pos, position, read[i], i));
        }
    }
    entry
}

// The read aligned at `position` with `length` read bases inserted after `offset` read bases.
fn insertion_entry(query_index: usize, reference: &[u8], position: usize, read: &[u8], offset: usize, length: usize) -> AlignmentEntry {
    let mut entry = AlignmentEntry::new(query_index, 0, position);
    entry.query_length = read.len();
    entry.query_aligned_length = read.len();
    entry.target_aligned_length = read.len() - length;
    for i in 0..read.len() {
        if i == offset {
            let inserted = &read[offset..offset + length];
            entry.sequence_variations.push(SequenceVariation::new(&vec![GAP; length], inserted, offset, offset + 1));
        }
        if i >= offset && i < offset + length {
            continue;
        }
        let ref_pos = if i < offset { position + i } else { position + i - length };
        if read[i] != reference[ref_pos] {
            entry.sequence_variations.push(substitution(reference, ref_pos, position, read[i], i));
        }
    }
    entry
}

fn realign(entries: Vec<AlignmentEntry>, reference: InMemoryReference) -> (Vec<AlignmentEntry>, RealignmentStatistics) {
    let source = SortedEntries::new(entries).unwrap();
    let mut processor = RealignmentProcessor::new(source, reference, RealignmentParams::default());
    let mut result = Vec::new();
    loop {
        let entry = processor.next_entry();
        assert!(entry.is_ok(), "Realignment failed: {}", entry.unwrap_err());
        match entry.unwrap() {
            Some(entry) => result.push(entry),
            None => break,
        }
    }
    (result, processor.statistics())
}

//-----------------------------------------------------------------------------

#[test]
fn observed_deletion() {
    // Deletion of reference positions 2..5 in a read starting at 0.
    let read: Vec<u8> = REFERENCE[0..2].iter().chain(REFERENCE[5..13].iter()).copied().collect();
    let entry = deletion_entry(0, REFERENCE, 0, &read, 2, 3);
    assert_eq!(entry.sequence_variations, vec![SequenceVariation::new(b"TGA", b"---", 3, 3)], "Wrong test entry");

    let indels = observe_indels(&entry, &reference(REFERENCE));
    assert_eq!(indels.len(), 1, "Wrong number of observed indels");
    let indel = &indels[0];
    assert_eq!((indel.start, indel.end), (2, 5), "Wrong indel interval");
    assert_eq!(indel.position_span(), 3, "Wrong position span");
    assert!(!indel.is_insertion(), "The indel should be a deletion");
    assert_eq!(indel.repeat_length, 1, "Wrong repeat length");

    let mut pool = TargetPool::new();
    pool.add_indel(indel.clone());
    assert!(pool.has_spanning_indel(2..3), "Position 2 should be spanned");
    assert!(pool.has_spanning_indel(4..5), "Position 4 should be spanned");
    assert!(!pool.has_spanning_indel(1..2), "Position 1 should not be spanned");
    assert!(!pool.has_spanning_indel(5..10), "Position 5 should not be spanned");
    pool.remove_indels(4);
    assert_eq!(pool.indels.len(), 1, "The indel should still be pooled");
    pool.remove_indels(5);
    assert!(pool.indels.is_empty(), "The indel should have been pruned");
    assert!(!pool.has_spanning_indel(0..100), "Pruned positions should not be spanned");
}

#[test]
fn observed_indel_in_run() {
    let read: Vec<u8> = RUN_REFERENCE[0..12].iter().chain(RUN_REFERENCE[13..28].iter()).copied().collect();
    let entry = deletion_entry(0, RUN_REFERENCE, 0, &read, 12, 1);
    let indels = observe_indels(&entry, &reference(RUN_REFERENCE));
    assert_eq!(indels.len(), 1, "Wrong number of observed indels");
    assert_eq!((indels[0].start, indels[0].end), (7, 8), "The observed indel should be normalized");
    assert_eq!(indels[0].repeat_length, 6, "Wrong repeat length");
}

#[test]
fn span_mask_advances() {
    let mut mask = SpanMask::new();
    mask.set(100..105);
    mask.set(200..201);
    mask.advance(150);
    assert!(!mask.any(100..150), "Forgotten positions should not be set");
    assert!(mask.any(200..201), "Position 200 should be set");
    mask.set(300..302);
    assert!(mask.any(301..400), "Position 301 should be set");
    mask.advance(1000);
    assert!(!mask.any(0..2000), "No position should be set");
}

//-----------------------------------------------------------------------------

#[test]
fn canonical_deletion_in_run() {
    // The same read with one G deleted from the run at 7..13, placed at two different positions.
    let read: Vec<u8> = RUN_REFERENCE[0..12].iter().chain(RUN_REFERENCE[13..28].iter()).copied().collect();
    let entries = vec![
        deletion_entry(0, RUN_REFERENCE, 0, &read, 12, 1),
        deletion_entry(1, RUN_REFERENCE, 0, &read, 9, 1),
    ];
    let (realigned, statistics) = realign(entries, reference(RUN_REFERENCE));
    assert_eq!(realigned.len(), 2, "Wrong number of entries");
    for entry in realigned.iter() {
        assert_eq!(
            entry.sequence_variations, vec![SequenceVariation::new(b"G", b"-", 8, 8)],
            "Wrong variations for query {}", entry.query_index
        );
        assert_eq!(entry.target_aligned_length, 28, "Target aligned length changed for query {}", entry.query_index);
        assert_eq!(entry.query_aligned_length, 27, "Query aligned length changed for query {}", entry.query_index);
    }
    assert_eq!(statistics.entries_realigned, 2, "Both entries should be realigned");

    // Realigning again changes nothing.
    let (again, statistics) = realign(realigned.clone(), reference(RUN_REFERENCE));
    assert!(again == realigned, "Realignment is not idempotent");
    assert_eq!(statistics.entries_realigned, 0, "Nothing should be realigned the second time");
}

#[test]
fn adopt_better_candidate() {
    // The true haplotype has reference positions 14..16 deleted.
    let haplotype: Vec<u8> = REFERENCE[0..14].iter().chain(REFERENCE[16..].iter()).copied().collect();
    let carrier = deletion_entry(0, REFERENCE, 0, &haplotype[0..26], 14, 2);
    // The aligner placed the deletion at 18..20, with four mismatches before it.
    let misplaced = deletion_entry(1, REFERENCE, 2, &haplotype[2..24], 16, 2);
    assert_eq!(misplaced.sequence_variations.len(), 5, "Wrong test entry");

    let (realigned, statistics) = realign(vec![carrier.clone(), misplaced], reference(REFERENCE));
    assert_eq!(realigned.len(), 2, "Wrong number of entries");
    assert!(realigned[0] == carrier, "The carrier should not change");
    assert_eq!(
        realigned[1].sequence_variations, vec![SequenceVariation::new(b"CT", b"--", 13, 13)],
        "The deletion should move to the candidate"
    );
    assert_eq!(realigned[1].position, 2, "Entry position changed");
    assert_eq!(realigned[1].target_aligned_length, 24, "Target aligned length changed");
    assert_eq!(statistics.entries_realigned, 1, "Wrong number of realigned entries");
    assert_eq!(statistics.indels_observed, 2, "Wrong number of observed indels");
}

#[test]
fn insertion_keeps_quality() {
    let sequence: &[u8] = b"ACGTCCCCGTAGGCATTACGATC";
    let read: Vec<u8> = sequence[0..6].iter().chain(b"C".iter()).chain(sequence[6..20].iter()).copied().collect();
    let mut entry = insertion_entry(0, sequence, 0, &read, 6, 1);
    entry.sequence_variations[0].to_quality = vec![30];

    let (realigned, _) = realign(vec![entry], reference(sequence));
    let mut expected = SequenceVariation::new(b"-", b"C", 4, 5);
    expected.to_quality = vec![30];
    assert_eq!(realigned[0].sequence_variations, vec![expected], "The insertion should move to the start of the run");
    assert_eq!(realigned[0].query_aligned_length, 21, "Query aligned length changed");
}

#[test]
fn substitutions_are_kept() {
    let mut read: Vec<u8> = RUN_REFERENCE[0..12].iter().chain(RUN_REFERENCE[13..28].iter()).copied().collect();
    read[19] = b'A'; // Reference position 20 is T.
    let entry = deletion_entry(0, RUN_REFERENCE, 0, &read, 11, 1);
    let (realigned, _) = realign(vec![entry], reference(RUN_REFERENCE));
    let substitution = SequenceVariation::new(b"T", b"A", 21, 20);
    assert_eq!(
        realigned[0].sequence_variations, vec![SequenceVariation::new(b"G", b"-", 8, 8), substitution],
        "Wrong variations after realignment"
    );
}

//-----------------------------------------------------------------------------

#[test]
fn different_targets() {
    let entries = internal::entries_at(&[(0, 5), (0, 8), (1, 5), (1, 8), (4, 5), (4, 8)], 0, 20);
    let (realigned, statistics) = realign(entries.clone(), InMemoryReference::default());
    assert!(realigned == entries, "Entries without indels should be returned unchanged and in order");
    assert_eq!(statistics.entries_read, 6, "Wrong number of entries read");
    assert_eq!(statistics.entries_returned, 6, "Wrong number of entries returned");
}

#[test]
fn skip_to_and_misuse() {
    let entries = internal::entries_at(&[(0, 5), (0, 10), (0, 20), (0, 30), (2, 0)], 0, 4);
    let source = SortedEntries::new(entries).unwrap();
    let mut processor = RealignmentProcessor::new(source, InMemoryReference::default(), RealignmentParams::default());
    let found = processor.next_realigned_entry(0, 15).unwrap().map(|entry| entry.position);
    assert_eq!(found, Some(20), "Wrong entry from skipping");
    let found = processor.next_entry().unwrap().map(|entry| entry.position);
    assert_eq!(found, Some(30), "Wrong entry after skipping");
    assert!(
        matches!(processor.next_realigned_entry(0, 10), Err(StoreError::SeekMisuse { .. })),
        "Seeking backward should fail"
    );
    let found = processor.skip_to(1, 0).unwrap().map(|entry| entry.location());
    assert_eq!(found, Some(ReferenceLocation::new(2, 0)), "Wrong entry on the next target");
    assert!(processor.next_entry().unwrap().is_none(), "The processor should be exhausted");
}

#[test]
fn reference_too_short() {
    let read: Vec<u8> = RUN_REFERENCE[0..12].iter().chain(RUN_REFERENCE[13..28].iter()).copied().collect();
    let entry = deletion_entry(0, RUN_REFERENCE, 0, &read, 12, 1);
    let (realigned, statistics) = realign(vec![entry.clone()], reference(&RUN_REFERENCE[0..10]));
    assert!(realigned[0] == entry, "The entry should not change");
    assert_eq!(statistics.entries_not_realignable, 1, "The entry should not be realignable");
}

#[test]
fn deletion_past_the_end() {
    let mut entry = AlignmentEntry::new(0, 0, 0);
    entry.query_length = 9;
    entry.query_aligned_length = 9;
    entry.target_aligned_length = 10;
    entry.sequence_variations.push(SequenceVariation::new(b"A", &[GAP], 15, 15));
    let good = deletion_entry(1, RUN_REFERENCE, 2, &RUN_REFERENCE[2..10], 3, 1);

    let (realigned, statistics) = realign(vec![entry.clone(), good], reference(RUN_REFERENCE));
    assert_eq!(realigned.len(), 2, "Wrong number of entries");
    assert!(realigned[0] == entry, "The malformed entry should not change");
    assert_eq!(statistics.entries_not_realignable, 1, "The malformed entry should not be realignable");
}

//-----------------------------------------------------------------------------
