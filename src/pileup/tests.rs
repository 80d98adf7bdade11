use super::*;

use crate::{AlignmentEntry, SequenceVariation, GAP};
use crate::internal;
use crate::reference::InMemoryReference;
use crate::store::{IdentifierMap, SortedEntries};

//-----------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    number_of_targets: Option<usize>,
    processed: Vec<(usize, usize, Vec<PositionBaseInfo>)>,
    reference_bases: usize,
    variant_bases: usize,
    indels: Vec<(usize, usize)>,
    // Number of processed positions when each entry was first observed.
    processed_at_observation: Vec<(usize, usize)>,
}

impl Recorder {
    fn locations(&self) -> Vec<(usize, usize)> {
        self.processed.iter().map(|(target_index, position, _)| (*target_index, *position)).collect()
    }

    fn at(&self, target_index: usize, position: usize) -> Option<&Vec<PositionBaseInfo>> {
        self.processed.iter().find(|(t, p, _)| *t == target_index && *p == position).map(|(_, _, observations)| observations)
    }

    fn note(&mut self, entry: &AlignmentEntry) {
        if self.processed_at_observation.last().map(|(query, _)| *query) != Some(entry.query_index) {
            self.processed_at_observation.push((entry.query_index, self.processed.len()));
        }
    }
}

impl PileupConsumer for Recorder {
    fn process_number_of_targets(&mut self, number_of_targets: usize) {
        self.number_of_targets = Some(number_of_targets);
    }

    fn observe_reference_base(&mut self, entry: &AlignmentEntry, _position: usize, _info: &PositionBaseInfo) {
        self.note(entry);
        self.reference_bases += 1;
    }

    fn observe_variant_base(&mut self, entry: &AlignmentEntry, _variation: &SequenceVariation, _position: usize, _info: &PositionBaseInfo) {
        self.note(entry);
        self.variant_bases += 1;
    }

    fn observe_indel(&mut self, entry: &AlignmentEntry, _variation: &SequenceVariation, start_position: usize) {
        self.indels.push((entry.query_index, start_position));
    }

    fn process_positions(&mut self, target_index: usize, position: usize, observations: Vec<PositionBaseInfo>) {
        self.processed.push((target_index, position, observations));
    }
}

fn run<S: SortedSource>(source: &mut S, params: IterationParams, header: &AlignmentHeader) -> (Recorder, IterationSummary) {
    let iterator = IterateSortedAlignments::new(params, header);
    assert!(iterator.is_ok(), "Failed to create the iterator: {}", iterator.unwrap_err());
    let mut iterator = iterator.unwrap();
    let mut recorder = Recorder::default();
    let summary = iterator.iterate(source, &mut recorder);
    assert!(summary.is_ok(), "Iteration failed: {}", summary.unwrap_err());
    (recorder, summary.unwrap())
}

fn run_entries(entries: Vec<AlignmentEntry>, params: IterationParams, header: &AlignmentHeader) -> (Recorder, IterationSummary) {
    let mut source = SortedEntries::new(entries).unwrap();
    run(&mut source, params, header)
}

fn named_header(names: &[&str]) -> AlignmentHeader {
    let mut header = AlignmentHeader::default();
    header.number_of_targets = names.len();
    header.target_identifiers = IdentifierMap::from_names(names).unwrap();
    header
}

fn window(start: (usize, usize), end: (usize, usize), flap: usize) -> IterationParams {
    IterationParams {
        window: Some((ReferenceLocation::new(start.0, start.1), ReferenceLocation::new(end.0, end.1))),
        start_flap_length: flap,
        ..IterationParams::default()
    }
}

//-----------------------------------------------------------------------------

#[test]
fn variant_anchors() {
    // Substitution at reference position 12.
    let mut substitution = internal::entry(0, 0, 10, 5);
    let mut var = SequenceVariation::new(b"A", b"C", 3, 3);
    var.to_quality = vec![20];
    substitution.sequence_variations.push(var);

    // Deletion of reference position 12.
    let mut deletion = internal::entry(1, 0, 10, 4);
    deletion.target_aligned_length = 5;
    deletion.sequence_variations.push(SequenceVariation::new(b"G", &[GAP], 3, 3));

    // Insertion between reference positions 12 and 13.
    let mut insertion = internal::entry(2, 0, 10, 6);
    insertion.target_aligned_length = 5;
    insertion.sequence_variations.push(SequenceVariation::new(&[GAP], b"T", 3, 4));

    let (recorder, summary) = run_entries(vec![substitution, deletion, insertion], IterationParams::default(), &AlignmentHeader::default());
    assert_eq!(summary.entries, 3, "Wrong number of entries");
    assert_eq!(summary.positions, 5, "Wrong number of positions");
    assert_eq!(recorder.locations(), vec![(0, 10), (0, 11), (0, 12), (0, 13), (0, 14)], "Wrong processed positions");
    assert_eq!(recorder.reference_bases, 13, "Wrong number of reference bases");
    assert_eq!(recorder.variant_bases, 3, "Wrong number of variant bases");
    assert_eq!(recorder.indels, vec![(1, 12), (2, 13)], "Wrong indel starts");

    for position in [10, 11, 13, 14] {
        let observations = recorder.at(0, position).unwrap();
        assert_eq!(observations.len(), 3, "Wrong depth at {}", position);
        assert!(observations.iter().all(|info| info.observation.is_reference()), "Variant at {}", position);
    }

    let observations = recorder.at(0, 12).unwrap();
    let expected = vec![
        PositionBaseInfo {
            query_index: 0, read_index: 3, sample_index: 0, matches_forward_strand: true,
            observation: BaseObservation::Variant { from: b'A', to: b'C', quality: Some(20) },
        },
        PositionBaseInfo {
            query_index: 1, read_index: 2, sample_index: 0, matches_forward_strand: true,
            observation: BaseObservation::Variant { from: b'G', to: GAP, quality: None },
        },
        PositionBaseInfo {
            query_index: 2, read_index: 3, sample_index: 0, matches_forward_strand: true,
            observation: BaseObservation::Reference,
        },
        PositionBaseInfo {
            query_index: 2, read_index: 4, sample_index: 0, matches_forward_strand: true,
            observation: BaseObservation::Variant { from: GAP, to: b'T', quality: None },
        },
    ];
    assert_eq!(*observations, expected, "Wrong observations at the variant position");
    assert!(observations[1].observation.is_deletion(), "The deleted base should be a deletion");
    assert!(observations[3].observation.is_insertion(), "The inserted base should be an insertion");
}

#[test]
fn reverse_strand_read_index() {
    let mut entry = internal::entry(0, 0, 0, 4);
    entry.query_length = 6;
    entry.query_position = 1;
    entry.matching_reverse_strand = true;
    let (recorder, _) = run_entries(vec![entry], IterationParams::default(), &AlignmentHeader::default());
    let read_indexes: Vec<usize> = recorder.processed.iter().map(|(_, _, observations)| observations[0].read_index).collect();
    assert_eq!(read_indexes, vec![5, 4, 3, 2], "Wrong read indexes on the reverse strand");
    assert!(!recorder.processed[0].2[0].matches_forward_strand, "The read should be on the reverse strand");
}

#[test]
fn positions_processed_once_in_order() {
    let entries = internal::entries_at(&[(0, 10), (0, 11), (0, 20), (1, 5)], 0, 3);
    let (recorder, summary) = run_entries(entries, IterationParams::default(), &AlignmentHeader::default());
    assert_eq!(summary.entries, 4, "Wrong number of entries");
    assert_eq!(
        recorder.locations(),
        vec![(0, 10), (0, 11), (0, 12), (0, 13), (0, 20), (0, 21), (0, 22), (1, 5), (1, 6), (1, 7)],
        "Wrong processed positions"
    );
    assert_eq!(recorder.at(0, 11).map(|observations| observations.len()), Some(2), "Wrong depth at 11");
    // Positions before an entry are processed before the entry is observed.
    assert_eq!(recorder.processed_at_observation, vec![(0, 0), (1, 1), (2, 4), (3, 7)], "Positions were not flushed in time");
}

#[test]
fn window_and_flap() {
    let entries = internal::entries_at(&[(0, 0), (0, 5), (0, 30), (1, 0)], 0, 10);

    let (recorder, summary) = run_entries(entries.clone(), window((0, 8), (0, 32), 0), &AlignmentHeader::default());
    assert_eq!(summary.entries, 1, "Wrong number of entries without a flap");
    assert_eq!(recorder.locations(), vec![(0, 30), (0, 31), (0, 32)], "Wrong positions without a flap");

    let (recorder, summary) = run_entries(entries, window((0, 8), (0, 32), 5), &AlignmentHeader::default());
    assert_eq!(summary.entries, 2, "Wrong number of entries with a flap");
    let expected: Vec<(usize, usize)> = (8..15).chain(30..33).map(|position| (0, position)).collect();
    assert_eq!(recorder.locations(), expected, "Wrong positions with a flap");
    assert!(recorder.processed.iter().all(|(_, _, observations)| observations.len() == 1), "Wrong depth within the window");
}

#[test]
fn reference_filter() {
    let header = named_header(&["chr1", "chr2", "chr3"]);
    let entries = internal::entries_at(&[(0, 1), (1, 1), (1, 2), (2, 1)], 0, 2);

    let params = IterationParams { reference_names: Some(vec![String::from("chr3"), String::from("chr1")]), ..IterationParams::default() };
    let (recorder, summary) = run_entries(entries.clone(), params, &header);
    assert_eq!(summary.entries, 2, "Wrong number of entries");
    assert_eq!(recorder.locations(), vec![(0, 1), (0, 2), (2, 1), (2, 2)], "Wrong processed positions");

    let params = IterationParams { reference_names: Some(vec![String::from("chr1")]), ..IterationParams::default() };
    let (recorder, summary) = run_entries(entries, params, &header);
    assert_eq!(summary.entries, 1, "Wrong number of entries with a single target");
    assert_eq!(recorder.locations(), vec![(0, 1), (0, 2)], "Wrong processed positions with a single target");

    let params = IterationParams { reference_names: Some(vec![String::from("chrX")]), ..IterationParams::default() };
    let iterator = IterateSortedAlignments::new(params, &header);
    assert!(matches!(iterator, Err(StoreError::Format(_))), "Unknown reference names should be rejected");
}

#[test]
fn malformed_entry_is_skipped() {
    let mut bad = internal::entry(0, 0, 10, 5);
    bad.sequence_variations.push(SequenceVariation::new(b"AC", b"T", 2, 2));
    let good = internal::entry(1, 0, 10, 5);
    let (recorder, summary) = run_entries(vec![bad, good], IterationParams::default(), &AlignmentHeader::default());
    assert_eq!(summary.skipped_entries, 1, "The malformed entry should be skipped");
    assert_eq!(summary.positions, 5, "Wrong number of positions");
    assert!(recorder.processed.iter().all(|(_, _, observations)| observations.len() == 1), "Observed the malformed entry");
}

#[test]
fn variation_past_the_end_is_skipped() {
    let mut bad = internal::entry(0, 0, 10, 4);
    bad.target_aligned_length = 5;
    bad.sequence_variations.push(SequenceVariation::new(b"A", &[GAP], 15, 15));
    let good = internal::entry(1, 0, 10, 5);
    let (recorder, summary) = run_entries(vec![bad, good], IterationParams::default(), &AlignmentHeader::default());
    assert_eq!(summary.skipped_entries, 1, "The entry should be skipped");
    assert_eq!(recorder.locations(), vec![(0, 10), (0, 11), (0, 12), (0, 13), (0, 14)], "Observed positions past the end of an entry");
    assert!(recorder.processed.iter().all(|(_, _, observations)| observations.len() == 1), "Observed the skipped entry");
}

//-----------------------------------------------------------------------------

#[test]
fn stores_as_samples() {
    let first = internal::write_sorted_store(&internal::entries_at(&[(0, 10)], 0, 3), 2);
    let second = internal::write_sorted_store(&internal::entries_at(&[(0, 11)], 0, 3), 2);
    let mut recorder = Recorder::default();
    let summary = iterate_stores(&[first.clone(), second.clone()], IterationParams::default(), &mut recorder);
    assert!(summary.is_ok(), "Iteration failed: {}", summary.unwrap_err());
    assert_eq!(summary.unwrap().entries, 2, "Wrong number of entries");
    assert!(recorder.number_of_targets.is_some(), "The number of targets was not reported");

    let samples: Vec<Vec<usize>> = recorder.processed.iter().map(|(_, _, observations)| {
        observations.iter().map(|info| info.sample_index).collect()
    }).collect();
    assert_eq!(samples, vec![vec![0], vec![0, 1], vec![0, 1], vec![1]], "Wrong sample indexes");

    let mut recorder = Recorder::default();
    let summary = iterate_stores(&[first.clone(), second.clone()], window((0, 12), (0, 12), 2), &mut recorder);
    assert!(summary.is_ok(), "Iteration over a window failed: {}", summary.unwrap_err());
    assert_eq!(recorder.locations(), vec![(0, 12)], "Wrong positions in the window");
    assert_eq!(recorder.processed[0].2.len(), 2, "Wrong depth in the window");

    internal::remove_store(&first);
    internal::remove_store(&second);
}

#[test]
fn realigned_pileup() {
    let sequence: &[u8] = b"GATTACAGGGGGGCTTACGATCGATCGGATCCA";
    let reference = InMemoryReference::new(&["chr"], vec![sequence.to_vec()]).unwrap();

    // One G deleted from the end of the run.
    let mut entry = internal::entry(0, 0, 0, 27);
    entry.target_aligned_length = 28;
    entry.sequence_variations.push(SequenceVariation::new(b"G", &[GAP], 13, 13));

    let mut source = SortedEntries::new(vec![entry.clone()]).unwrap();
    let (recorder, _) = run(&mut source, IterationParams::default(), &AlignmentHeader::default());
    assert_eq!(recorder.indels, vec![(0, 12)], "Wrong deletion without realignment");

    let source = SortedEntries::new(vec![entry]).unwrap();
    let mut processor = RealignmentProcessor::new(source, reference, RealignmentParams::default());
    let (recorder, summary) = run(&mut processor, IterationParams::default(), &AlignmentHeader::default());
    assert_eq!(summary.entries, 1, "Wrong number of entries");
    assert_eq!(recorder.indels, vec![(0, 7)], "The deletion should be moved to the start of the run");
    let observations = recorder.at(0, 7).unwrap();
    assert!(observations[0].observation.is_deletion(), "Position 7 should be deleted");
    assert!(recorder.at(0, 12).unwrap()[0].observation.is_reference(), "Position 12 should match");
}

#[test]
fn realigned_stores() {
    let sequence: &[u8] = b"GATTACAGGGGGGCTTACGATCGATCGGATCCA";
    let reference = InMemoryReference::new(&["chr"], vec![sequence.to_vec()]).unwrap();
    let mut entry = internal::entry(0, 0, 0, 27);
    entry.target_aligned_length = 28;
    entry.sequence_variations.push(SequenceVariation::new(b"G", &[GAP], 13, 13));
    let store = internal::write_sorted_store(&[entry], 10);

    let mut recorder = Recorder::default();
    let summary = iterate_stores_realigned(
        &[store.clone()], reference, IterationParams::default(), RealignmentParams::default(), &mut recorder
    );
    assert!(summary.is_ok(), "Iteration failed: {}", summary.unwrap_err());
    assert_eq!(recorder.indels, vec![(0, 7)], "The deletion should be realigned");
    assert_eq!(recorder.processed.len(), 28, "Wrong number of positions");
    internal::remove_store(&store);
}

//-----------------------------------------------------------------------------
