//! Pileup iteration over sorted entries.
//!
//! [`IterateSortedAlignments`] reads entries in sorted order and collects, for every reference position covered by an entry,
//! one [`PositionBaseInfo`] for each read base aligned to that position.
//! When no later entry can cover a position, the observations are passed to [`PileupConsumer::process_positions`]
//! exactly once, in increasing order of position.
//!
//! Positions are 0-based.
//! Matching bases and substitutions are observed at their reference position.
//! Each deleted reference base is observed at its position with the read index of the preceding read base.
//! Inserted bases are observed at the reference position preceding the insertion.

use crate::{AlignmentEntry, AlignmentHeader, ConcatParams, ConcatSortedAlignmentReader, ReferenceLocation, SequenceVariation, StoreError};
use crate::alignment::Column;
use crate::realign::{RealignmentParams, RealignmentProcessor};
use crate::reference::ReferenceSequence;
use crate::store::SortedSource;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// What a read shows at a reference position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseObservation {
    /// The read base matches the reference.
    Reference,
    /// A base of a declared sequence variation.
    ///
    /// `from` is the reference base and `to` the read base; either may be a gap.
    Variant {
        from: u8,
        to: u8,
        quality: Option<u8>,
    },
}

impl BaseObservation {
    /// Returns `true` if the read matches the reference.
    pub fn is_reference(&self) -> bool {
        matches!(self, BaseObservation::Reference)
    }

    /// Returns `true` if the observation is an inserted read base.
    pub fn is_insertion(&self) -> bool {
        matches!(self, BaseObservation::Variant { from: crate::GAP, .. })
    }

    /// Returns `true` if the observation is a deleted reference base.
    pub fn is_deletion(&self) -> bool {
        matches!(self, BaseObservation::Variant { to: crate::GAP, .. })
    }
}

/// One read base aligned to a reference position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionBaseInfo {
    pub query_index: usize,
    /// 1-based index in the read, in sequencing orientation.
    pub read_index: usize,
    pub sample_index: usize,
    pub matches_forward_strand: bool,
    pub observation: BaseObservation,
}

/// Callbacks from [`IterateSortedAlignments`].
///
/// Only [`PileupConsumer::process_positions`] is required.
/// The observation hooks are called for every observation within the window, before the observation is collected.
/// All calls are made synchronously from the iterating thread.
pub trait PileupConsumer {
    /// Called once before iteration with the number of targets, if known.
    fn process_number_of_targets(&mut self, _number_of_targets: usize) {}

    /// A read base that matches the reference.
    fn observe_reference_base(&mut self, _entry: &AlignmentEntry, _position: usize, _info: &PositionBaseInfo) {}

    /// A base of a sequence variation.
    fn observe_variant_base(&mut self, _entry: &AlignmentEntry, _variation: &SequenceVariation, _position: usize, _info: &PositionBaseInfo) {}

    /// An insertion or a deletion starting at the given reference position.
    fn observe_indel(&mut self, _entry: &AlignmentEntry, _variation: &SequenceVariation, _start_position: usize) {}

    /// All observations at the position, which will not receive more observations.
    fn process_positions(&mut self, target_index: usize, position: usize, observations: Vec<PositionBaseInfo>);
}

//-----------------------------------------------------------------------------

/// Parameters for [`IterateSortedAlignments`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterationParams {
    /// Only positions in `start..=end` are observed.
    pub window: Option<(ReferenceLocation, ReferenceLocation)>,
    /// Entries starting up to this many bases before the start of the window are also read.
    pub start_flap_length: usize,
    /// Only targets with these names are processed.
    pub reference_names: Option<Vec<String>>,
    /// Log progress information.
    pub progress: bool,
}

impl IterationParams {
    /// Progress is logged after this many entries.
    pub const PROGRESS_INTERVAL: usize = 1_000_000;
}

/// Summary of an iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Number of entries observed.
    pub entries: usize,
    /// Number of calls to [`PileupConsumer::process_positions`].
    pub positions: usize,
    /// Number of entries with malformed variations, which were skipped.
    pub skipped_entries: usize,
}

//-----------------------------------------------------------------------------

/// Pileup iteration over a sorted source.
///
/// # Examples
///
/// ```
/// use goby_base::{AlignmentEntry, AlignmentHeader};
/// use goby_base::pileup::{IterateSortedAlignments, IterationParams, PileupConsumer, PositionBaseInfo};
/// use goby_base::store::SortedEntries;
///
/// struct Depth(Vec<(usize, usize)>);
///
/// impl PileupConsumer for Depth {
///     fn process_positions(&mut self, _target_index: usize, position: usize, observations: Vec<PositionBaseInfo>) {
///         self.0.push((position, observations.len()));
///     }
/// }
///
/// let mut first = AlignmentEntry::new(0, 0, 10);
/// first.query_length = 3;
/// first.query_aligned_length = 3;
/// first.target_aligned_length = 3;
/// let mut second = AlignmentEntry::new(1, 0, 11);
/// second.query_length = 2;
/// second.query_aligned_length = 2;
/// second.target_aligned_length = 2;
///
/// let mut source = SortedEntries::new(vec![first, second]).unwrap();
/// let mut iterator = IterateSortedAlignments::new(IterationParams::default(), &AlignmentHeader::default()).unwrap();
/// let mut depth = Depth(Vec::new());
/// iterator.iterate(&mut source, &mut depth).unwrap();
/// assert_eq!(depth.0, vec![(10, 1), (11, 2), (12, 2)]);
/// ```
#[derive(Clone, Debug)]
pub struct IterateSortedAlignments {
    params: IterationParams,
    included_targets: Option<BTreeSet<usize>>,
    positions: BTreeMap<usize, Vec<PositionBaseInfo>>,
    current_target: Option<usize>,
    summary: IterationSummary,
}

impl IterateSortedAlignments {
    /// Creates an iterator, resolving reference names with the target identifiers of the header.
    ///
    /// Returns an error if a reference name is not in the header.
    pub fn new(params: IterationParams, header: &AlignmentHeader) -> Result<Self, StoreError> {
        let included_targets = match params.reference_names.as_ref() {
            Some(names) => {
                let mut targets = BTreeSet::new();
                for name in names.iter() {
                    let target_index = header.target_identifiers.index(name).ok_or_else(|| {
                        StoreError::format(format!("Unknown reference name: {}", name))
                    })?;
                    targets.insert(target_index);
                }
                Some(targets)
            },
            None => None,
        };
        Ok(IterateSortedAlignments {
            params, included_targets,
            positions: BTreeMap::new(),
            current_target: None,
            summary: IterationSummary::default(),
        })
    }

    /// Returns the parameters.
    pub fn params(&self) -> &IterationParams {
        &self.params
    }

    /// Returns the location where reading should start.
    ///
    /// This is the start of the window minus the start flap, or the beginning of the first included target.
    pub fn first_location(&self) -> ReferenceLocation {
        match (self.params.window, self.included_targets.as_ref()) {
            (Some((start, _)), _) => {
                ReferenceLocation::new(start.target_index, start.position.saturating_sub(self.params.start_flap_length))
            },
            (None, Some(targets)) => ReferenceLocation::new(targets.iter().next().copied().unwrap_or(0), 0),
            (None, None) => ReferenceLocation::new(0, 0),
        }
    }

    fn includes_target(&self, target_index: usize) -> bool {
        self.included_targets.as_ref().map_or(true, |targets| targets.contains(&target_index))
    }

    fn next_included_target(&self, target_index: usize) -> Option<usize> {
        match self.included_targets.as_ref() {
            Some(targets) => targets.range(target_index + 1..).next().copied(),
            None => Some(target_index + 1),
        }
    }

    fn in_window(&self, target_index: usize, position: usize) -> bool {
        match self.params.window {
            Some((start, end)) => {
                let location = ReferenceLocation::new(target_index, position);
                location >= start && location <= end
            },
            None => true,
        }
    }

    /// Iterates over the source, passing observations to the consumer.
    ///
    /// Entries are read from [`IterateSortedAlignments::first_location`] onward.
    pub fn iterate<S: SortedSource, C: PileupConsumer>(&mut self, source: &mut S, consumer: &mut C) -> Result<IterationSummary, StoreError> {
        self.positions.clear();
        self.current_target = None;
        self.summary = IterationSummary::default();

        let first = self.first_location();
        let mut next = source.skip_to(first.target_index, first.position)?;
        while let Some(entry) = next {
            if let Some((_, end)) = self.params.window {
                if entry.location() > end {
                    break;
                }
            }
            if !self.includes_target(entry.target_index) {
                next = match self.next_included_target(entry.target_index) {
                    Some(target_index) => source.skip_to(target_index, 0)?,
                    None => None,
                };
                continue;
            }

            if self.current_target != Some(entry.target_index) {
                self.flush_before(usize::MAX, consumer);
                self.current_target = Some(entry.target_index);
            }
            self.flush_before(entry.position, consumer);
            self.observe(&entry, consumer);

            self.summary.entries += 1;
            if self.params.progress && self.summary.entries % IterationParams::PROGRESS_INTERVAL == 0 {
                info!("Processed {} entries, now at {}", self.summary.entries, entry.location());
            }
            next = source.next_entry()?;
        }
        self.flush_before(usize::MAX, consumer);

        if self.params.progress {
            info!("Pileup: {} entries, {} positions", self.summary.entries, self.summary.positions);
        } else {
            debug!("Pileup: {} entries, {} positions", self.summary.entries, self.summary.positions);
        }
        Ok(self.summary)
    }

    // Processes the positions on the current target before the given position.
    fn flush_before<C: PileupConsumer>(&mut self, position: usize, consumer: &mut C) {
        let target_index = match self.current_target {
            Some(target_index) => target_index,
            None => return,
        };
        let remaining = self.positions.split_off(&position);
        let ready = std::mem::replace(&mut self.positions, remaining);
        for (position, observations) in ready {
            consumer.process_positions(target_index, position, observations);
            self.summary.positions += 1;
        }
    }

    fn observe<C: PileupConsumer>(&mut self, entry: &AlignmentEntry, consumer: &mut C) {
        let columns = match entry.columns() {
            Ok(columns) => columns,
            Err(message) => {
                warn!("Skipping an entry: {}", message);
                self.summary.skipped_entries += 1;
                return;
            },
        };
        let target_index = entry.target_index;

        for column in columns.iter() {
            let (position, read_offset, observation, variation) = match *column {
                Column::Match { ref_pos, read_offset } => (ref_pos, read_offset, BaseObservation::Reference, None),
                Column::Variant { ref_pos, read_offset, from, to, quality, variation } => {
                    (ref_pos, read_offset, BaseObservation::Variant { from, to, quality }, Some(variation))
                },
            };
            if !self.in_window(target_index, position) {
                continue;
            }
            let info = PositionBaseInfo {
                query_index: entry.query_index,
                read_index: entry.read_index(read_offset),
                sample_index: entry.sample_index,
                matches_forward_strand: !entry.matching_reverse_strand,
                observation,
            };
            match variation.and_then(|id| entry.sequence_variations.get(id)) {
                Some(var) => consumer.observe_variant_base(entry, var, position, &info),
                None => consumer.observe_reference_base(entry, position, &info),
            }
            self.positions.entry(position).or_default().push(info);
        }

        for var in entry.sequence_variations.iter().filter(|var| var.is_indel()) {
            let start = var.reference_start(entry.position);
            if self.in_window(target_index, start) {
                consumer.observe_indel(entry, var, start);
            }
        }
    }
}

//-----------------------------------------------------------------------------

// Opens the stores as a sorted concatenation with sample indexes set to store indexes.
fn open_stores<P: AsRef<Path>>(basenames: &[P], params: &IterationParams) -> Result<ConcatSortedAlignmentReader, StoreError> {
    let concat_params = ConcatParams { adjust_sample_indices: true, ..ConcatParams::default() };
    match params.window {
        Some((start, end)) => {
            let flap_start = ReferenceLocation::new(start.target_index, start.position.saturating_sub(params.start_flap_length));
            ConcatSortedAlignmentReader::open_window(basenames, concat_params, flap_start, end)
        },
        None => ConcatSortedAlignmentReader::open(basenames, concat_params),
    }
}

/// Runs pileup iteration over the sorted concatenation of the stores.
///
/// The sample index of each observation is the index of the store it came from.
pub fn iterate_stores<P: AsRef<Path>, C: PileupConsumer>(
    basenames: &[P], params: IterationParams, consumer: &mut C
) -> Result<IterationSummary, StoreError> {
    let mut reader = open_stores(basenames, &params)?;
    let mut iterator = IterateSortedAlignments::new(params, reader.header())?;
    consumer.process_number_of_targets(reader.header().number_of_targets);
    iterator.iterate(&mut reader, consumer)
}

/// Runs pileup iteration over the sorted concatenation of the stores, realigning the entries around indels.
///
/// Target indexes of the stores must be valid in the reference.
pub fn iterate_stores_realigned<P: AsRef<Path>, R: ReferenceSequence, C: PileupConsumer>(
    basenames: &[P], reference: R, params: IterationParams, realignment: RealignmentParams, consumer: &mut C
) -> Result<IterationSummary, StoreError> {
    let reader = open_stores(basenames, &params)?;
    let header = reader.header().clone();
    let mut iterator = IterateSortedAlignments::new(params, &header)?;
    consumer.process_number_of_targets(header.number_of_targets);
    let mut processor = RealignmentProcessor::new(reader, reference, realignment);
    iterator.iterate(&mut processor, consumer)
}

//-----------------------------------------------------------------------------
