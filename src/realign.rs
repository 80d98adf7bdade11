//! On-the-fly realignment of reads around indels.
//!
//! [`RealignmentProcessor`] sits on top of a [`SortedSource`] and behaves like one.
//! Entries are buffered in a pool for each target until no entry arriving later in sorted order can affect them.
//! Every indel seen in the buffered entries is recorded as an [`ObservedIndel`].
//!
//! When an entry is released, its indel is re-expressed if a better placement is available:
//!
//! * The indel is first moved to the leftmost equivalent placement, which changes neither the read bases nor the score.
//!   Reads with the same indel in a repetitive region therefore end up with the same placement.
//! * If a pooled indel of the same kind and length (and with the same inserted bases) gives the read a strictly higher score,
//!   the indel is moved there.
//!
//! The score of a placement is the number of matching bases minus the number of mismatching bases.
//! Only entries with exactly one indel are realigned.
//! The position of the entry and the aligned lengths never change.

use crate::{AlignmentEntry, ReferenceLocation, SequenceVariation, StoreError, GAP};
use crate::alignment::Column;
use crate::reference::ReferenceSequence;
use crate::store::SortedSource;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Range;

use simple_sds::raw_vector::{AccessRaw, RawVector};

use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// An indel observed in the reads, in reference coordinates.
///
/// A deletion covers reference positions `start..end`.
/// An insertion lies immediately before reference position `start`, and `end == start`.
/// Indels are ordered by `(start, end, from, to)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservedIndel {
    pub start: usize,
    pub end: usize,
    /// Reference bases, or gaps for an insertion.
    pub from: Vec<u8>,
    /// Read bases, or gaps for a deletion.
    pub to: Vec<u8>,
    /// Length of the longest run of a single base in the reference touching the indel.
    pub repeat_length: usize,
}

impl ObservedIndel {
    fn new<R: ReferenceSequence>(reference: &R, target_index: usize, start: usize, from: Vec<u8>, to: Vec<u8>) -> Self {
        let is_insertion = from.first() == Some(&GAP);
        let end = if is_insertion { start } else { start + from.len() };
        let mut touching = vec![start, end];
        if start > 0 {
            touching.push(start - 1);
        }
        if !is_insertion {
            touching.push(end - 1);
        }
        let repeat_length = touching.iter().map(|&position| run_length(reference, target_index, position)).max().unwrap_or(0);
        ObservedIndel { start, end, from, to, repeat_length }
    }

    /// Returns `true` if the indel is an insertion in the read.
    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    /// Returns the number of inserted or deleted bases.
    pub fn indel_length(&self) -> usize {
        self.from.len().max(self.to.len())
    }

    /// Returns the number of reference positions covered by the indel.
    pub fn position_span(&self) -> usize {
        self.end - self.start
    }
}

// Length of the run of identical bases containing the position.
fn run_length<R: ReferenceSequence>(reference: &R, target_index: usize, position: usize) -> usize {
    let base = match reference.base(target_index, position) {
        Some(base) => base,
        None => return 0,
    };
    let mut start = position;
    while start > 0 && reference.base(target_index, start - 1) == Some(base) {
        start -= 1;
    }
    let mut end = position + 1;
    while reference.base(target_index, end) == Some(base) {
        end += 1;
    }
    end - start
}

//-----------------------------------------------------------------------------

// Reference positions covered by pooled indels, as a bitvector starting from `offset`.
#[derive(Clone, Debug)]
struct SpanMask {
    offset: usize,
    bits: RawVector,
}

impl SpanMask {
    fn new() -> Self {
        SpanMask { offset: 0, bits: RawVector::new() }
    }

    fn set(&mut self, range: Range<usize>) {
        let start = range.start.max(self.offset);
        let end = range.end.max(start);
        if end - self.offset > self.bits.len() {
            let new_len = (end - self.offset).max(2 * self.bits.len());
            self.bits.resize(new_len, false);
        }
        for position in start..end {
            self.bits.set_bit(position - self.offset, true);
        }
    }

    fn any(&self, range: Range<usize>) -> bool {
        let start = range.start.max(self.offset);
        let end = range.end.min(self.offset + self.bits.len());
        (start..end).any(|position| self.bits.bit(position - self.offset))
    }

    // Forgets the positions before `position`.
    fn advance(&mut self, position: usize) {
        if position <= self.offset {
            return;
        }
        let shift = position - self.offset;
        if shift >= self.bits.len() {
            self.bits = RawVector::new();
            self.offset = position;
        } else if 2 * shift >= self.bits.len() {
            let mut bits = RawVector::with_len(self.bits.len() - shift, false);
            for i in shift..self.bits.len() {
                if self.bits.bit(i) {
                    bits.set_bit(i - shift, true);
                }
            }
            self.bits = bits;
            self.offset = position;
        }
    }
}

// Buffered entries and observed indels for one target.
#[derive(Clone, Debug)]
struct TargetPool {
    entries: VecDeque<AlignmentEntry>,
    indels: BTreeMap<ObservedIndel, usize>,
    spanning: SpanMask,
}

impl TargetPool {
    fn new() -> Self {
        TargetPool { entries: VecDeque::new(), indels: BTreeMap::new(), spanning: SpanMask::new() }
    }

    fn add_indel(&mut self, indel: ObservedIndel) {
        self.spanning.set(indel.start..indel.end.max(indel.start + 1));
        *self.indels.entry(indel).or_insert(0) += 1;
    }

    // Drops the indels that end at or before the position.
    fn remove_indels(&mut self, position: usize) {
        self.indels.retain(|indel, _| indel.end > position);
        self.spanning.advance(position);
    }

    fn has_spanning_indel(&self, range: Range<usize>) -> bool {
        self.spanning.any(range)
    }
}

//-----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IndelKind {
    Insertion,
    Deletion,
}

// The aligned part of a read with a single indel, reconstructed from the entry and the reference.
#[derive(Clone, Debug)]
struct EntryView {
    read: Vec<u8>,
    qualities: Vec<Option<u8>>,
    // Reference bases covered by the entry.
    window: Vec<u8>,
    kind: IndelKind,
    length: usize,
    // Number of aligned read bases before the indel.
    offset: usize,
    indel_bases: Vec<u8>,
    indel_quality: Vec<u8>,
}

impl EntryView {
    // Returns `None` if the entry does not have exactly one indel or the indel also contains substitutions.
    fn new<R: ReferenceSequence>(entry: &AlignmentEntry, reference: &R) -> Result<Option<Self>, String> {
        let mut indels = entry.sequence_variations.iter().filter(|var| var.is_indel());
        let var = match (indels.next(), indels.next()) {
            (Some(var), None) => var,
            _ => return Ok(None),
        };
        let kind = if var.from.iter().all(|&c| c == GAP) {
            IndelKind::Insertion
        } else if var.to.iter().all(|&c| c == GAP) {
            IndelKind::Deletion
        } else {
            return Ok(None);
        };

        let columns = entry.columns()?;
        let window = reference.bases(entry.target_index, entry.position, entry.end());
        if window.len() != entry.target_aligned_length {
            return Err(format!(
                "Query {} extends past the end of reference sequence {}", entry.query_index, entry.target_index
            ));
        }
        let mut read = Vec::new();
        let mut qualities = Vec::new();
        for column in columns.iter() {
            match *column {
                Column::Match { ref_pos, .. } => {
                    read.push(window[ref_pos - entry.position]);
                    qualities.push(None);
                },
                Column::Variant { to, quality, .. } => {
                    if to != GAP {
                        read.push(to);
                        qualities.push(quality);
                    }
                },
            }
        }

        let length = var.from.len();
        let offset = var.reference_start(entry.position) - entry.position;
        let consistent = match kind {
            IndelKind::Deletion => read.len() + length == window.len() && offset + length <= window.len(),
            IndelKind::Insertion => read.len() == window.len() + length && offset + length <= read.len(),
        };
        if !consistent {
            return Err(format!("Query {} has inconsistent aligned lengths", entry.query_index));
        }
        let indel_bases = match kind {
            IndelKind::Deletion => window[offset..offset + length].to_vec(),
            IndelKind::Insertion => read[offset..offset + length].to_vec(),
        };

        Ok(Some(EntryView {
            read, qualities, window,
            kind, length, offset, indel_bases,
            indel_quality: var.to_quality.clone(),
        }))
    }

    // Read and reference bases skipped by the indel.
    fn skips(&self) -> (usize, usize) {
        match self.kind {
            IndelKind::Deletion => (0, self.length),
            IndelKind::Insertion => (self.length, 0),
        }
    }

    // The indel must have aligned read bases on both sides.
    fn is_valid(&self, offset: usize) -> bool {
        let (read_skip, _) = self.skips();
        offset >= 1 && offset + read_skip < self.read.len()
    }

    fn bases_at(&self, offset: usize) -> &[u8] {
        match self.kind {
            IndelKind::Deletion => &self.window[offset..offset + self.length],
            IndelKind::Insertion => &self.read[offset..offset + self.length],
        }
    }

    fn score(&self, offset: usize) -> isize {
        let (read_skip, ref_skip) = self.skips();
        let left = self.read[..offset].iter().zip(self.window[..offset].iter());
        let right = self.read[offset + read_skip..].iter().zip(self.window[offset + ref_skip..].iter());
        left.chain(right).map(|(a, b)| if a == b { 1 } else { -1 }).sum()
    }

    // Moves the indel to the leftmost equivalent placement.
    fn normalize(&self, mut offset: usize) -> usize {
        let sequence = match self.kind {
            IndelKind::Deletion => &self.window,
            IndelKind::Insertion => &self.read,
        };
        while offset > 1 && sequence[offset - 1] == sequence[offset - 1 + self.length] {
            offset -= 1;
        }
        offset
    }

    // Placement of a pooled indel in this read, if it is compatible.
    fn candidate_offset(&self, indel: &ObservedIndel, position: usize) -> Option<usize> {
        if indel.start < position || indel.indel_length() != self.length {
            return None;
        }
        let offset = indel.start - position;
        let same_kind = match self.kind {
            IndelKind::Deletion => !indel.is_insertion(),
            IndelKind::Insertion => indel.is_insertion(),
        };
        if !same_kind || !self.is_valid(offset) {
            return None;
        }
        if self.kind == IndelKind::Insertion && self.bases_at(offset) != indel.to.as_slice() {
            return None;
        }
        Some(offset)
    }

    fn observed<R: ReferenceSequence>(&self, offset: usize, reference: &R, entry: &AlignmentEntry) -> ObservedIndel {
        let bases = self.bases_at(offset).to_vec();
        let gaps = vec![GAP; self.length];
        match self.kind {
            IndelKind::Deletion => ObservedIndel::new(reference, entry.target_index, entry.position + offset, bases, gaps),
            IndelKind::Insertion => ObservedIndel::new(reference, entry.target_index, entry.position + offset, gaps, bases),
        }
    }

    fn quality(&self, range: Range<usize>) -> Vec<u8> {
        self.qualities[range].iter().copied().collect::<Option<Vec<u8>>>().unwrap_or_default()
    }

    // Substitutions in a gapless part of the alignment, with adjacent mismatches as a single variation.
    fn substitutions(&self, read_start: usize, ref_start: usize, len: usize, entry: &AlignmentEntry, result: &mut Vec<SequenceVariation>) {
        let mut i = 0;
        while i < len {
            if self.read[read_start + i] == self.window[ref_start + i] {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < len && self.read[read_start + i] != self.window[ref_start + i] {
                i += 1;
            }
            let mut var = SequenceVariation::new(
                &self.window[ref_start + run_start..ref_start + i],
                &self.read[read_start + run_start..read_start + i],
                ref_start + run_start + 1,
                entry.read_index(read_start + run_start)
            );
            var.to_quality = self.quality(read_start + run_start..read_start + i);
            result.push(var);
        }
    }

    // Sequence variations for the read with the indel at the given offset.
    fn variations(&self, offset: usize, entry: &AlignmentEntry) -> Vec<SequenceVariation> {
        let (read_skip, ref_skip) = self.skips();
        let mut result = Vec::new();
        self.substitutions(0, 0, offset, entry, &mut result);

        let bases = self.bases_at(offset);
        let gaps = vec![GAP; self.length];
        let indel = match self.kind {
            IndelKind::Deletion => SequenceVariation::new(bases, &gaps, offset + 1, entry.read_index(offset)),
            IndelKind::Insertion => {
                let mut var = SequenceVariation::new(&gaps, bases, offset, entry.read_index(offset));
                // Qualities belong to the inserted bases, which do not change.
                var.to_quality = if bases == self.indel_bases.as_slice() {
                    self.indel_quality.clone()
                } else {
                    self.quality(offset..offset + self.length)
                };
                var
            },
        };
        result.push(indel);

        let tail = self.read.len() - offset - read_skip;
        self.substitutions(offset + read_skip, offset + ref_skip, tail, entry, &mut result);
        result
    }
}

// Indels of the entry for the pool, normalized when possible.
fn observe_indels<R: ReferenceSequence>(entry: &AlignmentEntry, reference: &R) -> Vec<ObservedIndel> {
    if let Ok(Some(view)) = EntryView::new(entry, reference) {
        return vec![view.observed(view.normalize(view.offset), reference, entry)];
    }
    entry.sequence_variations.iter().filter_map(|var| {
        let is_insertion = !var.from.is_empty() && var.from.iter().all(|&c| c == GAP);
        let is_deletion = !var.to.is_empty() && var.to.iter().all(|&c| c == GAP);
        if is_insertion || is_deletion {
            Some(ObservedIndel::new(reference, entry.target_index, var.reference_start(entry.position), var.from.clone(), var.to.clone()))
        } else {
            None
        }
    }).collect()
}

fn realign_entry<R: ReferenceSequence>(
    entry: AlignmentEntry, pool: &TargetPool, reference: &R, statistics: &mut RealignmentStatistics
) -> AlignmentEntry {
    let view = match EntryView::new(&entry, reference) {
        Ok(Some(view)) => view,
        Ok(None) => return entry,
        Err(message) => {
            warn!("Cannot realign: {}", message);
            statistics.entries_not_realignable += 1;
            return entry;
        },
    };

    let mut best = view.normalize(view.offset);
    if pool.has_spanning_indel(entry.position..entry.end()) {
        let mut best_score = view.score(best);
        for indel in pool.indels.keys() {
            if let Some(offset) = view.candidate_offset(indel, entry.position) {
                let score = view.score(offset);
                if score > best_score {
                    best = offset;
                    best_score = score;
                }
            }
        }
    }
    if best == view.offset {
        return entry;
    }

    debug!(
        "Moved the indel of query {} from {} to {} on target {}",
        entry.query_index, entry.position + view.offset, entry.position + best, entry.target_index
    );
    statistics.entries_realigned += 1;
    let mut result = entry;
    result.sequence_variations = view.variations(best, &result);
    result
}

//-----------------------------------------------------------------------------

/// Parameters for [`RealignmentProcessor`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RealignmentParams {
    /// Entries are held until the input has advanced this far past them.
    ///
    /// Defaults to twice the length of the longest query seen so far.
    pub window_length: Option<usize>,
    /// Log statistics at info level when the input is exhausted.
    pub progress: bool,
}

impl RealignmentParams {
    /// The default window is this many times the length of the longest query.
    pub const WINDOW_FACTOR: usize = 2;
}

/// Counters maintained by [`RealignmentProcessor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RealignmentStatistics {
    pub entries_read: usize,
    pub entries_returned: usize,
    pub entries_realigned: usize,
    pub entries_not_realignable: usize,
    pub indels_observed: usize,
}

/// A sorted source that realigns entries around indels observed in nearby entries.
///
/// # Examples
///
/// ```
/// use goby_base::{AlignmentEntry, RealignmentParams, RealignmentProcessor, SequenceVariation};
/// use goby_base::reference::InMemoryReference;
/// use goby_base::store::{SortedEntries, SortedSource};
///
/// let reference = b"GATTACAGGGGGGCTTACG";
/// let reference = InMemoryReference::new(&["chr"], vec![reference.to_vec()]).unwrap();
///
/// // Read GATTACAGGGGGCTTAC with one G deleted from the end of the run.
/// let mut entry = AlignmentEntry::new(0, 0, 0);
/// entry.query_length = 17;
/// entry.query_aligned_length = 17;
/// entry.target_aligned_length = 18;
/// entry.sequence_variations.push(SequenceVariation::new(b"G", b"-", 13, 13));
///
/// let source = SortedEntries::new(vec![entry]).unwrap();
/// let mut processor = RealignmentProcessor::new(source, reference, RealignmentParams::default());
/// let realigned = processor.next_entry().unwrap().unwrap();
/// // The deletion moves to the start of the run.
/// assert_eq!(realigned.sequence_variations[0].position, 8);
/// assert!(processor.next_entry().unwrap().is_none());
/// ```
pub struct RealignmentProcessor<S: SortedSource, R: ReferenceSequence> {
    source: S,
    reference: R,
    params: RealignmentParams,
    pools: HashMap<usize, TargetPool>,
    // Targets with pools in the order they were seen.
    active_targets: VecDeque<usize>,
    max_query_length: usize,
    last_pulled: Option<ReferenceLocation>,
    last_returned: Option<ReferenceLocation>,
    exhausted: bool,
    reported: bool,
    statistics: RealignmentStatistics,
}

impl<S: SortedSource, R: ReferenceSequence> RealignmentProcessor<S, R> {
    /// Creates a processor over the source.
    ///
    /// Target indexes of the entries must be valid in the reference.
    pub fn new(source: S, reference: R, params: RealignmentParams) -> Self {
        RealignmentProcessor {
            source, reference, params,
            pools: HashMap::new(),
            active_targets: VecDeque::new(),
            max_query_length: 0,
            last_pulled: None,
            last_returned: None,
            exhausted: false,
            reported: false,
            statistics: RealignmentStatistics::default(),
        }
    }

    /// Returns the current window length.
    pub fn window_length(&self) -> usize {
        self.params.window_length.unwrap_or(RealignmentParams::WINDOW_FACTOR * self.max_query_length)
    }

    /// Returns the statistics so far.
    pub fn statistics(&self) -> RealignmentStatistics {
        self.statistics
    }

    /// Returns the reference.
    pub fn reference(&self) -> &R {
        &self.reference
    }

    /// Returns the next realigned entry at or after `(target_index, position)`.
    ///
    /// Buffered entries before the location are dropped.
    /// Returns [`StoreError::SeekMisuse`] if the location is before the last entry returned.
    pub fn next_realigned_entry(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        let requested = ReferenceLocation::new(target_index, position);
        if let Some(current) = self.last_returned {
            if requested < current {
                return Err(StoreError::SeekMisuse { requested, current });
            }
        }
        self.next_from(Some(requested))
    }

    fn next_from(&mut self, key: Option<ReferenceLocation>) -> Result<Option<AlignmentEntry>, StoreError> {
        loop {
            self.fill(key)?;
            let entry = match self.pop_front() {
                Some(entry) => entry,
                None => {
                    self.report();
                    return Ok(None);
                },
            };
            if key.map_or(false, |key| entry.location() < key) {
                continue;
            }
            let entry = match self.pools.get(&entry.target_index) {
                Some(pool) => realign_entry(entry, pool, &self.reference, &mut self.statistics),
                None => entry,
            };
            self.last_returned = Some(entry.location());
            self.statistics.entries_returned += 1;
            return Ok(Some(entry));
        }
    }

    fn front_location(&self) -> Option<ReferenceLocation> {
        self.active_targets.iter()
            .filter_map(|target| self.pools.get(target))
            .find_map(|pool| pool.entries.front())
            .map(|entry| entry.location())
    }

    fn ready_to_release(&self) -> bool {
        let front = match self.front_location() {
            Some(front) => front,
            None => return false,
        };
        if self.exhausted {
            return true;
        }
        match self.last_pulled {
            Some(last) => last.target_index != front.target_index || last.position >= front.position + self.window_length(),
            None => false,
        }
    }

    // Pulls entries from the source until the front entry can be released or the source is exhausted.
    fn fill(&mut self, key: Option<ReferenceLocation>) -> Result<(), StoreError> {
        while !self.exhausted && !self.ready_to_release() {
            let pulled = match (key, self.last_pulled) {
                (Some(key), Some(last)) if key <= last => self.source.next_entry()?,
                (Some(key), _) => self.source.skip_to(key.target_index, key.position)?,
                (None, _) => self.source.next_entry()?,
            };
            match pulled {
                Some(entry) => self.push(entry)?,
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    fn push(&mut self, entry: AlignmentEntry) -> Result<(), StoreError> {
        let location = entry.location();
        if let Some(previous) = self.last_pulled {
            if location < previous {
                return Err(StoreError::Ordering { previous, next: location });
            }
        }
        self.last_pulled = Some(location);
        self.statistics.entries_read += 1;
        self.max_query_length = self.max_query_length.max(entry.query_length);

        if self.active_targets.back() != Some(&entry.target_index) {
            self.active_targets.push_back(entry.target_index);
        }
        let pool = self.pools.entry(entry.target_index).or_insert_with(TargetPool::new);
        for indel in observe_indels(&entry, &self.reference) {
            pool.add_indel(indel);
            self.statistics.indels_observed += 1;
        }
        pool.entries.push_back(entry);
        Ok(())
    }

    // Removes the first buffered entry and drops the indels it can no longer use.
    fn pop_front(&mut self) -> Option<AlignmentEntry> {
        loop {
            let target = *self.active_targets.front()?;
            if let Some(pool) = self.pools.get_mut(&target) {
                if let Some(entry) = pool.entries.pop_front() {
                    pool.remove_indels(entry.position);
                    return Some(entry);
                }
            }
            // Keep the pool of the current target while more entries may arrive.
            if self.active_targets.len() == 1 && !self.exhausted {
                return None;
            }
            self.active_targets.pop_front();
            self.pools.remove(&target);
        }
    }

    fn report(&mut self) {
        if self.reported || !self.exhausted {
            return;
        }
        self.reported = true;
        let statistics = self.statistics;
        if self.params.progress {
            info!(
                "Realignment: {} entries, {} realigned, {} not realignable, {} indels observed",
                statistics.entries_returned, statistics.entries_realigned,
                statistics.entries_not_realignable, statistics.indels_observed
            );
        } else {
            debug!(
                "Realignment: {} entries, {} realigned, {} not realignable, {} indels observed",
                statistics.entries_returned, statistics.entries_realigned,
                statistics.entries_not_realignable, statistics.indels_observed
            );
        }
    }
}

impl<S: SortedSource, R: ReferenceSequence> SortedSource for RealignmentProcessor<S, R> {
    fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        self.next_from(None)
    }

    fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        self.next_realigned_entry(target_index, position)
    }
}

impl<S: SortedSource, R: ReferenceSequence> Iterator for RealignmentProcessor<S, R> {
    type Item = Result<AlignmentEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_from(None).transpose()
    }
}

//-----------------------------------------------------------------------------
