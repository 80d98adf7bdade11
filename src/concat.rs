//! Reading several stores as one.
//!
//! [`ConcatAlignmentReader`] returns the entries of each store in turn.
//! [`ConcatSortedAlignmentReader`] merges sorted stores into a single sorted stream.
//!
//! By default each store gets a disjoint range of query indexes: the offset of a store is the total number of queries in the stores before it.
//! The offsets and the other reconciled metadata are collected into a [`MergeState`] when the readers are opened.

use crate::{AlignmentEntry, AlignmentHeader, AlignmentReader, ReferenceLocation, SortedAlignmentReader, StoreError};
use crate::perms::{PermutationReader, PermutationWriter};
use crate::store::{QueryLengths, SortedSource};

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};


//-----------------------------------------------------------------------------

/// Parameters for concatenating stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConcatParams {
    /// Give each store a disjoint range of query indexes.
    pub adjust_query_indices: bool,
    /// Replace the sample index of each entry with the index of its store.
    pub adjust_sample_indices: bool,
    /// Return small query indexes from permuted stores instead of the original indexes.
    ///
    /// The output should then be accompanied by the permutation written with [`MergeState::concatenate_permutations`].
    pub keep_permuted_indices: bool,
}

impl Default for ConcatParams {
    fn default() -> Self {
        ConcatParams {
            adjust_query_indices: true,
            adjust_sample_indices: false,
            keep_permuted_indices: false,
        }
    }
}

//-----------------------------------------------------------------------------

/// Reconciled metadata for a concatenation of stores.
///
/// The state is computed once from the headers of the sources and does not change during iteration.
#[derive(Clone, Debug)]
pub struct MergeState {
    basenames: Vec<PathBuf>,
    offsets: Vec<usize>,
    permutations: Vec<Option<PermutationReader>>,
    header: AlignmentHeader,
    params: ConcatParams,
}

impl MergeState {
    /// Builds the state from the headers of the sources.
    ///
    /// Permutations are loaded for sources that declare them.
    /// Returns an error if the sources disagree on the number of targets.
    pub fn new(basenames: &[PathBuf], headers: &[&AlignmentHeader], params: ConcatParams) -> Result<Self, StoreError> {
        let first = match headers.first() {
            Some(header) => *header,
            None => return Err(StoreError::format("No stores to concatenate")),
        };
        let targets: Vec<usize> = headers.iter().map(|header| header.number_of_targets).collect();
        if targets.iter().any(|&n| n != first.number_of_targets) {
            return Err(StoreError::format(format!(
                "The number of targets must match across the stores, found {:?}", targets
            )));
        }

        let mut offsets = Vec::with_capacity(headers.len());
        let mut number_of_queries = 0;
        let mut number_of_aligned_reads = 0;
        for header in headers.iter() {
            if params.adjust_query_indices {
                offsets.push(number_of_queries);
                number_of_queries = number_of_queries.checked_add(header.number_of_queries).ok_or_else(|| {
                    StoreError::format("Total number of queries overflows")
                })?;
                number_of_aligned_reads = number_of_aligned_reads.saturating_add(header.number_of_aligned_reads);
            } else {
                offsets.push(0);
                number_of_queries = number_of_queries.max(header.number_of_queries);
                number_of_aligned_reads = number_of_aligned_reads.max(header.number_of_aligned_reads);
            }
        }

        let mut permutations = Vec::with_capacity(headers.len());
        for (basename, header) in basenames.iter().zip(headers.iter()) {
            if header.query_indices_permuted {
                permutations.push(Some(PermutationReader::open(basename)?));
            } else {
                permutations.push(None);
            }
        }
        let any_permuted = permutations.iter().any(|perm| perm.is_some());
        if any_permuted && params.keep_permuted_indices && !params.adjust_query_indices {
            return Err(StoreError::Unsupported(String::from(
                "Keeping permuted query indexes requires query index adjustment"
            )));
        }

        let query_lengths = if params.adjust_query_indices {
            let mut lengths = Some(Vec::new());
            for header in headers.iter() {
                lengths = match (lengths, header.query_lengths.expand(header.number_of_queries)) {
                    (Some(mut lengths), Some(local)) => {
                        lengths.extend(local);
                        Some(lengths)
                    },
                    _ => None,
                };
            }
            lengths.map(QueryLengths::new).unwrap_or_default()
        } else {
            headers.iter()
                .max_by_key(|header| header.number_of_queries)
                .map(|header| header.query_lengths.clone())
                .unwrap_or_default()
        };

        let header = AlignmentHeader {
            number_of_queries,
            number_of_targets: first.number_of_targets,
            query_identifiers: Default::default(),
            target_identifiers: first.target_identifiers.clone(),
            target_lengths: first.target_lengths.clone(),
            query_lengths,
            aligner_name: first.aligner_name.clone(),
            aligner_version: first.aligner_version.clone(),
            sorted: false,
            indexed: false,
            query_indices_permuted: any_permuted && params.keep_permuted_indices,
            number_of_aligned_reads,
            query_index_range: None,
        };

        Ok(MergeState {
            basenames: basenames.to_vec(),
            offsets,
            permutations,
            header,
            params,
        })
    }

    /// Returns the number of sources.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if there are no sources.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Returns the basenames of the sources.
    pub fn basenames(&self) -> &[PathBuf] {
        &self.basenames
    }

    /// Returns the query index offset of the source.
    pub fn offset(&self, source: usize) -> usize {
        self.offsets[source]
    }

    /// Returns the merged header.
    pub fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    /// Returns the parameters.
    pub fn params(&self) -> &ConcatParams {
        &self.params
    }

    /// Returns `true` if any source has permuted query indexes.
    pub fn has_permutations(&self) -> bool {
        self.permutations.iter().any(|perm| perm.is_some())
    }

    /// Maps a query index stored in the source to the merged namespace.
    pub fn query_index(&self, source: usize, stored: usize) -> Result<usize, StoreError> {
        let local = match (&self.permutations[source], self.params.keep_permuted_indices) {
            (Some(permutation), false) => permutation.permutate(stored).ok_or_else(|| {
                StoreError::format(format!(
                    "Small query index {} is missing from the permutation of {}", stored, self.basenames[source].display()
                ))
            })?,
            _ => stored,
        };
        Ok(self.offsets[source] + local)
    }

    // Rewrites the indexes of an entry from the source.
    fn adjust(&self, source: usize, mut entry: AlignmentEntry) -> Result<AlignmentEntry, StoreError> {
        entry.query_index = self.query_index(source, entry.query_index)?;
        if self.params.adjust_sample_indices {
            entry.sample_index = source;
        }
        Ok(entry)
    }

    /// Writes a permutation for the merged small query indexes to the store with the given basename.
    ///
    /// The permutation maps `offset + small` to `offset + original` for permuted sources.
    /// Sources without a permutation contribute the identity on their query range.
    /// Nothing is written if no source is permuted; returns `true` if the file was written.
    pub fn concatenate_permutations<P: AsRef<Path>>(&self, basename: P) -> Result<bool, StoreError> {
        if !self.has_permutations() {
            return Ok(false);
        }
        if !self.params.adjust_query_indices {
            return Err(StoreError::Unsupported(String::from(
                "Concatenating permutations requires query index adjustment"
            )));
        }
        let mut writer = PermutationWriter::new(basename);
        for (source, permutation) in self.permutations.iter().enumerate() {
            let offset = self.offsets[source];
            match permutation {
                Some(permutation) => {
                    for (small, original) in permutation.iter() {
                        writer.push(offset + small, offset + original);
                    }
                },
                None => {
                    let next_offset = self.offsets.get(source + 1).copied().unwrap_or(self.header.number_of_queries);
                    for query_index in offset..next_offset {
                        writer.push(query_index, query_index);
                    }
                },
            }
        }
        writer.close()?;
        Ok(true)
    }
}

// Combines the statistics of the sources with prefixes `part1.`, `part2.`, and so on.
fn prefixed_statistics(statistics: Vec<BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for (i, values) in statistics.into_iter().enumerate() {
        for (key, value) in values {
            result.insert(format!("part{}.{}", i + 1, key), value);
        }
    }
    result
}

//-----------------------------------------------------------------------------

/// Reads the entries of several stores, one store after another.
pub struct ConcatAlignmentReader {
    state: MergeState,
    readers: Vec<AlignmentReader>,
    active: usize,
}

impl ConcatAlignmentReader {
    /// Opens the stores with the given basenames.
    pub fn open<P: AsRef<Path>>(basenames: &[P], params: ConcatParams) -> Result<Self, StoreError> {
        let mut readers = Vec::with_capacity(basenames.len());
        for basename in basenames.iter() {
            readers.push(AlignmentReader::open(basename)?);
        }
        let names: Vec<PathBuf> = readers.iter().map(|reader| reader.basename().to_path_buf()).collect();
        let headers: Vec<&AlignmentHeader> = readers.iter().map(|reader| reader.header()).collect();
        let state = MergeState::new(&names, &headers, params)?;
        info!("Concatenating {} stores with {} queries", state.len(), state.header().number_of_queries);
        Ok(ConcatAlignmentReader { state, readers, active: 0 })
    }

    /// Returns the merged state.
    pub fn state(&self) -> &MergeState {
        &self.state
    }

    /// Returns the merged header.
    pub fn header(&self) -> &AlignmentHeader {
        self.state.header()
    }

    /// Returns the statistics of the sources with `partN.` prefixes.
    pub fn statistics(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let statistics = self.readers.iter().map(|reader| reader.statistics()).collect::<Result<Vec<_>, _>>()?;
        Ok(prefixed_statistics(statistics))
    }

    /// Returns the index of the source of the last entry.
    pub fn last_reader_index(&self) -> usize {
        self.active
    }

    /// Returns the next entry, or [`None`] if all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        while self.active < self.readers.len() {
            if let Some(entry) = self.readers[self.active].next_entry()? {
                return self.state.adjust(self.active, entry).map(Some);
            }
            debug!("Finished source {}", self.active);
            if self.active + 1 == self.readers.len() {
                break;
            }
            self.active += 1;
        }
        Ok(None)
    }
}

impl Iterator for ConcatAlignmentReader {
    type Item = Result<AlignmentEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

//-----------------------------------------------------------------------------

/// Merges several sorted stores into a single stream sorted by [`ReferenceLocation`].
///
/// The merge keeps at most one pending entry per source in a priority queue.
/// Ties between sources are broken by source order.
/// A source is advanced only when its pending entry has been returned or skipped.
///
/// # Examples
///
/// ```no_run
/// use goby_base::{ConcatParams, ConcatSortedAlignmentReader};
///
/// let mut reader = ConcatSortedAlignmentReader::open(&["part1", "part2"], ConcatParams::default()).unwrap();
/// while let Some(entry) = reader.next_entry().unwrap() {
///     println!("{} from source {}", entry.location(), reader.last_reader_index());
/// }
/// ```
pub struct ConcatSortedAlignmentReader {
    state: MergeState,
    readers: Vec<SortedAlignmentReader>,
    pending: Vec<Option<AlignmentEntry>>,
    exhausted: Vec<bool>,
    heap: BinaryHeap<Reverse<(ReferenceLocation, usize)>>,
    last_returned: Option<ReferenceLocation>,
    last_reader_index: usize,
}

impl ConcatSortedAlignmentReader {
    /// Opens the sorted stores with the given basenames.
    pub fn open<P: AsRef<Path>>(basenames: &[P], params: ConcatParams) -> Result<Self, StoreError> {
        let mut readers = Vec::with_capacity(basenames.len());
        for basename in basenames.iter() {
            readers.push(SortedAlignmentReader::open(basename)?);
        }
        Self::from_readers(readers, params)
    }

    /// Opens the sorted stores restricted to the window `start..=end`.
    pub fn open_window<P: AsRef<Path>>(
        basenames: &[P], params: ConcatParams, start: ReferenceLocation, end: ReferenceLocation
    ) -> Result<Self, StoreError> {
        let mut readers = Vec::with_capacity(basenames.len());
        for basename in basenames.iter() {
            readers.push(SortedAlignmentReader::open_window(basename, start, end)?);
        }
        Self::from_readers(readers, params)
    }

    fn from_readers(readers: Vec<SortedAlignmentReader>, params: ConcatParams) -> Result<Self, StoreError> {
        let names: Vec<PathBuf> = readers.iter().map(|reader| reader.basename().to_path_buf()).collect();
        let headers: Vec<&AlignmentHeader> = readers.iter().map(|reader| reader.header()).collect();
        let mut state = MergeState::new(&names, &headers, params)?;
        state.header.sorted = true;
        info!("Merging {} sorted stores with {} queries", state.len(), state.header().number_of_queries);

        let n = readers.len();
        Ok(ConcatSortedAlignmentReader {
            state,
            readers,
            pending: vec![None; n],
            exhausted: vec![false; n],
            heap: BinaryHeap::with_capacity(n),
            last_returned: None,
            last_reader_index: 0,
        })
    }

    /// Returns the merged state.
    pub fn state(&self) -> &MergeState {
        &self.state
    }

    /// Returns the merged header.
    pub fn header(&self) -> &AlignmentHeader {
        self.state.header()
    }

    /// Returns the statistics of the sources with `partN.` prefixes.
    pub fn statistics(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let statistics = self.readers.iter().map(|reader| reader.statistics()).collect::<Result<Vec<_>, _>>()?;
        Ok(prefixed_statistics(statistics))
    }

    /// Returns the index of the source of the last entry.
    pub fn last_reader_index(&self) -> usize {
        self.last_reader_index
    }

    // Stores the next entry of the source as pending, or marks the source exhausted.
    fn load(&mut self, source: usize, entry: Option<AlignmentEntry>) {
        match entry {
            Some(entry) => {
                self.heap.push(Reverse((entry.location(), source)));
                self.pending[source] = Some(entry);
            },
            None => {
                debug!("Source {} is exhausted", source);
                self.exhausted[source] = true;
            },
        }
    }

    fn needs_entry(&self, source: usize) -> bool {
        self.pending[source].is_none() && !self.exhausted[source]
    }

    // Returns the smallest pending entry.
    fn pop(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        let source = match self.heap.pop() {
            Some(Reverse((_, source))) => source,
            None => return Ok(None),
        };
        let entry = match self.pending[source].take() {
            Some(entry) => entry,
            None => return Err(StoreError::format(format!("Source {} has no pending entry", source))),
        };
        let key = entry.location();
        if let Some(previous) = self.last_returned {
            if key < previous {
                return Err(StoreError::Ordering { previous, next: key });
            }
        }
        self.last_returned = Some(key);
        self.last_reader_index = source;
        self.state.adjust(source, entry).map(Some)
    }

    /// Returns the next entry in sorted order, or [`None`] if all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        for source in 0..self.readers.len() {
            if self.needs_entry(source) {
                let entry = self.readers[source].next_entry()?;
                self.load(source, entry);
            }
        }
        self.pop()
    }

    /// Returns the first remaining entry at or after `(target_index, position)` over all sources.
    ///
    /// Returns [`StoreError::SeekMisuse`] if the location is before the last entry returned.
    pub fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        let requested = ReferenceLocation::new(target_index, position);
        if let Some(current) = self.last_returned {
            if requested < current {
                return Err(StoreError::SeekMisuse { requested, current });
            }
        }

        while let Some(Reverse((key, source))) = self.heap.peek().copied() {
            if key >= requested {
                break;
            }
            self.heap.pop();
            self.pending[source] = None;
        }
        for source in 0..self.readers.len() {
            if self.needs_entry(source) {
                let entry = self.readers[source].skip_to(target_index, position)?;
                self.load(source, entry);
            }
        }
        self.pop()
    }
}

impl SortedSource for ConcatSortedAlignmentReader {
    fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        ConcatSortedAlignmentReader::next_entry(self)
    }

    fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        ConcatSortedAlignmentReader::skip_to(self, target_index, position)
    }
}

impl Iterator for ConcatSortedAlignmentReader {
    type Item = Result<AlignmentEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

//-----------------------------------------------------------------------------
