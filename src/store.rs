//! Chunked alignment stores.
//!
//! A store consists of the following files sharing a basename `B`:
//!
//! * `B.entries`: entry chunks, each stored as a little-endian 64-bit length followed by an [`EntryChunk`].
//! * `B.header`: an [`AlignmentHeader`].
//! * `B.index`: a [`ChunkIndex`], present only in sorted stores.
//! * `B.stats`: statistics as `key=value` lines.
//! * `B.perm`: query index permutation, present only if query indexes were permuted.
//!
//! The too-many-hits ledger `B.tmh` is managed by [`crate::too_many_hits`].
//!
//! [`AlignmentWriter`] creates a store and [`AlignmentReader`] reads it sequentially.
//! [`SortedAlignmentReader`] can only be opened for sorted stores, and it is the only reader that can skip forward using the index.

use crate::{AlignmentEntry, EntryChunk, ReferenceLocation, StoreError};
use crate::perms::QueryIndexPermutation;
use crate::utils;

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use simple_sds::raw_vector::{AccessRaw, RawVector};

use tracing::{debug, info};

pub mod header;
pub mod index;

pub use header::{AlignmentHeader, IdentifierMap, QueryLengths};
pub use index::ChunkIndex;


//-----------------------------------------------------------------------------

/// A source of entries in non-decreasing order of [`ReferenceLocation`].
///
/// Implemented by the sorted readers and by the processors layered on top of them.
pub trait SortedSource {
    /// Returns the next entry, or [`None`] if the source is exhausted.
    fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError>;

    /// Returns the first remaining entry at or after the given location.
    ///
    /// Returns [`StoreError::SeekMisuse`] if the location is before the last entry returned.
    fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError>;
}

/// Sorted entries held in memory.
#[derive(Clone, Debug, Default)]
pub struct SortedEntries {
    entries: VecDeque<AlignmentEntry>,
    last: Option<ReferenceLocation>,
}

impl SortedEntries {
    /// Creates a source from the entries, which must be sorted.
    pub fn new(entries: Vec<AlignmentEntry>) -> Result<Self, StoreError> {
        for pair in entries.windows(2) {
            if pair[1].location() < pair[0].location() {
                return Err(StoreError::Ordering { previous: pair[0].location(), next: pair[1].location() });
            }
        }
        Ok(SortedEntries { entries: VecDeque::from(entries), last: None })
    }

    /// Returns the number of remaining entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no remaining entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SortedSource for SortedEntries {
    fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        let entry = self.entries.pop_front();
        if let Some(entry) = entry.as_ref() {
            self.last = Some(entry.location());
        }
        Ok(entry)
    }

    fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        let requested = ReferenceLocation::new(target_index, position);
        if let Some(current) = self.last {
            if requested < current {
                return Err(StoreError::SeekMisuse { requested, current });
            }
        }
        while let Some(entry) = self.entries.front() {
            if entry.location() >= requested {
                break;
            }
            self.entries.pop_front();
        }
        self.next_entry()
    }
}

//-----------------------------------------------------------------------------

/// Parameters for [`AlignmentWriter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterParams {
    /// Soft limit for the number of entries in a chunk.
    pub entries_per_chunk: usize,
    /// Entries must be appended in sorted order, and the store will be indexed.
    pub sorted: bool,
    /// Replace query indexes with small indexes in order of first appearance.
    pub permute_query_indices: bool,
}

impl WriterParams {
    /// Default for `entries_per_chunk`.
    pub const DEFAULT_ENTRIES_PER_CHUNK: usize = 10_000;

    /// Returns default parameters for a sorted store.
    pub fn sorted() -> Self {
        WriterParams { sorted: true, ..Self::default() }
    }
}

impl Default for WriterParams {
    fn default() -> Self {
        WriterParams {
            entries_per_chunk: Self::DEFAULT_ENTRIES_PER_CHUNK,
            sorted: false,
            permute_query_indices: false,
        }
    }
}

//-----------------------------------------------------------------------------

/// Writes alignment entries to a new store.
///
/// Entries are buffered and written as chunks of [`WriterParams::entries_per_chunk`] entries.
/// The header, the index, and the statistics are written by [`AlignmentWriter::close`].
/// A writer that is dropped without closing leaves an incomplete store.
///
/// # Examples
///
/// ```no_run
/// use goby_base::{AlignmentEntry, AlignmentWriter, WriterParams};
///
/// let mut writer = AlignmentWriter::create("sample", WriterParams::sorted()).unwrap();
/// writer.set_target_lengths(vec![1000, 2000]);
/// let mut entry = AlignmentEntry::new(0, 1, 12);
/// entry.query_length = 35;
/// entry.query_aligned_length = 35;
/// entry.target_aligned_length = 35;
/// writer.append(entry).unwrap();
/// let header = writer.close().unwrap();
/// assert_eq!(header.number_of_queries, 1);
/// ```
pub struct AlignmentWriter {
    basename: PathBuf,
    params: WriterParams,
    entries: BufWriter<File>,
    offset: u64,
    buffer: Vec<AlignmentEntry>,
    index: ChunkIndex,
    header: AlignmentHeader,
    query_lengths: Option<Vec<usize>>,
    permutation: Option<QueryIndexPermutation>,
    externally_permuted: bool,
    last_key: Option<ReferenceLocation>,
    aligned_queries: RawVector,
    query_index_range: Option<(usize, usize)>,
    max_target_index: Option<usize>,
    entries_written: usize,
    chunks_written: usize,
    statistics: BTreeMap<String, String>,
}

impl AlignmentWriter {
    /// Creates a new store with the given basename, overwriting existing files.
    pub fn create<P: AsRef<Path>>(basename: P, params: WriterParams) -> Result<Self, StoreError> {
        let basename = utils::resolve_basename(basename)?;
        let entries = File::create(utils::store_file(&basename, utils::ENTRIES_EXTENSION))?;
        let permutation = if params.permute_query_indices {
            Some(QueryIndexPermutation::create(&basename)?)
        } else {
            None
        };
        let entries_per_chunk = params.entries_per_chunk.max(1);
        debug!("Creating store {} with {} entries per chunk", basename.display(), entries_per_chunk);

        Ok(AlignmentWriter {
            basename,
            params: WriterParams { entries_per_chunk, ..params },
            entries: BufWriter::new(entries),
            offset: 0,
            buffer: Vec::with_capacity(entries_per_chunk),
            index: ChunkIndex::new(),
            header: AlignmentHeader::default(),
            query_lengths: None,
            permutation,
            externally_permuted: false,
            last_key: None,
            aligned_queries: RawVector::new(),
            query_index_range: None,
            max_target_index: None,
            entries_written: 0,
            chunks_written: 0,
            statistics: BTreeMap::new(),
        })
    }

    /// Returns the basename of the store.
    pub fn basename(&self) -> &Path {
        &self.basename
    }

    /// Returns the number of entries appended so far.
    pub fn len(&self) -> usize {
        self.entries_written + self.buffer.len()
    }

    /// Returns `true` if no entries have been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the length of each target.
    ///
    /// Entries appended after this must fit within their targets.
    pub fn set_target_lengths(&mut self, lengths: Vec<usize>) {
        self.header.target_lengths = lengths;
    }

    /// Sets the target names.
    pub fn set_target_identifiers(&mut self, identifiers: IdentifierMap) {
        self.header.target_identifiers = identifiers;
    }

    /// Sets the query names.
    pub fn set_query_identifiers(&mut self, identifiers: IdentifierMap) {
        self.header.query_identifiers = identifiers;
    }

    /// Sets the length of each query.
    ///
    /// The table must cover every query index appended to the store; this is checked in [`AlignmentWriter::close`].
    pub fn set_query_lengths(&mut self, lengths: Vec<usize>) {
        self.query_lengths = Some(lengths);
    }

    /// Declares the number of queries, which may be larger than the number of queries with entries.
    pub fn set_number_of_queries(&mut self, n: usize) {
        self.header.number_of_queries = n;
    }

    /// Declares the number of targets, which may be larger than the number of targets with entries.
    pub fn set_number_of_targets(&mut self, n: usize) {
        self.header.number_of_targets = n;
    }

    /// Records the aligner that produced the alignments.
    pub fn set_aligner(&mut self, name: &str, version: &str) {
        self.header.aligner_name = Some(name.to_string());
        self.header.aligner_version = Some(version.to_string());
    }

    /// Copies the query and target spaces and the aligner from an existing header.
    ///
    /// Query lengths are copied only if they are known for every query.
    pub fn copy_metadata(&mut self, header: &AlignmentHeader) {
        self.header.number_of_queries = header.number_of_queries;
        self.header.number_of_targets = header.number_of_targets;
        self.header.query_identifiers = header.query_identifiers.clone();
        self.header.target_identifiers = header.target_identifiers.clone();
        self.header.target_lengths = header.target_lengths.clone();
        self.header.aligner_name = header.aligner_name.clone();
        self.header.aligner_version = header.aligner_version.clone();
        self.query_lengths = header.query_lengths.expand(header.number_of_queries);
    }

    /// Declares that the appended query indexes are already permuted.
    ///
    /// The caller is responsible for writing the permutation file of the store.
    pub fn mark_query_indices_permuted(&mut self) {
        self.externally_permuted = true;
    }

    /// Adds a value to the statistics file.
    pub fn set_statistic(&mut self, key: &str, value: &str) {
        self.statistics.insert(key.to_string(), value.to_string());
    }

    /// Appends an entry to the store.
    ///
    /// Returns an error if the store is sorted and the entry is before the previous one,
    /// or if target lengths have been set and the entry does not fit within its target.
    pub fn append(&mut self, mut entry: AlignmentEntry) -> Result<(), StoreError> {
        let key = entry.location();
        if self.params.sorted {
            if let Some(previous) = self.last_key {
                if key < previous {
                    return Err(StoreError::Ordering { previous, next: key });
                }
            }
        }
        if !self.header.target_lengths.is_empty() {
            let target_length = self.header.target_length(entry.target_index).ok_or_else(|| {
                StoreError::capacity(format!(
                    "Entry for query {} refers to target {}, but only {} target lengths were declared",
                    entry.query_index, entry.target_index, self.header.target_lengths.len()
                ))
            })?;
            if entry.end() > target_length {
                return Err(StoreError::capacity(format!(
                    "Entry for query {} ends at {} past the end of target {} of length {}",
                    entry.query_index, entry.end(), entry.target_index, target_length
                )));
            }
        }
        self.last_key = Some(key);

        let query_index = entry.query_index;
        self.query_index_range = match self.query_index_range {
            Some((min, max)) => Some((min.min(query_index), max.max(query_index))),
            None => Some((query_index, query_index)),
        };
        self.max_target_index = Some(self.max_target_index.map_or(entry.target_index, |x| x.max(entry.target_index)));
        if query_index >= self.aligned_queries.len() {
            let new_len = (query_index + 1).max(2 * self.aligned_queries.len());
            self.aligned_queries.resize(new_len, false);
        }
        self.aligned_queries.set_bit(query_index, true);

        if let Some(permutation) = self.permutation.as_mut() {
            entry.query_index = permutation.permutate(query_index, entry.query_index_occurrences);
        }

        self.buffer.push(entry);
        if self.buffer.len() >= self.params.entries_per_chunk {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = EntryChunk::new(&self.buffer);
        let data = chunk.serialize()?;
        if self.params.sorted {
            self.index.push(self.buffer[0].location(), self.offset)?;
        }
        self.entries.write_all(&(data.len() as u64).to_le_bytes())?;
        self.entries.write_all(&data)?;
        self.offset += 8 + data.len() as u64;
        self.entries_written += self.buffer.len();
        self.chunks_written += 1;
        debug!("Wrote chunk {} with {} entries ({} bytes)", self.chunks_written - 1, self.buffer.len(), data.len());
        self.buffer.clear();
        Ok(())
    }

    /// Flushes the final chunk and writes the header, the index, and the statistics.
    ///
    /// Returns the header that was written.
    /// Returns an error if the query length table does not cover every query index in the store.
    pub fn close(mut self) -> Result<AlignmentHeader, StoreError> {
        self.flush_chunk()?;
        self.entries.flush()?;

        let max_query = self.query_index_range.map(|(_, max)| max);
        let mut header = self.header.clone();
        if let Some(lengths) = self.query_lengths.take() {
            if let Some(max) = max_query {
                if lengths.len() <= max {
                    return Err(StoreError::capacity(format!(
                        "Query length table has {} entries, but the store contains query index {}",
                        lengths.len(), max
                    )));
                }
            }
            header.number_of_queries = header.number_of_queries.max(lengths.len());
            header.query_lengths = QueryLengths::new(lengths);
        }
        header.number_of_queries = header.number_of_queries
            .max(max_query.map_or(0, |x| x + 1))
            .max(header.query_identifiers.iter().map(|(index, _)| index + 1).max().unwrap_or(0));
        header.number_of_targets = header.number_of_targets
            .max(header.target_lengths.len())
            .max(self.max_target_index.map_or(0, |x| x + 1))
            .max(header.target_identifiers.iter().map(|(index, _)| index + 1).max().unwrap_or(0));
        header.number_of_aligned_reads = self.aligned_queries.count_ones();
        header.query_index_range = self.query_index_range;
        header.sorted = self.params.sorted;
        header.indexed = self.params.sorted;
        header.query_indices_permuted = self.permutation.is_some() || self.externally_permuted;

        if self.params.sorted {
            self.index.set_end_offset(self.offset);
            self.index.write(&self.basename)?;
        }
        header.write(&self.basename)?;
        if let Some(permutation) = self.permutation.take() {
            permutation.close()?;
        }

        let mut statistics = std::mem::take(&mut self.statistics);
        statistics.insert(String::from("basename"), self.basename.display().to_string());
        statistics.insert(String::from("number.alignment.entries"), self.entries_written.to_string());
        statistics.insert(String::from("number.of.chunks"), self.chunks_written.to_string());
        statistics.insert(String::from("number.of.queries"), header.number_of_queries.to_string());
        statistics.insert(String::from("number.of.targets"), header.number_of_targets.to_string());
        statistics.insert(String::from("number.of.aligned.reads"), header.number_of_aligned_reads.to_string());
        statistics.insert(String::from("entries.size"), utils::human_readable_size(self.offset as usize));
        if let Some((min, max)) = self.query_index_range {
            statistics.insert(String::from("min.query.index"), min.to_string());
            statistics.insert(String::from("max.query.index"), max.to_string());
        }
        utils::write_properties(utils::store_file(&self.basename, utils::STATS_EXTENSION), &statistics)?;

        info!(
            "Closed store {}: {} entries in {} chunks ({})",
            self.basename.display(), self.entries_written, self.chunks_written, utils::human_readable_size(self.offset as usize)
        );
        Ok(header)
    }
}

//-----------------------------------------------------------------------------

/// Reads the entries of a store sequentially.
///
/// The header is loaded when the store is opened.
/// Chunks are decoded lazily, one at a time.
pub struct AlignmentReader {
    basename: PathBuf,
    header: AlignmentHeader,
    entries: BufReader<File>,
    file_len: u64,
    offset: u64,
    buffer: VecDeque<AlignmentEntry>,
    // Number of chunks before the current read offset.
    chunks_read: usize,
}

impl AlignmentReader {
    /// Opens the store with the given basename.
    ///
    /// The name may also be the name of any store file or a `file://` URL.
    pub fn open<P: AsRef<Path>>(name: P) -> Result<Self, StoreError> {
        let basename = utils::resolve_basename(name)?;
        let header = AlignmentHeader::load(&basename)?;
        let filename = utils::store_file(&basename, utils::ENTRIES_EXTENSION);
        let file = File::open(&filename).map_err(|err| {
            std::io::Error::new(err.kind(), format!("{}: {}", filename.display(), err))
        })?;
        let file_len = file.metadata()?.len();
        debug!("Opened store {} with {} of entries", basename.display(), utils::human_readable_size(file_len as usize));

        Ok(AlignmentReader {
            basename,
            header,
            entries: BufReader::new(file),
            file_len,
            offset: 0,
            buffer: VecDeque::new(),
            chunks_read: 0,
        })
    }

    /// Returns the basename of the store.
    pub fn basename(&self) -> &Path {
        &self.basename
    }

    /// Returns the header of the store.
    pub fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    /// Returns the statistics stored with the store, or an empty map if there are none.
    pub fn statistics(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let filename = utils::store_file(&self.basename, utils::STATS_EXTENSION);
        if utils::file_exists(&filename) {
            utils::read_properties(filename)
        } else {
            Ok(BTreeMap::new())
        }
    }

    /// Returns the next entry, or [`None`] if the store is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if !self.read_chunk()? {
                return Ok(None);
            }
        }
    }

    // Decodes the next chunk into the buffer. Returns `false` at the end of the file.
    fn read_chunk(&mut self) -> Result<bool, StoreError> {
        if self.offset >= self.file_len {
            return Ok(false);
        }
        let truncated = |err: std::io::Error| -> StoreError {
            if err.kind() == ErrorKind::UnexpectedEof {
                StoreError::format(format!("Truncated chunk {} in {}", self.chunks_read, self.basename.display()))
            } else {
                StoreError::Io(err)
            }
        };

        let mut len_bytes = [0u8; 8];
        self.entries.read_exact(&mut len_bytes).map_err(truncated)?;
        let len = u64::from_le_bytes(len_bytes);
        if self.offset + 8 + len > self.file_len {
            return Err(StoreError::format(format!(
                "Chunk {} at offset {} extends past the end of {}", self.chunks_read, self.offset, self.basename.display()
            )));
        }
        let mut data = vec![0u8; len as usize];
        self.entries.read_exact(&mut data).map_err(truncated)?;

        let chunk = EntryChunk::deserialize(&data)?;
        let entries = chunk.decode()?;
        self.buffer.extend(entries);
        self.offset += 8 + len;
        self.chunks_read += 1;
        Ok(true)
    }

    // Moves to the start of the given chunk and discards buffered entries.
    fn seek_to_chunk(&mut self, chunk: usize, offset: u64) -> Result<(), StoreError> {
        self.entries.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        self.buffer.clear();
        self.chunks_read = chunk;
        Ok(())
    }
}

impl Iterator for AlignmentReader {
    type Item = Result<AlignmentEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

//-----------------------------------------------------------------------------

/// A reader for sorted stores that can skip forward using the chunk index.
///
/// The reader may be restricted to a window of locations.
/// Entries before the start of the window are skipped, and iteration stops at the first entry after the end.
/// Both ends of the window are inclusive.
///
/// The reader checks that the entries it reads never decrease.
pub struct SortedAlignmentReader {
    reader: AlignmentReader,
    index: ChunkIndex,
    window: Option<(ReferenceLocation, ReferenceLocation)>,
    peeked: Option<AlignmentEntry>,
    last_read: Option<ReferenceLocation>,
    last_returned: Option<ReferenceLocation>,
    finished: bool,
}

impl SortedAlignmentReader {
    /// Opens a sorted store.
    ///
    /// Returns an error if the store is not sorted or not indexed.
    pub fn open<P: AsRef<Path>>(name: P) -> Result<Self, StoreError> {
        let reader = AlignmentReader::open(name)?;
        if !reader.header().sorted || !reader.header().indexed {
            return Err(StoreError::format(format!("Store {} is not sorted and indexed", reader.basename().display())));
        }
        let index = ChunkIndex::load(reader.basename())?;
        Ok(SortedAlignmentReader {
            reader,
            index,
            window: None,
            peeked: None,
            last_read: None,
            last_returned: None,
            finished: false,
        })
    }

    /// Opens a sorted store restricted to the window `start..=end`.
    pub fn open_window<P: AsRef<Path>>(name: P, start: ReferenceLocation, end: ReferenceLocation) -> Result<Self, StoreError> {
        let mut result = Self::open(name)?;
        result.window = Some((start, end));
        result.reposition(start.target_index, start.position)?;
        Ok(result)
    }

    /// Returns the basename of the store.
    pub fn basename(&self) -> &Path {
        self.reader.basename()
    }

    /// Returns the header of the store.
    pub fn header(&self) -> &AlignmentHeader {
        self.reader.header()
    }

    /// Returns the statistics stored with the store.
    pub fn statistics(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.reader.statistics()
    }

    /// Returns the chunk index.
    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// Returns the window the reader is restricted to.
    pub fn window(&self) -> Option<(ReferenceLocation, ReferenceLocation)> {
        self.window
    }

    /// Returns the location of every `modulo`-th chunk as slice boundaries.
    pub fn locations(&self, modulo: usize) -> Vec<ReferenceLocation> {
        self.index.locations(modulo)
    }

    /// Returns slice boundaries covering approximately `bytes_per_slice` bytes each.
    pub fn locations_by_bytes(&self, bytes_per_slice: u64) -> Vec<ReferenceLocation> {
        self.index.locations_by_bytes(bytes_per_slice)
    }

    // Reads the next entry from the store, checking the order and the end of the window.
    fn read_next(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        if self.finished {
            return Ok(None);
        }
        let entry = match self.reader.next_entry()? {
            Some(entry) => entry,
            None => {
                self.finished = true;
                return Ok(None);
            },
        };
        let key = entry.location();
        if let Some(previous) = self.last_read {
            if key < previous {
                return Err(StoreError::Ordering { previous, next: key });
            }
        }
        self.last_read = Some(key);
        if let Some((_, end)) = self.window {
            if key > end {
                self.finished = true;
                return Ok(None);
            }
        }
        Ok(Some(entry))
    }

    /// Returns the next entry without consuming it.
    pub fn peek(&mut self) -> Result<Option<&AlignmentEntry>, StoreError> {
        if self.peeked.is_none() {
            self.peeked = self.read_next()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Returns the next entry, or [`None`] if the store or the window is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        let entry = match self.peeked.take() {
            Some(entry) => Some(entry),
            None => self.read_next()?,
        };
        if let Some(entry) = entry.as_ref() {
            self.last_returned = Some(entry.location());
        }
        Ok(entry)
    }

    /// Returns the first remaining entry at or after `(target_index, position)`.
    ///
    /// Chunks that cannot contain the entry are skipped using the index.
    /// Returns [`None`] if there is no such entry or the location is past the end of the window.
    /// Returns [`StoreError::SeekMisuse`] if the location is before the last entry returned.
    pub fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        let requested = ReferenceLocation::new(target_index, position);
        if let Some(current) = self.last_returned {
            if requested < current {
                return Err(StoreError::SeekMisuse { requested, current });
            }
        }
        let mut key = requested;
        if let Some((start, end)) = self.window {
            if key > end {
                return Ok(None);
            }
            key = key.max(start);
        }

        if let Some(entry) = self.peeked.take() {
            if entry.location() >= key {
                self.last_returned = Some(entry.location());
                return Ok(Some(entry));
            }
        }

        if !self.finished {
            if let Some(chunk) = self.index.chunk_for(key) {
                // Never go back to a chunk that has already been decoded.
                if chunk >= self.reader.chunks_read {
                    let offset = self.index.offset(chunk).unwrap_or(0);
                    debug!("Skipping to chunk {} for {}", chunk, key);
                    self.reader.seek_to_chunk(chunk, offset)?;
                }
            }
        }

        while let Some(entry) = self.read_next()? {
            if entry.location() >= key {
                self.last_returned = Some(entry.location());
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Moves the reader to the first entry at or after `(target_index, position)`, possibly backward.
    ///
    /// This resets the forward-only restriction of [`SortedAlignmentReader::skip_to`].
    pub fn reposition(&mut self, target_index: usize, position: usize) -> Result<(), StoreError> {
        let mut key = ReferenceLocation::new(target_index, position);
        if let Some((start, _)) = self.window {
            key = key.max(start);
        }
        self.peeked = None;
        self.last_read = None;
        self.last_returned = None;
        self.finished = false;
        let chunk = self.index.chunk_for(key).unwrap_or(0);
        let offset = self.index.offset(chunk).unwrap_or(0);
        self.reader.seek_to_chunk(chunk, offset)?;

        while let Some(entry) = self.read_next()? {
            if entry.location() >= key {
                self.peeked = Some(entry);
                break;
            }
        }
        Ok(())
    }
}

impl SortedSource for SortedAlignmentReader {
    fn next_entry(&mut self) -> Result<Option<AlignmentEntry>, StoreError> {
        SortedAlignmentReader::next_entry(self)
    }

    fn skip_to(&mut self, target_index: usize, position: usize) -> Result<Option<AlignmentEntry>, StoreError> {
        SortedAlignmentReader::skip_to(self, target_index, position)
    }
}

impl Iterator for SortedAlignmentReader {
    type Item = Result<AlignmentEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

//-----------------------------------------------------------------------------
