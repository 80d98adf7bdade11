//! Store metadata: identifier maps, sequence lengths, and flags.

use crate::StoreError;
use crate::utils;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use gbwt::support::{ByteCode, ByteCodeIter};

//-----------------------------------------------------------------------------

/// A bijection between identifiers and indexes.
///
/// Used for query names and target names.
/// Indexes do not have to be contiguous, but each name has exactly one index and vice versa.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentifierMap {
    by_name: HashMap<String, usize>,
    by_index: BTreeMap<usize, String>,
}

impl IdentifierMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map where the name at offset `i` has index `i`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, StoreError> {
        let mut result = Self::new();
        for (i, name) in names.iter().enumerate() {
            result.insert_with_index(name.as_ref(), i)?;
        }
        Ok(result)
    }

    /// Returns the number of identifiers.
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Returns the index of the name, registering it with the next unused index if necessary.
    pub fn insert(&mut self, name: &str) -> usize {
        if let Some(index) = self.by_name.get(name) {
            return *index;
        }
        let index = self.by_index.keys().next_back().map(|x| x + 1).unwrap_or(0);
        self.by_name.insert(name.to_string(), index);
        self.by_index.insert(index, name.to_string());
        index
    }

    /// Registers the name with the given index.
    ///
    /// Returns an error if either the name or the index is already used for something else.
    pub fn insert_with_index(&mut self, name: &str, index: usize) -> Result<(), StoreError> {
        match (self.by_name.get(name), self.by_index.get(&index)) {
            (Some(&existing), _) if existing == index => return Ok(()),
            (Some(&existing), _) => {
                return Err(StoreError::format(format!("Identifier {} already has index {}", name, existing)));
            },
            (None, Some(other)) => {
                return Err(StoreError::format(format!("Index {} is already used by identifier {}", index, other)));
            },
            (None, None) => {},
        }
        self.by_name.insert(name.to_string(), index);
        self.by_index.insert(index, name.to_string());
        Ok(())
    }

    /// Returns the index of the name.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Returns the name with the given index.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(|x| x.as_str())
    }

    /// Returns an iterator over (index, name) pairs in increasing order of index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.by_index.iter().map(|(index, name)| (*index, name.as_str()))
    }
}

//-----------------------------------------------------------------------------

/// Lengths of the queries in a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum QueryLengths {
    /// Lengths were not recorded.
    #[default]
    Unknown,
    /// All queries have the same length.
    Constant(usize),
    /// Length for each query index.
    PerQuery(Vec<usize>),
}

impl QueryLengths {
    /// Builds the representation, compacting equal lengths into a constant.
    pub fn new(lengths: Vec<usize>) -> Self {
        match lengths.first() {
            None => QueryLengths::Unknown,
            Some(&first) if lengths.iter().all(|&len| len == first) => QueryLengths::Constant(first),
            Some(_) => QueryLengths::PerQuery(lengths),
        }
    }

    /// Returns the length of the query, if known.
    pub fn get(&self, query_index: usize) -> Option<usize> {
        match self {
            QueryLengths::Unknown => None,
            QueryLengths::Constant(len) => Some(*len),
            QueryLengths::PerQuery(lengths) => lengths.get(query_index).copied(),
        }
    }

    /// Returns the largest query length, if known.
    pub fn max(&self) -> Option<usize> {
        match self {
            QueryLengths::Unknown => None,
            QueryLengths::Constant(len) => Some(*len),
            QueryLengths::PerQuery(lengths) => lengths.iter().copied().max(),
        }
    }

    /// Returns the lengths for the first `n` queries, or [`None`] if they are not known.
    pub fn expand(&self, n: usize) -> Option<Vec<usize>> {
        match self {
            QueryLengths::Unknown => None,
            QueryLengths::Constant(len) => Some(vec![*len; n]),
            QueryLengths::PerQuery(lengths) if lengths.len() >= n => Some(lengths[..n].to_vec()),
            QueryLengths::PerQuery(_) => None,
        }
    }
}

//-----------------------------------------------------------------------------

/// Per-store metadata.
///
/// The header is written when the store is closed and read when it is opened.
/// It declares the query and target spaces before any entry is read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlignmentHeader {
    /// Number of queries; query indexes are in `0..number_of_queries`.
    pub number_of_queries: usize,
    /// Number of targets; target indexes are in `0..number_of_targets`.
    pub number_of_targets: usize,
    /// Query names, if known.
    pub query_identifiers: IdentifierMap,
    /// Target names, if known.
    pub target_identifiers: IdentifierMap,
    /// Length of each target.
    pub target_lengths: Vec<usize>,
    /// Length of each query.
    pub query_lengths: QueryLengths,
    /// Name of the aligner that produced the alignments.
    pub aligner_name: Option<String>,
    /// Version of the aligner.
    pub aligner_version: Option<String>,
    /// Entries are in non-decreasing order of (target index, position).
    pub sorted: bool,
    /// A chunk index exists.
    pub indexed: bool,
    /// Query indexes in the entries must be mapped through the permutation file.
    pub query_indices_permuted: bool,
    /// Number of distinct queries with at least one entry.
    pub number_of_aligned_reads: usize,
    /// Smallest and largest query index in the entries.
    pub query_index_range: Option<(usize, usize)>,
}

impl AlignmentHeader {
    const MAGIC: [u8; 8] = *b"GOBYHDR1";

    const FLAG_SORTED: usize = 0x01;
    const FLAG_INDEXED: usize = 0x02;
    const FLAG_PERMUTED: usize = 0x04;

    const LENGTHS_UNKNOWN: usize = 0;
    const LENGTHS_CONSTANT: usize = 1;
    const LENGTHS_PER_QUERY: usize = 2;

    /// Returns the name of the target, if known.
    pub fn target_name(&self, target_index: usize) -> Option<&str> {
        self.target_identifiers.name(target_index)
    }

    /// Returns the length of the target, if known.
    pub fn target_length(&self, target_index: usize) -> Option<usize> {
        self.target_lengths.get(target_index).copied()
    }

    /// Serializes the header.
    ///
    /// The encoding consists of a magic number, the length of the numbers blob, the numbers encoded with [`ByteCode`],
    /// and 0-terminated strings.
    pub fn serialize(&self) -> Vec<u8> {
        let mut numbers = ByteCode::new();
        let mut strings: Vec<u8> = Vec::new();

        let mut flags = 0;
        if self.sorted {
            flags |= Self::FLAG_SORTED;
        }
        if self.indexed {
            flags |= Self::FLAG_INDEXED;
        }
        if self.query_indices_permuted {
            flags |= Self::FLAG_PERMUTED;
        }
        numbers.write(flags);
        numbers.write(self.number_of_queries);
        numbers.write(self.number_of_targets);
        numbers.write(self.number_of_aligned_reads);
        match self.query_index_range {
            Some((min, max)) => {
                numbers.write(1);
                numbers.write(min);
                numbers.write(max);
            },
            None => numbers.write(0),
        }

        match &self.query_lengths {
            QueryLengths::Unknown => numbers.write(Self::LENGTHS_UNKNOWN),
            QueryLengths::Constant(len) => {
                numbers.write(Self::LENGTHS_CONSTANT);
                numbers.write(*len);
            },
            QueryLengths::PerQuery(lengths) => {
                numbers.write(Self::LENGTHS_PER_QUERY);
                numbers.write(lengths.len());
                for len in lengths.iter() {
                    numbers.write(*len);
                }
            },
        }
        numbers.write(self.target_lengths.len());
        for len in self.target_lengths.iter() {
            numbers.write(*len);
        }

        for value in [&self.aligner_name, &self.aligner_version] {
            numbers.write(if value.is_some() { 1 } else { 0 });
            if let Some(value) = value {
                strings.extend_from_slice(value.as_bytes());
                strings.push(0);
            }
        }
        for identifiers in [&self.query_identifiers, &self.target_identifiers] {
            numbers.write(identifiers.len());
            for (index, name) in identifiers.iter() {
                numbers.write(index);
                strings.extend_from_slice(name.as_bytes());
                strings.push(0);
            }
        }

        let numbers = Vec::from(numbers);
        let mut result = Vec::with_capacity(Self::MAGIC.len() + 8 + numbers.len() + strings.len());
        result.extend_from_slice(&Self::MAGIC);
        result.extend_from_slice(&(numbers.len() as u64).to_le_bytes());
        result.extend_from_slice(&numbers);
        result.extend_from_slice(&strings);
        result
    }

    /// Deserializes a header created with [`AlignmentHeader::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self, StoreError> {
        let prefix = Self::MAGIC.len() + 8;
        if data.len() < prefix || data[..Self::MAGIC.len()] != Self::MAGIC {
            return Err(StoreError::format("Missing header magic number"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[Self::MAGIC.len()..prefix]);
        let numbers_end = usize::try_from(u64::from_le_bytes(len_bytes)).ok().and_then(|len| prefix.checked_add(len));
        let numbers_end = match numbers_end {
            Some(end) if end <= data.len() => end,
            _ => return Err(StoreError::format("Truncated header")),
        };
        let mut numbers = ByteCodeIter::new(&data[prefix..numbers_end]);
        let mut strings = data[numbers_end..].split(|&c| c == 0);

        let mut next = |field: &str| -> Result<usize, StoreError> {
            numbers.next().ok_or_else(|| StoreError::format(format!("Missing header field: {}", field)))
        };
        let mut next_string = |field: &str| -> Result<String, StoreError> {
            let bytes = strings.next().ok_or_else(|| StoreError::format(format!("Missing header string: {}", field)))?;
            String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::format(format!("Invalid header string: {}", field)))
        };

        let mut header = AlignmentHeader::default();
        let flags = next("flags")?;
        header.sorted = flags & Self::FLAG_SORTED != 0;
        header.indexed = flags & Self::FLAG_INDEXED != 0;
        header.query_indices_permuted = flags & Self::FLAG_PERMUTED != 0;
        header.number_of_queries = next("number of queries")?;
        header.number_of_targets = next("number of targets")?;
        header.number_of_aligned_reads = next("number of aligned reads")?;
        if next("query index range")? != 0 {
            let min = next("smallest query index")?;
            let max = next("largest query index")?;
            header.query_index_range = Some((min, max));
        }

        header.query_lengths = match next("query length type")? {
            Self::LENGTHS_UNKNOWN => QueryLengths::Unknown,
            Self::LENGTHS_CONSTANT => QueryLengths::Constant(next("constant query length")?),
            Self::LENGTHS_PER_QUERY => {
                let n = next("number of query lengths")?;
                let mut lengths = Vec::new();
                for _ in 0..n {
                    lengths.push(next("query length")?);
                }
                QueryLengths::PerQuery(lengths)
            },
            other => return Err(StoreError::format(format!("Unknown query length type {}", other))),
        };
        let n = next("number of target lengths")?;
        for _ in 0..n {
            header.target_lengths.push(next("target length")?);
        }

        if next("aligner name flag")? != 0 {
            header.aligner_name = Some(next_string("aligner name")?);
        }
        if next("aligner version flag")? != 0 {
            header.aligner_version = Some(next_string("aligner version")?);
        }
        let n = next("number of query identifiers")?;
        for _ in 0..n {
            let index = next("query identifier index")?;
            let name = next_string("query identifier")?;
            header.query_identifiers.insert_with_index(&name, index)?;
        }
        let n = next("number of target identifiers")?;
        for _ in 0..n {
            let index = next("target identifier index")?;
            let name = next_string("target identifier")?;
            header.target_identifiers.insert_with_index(&name, index)?;
        }

        Ok(header)
    }

    /// Writes the header of the store with the given basename.
    pub fn write<P: AsRef<Path>>(&self, basename: P) -> Result<(), StoreError> {
        let filename = utils::store_file(basename, utils::HEADER_EXTENSION);
        utils::write_gzipped(filename, &self.serialize())
    }

    /// Loads the header of the store with the given basename.
    pub fn load<P: AsRef<Path>>(basename: P) -> Result<Self, StoreError> {
        let filename = utils::store_file(basename, utils::HEADER_EXTENSION);
        let data = utils::read_file(&filename)?;
        Self::deserialize(&data).map_err(|err| match err {
            StoreError::Format(message) => StoreError::Format(format!("{}: {}", filename.display(), message)),
            other => other,
        })
    }
}

//-----------------------------------------------------------------------------
