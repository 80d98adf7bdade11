//! Query index permutations.
//!
//! A store may replace the query indexes in its entries with small indexes assigned in order of first appearance.
//! Sorted stores then compress better, because queries near each other on the reference get similar indexes.
//! The permutation file `B.perm` maps the small indexes back to the original ones.
//!
//! The file consists of blocks `(n, first_small_index, original[0..n])` covering consecutive small indexes.
//! A block ends at a gap in the small indexes or after [`PermutationWriter::BLOCK_SIZE`] indexes.

use crate::StoreError;
use crate::utils;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gbwt::support::{ByteCode, ByteCodeIter};

use tracing::debug;


//-----------------------------------------------------------------------------

const MAGIC: [u8; 8] = *b"GOBYPRM1";

/// Writes a permutation file from `(small, original)` pairs given in any order.
#[derive(Clone, Debug)]
pub struct PermutationWriter {
    filename: PathBuf,
    pairs: Vec<(usize, usize)>,
}

impl PermutationWriter {
    /// Maximum number of indexes in a block.
    pub const BLOCK_SIZE: usize = 1000;

    /// Creates a writer for the permutation of the store with the given basename.
    pub fn new<P: AsRef<Path>>(basename: P) -> Self {
        PermutationWriter {
            filename: utils::store_file(basename, utils::PERMUTATION_EXTENSION),
            pairs: Vec::new(),
        }
    }

    /// Records that `small` stands for `original`.
    pub fn push(&mut self, small: usize, original: usize) {
        self.pairs.push((small, original));
    }

    /// Returns the number of recorded pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if no pairs have been recorded.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Writes the permutation file.
    ///
    /// Returns an error if the same small index was given two different original indexes.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.pairs.sort_unstable();
        self.pairs.dedup();
        for pair in self.pairs.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(StoreError::format(format!(
                    "Small index {} maps to both {} and {}", pair[0].0, pair[0].1, pair[1].1
                )));
            }
        }

        let mut blocks: Vec<&[(usize, usize)]> = Vec::new();
        let mut start = 0;
        for i in 1..=self.pairs.len() {
            let gap = i == self.pairs.len() || self.pairs[i].0 != self.pairs[i - 1].0 + 1;
            if gap || i - start >= Self::BLOCK_SIZE {
                blocks.push(&self.pairs[start..i]);
                start = i;
            }
        }

        let mut numbers = ByteCode::new();
        numbers.write(blocks.len());
        for block in blocks.iter() {
            numbers.write(block.len());
            numbers.write(block[0].0);
            for (_, original) in block.iter() {
                numbers.write(*original);
            }
        }
        let mut data = Vec::from(MAGIC);
        data.extend(Vec::from(numbers));
        utils::write_gzipped(&self.filename, &data)?;
        debug!("Wrote {} permuted indexes in {} blocks to {}", self.pairs.len(), blocks.len(), self.filename.display());
        Ok(())
    }
}

//-----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
struct Block {
    first_small_index: usize,
    originals: Vec<usize>,
}

/// Maps small query indexes back to the original ones.
///
/// The entire permutation is loaded into memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermutationReader {
    blocks: Vec<Block>,
}

impl PermutationReader {
    /// Loads the permutation of the store with the given basename.
    pub fn open<P: AsRef<Path>>(basename: P) -> Result<Self, StoreError> {
        let basename = utils::resolve_basename(basename)?;
        let filename = utils::store_file(&basename, utils::PERMUTATION_EXTENSION);
        if !utils::file_exists(&filename) {
            return Err(StoreError::format(format!(
                "Permutation file {} is required to reconstruct the original query indexes", filename.display()
            )));
        }
        let data = utils::read_file(&filename)?;
        Self::deserialize(&data)
    }

    fn deserialize(data: &[u8]) -> Result<Self, StoreError> {
        if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
            return Err(StoreError::format("Missing permutation magic number"));
        }
        let mut numbers = ByteCodeIter::new(&data[MAGIC.len()..]);
        let mut next = |field: &str| -> Result<usize, StoreError> {
            numbers.next().ok_or_else(|| StoreError::format(format!("Missing permutation field: {}", field)))
        };

        let n = next("number of blocks")?;
        let mut blocks = Vec::new();
        for _ in 0..n {
            let len = next("block length")?;
            let first_small_index = next("first small index")?;
            let mut originals = Vec::new();
            for _ in 0..len {
                originals.push(next("original index")?);
            }
            blocks.push(Block { first_small_index, originals });
        }
        blocks.sort_unstable_by_key(|block| block.first_small_index);
        Ok(PermutationReader { blocks })
    }

    /// Returns the number of small indexes in the permutation.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|block| block.originals.len()).sum()
    }

    /// Returns `true` if the permutation is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the original query index for the small index.
    pub fn permutate(&self, small_index: usize) -> Option<usize> {
        let after = self.blocks.partition_point(|block| block.first_small_index <= small_index);
        let block = self.blocks.get(after.checked_sub(1)?)?;
        block.originals.get(small_index - block.first_small_index).copied()
    }

    /// Returns `(small, original)` pairs in order of small indexes.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.blocks.iter().flat_map(|block| {
            block.originals.iter().enumerate().map(move |(i, &original)| (block.first_small_index + i, original))
        })
    }
}

//-----------------------------------------------------------------------------

/// Assigns small indexes to query indexes in order of first appearance.
///
/// A query index is remembered until it has been seen as many times as its entries declare in `query_index_occurrences`.
/// After that the same query index gets a new small index.
pub struct QueryIndexPermutation {
    writer: PermutationWriter,
    // Query index to (small index, times seen).
    active: HashMap<usize, (usize, usize)>,
    next_small_index: usize,
}

impl QueryIndexPermutation {
    /// Starts a permutation for the store with the given basename.
    pub fn create<P: AsRef<Path>>(basename: P) -> Result<Self, StoreError> {
        let basename = utils::resolve_basename(basename)?;
        Ok(QueryIndexPermutation {
            writer: PermutationWriter::new(basename),
            active: HashMap::new(),
            next_small_index: 0,
        })
    }

    /// Returns the small index for an entry of the query.
    ///
    /// `occurrences` is the total number of entries of the query in the store.
    pub fn permutate(&mut self, query_index: usize, occurrences: usize) -> usize {
        if let Some((small_index, seen)) = self.active.get_mut(&query_index) {
            let small_index = *small_index;
            *seen += 1;
            if *seen >= occurrences {
                self.active.remove(&query_index);
            }
            return small_index;
        }

        let small_index = self.next_small_index;
        self.next_small_index += 1;
        self.writer.push(small_index, query_index);
        if occurrences > 1 {
            self.active.insert(query_index, (small_index, 1));
        }
        small_index
    }

    /// Returns the number of small indexes assigned so far.
    pub fn len(&self) -> usize {
        self.next_small_index
    }

    /// Returns `true` if no small indexes have been assigned.
    pub fn is_empty(&self) -> bool {
        self.next_small_index == 0
    }

    /// Writes the permutation file.
    pub fn close(self) -> Result<(), StoreError> {
        if !self.active.is_empty() {
            debug!("{} query indexes were seen fewer times than their declared occurrences", self.active.len());
        }
        self.writer.close()
    }
}

//-----------------------------------------------------------------------------
