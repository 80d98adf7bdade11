//! Chunk index of a sorted store.

use crate::{ReferenceLocation, StoreError};
use crate::utils;

use std::path::Path;

use gbwt::support::{ByteCode, ByteCodeIter};

//-----------------------------------------------------------------------------

/// An ordered table of chunk start offsets keyed by the location of the first entry in each chunk.
///
/// The index is sufficient for finding the chunk where a scan for a given location must start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkIndex {
    keys: Vec<ReferenceLocation>,
    offsets: Vec<u64>,
    // Total size of the entries file.
    end_offset: u64,
}

impl ChunkIndex {
    const MAGIC: [u8; 8] = *b"GOBYIDX1";

    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of chunks.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Adds a chunk starting at the given file offset.
    ///
    /// Chunks must be added in file order, and keys must not decrease.
    pub fn push(&mut self, key: ReferenceLocation, offset: u64) -> Result<(), StoreError> {
        if let Some(&previous) = self.keys.last() {
            if key < previous {
                return Err(StoreError::Ordering { previous, next: key });
            }
        }
        self.keys.push(key);
        self.offsets.push(offset);
        Ok(())
    }

    /// Sets the size of the entries file.
    pub fn set_end_offset(&mut self, offset: u64) {
        self.end_offset = offset;
    }

    /// Returns the key of the first entry in the chunk.
    pub fn key(&self, chunk: usize) -> Option<ReferenceLocation> {
        self.keys.get(chunk).copied()
    }

    /// Returns the file offset of the chunk.
    pub fn offset(&self, chunk: usize) -> Option<u64> {
        self.offsets.get(chunk).copied()
    }

    /// Returns the number of bytes used for the chunk.
    pub fn chunk_bytes(&self, chunk: usize) -> Option<u64> {
        let start = self.offset(chunk)?;
        let end = self.offset(chunk + 1).unwrap_or(self.end_offset);
        Some(end.saturating_sub(start))
    }

    /// Returns the chunk where a scan for the first entry at or after `key` must start.
    ///
    /// This is the last chunk starting strictly before `key`, or the first chunk if there is no such chunk.
    /// Entries equal to `key` may end a chunk and continue in the next, which is why the comparison is strict.
    /// Returns [`None`] if the index is empty.
    pub fn chunk_for(&self, key: ReferenceLocation) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let after = self.keys.partition_point(|&k| k < key);
        Some(after.saturating_sub(1))
    }

    /// Returns the key of every `modulo`-th chunk, starting from the first.
    ///
    /// The locations can be used as slice boundaries for processing the store in parallel.
    pub fn locations(&self, modulo: usize) -> Vec<ReferenceLocation> {
        let modulo = modulo.max(1);
        let mut result: Vec<ReferenceLocation> = self.keys.iter().step_by(modulo).copied().collect();
        result.dedup();
        result
    }

    /// Returns slice boundaries such that each slice covers approximately `bytes_per_slice` bytes of chunks.
    pub fn locations_by_bytes(&self, bytes_per_slice: u64) -> Vec<ReferenceLocation> {
        let mut result = Vec::new();
        let mut accumulated = 0;
        for chunk in 0..self.len() {
            if chunk == 0 || accumulated >= bytes_per_slice {
                result.push(self.keys[chunk]);
                accumulated = 0;
            }
            accumulated += self.chunk_bytes(chunk).unwrap_or(0);
        }
        result.dedup();
        result
    }

    /// Serializes the index.
    ///
    /// Offsets and positions are delta-encoded; positions restart at each new target.
    pub fn serialize(&self) -> Vec<u8> {
        let mut numbers = ByteCode::new();
        numbers.write(self.len());
        numbers.write(self.end_offset as usize);
        let mut prev_key = ReferenceLocation::default();
        let mut prev_offset = 0;
        for (key, offset) in self.keys.iter().zip(self.offsets.iter()) {
            numbers.write(key.target_index - prev_key.target_index);
            if key.target_index == prev_key.target_index {
                numbers.write(key.position - prev_key.position);
            } else {
                numbers.write(key.position);
            }
            numbers.write((offset - prev_offset) as usize);
            prev_key = *key;
            prev_offset = *offset;
        }

        let mut result = Vec::from(Self::MAGIC);
        result.extend(Vec::from(numbers));
        result
    }

    /// Deserializes an index created with [`ChunkIndex::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self, StoreError> {
        if data.len() < Self::MAGIC.len() || data[..Self::MAGIC.len()] != Self::MAGIC {
            return Err(StoreError::format("Missing index magic number"));
        }
        let mut numbers = ByteCodeIter::new(&data[Self::MAGIC.len()..]);
        let mut next = |field: &str| -> Result<usize, StoreError> {
            numbers.next().ok_or_else(|| StoreError::format(format!("Missing index field: {}", field)))
        };

        let len = next("number of chunks")?;
        let mut result = ChunkIndex::new();
        result.end_offset = next("end offset")? as u64;
        let mut prev_key = ReferenceLocation::default();
        let mut prev_offset = 0;
        for _ in 0..len {
            let target_index = prev_key.target_index.checked_add(next("target index")?).ok_or_else(|| {
                StoreError::format("Index target overflows")
            })?;
            let position = if target_index == prev_key.target_index {
                prev_key.position.checked_add(next("position")?).ok_or_else(|| {
                    StoreError::format("Index position overflows")
                })?
            } else {
                next("position")?
            };
            let offset = prev_offset.checked_add(next("offset")? as u64).ok_or_else(|| {
                StoreError::format("Index offset overflows")
            })?;
            let key = ReferenceLocation::new(target_index, position);
            result.push(key, offset)?;
            prev_key = key;
            prev_offset = offset;
        }

        Ok(result)
    }

    /// Writes the index of the store with the given basename.
    pub fn write<P: AsRef<Path>>(&self, basename: P) -> Result<(), StoreError> {
        let filename = utils::store_file(basename, utils::INDEX_EXTENSION);
        utils::write_gzipped(filename, &self.serialize())
    }

    /// Loads the index of the store with the given basename.
    pub fn load<P: AsRef<Path>>(basename: P) -> Result<Self, StoreError> {
        let filename = utils::store_file(basename, utils::INDEX_EXTENSION);
        let data = utils::read_file(filename)?;
        Self::deserialize(&data)
    }
}

//-----------------------------------------------------------------------------
