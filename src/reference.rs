//! Access to reference sequences.
//!
//! Realignment needs the reference bases around each indel.
//! [`ReferenceSequence`] is the interface, and [`InMemoryReference`] is an implementation that loads a FASTA file.

use crate::{AlignmentHeader, StoreError};
use crate::store::IdentifierMap;
use crate::utils;

use std::path::Path;

use noodles::fasta;
use tracing::info;

//-----------------------------------------------------------------------------

/// Random access to the bases of reference sequences, addressed by target index.
pub trait ReferenceSequence {
    /// Returns the number of targets.
    fn number_of_targets(&self) -> usize;

    /// Returns the length of the target, or [`None`] if there is no such target.
    fn length(&self, target_index: usize) -> Option<usize>;

    /// Returns the base at the given 0-based position, or [`None`] if the position is out of bounds.
    fn base(&self, target_index: usize, position: usize) -> Option<u8>;

    /// Returns the bases in the given interval, clamped to the end of the target.
    fn bases(&self, target_index: usize, start: usize, end: usize) -> Vec<u8> {
        let end = end.min(self.length(target_index).unwrap_or(0));
        (start..end).filter_map(|position| self.base(target_index, position)).collect()
    }
}

//-----------------------------------------------------------------------------

/// Reference sequences stored in memory as uppercase bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryReference {
    names: IdentifierMap,
    sequences: Vec<Vec<u8>>,
}

impl InMemoryReference {
    /// Creates a reference from names and sequences.
    ///
    /// Returns an error if the names are not distinct or the numbers do not match.
    pub fn new<S: AsRef<str>>(names: &[S], sequences: Vec<Vec<u8>>) -> Result<Self, StoreError> {
        if names.len() != sequences.len() {
            return Err(StoreError::format(format!("{} names for {} sequences", names.len(), sequences.len())));
        }
        let names = IdentifierMap::from_names(names)?;
        let sequences = sequences.into_iter().map(|mut sequence| {
            sequence.make_ascii_uppercase();
            sequence
        }).collect();
        Ok(InMemoryReference { names, sequences })
    }

    /// Loads a FASTA file, which may be gzip-compressed.
    ///
    /// The name of a sequence is the name in its definition line.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self, StoreError> {
        let mut reader = fasta::io::Reader::new(utils::open_file(&filename)?);
        let mut names: Vec<String> = Vec::new();
        let mut sequences: Vec<Vec<u8>> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| StoreError::format(format!(
                "{}: invalid FASTA record {}: {}", filename.as_ref().display(), names.len() + 1, err
            )))?;
            let name = String::from_utf8_lossy(record.name()).to_string();
            if name.is_empty() {
                return Err(StoreError::format(format!(
                    "{}: sequence {} has no name", filename.as_ref().display(), names.len() + 1
                )));
            }
            names.push(name);
            sequences.push(record.sequence().as_ref().to_vec());
        }
        let result = Self::new(&names, sequences)?;
        info!("Loaded {} reference sequences ({} bp)", result.sequences.len(), result.total_length());
        Ok(result)
    }

    /// Returns a reference where target `i` is the sequence named after target `i` in the header.
    ///
    /// If the header has no target names, the order of the sequences is kept.
    /// Returns an error if a target of the header is missing from the reference.
    pub fn aligned_to(&self, header: &AlignmentHeader) -> Result<Self, StoreError> {
        if header.target_identifiers.is_empty() {
            return Ok(self.clone());
        }
        let mut names = Vec::new();
        let mut sequences = Vec::new();
        for target_index in 0..header.number_of_targets {
            let name = header.target_name(target_index).ok_or_else(|| {
                StoreError::format(format!("Target {} has no name", target_index))
            })?;
            let sequence = self.names.index(name).and_then(|id| self.sequences.get(id)).ok_or_else(|| {
                StoreError::format(format!("Target {} is not in the reference", name))
            })?;
            names.push(name);
            sequences.push(sequence.clone());
        }
        Self::new(&names, sequences)
    }

    /// Returns the name of the target.
    pub fn name(&self, target_index: usize) -> Option<&str> {
        self.names.name(target_index)
    }

    /// Returns the target index for the name.
    pub fn target_index(&self, name: &str) -> Option<usize> {
        self.names.index(name)
    }

    /// Returns the total length of the sequences.
    pub fn total_length(&self) -> usize {
        self.sequences.iter().map(|sequence| sequence.len()).sum()
    }
}

impl ReferenceSequence for InMemoryReference {
    fn number_of_targets(&self) -> usize {
        self.sequences.len()
    }

    fn length(&self, target_index: usize) -> Option<usize> {
        self.sequences.get(target_index).map(|sequence| sequence.len())
    }

    fn base(&self, target_index: usize, position: usize) -> Option<u8> {
        self.sequences.get(target_index).and_then(|sequence| sequence.get(position)).copied()
    }

    fn bases(&self, target_index: usize, start: usize, end: usize) -> Vec<u8> {
        match self.sequences.get(target_index) {
            Some(sequence) => {
                let end = end.min(sequence.len());
                if start >= end { Vec::new() } else { sequence[start..end].to_vec() }
            },
            None => Vec::new(),
        }
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
