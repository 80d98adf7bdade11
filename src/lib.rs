//! # Goby-base: chunked storage and processing of short-read alignments.
//!
//! This crate stores alignments of sequencing reads (queries) against reference sequences (targets)
//! in compact chunked files, and provides the processing steps built on top of them.
//!
//! # Stores
//!
//! A store is a set of files sharing a basename.
//! Entries are written in chunks of [`AlignmentEntry`] records, which are encoded with variable-length integers and compressed with Zstandard.
//! A store may be sorted by [`ReferenceLocation`], in which case it also has a chunk index that allows skipping to a location.
//! See [`AlignmentWriter`], [`AlignmentReader`], and [`SortedAlignmentReader`].
//!
//! Each store may have a too-many-hits ledger listing queries that were found to be ambiguous by the aligner.
//! See [`TooManyHitsWriter`] and [`TooManyHitsReader`].
//!
//! # Processing
//!
//! * [`ConcatAlignmentReader`] and [`ConcatSortedAlignmentReader`] read several stores as one.
//! * [`merge()`] keeps the best-scoring entries of each query over alternative alignments of the same reads.
//! * [`RealignmentProcessor`] moves insertions and deletions to their canonical placement.
//! * [`IterateSortedAlignments`] iterates over reference positions and the read bases aligned to them.
//!
//! Sorted sources implement [`SortedSource`], which allows the processing steps to be layered.
//!
//! ### Coordinates
//!
//! Entry positions are 0-based.
//! Positions of sequence variations are 1-based offsets from the entry position, and read indexes are 1-based.
//! See [`SequenceVariation`] for details.

pub mod alignment;
pub mod concat;
pub mod error;
pub mod merge;
pub mod perms;
pub mod pileup;
pub mod realign;
pub mod reference;
pub mod store;
pub mod too_many_hits;
pub mod utils;

#[cfg(test)]
pub(crate) mod internal;

pub use alignment::{AlignmentEntry, Column, EntryChunk, ReferenceLocation, SequenceVariation, SpliceLink, GAP};
pub use concat::{ConcatAlignmentReader, ConcatParams, ConcatSortedAlignmentReader, MergeState};
pub use error::StoreError;
pub use merge::{merge, GeneTable, MergeParams, MergeSummary};
pub use pileup::{IterateSortedAlignments, IterationParams, PileupConsumer, PositionBaseInfo};
pub use realign::{RealignmentParams, RealignmentProcessor, RealignmentStatistics};
pub use reference::{InMemoryReference, ReferenceSequence};
pub use store::{AlignmentHeader, AlignmentReader, AlignmentWriter, SortedAlignmentReader, SortedSource, WriterParams};
pub use too_many_hits::{TooManyHitsReader, TooManyHitsWriter};
