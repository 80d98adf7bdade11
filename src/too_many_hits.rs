//! Too-many-hits ledger: queries the aligner refused to report because they matched too many locations.
//!
//! The ledger of a store with basename `B` is stored in `B.tmh`.
//! A record `(query, N)` written under aligner threshold `T` asserts that the query matched at least `N > T` locations.
//! Absence of a record means that the query is not known to be ambiguous.

use crate::StoreError;
use crate::utils;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gbwt::support::{ByteCode, ByteCodeIter};

use tracing::{debug, info};

//-----------------------------------------------------------------------------

/// One ledger record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TooManyHits {
    /// Query index in the namespace of the store.
    pub query_index: usize,
    /// Lower bound for the number of locations the query matched.
    pub at_least_number_of_hits: usize,
    /// Length of the match that produced the hits, if reported.
    pub length_of_match: Option<usize>,
}

const MAGIC: [u8; 8] = *b"GOBYTMH1";

//-----------------------------------------------------------------------------

/// Writes the ledger of a store.
///
/// Records are buffered and written by [`TooManyHitsWriter::close`].
pub struct TooManyHitsWriter {
    filename: PathBuf,
    aligner_threshold: usize,
    records: Vec<TooManyHits>,
}

impl TooManyHitsWriter {
    /// Creates a ledger for the store with the given basename.
    ///
    /// `aligner_threshold` is the number of hits above which the aligner stopped reporting a query.
    pub fn create<P: AsRef<Path>>(basename: P, aligner_threshold: usize) -> Result<Self, StoreError> {
        let basename = utils::resolve_basename(basename)?;
        Ok(TooManyHitsWriter {
            filename: utils::store_file(&basename, utils::TMH_EXTENSION),
            aligner_threshold,
            records: Vec::new(),
        })
    }

    /// Returns the aligner threshold.
    pub fn aligner_threshold(&self) -> usize {
        self.aligner_threshold
    }

    /// Records an ambiguous query.
    ///
    /// The record is written only if `at_least_number_of_hits` exceeds the aligner threshold.
    /// Returns `true` if the record was kept.
    pub fn append(&mut self, query_index: usize, at_least_number_of_hits: usize, length_of_match: Option<usize>) -> bool {
        if at_least_number_of_hits <= self.aligner_threshold {
            debug!(
                "Not recording query {} with {} hits under threshold {}",
                query_index, at_least_number_of_hits, self.aligner_threshold
            );
            return false;
        }
        self.records.push(TooManyHits { query_index, at_least_number_of_hits, length_of_match });
        true
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the ledger.
    pub fn close(self) -> Result<(), StoreError> {
        let mut numbers = ByteCode::new();
        numbers.write(self.aligner_threshold);
        numbers.write(self.records.len());
        for record in self.records.iter() {
            numbers.write(record.query_index);
            numbers.write(record.at_least_number_of_hits);
            match record.length_of_match {
                Some(len) => {
                    numbers.write(1);
                    numbers.write(len);
                },
                None => numbers.write(0),
            }
        }
        let mut data = Vec::from(MAGIC);
        data.extend(Vec::from(numbers));
        utils::write_gzipped(&self.filename, &data)?;
        debug!("Wrote {} too-many-hits records to {}", self.records.len(), self.filename.display());
        Ok(())
    }
}

//-----------------------------------------------------------------------------

/// Answers ambiguity questions using the ledger of a store.
///
/// # Examples
///
/// ```
/// use goby_base::{TooManyHitsReader, TooManyHitsWriter};
/// use simple_sds::serialize;
///
/// let basename = serialize::temp_file_name("tmh-example");
/// let mut writer = TooManyHitsWriter::create(&basename, 4).unwrap();
/// writer.append(0, 5, None);
/// writer.close().unwrap();
///
/// let reader = TooManyHitsReader::open(&basename).unwrap();
/// assert!(reader.is_query_ambiguous(0));
/// assert!(reader.is_query_ambiguous_at(0, 3));
/// assert!(!reader.is_query_ambiguous_at(1, 3));
/// # goby_base::utils::remove_store(&basename);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TooManyHitsReader {
    aligner_threshold: usize,
    hits: HashMap<usize, usize>,
    lengths_of_match: HashMap<usize, usize>,
}

impl TooManyHitsReader {
    /// Loads the ledger of the store with the given basename.
    ///
    /// If the store has no ledger, the result considers every query unambiguous.
    pub fn open<P: AsRef<Path>>(basename: P) -> Result<Self, StoreError> {
        let basename = utils::resolve_basename(basename)?;
        let filename = utils::store_file(&basename, utils::TMH_EXTENSION);
        if !utils::file_exists(&filename) {
            info!("Store {} has no too-many-hits information; assuming no query has too many hits", basename.display());
            return Ok(Self::default());
        }
        let data = utils::read_file(&filename)?;
        Self::deserialize(&data).map_err(|err| match err {
            StoreError::Format(message) => StoreError::Format(format!("{}: {}", filename.display(), message)),
            other => other,
        })
    }

    fn deserialize(data: &[u8]) -> Result<Self, StoreError> {
        if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
            return Err(StoreError::format("Missing too-many-hits magic number"));
        }
        let mut numbers = ByteCodeIter::new(&data[MAGIC.len()..]);
        let mut next = |field: &str| -> Result<usize, StoreError> {
            numbers.next().ok_or_else(|| StoreError::format(format!("Missing too-many-hits field: {}", field)))
        };

        let mut result = TooManyHitsReader {
            aligner_threshold: next("aligner threshold")?,
            ..Self::default()
        };
        let n = next("number of records")?;
        for _ in 0..n {
            let query_index = next("query index")?;
            let hits = next("number of hits")?;
            result.hits.insert(query_index, hits);
            if next("length flag")? != 0 {
                result.lengths_of_match.insert(query_index, next("length of match")?);
            }
        }
        Ok(result)
    }

    /// Returns the threshold the aligner used for suppressing ambiguous queries.
    pub fn aligner_threshold(&self) -> usize {
        self.aligner_threshold
    }

    /// Returns the number of queries in the ledger.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns `true` if the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Returns the recorded lower bound for the number of hits of the query.
    pub fn number_of_hits(&self, query_index: usize) -> Option<usize> {
        self.hits.get(&query_index).copied()
    }

    /// Returns the recorded length of match for the query.
    pub fn length_of_match(&self, query_index: usize) -> Option<usize> {
        self.lengths_of_match.get(&query_index).copied()
    }

    /// Returns the recorded query indexes in arbitrary order.
    pub fn query_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.hits.keys().copied()
    }

    /// Returns `true` if the query has a record.
    pub fn is_query_ambiguous(&self, query_index: usize) -> bool {
        self.hits.contains_key(&query_index)
    }

    /// Returns `true` if the query should be considered ambiguous with `k` allowed hits.
    ///
    /// A query without a record is never ambiguous.
    /// If `k` is at least the aligner threshold, every recorded query is ambiguous,
    /// because the aligner stopped counting and the true number of hits has no upper bound.
    /// Otherwise the query is ambiguous if it has at least `k` recorded hits.
    pub fn is_query_ambiguous_at(&self, query_index: usize, k: usize) -> bool {
        match self.number_of_hits(query_index) {
            None => false,
            Some(_) if k >= self.aligner_threshold => true,
            Some(hits) => hits >= k,
        }
    }

    /// Like [`TooManyHitsReader::is_query_ambiguous_at`], but a match shorter than the recorded length is always ambiguous.
    pub fn is_query_ambiguous_with_match_length(&self, query_index: usize, k: usize, match_length: usize) -> bool {
        match self.length_of_match(query_index) {
            Some(len) if match_length < len => true,
            _ => self.is_query_ambiguous_at(query_index, k),
        }
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
