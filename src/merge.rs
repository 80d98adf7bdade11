//! Best-score merge of alternative alignments for the same queries.
//!
//! The inputs are stores produced by aligning the same reads against different parts of a reference,
//! for example against each chromosome or each transcript separately.
//! The merge keeps, for each query, the entries with the best score over all inputs,
//! and drops queries that cannot be placed unambiguously.
//!
//! A query is dropped when:
//!
//! * the too-many-hits ledger of any input marks it ambiguous at `k`; or
//! * more than `k` entries share the best score; or
//! * with a gene table, its entries touch more than `k` distinct genes.
//!
//! Target spaces of the inputs are merged by name, and target indexes are renumbered to be contiguous.

use crate::{AlignmentHeader, AlignmentReader, AlignmentWriter, StoreError, TooManyHitsReader, WriterParams};
use crate::store::IdentifierMap;
use crate::utils;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use tracing::{debug, info};


//-----------------------------------------------------------------------------

/// Parameters for [`merge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeParams {
    /// Maximum number of equally good placements (or genes) for a query to be kept.
    pub k: usize,
    /// Tab-separated `gene<TAB>transcript` table with a header line.
    pub gene_table: Option<PathBuf>,
    /// Entries per chunk in the output store.
    pub entries_per_chunk: usize,
    /// Log progress information.
    pub progress: bool,
}

impl MergeParams {
    /// Default value for `k`.
    pub const DEFAULT_K: usize = 1;
}

impl Default for MergeParams {
    fn default() -> Self {
        MergeParams {
            k: Self::DEFAULT_K,
            gene_table: None,
            entries_per_chunk: WriterParams::DEFAULT_ENTRIES_PER_CHUNK,
            progress: false,
        }
    }
}

/// Summary of a merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Total number of entries in the inputs.
    pub entries_read: usize,
    /// Number of entries in the output.
    pub entries_written: usize,
    /// Number of queries with entries that were dropped because an input ledger marked them ambiguous.
    pub queries_dropped_by_ledger: usize,
    /// Number of queries dropped because they had too many best placements or genes.
    pub queries_dropped_as_ambiguous: usize,
    /// Number of queries in the output header.
    pub number_of_queries: usize,
    /// Number of targets in the output header.
    pub number_of_targets: usize,
}

//-----------------------------------------------------------------------------

/// Mapping from transcript names to genes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneTable {
    genes: IdentifierMap,
    transcript_to_gene: HashMap<String, usize>,
}

impl GeneTable {
    /// Loads a tab-separated `gene<TAB>transcript` table, which may be gzip-compressed.
    ///
    /// The first line is a header and is ignored.
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self, StoreError> {
        let reader = utils::open_file(&filename)?;
        let mut result = GeneTable::default();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line_num == 0 || line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (gene, transcript) = match (fields.next(), fields.next()) {
                (Some(gene), Some(transcript)) => (gene.trim(), transcript.trim()),
                _ => return Err(StoreError::format(format!(
                    "{}: line {} is not a gene-transcript pair", filename.as_ref().display(), line_num + 1
                ))),
            };
            result.insert(gene, transcript);
        }
        debug!("Loaded {} transcripts of {} genes", result.transcript_to_gene.len(), result.genes.len());
        Ok(result)
    }

    /// Adds a transcript of the gene.
    pub fn insert(&mut self, gene: &str, transcript: &str) {
        let gene_index = self.genes.insert(gene);
        self.transcript_to_gene.insert(transcript.to_string(), gene_index);
    }

    /// Returns the number of genes.
    pub fn number_of_genes(&self) -> usize {
        self.genes.len()
    }

    /// Returns the gene index of the transcript.
    pub fn gene_index(&self, transcript: &str) -> Option<usize> {
        self.transcript_to_gene.get(transcript).copied()
    }

    /// Returns the name of the gene.
    pub fn gene_name(&self, gene_index: usize) -> Option<&str> {
        self.genes.name(gene_index)
    }
}

//-----------------------------------------------------------------------------

// Target space of the output and the mapping from each input.
struct TargetUnion {
    identifiers: IdentifierMap,
    lengths: Vec<Option<usize>>,
    // mapping[input][target] = merged target.
    mapping: Vec<Vec<usize>>,
}

impl TargetUnion {
    fn new(headers: &[AlignmentHeader]) -> Result<Self, StoreError> {
        let mut identifiers = IdentifierMap::new();
        let mut lengths: Vec<Option<usize>> = Vec::new();
        let mut mapping = Vec::with_capacity(headers.len());
        for header in headers.iter() {
            let mut local = Vec::new();
            for target in 0..header.number_of_targets {
                let name = match header.target_name(target) {
                    Some(name) => name.to_string(),
                    None => target.to_string(),
                };
                let merged = identifiers.insert(&name);
                if merged >= lengths.len() {
                    lengths.resize(merged + 1, None);
                }
                if let Some(len) = header.target_length(target) {
                    match lengths[merged] {
                        Some(previous) if previous != len => {
                            return Err(StoreError::format(format!(
                                "Target {} has lengths {} and {} in different inputs", name, previous, len
                            )));
                        },
                        _ => lengths[merged] = Some(len),
                    }
                }
                local.push(merged);
            }
            mapping.push(local);
        }
        Ok(TargetUnion { identifiers, lengths, mapping })
    }

    fn map(&self, input: usize, target: usize) -> Result<usize, StoreError> {
        self.mapping[input].get(target).copied().ok_or_else(|| {
            StoreError::format(format!("Input {} has an entry for undeclared target {}", input, target))
        })
    }

    fn name(&self, merged: usize) -> Option<&str> {
        self.identifiers.name(merged)
    }
}

// What is known about a query after the first pass.
#[derive(Clone, Debug)]
struct QueryInfo {
    best_score: f32,
    count_at_best: usize,
    genes: BTreeSet<usize>,
}

//-----------------------------------------------------------------------------

/// Merges the input stores into a new unsorted store, keeping the best-scoring entries of each unambiguous query.
///
/// The inputs must share a query index space.
/// Target names that are missing from the gene table are treated as genes of their own.
///
/// # Examples
///
/// ```no_run
/// use goby_base::{merge, MergeParams};
///
/// let params = MergeParams { k: 2, ..MergeParams::default() };
/// let summary = merge(&["chr1-hits", "chr2-hits"], "merged", &params).unwrap();
/// println!("Kept {} of {} entries", summary.entries_written, summary.entries_read);
/// ```
pub fn merge<P: AsRef<Path>, Q: AsRef<Path>>(inputs: &[P], output: Q, params: &MergeParams) -> Result<MergeSummary, StoreError> {
    if inputs.is_empty() {
        return Err(StoreError::format("No inputs to merge"));
    }
    let gene_table = match params.gene_table.as_ref() {
        Some(filename) => Some(GeneTable::load(filename)?),
        None => None,
    };

    let mut headers = Vec::with_capacity(inputs.len());
    let mut ledgers = Vec::with_capacity(inputs.len());
    for input in inputs.iter() {
        let reader = AlignmentReader::open(input)?;
        ledgers.push(TooManyHitsReader::open(reader.basename())?);
        headers.push(reader.header().clone());
    }
    let targets = TargetUnion::new(&headers)?;

    // Genes are identified by transcript names; unknown transcripts become genes of their own.
    let mut extra_genes = IdentifierMap::new();
    let mut gene_of = |merged_target: usize| -> usize {
        let name = targets.name(merged_target).unwrap_or_default().to_string();
        let known = gene_table.as_ref().and_then(|table| table.gene_index(&name));
        match (known, gene_table.as_ref()) {
            (Some(gene), _) => gene,
            (None, Some(table)) => table.number_of_genes() + extra_genes.insert(&name),
            (None, None) => merged_target,
        }
    };

    // First pass: best score, count at the best score, and genes for each query.
    let mut summary = MergeSummary::default();
    let mut queries: HashMap<usize, QueryInfo> = HashMap::new();
    let mut dropped_by_ledger: HashSet<usize> = HashSet::new();
    for (input, filename) in inputs.iter().enumerate() {
        let reader = AlignmentReader::open(filename)?;
        for entry in reader {
            let entry = entry?;
            summary.entries_read += 1;
            let query_index = entry.query_index;
            if ledgers.iter().any(|ledger| ledger.is_query_ambiguous_at(query_index, params.k)) {
                dropped_by_ledger.insert(query_index);
                continue;
            }
            let gene = gene_of(targets.map(input, entry.target_index)?);
            let info = queries.entry(query_index).or_insert_with(|| QueryInfo {
                best_score: entry.score,
                count_at_best: 0,
                genes: BTreeSet::new(),
            });
            if entry.score > info.best_score {
                info.best_score = entry.score;
                info.count_at_best = 1;
            } else if entry.score == info.best_score {
                info.count_at_best += 1;
            }
            info.genes.insert(gene);
        }
        if params.progress {
            info!("Scanned input {} ({} entries so far)", input + 1, summary.entries_read);
        }
    }

    let keep = |info: &QueryInfo| -> bool {
        if gene_table.is_some() {
            info.genes.len() <= params.k
        } else {
            info.count_at_best <= params.k
        }
    };
    summary.queries_dropped_by_ledger = dropped_by_ledger.len();
    summary.queries_dropped_as_ambiguous = queries.values().filter(|info| !keep(info)).count();

    // Second pass: write the best entries of the kept queries.
    let writer_params = WriterParams { entries_per_chunk: params.entries_per_chunk, ..WriterParams::default() };
    let mut writer = AlignmentWriter::create(output, writer_params)?;
    let number_of_queries = headers.iter().map(|header| header.number_of_queries).max().unwrap_or(0);
    writer.set_number_of_queries(number_of_queries);
    writer.set_number_of_targets(targets.identifiers.len());
    if headers.iter().any(|header| !header.target_identifiers.is_empty()) {
        writer.set_target_identifiers(targets.identifiers.clone());
    }
    if targets.lengths.iter().all(|len| len.is_some()) {
        writer.set_target_lengths(targets.lengths.iter().map(|len| len.unwrap_or(0)).collect());
    }
    if let Some(lengths) = headers.iter().find_map(|header| header.query_lengths.expand(number_of_queries)) {
        writer.set_query_lengths(lengths);
    }
    if let Some(name) = headers[0].aligner_name.as_ref() {
        writer.set_aligner(name, headers[0].aligner_version.as_deref().unwrap_or(""));
    }

    for (input, filename) in inputs.iter().enumerate() {
        let reader = AlignmentReader::open(filename)?;
        for entry in reader {
            let mut entry = entry?;
            let info = match queries.get(&entry.query_index) {
                Some(info) => info,
                None => continue,
            };
            if entry.score != info.best_score || !keep(info) {
                continue;
            }
            entry.target_index = targets.map(input, entry.target_index)?;
            writer.append(entry)?;
            summary.entries_written += 1;
        }
    }
    writer.set_statistic("merge.k", &params.k.to_string());
    writer.set_statistic("merge.entries.read", &summary.entries_read.to_string());
    writer.set_statistic("merge.queries.dropped.by.ledger", &summary.queries_dropped_by_ledger.to_string());
    writer.set_statistic("merge.queries.dropped.as.ambiguous", &summary.queries_dropped_as_ambiguous.to_string());
    let header = writer.close()?;
    summary.number_of_queries = header.number_of_queries;
    summary.number_of_targets = header.number_of_targets;

    info!(
        "Merged {} inputs: kept {} of {} entries; dropped {} queries by ledger and {} as ambiguous",
        inputs.len(), summary.entries_written, summary.entries_read,
        summary.queries_dropped_by_ledger, summary.queries_dropped_as_ambiguous
    );
    Ok(summary)
}

//-----------------------------------------------------------------------------
