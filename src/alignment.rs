//! Structures for representing alignments of reads to a linear reference.
//!
//! An [`AlignmentEntry`] is one aligned segment of one query (read) against one target (reference sequence).
//! Differences from the reference are listed as [`SequenceVariation`] objects relative to the start of the entry.
//! Bases that match the reference are not stored.
//!
//! Entries are stored in chunks.
//! An [`EntryChunk`] is an independently decodable batch of entries, encoded column by column:
//! flags as an ad hoc bitvector, numbers with [`ByteCode`], and strings as raw bytes.
//! The serialized chunk is compressed with Zstandard.
//!
//! ### Coordinates
//!
//! * Entry positions are 0-based positions on the target.
//! * Variation positions are 1-based offsets from the entry position.
//!   A substitution or a deletion at offset `v` starts at reference position `entry.position + v - 1`.
//!   An insertion at offset `v` lies immediately before reference position `entry.position + v`.
//! * Read indexes are 1-based positions in the read, counted in sequencing orientation.

use crate::StoreError;

use std::fmt::Display;
use std::io::{Read, Write};

use zstd::stream::Encoder as ZstdEncoder;
use zstd::stream::Decoder as ZstdDecoder;

use gbwt::support::{ByteCode, ByteCodeIter};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A position on the reference, ordered by target index and then by position.
///
/// This is the sort key of sorted stores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceLocation {
    /// Index of the target sequence.
    pub target_index: usize,
    /// 0-based position on the target.
    pub position: usize,
}

impl ReferenceLocation {
    /// Creates a new location.
    pub fn new(target_index: usize, position: usize) -> Self {
        ReferenceLocation { target_index, position }
    }
}

impl Display for ReferenceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.target_index, self.position)
    }
}

//-----------------------------------------------------------------------------

/// The gap symbol used in [`SequenceVariation::from`] and [`SequenceVariation::to`].
pub const GAP: u8 = b'-';

/// A difference between the read and the reference within an [`AlignmentEntry`].
///
/// `from` contains the reference bases and `to` the read bases.
/// Both strings have the same length, and a gap on either side is marked with [`GAP`].
/// `from = "--"`, `to = "AC"` is an insertion of two bases in the read,
/// and `from = "AC"`, `to = "--"` is a deletion of two reference bases.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceVariation {
    /// Reference bases.
    pub from: Vec<u8>,
    /// Read bases.
    pub to: Vec<u8>,
    /// 1-based offset from the position of the entry.
    pub position: usize,
    /// 1-based index of the first variant base in the read.
    pub read_index: usize,
    /// Base quality values for the bases in `to`.
    pub to_quality: Vec<u8>,
}

impl SequenceVariation {
    /// Creates a new variation without base qualities.
    pub fn new(from: &[u8], to: &[u8], position: usize, read_index: usize) -> Self {
        SequenceVariation {
            from: from.to_vec(),
            to: to.to_vec(),
            position,
            read_index,
            to_quality: Vec::new(),
        }
    }

    /// Returns `true` if the variation contains bases missing from the reference.
    pub fn is_insertion(&self) -> bool {
        self.from.contains(&GAP)
    }

    /// Returns `true` if the variation contains reference bases missing from the read.
    pub fn is_deletion(&self) -> bool {
        self.to.contains(&GAP)
    }

    /// Returns `true` if the variation is an insertion or a deletion.
    pub fn is_indel(&self) -> bool {
        self.is_insertion() || self.is_deletion()
    }

    /// Returns the number of reference bases covered by the variation.
    pub fn reference_len(&self) -> usize {
        self.from.iter().filter(|&&c| c != GAP).count()
    }

    /// Returns the number of read bases covered by the variation.
    pub fn read_len(&self) -> usize {
        self.to.iter().filter(|&&c| c != GAP).count()
    }

    /// Returns the reference position where the variation starts in an entry starting at `entry_position`.
    ///
    /// For variations starting with an insertion, this is the first reference position after the inserted bases.
    pub fn reference_start(&self, entry_position: usize) -> usize {
        if self.from.first() == Some(&GAP) {
            entry_position.saturating_add(self.position)
        } else {
            entry_position.saturating_add(self.position).saturating_sub(1)
        }
    }
}

//-----------------------------------------------------------------------------

/// A link from one segment of a spliced or paired read to another segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpliceLink {
    pub target_index: usize,
    pub position: usize,
    pub fragment_index: usize,
}

/// One aligned segment of one query against one target.
///
/// Entries are immutable once stored.
/// Components that change an entry (such as [`crate::RealignmentProcessor`]) emit a new entry.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignmentEntry {
    /// Index of the query, local to the store unless remapped.
    pub query_index: usize,
    /// Index of the target.
    pub target_index: usize,
    /// 0-based position of the leftmost aligned base on the target.
    pub position: usize,
    /// 0-based offset of the first aligned base in the query.
    pub query_position: usize,
    /// Length of the query.
    pub query_length: usize,
    /// Number of query bases in the alignment.
    pub query_aligned_length: usize,
    /// Number of target bases in the alignment.
    pub target_aligned_length: usize,
    /// Alignment score; larger is better.
    pub score: f32,
    /// Mapping quality in the range 0-255.
    pub mapping_quality: u8,
    /// The read aligns to the reverse strand.
    pub matching_reverse_strand: bool,
    /// Number of collapsed duplicate reads represented by the entry.
    pub multiplicity: usize,
    /// Number of alignments of the same query in the store.
    pub query_index_occurrences: usize,
    /// Index of this segment among the fragments of a spliced or paired read.
    pub fragment_index: usize,
    /// Index of the sample the entry came from.
    pub sample_index: usize,
    /// Link to the next segment of the same read.
    pub spliced_forward_link: Option<SpliceLink>,
    /// Link to the previous segment of the same read.
    pub spliced_backward_link: Option<SpliceLink>,
    /// Differences from the reference, in order of position.
    pub sequence_variations: Vec<SequenceVariation>,
}

impl AlignmentEntry {
    /// Mapping quality used when the aligner does not report one.
    pub const MISSING_MAPPING_QUALITY: u8 = 255;

    /// Creates a new entry with default values for everything except the location.
    pub fn new(query_index: usize, target_index: usize, position: usize) -> Self {
        AlignmentEntry {
            query_index,
            target_index,
            position,
            query_position: 0,
            query_length: 0,
            query_aligned_length: 0,
            target_aligned_length: 0,
            score: 0.0,
            mapping_quality: Self::MISSING_MAPPING_QUALITY,
            matching_reverse_strand: false,
            multiplicity: 1,
            query_index_occurrences: 1,
            fragment_index: 0,
            sample_index: 0,
            spliced_forward_link: None,
            spliced_backward_link: None,
            sequence_variations: Vec::new(),
        }
    }

    /// Returns the sort key of the entry.
    pub fn location(&self) -> ReferenceLocation {
        ReferenceLocation::new(self.target_index, self.position)
    }

    /// Returns the reference position after the last aligned base.
    pub fn end(&self) -> usize {
        self.position.saturating_add(self.target_aligned_length)
    }

    /// Returns the 1-based read index of the aligned base at the given 0-based offset in the aligned part of the read.
    pub fn read_index(&self, read_offset: usize) -> usize {
        if self.matching_reverse_strand {
            self.query_length.saturating_sub(self.query_position + read_offset)
        } else {
            self.query_position + read_offset + 1
        }
    }

    /// Returns `true` if any sequence variation is an insertion or a deletion.
    pub fn has_indels(&self) -> bool {
        self.sequence_variations.iter().any(|var| var.is_indel())
    }

    /// Returns the columns of the pairwise alignment in reference order.
    ///
    /// Bases between declared variations are assumed to match the reference.
    /// Trailing matches extend to [`AlignmentEntry::end`].
    /// Returns an error if the variations overlap, are malformed, or extend past the end of the entry,
    /// or if the columns disagree with the aligned lengths.
    pub fn columns(&self) -> Result<Vec<Column>, String> {
        let mut order: Vec<usize> = (0..self.sequence_variations.len()).collect();
        order.sort_by_key(|&i| self.sequence_variations[i].reference_start(self.position));

        // Matching bases consume one base on both sides.
        let ref_bases: usize = self.sequence_variations.iter().map(|var| var.reference_len()).sum();
        let read_bases: usize = self.sequence_variations.iter().map(|var| var.read_len()).sum();
        let matches = self.query_aligned_length.checked_sub(read_bases);
        if matches.and_then(|n| n.checked_add(ref_bases)) != Some(self.target_aligned_length) {
            return Err(format!(
                "Variations of query {} disagree with {} aligned read bases and {} aligned reference bases",
                self.query_index, self.query_aligned_length, self.target_aligned_length
            ));
        }

        let end = self.end();
        let mut result = Vec::new();
        let mut ref_pos = self.position;
        let mut read_offset = 0;
        for var_id in order {
            let var = &self.sequence_variations[var_id];
            if var.from.len() != var.to.len() || var.from.is_empty() {
                return Err(format!("Variation {} of query {}: from and to have different lengths", var_id, self.query_index));
            }
            let start = var.reference_start(self.position);
            if start < ref_pos {
                return Err(format!("Variation {} of query {} overlaps the previous one", var_id, self.query_index));
            }
            if start.saturating_add(var.reference_len()) > end {
                return Err(format!("Variation {} of query {} extends past the end of the entry", var_id, self.query_index));
            }
            while ref_pos < start {
                result.push(Column::Match { ref_pos, read_offset });
                ref_pos += 1;
                read_offset += 1;
            }
            for (j, (&from, &to)) in var.from.iter().zip(var.to.iter()).enumerate() {
                if from == GAP && to == GAP {
                    return Err(format!("Variation {} of query {} has a gap on both sides", var_id, self.query_index));
                }
                // Gaps are anchored to the preceding base on the same side.
                let col_ref = if from != GAP { ref_pos } else if ref_pos > self.position { ref_pos - 1 } else { ref_pos };
                let col_read = if to != GAP { read_offset } else { read_offset.saturating_sub(1) };
                let quality = if to != GAP { var.to_quality.get(j).copied() } else { None };
                result.push(Column::Variant {
                    ref_pos: col_ref, read_offset: col_read,
                    from, to, quality,
                    variation: var_id,
                });
                if from != GAP {
                    ref_pos += 1;
                }
                if to != GAP {
                    read_offset += 1;
                }
            }
        }
        while ref_pos < end {
            result.push(Column::Match { ref_pos, read_offset });
            ref_pos += 1;
            read_offset += 1;
        }

        Ok(result)
    }
}

/// A column in the pairwise alignment described by an [`AlignmentEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    /// A read base that matches the reference base.
    Match {
        ref_pos: usize,
        read_offset: usize,
    },
    /// A declared difference.
    ///
    /// If `from` is a gap, `ref_pos` is the preceding reference position.
    /// If `to` is a gap, `read_offset` is the offset of the preceding read base.
    Variant {
        ref_pos: usize,
        read_offset: usize,
        from: u8,
        to: u8,
        quality: Option<u8>,
        variation: usize,
    },
}

impl Column {
    /// Returns `true` if the column consumes a reference base.
    pub fn consumes_reference(&self) -> bool {
        match self {
            Column::Match { .. } => true,
            Column::Variant { from, .. } => *from != GAP,
        }
    }

    /// Returns `true` if the column consumes a read base.
    pub fn consumes_read(&self) -> bool {
        match self {
            Column::Match { .. } => true,
            Column::Variant { to, .. } => *to != GAP,
        }
    }
}

//-----------------------------------------------------------------------------

/// An encoded chunk of alignment entries.
///
/// The chunk stores the number of entries, an ad hoc flag bitvector with [`EntryChunk::NUM_FLAGS`] bits per entry,
/// numerical fields encoded with [`ByteCode`], and the variation strings as raw bytes.
/// Target indexes and positions are delta-encoded relative to the previous entry in the chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryChunk {
    pub entries: usize,
    pub flags: Vec<u8>,
    pub numbers: Vec<u8>,
    pub bytes: Vec<u8>,
}

impl EntryChunk {
    /// Number of flags per entry.
    pub const NUM_FLAGS: usize = 3;

    // Flags expressed as a bit offset.
    pub const FLAG_REVERSE_STRAND: usize = 0;
    pub const FLAG_FORWARD_LINK: usize = 1;
    pub const FLAG_BACKWARD_LINK: usize = 2;

    /// Compression level for Zstandard.
    pub const COMPRESSION_LEVEL: i32 = 7;

    // Size of the serialized chunk header: four little-endian 64-bit integers.
    const HEADER_SIZE: usize = 4 * 8;

    /// Encodes the entries as a chunk.
    pub fn new(entries: &[AlignmentEntry]) -> Self {
        let flag_bits = entries.len() * Self::NUM_FLAGS;
        let mut flags: Vec<u8> = vec![0; flag_bits.div_ceil(8)];
        let mut numbers = ByteCode::new();
        let mut bytes: Vec<u8> = Vec::new();

        let mut prev = ReferenceLocation::default();
        for (i, entry) in entries.iter().enumerate() {
            let flag_offset = i * Self::NUM_FLAGS;
            if entry.matching_reverse_strand {
                Self::set_flag(&mut flags, flag_offset + Self::FLAG_REVERSE_STRAND);
            }
            if entry.spliced_forward_link.is_some() {
                Self::set_flag(&mut flags, flag_offset + Self::FLAG_FORWARD_LINK);
            }
            if entry.spliced_backward_link.is_some() {
                Self::set_flag(&mut flags, flag_offset + Self::FLAG_BACKWARD_LINK);
            }

            encode_signed(entry.target_index as isize - prev.target_index as isize, &mut numbers);
            encode_signed(entry.position as isize - prev.position as isize, &mut numbers);
            prev = entry.location();

            numbers.write(entry.query_index);
            numbers.write(entry.query_position);
            numbers.write(entry.query_length);
            numbers.write(entry.query_aligned_length);
            numbers.write(entry.target_aligned_length);
            numbers.write(entry.score.to_bits() as usize);
            numbers.write(entry.mapping_quality as usize);
            numbers.write(entry.multiplicity);
            numbers.write(entry.query_index_occurrences);
            numbers.write(entry.fragment_index);
            numbers.write(entry.sample_index);
            for link in [&entry.spliced_forward_link, &entry.spliced_backward_link].into_iter().flatten() {
                numbers.write(link.target_index);
                numbers.write(link.position);
                numbers.write(link.fragment_index);
            }

            numbers.write(entry.sequence_variations.len());
            for var in entry.sequence_variations.iter() {
                numbers.write(var.position);
                numbers.write(var.read_index);
                numbers.write(var.from.len());
                numbers.write(var.to.len());
                numbers.write(var.to_quality.len());
                bytes.extend_from_slice(&var.from);
                bytes.extend_from_slice(&var.to);
                bytes.extend_from_slice(&var.to_quality);
            }
        }

        EntryChunk {
            entries: entries.len(),
            flags,
            numbers: Vec::from(numbers),
            bytes,
        }
    }

    /// Returns the number of entries in the chunk.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Returns `true` if the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn set_flag(flags: &mut [u8], bit: usize) {
        flags[bit / 8] |= 1 << (bit % 8);
    }

    fn flag(&self, i: usize, flag: usize) -> bool {
        let bit = i * Self::NUM_FLAGS + flag;
        (self.flags[bit / 8] >> (bit % 8)) & 0x01 != 0
    }

    /// Serializes and compresses the chunk.
    pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
        let mut encoder = ZstdEncoder::new(Vec::new(), Self::COMPRESSION_LEVEL)?;
        for len in [self.entries, self.flags.len(), self.numbers.len(), self.bytes.len()] {
            encoder.write_all(&(len as u64).to_le_bytes())?;
        }
        encoder.write_all(&self.flags)?;
        encoder.write_all(&self.numbers)?;
        encoder.write_all(&self.bytes)?;
        let compressed = encoder.finish()?;
        Ok(compressed)
    }

    /// Decompresses and deserializes a chunk created with [`EntryChunk::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self, StoreError> {
        let mut decoder = ZstdDecoder::new(data).map_err(|err| StoreError::format(format!("Zstd decompression error: {}", err)))?;
        let mut buffer = Vec::new();
        decoder.read_to_end(&mut buffer).map_err(|err| StoreError::format(format!("Zstd decompression error: {}", err)))?;
        if buffer.len() < Self::HEADER_SIZE {
            return Err(StoreError::format(format!("Chunk of {} bytes is too short for its header", buffer.len())));
        }

        let mut lens = [0usize; 4];
        for (i, len) in lens.iter_mut().enumerate() {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buffer[8 * i..8 * (i + 1)]);
            *len = u64::from_le_bytes(bytes) as usize;
        }
        let [entries, flags_len, numbers_len, bytes_len] = lens;
        let expected = Self::HEADER_SIZE.checked_add(flags_len)
            .and_then(|n| n.checked_add(numbers_len))
            .and_then(|n| n.checked_add(bytes_len));
        if expected != Some(buffer.len()) {
            return Err(StoreError::format(format!(
                "Chunk has {} bytes, but its header declares {} + {} + {} bytes of data",
                buffer.len(), flags_len, numbers_len, bytes_len
            )));
        }
        if entries.checked_mul(Self::NUM_FLAGS).map(|bits| bits.div_ceil(8)) != Some(flags_len) {
            return Err(StoreError::format(format!("Chunk of {} entries has {} flag bytes", entries, flags_len)));
        }

        let mut offset = Self::HEADER_SIZE;
        let flags = buffer[offset..offset + flags_len].to_vec();
        offset += flags_len;
        let numbers = buffer[offset..offset + numbers_len].to_vec();
        offset += numbers_len;
        let bytes = buffer[offset..offset + bytes_len].to_vec();

        Ok(EntryChunk { entries, flags, numbers, bytes })
    }

    /// Decodes the entries in the chunk.
    ///
    /// Either returns all entries or fails.
    pub fn decode(&self) -> Result<Vec<AlignmentEntry>, StoreError> {
        let mut result = Vec::with_capacity(self.len());
        let mut decoder = ByteCodeIter::new(&self.numbers[..]);
        let mut byte_offset = 0;

        let mut prev = ReferenceLocation::default();
        for i in 0..self.len() {
            let mut next = |field: &str| -> Result<usize, StoreError> {
                decoder.next().ok_or_else(|| StoreError::format(format!("Missing {} for entry {} in chunk", field, i)))
            };

            let target_index = apply_delta(prev.target_index, decode_signed(next("target index")?))
                .ok_or_else(|| StoreError::format(format!("Invalid target index for entry {} in chunk", i)))?;
            let position = apply_delta(prev.position, decode_signed(next("position")?))
                .ok_or_else(|| StoreError::format(format!("Invalid position for entry {} in chunk", i)))?;
            prev = ReferenceLocation::new(target_index, position);

            let mut entry = AlignmentEntry::new(next("query index")?, target_index, position);
            entry.query_position = next("query position")?;
            entry.query_length = next("query length")?;
            entry.query_aligned_length = next("query aligned length")?;
            entry.target_aligned_length = next("target aligned length")?;
            entry.score = f32::from_bits(next("score")? as u32);
            entry.mapping_quality = u8::try_from(next("mapping quality")?)
                .map_err(|_| StoreError::format(format!("Invalid mapping quality for entry {} in chunk", i)))?;
            entry.multiplicity = next("multiplicity")?;
            entry.query_index_occurrences = next("query index occurrences")?;
            entry.fragment_index = next("fragment index")?;
            entry.sample_index = next("sample index")?;
            entry.matching_reverse_strand = self.flag(i, Self::FLAG_REVERSE_STRAND);
            if self.flag(i, Self::FLAG_FORWARD_LINK) {
                entry.spliced_forward_link = Some(SpliceLink {
                    target_index: next("forward link target")?,
                    position: next("forward link position")?,
                    fragment_index: next("forward link fragment")?,
                });
            }
            if self.flag(i, Self::FLAG_BACKWARD_LINK) {
                entry.spliced_backward_link = Some(SpliceLink {
                    target_index: next("backward link target")?,
                    position: next("backward link position")?,
                    fragment_index: next("backward link fragment")?,
                });
            }

            let variations = next("variation count")?;
            for _ in 0..variations {
                let position = next("variation position")?;
                let read_index = next("variation read index")?;
                let from_len = next("variation from length")?;
                let to_len = next("variation to length")?;
                let quality_len = next("variation quality length")?;
                let total = from_len.checked_add(to_len).and_then(|n| n.checked_add(quality_len));
                let end = total.and_then(|n| n.checked_add(byte_offset));
                if !matches!(end, Some(end) if end <= self.bytes.len()) {
                    return Err(StoreError::format(format!("Variation strings for entry {} extend past the end of the chunk", i)));
                }
                let from = self.bytes[byte_offset..byte_offset + from_len].to_vec();
                byte_offset += from_len;
                let to = self.bytes[byte_offset..byte_offset + to_len].to_vec();
                byte_offset += to_len;
                let to_quality = self.bytes[byte_offset..byte_offset + quality_len].to_vec();
                byte_offset += quality_len;
                entry.sequence_variations.push(SequenceVariation { from, to, position, read_index, to_quality });
            }

            result.push(entry);
        }

        if decoder.next().is_some() || byte_offset != self.bytes.len() {
            return Err(StoreError::format("Chunk contains trailing data"));
        }

        Ok(result)
    }
}

// Encodes a signed integer. Small absolute values are represented as small numbers.
fn encode_signed(value: isize, encoder: &mut ByteCode) {
    let value = if value < 0 { (-2 * value - 1) as usize } else { 2 * value as usize };
    encoder.write(value);
}

// Decodes a signed integer encoded with `encode_signed`.
fn decode_signed(value: usize) -> isize {
    if value % 2 == 0 {
        (value / 2) as isize
    } else {
        -((value / 2) as isize) - 1
    }
}

fn apply_delta(base: usize, delta: isize) -> Option<usize> {
    if delta < 0 {
        base.checked_sub(delta.unsigned_abs())
    } else {
        base.checked_add(delta as usize)
    }
}

//-----------------------------------------------------------------------------
