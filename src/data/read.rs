//! # Aligned Reads
//!
//! In-memory representation of an aligned short read: CIGAR, sequence, base
//! qualities, mapping quality, strand, and template (read-pair) identity.
//! Read providers hand these to the calling core already filtered.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::region::GenomicRegion;

/// Sample identifier as it appears in read-group headers.
pub type SampleName = Arc<str>;

/// Reads per sample, in coordinate order within each sample.
pub type ReadMap = BTreeMap<SampleName, Vec<AlignedRead>>;

/// CIGAR operation kinds the caller consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CigarOpKind {
    /// Alignment match or mismatch (M, =, X).
    Match,
    /// Insertion to the reference.
    Insertion,
    /// Deletion from the reference.
    Deletion,
    /// Soft clip; bases present in the read but unaligned.
    SoftClip,
    /// Hard clip; bases absent from the record.
    HardClip,
    /// Skipped reference region (N).
    RefSkip,
}

/// One CIGAR operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CigarOp {
    pub kind: CigarOpKind,
    pub len: u32,
}

impl CigarOp {
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }

    /// Consumes read bases.
    pub fn consumes_read(&self) -> bool {
        matches!(
            self.kind,
            CigarOpKind::Match | CigarOpKind::Insertion | CigarOpKind::SoftClip
        )
    }

    /// Consumes reference positions.
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self.kind,
            CigarOpKind::Match | CigarOpKind::Deletion | CigarOpKind::RefSkip
        )
    }
}

/// An aligned read.
#[derive(Clone, Debug)]
pub struct AlignedRead {
    name: Arc<str>,
    contig: Arc<str>,
    begin: u64,
    mapq: u8,
    cigar: Vec<CigarOp>,
    sequence: Arc<[u8]>,
    qualities: Arc<[u8]>,
    is_reverse: bool,
    is_first_of_template: bool,
}

impl AlignedRead {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<Arc<str>>,
        contig: impl Into<Arc<str>>,
        begin: u64,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
        is_reverse: bool,
        is_first_of_template: bool,
    ) -> Self {
        let sequence = sequence.into();
        let qualities = qualities.into();
        debug_assert_eq!(sequence.len(), qualities.len());
        Self {
            name: name.into(),
            contig: contig.into(),
            begin,
            mapq,
            cigar,
            sequence,
            qualities,
            is_reverse,
            is_first_of_template,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn contig(&self) -> &Arc<str> {
        &self.contig
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// One past the last reference position the alignment covers.
    pub fn end(&self) -> u64 {
        let span: u64 = self
            .cigar
            .iter()
            .filter(|op| op.consumes_reference())
            .map(|op| op.len as u64)
            .sum();
        self.begin + span
    }

    pub fn region(&self) -> GenomicRegion {
        GenomicRegion::new(self.contig.clone(), self.begin, self.end())
    }

    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    pub fn cigar(&self) -> &[CigarOp] {
        &self.cigar
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn qualities(&self) -> &[u8] {
        &self.qualities
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn is_reverse(&self) -> bool {
        self.is_reverse
    }

    pub fn is_first_of_template(&self) -> bool {
        self.is_first_of_template
    }

    pub fn overlaps(&self, region: &GenomicRegion) -> bool {
        self.region().overlaps(region)
    }

    /// Walk (reference position, read offset) pairs for every aligned base.
    pub fn aligned_pairs(&self) -> AlignedPairs<'_> {
        AlignedPairs {
            read: self,
            op_index: 0,
            op_offset: 0,
            ref_pos: self.begin,
            read_offset: 0,
        }
    }

    /// Mean base quality over the whole read.
    pub fn mean_base_quality(&self) -> f64 {
        if self.qualities.is_empty() {
            return 0.0;
        }
        self.qualities.iter().map(|&q| q as f64).sum::<f64>() / self.qualities.len() as f64
    }
}

/// Iterator over aligned (reference position, read offset) base pairs.
pub struct AlignedPairs<'a> {
    read: &'a AlignedRead,
    op_index: usize,
    op_offset: u32,
    ref_pos: u64,
    read_offset: usize,
}

impl Iterator for AlignedPairs<'_> {
    type Item = (u64, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let op = *self.read.cigar.get(self.op_index)?;
            if self.op_offset == op.len {
                self.op_index += 1;
                self.op_offset = 0;
                continue;
            }
            match op.kind {
                CigarOpKind::Match => {
                    let item = (self.ref_pos, self.read_offset);
                    self.ref_pos += 1;
                    self.read_offset += 1;
                    self.op_offset += 1;
                    return Some(item);
                }
                CigarOpKind::Insertion | CigarOpKind::SoftClip => {
                    self.read_offset += op.len as usize;
                    self.op_index += 1;
                    self.op_offset = 0;
                }
                CigarOpKind::Deletion | CigarOpKind::RefSkip => {
                    self.ref_pos += op.len as u64;
                    self.op_index += 1;
                    self.op_offset = 0;
                }
                CigarOpKind::HardClip => {
                    self.op_index += 1;
                    self.op_offset = 0;
                }
            }
        }
    }
}

/// Count of reads across all samples.
pub fn count_reads(reads: &ReadMap) -> usize {
    reads.values().map(Vec::len).sum()
}

/// True when no sample has any reads.
pub fn all_empty(reads: &ReadMap) -> bool {
    reads.values().all(Vec::is_empty)
}

/// Region spanned by every read in the map, `None` when empty.
pub fn encompassing_read_region(reads: &ReadMap) -> Option<GenomicRegion> {
    let mut result: Option<GenomicRegion> = None;
    for read in reads.values().flatten() {
        let r = read.region();
        result = Some(match result {
            Some(acc) if acc.same_contig(&r) => acc.encompassing(&r),
            Some(acc) => acc,
            None => r,
        });
    }
    result
}

/// Copy the reads overlapping `region`, preserving per-sample order.
pub fn copy_overlapped(reads: &ReadMap, region: &GenomicRegion) -> ReadMap {
    reads
        .iter()
        .map(|(sample, rs)| {
            (
                sample.clone(),
                rs.iter().filter(|r| r.overlaps(region)).cloned().collect(),
            )
        })
        .collect()
}

/// Longest read length in the map; zero when empty.
pub fn max_read_length(reads: &ReadMap) -> usize {
    reads
        .values()
        .flatten()
        .map(AlignedRead::len)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(begin: u64, cigar: Vec<CigarOp>, seq: &[u8]) -> AlignedRead {
        let quals = vec![30u8; seq.len()];
        AlignedRead::new("r1", "chr1", begin, 60, cigar, seq.to_vec(), quals, false, true)
    }

    #[test]
    fn test_end_with_indels() {
        // 3M2D3M over 6 read bases covers 8 reference bases
        let r = read(
            10,
            vec![
                CigarOp::new(CigarOpKind::Match, 3),
                CigarOp::new(CigarOpKind::Deletion, 2),
                CigarOp::new(CigarOpKind::Match, 3),
            ],
            b"ACGTAC",
        );
        assert_eq!(r.end(), 18);
    }

    #[test]
    fn test_aligned_pairs_skip_insertion() {
        let r = read(
            5,
            vec![
                CigarOp::new(CigarOpKind::Match, 2),
                CigarOp::new(CigarOpKind::Insertion, 1),
                CigarOp::new(CigarOpKind::Match, 2),
            ],
            b"ACGTA",
        );
        let pairs: Vec<_> = r.aligned_pairs().collect();
        assert_eq!(pairs, vec![(5, 0), (6, 1), (7, 3), (8, 4)]);
    }

    #[test]
    fn test_copy_overlapped() {
        let mut reads = ReadMap::new();
        reads.insert(
            "s1".into(),
            vec![
                read(0, vec![CigarOp::new(CigarOpKind::Match, 4)], b"ACGT"),
                read(100, vec![CigarOp::new(CigarOpKind::Match, 4)], b"ACGT"),
            ],
        );
        let sub = copy_overlapped(&reads, &GenomicRegion::new("chr1", 0, 10));
        assert_eq!(count_reads(&sub), 1);
    }
}
