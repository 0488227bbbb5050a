//! # Candidate Generation
//!
//! Proposes variants over a region from three sources: CIGAR-derived
//! differences in the read alignments, local re-assembly bubbles, and an
//! optional external VCF. The union is left-aligned against the reference
//! and deduplicated before the haplotype generator sees it.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use crate::calling::assembler::{Assembler, AssemblerOptions, AssemblyError};
use crate::data::read::{CigarOpKind, ReadMap};
use crate::data::region::GenomicRegion;
use crate::data::variant::{unique_left_align, Variant};
use crate::error::Result;
use crate::io::fasta::{ReferenceProvider, WindowCache};
use crate::io::vcf::read_candidate_variants;

/// Candidate generation options.
#[derive(Clone, Debug)]
pub struct CandidateGeneratorOptions {
    /// Quality floor for CIGAR-derived candidate bases.
    pub min_base_quality: u8,
    /// Reads required to support a CIGAR-derived candidate.
    pub min_supporting_reads: u32,
    /// Longest candidate admitted from any source.
    pub max_variant_size: u64,
    /// Primary assembly k-mer sizes.
    pub kmer_sizes: Vec<usize>,
    /// Fallback k-mers tried when every primary k-mer fails on a bin.
    pub num_fallbacks: u32,
    /// Spacing between fallback k-mer sizes.
    pub fallback_interval_size: usize,
    /// Assembly bin width; bins overlap by half.
    pub bin_size: u64,
    pub use_assembly: bool,
    /// External VCF whose variants are always admitted.
    pub source: Option<PathBuf>,
}

impl Default for CandidateGeneratorOptions {
    fn default() -> Self {
        Self {
            min_base_quality: 20,
            min_supporting_reads: 2,
            max_variant_size: 500,
            kmer_sizes: vec![10, 25, 35],
            num_fallbacks: 6,
            fallback_interval_size: 10,
            bin_size: 400,
            use_assembly: true,
            source: None,
        }
    }
}

/// The candidate generator; built once per caller and reused per region.
#[derive(Clone)]
pub struct CandidateGenerator {
    options: CandidateGeneratorOptions,
    source_variants: Vec<Variant>,
}

impl CandidateGenerator {
    pub fn new(options: CandidateGeneratorOptions) -> Result<Self> {
        let source_variants = match &options.source {
            Some(path) => {
                let mut variants = read_candidate_variants(path)?;
                variants.sort();
                variants
            }
            None => Vec::new(),
        };
        Ok(Self {
            options,
            source_variants,
        })
    }

    /// Generate the sorted, deduplicated, left-aligned candidate set for
    /// `region`. Reference lookup failures are fatal for the region;
    /// assembler failures on a bin are logged and skipped.
    pub fn generate(
        &self,
        region: &GenomicRegion,
        reads: &ReadMap,
        reference: &dyn ReferenceProvider,
    ) -> Result<Vec<Variant>> {
        let mut cache = WindowCache::new(reference, 1000);
        let mut raw = self.cigar_candidates(region, reads, &mut cache)?;
        if self.options.use_assembly {
            raw.extend(self.assembly_candidates(region, reads, &mut cache)?);
        }
        raw.extend(
            self.source_variants
                .iter()
                .filter(|v| region.contains(v.region()))
                .cloned(),
        );
        let fetch = |r: &GenomicRegion| reference.fetch(r).unwrap_or_default();
        let mut candidates = unique_left_align(raw, fetch);
        candidates.retain(|v| {
            region.contains(v.region())
                && v.ref_sequence().len().max(v.alt_sequence().len()) as u64
                    <= self.options.max_variant_size
        });
        debug!(
            region = %region,
            count = candidates.len(),
            "generated candidates"
        );
        Ok(candidates)
    }

    /// Substitutions and indels read straight off the alignments.
    fn cigar_candidates(
        &self,
        region: &GenomicRegion,
        reads: &ReadMap,
        reference: &mut WindowCache<'_>,
    ) -> Result<Vec<Variant>> {
        let mut support: HashMap<Variant, u32> = HashMap::new();
        for read in reads.values().flatten() {
            let read_region = read.region();
            if !read_region.overlaps(region) {
                continue;
            }
            let ref_seq = reference.fetch(&read_region)?;
            let ref_offset = read_region.begin();
            let mut ref_pos = read.begin();
            let mut read_offset = 0usize;
            for op in read.cigar() {
                match op.kind {
                    CigarOpKind::Match => {
                        for i in 0..op.len as usize {
                            let pos = ref_pos + i as u64;
                            let read_base = read.sequence()[read_offset + i];
                            let ref_base = ref_seq[(pos - ref_offset) as usize];
                            if read_base != ref_base
                                && read_base != b'N'
                                && ref_base != b'N'
                                && read.qualities()[read_offset + i] >= self.options.min_base_quality
                            {
                                let variant = Variant::new(
                                    GenomicRegion::new(read_region.contig().clone(), pos, pos + 1),
                                    vec![ref_base],
                                    vec![read_base],
                                );
                                *support.entry(variant).or_insert(0) += 1;
                            }
                        }
                        ref_pos += op.len as u64;
                        read_offset += op.len as usize;
                    }
                    CigarOpKind::Insertion => {
                        let inserted =
                            read.sequence()[read_offset..read_offset + op.len as usize].to_vec();
                        let quals =
                            &read.qualities()[read_offset..read_offset + op.len as usize];
                        let floor = quals.iter().copied().min().unwrap_or(0);
                        if floor >= self.options.min_base_quality {
                            let variant = Variant::new(
                                GenomicRegion::point(read_region.contig().clone(), ref_pos),
                                Vec::new(),
                                inserted,
                            );
                            *support.entry(variant).or_insert(0) += 1;
                        }
                        read_offset += op.len as usize;
                    }
                    CigarOpKind::Deletion => {
                        let begin = (ref_pos - ref_offset) as usize;
                        let deleted = ref_seq[begin..begin + op.len as usize].to_vec();
                        let variant = Variant::new(
                            GenomicRegion::new(
                                read_region.contig().clone(),
                                ref_pos,
                                ref_pos + op.len as u64,
                            ),
                            deleted,
                            Vec::new(),
                        );
                        *support.entry(variant).or_insert(0) += 1;
                        ref_pos += op.len as u64;
                    }
                    CigarOpKind::RefSkip => {
                        ref_pos += op.len as u64;
                    }
                    CigarOpKind::SoftClip => {
                        read_offset += op.len as usize;
                    }
                    CigarOpKind::HardClip => {}
                }
            }
        }
        Ok(support
            .into_iter()
            .filter(|(_, count)| *count >= self.options.min_supporting_reads)
            .map(|(variant, _)| variant)
            .collect())
    }

    /// Assembly candidates from overlapping bins across the region.
    fn assembly_candidates(
        &self,
        region: &GenomicRegion,
        reads: &ReadMap,
        reference: &mut WindowCache<'_>,
    ) -> Result<Vec<Variant>> {
        let mut result = Vec::new();
        let bin_size = self.options.bin_size.max(64);
        let step = (bin_size / 2).max(1);
        let mut begin = region.begin();
        while begin < region.end() {
            let bin = GenomicRegion::new(
                region.contig().clone(),
                begin,
                (begin + bin_size).min(region.end()),
            );
            let bin_reference = reference.fetch(&bin)?;
            match self.assemble_bin(&bin, &bin_reference, reads) {
                Ok(mut variants) => result.append(&mut variants),
                Err(error) => {
                    debug!(bin = %bin, ?error, "assembly failed for bin; skipping");
                }
            }
            begin += step;
        }
        Ok(result)
    }

    /// Try each primary k-mer; if all fail, walk the fallback ladder.
    fn assemble_bin(
        &self,
        bin: &GenomicRegion,
        bin_reference: &[u8],
        reads: &ReadMap,
    ) -> std::result::Result<Vec<Variant>, AssemblyError> {
        let mut last_error = AssemblyError::BinTooSmall;
        let fallbacks = (1..=self.options.num_fallbacks).map(|i| {
            self.options
                .kmer_sizes
                .last()
                .copied()
                .unwrap_or(35)
                + i as usize * self.options.fallback_interval_size
        });
        for k in self.options.kmer_sizes.iter().copied().chain(fallbacks) {
            match self.assemble_bin_with_k(bin, bin_reference, reads, k) {
                Ok(variants) => return Ok(variants),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }

    fn assemble_bin_with_k(
        &self,
        bin: &GenomicRegion,
        bin_reference: &[u8],
        reads: &ReadMap,
        k: usize,
    ) -> std::result::Result<Vec<Variant>, AssemblyError> {
        let mut assembler = Assembler::new(
            k,
            AssemblerOptions {
                mask_threshold: 0,
                min_supporting_reads: self.options.min_supporting_reads,
                max_variant_size: self.options.max_variant_size,
            },
        );
        assembler.insert_reference(bin_reference);
        for read in reads.values().flatten() {
            if read.overlaps(bin) {
                assembler.insert_read(read.sequence(), read.qualities());
            }
        }
        assembler.extract_variants(bin, bin_reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{AlignedRead, CigarOp};
    use crate::io::fasta::InMemoryReference;

    fn snv_read(begin: u64, seq: &[u8]) -> AlignedRead {
        AlignedRead::new(
            "r",
            "chr1",
            begin,
            60,
            vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
            seq.to_vec(),
            vec![30; seq.len()],
            false,
            true,
        )
    }

    fn generator() -> CandidateGenerator {
        CandidateGenerator::new(CandidateGeneratorOptions {
            use_assembly: false,
            ..CandidateGeneratorOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_cigar_snv_with_support() {
        let reference = InMemoryReference::new(vec![("chr1", b"ACGTACGTACGTACGT")]);
        let mut reads = ReadMap::new();
        reads.insert(
            "s1".into(),
            vec![
                snv_read(0, b"ACGTACCTACGT"),
                snv_read(0, b"ACGTACCTACGT"),
                snv_read(0, b"ACGTACGTACGT"),
            ],
        );
        let candidates = generator()
            .generate(&GenomicRegion::new("chr1", 0, 16), &reads, &reference)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].region().begin(), 6);
        assert_eq!(candidates[0].ref_sequence(), b"G");
        assert_eq!(candidates[0].alt_sequence(), b"C");
    }

    #[test]
    fn test_single_read_support_is_dropped() {
        let reference = InMemoryReference::new(vec![("chr1", b"ACGTACGTACGTACGT")]);
        let mut reads = ReadMap::new();
        reads.insert("s1".into(), vec![snv_read(0, b"ACGTACCTACGT")]);
        let candidates = generator()
            .generate(&GenomicRegion::new("chr1", 0, 16), &reads, &reference)
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_deletion_candidate() {
        let reference = InMemoryReference::new(vec![("chr1", b"ACGTACGTACGTACGT")]);
        let mut reads = ReadMap::new();
        let del_read = |begin: u64| {
            AlignedRead::new(
                "r",
                "chr1",
                begin,
                60,
                vec![
                    CigarOp::new(CigarOpKind::Match, 6),
                    CigarOp::new(CigarOpKind::Deletion, 2),
                    CigarOp::new(CigarOpKind::Match, 4),
                ],
                b"ACGTACACGT".to_vec(),
                vec![30; 10],
                false,
                true,
            )
        };
        reads.insert("s1".into(), vec![del_read(0), del_read(0)]);
        let candidates = generator()
            .generate(&GenomicRegion::new("chr1", 0, 16), &reads, &reference)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_deletion());
        assert_eq!(candidates[0].region(), &GenomicRegion::new("chr1", 6, 8));
    }

    #[test]
    fn test_empty_reads_empty_candidates() {
        let reference = InMemoryReference::new(vec![("chr1", b"ACGTACGTACGTACGT")]);
        let candidates = generator()
            .generate(&GenomicRegion::new("chr1", 0, 16), &ReadMap::new(), &reference)
            .unwrap();
        assert!(candidates.is_empty());
    }
}
