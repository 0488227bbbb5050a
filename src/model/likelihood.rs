//! # Haplotype Likelihoods
//!
//! `HaplotypeLikelihoodModel` scores `ln P(read | haplotype)` with the pair
//! HMM; `LikelihoodCache` holds the scores for every (sample, haplotype,
//! read) triple over one active step. Read order within a sample is fixed at
//! populate time so genotype marginalisation iterates all haplotypes in
//! lockstep. The cache is the dominant memory consumer of a region and is
//! cleared as soon as latent inference finishes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::data::haplotype::{Haplotype, HaplotypeId};
use crate::data::read::{ReadMap, SampleName};
use crate::data::region::GenomicRegion;
use crate::error::{Result, TernError};
use crate::model::pairhmm::{
    forward_log_probability, homopolymer_gap_open, PairHmmParams, PairHmmWorkspace,
};

/// Which part of the haplotype is currently active.
///
/// Positions outside the active region belong to other active steps; the
/// pair HMM scores them as matching so their evidence is not counted twice.
#[derive(Clone, Debug)]
pub struct FlankState {
    pub active_region: GenomicRegion,
}

impl FlankState {
    pub fn new(active_region: GenomicRegion) -> Self {
        Self { active_region }
    }

    /// Resolve the active region to `[begin, end)` sequence offsets of
    /// `haplotype`. Returns `None` when the haplotype has no flank (fully
    /// active), letting the HMM skip masking.
    fn offsets(&self, haplotype: &Haplotype) -> Option<(usize, usize)> {
        let hap_region = haplotype.region();
        if self.active_region.contains(hap_region) {
            return None;
        }
        let begin = sequence_offset(haplotype, self.active_region.begin().max(hap_region.begin()));
        let end = sequence_offset(haplotype, self.active_region.end().min(hap_region.end()));
        Some((begin, end.max(begin)))
    }
}

/// Map a genomic position to an offset into the haplotype's cached
/// sequence. Positions inside a length-changing allele clamp to the allele
/// start.
fn sequence_offset(haplotype: &Haplotype, pos: u64) -> usize {
    let mut offset = 0usize;
    for allele in haplotype.alleles() {
        let r = allele.region();
        if r.end() <= pos && !(r.is_empty() && r.begin() == pos) {
            offset += allele.sequence_len();
            continue;
        }
        if r.begin() >= pos {
            break;
        }
        // pos falls inside this allele
        if r.len() as usize == allele.sequence_len() {
            offset += (pos - r.begin()) as usize;
        }
        break;
    }
    offset
}

/// Pair-HMM scoring front end with reusable buffers.
pub struct HaplotypeLikelihoodModel {
    params: PairHmmParams,
    workspace: PairHmmWorkspace,
}

impl Default for HaplotypeLikelihoodModel {
    fn default() -> Self {
        Self::new(PairHmmParams::default())
    }
}

impl HaplotypeLikelihoodModel {
    pub fn new(params: PairHmmParams) -> Self {
        Self {
            params,
            workspace: PairHmmWorkspace::new(),
        }
    }

    /// Score one read against a haplotype whose gap-open profile has been
    /// precomputed.
    fn log_likelihood(
        &mut self,
        read_sequence: &[u8],
        read_qualities: &[u8],
        haplotype: &Haplotype,
        gap_open_ln: &[f64],
        flank: Option<(usize, usize)>,
    ) -> f64 {
        forward_log_probability(
            read_sequence,
            read_qualities,
            haplotype.sequence(),
            gap_open_ln,
            &self.params,
            flank,
            &mut self.workspace,
        )
    }
}

/// Per-step likelihood table.
#[derive(Default)]
pub struct LikelihoodCache {
    table: HashMap<SampleName, HashMap<HaplotypeId, Vec<f64>>>,
    read_counts: HashMap<SampleName, usize>,
    populated: bool,
}

impl LikelihoodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute likelihoods for every (sample, haplotype, read) triple.
    ///
    /// The reads used here fix the per-sample read order for all queries
    /// until `clear`. Populating an already-populated cache is an internal
    /// error; `clear` first.
    pub fn populate(
        &mut self,
        reads: &ReadMap,
        haplotypes: &[(HaplotypeId, Arc<Haplotype>)],
        flank_state: Option<&FlankState>,
        model: &mut HaplotypeLikelihoodModel,
    ) -> Result<()> {
        if self.populated {
            return Err(TernError::internal(
                "LikelihoodCache::populate",
                "cache already populated; clear() first",
            ));
        }
        // gap-open profiles and flank offsets are per haplotype, not per sample
        let primed: Vec<(HaplotypeId, &Arc<Haplotype>, Vec<f64>, Option<(usize, usize)>)> =
            haplotypes
                .iter()
                .map(|(id, haplotype)| {
                    let gap_open = homopolymer_gap_open(haplotype.sequence(), &model.params);
                    let flank = flank_state.and_then(|f| f.offsets(haplotype));
                    (*id, haplotype, gap_open, flank)
                })
                .collect();
        for (sample, sample_reads) in reads {
            self.read_counts.insert(sample.clone(), sample_reads.len());
            let by_haplotype: &mut HashMap<HaplotypeId, Vec<f64>> =
                self.table.entry(sample.clone()).or_default();
            for (id, haplotype, gap_open, flank) in &primed {
                let (id, flank) = (*id, *flank);
                let scores: Vec<f64> = sample_reads
                    .iter()
                    .map(|read| {
                        let ll = model.log_likelihood(
                            read.sequence(),
                            read.qualities(),
                            haplotype,
                            gap_open,
                            flank,
                        );
                        debug_assert!(!ll.is_nan(), "NaN likelihood");
                        ll
                    })
                    .collect();
                by_haplotype.insert(id, scores);
            }
        }
        self.populated = true;
        Ok(())
    }

    /// Likelihoods for `(sample, haplotype)` in populate-time read order.
    pub fn log_likelihoods(&self, sample: &SampleName, id: HaplotypeId) -> Option<&[f64]> {
        self.table
            .get(sample)
            .and_then(|m| m.get(&id))
            .map(Vec::as_slice)
    }

    /// Number of reads scored for `sample`.
    pub fn read_count(&self, sample: &SampleName) -> usize {
        self.read_counts.get(sample).copied().unwrap_or(0)
    }

    /// Drop entries for the given haplotypes, freeing their score vectors.
    pub fn erase(&mut self, ids: &[HaplotypeId]) {
        for by_haplotype in self.table.values_mut() {
            for id in ids {
                by_haplotype.remove(id);
            }
        }
    }

    /// Reset completely; the next `populate` may use different reads.
    pub fn clear(&mut self) {
        self.table.clear();
        self.read_counts.clear();
        self.populated = false;
    }

    /// Marginal log-likelihood of a sample's reads under a haplotype,
    /// used by the pre-model haplotype filter.
    pub fn marginal_haplotype_likelihood(&self, sample: &SampleName, id: HaplotypeId) -> f64 {
        self.log_likelihoods(sample, id)
            .map(|lls| lls.iter().sum())
            .unwrap_or(f64::NEG_INFINITY)
    }
}
