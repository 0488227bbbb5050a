//! # Genotype Prior Models
//!
//! Coalescent-style priors over germline genotypes, plus the mutation
//! models used for de-novo transmission and somatic haplotype derivation.
//! Priors work over interned haplotype ids; a `SiteCounts` table built once
//! per active step records how each haplotype differs from the reference.

use crate::data::haplotype::{Haplotype, HaplotypeArena, HaplotypeId};
use crate::data::genotype::Genotype;
use crate::utils::maths::harmonic;

/// Per-haplotype counts of non-reference sites, split by class.
#[derive(Clone, Debug, Default)]
pub struct SiteCounts {
    counts: Vec<(u32, u32)>,
}

impl SiteCounts {
    /// Compare every arena haplotype against the reference sequence over
    /// the arena's common region.
    pub fn from_arena(arena: &HaplotypeArena, reference: &[u8], region_begin: u64) -> Self {
        let counts = arena
            .ids()
            .map(|id| Self::count_haplotype(arena.get(id), reference, region_begin))
            .collect();
        Self { counts }
    }

    fn count_haplotype(haplotype: &Haplotype, reference: &[u8], region_begin: u64) -> (u32, u32) {
        let mut snvs = 0;
        let mut indels = 0;
        for allele in haplotype.alleles() {
            let r = allele.region();
            let begin = (r.begin() - region_begin) as usize;
            let end = (r.end() - region_begin) as usize;
            match reference.get(begin..end) {
                Some(ref_seq) if ref_seq == allele.sequence() => {}
                _ => {
                    if r.len() as usize == allele.sequence_len() {
                        // substitution run; count mismatching positions
                        if let Some(ref_seq) = reference.get(begin..end) {
                            snvs += ref_seq
                                .iter()
                                .zip(allele.sequence())
                                .filter(|(a, b)| a != b)
                                .count() as u32;
                        } else {
                            snvs += 1;
                        }
                    } else {
                        indels += 1;
                    }
                }
            }
        }
        (snvs, indels)
    }

    pub fn get(&self, id: HaplotypeId) -> (u32, u32) {
        self.counts.get(id.as_usize()).copied().unwrap_or((0, 0))
    }
}

/// Prior over genotypes of interned haplotypes.
pub trait GenotypePriorModel: Send + Sync {
    fn log_prior(&self, genotype: &Genotype<HaplotypeId>) -> f64;
}

/// Watterson-style coalescent prior: each segregating site carried by the
/// genotype costs a factor `θ / a_n`, with separate rates for substitutions
/// and indels.
pub struct CoalescentModel {
    site_counts: SiteCounts,
    ln_snv_factor: f64,
    ln_indel_factor: f64,
}

/// Default population-scaled mutation rates.
pub const DEFAULT_SNV_HETEROZYGOSITY: f64 = 1e-3;
pub const DEFAULT_INDEL_HETEROZYGOSITY: f64 = 1e-4;

impl CoalescentModel {
    pub fn new(site_counts: SiteCounts, snv_heterozygosity: f64, indel_heterozygosity: f64, n_haplotypes: u32) -> Self {
        let a_n = harmonic(u64::from(n_haplotypes.max(2))).max(1.0);
        Self {
            site_counts,
            ln_snv_factor: (snv_heterozygosity / a_n).ln(),
            ln_indel_factor: (indel_heterozygosity / a_n).ln(),
        }
    }
}

impl GenotypePriorModel for CoalescentModel {
    fn log_prior(&self, genotype: &Genotype<HaplotypeId>) -> f64 {
        // distinct haplotypes segregate; multiplicity does not add sites
        let mut prior = 0.0;
        let mut seen: Option<HaplotypeId> = None;
        for &id in genotype.iter() {
            if seen == Some(id) {
                continue;
            }
            seen = Some(id);
            let (snvs, indels) = self.site_counts.get(id);
            prior += f64::from(snvs) * self.ln_snv_factor
                + f64::from(indels) * self.ln_indel_factor;
        }
        prior
    }
}

/// Flat prior; population model mixes it with learnt frequencies.
pub struct UniformPriorModel;

impl GenotypePriorModel for UniformPriorModel {
    fn log_prior(&self, _genotype: &Genotype<HaplotypeId>) -> f64 {
        0.0
    }
}

/// Per-base germline mutation model for de-novo transmission.
#[derive(Clone, Copy, Debug)]
pub struct DenovoModel {
    ln_mutation: f64,
    ln_no_mutation: f64,
}

impl DenovoModel {
    /// `rate` is the per-base de-novo mutation probability.
    pub fn new(rate: f64) -> Self {
        let rate = rate.clamp(f64::MIN_POSITIVE, 0.5);
        Self {
            ln_mutation: rate.ln(),
            ln_no_mutation: (1.0 - rate).ln(),
        }
    }

    /// `ln P(child haplotype | transmitted parental haplotype)`.
    ///
    /// Scored as independent per-base mutations over the aligned length;
    /// length differences are treated as one mutation per base of
    /// difference.
    pub fn log_probability(&self, child: &Haplotype, parent: &Haplotype) -> f64 {
        let c = child.sequence();
        let p = parent.sequence();
        let shared = c.len().min(p.len());
        let mismatches = c[..shared]
            .iter()
            .zip(&p[..shared])
            .filter(|(a, b)| a != b)
            .count()
            + (c.len().max(p.len()) - shared);
        let matches = shared - mismatches.min(shared);
        mismatches as f64 * self.ln_mutation + matches as f64 * self.ln_no_mutation
    }
}

/// Default per-base de-novo mutation probability.
pub const DEFAULT_DENOVO_RATE: f64 = 1e-8;

/// Somatic haplotype derivation model: like the de-novo model but at the
/// somatic mutation rate, scoring a somatic haplotype against its closest
/// germline origin.
#[derive(Clone, Copy, Debug)]
pub struct SomaticMutationModel {
    inner: DenovoModel,
}

/// Default somatic mutation rate.
pub const DEFAULT_SOMATIC_RATE: f64 = 1e-4;

impl SomaticMutationModel {
    pub fn new(rate: f64) -> Self {
        Self {
            inner: DenovoModel::new(rate),
        }
    }

    /// `ln P(somatic | germline genotype)`: best derivation over the
    /// germline haplotypes.
    pub fn log_probability(
        &self,
        somatic: &Haplotype,
        germline: &Genotype<HaplotypeId>,
        arena: &HaplotypeArena,
    ) -> f64 {
        germline
            .iter()
            .map(|&g| self.inner.log_probability(somatic, arena.get(g)))
            .fold(f64::NEG_INFINITY, f64::max)
    }
}
