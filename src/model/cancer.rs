//! # Cancer Model
//!
//! Three sub-models scored jointly over the same haplotype set:
//!
//! 1. **germline** — one genotype shared by every sample, even mixture;
//! 2. **CNV** — the same genotype space with per-sample allelic imbalance;
//! 3. **somatic** — a germline genotype plus one somatic haplotype mixed in
//!    at a cellularity drawn from a fixed grid, with the normal sample (when
//!    known) pinned to a residual contamination fraction.
//!
//! Per-model log-evidences normalise into a model posterior over
//! {germline, cnv, somatic} that gates somatic-variant emission.

use std::collections::BTreeMap;

use crate::data::genotype::{enumerate_genotypes, CancerGenotype, Genotype};
use crate::data::haplotype::{HaplotypeArena, HaplotypeId};
use crate::data::read::SampleName;
use crate::error::{Result, TernError};
use crate::model::likelihood::LikelihoodCache;
use crate::model::priors::{GenotypePriorModel, SomaticMutationModel};
use crate::utils::maths::{exp_normalise, log_sum_exp};

/// Tumour cell fractions the somatic model marginalises over.
pub const CELLULARITY_GRID: [f64; 8] = [0.01, 0.05, 0.1, 0.2, 0.35, 0.5, 0.75, 1.0];

/// Residual tumour contamination assumed in the normal sample.
pub const NORMAL_CONTAMINATION: f64 = 1e-3;

/// Allelic-imbalance fractions for the CNV sub-model (weight of the first
/// haplotype in a diploid genotype).
const CNV_IMBALANCE_GRID: [f64; 5] = [0.5, 0.25, 0.1, 0.75, 0.9];

/// Cancer model tuning.
#[derive(Clone, Debug)]
pub struct CancerModelParams {
    pub somatic_mutation_rate: f64,
    /// Prior mass on {germline, cnv, somatic}.
    pub model_priors: [f64; 3],
    pub normal_sample: Option<SampleName>,
    pub ploidy: u32,
}

impl Default for CancerModelParams {
    fn default() -> Self {
        Self {
            somatic_mutation_rate: crate::model::priors::DEFAULT_SOMATIC_RATE,
            model_priors: [0.49995, 0.49995, 1e-4],
            normal_sample: None,
            ploidy: 2,
        }
    }
}

/// Posterior over the three sub-models.
#[derive(Clone, Copy, Debug)]
pub struct ModelPosteriors {
    pub germline: f64,
    pub cnv: f64,
    pub somatic: f64,
}

/// One somatic hypothesis: a germline genotype index plus the extra
/// haplotype.
#[derive(Clone, Debug)]
pub struct SomaticHypothesis {
    pub germline_index: usize,
    pub somatic: HaplotypeId,
    pub posterior: f64,
    /// Posterior-mean tumour cellularity under this hypothesis.
    pub expected_cellularity: f64,
}

/// Inference output for the cancer caller.
#[derive(Clone, Debug)]
pub struct CancerLatents {
    pub germline_genotypes: Vec<Genotype<HaplotypeId>>,
    /// Germline-model posterior per genotype, normalised.
    pub germline_posteriors: Vec<f64>,
    pub somatic_hypotheses: Vec<SomaticHypothesis>,
    pub model_posteriors: ModelPosteriors,
    pub log_evidence_germline: f64,
    pub log_evidence_cnv: f64,
    pub log_evidence_somatic: f64,
}

impl CancerLatents {
    /// Combined evidence for reporting.
    pub fn log_evidence(&self) -> f64 {
        log_sum_exp(&[
            self.log_evidence_germline,
            self.log_evidence_cnv,
            self.log_evidence_somatic,
        ])
    }

    /// MAP somatic hypothesis as a concrete `CancerGenotype`.
    pub fn map_cancer_genotype(&self) -> Option<CancerGenotype> {
        let best = self
            .somatic_hypotheses
            .iter()
            .max_by(|a, b| a.posterior.partial_cmp(&b.posterior).unwrap_or(std::cmp::Ordering::Equal))?;
        let germline = self.germline_genotypes[best.germline_index].clone();
        let k = germline.ploidy() as usize;
        let c = best.expected_cellularity;
        let mut weights = vec![(1.0 - c) / k.max(1) as f64; k];
        weights.push(c);
        Some(CancerGenotype::new(germline, vec![best.somatic], weights))
    }
}

/// The cancer inference engine.
pub struct CancerModel<'a> {
    germline_prior: &'a dyn GenotypePriorModel,
    somatic_prior: SomaticMutationModel,
    params: CancerModelParams,
}

impl<'a> CancerModel<'a> {
    pub fn new(germline_prior: &'a dyn GenotypePriorModel, params: CancerModelParams) -> Self {
        Self {
            germline_prior,
            somatic_prior: SomaticMutationModel::new(params.somatic_mutation_rate),
            params,
        }
    }

    pub fn infer(
        &self,
        haplotypes: &[HaplotypeId],
        arena: &HaplotypeArena,
        samples: &[SampleName],
        cache: &LikelihoodCache,
    ) -> Result<CancerLatents> {
        let germline_genotypes = enumerate_genotypes(haplotypes, self.params.ploidy);
        if germline_genotypes.is_empty() {
            return Err(TernError::model("CancerModel::infer", "empty genotype space"));
        }

        // germline sub-model
        let mut germline_scores: Vec<f64> = germline_genotypes
            .iter()
            .map(|g| {
                let lik: f64 = samples
                    .iter()
                    .map(|s| even_mixture_log_likelihood(g, s, cache))
                    .sum();
                self.germline_prior.log_prior(g) + lik
            })
            .collect();
        let log_evidence_germline = log_sum_exp(&germline_scores);
        if !log_evidence_germline.is_finite() {
            return Err(TernError::numerical("germline evidence vanished"));
        }
        let germline_posteriors = {
            exp_normalise(&mut germline_scores);
            germline_scores
        };

        // CNV sub-model: per-sample allelic imbalance over a weight grid
        let cnv_scores: Vec<f64> = germline_genotypes
            .iter()
            .map(|g| {
                let lik: f64 = samples
                    .iter()
                    .map(|s| imbalance_log_likelihood(g, s, cache))
                    .sum();
                self.germline_prior.log_prior(g) + lik
            })
            .collect();
        let log_evidence_cnv = log_sum_exp(&cnv_scores);

        // somatic sub-model
        let mut somatic_hypotheses = Vec::new();
        let mut somatic_scores = Vec::new();
        for (gi, g) in germline_genotypes.iter().enumerate() {
            for &h in haplotypes {
                if g.contains(&h) {
                    continue;
                }
                let prior = self.germline_prior.log_prior(g)
                    + self.somatic_prior.log_probability(arena.get(h), g, arena);
                let (lik, expected_cellularity) =
                    self.somatic_log_likelihood(g, h, samples, cache);
                somatic_hypotheses.push(SomaticHypothesis {
                    germline_index: gi,
                    somatic: h,
                    posterior: 0.0,
                    expected_cellularity,
                });
                somatic_scores.push(prior + lik);
            }
        }
        let log_evidence_somatic = log_sum_exp(&somatic_scores);
        if log_evidence_somatic.is_finite() {
            for (hyp, score) in somatic_hypotheses.iter_mut().zip(&somatic_scores) {
                hyp.posterior = (score - log_evidence_somatic).exp();
            }
        }

        // model comparison
        let mut model_scores = [
            log_evidence_germline + self.params.model_priors[0].ln(),
            log_evidence_cnv + self.params.model_priors[1].ln(),
            log_evidence_somatic + self.params.model_priors[2].ln(),
        ];
        exp_normalise(&mut model_scores);
        let model_posteriors = ModelPosteriors {
            germline: model_scores[0],
            cnv: model_scores[1],
            somatic: model_scores[2],
        };

        Ok(CancerLatents {
            germline_genotypes,
            germline_posteriors,
            somatic_hypotheses,
            model_posteriors,
            log_evidence_germline,
            log_evidence_cnv,
            log_evidence_somatic,
        })
    }

    /// Likelihood of all samples under (germline + somatic at cellularity
    /// grid); returns the marginal and the posterior-mean cellularity over
    /// tumour samples.
    fn somatic_log_likelihood(
        &self,
        germline: &Genotype<HaplotypeId>,
        somatic: HaplotypeId,
        samples: &[SampleName],
        cache: &LikelihoodCache,
    ) -> (f64, f64) {
        let k = germline.ploidy() as usize;
        let mut total = 0.0;
        let mut cellularity_weighted = 0.0;
        let mut cellularity_norm = 0.0;
        for sample in samples {
            let is_normal = self
                .params
                .normal_sample
                .as_ref()
                .is_some_and(|n| n == sample);
            if is_normal {
                total += mixture_log_likelihood(
                    germline,
                    Some(somatic),
                    &somatic_weights(k, NORMAL_CONTAMINATION),
                    sample,
                    cache,
                );
                continue;
            }
            // marginalise cellularity with a uniform grid prior
            let mut per_cell = Vec::with_capacity(CELLULARITY_GRID.len());
            for &c in &CELLULARITY_GRID {
                per_cell.push(mixture_log_likelihood(
                    germline,
                    Some(somatic),
                    &somatic_weights(k, c),
                    sample,
                    cache,
                ));
            }
            let marginal = log_sum_exp(&per_cell) - (CELLULARITY_GRID.len() as f64).ln();
            total += marginal;
            for (&c, &lp) in CELLULARITY_GRID.iter().zip(&per_cell) {
                let w = (lp - marginal).exp() / CELLULARITY_GRID.len() as f64;
                cellularity_weighted += c * w;
                cellularity_norm += w;
            }
        }
        let expected = if cellularity_norm > 0.0 {
            cellularity_weighted / cellularity_norm
        } else {
            NORMAL_CONTAMINATION
        };
        (total, expected)
    }
}

fn somatic_weights(germline_ploidy: usize, cellularity: f64) -> Vec<f64> {
    if germline_ploidy == 0 {
        return vec![1.0];
    }
    let mut weights = vec![(1.0 - cellularity) / germline_ploidy as f64; germline_ploidy];
    weights.push(cellularity);
    weights
}

/// `ln P(reads | genotype)` under an even haplotype mixture.
fn even_mixture_log_likelihood(
    genotype: &Genotype<HaplotypeId>,
    sample: &SampleName,
    cache: &LikelihoodCache,
) -> f64 {
    let k = genotype.ploidy() as usize;
    if k == 0 {
        return 0.0;
    }
    let weights = vec![1.0 / k as f64; k];
    mixture_log_likelihood(genotype, None, &weights, sample, cache)
}

/// Weighted-mixture likelihood over the genotype's haplotypes plus an
/// optional extra haplotype; `weights` covers genotype haplotypes then the
/// extra one.
fn mixture_log_likelihood(
    genotype: &Genotype<HaplotypeId>,
    extra: Option<HaplotypeId>,
    weights: &[f64],
    sample: &SampleName,
    cache: &LikelihoodCache,
) -> f64 {
    let n_reads = cache.read_count(sample);
    if n_reads == 0 {
        return 0.0;
    }
    let mut sources: Vec<&[f64]> = Vec::with_capacity(weights.len());
    for &id in genotype.iter() {
        match cache.log_likelihoods(sample, id) {
            Some(lls) => sources.push(lls),
            None => return f64::NEG_INFINITY,
        }
    }
    if let Some(extra_id) = extra {
        match cache.log_likelihoods(sample, extra_id) {
            Some(lls) => sources.push(lls),
            None => return f64::NEG_INFINITY,
        }
    }
    debug_assert_eq!(sources.len(), weights.len());
    let ln_weights: Vec<f64> = weights
        .iter()
        .map(|&w| w.clamp(f64::MIN_POSITIVE, 1.0).ln())
        .collect();
    let mut total = 0.0;
    let mut buffer = Vec::with_capacity(sources.len());
    for read_index in 0..n_reads {
        buffer.clear();
        for (source, &lw) in sources.iter().zip(&ln_weights) {
            buffer.push(source[read_index] + lw);
        }
        total += log_sum_exp(&buffer);
    }
    total
}

/// CNV imbalance marginal for one sample, uniform over the imbalance grid.
fn imbalance_log_likelihood(
    genotype: &Genotype<HaplotypeId>,
    sample: &SampleName,
    cache: &LikelihoodCache,
) -> f64 {
    let k = genotype.ploidy() as usize;
    if k != 2 {
        return even_mixture_log_likelihood(genotype, sample, cache);
    }
    let mut per_weight = Vec::with_capacity(CNV_IMBALANCE_GRID.len());
    for &w in &CNV_IMBALANCE_GRID {
        per_weight.push(mixture_log_likelihood(
            genotype,
            None,
            &[w, 1.0 - w],
            sample,
            cache,
        ));
    }
    log_sum_exp(&per_weight) - (CNV_IMBALANCE_GRID.len() as f64).ln()
}

/// Per-haplotype posterior support aggregated across the three sub-models,
/// keyed by haplotype id. Used for haplotype filtering upstream.
pub fn haplotype_posteriors(latents: &CancerLatents) -> BTreeMap<HaplotypeId, f64> {
    let mut result: BTreeMap<HaplotypeId, f64> = BTreeMap::new();
    let mp = &latents.model_posteriors;
    let germline_weight = mp.germline + mp.cnv;
    for (g, &p) in latents
        .germline_genotypes
        .iter()
        .zip(&latents.germline_posteriors)
    {
        for &h in g.iter() {
            let entry = result.entry(h).or_insert(0.0);
            *entry = (*entry).max(p * germline_weight);
        }
    }
    for hyp in &latents.somatic_hypotheses {
        let g = &latents.germline_genotypes[hyp.germline_index];
        for h in g.iter().copied().chain([hyp.somatic]) {
            let entry = result.entry(h).or_insert(0.0);
            *entry = (*entry).max(hyp.posterior * mp.somatic);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::allele::Allele;
    use crate::data::haplotype::{Haplotype, HaplotypeBuilder};
    use crate::data::read::{AlignedRead, CigarOp, CigarOpKind, ReadMap};
    use crate::data::region::GenomicRegion;
    use crate::model::likelihood::HaplotypeLikelihoodModel;
    use crate::model::priors::{
        CoalescentModel, SiteCounts, DEFAULT_INDEL_HETEROZYGOSITY, DEFAULT_SNV_HETEROZYGOSITY,
    };

    fn region(begin: u64, end: u64) -> GenomicRegion {
        GenomicRegion::new("chr7", begin, end)
    }

    fn read_at(seq: &[u8]) -> AlignedRead {
        AlignedRead::new(
            "r",
            "chr7",
            0,
            60,
            vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
            seq.to_vec(),
            vec![35; seq.len()],
            false,
            true,
        )
    }

    fn setup(
        tumour_alt_reads: usize,
        normal_alt_reads: usize,
    ) -> (HaplotypeArena, Vec<HaplotypeId>, Vec<SampleName>, LikelihoodCache, Vec<u8>) {
        let reference = b"GGGGGAGGGGG".to_vec();
        let mut arena = HaplotypeArena::new();
        let ref_id = arena.intern(Haplotype::reference(region(0, 11), reference.clone()));
        let mut b = HaplotypeBuilder::new(region(0, 11), reference.clone().into());
        b.push(Allele::new(region(5, 6), b"C".to_vec()));
        let alt_id = arena.intern(b.build());

        let normal: SampleName = "normal".into();
        let tumour: SampleName = "tumour".into();
        let mut reads = ReadMap::new();
        let mut normal_reads: Vec<AlignedRead> =
            (0..12 - normal_alt_reads).map(|_| read_at(b"GGGGGAGGGGG")).collect();
        normal_reads.extend((0..normal_alt_reads).map(|_| read_at(b"GGGGGCGGGGG")));
        reads.insert(normal.clone(), normal_reads);
        let mut tumour_reads: Vec<AlignedRead> =
            (0..12 - tumour_alt_reads).map(|_| read_at(b"GGGGGAGGGGG")).collect();
        tumour_reads.extend((0..tumour_alt_reads).map(|_| read_at(b"GGGGGCGGGGG")));
        reads.insert(tumour.clone(), tumour_reads);

        let mut cache = LikelihoodCache::new();
        let mut model = HaplotypeLikelihoodModel::default();
        cache
            .populate(
                &reads,
                &[
                    (ref_id, arena.get_arc(ref_id)),
                    (alt_id, arena.get_arc(alt_id)),
                ],
                None,
                &mut model,
            )
            .unwrap();
        (arena, vec![ref_id, alt_id], vec![normal, tumour], cache, reference)
    }

    #[test]
    fn test_somatic_gains_posterior_with_tumour_only_support() {
        let (arena, haplotypes, samples, cache, reference) = setup(4, 0);
        let counts = SiteCounts::from_arena(&arena, &reference, 0);
        let prior = CoalescentModel::new(
            counts,
            DEFAULT_SNV_HETEROZYGOSITY,
            DEFAULT_INDEL_HETEROZYGOSITY,
            4,
        );
        let params = CancerModelParams {
            normal_sample: Some(samples[0].clone()),
            ..CancerModelParams::default()
        };
        let model = CancerModel::new(&prior, params);
        let latents = model
            .infer(&haplotypes, &arena, &samples, &cache)
            .unwrap();
        let with_support = latents.model_posteriors.somatic;

        let (arena2, haplotypes2, samples2, cache2, reference2) = setup(0, 0);
        let counts2 = SiteCounts::from_arena(&arena2, &reference2, 0);
        let prior2 = CoalescentModel::new(
            counts2,
            DEFAULT_SNV_HETEROZYGOSITY,
            DEFAULT_INDEL_HETEROZYGOSITY,
            4,
        );
        let params2 = CancerModelParams {
            normal_sample: Some(samples2[0].clone()),
            ..CancerModelParams::default()
        };
        let latents2 = CancerModel::new(&prior2, params2)
            .infer(&haplotypes2, &arena2, &samples2, &cache2)
            .unwrap();
        assert!(with_support > latents2.model_posteriors.somatic);

        let total = latents.model_posteriors.germline
            + latents.model_posteriors.cnv
            + latents.model_posteriors.somatic;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_map_cancer_genotype_weights_sum_to_one() {
        let (arena, haplotypes, samples, cache, reference) = setup(5, 0);
        let counts = SiteCounts::from_arena(&arena, &reference, 0);
        let prior = CoalescentModel::new(
            counts,
            DEFAULT_SNV_HETEROZYGOSITY,
            DEFAULT_INDEL_HETEROZYGOSITY,
            4,
        );
        let params = CancerModelParams {
            normal_sample: Some(samples[0].clone()),
            ..CancerModelParams::default()
        };
        let latents = CancerModel::new(&prior, params)
            .infer(&haplotypes, &arena, &samples, &cache)
            .unwrap();
        let cg = latents.map_cancer_genotype().unwrap();
        assert!((cg.mixture_weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(!cg.somatic.is_empty());
    }
}
