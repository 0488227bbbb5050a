//! # Population Genotype Model
//!
//! Joint posterior over per-sample genotypes with a shared haplotype
//! frequency prior. The exact joint is exponential in the sample count, so
//! frequencies are fitted by expectation-maximisation under Hardy-Weinberg
//! genotype priors; per-sample posteriors then condition on the fitted
//! frequencies. This is the standard approximation for the coalescent
//! population prior at calling scale.

use std::collections::BTreeMap;

use crate::data::genotype::{enumerate_genotypes, Genotype};
use crate::data::haplotype::HaplotypeId;
use crate::data::read::SampleName;
use crate::error::{Result, TernError};
use crate::model::individual::genotype_log_likelihood;
use crate::model::likelihood::LikelihoodCache;
use crate::utils::maths::{exp_normalise, log_sum_exp};

/// EM iterations; frequency estimates converge quickly at calling scale.
const EM_ITERATIONS: usize = 12;

/// Dirichlet-style pseudocount regularising the frequency estimates.
const FREQUENCY_PSEUDOCOUNT: f64 = 0.5;

/// Posterior over genotypes for every sample plus fitted frequencies.
#[derive(Clone, Debug)]
pub struct PopulationLatents {
    pub genotypes: Vec<Genotype<HaplotypeId>>,
    /// Per-sample posteriors parallel to `genotypes`.
    pub posteriors: BTreeMap<SampleName, Vec<f64>>,
    /// Fitted population haplotype frequencies.
    pub frequencies: BTreeMap<HaplotypeId, f64>,
    pub log_evidence: f64,
}

/// The population inference engine.
pub struct PopulationModel {
    ploidy: u32,
}

impl PopulationModel {
    pub fn new(ploidy: u32) -> Self {
        Self { ploidy }
    }

    pub fn infer(
        &self,
        haplotypes: &[HaplotypeId],
        samples: &[SampleName],
        cache: &LikelihoodCache,
    ) -> Result<PopulationLatents> {
        let genotypes = enumerate_genotypes(haplotypes, self.ploidy);
        if genotypes.is_empty() || samples.is_empty() {
            return Err(TernError::model(
                "PopulationModel::infer",
                "empty genotype or sample space",
            ));
        }

        // cached likelihoods per (sample, genotype)
        let likelihoods: BTreeMap<SampleName, Vec<f64>> = samples
            .iter()
            .map(|s| {
                let lls = genotypes
                    .iter()
                    .map(|g| genotype_log_likelihood(g, s, cache))
                    .collect();
                (s.clone(), lls)
            })
            .collect();

        let mut frequencies: BTreeMap<HaplotypeId, f64> = haplotypes
            .iter()
            .map(|&h| (h, 1.0 / haplotypes.len() as f64))
            .collect();

        let mut posteriors: BTreeMap<SampleName, Vec<f64>> = BTreeMap::new();
        let mut log_evidence = f64::NEG_INFINITY;

        for _ in 0..EM_ITERATIONS {
            // E step: per-sample genotype posteriors under HWE priors
            let priors: Vec<f64> = genotypes
                .iter()
                .map(|g| hwe_log_prior(g, &frequencies))
                .collect();
            log_evidence = 0.0;
            for sample in samples {
                let lls = &likelihoods[sample];
                let mut scores: Vec<f64> =
                    priors.iter().zip(lls).map(|(p, l)| p + l).collect();
                let sample_evidence = log_sum_exp(&scores);
                if !sample_evidence.is_finite() {
                    return Err(TernError::numerical(format!(
                        "population evidence vanished for sample {sample}"
                    )));
                }
                exp_normalise(&mut scores);
                posteriors.insert(sample.clone(), scores);
                log_evidence += sample_evidence;
            }

            // M step: expected haplotype counts
            let mut counts: BTreeMap<HaplotypeId, f64> = haplotypes
                .iter()
                .map(|&h| (h, FREQUENCY_PSEUDOCOUNT))
                .collect();
            for sample_posteriors in posteriors.values() {
                for (g, &p) in genotypes.iter().zip(sample_posteriors) {
                    for &h in g.iter() {
                        *counts.get_mut(&h).expect("haplotype in count table") += p;
                    }
                }
            }
            let total: f64 = counts.values().sum();
            for (h, c) in counts {
                frequencies.insert(h, c / total);
            }
        }

        Ok(PopulationLatents {
            genotypes,
            posteriors,
            frequencies,
            log_evidence,
        })
    }
}

/// Hardy-Weinberg log prior of a genotype given haplotype frequencies,
/// including the multinomial coefficient for multiplicities.
fn hwe_log_prior(genotype: &Genotype<HaplotypeId>, frequencies: &BTreeMap<HaplotypeId, f64>) -> f64 {
    let mut prior = 0.0;
    let mut multiplicity_penalty = 0.0;
    let mut run = 1u64;
    let elements = genotype.elements();
    for (i, &h) in elements.iter().enumerate() {
        let f = frequencies.get(&h).copied().unwrap_or(0.0);
        prior += f.clamp(f64::MIN_POSITIVE, 1.0).ln();
        if i > 0 && elements[i - 1] == h {
            run += 1;
        } else {
            run = 1;
        }
        multiplicity_penalty += (run as f64).ln();
    }
    // ln(k!) - sum ln(run!) gives the multinomial coefficient
    prior + crate::utils::maths::ln_factorial(u64::from(genotype.ploidy())) - multiplicity_penalty
}
