//! # Individual Genotype Model
//!
//! Exact posterior over `Genotype<HaplotypeId>` for a single sample:
//! exp-normalised log-prior plus summed per-read log-likelihoods, where a
//! read's likelihood under a genotype is the even mixture over the
//! genotype's haplotypes. Evidence (the normalising constant) feeds model
//! comparison upstream.

use crate::data::genotype::Genotype;
use crate::data::haplotype::HaplotypeId;
use crate::data::read::SampleName;
use crate::error::{Result, TernError};
use crate::model::likelihood::LikelihoodCache;
use crate::model::priors::GenotypePriorModel;
use crate::utils::maths::{exp_normalise, log_sum_exp};

/// Posterior over genotypes for one sample.
#[derive(Clone, Debug)]
pub struct IndividualLatents {
    pub genotypes: Vec<Genotype<HaplotypeId>>,
    /// Parallel to `genotypes`; sums to one.
    pub posteriors: Vec<f64>,
    pub log_evidence: f64,
}

impl IndividualLatents {
    /// Index of the maximum a posteriori genotype.
    pub fn map_genotype(&self) -> usize {
        self.posteriors
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// `ln P(reads | genotype)` for one sample: per-read even mixture over the
/// genotype's haplotypes, summed over reads in cache order.
pub fn genotype_log_likelihood(
    genotype: &Genotype<HaplotypeId>,
    sample: &SampleName,
    cache: &LikelihoodCache,
) -> f64 {
    let ploidy = genotype.ploidy();
    if ploidy == 0 {
        return 0.0;
    }
    let n_reads = cache.read_count(sample);
    if n_reads == 0 {
        return 0.0;
    }
    let ln_ploidy = f64::from(ploidy).ln();
    let per_haplotype: Vec<&[f64]> = genotype
        .iter()
        .filter_map(|&id| cache.log_likelihoods(sample, id))
        .collect();
    if per_haplotype.len() != ploidy as usize {
        // a haplotype was erased from the cache; treat as impossible
        return f64::NEG_INFINITY;
    }
    let mut total = 0.0;
    let mut buffer = Vec::with_capacity(ploidy as usize);
    for read_index in 0..n_reads {
        buffer.clear();
        buffer.extend(per_haplotype.iter().map(|lls| lls[read_index]));
        total += log_sum_exp(&buffer) - ln_ploidy;
    }
    total
}

/// The individual inference engine.
pub struct IndividualModel<'a> {
    prior: &'a dyn GenotypePriorModel,
}

impl<'a> IndividualModel<'a> {
    pub fn new(prior: &'a dyn GenotypePriorModel) -> Self {
        Self { prior }
    }

    /// Exact enumeration over the supplied genotype space.
    pub fn infer(
        &self,
        genotypes: Vec<Genotype<HaplotypeId>>,
        sample: &SampleName,
        cache: &LikelihoodCache,
    ) -> Result<IndividualLatents> {
        if genotypes.is_empty() {
            return Err(TernError::model("IndividualModel::infer", "empty genotype space"));
        }
        let mut log_posteriors: Vec<f64> = genotypes
            .iter()
            .map(|g| self.prior.log_prior(g) + genotype_log_likelihood(g, sample, cache))
            .collect();
        let log_evidence = exp_normalise(&mut log_posteriors);
        if !log_evidence.is_finite() {
            return Err(TernError::numerical(format!(
                "all genotype likelihoods vanished for sample {sample}"
            )));
        }
        Ok(IndividualLatents {
            genotypes,
            posteriors: log_posteriors,
            log_evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::allele::Allele;
    use crate::data::haplotype::{Haplotype, HaplotypeBuilder};
    use crate::data::read::{AlignedRead, CigarOp, CigarOpKind, ReadMap};
    use crate::data::region::GenomicRegion;
    use crate::model::likelihood::HaplotypeLikelihoodModel;
    use crate::model::priors::UniformPriorModel;
    use std::sync::Arc;

    fn region(begin: u64, end: u64) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    fn read_at(begin: u64, seq: &[u8]) -> AlignedRead {
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

    /// Half the reads carry the alt base: the heterozygote should win.
    #[test]
    fn test_heterozygote_wins_on_mixed_reads() {
        let reference = b"AAAACGTAAAA".to_vec();
        let ref_hap = Arc::new(Haplotype::reference(region(0, 11), reference.clone()));
        let mut b = HaplotypeBuilder::new(region(0, 11), reference.into());
        b.push(Allele::new(region(5, 6), b"C".to_vec()));
        let alt_hap = Arc::new(b.build());

        let mut reads = ReadMap::new();
        let sample: SampleName = "s1".into();
        let mut sample_reads = Vec::new();
        for _ in 0..6 {
            sample_reads.push(read_at(0, b"AAAACGTAAAA"));
            sample_reads.push(read_at(0, b"AAAACCTAAAA"));
        }
        reads.insert(sample.clone(), sample_reads);

        let mut cache = LikelihoodCache::new();
        let mut model = HaplotypeLikelihoodModel::default();
        cache
            .populate(
                &reads,
                &[(HaplotypeId(0), ref_hap), (HaplotypeId(1), alt_hap)],
                None,
                &mut model,
            )
            .unwrap();

        let genotypes = vec![
            Genotype::new(vec![HaplotypeId(0), HaplotypeId(0)]),
            Genotype::new(vec![HaplotypeId(0), HaplotypeId(1)]),
            Genotype::new(vec![HaplotypeId(1), HaplotypeId(1)]),
        ];
        let prior = UniformPriorModel;
        let latents = IndividualModel::new(&prior)
            .infer(genotypes, &sample, &cache)
            .unwrap();

        assert_eq!(latents.map_genotype(), 1);
        let sum: f64 = latents.posteriors.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_genotype_space_is_model_error() {
        let cache = LikelihoodCache::new();
        let prior = UniformPriorModel;
        let sample: SampleName = "s1".into();
        assert!(IndividualModel::new(&prior)
            .infer(Vec::new(), &sample, &cache)
            .is_err());
    }
}
