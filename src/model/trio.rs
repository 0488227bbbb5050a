//! # Trio Genotype Model
//!
//! Joint posterior over (maternal, paternal, child) genotypes. The
//! transmission prior combines Mendelian segregation with a per-base
//! de-novo mutation model, so a child genotype unexplained by inheritance
//! is penalised by the de-novo rate instead of being impossible.
//!
//! Sex-chromosome ploidies are supported under the contract: at most one
//! parent may have ploidy zero when the child's ploidy is positive, and a
//! ploidy-zero child requires both parents positive. Ploidy above two is
//! rejected at construction.

use crate::data::genotype::{enumerate_genotypes, Genotype};
use crate::data::haplotype::{HaplotypeArena, HaplotypeId};
use crate::data::read::SampleName;
use crate::error::{Result, TernError};
use crate::model::individual::genotype_log_likelihood;
use crate::model::likelihood::LikelihoodCache;
use crate::model::priors::{DenovoModel, GenotypePriorModel};
use crate::utils::maths::{log_sum_exp, logit, sigmoid};

/// Largest per-member ploidy the joint enumeration supports.
pub const MAX_TRIO_PLOIDY: u32 = 2;

/// Prior probability that the trio (inheritance) model explains the data,
/// used by the two-model comparison.
pub const TRIO_MODEL_PRIOR: f64 = 1.0 - 1e-7;

/// Validated per-member ploidies.
#[derive(Clone, Copy, Debug)]
pub struct TrioPloidies {
    maternal: u32,
    paternal: u32,
    child: u32,
}

impl TrioPloidies {
    pub fn new(maternal: u32, paternal: u32, child: u32) -> Result<Self> {
        if maternal == 0 && paternal == 0 && child == 0 {
            return Err(TernError::model(
                "TrioPloidies",
                "at least one trio member must have positive ploidy",
            ));
        }
        if child > 0 && maternal == 0 && paternal == 0 {
            return Err(TernError::model(
                "TrioPloidies",
                "a child with positive ploidy needs at least one parent with positive ploidy",
            ));
        }
        if child == 0 && (maternal == 0 || paternal == 0) {
            return Err(TernError::model(
                "TrioPloidies",
                "a ploidy-zero child requires both parents to have positive ploidy",
            ));
        }
        if maternal > MAX_TRIO_PLOIDY || paternal > MAX_TRIO_PLOIDY || child > MAX_TRIO_PLOIDY {
            return Err(TernError::model(
                "TrioPloidies",
                format!("trio calling supports ploidy up to {MAX_TRIO_PLOIDY}"),
            ));
        }
        Ok(Self {
            maternal,
            paternal,
            child,
        })
    }

    pub fn maternal(&self) -> u32 {
        self.maternal
    }

    pub fn paternal(&self) -> u32 {
        self.paternal
    }

    pub fn child(&self) -> u32 {
        self.child
    }
}

/// The samples making up the trio, in (mother, father, child) order.
#[derive(Clone, Debug)]
pub struct Trio {
    pub mother: SampleName,
    pub father: SampleName,
    pub child: SampleName,
}

/// One cell of the joint posterior.
#[derive(Clone, Debug)]
pub struct JointProbability {
    pub maternal: usize,
    pub paternal: usize,
    pub child: usize,
    pub probability: f64,
    /// Child carries a haplotype found in neither parent genotype.
    pub denovo: bool,
}

/// Inference output.
#[derive(Clone, Debug)]
pub struct TrioLatents {
    pub maternal_genotypes: Vec<Genotype<HaplotypeId>>,
    pub paternal_genotypes: Vec<Genotype<HaplotypeId>>,
    pub child_genotypes: Vec<Genotype<HaplotypeId>>,
    pub joint: Vec<JointProbability>,
    pub marginal_maternal: Vec<f64>,
    pub marginal_paternal: Vec<f64>,
    pub marginal_child: Vec<f64>,
    pub log_evidence: f64,
    /// Evidence of the no-inheritance (independent samples) model.
    pub log_evidence_dummy: f64,
}

impl TrioLatents {
    /// Posterior that the inheritance model explains the region, from the
    /// two-model comparison at fixed prior.
    pub fn model_posterior(&self) -> f64 {
        sigmoid(self.log_evidence - self.log_evidence_dummy + logit(TRIO_MODEL_PRIOR))
    }

    /// Total posterior mass on joints with a de-novo child haplotype.
    pub fn denovo_posterior(&self) -> f64 {
        self.joint
            .iter()
            .filter(|j| j.denovo)
            .map(|j| j.probability)
            .sum()
    }
}

/// The trio inference engine.
pub struct TrioModel<'a> {
    prior: &'a dyn GenotypePriorModel,
    denovo: DenovoModel,
    ploidies: TrioPloidies,
}

impl<'a> TrioModel<'a> {
    pub fn new(prior: &'a dyn GenotypePriorModel, denovo: DenovoModel, ploidies: TrioPloidies) -> Self {
        Self {
            prior,
            denovo,
            ploidies,
        }
    }

    /// Exact joint enumeration over the trio genotype spaces.
    pub fn infer(
        &self,
        haplotypes: &[HaplotypeId],
        arena: &HaplotypeArena,
        trio: &Trio,
        cache: &LikelihoodCache,
    ) -> Result<TrioLatents> {
        let maternal_genotypes = enumerate_genotypes(haplotypes, self.ploidies.maternal);
        let paternal_genotypes = enumerate_genotypes(haplotypes, self.ploidies.paternal);
        let child_genotypes = enumerate_genotypes(haplotypes, self.ploidies.child);
        if maternal_genotypes.is_empty() || paternal_genotypes.is_empty() || child_genotypes.is_empty()
        {
            return Err(TernError::model("TrioModel::infer", "empty genotype space"));
        }

        // per-member log priors and likelihoods, computed once
        let maternal_scores = member_scores(&maternal_genotypes, self.prior, &trio.mother, cache);
        let paternal_scores = member_scores(&paternal_genotypes, self.prior, &trio.father, cache);
        let child_likelihoods: Vec<f64> = child_genotypes
            .iter()
            .map(|g| genotype_log_likelihood(g, &trio.child, cache))
            .collect();
        let child_priors: Vec<f64> = child_genotypes
            .iter()
            .map(|g| self.prior.log_prior(g))
            .collect();

        let mut joint = Vec::with_capacity(
            maternal_genotypes.len() * paternal_genotypes.len() * child_genotypes.len(),
        );
        let mut log_joint = Vec::with_capacity(joint.capacity());
        for (mi, mg) in maternal_genotypes.iter().enumerate() {
            for (pi, pg) in paternal_genotypes.iter().enumerate() {
                for (ci, cg) in child_genotypes.iter().enumerate() {
                    let transmission = self.transmission_log_probability(cg, mg, pg, arena);
                    let lp = maternal_scores[mi]
                        + paternal_scores[pi]
                        + transmission
                        + child_likelihoods[ci];
                    let denovo = cg
                        .iter()
                        .any(|h| !mg.contains(h) && !pg.contains(h));
                    joint.push(JointProbability {
                        maternal: mi,
                        paternal: pi,
                        child: ci,
                        probability: 0.0,
                        denovo,
                    });
                    log_joint.push(lp);
                }
            }
        }

        let log_evidence = log_sum_exp(&log_joint);
        if !log_evidence.is_finite() {
            return Err(TernError::numerical(
                "trio joint evidence vanished; all genotype combinations impossible",
            ));
        }
        for (j, lp) in joint.iter_mut().zip(&log_joint) {
            j.probability = (lp - log_evidence).exp();
        }

        let mut marginal_maternal = vec![0.0; maternal_genotypes.len()];
        let mut marginal_paternal = vec![0.0; paternal_genotypes.len()];
        let mut marginal_child = vec![0.0; child_genotypes.len()];
        for j in &joint {
            marginal_maternal[j.maternal] += j.probability;
            marginal_paternal[j.paternal] += j.probability;
            marginal_child[j.child] += j.probability;
        }

        // dummy model: child independent of parents under the same prior
        let child_dummy: Vec<f64> = child_priors
            .iter()
            .zip(&child_likelihoods)
            .map(|(p, l)| p + l)
            .collect();
        let log_evidence_dummy = log_sum_exp(&maternal_scores)
            + log_sum_exp(&paternal_scores)
            + log_sum_exp(&child_dummy);

        Ok(TrioLatents {
            maternal_genotypes,
            paternal_genotypes,
            child_genotypes,
            joint,
            marginal_maternal,
            marginal_paternal,
            marginal_child,
            log_evidence,
            log_evidence_dummy,
        })
    }

    /// `ln P(child genotype | maternal genotype, paternal genotype)`.
    fn transmission_log_probability(
        &self,
        child: &Genotype<HaplotypeId>,
        maternal: &Genotype<HaplotypeId>,
        paternal: &Genotype<HaplotypeId>,
        arena: &HaplotypeArena,
    ) -> f64 {
        if child.ploidy() == 0 {
            return 0.0;
        }
        let mat_empty = maternal.ploidy() == 0;
        let pat_empty = paternal.ploidy() == 0;
        match (child.ploidy(), mat_empty, pat_empty) {
            (1, false, true) => self.single_inheritance(child.elements()[0], maternal, arena),
            (1, true, false) => self.single_inheritance(child.elements()[0], paternal, arena),
            (1, false, false) => {
                // uncertain source; average the parents
                let from_mat = self.single_inheritance(child.elements()[0], maternal, arena);
                let from_pat = self.single_inheritance(child.elements()[0], paternal, arena);
                log_sum_exp(&[from_mat, from_pat]) - std::f64::consts::LN_2
            }
            (2, false, false) => self.biparental_inheritance(child, maternal, paternal, arena),
            (2, false, true) => self.biparental_inheritance(child, maternal, maternal, arena),
            (2, true, false) => self.biparental_inheritance(child, paternal, paternal, arena),
            _ => f64::NEG_INFINITY,
        }
    }

    /// One child haplotype copied (with mutation) from one parent genotype.
    fn single_inheritance(
        &self,
        child: HaplotypeId,
        parent: &Genotype<HaplotypeId>,
        arena: &HaplotypeArena,
    ) -> f64 {
        let child_hap = arena.get(child);
        let terms: Vec<f64> = parent
            .iter()
            .map(|&p| self.denovo.log_probability(child_hap, arena.get(p)))
            .collect();
        log_sum_exp(&terms) - (parent.ploidy() as f64).ln()
    }

    /// Diploid child: one haplotype from each source genotype, both
    /// orderings of an unordered pair.
    fn biparental_inheritance(
        &self,
        child: &Genotype<HaplotypeId>,
        mat: &Genotype<HaplotypeId>,
        pat: &Genotype<HaplotypeId>,
        arena: &HaplotypeArena,
    ) -> f64 {
        let a = child.elements()[0];
        let b = child.elements()[1];
        let from_a_mat = self.single_inheritance(a, mat, arena);
        let from_b_pat = self.single_inheritance(b, pat, arena);
        if a == b {
            return from_a_mat + from_b_pat;
        }
        let from_b_mat = self.single_inheritance(b, mat, arena);
        let from_a_pat = self.single_inheritance(a, pat, arena);
        log_sum_exp(&[from_a_mat + from_b_pat, from_b_mat + from_a_pat])
    }
}

fn member_scores(
    genotypes: &[Genotype<HaplotypeId>],
    prior: &dyn GenotypePriorModel,
    sample: &SampleName,
    cache: &LikelihoodCache,
) -> Vec<f64> {
    genotypes
        .iter()
        .map(|g| prior.log_prior(g) + genotype_log_likelihood(g, sample, cache))
        .collect()
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
        GenomicRegion::new("chr2", begin, end)
    }

    fn read_at(seq: &[u8]) -> AlignedRead {
        AlignedRead::new(
            "r",
            "chr2",
            0,
            60,
            vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
            seq.to_vec(),
            vec![35; seq.len()],
            false,
            true,
        )
    }

    #[test]
    fn test_ploidy_contract() {
        assert!(TrioPloidies::new(2, 2, 2).is_ok());
        assert!(TrioPloidies::new(2, 0, 1).is_ok());
        assert!(TrioPloidies::new(0, 0, 1).is_err());
        assert!(TrioPloidies::new(2, 0, 0).is_err());
        assert!(TrioPloidies::new(0, 0, 0).is_err());
        assert!(TrioPloidies::new(3, 2, 2).is_err());
    }

    /// Parents homozygous reference, child heterozygous: the de-novo joint
    /// should dominate and the de-novo posterior should be high.
    #[test]
    fn test_denovo_detection() {
        let reference = b"AAAAAGAAAAA".to_vec();
        let mut arena = HaplotypeArena::new();
        let ref_id = arena.intern(Haplotype::reference(region(0, 11), reference.clone()));
        let mut b = HaplotypeBuilder::new(region(0, 11), reference.clone().into());
        b.push(Allele::new(region(5, 6), b"T".to_vec())); // G>T
        let alt_id = arena.intern(b.build());

        let trio = Trio {
            mother: "mother".into(),
            father: "father".into(),
            child: "child".into(),
        };
        let mut reads = ReadMap::new();
        reads.insert(
            trio.mother.clone(),
            (0..8).map(|_| read_at(b"AAAAAGAAAAA")).collect(),
        );
        reads.insert(
            trio.father.clone(),
            (0..8).map(|_| read_at(b"AAAAAGAAAAA")).collect(),
        );
        reads.insert(
            trio.child.clone(),
            (0..4)
                .flat_map(|_| [read_at(b"AAAAAGAAAAA"), read_at(b"AAAAATAAAAA")])
                .collect(),
        );

        let mut cache = LikelihoodCache::new();
        let mut lik_model = HaplotypeLikelihoodModel::default();
        cache
            .populate(
                &reads,
                &[
                    (ref_id, arena.get_arc(ref_id)),
                    (alt_id, arena.get_arc(alt_id)),
                ],
                None,
                &mut lik_model,
            )
            .unwrap();

        let counts = SiteCounts::from_arena(&arena, &reference, 0);
        let prior = CoalescentModel::new(
            counts,
            DEFAULT_SNV_HETEROZYGOSITY,
            DEFAULT_INDEL_HETEROZYGOSITY,
            6,
        );
        let model = TrioModel::new(
            &prior,
            DenovoModel::new(1e-6),
            TrioPloidies::new(2, 2, 2).unwrap(),
        );
        let latents = model
            .infer(&[ref_id, alt_id], &arena, &trio, &cache)
            .unwrap();

        let sum: f64 = latents.joint.iter().map(|j| j.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(latents.denovo_posterior() > 0.5);
        // child marginal MAP should be the het genotype
        let map_child = latents
            .marginal_child
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        let het = Genotype::new(vec![ref_id, alt_id]);
        assert_eq!(latents.child_genotypes[map_child], het);
    }

    /// With everyone homozygous reference there is nothing de novo and the
    /// inheritance model is preferred.
    #[test]
    fn test_reference_trio_is_not_denovo() {
        let reference = b"CCCCCCCC".to_vec();
        let mut arena = HaplotypeArena::new();
        let ref_id = arena.intern(Haplotype::reference(region(0, 8), reference.clone()));

        let trio = Trio {
            mother: "mother".into(),
            father: "father".into(),
            child: "child".into(),
        };
        let mut reads = ReadMap::new();
        for member in [&trio.mother, &trio.father, &trio.child] {
            reads.insert(member.clone(), (0..5).map(|_| read_at(b"CCCCCCCC")).collect());
        }

        let mut cache = LikelihoodCache::new();
        let mut lik_model = HaplotypeLikelihoodModel::default();
        cache
            .populate(&reads, &[(ref_id, arena.get_arc(ref_id))], None, &mut lik_model)
            .unwrap();

        let counts = SiteCounts::from_arena(&arena, &reference, 0);
        let prior = CoalescentModel::new(
            counts,
            DEFAULT_SNV_HETEROZYGOSITY,
            DEFAULT_INDEL_HETEROZYGOSITY,
            6,
        );
        let model = TrioModel::new(
            &prior,
            DenovoModel::new(1e-6),
            TrioPloidies::new(2, 2, 2).unwrap(),
        );
        let latents = model.infer(&[ref_id], &arena, &trio, &cache).unwrap();
        assert!(latents.denovo_posterior() < 1e-6);
        assert!(latents.model_posterior() > 0.5);
    }
}
