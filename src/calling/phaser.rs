//! # Phaser
//!
//! Groups adjacent calls into phase sets by genotype-posterior concordance.
//! For a candidate boundary the phase score is the Phred-scaled posterior
//! that the MAP genotype's pairing of left and right alleles survives when
//! the region is split there: posterior mass on genotypes that pair the
//! alleles differently is phase error.

use std::collections::BTreeMap;

use crate::data::genotype::Genotype;
use crate::data::haplotype::{HaplotypeArena, HaplotypeId};
use crate::data::phred::Phred;
use crate::data::read::SampleName;
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;

/// One sample's genotype posterior: genotypes with parallel probabilities.
/// Samples may have different genotype spaces (trio members with unequal
/// ploidies), so each carries its own list.
#[derive(Clone, Debug)]
pub struct SampleGenotypePosteriors {
    pub genotypes: Vec<Genotype<HaplotypeId>>,
    pub probabilities: Vec<f64>,
}

impl SampleGenotypePosteriors {
    /// MAP genotype index and posterior.
    pub fn map_genotype(&self) -> Option<(usize, f64)> {
        self.probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &p)| (i, p))
    }
}

/// The adapter between the latent models and the phaser / call routines.
#[derive(Clone, Debug)]
pub struct GenotypePosteriors {
    pub by_sample: BTreeMap<SampleName, SampleGenotypePosteriors>,
}

impl GenotypePosteriors {
    /// MAP genotype and its posterior for a sample.
    pub fn map_genotype(&self, sample: &SampleName) -> Option<(&Genotype<HaplotypeId>, f64)> {
        let sample_posteriors = self.by_sample.get(sample)?;
        let (i, p) = sample_posteriors.map_genotype()?;
        Some((&sample_posteriors.genotypes[i], p))
    }
}

/// A committed phase block.
#[derive(Clone, Debug)]
pub struct PhaseSet {
    pub region: GenomicRegion,
    pub scores: BTreeMap<SampleName, Phred>,
}

/// The phaser.
pub struct Phaser {
    min_phase_score: Phred,
}

impl Phaser {
    pub fn new(min_phase_score: Phred) -> Self {
        Self { min_phase_score }
    }

    /// Phase the longest contiguous left block whose internal boundaries
    /// all clear `min_phase_score` in every sample. Succeeds when that
    /// block spans at least two sites, or the whole candidate region.
    pub fn try_phase(
        &self,
        arena: &HaplotypeArena,
        posteriors: &GenotypePosteriors,
        candidates: &[Variant],
    ) -> Option<PhaseSet> {
        let sites = site_clusters(candidates);
        if sites.is_empty() {
            return None;
        }
        let boundary_scores = self.boundary_scores(arena, posteriors, candidates, &sites);
        let mut block_len = 1;
        while block_len < sites.len() {
            let passes = boundary_scores[block_len - 1]
                .values()
                .all(|score| *score >= self.min_phase_score);
            if !passes {
                break;
            }
            block_len += 1;
        }
        if block_len < 2 && block_len < sites.len() {
            return None;
        }
        Some(self.build_phase_set(posteriors, &sites, &boundary_scores, block_len))
    }

    /// Always returns a phase set over the whole candidate region; blocks
    /// that would not pass `try_phase` simply carry low scores.
    pub fn force_phase(
        &self,
        arena: &HaplotypeArena,
        posteriors: &GenotypePosteriors,
        candidates: &[Variant],
    ) -> PhaseSet {
        let sites = site_clusters(candidates);
        if sites.is_empty() {
            let region = GenomicRegion::new("", 0, 0);
            return PhaseSet {
                region,
                scores: BTreeMap::new(),
            };
        }
        let boundary_scores = self.boundary_scores(arena, posteriors, candidates, &sites);
        self.build_phase_set(posteriors, &sites, &boundary_scores, sites.len())
    }

    fn build_phase_set(
        &self,
        posteriors: &GenotypePosteriors,
        sites: &[GenomicRegion],
        boundary_scores: &[BTreeMap<SampleName, Phred>],
        block_len: usize,
    ) -> PhaseSet {
        let region = sites[0].encompassing(&sites[block_len - 1]);
        let mut scores = BTreeMap::new();
        for sample in posteriors.by_sample.keys() {
            let mut score = map_genotype_phred(posteriors, sample);
            for boundary in boundary_scores.iter().take(block_len.saturating_sub(1)) {
                if let Some(s) = boundary.get(sample) {
                    score = score.min(*s);
                }
            }
            scores.insert(sample.clone(), score);
        }
        PhaseSet { region, scores }
    }

    /// Scores for each internal boundary `b` (between sites `b` and
    /// `b + 1`), per sample.
    fn boundary_scores(
        &self,
        arena: &HaplotypeArena,
        posteriors: &GenotypePosteriors,
        candidates: &[Variant],
        sites: &[GenomicRegion],
    ) -> Vec<BTreeMap<SampleName, Phred>> {
        (1..sites.len())
            .map(|b| {
                let boundary = sites[b].begin();
                posteriors
                    .by_sample
                    .keys()
                    .map(|sample| {
                        (
                            sample.clone(),
                            phase_score(arena, posteriors, candidates, sample, boundary),
                        )
                    })
                    .collect()
            })
            .collect()
    }
}

/// Cluster overlapping candidates into sites, in order.
fn site_clusters(candidates: &[Variant]) -> Vec<GenomicRegion> {
    let mut sites: Vec<GenomicRegion> = Vec::new();
    for candidate in candidates {
        let joins = match sites.last() {
            Some(last) => {
                last.overlaps(candidate.region())
                    || (candidate.region().is_empty() && last.is_adjacent(candidate.region()))
            }
            None => false,
        };
        if joins {
            let last = sites.last_mut().expect("non-empty");
            *last = last.encompassing(candidate.region());
        } else {
            sites.push(candidate.region().clone());
        }
    }
    sites
}

/// The per-haplotype allele pairing across `boundary` for a genotype.
fn pairing_signature(
    arena: &HaplotypeArena,
    genotype: &Genotype<HaplotypeId>,
    candidates: &[Variant],
    boundary: u64,
) -> Vec<(Vec<bool>, Vec<bool>)> {
    let mut signature: Vec<(Vec<bool>, Vec<bool>)> = genotype
        .iter()
        .map(|&id| {
            let haplotype = arena.get(id);
            let mut left = Vec::new();
            let mut right = Vec::new();
            for candidate in candidates {
                let carries = haplotype.contains(&candidate.alt_allele());
                if candidate.region().begin() < boundary {
                    left.push(carries);
                } else {
                    right.push(carries);
                }
            }
            (left, right)
        })
        .collect();
    signature.sort();
    signature
}

/// Phred-scaled posterior that the MAP pairing at `boundary` is right.
fn phase_score(
    arena: &HaplotypeArena,
    posteriors: &GenotypePosteriors,
    candidates: &[Variant],
    sample: &SampleName,
    boundary: u64,
) -> Phred {
    let Some(sample_posteriors) = posteriors.by_sample.get(sample) else {
        return Phred::from_score(0.0);
    };
    let Some((map_index, _)) = sample_posteriors.map_genotype() else {
        return Phred::from_score(0.0);
    };
    let map_signature = pairing_signature(
        arena,
        &sample_posteriors.genotypes[map_index],
        candidates,
        boundary,
    );
    let mut preserved = 0.0;
    for (genotype, &p) in sample_posteriors
        .genotypes
        .iter()
        .zip(&sample_posteriors.probabilities)
    {
        if pairing_signature(arena, genotype, candidates, boundary) == map_signature {
            preserved += p;
        }
    }
    Phred::from_error_probability((1.0 - preserved).max(0.0))
}

fn map_genotype_phred(posteriors: &GenotypePosteriors, sample: &SampleName) -> Phred {
    match posteriors.map_genotype(sample) {
        Some((_, p)) => Phred::from_error_probability((1.0 - p).max(0.0)),
        None => Phred::from_score(0.0),
    }
}

/// All samples sharing one genotype list; the common case for single-model
/// posteriors.
pub fn shared_posteriors(
    samples: &[SampleName],
    genotypes: Vec<Genotype<HaplotypeId>>,
    probabilities_by_sample: impl Fn(&SampleName) -> Vec<f64>,
) -> GenotypePosteriors {
    let by_sample = samples
        .iter()
        .map(|s| {
            (
                s.clone(),
                SampleGenotypePosteriors {
                    genotypes: genotypes.clone(),
                    probabilities: probabilities_by_sample(s),
                },
            )
        })
        .collect();
    GenotypePosteriors { by_sample }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::haplotype::{Haplotype, HaplotypeBuilder};

    fn region(begin: u64, end: u64) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    /// Arena with four haplotypes over two SNV sites: ref-ref, alt-alt,
    /// ref-alt, alt-ref (cis and trans configurations).
    fn two_site_arena() -> (HaplotypeArena, Vec<Variant>) {
        let reference = b"AAAAAAAAAA".to_vec();
        let mut arena = HaplotypeArena::new();
        let candidates = vec![
            Variant::new(region(2, 3), b"A".to_vec(), b"C".to_vec()),
            Variant::new(region(7, 8), b"A".to_vec(), b"G".to_vec()),
        ];
        for (first, second) in [(false, false), (true, true), (false, true), (true, false)] {
            let mut b = HaplotypeBuilder::new(region(0, 10), reference.clone().into());
            if first {
                b.push(candidates[0].alt_allele());
            }
            if second {
                b.push(candidates[1].alt_allele());
            }
            arena.intern(b.build());
        }
        (arena, candidates)
    }

    fn posteriors_for(
        genotype_probs: Vec<(Genotype<HaplotypeId>, f64)>,
    ) -> GenotypePosteriors {
        let genotypes: Vec<_> = genotype_probs.iter().map(|(g, _)| g.clone()).collect();
        let probabilities: Vec<f64> = genotype_probs.iter().map(|(_, p)| *p).collect();
        let mut by_sample = BTreeMap::new();
        by_sample.insert(
            SampleName::from("s1"),
            SampleGenotypePosteriors {
                genotypes,
                probabilities,
            },
        );
        GenotypePosteriors { by_sample }
    }

    #[test]
    fn test_confident_cis_configuration_phases() {
        let (arena, candidates) = two_site_arena();
        // ref-ref / alt-alt heterozygote at 0.99
        let posteriors = posteriors_for(vec![
            (Genotype::new(vec![HaplotypeId(0), HaplotypeId(1)]), 0.99),
            (Genotype::new(vec![HaplotypeId(2), HaplotypeId(3)]), 0.01),
        ]);
        let phaser = Phaser::new(Phred::from_score(10.0));
        let set = phaser.try_phase(&arena, &posteriors, &candidates);
        assert!(set.is_some());
        let set = set.unwrap();
        assert_eq!(set.region, region(2, 8));
        assert!(set.scores[&SampleName::from("s1")].score() >= 10.0);
    }

    #[test]
    fn test_uncertain_pairing_does_not_phase() {
        let (arena, candidates) = two_site_arena();
        // cis and trans equally likely: phase is a coin flip
        let posteriors = posteriors_for(vec![
            (Genotype::new(vec![HaplotypeId(0), HaplotypeId(1)]), 0.5),
            (Genotype::new(vec![HaplotypeId(2), HaplotypeId(3)]), 0.5),
        ]);
        let phaser = Phaser::new(Phred::from_score(10.0));
        assert!(phaser.try_phase(&arena, &posteriors, &candidates).is_none());
        // force_phase still produces a (weak) set
        let forced = phaser.force_phase(&arena, &posteriors, &candidates);
        assert!(forced.scores[&SampleName::from("s1")].score() < 10.0);
    }

    #[test]
    fn test_single_site_is_trivially_phased() {
        let reference = b"AAAAA".to_vec();
        let mut arena = HaplotypeArena::new();
        let candidates = vec![Variant::new(region(2, 3), b"A".to_vec(), b"C".to_vec())];
        arena.intern(Haplotype::reference(region(0, 5), reference.clone()));
        let mut b = HaplotypeBuilder::new(region(0, 5), reference.into());
        b.push(candidates[0].alt_allele());
        arena.intern(b.build());
        let posteriors = posteriors_for(vec![(
            Genotype::new(vec![HaplotypeId(0), HaplotypeId(1)]),
            0.95,
        )]);
        let phaser = Phaser::new(Phred::from_score(10.0));
        let set = phaser.try_phase(&arena, &posteriors, &candidates).unwrap();
        assert_eq!(set.region, region(2, 3));
    }
}
