//! # Caller Orchestrator
//!
//! Drives one genomic region through the full pipeline: candidate
//! generation, haplotype generation, likelihood scoring, latent inference,
//! phasing, and record production. The inference backend is a closed
//! `CallerKind`: individual, population, cancer, or trio. Each backend
//! supplies latents through the same four operations (infer, call
//! variants, call reference, model posterior), so the region loop is
//! written once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::calling::calls::{Call, CallKind};
use crate::calling::candidates::CandidateGenerator;
use crate::calling::factory::RecordFactory;
use crate::calling::generator::{HaplotypeGenerator, HaplotypeGeneratorConfig};
use crate::calling::phaser::{
    GenotypePosteriors, PhaseSet, Phaser, SampleGenotypePosteriors,
};
use crate::data::allele::{Allele, UNCALLED};
use crate::data::genotype::{enumerate_genotypes, Genotype, GenotypeCall, PhaseCall};
use crate::data::haplotype::{Haplotype, HaplotypeArena, HaplotypeId};
use crate::data::phred::Phred;
use crate::data::read::{copy_overlapped, ReadMap, SampleName};
use crate::data::region::{intervening_regions, GenomicRegion};
use crate::data::variant::Variant;
use crate::error::{Result, TernError};
use crate::io::fasta::ReferenceProvider;
use crate::io::vcf::VcfRecord;
use crate::model::cancer::{haplotype_posteriors as cancer_haplotype_posteriors, CancerLatents, CancerModel, CancerModelParams};
use crate::model::individual::IndividualModel;
use crate::model::likelihood::{FlankState, HaplotypeLikelihoodModel, LikelihoodCache};
use crate::model::population::PopulationModel;
use crate::model::priors::{
    CoalescentModel, DenovoModel, SiteCounts, DEFAULT_DENOVO_RATE,
    DEFAULT_INDEL_HETEROZYGOSITY, DEFAULT_SNV_HETEROZYGOSITY,
};
use crate::model::trio::{Trio, TrioLatents, TrioModel, TrioPloidies};

/// Reference-call emission mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefCallType {
    None,
    Positional,
    Blocked,
}

/// Haplotypes below this posterior are removed from the generator.
pub const MIN_HAPLOTYPE_POSTERIOR: f64 = 1e-15;

/// Parameters shared by every caller kind.
#[derive(Clone, Debug)]
pub struct CallerParams {
    pub max_haplotypes: usize,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub min_somatic_posterior: f64,
    pub min_denovo_posterior: f64,
    pub min_phase_score: f64,
    pub refcall_type: RefCallType,
    pub organism_ploidy: u32,
    pub contig_ploidies: BTreeMap<String, u32>,
    pub snv_heterozygosity: f64,
    pub indel_heterozygosity: f64,
    pub denovo_rate: f64,
    pub lag_haplotype_generation: bool,
}

impl Default for CallerParams {
    fn default() -> Self {
        Self {
            max_haplotypes: 128,
            min_variant_posterior: 0.98,
            min_refcall_posterior: 0.9,
            min_somatic_posterior: 0.99,
            min_denovo_posterior: 0.95,
            min_phase_score: 20.0,
            refcall_type: RefCallType::None,
            organism_ploidy: 2,
            contig_ploidies: BTreeMap::new(),
            snv_heterozygosity: DEFAULT_SNV_HETEROZYGOSITY,
            indel_heterozygosity: DEFAULT_INDEL_HETEROZYGOSITY,
            denovo_rate: DEFAULT_DENOVO_RATE,
            lag_haplotype_generation: true,
        }
    }
}

/// Which inference backend drives the calls.
#[derive(Clone, Debug)]
pub enum CallerKind {
    Individual,
    Population,
    Cancer {
        normal_sample: Option<SampleName>,
        somatic_mutation_rate: f64,
    },
    Trio(Trio),
}

/// Cooperative cancellation shared with the worker pool; checked before
/// every generator step.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of calling a region.
pub enum RegionOutcome {
    Completed(Vec<VcfRecord>),
    /// Cancelled mid-region; partial output was discarded.
    Cancelled,
}

/// Unified latents the region loop works with; backend specifics are kept
/// for the call routines.
struct Latents {
    genotype_posteriors: GenotypePosteriors,
    haplotype_posteriors: BTreeMap<HaplotypeId, f64>,
    model_posterior: Option<f64>,
    trio: Option<TrioLatents>,
    cancer: Option<CancerLatents>,
}

/// The per-region caller.
pub struct Caller<'a> {
    reference: &'a dyn ReferenceProvider,
    candidate_generator: CandidateGenerator,
    kind: CallerKind,
    params: CallerParams,
    samples: Vec<SampleName>,
}

impl<'a> Caller<'a> {
    pub fn new(
        reference: &'a dyn ReferenceProvider,
        candidate_generator: CandidateGenerator,
        kind: CallerKind,
        params: CallerParams,
        samples: Vec<SampleName>,
    ) -> Result<Self> {
        if samples.is_empty() {
            return Err(TernError::input("no samples to call"));
        }
        if let CallerKind::Trio(trio) = &kind {
            for member in [&trio.mother, &trio.father, &trio.child] {
                if !samples.contains(member) {
                    return Err(TernError::input(format!(
                        "trio member {member} is not among the samples"
                    )));
                }
            }
        }
        Ok(Self {
            reference,
            candidate_generator,
            kind,
            params,
            samples,
        })
    }

    fn ploidy(&self, contig: &str) -> u32 {
        self.params
            .contig_ploidies
            .get(contig)
            .copied()
            .unwrap_or(self.params.organism_ploidy)
    }

    fn refcalls_requested(&self) -> bool {
        self.params.refcall_type != RefCallType::None
    }

    /// Call one region. Reads must already be fetched and filtered.
    pub fn call(
        &self,
        call_region: &GenomicRegion,
        reads: &ReadMap,
        cancel: &CancelToken,
    ) -> Result<RegionOutcome> {
        let ploidy = self.ploidy(call_region.contig());
        if ploidy == 0 {
            // no variant calls on ploidy-zero contigs
            return Ok(RegionOutcome::Completed(Vec::new()));
        }

        let candidates =
            self.candidate_generator
                .generate(call_region, reads, self.reference)?;
        let factory = RecordFactory::new(self.reference, self.samples.clone());

        if candidates.is_empty() {
            if !self.refcalls_requested() {
                return Ok(RegionOutcome::Completed(Vec::new()));
            }
            let calls = self.reference_calls_over(call_region, reads, ploidy, &[])?;
            let records = factory.make(calls, reads)?;
            return Ok(RegionOutcome::Completed(records));
        }

        // reference window with flank for haplotype construction
        let contig_length = self
            .reference
            .contig_length(call_region.contig())
            .ok_or_else(|| {
                TernError::input(format!("contig {} not in reference", call_region.contig()))
            })?;
        let flank = crate::data::read::max_read_length(reads) as u64 + 64;
        let reference_region = GenomicRegion::new(
            call_region.contig().clone(),
            call_region.begin().saturating_sub(flank),
            (call_region.end() + flank).min(contig_length),
        );
        let reference_sequence: Arc<[u8]> =
            self.reference.fetch(&reference_region)?.into();

        let mut generator = HaplotypeGenerator::new(
            call_region.clone(),
            reference_region.clone(),
            Arc::clone(&reference_sequence),
            candidates.clone(),
            reads.clone(),
            HaplotypeGeneratorConfig {
                max_haplotypes: self.params.max_haplotypes,
                lag_enabled: self.params.lag_haplotype_generation,
                ..HaplotypeGeneratorConfig::default()
            },
        )?;
        let phaser = Phaser::new(Phred::from_score(self.params.min_phase_score));
        let mut cache = LikelihoodCache::new();
        let mut likelihood_model = HaplotypeLikelihoodModel::default();

        let mut calls: Vec<Call> = Vec::new();
        let mut called_regions: Vec<GenomicRegion> = Vec::new();
        // everything left of this is already called or passed over
        let mut called_boundary = call_region.begin();
        let mut numerical_failures = 0u32;
        let mut previous_active: Option<GenomicRegion> = None;
        let mut stalled_steps = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(RegionOutcome::Cancelled);
            }
            let (haplotypes, active_region) = generator.progress()?;
            if haplotypes.is_empty() || active_region.is_after(call_region) {
                break;
            }
            if previous_active.as_ref() == Some(&active_region) {
                stalled_steps += 1;
                if stalled_steps > 3 {
                    warn!(region = %call_region, active = %active_region, "haplotype generation stalled; skipping region remainder");
                    break;
                }
            } else {
                stalled_steps = 0;
                previous_active = Some(active_region.clone());
            }
            let haplotype_region = haplotypes[0].1.region().clone();
            generator.remove_passed(&haplotype_region);
            debug!(active = %active_region, haplotypes = haplotypes.len(), "active step");

            let active_reads = copy_overlapped(reads, &haplotype_region);
            cache.clear();
            cache.populate(
                &active_reads,
                &haplotypes,
                Some(&FlankState::new(active_region.clone())),
                &mut likelihood_model,
            )?;

            let (kept, removed) =
                filter_to_n_haplotypes(&haplotypes, &self.samples, &cache, self.params.max_haplotypes);
            if kept.is_empty() {
                // all haplotypes tied in likelihood; try a different frontier
                generator.clear_progress();
                cache.clear();
                numerical_failures += 1;
                if numerical_failures > 3 {
                    warn!(region = %call_region, "persistent degenerate likelihoods; skipping region remainder");
                    break;
                }
                continue;
            }
            let removed_ids: Vec<HaplotypeId> = removed.iter().map(|(id, _)| *id).collect();
            cache.erase(&removed_ids);
            generator.remove(&removed_ids);
            let kept_ids: Vec<HaplotypeId> = kept.iter().map(|(id, _)| *id).collect();
            generator.uniquely_keep(&kept_ids);

            let latents = match self.infer_latents(
                &kept,
                generator.arena(),
                &reference_sequence,
                &reference_region,
                call_region.contig(),
                &cache,
            ) {
                Ok(latents) => latents,
                Err(error @ TernError::Numerical { .. }) => {
                    generator.clear_progress();
                    cache.clear();
                    numerical_failures += 1;
                    if numerical_failures > 3 {
                        warn!(region = %call_region, %error, "persistent inference failures; skipping region remainder");
                        break;
                    }
                    continue;
                }
                Err(error @ TernError::Model { .. }) => {
                    // misconfigured model cannot succeed on retry
                    warn!(region = %call_region, %error, "model cannot call this region");
                    break;
                }
                Err(error) => return Err(error),
            };
            numerical_failures = 0;
            cache.clear();

            let region_candidates: Vec<Variant> = candidates
                .iter()
                .filter(|c| c.region().overlaps(&haplotype_region))
                .cloned()
                .collect();

            let phase_set = phaser.try_phase(
                generator.arena(),
                &latents.genotype_posteriors,
                &region_candidates,
            );

            if let Some(phase_set) = &phase_set {
                if active_region.overlaps(call_region) {
                    let mut block_calls = self.call_block(
                        &candidates,
                        &latents,
                        generator.arena(),
                        call_region,
                        &phase_set.region,
                        &mut called_boundary,
                    )?;
                    if spans_multiple_sites(&candidates, &phase_set.region) {
                        set_phasing(&mut block_calls, phase_set);
                    }
                    record_called_regions(&block_calls, &mut called_regions);
                    calls.append(&mut block_calls);
                    let remaining = active_region.right_overhang(&phase_set.region);
                    generator.force_forward(&remaining);
                }
            }

            let mut next_active_region = generator.tell_next_active_region();
            if !has_passed(&next_active_region, &active_region) {
                let removable: Vec<HaplotypeId> = latents
                    .haplotype_posteriors
                    .iter()
                    .filter(|(_, p)| **p < MIN_HAPLOTYPE_POSTERIOR)
                    .map(|(id, _)| *id)
                    .collect();
                generator.remove(&removable);
                next_active_region = generator.tell_next_active_region();
            }

            if active_region.begins_before(&next_active_region)
                && active_region.overlaps(call_region)
            {
                let passed_region = active_region.left_overhang(&next_active_region);
                let mut uncalled_region = active_region.overlapped(&passed_region);
                if let Some(phase_set) = &phase_set {
                    if phase_set.region.ends_before(&passed_region) {
                        uncalled_region = passed_region.right_overhang(&phase_set.region);
                    }
                }
                let mut late_calls = self.call_block(
                    &candidates,
                    &latents,
                    generator.arena(),
                    call_region,
                    &uncalled_region,
                    &mut called_boundary,
                )?;
                if !late_calls.is_empty() {
                    let uncalled_candidates: Vec<Variant> = candidates
                        .iter()
                        .filter(|c| c.region().overlaps(&uncalled_region))
                        .cloned()
                        .collect();
                    let forced = phaser.force_phase(
                        generator.arena(),
                        &latents.genotype_posteriors,
                        &uncalled_candidates,
                    );
                    if spans_multiple_sites(&candidates, &forced.region) {
                        set_phasing(&mut late_calls, &forced);
                    }
                    record_called_regions(&late_calls, &mut called_regions);
                    calls.append(&mut late_calls);
                }
                if self.refcalls_requested() {
                    let mut reference_calls = self.reference_calls_over(
                        &uncalled_region,
                        reads,
                        ploidy,
                        &called_regions,
                    )?;
                    calls.append(&mut reference_calls);
                }
            }
        }

        // trailing refcalls over the untouched tail of the region
        if self.refcalls_requested() && called_boundary < call_region.end() {
            let tail = GenomicRegion::new(
                call_region.contig().clone(),
                called_boundary,
                call_region.end(),
            );
            let mut reference_calls =
                self.reference_calls_over(&tail, reads, ploidy, &called_regions)?;
            calls.append(&mut reference_calls);
        }

        let records = factory.make(calls, reads)?;
        Ok(RegionOutcome::Completed(records))
    }

    /// Run the backend's inference over the kept haplotypes.
    fn infer_latents(
        &self,
        haplotypes: &[(HaplotypeId, Arc<Haplotype>)],
        arena: &HaplotypeArena,
        reference_sequence: &Arc<[u8]>,
        reference_region: &GenomicRegion,
        contig: &str,
        cache: &LikelihoodCache,
    ) -> Result<Latents> {
        let ids: Vec<HaplotypeId> = haplotypes.iter().map(|(id, _)| *id).collect();
        let ploidy = self.ploidy(contig);
        let site_counts = SiteCounts::from_arena(
            arena,
            reference_sequence,
            reference_region.begin(),
        );
        let prior = CoalescentModel::new(
            site_counts,
            self.params.snv_heterozygosity,
            self.params.indel_heterozygosity,
            (self.samples.len() as u32) * ploidy.max(1),
        );

        match &self.kind {
            CallerKind::Individual => {
                let sample = self.samples[0].clone();
                let genotypes = enumerate_genotypes(&ids, ploidy);
                let latents =
                    IndividualModel::new(&prior).infer(genotypes, &sample, cache)?;
                let genotype_posteriors = GenotypePosteriors {
                    by_sample: BTreeMap::from([(
                        sample,
                        SampleGenotypePosteriors {
                            genotypes: latents.genotypes.clone(),
                            probabilities: latents.posteriors.clone(),
                        },
                    )]),
                };
                let haplotype_posteriors =
                    marginal_haplotype_posteriors(&genotype_posteriors);
                Ok(Latents {
                    genotype_posteriors,
                    haplotype_posteriors,
                    model_posterior: None,
                    trio: None,
                    cancer: None,
                })
            }
            CallerKind::Population => {
                let latents = PopulationModel::new(ploidy).infer(&ids, &self.samples, cache)?;
                let genotype_posteriors = GenotypePosteriors {
                    by_sample: latents
                        .posteriors
                        .iter()
                        .map(|(sample, probabilities)| {
                            (
                                sample.clone(),
                                SampleGenotypePosteriors {
                                    genotypes: latents.genotypes.clone(),
                                    probabilities: probabilities.clone(),
                                },
                            )
                        })
                        .collect(),
                };
                let haplotype_posteriors =
                    marginal_haplotype_posteriors(&genotype_posteriors);
                Ok(Latents {
                    genotype_posteriors,
                    haplotype_posteriors,
                    model_posterior: None,
                    trio: None,
                    cancer: None,
                })
            }
            CallerKind::Cancer {
                normal_sample,
                somatic_mutation_rate,
            } => {
                let params = CancerModelParams {
                    somatic_mutation_rate: *somatic_mutation_rate,
                    normal_sample: normal_sample.clone(),
                    ploidy,
                    ..CancerModelParams::default()
                };
                let latents =
                    CancerModel::new(&prior, params).infer(&ids, arena, &self.samples, cache)?;
                let genotype_posteriors = crate::calling::phaser::shared_posteriors(
                    &self.samples,
                    latents.germline_genotypes.clone(),
                    |_| latents.germline_posteriors.clone(),
                );
                let haplotype_posteriors = cancer_haplotype_posteriors(&latents);
                Ok(Latents {
                    genotype_posteriors,
                    haplotype_posteriors,
                    model_posterior: Some(latents.model_posteriors.somatic),
                    trio: None,
                    cancer: Some(latents),
                })
            }
            CallerKind::Trio(trio) => {
                let ploidies = TrioPloidies::new(ploidy, ploidy, ploidy)?;
                let model = TrioModel::new(&prior, DenovoModel::new(self.params.denovo_rate), ploidies);
                let latents = model.infer(&ids, arena, trio, cache)?;
                let genotype_posteriors = GenotypePosteriors {
                    by_sample: BTreeMap::from([
                        (
                            trio.mother.clone(),
                            SampleGenotypePosteriors {
                                genotypes: latents.maternal_genotypes.clone(),
                                probabilities: latents.marginal_maternal.clone(),
                            },
                        ),
                        (
                            trio.father.clone(),
                            SampleGenotypePosteriors {
                                genotypes: latents.paternal_genotypes.clone(),
                                probabilities: latents.marginal_paternal.clone(),
                            },
                        ),
                        (
                            trio.child.clone(),
                            SampleGenotypePosteriors {
                                genotypes: latents.child_genotypes.clone(),
                                probabilities: latents.marginal_child.clone(),
                            },
                        ),
                    ]),
                };
                let haplotype_posteriors =
                    marginal_haplotype_posteriors(&genotype_posteriors);
                Ok(Latents {
                    genotype_posteriors,
                    haplotype_posteriors,
                    model_posterior: Some(latents.model_posterior()),
                    trio: Some(latents),
                    cancer: None,
                })
            }
        }
    }

    /// Call the candidates inside `block_region` that have not been called
    /// yet, advancing the called boundary.
    fn call_block(
        &self,
        candidates: &[Variant],
        latents: &Latents,
        arena: &HaplotypeArena,
        call_region: &GenomicRegion,
        block_region: &GenomicRegion,
        called_boundary: &mut u64,
    ) -> Result<Vec<Call>> {
        let mut result = Vec::new();
        for candidate in candidates {
            if candidate.region().begin() < *called_boundary
                || !candidate.region().overlaps(block_region)
                || !candidate.region().overlaps(call_region)
            {
                continue;
            }
            if let Some(call) = self.call_variant(candidate, latents, arena)? {
                result.push(call);
            }
        }
        *called_boundary = (*called_boundary).max(block_region.end().min(call_region.end()));
        Ok(result)
    }

    /// Decide one candidate under the backend's posteriors.
    fn call_variant(
        &self,
        candidate: &Variant,
        latents: &Latents,
        arena: &HaplotypeArena,
    ) -> Result<Option<Call>> {
        let alt_allele = candidate.alt_allele();
        // per-sample posterior of carrying the alt
        let mut no_carrier_probability = 1.0;
        let mut genotype_calls = BTreeMap::new();
        for (sample, sample_posteriors) in &latents.genotype_posteriors.by_sample {
            let mut carries = 0.0;
            for (genotype, &p) in sample_posteriors
                .genotypes
                .iter()
                .zip(&sample_posteriors.probabilities)
            {
                if genotype
                    .iter()
                    .any(|&id| arena.get(id).contains(&alt_allele))
                {
                    carries += p;
                }
            }
            no_carrier_probability *= 1.0 - carries.min(1.0);
            let Some((map_genotype, map_posterior)) = latents
                .genotype_posteriors
                .map_genotype(sample)
            else {
                continue;
            };
            let site_genotype = genotype_over_region(map_genotype, arena, candidate.region());
            genotype_calls.insert(
                sample.clone(),
                GenotypeCall {
                    genotype: site_genotype,
                    posterior: map_posterior,
                    phase: None,
                },
            );
        }
        let variant_posterior = 1.0 - no_carrier_probability;
        if variant_posterior < self.params.min_variant_posterior {
            return Ok(None);
        }

        let kind = self.classify_variant(candidate, latents, arena)?;
        match &kind {
            CallKind::Denovo { posterior } | CallKind::DenovoReferenceReversion { posterior } => {
                if *posterior < self.params.min_denovo_posterior {
                    return Ok(None);
                }
            }
            CallKind::Somatic { posterior, .. } => {
                if *posterior < self.params.min_somatic_posterior {
                    return Ok(None);
                }
            }
            _ => {}
        }

        Ok(Some(Call {
            region: candidate.region().clone(),
            ref_allele: candidate.ref_allele(),
            alt_allele: Some(alt_allele),
            genotype_calls,
            quality: Phred::from_error_probability((1.0 - variant_posterior).max(0.0)),
            model_posterior: latents.model_posterior,
            kind,
        }))
    }

    /// Backend-specific call classification.
    fn classify_variant(
        &self,
        candidate: &Variant,
        latents: &Latents,
        arena: &HaplotypeArena,
    ) -> Result<CallKind> {
        let alt_allele = candidate.alt_allele();
        if let Some(trio_latents) = &latents.trio {
            let trio = match &self.kind {
                CallerKind::Trio(trio) => trio,
                _ => unreachable!("trio latents without trio caller"),
            };
            let carries = |sample: &SampleName| {
                latents
                    .genotype_posteriors
                    .map_genotype(sample)
                    .map(|(g, _)| g.iter().any(|&id| arena.get(id).contains(&alt_allele)))
                    .unwrap_or(false)
            };
            let child_has = carries(&trio.child);
            let mother_has = carries(&trio.mother);
            let father_has = carries(&trio.father);
            if child_has && !mother_has && !father_has {
                return Ok(CallKind::Denovo {
                    posterior: trio_latents.denovo_posterior(),
                });
            }
            if !child_has && mother_has && father_has {
                // both parents homozygous alt while the child reverts
                let hom = |sample: &SampleName| {
                    latents
                        .genotype_posteriors
                        .map_genotype(sample)
                        .map(|(g, _)| {
                            g.iter().all(|&id| arena.get(id).contains(&alt_allele))
                        })
                        .unwrap_or(false)
                };
                if hom(&trio.mother) && hom(&trio.father) {
                    return Ok(CallKind::DenovoReferenceReversion {
                        posterior: trio_latents.denovo_posterior(),
                    });
                }
            }
            return Ok(CallKind::Germline);
        }
        if let Some(cancer_latents) = &latents.cancer {
            let somatic_support: f64 = cancer_latents
                .somatic_hypotheses
                .iter()
                .filter(|h| arena.get(h.somatic).contains(&alt_allele))
                .map(|h| h.posterior)
                .sum();
            // germline explanation of the same allele
            let germline_support: f64 = cancer_latents
                .germline_genotypes
                .iter()
                .zip(&cancer_latents.germline_posteriors)
                .filter(|(g, _)| g.iter().any(|&id| arena.get(id).contains(&alt_allele)))
                .map(|(_, &p)| p)
                .sum();
            if somatic_support > germline_support {
                let posterior = cancer_latents.model_posteriors.somatic * somatic_support;
                let cellularity = cancer_latents
                    .somatic_hypotheses
                    .iter()
                    .filter(|h| arena.get(h.somatic).contains(&alt_allele))
                    .map(|h| h.expected_cellularity * h.posterior)
                    .sum::<f64>()
                    / somatic_support.max(f64::MIN_POSITIVE);
                return Ok(CallKind::Somatic {
                    posterior,
                    cellularity,
                });
            }
            return Ok(CallKind::Germline);
        }
        Ok(CallKind::Germline)
    }

    /// Reference calls over the parts of `region` not covered by any
    /// called region, per the configured refcall mode.
    fn reference_calls_over(
        &self,
        region: &GenomicRegion,
        reads: &ReadMap,
        ploidy: u32,
        called_regions: &[GenomicRegion],
    ) -> Result<Vec<Call>> {
        let mut covered: Vec<GenomicRegion> = called_regions
            .iter()
            .filter(|r| r.same_contig(region) && r.overlaps(region))
            .cloned()
            .collect();
        covered.sort();
        let uncovered = intervening_regions(&covered, region);
        let mut result = Vec::new();
        for interval in uncovered {
            if interval.is_empty() {
                continue;
            }
            match self.params.refcall_type {
                RefCallType::None => {}
                RefCallType::Blocked => {
                    if let Some(call) = self.reference_call(&interval, reads, ploidy)? {
                        result.push(call);
                    }
                }
                RefCallType::Positional => {
                    for position in interval.begin()..interval.end() {
                        let point = GenomicRegion::new(
                            interval.contig().clone(),
                            position,
                            position + 1,
                        );
                        if let Some(call) = self.reference_call(&point, reads, ploidy)? {
                            result.push(call);
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// One homozygous-reference call over `region`, posterior from read
    /// agreement with the reference.
    fn reference_call(
        &self,
        region: &GenomicRegion,
        reads: &ReadMap,
        ploidy: u32,
    ) -> Result<Option<Call>> {
        let ref_sequence = self.reference.fetch(region)?;
        let ref_allele = Allele::new(region.clone(), ref_sequence);
        let mut genotype_calls = BTreeMap::new();
        let mut min_posterior = 1.0f64;
        for sample in &self.samples {
            let depth = reads
                .get(sample)
                .map(|rs| rs.iter().filter(|r| r.overlaps(region)).count())
                .unwrap_or(0);
            // each concordant read halves the residual error mass
            let posterior = 1.0 - 0.5f64.powi(depth.min(60) as i32).max(1e-10);
            min_posterior = min_posterior.min(posterior);
            let genotype = Genotype::new(vec![ref_allele.clone(); ploidy as usize]);
            genotype_calls.insert(
                sample.clone(),
                GenotypeCall {
                    genotype,
                    posterior,
                    phase: None,
                },
            );
        }
        if min_posterior < self.params.min_refcall_posterior {
            return Ok(None);
        }
        Ok(Some(Call {
            region: region.clone(),
            ref_allele,
            alt_allele: None,
            genotype_calls,
            quality: Phred::from_error_probability((1.0 - min_posterior).max(0.0)),
            model_posterior: None,
            kind: CallKind::Reference,
        }))
    }
}

/// The site-level `Genotype<Allele>` a haplotype genotype implies over a
/// region; haplotypes that cannot express an allele there become uncalled.
fn genotype_over_region(
    genotype: &Genotype<HaplotypeId>,
    arena: &HaplotypeArena,
    region: &GenomicRegion,
) -> Genotype<Allele> {
    Genotype::new(
        genotype
            .iter()
            .map(|&id| {
                arena
                    .get(id)
                    .allele_at(region)
                    .unwrap_or_else(|| Allele::new(region.clone(), vec![UNCALLED]))
            })
            .collect(),
    )
}

/// Haplotype posteriors marginalised over every sample's genotype
/// posterior; a haplotype's support is its best support in any sample.
fn marginal_haplotype_posteriors(
    posteriors: &GenotypePosteriors,
) -> BTreeMap<HaplotypeId, f64> {
    let mut result: BTreeMap<HaplotypeId, f64> = BTreeMap::new();
    for sample_posteriors in posteriors.by_sample.values() {
        for (genotype, &p) in sample_posteriors
            .genotypes
            .iter()
            .zip(&sample_posteriors.probabilities)
        {
            for &id in genotype.iter() {
                let entry = result.entry(id).or_insert(0.0);
                *entry += p;
            }
        }
    }
    // cap per-haplotype support at one
    for value in result.values_mut() {
        *value = value.min(1.0);
    }
    result
}

/// Keep the top haplotypes by marginal likelihood. An empty kept set is
/// returned only when every haplotype ties and the set exceeds the cap,
/// signalling the caller to rewind.
fn filter_to_n_haplotypes(
    haplotypes: &[(HaplotypeId, Arc<Haplotype>)],
    samples: &[SampleName],
    cache: &LikelihoodCache,
    max_haplotypes: usize,
) -> (
    Vec<(HaplotypeId, Arc<Haplotype>)>,
    Vec<(HaplotypeId, Arc<Haplotype>)>,
) {
    if haplotypes.len() <= max_haplotypes {
        return (haplotypes.to_vec(), Vec::new());
    }
    let mut scored: Vec<(f64, &(HaplotypeId, Arc<Haplotype>))> = haplotypes
        .iter()
        .map(|entry| {
            let score = samples
                .iter()
                .map(|s| cache.marginal_haplotype_likelihood(s, entry.0))
                .fold(f64::NEG_INFINITY, f64::max);
            (score, entry)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let best = scored.first().map(|(s, _)| *s).unwrap_or(f64::NEG_INFINITY);
    let worst = scored.last().map(|(s, _)| *s).unwrap_or(f64::NEG_INFINITY);
    if (best - worst).abs() < 1e-12 {
        return (Vec::new(), haplotypes.to_vec());
    }
    let kept = scored[..max_haplotypes]
        .iter()
        .map(|(_, entry)| (*entry).clone())
        .collect();
    let removed = scored[max_haplotypes..]
        .iter()
        .map(|(_, entry)| (*entry).clone())
        .collect();
    (kept, removed)
}

/// Phase annotations only mean something when the block links at least two
/// distinct candidate sites.
fn spans_multiple_sites(candidates: &[Variant], block: &GenomicRegion) -> bool {
    let mut first: Option<&GenomicRegion> = None;
    for candidate in candidates {
        if !candidate.region().same_contig(block) || !candidate.region().overlaps(block) {
            continue;
        }
        match first {
            None => first = Some(candidate.region()),
            Some(seen) => {
                if !seen.overlaps(candidate.region()) {
                    return true;
                }
            }
        }
    }
    false
}

fn has_passed(next_active_region: &GenomicRegion, active_region: &GenomicRegion) -> bool {
    next_active_region.same_contig(active_region)
        && next_active_region.is_after(active_region)
}

fn set_phasing(calls: &mut [Call], phase_set: &PhaseSet) {
    for call in calls.iter_mut() {
        if !phase_set.region.contains(&call.region) && !phase_set.region.overlaps(&call.region) {
            continue;
        }
        for (sample, score) in &phase_set.scores {
            call.set_phase(
                sample,
                PhaseCall {
                    region: phase_set.region.clone(),
                    score: *score,
                },
            );
        }
    }
}

fn record_called_regions(calls: &[Call], called_regions: &mut Vec<GenomicRegion>) {
    for call in calls {
        called_regions.push(call.region.clone());
    }
}
