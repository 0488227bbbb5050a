//! # Haplotype Generator
//!
//! Stateful enumerator over `(haplotype set, active region)` pairs for one
//! caller region. Each `progress()` advances the frontier through the
//! candidate set, expands the surviving haplotype lineages by the Cartesian
//! combination of the novel candidates' alleles, and returns the distinct
//! haplotypes spanning the new haplotype region.
//!
//! The generator never reproduces extensions of removed haplotypes: removal
//! prunes lineages, and subsequent expansions start from what is left.
//! `clear_progress` rewinds exactly one step, which the caller uses when
//! likelihood filtering ties out and a different frontier is needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::calling::walker::{
    IndicatorPolicy, TemplateIndex, Walker, WalkerConfig, WalkProposal,
};
use crate::data::haplotype::{HaplotypeArena, HaplotypeBuilder, HaplotypeId};
use crate::data::read::{max_read_length, ReadMap};
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::{Result, TernError};

/// Generator tuning; see the walker for the policy enums.
#[derive(Clone, Debug)]
pub struct HaplotypeGeneratorConfig {
    /// Hard bound on the haplotype set between filterings.
    pub max_haplotypes: usize,
    pub walker: WalkerConfig,
    /// Defer advancing past the current frontier until posterior filtering
    /// has pruned the set; disabling drops all indicator context.
    pub lag_enabled: bool,
}

impl Default for HaplotypeGeneratorConfig {
    fn default() -> Self {
        Self {
            max_haplotypes: 128,
            walker: WalkerConfig::default(),
            lag_enabled: true,
        }
    }
}

/// One surviving allele-assignment: the candidate indices carrying the
/// alternate allele. The concrete haplotype is rebuilt for each step's
/// haplotype region.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Lineage {
    alts: Vec<usize>,
    id: Option<HaplotypeId>,
}

#[derive(Clone, Debug)]
struct StepBackup {
    frontier: usize,
    lineages: Vec<Lineage>,
    active_region: Option<GenomicRegion>,
}

/// The stateful haplotype generator for one caller region.
pub struct HaplotypeGenerator {
    reference_region: GenomicRegion,
    reference_sequence: Arc<[u8]>,
    caller_region: GenomicRegion,
    candidates: Vec<Variant>,
    reads: ReadMap,
    templates: TemplateIndex,
    walker: Walker,
    config: HaplotypeGeneratorConfig,
    arena: HaplotypeArena,
    lineages: Vec<Lineage>,
    /// Index of the first candidate not yet enumerated.
    frontier: usize,
    /// Indicators may not reach left of this index.
    passed: usize,
    active_region: Option<GenomicRegion>,
    backup: Option<StepBackup>,
    flank_padding: u64,
}

impl HaplotypeGenerator {
    /// `reference_sequence` must cover `reference_region`, which must
    /// contain `caller_region` with enough flank for read-length padding.
    pub fn new(
        caller_region: GenomicRegion,
        reference_region: GenomicRegion,
        reference_sequence: Arc<[u8]>,
        candidates: Vec<Variant>,
        reads: ReadMap,
        config: HaplotypeGeneratorConfig,
    ) -> Result<Self> {
        if reference_region.len() as usize != reference_sequence.len() {
            return Err(TernError::internal(
                "HaplotypeGenerator::new",
                "reference window length mismatch",
            ));
        }
        if candidates
            .iter()
            .any(|c| !c.region().same_contig(&caller_region))
        {
            return Err(TernError::internal(
                "HaplotypeGenerator::new",
                "candidate crosses contig boundary",
            ));
        }
        let flank_padding = (max_read_length(&reads) as u64).max(16);
        let mut walker_config = config.walker.clone();
        if !config.lag_enabled {
            walker_config.indicator_policy = IndicatorPolicy::IncludeNone;
        }
        let templates = TemplateIndex::build(&reads);
        Ok(Self {
            reference_region,
            reference_sequence,
            caller_region,
            candidates,
            reads,
            templates,
            walker: Walker::new(walker_config),
            config,
            arena: HaplotypeArena::new(),
            lineages: vec![Lineage {
                alts: Vec::new(),
                id: None,
            }],
            frontier: 0,
            passed: 0,
            active_region: None,
            backup: None,
            flank_padding,
        })
    }

    pub fn arena(&self) -> &HaplotypeArena {
        &self.arena
    }

    /// How many novel candidates the budget admits for the current set:
    /// largest `n` with `2^n * existing <= max_haplotypes`.
    fn novel_budget(&self) -> usize {
        let existing = self.lineages.len().max(1);
        let mut n = 0usize;
        let mut capacity = existing;
        while capacity.saturating_mul(2) <= self.config.max_haplotypes && n < 16 {
            capacity *= 2;
            n += 1;
        }
        n
    }

    fn propose(&self) -> Option<WalkProposal> {
        self.walker.walk(
            &self.candidates,
            self.passed,
            self.frontier,
            &self.reads,
            &self.templates,
            self.novel_budget(),
        )
    }

    /// Pure query: the active region the next `progress()` would choose.
    /// Past the last candidate this is the empty region at the caller
    /// region's end.
    pub fn tell_next_active_region(&self) -> GenomicRegion {
        match self.propose() {
            Some(p) => p.active_region,
            None => self.caller_region.tail().expand_rhs(1),
        }
    }

    /// Produce the next `(haplotypes, active_region)` pair. An empty
    /// haplotype set means the caller region is exhausted.
    pub fn progress(&mut self) -> Result<(Vec<(HaplotypeId, Arc<crate::data::haplotype::Haplotype>)>, GenomicRegion)> {
        let Some(proposal) = self.propose() else {
            // budget saturated with candidates left: hand the current set
            // back and let the caller remove before progressing
            if self.frontier < self.candidates.len() && self.novel_budget() == 0 {
                if let Some(active) = self.active_region.clone() {
                    let haplotypes = self.current_haplotypes();
                    return Ok((haplotypes, active));
                }
            }
            return Ok((Vec::new(), self.caller_region.tail().expand_rhs(1)));
        };

        self.backup = Some(StepBackup {
            frontier: self.frontier,
            lineages: self.lineages.clone(),
            active_region: self.active_region.clone(),
        });

        let haplotype_region = self.haplotype_region_for(&proposal.active_region);

        // drop alt assignments that fell out of the haplotype region
        for lineage in &mut self.lineages {
            lineage
                .alts
                .retain(|&i| self.candidates[i].region().overlaps(&haplotype_region));
            lineage.id = None;
        }
        dedup_lineages(&mut self.lineages);

        // Cartesian expansion over the novel candidates
        let novel: Vec<usize> = (self.frontier..proposal.novel_end).collect();
        let mut expanded: Vec<Lineage> = Vec::with_capacity(self.lineages.len() << novel.len());
        for lineage in &self.lineages {
            for mask in 0u32..(1 << novel.len()) {
                let mut alts = lineage.alts.clone();
                for (bit, &candidate_index) in novel.iter().enumerate() {
                    if mask & (1 << bit) != 0 {
                        alts.push(candidate_index);
                    }
                }
                if alleles_compatible(&self.candidates, &alts) {
                    expanded.push(Lineage { alts, id: None });
                }
            }
        }
        dedup_lineages(&mut expanded);
        self.lineages = expanded;

        // realise the distinct haplotypes
        let haplotypes = self.build_haplotypes(&haplotype_region)?;

        self.frontier = proposal.novel_end;
        self.active_region = Some(proposal.active_region.clone());
        Ok((haplotypes, proposal.active_region))
    }

    /// Remove lineages realising any of the given haplotypes; their
    /// extensions are never enumerated again.
    pub fn remove(&mut self, ids: &[HaplotypeId]) {
        if ids.is_empty() {
            return;
        }
        self.lineages
            .retain(|l| l.id.map_or(true, |id| !ids.contains(&id)));
        if self.lineages.is_empty() {
            // keep the reference lineage so progress can continue
            self.lineages.push(Lineage {
                alts: Vec::new(),
                id: None,
            });
        }
    }

    /// Keep only lineages realising the given haplotypes (and thereby
    /// their descendants).
    pub fn uniquely_keep(&mut self, ids: &[HaplotypeId]) {
        self.lineages
            .retain(|l| l.id.map_or(false, |id| ids.contains(&id)));
        if self.lineages.is_empty() {
            self.lineages.push(Lineage {
                alts: Vec::new(),
                id: None,
            });
        }
    }

    /// Commit forward past `region`: candidates left of it become passed
    /// and can no longer serve as indicators, even under lagging.
    pub fn force_forward(&mut self, region: &GenomicRegion) {
        while self.passed < self.candidates.len()
            && self.candidates[self.passed].region().end() <= region.begin()
        {
            self.passed += 1;
        }
        if self.frontier < self.passed {
            self.frontier = self.passed;
        }
        self.backup = None;
    }

    /// Drop passed candidates left of `boundary` from indicator reach.
    pub fn remove_passed(&mut self, boundary: &GenomicRegion) {
        while self.passed < self.candidates.len().min(self.frontier)
            && self.candidates[self.passed].region().end() <= boundary.begin()
        {
            self.passed += 1;
        }
    }

    /// Rewind the last `progress()` without losing global state.
    pub fn clear_progress(&mut self) {
        if let Some(backup) = self.backup.take() {
            self.frontier = backup.frontier;
            self.lineages = backup.lineages;
            self.active_region = backup.active_region;
        }
    }

    fn haplotype_region_for(&self, active_region: &GenomicRegion) -> GenomicRegion {
        let padded = active_region.expand(self.flank_padding);
        padded.overlapped(&self.reference_region)
    }

    fn reference_window(&self, region: &GenomicRegion) -> Arc<[u8]> {
        let begin = (region.begin() - self.reference_region.begin()) as usize;
        let end = (region.end() - self.reference_region.begin()) as usize;
        self.reference_sequence[begin..end].to_vec().into()
    }

    fn build_haplotypes(
        &mut self,
        haplotype_region: &GenomicRegion,
    ) -> Result<Vec<(HaplotypeId, Arc<crate::data::haplotype::Haplotype>)>> {
        let window = self.reference_window(haplotype_region);
        let mut seen: HashMap<HaplotypeId, ()> = HashMap::new();
        let mut result = Vec::new();
        for lineage in &mut self.lineages {
            let mut builder = HaplotypeBuilder::new(haplotype_region.clone(), Arc::clone(&window));
            for &candidate_index in &lineage.alts {
                let candidate = &self.candidates[candidate_index];
                if haplotype_region.contains(candidate.region()) {
                    builder.push(candidate.alt_allele());
                }
            }
            let haplotype = builder.build();
            let id = self.arena.intern(haplotype);
            lineage.id = Some(id);
            if seen.insert(id, ()).is_none() {
                result.push((id, self.arena.get_arc(id)));
            }
        }
        if result.len() > self.config.max_haplotypes {
            // the Cartesian budget bounds this; over-running it is a bug
            return Err(TernError::internal(
                "HaplotypeGenerator::build_haplotypes",
                format!(
                    "{} haplotypes exceed budget {}",
                    result.len(),
                    self.config.max_haplotypes
                ),
            ));
        }
        Ok(result)
    }

    fn current_haplotypes(
        &self,
    ) -> Vec<(HaplotypeId, Arc<crate::data::haplotype::Haplotype>)> {
        let mut seen = Vec::new();
        let mut result = Vec::new();
        for lineage in &self.lineages {
            if let Some(id) = lineage.id {
                if !seen.contains(&id) {
                    seen.push(id);
                    result.push((id, self.arena.get_arc(id)));
                }
            }
        }
        result
    }
}

/// A lineage is viable when its chosen alt alleles can tile one haplotype:
/// no two alts at the same region, and no two alts claiming the same
/// reference bases. An insertion may sit at the boundary of a neighbour.
fn alleles_compatible(candidates: &[Variant], alts: &[usize]) -> bool {
    for window in alts.windows(2) {
        let a = candidates[window[0]].region();
        let b = candidates[window[1]].region();
        if a == b {
            return false;
        }
        if !a.is_empty() && !b.is_empty() && a.overlaps(b) {
            return false;
        }
        // an insertion strictly inside another allele's bases cannot tile
        if a.is_empty() != b.is_empty() {
            let (point, span) = if a.is_empty() { (a, b) } else { (b, a) };
            if span.begin() < point.begin() && point.begin() < span.end() {
                return false;
            }
        }
    }
    true
}

fn dedup_lineages(lineages: &mut Vec<Lineage>) {
    lineages.sort_by(|a, b| a.alts.cmp(&b.alts));
    lineages.dedup_by(|a, b| a.alts == b.alts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{AlignedRead, CigarOp, CigarOpKind};

    fn snv(begin: u64, alt: u8) -> Variant {
        Variant::new(
            GenomicRegion::new("chr1", begin, begin + 1),
            b"A".to_vec(),
            vec![alt],
        )
    }

    fn read(begin: u64, len: u32) -> AlignedRead {
        AlignedRead::new(
            format!("r{begin}"),
            "chr1",
            begin,
            60,
            vec![CigarOp::new(CigarOpKind::Match, len)],
            vec![b'A'; len as usize],
            vec![30; len as usize],
            false,
            true,
        )
    }

    fn make_generator(
        candidates: Vec<Variant>,
        max_haplotypes: usize,
    ) -> HaplotypeGenerator {
        let region = GenomicRegion::new("chr1", 0, 100);
        let reference: Arc<[u8]> = vec![b'A'; 100].into();
        let mut reads = ReadMap::new();
        reads.insert("s1".into(), vec![read(0, 50), read(40, 50)]);
        HaplotypeGenerator::new(
            region.clone(),
            region,
            reference,
            candidates,
            reads,
            HaplotypeGeneratorConfig {
                max_haplotypes,
                ..HaplotypeGeneratorConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_progress_enumerates_combinations() {
        let mut generator = make_generator(vec![snv(10, b'C'), snv(20, b'G')], 16);
        let (haplotypes, active) = generator.progress().unwrap();
        // both candidates fit one step: 2^2 combinations
        assert_eq!(haplotypes.len(), 4);
        assert_eq!(active, GenomicRegion::new("chr1", 10, 21));
    }

    #[test]
    fn test_budget_bounds_set_size() {
        let candidates: Vec<Variant> =
            (0..6).map(|i| snv(10 + 2 * i, b'C')).collect();
        let mut generator = make_generator(candidates, 8);
        let (haplotypes, _) = generator.progress().unwrap();
        assert!(haplotypes.len() <= 8);
        // further progress still bounded
        let (haplotypes, _) = generator.progress().unwrap();
        assert!(haplotypes.len() <= 8);
    }

    #[test]
    fn test_exhaustion_returns_empty() {
        let mut generator = make_generator(vec![snv(10, b'C')], 16);
        let (h1, _) = generator.progress().unwrap();
        assert!(!h1.is_empty());
        let (h2, region) = generator.progress().unwrap();
        assert!(h2.is_empty());
        assert!(region.is_after(&GenomicRegion::new("chr1", 0, 100)));
    }

    #[test]
    fn test_remove_prunes_extensions() {
        let mut generator = make_generator(vec![snv(10, b'C'), snv(60, b'G')], 16);
        let (haplotypes, _) = generator.progress().unwrap();
        assert_eq!(haplotypes.len(), 2);
        // remove the alt-carrying haplotype at the first site
        let removed: Vec<HaplotypeId> = haplotypes
            .iter()
            .filter(|(_, h)| h.sequence().contains(&b'C'))
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(removed.len(), 1);
        generator.remove(&removed);
        let (haplotypes, _) = generator.progress().unwrap();
        // second site expands only from the surviving reference lineage
        assert_eq!(haplotypes.len(), 2);
        for (_, h) in &haplotypes {
            assert!(!h.sequence().contains(&b'C'));
        }
    }

    #[test]
    fn test_clear_progress_rewinds_one_step() {
        let mut generator = make_generator(vec![snv(10, b'C'), snv(60, b'G')], 16);
        let (_, first_active) = generator.progress().unwrap();
        let next_before = generator.tell_next_active_region();
        generator.clear_progress();
        let (_, replay_active) = generator.progress().unwrap();
        assert_eq!(first_active, replay_active);
        assert_eq!(next_before, generator.tell_next_active_region());
    }

    #[test]
    fn test_tell_next_matches_progress() {
        let mut generator = make_generator(vec![snv(10, b'C')], 16);
        let told = generator.tell_next_active_region();
        let (_, actual) = generator.progress().unwrap();
        assert_eq!(told, actual);
    }

    #[test]
    fn test_overlapping_alts_not_combined() {
        // two alts over the same region cannot share a haplotype
        let a = Variant::new(
            GenomicRegion::new("chr1", 10, 11),
            b"A".to_vec(),
            b"C".to_vec(),
        );
        let b = Variant::new(
            GenomicRegion::new("chr1", 10, 11),
            b"A".to_vec(),
            b"G".to_vec(),
        );
        let mut generator = make_generator(vec![a, b], 16);
        let (haplotypes, _) = generator.progress().unwrap();
        // ref, alt-C, alt-G; never C+G together
        assert_eq!(haplotypes.len(), 3);
    }
}
