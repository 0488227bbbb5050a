//! # Record Factory
//!
//! Turns calls into a flat, VCF-compatible record stream. Four passes, each
//! a stable in-place rewrite:
//!
//! 1. indel genotype resolution (strip inserted bases leaked into adjacent
//!    non-insertion alleles),
//! 2. parsimony and left padding (every record gets a non-empty anchored
//!    REF; padding shifts extend the phase region),
//! 3. block merging (same-position calls collapse into one multi-allelic
//!    record),
//! 4. spanning-deletion marking (calls nested in a called deletion show
//!    `*` for the deleted samples).
//!
//! Output is sorted by (contig order, begin, end, ref, alt) and never
//! contains two records with equal keys.

use std::collections::BTreeMap;

use crate::calling::calls::{Call, CallKind};
use crate::data::allele::SPANNING_DELETION;
use crate::data::read::{ReadMap, SampleName};
use crate::data::region::{ContigOrder, GenomicRegion};
use crate::error::{Result, TernError};
use crate::io::fasta::ReferenceProvider;
use crate::io::vcf::{RecordInfo, SampleRecord, VcfRecord};

/// Compatibility caps on emitted qualities.
pub const MAX_QUAL: f64 = 5000.0;
pub const MAX_GQ: u32 = 999;

/// The record factory for one caller's output.
pub struct RecordFactory<'a> {
    reference: &'a dyn ReferenceProvider,
    contig_order: ContigOrder,
    samples: Vec<SampleName>,
}

/// Intermediate per-sample representation while resolving.
#[derive(Clone, Debug)]
struct DraftSample {
    /// One sequence per haplotype slot; `None` is uncalled.
    alleles: Vec<Option<Vec<u8>>>,
    posterior: f64,
    phase: Option<(GenomicRegion, f64)>,
}

#[derive(Clone, Debug)]
struct DraftRecord {
    region: GenomicRegion,
    ref_sequence: Vec<u8>,
    alt_sequences: Vec<Vec<u8>>,
    quality: f64,
    model_posterior: Option<f64>,
    denovo_posterior: Option<f64>,
    somatic: bool,
    samples: BTreeMap<SampleName, DraftSample>,
    is_reference: bool,
}

impl<'a> RecordFactory<'a> {
    pub fn new(reference: &'a dyn ReferenceProvider, samples: Vec<SampleName>) -> Self {
        Self {
            reference,
            contig_order: reference.contig_order(),
            samples,
        }
    }

    /// Resolve a batch of calls into output records. `reads` provides the
    /// depth and quality summaries for INFO/FORMAT fields.
    pub fn make(&self, calls: Vec<Call>, reads: &ReadMap) -> Result<Vec<VcfRecord>> {
        let mut drafts: Vec<DraftRecord> = calls
            .into_iter()
            .map(|c| self.draft_from_call(c))
            .collect::<Result<_>>()?;
        drafts.sort_by(|a, b| self.contig_order.compare(&a.region, &b.region));

        self.resolve_indel_genotypes(&mut drafts)?;
        self.parsimonise_and_pad(&mut drafts)?;
        drafts.sort_by(|a, b| self.contig_order.compare(&a.region, &b.region));
        let mut drafts = self.merge_blocks(drafts);
        self.mark_spanning_deletions(&mut drafts);
        normalise_alt_lists(&mut drafts);

        drafts.sort_by(|a, b| {
            self.contig_order
                .compare(&a.region, &b.region)
                .then_with(|| a.ref_sequence.cmp(&b.ref_sequence))
                .then_with(|| a.alt_sequences.cmp(&b.alt_sequences))
        });
        drafts.dedup_by(|a, b| {
            a.region == b.region
                && a.ref_sequence == b.ref_sequence
                && a.alt_sequences == b.alt_sequences
        });

        Ok(drafts
            .into_iter()
            .map(|d| self.render(d, reads))
            .collect())
    }

    fn draft_from_call(&self, call: Call) -> Result<DraftRecord> {
        let mut samples = BTreeMap::new();
        for (sample, genotype_call) in &call.genotype_calls {
            let alleles = genotype_call
                .genotype
                .iter()
                .map(|a| {
                    if a.is_uncalled() {
                        None
                    } else {
                        Some(a.sequence().to_vec())
                    }
                })
                .collect();
            samples.insert(
                sample.clone(),
                DraftSample {
                    alleles,
                    posterior: genotype_call.posterior,
                    phase: genotype_call
                        .phase
                        .as_ref()
                        .map(|p| (p.region.clone(), p.score.score())),
                },
            );
        }
        let (denovo_posterior, somatic) = match call.kind {
            CallKind::Denovo { posterior } | CallKind::DenovoReferenceReversion { posterior } => {
                (Some(posterior), false)
            }
            CallKind::Somatic { .. } => (None, true),
            _ => (None, false),
        };
        let alt_sequences = call
            .alt_allele
            .as_ref()
            .map(|a| vec![a.sequence().to_vec()])
            .unwrap_or_default();
        Ok(DraftRecord {
            region: call.region.clone(),
            ref_sequence: call.ref_allele.sequence().to_vec(),
            alt_sequences,
            quality: call.quality.score(),
            model_posterior: call.model_posterior,
            denovo_posterior,
            somatic,
            samples,
            is_reference: call.is_reference(),
        })
    }

    /// Pass 1: for every insertion record, strip the inserted sequence out
    /// of adjacent records' slot alleles that absorbed it.
    fn resolve_indel_genotypes(&self, drafts: &mut [DraftRecord]) -> Result<()> {
        let insertions: Vec<(usize, GenomicRegion, BTreeMap<SampleName, Vec<Option<Vec<u8>>>>)> =
            drafts
                .iter()
                .enumerate()
                .filter(|(_, d)| d.region.is_empty() && !d.is_reference)
                .map(|(i, d)| {
                    let genotype = d
                        .samples
                        .iter()
                        .map(|(s, ds)| (s.clone(), ds.alleles.clone()))
                        .collect();
                    (i, d.region.clone(), genotype)
                })
                .collect();
        for (index, insertion_region, insertion_genotypes) in insertions {
            for j in 0..drafts.len() {
                if j == index || !drafts[j].region.is_adjacent(&insertion_region) {
                    continue;
                }
                let strip_at_end = drafts[j].region.end() == insertion_region.begin();
                let region_len = drafts[j].region.len() as usize;
                for (sample, insertion_alleles) in &insertion_genotypes {
                    let Some(target) = drafts[j].samples.get_mut(sample) else {
                        continue;
                    };
                    // genotypes are canonical multisets, so absorbed bases
                    // are matched by sequence rather than by slot
                    let mut inserted_sequences: Vec<&Vec<u8>> = insertion_alleles
                        .iter()
                        .flatten()
                        .filter(|seq| {
                            !seq.is_empty() && !seq.contains(&SPANNING_DELETION)
                        })
                        .collect();
                    inserted_sequences.sort_by_key(|seq| std::cmp::Reverse(seq.len()));
                    for sequence in target.alleles.iter_mut().flatten() {
                        if sequence.len() <= region_len {
                            continue;
                        }
                        let absorbed = inserted_sequences.iter().find(|inserted| {
                            if strip_at_end {
                                sequence.ends_with(inserted)
                            } else {
                                sequence.starts_with(inserted.as_slice())
                            }
                        });
                        let Some(inserted) = absorbed else { continue };
                        if sequence.len() <= inserted.len() {
                            return Err(TernError::internal(
                                "RecordFactory::resolve_indel_genotypes",
                                format!(
                                    "inconsistent insertion alleles in sample {sample}: \
                                     {:?} cannot contain {:?}",
                                    String::from_utf8_lossy(sequence),
                                    String::from_utf8_lossy(inserted)
                                ),
                            ));
                        }
                        if strip_at_end {
                            sequence.truncate(sequence.len() - inserted.len());
                        } else {
                            sequence.drain(..inserted.len());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Pass 2: anchor every record with a non-empty REF, padding indels
    /// with the preceding reference base.
    fn parsimonise_and_pad(&self, drafts: &mut [DraftRecord]) -> Result<()> {
        for draft in drafts.iter_mut() {
            let needs_pad = draft.ref_sequence.is_empty()
                || draft
                    .alt_sequences
                    .iter()
                    .any(Vec::is_empty)
                || draft.samples.values().any(|s| {
                    s.alleles
                        .iter()
                        .any(|a| a.as_ref().is_some_and(|seq| seq.is_empty()))
                });
            if !needs_pad {
                continue;
            }
            if draft.region.begin() == 0 {
                return Err(TernError::input(
                    "cannot left-pad an indel at the start of a contig",
                ));
            }
            let pad_region = GenomicRegion::new(
                draft.region.contig().clone(),
                draft.region.begin() - 1,
                draft.region.begin(),
            );
            let pad = self.reference.fetch(&pad_region)?;
            let pad_base = pad[0];
            draft.region = GenomicRegion::new(
                draft.region.contig().clone(),
                draft.region.begin() - 1,
                draft.region.end(),
            );
            draft.ref_sequence.insert(0, pad_base);
            for alt in &mut draft.alt_sequences {
                if !alt.contains(&SPANNING_DELETION) {
                    alt.insert(0, pad_base);
                }
            }
            for sample in draft.samples.values_mut() {
                for allele in sample.alleles.iter_mut().flatten() {
                    if !allele.contains(&SPANNING_DELETION) {
                        allele.insert(0, pad_base);
                    }
                }
                // keep the phase block covering the shifted record
                if let Some((phase_region, _)) = &mut sample.phase {
                    if phase_region.begin() == draft.region.begin() + 1 {
                        *phase_region = phase_region.expand_lhs(1);
                    }
                }
            }
        }
        Ok(())
    }

    /// Pass 3: merge records starting at the same position into one
    /// multi-allelic record.
    fn merge_blocks(&self, drafts: Vec<DraftRecord>) -> Vec<DraftRecord> {
        let mut result: Vec<DraftRecord> = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mergeable = result.last().is_some_and(|last: &DraftRecord| {
                last.region.contig() == draft.region.contig()
                    && last.region.begin() == draft.region.begin()
                    && !last.is_reference
                    && !draft.is_reference
            });
            if !mergeable {
                result.push(draft);
                continue;
            }
            let last = result.last_mut().expect("non-empty");
            merge_into(last, draft);
        }
        result
    }

    /// Pass 4: replace sample alleles nested inside an already-emitted
    /// deletion with the `*` sentinel.
    fn mark_spanning_deletions(&self, drafts: &mut [DraftRecord]) {
        // deleted spans per sample, from deletion records seen so far
        let mut deleted_spans: BTreeMap<SampleName, Vec<GenomicRegion>> = BTreeMap::new();
        for draft in drafts.iter_mut() {
            let region = draft.region.clone();
            // mark nested calls first, then record this draft's deletions
            for (sample, spans) in &deleted_spans {
                if !spans.iter().any(|s| s.contains(&region) && *s != region) {
                    continue;
                }
                if let Some(sample_draft) = draft.samples.get_mut(sample) {
                    for allele in sample_draft.alleles.iter_mut().flatten() {
                        *allele = vec![SPANNING_DELETION];
                    }
                }
            }
            for (sample, sample_draft) in &draft.samples {
                let ref_len = draft.ref_sequence.len() as u64;
                for allele in sample_draft.alleles.iter().flatten() {
                    if allele.contains(&SPANNING_DELETION) {
                        continue;
                    }
                    if (allele.len() as u64) < ref_len {
                        // bases after the anchored prefix are deleted
                        let deleted_begin = region.begin() + allele.len() as u64;
                        let span = GenomicRegion::new(
                            region.contig().clone(),
                            deleted_begin,
                            region.end(),
                        );
                        deleted_spans.entry(sample.clone()).or_default().push(span);
                    }
                }
            }
        }
    }

    fn render(&self, draft: DraftRecord, reads: &ReadMap) -> VcfRecord {
        let region = draft.region.clone();
        let mut alt_alleles: Vec<String> = draft
            .alt_sequences
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        if draft.is_reference {
            alt_alleles.clear();
        }

        let info = info_stats(&region, reads, &draft);
        let mut samples = Vec::with_capacity(self.samples.len());
        for sample in &self.samples {
            samples.push(match draft.samples.get(sample) {
                Some(ds) => {
                    let mut genotype: Vec<Option<usize>> = ds
                        .alleles
                        .iter()
                        .map(|a| {
                            a.as_ref().map(|seq| {
                                allele_index(&draft.ref_sequence, &draft.alt_sequences, seq)
                            })
                        })
                        .collect();
                    if ds.phase.is_none() {
                        // unphased genotypes list allele indices low to high
                        genotype.sort_by_key(|g| (g.is_none(), g.unwrap_or(0)));
                    }
                    let gq = (phred_from_posterior(ds.posterior) as u32).min(MAX_GQ);
                    let (dp, bq, mq) = sample_stats(&region, reads.get(sample));
                    SampleRecord {
                        genotype,
                        phased: ds.phase.is_some(),
                        gq: Some(gq),
                        dp,
                        bq,
                        mq,
                        ps: ds.phase.as_ref().map(|(r, _)| r.begin() + 1),
                        pq: ds.phase.as_ref().map(|(_, s)| (*s).round() as u32),
                    }
                }
                None => SampleRecord {
                    genotype: vec![None],
                    phased: false,
                    gq: None,
                    dp: 0,
                    bq: 0,
                    mq: 0,
                    ps: None,
                    pq: None,
                },
            });
        }

        VcfRecord {
            contig: region.contig().clone(),
            position: region.begin(),
            ref_allele: String::from_utf8_lossy(&draft.ref_sequence).into_owned(),
            alt_alleles,
            qual: Some(draft.quality.min(MAX_QUAL)),
            filter: "PASS".to_string(),
            info,
            samples,
        }
    }
}

/// Any sample allele missing from a draft's ALT list (including `*`) is
/// appended so allele indices resolve.
fn normalise_alt_lists(drafts: &mut [DraftRecord]) {
    for draft in drafts {
        if draft.is_reference {
            continue;
        }
        let mut extra: Vec<Vec<u8>> = Vec::new();
        for sample in draft.samples.values() {
            for allele in sample.alleles.iter().flatten() {
                if allele != &draft.ref_sequence
                    && !draft.alt_sequences.contains(allele)
                    && !extra.contains(allele)
                {
                    extra.push(allele.clone());
                }
            }
        }
        draft.alt_sequences.extend(extra);
        draft.alt_sequences.sort();
        draft.alt_sequences.dedup();
    }
}

fn merge_into(target: &mut DraftRecord, other: DraftRecord) {
    // extend the shorter REF with reference suffix from the longer
    if other.ref_sequence.len() > target.ref_sequence.len() {
        let suffix = other.ref_sequence[target.ref_sequence.len()..].to_vec();
        for alt in &mut target.alt_sequences {
            if !alt.contains(&SPANNING_DELETION) {
                alt.extend_from_slice(&suffix);
            }
        }
        for sample in target.samples.values_mut() {
            for allele in sample.alleles.iter_mut().flatten() {
                if !allele.contains(&SPANNING_DELETION) {
                    allele.extend_from_slice(&suffix);
                }
            }
        }
        target.ref_sequence = other.ref_sequence.clone();
        target.region = target.region.encompassing(&other.region);
    }
    let suffix_for_other = if target.ref_sequence.len() > other.ref_sequence.len() {
        target.ref_sequence[other.ref_sequence.len()..].to_vec()
    } else {
        Vec::new()
    };
    for alt in other.alt_sequences {
        let mut alt = alt;
        if !alt.contains(&SPANNING_DELETION) {
            alt.extend_from_slice(&suffix_for_other);
        }
        if !target.alt_sequences.contains(&alt) {
            target.alt_sequences.push(alt);
        }
    }
    target.alt_sequences.sort();
    target.alt_sequences.dedup();
    // merge sample columns: non-reference assertions win
    for (sample, mut other_sample) in other.samples {
        for allele in other_sample.alleles.iter_mut().flatten() {
            if !allele.contains(&SPANNING_DELETION) && !suffix_for_other.is_empty() {
                allele.extend_from_slice(&suffix_for_other);
            }
        }
        match target.samples.get_mut(&sample) {
            None => {
                target.samples.insert(sample, other_sample);
            }
            Some(existing) => {
                for (slot, allele) in other_sample.alleles.iter().enumerate() {
                    let Some(allele) = allele else { continue };
                    if *allele == target.ref_sequence {
                        continue;
                    }
                    if let Some(existing_slot) = existing.alleles.get_mut(slot) {
                        match existing_slot {
                            Some(seq) if *seq != target.ref_sequence => {}
                            _ => *existing_slot = Some(allele.clone()),
                        }
                    }
                }
                existing.posterior = existing.posterior.min(other_sample.posterior);
                if existing.phase.is_none() {
                    existing.phase = other_sample.phase;
                }
            }
        }
    }
    target.quality = target.quality.max(other.quality);
    target.somatic |= other.somatic;
    target.denovo_posterior = match (target.denovo_posterior, other.denovo_posterior) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    target.model_posterior = match (target.model_posterior, other.model_posterior) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
}

fn allele_index(ref_sequence: &[u8], alt_sequences: &[Vec<u8>], allele: &[u8]) -> usize {
    if allele == ref_sequence {
        return 0;
    }
    alt_sequences
        .iter()
        .position(|a| a.as_slice() == allele)
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn phred_from_posterior(posterior: f64) -> f64 {
    crate::data::phred::Phred::from_error_probability((1.0 - posterior).max(0.0)).score()
}

fn info_stats(region: &GenomicRegion, reads: &ReadMap, draft: &DraftRecord) -> RecordInfo {
    let mut dp = 0u32;
    let mut ns = 0u32;
    let mut forward = 0u32;
    let mut mq_sum_sq = 0.0f64;
    let mut mq0 = 0u32;
    let mut base_qualities: Vec<u32> = Vec::new();
    for sample_reads in reads.values() {
        let overlapping: Vec<_> = sample_reads
            .iter()
            .filter(|r| r.overlaps(region))
            .collect();
        if !overlapping.is_empty() {
            ns += 1;
        }
        for read in overlapping {
            dp += 1;
            if !read.is_reverse() {
                forward += 1;
            }
            if read.mapq() == 0 {
                mq0 += 1;
            }
            mq_sum_sq += f64::from(read.mapq()) * f64::from(read.mapq());
            base_qualities.push(read.mean_base_quality().round() as u32);
        }
    }
    base_qualities.sort_unstable();
    let bq = base_qualities
        .get(base_qualities.len() / 2)
        .copied()
        .unwrap_or(0);
    RecordInfo {
        ns,
        dp,
        sb: if dp > 0 {
            f64::from(forward) / f64::from(dp)
        } else {
            0.5
        },
        bq,
        mq: if dp > 0 { (mq_sum_sq / f64::from(dp)).sqrt() } else { 0.0 },
        mq0,
        mp: draft.model_posterior,
        dnp: draft.denovo_posterior,
        somatic: draft.somatic,
    }
}

fn sample_stats(
    region: &GenomicRegion,
    reads: Option<&Vec<crate::data::read::AlignedRead>>,
) -> (u32, u32, u32) {
    let Some(reads) = reads else { return (0, 0, 0) };
    let overlapping: Vec<_> = reads.iter().filter(|r| r.overlaps(region)).collect();
    let dp = overlapping.len() as u32;
    if dp == 0 {
        return (0, 0, 0);
    }
    let mut bqs: Vec<u32> = overlapping
        .iter()
        .map(|r| r.mean_base_quality().round() as u32)
        .collect();
    bqs.sort_unstable();
    let bq = bqs[bqs.len() / 2];
    let mq_sum_sq: f64 = overlapping
        .iter()
        .map(|r| f64::from(r.mapq()) * f64::from(r.mapq()))
        .sum();
    let mq = (mq_sum_sq / f64::from(dp)).sqrt().round() as u32;
    (dp, bq, mq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::allele::Allele;
    use crate::data::genotype::{Genotype, GenotypeCall};
    use crate::data::phred::Phred;
    use crate::io::fasta::InMemoryReference;

    fn region(begin: u64, end: u64) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    fn reference() -> InMemoryReference {
        // 0-based: position 10 is 'G'
        InMemoryReference::new(vec![("chr1", b"ACGTACGTACGTACGTACGT")])
    }

    fn genotype_call(alleles: Vec<&[u8]>, posterior: f64) -> GenotypeCall {
        GenotypeCall {
            genotype: Genotype::new(
                alleles
                    .into_iter()
                    .map(|a| Allele::new(region(0, 0), a.to_vec()))
                    .collect(),
            ),
            posterior,
            phase: None,
        }
    }

    fn snv_call(begin: u64, ref_base: &[u8], alt_base: &[u8]) -> Call {
        let r = region(begin, begin + 1);
        Call {
            region: r.clone(),
            ref_allele: Allele::new(r.clone(), ref_base.to_vec()),
            alt_allele: Some(Allele::new(r, alt_base.to_vec())),
            genotype_calls: BTreeMap::from([(
                SampleName::from("s1"),
                genotype_call(vec![ref_base, alt_base], 0.99),
            )]),
            quality: Phred::from_score(50.0),
            model_posterior: None,
            kind: CallKind::Germline,
        }
    }

    #[test]
    fn test_insertion_is_left_padded() {
        let reference = reference();
        let factory = RecordFactory::new(&reference, vec!["s1".into()]);
        // insertion of "TT" at position 10 (preceding base is 'C' at 9)
        let r = region(10, 10);
        let call = Call {
            region: r.clone(),
            ref_allele: Allele::new(r.clone(), Vec::new()),
            alt_allele: Some(Allele::new(r.clone(), b"TT".to_vec())),
            genotype_calls: BTreeMap::from([(
                SampleName::from("s1"),
                genotype_call(vec![b"", b"TT"], 0.95),
            )]),
            quality: Phred::from_score(40.0),
            model_posterior: None,
            kind: CallKind::Germline,
        };
        let records = factory.make(vec![call], &ReadMap::new()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.position, 9);
        // anchor base is the reference base left of the insertion point
        assert_eq!(record.ref_allele, "C");
        assert_eq!(record.alt_alleles, vec!["CTT".to_string()]);
        // anchored and non-empty on both sides
        assert!(!record.ref_allele.is_empty());
        assert_eq!(record.ref_allele.as_bytes()[0], record.alt_alleles[0].as_bytes()[0]);
    }

    #[test]
    fn test_same_position_calls_merge_multiallelic() {
        let reference = reference();
        let factory = RecordFactory::new(&reference, vec!["s1".into()]);
        let a = snv_call(10, b"G", b"A");
        let b = snv_call(10, b"G", b"C");
        let records = factory.make(vec![a, b], &ReadMap::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].alt_alleles, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_spanning_deletion_marks_nested_site() {
        let reference = reference();
        let factory = RecordFactory::new(&reference, vec!["sampleA".into(), "sampleB".into()]);
        // 4-base deletion in sample A over [8, 12); SNV in sample B at 10
        let del_region = region(8, 12);
        let del = Call {
            region: del_region.clone(),
            ref_allele: Allele::new(del_region.clone(), b"ACGT".to_vec()),
            alt_allele: Some(Allele::new(del_region.clone(), b"A".to_vec())),
            genotype_calls: BTreeMap::from([(
                SampleName::from("sampleA"),
                genotype_call(vec![b"A", b"A"], 0.98),
            )]),
            quality: Phred::from_score(60.0),
            model_posterior: None,
            kind: CallKind::Germline,
        };
        let mut snv = snv_call(10, b"G", b"T");
        snv.genotype_calls = BTreeMap::from([(
            SampleName::from("sampleB"),
            genotype_call(vec![b"G", b"T"], 0.97),
        ),(
            SampleName::from("sampleA"),
            genotype_call(vec![b"G", b"G"], 0.6),
        )]);
        let records = factory.make(vec![del, snv], &ReadMap::new()).unwrap();
        assert_eq!(records.len(), 2);
        let snv_record = records
            .iter()
            .find(|r| r.position == 10)
            .expect("nested SNV record");
        // sample A (first column) sits inside its own deletion
        let star_index = snv_record
            .alt_alleles
            .iter()
            .position(|a| a == "*")
            .map(|i| i + 1)
            .expect("star allele in ALT");
        assert!(snv_record.samples[0]
            .genotype
            .iter()
            .all(|g| *g == Some(star_index)));
        // sample B keeps the real genotype
        assert!(snv_record.samples[1].genotype.contains(&Some(0)));
    }

    #[test]
    fn test_output_sorted_and_deduplicated() {
        let reference = reference();
        let factory = RecordFactory::new(&reference, vec!["s1".into()]);
        let calls = vec![snv_call(12, b"A", b"T"), snv_call(4, b"A", b"T"), snv_call(12, b"A", b"T")];
        let records = factory.make(calls, &ReadMap::new()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].position < records[1].position);
    }

    #[test]
    fn test_factory_is_idempotent_on_resolved_calls() {
        let reference = reference();
        let factory = RecordFactory::new(&reference, vec!["s1".into()]);
        let calls = || vec![snv_call(4, b"A", b"T"), snv_call(12, b"A", b"T")];
        let once = factory.make(calls(), &ReadMap::new()).unwrap();
        let twice = factory.make(calls(), &ReadMap::new()).unwrap();
        assert_eq!(once, twice);
    }
}
