//! End-to-end calling scenarios driven through in-memory reference and
//! read providers.

use std::collections::BTreeMap;

use tern::calling::caller::{
    Caller, CallerKind, CallerParams, CancelToken, RefCallType, RegionOutcome,
};
use tern::calling::candidates::{CandidateGenerator, CandidateGeneratorOptions};
use tern::data::read::{AlignedRead, CigarOp, CigarOpKind, ReadMap, SampleName};
use tern::data::region::GenomicRegion;
use tern::io::fasta::InMemoryReference;
use tern::io::vcf::VcfRecord;
use tern::model::trio::Trio;

/// A reference contig of patterned (non-repetitive) sequence with chosen
/// bases planted at fixed positions.
fn make_contig(length: usize, plants: &[(usize, u8)]) -> Vec<u8> {
    let pattern = b"ACGTTGCAGTCAATGG";
    let mut sequence: Vec<u8> = (0..length).map(|i| pattern[i % pattern.len()]).collect();
    for &(position, base) in plants {
        sequence[position] = base;
    }
    sequence
}

/// A read copied from the reference with optional substitutions.
fn read_from(
    reference: &[u8],
    contig: &str,
    begin: u64,
    len: usize,
    name: &str,
    substitutions: &[(u64, u8)],
) -> AlignedRead {
    let mut sequence = reference[begin as usize..begin as usize + len].to_vec();
    for &(position, base) in substitutions {
        sequence[(position - begin) as usize] = base;
    }
    AlignedRead::new(
        name,
        contig,
        begin,
        60,
        vec![CigarOp::new(CigarOpKind::Match, len as u32)],
        sequence,
        vec![35; len],
        false,
        true,
    )
}

fn candidate_generator() -> CandidateGenerator {
    CandidateGenerator::new(CandidateGeneratorOptions {
        use_assembly: false,
        ..CandidateGeneratorOptions::default()
    })
    .unwrap()
}

fn call_records(
    reference: &InMemoryReference,
    kind: CallerKind,
    params: CallerParams,
    samples: Vec<SampleName>,
    region: &GenomicRegion,
    reads: &ReadMap,
) -> Vec<VcfRecord> {
    let caller = Caller::new(reference, candidate_generator(), kind, params, samples).unwrap();
    match caller.call(region, reads, &CancelToken::new()).unwrap() {
        RegionOutcome::Completed(records) => records,
        RegionOutcome::Cancelled => panic!("unexpected cancellation"),
    }
}

/// Scenario: reads match the reference exactly. No refcalls requested
/// means no output; blocked refcalls give one homozygous-reference block.
#[test]
fn reference_only_region() {
    let contig = make_contig(1300, &[]);
    let reference = InMemoryReference::new(vec![("chr1", &contig)]);
    let region = GenomicRegion::new("chr1", 1000, 1100);
    let sample: SampleName = "s1".into();
    let mut reads = ReadMap::new();
    reads.insert(
        sample.clone(),
        (0..8)
            .map(|i| read_from(&contig, "chr1", 1000 + i * 10, 30, &format!("r{i}"), &[]))
            .collect(),
    );

    let records = call_records(
        &reference,
        CallerKind::Individual,
        CallerParams::default(),
        vec![sample.clone()],
        &region,
        &reads,
    );
    assert!(records.is_empty());

    let params = CallerParams {
        refcall_type: RefCallType::Blocked,
        ..CallerParams::default()
    };
    let records = call_records(
        &reference,
        CallerKind::Individual,
        params,
        vec![sample],
        &region,
        &reads,
    );
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.position, 1000);
    assert_eq!(record.ref_allele.as_bytes(), &contig[1000..1100]);
    assert!(record.alt_alleles.is_empty());
    assert_eq!(record.samples[0].genotype, vec![Some(0), Some(0)]);
    assert!(!record.samples[0].phased);
}

/// Scenario: half the reads carry chr1:1050 A>C. One heterozygous record.
#[test]
fn single_heterozygous_snv() {
    let contig = make_contig(1300, &[(1050, b'A')]);
    let reference = InMemoryReference::new(vec![("chr1", &contig)]);
    let region = GenomicRegion::new("chr1", 1000, 1100);
    let sample: SampleName = "s1".into();
    let mut sample_reads = Vec::new();
    for i in 0..6 {
        sample_reads.push(read_from(&contig, "chr1", 1040, 21, &format!("ref{i}"), &[]));
        sample_reads.push(read_from(
            &contig,
            "chr1",
            1040,
            21,
            &format!("alt{i}"),
            &[(1050, b'C')],
        ));
    }
    let mut reads = ReadMap::new();
    reads.insert(sample.clone(), sample_reads);

    let records = call_records(
        &reference,
        CallerKind::Individual,
        CallerParams::default(),
        vec![sample],
        &region,
        &reads,
    );
    assert_eq!(records.len(), 1);
    let record = &records[0];
    // zero-based 1050 prints as POS 1051
    assert_eq!(record.position, 1050);
    assert_eq!(record.ref_allele, "A");
    assert_eq!(record.alt_alleles, vec!["C".to_string()]);
    let sample_record = &record.samples[0];
    assert_eq!(sample_record.genotype, vec![Some(0), Some(1)]);
    assert!(!sample_record.phased);
    assert!(sample_record.gq.unwrap() >= 20);
    assert!(record.qual.unwrap() > 0.0);
}

/// Scenario: lowering the variant-posterior threshold never removes a
/// previously emitted call.
#[test]
fn monotone_variant_posterior() {
    let contig = make_contig(1300, &[(1050, b'A')]);
    let reference = InMemoryReference::new(vec![("chr1", &contig)]);
    let region = GenomicRegion::new("chr1", 1000, 1100);
    let sample: SampleName = "s1".into();
    let mut sample_reads = Vec::new();
    for i in 0..6 {
        sample_reads.push(read_from(&contig, "chr1", 1040, 21, &format!("ref{i}"), &[]));
        sample_reads.push(read_from(
            &contig,
            "chr1",
            1040,
            21,
            &format!("alt{i}"),
            &[(1050, b'C')],
        ));
    }
    let mut reads = ReadMap::new();
    reads.insert(sample.clone(), sample_reads);

    let strict = call_records(
        &reference,
        CallerKind::Individual,
        CallerParams {
            min_variant_posterior: 0.98,
            ..CallerParams::default()
        },
        vec![sample.clone()],
        &region,
        &reads,
    );
    let lenient = call_records(
        &reference,
        CallerKind::Individual,
        CallerParams {
            min_variant_posterior: 0.5,
            ..CallerParams::default()
        },
        vec![sample],
        &region,
        &reads,
    );
    for record in &strict {
        assert!(
            lenient
                .iter()
                .any(|r| r.position == record.position && r.alt_alleles == record.alt_alleles),
            "call at {} lost when lowering the threshold",
            record.position
        );
    }
}

/// Scenario: parents homozygous reference at chr2:500, child heterozygous
/// A>G. A de novo record with its posterior in INFO.
#[test]
fn trio_denovo() {
    let contig = make_contig(800, &[(500, b'A')]);
    let reference = InMemoryReference::new(vec![("chr2", &contig)]);
    let region = GenomicRegion::new("chr2", 450, 550);
    let mother: SampleName = "mother".into();
    let father: SampleName = "father".into();
    let child: SampleName = "child".into();

    let mut reads = ReadMap::new();
    for (member, n_ref, n_alt) in [(&mother, 24, 0), (&father, 24, 0), (&child, 8, 8)] {
        let mut member_reads = Vec::new();
        for i in 0..n_ref {
            member_reads.push(read_from(
                &contig,
                "chr2",
                492,
                17,
                &format!("{member}-ref{i}"),
                &[],
            ));
        }
        for i in 0..n_alt {
            member_reads.push(read_from(
                &contig,
                "chr2",
                492,
                17,
                &format!("{member}-alt{i}"),
                &[(500, b'G')],
            ));
        }
        reads.insert(member.clone(), member_reads);
    }

    let params = CallerParams {
        min_denovo_posterior: 0.5,
        ..CallerParams::default()
    };
    let records = call_records(
        &reference,
        CallerKind::Trio(Trio {
            mother: mother.clone(),
            father: father.clone(),
            child: child.clone(),
        }),
        params,
        vec![child, father, mother],
        &region,
        &reads,
    );
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.position, 500);
    assert_eq!(record.ref_allele, "A");
    assert_eq!(record.alt_alleles, vec!["G".to_string()]);
    let dnp = record.info.dnp.expect("de novo posterior in INFO");
    assert!(dnp >= 0.5, "dnp = {dnp}");
    // child (first sample column) heterozygous, parents homozygous ref
    assert_eq!(record.samples[0].genotype, vec![Some(0), Some(1)]);
    assert_eq!(record.samples[1].genotype, vec![Some(0), Some(0)]);
    assert_eq!(record.samples[2].genotype, vec![Some(0), Some(0)]);
}

/// Scenario: two heterozygous SNVs in cis within read length. Both records
/// share a phase set and are emitted phased.
#[test]
fn phasing_across_two_candidates() {
    let contig = make_contig(1300, &[(1050, b'A'), (1058, b'G')]);
    let reference = InMemoryReference::new(vec![("chr1", &contig)]);
    let region = GenomicRegion::new("chr1", 1000, 1100);
    let sample: SampleName = "s1".into();
    let mut sample_reads = Vec::new();
    for i in 0..8 {
        sample_reads.push(read_from(&contig, "chr1", 1040, 30, &format!("ref{i}"), &[]));
        sample_reads.push(read_from(
            &contig,
            "chr1",
            1040,
            30,
            &format!("cis{i}"),
            &[(1050, b'C'), (1058, b'T')],
        ));
    }
    let mut reads = ReadMap::new();
    reads.insert(sample.clone(), sample_reads);

    let records = call_records(
        &reference,
        CallerKind::Individual,
        CallerParams::default(),
        vec![sample],
        &region,
        &reads,
    );
    assert_eq!(records.len(), 2, "records: {records:?}");
    let first = &records[0];
    let second = &records[1];
    assert_eq!(first.position, 1050);
    assert_eq!(second.position, 1058);
    for record in [first, second] {
        let s = &record.samples[0];
        assert!(s.phased, "expected phased genotype at {}", record.position);
        assert!(s.pq.unwrap() >= 20);
    }
    assert_eq!(first.samples[0].ps, second.samples[0].ps);
}

/// Scenario: an insertion adjacent to an SNV. Two records come out and the
/// SNV's sample genotype does not inherit the inserted base.
#[test]
fn adjacent_insertion_and_snv() {
    use tern::calling::calls::{Call, CallKind};
    use tern::calling::factory::RecordFactory;
    use tern::data::allele::Allele;
    use tern::data::genotype::{Genotype, GenotypeCall};
    use tern::data::phred::Phred;

    let contig = make_contig(1300, &[(1051, b'G')]);
    let reference = InMemoryReference::new(vec![("chr1", &contig)]);
    let sample: SampleName = "s1".into();
    let factory = RecordFactory::new(&reference, vec![sample.clone()]);

    let genotype = |alleles: Vec<Vec<u8>>, posterior: f64| GenotypeCall {
        genotype: Genotype::new(
            alleles
                .into_iter()
                .map(|a| Allele::new(GenomicRegion::new("chr1", 0, 0), a))
                .collect(),
        ),
        posterior,
        phase: None,
    };

    let insertion_region = GenomicRegion::new("chr1", 1051, 1051);
    let insertion = Call {
        region: insertion_region.clone(),
        ref_allele: Allele::new(insertion_region.clone(), Vec::new()),
        alt_allele: Some(Allele::new(insertion_region.clone(), b"A".to_vec())),
        genotype_calls: BTreeMap::from([(
            sample.clone(),
            genotype(vec![Vec::new(), b"A".to_vec()], 0.97),
        )]),
        quality: Phred::from_score(50.0),
        model_posterior: None,
        kind: CallKind::Germline,
    };
    let snv_region = GenomicRegion::new("chr1", 1051, 1052);
    // the het slot leaked the inserted base in front of its real allele
    let snv = Call {
        region: snv_region.clone(),
        ref_allele: Allele::new(snv_region.clone(), b"G".to_vec()),
        alt_allele: Some(Allele::new(snv_region.clone(), b"T".to_vec())),
        genotype_calls: BTreeMap::from([(
            sample.clone(),
            genotype(vec![b"G".to_vec(), b"AT".to_vec()], 0.96),
        )]),
        quality: Phred::from_score(48.0),
        model_posterior: None,
        kind: CallKind::Germline,
    };

    let records = factory.make(vec![insertion, snv], &ReadMap::new()).unwrap();
    assert_eq!(records.len(), 2, "records: {records:?}");
    let snv_record = records
        .iter()
        .find(|r| r.position == 1051 && r.ref_allele == "G")
        .expect("SNV record");
    assert_eq!(snv_record.alt_alleles, vec!["T".to_string()]);
    // genotype indices resolve to REF and the SNV alt only
    assert_eq!(snv_record.samples[0].genotype, vec![Some(0), Some(1)]);
    // the insertion landed in its own left-padded record
    let insertion_record = records
        .iter()
        .find(|r| r.position == 1050)
        .expect("insertion record");
    assert!(insertion_record.alt_alleles[0].len() > insertion_record.ref_allele.len());
}

/// Scenario: a deletion in one sample with a nested SNV in another; the
/// deleted sample shows the `*` marker at the nested site.
#[test]
fn spanning_deletion_marks_nested_snv() {
    use tern::calling::calls::{Call, CallKind};
    use tern::calling::factory::RecordFactory;
    use tern::data::allele::Allele;
    use tern::data::genotype::{Genotype, GenotypeCall};
    use tern::data::phred::Phred;

    let contig = make_contig(200, &[]);
    let reference = InMemoryReference::new(vec![("chr3", &contig)]);
    let sample_a: SampleName = "sampleA".into();
    let sample_b: SampleName = "sampleB".into();
    let factory = RecordFactory::new(&reference, vec![sample_a.clone(), sample_b.clone()]);

    let del_region = GenomicRegion::new("chr3", 100, 110);
    let del_ref: Vec<u8> = contig[100..110].to_vec();
    let del_alt: Vec<u8> = contig[100..101].to_vec();
    let genotype = |alleles: Vec<Vec<u8>>, posterior: f64| GenotypeCall {
        genotype: Genotype::new(
            alleles
                .into_iter()
                .map(|a| Allele::new(GenomicRegion::new("chr3", 0, 0), a))
                .collect(),
        ),
        posterior,
        phase: None,
    };
    let deletion = Call {
        region: del_region.clone(),
        ref_allele: Allele::new(del_region.clone(), del_ref.clone()),
        alt_allele: Some(Allele::new(del_region.clone(), del_alt.clone())),
        genotype_calls: BTreeMap::from([(
            sample_a.clone(),
            genotype(vec![del_alt.clone(), del_alt.clone()], 0.99),
        )]),
        quality: Phred::from_score(70.0),
        model_posterior: None,
        kind: CallKind::Germline,
    };
    let snv_region = GenomicRegion::new("chr3", 105, 106);
    let ref_base = contig[105..106].to_vec();
    let snv = Call {
        region: snv_region.clone(),
        ref_allele: Allele::new(snv_region.clone(), ref_base.clone()),
        alt_allele: Some(Allele::new(snv_region.clone(), b"T".to_vec())),
        genotype_calls: BTreeMap::from([
            (sample_b.clone(), genotype(vec![ref_base.clone(), b"T".to_vec()], 0.98)),
            (sample_a.clone(), genotype(vec![ref_base.clone(), ref_base.clone()], 0.7)),
        ]),
        quality: Phred::from_score(45.0),
        model_posterior: None,
        kind: CallKind::Germline,
    };

    let records = factory.make(vec![deletion, snv], &ReadMap::new()).unwrap();
    assert_eq!(records.len(), 2);
    let nested = records.iter().find(|r| r.position == 105).unwrap();
    let star = nested
        .alt_alleles
        .iter()
        .position(|a| a == "*")
        .map(|i| i + 1)
        .expect("star allele present");
    // sample A is fully inside its own deletion
    assert!(nested.samples[0].genotype.iter().all(|g| *g == Some(star)));
    // sample B keeps the het SNV
    assert!(nested.samples[1].genotype.contains(&Some(0)));
}

/// Boundary: ploidy zero on a contig yields no variant calls.
#[test]
fn ploidy_zero_contig_is_silent() {
    let contig = make_contig(1300, &[(1050, b'A')]);
    let reference = InMemoryReference::new(vec![("chr1", &contig)]);
    let region = GenomicRegion::new("chr1", 1000, 1100);
    let sample: SampleName = "s1".into();
    let mut reads = ReadMap::new();
    reads.insert(
        sample.clone(),
        (0..4)
            .map(|i| {
                read_from(
                    &contig,
                    "chr1",
                    1040,
                    21,
                    &format!("alt{i}"),
                    &[(1050, b'C')],
                )
            })
            .collect(),
    );
    let params = CallerParams {
        contig_ploidies: BTreeMap::from([("chr1".to_string(), 0)]),
        ..CallerParams::default()
    };
    let records = call_records(
        &reference,
        CallerKind::Individual,
        params,
        vec![sample],
        &region,
        &reads,
    );
    assert!(records.is_empty());
}
