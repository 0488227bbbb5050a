//! # Calling Pipeline
//!
//! Orchestrates the whole run:
//! 1. Open the reference and load the read files
//! 2. Resolve the target regions and split them into worker tasks
//! 3. Drive the per-region caller on a rayon pool, one task per region
//! 4. Funnel region-complete record batches through a bounded channel to a
//!    single writer thread that restores global order
//!
//! Regions are independent; within a region the caller is sequential. On
//! the first fatal error the cancel token stops the remaining workers and
//! the error is reported once.

use std::collections::BTreeMap;
use std::sync::mpsc::sync_channel;
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::calling::caller::{Caller, CallerKind, CallerParams, CancelToken, RegionOutcome};
use crate::calling::candidates::{CandidateGenerator, CandidateGeneratorOptions};
use crate::config::Config;
use crate::data::read::SampleName;
use crate::data::region::GenomicRegion;
use crate::error::{Result, TernError};
use crate::io::fasta::{FastaReference, ReferenceProvider};
use crate::io::reads::{load_sam, MergedReadProvider, ReadFilterOptions, ReadProvider};
use crate::io::vcf::{VcfRecord, VcfWriter};
use crate::model::trio::Trio;
use crate::utils::progress::ProgressMeter;

/// Width of the per-task region chunks.
const REGION_CHUNK: u64 = 100_000;

/// Bound on in-flight record batches between workers and the writer.
const RECORD_CHANNEL_CAPACITY: usize = 16;

/// Run a full calling job from a validated config.
pub fn run(config: &Config) -> Result<()> {
    let reference = FastaReference::open(&config.reference)?;
    let contig_order = reference.contig_order();

    eprintln!("Loading reads...");
    let filters = ReadFilterOptions {
        min_mapping_quality: config.min_mapping_quality,
        drop_duplicates: true,
    };
    let mut providers: Vec<Box<dyn ReadProvider>> = Vec::new();
    for path in &config.reads {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        providers.push(Box::new(load_sam(path, &stem, filters)?));
    }
    let provider = MergedReadProvider::new(providers);

    let mut samples = provider.samples();
    if !config.samples.is_empty() {
        samples.retain(|s| config.samples.iter().any(|wanted| wanted.as_str() == s.as_ref()));
        for wanted in &config.samples {
            if !samples.iter().any(|s| s.as_ref() == wanted.as_str()) {
                return Err(TernError::input(format!(
                    "sample {wanted} not found in any read file"
                )));
            }
        }
    }
    if samples.is_empty() {
        return Err(TernError::input("no samples found in the read files"));
    }
    info!(n_samples = samples.len(), "resolved samples");

    let kind = caller_kind(config, &samples)?;
    let params = caller_params(config)?;
    let candidate_options = CandidateGeneratorOptions {
        min_base_quality: config.min_base_quality,
        min_supporting_reads: config.min_supporting_reads,
        max_variant_size: config.max_variant_size,
        kmer_sizes: config.kmer_sizes.clone(),
        use_assembly: !config.no_assembly_candidates,
        source: config.source.clone(),
        ..CandidateGeneratorOptions::default()
    };
    let candidate_generator = CandidateGenerator::new(candidate_options)?;

    let regions = resolve_regions(config, &reference)?;
    if regions.is_empty() {
        return Err(TernError::input("no regions to call"));
    }
    let total_bases: u64 = regions.iter().map(GenomicRegion::len).sum();
    let progress = ProgressMeter::new(total_bases);
    eprintln!(
        "Calling {} region chunks over {} bases with {} threads",
        regions.len(),
        total_bases,
        config.threads()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads())
        .thread_name(|i| format!("tern-worker-{i}"))
        .build()
        .map_err(|e| TernError::input(format!("failed to create thread pool: {e}")))?;

    let (sender, receiver) = sync_channel::<(usize, Vec<VcfRecord>)>(RECORD_CHANNEL_CAPACITY);
    let cancel = CancelToken::new();
    let first_error: Mutex<Option<TernError>> = Mutex::new(None);

    let mut writer = VcfWriter::to_path(&config.output, samples.clone(), config.sites_only)?;
    let contigs: Vec<_> = contig_order
        .names()
        .iter()
        .map(|name| {
            let length = reference.contig_length(name).unwrap_or(0);
            (name.clone(), length)
        })
        .collect();
    writer.write_header(&contigs)?;

    let writer_thread = std::thread::spawn(move || -> Result<(u64, VcfWriter)> {
        // restore region order before writing
        let mut pending: BTreeMap<usize, Vec<VcfRecord>> = BTreeMap::new();
        let mut next_index = 0usize;
        let mut written = 0u64;
        for (index, records) in receiver {
            pending.insert(index, records);
            while let Some(records) = pending.remove(&next_index) {
                writer.write_records(&records)?;
                written += records.len() as u64;
                next_index += 1;
            }
        }
        for records in pending.into_values() {
            writer.write_records(&records)?;
            written += records.len() as u64;
        }
        Ok((written, writer))
    });

    pool.install(|| {
        regions
            .par_iter()
            .enumerate()
            .for_each_with(sender, |sender, (index, region)| {
                if cancel.is_cancelled() {
                    return;
                }
                let worker_provider = provider.clone_provider();
                let result = (|| -> Result<Vec<VcfRecord>> {
                    let reads = worker_provider.fetch_reads(region)?;
                    let caller = Caller::new(
                        &reference,
                        candidate_generator.clone(),
                        kind.clone(),
                        params.clone(),
                        samples.clone(),
                    )?;
                    match caller.call(region, &reads, &cancel)? {
                        RegionOutcome::Completed(records) => Ok(records),
                        RegionOutcome::Cancelled => Ok(Vec::new()),
                    }
                })();
                match result {
                    Ok(records) => {
                        progress.log_completed(region);
                        // a full writer applies backpressure here
                        if sender.send((index, records)).is_err() {
                            cancel.cancel();
                        }
                    }
                    Err(error) if error.is_recoverable() => {
                        warn!(region = %region, %error, "region failed; skipped");
                        progress.log_completed(region);
                        let _ = sender.send((index, Vec::new()));
                    }
                    Err(error) => {
                        let mut slot = first_error.lock().expect("error slot");
                        if slot.is_none() {
                            *slot = Some(error);
                        }
                        cancel.cancel();
                    }
                }
            });
    });
    // workers are done; their sender clones are dropped

    let (written, writer) = writer_thread
        .join()
        .map_err(|_| TernError::internal("pipeline", "writer thread panicked"))??;
    writer.finish()?;

    if let Some(error) = first_error.into_inner().expect("error slot") {
        return Err(error);
    }
    eprintln!(
        "Wrote {} records in {:.1}s",
        written,
        progress.elapsed_secs()
    );
    Ok(())
}

fn caller_kind(config: &Config, samples: &[SampleName]) -> Result<CallerKind> {
    match config.caller.as_str() {
        "individual" => {
            if samples.len() > 1 {
                return Err(TernError::usage(
                    "individual calling takes exactly one sample; use --samples or the population caller",
                ));
            }
            Ok(CallerKind::Individual)
        }
        "population" => Ok(CallerKind::Population),
        "cancer" => {
            let normal_sample = match &config.normal_sample {
                Some(name) => Some(resolve_sample(name, samples)?),
                None => None,
            };
            Ok(CallerKind::Cancer {
                normal_sample,
                somatic_mutation_rate: config.somatic_mutation_rate,
            })
        }
        "trio" => {
            let mother = resolve_sample(
                config
                    .maternal_sample
                    .as_ref()
                    .ok_or_else(|| TernError::usage("trio calling requires --maternal-sample"))?,
                samples,
            )?;
            let father = resolve_sample(
                config
                    .paternal_sample
                    .as_ref()
                    .ok_or_else(|| TernError::usage("trio calling requires --paternal-sample"))?,
                samples,
            )?;
            let child = samples
                .iter()
                .find(|s| **s != mother && **s != father)
                .cloned()
                .ok_or_else(|| {
                    TernError::input("trio calling needs a third (child) sample in the read files")
                })?;
            Ok(CallerKind::Trio(Trio {
                mother,
                father,
                child,
            }))
        }
        other => Err(TernError::usage(format!("unknown caller {other:?}"))),
    }
}

fn resolve_sample(name: &str, samples: &[SampleName]) -> Result<SampleName> {
    samples
        .iter()
        .find(|s| s.as_ref() == name)
        .cloned()
        .ok_or_else(|| TernError::input(format!("sample {name} not found in the read files")))
}

fn caller_params(config: &Config) -> Result<CallerParams> {
    Ok(CallerParams {
        max_haplotypes: config.max_haplotypes,
        min_variant_posterior: config.min_variant_posterior,
        min_refcall_posterior: config.min_refcall_posterior,
        min_somatic_posterior: config.min_somatic_posterior,
        min_denovo_posterior: config.min_denovo_posterior,
        min_phase_score: config.min_phase_score,
        refcall_type: config.refcall_type(),
        organism_ploidy: config.organism_ploidy,
        contig_ploidies: config.parse_contig_ploidies()?,
        lag_haplotype_generation: config.lag_haplotype_generation,
        ..CallerParams::default()
    })
}

/// Resolve the requested regions against the reference, subtract skip
/// regions, and chunk for the worker pool.
fn resolve_regions(config: &Config, reference: &FastaReference) -> Result<Vec<GenomicRegion>> {
    let order = reference.contig_order();
    let mut requested: Vec<GenomicRegion> = Vec::new();
    let mut specs: Vec<String> = config.regions.clone();
    if let Some(path) = &config.regions_file {
        let content = std::fs::read_to_string(path)?;
        specs.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    if specs.is_empty() {
        for name in order.names() {
            let length = reference.contig_length(name).unwrap_or(0);
            requested.push(GenomicRegion::new(name.clone(), 0, length));
        }
    } else {
        for spec in &specs {
            requested.push(parse_region(spec, reference)?);
        }
    }

    let skips: Vec<GenomicRegion> = config
        .skip_regions
        .iter()
        .map(|s| parse_region(s, reference))
        .collect::<Result<_>>()?;

    let mut result = Vec::new();
    for region in requested {
        let mut covered: Vec<GenomicRegion> = skips
            .iter()
            .filter(|s| s.same_contig(&region) && s.overlaps(&region))
            .cloned()
            .collect();
        covered.sort();
        for kept in crate::data::region::intervening_regions(&covered, &region) {
            let mut begin = kept.begin();
            while begin < kept.end() {
                let end = (begin + REGION_CHUNK).min(kept.end());
                result.push(GenomicRegion::new(kept.contig().clone(), begin, end));
                begin = end;
            }
        }
    }
    Ok(result)
}

/// Parse `CONTIG` or `CONTIG:BEGIN-END` (1-based, inclusive).
fn parse_region(spec: &str, reference: &FastaReference) -> Result<GenomicRegion> {
    let (contig, range) = match spec.split_once(':') {
        Some((contig, range)) => (contig, Some(range)),
        None => (spec, None),
    };
    let length = reference
        .contig_length(contig)
        .ok_or_else(|| TernError::input(format!("contig {contig} not in reference")))?;
    match range {
        None => Ok(GenomicRegion::new(contig, 0, length)),
        Some(range) => {
            let (begin, end) = range
                .split_once('-')
                .ok_or_else(|| TernError::usage(format!("malformed region {spec:?}")))?;
            let begin: u64 = begin
                .replace(',', "")
                .parse()
                .map_err(|_| TernError::usage(format!("malformed region {spec:?}")))?;
            let end: u64 = end
                .replace(',', "")
                .parse()
                .map_err(|_| TernError::usage(format!("malformed region {spec:?}")))?;
            if begin == 0 || end < begin {
                return Err(TernError::usage(format!(
                    "region {spec:?} must be 1-based with end >= begin"
                )));
            }
            Ok(GenomicRegion::new(contig, begin - 1, end.min(length)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_chunking_is_contiguous() {
        // pure function check through resolve_regions would need a real
        // reference on disk; chunk arithmetic is checked directly
        let region = GenomicRegion::new("chr1", 0, 250_000);
        let mut chunks = Vec::new();
        let mut begin = region.begin();
        while begin < region.end() {
            let end = (begin + REGION_CHUNK).min(region.end());
            chunks.push(GenomicRegion::new(region.contig().clone(), begin, end));
            begin = end;
        }
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100_000);
        assert_eq!(chunks[2].len(), 50_000);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].begin());
        }
    }
}
