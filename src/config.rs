//! # Configuration Logic
//!
//! CLI argument parsing and validation using clap derive.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::calling::caller::RefCallType;
use crate::error::{Result, TernError};

/// Tern: haplotype-based variant calling for short-read data
#[derive(Parser, Debug, Clone)]
#[command(name = "tern")]
#[command(author = "Tern Authors")]
#[command(version = "0.1.0")]
#[command(about = "Haplotype-based germline, somatic, and de novo variant caller", long_about = None)]
pub struct Config {
    // ============ Input / Output ============
    /// Indexed FASTA reference (a .fai sidecar is required)
    #[arg(long, short = 'R', value_name = "FILE")]
    pub reference: PathBuf,

    /// Aligned read files, one per flag occurrence
    #[arg(long, short = 'I', value_name = "FILE", required = true)]
    pub reads: Vec<PathBuf>,

    /// Output VCF path (.gz for bgzf compression)
    #[arg(long, short = 'o', value_name = "FILE", default_value = "tern_calls.vcf")]
    pub output: PathBuf,

    /// Regions to call, as CONTIG or CONTIG:BEGIN-END (1-based, inclusive)
    #[arg(long, short = 'T', value_name = "REGION")]
    pub regions: Vec<String>,

    /// File with one region per line
    #[arg(long, value_name = "FILE")]
    pub regions_file: Option<PathBuf>,

    /// Regions to skip, same syntax as --regions
    #[arg(long, value_name = "REGION")]
    pub skip_regions: Vec<String>,

    /// Restrict calling to these samples
    #[arg(long, short = 'S', value_name = "SAMPLE")]
    pub samples: Vec<String>,

    // ============ Caller Selection ============
    /// Calling model
    #[arg(long, default_value = "individual", value_parser = ["individual", "population", "cancer", "trio"])]
    pub caller: String,

    /// Organism ploidy
    #[arg(long, default_value = "2")]
    pub organism_ploidy: u32,

    /// Per-contig ploidy overrides, CONTIG=N
    #[arg(long, value_name = "CONTIG=N")]
    pub contig_ploidies: Vec<String>,

    /// The normal sample (cancer calling)
    #[arg(long, value_name = "SAMPLE")]
    pub normal_sample: Option<String>,

    /// The mother of the trio
    #[arg(long, value_name = "SAMPLE")]
    pub maternal_sample: Option<String>,

    /// The father of the trio
    #[arg(long, value_name = "SAMPLE")]
    pub paternal_sample: Option<String>,

    // ============ Calling Thresholds ============
    /// Haplotype budget between filterings
    #[arg(long, default_value = "128")]
    pub max_haplotypes: usize,

    /// Minimum posterior to call a variant
    #[arg(long, default_value = "0.98")]
    pub min_variant_posterior: f64,

    /// Minimum posterior to emit a reference call
    #[arg(long, default_value = "0.9")]
    pub min_refcall_posterior: f64,

    /// Minimum posterior to call a somatic mutation
    #[arg(long, default_value = "0.99")]
    pub min_somatic_posterior: f64,

    /// Minimum posterior to call a de novo mutation
    #[arg(long, default_value = "0.95")]
    pub min_denovo_posterior: f64,

    /// Minimum Phred phase score to commit a phase block
    #[arg(long, default_value = "20.0")]
    pub min_phase_score: f64,

    /// Somatic mutation rate prior (cancer calling)
    #[arg(long, default_value = "1e-4")]
    pub somatic_mutation_rate: f64,

    /// Defer active-region advancement until haplotypes are filtered
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub lag_haplotype_generation: bool,

    // ============ Candidate Generation ============
    /// Quality floor for CIGAR-derived candidate bases
    #[arg(long, default_value = "20")]
    pub min_base_quality: u8,

    /// Reads required to support a candidate
    #[arg(long, default_value = "2")]
    pub min_supporting_reads: u32,

    /// Longest candidate variant considered
    #[arg(long, default_value = "500")]
    pub max_variant_size: u64,

    /// Assembly k-mer sizes
    #[arg(long, value_name = "K", num_args = 1.., default_values_t = vec![10usize, 25, 35])]
    pub kmer_sizes: Vec<usize>,

    /// Disable local re-assembly candidates
    #[arg(long)]
    pub no_assembly_candidates: bool,

    /// VCF of candidates that are always considered
    #[arg(long, value_name = "FILE")]
    pub source: Option<PathBuf>,

    /// Minimum read mapping quality
    #[arg(long, default_value = "20")]
    pub min_mapping_quality: u8,

    // ============ Reference Calls ============
    /// Emit one reference call record per position
    #[arg(long, conflicts_with = "make_blocked_refcalls")]
    pub make_positional_refcalls: bool,

    /// Emit one reference call record per uncovered interval
    #[arg(long)]
    pub make_blocked_refcalls: bool,

    /// Suppress per-sample FORMAT fields
    #[arg(long)]
    pub sites_only: bool,

    // ============ General ============
    /// Worker threads (default: all available cores)
    #[arg(long, short = 't')]
    pub threads: Option<usize>,
}

impl Config {
    /// Parse command line arguments and validate
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !self.reference.exists() {
            return Err(TernError::FileNotFound {
                path: self.reference.clone(),
            });
        }
        for reads in &self.reads {
            if !reads.exists() {
                return Err(TernError::FileNotFound {
                    path: reads.clone(),
                });
            }
        }
        if let Some(source) = &self.source {
            if !source.exists() {
                return Err(TernError::FileNotFound {
                    path: source.clone(),
                });
            }
        }
        if self.max_haplotypes < 2 {
            return Err(TernError::usage("--max-haplotypes must be at least 2"));
        }
        for p in [
            self.min_variant_posterior,
            self.min_refcall_posterior,
            self.min_somatic_posterior,
            self.min_denovo_posterior,
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(TernError::usage("posterior thresholds must lie in [0, 1]"));
            }
        }
        match self.caller.as_str() {
            "trio" => {
                if self.maternal_sample.is_none() || self.paternal_sample.is_none() {
                    return Err(TernError::usage(
                        "trio calling requires --maternal-sample and --paternal-sample",
                    ));
                }
            }
            "cancer" => {
                if self.normal_sample.is_none() {
                    tracing::warn!(
                        "cancer calling without --normal-sample; somatic classification will be less specific"
                    );
                }
            }
            _ => {}
        }
        self.parse_contig_ploidies()?;
        Ok(())
    }

    /// Parse `CONTIG=N` overrides.
    pub fn parse_contig_ploidies(&self) -> Result<BTreeMap<String, u32>> {
        let mut result = BTreeMap::new();
        for entry in &self.contig_ploidies {
            let (contig, ploidy) = entry.split_once('=').ok_or_else(|| {
                TernError::usage(format!(
                    "malformed --contig-ploidies entry {entry:?}; expected CONTIG=N"
                ))
            })?;
            let ploidy: u32 = ploidy.parse().map_err(|_| {
                TernError::usage(format!("malformed ploidy in --contig-ploidies entry {entry:?}"))
            })?;
            result.insert(contig.to_string(), ploidy);
        }
        Ok(result)
    }

    /// The configured reference-call mode.
    pub fn refcall_type(&self) -> RefCallType {
        if self.make_positional_refcalls {
            RefCallType::Positional
        } else if self.make_blocked_refcalls {
            RefCallType::Blocked
        } else {
            RefCallType::None
        }
    }

    /// Get the number of threads to use
    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
