//! # Tern Library
//!
//! Haplotype-based variant calling for aligned short-read sequencing data.
//! Given a reference genome and aligned reads, tern emits a sorted VCF
//! stream of germline, somatic, and de novo calls.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: core value types (regions, alleles, haplotypes, genotypes)
//! - `error`: error types and result aliases
//! - `io`: reference, read, and VCF I/O
//! - `model`: pair-HMM likelihoods, priors, and latent inference engines
//! - `calling`: the per-region calling core
//! - `pipelines`: multi-region orchestration
//! - `utils`: shared utilities (maths, progress)

pub mod calling;
pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod pipelines;
pub mod utils;

// Re-export commonly used types
pub use calling::{Caller, CallerKind, CallerParams, CancelToken, RefCallType};
pub use config::Config;
pub use data::{Allele, GenomicRegion, Genotype, Haplotype, Phred, Variant};
pub use error::{Result, TernError};
pub use io::{VcfRecord, VcfWriter};
