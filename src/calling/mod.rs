//! # Calling Core
//!
//! The per-region pipeline: candidates in, sorted records out.
//!
//! ## Sub-modules
//! - `candidates` / `assembler`: candidate variant generation
//! - `walker` / `generator`: active-region choice and stateful haplotype
//!   enumeration
//! - `phaser`: phase-set derivation from genotype posteriors
//! - `calls` / `caller`: typed calls and the region orchestrator
//! - `factory`: resolution of calls into VCF records

pub mod assembler;
pub mod caller;
pub mod calls;
pub mod candidates;
pub mod factory;
pub mod generator;
pub mod phaser;
pub mod walker;

pub use caller::{
    Caller, CallerKind, CallerParams, CancelToken, RefCallType, RegionOutcome,
};
pub use calls::{Call, CallKind};
pub use candidates::{CandidateGenerator, CandidateGeneratorOptions};
pub use factory::RecordFactory;
pub use generator::{HaplotypeGenerator, HaplotypeGeneratorConfig};
pub use phaser::{GenotypePosteriors, PhaseSet, Phaser, SampleGenotypePosteriors};
pub use walker::{ExtensionPolicy, IndicatorPolicy, ReadTemplatePolicy, Walker, WalkerConfig};
