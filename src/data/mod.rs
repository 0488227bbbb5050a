//! # Data Module
//!
//! ## Role
//! Core value types for the calling pipeline.
//!
//! ## Design Philosophy
//! - **Zero-cost newtypes:** `HaplotypeId` prevents index bugs at compile
//!   time with no runtime overhead; haplotypes are interned once per region
//!   and referenced by id everywhere.
//! - **Canonical ordering:** candidate and call containers stay sorted by
//!   (contig, begin, end, sequence) so deduplication and merging are single
//!   linear passes.
//!
//! ## Sub-modules
//! - `region`: contig-anchored half-open intervals and interval algebra
//! - `allele` / `variant`: sequence-over-region types with left-alignment
//! - `haplotype`: interned haplotypes and the per-region arena
//! - `genotype`: fixed-ploidy multisets and cancer genotypes
//! - `phred`: Phred-scaled quality scores
//! - `read`: aligned reads and read-map helpers

pub mod allele;
pub mod genotype;
pub mod haplotype;
pub mod phred;
pub mod read;
pub mod region;
pub mod variant;

pub use allele::Allele;
pub use genotype::{CancerGenotype, Genotype, GenotypeCall, PhaseCall};
pub use haplotype::{Haplotype, HaplotypeArena, HaplotypeBuilder, HaplotypeId};
pub use phred::Phred;
pub use read::{AlignedRead, CigarOp, CigarOpKind, ReadMap, SampleName};
pub use region::{ContigOrder, GenomicRegion};
pub use variant::Variant;
