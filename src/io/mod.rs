//! # File I/O
//!
//! Reference access, read providers, and VCF output. The calling core only
//! sees the `ReferenceProvider` and `ReadProvider` traits; concrete readers
//! live behind them.

pub mod fasta;
pub mod reads;
pub mod vcf;

pub use fasta::{FastaReference, InMemoryReference, ReferenceProvider, WindowCache};
pub use reads::{
    load_sam, InMemoryReadProvider, MergedReadProvider, ReadFilterOptions, ReadProvider,
};
pub use vcf::{RecordInfo, SampleRecord, VcfRecord, VcfWriter};
