//! # Pipelines
//!
//! High-level workflow orchestration: the multi-region calling run.

pub mod run;

pub use run::run;
