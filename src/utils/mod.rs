//! # Shared Utilities
//!
//! - `maths`: log-space probability arithmetic
//! - `progress`: atomic progress meter for the worker pool

pub mod maths;
pub mod progress;

pub use progress::ProgressMeter;
