//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Errors follow the region-boundary policy: recoverable kinds (`Model`,
//! `Numerical`, per-bin assembler failures) are caught by the caller at the
//! region boundary; everything else bubbles up and terminates the worker
//! pool. `exit_code` maps the kind onto the process exit status.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Tern operations
#[derive(Error, Debug)]
pub enum TernError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Usage errors (missing required option, conflicting flags)
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// Input errors (malformed FASTA/BAM/VCF, unresolvable sample,
    /// contig not in reference)
    #[error("Invalid input: {message}")]
    Input { message: String },

    /// Model errors (unsupported ploidy combination, misconfigured trio)
    #[error("Model error in {location}: {message}")]
    Model { location: String, message: String },

    /// Numerical errors (all-zero posteriors, degenerate likelihoods)
    #[error("Numerical error: {message}")]
    Numerical { message: String },

    /// Internal invariant violations; always a bug
    #[error("Internal error in {location}: {message}")]
    Internal { location: String, message: String },

    /// File not found errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Parse errors
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Type alias for Results using TernError
pub type Result<T> = std::result::Result<T, TernError>;

impl TernError {
    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create an input error
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create a model error
    pub fn model(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a numerical error
    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Recoverable errors are retried or skipped at the region boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Model { .. } | Self::Numerical { .. })
    }

    /// A one-line hint printed after the error, when one exists.
    pub fn help(&self) -> Option<&'static str> {
        match self {
            Self::Usage { .. } => Some("run with --help for usage"),
            Self::Model { .. } => {
                Some("check --organism-ploidy / --contig-ploidies for the samples involved")
            }
            Self::FileNotFound { .. } => Some("check the path exists and is readable"),
            _ => None,
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(TernError::usage("x").exit_code(), 2);
        assert_eq!(TernError::input("x").exit_code(), 1);
        assert_eq!(TernError::numerical("x").exit_code(), 1);
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(TernError::numerical("x").is_recoverable());
        assert!(TernError::model("here", "x").is_recoverable());
        assert!(!TernError::input("x").is_recoverable());
    }
}
