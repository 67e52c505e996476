//! Structured error types for the phylohmm crates.

use thiserror::Error;

/// Process exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code for any fatal error.
pub const EXIT_FAILURE: i32 = 1;

/// Unified error type for all phylohmm operations.
#[derive(Debug, Error)]
pub enum PhyloHmmError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input data (bad header, bad tuple line, unknown model tag).
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid arguments or out-of-range values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation was called on an object in the wrong state, e.g. an
    /// unordered sufficient-statistics object where order is required.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Sizes of two collaborating objects disagree.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Non-finite likelihood, singular eigenvector matrix, negative branch length.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    /// Growth was required but the caller promised pre-sized storage.
    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

impl PhyloHmmError {
    /// Exit code a command-line front end should report for this error.
    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}

/// Convenience alias used throughout the phylohmm crates.
pub type Result<T> = std::result::Result<T, PhyloHmmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let e = PhyloHmmError::Capacity("tuple table full".into());
        assert_eq!(e.to_string(), "capacity exceeded: tuple table full");
        let e = PhyloHmmError::Parse("bad line".into());
        assert_eq!(e.to_string(), "parse error: bad line");
    }

    #[test]
    fn io_converts() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        let e = open().unwrap_err();
        assert!(matches!(e, PhyloHmmError::Io(_)));
        assert_eq!(e.exit_code(), EXIT_FAILURE);
    }
}
