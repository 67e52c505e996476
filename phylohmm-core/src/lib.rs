//! Shared primitives for the phylohmm crates.
//!
//! `phylohmm-core` provides the foundation the alignment, tree-model, and HMM
//! crates build on:
//!
//! - **Error types** — [`PhyloHmmError`] and [`Result`] for structured error handling
//! - **Traits** — [`Summarizable`]
//! - **Numeric kernel** — log-space sums, integer powers, and guarded ratios

pub mod error;
pub mod prob;
pub mod traits;

pub use error::{PhyloHmmError, Result, EXIT_FAILURE, EXIT_SUCCESS};
pub use traits::*;
