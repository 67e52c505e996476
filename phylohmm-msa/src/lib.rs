//! Multiple alignments and their sufficient statistics.
//!
//! Every likelihood in the phylohmm crates is computed over distinct column
//! tuples rather than raw columns. This crate builds those tuples:
//!
//! - **Alphabets** — [`Alphabet`] with the [`GAP_CHAR`] and [`MISSING_DATA_CHAR`] sentinels
//! - **Alignments** — [`Alignment`], from rows or from statistics alone
//! - **Sufficient statistics** — [`SufficientStats`], built by
//!   [`Alignment::collect_suff_stats`] with optional order and category counts
//! - **Transforms** — sub-alignments, reverse complement, and row reordering
//! - **Pooling** — [`PooledAlignment`] and [`aggregate_from_files`]
//! - **I/O** — FASTA input via needletail and the text statistics format
//!
//! # Example
//!
//! ```
//! use phylohmm_msa::{Alignment, Alphabet};
//!
//! let mut msa = Alignment::from_strs(&["human", "mouse"], &["ACGA", "ACTA"], Alphabet::dna()).unwrap();
//! msa.build_suff_stats(1, true).unwrap();
//! let ss = msa.ss.as_ref().unwrap();
//! assert_eq!(ss.ntuples(), 3);
//! assert_eq!(ss.counts, vec![2.0, 1.0, 1.0]);
//! ```

pub mod alignment;
pub mod alphabet;
pub mod fasta;
pub mod pooled;
pub mod ss_io;
pub mod suff_stats;
pub mod transform;

pub use alignment::Alignment;
pub use alphabet::{complement, Alphabet, DEFAULT_ALPHABET, GAP_CHAR, MISSING_DATA_CHAR};
pub use fasta::read_fasta_alignment;
pub use pooled::{aggregate_from_files, AlignmentFormat, PooledAlignment};
pub use ss_io::{read_ss, read_ss_file, write_ss, write_ss_file};
pub use suff_stats::{col_to_tuple, tuple_to_string_pretty, SsOptions, SufficientStats, TupleHash};
