//! Discrete-state hidden Markov models for phylo-HMMs.
//!
//! Emissions are supplied by the caller as log scores (typically per-site
//! tree-model likelihoods), so an [`Hmm`] holds only the transition
//! structure:
//!
//! - **Model** — [`Hmm`] with begin/end transitions, equilibrium
//!   frequencies and cached predecessor/successor lists
//! - **Decoding** — Viterbi, forward, backward and posterior probabilities
//! - **Scoring** — path likelihoods and log-odds of state subsets
//! - **Training** — [`train_update_counts`] and retraining from counts
//! - **Algebra** — [`cross_product`] and [`Hmm::reverse_compl`]
//! - **I/O** — the HMM text format and Graphviz export
//!
//! # Example
//!
//! ```
//! use phylohmm_hmm::Hmm;
//!
//! let hmm = Hmm::new(2, vec![0.9, 0.1, 0.1, 0.9], None, None, None).unwrap();
//! let emissions = vec![
//!     vec![-0.1, -0.1, -3.0, -3.0],
//!     vec![-3.0, -3.0, -0.1, -0.1],
//! ];
//! let (path, _) = hmm.viterbi(&emissions).unwrap();
//! assert_eq!(path, vec![0, 0, 1, 1]);
//! ```

pub mod algebra;
pub mod dot;
pub mod dp;
pub mod hmm;
pub mod io;
pub mod train;

pub use algebra::cross_product;
pub use dot::{dot_string, write_dot, DotOptions};
pub use hmm::{Endpoint, Hmm, BEGIN_STATE, END_STATE, MAXSTATES, ROW_SUM_TOLERANCE};
pub use io::{read_hmm, read_hmm_file, write_hmm, write_hmm_file};
pub use train::{train_update_counts, Pseudocounts, TransitionCounts};
