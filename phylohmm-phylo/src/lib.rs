//! Phylogenetic tree models for the phylohmm crates.
//!
//! - **Trees** — binary [`Tree`] arena with Newick input and output
//! - **Substitution models** — [`RateMatrix`] families from `JC69` to the
//!   context-dependent `U3`, diagonalized by [`EigenSystem`]
//! - **Tree models** — [`TreeModel`] with discrete gamma or empirical rate
//!   variation, packed parameter vectors and cached `P(t)` matrices
//! - **Likelihood** — Felsenstein pruning over sufficient statistics and
//!   posterior expected substitution counts
//! - **Training** — [`fit_em`] with a bounded BFGS inner loop and
//!   approximate, exact or numerical gradients
//! - **I/O** — the tree-model text format
//!
//! # Example
//!
//! ```
//! use phylohmm_msa::{Alignment, Alphabet};
//! use phylohmm_phylo::{log_likelihood, SubstModel, Tree, TreeModel};
//!
//! let tree = Tree::from_newick("((a:0.1,b:0.1):0.05,c:0.2);").unwrap();
//! let tm = TreeModel::new(tree, Alphabet::dna(), SubstModel::Jc69, vec![0.25; 4], 1, 0.0).unwrap();
//! let mut msa = Alignment::from_strs(&["a", "b", "c"], &["ACGT", "ACGA", "ACTT"], Alphabet::dna()).unwrap();
//! msa.build_suff_stats(1, false).unwrap();
//! let lnl = log_likelihood(&tm, &msa, None).unwrap();
//! assert!(lnl < 0.0);
//! ```

pub mod bfgs;
pub mod eigen;
pub mod fit_em;
pub mod gamma;
pub mod gradient;
pub mod likelihood;
pub mod newick;
pub mod subst_model;
pub mod tm_io;
pub mod tree;
pub mod tree_model;

pub use bfgs::{minimize_bfgs, numerical_gradient, BfgsSummary, Bounds, Objective, Precision};
pub use eigen::{EigenSystem, TM_IMAG_EPS};
pub use fit_em::{fit_em, EmConfig, EmSummary};
pub use gamma::{discrete_gamma_rates, DERIV_EPSILON};
pub use gradient::{em_gradient, supports_analytic_gradient, GradientMode};
pub use likelihood::{
    compute_posteriors, expected_log_likelihood, log_likelihood, tuple_log_likelihoods,
    TreePosteriors,
};
pub use subst_model::{RateCell, RateMatrix, RateTerm, SubstModel};
pub use tm_io::{read_tree_model, read_tree_model_file, write_tree_model, write_tree_model_file};
pub use tree::{NodeId, Tree, TreeNode};
pub use tree_model::{BranchLengthEstimation, TreeModel};
