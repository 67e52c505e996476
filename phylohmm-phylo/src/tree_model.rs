//! Tree models: a tree, a rate matrix, equilibrium frequencies and rate
//! variation, with cached branch transition matrices.
//!
//! The free parameters of a model are exchanged with optimizers as one
//! packed vector, laid out as
//!
//! 1. branch lengths in preorder (root and root leaf excluded), or a single
//!    global scale, or nothing;
//! 2. equilibrium frequencies, when they are estimated;
//! 3. the gamma shape, or the empirical rate weights, or nothing;
//! 4. the rate-matrix parameters.

use nalgebra::DMatrix;

use phylohmm_core::prob::int_pow;
use phylohmm_core::{PhyloHmmError, Result, Summarizable};
use phylohmm_msa::{Alignment, Alphabet};

use crate::gamma::discrete_gamma_rates;
use crate::subst_model::{RateMatrix, SubstModel};
use crate::tree::{NodeId, Tree, TreeNode};

/// Default starting branch length for parameter initialization.
pub const DEFAULT_BRANCH_LENGTH: f64 = 0.1;

/// Default gamma shape parameter.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// Which branch-length quantities are free during fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchLengthEstimation {
    /// Every branch length is a parameter.
    #[default]
    All,
    /// Branch lengths are fixed up to one global scale factor.
    ScaleOnly,
    /// Branch lengths are fixed.
    None,
}

/// Mapping of one branch onto the packed parameter vector:
/// `dparent = params[slot] * factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchSlot {
    pub node: NodeId,
    pub slot: usize,
    pub factor: f64,
}

/// A phylogenetic model ready for likelihood evaluation.
#[derive(Debug, Clone)]
pub struct TreeModel {
    pub tree: Tree,
    pub alphabet: Alphabet,
    pub rate_matrix: RateMatrix,
    /// Equilibrium frequencies `π`, one per state.
    pub backgd_freqs: Vec<f64>,
    pub nratecats: usize,
    /// Gamma shape; negative while rate variation is temporarily disabled,
    /// in which case `-alpha` is the deferred number of categories.
    pub alpha: f64,
    /// Rate multipliers, one per category.
    pub rk: Vec<f64>,
    /// Category weights, summing to 1.
    pub freqk: Vec<f64>,
    pub empirical_rates: bool,
    pub estimate_branchlens: BranchLengthEstimation,
    /// Global branch scale, used with [`BranchLengthEstimation::ScaleOnly`].
    pub scale: f64,
    pub estimate_backgd: bool,
    /// Leaf child of the root whose branch is pinned at zero.
    pub root_leaf: Option<NodeId>,
    /// Log-likelihood of the training data, once fitted.
    pub lnl: Option<f64>,
    p_matrices: Vec<Vec<DMatrix<f64>>>,
}

impl TreeModel {
    /// A model with default rate parameters for `model`.
    ///
    /// `nratecats > 1` selects discrete gamma rate variation with shape
    /// `alpha`.
    pub fn new(
        tree: Tree,
        alphabet: Alphabet,
        model: SubstModel,
        backgd_freqs: Vec<f64>,
        nratecats: usize,
        alpha: f64,
    ) -> Result<Self> {
        let rate_matrix = RateMatrix::new(model, &alphabet)?;
        if backgd_freqs.len() != rate_matrix.size() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} over {} symbols has {} states, got {} equilibrium frequencies",
                model,
                alphabet.size(),
                rate_matrix.size(),
                backgd_freqs.len()
            )));
        }
        if nratecats == 0 {
            return Err(PhyloHmmError::InvalidInput("need at least one rate category".into()));
        }
        let mut tm = Self {
            tree,
            alphabet,
            rate_matrix,
            backgd_freqs: normalized(&backgd_freqs)?,
            nratecats,
            alpha,
            rk: vec![1.0],
            freqk: vec![1.0],
            empirical_rates: false,
            estimate_branchlens: BranchLengthEstimation::All,
            scale: 1.0,
            estimate_backgd: false,
            root_leaf: None,
            lnl: None,
            p_matrices: Vec::new(),
        };
        tm.apply_gamma()?;
        let params = tm.rate_matrix.default_params();
        tm.rate_matrix.set_params(&params, &tm.backgd_freqs)?;
        tm.update_transition_matrices()?;
        Ok(tm)
    }

    /// Uniform frequencies for `JC69`/`K80`, otherwise the frequencies of
    /// `order + 1`-tuples observed in `msa` (restricted to `cat`).
    pub fn default_backgd_freqs(
        model: SubstModel,
        msa: &Alignment,
        cat: Option<usize>,
    ) -> Result<Vec<f64>> {
        match model {
            SubstModel::Jc69 | SubstModel::K80 => {
                let n = int_pow(msa.alphabet.size(), model.order() + 1);
                Ok(vec![1.0 / n as f64; n])
            }
            _ => msa.tuple_freqs(model.order() + 1, cat),
        }
    }

    pub fn subst_model(&self) -> SubstModel {
        self.rate_matrix.model
    }

    /// Markov order of the substitution process.
    pub fn order(&self) -> usize {
        self.rate_matrix.model.order()
    }

    pub fn nstates(&self) -> usize {
        self.rate_matrix.size()
    }

    /// Replace the rate-matrix parameters and refresh the caches.
    pub fn set_rate_params(&mut self, params: &[f64]) -> Result<()> {
        self.rate_matrix.set_params(params, &self.backgd_freqs)?;
        self.update_transition_matrices()
    }

    /// Switch to discrete gamma rate variation.
    pub fn set_gamma(&mut self, nratecats: usize, alpha: f64) -> Result<()> {
        if nratecats == 0 {
            return Err(PhyloHmmError::InvalidInput("need at least one rate category".into()));
        }
        self.empirical_rates = false;
        self.nratecats = nratecats;
        self.alpha = alpha;
        self.apply_gamma()?;
        self.update_transition_matrices()
    }

    /// Switch to an empirical mixture of rate multipliers with the given
    /// weights (normalized to sum to 1).
    pub fn set_empirical_rates(&mut self, rk: Vec<f64>, freqk: Vec<f64>) -> Result<()> {
        if rk.is_empty() || rk.len() != freqk.len() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} rate constants with {} rate weights",
                rk.len(),
                freqk.len()
            )));
        }
        if rk.iter().any(|&r| r.is_nan() || r < 0.0) {
            return Err(PhyloHmmError::InvalidInput("rate constants must be non-negative".into()));
        }
        self.freqk = normalized(&freqk)?;
        self.nratecats = rk.len();
        self.rk = rk;
        self.empirical_rates = true;
        self.alpha = 0.0;
        self.update_transition_matrices()
    }

    fn apply_gamma(&mut self) -> Result<()> {
        if self.empirical_rates {
            return Ok(());
        }
        if self.nratecats > 1 {
            self.rk = discrete_gamma_rates(self.alpha, self.nratecats)?;
            self.freqk = vec![1.0 / self.nratecats as f64; self.nratecats];
        } else {
            self.rk = vec![1.0];
            self.freqk = vec![1.0];
        }
        Ok(())
    }

    /// Pin the branch above leaf `name`, a child of the root, at zero.
    pub fn set_root_leaf(&mut self, name: &str) -> Result<()> {
        let id = self.tree.leaf_by_name(name).ok_or_else(|| {
            PhyloHmmError::InvalidInput(format!("no leaf named '{name}' in tree"))
        })?;
        if !self.tree.is_root_child(id) {
            return Err(PhyloHmmError::InvalidInput(format!(
                "root leaf '{name}' must be a child of the root"
            )));
        }
        if let Some(node) = self.tree.node_mut(id) {
            node.dparent = 0.0;
        }
        self.root_leaf = Some(id);
        self.update_transition_matrices()
    }

    /// Effective length of the branch above `node` before rate scaling.
    pub fn branch_length(&self, node: &TreeNode) -> f64 {
        node.dparent * self.scale
    }

    /// Recompute `P = exp(Q · t · r_k)` for every branch and rate category.
    pub fn update_transition_matrices(&mut self) -> Result<()> {
        if self.rk.len() != self.nratecats || self.freqk.len() != self.nratecats {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} rate categories with {} rate constants and {} weights",
                self.nratecats,
                self.rk.len(),
                self.freqk.len()
            )));
        }

        #[cfg(feature = "parallel")]
        let p = {
            use rayon::prelude::*;
            self.tree
                .nodes()
                .par_iter()
                .map(|n| self.branch_matrices(n))
                .collect::<Result<Vec<_>>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let p = self
            .tree
            .nodes()
            .iter()
            .map(|n| self.branch_matrices(n))
            .collect::<Result<Vec<_>>>()?;

        self.p_matrices = p;
        Ok(())
    }

    fn branch_matrices(&self, node: &TreeNode) -> Result<Vec<DMatrix<f64>>> {
        if node.is_root() {
            return Ok(Vec::new());
        }
        let t = self.branch_length(node);
        self.rk.iter().map(|&r| self.rate_matrix.exp_qt(t * r)).collect()
    }

    /// Cached transition matrix of the branch above `node` in category `k`.
    pub fn transition_matrix(&self, node: NodeId, k: usize) -> Option<&DMatrix<f64>> {
        self.p_matrices.get(node).and_then(|v| v.get(k))
    }

    /// Whether the two branches below the root act as one.
    fn shares_root_branch(&self) -> bool {
        self.subst_model().is_reversible() && self.root_leaf.is_none()
    }

    /// Branch-length parameter slots in preorder. Empty unless every
    /// branch length is estimated.
    pub fn branch_slots(&self) -> Vec<BranchSlot> {
        if self.estimate_branchlens != BranchLengthEstimation::All {
            return Vec::new();
        }
        let shared = self.shares_root_branch();
        let mut slots = Vec::new();
        let mut next = 0;
        let mut root_slot = None;
        for id in self.tree.preorder() {
            if id == self.tree.root() || Some(id) == self.root_leaf {
                continue;
            }
            if shared && self.tree.is_root_child(id) {
                let slot = *root_slot.get_or_insert_with(|| {
                    next += 1;
                    next - 1
                });
                slots.push(BranchSlot {
                    node: id,
                    slot,
                    factor: 0.5,
                });
            } else {
                slots.push(BranchSlot {
                    node: id,
                    slot: next,
                    factor: 1.0,
                });
                next += 1;
            }
        }
        slots
    }

    pub fn nbranch_params(&self) -> usize {
        match self.estimate_branchlens {
            BranchLengthEstimation::All => self
                .branch_slots()
                .iter()
                .map(|s| s.slot + 1)
                .max()
                .unwrap_or(0),
            BranchLengthEstimation::ScaleOnly => 1,
            BranchLengthEstimation::None => 0,
        }
    }

    pub fn neqfreq_params(&self) -> usize {
        if self.estimate_backgd {
            self.nstates()
        } else {
            0
        }
    }

    /// Slots for rate variation: the gamma shape, or one weight per
    /// empirical category. Deferred rate variation keeps its slots.
    pub fn nratevar_params(&self) -> usize {
        if self.empirical_rates {
            if self.nratecats > 1 {
                self.nratecats
            } else if self.alpha < 0.0 {
                (-self.alpha) as usize
            } else {
                0
            }
        } else if self.nratecats > 1 || self.alpha < 0.0 {
            1
        } else {
            0
        }
    }

    pub fn nrate_params(&self) -> usize {
        self.rate_matrix.nparams()
    }

    /// Length of the packed parameter vector.
    pub fn nparams(&self) -> usize {
        self.nbranch_params() + self.neqfreq_params() + self.nratevar_params() + self.nrate_params()
    }

    /// Offset of the first rate-variation slot.
    pub fn ratevar_offset(&self) -> usize {
        self.nbranch_params() + self.neqfreq_params()
    }

    /// Offset of the first rate-matrix parameter.
    pub fn rate_params_offset(&self) -> usize {
        self.ratevar_offset() + self.nratevar_params()
    }

    /// Starting parameters: every branch `branch_length`, the current
    /// equilibrium frequencies, shape and weights, and default rates.
    pub fn init_params(&self, branch_length: f64) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.nparams());
        match self.estimate_branchlens {
            BranchLengthEstimation::All => {
                params.extend(std::iter::repeat(branch_length).take(self.nbranch_params()))
            }
            BranchLengthEstimation::ScaleOnly => params.push(1.0),
            BranchLengthEstimation::None => {}
        }
        self.push_non_branch_params(&mut params, self.rate_matrix.default_params());
        params
    }

    /// Parameters describing the model as it stands.
    pub fn params_from_model(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.nparams());
        match self.estimate_branchlens {
            BranchLengthEstimation::All => {
                let mut branch = vec![0.0; self.nbranch_params()];
                for s in self.branch_slots() {
                    if let Some(node) = self.tree.node(s.node) {
                        // shared root slots hold the sum of both branches
                        branch[s.slot] += node.dparent;
                    }
                }
                params.extend(branch);
            }
            BranchLengthEstimation::ScaleOnly => params.push(self.scale),
            BranchLengthEstimation::None => {}
        }
        self.push_non_branch_params(
            &mut params,
            self.rate_matrix.params_from_matrix(&self.backgd_freqs),
        );
        params
    }

    fn push_non_branch_params(&self, params: &mut Vec<f64>, rate_params: Vec<f64>) {
        if self.estimate_backgd {
            params.extend_from_slice(&self.backgd_freqs);
        }
        let nratevar = self.nratevar_params();
        if self.empirical_rates {
            if self.nratecats > 1 {
                params.extend_from_slice(&self.freqk);
            } else {
                params.extend(std::iter::repeat(1.0 / nratevar.max(1) as f64).take(nratevar));
            }
        } else if nratevar == 1 {
            params.push(if self.alpha > 0.0 { self.alpha } else { DEFAULT_ALPHA });
        }
        params.extend(rate_params);
    }

    /// Load a packed parameter vector into the model and refresh `Q`, its
    /// eigendecomposition and the transition matrices.
    ///
    /// # Errors
    ///
    /// [`PhyloHmmError::NumericDegeneracy`] for negative or non-finite
    /// branch lengths, scales or shapes.
    pub fn unpack_params(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.nparams() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "model has {} parameters, got {}",
                self.nparams(),
                params.len()
            )));
        }
        let mut i = 0;
        match self.estimate_branchlens {
            BranchLengthEstimation::All => {
                let slots = self.branch_slots();
                for s in &slots {
                    let value = params[s.slot];
                    if value.is_nan() || value < 0.0 {
                        return Err(PhyloHmmError::NumericDegeneracy(format!(
                            "negative branch length {value} for node {}",
                            s.node
                        )));
                    }
                    if let Some(node) = self.tree.node_mut(s.node) {
                        node.dparent = value * s.factor;
                    }
                }
                i += self.nbranch_params();
            }
            BranchLengthEstimation::ScaleOnly => {
                let value = params[0];
                if value.is_nan() || value < 0.0 {
                    return Err(PhyloHmmError::NumericDegeneracy(format!(
                        "negative branch scale {value}"
                    )));
                }
                self.scale = value;
                i += 1;
            }
            BranchLengthEstimation::None => {}
        }

        if self.estimate_backgd {
            let n = self.nstates();
            self.backgd_freqs = normalized(&params[i..i + n])?;
            i += n;
        }

        let nratevar = self.nratevar_params();
        if self.empirical_rates {
            if self.nratecats > 1 {
                self.freqk = normalized(&params[i..i + nratevar])?;
            }
        } else if self.nratecats > 1 {
            let alpha = params[i];
            if alpha.is_nan() || alpha <= 0.0 {
                return Err(PhyloHmmError::NumericDegeneracy(format!(
                    "gamma shape must stay positive, got {alpha}"
                )));
            }
            self.alpha = alpha;
            self.apply_gamma()?;
        }
        i += nratevar;

        self.rate_matrix.set_params(&params[i..], &self.backgd_freqs)?;
        self.update_transition_matrices()
    }

    /// Normalize `Q` to one expected substitution per unit time under `π`
    /// and return the factor it was divided by. Branch lengths are left
    /// alone; see [`TreeModel::scale_branches`].
    pub fn scale_rate_matrix(&mut self) -> Result<f64> {
        let factor = self.rate_matrix.normalize(&self.backgd_freqs)?;
        self.update_transition_matrices()?;
        Ok(factor)
    }

    /// Multiply every branch length by `factor`.
    pub fn scale_branches(&mut self, factor: f64) -> Result<()> {
        if factor.is_nan() || factor < 0.0 {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "invalid branch scale factor {factor}"
            )));
        }
        self.tree.scale(factor);
        self.update_transition_matrices()
    }
}

impl Summarizable for TreeModel {
    fn summary(&self) -> String {
        let rates = if self.empirical_rates {
            format!("{} empirical rate categories", self.nratecats)
        } else if self.nratecats > 1 {
            format!("gamma with {} categories (alpha {:.4})", self.nratecats, self.alpha)
        } else {
            "no rate variation".to_string()
        };
        format!(
            "TreeModel: {} over {} states, {} leaves, {}",
            self.subst_model(),
            self.nstates(),
            self.tree.leaves().len(),
            rates
        )
    }
}

fn normalized(values: &[f64]) -> Result<Vec<f64>> {
    let sum: f64 = values.iter().sum();
    if values.iter().any(|&v| v.is_nan() || v < 0.0) || !(sum > 0.0 && sum.is_finite()) {
        return Err(PhyloHmmError::NumericDegeneracy(format!(
            "cannot normalize distribution {values:?}"
        )));
    }
    Ok(values.iter().map(|v| v / sum).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform() -> Vec<f64> {
        vec![0.25; 4]
    }

    fn hky_model() -> TreeModel {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.05,(C:0.3,D:0.4):0.15);").unwrap();
        TreeModel::new(
            tree,
            Alphabet::dna(),
            SubstModel::Hky85,
            vec![0.3, 0.2, 0.2, 0.3],
            1,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn transition_matrices_are_stochastic() {
        let tm = hky_model();
        for n in tm.tree.nodes().iter().filter(|n| !n.is_root()) {
            let p = tm.transition_matrix(n.id, 0).unwrap();
            for i in 0..4 {
                assert_relative_eq!(p.row(i).sum(), 1.0, epsilon = 1e-10);
            }
        }
        assert!(tm.transition_matrix(tm.tree.root(), 0).is_none());
    }

    #[test]
    fn reversible_root_branches_share_a_slot() {
        let tm = hky_model();
        let slots = tm.branch_slots();
        assert_eq!(slots.len(), 6);
        assert_eq!(tm.nbranch_params(), 5);
        let root_slots: Vec<_> = slots.iter().filter(|s| tm.tree.is_root_child(s.node)).collect();
        assert_eq!(root_slots.len(), 2);
        assert!(root_slots.iter().all(|s| s.slot == 0 && s.factor == 0.5));
        // packed value is the sum of the two root branches
        let params = tm.params_from_model();
        assert_relative_eq!(params[0], 0.2, epsilon = 1e-12);
        assert_eq!(params.len(), 5 + 1);
    }

    #[test]
    fn nonreversible_root_branches_are_separate() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.05,C:0.3);").unwrap();
        let tm = TreeModel::new(tree, Alphabet::dna(), SubstModel::Unrest, uniform(), 1, 0.0)
            .unwrap();
        assert_eq!(tm.nbranch_params(), 4);
        assert_eq!(tm.nparams(), 4 + 12);
    }

    #[test]
    fn pack_unpack_layout() {
        let mut tm = hky_model();
        tm.set_gamma(4, 0.5).unwrap();
        tm.estimate_backgd = true;
        assert_eq!(tm.nparams(), 5 + 4 + 1 + 1);
        let mut params = tm.params_from_model();
        params[1] = 0.7;
        params[5] = 2.0; // unnormalized frequency
        params[9] = 1.5; // alpha
        params[10] = 4.0; // kappa
        tm.unpack_params(&params).unwrap();
        let first = tm.tree.preorder()[1];
        assert_relative_eq!(tm.tree.node(first).unwrap().dparent, 0.1, epsilon = 1e-12);
        assert_eq!(tm.alpha, 1.5);
        assert_relative_eq!(tm.backgd_freqs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(tm.backgd_freqs[0], 2.0 / 2.7, epsilon = 1e-12);
        assert_eq!(tm.rk.len(), 4);
    }

    #[test]
    fn unpack_rejects_negative_branch() {
        let mut tm = hky_model();
        let mut params = tm.params_from_model();
        params[2] = -0.1;
        assert!(matches!(
            tm.unpack_params(&params),
            Err(PhyloHmmError::NumericDegeneracy(_))
        ));
        assert!(tm.unpack_params(&params[1..]).is_err());
    }

    #[test]
    fn scale_only_and_fixed_branches() {
        let mut tm = hky_model();
        tm.estimate_branchlens = BranchLengthEstimation::ScaleOnly;
        assert_eq!(tm.nbranch_params(), 1);
        let mut params = tm.params_from_model();
        params[0] = 2.0;
        tm.unpack_params(&params).unwrap();
        assert_eq!(tm.scale, 2.0);
        let a = tm.tree.leaf_by_name("A").unwrap();
        assert_relative_eq!(tm.branch_length(tm.tree.node(a).unwrap()), 0.2, epsilon = 1e-12);

        tm.estimate_branchlens = BranchLengthEstimation::None;
        assert_eq!(tm.nparams(), 1);
    }

    #[test]
    fn root_leaf_is_pinned_and_excluded() {
        let tree = Tree::from_newick("(R:0.2,(A:0.1,B:0.1):0.3);").unwrap();
        let mut tm =
            TreeModel::new(tree, Alphabet::dna(), SubstModel::Jc69, uniform(), 1, 0.0).unwrap();
        assert!(tm.set_root_leaf("A").is_err());
        tm.set_root_leaf("R").unwrap();
        let r = tm.root_leaf.unwrap();
        assert_eq!(tm.tree.node(r).unwrap().dparent, 0.0);
        assert!(tm.branch_slots().iter().all(|s| s.node != r));
        assert_eq!(tm.nbranch_params(), 3);
        assert_eq!(tm.nparams(), 3);
    }

    #[test]
    fn deferred_rate_variation_keeps_its_slots() {
        let mut tm = hky_model();
        tm.set_gamma(4, 0.5).unwrap();
        let n = tm.nparams();
        tm.alpha = -4.0;
        tm.nratecats = 1;
        tm.rk = vec![1.0];
        tm.freqk = vec![1.0];
        assert_eq!(tm.nparams(), n);
        let params = tm.params_from_model();
        tm.unpack_params(&params).unwrap();
        assert_eq!(tm.alpha, -4.0);

        tm.set_empirical_rates(vec![0.5, 1.5], vec![1.0, 1.0]).unwrap();
        assert_eq!(tm.nratevar_params(), 2);
        assert_eq!(tm.freqk, vec![0.5, 0.5]);
    }

    #[test]
    fn scaling_rate_matrix_returns_factor() {
        let mut tm = hky_model();
        let before = tm.rate_matrix.expected_rate(&tm.backgd_freqs);
        let factor = tm.scale_rate_matrix().unwrap();
        assert_relative_eq!(factor, before, epsilon = 1e-12);
        assert_relative_eq!(
            tm.rate_matrix.expected_rate(&tm.backgd_freqs),
            1.0,
            epsilon = 1e-12
        );
        let total = tm.tree.total_length();
        tm.scale_branches(factor).unwrap();
        assert_relative_eq!(tm.tree.total_length(), total * factor, epsilon = 1e-12);
    }

    #[test]
    fn default_frequencies() {
        let msa = {
            let mut m = Alignment::from_strs(&["a", "b"], &["AAAC", "AAAG"], Alphabet::dna())
                .unwrap();
            m.build_suff_stats(1, false).unwrap();
            m
        };
        let jc = TreeModel::default_backgd_freqs(SubstModel::Jc69, &msa, None).unwrap();
        assert_eq!(jc, vec![0.25; 4]);
        let hky = TreeModel::default_backgd_freqs(SubstModel::Hky85, &msa, None).unwrap();
        assert_relative_eq!(hky[0], 0.75, epsilon = 1e-12);
        let r2 = TreeModel::default_backgd_freqs(SubstModel::R2, &msa, None);
        assert!(r2.is_err());
    }

    #[test]
    fn summary_mentions_model() {
        let tm = hky_model();
        assert_eq!(
            tm.summary(),
            "TreeModel: HKY85 over 4 states, 4 leaves, no rate variation"
        );
    }
}
