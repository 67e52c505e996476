//! Fitting tree models by expectation maximization.
//!
//! Each iteration collects posterior expected substitution counts at the
//! current parameters (E-step) and then maximizes the expected
//! complete-data log-likelihood with bounded BFGS (M-step). The inner
//! optimizer starts coarse, with the Taylor-approximate gradient when it
//! applies, and is tightened as the outer loop converges. Rate variation,
//! if requested, is switched off at first and introduced near convergence.

use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use phylohmm_core::{PhyloHmmError, Result};
use phylohmm_msa::Alignment;

use crate::bfgs::{minimize_bfgs, numerical_gradient, Bounds, Objective, Precision};
use crate::gradient::{em_gradient, supports_analytic_gradient, GradientMode};
use crate::likelihood::{compute_posteriors, expected_log_likelihood, TreePosteriors};
use crate::tree_model::{BranchLengthEstimation, TreeModel};

/// Lower bound for estimated equilibrium frequencies.
pub const EQ_FREQ_LOWER_BOUND: f64 = 1e-3;

/// EM settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmConfig {
    /// Target precision for the outer loop and the final BFGS runs.
    pub precision: Precision,
    /// Bound on EM iterations; `None` runs until convergence.
    pub max_iterations: Option<usize>,
    /// Bound on iterations of each BFGS run.
    pub bfgs_max_iterations: usize,
    /// Restrict the data to one site category.
    pub category: Option<usize>,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Medium,
            max_iterations: None,
            bfgs_max_iterations: 1000,
            category: None,
        }
    }
}

/// Outcome of [`fit_em`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmSummary {
    /// Log-likelihood at the final parameters.
    pub lnl: f64,
    pub iterations: usize,
    /// Log-likelihood at the start of every iteration.
    pub trace: Vec<f64>,
    /// Whether the convergence criterion was met before the iteration cap.
    pub converged: bool,
}

/// Rate-variation settings held back during the early iterations.
struct DeferredRates {
    nratecats: usize,
    alpha: f64,
    rk: Vec<f64>,
    freqk: Vec<f64>,
}

impl DeferredRates {
    fn defer(tm: &mut TreeModel) -> Option<Self> {
        if tm.nratecats < 2 {
            return None;
        }
        let saved = Self {
            nratecats: tm.nratecats,
            alpha: tm.alpha,
            rk: std::mem::replace(&mut tm.rk, vec![1.0]),
            freqk: std::mem::replace(&mut tm.freqk, vec![1.0]),
        };
        tm.alpha = -(saved.nratecats as f64);
        tm.nratecats = 1;
        Some(saved)
    }

    fn restore(self, tm: &mut TreeModel) {
        tm.nratecats = self.nratecats;
        tm.alpha = self.alpha;
        tm.rk = self.rk;
        tm.freqk = self.freqk;
    }
}

/// Negated expected complete-data log-likelihood at fixed posteriors.
struct PartialLikelihood<'a> {
    tm: &'a mut TreeModel,
    post: &'a TreePosteriors,
    mode: Option<GradientMode>,
}

impl Objective for PartialLikelihood<'_> {
    fn cost(&mut self, x: &[f64]) -> Result<f64> {
        match self.tm.unpack_params(x) {
            Ok(()) => Ok(-expected_log_likelihood(self.tm, self.post)),
            // outside the model's domain: reject the step
            Err(PhyloHmmError::NumericDegeneracy(_)) => Ok(f64::INFINITY),
            Err(e) => Err(e),
        }
    }

    fn gradient(&mut self, x: &[f64], fx: f64, bounds: &Bounds) -> Result<Vec<f64>> {
        match self.mode {
            Some(mode) => {
                self.tm.unpack_params(x)?;
                let grad = em_gradient(self.tm, self.post, mode)?;
                Ok(grad.into_iter().map(|g| -g).collect())
            }
            None => numerical_gradient(self, x, fx, bounds),
        }
    }
}

/// Fit `tm` to `msa` by EM, starting from the packed parameters `params`
/// (updated in place).
///
/// Sufficient statistics of tuple size `order + 1` are built when `msa`
/// has none. After convergence `Q` is normalized to one expected
/// substitution per unit time and every global scale is absorbed into the
/// branch lengths; the final log-likelihood is stored in `tm.lnl`.
///
/// # Errors
///
/// Propagates likelihood and optimizer errors; the parameter vector must
/// have [`TreeModel::nparams`] entries.
pub fn fit_em(
    tm: &mut TreeModel,
    msa: &mut Alignment,
    params: &mut [f64],
    config: &EmConfig,
) -> Result<EmSummary> {
    if msa.ss.is_none() {
        msa.build_suff_stats(tm.order() + 1, false)?;
    }
    if params.len() != tm.nparams() {
        return Err(PhyloHmmError::DimensionMismatch(format!(
            "model has {} parameters, got {}",
            tm.nparams(),
            params.len()
        )));
    }
    let msa: &Alignment = msa;
    let target = config.precision;

    let mut lower = vec![0.0; params.len()];
    if tm.estimate_backgd {
        let offset = tm.nbranch_params();
        for l in &mut lower[offset..offset + tm.nstates()] {
            *l = EQ_FREQ_LOWER_BOUND;
        }
    }
    let bounds = Bounds {
        lower: Some(lower),
        upper: None,
    };

    let mut deferred = DeferredRates::defer(tm);
    let mut mode = supports_analytic_gradient(tm).then_some(GradientMode::Approximate);
    let mut bfgs_prec = Precision::Crude;
    let mut home_stretch = false;
    let mut h = DMatrix::identity(params.len(), params.len());
    let mut last = f64::NEG_INFINITY;
    let mut trace = Vec::new();
    let mut converged = false;
    let mut lnl;
    let mut it = 0;

    loop {
        it += 1;
        tm.unpack_params(params)?;
        let (ll, post) = compute_posteriors(tm, msa, config.category)?;
        lnl = ll;
        trace.push(ll);
        let improvement = ((last - ll) / ll).abs();
        last = ll;
        debug!(iteration = it, lnl = ll, improvement, params = ?params, "em iteration");

        if improvement < target.em_threshold() && bfgs_prec == target && deferred.is_none() {
            converged = true;
            break;
        }
        if config.max_iterations.is_some_and(|max| it >= max) {
            warn!(iterations = it, "em stopped at iteration limit before converging");
            break;
        }

        let crude = improvement < Precision::Crude.em_threshold();
        if crude {
            if mode == Some(GradientMode::Approximate) {
                info!(iteration = it, "switching to exact gradients");
                mode = Some(GradientMode::Exact);
                if bfgs_prec != target {
                    bfgs_prec = bfgs_prec.finer().min(target);
                }
            } else {
                home_stretch = true;
                bfgs_prec = target;
            }
        }

        let mut objective = PartialLikelihood {
            tm: &mut *tm,
            post: &post,
            mode,
        };
        minimize_bfgs(
            &mut objective,
            params,
            &bounds,
            bfgs_prec,
            &mut h,
            config.bfgs_max_iterations,
        )?;

        // weights have a closed-form maximum given the category posteriors
        if tm.nratecats > 1 && tm.empirical_rates {
            let offset = tm.ratevar_offset();
            let total: f64 = post.rcat_expected_nsites.iter().sum();
            if total > 0.0 {
                for (k, n) in post.rcat_expected_nsites.iter().enumerate() {
                    params[offset + k] = n / total;
                }
            }
        }

        if crude && home_stretch {
            if let Some(saved) = deferred.take() {
                info!(iteration = it, nratecats = saved.nratecats, "introducing rate variation");
                saved.restore(tm);
            }
        }
    }

    if let Some(saved) = deferred.take() {
        saved.restore(tm);
        tm.unpack_params(params)?;
    }
    tm.lnl = Some(lnl);
    finalize_scale(tm)?;
    info!(iterations = it, lnl, converged, "em finished");

    Ok(EmSummary {
        lnl,
        iterations: it,
        trace,
        converged,
    })
}

/// Normalize `Q` and fold every global rate factor into branch lengths.
fn finalize_scale(tm: &mut TreeModel) -> Result<()> {
    let mut factor = 1.0;
    if !tm.subst_model().is_fixed_rate() {
        factor *= tm.scale_rate_matrix()?;
    }
    if tm.estimate_branchlens == BranchLengthEstimation::ScaleOnly {
        factor *= tm.scale;
        tm.scale = 1.0;
    }
    if tm.nratecats > 1 && tm.empirical_rates {
        let mean: f64 = tm.rk.iter().zip(&tm.freqk).map(|(r, f)| r * f).sum();
        if mean > 0.0 {
            tm.rk.iter_mut().for_each(|r| *r /= mean);
            factor *= mean;
        }
    }
    tm.scale_branches(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::log_likelihood;
    use crate::subst_model::SubstModel;
    use crate::tree::{NodeId, Tree};
    use approx::assert_relative_eq;
    use phylohmm_msa::Alphabet;

    /// Deterministic sequences evolved down `tm`'s tree.
    fn simulate(tm: &TreeModel, len: usize, seed: u64) -> Alignment {
        let mut state = seed;
        let mut uniform = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        let draw = |probs: &mut dyn Iterator<Item = f64>, u: f64| {
            let mut acc = 0.0;
            let mut last = 0;
            for (i, p) in probs.enumerate() {
                acc += p;
                last = i;
                if u < acc {
                    return i;
                }
            }
            last
        };
        let symbols = tm.alphabet.symbols().to_vec();
        let tree = &tm.tree;
        let mut rows: Vec<Vec<u8>> = vec![Vec::with_capacity(len); tree.nnodes()];
        for _ in 0..len {
            let mut states: Vec<usize> = vec![0; tree.nnodes()];
            for id in tree.preorder() {
                let u = uniform();
                states[id] = match tree.node(id).and_then(|n| n.parent) {
                    None => draw(&mut tm.backgd_freqs.iter().copied(), u),
                    Some(p) => {
                        let m = tm.transition_matrix(id, 0).unwrap();
                        draw(&mut m.row(states[p]).iter().copied(), u)
                    }
                };
            }
            for (id, row) in rows.iter_mut().enumerate() {
                row.push(symbols[states[id]]);
            }
        }
        let leaves: Vec<NodeId> = tree.leaves();
        let names = leaves
            .iter()
            .map(|&l| tree.node(l).unwrap().name.clone().unwrap())
            .collect();
        let seqs = leaves.iter().map(|&l| rows[l].clone()).collect();
        Alignment::new(names, seqs, tm.alphabet.clone()).unwrap()
    }

    fn true_hky() -> TreeModel {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.1,(C:0.15,D:0.25):0.1);").unwrap();
        let mut tm = TreeModel::new(
            tree,
            Alphabet::dna(),
            SubstModel::Hky85,
            vec![0.3, 0.2, 0.2, 0.3],
            1,
            0.0,
        )
        .unwrap();
        tm.set_rate_params(&[4.0]).unwrap();
        tm.scale_rate_matrix().unwrap();
        tm
    }

    #[test]
    fn jc69_two_sequences_recovers_distance() {
        let tree = Tree::from_newick("(a:0.3,b:0.3);").unwrap();
        let mut tm =
            TreeModel::new(tree, Alphabet::dna(), SubstModel::Jc69, vec![0.25; 4], 1, 0.0).unwrap();
        let mut msa =
            Alignment::from_strs(&["a", "b"], &["ACGTACGTAC", "ACGTACGTTT"], Alphabet::dna())
                .unwrap();
        let mut params = tm.init_params(0.1);
        assert_eq!(params.len(), 1);
        let config = EmConfig {
            precision: Precision::High,
            ..EmConfig::default()
        };
        let summary = fit_em(&mut tm, &mut msa, &mut params, &config).unwrap();
        let p: f64 = 0.2;
        let expect = -0.75 * (1.0 - 4.0 / 3.0 * p).ln();
        assert_relative_eq!(tm.tree.total_length(), expect, epsilon = 2e-3);
        assert!(summary.converged);
        assert_eq!(tm.lnl, Some(summary.lnl));
    }

    #[test]
    fn hky_fit_improves_on_truth_and_is_monotone() {
        let truth = true_hky();
        let mut msa = simulate(&truth, 1500, 42);
        msa.build_suff_stats(1, false).unwrap();
        let true_lnl = log_likelihood(&truth, &msa, None).unwrap();

        let pi = TreeModel::default_backgd_freqs(SubstModel::Hky85, &msa, None).unwrap();
        let mut tm = TreeModel::new(
            truth.tree.clone(),
            Alphabet::dna(),
            SubstModel::Hky85,
            pi,
            1,
            0.0,
        )
        .unwrap();
        let mut params = tm.init_params(0.05);
        let summary = fit_em(&mut tm, &mut msa, &mut params, &EmConfig::default()).unwrap();

        assert!(summary.converged);
        for w in summary.trace.windows(2) {
            assert!(w[1] >= w[0] - 1e-6 * w[0].abs(), "trace decreased: {:?}", w);
        }
        assert!(summary.lnl >= true_lnl - 1e-3);
        let kappa = tm.rate_matrix.params_from_matrix(&tm.backgd_freqs)[0];
        assert!(kappa > 2.5 && kappa < 6.5, "kappa {kappa}");
        // final scaling leaves the likelihood unchanged
        let refit = log_likelihood(&tm, &msa, None).unwrap();
        assert_relative_eq!(refit, summary.lnl, epsilon = 1e-6 * summary.lnl.abs());
        assert_relative_eq!(
            tm.rate_matrix.expected_rate(&tm.backgd_freqs),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn gamma_rate_variation_is_introduced() {
        let truth = true_hky();
        let mut msa = simulate(&truth, 600, 7);
        let pi = vec![0.25; 4];
        let mut tm =
            TreeModel::new(truth.tree.clone(), Alphabet::dna(), SubstModel::Hky85, pi, 4, 1.0)
                .unwrap();
        let mut params = tm.init_params(0.1);
        let config = EmConfig {
            precision: Precision::Low,
            ..EmConfig::default()
        };
        let summary = fit_em(&mut tm, &mut msa, &mut params, &config).unwrap();
        assert!(summary.converged);
        assert_eq!(tm.nratecats, 4);
        assert!(tm.alpha > 0.0);
        assert_eq!(tm.rk.len(), 4);
        let refit = log_likelihood(&tm, &msa, None).unwrap();
        assert_relative_eq!(refit, summary.lnl, epsilon = 1e-6 * summary.lnl.abs());
    }

    #[test]
    fn scale_only_fit_absorbs_scale() {
        let truth = true_hky();
        let mut msa = simulate(&truth, 800, 3);
        let mut tm = truth.clone();
        tm.scale_branches(0.25).unwrap();
        tm.estimate_branchlens = BranchLengthEstimation::ScaleOnly;
        let mut params = tm.params_from_model();
        let before = tm.tree.total_length();
        let summary = fit_em(&mut tm, &mut msa, &mut params, &EmConfig::default()).unwrap();
        assert_eq!(tm.scale, 1.0);
        // relative branch lengths are preserved
        let ratio = tm.tree.total_length() / before;
        for (a, b) in tm.tree.nodes().iter().zip(truth.tree.nodes()) {
            assert_relative_eq!(a.dparent, b.dparent * 0.25 * ratio, epsilon = 1e-9);
        }
        let refit = log_likelihood(&tm, &msa, None).unwrap();
        assert_relative_eq!(refit, summary.lnl, epsilon = 1e-6 * summary.lnl.abs());
    }

    #[test]
    fn iteration_cap_and_bad_params() {
        let truth = true_hky();
        let mut msa = simulate(&truth, 200, 11);
        let mut tm = truth.clone();
        let mut short = vec![0.1];
        assert!(fit_em(&mut tm, &mut msa, &mut short, &EmConfig::default()).is_err());

        let mut params = tm.init_params(0.1);
        let config = EmConfig {
            max_iterations: Some(2),
            ..EmConfig::default()
        };
        let summary = fit_em(&mut tm, &mut msa, &mut params, &config).unwrap();
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.trace.len(), 2);
        assert!(!summary.converged);
    }
}
