//! Analytic gradients of the expected complete-data log-likelihood with
//! respect to the packed tree-model parameters.
//!
//! Branch lengths and the gamma shape use `∂P/∂t = V diag(λ e^{λt}) V⁻¹`.
//! Rate-matrix parameters use either a fourth-order Taylor expansion of
//! `exp(Qt)` ([`GradientMode::Approximate`]) or the Schadt–Lange formula
//! ([`GradientMode::Exact`]). Every term has the form
//! `Σ N[i][j] · ∂P[i][j]/∂θ / P[i][j]`; a zero probability contributes 0
//! when its derivative is also 0 and ±∞ otherwise.
//!
//! All scratch matrices are allocated per call.

use nalgebra::DMatrix;

use phylohmm_core::prob::safe_div;
use phylohmm_core::{PhyloHmmError, Result};

use crate::eigen::EigenSystem;
use crate::gamma::{discrete_gamma_rates, DERIV_EPSILON};
use crate::likelihood::TreePosteriors;
use crate::subst_model::{neighbors, RateTerm};
use crate::tree_model::{BranchLengthEstimation, TreeModel};

/// How rate-matrix derivatives are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GradientMode {
    /// Fourth-order Taylor expansion around `Q`, exploiting sparsity.
    Approximate,
    /// Schadt–Lange formula through the eigendecomposition.
    Exact,
}

/// Whether the analytic gradient covers every parameter of `tm`: all
/// branch lengths free, a rate matrix that is not normalized by
/// construction, and fixed equilibrium frequencies.
pub fn supports_analytic_gradient(tm: &TreeModel) -> bool {
    tm.estimate_branchlens == BranchLengthEstimation::All
        && !tm.subst_model().is_fixed_rate()
        && !tm.estimate_backgd
}

/// Gradient of [`expected_log_likelihood`](crate::likelihood::expected_log_likelihood)
/// at the model's current parameters.
///
/// # Errors
///
/// [`PhyloHmmError::Precondition`] when the model is outside the scope of
/// [`supports_analytic_gradient`] or not diagonalized;
/// [`PhyloHmmError::NumericDegeneracy`] when complex arithmetic leaves an
/// imaginary residue.
pub fn em_gradient(tm: &TreeModel, post: &TreePosteriors, mode: GradientMode) -> Result<Vec<f64>> {
    if !supports_analytic_gradient(tm) {
        return Err(PhyloHmmError::Precondition(format!(
            "no analytic gradient for {} with these estimation settings",
            tm.subst_model()
        )));
    }
    let eigen = tm
        .rate_matrix
        .eigen()
        .ok_or_else(|| PhyloHmmError::Precondition("rate matrix is not diagonalized".into()))?;
    let mut grad = vec![0.0; tm.nparams()];

    branch_gradient(tm, post, eigen, &mut grad)?;
    alpha_gradient(tm, post, eigen, &mut grad)?;

    let offset = tm.rate_params_offset();
    match mode {
        GradientMode::Exact => exact_rate_gradient(tm, post, eigen, &mut grad[offset..])?,
        GradientMode::Approximate => approx_rate_gradient(tm, post, &mut grad[offset..])?,
    }
    Ok(grad)
}

/// `Σ_ij N[i][j] · dP[i][j] / P[i][j]`.
fn weighted_ratio(dp: &DMatrix<f64>, p: &DMatrix<f64>, counts: &DMatrix<f64>) -> f64 {
    let mut total = 0.0;
    for ((&d, &prob), &n) in dp.iter().zip(p.iter()).zip(counts.iter()) {
        if n != 0.0 {
            total += safe_div(d, prob) * n;
        }
    }
    total
}

/// Nodes whose branch enters the likelihood.
fn scored_nodes(tm: &TreeModel) -> impl Iterator<Item = usize> + '_ {
    tm.tree
        .nodes()
        .iter()
        .filter(move |n| !n.is_root() && Some(n.id) != tm.root_leaf)
        .map(|n| n.id)
}

fn branch_gradient(
    tm: &TreeModel,
    post: &TreePosteriors,
    eigen: &EigenSystem,
    grad: &mut [f64],
) -> Result<()> {
    for slot in tm.branch_slots() {
        let Some(node) = tm.tree.node(slot.node) else {
            continue;
        };
        for k in 0..tm.nratecats {
            let Some(p) = tm.transition_matrix(slot.node, k) else {
                continue;
            };
            let t = tm.branch_length(node) * tm.rk[k];
            let dp = eigen.exp_derivative(t, tm.rk[k] * slot.factor)?;
            grad[slot.slot] += weighted_ratio(&dp, p, &post.expected_nsubst_tot[k][slot.node]);
        }
    }
    Ok(())
}

fn alpha_gradient(
    tm: &TreeModel,
    post: &TreePosteriors,
    eigen: &EigenSystem,
    grad: &mut [f64],
) -> Result<()> {
    // empirical weights and deferred shapes have zero gradient
    if tm.empirical_rates || tm.nratecats < 2 {
        return Ok(());
    }
    let idx = tm.ratevar_offset();
    let tweaked = discrete_gamma_rates(tm.alpha + DERIV_EPSILON, tm.nratecats)?;
    for k in 0..tm.nratecats {
        let dr_da = (tweaked[k] - tm.rk[k]) / DERIV_EPSILON;
        for id in scored_nodes(tm) {
            let (Some(node), Some(p)) = (tm.tree.node(id), tm.transition_matrix(id, k)) else {
                continue;
            };
            let bl = tm.branch_length(node);
            let dp = eigen.exp_derivative(bl * tm.rk[k], bl * dr_da)?;
            grad[idx] += weighted_ratio(&dp, p, &post.expected_nsubst_tot[k][id]);
        }
    }
    Ok(())
}

fn exact_rate_gradient(
    tm: &TreeModel,
    post: &TreePosteriors,
    eigen: &EigenSystem,
    grad: &mut [f64],
) -> Result<()> {
    for (p_idx, g) in grad.iter_mut().enumerate() {
        let dq = tm.rate_matrix.param_derivative(p_idx, &tm.backgd_freqs);
        let projected = eigen.project(&dq);
        for id in scored_nodes(tm) {
            let Some(node) = tm.tree.node(id) else {
                continue;
            };
            for k in 0..tm.nratecats {
                let Some(p) = tm.transition_matrix(id, k) else {
                    continue;
                };
                let t = tm.branch_length(node) * tm.rk[k];
                let dp = eigen.exp_param_derivative(&projected, t)?;
                *g += weighted_ratio(&dp, p, &post.expected_nsubst_tot[k][id]);
            }
        }
    }
    Ok(())
}

/// Non-zero entries of `∂Q/∂θ_p` as `(row, col, value)`, diagonal included.
fn sparse_derivative(tm: &TreeModel, p: usize) -> Vec<(usize, usize, f64)> {
    let mut entries: Vec<(usize, usize, f64)> = Vec::new();
    for cell in tm.rate_matrix.cells() {
        if cell.term != RateTerm::Param(p) {
            continue;
        }
        let coef = tm.rate_matrix.coefficient(cell.col, &tm.backgd_freqs);
        entries.push((cell.row, cell.col, coef));
        match entries.iter_mut().find(|(r, c, _)| *r == cell.row && *c == cell.row) {
            Some(diag) => diag.2 -= coef,
            None => entries.push((cell.row, cell.row, -coef)),
        }
    }
    entries
}

/// `dQ · m` for sparse `dQ`.
fn sparse_left(dq: &[(usize, usize, f64)], m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();
    let mut out = DMatrix::zeros(n, n);
    for &(r, c, v) in dq {
        for j in 0..n {
            out[(r, j)] += v * m[(c, j)];
        }
    }
    out
}

/// `m · dQ` for sparse `dQ`.
fn sparse_right(m: &DMatrix<f64>, dq: &[(usize, usize, f64)]) -> DMatrix<f64> {
    let n = m.nrows();
    let mut out = DMatrix::zeros(n, n);
    for &(r, c, v) in dq {
        for i in 0..n {
            out[(i, c)] += m[(i, r)] * v;
        }
    }
    out
}

/// `Q · m`, visiting only the neighbors of each state (the only non-zero
/// entries of a row of `Q`).
fn neighbor_product(q: &DMatrix<f64>, m: &DMatrix<f64>, nbrs: &[Vec<usize>]) -> DMatrix<f64> {
    let n = q.nrows();
    let mut out = DMatrix::zeros(n, n);
    for i in 0..n {
        for &k in &nbrs[i] {
            let qik = q[(i, k)];
            if qik == 0.0 {
                continue;
            }
            for j in 0..n {
                out[(i, j)] += qik * m[(k, j)];
            }
        }
    }
    out
}

fn approx_rate_gradient(tm: &TreeModel, post: &TreePosteriors, grad: &mut [f64]) -> Result<()> {
    let q = tm.rate_matrix.matrix();
    let nstates = tm.nstates();
    let nbrs: Vec<Vec<usize>> = (0..nstates)
        .map(|s| neighbors(s, tm.order(), tm.rate_matrix.alph_size()))
        .collect();
    let q2 = neighbor_product(q, q, &nbrs);
    let q3 = neighbor_product(q, &q2, &nbrs);

    for (p_idx, g) in grad.iter_mut().enumerate() {
        let dq = sparse_derivative(tm, p_idx);
        let mut dq_dense = DMatrix::zeros(nstates, nstates);
        for &(r, c, v) in &dq {
            dq_dense[(r, c)] += v;
        }
        let dq_q = sparse_left(&dq, q);
        let q_dq = sparse_right(q, &dq);
        let dq_q2 = sparse_left(&dq, &q2);
        let q2_dq = sparse_right(&q2, &dq);
        let q_dq_q = neighbor_product(q, &dq_q, &nbrs);

        let term2 = &dq_q + &q_dq;
        let term3 = &dq_q2 + &q_dq_q + &q2_dq;
        let term4 = sparse_left(&dq, &q3)
            + neighbor_product(q, &dq_q2, &nbrs)
            + &q2 * &dq_q
            + sparse_right(&q3, &dq);

        for id in scored_nodes(tm) {
            let Some(node) = tm.tree.node(id) else {
                continue;
            };
            for k in 0..tm.nratecats {
                let Some(p) = tm.transition_matrix(id, k) else {
                    continue;
                };
                let t = tm.branch_length(node) * tm.rk[k];
                let (t2, t3, t4) = (t * t / 2.0, t * t * t / 6.0, t * t * t * t / 24.0);
                let dp = &dq_dense * t + &term2 * t2 + &term3 * t3 + &term4 * t4;
                *g += weighted_ratio(&dp, p, &post.expected_nsubst_tot[k][id]);
            }
        }
    }
    Ok(())
}
