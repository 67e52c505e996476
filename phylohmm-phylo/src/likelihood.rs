//! Felsenstein pruning over sufficient statistics, with posterior expected
//! substitution counts for EM.
//!
//! Each distinct column tuple is evaluated once and weighted by its count.
//! A leaf observes the last `order + 1` columns of its row in the tuple;
//! gap, missing and other non-alphabet characters are compatible with any
//! state digit.

use std::ops::Range;

use nalgebra::DMatrix;

use phylohmm_core::{PhyloHmmError, Result};
use phylohmm_msa::{Alignment, SufficientStats};

use crate::tree::NodeId;
use crate::tree_model::TreeModel;

const CHUNK_SIZE: usize = 256;

/// Posterior expectations collected in one E-step.
#[derive(Debug, Clone, PartialEq)]
pub struct TreePosteriors {
    /// `[k][node]`: expected number of branches in category `k` with the
    /// parent in state `i` and the node in state `j`, summed over columns.
    /// The root entry stays zero.
    pub expected_nsubst_tot: Vec<Vec<DMatrix<f64>>>,
    /// `[k][i]`: expected number of columns with the root in state `i`.
    pub expected_root: Vec<Vec<f64>>,
    /// `[k]`: expected number of columns in rate category `k`.
    pub rcat_expected_nsites: Vec<f64>,
}

impl TreePosteriors {
    pub fn new(nratecats: usize, nnodes: usize, nstates: usize) -> Self {
        Self {
            expected_nsubst_tot: vec![vec![DMatrix::zeros(nstates, nstates); nnodes]; nratecats],
            expected_root: vec![vec![0.0; nstates]; nratecats],
            rcat_expected_nsites: vec![0.0; nratecats],
        }
    }

    fn merge(&mut self, other: &TreePosteriors) {
        for (a, b) in self.expected_nsubst_tot.iter_mut().zip(&other.expected_nsubst_tot) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
        for (a, b) in self.expected_root.iter_mut().zip(&other.expected_root) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
        for (x, y) in self.rcat_expected_nsites.iter_mut().zip(&other.rcat_expected_nsites) {
            *x += y;
        }
    }
}

/// Log-likelihood of `msa` under `tm`, over the columns of category `cat`
/// when given.
///
/// # Errors
///
/// - [`PhyloHmmError::Precondition`] when the alignment has no statistics
///   or a leaf has no row.
/// - [`PhyloHmmError::NumericDegeneracy`] when a column has zero or
///   non-finite likelihood.
pub fn log_likelihood(tm: &TreeModel, msa: &Alignment, cat: Option<usize>) -> Result<f64> {
    let engine = Pruning::new(tm, msa)?;
    let weights = tuple_weights(engine.ss, cat)?;
    let ranges = chunk_ranges(weights.len());

    #[cfg(feature = "parallel")]
    let parts = {
        use rayon::prelude::*;
        ranges
            .into_par_iter()
            .map(|r| engine.log_likelihood_range(r, weights))
            .collect::<Result<Vec<_>>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let parts = ranges
        .into_iter()
        .map(|r| engine.log_likelihood_range(r, weights))
        .collect::<Result<Vec<_>>>()?;

    Ok(parts.iter().sum())
}

/// Log-likelihood of every distinct tuple, indexed like the statistics.
pub fn tuple_log_likelihoods(tm: &TreeModel, msa: &Alignment) -> Result<Vec<f64>> {
    let engine = Pruning::new(tm, msa)?;
    (0..engine.ss.ntuples())
        .map(|t| engine.tuple_likelihood(t).map(f64::ln))
        .collect()
}

/// Log-likelihood together with the posterior expectations EM needs.
pub fn compute_posteriors(
    tm: &TreeModel,
    msa: &Alignment,
    cat: Option<usize>,
) -> Result<(f64, TreePosteriors)> {
    let engine = Pruning::new(tm, msa)?;
    let weights = tuple_weights(engine.ss, cat)?;
    let ranges = chunk_ranges(weights.len());

    #[cfg(feature = "parallel")]
    let parts = {
        use rayon::prelude::*;
        ranges
            .into_par_iter()
            .map(|r| engine.posteriors_range(r, weights))
            .collect::<Result<Vec<_>>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let parts = ranges
        .into_iter()
        .map(|r| engine.posteriors_range(r, weights))
        .collect::<Result<Vec<_>>>()?;

    let mut post = TreePosteriors::new(tm.nratecats, tm.tree.nnodes(), tm.nstates());
    let mut lnl = 0.0;
    for (part_lnl, part) in &parts {
        lnl += part_lnl;
        post.merge(part);
    }
    Ok((lnl, post))
}

/// Expected complete-data log-likelihood of the current model under fixed
/// posteriors: `Σ N[i][j] ln P[i][j]` over branches and categories plus
/// the root term. This is the quantity the M-step maximizes.
pub fn expected_log_likelihood(tm: &TreeModel, post: &TreePosteriors) -> f64 {
    let mut total = 0.0;
    for (k, per_node) in post.expected_nsubst_tot.iter().enumerate().take(tm.nratecats) {
        for node in tm.tree.nodes() {
            if node.is_root() || Some(node.id) == tm.root_leaf {
                continue;
            }
            let Some(p) = tm.transition_matrix(node.id, k) else {
                continue;
            };
            let counts = &per_node[node.id];
            for (n, &prob) in counts.iter().zip(p.iter()) {
                if *n > 0.0 {
                    if prob <= 0.0 {
                        return f64::NEG_INFINITY;
                    }
                    total += n * prob.ln();
                }
            }
        }
    }
    for root in post.expected_root.iter().take(tm.nratecats) {
        for (n, &pi) in root.iter().zip(&tm.backgd_freqs) {
            if *n > 0.0 {
                if pi <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                total += n * pi.ln();
            }
        }
    }
    total
}

fn tuple_weights(ss: &SufficientStats, cat: Option<usize>) -> Result<&[f64]> {
    match cat {
        None => Ok(&ss.counts),
        Some(c) => ss
            .cat_counts
            .as_ref()
            .and_then(|cc| cc.get(c))
            .map(Vec::as_slice)
            .ok_or_else(|| PhyloHmmError::Precondition(format!("no counts for category {c}"))),
    }
}

fn chunk_ranges(n: usize) -> Vec<Range<usize>> {
    (0..n)
        .step_by(CHUNK_SIZE)
        .map(|start| start..(start + CHUNK_SIZE).min(n))
        .collect()
}

/// Per-alignment context for pruning: leaf rows and traversal orders.
struct Pruning<'a> {
    tm: &'a TreeModel,
    ss: &'a SufficientStats,
    nseqs: usize,
    /// Alignment row of each leaf, by node id.
    leaf_row: Vec<Option<usize>>,
    postorder: Vec<NodeId>,
    preorder: Vec<NodeId>,
}

/// Conditional likelihoods of one tuple in one rate category.
struct Inside {
    /// `partial[node][j]`: likelihood of the data below `node` given state `j`.
    partial: Vec<Vec<f64>>,
    /// `message[node][i] = Σ_j P[i][j] partial[node][j]`.
    message: Vec<Vec<f64>>,
    likelihood: f64,
}

impl<'a> Pruning<'a> {
    fn new(tm: &'a TreeModel, msa: &'a Alignment) -> Result<Self> {
        let ss = msa.ss.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("alignment has no sufficient statistics".into())
        })?;
        if ss.tuple_size < tm.order() + 1 {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "model of order {} needs tuples of size at least {}, got {}",
                tm.order(),
                tm.order() + 1,
                ss.tuple_size
            )));
        }
        if msa.alphabet != tm.alphabet {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "alignment alphabet '{}' differs from model alphabet '{}'",
                msa.alphabet, tm.alphabet
            )));
        }
        let mut leaf_row = vec![None; tm.tree.nnodes()];
        for id in tm.tree.leaves() {
            let name = tm
                .tree
                .node(id)
                .and_then(|n| n.name.as_deref())
                .unwrap_or_default();
            let row = msa.seq_index(name).ok_or_else(|| {
                PhyloHmmError::Precondition(format!("leaf '{name}' has no row in the alignment"))
            })?;
            leaf_row[id] = Some(row);
        }
        Ok(Self {
            tm,
            ss,
            nseqs: msa.nseqs(),
            leaf_row,
            postorder: tm.tree.postorder(),
            preorder: tm.tree.preorder(),
        })
    }

    /// 1 for every state consistent with the row's characters, else 0.
    fn leaf_mask(&self, tuple: usize, row: usize) -> Vec<f64> {
        let order = self.tm.order();
        let a = self.tm.alphabet.size();
        let digits: Vec<Option<usize>> = (0..=order)
            .map(|k| {
                let offset = -((order - k) as i64);
                let c = self.ss.col_char(tuple, row, offset, self.nseqs);
                self.tm.alphabet.index_of(c)
            })
            .collect();
        let nstates = self.tm.nstates();
        (0..nstates)
            .map(|state| {
                let mut rest = state;
                // least significant digit is the newest column
                for d in digits.iter().rev() {
                    let digit = rest % a;
                    rest /= a;
                    if d.is_some_and(|d| d != digit) {
                        return 0.0;
                    }
                }
                1.0
            })
            .collect()
    }

    fn leaf_masks(&self, tuple: usize) -> Vec<Option<Vec<f64>>> {
        self.leaf_row
            .iter()
            .map(|row| row.map(|r| self.leaf_mask(tuple, r)))
            .collect()
    }

    fn inside(&self, masks: &[Option<Vec<f64>>], k: usize) -> Inside {
        let tree = &self.tm.tree;
        let n = tree.nnodes();
        let s = self.tm.nstates();
        let mut partial = vec![Vec::new(); n];
        let mut message = vec![Vec::new(); n];
        for &id in &self.postorder {
            let node = &tree.nodes()[id];
            partial[id] = match &masks[id] {
                Some(mask) => mask.clone(),
                None => {
                    let mut v = vec![1.0; s];
                    for c in node.children() {
                        v.iter_mut().zip(&message[c]).for_each(|(x, m)| *x *= m);
                    }
                    v
                }
            };
            if let Some(p) = self.tm.transition_matrix(id, k) {
                message[id] = (0..s)
                    .map(|i| (0..s).map(|j| p[(i, j)] * partial[id][j]).sum::<f64>())
                    .collect();
            }
        }
        let root = tree.root();
        let likelihood: f64 = partial[root]
            .iter()
            .zip(&self.tm.backgd_freqs)
            .map(|(l, pi)| l * pi)
            .sum();
        Inside {
            partial,
            message,
            likelihood,
        }
    }

    /// Mixture likelihood of one tuple.
    fn tuple_likelihood(&self, tuple: usize) -> Result<f64> {
        let masks = self.leaf_masks(tuple);
        let mut total = 0.0;
        for k in 0..self.tm.nratecats {
            total += self.tm.freqk[k] * self.inside(&masks, k).likelihood;
        }
        if !(total > 0.0 && total.is_finite()) {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "tuple {tuple} has likelihood {total}"
            )));
        }
        Ok(total)
    }

    fn log_likelihood_range(&self, range: Range<usize>, weights: &[f64]) -> Result<f64> {
        let mut lnl = 0.0;
        for t in range {
            if weights[t] == 0.0 {
                continue;
            }
            lnl += weights[t] * self.tuple_likelihood(t)?.ln();
        }
        Ok(lnl)
    }

    fn posteriors_range(
        &self,
        range: Range<usize>,
        weights: &[f64],
    ) -> Result<(f64, TreePosteriors)> {
        let tm = self.tm;
        let s = tm.nstates();
        let mut post = TreePosteriors::new(tm.nratecats, tm.tree.nnodes(), s);
        let mut lnl = 0.0;
        for t in range {
            let weight = weights[t];
            if weight == 0.0 {
                continue;
            }
            let masks = self.leaf_masks(t);
            let insides: Vec<Inside> =
                (0..tm.nratecats).map(|k| self.inside(&masks, k)).collect();
            let total: f64 = insides
                .iter()
                .zip(&tm.freqk)
                .map(|(ins, f)| f * ins.likelihood)
                .sum();
            if !(total > 0.0 && total.is_finite()) {
                return Err(PhyloHmmError::NumericDegeneracy(format!(
                    "tuple {t} has likelihood {total}"
                )));
            }
            lnl += weight * total.ln();
            for (k, ins) in insides.iter().enumerate() {
                if ins.likelihood == 0.0 {
                    continue;
                }
                let scale = weight * tm.freqk[k] / total;
                post.rcat_expected_nsites[k] += scale * ins.likelihood;
                self.outside(ins, k, scale, &mut post);
            }
        }
        Ok((lnl, post))
    }

    /// Second traversal: distribute `scale · P(data, parent=i, node=j)` to
    /// the branch tables.
    fn outside(&self, ins: &Inside, k: usize, scale: f64, post: &mut TreePosteriors) {
        let tree = &self.tm.tree;
        let s = self.tm.nstates();
        let root = tree.root();
        let mut outer = vec![Vec::new(); tree.nnodes()];
        outer[root] = self.tm.backgd_freqs.clone();
        for (i, (o, l)) in outer[root].iter().zip(&ins.partial[root]).enumerate() {
            post.expected_root[k][i] += scale * o * l;
        }
        for &id in &self.preorder {
            let node = &tree.nodes()[id];
            let (Some(l), Some(r)) = (node.lchild, node.rchild) else {
                continue;
            };
            for (child, sibling) in [(l, r), (r, l)] {
                let Some(p) = self.tm.transition_matrix(child, k) else {
                    continue;
                };
                let above: Vec<f64> = (0..s)
                    .map(|i| outer[id][i] * ins.message[sibling][i])
                    .collect();
                let counts = &mut post.expected_nsubst_tot[k][child];
                let mut child_outer = vec![0.0; s];
                for i in 0..s {
                    if above[i] == 0.0 {
                        continue;
                    }
                    for j in 0..s {
                        let joint = above[i] * p[(i, j)];
                        child_outer[j] += joint;
                        counts[(i, j)] += scale * joint * ins.partial[child][j];
                    }
                }
                outer[child] = child_outer;
            }
        }
    }
}
