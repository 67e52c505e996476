//! Building new HMMs from existing ones: products and strand reflection.

use phylohmm_core::{PhyloHmmError, Result};
use tracing::debug;

use crate::hmm::Hmm;

/// Product HMM whose state `(a, b)` has index `a * b.nstates() + b`.
///
/// Transitions, begin transitions and equilibrium frequencies multiply.
/// End transitions multiply when either factor has them, a missing vector
/// counting as all ones.
pub fn cross_product(a: &Hmm, b: &Hmm) -> Result<Hmm> {
    let (na, nb) = (a.nstates(), b.nstates());
    let n = na * nb;
    let pair = |i: usize| (i / nb, i % nb);

    let mut trans = vec![0.0; n * n];
    for from in 0..n {
        let (fa, fb) = pair(from);
        for to in 0..n {
            let (ta, tb) = pair(to);
            trans[from * n + to] = a.transition(fa, ta) * b.transition(fb, tb);
        }
    }
    let product = |x: &[f64], y: &[f64]| -> Vec<f64> {
        (0..n).map(|i| x[i / nb] * y[i % nb]).collect()
    };
    let eq = product(a.eq_freqs(), b.eq_freqs());
    let begin = product(a.begin_transitions(), b.begin_transitions());
    let end = match (a.end_transitions(), b.end_transitions()) {
        (None, None) => None,
        (ea, eb) => {
            let ones_a = vec![1.0; na];
            let ones_b = vec![1.0; nb];
            Some(product(ea.unwrap_or(&ones_a), eb.unwrap_or(&ones_b)))
        }
    };
    Hmm::new(n, trans, Some(eq), Some(begin), end)
}

impl Hmm {
    /// HMM over both strands. Every state keeps its index for the forward
    /// strand; each state not in `pivot_states` gets a reflected copy,
    /// appended in index order, that runs the time-reversed chain
    /// `R[i][j] = π_j P[j][i] / π_i`. Pivot states are shared by both
    /// strands and their rows are renormalized over both.
    ///
    /// Returns the new HMM and the map from new state to original state.
    ///
    /// # Errors
    ///
    /// [`PhyloHmmError::InvalidInput`] for unknown or repeated pivots;
    /// [`PhyloHmmError::NumericDegeneracy`] if a state has zero
    /// equilibrium frequency.
    pub fn reverse_compl(&self, pivot_states: &[usize]) -> Result<(Hmm, Vec<usize>)> {
        let n = self.nstates();
        let mut is_pivot = vec![false; n];
        for &p in pivot_states {
            if p >= n || is_pivot[p] {
                return Err(PhyloHmmError::InvalidInput(format!(
                    "pivot state {p} is out of range or repeated"
                )));
            }
            is_pivot[p] = true;
        }
        let pi = self.eq_freqs();
        if let Some(s) = (0..n).find(|&s| !(pi[s] > 0.0)) {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "state {s} has zero equilibrium frequency; its reversed transitions are undefined"
            )));
        }

        let mut mapping: Vec<usize> = (0..n).collect();
        let mut reflected = vec![None; n];
        for s in (0..n).filter(|&s| !is_pivot[s]) {
            reflected[s] = Some(mapping.len());
            mapping.push(s);
        }
        let total = mapping.len();
        let reversed = |i: usize, j: usize| pi[j] * self.transition(j, i) / pi[i];
        // reflected copy of `j` on the reverse strand, or the shared pivot
        let reverse_target = |j: usize| reflected[j].unwrap_or(j);

        let mut out = Hmm::new_nstates(total, self.end_transitions().is_some())?;
        for i in 0..n {
            for j in 0..n {
                out.set_transition(i, j, self.transition(i, j));
            }
        }
        for i in 0..n {
            for j in 0..n {
                let r = reversed(i, j);
                if r == 0.0 {
                    continue;
                }
                match (reflected[i], is_pivot[i]) {
                    (Some(ri), _) => out.set_transition(ri, reverse_target(j), r),
                    (None, true) if !is_pivot[j] => out.set_transition(i, reverse_target(j), r),
                    _ => {}
                }
            }
        }

        let copy = |v: &[f64]| -> Vec<f64> { mapping.iter().map(|&old| v[old]).collect() };
        out.set_begin_transitions(copy(self.begin_transitions()))?;
        if let Some(end) = self.end_transitions() {
            out.set_end_transitions(Some(copy(end)))?;
        }
        let mut eq = copy(pi);
        let sum: f64 = eq.iter().sum();
        eq.iter_mut().for_each(|v| *v /= sum);
        out.set_eq_freqs(eq);
        out.renormalize();

        debug!(
            nstates = total,
            npivots = pivot_states.len(),
            "built reverse-complement HMM"
        );
        Ok((out, mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn three_state() -> Hmm {
        Hmm::new(
            3,
            vec![0.7, 0.2, 0.1, 0.3, 0.6, 0.1, 0.5, 0.0, 0.5],
            None,
            None,
            None,
        )
        .unwrap()
    }

    fn assert_stochastic(hmm: &Hmm) {
        let n = hmm.nstates();
        for i in 0..n {
            let sum: f64 = (0..n).map(|j| hmm.transition(i, j)).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cross_product_multiplies_transitions() {
        let a = Hmm::new(2, vec![0.9, 0.1, 0.2, 0.8], None, Some(vec![0.5, 0.5]), None).unwrap();
        let b = three_state();
        let prod = cross_product(&a, &b).unwrap();
        assert_eq!(prod.nstates(), 6);
        assert_stochastic(&prod);
        for from in 0..6 {
            for to in 0..6 {
                let expect = a.transition(from / 3, to / 3) * b.transition(from % 3, to % 3);
                assert_relative_eq!(prod.transition(from, to), expect, epsilon = 1e-15);
            }
        }
        assert_relative_eq!(prod.eq_freqs()[4], a.eq_freqs()[1] * b.eq_freqs()[1]);
        assert!(prod.end_transitions().is_none());
        // zero transitions stay out of the adjacency
        assert!(!prod.successors(2).contains(&1));
    }

    #[test]
    fn cross_product_end_transitions() {
        let a = Hmm::new(1, vec![1.0], None, None, Some(vec![0.5])).unwrap();
        let b = Hmm::new(2, vec![0.5; 4], None, None, None).unwrap();
        let prod = cross_product(&a, &b).unwrap();
        assert_eq!(prod.end_transitions(), Some(&[0.5, 0.5][..]));
    }

    #[test]
    fn reverse_compl_with_one_pivot() {
        let hmm = three_state();
        let (rc, mapping) = hmm.reverse_compl(&[0]).unwrap();
        assert_eq!(rc.nstates(), 5);
        assert_eq!(mapping, vec![0, 1, 2, 1, 2]);
        assert_stochastic(&rc);

        let pi = hmm.eq_freqs();
        let reversed = |i: usize, j: usize| pi[j] * hmm.transition(j, i) / pi[i];
        // reverse-strand rows are the time-reversed chain
        assert_relative_eq!(rc.transition(3, 4), reversed(1, 2), epsilon = 1e-12);
        assert_relative_eq!(rc.transition(4, 0), reversed(2, 0), epsilon = 1e-12);
        // forward-strand rows of non-pivots are untouched
        assert_relative_eq!(rc.transition(1, 2), hmm.transition(1, 2), epsilon = 1e-15);
        assert_eq!(rc.transition(1, 3), 0.0);
        // the pivot reaches both strands
        assert!(rc.transition(0, 1) > 0.0 && rc.transition(0, 3) > 0.0);
        let eq_sum: f64 = rc.eq_freqs().iter().sum();
        assert_relative_eq!(eq_sum, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn reverse_compl_edge_cases() {
        let hmm = three_state();
        let (same, mapping) = hmm.reverse_compl(&[0, 1, 2]).unwrap();
        assert_eq!(mapping, vec![0, 1, 2]);
        for (x, y) in same.transitions().iter().zip(hmm.transitions()) {
            assert_relative_eq!(x, y, epsilon = 1e-15);
        }

        let (split, mapping) = hmm.reverse_compl(&[]).unwrap();
        assert_eq!(mapping.len(), 6);
        assert!((0..3).all(|i| (3..6).all(|j| split.transition(i, j) == 0.0)));
        assert_stochastic(&split);

        assert!(hmm.reverse_compl(&[3]).is_err());
        assert!(hmm.reverse_compl(&[1, 1]).is_err());
    }
}
