//! Dynamic programming over an [`Hmm`]: Viterbi, forward, backward and
//! posterior decoding, plus path and window scores.
//!
//! Emission scores are natural-log values laid out `[state][position]`.
//! Inner loops visit only the predecessors (forward, Viterbi) or successors
//! (backward) of each state.

use phylohmm_core::prob::{log_sum_exp, log_sum_exp_slice};
use phylohmm_core::{PhyloHmmError, Result};

use crate::hmm::Hmm;

impl Hmm {
    fn check_emissions(&self, emissions: &[Vec<f64>]) -> Result<usize> {
        if emissions.len() != self.nstates() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "emission scores for {} states, HMM has {}",
                emissions.len(),
                self.nstates()
            )));
        }
        let len = emissions[0].len();
        if len == 0 {
            return Err(PhyloHmmError::InvalidInput("empty emission sequence".into()));
        }
        if let Some(s) = emissions.iter().position(|row| row.len() != len) {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "emission row {s} has {} positions, expected {len}",
                emissions[s].len()
            )));
        }
        Ok(len)
    }

    /// Most likely state path and its log-probability, including begin and
    /// end transitions.
    ///
    /// Ties go to the first predecessor in index order.
    ///
    /// # Errors
    ///
    /// Dimension errors for mis-shaped emissions;
    /// [`PhyloHmmError::NumericDegeneracy`] when every path has probability
    /// zero.
    pub fn viterbi(&self, emissions: &[Vec<f64>]) -> Result<(Vec<usize>, f64)> {
        let len = self.check_emissions(emissions)?;
        let n = self.nstates();
        let mut v = vec![vec![f64::NEG_INFINITY; len]; n];
        let mut backptr = vec![vec![0usize; len]; n];

        for s in 0..n {
            v[s][0] = self.begin_score(s) + emissions[s][0];
        }
        for p in 1..len {
            for s in 0..n {
                let mut best = f64::NEG_INFINITY;
                let mut arg = None;
                for &prev in self.predecessors(s) {
                    let cand = v[prev][p - 1] + self.score(prev, s);
                    if cand > best {
                        best = cand;
                        arg = Some(prev);
                    }
                }
                if let Some(prev) = arg {
                    v[s][p] = best + emissions[s][p];
                    backptr[s][p] = prev;
                }
            }
        }

        let mut best = f64::NEG_INFINITY;
        let mut last = None;
        for s in 0..n {
            let cand = v[s][len - 1] + self.end_score(s);
            if cand > best {
                best = cand;
                last = Some(s);
            }
        }
        let mut state = last.ok_or_else(|| {
            PhyloHmmError::NumericDegeneracy("no state path has non-zero probability".into())
        })?;

        let mut path = vec![0usize; len];
        path[len - 1] = state;
        for p in (1..len).rev() {
            state = backptr[state][p];
            path[p - 1] = state;
        }
        Ok((path, best))
    }

    /// Forward algorithm. Returns the total log-likelihood and the forward
    /// scores `[state][position]`.
    pub fn forward(&self, emissions: &[Vec<f64>]) -> Result<(f64, Vec<Vec<f64>>)> {
        let len = self.check_emissions(emissions)?;
        let n = self.nstates();
        let mut alpha = vec![vec![f64::NEG_INFINITY; len]; n];

        for s in 0..n {
            alpha[s][0] = self.begin_score(s) + emissions[s][0];
        }
        for p in 1..len {
            for s in 0..n {
                let mut acc = f64::NEG_INFINITY;
                for &prev in self.predecessors(s) {
                    acc = log_sum_exp(acc, alpha[prev][p - 1] + self.score(prev, s));
                }
                alpha[s][p] = acc + emissions[s][p];
            }
        }

        let terms: Vec<f64> = (0..n).map(|s| alpha[s][len - 1] + self.end_score(s)).collect();
        Ok((log_sum_exp_slice(&terms), alpha))
    }

    /// Backward algorithm. Returns the total log-likelihood (equal to the
    /// forward total up to rounding) and the backward scores
    /// `[state][position]`, which exclude the emission at the position
    /// itself.
    pub fn backward(&self, emissions: &[Vec<f64>]) -> Result<(f64, Vec<Vec<f64>>)> {
        let len = self.check_emissions(emissions)?;
        let n = self.nstates();
        let mut beta = vec![vec![f64::NEG_INFINITY; len]; n];

        for s in 0..n {
            beta[s][len - 1] = self.end_score(s);
        }
        for p in (0..len - 1).rev() {
            for s in 0..n {
                let mut acc = f64::NEG_INFINITY;
                for &next in self.successors(s) {
                    acc = log_sum_exp(acc, self.score(s, next) + emissions[next][p + 1] + beta[next][p + 1]);
                }
                beta[s][p] = acc;
            }
        }

        let terms: Vec<f64> = (0..n)
            .map(|s| self.begin_score(s) + emissions[s][0] + beta[s][0])
            .collect();
        Ok((log_sum_exp_slice(&terms), beta))
    }

    /// Posterior probability of each state at each position,
    /// `[state][position]`.
    ///
    /// # Errors
    ///
    /// [`PhyloHmmError::NumericDegeneracy`] if the emissions have zero
    /// likelihood under the model.
    pub fn posterior_probs(&self, emissions: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let (total, alpha) = self.forward(emissions)?;
        let (_, beta) = self.backward(emissions)?;
        if !total.is_finite() {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "cannot compute posteriors: total log-likelihood is {total}"
            )));
        }
        Ok(alpha
            .iter()
            .zip(&beta)
            .map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x + y - total).exp()).collect())
            .collect())
    }

    /// Log-probability of one state path: begin, emissions, transitions
    /// and end.
    pub fn path_likelihood(&self, emissions: &[Vec<f64>], path: &[usize]) -> Result<f64> {
        let len = self.check_emissions(emissions)?;
        if path.len() != len {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "path has {} positions, emissions have {len}",
                path.len()
            )));
        }
        if let Some(&bad) = path.iter().find(|&&s| s >= self.nstates()) {
            return Err(PhyloHmmError::InvalidInput(format!("path visits unknown state {bad}")));
        }
        let mut score = self.begin_score(path[0]) + emissions[path[0]][0];
        for p in 1..len {
            score += self.score(path[p - 1], path[p]) + emissions[path[p]][p];
        }
        Ok(score + self.end_score(path[len - 1]))
    }

    /// Log-probability of the window `[begin, begin + len)` of the
    /// emissions, summed over paths that stay inside `states`. Begin and
    /// end transitions apply at the window edges.
    pub fn score_subset(
        &self,
        emissions: &[Vec<f64>],
        states: &[usize],
        begin: usize,
        len: usize,
    ) -> Result<f64> {
        let total = self.check_emissions(emissions)?;
        if len == 0 || begin + len > total {
            return Err(PhyloHmmError::InvalidInput(format!(
                "window [{begin}, {}) outside emissions of length {total}",
                begin + len
            )));
        }
        if let Some(&bad) = states.iter().find(|&&s| s >= self.nstates()) {
            return Err(PhyloHmmError::InvalidInput(format!("unknown state {bad} in subset")));
        }
        let mut member = vec![false; self.nstates()];
        for &s in states {
            member[s] = true;
        }
        let window: Vec<Vec<f64>> = emissions
            .iter()
            .zip(&member)
            .map(|(row, &keep)| {
                if keep {
                    row[begin..begin + len].to_vec()
                } else {
                    vec![f64::NEG_INFINITY; len]
                }
            })
            .collect();
        Ok(self.forward(&window)?.0)
    }

    /// Log-odds of a window under `test_states` against `null_states`.
    pub fn log_odds_subset(
        &self,
        emissions: &[Vec<f64>],
        test_states: &[usize],
        null_states: &[usize],
        begin: usize,
        len: usize,
    ) -> Result<f64> {
        Ok(self.score_subset(emissions, test_states, begin, len)?
            - self.score_subset(emissions, null_states, begin, len)?)
    }
}
