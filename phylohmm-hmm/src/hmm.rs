//! The HMM structure: transition probabilities, their log-score caches and
//! sparse adjacency lists.
//!
//! Transition probabilities are stored row-major in a flat `Vec<f64>` of
//! size `nstates * nstates`; row `i` is the distribution over successors of
//! state `i`. Begin and end transitions live in separate vectors. After any
//! edit of the probabilities, [`Hmm::reset`] rebuilds the log scores and the
//! predecessor/successor lists the decoders iterate over.

use phylohmm_core::prob::ln_or_neg_inf;
use phylohmm_core::{PhyloHmmError, Result, Summarizable};
use tracing::warn;

/// Largest number of states an HMM may have.
pub const MAXSTATES: usize = 1000;

/// On-disk code for the implicit begin state.
pub const BEGIN_STATE: i32 = -99;

/// On-disk code for the implicit end state.
pub const END_STATE: i32 = -98;

/// Tolerance on transition row sums.
pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

const STATIONARY_TOLERANCE: f64 = 1e-14;
const STATIONARY_MAX_ITER: usize = 100_000;

/// One end of a transition: a real state or one of the implicit begin/end
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endpoint {
    Begin,
    State(usize),
    End,
}

impl Endpoint {
    /// Integer code: the state index, or [`BEGIN_STATE`] / [`END_STATE`].
    pub fn code(self) -> i32 {
        match self {
            Endpoint::Begin => BEGIN_STATE,
            Endpoint::End => END_STATE,
            Endpoint::State(s) => s as i32,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            BEGIN_STATE => Ok(Endpoint::Begin),
            END_STATE => Ok(Endpoint::End),
            s if s >= 0 => Ok(Endpoint::State(s as usize)),
            other => Err(PhyloHmmError::InvalidInput(format!("invalid state code {other}"))),
        }
    }
}

/// A discrete-state hidden Markov model without emission parameters.
///
/// Emissions are supplied to the decoders as log-score matrices, one row
/// per state; see [`Hmm::viterbi`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hmm {
    nstates: usize,
    transitions: Vec<f64>,
    transition_scores: Vec<f64>,
    begin_transitions: Vec<f64>,
    begin_scores: Vec<f64>,
    end_transitions: Option<Vec<f64>>,
    end_scores: Option<Vec<f64>>,
    eq_freqs: Vec<f64>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    begin_successors: Vec<usize>,
    end_predecessors: Vec<usize>,
}

impl Hmm {
    /// Build an HMM from a row-major transition matrix.
    ///
    /// Missing equilibrium frequencies are computed as the stationary
    /// distribution of the chain; missing begin transitions default to the
    /// equilibrium frequencies. Without end transitions every state may end
    /// a path at no cost.
    ///
    /// # Errors
    ///
    /// Returns an error if `nstates` is zero or above [`MAXSTATES`], a
    /// vector has the wrong length, an entry is negative or non-finite, or
    /// a transition row or the begin vector does not sum to 1 within
    /// [`ROW_SUM_TOLERANCE`].
    pub fn new(
        nstates: usize,
        transitions: Vec<f64>,
        eq_freqs: Option<Vec<f64>>,
        begin_transitions: Option<Vec<f64>>,
        end_transitions: Option<Vec<f64>>,
    ) -> Result<Self> {
        check_nstates(nstates)?;
        check_len("transition matrix", transitions.len(), nstates * nstates)?;
        check_probs("transition matrix", &transitions)?;
        for i in 0..nstates {
            let row = &transitions[i * nstates..(i + 1) * nstates];
            check_sum(&format!("transition row {i}"), row)?;
        }
        let eq_freqs = match eq_freqs {
            Some(eq) => {
                check_len("equilibrium frequencies", eq.len(), nstates)?;
                check_probs("equilibrium frequencies", &eq)?;
                eq
            }
            None => stationary_distribution(nstates, &transitions),
        };
        let begin_transitions = match begin_transitions {
            Some(b) => {
                check_len("begin transitions", b.len(), nstates)?;
                check_probs("begin transitions", &b)?;
                check_sum("begin transitions", &b)?;
                b
            }
            None => eq_freqs.clone(),
        };
        if let Some(end) = &end_transitions {
            check_len("end transitions", end.len(), nstates)?;
            check_probs("end transitions", end)?;
        }
        Ok(Self::assemble(
            nstates,
            transitions,
            eq_freqs,
            begin_transitions,
            end_transitions,
        ))
    }

    /// An HMM with `nstates` states and all probabilities zero, to be
    /// filled in by training. End transitions are allocated when `end` is
    /// set.
    pub fn new_nstates(nstates: usize, end: bool) -> Result<Self> {
        check_nstates(nstates)?;
        Ok(Self::assemble(
            nstates,
            vec![0.0; nstates * nstates],
            vec![0.0; nstates],
            vec![0.0; nstates],
            end.then(|| vec![0.0; nstates]),
        ))
    }

    /// A single state that always transitions to itself.
    pub fn create_trivial() -> Self {
        Self::assemble(1, vec![1.0], vec![1.0], vec![1.0], None)
    }

    fn assemble(
        nstates: usize,
        transitions: Vec<f64>,
        eq_freqs: Vec<f64>,
        begin_transitions: Vec<f64>,
        end_transitions: Option<Vec<f64>>,
    ) -> Self {
        let mut hmm = Self {
            nstates,
            transitions,
            transition_scores: Vec::new(),
            begin_transitions,
            begin_scores: Vec::new(),
            end_transitions,
            end_scores: None,
            eq_freqs,
            predecessors: Vec::new(),
            successors: Vec::new(),
            begin_successors: Vec::new(),
            end_predecessors: Vec::new(),
        };
        hmm.reset();
        hmm
    }

    /// Rebuild log scores and adjacency lists after editing probabilities.
    pub fn reset(&mut self) {
        let n = self.nstates;
        self.transition_scores = self.transitions.iter().map(|&p| ln_or_neg_inf(p)).collect();
        self.begin_scores = self.begin_transitions.iter().map(|&p| ln_or_neg_inf(p)).collect();
        self.end_scores = self
            .end_transitions
            .as_ref()
            .map(|end| end.iter().map(|&p| ln_or_neg_inf(p)).collect());

        self.predecessors = vec![Vec::new(); n];
        self.successors = vec![Vec::new(); n];
        for i in 0..n {
            for j in 0..n {
                if self.transitions[i * n + j] != 0.0 {
                    self.successors[i].push(j);
                    self.predecessors[j].push(i);
                }
            }
        }
        self.begin_successors = (0..n).filter(|&s| self.begin_transitions[s] != 0.0).collect();
        self.end_predecessors = match &self.end_transitions {
            Some(end) => (0..n).filter(|&s| end[s] != 0.0).collect(),
            None => (0..n).collect(),
        };
    }

    /// Clamp negative entries to zero and rescale every non-empty
    /// transition row, and the begin vector, to sum to 1.
    pub fn renormalize(&mut self) {
        let n = self.nstates;
        let clamped = self
            .transitions
            .iter()
            .chain(&self.begin_transitions)
            .filter(|&&p| p < 0.0)
            .count();
        if clamped > 0 {
            warn!(clamped, "negative transition probabilities set to zero");
        }
        for i in 0..n {
            normalize_in_place(&mut self.transitions[i * n..(i + 1) * n]);
        }
        normalize_in_place(&mut self.begin_transitions);
        self.reset();
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }

    /// Probability of moving from state `from` to state `to`.
    pub fn transition(&self, from: usize, to: usize) -> f64 {
        self.transitions[from * self.nstates + to]
    }

    /// Row-major transition matrix.
    pub fn transitions(&self) -> &[f64] {
        &self.transitions
    }

    /// Set one transition probability. Call [`Hmm::reset`] (or
    /// [`Hmm::renormalize`]) once the edits are done.
    pub fn set_transition(&mut self, from: usize, to: usize, p: f64) {
        let n = self.nstates;
        self.transitions[from * n + to] = p;
    }

    pub fn begin_transitions(&self) -> &[f64] {
        &self.begin_transitions
    }

    pub fn set_begin_transitions(&mut self, begin: Vec<f64>) -> Result<()> {
        check_len("begin transitions", begin.len(), self.nstates)?;
        self.begin_transitions = begin;
        self.reset();
        Ok(())
    }

    pub fn end_transitions(&self) -> Option<&[f64]> {
        self.end_transitions.as_deref()
    }

    pub fn set_end_transitions(&mut self, end: Option<Vec<f64>>) -> Result<()> {
        if let Some(end) = &end {
            check_len("end transitions", end.len(), self.nstates)?;
        }
        self.end_transitions = end;
        self.reset();
        Ok(())
    }

    pub fn eq_freqs(&self) -> &[f64] {
        &self.eq_freqs
    }

    pub(crate) fn set_eq_freqs(&mut self, eq: Vec<f64>) {
        self.eq_freqs = eq;
    }

    /// States with a non-zero transition into `s`.
    pub fn predecessors(&self, s: usize) -> &[usize] {
        &self.predecessors[s]
    }

    /// States reachable from `s` in one step.
    pub fn successors(&self, s: usize) -> &[usize] {
        &self.successors[s]
    }

    pub fn begin_successors(&self) -> &[usize] {
        &self.begin_successors
    }

    pub fn end_predecessors(&self) -> &[usize] {
        &self.end_predecessors
    }

    /// Log-probability of a transition, with `-∞` for impossible moves.
    /// Without end transitions, ending is free from every state.
    pub fn transition_score(&self, from: Endpoint, to: Endpoint) -> f64 {
        let n = self.nstates;
        match (from, to) {
            (Endpoint::State(i), Endpoint::State(j)) if i < n && j < n => {
                self.transition_scores[i * n + j]
            }
            (Endpoint::Begin, Endpoint::State(j)) if j < n => self.begin_scores[j],
            (Endpoint::State(i), Endpoint::End) if i < n => self.end_score(i),
            _ => f64::NEG_INFINITY,
        }
    }

    #[inline]
    pub(crate) fn score(&self, from: usize, to: usize) -> f64 {
        self.transition_scores[from * self.nstates + to]
    }

    #[inline]
    pub(crate) fn begin_score(&self, s: usize) -> f64 {
        self.begin_scores[s]
    }

    #[inline]
    pub(crate) fn end_score(&self, s: usize) -> f64 {
        self.end_scores.as_ref().map_or(0.0, |e| e[s])
    }
}

impl Summarizable for Hmm {
    fn summary(&self) -> String {
        let edges: usize = self.successors.iter().map(Vec::len).sum();
        format!(
            "HMM: {} states, {} transitions{}",
            self.nstates,
            edges,
            if self.end_transitions.is_some() { ", explicit end" } else { "" }
        )
    }
}

fn check_nstates(nstates: usize) -> Result<()> {
    if nstates == 0 || nstates > MAXSTATES {
        return Err(PhyloHmmError::InvalidInput(format!(
            "number of states must be in 1..={MAXSTATES}, got {nstates}"
        )));
    }
    Ok(())
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(PhyloHmmError::DimensionMismatch(format!(
            "{what} has {got} entries, expected {expected}"
        )));
    }
    Ok(())
}

fn check_probs(what: &str, values: &[f64]) -> Result<()> {
    if let Some(bad) = values.iter().find(|p| !p.is_finite() || **p < 0.0) {
        return Err(PhyloHmmError::InvalidInput(format!(
            "{what} contains invalid probability {bad}"
        )));
    }
    Ok(())
}

pub(crate) fn check_sum(what: &str, values: &[f64]) -> Result<()> {
    let sum: f64 = values.iter().sum();
    if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(PhyloHmmError::InvalidInput(format!("{what} sums to {sum}, expected 1")));
    }
    Ok(())
}

fn normalize_in_place(values: &mut [f64]) {
    for v in values.iter_mut() {
        *v = v.max(0.0);
    }
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}

/// Stationary distribution by power iteration on the lazy chain
/// `(I + P) / 2`, which has the same fixed point and converges for
/// periodic chains too.
pub(crate) fn stationary_distribution(n: usize, transitions: &[f64]) -> Vec<f64> {
    let mut pi = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];
    for _ in 0..STATIONARY_MAX_ITER {
        next.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..n {
            for j in 0..n {
                next[j] += pi[i] * transitions[i * n + j];
            }
        }
        let mut diff: f64 = 0.0;
        for j in 0..n {
            let v = 0.5 * (next[j] + pi[j]);
            diff = diff.max((v - pi[j]).abs());
            pi[j] = v;
        }
        if diff < STATIONARY_TOLERANCE {
            break;
        }
    }
    normalize_in_place(&mut pi);
    pi
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_state() -> Hmm {
        Hmm::new(2, vec![0.9, 0.1, 0.2, 0.8], None, Some(vec![1.0, 0.0]), Some(vec![1.0, 1.0]))
            .unwrap()
    }

    #[test]
    fn adjacency_skips_zero_transitions() {
        let hmm = Hmm::new(3, vec![0.5, 0.5, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0], None, None, None)
            .unwrap();
        assert_eq!(hmm.successors(0), &[0, 1]);
        assert_eq!(hmm.predecessors(0), &[0, 2]);
        assert_eq!(hmm.predecessors(2), &[1]);
        assert_eq!(hmm.end_predecessors(), &[0, 1, 2]);
    }

    #[test]
    fn stationary_distribution_when_absent() {
        let hmm = two_state();
        assert_relative_eq!(hmm.eq_freqs()[0], 2.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(hmm.eq_freqs()[1], 1.0 / 3.0, epsilon = 1e-10);
        // periodic chain
        let flip = Hmm::new(2, vec![0.0, 1.0, 1.0, 0.0], None, None, None).unwrap();
        assert_relative_eq!(flip.eq_freqs()[0], 0.5, epsilon = 1e-12);
        assert_eq!(flip.begin_transitions(), flip.eq_freqs());
    }

    #[test]
    fn transition_scores_with_sentinels() {
        let hmm = two_state();
        assert_relative_eq!(
            hmm.transition_score(Endpoint::State(0), Endpoint::State(1)),
            0.1f64.ln()
        );
        assert_eq!(hmm.transition_score(Endpoint::Begin, Endpoint::State(0)), 0.0);
        assert_eq!(
            hmm.transition_score(Endpoint::Begin, Endpoint::State(1)),
            f64::NEG_INFINITY
        );
        assert_eq!(hmm.transition_score(Endpoint::State(1), Endpoint::End), 0.0);
        assert_eq!(hmm.transition_score(Endpoint::Begin, Endpoint::End), f64::NEG_INFINITY);
        assert_eq!(Endpoint::from_code(-99).unwrap(), Endpoint::Begin);
        assert_eq!(Endpoint::End.code(), END_STATE);
        assert!(Endpoint::from_code(-5).is_err());
    }

    #[test]
    fn invalid_models_are_rejected() {
        assert!(Hmm::new(0, vec![], None, None, None).is_err());
        assert!(Hmm::new(2, vec![0.5; 3], None, None, None).is_err());
        assert!(Hmm::new(2, vec![0.5, 0.6, 0.5, 0.5], None, None, None).is_err());
        assert!(Hmm::new(2, vec![1.5, -0.5, 0.5, 0.5], None, None, None).is_err());
        assert!(Hmm::new(2, vec![0.5; 4], None, Some(vec![0.3, 0.3]), None).is_err());
        assert!(Hmm::new_nstates(MAXSTATES + 1, false).is_err());
    }

    #[test]
    fn renormalize_and_reset() {
        let mut hmm = Hmm::new_nstates(2, true).unwrap();
        hmm.set_transition(0, 0, 3.0);
        hmm.set_transition(0, 1, 1.0);
        hmm.set_transition(1, 0, -1.0);
        hmm.set_transition(1, 1, 2.0);
        hmm.set_begin_transitions(vec![1.0, 1.0]).unwrap();
        hmm.renormalize();
        assert_eq!(hmm.transitions(), &[0.75, 0.25, 0.0, 1.0]);
        assert_eq!(hmm.begin_transitions(), &[0.5, 0.5]);
        assert_eq!(hmm.predecessors(0), &[0]);
        assert_eq!(hmm.transition_score(Endpoint::State(1), Endpoint::State(0)), f64::NEG_INFINITY);
    }

    #[test]
    fn trivial_and_summary() {
        let hmm = Hmm::create_trivial();
        assert_eq!(hmm.nstates(), 1);
        assert_eq!(hmm.transition(0, 0), 1.0);
        assert_eq!(hmm.summary(), "HMM: 1 states, 1 transitions");
        assert_eq!(two_state().summary(), "HMM: 2 states, 4 transitions, explicit end");
    }
}
