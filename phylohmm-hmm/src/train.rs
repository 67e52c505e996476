//! Retraining transition probabilities from counts or labeled paths.

use phylohmm_core::{PhyloHmmError, Result};
use tracing::debug;

use crate::hmm::Hmm;

/// Transition, state and begin counts accumulated from state paths.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransitionCounts {
    pub nstates: usize,
    /// Row-major `nstates * nstates` transition counts.
    pub trans: Vec<f64>,
    pub states: Vec<f64>,
    pub begin: Vec<f64>,
}

impl TransitionCounts {
    pub fn new(nstates: usize) -> Self {
        Self {
            nstates,
            trans: vec![0.0; nstates * nstates],
            states: vec![0.0; nstates],
            begin: vec![0.0; nstates],
        }
    }
}

/// Pseudocounts added before normalizing; `None` adds nothing.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pseudocounts {
    pub trans: Option<Vec<f64>>,
    pub states: Option<Vec<f64>>,
    pub begin: Option<Vec<f64>>,
}

impl Pseudocounts {
    /// The same pseudocount `c` on every transition, state and begin entry.
    pub fn uniform(nstates: usize, c: f64) -> Self {
        Self {
            trans: Some(vec![c; nstates * nstates]),
            states: Some(vec![c; nstates]),
            begin: Some(vec![c; nstates]),
        }
    }
}

/// Add the transitions, state visits and first state of `path` to
/// `counts`.
pub fn train_update_counts(counts: &mut TransitionCounts, path: &[usize]) -> Result<()> {
    let n = counts.nstates;
    if let Some(&bad) = path.iter().find(|&&s| s >= n) {
        return Err(PhyloHmmError::InvalidInput(format!(
            "path visits state {bad}, counts cover {n} states"
        )));
    }
    let Some(&first) = path.first() else {
        return Ok(());
    };
    counts.begin[first] += 1.0;
    for &s in path {
        counts.states[s] += 1.0;
    }
    for w in path.windows(2) {
        counts.trans[w[0] * n + w[1]] += 1.0;
    }
    Ok(())
}

fn with_pseudo(counts: &[f64], pseudo: Option<&Vec<f64>>, what: &str) -> Result<Vec<f64>> {
    match pseudo {
        None => Ok(counts.to_vec()),
        Some(p) if p.len() == counts.len() => {
            Ok(counts.iter().zip(p).map(|(c, q)| c + q).collect())
        }
        Some(p) => Err(PhyloHmmError::DimensionMismatch(format!(
            "{what} pseudocounts have {} entries, expected {}",
            p.len(),
            counts.len()
        ))),
    }
}

fn normalized(values: Vec<f64>, what: &str) -> Result<Vec<f64>> {
    let sum: f64 = values.iter().sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return Err(PhyloHmmError::NumericDegeneracy(format!(
            "{what} has no counts; add pseudocounts"
        )));
    }
    Ok(values.into_iter().map(|v| v / sum).collect())
}

impl Hmm {
    /// Set every transition to `(count + pseudo) / row_total`, the
    /// equilibrium frequencies from the state counts and, when
    /// `use_begin` is set, the begin transitions from the begin counts.
    /// End transitions are left alone.
    ///
    /// # Errors
    ///
    /// [`PhyloHmmError::DimensionMismatch`] when the counts do not match the
    /// HMM; [`PhyloHmmError::NumericDegeneracy`] when a row has neither
    /// counts nor pseudocounts.
    pub fn train_from_counts(
        &mut self,
        counts: &TransitionCounts,
        pseudo: &Pseudocounts,
        use_begin: bool,
    ) -> Result<()> {
        let n = self.nstates();
        if counts.nstates != n || counts.trans.len() != n * n {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "counts cover {} states, HMM has {n}",
                counts.nstates
            )));
        }
        let trans = with_pseudo(&counts.trans, pseudo.trans.as_ref(), "transition")?;
        let mut rows = Vec::with_capacity(n);
        for (i, row) in trans.chunks(n).enumerate() {
            rows.push(normalized(row.to_vec(), &format!("transition row {i}"))?);
        }
        let states = with_pseudo(&counts.states, pseudo.states.as_ref(), "state")?;
        let eq = normalized(states, "state counts")?;
        let begin = if use_begin {
            let begin = with_pseudo(&counts.begin, pseudo.begin.as_ref(), "begin")?;
            Some(normalized(begin, "begin counts")?)
        } else {
            None
        };

        for (i, row) in rows.iter().enumerate() {
            for (j, &p) in row.iter().enumerate() {
                self.set_transition(i, j, p);
            }
        }
        self.set_eq_freqs(eq);
        match begin {
            Some(b) => self.set_begin_transitions(b)?,
            None => self.reset(),
        }
        Ok(())
    }

    /// Count transitions along labeled `paths` and retrain from them.
    pub fn train_from_paths(
        &mut self,
        paths: &[Vec<usize>],
        pseudo: &Pseudocounts,
        use_begin: bool,
    ) -> Result<()> {
        let mut counts = TransitionCounts::new(self.nstates());
        for path in paths {
            train_update_counts(&mut counts, path)?;
        }
        debug!(
            npaths = paths.len(),
            positions = counts.states.iter().sum::<f64>(),
            "retraining transitions from paths"
        );
        self.train_from_counts(&counts, pseudo, use_begin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn counts_from_paths() {
        let mut counts = TransitionCounts::new(3);
        train_update_counts(&mut counts, &[0, 0, 1, 2, 2]).unwrap();
        train_update_counts(&mut counts, &[1, 2]).unwrap();
        train_update_counts(&mut counts, &[]).unwrap();
        assert_eq!(counts.begin, vec![1.0, 1.0, 0.0]);
        assert_eq!(counts.states, vec![2.0, 2.0, 3.0]);
        assert_eq!(counts.trans[0], 1.0);
        assert_eq!(counts.trans[5], 2.0);
        assert_eq!(counts.trans[8], 1.0);
        assert!(train_update_counts(&mut counts, &[3]).is_err());
    }

    #[test]
    fn train_from_counts_with_pseudocounts() {
        let mut hmm = Hmm::new_nstates(2, false).unwrap();
        let mut counts = TransitionCounts::new(2);
        counts.trans = vec![3.0, 1.0, 0.0, 4.0];
        counts.states = vec![4.0, 4.0];
        counts.begin = vec![1.0, 0.0];
        hmm.train_from_counts(&counts, &Pseudocounts::uniform(2, 1.0), true).unwrap();
        assert_relative_eq!(hmm.transition(0, 0), 4.0 / 6.0);
        assert_relative_eq!(hmm.transition(1, 0), 1.0 / 6.0);
        assert_relative_eq!(hmm.begin_transitions()[0], 2.0 / 3.0);
        assert_eq!(hmm.eq_freqs(), &[0.5, 0.5]);
        assert_eq!(hmm.predecessors(0), &[0, 1]);
    }

    #[test]
    fn empty_row_without_pseudocounts_fails() {
        let mut hmm = Hmm::new_nstates(2, false).unwrap();
        let mut counts = TransitionCounts::new(2);
        train_update_counts(&mut counts, &[0, 0, 1]).unwrap();
        assert!(matches!(
            hmm.train_from_counts(&counts, &Pseudocounts::default(), false),
            Err(PhyloHmmError::NumericDegeneracy(_))
        ));
        let bad = Pseudocounts {
            trans: Some(vec![1.0; 3]),
            ..Pseudocounts::default()
        };
        assert!(hmm.train_from_counts(&counts, &bad, false).is_err());
    }

    #[test]
    fn retrained_model_scores_its_path_higher() {
        let path = vec![0, 0, 0, 1, 1, 2, 2, 2, 2, 0, 0, 1, 2, 2];
        let emissions: Vec<Vec<f64>> = (0..3)
            .map(|s| (0..path.len()).map(|p| -(((s + p) % 4) as f64) * 0.3).collect())
            .collect();

        let mut baseline = Hmm::new_nstates(3, false).unwrap();
        baseline
            .train_from_counts(&TransitionCounts::new(3), &Pseudocounts::uniform(3, 1.0), true)
            .unwrap();
        let mut trained = baseline.clone();
        trained
            .train_from_paths(&[path.clone()], &Pseudocounts::uniform(3, 1.0), true)
            .unwrap();

        let before = baseline.path_likelihood(&emissions, &path).unwrap();
        let after = trained.path_likelihood(&emissions, &path).unwrap();
        assert!(after >= before, "{after} < {before}");
        for i in 0..3 {
            let sum: f64 = (0..3).map(|j| trained.transition(i, j)).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }
}
