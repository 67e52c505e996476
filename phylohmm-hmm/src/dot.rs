//! Graphviz export of an HMM's transition structure.

use std::io::Write;

use phylohmm_core::{PhyloHmmError, Result};

use crate::hmm::Hmm;

/// How states are named and filtered in [`write_dot`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DotOptions {
    /// One label per site category; state `i` belongs to category
    /// `i / nratecats`. Categories are numbered when absent.
    pub state_labels: Option<Vec<String>>,
    /// Number of rate-category copies of each site category.
    pub nratecats: usize,
    /// Site categories to draw; all when `None`.
    pub show: Option<Vec<usize>>,
    /// Skip self-loops with probability 1.
    pub suppress_unconnected: bool,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            state_labels: None,
            nratecats: 1,
            show: None,
            suppress_unconnected: false,
        }
    }
}

impl DotOptions {
    fn node_name(&self, state: usize) -> String {
        let cat = state / self.nratecats;
        let label = self
            .state_labels
            .as_ref()
            .and_then(|l| l.get(cat).cloned())
            .unwrap_or_else(|| cat.to_string());
        if self.nratecats > 1 {
            format!("\"{}-{}({})\"", label, state % self.nratecats + 1, state)
        } else {
            format!("\"{label}({state})\"")
        }
    }

    fn shown(&self, state: usize) -> bool {
        self.show
            .as_ref()
            .map_or(true, |cats| cats.contains(&(state / self.nratecats)))
    }
}

/// Write the transition graph of `hmm` in DOT format. Edges carry their
/// probabilities; zero transitions are omitted.
///
/// # Errors
///
/// [`PhyloHmmError::DimensionMismatch`] unless the number of states is the
/// number of labels (or a multiple of `nratecats` without labels) times
/// `nratecats`.
pub fn write_dot<W: Write>(hmm: &Hmm, opts: &DotOptions, out: &mut W) -> Result<()> {
    let n = hmm.nstates();
    if opts.nratecats == 0 {
        return Err(PhyloHmmError::InvalidInput("nratecats must be at least 1".into()));
    }
    let ncats = match &opts.state_labels {
        Some(labels) => labels.len(),
        None => n / opts.nratecats,
    };
    if ncats * opts.nratecats != n {
        return Err(PhyloHmmError::DimensionMismatch(format!(
            "HMM has {n} states, expected {ncats} categories x {} rate categories",
            opts.nratecats
        )));
    }

    writeln!(out, "digraph hmm {{")?;
    writeln!(out, "        rankdir=LR;")?;
    writeln!(out, "        size=\"10,7.5\";")?;
    writeln!(out, "        ratio=\"compress\";")?;
    writeln!(out, "        orientation=land;")?;
    writeln!(out, "        node [shape = box];")?;

    for (i, &t) in hmm.begin_transitions().iter().enumerate() {
        if t != 0.0 && opts.shown(i) {
            writeln!(out, "        begin -> {} [ label = \"{t:.6}\" ];", opts.node_name(i))?;
        }
    }
    for i in (0..n).filter(|&i| opts.shown(i)) {
        for &j in hmm.successors(i) {
            let t = hmm.transition(i, j);
            if !opts.shown(j) || (opts.suppress_unconnected && i == j && t == 1.0) {
                continue;
            }
            writeln!(
                out,
                "        {} -> {} [ label = \"{t:.6}\" ];",
                opts.node_name(i),
                opts.node_name(j)
            )?;
        }
    }
    if let Some(end) = hmm.end_transitions() {
        for (i, &t) in end.iter().enumerate() {
            if t != 0.0 && opts.shown(i) {
                writeln!(out, "        {} -> end [ label = \"{t:.6}\" ];", opts.node_name(i))?;
            }
        }
    }
    writeln!(out, "}}")?;
    Ok(())
}

/// [`write_dot`] into a string.
pub fn dot_string(hmm: &Hmm, opts: &DotOptions) -> Result<String> {
    let mut buf = Vec::new();
    write_dot(hmm, opts, &mut buf)?;
    String::from_utf8(buf).map_err(|e| PhyloHmmError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_state() -> Hmm {
        // two site categories, two rate categories each
        Hmm::new(
            4,
            vec![
                0.5, 0.5, 0.0, 0.0, //
                0.0, 0.9, 0.1, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.25, 0.25, 0.25, 0.25,
            ],
            None,
            Some(vec![1.0, 0.0, 0.0, 0.0]),
            None,
        )
        .unwrap()
    }

    #[test]
    fn labeled_rate_categories() {
        let opts = DotOptions {
            state_labels: Some(vec!["background".into(), "conserved".into()]),
            nratecats: 2,
            ..DotOptions::default()
        };
        let dot = dot_string(&four_state(), &opts).unwrap();
        assert!(dot.starts_with("digraph hmm {\n        rankdir=LR;\n"));
        assert!(dot.contains("begin -> \"background-1(0)\" [ label = \"1.000000\" ];"));
        assert!(dot.contains("\"background-2(1)\" -> \"conserved-1(2)\" [ label = \"0.100000\" ];"));
        assert!(dot.contains("\"conserved-1(2)\" -> \"conserved-1(2)\""));
        assert!(!dot.contains("\"background-1(0)\" -> \"conserved"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn filtering_and_suppression() {
        let opts = DotOptions {
            show: Some(vec![2, 3]),
            suppress_unconnected: true,
            ..DotOptions::default()
        };
        let dot = dot_string(&four_state(), &opts).unwrap();
        assert!(!dot.contains("begin"));
        assert!(!dot.contains("\"1(1)\""));
        assert!(dot.contains("\"3(3)\" -> \"3(3)\" [ label = \"0.250000\" ];"));
        assert!(dot.contains("\"3(3)\" -> \"2(2)\""));
        // the certain self-loop on state 2 is dropped
        assert!(!dot.contains("\"2(2)\" -> \"2(2)\""));
    }

    #[test]
    fn label_count_must_match_states() {
        let opts = DotOptions {
            state_labels: Some(vec!["a".into(), "b".into(), "c".into()]),
            ..DotOptions::default()
        };
        assert!(matches!(
            dot_string(&four_state(), &opts),
            Err(PhyloHmmError::DimensionMismatch(_))
        ));
        let opts = DotOptions {
            nratecats: 3,
            ..DotOptions::default()
        };
        assert!(dot_string(&four_state(), &opts).is_err());
    }
}
