//! Substitution model families and their parameterized rate matrices.
//!
//! States are tuples of `order + 1` alphabet characters, encoded with the
//! oldest position as the most significant digit. Only substitutions that
//! change a single position have non-zero rate. Each off-diagonal cell is
//! either a free parameter or a fixed constant; in a reversible model the
//! cell `(i, j)` is additionally weighted by `π_j`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;

use phylohmm_core::prob::int_pow;
use phylohmm_core::{PhyloHmmError, Result};
use phylohmm_msa::Alphabet;

use crate::eigen::EigenSystem;

/// Default transition/transversion ratio for the HKY and REV families.
pub const DEFAULT_KAPPA: f64 = 3.0;

/// Named substitution model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubstModel {
    Jc69,
    K80,
    F81,
    Hky85,
    Rev,
    Unrest,
    Hky2,
    R2,
    U2,
    R3,
    U3,
}

impl SubstModel {
    pub const ALL: [SubstModel; 11] = [
        SubstModel::Jc69,
        SubstModel::K80,
        SubstModel::F81,
        SubstModel::Hky85,
        SubstModel::Rev,
        SubstModel::Unrest,
        SubstModel::Hky2,
        SubstModel::R2,
        SubstModel::U2,
        SubstModel::R3,
        SubstModel::U3,
    ];

    /// Tag used in the tree-model text format.
    pub fn name(self) -> &'static str {
        match self {
            SubstModel::Jc69 => "JC69",
            SubstModel::K80 => "K80",
            SubstModel::F81 => "F81",
            SubstModel::Hky85 => "HKY85",
            SubstModel::Rev => "REV",
            SubstModel::Unrest => "UNREST",
            SubstModel::Hky2 => "HKY2",
            SubstModel::R2 => "R2",
            SubstModel::U2 => "U2",
            SubstModel::R3 => "R3",
            SubstModel::U3 => "U3",
        }
    }

    /// Context order: the state is a tuple of `order + 1` characters.
    pub fn order(self) -> usize {
        match self {
            SubstModel::Hky2 | SubstModel::R2 | SubstModel::U2 => 1,
            SubstModel::R3 | SubstModel::U3 => 2,
            _ => 0,
        }
    }

    /// Whether the model satisfies detailed balance with respect to `π`.
    pub fn is_reversible(self) -> bool {
        !matches!(self, SubstModel::Unrest | SubstModel::U2 | SubstModel::U3)
    }

    /// Whether the rate matrix is normalized once at construction.
    pub fn is_fixed_rate(self) -> bool {
        matches!(self, SubstModel::Jc69 | SubstModel::F81)
    }

    fn needs_dna(self) -> bool {
        matches!(self, SubstModel::K80 | SubstModel::Hky85 | SubstModel::Hky2)
    }
}

impl fmt::Display for SubstModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SubstModel {
    type Err = PhyloHmmError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        SubstModel::ALL
            .iter()
            .copied()
            .find(|m| m.name() == upper)
            .ok_or_else(|| PhyloHmmError::Parse(format!("unrecognized substitution model '{s}'")))
    }
}

/// Contribution of one off-diagonal cell.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RateTerm {
    Param(usize),
    Fixed(f64),
}

/// One non-zero off-diagonal cell of the rate matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateCell {
    pub row: usize,
    pub col: usize,
    pub term: RateTerm,
    /// Whether the cell is a transition (A<->G or C<->T) at the changed position.
    pub transition: bool,
}

/// A rate matrix with its parameter layout and eigendecomposition.
#[derive(Debug, Clone)]
pub struct RateMatrix {
    pub model: SubstModel,
    alph_size: usize,
    nparams: usize,
    cells: Vec<RateCell>,
    q: DMatrix<f64>,
    eigen: Option<EigenSystem>,
}

impl RateMatrix {
    /// Layout for `model` over `alphabet`, with an all-zero matrix until
    /// [`RateMatrix::set_params`] or [`RateMatrix::set_matrix`] is called.
    pub fn new(model: SubstModel, alphabet: &Alphabet) -> Result<Self> {
        let a = alphabet.size();
        if model.needs_dna() && !alphabet.is_dna() {
            return Err(PhyloHmmError::InvalidInput(format!(
                "{model} requires the ACGT alphabet, got '{alphabet}'"
            )));
        }
        let digits = model.order() + 1;
        let size = int_pow(a, digits);
        let symbols = alphabet.symbols();
        let mut cells = Vec::new();
        let mut pair_index: HashMap<(usize, usize), usize> = HashMap::new();
        let mut nparams = 0;

        for i in 0..size {
            for j in 0..size {
                let Some((from, to)) = single_difference(i, j, a, digits) else {
                    continue;
                };
                let transition = is_transition(symbols[from], symbols[to]);
                let term = match model {
                    SubstModel::Jc69 | SubstModel::F81 => RateTerm::Fixed(1.0),
                    SubstModel::K80 | SubstModel::Hky85 | SubstModel::Hky2 => {
                        nparams = 1;
                        if transition {
                            RateTerm::Param(0)
                        } else {
                            RateTerm::Fixed(1.0)
                        }
                    }
                    SubstModel::Rev => {
                        let key = (from.min(to), from.max(to));
                        let idx = unordered_pair_index(key.0, key.1, a);
                        nparams = a * (a - 1) / 2;
                        RateTerm::Param(idx)
                    }
                    SubstModel::Unrest => {
                        nparams = a * (a - 1);
                        RateTerm::Param(from * (a - 1) + if to > from { to - 1 } else { to })
                    }
                    SubstModel::R2 | SubstModel::R3 => {
                        let key = (i.min(j), i.max(j));
                        let next = pair_index.len();
                        let idx = *pair_index.entry(key).or_insert(next);
                        RateTerm::Param(idx)
                    }
                    SubstModel::U2 | SubstModel::U3 => {
                        let next = pair_index.len();
                        let idx = *pair_index.entry((i, j)).or_insert(next);
                        RateTerm::Param(idx)
                    }
                };
                cells.push(RateCell {
                    row: i,
                    col: j,
                    term,
                    transition,
                });
            }
        }
        if matches!(
            model,
            SubstModel::R2 | SubstModel::R3 | SubstModel::U2 | SubstModel::U3
        ) {
            nparams = pair_index.len();
        }

        Ok(Self {
            model,
            alph_size: a,
            nparams,
            cells,
            q: DMatrix::zeros(size, size),
            eigen: None,
        })
    }

    /// Number of states `S = A^(order+1)`.
    pub fn size(&self) -> usize {
        self.q.nrows()
    }

    pub fn alph_size(&self) -> usize {
        self.alph_size
    }

    /// Number of free rate parameters.
    pub fn nparams(&self) -> usize {
        self.nparams
    }

    pub fn cells(&self) -> &[RateCell] {
        &self.cells
    }

    /// `(row, col)` pairs at which parameter `p` appears.
    pub fn param_cells(&self, p: usize) -> Vec<(usize, usize)> {
        self.cells
            .iter()
            .filter(|c| c.term == RateTerm::Param(p))
            .map(|c| (c.row, c.col))
            .collect()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub fn eigen(&self) -> Option<&EigenSystem> {
        self.eigen.as_ref()
    }

    /// Coefficient of a cell in column `col`: `π_col` for reversible models.
    pub fn coefficient(&self, col: usize, pi: &[f64]) -> f64 {
        if self.model.is_reversible() {
            pi[col]
        } else {
            1.0
        }
    }

    /// Default parameters: `κ` for transitions and 1 for transversions.
    pub fn default_params(&self) -> Vec<f64> {
        match self.model {
            SubstModel::K80 | SubstModel::Hky85 | SubstModel::Hky2 => vec![DEFAULT_KAPPA],
            _ => {
                let mut params = vec![1.0; self.nparams];
                for cell in &self.cells {
                    if let (RateTerm::Param(p), true) = (cell.term, cell.transition) {
                        params[p] = DEFAULT_KAPPA;
                    }
                }
                params
            }
        }
    }

    /// Rebuild `Q` from `params` and `pi` and re-diagonalize.
    pub fn set_params(&mut self, params: &[f64], pi: &[f64]) -> Result<()> {
        if params.len() != self.nparams {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} expects {} rate parameters, got {}",
                self.model,
                self.nparams,
                params.len()
            )));
        }
        let n = self.size();
        if pi.len() != n {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "equilibrium vector has length {}, rate matrix has {} states",
                pi.len(),
                n
            )));
        }
        let mut q = DMatrix::zeros(n, n);
        for cell in &self.cells {
            let value = match cell.term {
                RateTerm::Param(p) => params[p],
                RateTerm::Fixed(v) => v,
            };
            q[(cell.row, cell.col)] = value * self.coefficient(cell.col, pi);
        }
        for i in 0..n {
            let row_sum: f64 = q.row(i).sum();
            q[(i, i)] = -row_sum;
        }
        self.q = q;
        if self.model.is_fixed_rate() {
            self.normalize(pi)?;
        } else {
            self.diagonalize(pi)?;
        }
        Ok(())
    }

    /// Replace `Q` directly (e.g. when read from a file) and re-diagonalize.
    pub fn set_matrix(&mut self, q: DMatrix<f64>, pi: &[f64]) -> Result<()> {
        if q.nrows() != self.size() || q.ncols() != self.size() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} needs a {}x{} rate matrix, got {}x{}",
                self.model,
                self.size(),
                self.size(),
                q.nrows(),
                q.ncols()
            )));
        }
        self.q = q;
        self.diagonalize(pi)
    }

    /// Recover parameters from the current `Q`, relative to the fixed
    /// cells (so that an overall scaling of `Q` is factored out).
    pub fn params_from_matrix(&self, pi: &[f64]) -> Vec<f64> {
        let cell_value = |c: &RateCell| {
            let coef = self.coefficient(c.col, pi);
            if coef > 0.0 {
                self.q[(c.row, c.col)] / coef
            } else {
                0.0
            }
        };
        let scale = self
            .cells
            .iter()
            .find_map(|c| match c.term {
                RateTerm::Fixed(v) if v != 0.0 => {
                    let x = cell_value(c) / v;
                    (x > 0.0).then_some(x)
                }
                _ => None,
            })
            .unwrap_or(1.0);
        let mut params = vec![0.0; self.nparams];
        let mut seen = vec![false; self.nparams];
        for c in &self.cells {
            if let RateTerm::Param(p) = c.term {
                if !seen[p] {
                    params[p] = cell_value(c) / scale;
                    seen[p] = self.coefficient(c.col, pi) > 0.0;
                }
            }
        }
        params
    }

    /// Expected substitution rate `−Σ π_i Q_ii`.
    pub fn expected_rate(&self, pi: &[f64]) -> f64 {
        -(0..self.size()).map(|i| pi[i] * self.q[(i, i)]).sum::<f64>()
    }

    /// Scale `Q` to expected rate 1 under `pi`, returning the factor the
    /// matrix was divided by.
    pub fn normalize(&mut self, pi: &[f64]) -> Result<f64> {
        let rate = self.expected_rate(pi);
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "cannot normalize a rate matrix with expected rate {rate}"
            )));
        }
        self.q /= rate;
        self.diagonalize(pi)?;
        Ok(rate)
    }

    /// Multiply `Q` by `factor`.
    pub fn scale(&mut self, factor: f64, pi: &[f64]) -> Result<()> {
        self.q *= factor;
        self.diagonalize(pi)
    }

    fn diagonalize(&mut self, pi: &[f64]) -> Result<()> {
        let pi = self.model.is_reversible().then_some(pi);
        self.eigen = Some(EigenSystem::decompose(&self.q, pi)?);
        Ok(())
    }

    /// `exp(Qt)`.
    pub fn exp_qt(&self, t: f64) -> Result<DMatrix<f64>> {
        self.eigen
            .as_ref()
            .ok_or_else(|| PhyloHmmError::Precondition("rate matrix is not diagonalized".into()))?
            .exp_qt(t)
    }

    /// `∂Q/∂θ_p` including the derived diagonal.
    pub fn param_derivative(&self, p: usize, pi: &[f64]) -> DMatrix<f64> {
        let n = self.size();
        let mut dq = DMatrix::zeros(n, n);
        for c in self.cells.iter().filter(|c| c.term == RateTerm::Param(p)) {
            let coef = self.coefficient(c.col, pi);
            dq[(c.row, c.col)] += coef;
            dq[(c.row, c.row)] -= coef;
        }
        dq
    }
}

/// States reachable from `state` by changing at most one position,
/// including `state` itself.
pub fn neighbors(state: usize, order: usize, alph_size: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity((order + 1) * (alph_size - 1) + 1);
    for place in 0..=order {
        let unit = int_pow(alph_size, place);
        let digit = (state / unit) % alph_size;
        let base = state - digit * unit;
        for d in (0..alph_size).filter(|&d| d != digit) {
            out.push(base + d * unit);
        }
    }
    out.push(state);
    out
}

/// Old and new digit when `i` and `j` differ at exactly one position.
fn single_difference(i: usize, j: usize, a: usize, digits: usize) -> Option<(usize, usize)> {
    if i == j {
        return None;
    }
    let mut found = None;
    let (mut x, mut y) = (i, j);
    for _ in 0..digits {
        let (dx, dy) = (x % a, y % a);
        if dx != dy {
            if found.is_some() {
                return None;
            }
            found = Some((dx, dy));
        }
        x /= a;
        y /= a;
    }
    found
}

fn unordered_pair_index(lo: usize, hi: usize, a: usize) -> usize {
    // pairs (0,1),(0,2),...,(0,a-1),(1,2),...
    lo * (2 * a - lo - 1) / 2 + (hi - lo - 1)
}

fn is_transition(x: u8, y: u8) -> bool {
    matches!(
        (x.to_ascii_uppercase(), y.to_ascii_uppercase()),
        (b'A', b'G') | (b'G', b'A') | (b'C', b'T') | (b'T', b'C')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PI: [f64; 4] = [0.1, 0.2, 0.3, 0.4];

    fn row_sums_zero(q: &DMatrix<f64>) {
        for i in 0..q.nrows() {
            assert_relative_eq!(q.row(i).sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn names_round_trip() {
        for m in SubstModel::ALL {
            assert_eq!(m.name().parse::<SubstModel>().unwrap(), m);
        }
        assert!("GTR+G".parse::<SubstModel>().is_err());
    }

    #[test]
    fn parameter_counts() {
        let dna = Alphabet::dna();
        let n = |m| RateMatrix::new(m, &dna).unwrap().nparams();
        assert_eq!(n(SubstModel::Jc69), 0);
        assert_eq!(n(SubstModel::F81), 0);
        assert_eq!(n(SubstModel::Hky85), 1);
        assert_eq!(n(SubstModel::Rev), 6);
        assert_eq!(n(SubstModel::Unrest), 12);
        assert_eq!(n(SubstModel::Hky2), 1);
        // 16 states, each with 6 single-position neighbours
        assert_eq!(n(SubstModel::U2), 96);
        assert_eq!(n(SubstModel::R2), 48);
        assert_eq!(n(SubstModel::R3), 64 * 9 / 2);
    }

    #[test]
    fn jc69_is_normalized() {
        let mut rm = RateMatrix::new(SubstModel::Jc69, &Alphabet::dna()).unwrap();
        rm.set_params(&[], &[0.25; 4]).unwrap();
        assert_relative_eq!(rm.matrix()[(0, 1)], 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(rm.expected_rate(&[0.25; 4]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn hky_structure_and_reversibility() {
        let mut rm = RateMatrix::new(SubstModel::Hky85, &Alphabet::dna()).unwrap();
        rm.set_params(&[2.5], &PI).unwrap();
        let q = rm.matrix();
        row_sums_zero(q);
        // A->G is a transition, A->C a transversion
        assert_relative_eq!(q[(0, 2)], 2.5 * PI[2], epsilon = 1e-12);
        assert_relative_eq!(q[(0, 1)], PI[1], epsilon = 1e-12);
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(PI[i] * q[(i, j)], PI[j] * q[(j, i)], epsilon = 1e-12);
            }
        }
        assert!(rm.eigen().unwrap().is_real());
        assert_relative_eq!(rm.params_from_matrix(&PI)[0], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn rev_params_follow_pair_order() {
        let mut rm = RateMatrix::new(SubstModel::Rev, &Alphabet::dna()).unwrap();
        let params = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        rm.set_params(&params, &PI).unwrap();
        let q = rm.matrix();
        // AC AG AT CG CT GT
        let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
        for (p, &(i, j)) in pairs.iter().enumerate() {
            assert_relative_eq!(q[(i, j)], params[p] * PI[j], epsilon = 1e-12);
            assert_relative_eq!(q[(j, i)], params[p] * PI[i], epsilon = 1e-12);
        }
        for (got, want) in rm.params_from_matrix(&PI).iter().zip(params.iter()) {
            assert_relative_eq!(*got, *want, epsilon = 1e-12);
        }
        let d = rm.default_params();
        assert_eq!(d, vec![1.0, DEFAULT_KAPPA, 1.0, 1.0, DEFAULT_KAPPA, 1.0]);
    }

    #[test]
    fn unrest_is_row_major() {
        let mut rm = RateMatrix::new(SubstModel::Unrest, &Alphabet::dna()).unwrap();
        let params: Vec<f64> = (1..=12).map(|x| x as f64 / 4.0).collect();
        rm.set_params(&params, &PI).unwrap();
        let q = rm.matrix();
        row_sums_zero(q);
        assert_relative_eq!(q[(0, 1)], 0.25, epsilon = 1e-12);
        assert_relative_eq!(q[(1, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(q[(3, 2)], 3.0, epsilon = 1e-12);
        assert!(!rm.eigen().unwrap().is_real());
    }

    #[test]
    fn dinucleotide_changes_one_position() {
        let mut rm = RateMatrix::new(SubstModel::Hky2, &Alphabet::dna()).unwrap();
        let pi = vec![1.0 / 16.0; 16];
        rm.set_params(&[2.0], &pi).unwrap();
        let q = rm.matrix();
        // AA (0) -> GA (8): transition at the first position
        assert_relative_eq!(q[(0, 8)], 2.0 / 16.0, epsilon = 1e-12);
        // AA -> CC changes two positions
        assert_eq!(q[(0, 5)], 0.0);
        row_sums_zero(q);
    }

    #[test]
    fn derivative_matches_cells() {
        let rm = RateMatrix::new(SubstModel::Hky85, &Alphabet::dna()).unwrap();
        let dq = rm.param_derivative(0, &PI);
        assert_relative_eq!(dq[(0, 2)], PI[2]);
        assert_relative_eq!(dq[(0, 0)], -PI[2]);
        assert_eq!(dq[(0, 1)], 0.0);
        assert_eq!(rm.param_cells(0).len(), 4);
    }

    #[test]
    fn normalize_reports_factor() {
        let mut rm = RateMatrix::new(SubstModel::Hky85, &Alphabet::dna()).unwrap();
        rm.set_params(&[4.0], &PI).unwrap();
        let before = rm.expected_rate(&PI);
        let factor = rm.normalize(&PI).unwrap();
        assert_relative_eq!(factor, before, epsilon = 1e-12);
        assert_relative_eq!(rm.expected_rate(&PI), 1.0, epsilon = 1e-12);
        // kappa survives the rescaling
        assert_relative_eq!(rm.params_from_matrix(&PI)[0], 4.0, epsilon = 1e-10);
    }

    #[test]
    fn neighbors_of_state() {
        let mut n = neighbors(0, 1, 4);
        n.sort_unstable();
        assert_eq!(n, vec![0, 1, 2, 3, 4, 8, 12]);
    }

    #[test]
    fn dna_models_reject_other_alphabets() {
        let alph = Alphabet::new("ACGU").unwrap();
        assert!(RateMatrix::new(SubstModel::Hky85, &alph).is_err());
        assert!(RateMatrix::new(SubstModel::Rev, &alph).is_ok());
    }
}
