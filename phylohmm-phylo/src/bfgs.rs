//! Bounded quasi-Newton minimization.
//!
//! argmin's BFGS with a backtracking Armijo line search does the
//! unconstrained work. Box constraints are handled here: the objective is
//! evaluated at the projection of each trial point onto the box, and
//! coordinates pinned at a bound by the gradient are held fixed for a round
//! of BFGS over the remaining ones. Rounds repeat until the projected
//! gradient vanishes or a round stops improving. The caller owns the
//! inverse-Hessian approximation `H`, so curvature learned in one call
//! carries over to the next.

use std::cell::RefCell;

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient};
use argmin::solver::linesearch::condition::ArmijoCondition;
use argmin::solver::linesearch::BacktrackingLineSearch;
use argmin::solver::quasinewton::BFGS;
use nalgebra::DMatrix;
use tracing::debug;

use phylohmm_core::{PhyloHmmError, Result};

use crate::gamma::DERIV_EPSILON;

const ARMIJO: f64 = 1e-4;
const BACKTRACK: f64 = 0.5;

/// Optimization precision levels, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precision {
    Crude,
    Low,
    #[default]
    Medium,
    High,
}

impl Precision {
    /// Relative change in the objective below which BFGS stops.
    pub fn function_tolerance(self) -> f64 {
        match self {
            Precision::Crude => 1e-4,
            Precision::Low => 1e-5,
            Precision::Medium => 1e-7,
            Precision::High => 1e-9,
        }
    }

    /// Projected-gradient norm (relative to `max(1, |f|)`) below which
    /// BFGS stops.
    pub fn gradient_tolerance(self) -> f64 {
        match self {
            Precision::Crude => 1e-2,
            Precision::Low => 1e-3,
            Precision::Medium => 1e-5,
            Precision::High => 1e-7,
        }
    }

    /// Relative improvement in log-likelihood below which EM has converged.
    pub fn em_threshold(self) -> f64 {
        match self {
            Precision::Crude => 1e-3,
            Precision::Low => 1e-4,
            Precision::Medium => 1e-6,
            Precision::High => 1e-8,
        }
    }

    /// One step finer, saturating at `High`.
    pub fn finer(self) -> Self {
        match self {
            Precision::Crude => Precision::Low,
            Precision::Low => Precision::Medium,
            Precision::Medium | Precision::High => Precision::High,
        }
    }
}

/// Per-coordinate box constraints; `None` leaves that side unbounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounds {
    pub lower: Option<Vec<f64>>,
    pub upper: Option<Vec<f64>>,
}

impl Bounds {
    pub fn lower_at(&self, i: usize) -> f64 {
        self.lower
            .as_ref()
            .and_then(|l| l.get(i).copied())
            .unwrap_or(f64::NEG_INFINITY)
    }

    pub fn upper_at(&self, i: usize) -> f64 {
        self.upper
            .as_ref()
            .and_then(|u| u.get(i).copied())
            .unwrap_or(f64::INFINITY)
    }

    fn project(&self, x: &mut [f64]) {
        for (i, v) in x.iter_mut().enumerate() {
            *v = v.clamp(self.lower_at(i), self.upper_at(i));
        }
    }
}

/// A function to minimize.
pub trait Objective {
    /// Objective value at `x`.
    fn cost(&mut self, x: &[f64]) -> Result<f64>;

    /// Gradient at `x`, where the objective is `fx`. Defaults to finite
    /// differences.
    fn gradient(&mut self, x: &[f64], fx: f64, bounds: &Bounds) -> Result<Vec<f64>> {
        numerical_gradient(self, x, fx, bounds)
    }
}

/// Central differences with step [`DERIV_EPSILON`]; one-sided at a bound.
pub fn numerical_gradient<O: Objective + ?Sized>(
    obj: &mut O,
    x: &[f64],
    fx: f64,
    bounds: &Bounds,
) -> Result<Vec<f64>> {
    let mut trial = x.to_vec();
    let mut grad = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let h = DERIV_EPSILON;
        let can_down = x[i] - h >= bounds.lower_at(i);
        let can_up = x[i] + h <= bounds.upper_at(i);
        let g = match (can_down, can_up) {
            (true, true) => {
                trial[i] = x[i] + h;
                let up = obj.cost(&trial)?;
                trial[i] = x[i] - h;
                let down = obj.cost(&trial)?;
                (up - down) / (2.0 * h)
            }
            (false, true) => {
                trial[i] = x[i] + h;
                (obj.cost(&trial)? - fx) / h
            }
            (true, false) => {
                trial[i] = x[i] - h;
                (fx - obj.cost(&trial)?) / h
            }
            (false, false) => 0.0,
        };
        trial[i] = x[i];
        grad.push(g);
    }
    Ok(grad)
}

/// Outcome of one BFGS run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BfgsSummary {
    pub value: f64,
    pub iterations: usize,
}

/// The objective restricted to the free coordinates of one round, with
/// every trial point projected onto the box.
struct Subproblem<'a, 'o, O: ?Sized> {
    obj: &'a RefCell<&'o mut O>,
    base: Vec<f64>,
    free: &'a [usize],
    bounds: &'a Bounds,
    best: &'a RefCell<(Vec<f64>, f64)>,
    last: RefCell<Option<(Vec<f64>, f64)>>,
}

impl<O: Objective + ?Sized> Subproblem<'_, '_, O> {
    fn embed(&self, y: &[f64]) -> Vec<f64> {
        let mut full = self.base.clone();
        for (&i, &v) in self.free.iter().zip(y) {
            full[i] = v;
        }
        self.bounds.project(&mut full);
        full
    }

    fn value_at(&self, full: &[f64]) -> Result<f64> {
        if let Some((x, f)) = self.last.borrow().as_ref() {
            if x.as_slice() == full {
                return Ok(*f);
            }
        }
        let f = self.obj.borrow_mut().cost(full)?;
        *self.last.borrow_mut() = Some((full.to_vec(), f));
        let mut best = self.best.borrow_mut();
        if f.is_finite() && f < best.1 {
            *best = (full.to_vec(), f);
        }
        Ok(f)
    }
}

impl<O: Objective + ?Sized> CostFunction for Subproblem<'_, '_, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, y: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ArgminError::msg("non-finite trial point"));
        }
        Ok(self.value_at(&self.embed(y))?)
    }
}

impl<O: Objective + ?Sized> Gradient for Subproblem<'_, '_, O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, y: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ArgminError::msg("non-finite trial point"));
        }
        let full = self.embed(y);
        let fx = self.value_at(&full)?;
        let g = self.obj.borrow_mut().gradient(&full, fx, self.bounds)?;
        // the projected objective is flat beyond a bound
        Ok(self
            .free
            .iter()
            .zip(y)
            .map(|(&i, &raw)| {
                let (lo, hi) = (self.bounds.lower_at(i), self.bounds.upper_at(i));
                let pinned = raw < lo
                    || raw > hi
                    || (raw <= lo && g[i] > 0.0)
                    || (raw >= hi && g[i] < 0.0);
                if pinned {
                    0.0
                } else {
                    g[i]
                }
            })
            .collect())
    }
}

fn solver_error(e: ArgminError) -> PhyloHmmError {
    match e.downcast::<PhyloHmmError>() {
        Ok(err) => err,
        Err(e) => PhyloHmmError::NumericDegeneracy(format!("optimizer failed: {e}")),
    }
}

/// Minimize `obj` from `x` (updated in place) within `bounds`.
///
/// `h` is the inverse-Hessian approximation; it is reset to the identity
/// when its dimension does not match `x`.
///
/// # Errors
///
/// Propagates objective errors, and returns
/// [`PhyloHmmError::NumericDegeneracy`] when the starting point has a
/// non-finite objective.
pub fn minimize_bfgs<O: Objective + ?Sized>(
    obj: &mut O,
    x: &mut [f64],
    bounds: &Bounds,
    precision: Precision,
    h: &mut DMatrix<f64>,
    max_iterations: usize,
) -> Result<BfgsSummary> {
    let n = x.len();
    if h.nrows() != n || h.ncols() != n {
        *h = DMatrix::identity(n, n);
    }
    bounds.project(x);
    let mut value = obj.cost(x)?;
    if !value.is_finite() {
        return Err(PhyloHmmError::NumericDegeneracy(format!(
            "objective is {value} at the starting point"
        )));
    }
    let scale = value.abs().max(1.0);
    let gtol = precision.gradient_tolerance() * scale;
    let ftol = precision.function_tolerance() * scale;
    let obj = RefCell::new(obj);
    let mut iterations = 0;

    while iterations < max_iterations {
        let g = obj.borrow_mut().gradient(x, value, bounds)?;
        let free: Vec<usize> = free_coordinates(x, &g, bounds)
            .into_iter()
            .enumerate()
            .filter_map(|(i, f)| f.then_some(i))
            .collect();
        let norm = free.iter().map(|&i| g[i] * g[i]).sum::<f64>().sqrt();
        if free.is_empty() || norm <= gtol {
            break;
        }

        let best = RefCell::new((x.to_vec(), value));
        let problem = Subproblem {
            obj: &obj,
            base: x.to_vec(),
            free: &free,
            bounds,
            best: &best,
            last: RefCell::new(None),
        };
        let condition = ArmijoCondition::new(ARMIJO).map_err(solver_error)?;
        let linesearch = BacktrackingLineSearch::new(condition)
            .rho(BACKTRACK)
            .map_err(solver_error)?;
        let solver = BFGS::new(linesearch)
            .with_tolerance_grad(gtol)
            .map_err(solver_error)?
            .with_tolerance_cost(ftol)
            .map_err(solver_error)?;
        let y0: Vec<f64> = free.iter().map(|&i| x[i]).collect();
        let h0: Vec<Vec<f64>> = free
            .iter()
            .map(|&i| free.iter().map(|&j| h[(i, j)]).collect())
            .collect();
        let remaining = (max_iterations - iterations) as u64;

        let (round, inv_hessian) = match Executor::new(problem, solver)
            .configure(|state| state.param(y0).inv_hessian(h0).max_iters(remaining))
            .run()
        {
            Ok(res) => (res.state.iter as usize, res.state.inv_hessian),
            Err(e) => match solver_error(e) {
                PhyloHmmError::NumericDegeneracy(msg) => {
                    debug!(error = %msg, "bfgs round stopped early");
                    (1, None)
                }
                err => return Err(err),
            },
        };
        iterations += round.max(1);

        let finite = inv_hessian
            .filter(|block| block.iter().flatten().all(|v| v.is_finite()));
        for (a, &i) in free.iter().enumerate() {
            for (b, &j) in free.iter().enumerate() {
                h[(i, j)] = match &finite {
                    Some(block) => block[a][b],
                    None if i == j => 1.0,
                    None => 0.0,
                };
            }
        }

        let (best_x, best_value) = best.into_inner();
        let improvement = value - best_value;
        x.copy_from_slice(&best_x);
        value = best_value;
        debug!(iterations, value, nfree = free.len(), "bfgs round");
        if improvement <= ftol {
            break;
        }
    }
    Ok(BfgsSummary { value, iterations })
}

/// Coordinates not pinned at a bound by the gradient.
fn free_coordinates(x: &[f64], g: &[f64], bounds: &Bounds) -> Vec<bool> {
    x.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let at_lower = xi <= bounds.lower_at(i) && g[i] > 0.0;
            let at_upper = xi >= bounds.upper_at(i) && g[i] < 0.0;
            !(at_lower || at_upper)
        })
        .collect()
}
