//! Eigendecomposition of rate matrices and the derived `exp(Qt)`.
//!
//! Reversible generators are symmetrized with `Π^{1/2} Q Π^{-1/2}` and
//! diagonalized in real arithmetic. Anything else goes through complex
//! eigenvalues from the Schur form and eigenvectors by inverse iteration.

use nalgebra::{Complex, ComplexField, DMatrix, DVector};

use phylohmm_core::{PhyloHmmError, Result};

/// Largest imaginary residue tolerated when a complex spectral expression
/// is converted back to a real matrix.
pub const TM_IMAG_EPS: f64 = 1e-6;

const INVERSE_ITERATIONS: usize = 3;

/// Eigenvalues `λ` with eigenvector matrix `V` and its inverse, so that
/// `Q = V diag(λ) V⁻¹`.
#[derive(Debug, Clone)]
pub enum EigenSystem {
    Real {
        values: DVector<f64>,
        vectors: DMatrix<f64>,
        inverse: DMatrix<f64>,
    },
    Complex {
        values: DVector<Complex<f64>>,
        vectors: DMatrix<Complex<f64>>,
        inverse: DMatrix<Complex<f64>>,
    },
}

/// `V⁻¹ · dQ · V` for one rate-matrix parameter, reused across branches.
#[derive(Debug, Clone)]
pub enum ProjectedDerivative {
    Real(DMatrix<f64>),
    Complex(DMatrix<Complex<f64>>),
}

impl EigenSystem {
    /// Diagonalize `q`, using the real path when `pi` is given, strictly
    /// positive, and makes `q` reversible.
    pub fn decompose(q: &DMatrix<f64>, pi: Option<&[f64]>) -> Result<Self> {
        if let Some(pi) = pi {
            if pi.len() == q.nrows() && pi.iter().all(|&p| p > 0.0) {
                if let Some(real) = Self::symmetric(q, pi) {
                    return Ok(real);
                }
            }
        }
        Self::general(q)
    }

    fn symmetric(q: &DMatrix<f64>, pi: &[f64]) -> Option<Self> {
        let n = q.nrows();
        let sqrt_pi: Vec<f64> = pi.iter().map(|p| p.sqrt()).collect();
        let s = DMatrix::from_fn(n, n, |i, j| sqrt_pi[i] * q[(i, j)] / sqrt_pi[j]);
        let asym = (&s - s.transpose()).amax();
        if asym > 1e-8 * s.amax().max(1.0) {
            return None;
        }
        let eig = ((&s + s.transpose()) * 0.5).symmetric_eigen();
        let u = eig.eigenvectors;
        let vectors = DMatrix::from_fn(n, n, |i, j| u[(i, j)] / sqrt_pi[i]);
        let inverse = DMatrix::from_fn(n, n, |i, j| u[(j, i)] * sqrt_pi[j]);
        Some(Self::Real {
            values: eig.eigenvalues,
            vectors,
            inverse,
        })
    }

    /// Diagonalize an arbitrary real generator in complex arithmetic.
    pub fn general(q: &DMatrix<f64>) -> Result<Self> {
        let n = q.nrows();
        if n == 0 || q.ncols() != n {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "rate matrix must be square and non-empty, got {}x{}",
                q.nrows(),
                q.ncols()
            )));
        }
        let values = q.complex_eigenvalues();
        let scale = q.amax().max(1.0);
        let shift = 1e-10 * scale;
        let same_value = 1e-6 * scale;
        let qc: DMatrix<Complex<f64>> = q.map(|x| Complex::new(x, 0.0));
        let mut vectors = DMatrix::<Complex<f64>>::zeros(n, n);

        for k in 0..n {
            let lambda = values[k];
            let shifted = &qc
                - DMatrix::<Complex<f64>>::identity(n, n) * (lambda + Complex::new(shift, 0.0));
            let lu = shifted.lu();
            let mut x = DVector::from_fn(n, |i, _| {
                Complex::new(1.0 + ((i * 7 + k * 3) % 11) as f64 / 11.0, 0.0)
            });
            for _ in 0..INVERSE_ITERATIONS {
                let mut y = lu.solve(&x).ok_or_else(|| {
                    PhyloHmmError::NumericDegeneracy(format!(
                        "inverse iteration failed for eigenvalue {lambda}"
                    ))
                })?;
                for m in 0..k {
                    if (values[m] - lambda).norm() <= same_value {
                        let v = vectors.column(m);
                        let proj = v.dotc(&y);
                        y -= v * proj;
                    }
                }
                let norm = y.norm();
                if norm == 0.0 || !norm.is_finite() {
                    return Err(PhyloHmmError::NumericDegeneracy(format!(
                        "no eigenvector found for eigenvalue {lambda}"
                    )));
                }
                x = y.unscale(norm);
            }
            vectors.set_column(k, &x);
        }

        let residual = &qc * &vectors - &vectors * DMatrix::from_diagonal(&values);
        let worst = residual.iter().map(|z| z.norm()).fold(0.0, f64::max);
        if worst > 1e-6 * scale {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "rate matrix is not diagonalizable (residual {worst:e})"
            )));
        }
        let inverse = vectors.clone().try_inverse().ok_or_else(|| {
            PhyloHmmError::NumericDegeneracy("eigenvector matrix is singular".into())
        })?;
        Ok(Self::Complex {
            values,
            vectors,
            inverse,
        })
    }

    /// Whether the eigendata is real.
    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real { .. })
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Real { values, .. } => values.len(),
            Self::Complex { values, .. } => values.len(),
        }
    }

    /// Eigenvalues as complex numbers.
    pub fn eigenvalues(&self) -> Vec<Complex<f64>> {
        match self {
            Self::Real { values, .. } => values.iter().map(|&l| Complex::new(l, 0.0)).collect(),
            Self::Complex { values, .. } => values.iter().copied().collect(),
        }
    }

    /// `P(t) = exp(Qt)`, with round-off negatives clamped to zero.
    pub fn exp_qt(&self, t: f64) -> Result<DMatrix<f64>> {
        let n = self.size();
        if t == 0.0 {
            return Ok(DMatrix::identity(n, n));
        }
        let mut p = match self {
            Self::Real {
                values,
                vectors,
                inverse,
            } => spectral_map(values, vectors, inverse, |l| (l * t).exp())?,
            Self::Complex {
                values,
                vectors,
                inverse,
            } => spectral_map(values, vectors, inverse, |l| l.scale(t).exp())?,
        };
        p.iter_mut().for_each(|x| {
            if *x < 0.0 {
                *x = 0.0;
            }
        });
        Ok(p)
    }

    /// `V · diag(factor · λ · e^{λt}) · V⁻¹`, the derivative of `exp(Qs)`
    /// at `s = t` times `factor`.
    pub fn exp_derivative(&self, t: f64, factor: f64) -> Result<DMatrix<f64>> {
        match self {
            Self::Real {
                values,
                vectors,
                inverse,
            } => spectral_map(values, vectors, inverse, |l| factor * l * (l * t).exp()),
            Self::Complex {
                values,
                vectors,
                inverse,
            } => spectral_map(values, vectors, inverse, |l| (l * l.scale(t).exp()).scale(factor)),
        }
    }

    /// `V⁻¹ · dQ · V`.
    pub fn project(&self, dq: &DMatrix<f64>) -> ProjectedDerivative {
        match self {
            Self::Real {
                vectors, inverse, ..
            } => ProjectedDerivative::Real(inverse * dq * vectors),
            Self::Complex {
                vectors, inverse, ..
            } => {
                let dqc: DMatrix<Complex<f64>> = dq.map(|x| Complex::new(x, 0.0));
                ProjectedDerivative::Complex(inverse * dqc * vectors)
            }
        }
    }

    /// Exact `∂exp(Qt)/∂θ = V (F ∘ V⁻¹ dQ V) V⁻¹` (Schadt & Lange), with
    /// `F[i][j] = (e^{λ_i t} − e^{λ_j t}) / (λ_i − λ_j)` and
    /// `F[i][i] = t e^{λ_i t}`.
    pub fn exp_param_derivative(&self, projected: &ProjectedDerivative, t: f64) -> Result<DMatrix<f64>> {
        match (self, projected) {
            (
                Self::Real {
                    values,
                    vectors,
                    inverse,
                },
                ProjectedDerivative::Real(inner),
            ) => schadt_lange(values, vectors, inverse, inner, t),
            (
                Self::Complex {
                    values,
                    vectors,
                    inverse,
                },
                ProjectedDerivative::Complex(inner),
            ) => schadt_lange(values, vectors, inverse, inner, t),
            _ => Err(PhyloHmmError::Precondition(
                "projected derivative does not match the eigensystem".into(),
            )),
        }
    }
}

fn spectral_map<T: ComplexField<RealField = f64> + Copy>(
    values: &DVector<T>,
    vectors: &DMatrix<T>,
    inverse: &DMatrix<T>,
    f: impl Fn(T) -> T,
) -> Result<DMatrix<f64>> {
    let mut scaled = vectors.clone();
    for (j, mut col) in scaled.column_iter_mut().enumerate() {
        col *= f(values[j]);
    }
    to_real(&(scaled * inverse))
}

fn schadt_lange<T: ComplexField<RealField = f64> + Copy>(
    values: &DVector<T>,
    vectors: &DMatrix<T>,
    inverse: &DMatrix<T>,
    projected: &DMatrix<T>,
    t: f64,
) -> Result<DMatrix<f64>> {
    let n = values.len();
    let exps: Vec<T> = values.iter().map(|&l| l.scale(t).exp()).collect();
    let mut inner = projected.clone();
    for i in 0..n {
        for j in 0..n {
            let diff = values[i] - values[j];
            let f = if diff.modulus() <= 1e-12 * (1.0 + values[i].modulus()) {
                exps[i].scale(t)
            } else {
                (exps[i] - exps[j]) / diff
            };
            inner[(i, j)] *= f;
        }
    }
    to_real(&(vectors * inner * inverse))
}

fn to_real<T: ComplexField<RealField = f64> + Copy>(m: &DMatrix<T>) -> Result<DMatrix<f64>> {
    let mut out = DMatrix::zeros(m.nrows(), m.ncols());
    for (o, &z) in out.iter_mut().zip(m.iter()) {
        let im = z.imaginary();
        if im.abs() > TM_IMAG_EPS {
            return Err(PhyloHmmError::NumericDegeneracy(format!(
                "imaginary residue {im:e} exceeds tolerance"
            )));
        }
        *o = z.real();
    }
    Ok(out)
}
