//! Log-space arithmetic and small numeric helpers.
//!
//! Scores throughout the phylohmm crates are natural logarithms, with
//! `f64::NEG_INFINITY` standing for probability zero. The helpers here keep
//! sums of such scores stable against underflow.

/// Log-sum-exp of two values: `ln(exp(a) + exp(b))` without overflow.
///
/// Negative infinity is the additive identity.
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (max, min) = if a >= b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}

/// Log-sum-exp over a slice. Returns `-∞` for an empty slice or when every
/// term is `-∞`.
pub fn log_sum_exp_slice(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Integer power `base^exp`, saturating at `usize::MAX`.
pub fn int_pow(base: usize, exp: usize) -> usize {
    let mut acc: usize = 1;
    for _ in 0..exp {
        acc = acc.saturating_mul(base);
        if acc == usize::MAX {
            break;
        }
    }
    acc
}

/// Division where a zero denominator yields 0 if the numerator is also 0,
/// and an infinity carrying the numerator's sign otherwise.
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        if num == 0.0 {
            0.0
        } else if num > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }
    } else {
        num / den
    }
}

/// `ln(x)` for a probability, mapping 0 to `-∞` and rejecting nothing.
pub fn ln_or_neg_inf(x: f64) -> f64 {
    if x <= 0.0 {
        f64::NEG_INFINITY
    } else {
        x.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn lse_pair_matches_direct() {
        let a = 0.3_f64.ln();
        let b = 0.5_f64.ln();
        assert!((log_sum_exp(a, b) - 0.8_f64.ln()).abs() < TOL);
    }

    #[test]
    fn lse_identity() {
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, -2.0), -2.0);
        assert_eq!(log_sum_exp(-2.0, f64::NEG_INFINITY), -2.0);
        assert_eq!(
            log_sum_exp(f64::NEG_INFINITY, f64::NEG_INFINITY),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn lse_slice() {
        let v = [0.1_f64.ln(), 0.2_f64.ln(), 0.3_f64.ln()];
        assert!((log_sum_exp_slice(&v) - 0.6_f64.ln()).abs() < TOL);
        assert_eq!(log_sum_exp_slice(&[]), f64::NEG_INFINITY);
        assert!((log_sum_exp_slice(&[-1000.0, -1000.0]) - (-1000.0 + 2f64.ln())).abs() < TOL);
    }

    #[test]
    fn int_pow_values() {
        assert_eq!(int_pow(4, 0), 1);
        assert_eq!(int_pow(4, 3), 64);
        assert_eq!(int_pow(6, 40), usize::MAX);
    }

    #[test]
    fn safe_div_zero_cases() {
        assert_eq!(safe_div(0.0, 0.0), 0.0);
        assert_eq!(safe_div(2.0, 0.0), f64::INFINITY);
        assert_eq!(safe_div(-2.0, 0.0), f64::NEG_INFINITY);
        assert_eq!(safe_div(1.0, 4.0), 0.25);
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn lse_pair_agrees_with_slice(a in -50.0f64..10.0, b in -50.0f64..10.0) {
                let pair = log_sum_exp(a, b);
                let slice = log_sum_exp_slice(&[a, b]);
                prop_assert!((pair - slice).abs() < 1e-10);
                prop_assert!(pair >= a.max(b));
            }
        }
    }
}
