//! # Numerical Helpers
//!
//! Log-space probability arithmetic shared by the latent models. Everything
//! here is exact enumeration support: stable log-sum-exp, in-place
//! exp-normalisation, and the logit used by two-model comparison.

/// Stable `ln(sum(exp(xs)))`. Returns `-inf` for an empty slice or when
/// every element is `-inf`.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Two-argument log-sum-exp.
pub fn log_sum_exp2(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if !hi.is_finite() {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Exp-normalise log-weights in place into probabilities summing to one.
/// Returns the normalising constant `ln Z`. When every weight is `-inf`
/// the slice is left untouched and `-inf` is returned.
pub fn exp_normalise(log_weights: &mut [f64]) -> f64 {
    let norm = log_sum_exp(log_weights);
    if !norm.is_finite() {
        return norm;
    }
    for w in log_weights.iter_mut() {
        *w = (*w - norm).exp();
    }
    norm
}

/// `ln(p / (1 - p))` with clamping away from 0 and 1.
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(f64::MIN_POSITIVE, 1.0 - 1e-15);
    (p / (1.0 - p)).ln()
}

/// Logistic sigmoid.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln C(n, k)` via `ln Γ`.
pub fn ln_binomial(n: u64, k: u64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

/// `ln(n!)` with a small-table fast path and Stirling's series above it.
pub fn ln_factorial(n: u64) -> f64 {
    const TABLE: [f64; 11] = [
        0.0,
        0.0,
        0.693_147_180_559_945_3,
        1.791_759_469_228_055,
        3.178_053_830_347_946,
        4.787_491_742_782_046,
        6.579_251_212_010_101,
        8.525_161_361_065_415,
        10.604_602_902_745_251,
        12.801_827_480_081_469,
        15.104_412_573_075_516,
    ];
    let n = n as usize;
    if n < TABLE.len() {
        return TABLE[n];
    }
    let x = (n as f64) + 1.0;
    // Stirling series for ln Γ(x)
    (x - 0.5) * x.ln() - x + 0.5 * (2.0 * std::f64::consts::PI).ln() + 1.0 / (12.0 * x)
        - 1.0 / (360.0 * x * x * x)
}

/// Harmonic number `H_{n-1} = sum_{i=1}^{n-1} 1/i`, used by the coalescent
/// segregating-sites prior.
pub fn harmonic(n: u64) -> f64 {
    (1..n).map(|i| 1.0 / i as f64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sum_exp_matches_direct() {
        let xs = [-1.0f64, -2.0, -3.0];
        let direct = xs.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert!((log_sum_exp(&xs) - direct).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp_all_neg_inf() {
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_exp_normalise_sums_to_one() {
        let mut ws = [-5.0f64, -4.5, -7.0, -4.9];
        exp_normalise(&mut ws);
        assert!((ws.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_logit_inverse() {
        for &p in &[0.01, 0.3, 0.5, 0.9, 0.999] {
            assert!((sigmoid(logit(p)) - p).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ln_factorial_consistency() {
        // table boundary against Stirling
        let exact: f64 = (1..=12u64).map(|i| (i as f64).ln()).sum();
        assert!((ln_factorial(12) - exact).abs() < 1e-9);
    }

    #[test]
    fn test_ln_binomial() {
        assert!((ln_binomial(5, 2) - (10f64).ln()).abs() < 1e-9);
        assert_eq!(ln_binomial(3, 5), f64::NEG_INFINITY);
    }
}
