//! Branch support from the quartet frequencies around a branch.
//!
//! # Overview
//! Under the multispecies coalescent, the main resolution of the quartets
//! around an internal branch of length `t` (coalescent units) has probability
//! `x = 1 − 2/3·e^(−t)` and each alternative `(1 − x)/2`. With a Yule prior
//! of rate `λ` on the branch, the likelihood of resolution `i` observed in
//! `f_i` of `n` gene quartets is proportional to
//!
//! ```text
//! L_i = 2^-(n - f_i) · B(f_i + 1, n - f_i + λ) · (1 − I_{1/3}(f_i + 1, n - f_i + λ))
//! ```
//!
//! where `B` is the beta function and `I` the regularized incomplete beta
//! function. The local posterior probability of resolution `i` is
//! `L_i / (L_1 + L_2 + L_3)`. Everything is computed in log space.

use log::warn;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::beta::{checked_beta_reg, checked_ln_beta};

/// Support values derived for one branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posterior {
    /// Length of the branch in coalescent units
    pub branch_length: f64,
    /// Local posterior probability of each of the three resolutions
    pub posterior: [f64; 3],
    /// p-value of the polytomy test, `-1.0` when the test is not defined
    pub p_value: f64,
}

/// Turns quartet frequencies into branch length, posteriors and a polytomy test.
pub trait PosteriorModel: Send + Sync {
    fn evaluate(&self, f1: f64, f2: f64, f3: f64, n: f64, lambda: f64) -> Posterior;
}

/// Local posterior probability model with a Yule branch-length prior.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPosterior;

impl LocalPosterior {
    /// Maximum-likelihood branch length from the main frequency, with a
    /// pseudocount of 0.5.
    ///
    /// # Example
    /// ```
    /// # use quartet_support::posterior::LocalPosterior;
    /// assert_eq!(LocalPosterior::branch_length(3.0, 9.0), 0.0);
    /// assert!(LocalPosterior::branch_length(10.0, 10.0) > 1.0);
    /// ```
    pub fn branch_length(f1: f64, n: f64) -> f64 {
        let p = (f1 + 0.5) / (n + 1.0);
        if p <= 1.0 / 3.0 {
            return 0.0;
        }
        -(1.5 * (1.0 - p)).ln()
    }

    /// Chi-square test (2 degrees of freedom) of the three frequencies
    /// against the uniform expectation `n/3`.
    ///
    /// Returns `-1.0` when `n` is not positive.
    pub fn polytomy_p_value(f1: f64, f2: f64, f3: f64, n: f64) -> f64 {
        if n.is_nan() || n <= 0.0 {
            return -1.0;
        }
        let expected = n / 3.0;
        let stat: f64 = [f1, f2, f3]
            .iter()
            .map(|f| (f - expected).powi(2) / expected)
            .sum();
        match ChiSquared::new(2.0) {
            Ok(chi) => chi.sf(stat),
            Err(_) => -1.0,
        }
    }

    fn log_likelihood(f: f64, n: f64, lambda: f64) -> Option<f64> {
        let a = f + 1.0;
        let b = n - f + lambda;
        let ln_b = checked_ln_beta(a, b).ok()?;
        // I_{2/3}(b, a) = 1 - I_{1/3}(a, b)
        let tail = checked_beta_reg(b, a, 2.0 / 3.0).ok()?;
        if tail <= 0.0 {
            return None;
        }
        Some(-(n - f) * std::f64::consts::LN_2 + ln_b + tail.ln())
    }

    /// Local posterior probabilities of the three resolutions.
    pub fn posteriors(f1: f64, f2: f64, f3: f64, n: f64, lambda: f64) -> [f64; 3] {
        let logs = [f1, f2, f3].map(|f| Self::log_likelihood(f, n, lambda));
        let Some(max) = logs.iter().flatten().copied().reduce(f64::max) else {
            warn!("No finite likelihood for frequencies ({f1}, {f2}, {f3}) of {n}; assuming 1/3 each");
            return [1.0 / 3.0; 3];
        };
        let scaled = logs.map(|l| l.map_or(0.0, |l| (l - max).exp()));
        let total: f64 = scaled.iter().sum();
        scaled.map(|s| s / total)
    }
}

impl PosteriorModel for LocalPosterior {
    fn evaluate(&self, f1: f64, f2: f64, f3: f64, n: f64, lambda: f64) -> Posterior {
        Posterior {
            branch_length: Self::branch_length(f1, n),
            posterior: Self::posteriors(f1, f2, f3, n, lambda),
            p_value: Self::polytomy_p_value(f1, f2, f3, n),
        }
    }
}
