// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Multinomial logit formulas used at every level of a nested-logit tree.
use serde::{Deserialize, Serialize};

/// A Logit model with scale parameter `mu`.
///
/// Unavailable alternatives are represented by `None` and never enter the denominator.
///
/// # Example
///
/// ```
/// use choice::LogitModel;
///
/// let model = LogitModel::new(1.0);
/// let probs = model.probabilities(&[Some(2.0), Some(1.0), None]);
/// // The probabilities are `[e / (1 + e), 1 / (1 + e), 0]`, i.e., around 0.73, 0.27 and 0.
/// assert!((probs[0] - 0.7311).abs() < 1e-4);
/// assert_eq!(probs[2], 0.0);
/// // With `u = 0.5`, the first alternative is chosen.
/// assert_eq!(choice::inverse_sampling(&probs, 0.5), Some(0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct LogitModel {
    mu: f64,
}

impl LogitModel {
    /// Creates a new Logit model.
    ///
    /// The value of `mu` must be such that `mu > 0`.
    pub const fn new(mu: f64) -> Self {
        LogitModel { mu }
    }

    /// Scale parameter of the model.
    pub const fn mu(&self) -> f64 {
        self.mu
    }

    /// Returns the log-sum `mu * ln(sum_i exp(v_i / mu))` over the available values.
    ///
    /// Returns negative infinity when no value is available.
    pub fn logsum(&self, values: &[Option<f64>]) -> f64 {
        let max_value = values
            .iter()
            .flatten()
            .fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        if max_value == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        // (v - max_value) is non-positive so the `exp` cannot overflow and sigma is between 1
        // and the number of available values.
        let sigma: f64 = values
            .iter()
            .flatten()
            .map(|&v| ((v - max_value) / self.mu).exp())
            .sum();
        max_value + self.mu * sigma.ln()
    }

    /// Returns the probability of each alternative, given its value (`None` if unavailable).
    ///
    /// The probabilities of the available alternatives sum to 1 and unavailable alternatives
    /// have probability 0. If no alternative is available, all probabilities are 0.
    pub fn probabilities(&self, values: &[Option<f64>]) -> Vec<f64> {
        let logsum = self.logsum(values);
        if logsum == f64::NEG_INFINITY {
            return vec![0.0; values.len()];
        }
        values
            .iter()
            .map(|v| v.map_or(0.0, |v| self.conditional_probability(v, logsum)))
            .collect()
    }

    /// Returns the probability of an alternative with value `value`, given the log-sum of its
    /// choice set.
    pub fn conditional_probability(&self, value: f64, logsum: f64) -> f64 {
        ((value - logsum) / self.mu).exp()
    }
}

impl Default for LogitModel {
    fn default() -> Self {
        LogitModel::new(1.0)
    }
}

/// Returns the index selected by walking the cumulative distribution of `probabilities`, in index
/// order, until it exceeds `u`.
///
/// Alternatives with a zero probability are never selected. Returns `None` if all probabilities
/// are zero.
pub fn inverse_sampling(probabilities: &[f64], u: f64) -> Option<usize> {
    let mut cum_prob = 0.0;
    let mut last_positive = None;
    for (i, &p) in probabilities.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        cum_prob += p;
        last_positive = Some(i);
        if u < cum_prob {
            return Some(i);
        }
    }
    // Rounding errors can make the total slightly smaller than `u`.
    last_positive
}
