// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Estimation-mode records: one [Observation] per accepted choice occasion, and the per-model
//! [EstimationSummary] tallies.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calculator::{ChoicePayload, OccasionKey};

/// Value of one utility variable, identified by the coefficient multiplying it.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct UtilityTerm {
    /// Id of the coefficient.
    pub coefficient: usize,
    /// Value of the variable (not multiplied by the coefficient).
    pub value: f64,
}

/// Utility breakdown of one alternative.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ObservedAlternative {
    pub index: usize,
    pub available: bool,
    pub chosen: bool,
    pub payload: ChoicePayload,
    /// Id of the nest containing the alternative and position within that nest.
    pub nest: Option<(u32, usize)>,
    /// Terms of the alternative, followed by the terms of its utility components, in the order
    /// they were added.
    pub terms: Vec<UtilityTerm>,
}

/// Record of one estimation-mode choice occasion.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Observation {
    pub model: String,
    pub key: OccasionKey,
    pub chosen_index: usize,
    pub alternatives: Vec<ObservedAlternative>,
}

/// Mean value of a utility variable over the available alternatives of accepted observations.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TermSummary {
    /// Number of alternatives where the variable is non-zero.
    pub nonzero_count: u64,
    /// Sum of the variable over the alternatives where it is non-zero.
    pub sum: f64,
}

impl TermSummary {
    /// Mean of the non-zero values.
    pub fn mean(&self) -> f64 {
        if self.nonzero_count == 0 {
            0.0
        } else {
            self.sum / self.nonzero_count as f64
        }
    }
}

/// Choice, availability and utility summary of an estimation run.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EstimationSummary {
    pub accepted: u64,
    pub rejected: u64,
    /// Number of times each alternative index was chosen.
    pub chosen_counts: Vec<u64>,
    /// Number of times each alternative index was available.
    pub available_counts: Vec<u64>,
    /// Number of available alternatives seen in accepted observations.
    pub available_alternatives: u64,
    /// Summary of each utility variable, by coefficient id.
    pub terms: BTreeMap<usize, TermSummary>,
}

impl EstimationSummary {
    /// Records an accepted observation.
    pub fn record_accepted(&mut self, observation: &Observation) {
        self.accepted += 1;
        let n = observation.alternatives.len();
        if self.chosen_counts.len() < n {
            self.chosen_counts.resize(n, 0);
            self.available_counts.resize(n, 0);
        }
        self.chosen_counts[observation.chosen_index] += 1;
        for alt in observation.alternatives.iter().filter(|a| a.available) {
            self.available_counts[alt.index] += 1;
            self.available_alternatives += 1;
            for term in alt.terms.iter().filter(|t| t.value != 0.0) {
                let summary = self.terms.entry(term.coefficient).or_default();
                summary.nonzero_count += 1;
                summary.sum += term.value;
            }
        }
    }

    /// Records a rejected observation.
    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Adds the tallies of another summary to this one.
    pub fn merge(&mut self, other: &EstimationSummary) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.available_alternatives += other.available_alternatives;
        let n = other.chosen_counts.len();
        if self.chosen_counts.len() < n {
            self.chosen_counts.resize(n, 0);
            self.available_counts.resize(n, 0);
        }
        for (i, (&c, &a)) in other
            .chosen_counts
            .iter()
            .zip(other.available_counts.iter())
            .enumerate()
        {
            self.chosen_counts[i] += c;
            self.available_counts[i] += a;
        }
        for (&coef, summary) in other.terms.iter() {
            let s = self.terms.entry(coef).or_default();
            s.nonzero_count += summary.nonzero_count;
            s.sum += summary.sum;
        }
    }

    /// Share of the available alternatives where the variable of coefficient `id` is non-zero.
    pub fn nonzero_share(&self, id: usize) -> f64 {
        if self.available_alternatives == 0 {
            return 0.0;
        }
        self.terms.get(&id).map_or(0.0, |s| {
            s.nonzero_count as f64 / self.available_alternatives as f64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(chosen: usize, values: &[f64]) -> Observation {
        Observation {
            model: "m".to_owned(),
            key: OccasionKey::new(1, 0),
            chosen_index: chosen,
            alternatives: values
                .iter()
                .enumerate()
                .map(|(i, &v)| ObservedAlternative {
                    index: i,
                    available: true,
                    chosen: i == chosen,
                    payload: ChoicePayload::Mode(i as u32),
                    nest: None,
                    terms: vec![UtilityTerm {
                        coefficient: 3,
                        value: v,
                    }],
                })
                .collect(),
        }
    }

    #[test]
    fn summary_test() {
        let mut a = EstimationSummary::default();
        a.record_accepted(&observation(1, &[0.0, 2.0]));
        a.record_rejected();
        let mut b = EstimationSummary::default();
        b.record_accepted(&observation(2, &[1.0, 0.0, 3.0]));
        a.merge(&b);
        assert_eq!(a.accepted, 2);
        assert_eq!(a.rejected, 1);
        assert_eq!(a.chosen_counts, vec![0, 1, 1]);
        assert_eq!(a.available_counts, vec![2, 2, 1]);
        assert_eq!(a.terms[&3].nonzero_count, 3);
        assert!((a.terms[&3].mean() - 2.0).abs() < 1e-12);
        assert!((a.nonzero_share(3) - 0.6).abs() < 1e-12);
        assert_eq!(a.nonzero_share(4), 0.0);
    }
}
