// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Shadow prices: per-location utility offsets adjusted between passes so that the simulated
//! totals match control totals.
use anyhow::{bail, Result};
use hashbrown::HashMap;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Values below this threshold are replaced by it in the logarithm of the update.
const MIN_COUNT: f64 = 0.01;

const fn default_max_iterations() -> u32 {
    1
}

const fn default_damping() -> f64 {
    1.0
}

const fn default_max_offset() -> f64 {
    5.0
}

const fn default_percent_tolerance() -> f64 {
    0.1
}

const fn default_absolute_tolerance() -> f64 {
    20.0
}

/// Parameters of the shadow-price equilibration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ShadowPricingParameters {
    /// Maximum number of simulation passes. With 1 pass, the shadow prices are used but never
    /// adjusted.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Weight of the logarithmic update, between 0 (excluded) and 1.
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Bound on the absolute value of the offsets.
    #[serde(default = "default_max_offset")]
    pub max_offset: f64,
    /// Locations whose control total is below this value are priced on the totals of their
    /// zone.
    #[serde(default)]
    pub threshold: f64,
    /// Relative gap tolerated between prediction and control, as a share of the control.
    #[serde(default = "default_percent_tolerance")]
    pub percent_tolerance: f64,
    /// Absolute gap tolerated between prediction and control.
    #[serde(default = "default_absolute_tolerance")]
    pub absolute_tolerance: f64,
}

impl Default for ShadowPricingParameters {
    fn default() -> Self {
        ShadowPricingParameters {
            max_iterations: default_max_iterations(),
            damping: default_damping(),
            max_offset: default_max_offset(),
            threshold: 0.0,
            percent_tolerance: default_percent_tolerance(),
            absolute_tolerance: default_absolute_tolerance(),
        }
    }
}

impl ShadowPricingParameters {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            bail!("The maximum number of shadow-pricing iterations must be positive");
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            bail!(
                "The shadow-pricing damping must be in (0, 1], got {}",
                self.damping
            );
        }
        if !(self.max_offset > 0.0) {
            bail!("The maximum shadow price must be positive");
        }
        if !(self.percent_tolerance >= 0.0 && self.absolute_tolerance >= 0.0) {
            bail!("The shadow-pricing tolerances must be non-negative");
        }
        Ok(())
    }
}

/// A location with a control total.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct LocationControl {
    pub location_id: u64,
    pub zone_id: u32,
    pub control: f64,
}

/// Shadow price of a location, as written to `shadow_prices.json`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ShadowPriceRecord {
    pub location_id: u64,
    pub zone_id: u32,
    pub offset: f64,
    pub control: f64,
    pub prediction: f64,
}

/// State of the equilibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum EquilibriumState {
    Initialized,
    /// Passes have been measured and offsets adjusted.
    Running { pass: u32 },
    /// All locations are within tolerance after the given pass.
    Converged { pass: u32 },
    /// The maximum number of passes was run without convergence.
    MaxIterationsReached { pass: u32 },
}

/// Comparison of the simulated totals of a pass with the control totals.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PassMeasure {
    pub pass: u32,
    pub total_prediction: f64,
    pub total_control: f64,
    /// Largest absolute gap between prediction and rescaled control.
    pub max_absolute_gap: f64,
    /// Root mean square of the gaps.
    pub rmse: f64,
    pub nb_outside_tolerance: usize,
    pub converged: bool,
}

/// Outer loop adjusting per-location offsets between simulation passes.
#[derive(Clone, Debug)]
pub struct ShadowPriceEquilibrator {
    parameters: ShadowPricingParameters,
    locations: Vec<LocationControl>,
    zone_index: Vec<usize>,
    nb_zones: usize,
    offsets: Vec<f64>,
    last_predictions: Vec<f64>,
    state: EquilibriumState,
    pass: u32,
}

impl ShadowPriceEquilibrator {
    /// Initializes the equilibration with the control total of each location.
    ///
    /// Initial offsets are taken from `initial` (matched by location id), or 0.
    pub fn new(
        parameters: ShadowPricingParameters,
        locations: Vec<LocationControl>,
        initial: Option<&[ShadowPriceRecord]>,
    ) -> Result<Self> {
        parameters.validate()?;
        if let Some(l) = locations
            .iter()
            .find(|l| !(l.control >= 0.0 && l.control.is_finite()))
        {
            bail!(
                "Invalid control total {} for location {}",
                l.control,
                l.location_id
            );
        }
        let mut zones = HashMap::new();
        let zone_index = locations
            .iter()
            .map(|l| {
                let n = zones.len();
                *zones.entry(l.zone_id).or_insert(n)
            })
            .collect();
        let mut offsets = vec![0.0; locations.len()];
        if let Some(records) = initial {
            let by_id: HashMap<u64, f64> =
                records.iter().map(|r| (r.location_id, r.offset)).collect();
            for (offset, location) in offsets.iter_mut().zip(locations.iter()) {
                if let Some(&o) = by_id.get(&location.location_id) {
                    *offset = o.clamp(-parameters.max_offset, parameters.max_offset);
                }
            }
            info!("Initialized {} shadow prices from file", by_id.len());
        }
        let nb_locations = locations.len();
        Ok(ShadowPriceEquilibrator {
            parameters,
            locations,
            zone_index,
            nb_zones: zones.len(),
            offsets,
            last_predictions: vec![0.0; nb_locations],
            state: EquilibriumState::Initialized,
            pass: 0,
        })
    }

    /// Current offset of each location.
    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub const fn state(&self) -> EquilibriumState {
        self.state
    }

    /// Returns `true` if no other pass should be run.
    pub const fn is_finished(&self) -> bool {
        matches!(
            self.state,
            EquilibriumState::Converged { .. } | EquilibriumState::MaxIterationsReached { .. }
        )
    }

    /// Returns the prediction and the control total used to price each location: its own
    /// values, or the totals of its zone when its control is below the threshold.
    ///
    /// Controls are rescaled so that they sum to the total prediction.
    fn pricing_totals(&self, predictions: &[f64]) -> Vec<(f64, f64)> {
        let total_prediction: f64 = predictions.iter().sum();
        let total_control: f64 = self.locations.iter().map(|l| l.control).sum();
        let factor = if total_control > 0.0 {
            total_prediction / total_control
        } else {
            0.0
        };
        let mut zone_prediction = vec![0.0; self.nb_zones];
        let mut zone_control = vec![0.0; self.nb_zones];
        for ((location, &z), &p) in self
            .locations
            .iter()
            .zip(self.zone_index.iter())
            .zip(predictions)
        {
            zone_prediction[z] += p;
            zone_control[z] += location.control * factor;
        }
        self.locations
            .iter()
            .zip(self.zone_index.iter())
            .zip(predictions)
            .map(|((location, &z), &p)| {
                let control = location.control * factor;
                if control >= self.parameters.threshold {
                    (p, control)
                } else {
                    (zone_prediction[z], zone_control[z])
                }
            })
            .collect()
    }

    /// Target of a location: the control, moved toward the prediction by the tolerances.
    fn target(p: &ShadowPricingParameters, prediction: f64, control: f64) -> f64 {
        if prediction > control {
            prediction.min(
                (control * (1.0 + p.percent_tolerance)).min(control + p.absolute_tolerance),
            )
        } else {
            prediction.max(
                (control * (1.0 - p.percent_tolerance)).max(control - p.absolute_tolerance),
            )
        }
    }

    fn within_tolerance(&self, prediction: f64, control: f64) -> bool {
        let p = &self.parameters;
        (prediction - control).abs()
            <= (control * p.percent_tolerance).max(p.absolute_tolerance) + 1e-9
    }

    /// Compares the predictions of a pass with the control totals.
    pub fn measure(&self, predictions: &[f64]) -> Result<PassMeasure> {
        if predictions.len() != self.locations.len() {
            bail!(
                "Expected {} predictions, got {}",
                self.locations.len(),
                predictions.len()
            );
        }
        let totals = self.pricing_totals(predictions);
        let mut max_absolute_gap: f64 = 0.0;
        let mut sum_squares = 0.0;
        let mut nb_outside_tolerance = 0;
        for &(prediction, control) in totals.iter() {
            let gap = (prediction - control).abs();
            max_absolute_gap = max_absolute_gap.max(gap);
            sum_squares += gap.powi(2);
            if !self.within_tolerance(prediction, control) {
                nb_outside_tolerance += 1;
            }
        }
        let rmse = if totals.is_empty() {
            0.0
        } else {
            (sum_squares / totals.len() as f64).sqrt()
        };
        Ok(PassMeasure {
            pass: self.pass + 1,
            total_prediction: predictions.iter().sum(),
            total_control: self.locations.iter().map(|l| l.control).sum(),
            max_absolute_gap,
            rmse,
            nb_outside_tolerance,
            converged: nb_outside_tolerance == 0,
        })
    }

    /// Measures the predictions of the last pass and, if they are not within tolerance,
    /// adjusts the offsets for the next pass.
    ///
    /// The update is `offset += damping * ln(max(target, .01) / max(prediction, .01))`, bounded
    /// by the maximum offset.
    pub fn adjust(&mut self, predictions: &[f64]) -> Result<PassMeasure> {
        let measure = self.measure(predictions)?;
        self.pass = measure.pass;
        self.last_predictions = predictions.to_vec();
        if measure.converged {
            self.state = EquilibriumState::Converged { pass: self.pass };
            info!("Shadow prices converged after {} passes", self.pass);
            return Ok(measure);
        }
        let totals = self.pricing_totals(predictions);
        let max_offset = self.parameters.max_offset;
        let damping = self.parameters.damping;
        for (offset, &(prediction, control)) in self.offsets.iter_mut().zip(totals.iter()) {
            let target = Self::target(&self.parameters, prediction, control);
            let update = (target.max(MIN_COUNT) / prediction.max(MIN_COUNT)).ln();
            *offset = (*offset + damping * update).clamp(-max_offset, max_offset);
        }
        debug!(
            "Pass {}: {} locations outside tolerance, max gap {:.2}",
            self.pass, measure.nb_outside_tolerance, measure.max_absolute_gap
        );
        self.state = if self.pass >= self.parameters.max_iterations {
            info!(
                "Maximum number of shadow-pricing passes reached ({})",
                self.pass
            );
            EquilibriumState::MaxIterationsReached { pass: self.pass }
        } else {
            EquilibriumState::Running { pass: self.pass }
        };
        Ok(measure)
    }

    /// Returns the records to write to `shadow_prices.json`.
    pub fn records(&self) -> Vec<ShadowPriceRecord> {
        self.locations
            .iter()
            .zip(self.offsets.iter())
            .zip(self.last_predictions.iter())
            .map(|((l, &offset), &prediction)| ShadowPriceRecord {
                location_id: l.location_id,
                zone_id: l.zone_id,
                offset,
                control: l.control,
                prediction,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations(controls: &[f64], zones: &[u32]) -> Vec<LocationControl> {
        controls
            .iter()
            .zip(zones)
            .enumerate()
            .map(|(i, (&control, &zone_id))| LocationControl {
                location_id: i as u64,
                zone_id,
                control,
            })
            .collect()
    }

    /// Logit shares of `n` choosers between locations with equal base utility.
    fn predictions(offsets: &[f64], n: f64) -> Vec<f64> {
        let total: f64 = offsets.iter().map(|o| o.exp()).sum();
        offsets.iter().map(|o| n * o.exp() / total).collect()
    }

    fn parameters(max_iterations: u32) -> ShadowPricingParameters {
        ShadowPricingParameters {
            max_iterations,
            percent_tolerance: 0.01,
            absolute_tolerance: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn convergence_test() {
        let mut eq = ShadowPriceEquilibrator::new(
            parameters(10),
            locations(&[300.0, 700.0, 1000.0], &[1, 2, 3]),
            None,
        )
        .unwrap();
        assert_eq!(eq.state(), EquilibriumState::Initialized);
        let mut gaps = Vec::new();
        while !eq.is_finished() {
            // 1000 choosers: the controls are rescaled by one half.
            let measure = eq.adjust(&predictions(eq.offsets(), 1000.0)).unwrap();
            gaps.push(measure.max_absolute_gap);
        }
        assert!(matches!(eq.state(), EquilibriumState::Converged { .. }));
        assert!(gaps.len() <= 3);
        let p = predictions(eq.offsets(), 1000.0);
        assert!((p[0] - 150.0).abs() <= 1.5);
        assert!((p[1] - 350.0).abs() <= 3.5);
        assert!((p[2] - 500.0).abs() <= 5.0);
    }

    #[test]
    fn max_iterations_test() {
        let mut params = parameters(2);
        // Heavy damping: cannot converge in 2 passes.
        params.damping = 0.1;
        let mut eq =
            ShadowPriceEquilibrator::new(params, locations(&[100.0, 900.0], &[1, 2]), None)
                .unwrap();
        eq.adjust(&predictions(eq.offsets(), 1000.0)).unwrap();
        assert_eq!(eq.state(), EquilibriumState::Running { pass: 1 });
        eq.adjust(&predictions(eq.offsets(), 1000.0)).unwrap();
        assert_eq!(
            eq.state(),
            EquilibriumState::MaxIterationsReached { pass: 2 }
        );
        assert!(eq.is_finished());
        // Offsets move toward the controls.
        assert!(eq.offsets()[0] < 0.0);
        assert!(eq.offsets()[1] > 0.0);
    }

    #[test]
    fn update_rule_test() {
        let mut params = parameters(5);
        params.percent_tolerance = 0.1;
        params.absolute_tolerance = 5.0;
        params.max_offset = 0.5;
        let mut eq =
            ShadowPriceEquilibrator::new(params, locations(&[100.0, 100.0], &[1, 2]), None)
                .unwrap();
        eq.adjust(&[160.0, 40.0]).unwrap();
        // Over-predicted: target is min(160, 110, 105) = 105.
        assert!((eq.offsets()[0] - (105.0f64 / 160.0).ln()).abs() < 1e-12);
        // Under-predicted: target is max(40, 90, 95) = 95, update bounded by the maximum offset.
        assert_eq!(eq.offsets()[1], 0.5);
    }

    #[test]
    fn zone_aggregate_test() {
        let mut params = parameters(5);
        params.threshold = 50.0;
        let mut eq = ShadowPriceEquilibrator::new(
            params,
            locations(&[10.0, 20.0, 970.0], &[1, 1, 2]),
            None,
        )
        .unwrap();
        // The zone of the two small locations matches its control in total.
        let measure = eq.adjust(&[30.0, 0.0, 970.0]).unwrap();
        assert!(measure.converged);
        // Small locations are measured against their zone, not against their own prediction.
        assert_eq!(measure.max_absolute_gap, 0.0);
        assert_eq!(measure.rmse, 0.0);
        assert_eq!(eq.offsets(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn initial_offsets_test() {
        let records = vec![ShadowPriceRecord {
            location_id: 1,
            zone_id: 1,
            offset: 9.0,
            control: 0.0,
            prediction: 0.0,
        }];
        let eq = ShadowPriceEquilibrator::new(
            parameters(1),
            locations(&[10.0, 20.0], &[1, 1]),
            Some(&records),
        )
        .unwrap();
        assert_eq!(eq.offsets(), &[0.0, 5.0]);
        assert!(ShadowPriceEquilibrator::new(
            parameters(1),
            locations(&[-1.0], &[1]),
            None
        )
        .is_err());
    }
}
