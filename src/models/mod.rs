// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Choice models: thin configurations of the choice engine for one decision of a person.
#[cfg(test)]
mod test_utils;
pub mod tour_mode;
pub mod work_location;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use choice::{
    ChoiceProbabilityCalculator, CoefficientTable, Observation, OccasionFailure, RandomStream,
};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::impedance::{ImpedanceProvider, Mode};
use crate::parameters::Parameters;
use crate::population::{Household, Person, Population};

pub use tour_mode::TourModeModel;
pub use work_location::WorkLocationModel;

/// Name of the usual work location model.
pub const WORK_LOCATION: &str = "work_location";
/// Name of the work tour mode model.
pub const TOUR_MODE: &str = "tour_mode";

/// Coefficient tables of the models, by model name.
pub type CoefficientSets = BTreeMap<String, Arc<CoefficientTable>>;

/// Returns the coefficient table of a model.
pub fn coefficients_of(sets: &CoefficientSets, model: &str) -> Result<Arc<CoefficientTable>> {
    sets.get(model)
        .cloned()
        .ok_or_else(|| anyhow!("No coefficients for model `{model}`"))
}

/// Read-only data shared by all the workers of a pass.
#[derive(Clone, Copy)]
pub struct ModelContext<'a> {
    pub parameters: &'a Parameters,
    pub population: &'a Population,
    pub impedance: &'a dyn ImpedanceProvider,
    /// Shadow price of each parcel, by parcel index.
    pub shadow_prices: &'a [f64],
    /// `true` in estimation mode: observed choices are used instead of simulated ones.
    pub estimation: bool,
}

impl ModelContext<'_> {
    /// Returns `true` if the observations of the given model are recorded in this pass.
    pub fn is_estimated(&self, model: &str) -> bool {
        self.estimation && self.parameters.estimation_model.as_deref() == Some(model)
    }
}

/// Choices made so far for a person, read by the downstream models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PersonChoices {
    /// Index of the usual work parcel.
    pub work_parcel: Option<usize>,
    /// Mode of the work tour.
    pub work_tour_mode: Option<Mode>,
}

/// An observation written by a worker, with the keys used to order the estimation data.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ObservationRecord {
    pub household_id: u64,
    pub person_id: u64,
    pub observation: Observation,
}

/// Outcome of a model for one person.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelOutcome {
    /// The choice was made (or the observation written).
    Done,
    /// The model does not apply to the person.
    NotApplicable,
    /// The occasion was malformed: the person is invalid.
    Invalid(OccasionFailure),
}

/// Per-worker state of the models: one calculator per model, plus one calculator for the
/// mode-choice log-sums used as accessibility by other models.
///
/// A helper is owned by exactly one worker.
#[derive(Clone, Debug)]
pub struct ChoiceModelHelper {
    pub calculators: HashMap<&'static str, ChoiceProbabilityCalculator>,
    pub accessibility: ChoiceProbabilityCalculator,
    pub stream: RandomStream,
    pub observations: Vec<ObservationRecord>,
}

impl ChoiceModelHelper {
    /// Creates the helper of a worker for the given models.
    pub fn new(
        context: &ModelContext<'_>,
        models: &[Box<dyn ChoiceModel>],
        coefficients: &CoefficientSets,
        base_seed: u64,
    ) -> Result<Self> {
        let mut calculators = HashMap::with_capacity(models.len());
        for model in models {
            let name = model.name();
            calculators.insert(
                name,
                ChoiceProbabilityCalculator::new(
                    name,
                    coefficients_of(coefficients, name)?,
                    context.is_estimated(name),
                ),
            );
        }
        Ok(ChoiceModelHelper {
            calculators,
            accessibility: ChoiceProbabilityCalculator::new(
                TOUR_MODE,
                coefficients_of(coefficients, TOUR_MODE)?,
                false,
            ),
            stream: RandomStream::new(base_seed),
            observations: Vec::new(),
        })
    }

    /// Takes the observations written since the last call.
    pub fn take_observations(&mut self) -> Vec<ObservationRecord> {
        std::mem::take(&mut self.observations)
    }
}

/// Returns the calculator of a model among the calculators of a helper.
///
/// The calculators are borrowed alone so that the stream and the accessibility calculator of
/// the helper remain available.
pub fn calculator_of<'a>(
    calculators: &'a mut HashMap<&'static str, ChoiceProbabilityCalculator>,
    model: &str,
) -> Result<&'a mut ChoiceProbabilityCalculator> {
    calculators
        .get_mut(model)
        .ok_or_else(|| anyhow!("No calculator for model `{model}`"))
}

/// A choice model, run once for each person of the population.
///
/// The random stream of the helper is reset with the person id and [ChoiceModel::salt] before
/// each call.
pub trait ChoiceModel: Send + Sync {
    /// Name of the model, used to find its coefficients.
    fn name(&self) -> &'static str;

    /// Salt of the random stream of the model.
    fn salt(&self) -> u32;

    /// Runs the model for a person.
    ///
    /// Configuration errors are returned as `Err`. Malformed occasions are returned as
    /// [ModelOutcome::Invalid].
    fn run(
        &self,
        context: &ModelContext<'_>,
        helper: &mut ChoiceModelHelper,
        household: &Household,
        person: &Person,
        choices: &mut PersonChoices,
    ) -> Result<ModelOutcome>;
}

/// Returns the reference models, in the order they are run.
pub fn reference_models(
    parameters: &Parameters,
    coefficients: &CoefficientSets,
) -> Result<Vec<Box<dyn ChoiceModel>>> {
    let tour_mode_coefficients = coefficients_of(coefficients, TOUR_MODE)?;
    Ok(vec![
        Box::new(WorkLocationModel::new(
            parameters.sampler_settings(WORK_LOCATION)?.clone(),
        )?),
        Box::new(TourModeModel::new(&tour_mode_coefficients)?),
    ])
}
