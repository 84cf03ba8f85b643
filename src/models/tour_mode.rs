// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Mode of the work tour: nested logit with an auto nest over drive alone and shared ride.
use anyhow::{anyhow, bail, Result};
use choice::{
    ChoicePayload, ChoiceProbabilityCalculator, CoefficientTable, ComponentKey, OccasionFailure,
    OccasionKey,
};

use super::{
    calculator_of, ChoiceModel, ChoiceModelHelper, ModelContext, ModelOutcome, ObservationRecord,
    PersonChoices, TOUR_MODE,
};
use crate::impedance::{Mode, PathType, TimePeriod};
use crate::population::{Household, Parcel, Person};

pub const ASC_WALK: usize = 1;
pub const ASC_BIKE: usize = 2;
pub const ASC_SHARED_RIDE: usize = 4;
pub const ASC_TRANSIT: usize = 5;
/// Travel time, in minutes.
pub const TIME: usize = 10;
/// Monetary cost.
pub const COST: usize = 11;
/// Household income in tens of thousands, on the auto alternatives.
pub const INCOME_AUTO: usize = 20;
/// Log-sum parameter of the auto nest.
pub const NEST_AUTO: usize = 30;

/// Id of the auto nest.
const AUTO_NEST: u32 = 100;
/// Group of the household utility component.
const HOUSEHOLD_GROUP: u16 = 1;
/// Walking is not available beyond this distance, in km.
const MAX_WALK_DISTANCE: f64 = 5.0;
/// Biking is not available beyond this distance, in km.
const MAX_BIKE_DISTANCE: f64 = 20.0;
/// Minimum age to drive.
const DRIVING_AGE: u32 = 18;

const fn asc(mode: Mode) -> Option<usize> {
    match mode {
        Mode::Walk => Some(ASC_WALK),
        Mode::Bike => Some(ASC_BIKE),
        Mode::DriveAlone => None,
        Mode::SharedRide => Some(ASC_SHARED_RIDE),
        Mode::Transit => Some(ASC_TRANSIT),
    }
}

fn is_available(mode: Mode, household: &Household, person: &Person, distance: f64) -> bool {
    match mode {
        Mode::Walk => distance <= MAX_WALK_DISTANCE,
        Mode::Bike => distance <= MAX_BIKE_DISTANCE,
        Mode::DriveAlone => household.vehicles > 0 && person.age >= DRIVING_AGE,
        Mode::SharedRide | Mode::Transit => true,
    }
}

/// Registers the five modes of a tour between `origin` and `destination` as the alternatives
/// of the current occasion of `calculator`, in the order of [Mode::ALL].
///
/// `observed` is flagged as the chosen alternative.
pub fn build_occasion(
    calculator: &mut ChoiceProbabilityCalculator,
    context: &ModelContext<'_>,
    household: &Household,
    person: &Person,
    (origin, destination): (&Parcel, &Parcel),
    observed: Option<Mode>,
) -> Result<()> {
    let household_component =
        calculator.create_utility_component(ComponentKey::group(HOUSEHOLD_GROUP));
    calculator
        .utility_component_mut(household_component)?
        .add_utility_term(INCOME_AUTO, household.income / 10_000.0);
    let mut auto_position = 0;
    for (index, mode) in Mode::ALL.into_iter().enumerate() {
        let impedance = context.impedance.impedance(
            mode,
            PathType::Full,
            TimePeriod::AmPeak,
            origin,
            destination,
        );
        let available = is_available(mode, household, person, impedance.distance);
        let mut alternative =
            calculator.get_alternative(index, available, observed == Some(mode))?;
        alternative
            .set_payload(ChoicePayload::Mode(mode.code()))
            .add_utility_term(TIME, impedance.time)
            .add_utility_term(COST, impedance.cost);
        if let Some(id) = asc(mode) {
            alternative.add_utility_term(id, 1.0);
        }
        if matches!(mode, Mode::DriveAlone | Mode::SharedRide) {
            alternative
                .add_utility_component(household_component)
                .add_nested_alternative(AUTO_NEST, auto_position, NEST_AUTO)?;
            auto_position += 1;
        }
    }
    Ok(())
}

/// Log-sum of the tour mode choice between two parcels, or `None` if no mode is available.
///
/// Any other failure of the occasion is returned in the inner result.
pub fn mode_choice_logsum(
    calculator: &mut ChoiceProbabilityCalculator,
    context: &ModelContext<'_>,
    household: &Household,
    person: &Person,
    od: (&Parcel, &Parcel),
    sequence: u32,
) -> Result<Result<Option<f64>, OccasionFailure>> {
    calculator.start_occasion(OccasionKey::new(person.id, sequence));
    build_occasion(calculator, context, household, person, od, None)?;
    Ok(match calculator.logsum() {
        Ok(logsum) => Ok(Some(logsum)),
        Err(OccasionFailure::NoAvailableAlternatives) => Ok(None),
        Err(failure) => Err(failure),
    })
}

/// Mode of the tour to the usual work location.
#[derive(Clone, Debug)]
pub struct TourModeModel;

impl TourModeModel {
    /// Checks that the coefficients define a valid auto nest.
    pub fn new(coefficients: &CoefficientTable) -> Result<Self> {
        let theta = coefficients
            .get(NEST_AUTO)
            .ok_or_else(|| anyhow!("Model `{TOUR_MODE}`: missing auto nest coefficient"))?
            .value;
        if !(theta > 0.0 && theta <= 1.0) {
            bail!("Model `{TOUR_MODE}`: the auto nest coefficient must be in (0, 1], got {theta}");
        }
        Ok(TourModeModel)
    }
}

impl ChoiceModel for TourModeModel {
    fn name(&self) -> &'static str {
        TOUR_MODE
    }

    fn salt(&self) -> u32 {
        2
    }

    fn run(
        &self,
        context: &ModelContext<'_>,
        helper: &mut ChoiceModelHelper,
        household: &Household,
        person: &Person,
        choices: &mut PersonChoices,
    ) -> Result<ModelOutcome> {
        let Some(work_parcel) = choices.work_parcel else {
            return Ok(ModelOutcome::NotApplicable);
        };
        let estimated = context.is_estimated(TOUR_MODE);
        let observed = if context.estimation {
            let Some(code) = person.work_tour_mode else {
                return Ok(ModelOutcome::NotApplicable);
            };
            match Mode::from_code(code) {
                Some(mode) => Some(mode),
                None if estimated => {
                    return Ok(ModelOutcome::Invalid(OccasionFailure::NoChosenAlternative))
                }
                None => return Ok(ModelOutcome::NotApplicable),
            }
        } else {
            None
        };
        if context.estimation && !estimated {
            choices.work_tour_mode = observed;
            return Ok(ModelOutcome::Done);
        }
        let land_use = &context.population.land_use;
        let home = land_use
            .parcel_index(household.home_parcel)
            .ok_or_else(|| anyhow!("Unknown home parcel {}", household.home_parcel))?;
        let od = (land_use.parcel(home), land_use.parcel(work_parcel));
        let calculator = calculator_of(&mut helper.calculators, TOUR_MODE)?;
        calculator.start_occasion(OccasionKey::new(person.id, 0));
        build_occasion(calculator, context, household, person, od, observed)?;
        if estimated {
            return match calculator.write_observation() {
                Ok(observation) => {
                    helper.observations.push(ObservationRecord {
                        household_id: household.id,
                        person_id: person.id,
                        observation,
                    });
                    choices.work_tour_mode = observed;
                    Ok(ModelOutcome::Done)
                }
                Err(failure) => Ok(ModelOutcome::Invalid(failure)),
            };
        }
        match calculator.simulate_choice(&mut helper.stream) {
            Ok(chosen) => {
                choices.work_tour_mode = Some(Mode::ALL[chosen.index]);
                Ok(ModelOutcome::Done)
            }
            Err(failure) => Ok(ModelOutcome::Invalid(failure)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::*;

    #[test]
    fn tour_mode_probabilities_test() {
        let scenario = Scenario::new();
        let context = scenario.context();
        let mut helper = scenario.helper(&context);
        let household = &scenario.population.households[0];
        let person = &household.persons[0];
        let land_use = &scenario.population.land_use;
        // Work parcel 3 km from home: every mode is available.
        let od = (land_use.parcel(0), land_use.parcel(1));
        build_occasion(&mut helper.accessibility, &context, household, person, od, None).unwrap();
        let evaluation = helper.accessibility.evaluate().unwrap();
        assert!((evaluation.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(evaluation.probabilities.iter().all(|&p| p > 0.0));
        let auto_logsum = evaluation.nest_logsum(AUTO_NEST).unwrap();
        let auto_share = evaluation.probabilities[2] + evaluation.probabilities[3];
        let expected = (auto_logsum - evaluation.logsum).exp();
        assert!((auto_share - expected).abs() < 1e-9);
    }

    #[test]
    fn availability_test() {
        let scenario = Scenario::new();
        let context = scenario.context();
        let mut helper = scenario.helper(&context);
        let mut household = scenario.population.households[0].clone();
        household.vehicles = 0;
        let person = &household.persons[0];
        let land_use = &scenario.population.land_use;
        // 30 km: too far for walking and biking.
        let od = (land_use.parcel(0), land_use.parcel(2));
        build_occasion(&mut helper.accessibility, &context, &household, person, od, None).unwrap();
        let p = helper.accessibility.probabilities().unwrap();
        assert_eq!(p[0], 0.0);
        assert_eq!(p[1], 0.0);
        assert_eq!(p[2], 0.0);
        assert!((p[3] + p[4] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tour_mode_estimation_test() {
        let scenario = Scenario::estimating(TOUR_MODE);
        let context = scenario.context();
        let mut helper = scenario.helper(&context);
        let household = &scenario.population.households[0];
        let mut person = household.persons[0].clone();
        person.work_tour_mode = Some(Mode::Transit.code());
        let mut choices = PersonChoices {
            work_parcel: Some(1),
            work_tour_mode: None,
        };
        let model = TourModeModel::new(&scenario.coefficients[TOUR_MODE]).unwrap();
        let outcome = model
            .run(&context, &mut helper, household, &person, &mut choices)
            .unwrap();
        assert_eq!(outcome, ModelOutcome::Done);
        assert_eq!(choices.work_tour_mode, Some(Mode::Transit));
        assert_eq!(helper.observations.len(), 1);
        let observation = &helper.observations[0].observation;
        assert_eq!(observation.chosen_index, 4);
        assert_eq!(observation.alternatives.len(), 5);
        // Unknown mode code.
        person.work_tour_mode = Some(9);
        let outcome = model
            .run(&context, &mut helper, household, &person, &mut choices)
            .unwrap();
        assert_eq!(
            outcome,
            ModelOutcome::Invalid(OccasionFailure::NoChosenAlternative)
        );
    }

    #[test]
    fn mode_choice_logsum_test() {
        let scenario = Scenario::new();
        let context = scenario.context();
        let mut helper = scenario.helper(&context);
        let mut household = scenario.population.households[0].clone();
        let person = household.persons[0].clone();
        let land_use = &scenario.population.land_use;
        let od = (land_use.parcel(0), land_use.parcel(1));
        let logsum =
            mode_choice_logsum(&mut helper.accessibility, &context, &household, &person, od, 1)
                .unwrap()
                .unwrap()
                .unwrap();
        assert!(logsum.is_finite());
        // The income term of the auto modes is not finite.
        household.income = f64::NAN;
        let failure =
            mode_choice_logsum(&mut helper.accessibility, &context, &household, &person, od, 2)
                .unwrap()
                .unwrap_err();
        assert_eq!(failure.reason_code(), "non_finite_term");
    }

    #[test]
    fn missing_nest_coefficient_test() {
        let table = CoefficientTable::parse(TOUR_MODE, "no nest\nEND\n10 time F -0.05\n-1\n")
            .unwrap();
        assert!(TourModeModel::new(&table).is_err());
    }
}
