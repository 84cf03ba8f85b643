// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Usual work location: choice among a sample of parcels, weighted by employment.
use anyhow::{anyhow, Result};
use choice::{AlternativeSampler, ChoicePayload, OccasionFailure, OccasionKey, SamplerSettings};

use super::tour_mode::mode_choice_logsum;
use super::{
    calculator_of, ChoiceModel, ChoiceModelHelper, ModelContext, ModelOutcome, ObservationRecord,
    PersonChoices, WORK_LOCATION,
};
use crate::impedance::{Mode, PathType, TimePeriod};
use crate::population::{Household, Person};

/// Sampling correction, with a coefficient fixed to 1.
pub const SAMPLING_ADJUSTMENT: usize = 1;
/// Distance from home, in km.
pub const DISTANCE: usize = 2;
/// Log-sum of the work tour mode choice.
pub const MODE_LOGSUM: usize = 3;
/// Shadow price of the parcel, with a coefficient fixed to 1.
pub const SHADOW_PRICE: usize = 4;
/// Employment of the parcel, as size variable.
pub const EMPLOYMENT_SIZE: usize = 10;

/// Usual work location of the workers.
#[derive(Clone, Debug)]
pub struct WorkLocationModel {
    sampler: AlternativeSampler,
}

impl WorkLocationModel {
    pub fn new(settings: SamplerSettings) -> Result<Self> {
        Ok(WorkLocationModel {
            sampler: AlternativeSampler::new(settings)?,
        })
    }
}

impl ChoiceModel for WorkLocationModel {
    fn name(&self) -> &'static str {
        WORK_LOCATION
    }

    fn salt(&self) -> u32 {
        1
    }

    fn run(
        &self,
        context: &ModelContext<'_>,
        helper: &mut ChoiceModelHelper,
        household: &Household,
        person: &Person,
        choices: &mut PersonChoices,
    ) -> Result<ModelOutcome> {
        if !person.is_worker {
            return Ok(ModelOutcome::NotApplicable);
        }
        let land_use = &context.population.land_use;
        let estimated = context.is_estimated(WORK_LOCATION);
        let observed = if context.estimation {
            let Some(parcel_id) = person.usual_work_parcel else {
                return Ok(ModelOutcome::NotApplicable);
            };
            match land_use.parcel_index(parcel_id) {
                Some(index) => Some(index),
                None if estimated => {
                    return Ok(ModelOutcome::Invalid(OccasionFailure::NoChosenAlternative))
                }
                None => return Ok(ModelOutcome::NotApplicable),
            }
        } else {
            None
        };
        if context.estimation && !estimated {
            choices.work_parcel = observed;
            return Ok(ModelOutcome::Done);
        }

        let home = land_use
            .parcel_index(household.home_parcel)
            .map(|i| land_use.parcel(i))
            .ok_or_else(|| anyhow!("Unknown home parcel {}", household.home_parcel))?;
        let distance = |i: usize| {
            context
                .impedance
                .impedance(
                    Mode::DriveAlone,
                    PathType::Full,
                    TimePeriod::OffPeak,
                    home,
                    land_use.parcel(i),
                )
                .distance
        };
        let sample = self.sampler.sample(
            land_use.len(),
            |i| land_use.parcel(i).employment,
            distance,
            observed,
            &helper.stream,
        );

        // Accessibility of each sampled parcel, computed before the occasion is built.
        let mut logsums = Vec::with_capacity(sample.len());
        for (sequence, item) in sample.items.iter().enumerate() {
            match mode_choice_logsum(
                &mut helper.accessibility,
                context,
                household,
                person,
                (home, land_use.parcel(item.index)),
                sequence as u32 + 1,
            )? {
                Ok(logsum) => logsums.push(logsum),
                Err(failure) => return Ok(ModelOutcome::Invalid(failure)),
            }
        }

        let calculator = calculator_of(&mut helper.calculators, WORK_LOCATION)?;
        calculator.start_occasion(OccasionKey::new(person.id, 0));
        sample.register_alternatives(calculator, SAMPLING_ADJUSTMENT, |item, alternative| {
            let parcel = land_use.parcel(item.index);
            alternative
                .set_payload(ChoicePayload::Parcel {
                    parcel_id: parcel.id,
                    zone_id: parcel.zone_id,
                })
                .add_utility_term(DISTANCE, distance(item.index))
                .add_utility_term(SHADOW_PRICE, context.shadow_prices[item.index])
                .add_utility_term(EMPLOYMENT_SIZE, parcel.employment);
            // Parcels without any available mode get no accessibility term.
            if let Some(logsum) = logsums[alternative.index()] {
                alternative.add_utility_term(MODE_LOGSUM, logsum);
            }
            Ok(())
        })?;

        if estimated {
            return match calculator.write_observation() {
                Ok(observation) => {
                    helper.observations.push(ObservationRecord {
                        household_id: household.id,
                        person_id: person.id,
                        observation,
                    });
                    choices.work_parcel = observed;
                    Ok(ModelOutcome::Done)
                }
                Err(failure) => Ok(ModelOutcome::Invalid(failure)),
            };
        }
        match calculator.simulate_choice(&mut helper.stream) {
            Ok(chosen) => {
                choices.work_parcel = Some(sample.items[chosen.index].index);
                Ok(ModelOutcome::Done)
            }
            Err(failure) => Ok(ModelOutcome::Invalid(failure)),
        }
    }
}
