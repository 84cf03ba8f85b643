// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Everything related to simulation passes over the population.
pub mod results;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use choice::CoefficientTable;
use log::{debug, info, warn};
use rayon::prelude::*;

use self::results::{InvalidEntity, PassRunningTimes, PersonResult};
use crate::impedance::{DistanceImpedance, ImpedanceProvider};
use crate::models::{
    self, ChoiceModel, ChoiceModelHelper, CoefficientSets, ModelContext, ModelOutcome,
    ObservationRecord, PersonChoices,
};
use crate::parameters::Parameters;
use crate::population::{Household, Person, Population};
use crate::progress_bar::RunProgressBar;
use crate::shadow_price::LocationControl;

/// A population to be simulated, with everything the models need.
///
/// A simulation is composed of the following items:
///
/// - The [Population] and its land use.
/// - A provider of network impedances.
/// - The coefficient tables and the [ChoiceModel]s, run in order for each person.
/// - A [Parameters] instance.
pub struct Simulation {
    parameters: Parameters,
    population: Population,
    impedance: Box<dyn ImpedanceProvider>,
    coefficients: CoefficientSets,
    models: Vec<Box<dyn ChoiceModel>>,
    pool: rayon::ThreadPool,
}

/// Results of a simulation pass, merged over the workers.
#[derive(Clone, Debug, Default)]
pub struct PassOutput {
    /// Number of simulated households.
    pub nb_households: usize,
    /// Results of the persons, by household id and person id.
    pub persons: Vec<PersonResult>,
    /// Expanded number of workers by parcel index.
    pub predictions: Vec<f64>,
    /// Observations written in estimation mode, in no particular order.
    pub observations: Vec<ObservationRecord>,
    /// Number of occasions rejected by the estimated model.
    pub rejected: u64,
    pub running_times: PassRunningTimes,
}

/// Output of one worker.
#[derive(Debug, Default)]
struct PartitionOutput {
    persons: Vec<PersonResult>,
    observations: Vec<ObservationRecord>,
    rejected: u64,
}

impl Simulation {
    /// Creates a new Simulation.
    ///
    /// Returns an error if the models are inconsistent with the coefficients or if the thread
    /// pool cannot be built.
    pub fn new(
        parameters: Parameters,
        population: Population,
        impedance: Box<dyn ImpedanceProvider>,
        coefficients: CoefficientSets,
    ) -> Result<Self> {
        parameters.validate()?;
        let models = models::reference_models(&parameters, &coefficients)?;
        // A local pool, so that several simulations can run in the same process.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parameters.nb_threads)
            .build()
            .context("Failed to build the thread pool")?;
        Ok(Simulation {
            parameters,
            population,
            impedance,
            coefficients,
            models,
            pool,
        })
    }

    /// Reads the population and the coefficient files given in the parameters and creates the
    /// simulation, with the straight-line impedance.
    pub fn from_parameters(parameters: Parameters) -> Result<Self> {
        let population = Population::from_files(&parameters.input_files)?;
        let mut coefficients = CoefficientSets::new();
        for (model, path) in parameters.input_files.coefficients.iter() {
            let table = CoefficientTable::from_file(model, path)?;
            debug!(
                "Model `{model}`: {} coefficients ({})",
                table.len(),
                table.title()
            );
            coefficients.insert(model.clone(), Arc::new(table));
        }
        let impedance = Box::new(DistanceImpedance::new(parameters.impedance.clone()));
        Self::new(parameters, population, impedance, coefficients)
    }

    /// Return a reference to the [Parameters] of the simulation.
    pub const fn get_parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Return a reference to the [Population] of the simulation.
    pub const fn get_population(&self) -> &Population {
        &self.population
    }

    /// Control totals of the shadow prices: the employment of each parcel.
    pub fn location_controls(&self) -> Vec<LocationControl> {
        self.population
            .land_use
            .parcels()
            .iter()
            .map(|p| LocationControl {
                location_id: p.id,
                zone_id: p.zone_id,
                control: p.employment,
            })
            .collect()
    }

    /// Runs all the models for the selected households, with the given shadow price of each
    /// parcel.
    ///
    /// The households are split in partitions processed in parallel. Each partition owns its
    /// calculators and random stream, so the results do not depend on the partitioning.
    pub fn run_pass(&self, pass: u32, shadow_prices: &[f64], estimation: bool) -> Result<PassOutput> {
        let now = Instant::now();
        let sampling = &self.parameters.household_sampling;
        let households: Vec<&Household> = self
            .population
            .households
            .iter()
            .filter(|h| sampling.includes(h.id))
            .collect();
        let nb_partitions = match self.parameters.nb_partitions {
            0 => self.pool.current_num_threads(),
            n => n,
        };
        let chunk_size = households.len().div_ceil(nb_partitions.max(1)).max(1);
        debug!(
            "Pass {pass}: {} households in partitions of {chunk_size}",
            households.len()
        );
        let context = ModelContext {
            parameters: &self.parameters,
            population: &self.population,
            impedance: self.impedance.as_ref(),
            shadow_prices,
            estimation,
        };
        let bp = RunProgressBar::new(households.len());
        bp.set_message(format!("Pass {pass}"));
        let (partitions, models_time) = record_time(|| {
            self.pool.install(|| {
                households
                    .par_chunks(chunk_size)
                    .panic_fuse()
                    .map(|chunk| self.run_partition(&context, chunk, &bp))
                    .collect::<Result<Vec<_>>>()
            })
        })?;
        bp.finish();

        let merge_start = Instant::now();
        let mut output = PassOutput {
            nb_households: households.len(),
            predictions: vec![0.0; self.population.land_use.len()],
            ..Default::default()
        };
        for partition in partitions {
            output.persons.extend(partition.persons);
            output.observations.extend(partition.observations);
            output.rejected += partition.rejected;
        }
        output
            .persons
            .sort_unstable_by_key(|p| (p.household_id, p.person_id));
        let expansion = sampling.expansion_factor();
        for person in output.persons.iter() {
            if let Some(index) = person.work_parcel_index {
                output.predictions[index] += expansion;
            }
        }
        output.running_times = PassRunningTimes {
            total: now.elapsed(),
            models: models_time,
            merging: merge_start.elapsed(),
        };
        Ok(output)
    }

    fn run_partition(
        &self,
        context: &ModelContext<'_>,
        households: &[&Household],
        bp: &RunProgressBar,
    ) -> Result<PartitionOutput> {
        let mut helper = ChoiceModelHelper::new(
            context,
            &self.models,
            &self.coefficients,
            self.parameters.random_seed,
        )?;
        let mut persons = Vec::with_capacity(households.len());
        for household in households {
            for person in household.persons.iter() {
                persons.push(self.run_person(context, &mut helper, household, person)?);
            }
            bp.inc();
        }
        let rejected = helper
            .calculators
            .values()
            .filter(|c| c.is_estimation())
            .map(|c| c.summary().rejected)
            .sum();
        Ok(PartitionOutput {
            persons,
            observations: helper.take_observations(),
            rejected,
        })
    }

    /// Runs the models of a person, in order.
    ///
    /// After a malformed occasion, the person is invalid and the next models are skipped.
    fn run_person(
        &self,
        context: &ModelContext<'_>,
        helper: &mut ChoiceModelHelper,
        household: &Household,
        person: &Person,
    ) -> Result<PersonResult> {
        let mut choices = PersonChoices::default();
        let mut invalid = None;
        for model in self.models.iter() {
            helper.stream.reset(person.id, model.salt());
            let outcome = model
                .run(context, helper, household, person, &mut choices)
                .with_context(|| {
                    format!("Model `{}` failed for person {}", model.name(), person.id)
                })?;
            if let ModelOutcome::Invalid(failure) = outcome {
                warn!(
                    "model={} entity={} reason={}: {failure}",
                    model.name(),
                    person.id,
                    failure.reason_code()
                );
                invalid = Some(InvalidEntity {
                    model: model.name().to_owned(),
                    reason: failure.reason_code().to_owned(),
                    detail: failure.to_string(),
                });
                break;
            }
        }
        Ok(PersonResult::new(
            household,
            person,
            &choices,
            &self.population.land_use,
            invalid,
        ))
    }
}

/// Logs the aggregate results of a pass.
pub fn log_pass(output: &PassOutput) {
    let nb_invalid = output.persons.iter().filter(|p| p.is_invalid()).count();
    info!(
        "{} households, {} persons, {} invalid ({:.1?})",
        output.nb_households,
        output.persons.len(),
        nb_invalid,
        output.running_times.total
    );
}

pub(crate) fn record_time<T>(func: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
    let now = Instant::now();
    let result = func()?;
    Ok((result, now.elapsed()))
}
