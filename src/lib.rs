// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Library for actsim: an activity-based travel-demand microsimulation.
//!
//! The choice engine (nested-logit calculator, alternative sampler, random streams) lives in
//! the `choice` crate. This crate holds the population, the models, the parallel passes over
//! the population and the shadow-price equilibration.
#![doc(html_no_source)]

pub mod estimation;
pub mod impedance;
pub mod io;
pub mod logging;
pub mod models;
pub mod parameters;
pub mod population;
pub mod progress_bar;
pub mod shadow_price;
pub mod simulation;

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::estimation::EstimationLog;
use crate::io::json::{append_json, read_json, write_json};
use crate::parameters::Parameters;
use crate::shadow_price::{EquilibriumState, ShadowPriceEquilibrator, ShadowPriceRecord};
use crate::simulation::results::{InvalidSummary, PassResults, RunningTimes};
use crate::simulation::{log_pass, record_time, PassOutput, Simulation};

// Dependencies only used in the bins.
use clap as _;

/// Run modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum RunMode {
    /// Records the observed choices of the estimated model.
    Estimation,
    /// Simulates the choices, with shadow-price passes.
    Application,
}

/// Summary of a run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub nb_passes: u32,
    pub invalid: InvalidSummary,
    /// `true` if the share of invalid persons does not exceed the tolerance.
    pub within_tolerance: bool,
    /// Final state of the shadow prices, in application mode.
    pub shadow_prices: Option<EquilibriumState>,
}

/// Runs the estimation mode: one pass recording the observations of the estimated model.
pub fn run_estimation(parameters: &Parameters) -> Result<RunSummary> {
    run(parameters, RunMode::Estimation)
}

/// Runs the application mode: passes simulating the choices until the shadow prices converge
/// or the maximum number of passes is reached.
pub fn run_application(parameters: &Parameters) -> Result<RunSummary> {
    run(parameters, RunMode::Application)
}

/// Reads the parameters, initializes logging in the output directory and runs.
///
/// This function takes as argument the path to the `parameters.json` file.
pub fn run_from_path(mode: RunMode, path: &Path) -> Result<RunSummary> {
    let parameters = io::json::get_parameters_from_json(path)?;
    create_output_directory(&parameters.output_directory)?;
    logging::initialize_logging(&parameters.output_directory, None::<std::io::Sink>)?;
    run(&parameters, mode)
}

fn create_output_directory(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory `{dir:?}`"))
}

/// Runs in the given mode and writes the results in the output directory.
///
/// Logging is not initialized.
pub fn run(parameters: &Parameters, mode: RunMode) -> Result<RunSummary> {
    parameters.validate()?;
    let now = Instant::now();
    let output_dir = parameters.output_directory.as_path();
    create_output_directory(output_dir)?;
    // Pass results are appended: the file of a previous run must be removed.
    let pass_results = output_dir.join("pass_results.json");
    if pass_results.is_file() {
        warn!("Removing already existing file `{pass_results:?}`");
        std::fs::remove_file(&pass_results)
            .with_context(|| format!("Failed to remove file: `{pass_results:?}`"))?;
    }

    let mut running_times = RunningTimes::default();
    let ((simulation, initial_prices), input_time) = record_time(|| {
        let simulation = Simulation::from_parameters(parameters.clone())?;
        let initial_prices: Option<Vec<ShadowPriceRecord>> = parameters
            .input_files
            .shadow_prices
            .as_deref()
            .map(read_json)
            .transpose()?;
        Ok((simulation, initial_prices))
    })?;
    running_times.input_reading = input_time;
    let mut equilibrator = ShadowPriceEquilibrator::new(
        parameters.shadow_pricing.clone(),
        simulation.location_controls(),
        initial_prices.as_deref(),
    )?;

    let (last_output, nb_passes) = match mode {
        RunMode::Estimation => {
            info!("===== Estimation pass =====");
            let mut output = simulation.run_pass(1, equilibrator.offsets(), true)?;
            log_pass(&output);
            save_pass(&output, 1, None, output_dir)?;
            running_times.update(&output.running_times);
            let observations = std::mem::take(&mut output.observations);
            let log = EstimationLog::new(observations, output.rejected);
            log.save(output_dir)?;
            (output, 1)
        }
        RunMode::Application => {
            let mut pass = 0;
            loop {
                pass += 1;
                info!("===== Pass {pass} =====");
                let output = simulation.run_pass(pass, equilibrator.offsets(), false)?;
                log_pass(&output);
                let measure = equilibrator.adjust(&output.predictions)?;
                info!(
                    "Shadow prices: {} parcels outside tolerance, RMSE {:.3}",
                    measure.nb_outside_tolerance, measure.rmse
                );
                save_pass(&output, pass, Some(measure), output_dir)?;
                running_times.update(&output.running_times);
                if equilibrator.is_finished() {
                    break (output, pass);
                }
            }
        }
    };

    let now_writing = Instant::now();
    info!("Saving results");
    write_json(&last_output.persons, output_dir, "person_results")?;
    let invalid = InvalidSummary::from_results(&last_output.persons);
    write_json(&invalid, output_dir, "invalid_summary")?;
    let shadow_prices = match mode {
        RunMode::Estimation => None,
        RunMode::Application => {
            write_json(equilibrator.records(), output_dir, "shadow_prices")?;
            Some(equilibrator.state())
        }
    };
    for count in invalid.counts.iter() {
        info!(
            "Model `{}`: {} invalid persons ({})",
            count.model, count.count, count.reason
        );
    }
    let within_tolerance = invalid.share <= parameters.invalid_tolerance;
    if !within_tolerance {
        warn!(
            "{:.2}% of the persons are invalid (tolerance: {:.2}%)",
            100.0 * invalid.share,
            100.0 * parameters.invalid_tolerance
        );
    }
    running_times.output_writing = now_writing.elapsed();
    running_times.total = now.elapsed();
    running_times.finish(nb_passes);
    write_json(&running_times, output_dir, "running_times")?;
    info!("Done");
    Ok(RunSummary {
        mode,
        nb_passes,
        invalid,
        within_tolerance,
        shadow_prices,
    })
}

fn save_pass(
    output: &PassOutput,
    pass: u32,
    measure: Option<shadow_price::PassMeasure>,
    output_dir: &Path,
) -> Result<()> {
    let results = PassResults::new(
        pass,
        output.nb_households,
        &output.persons,
        measure,
        output.running_times.total,
    );
    append_json(results, output_dir, "pass_results")
}
