// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Parameters of a run.
use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use choice::SamplerSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::impedance::DistanceImpedanceParameters;
use crate::models::{TOUR_MODE, WORK_LOCATION};
use crate::shadow_price::ShadowPricingParameters;

const fn default_rate() -> u64 {
    1
}

const fn default_invalid_tolerance() -> f64 {
    0.01
}

/// Paths to the input files.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct InputFiles {
    /// Path to the JSON file with the households and their persons.
    pub households: PathBuf,
    /// Path to the JSON file with the parcels.
    pub parcels: PathBuf,
    /// Path to the coefficient file of each model, by model name.
    pub coefficients: BTreeMap<String, PathBuf>,
    /// Path to a `shadow_prices.json` file of a previous run, used as initial shadow prices.
    #[serde(default)]
    pub shadow_prices: Option<PathBuf>,
}

/// Selection of one household out of `rate_one_in`.
///
/// A household is simulated if `id % rate_one_in == start_with - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HouseholdSampling {
    #[serde(default = "default_rate")]
    pub rate_one_in: u64,
    #[serde(default = "default_rate")]
    pub start_with: u64,
}

impl Default for HouseholdSampling {
    fn default() -> Self {
        HouseholdSampling {
            rate_one_in: 1,
            start_with: 1,
        }
    }
}

impl HouseholdSampling {
    /// Returns `true` if the household with the given id is selected.
    pub const fn includes(&self, household_id: u64) -> bool {
        household_id % self.rate_one_in == self.start_with - 1
    }

    /// Number of real households represented by a selected household.
    pub const fn expansion_factor(&self) -> f64 {
        self.rate_one_in as f64
    }
}

/// Set of parameters of a run.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(title = "Parameters")]
pub struct Parameters {
    /// Paths to the input files.
    pub input_files: InputFiles,
    /// Directory where the output files are written.
    pub output_directory: PathBuf,
    /// Base seed of the random streams.
    #[serde(default)]
    pub random_seed: u64,
    /// Number of threads used to run the models. If 0, rayon chooses.
    #[serde(default)]
    pub nb_threads: usize,
    /// Number of partitions of the households. If 0, one partition per thread.
    ///
    /// The simulated choices do not depend on the partitioning.
    #[serde(default)]
    pub nb_partitions: usize,
    #[serde(default)]
    pub household_sampling: HouseholdSampling,
    /// Name of the model whose observations are recorded in estimation mode.
    #[serde(default)]
    pub estimation_model: Option<String>,
    /// Settings of the sampler of alternatives, by model name.
    #[serde(default)]
    pub samplers: BTreeMap<String, SamplerSettings>,
    #[serde(default)]
    pub shadow_pricing: ShadowPricingParameters,
    #[serde(default)]
    pub impedance: DistanceImpedanceParameters,
    /// Maximum share of invalid persons for the run to succeed.
    #[serde(default = "default_invalid_tolerance")]
    pub invalid_tolerance: f64,
}

impl Parameters {
    /// Checks that the parameters are consistent.
    pub fn validate(&self) -> Result<()> {
        let sampling = &self.household_sampling;
        if sampling.rate_one_in == 0 {
            bail!("The household sampling rate must be positive");
        }
        if !(1..=sampling.rate_one_in).contains(&sampling.start_with) {
            bail!(
                "The household sampling start must be between 1 and {}, got {}",
                sampling.rate_one_in,
                sampling.start_with
            );
        }
        if !(0.0..=1.0).contains(&self.invalid_tolerance) {
            bail!(
                "The invalid tolerance must be between 0 and 1, got {}",
                self.invalid_tolerance
            );
        }
        for model in [WORK_LOCATION, TOUR_MODE] {
            if !self.input_files.coefficients.contains_key(model) {
                bail!("Missing coefficient file for model `{model}`");
            }
        }
        if let Some(model) = &self.estimation_model {
            if !self.input_files.coefficients.contains_key(model) {
                bail!("Unknown estimation model `{model}`");
            }
        }
        self.sampler_settings(WORK_LOCATION)?;
        for (model, settings) in self.samplers.iter() {
            settings
                .validate()
                .with_context(|| format!("Invalid sampler settings for model `{model}`"))?;
        }
        self.shadow_pricing.validate()?;
        self.impedance.validate()?;
        Ok(())
    }

    /// Returns the sampler settings of a model.
    pub fn sampler_settings(&self, model: &str) -> Result<&SamplerSettings> {
        self.samplers
            .get(model)
            .ok_or_else(|| anyhow!("Missing sampler settings for model `{model}`"))
    }
}
