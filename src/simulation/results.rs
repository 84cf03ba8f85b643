// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Structs holding the results of a run.
use std::collections::BTreeMap;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::impedance::Mode;
use crate::models::PersonChoices;
use crate::population::{Household, LandUse, Person};
use crate::shadow_price::PassMeasure;

/// Reason why a person was marked invalid.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvalidEntity {
    /// Model where the failure occurred.
    pub model: String,
    /// Short reason code.
    pub reason: String,
    /// Description of the failure.
    pub detail: String,
}

/// Choices of a person in a pass.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PersonResult {
    pub household_id: u64,
    pub person_id: u64,
    /// Id of the usual work parcel.
    pub work_parcel: Option<u64>,
    /// Zone of the usual work parcel.
    pub work_zone: Option<u32>,
    /// Mode of the work tour.
    pub work_tour_mode: Option<Mode>,
    /// Failure that invalidated the person, if any. The models after the failing one were not
    /// run.
    pub invalid: Option<InvalidEntity>,
    /// Index of the work parcel in the land use.
    #[serde(skip)]
    pub(crate) work_parcel_index: Option<usize>,
}

impl PersonResult {
    pub fn new(
        household: &Household,
        person: &Person,
        choices: &PersonChoices,
        land_use: &LandUse,
        invalid: Option<InvalidEntity>,
    ) -> Self {
        let work = choices.work_parcel.map(|i| land_use.parcel(i));
        PersonResult {
            household_id: household.id,
            person_id: person.id,
            work_parcel: work.map(|p| p.id),
            work_zone: work.map(|p| p.zone_id),
            work_tour_mode: choices.work_tour_mode,
            invalid,
            work_parcel_index: choices.work_parcel,
        }
    }

    pub const fn is_invalid(&self) -> bool {
        self.invalid.is_some()
    }
}

/// Aggregate results of a pass, appended to `pass_results.json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PassResults {
    pub pass: u32,
    pub nb_households: usize,
    pub nb_persons: usize,
    pub nb_invalid: usize,
    /// Number of persons with a usual work location.
    pub nb_workers_located: usize,
    /// Number of work tours by mode.
    pub mode_counts: BTreeMap<String, usize>,
    /// Comparison of the simulated workers with the employment of the parcels.
    pub shadow_prices: Option<PassMeasure>,
    pub running_time: Duration,
}

impl PassResults {
    pub fn new(
        pass: u32,
        nb_households: usize,
        persons: &[PersonResult],
        shadow_prices: Option<PassMeasure>,
        running_time: Duration,
    ) -> Self {
        let mode_counts = persons
            .iter()
            .filter_map(|p| p.work_tour_mode)
            .counts_by(|mode| format!("{mode:?}"))
            .into_iter()
            .collect();
        PassResults {
            pass,
            nb_households,
            nb_persons: persons.len(),
            nb_invalid: persons.iter().filter(|p| p.is_invalid()).count(),
            nb_workers_located: persons.iter().filter(|p| p.work_parcel.is_some()).count(),
            mode_counts,
            shadow_prices,
            running_time,
        }
    }
}

/// Number of persons invalidated by a model for a reason.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvalidCount {
    pub model: String,
    pub reason: String,
    pub count: usize,
}

/// Summary of the invalid persons of a run, written to `invalid_summary.json`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct InvalidSummary {
    pub nb_persons: usize,
    pub nb_invalid: usize,
    /// Share of invalid persons.
    pub share: f64,
    /// Counts by model and reason, sorted by model and reason.
    pub counts: Vec<InvalidCount>,
}

impl InvalidSummary {
    pub fn from_results(persons: &[PersonResult]) -> Self {
        let counts: Vec<InvalidCount> = persons
            .iter()
            .filter_map(|p| p.invalid.as_ref())
            .counts_by(|invalid| (invalid.model.clone(), invalid.reason.clone()))
            .into_iter()
            .sorted()
            .map(|((model, reason), count)| InvalidCount {
                model,
                reason,
                count,
            })
            .collect();
        let nb_invalid = counts.iter().map(|c| c.count).sum();
        let share = if persons.is_empty() {
            0.0
        } else {
            nb_invalid as f64 / persons.len() as f64
        };
        InvalidSummary {
            nb_persons: persons.len(),
            nb_invalid,
            share,
            counts,
        }
    }
}

/// Running times of a pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassRunningTimes {
    /// Total running time of the pass.
    pub total: Duration,
    /// Running time of the models.
    pub models: Duration,
    /// Running time of the merge of the worker results.
    pub merging: Duration,
}

/// Summary of the running times of a run.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RunningTimes {
    /// Total running time of the run.
    pub total: Duration,
    /// Running time of input reading.
    pub input_reading: Duration,
    /// Total running time of the passes.
    pub total_passes: Duration,
    /// Total running time of the models.
    pub total_models: Duration,
    /// Total running time of the merges.
    pub total_merging: Duration,
    /// Running time per pass.
    pub per_pass: Duration,
    /// Running time of the models per pass.
    pub per_pass_models: Duration,
    /// Running time of output writing.
    pub output_writing: Duration,
}

impl RunningTimes {
    /// Updates the total running times with the running times of a pass.
    pub fn update(&mut self, pass_running_times: &PassRunningTimes) {
        self.total_passes += pass_running_times.total;
        self.total_models += pass_running_times.models;
        self.total_merging += pass_running_times.merging;
    }

    /// Computes the running times per pass.
    pub fn finish(&mut self, nb_passes: u32) {
        if nb_passes > 0 {
            self.per_pass = self.total_passes / nb_passes;
            self.per_pass_models = self.total_models / nb_passes;
        }
    }
}
