// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Estimation data: the observations written by the workers, merged in a stable order.
use std::path::Path;

use anyhow::Result;
use choice::EstimationSummary;
use log::info;

use crate::io::json::write_json;
use crate::models::ObservationRecord;

/// Observations of a run, ordered by household, person and occasion.
///
/// The order and the summary do not depend on how the population was partitioned.
#[derive(Clone, Debug, Default)]
pub struct EstimationLog {
    records: Vec<ObservationRecord>,
    summary: EstimationSummary,
}

impl EstimationLog {
    /// Merges the observations of the workers.
    ///
    /// `rejected` is the number of occasions rejected by the calculators.
    pub fn new(mut records: Vec<ObservationRecord>, rejected: u64) -> Self {
        records.sort_by(|a, b| {
            (a.household_id, a.person_id, &a.observation.model, a.observation.key).cmp(&(
                b.household_id,
                b.person_id,
                &b.observation.model,
                b.observation.key,
            ))
        });
        // The summary is rebuilt in the final order so that the floating-point sums are
        // identical for any partitioning.
        let mut summary = EstimationSummary::default();
        for record in records.iter() {
            summary.record_accepted(&record.observation);
        }
        for _ in 0..rejected {
            summary.record_rejected();
        }
        EstimationLog { records, summary }
    }

    pub fn records(&self) -> &[ObservationRecord] {
        &self.records
    }

    pub const fn summary(&self) -> &EstimationSummary {
        &self.summary
    }

    /// Writes `observations.json` and `estimation_summary.json` in the output directory.
    pub fn save(&self, output_dir: &Path) -> Result<()> {
        info!(
            "Writing {} observations ({} rejected)",
            self.summary.accepted, self.summary.rejected
        );
        write_json(&self.records, output_dir, "observations")?;
        write_json(&self.summary, output_dir, "estimation_summary")?;
        Ok(())
    }
}
