// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

mod common;

use actsim::io::json::read_json;
use actsim::parameters::Parameters;
use actsim::population::{Household, Person};
use actsim::simulation::results::{InvalidSummary, PersonResult};
use serde_json::json;

const ISOLATED_PARCEL: u64 = 1000;

/// Grid scenario with a household living on a remote parcel, farther than the maximum sampling
/// distance from every job.
fn scenario(dir: &std::path::Path) -> Parameters {
    let mut parcels = common::grid_parcels(6);
    parcels.push(common::parcel(ISOLATED_PARCEL, 99, 50_000.0, 50_000.0, 0.0));
    let mut households = common::grid_households(30, &parcels[..36]);
    households.push(Household {
        id: 500,
        home_parcel: ISOLATED_PARCEL,
        income: 40_000.0,
        vehicles: 1,
        persons: vec![
            Person {
                id: 5000,
                age: 35,
                is_worker: true,
                usual_work_parcel: Some(1),
                work_tour_mode: Some(3),
            },
            Person {
                id: 5001,
                age: 33,
                is_worker: true,
                usual_work_parcel: Some(2),
                work_tour_mode: Some(3),
            },
            Person {
                id: 5002,
                age: 8,
                is_worker: false,
                usual_work_parcel: None,
                work_tour_mode: None,
            },
        ],
    });
    common::write_scenario(
        dir,
        &parcels,
        &households,
        json!({
            "samplers": {
                "work_location": {
                    "sample_size": 5,
                    "max_distance": 4.0
                }
            }
        }),
    )
}

#[test]
fn invalid_persons_are_reported_test() {
    let dir = tempfile::tempdir().unwrap();
    let mut parameters = scenario(dir.path());
    parameters.invalid_tolerance = 0.0;
    let summary = actsim::run_application(&parameters).unwrap();
    assert!(!summary.within_tolerance);

    // 10 households of each size on the grid, and the remote household.
    let nb_persons = 10 * (1 + 2 + 3) + 3;
    assert_eq!(summary.invalid.nb_persons, nb_persons);
    assert_eq!(summary.invalid.nb_invalid, 2);
    assert_eq!(summary.invalid.counts.len(), 1);
    let count = &summary.invalid.counts[0];
    assert_eq!(count.model, "work_location");
    assert_eq!(count.reason, "no_available_alternatives");
    assert_eq!(count.count, 2);

    let written: InvalidSummary =
        read_json(&parameters.output_directory.join("invalid_summary.json")).unwrap();
    assert_eq!(written, summary.invalid);

    // The run goes on for the other persons.
    let persons: Vec<PersonResult> =
        read_json(&parameters.output_directory.join("person_results.json")).unwrap();
    assert_eq!(persons.len(), nb_persons);
    for person in persons.iter() {
        if person.household_id == 500 {
            assert_eq!(person.invalid.is_some(), person.person_id != 5002);
            assert!(person.work_parcel.is_none());
            assert!(person.work_tour_mode.is_none());
        } else {
            assert!(person.invalid.is_none());
        }
    }
}

#[test]
fn invalid_tolerance_test() {
    let dir = tempfile::tempdir().unwrap();
    let mut parameters = scenario(dir.path());
    parameters.invalid_tolerance = 0.5;
    let summary = actsim::run_application(&parameters).unwrap();
    assert_eq!(summary.invalid.nb_invalid, 2);
    assert!(summary.within_tolerance);
}

#[test]
fn invalid_parameters_fail_the_run_test() {
    let dir = tempfile::tempdir().unwrap();
    let mut parameters = scenario(dir.path());
    parameters.household_sampling.rate_one_in = 0;
    assert!(actsim::run_application(&parameters).is_err());
    assert!(actsim::run_estimation(&parameters).is_err());

    let mut parameters = scenario(dir.path());
    parameters.household_sampling.start_with = 0;
    assert!(actsim::run_application(&parameters).is_err());
    // Nothing is written before the parameters are checked.
    assert!(!parameters.output_directory.join("person_results.json").exists());
}
