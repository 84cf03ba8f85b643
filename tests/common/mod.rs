// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Scenario files shared by the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use actsim::io::json::write_json;
use actsim::parameters::Parameters;
use actsim::population::{Household, Parcel, Person};
use serde_json::{json, Value};

pub const WORK_LOCATION_COEFFICIENTS: &str = "Usual work location
END
   1 sampling_adjustment  C   1.0000
   2 distance_km          F  -0.2000
   3 mode_logsum          F   0.5000
   4 shadow_price         C   1.0000
  10 Gamm_employment      T   0.0000
  11 LSM_size             T   1.0000
-1
";

pub const TOUR_MODE_COEFFICIENTS: &str = "Work tour mode
END
   1 asc_walk             F   0.5000
   2 asc_bike             F  -1.0000
   4 asc_shared_ride      F  -1.5000
   5 asc_transit          F  -0.8000
  10 time                 F  -0.0500
  11 cost                 F  -0.3000
  20 income_auto          F   0.0500
  30 Nest_auto            T   0.7000
-1
";

pub fn parcel(id: u64, zone_id: u32, x: f64, y: f64, employment: f64) -> Parcel {
    Parcel {
        id,
        zone_id,
        x,
        y,
        employment,
    }
}

/// A `side` x `side` grid of parcels, 500 meters apart, with uneven employment.
pub fn grid_parcels(side: u64) -> Vec<Parcel> {
    (0..side * side)
        .map(|i| {
            parcel(
                i + 1,
                (i / side) as u32 + 1,
                500.0 * (i % side) as f64,
                500.0 * (i / side) as f64,
                10.0 * ((i * 37) % 11) as f64,
            )
        })
        .collect()
}

/// Households living on the grid, with one to three persons of whom at most two are workers.
///
/// Workers report a usual work parcel with jobs and a work tour mode.
pub fn grid_households(nb_households: u64, parcels: &[Parcel]) -> Vec<Household> {
    let job_parcels: Vec<u64> = parcels
        .iter()
        .filter(|p| p.employment > 0.0)
        .map(|p| p.id)
        .collect();
    let mode_codes = [1, 2, 3, 4, 6];
    (1..=nb_households)
        .map(|h| {
            let nb_persons = 1 + h % 3;
            let persons = (0..nb_persons)
                .map(|k| {
                    let id = 10 * h + k;
                    let is_worker = k < 2;
                    Person {
                        id,
                        age: 20 + ((h + 7 * k) % 50) as u32,
                        is_worker,
                        usual_work_parcel: is_worker
                            .then(|| job_parcels[(id as usize * 13) % job_parcels.len()]),
                        work_tour_mode: is_worker.then(|| mode_codes[((h + k) as usize) % 5]),
                    }
                })
                .collect();
            Household {
                id: h,
                home_parcel: parcels[((h * 7) as usize) % parcels.len()].id,
                income: 20_000.0 + 5_000.0 * (h % 7) as f64,
                vehicles: (h % 3) as u32,
                persons,
            }
        })
        .collect()
}

/// Writes the input files in `dir` and returns the parameters, completed with `extra`.
pub fn write_scenario(
    dir: &Path,
    parcels: &[Parcel],
    households: &[Household],
    extra: Value,
) -> Parameters {
    write_json(parcels, dir, "parcels").unwrap();
    write_json(households, dir, "households").unwrap();
    fs::write(dir.join("work_location.f12"), WORK_LOCATION_COEFFICIENTS).unwrap();
    fs::write(dir.join("tour_mode.f12"), TOUR_MODE_COEFFICIENTS).unwrap();
    let mut value = json!({
        "input_files": {
            "households": dir.join("households.json"),
            "parcels": dir.join("parcels.json"),
            "coefficients": {
                "work_location": dir.join("work_location.f12"),
                "tour_mode": dir.join("tour_mode.f12")
            }
        },
        "output_directory": dir.join("output"),
        "random_seed": 1234,
        "samplers": {
            "work_location": {
                "sample_size": 10,
                "strata": [{"max_distance": 1.5, "share": 0.4}]
            }
        }
    });
    if let (Some(map), Value::Object(extra)) = (value.as_object_mut(), extra) {
        map.extend(extra);
    }
    let parameters: Parameters = serde_json::from_value(value).unwrap();
    parameters.validate().unwrap();
    parameters
}
