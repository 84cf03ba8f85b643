// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Small scenario shared by the unit tests of the models.
use std::sync::Arc;

use choice::CoefficientTable;

use super::{ChoiceModelHelper, CoefficientSets, ModelContext, TOUR_MODE, WORK_LOCATION};
use crate::impedance::DistanceImpedance;
use crate::parameters::Parameters;
use crate::population::{Household, LandUse, Parcel, Person, Population};

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

pub struct Scenario {
    pub parameters: Parameters,
    pub population: Population,
    pub coefficients: CoefficientSets,
    pub impedance: DistanceImpedance,
    pub shadow_prices: Vec<f64>,
}

fn parcel(id: u64, zone_id: u32, x: f64, y: f64, employment: f64) -> Parcel {
    Parcel {
        id,
        zone_id,
        x,
        y,
        employment,
    }
}

impl Scenario {
    /// Home parcel 10 at the origin, without jobs; parcel 11 at 3 km; parcel 12 at 30 km (beyond
    /// the maximum sampling distance); parcel 13 at 8 km, in zone 2.
    pub fn new() -> Self {
        let parameters: Parameters = serde_json::from_str(
            r#"{
                "input_files": {
                    "households": "households.json",
                    "parcels": "parcels.json",
                    "coefficients": {
                        "work_location": "work_location.f12",
                        "tour_mode": "tour_mode.f12"
                    }
                },
                "output_directory": "output",
                "samplers": {
                    "work_location": {"sample_size": 1, "max_distance": 25.0}
                }
            }"#,
        )
        .unwrap();
        let land_use = LandUse::new(vec![
            parcel(10, 1, 0.0, 0.0, 0.0),
            parcel(11, 1, 3000.0, 0.0, 50.0),
            parcel(12, 1, 30000.0, 0.0, 100.0),
            parcel(13, 2, 0.0, 8000.0, 200.0),
        ])
        .unwrap();
        let household = Household {
            id: 1,
            home_parcel: 10,
            income: 50_000.0,
            vehicles: 1,
            persons: vec![Person {
                id: 1,
                age: 40,
                is_worker: true,
                usual_work_parcel: Some(11),
                work_tour_mode: Some(3),
            }],
        };
        let population = Population::new(vec![household], land_use).unwrap();
        let mut coefficients = CoefficientSets::new();
        coefficients.insert(
            WORK_LOCATION.to_owned(),
            Arc::new(CoefficientTable::parse(WORK_LOCATION, WORK_LOCATION_COEFFICIENTS).unwrap()),
        );
        coefficients.insert(
            TOUR_MODE.to_owned(),
            Arc::new(CoefficientTable::parse(TOUR_MODE, TOUR_MODE_COEFFICIENTS).unwrap()),
        );
        let shadow_prices = vec![0.0; population.land_use.len()];
        Scenario {
            parameters,
            population,
            coefficients,
            impedance: DistanceImpedance::default(),
            shadow_prices,
        }
    }

    /// Scenario in estimation mode for the given model.
    pub fn estimating(model: &str) -> Self {
        let mut scenario = Self::new();
        scenario.parameters.estimation_model = Some(model.to_owned());
        scenario
    }

    pub fn context(&self) -> ModelContext<'_> {
        ModelContext {
            parameters: &self.parameters,
            population: &self.population,
            impedance: &self.impedance,
            shadow_prices: &self.shadow_prices,
            estimation: self.parameters.estimation_model.is_some(),
        }
    }

    pub fn helper(&self, context: &ModelContext<'_>) -> ChoiceModelHelper {
        let models = super::reference_models(&self.parameters, &self.coefficients).unwrap();
        ChoiceModelHelper::new(context, &models, &self.coefficients, 42).unwrap()
    }
}
