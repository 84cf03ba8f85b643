// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Network impedance between parcels.
use anyhow::{bail, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::population::Parcel;

/// Travel modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Mode {
    Walk,
    Bike,
    DriveAlone,
    SharedRide,
    Transit,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Walk,
        Mode::Bike,
        Mode::DriveAlone,
        Mode::SharedRide,
        Mode::Transit,
    ];

    /// Numeric code of the mode, as used in survey data.
    pub const fn code(self) -> u32 {
        match self {
            Mode::Walk => 1,
            Mode::Bike => 2,
            Mode::DriveAlone => 3,
            Mode::SharedRide => 4,
            Mode::Transit => 6,
        }
    }

    /// Returns the mode with the given code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

/// Type of path used to compute the impedance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PathType {
    /// Any path.
    #[default]
    Full,
    /// Paths avoiding tolled links.
    NoToll,
}

/// Time period of the day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum TimePeriod {
    #[default]
    OffPeak,
    AmPeak,
    PmPeak,
}

/// Impedance of a trip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Impedance {
    /// Distance, in kilometers.
    pub distance: f64,
    /// Travel time, in minutes.
    pub time: f64,
    /// Monetary cost.
    pub cost: f64,
    /// Generalized time, in minutes.
    pub generalized_time: f64,
}

/// Provider of origin-destination impedances.
pub trait ImpedanceProvider: Send + Sync {
    /// Returns the impedance of a trip between two parcels.
    fn impedance(
        &self,
        mode: Mode,
        path_type: PathType,
        period: TimePeriod,
        origin: &Parcel,
        destination: &Parcel,
    ) -> Impedance;
}

const fn default_walk_speed() -> f64 {
    5.0
}

const fn default_bike_speed() -> f64 {
    15.0
}

const fn default_car_speed() -> f64 {
    40.0
}

const fn default_transit_speed() -> f64 {
    20.0
}

const fn default_transit_wait() -> f64 {
    10.0
}

const fn default_car_cost_per_km() -> f64 {
    0.2
}

const fn default_transit_fare() -> f64 {
    2.0
}

const fn default_peak_factor() -> f64 {
    1.3
}

const fn default_value_of_time() -> f64 {
    0.25
}

/// Parameters of the straight-line [DistanceImpedance].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DistanceImpedanceParameters {
    /// Walking speed, in km/h.
    #[serde(default = "default_walk_speed")]
    pub walk_speed: f64,
    /// Biking speed, in km/h.
    #[serde(default = "default_bike_speed")]
    pub bike_speed: f64,
    /// Off-peak car speed, in km/h.
    #[serde(default = "default_car_speed")]
    pub car_speed: f64,
    /// Transit in-vehicle speed, in km/h.
    #[serde(default = "default_transit_speed")]
    pub transit_speed: f64,
    /// Transit access and waiting time, in minutes.
    #[serde(default = "default_transit_wait")]
    pub transit_wait: f64,
    /// Car operating cost per km.
    #[serde(default = "default_car_cost_per_km")]
    pub car_cost_per_km: f64,
    /// Toll per km on full-network car paths.
    #[serde(default)]
    pub toll_per_km: f64,
    /// Transit fare per trip.
    #[serde(default = "default_transit_fare")]
    pub transit_fare: f64,
    /// Multiplier of car times in the peak periods.
    #[serde(default = "default_peak_factor")]
    pub peak_factor: f64,
    /// Value of time used for the generalized time, in money per minute.
    #[serde(default = "default_value_of_time")]
    pub value_of_time: f64,
}

impl Default for DistanceImpedanceParameters {
    fn default() -> Self {
        DistanceImpedanceParameters {
            walk_speed: default_walk_speed(),
            bike_speed: default_bike_speed(),
            car_speed: default_car_speed(),
            transit_speed: default_transit_speed(),
            transit_wait: default_transit_wait(),
            car_cost_per_km: default_car_cost_per_km(),
            toll_per_km: 0.0,
            transit_fare: default_transit_fare(),
            peak_factor: default_peak_factor(),
            value_of_time: default_value_of_time(),
        }
    }
}

impl DistanceImpedanceParameters {
    pub fn validate(&self) -> Result<()> {
        let speeds = [
            self.walk_speed,
            self.bike_speed,
            self.car_speed,
            self.transit_speed,
        ];
        if speeds.iter().any(|&s| !(s > 0.0)) {
            bail!("Speeds must be positive");
        }
        if !(self.value_of_time > 0.0) {
            bail!("The value of time must be positive");
        }
        if !(self.peak_factor >= 1.0) {
            bail!("The peak factor must be at least 1");
        }
        Ok(())
    }
}

/// Impedance computed from the straight-line distance between parcels.
#[derive(Clone, Debug, Default)]
pub struct DistanceImpedance {
    parameters: DistanceImpedanceParameters,
}

impl DistanceImpedance {
    pub const fn new(parameters: DistanceImpedanceParameters) -> Self {
        DistanceImpedance { parameters }
    }

    /// Straight-line distance between two parcels, in kilometers.
    pub fn distance(origin: &Parcel, destination: &Parcel) -> f64 {
        (origin.x - destination.x).hypot(origin.y - destination.y) / 1000.0
    }
}

impl ImpedanceProvider for DistanceImpedance {
    fn impedance(
        &self,
        mode: Mode,
        path_type: PathType,
        period: TimePeriod,
        origin: &Parcel,
        destination: &Parcel,
    ) -> Impedance {
        let p = &self.parameters;
        let distance = Self::distance(origin, destination);
        let congestion = match period {
            TimePeriod::OffPeak => 1.0,
            TimePeriod::AmPeak | TimePeriod::PmPeak => p.peak_factor,
        };
        let toll = match path_type {
            PathType::Full => p.toll_per_km * distance,
            PathType::NoToll => 0.0,
        };
        let (time, cost) = match mode {
            Mode::Walk => (60.0 * distance / p.walk_speed, 0.0),
            Mode::Bike => (60.0 * distance / p.bike_speed, 0.0),
            Mode::DriveAlone => (
                congestion * 60.0 * distance / p.car_speed,
                p.car_cost_per_km * distance + toll,
            ),
            // The cost is shared between two occupants.
            Mode::SharedRide => (
                congestion * 60.0 * distance / p.car_speed,
                (p.car_cost_per_km * distance + toll) / 2.0,
            ),
            Mode::Transit => (
                p.transit_wait + 60.0 * distance / p.transit_speed,
                p.transit_fare,
            ),
        };
        Impedance {
            distance,
            time,
            cost,
            generalized_time: time + cost / p.value_of_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcel(x: f64, y: f64) -> Parcel {
        Parcel {
            id: 0,
            zone_id: 0,
            x,
            y,
            employment: 0.0,
        }
    }

    #[test]
    fn impedance_test() {
        let provider = DistanceImpedance::default();
        let o = parcel(0.0, 0.0);
        let d = parcel(3000.0, 4000.0);
        let walk = provider.impedance(Mode::Walk, PathType::Full, TimePeriod::OffPeak, &o, &d);
        assert!((walk.distance - 5.0).abs() < 1e-12);
        assert!((walk.time - 60.0).abs() < 1e-12);
        assert_eq!(walk.cost, 0.0);
        let off_peak =
            provider.impedance(Mode::DriveAlone, PathType::Full, TimePeriod::OffPeak, &o, &d);
        let peak = provider.impedance(Mode::DriveAlone, PathType::Full, TimePeriod::AmPeak, &o, &d);
        assert!((peak.time - 1.3 * off_peak.time).abs() < 1e-12);
        let shared =
            provider.impedance(Mode::SharedRide, PathType::Full, TimePeriod::OffPeak, &o, &d);
        assert!((2.0 * shared.cost - off_peak.cost).abs() < 1e-12);
        assert!(off_peak.generalized_time > off_peak.time);
    }

    #[test]
    fn mode_codes_test() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(Mode::from_code(5), None);
    }
}
