// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Synthetic population and land use.
use std::path::Path;

use anyhow::{bail, Context, Result};
use hashbrown::HashMap;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::io::json::read_json;
use crate::parameters::InputFiles;

/// A person of a household.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Person {
    /// Identifier of the person, unique in the population.
    pub id: u64,
    /// Age in years.
    pub age: u32,
    /// `true` if the person has a job outside home.
    #[serde(default)]
    pub is_worker: bool,
    /// Observed usual work parcel (survey data).
    #[serde(default)]
    pub usual_work_parcel: Option<u64>,
    /// Observed mode of the work tour (survey data).
    #[serde(default)]
    pub work_tour_mode: Option<u32>,
}

/// A household.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Household {
    /// Identifier of the household, unique in the population.
    pub id: u64,
    /// Parcel where the household lives.
    pub home_parcel: u64,
    /// Annual income.
    #[serde(default)]
    pub income: f64,
    /// Number of vehicles available to the household.
    #[serde(default)]
    pub vehicles: u32,
    pub persons: Vec<Person>,
}

/// A land-use parcel.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Parcel {
    /// Identifier of the parcel.
    pub id: u64,
    /// Zone containing the parcel.
    pub zone_id: u32,
    /// X coordinate, in meters.
    pub x: f64,
    /// Y coordinate, in meters.
    pub y: f64,
    /// Number of jobs on the parcel.
    #[serde(default)]
    pub employment: f64,
}

/// Read-only land-use data, with the parcels indexed by id.
#[derive(Clone, Debug, Default)]
pub struct LandUse {
    parcels: Vec<Parcel>,
    index: HashMap<u64, usize>,
}

impl LandUse {
    /// Builds the land use from a list of parcels.
    ///
    /// Returns an error if two parcels share the same id.
    pub fn new(parcels: Vec<Parcel>) -> Result<Self> {
        let mut index = HashMap::with_capacity(parcels.len());
        for (i, parcel) in parcels.iter().enumerate() {
            if index.insert(parcel.id, i).is_some() {
                bail!("Duplicate parcel id {}", parcel.id);
            }
        }
        Ok(LandUse { parcels, index })
    }

    pub fn parcels(&self) -> &[Parcel] {
        &self.parcels
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    /// Returns the parcel at the given position.
    pub fn parcel(&self, index: usize) -> &Parcel {
        &self.parcels[index]
    }

    /// Returns the position of the parcel with the given id.
    pub fn parcel_index(&self, id: u64) -> Option<usize> {
        self.index.get(&id).copied()
    }
}

/// The synthetic population and its land use.
#[derive(Clone, Debug, Default)]
pub struct Population {
    pub households: Vec<Household>,
    pub land_use: LandUse,
}

impl Population {
    /// Builds a population, checking that ids are unique and that home parcels exist.
    pub fn new(mut households: Vec<Household>, land_use: LandUse) -> Result<Self> {
        households.sort_by_key(|h| h.id);
        for pair in households.windows(2) {
            if pair[0].id == pair[1].id {
                bail!("Duplicate household id {}", pair[0].id);
            }
        }
        let mut person_ids = hashbrown::HashSet::new();
        for household in households.iter() {
            if land_use.parcel_index(household.home_parcel).is_none() {
                bail!(
                    "Household {}: unknown home parcel {}",
                    household.id,
                    household.home_parcel
                );
            }
            for person in household.persons.iter() {
                if !person_ids.insert(person.id) {
                    bail!("Duplicate person id {}", person.id);
                }
            }
        }
        Ok(Population {
            households,
            land_use,
        })
    }

    /// Reads the households and parcels from their JSON files.
    pub fn from_files(input_files: &InputFiles) -> Result<Self> {
        info!("Reading population");
        let parcels: Vec<Parcel> = read_parcels(&input_files.parcels)?;
        let households: Vec<Household> = read_json(&input_files.households)?;
        info!(
            "Read {} households and {} parcels",
            households.len(),
            parcels.len()
        );
        Self::new(households, LandUse::new(parcels)?)
    }

    pub fn nb_persons(&self) -> usize {
        self.households.iter().map(|h| h.persons.len()).sum()
    }
}

fn read_parcels(path: &Path) -> Result<Vec<Parcel>> {
    read_json(path).with_context(|| format!("Failed to read parcels from `{path:?}`"))
}
