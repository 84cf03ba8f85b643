// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use actsim::parameters::Parameters;
use actsim::population::{Household, Parcel};
use actsim::shadow_price::ShadowPriceRecord;
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use schemars::gen::{SchemaGenerator, SchemaSettings};
use schemars::JsonSchema;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

/// Generate the JSON Schemas for the input files of actsim
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The directory where the JSON Schemas should be stored
    path: PathBuf,
}

fn write_schema<T: JsonSchema>(gen: &SchemaGenerator, dir: &Path, name: &str) -> Result<()> {
    let schema = gen.clone().into_root_schema_for::<T>();
    let filename = dir.join(format!("schema-{name}.json"));
    let mut file =
        File::create(&filename).with_context(|| format!("Unable to create `{filename:?}`"))?;
    write!(file, "{}", serde_json::to_string_pretty(&schema)?)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    info!("Generating JSON Schemas");
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
    });
    let gen = settings.into_generator();

    write_schema::<Parameters>(&gen, &args.path, "parameters")?;
    write_schema::<Vec<Household>>(&gen, &args.path, "households")?;
    write_schema::<Vec<Parcel>>(&gen, &args.path, "parcels")?;
    write_schema::<Vec<ShadowPriceRecord>>(&gen, &args.path, "shadow-prices")?;

    info!("Done");

    Ok(())
}
