// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

use std::path::PathBuf;
use std::process::ExitCode;

use actsim::RunMode;
use anyhow::Result;
use clap::{Parser, Subcommand};

/// actsim command line interface
///
/// The exit status is a failure if the share of invalid persons exceeds the tolerance given in
/// the parameters.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the observed choices of the estimated model
    Estimation {
        /// Path to the JSON file with the parameters
        parameters: PathBuf,
    },
    /// Simulate the choices of the population
    Application {
        /// Path to the JSON file with the parameters
        parameters: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let (mode, path) = match args.command {
        Command::Estimation { parameters } => (RunMode::Estimation, parameters),
        Command::Application { parameters } => (RunMode::Application, parameters),
    };
    let summary = actsim::run_from_path(mode, &path)?;
    if summary.within_tolerance {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
