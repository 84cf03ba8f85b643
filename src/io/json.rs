// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Imports / exports through JSON files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::parameters::Parameters;

/// Reads the [Parameters] from a JSON file and validates them.
pub fn get_parameters_from_json(path: &Path) -> Result<Parameters> {
    info!("Reading parameters");
    let parameters: Parameters = read_json(path)?;
    parameters
        .validate()
        .with_context(|| format!("Invalid parameters in `{path:?}`"))?;
    Ok(parameters)
}

/// Read some deserializable data from a JSON file.
pub fn read_json<D: DeserializeOwned>(filename: &Path) -> Result<D> {
    let file =
        File::open(filename).with_context(|| format!("Unable to open file `{filename:?}`"))?;
    let data = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Unable to parse file `{filename:?}`"))?;
    Ok(data)
}

fn json_filename(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{name}.json"))
}

/// Write some serializable data as a JSON file.
///
/// The file is stored in the given directory, with filename "{name}.json".
pub fn write_json<D: Serialize>(data: D, output_dir: &Path, name: &str) -> Result<()> {
    let filename = json_filename(output_dir, name);
    let file = File::create(&filename)
        .with_context(|| format!("Unable to create file `{filename:?}`"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &data)
        .with_context(|| format!("Unable to write file `{filename:?}`"))?;
    writer.flush()?;
    Ok(())
}

/// Append some serializable data to a JSON file.
///
/// The JSON file must contain a list of the data type `D`.
///
/// If the JSON does not exist, the file is created, with the data to append in a list.
pub fn append_json<D: Serialize + DeserializeOwned>(
    to_append: D,
    output_dir: &Path,
    name: &str,
) -> Result<()> {
    let filename = json_filename(output_dir, name);
    let mut data: Vec<D> = if filename.is_file() {
        read_json(&filename)?
    } else {
        vec![]
    };
    data.push(to_append);
    write_json(data, output_dir, name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_json_test() {
        let dir = tempfile::tempdir().unwrap();
        append_json(1u32, dir.path(), "list").unwrap();
        append_json(2u32, dir.path(), "list").unwrap();
        let data: Vec<u32> = read_json(&dir.path().join("list.json")).unwrap();
        assert_eq!(data, vec![1, 2]);
        assert!(read_json::<Vec<u32>>(&dir.path().join("missing.json")).is_err());
    }
}
