// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Coefficient tables of the choice models.
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Largest coefficient id accepted in a table.
pub const MAX_COEFFICIENT_ID: usize = 99_999;

/// Role of a coefficient in the utility function, derived from its label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum CoefficientKind {
    /// Linear utility coefficient.
    #[default]
    Utility,
    /// Coefficient of a size variable (label starting with `Gamm`): the term contributes
    /// `value * exp(coefficient)` to the size of the alternative.
    Size,
    /// First fixed size variable with a zero coefficient: the term contributes `value` to the
    /// size of the alternative.
    BaseSize,
    /// Multiplier of the log of the size (label starting with `LSM_`).
    SizeMultiplier,
    /// Log-sum parameter of a nest (label starting with `Nest`).
    Nest,
}

/// A coefficient of a choice model.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Coefficient {
    /// Identifier of the coefficient, used by the model layer.
    pub id: usize,
    /// Label of the coefficient.
    pub label: String,
    /// Constraint code (`F` free, `T` or `C` fixed).
    pub constraint: String,
    /// Value of the coefficient.
    pub value: f64,
    /// `true` if the coefficient is fixed during estimation.
    pub fixed: bool,
    /// Role of the coefficient.
    pub kind: CoefficientKind,
}

impl Coefficient {
    /// Creates a coefficient, deriving its role from its label.
    pub fn new(id: usize, label: &str, constraint: &str, value: f64) -> Self {
        let fixed = matches!(constraint.to_ascii_lowercase().as_str(), "t" | "c");
        let kind = if label.starts_with("Gamm") {
            CoefficientKind::Size
        } else if label.starts_with("LSM_") {
            CoefficientKind::SizeMultiplier
        } else if label.starts_with("Nest") {
            CoefficientKind::Nest
        } else {
            CoefficientKind::Utility
        };
        Coefficient {
            id,
            label: label.to_owned(),
            constraint: constraint.to_owned(),
            value,
            fixed,
            kind,
        }
    }

    /// Returns `true` if the coefficient applies to the size of the alternatives.
    pub const fn is_size(&self) -> bool {
        matches!(self.kind, CoefficientKind::Size | CoefficientKind::BaseSize)
    }
}

/// Coefficients of one choice model, indexed by coefficient id.
///
/// A coefficient id absent from the table has value 0: the model layer switches terms off by
/// omitting them from the coefficient file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CoefficientTable {
    model: String,
    title: String,
    coefficients: Vec<Option<Coefficient>>,
    size_multiplier: Option<usize>,
}

impl CoefficientTable {
    /// Builds a table from a list of coefficients.
    ///
    /// Returns an error if two coefficients share the same id or if an id is larger than
    /// [MAX_COEFFICIENT_ID].
    pub fn new(model: &str, title: &str, coefficients: Vec<Coefficient>) -> Result<Self> {
        if let Some(c) = coefficients.iter().find(|c| c.id > MAX_COEFFICIENT_ID) {
            bail!(
                "Coefficient id {} of model `{model}` is larger than {MAX_COEFFICIENT_ID}",
                c.id
            );
        }
        let max_id = coefficients.iter().map(|c| c.id).max();
        let mut slots: Vec<Option<Coefficient>> = vec![None; max_id.map_or(0, |m| m + 1)];
        let mut size_multiplier = None;
        let mut base_size_found = false;
        for mut coefficient in coefficients {
            let id = coefficient.id;
            if slots[id].is_some() {
                bail!("Duplicate coefficient id {id} in model `{model}`");
            }
            if coefficient.kind == CoefficientKind::SizeMultiplier {
                size_multiplier = Some(id);
            }
            if !base_size_found
                && coefficient.kind == CoefficientKind::Size
                && coefficient.fixed
                && coefficient.value.abs() < f64::EPSILON
            {
                base_size_found = true;
                coefficient.kind = CoefficientKind::BaseSize;
            }
            slots[id] = Some(coefficient);
        }
        Ok(CoefficientTable {
            model: model.to_owned(),
            title: title.to_owned(),
            coefficients: slots,
            size_multiplier,
        })
    }

    /// Parses a coefficient file.
    ///
    /// The format is: free-text title lines until a line `END`, then one row per coefficient
    /// (`id label constraint value`, whitespace separated) until a line `-1`.
    pub fn parse(model: &str, text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate();
        let mut title = String::new();
        for (_, line) in lines.by_ref() {
            if line.trim() == "END" {
                break;
            }
            if title.is_empty() {
                title = line.trim().to_owned();
            }
        }
        let mut coefficients = Vec::new();
        for (i, line) in lines {
            let line = line.trim();
            if line == "-1" {
                break;
            }
            if line.is_empty() {
                continue;
            }
            let coefficient = parse_row(line)
                .with_context(|| format!("Invalid coefficient row at line {}: `{line}`", i + 1))?;
            coefficients.push(coefficient);
        }
        Self::new(model, &title, coefficients)
    }

    /// Reads and parses a coefficient file.
    pub fn from_file(model: &str, path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Unable to read coefficient file `{path:?}`"))?;
        Self::parse(model, &text)
            .with_context(|| format!("Unable to parse coefficient file `{path:?}`"))
    }

    /// Name of the model the coefficients belong to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Title line of the coefficient file.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the coefficient with the given id, if any.
    pub fn get(&self, id: usize) -> Option<&Coefficient> {
        self.coefficients.get(id).and_then(Option::as_ref)
    }

    /// Returns the value of the coefficient, or 0 if it is absent.
    pub fn value(&self, id: usize) -> f64 {
        self.get(id).map_or(0.0, |c| c.value)
    }

    /// Returns `true` if the coefficient is present in the table.
    pub fn is_applicable(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    /// Value of the size-function multiplier (1 if the table has none).
    pub fn size_multiplier(&self) -> f64 {
        self.size_multiplier.map_or(1.0, |id| self.value(id))
    }

    /// Iterates over the coefficients, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Coefficient> {
        self.coefficients.iter().flatten()
    }

    /// Number of coefficients in the table.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if the table has no coefficient.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_row(line: &str) -> Result<Coefficient> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        bail!("Expected 4 fields, found {}", tokens.len());
    }
    let id: usize = tokens[0]
        .parse()
        .map_err(|e| anyhow!("Invalid coefficient id `{}`: {e}", tokens[0]))?;
    let value: f64 = tokens[3]
        .parse()
        .map_err(|e| anyhow!("Invalid coefficient value `{}`: {e}", tokens[3]))?;
    if !value.is_finite() {
        bail!("Non-finite coefficient value `{}`", tokens[3]);
    }
    Ok(Coefficient::new(id, tokens[1], tokens[2], value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "Work location model
estimated 2012-05-03
END
   1 dist        F  -0.4500
   2 logsum      F   0.6100
  10 Gamm_base   T   0.0000
  11 Gamm_emp    F  -1.2000
  12 LSM_size    T   0.9000
  20 Nest_auto   T   0.7000
-1
  99 ignored     F   1.0000
";

    #[test]
    fn parse_test() {
        let table = CoefficientTable::parse("work_location", FILE).unwrap();
        assert_eq!(table.title(), "Work location model");
        assert_eq!(table.model(), "work_location");
        assert_eq!(table.len(), 6);
        assert_eq!(table.value(1), -0.45);
        // Missing coefficients have value 0.
        assert_eq!(table.value(3), 0.0);
        assert_eq!(table.value(99), 0.0);
        assert!(!table.is_applicable(99));
        assert_eq!(table.get(10).unwrap().kind, CoefficientKind::BaseSize);
        assert!(table.get(10).unwrap().fixed);
        assert_eq!(table.get(11).unwrap().kind, CoefficientKind::Size);
        assert_eq!(table.get(20).unwrap().kind, CoefficientKind::Nest);
        assert_eq!(table.size_multiplier(), 0.9);
    }

    #[test]
    fn size_multiplier_defaults_to_one_test() {
        let table =
            CoefficientTable::new("m", "", vec![Coefficient::new(0, "asc", "F", 1.0)]).unwrap();
        assert_eq!(table.size_multiplier(), 1.0);
    }

    #[test]
    fn invalid_files_test() {
        let duplicate = "t\nEND\n1 a F 1.0\n1 b F 2.0\n-1\n";
        assert!(CoefficientTable::parse("m", duplicate).is_err());
        let bad_value = "t\nEND\n1 a F abc\n-1\n";
        assert!(CoefficientTable::parse("m", bad_value).is_err());
        let short_row = "t\nEND\n1 a\n-1\n";
        assert!(CoefficientTable::parse("m", short_row).is_err());
        let overflowing_id = "t\nEND\n18446744073709551615 a F 1.0\n-1\n";
        assert!(CoefficientTable::parse("m", overflowing_id).is_err());
        let huge_id = "t\nEND\n1000000000000 a F 1.0\n-1\n";
        assert!(CoefficientTable::parse("m", huge_id).is_err());
        let largest_id = format!("t\nEND\n{MAX_COEFFICIENT_ID} a F 1.0\n-1\n");
        let table = CoefficientTable::parse("m", &largest_id).unwrap();
        assert_eq!(table.value(MAX_COEFFICIENT_ID), 1.0);
    }
}
