//! CSV loaders for the model input tables.
//!
//! A model directory holds one file per table:
//!
//! | file          | required | columns                                                             |
//! |---------------|----------|---------------------------------------------------------------------|
//! | `basin.csv`   | yes      | `id,kind,storage,target_volume,target_level,max_level,depth`        |
//! | `edge.csv`    | yes      | `from,to,fraction`                                                  |
//! | `curve.csv`   | yes      | `basin_id,volume,area,discharge,level`                              |
//! | `forcing.csv` | yes      | `time,basin_id,variable,value`                                      |
//! | `user.csv`    | no       | `basin_id,user,priority`                                            |
//! | `demand.csv`  | no       | `time,basin_id,user,demand`                                         |
//!
//! Times are ISO-8601 without offset (`2020-01-01T00:00:00`). Empty optional
//! cells read as absent.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{SimError, SimResult};
use crate::sim::types::ModelInputs;

pub const BASIN_TABLE: &str = "basin.csv";
pub const EDGE_TABLE: &str = "edge.csv";
pub const CURVE_TABLE: &str = "curve.csv";
pub const FORCING_TABLE: &str = "forcing.csv";
pub const USER_TABLE: &str = "user.csv";
pub const DEMAND_TABLE: &str = "demand.csv";

/// Loads every input table from `dir`.
///
/// # Errors
///
/// Returns `Configuration` naming every missing required table, `Csv` for a
/// malformed row, and `Io` if a file cannot be read.
pub fn load_inputs(dir: &Path) -> SimResult<ModelInputs> {
    let missing: Vec<&str> = [BASIN_TABLE, EDGE_TABLE, CURVE_TABLE, FORCING_TABLE]
        .into_iter()
        .filter(|name| !dir.join(name).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(SimError::Configuration(
            missing
                .into_iter()
                .map(|name| crate::config::ConfigError {
                    field: name.to_string(),
                    message: format!("required table missing from \"{}\"", dir.display()),
                })
                .collect(),
        ));
    }

    let inputs = ModelInputs {
        basins: read_file(&dir.join(BASIN_TABLE))?,
        edges: read_file(&dir.join(EDGE_TABLE))?,
        curves: read_file(&dir.join(CURVE_TABLE))?,
        forcing: read_file(&dir.join(FORCING_TABLE))?,
        users: read_optional(&dir.join(USER_TABLE))?,
        demands: read_optional(&dir.join(DEMAND_TABLE))?,
    };
    log::info!(
        "loaded {} basins, {} edges, {} curve rows, {} forcing rows from {}",
        inputs.basins.len(),
        inputs.edges.len(),
        inputs.curves.len(),
        inputs.forcing.len(),
        dir.display()
    );
    Ok(inputs)
}

/// Reads typed rows from CSV with a header line.
///
/// # Errors
///
/// Returns `Csv` at the first row that does not match `T`.
pub fn read_rows<T: DeserializeOwned>(reader: impl Read) -> SimResult<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn read_file<T: DeserializeOwned>(path: &Path) -> SimResult<Vec<T>> {
    let file = File::open(path)?;
    read_rows(std::io::BufReader::new(file))
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> SimResult<Vec<T>> {
    if path.is_file() {
        read_file(path)
    } else {
        Ok(Vec::new())
    }
}
