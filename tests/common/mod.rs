//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;

use basin_sim::io::tables;
use basin_sim::scenario;
use basin_sim::sim::engine::Engine;
use basin_sim::sim::types::ModelInputs;

/// Initializes an engine from a built-in preset without advancing it.
pub fn preset_engine(name: &str) -> Engine {
    let preset = scenario::preset(name).unwrap();
    let mut engine = Engine::new();
    engine.initialize(preset.config, preset.inputs).unwrap();
    engine
}

/// Runs a built-in preset to its end time.
pub fn run_preset(name: &str) -> Engine {
    let mut engine = preset_engine(name);
    engine.run_to_completion().unwrap();
    engine
}

/// Fresh, empty directory under the system temp dir.
pub fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("basin-sim-{label}-{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_table<T: Serialize>(path: &Path, rows: &[T], header: &[&str]) {
    let mut wtr = csv::Writer::from_writer(File::create(path).unwrap());
    if rows.is_empty() {
        wtr.write_record(header).unwrap();
    }
    for row in rows {
        wtr.serialize(row).unwrap();
    }
    wtr.flush().unwrap();
}

/// Writes `inputs` as the CSV tables read by `tables::load_inputs`.
pub fn write_tables(dir: &Path, inputs: &ModelInputs) {
    write_table(
        &dir.join(tables::BASIN_TABLE),
        &inputs.basins,
        &["id", "kind", "storage", "target_volume", "target_level", "max_level", "depth"],
    );
    write_table(&dir.join(tables::EDGE_TABLE), &inputs.edges, &["from", "to", "fraction"]);
    write_table(
        &dir.join(tables::CURVE_TABLE),
        &inputs.curves,
        &["basin_id", "volume", "area", "discharge", "level"],
    );
    write_table(
        &dir.join(tables::FORCING_TABLE),
        &inputs.forcing,
        &["time", "basin_id", "variable", "value"],
    );
    if !inputs.users.is_empty() {
        write_table(&dir.join(tables::USER_TABLE), &inputs.users, &[]);
        write_table(&dir.join(tables::DEMAND_TABLE), &inputs.demands, &[]);
    }
}
