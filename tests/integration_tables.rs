//! Integration tests for the CSV loaders, the exporter and the CLI.

mod common;

use std::process::Command;

use basin_sim::io::export::export_results;
use basin_sim::io::tables::load_inputs;
use basin_sim::scenario;
use basin_sim::sim::engine::Engine;

#[test]
fn tables_written_to_disk_reproduce_the_preset() {
    let dir = common::temp_dir("tables");
    let preset = scenario::preset("cascade").unwrap();
    common::write_tables(&dir, &preset.inputs);

    let loaded = load_inputs(&dir).unwrap();
    assert_eq!(loaded.basins, preset.inputs.basins);
    assert_eq!(loaded.edges, preset.inputs.edges);
    assert_eq!(loaded.curves, preset.inputs.curves);
    assert_eq!(loaded.forcing, preset.inputs.forcing);
    assert!(loaded.users.is_empty());

    let mut from_disk = Engine::new();
    from_disk.initialize(preset.config, loaded).unwrap();
    from_disk.run_to_completion().unwrap();
    let in_memory = common::run_preset("cascade");
    assert_eq!(from_disk.storage().unwrap(), in_memory.storage().unwrap());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn users_and_demands_are_loaded() {
    let dir = common::temp_dir("users");
    let preset = scenario::preset("allocation").unwrap();
    common::write_tables(&dir, &preset.inputs);

    let loaded = load_inputs(&dir).unwrap();
    assert_eq!(loaded.users, preset.inputs.users);
    assert_eq!(loaded.demands, preset.inputs.demands);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn export_writes_three_tables() {
    let dir = common::temp_dir("export");
    let engine = common::run_preset("allocation");
    let written = export_results(&engine, &dir).unwrap();
    assert_eq!(written.len(), 3);

    let basin = std::fs::read_to_string(dir.join("basin.csv")).unwrap();
    assert_eq!(
        basin.lines().count(),
        engine.records().unwrap().len() + 1
    );
    let allocation = std::fs::read_to_string(dir.join("allocation.csv")).unwrap();
    assert_eq!(allocation.lines().count(), 11);
    let balance = std::fs::read_to_string(dir.join("water_balance.csv")).unwrap();
    assert!(balance.lines().next().unwrap().starts_with("basin_id,"));
    assert_eq!(balance.lines().count(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn cli_runs_preset_and_prints_report() {
    let dir = common::temp_dir("cli");
    let output = Command::new(env!("CARGO_BIN_EXE_basin-sim"))
        .args(["--preset", "single_basin", "--results-dir"])
        .arg(&dir)
        .output()
        .expect("basin-sim process should run");

    assert!(
        output.status.success(),
        "run failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout should be valid UTF-8");
    let line = stdout
        .lines()
        .find(|l| l.starts_with("Final storage:"))
        .unwrap_or_else(|| panic!("missing report in output: {stdout}"));
    let value: f64 = line
        .trim_start_matches("Final storage:")
        .trim()
        .trim_end_matches("m³")
        .trim()
        .parse()
        .unwrap();
    assert!((value - 136_000.0).abs() < 0.01);
    assert!(dir.join("basin.csv").is_file());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn cli_rejects_unknown_preset() {
    let output = Command::new(env!("CARGO_BIN_EXE_basin-sim"))
        .args(["--preset", "flood"])
        .output()
        .expect("basin-sim process should run");
    assert!(!output.status.success());
}
