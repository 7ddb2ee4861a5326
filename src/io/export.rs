//! CSV export of simulation results.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::SimResult;
use crate::sim::bookkeeping::BalanceRow;
use crate::sim::engine::Engine;
use crate::sim::types::{AllocationRecord, BasinRecord};

/// Column header of `basin.csv`.
const BASIN_HEADER: &str = "time,datetime,basin_id,storage,level,area,discharge";

/// Writes basin records as CSV to any writer.
///
/// # Arguments
///
/// * `records` - Saved basin states
/// * `writer` - Destination implementing `Write`
///
/// # Errors
///
/// Returns a `Csv` or `Io` error if writing fails.
pub fn write_basin_csv(records: &[BasinRecord], writer: impl Write) -> SimResult<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(BASIN_HEADER.split(','))?;
    for r in records {
        wtr.write_record(&[
            format!("{:.3}", r.time),
            r.datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
            r.basin_id.to_string(),
            format!("{:.6}", r.storage),
            format!("{:.6}", r.level),
            format!("{:.6}", r.area),
            format!("{:.6}", r.discharge),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes allocation records as CSV to any writer.
///
/// # Errors
///
/// Returns a `Csv` or `Io` error if writing fails.
pub fn write_allocation_csv(records: &[AllocationRecord], writer: impl Write) -> SimResult<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    if records.is_empty() {
        wtr.write_record([
            "time", "datetime", "basin_id", "user", "priority", "demand", "allocated",
        ])?;
    }
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the per-basin water balance as CSV to any writer.
///
/// # Errors
///
/// Returns a `Csv` or `Io` error if writing fails.
pub fn write_balance_csv(rows: &[BalanceRow], writer: impl Write) -> SimResult<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes `basin.csv`, `allocation.csv` and `water_balance.csv` into `dir`.
///
/// Creates `dir` if needed and returns the written paths.
///
/// # Errors
///
/// Returns `NotInitialized` for an engine without a run, otherwise any
/// `Io` or `Csv` error raised while writing.
pub fn export_results(engine: &Engine, dir: &Path) -> SimResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let basin = dir.join("basin.csv");
    let allocation = dir.join("allocation.csv");
    let balance = dir.join("water_balance.csv");

    write_basin_csv(engine.records()?, buffered(&basin)?)?;
    write_allocation_csv(engine.allocation_records()?, buffered(&allocation)?)?;
    write_balance_csv(&engine.balance_rows()?, buffered(&balance)?)?;
    log::info!("results written to {}", dir.display());
    Ok(vec![basin, allocation, balance])
}

fn buffered(path: &Path) -> io::Result<io::BufWriter<File>> {
    Ok(io::BufWriter::new(File::create(path)?))
}
