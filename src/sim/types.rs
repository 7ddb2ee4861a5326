//! Core simulation types: basins, input table rows, and output records.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::forcing::ForcingVariable;
use super::network::Edge;

/// How a basin's outflow is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasinKind {
    /// Outflow follows the storage-discharge curve.
    FreeFlow,
    /// Outflow is managed to steer storage toward a target volume.
    Controlled,
}

impl fmt::Display for BasinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasinKind::FreeFlow => f.write_str("free_flow"),
            BasinKind::Controlled => f.write_str("controlled"),
        }
    }
}

/// A storage unit with its static attributes, resolved at initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Basin {
    /// Basin id, unique across the network.
    pub id: i32,
    /// Outflow regime.
    pub kind: BasinKind,
    /// Storage at the start of the run (m³).
    pub initial_storage: f64,
    /// Storage the managed release steers toward (m³, controlled only).
    pub target_volume: Option<f64>,
    /// Level above which the basin is reported as flooding (m).
    pub max_level: Option<f64>,
    /// Bed depth below the reference level (m).
    pub depth: Option<f64>,
}

/// Row of the basin table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinRow {
    pub id: i32,
    pub kind: BasinKind,
    /// Initial storage (m³).
    pub storage: f64,
    #[serde(default)]
    pub target_volume: Option<f64>,
    /// Used to derive `target_volume` from the curve when that is absent.
    #[serde(default)]
    pub target_level: Option<f64>,
    #[serde(default)]
    pub max_level: Option<f64>,
    #[serde(default)]
    pub depth: Option<f64>,
}

impl BasinRow {
    /// Free-flow basin row with the given initial storage.
    pub fn free_flow(id: i32, storage: f64) -> Self {
        Self {
            id,
            kind: BasinKind::FreeFlow,
            storage,
            target_volume: None,
            target_level: None,
            max_level: None,
            depth: None,
        }
    }

    /// Controlled basin row steering toward `target_volume`.
    pub fn controlled(id: i32, storage: f64, target_volume: f64) -> Self {
        Self {
            kind: BasinKind::Controlled,
            target_volume: Some(target_volume),
            ..Self::free_flow(id, storage)
        }
    }
}

/// Row of the curve table; rows of one basin are ordered by volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveRow {
    pub basin_id: i32,
    pub volume: f64,
    pub area: f64,
    pub discharge: f64,
    pub level: f64,
}

/// Row of the forcing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcingRow {
    pub time: NaiveDateTime,
    pub basin_id: i32,
    pub variable: ForcingVariable,
    pub value: f64,
}

/// Row of the user table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub basin_id: i32,
    pub user: String,
    /// Lower is served first.
    pub priority: u32,
}

/// Row of the demand table (m³/s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRow {
    pub time: NaiveDateTime,
    pub basin_id: i32,
    pub user: String,
    pub demand: f64,
}

/// Every static input table of a run.
#[derive(Debug, Clone, Default)]
pub struct ModelInputs {
    pub basins: Vec<BasinRow>,
    pub edges: Vec<Edge>,
    pub curves: Vec<CurveRow>,
    pub forcing: Vec<ForcingRow>,
    pub users: Vec<UserRow>,
    pub demands: Vec<DemandRow>,
}

/// State of one basin at one output instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasinRecord {
    /// Seconds since the start of the run.
    pub time: f64,
    /// Calendar time.
    pub datetime: NaiveDateTime,
    pub basin_id: i32,
    /// Storage (m³).
    pub storage: f64,
    /// Water level (m).
    pub level: f64,
    /// Surface area (m²).
    pub area: f64,
    /// Outflow (m³/s): curve discharge, or the released part of the managed flux.
    pub discharge: f64,
}

impl fmt::Display for BasinRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | basin {:>3} | S={:>12.2} m³  h={:>7.3} m  A={:>10.1} m²  Q={:>8.3} m³/s",
            self.datetime, self.basin_id, self.storage, self.level, self.area, self.discharge,
        )
    }
}

/// Allocation granted to one user at one forcing update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationRecord {
    /// Seconds since the start of the run.
    pub time: f64,
    pub datetime: NaiveDateTime,
    pub basin_id: i32,
    pub user: String,
    pub priority: u32,
    /// Requested rate (m³/s).
    pub demand: f64,
    /// Granted rate (m³/s).
    pub allocated: f64,
}

impl fmt::Display for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | basin {:>3} | {} (p{}) demand={:.3} allocated={:.3}",
            self.datetime, self.basin_id, self.user, self.priority, self.demand, self.allocated,
        )
    }
}
