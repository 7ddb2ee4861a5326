//! API response and query types.
//!
//! Record fields use the same names as the exported CSV columns.

use serde::{Deserialize, Serialize};

use crate::config::ScenarioConfig;
use crate::sim::report::BalanceReport;
use crate::sim::types::BasinRecord;

/// Combined state response.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub config: ScenarioConfig,
    /// Lifecycle state, e.g. `"completed"`.
    pub state: String,
    /// Seconds since start.
    pub current_time: f64,
    pub report: BalanceReport,
    /// Records saved at the latest output instant, one per basin.
    pub latest: Vec<BasinRecord>,
}

/// Optional filters for the basin endpoint.
#[derive(Debug, Deserialize)]
pub struct BasinQuery {
    /// Start time in seconds (inclusive).
    pub from: Option<f64>,
    /// End time in seconds (inclusive).
    pub to: Option<f64>,
    /// Restrict to one basin.
    pub basin_id: Option<i32>,
}

/// Query of the parameters endpoint.
#[derive(Debug, Deserialize)]
pub struct ParameterQuery {
    /// Seconds since start; defaults to the snapshot time.
    pub time: Option<f64>,
}

/// Named parameter values in force at `time`.
#[derive(Debug, Serialize)]
pub struct ParameterResponse {
    /// Query time in seconds.
    pub time: f64,
    /// Time of the forcing update that set these values.
    pub updated_at: f64,
    /// `(name, value)` pairs such as `("basin.1.precipitation", 0.0)`.
    pub values: Vec<(String, f64)>,
}

/// Error response body for 400-class errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}
