//! Step-function time series and the forcing store built on them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Zero-order-hold time series.
///
/// `query(t)` returns the value recorded at the greatest time `<= t`.
/// Records must arrive in strictly increasing time order.
///
/// # Examples
///
/// ```
/// use basin_sim::sim::forcing::ForwardFill;
///
/// let mut series = ForwardFill::new();
/// series.record(0.0, 1.0).unwrap();
/// series.record(10.0, 2.0).unwrap();
/// assert_eq!(*series.query(9.9).unwrap(), 1.0);
/// assert_eq!(*series.query(10.0).unwrap(), 2.0);
/// assert!(series.query(-1.0).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardFill<T> {
    times: Vec<f64>,
    values: Vec<T>,
}

impl<T> Default for ForwardFill<T> {
    fn default() -> Self {
        Self {
            times: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> ForwardFill<T> {
    /// Creates an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from pairs already sorted by time.
    ///
    /// # Errors
    ///
    /// Returns `NonMonotonicTime` at the first pair out of order.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, T)>) -> SimResult<Self> {
        let mut series = Self::new();
        for (t, v) in pairs {
            series.record(t, v)?;
        }
        Ok(series)
    }

    /// Appends a value at `time`.
    ///
    /// # Errors
    ///
    /// Returns `NonMonotonicTime` if `time` is not finite or not strictly
    /// greater than the last recorded time.
    pub fn record(&mut self, time: f64, value: T) -> SimResult<()> {
        let last = self.times.last().copied();
        let in_order = time.is_finite() && last.is_none_or(|l| time > l);
        if !in_order {
            return Err(SimError::NonMonotonicTime {
                time,
                last: last.unwrap_or(f64::NEG_INFINITY),
            });
        }
        self.times.push(time);
        self.values.push(value);
        Ok(())
    }

    /// Returns the value in force at `time`.
    ///
    /// # Errors
    ///
    /// Returns `NoData` if `time` precedes the first record.
    pub fn query(&self, time: f64) -> SimResult<&T> {
        let idx = self.times.partition_point(|&t| t <= time);
        if idx == 0 {
            return Err(SimError::NoData {
                time,
                first: self.times.first().copied(),
            });
        }
        Ok(&self.values[idx - 1])
    }

    /// Recorded times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Most recent record.
    pub fn last(&self) -> Option<(f64, &T)> {
        self.times.last().copied().zip(self.values.last())
    }

    /// Iterates over `(time, value)` pairs in time order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> {
        self.times.iter().copied().zip(self.values.iter())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Time-varying input driving a basin's water balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcingVariable {
    /// Precipitation rate (m/s).
    Precipitation,
    /// Potential evaporation rate (m/s).
    Evaporation,
    /// Drainage into the basin (m³/s).
    Drainage,
    /// Infiltration out of the basin (m³/s).
    Infiltration,
    /// Urban runoff leaving the basin (m³/s).
    UrbanRunoff,
    /// External upstream inflow (m³/s).
    Upstream,
}

impl ForcingVariable {
    /// All variables in parameter order.
    pub const ALL: [ForcingVariable; 6] = [
        ForcingVariable::Precipitation,
        ForcingVariable::Evaporation,
        ForcingVariable::Drainage,
        ForcingVariable::Infiltration,
        ForcingVariable::UrbanRunoff,
        ForcingVariable::Upstream,
    ];

    /// Column name used in tables and parameter names.
    pub fn name(self) -> &'static str {
        match self {
            ForcingVariable::Precipitation => "precipitation",
            ForcingVariable::Evaporation => "evaporation",
            ForcingVariable::Drainage => "drainage",
            ForcingVariable::Infiltration => "infiltration",
            ForcingVariable::UrbanRunoff => "urban_runoff",
            ForcingVariable::Upstream => "upstream",
        }
    }
}

impl fmt::Display for ForcingVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only store of every forcing and demand series of a run.
///
/// Series are keyed by basin id and variable (or user label for demands).
/// A variable without a series reads as zero.
#[derive(Debug, Clone, Default)]
pub struct ForcingHistory {
    series: BTreeMap<(i32, ForcingVariable), ForwardFill<f64>>,
    demand: BTreeMap<(i32, String), ForwardFill<f64>>,
}

impl ForcingHistory {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a forcing value for `basin_id`.
    ///
    /// # Errors
    ///
    /// Returns `NonMonotonicTime` if `time` is not after the series' last record.
    pub fn record(
        &mut self,
        basin_id: i32,
        variable: ForcingVariable,
        time: f64,
        value: f64,
    ) -> SimResult<()> {
        self.series
            .entry((basin_id, variable))
            .or_default()
            .record(time, value)
    }

    /// Appends a demand value for a user of `basin_id`.
    ///
    /// # Errors
    ///
    /// Returns `NonMonotonicTime` if `time` is not after the series' last record.
    pub fn record_demand(
        &mut self,
        basin_id: i32,
        user: &str,
        time: f64,
        value: f64,
    ) -> SimResult<()> {
        self.demand
            .entry((basin_id, user.to_string()))
            .or_default()
            .record(time, value)
    }

    /// Forcing value in force at `time`; zero when the basin has no series.
    ///
    /// # Errors
    ///
    /// Returns `NoData` if the series starts after `time`.
    pub fn value(&self, basin_id: i32, variable: ForcingVariable, time: f64) -> SimResult<f64> {
        match self.series.get(&(basin_id, variable)) {
            Some(series) => series.query(time).copied(),
            None => Ok(0.0),
        }
    }

    /// Demand of a user in force at `time`; zero when the user has no series.
    ///
    /// # Errors
    ///
    /// Returns `NoData` if the series starts after `time`.
    pub fn demand(&self, basin_id: i32, user: &str, time: f64) -> SimResult<f64> {
        match self.demand.get(&(basin_id, user.to_string())) {
            Some(series) => series.query(time).copied(),
            None => Ok(0.0),
        }
    }

    /// Distinct timestamps over all series, sorted.
    pub fn timestamps(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .series
            .values()
            .chain(self.demand.values())
            .flat_map(|s| s.times().iter().copied())
            .collect();
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// Number of stored series, demands included.
    pub fn series_count(&self) -> usize {
        self.series.len() + self.demand.len()
    }
}
