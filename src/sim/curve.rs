//! Piecewise-linear storage relationships for a single basin.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// One row of a curve table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveSample {
    /// Storage volume (m³).
    pub volume: f64,
    /// Wetted surface area (m²).
    pub area: f64,
    /// Free-flow discharge (m³/s).
    pub discharge: f64,
    /// Water level (m).
    pub level: f64,
}

impl CurveSample {
    /// Creates a sample.
    pub fn new(volume: f64, area: f64, discharge: f64, level: f64) -> Self {
        Self {
            volume,
            area,
            discharge,
            level,
        }
    }
}

/// Monotone lookup from storage (or level) to area, discharge and level.
///
/// Between samples the table interpolates linearly. Below the first sample
/// it clamps to the first value; above the last sample it extrapolates
/// with the slope of the last segment.
///
/// # Examples
///
/// ```
/// use basin_sim::sim::curve::{CurveSample, CurveTable};
///
/// let table = CurveTable::build(&[
///     CurveSample::new(0.0, 0.0, 0.0, 0.0),
///     CurveSample::new(100.0, 50.0, 1.0, 2.0),
/// ])
/// .unwrap();
/// assert_eq!(table.lookup_area(50.0), 25.0);
/// assert_eq!(table.lookup_discharge(-10.0), 0.0);
/// assert_eq!(table.lookup_level(200.0), 4.0);
/// ```
#[derive(Debug, Clone)]
pub struct CurveTable {
    volume: Vec<f64>,
    area: Vec<f64>,
    discharge: Vec<f64>,
    level: Vec<f64>,
}

impl CurveTable {
    /// Validates samples and builds the table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCurve` for fewer than two samples, non-finite values,
    /// volumes that are not strictly increasing, or area, discharge or level
    /// that decrease with volume.
    pub fn build(samples: &[CurveSample]) -> SimResult<Self> {
        if samples.len() < 2 {
            return Err(SimError::InvalidCurve(format!(
                "need at least 2 samples, got {}",
                samples.len()
            )));
        }
        if let Some(s) = samples.iter().find(|s| {
            !(s.volume.is_finite()
                && s.area.is_finite()
                && s.discharge.is_finite()
                && s.level.is_finite())
        }) {
            return Err(SimError::InvalidCurve(format!(
                "non-finite value in sample at volume {}",
                s.volume
            )));
        }

        for (i, pair) in samples.windows(2).enumerate() {
            let (a, b) = (&pair[0], &pair[1]);
            if b.volume <= a.volume {
                return Err(SimError::InvalidCurve(format!(
                    "volumes must be strictly increasing: sample {} has {} after {}",
                    i + 1,
                    b.volume,
                    a.volume
                )));
            }
            for (name, lo, hi) in [
                ("area", a.area, b.area),
                ("discharge", a.discharge, b.discharge),
                ("level", a.level, b.level),
            ] {
                if hi < lo {
                    return Err(SimError::InvalidCurve(format!(
                        "{name} decreases from {lo} to {hi} at sample {}",
                        i + 1
                    )));
                }
            }
        }

        Ok(Self {
            volume: samples.iter().map(|s| s.volume).collect(),
            area: samples.iter().map(|s| s.area).collect(),
            discharge: samples.iter().map(|s| s.discharge).collect(),
            level: samples.iter().map(|s| s.level).collect(),
        })
    }

    /// Surface area at `volume`.
    pub fn lookup_area(&self, volume: f64) -> f64 {
        interpolate(&self.volume, &self.area, volume)
    }

    /// Free-flow discharge at `volume`.
    pub fn lookup_discharge(&self, volume: f64) -> f64 {
        interpolate(&self.volume, &self.discharge, volume)
    }

    /// Water level at `volume`.
    pub fn lookup_level(&self, volume: f64) -> f64 {
        interpolate(&self.volume, &self.level, volume)
    }

    /// Surface area at `level`, interpolated over the level axis.
    pub fn lookup_area_at_level(&self, level: f64) -> f64 {
        interpolate(&self.level, &self.area, level)
    }

    /// Storage volume at `level` (inverse of [`CurveTable::lookup_level`]).
    pub fn volume_at_level(&self, level: f64) -> f64 {
        interpolate(&self.level, &self.volume, level)
    }

    /// Largest sampled volume; storage above it is extrapolated.
    pub fn max_volume(&self) -> f64 {
        self.volume[self.volume.len() - 1]
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.volume.len()
    }

    /// Always `false`: a built table holds at least two samples.
    pub fn is_empty(&self) -> bool {
        self.volume.is_empty()
    }
}

/// Linear interpolation over non-decreasing `xs`.
///
/// Clamps below `xs[0]` and extrapolates the last segment above the end.
/// Runs of equal `xs` resolve to the last sample of the run.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len();
    let idx = xs.partition_point(|&v| v <= x);
    if idx == 0 {
        return ys[0];
    }
    if idx == n {
        let dx = xs[n - 1] - xs[n - 2];
        if dx <= 0.0 {
            return ys[n - 1];
        }
        let slope = (ys[n - 1] - ys[n - 2]) / dx;
        return ys[n - 1] + slope * (x - xs[n - 1]);
    }
    let i = idx - 1;
    let slope = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]);
    ys[i] + slope * (x - xs[i])
}
