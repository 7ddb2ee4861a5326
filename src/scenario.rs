//! Built-in scenarios: a run configuration together with its input tables.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::config::{EvaporationConfig, ScenarioConfig};
use crate::error::{SimError, SimResult};
use crate::sim::forcing::ForcingVariable;
use crate::sim::network::Edge;
use crate::sim::types::{BasinRow, CurveRow, DemandRow, ForcingRow, ModelInputs, UserRow};

/// Names accepted by [`preset`].
pub const PRESETS: &[&str] = &["single_basin", "cascade", "allocation"];

/// Configuration and tables of one run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub config: ScenarioConfig,
    pub inputs: ModelInputs,
}

/// Looks up a built-in scenario by name.
///
/// # Errors
///
/// Returns a `Configuration` error naming the known presets.
pub fn preset(name: &str) -> SimResult<Scenario> {
    match name {
        "single_basin" => Ok(single_basin()),
        "cascade" => Ok(cascade()),
        "allocation" => Ok(allocation()),
        _ => Err(SimError::config(
            "preset",
            format!("unknown preset \"{name}\" (expected one of: {})", PRESETS.join(", ")),
        )),
    }
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// `n + 1` evenly spaced curve samples from empty to the given maxima.
pub fn linear_curve(
    basin_id: i32,
    max_volume: f64,
    max_area: f64,
    max_discharge: f64,
    max_level: f64,
    n: usize,
) -> Vec<CurveRow> {
    let n = n.max(1);
    (0..=n)
        .map(|k| {
            let x = k as f64 / n as f64;
            CurveRow {
                basin_id,
                volume: x * max_volume,
                area: x * max_area,
                discharge: x * max_discharge,
                level: x * max_level,
            }
        })
        .collect()
}

/// One free-flow basin of 1,000,000 m³ draining for one day without forcing.
///
/// The basin sits halfway up its curve, so it discharges 10 m³/s and loses
/// 864,000 m³ over the day.
pub fn single_basin() -> Scenario {
    let mut config = ScenarioConfig::new(start(), start() + TimeDelta::days(1));
    config.update_timestep = 86_400.0;
    config.evaporation = EvaporationConfig::neutral();
    Scenario {
        config,
        inputs: ModelInputs {
            basins: vec![BasinRow::free_flow(1, 1e6)],
            curves: linear_curve(1, 2e6, 1e6, 20.0, 2.0, 4),
            ..ModelInputs::default()
        },
    }
}

/// Three basins over ten days: basin 1 splits its discharge 60/40 between a
/// free-flow basin 2 and a controlled reservoir 3 that holds 4e5 m³.
pub fn cascade() -> Scenario {
    let mut config = ScenarioConfig::new(start(), start() + TimeDelta::days(10));
    config.saveat = vec![12.0 * 3_600.0];

    let mut forcing = Vec::new();
    for day in 0..10 {
        let time = start() + TimeDelta::days(day);
        let wet = day % 3 == 0;
        let mm_per_day = 1e-3 / 86_400.0;
        for basin_id in [1, 2, 3] {
            forcing.push(ForcingRow {
                time,
                basin_id,
                variable: ForcingVariable::Precipitation,
                value: if wet { 12.0 * mm_per_day } else { 0.0 },
            });
            forcing.push(ForcingRow {
                time,
                basin_id,
                variable: ForcingVariable::Evaporation,
                value: 3.0 * mm_per_day,
            });
        }
        forcing.push(ForcingRow {
            time,
            basin_id: 1,
            variable: ForcingVariable::Upstream,
            value: if wet { 4.0 } else { 2.0 },
        });
    }
    forcing.push(ForcingRow {
        time: start(),
        basin_id: 2,
        variable: ForcingVariable::Infiltration,
        value: 0.2,
    });

    let mut reservoir = BasinRow::controlled(3, 3e5, 0.0);
    reservoir.target_volume = None;
    reservoir.target_level = Some(2.0);
    reservoir.max_level = Some(3.5);

    let mut curves = linear_curve(1, 1e6, 5e5, 8.0, 2.0, 5);
    curves.extend(linear_curve(2, 5e5, 2.5e5, 4.0, 1.5, 5));
    curves.extend(linear_curve(3, 8e5, 3e5, 0.0, 4.0, 4));

    Scenario {
        config,
        inputs: ModelInputs {
            basins: vec![
                BasinRow::free_flow(1, 5e5),
                BasinRow::free_flow(2, 2e5),
                reservoir,
            ],
            edges: vec![
                Edge {
                    from: 1,
                    to: 2,
                    fraction: 0.6,
                },
                Edge {
                    from: 1,
                    to: 3,
                    fraction: 0.4,
                },
            ],
            curves,
            forcing,
            ..ModelInputs::default()
        },
    }
}

/// One basin fed by 12 m³/s of drainage shared by a city (priority 1,
/// 10 m³/s) and a farm (priority 2, 15 m³/s), over five days.
pub fn allocation() -> Scenario {
    let mut config = ScenarioConfig::new(start(), start() + TimeDelta::days(5));
    config.evaporation = EvaporationConfig::neutral();

    let users = [("city", 1, 10.0), ("farm", 2, 15.0)];
    Scenario {
        config,
        inputs: ModelInputs {
            basins: vec![BasinRow::free_flow(1, 1e6)],
            curves: linear_curve(1, 2e6, 1e6, 4.0, 2.0, 4),
            forcing: vec![ForcingRow {
                time: start(),
                basin_id: 1,
                variable: ForcingVariable::Drainage,
                value: 12.0,
            }],
            users: users
                .iter()
                .map(|&(user, priority, _)| UserRow {
                    basin_id: 1,
                    user: user.into(),
                    priority,
                })
                .collect(),
            demands: users
                .iter()
                .map(|&(user, _, demand)| DemandRow {
                    time: start(),
                    basin_id: 1,
                    user: user.into(),
                    demand,
                })
                .collect(),
            ..ModelInputs::default()
        },
    }
}
