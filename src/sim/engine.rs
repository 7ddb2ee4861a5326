//! Stepwise simulation engine: owns the model state, the integrator and the
//! forcing-update and bookkeeping callbacks.
//!
//! The driver protocol is `initialize`, then any mix of `update`,
//! `update_until` and `run_to_completion`. Time only moves forward.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::{debug, info, warn};

use crate::config::{ConfigError, ScenarioConfig};
use crate::error::{SimError, SimResult};

use super::allocation::{AllocationRequest, allocate, available_supply};
use super::balance::BalanceModel;
use super::bookkeeping::{BalanceRow, WaterBalance};
use super::clock::Clock;
use super::curve::{CurveSample, CurveTable};
use super::forcing::{ForcingHistory, ForcingVariable, ForwardFill};
use super::integrator::Integrator;
use super::network::Network;
use super::params::{BasinField, ParameterVector};
use super::report::BalanceReport;
use super::schedule::{Schedule, TIME_EPS};
use super::types::{AllocationRecord, Basin, BasinKind, BasinRecord, ModelInputs};

/// Lifecycle of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running,
    Completed,
    /// Terminal until the engine is rebuilt.
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Completed => "completed",
            EngineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Simulation engine exposing the stepwise control protocol.
///
/// # Examples
///
/// ```
/// use basin_sim::scenario;
/// use basin_sim::sim::engine::{Engine, EngineState};
///
/// let preset = scenario::preset("single_basin").unwrap();
/// let mut engine = Engine::new();
/// engine.initialize(preset.config, preset.inputs).unwrap();
/// engine.update_until(3_600.0).unwrap();
/// assert_eq!(engine.get_current_time().unwrap(), 3_600.0);
/// engine.run_to_completion().unwrap();
/// assert_eq!(engine.state(), EngineState::Completed);
/// ```
#[derive(Debug, Default)]
pub struct Engine {
    run: Option<Run>,
    failure: Option<String>,
    completed: bool,
    running: bool,
}

impl Engine {
    /// Creates an uninitialized engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        match (&self.run, &self.failure) {
            (None, _) => EngineState::Uninitialized,
            (Some(_), Some(_)) => EngineState::Failed,
            (Some(_), None) if self.completed => EngineState::Completed,
            (Some(_), None) if self.running => EngineState::Running,
            (Some(_), None) => EngineState::Initialized,
        }
    }

    /// Validates `config` and `inputs`, builds the model and applies the
    /// forcing update at the start time.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` on a second call, `Configuration` for
    /// invalid settings or tables, `InvalidCurve` for a malformed curve,
    /// `NonMonotonicTime` for repeated forcing timestamps, and `NoData` if a
    /// forcing series starts after the start time. The engine stays
    /// uninitialized on error.
    pub fn initialize(&mut self, config: ScenarioConfig, inputs: ModelInputs) -> SimResult<()> {
        if self.run.is_some() {
            return Err(SimError::AlreadyInitialized);
        }
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SimError::Configuration(errors));
        }
        let run = Run::build(config, inputs)?;
        info!(
            "initialized {} basins, {} forcing series, {} forcing updates, solver {}",
            run.balance.len(),
            run.forcing.series_count(),
            run.schedule.len(),
            run.integrator.name()
        );
        self.run = Some(run);
        Ok(())
    }

    /// Advances by exactly one internal solver step.
    ///
    /// A no-op once the end time is reached.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized`, `EngineFailed` after an earlier failure, or
    /// the step's own error (`Integration`, `NoData`), which moves the
    /// engine to `Failed`.
    pub fn update(&mut self) -> SimResult<()> {
        let end = self.active()?.end;
        if self.completed {
            return Ok(());
        }
        self.advance(end, true)
    }

    /// Advances until `target` seconds since the start.
    ///
    /// # Errors
    ///
    /// Returns `PastTime` if `target` is before the current time and
    /// `BeyondEndTime` if it is after the end time, leaving the state
    /// unchanged, plus every error of [`Engine::update`].
    pub fn update_until(&mut self, target: f64) -> SimResult<()> {
        let run = self.active()?;
        let (current, end) = (run.t, run.end);
        if target.is_nan() || target < current - TIME_EPS {
            return Err(SimError::PastTime { target, current });
        }
        if target > end + TIME_EPS {
            return Err(SimError::BeyondEndTime { target, end });
        }
        if (target - current).abs() <= TIME_EPS {
            return Ok(());
        }
        self.advance(target.min(end), false)
    }

    /// Advances to the end time and marks the run completed.
    ///
    /// # Errors
    ///
    /// As [`Engine::update`].
    pub fn run_to_completion(&mut self) -> SimResult<()> {
        let end = self.active()?.end;
        if self.completed {
            return Ok(());
        }
        self.advance(end, false)
    }

    /// Seconds since the start time.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before [`Engine::initialize`].
    pub fn get_current_time(&self) -> SimResult<f64> {
        Ok(self.inner()?.t)
    }

    /// Steps toward `target`: once when `single`, otherwise until reached.
    fn advance(&mut self, target: f64, single: bool) -> SimResult<()> {
        let Some(run) = self.run.as_mut() else {
            return Err(SimError::NotInitialized);
        };
        if !self.running {
            info!("run started at {}", run.balance.clock().start());
            self.running = true;
        }
        loop {
            if let Err(e) = run.step(target) {
                self.failure = Some(e.to_string());
                return Err(e);
            }
            if run.t >= run.end {
                self.completed = true;
                let stats = run.integrator.stats();
                info!(
                    "run completed at {} after {} steps ({} rejected)",
                    run.balance.clock().end(),
                    stats.accepted,
                    stats.rejected
                );
                return Ok(());
            }
            if single || run.t >= target - TIME_EPS {
                return Ok(());
            }
        }
    }

    fn inner(&self) -> SimResult<&Run> {
        self.run.as_ref().ok_or(SimError::NotInitialized)
    }

    /// The run, if it may still advance.
    fn active(&self) -> SimResult<&Run> {
        let run = self.inner()?;
        if let Some(msg) = &self.failure {
            return Err(SimError::EngineFailed(msg.clone()));
        }
        Ok(run)
    }

    /// Configuration of the run.
    pub fn config(&self) -> SimResult<&ScenarioConfig> {
        Ok(&self.inner()?.config)
    }

    /// Seconds from start to end.
    pub fn end_time(&self) -> SimResult<f64> {
        Ok(self.inner()?.end)
    }

    /// Basin ids in state-vector order.
    pub fn basin_ids(&self) -> SimResult<&[i32]> {
        Ok(self.inner()?.params.basin_ids())
    }

    /// Current storage per basin (m³).
    pub fn storage(&self) -> SimResult<&[f64]> {
        Ok(&self.inner()?.u)
    }

    /// Saved basin states, in time order.
    pub fn records(&self) -> SimResult<&[BasinRecord]> {
        Ok(&self.inner()?.records)
    }

    /// Allocation results of every forcing update.
    pub fn allocation_records(&self) -> SimResult<&[AllocationRecord]> {
        Ok(&self.inner()?.allocation_records)
    }

    /// Parameters currently in force.
    pub fn parameters(&self) -> SimResult<&ParameterVector> {
        Ok(&self.inner()?.params)
    }

    /// Snapshot of the parameters after every forcing update.
    pub fn parameter_history(&self) -> SimResult<&ForwardFill<ParameterVector>> {
        Ok(&self.inner()?.history)
    }

    /// Cumulative flux volumes.
    pub fn water_balance(&self) -> SimResult<&WaterBalance> {
        Ok(&self.inner()?.water_balance)
    }

    /// Per-basin water balance at the current time.
    pub fn balance_rows(&self) -> SimResult<Vec<BalanceRow>> {
        let run = self.inner()?;
        Ok(run.water_balance.rows(&run.u))
    }

    /// Conservation report at the current time.
    pub fn report(&self) -> SimResult<BalanceReport> {
        let run = self.inner()?;
        Ok(BalanceReport::from_balance(
            &run.water_balance,
            &run.u,
            run.above_curve.iter().filter(|&&b| b).count(),
            run.history.len(),
        ))
    }
}

/// Everything owned by an initialized engine.
#[derive(Debug)]
struct Run {
    config: ScenarioConfig,
    balance: BalanceModel,
    forcing: ForcingHistory,
    integrator: Integrator,
    /// Forcing-update instants.
    schedule: Schedule,
    /// `saveat` instants.
    saves: Schedule,
    /// Every instant a step must land on.
    tstops: Schedule,
    params: ParameterVector,
    history: ForwardFill<ParameterVector>,
    water_balance: WaterBalance,
    t: f64,
    end: f64,
    u: Vec<f64>,
    records: Vec<BasinRecord>,
    allocation_records: Vec<AllocationRecord>,
    above_curve: Vec<bool>,
    above_max_level: Vec<bool>,
}

impl Run {
    fn build(config: ScenarioConfig, inputs: ModelInputs) -> SimResult<Self> {
        let clock = Clock::new(config.starttime, config.endtime);
        let end = clock.end_seconds();
        let ModelInputs {
            basins: basin_rows,
            edges,
            curves: curve_rows,
            forcing: forcing_rows,
            users,
            demands,
        } = inputs;

        let mut errors: Vec<ConfigError> = Vec::new();
        if basin_rows.is_empty() {
            errors.push(ConfigError {
                field: "basin".into(),
                message: "at least one basin is required".into(),
            });
        }
        let mut seen = HashSet::new();
        for row in &basin_rows {
            if !seen.insert(row.id) {
                errors.push(ConfigError {
                    field: "basin.id".into(),
                    message: format!("duplicate basin id {}", row.id),
                });
            }
        }
        if !errors.is_empty() {
            return Err(SimError::Configuration(errors));
        }
        let basin_ids: Vec<i32> = basin_rows.iter().map(|b| b.id).collect();

        let mut samples: BTreeMap<i32, Vec<CurveSample>> = BTreeMap::new();
        for row in &curve_rows {
            if !seen.contains(&row.basin_id) {
                errors.push(ConfigError {
                    field: "curve.basin_id".into(),
                    message: format!("curve rows for unknown basin {}", row.basin_id),
                });
                continue;
            }
            samples
                .entry(row.basin_id)
                .or_default()
                .push(CurveSample::new(row.volume, row.area, row.discharge, row.level));
        }

        let mut curves = Vec::with_capacity(basin_rows.len());
        let mut basins = Vec::with_capacity(basin_rows.len());
        for row in &basin_rows {
            let Some(rows) = samples.get(&row.id) else {
                errors.push(ConfigError {
                    field: "curve".into(),
                    message: format!("basin {} has no curve", row.id),
                });
                continue;
            };
            let curve = CurveTable::build(rows).map_err(|e| match e {
                SimError::InvalidCurve(msg) => {
                    SimError::InvalidCurve(format!("basin {}: {msg}", row.id))
                }
                other => other,
            })?;

            if !(row.storage.is_finite() && row.storage >= 0.0) {
                errors.push(ConfigError {
                    field: format!("basin.{}.storage", row.id),
                    message: format!("must be a finite number >= 0, got {}", row.storage),
                });
            }
            let target_volume = match row.kind {
                BasinKind::FreeFlow => row.target_volume,
                BasinKind::Controlled => {
                    let target = row
                        .target_volume
                        .or_else(|| row.target_level.map(|h| curve.volume_at_level(h)));
                    if target.is_none_or(|v| !v.is_finite() || v < 0.0) {
                        errors.push(ConfigError {
                            field: format!("basin.{}.target_volume", row.id),
                            message: "controlled basin needs a target_volume >= 0 or target_level"
                                .into(),
                        });
                    }
                    target
                }
            };
            basins.push(Basin {
                id: row.id,
                kind: row.kind,
                initial_storage: row.storage,
                target_volume,
                max_level: row.max_level,
                depth: row.depth,
            });
            curves.push(curve);
        }

        let mut params = ParameterVector::new(basin_ids.clone());
        let mut user_keys = HashSet::new();
        for user in &users {
            match basin_rows.iter().find(|b| b.id == user.basin_id) {
                None => errors.push(ConfigError {
                    field: "user.basin_id".into(),
                    message: format!("user \"{}\" on unknown basin {}", user.user, user.basin_id),
                }),
                Some(b) if b.kind == BasinKind::Controlled => errors.push(ConfigError {
                    field: "user.basin_id".into(),
                    message: format!(
                        "user \"{}\" on controlled basin {}: users need a free-flow basin",
                        user.user, user.basin_id
                    ),
                }),
                Some(_) => {
                    if user_keys.insert((user.basin_id, user.user.clone())) {
                        params.add_user(user.basin_id, &user.user, user.priority);
                    } else {
                        errors.push(ConfigError {
                            field: "user.user".into(),
                            message: format!(
                                "duplicate user \"{}\" on basin {}",
                                user.user, user.basin_id
                            ),
                        });
                    }
                }
            }
        }
        for row in &demands {
            if !user_keys.contains(&(row.basin_id, row.user.clone())) {
                errors.push(ConfigError {
                    field: "demand.user".into(),
                    message: format!("demand for unknown user \"{}\" on basin {}", row.user, row.basin_id),
                });
            }
            if !(row.demand.is_finite() && row.demand >= 0.0) {
                errors.push(ConfigError {
                    field: "demand.demand".into(),
                    message: format!("must be a finite number >= 0, got {}", row.demand),
                });
            }
        }
        for row in &forcing_rows {
            if !seen.contains(&row.basin_id) {
                errors.push(ConfigError {
                    field: "forcing.basin_id".into(),
                    message: format!("forcing for unknown basin {}", row.basin_id),
                });
            }
            if !row.value.is_finite() {
                errors.push(ConfigError {
                    field: "forcing.value".into(),
                    message: format!(
                        "non-finite {} for basin {} at {}",
                        row.variable, row.basin_id, row.time
                    ),
                });
            }
        }
        if !errors.is_empty() {
            return Err(SimError::Configuration(errors));
        }

        let network = Network::build(&edges, &basin_ids)?;

        let mut forcing = ForcingHistory::new();
        let mut forcing_rows = forcing_rows;
        forcing_rows.sort_by_key(|r| r.time);
        for row in &forcing_rows {
            forcing.record(row.basin_id, row.variable, clock.seconds(row.time), row.value)?;
        }
        let mut demands = demands;
        demands.sort_by_key(|r| r.time);
        for row in &demands {
            forcing.record_demand(row.basin_id, &row.user, clock.seconds(row.time), row.demand)?;
        }

        let schedule =
            Schedule::forcing_updates(config.update_timestep, end, &forcing.timestamps());
        let saves = Schedule::from_times(config.saveat.clone());
        let mut stops: Vec<f64> = schedule.times().to_vec();
        stops.extend(saves.times());
        stops.extend(clock.month_starts());
        stops.push(end);
        let tstops = Schedule::from_times(stops);

        let integrator = Integrator::from_config(&config.solver)?;
        let u: Vec<f64> = basins.iter().map(|b| b.initial_storage).collect();
        let n = basins.len();
        let balance = BalanceModel::new(
            basins,
            curves,
            network,
            config.evaporation.open_water_factor,
            clock,
        );

        let mut run = Self {
            water_balance: WaterBalance::new(basin_ids, u.clone()),
            config,
            balance,
            forcing,
            integrator,
            schedule,
            saves,
            tstops,
            params,
            history: ForwardFill::new(),
            t: 0.0,
            end,
            u,
            records: Vec::new(),
            allocation_records: Vec::new(),
            above_curve: vec![false; n],
            above_max_level: vec![false; n],
        };
        run.check_ranges();
        if run.schedule.is_due(0.0) {
            run.schedule.tick();
            run.forcing_update(0.0, false)?;
        }
        run.save();
        if run.saves.is_due(0.0) {
            run.saves.tick();
        }
        Ok(run)
    }

    /// One accepted solver step toward `limit`, then the callbacks due at
    /// the new time.
    fn step(&mut self, limit: f64) -> SimResult<()> {
        let t_stop = self
            .tstops
            .next_after(self.t)
            .map_or(limit, |s| s.min(limit))
            .min(self.end);

        let t_new = self.integrator.step(
            &self.balance.with_params(&self.params, self.t),
            self.t,
            &mut self.u,
            t_stop,
        )?;
        self.water_balance
            .accumulate(&self.balance, &self.params, self.integrator.last_stages());
        self.t = if (self.end - t_new).abs() <= TIME_EPS {
            self.end
        } else {
            t_new
        };
        self.check_ranges();

        if self.schedule.is_due(self.t) {
            self.schedule.tick();
            self.forcing_update(self.t, true)?;
        }
        let mut saveat_due = false;
        while self.saves.is_due(self.t) {
            self.saves.tick();
            saveat_due = true;
        }
        let at_end = self.t >= self.end;
        if (saveat_due || at_end) && !self.saved_at(self.t) {
            self.save();
        }
        Ok(())
    }

    /// Refreshes the parameter vector at `t` and records it.
    ///
    /// `save_around` enables the `save_positions` records; the initial
    /// update at the start time is recorded by the caller instead.
    fn forcing_update(&mut self, t: f64, save_around: bool) -> SimResult<()> {
        if save_around && self.config.save_positions.0 {
            self.save();
        }
        let interval = self.schedule.peek().unwrap_or(self.end) - t;

        for i in 0..self.balance.len() {
            let id = self.balance.basin(i).id;
            for variable in ForcingVariable::ALL {
                let value = self.forcing.value(id, variable, t)?;
                self.params.set(i, BasinField::from(variable), value);
            }
            let discharge = match self.balance.basin(i).kind {
                BasinKind::FreeFlow => self.balance.curve(i).lookup_discharge(self.u[i]).max(0.0),
                BasinKind::Controlled => 0.0,
            };
            self.params.set(i, BasinField::Discharge, discharge);
        }

        for i in 0..self.balance.len() {
            let basin = self.balance.basin(i);
            if basin.kind == BasinKind::FreeFlow {
                self.allocate_users(i, t)?;
            }
        }

        // Upstream releases first: they are inflow to the basins below.
        let open_water = self.balance.open_water_factor(t);
        for &i in self.balance.network().upstream_first() {
            let basin = self.balance.basin(i);
            let (BasinKind::Controlled, Some(target)) = (basin.kind, basin.target_volume) else {
                continue;
            };
            self.params.set(i, BasinField::ManagedRelease, 0.0);
            let outflows = self.balance.outflows(&self.u, &self.params);
            let net = self
                .balance
                .fluxes(i, open_water, &self.u, &outflows, &self.params)
                .net();
            let projected = net * interval;
            let release = -(self.u[i] + projected - target) / interval;
            self.params.set(i, BasinField::ManagedRelease, release);
        }

        self.history.record(t, self.params.clone())?;
        debug!(
            "forcing update {} at t={t}s ({}), next interval {interval}s",
            self.history.len(),
            self.balance.clock().datetime(t)
        );
        if save_around && self.config.save_positions.1 {
            self.save();
        }
        Ok(())
    }

    /// Splits the available water of free-flow basin `i` between its users.
    fn allocate_users(&mut self, i: usize, t: f64) -> SimResult<()> {
        let id = self.balance.basin(i).id;
        let mut requests = Vec::new();
        for user in self.params.users_of(id) {
            let demand = self.forcing.demand(id, &user.user, t)?;
            requests.push(AllocationRequest::new(user.user.clone(), user.priority, demand));
        }
        if requests.is_empty() {
            self.params.set(i, BasinField::Abstraction, 0.0);
            return Ok(());
        }

        let granted: Vec<f64> = if self.config.allocation.use_allocation {
            let p = self.params.basin(i);
            let available = available_supply(
                p.precipitation,
                p.evaporation,
                self.balance.area(i, self.u[i]),
                p.drainage,
                p.infiltration,
                p.urban_runoff,
            );
            allocate(available, &requests)
                .into_iter()
                .map(|r| r.allocated)
                .collect()
        } else {
            requests.iter().map(|r| r.demand).collect()
        };

        let datetime = self.balance.clock().datetime(t);
        for ((user, request), allocated) in self.params.users_of_mut(id).zip(&requests).zip(&granted)
        {
            user.demand = request.demand;
            user.allocated = *allocated;
            self.allocation_records.push(AllocationRecord {
                time: t,
                datetime,
                basin_id: id,
                user: user.user.clone(),
                priority: user.priority,
                demand: request.demand,
                allocated: *allocated,
            });
        }
        self.params
            .set(i, BasinField::Abstraction, granted.iter().sum());
        Ok(())
    }

    fn saved_at(&self, t: f64) -> bool {
        self.records
            .last()
            .is_some_and(|r| (r.time - t).abs() <= TIME_EPS)
    }

    /// Appends one record per basin at the current time.
    fn save(&mut self) {
        let datetime = self.balance.clock().datetime(self.t);
        for i in 0..self.balance.len() {
            let storage = self.u[i];
            self.records.push(BasinRecord {
                time: self.t,
                datetime,
                basin_id: self.balance.basin(i).id,
                storage,
                level: self.balance.level(i, storage),
                area: self.balance.area(i, storage),
                discharge: self.balance.outflow(i, storage, self.params.basin(i)),
            });
        }
    }

    /// Warns once per basin when storage leaves the calibrated range.
    fn check_ranges(&mut self) {
        for i in 0..self.balance.len() {
            let basin = self.balance.basin(i);
            let curve = self.balance.curve(i);
            let storage = self.u[i];
            if !self.above_curve[i] && storage > curve.max_volume() {
                self.above_curve[i] = true;
                warn!(
                    "basin {} storage {storage:.1} m³ exceeds its curve range ({:.1} m³) at t={}s; extrapolating",
                    basin.id,
                    curve.max_volume(),
                    self.t
                );
            }
            if let Some(max_level) = basin.max_level {
                let level = curve.lookup_level(storage);
                if !self.above_max_level[i] && level > max_level {
                    self.above_max_level[i] = true;
                    warn!(
                        "basin {} level {level:.3} m exceeds max_level {max_level:.3} m at t={}s",
                        basin.id, self.t
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::network::Edge;
    use crate::sim::types::{BasinRow, CurveRow, DemandRow, ForcingRow, UserRow};
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    fn config(days: i64) -> ScenarioConfig {
        let mut cfg = ScenarioConfig::new(start(), start() + TimeDelta::days(days));
        cfg.solver.algorithm = "rk4".into();
        cfg.solver.dt = 86_400.0;
        cfg
    }

    fn curve_rows(basin_id: i32) -> Vec<CurveRow> {
        [
            CurveSample::new(0.0, 0.0, 0.0, 0.0),
            CurveSample::new(2e6, 1e6, 20.0, 2.0),
        ]
        .into_iter()
        .map(|s| CurveRow {
            basin_id,
            volume: s.volume,
            area: s.area,
            discharge: s.discharge,
            level: s.level,
        })
        .collect()
    }

    fn single_basin() -> ModelInputs {
        ModelInputs {
            basins: vec![BasinRow::free_flow(1, 1e6)],
            curves: curve_rows(1),
            ..ModelInputs::default()
        }
    }

    #[test]
    fn lifecycle_states() {
        let mut engine = Engine::new();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(matches!(
            engine.get_current_time(),
            Err(SimError::NotInitialized)
        ));
        assert!(matches!(engine.update(), Err(SimError::NotInitialized)));

        engine.initialize(config(2), single_basin()).unwrap();
        assert_eq!(engine.state(), EngineState::Initialized);
        assert!(matches!(
            engine.initialize(config(2), single_basin()),
            Err(SimError::AlreadyInitialized)
        ));

        engine.update().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        engine.run_to_completion().unwrap();
        assert_eq!(engine.state(), EngineState::Completed);
        engine.update().unwrap();
        assert_eq!(engine.get_current_time().unwrap(), 2.0 * 86_400.0);
    }

    #[test]
    fn single_basin_drains_by_curve_discharge() {
        let mut engine = Engine::new();
        engine.initialize(config(1), single_basin()).unwrap();
        engine.update().unwrap();
        assert_eq!(engine.get_current_time().unwrap(), 86_400.0);
        // 1e6 m³ sits halfway up the curve: 10 m³/s
        let expected = 1e6 - 10.0 * 86_400.0;
        assert!((engine.storage().unwrap()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn update_until_rejects_past_and_beyond_end() {
        let mut engine = Engine::new();
        engine.initialize(config(2), single_basin()).unwrap();
        engine.update_until(43_200.0).unwrap();
        let storage = engine.storage().unwrap().to_vec();

        let err = engine.update_until(100.0).unwrap_err();
        assert!(matches!(err, SimError::PastTime { .. }));
        assert_eq!(engine.get_current_time().unwrap(), 43_200.0);
        assert_eq!(engine.storage().unwrap(), storage.as_slice());

        assert!(matches!(
            engine.update_until(1e9),
            Err(SimError::BeyondEndTime { .. })
        ));
        engine.update_until(43_200.0).unwrap();
        assert_eq!(engine.get_current_time().unwrap(), 43_200.0);
    }

    #[test]
    fn parameter_history_grows_once_per_update() {
        let mut engine = Engine::new();
        engine.initialize(config(3), single_basin()).unwrap();
        engine.run_to_completion().unwrap();
        let history = engine.parameter_history().unwrap();
        assert_eq!(history.times(), &[0.0, 86_400.0, 172_800.0]);
        let first = history.query(1_000.0).unwrap();
        assert!((first.basin(0).discharge - 10.0).abs() < 1e-9);
    }

    #[test]
    fn records_follow_save_positions() {
        let mut cfg = config(2);
        cfg.save_positions = (true, true);
        cfg.saveat = vec![3_600.0];
        let mut engine = Engine::new();
        engine.initialize(cfg, single_basin()).unwrap();
        engine.run_to_completion().unwrap();
        let times: Vec<f64> = engine.records().unwrap().iter().map(|r| r.time).collect();
        assert_eq!(times, vec![0.0, 3_600.0, 86_400.0, 86_400.0, 172_800.0]);
    }

    #[test]
    fn forcing_before_start_is_required() {
        let mut inputs = single_basin();
        inputs.forcing.push(ForcingRow {
            time: start() + TimeDelta::hours(6),
            basin_id: 1,
            variable: ForcingVariable::Precipitation,
            value: 1e-8,
        });
        let mut engine = Engine::new();
        let err = engine.initialize(config(1), inputs).unwrap_err();
        assert!(matches!(err, SimError::NoData { .. }));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn invalid_tables_are_configuration_errors() {
        let mut inputs = single_basin();
        inputs.basins.push(BasinRow::controlled(2, 0.0, 1.0));
        inputs.edges.push(Edge {
            from: 1,
            to: 3,
            fraction: 1.0,
        });
        let err = Engine::new().initialize(config(1), inputs).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("basin 2 has no curve"), "{msg}");
    }

    #[test]
    fn controlled_basin_reaches_target() {
        let mut inputs = ModelInputs {
            basins: vec![BasinRow::controlled(1, 1e6, 8e5)],
            curves: curve_rows(1),
            ..ModelInputs::default()
        };
        inputs.forcing.push(ForcingRow {
            time: start(),
            basin_id: 1,
            variable: ForcingVariable::Upstream,
            value: 1.0,
        });
        let mut engine = Engine::new();
        engine.initialize(config(1), inputs).unwrap();
        engine.run_to_completion().unwrap();
        assert!((engine.storage().unwrap()[0] - 8e5).abs() < 1e-3);
        let release = engine.parameters().unwrap().basin(0).managed_release;
        assert!(release < 0.0);
    }

    fn chained_controlled(upstream_row_first: bool) -> ModelInputs {
        let mut basins = vec![
            BasinRow::controlled(1, 4e5, 4e5),
            BasinRow::controlled(2, 4.5e5, 5e5),
        ];
        if !upstream_row_first {
            basins.reverse();
        }
        ModelInputs {
            basins,
            edges: vec![Edge {
                from: 1,
                to: 2,
                fraction: 1.0,
            }],
            curves: [curve_rows(1), curve_rows(2)].concat(),
            forcing: vec![ForcingRow {
                time: start(),
                basin_id: 1,
                variable: ForcingVariable::Upstream,
                value: 1.0,
            }],
            ..ModelInputs::default()
        }
    }

    #[test]
    fn chained_controlled_basins_reach_targets_in_any_row_order() {
        for upstream_row_first in [true, false] {
            let mut engine = Engine::new();
            engine
                .initialize(config(1), chained_controlled(upstream_row_first))
                .unwrap();
            engine.run_to_completion().unwrap();
            let ids = engine.basin_ids().unwrap().to_vec();
            let storage = engine.storage().unwrap();
            let of = |id: i32| storage[ids.iter().position(|&b| b == id).unwrap()];
            assert!((of(1) - 4e5).abs() < 1e-6, "order {upstream_row_first}: {}", of(1));
            assert!((of(2) - 5e5).abs() < 1e-6, "order {upstream_row_first}: {}", of(2));
        }
    }

    #[test]
    fn routing_cycle_is_configuration_error() {
        let mut inputs = chained_controlled(true);
        inputs.edges.push(Edge {
            from: 2,
            to: 1,
            fraction: 1.0,
        });
        let err = Engine::new().initialize(config(1), inputs).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
        assert!(err.to_string().contains("routing cycle"));
    }

    #[test]
    fn month_end_step_keeps_its_evaporation_factor() {
        let jan31 = NaiveDate::from_ymd_opt(2020, 1, 31)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let mut cfg = ScenarioConfig::new(jan31, jan31 + TimeDelta::days(2));
        cfg.solver.algorithm = "rk4".into();
        cfg.solver.dt = 86_400.0;
        cfg.evaporation.open_water_factor = [1.0; 12];
        cfg.evaporation.open_water_factor[1] = 0.0;

        // constant area and no discharge: only evaporation moves storage
        let curves = [(0.0, 0.0), (2e6, 2.0)]
            .into_iter()
            .map(|(volume, level)| CurveRow {
                basin_id: 1,
                volume,
                area: 1e6,
                discharge: 0.0,
                level,
            })
            .collect();
        let inputs = ModelInputs {
            basins: vec![BasinRow::free_flow(1, 1e6)],
            curves,
            forcing: vec![ForcingRow {
                time: jan31,
                basin_id: 1,
                variable: ForcingVariable::Evaporation,
                value: 1e-3 / 86_400.0,
            }],
            ..ModelInputs::default()
        };

        let mut engine = Engine::new();
        engine.initialize(cfg, inputs).unwrap();
        engine.update().unwrap();
        assert_eq!(engine.get_current_time().unwrap(), 86_400.0);
        // 1 mm over 1 km² for the whole of Jan 31
        assert!((engine.storage().unwrap()[0] - (1e6 - 1_000.0)).abs() < 1e-6);
        let rows = engine.balance_rows().unwrap();
        assert!((rows[0].evaporation - 1_000.0).abs() < 1e-6);

        // February evaporates nothing
        engine.run_to_completion().unwrap();
        assert!((engine.storage().unwrap()[0] - (1e6 - 1_000.0)).abs() < 1e-6);
    }

    #[test]
    fn user_on_controlled_basin_is_rejected() {
        let mut inputs = ModelInputs {
            basins: vec![BasinRow::controlled(1, 1e6, 8e5)],
            curves: curve_rows(1),
            ..ModelInputs::default()
        };
        inputs.users.push(UserRow {
            basin_id: 1,
            user: "city".into(),
            priority: 1,
        });
        let mut engine = Engine::new();
        let err = engine.initialize(config(1), inputs).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, SimError::Configuration(_)));
        assert!(msg.contains("users need a free-flow basin"), "{msg}");
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn duplicate_forcing_timestamp_is_rejected() {
        let mut inputs = single_basin();
        for value in [1e-8, 2e-8] {
            inputs.forcing.push(ForcingRow {
                time: start(),
                basin_id: 1,
                variable: ForcingVariable::Precipitation,
                value,
            });
        }
        let mut engine = Engine::new();
        let err = engine.initialize(config(1), inputs).unwrap_err();
        assert!(matches!(err, SimError::NonMonotonicTime { .. }), "{err}");
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn storage_above_curve_is_counted_in_report() {
        let mut inputs = single_basin();
        inputs.basins[0].storage = 1.9e6;
        inputs.forcing.push(ForcingRow {
            time: start(),
            basin_id: 1,
            variable: ForcingVariable::Upstream,
            value: 50.0,
        });
        let mut engine = Engine::new();
        engine.initialize(config(1), inputs).unwrap();
        assert_eq!(engine.report().unwrap().basins_above_curve, 0);
        engine.run_to_completion().unwrap();
        assert!(engine.storage().unwrap()[0] > 2e6);
        assert_eq!(engine.report().unwrap().basins_above_curve, 1);
    }

    #[test]
    fn users_share_available_water() {
        let mut inputs = single_basin();
        inputs.forcing.push(ForcingRow {
            time: start(),
            basin_id: 1,
            variable: ForcingVariable::Drainage,
            value: 12.0,
        });
        for (user, priority, demand) in [("city", 1, 10.0), ("farm", 2, 15.0)] {
            inputs.users.push(UserRow {
                basin_id: 1,
                user: user.into(),
                priority,
            });
            inputs.demands.push(DemandRow {
                time: start(),
                basin_id: 1,
                user: user.into(),
                demand,
            });
        }
        let mut engine = Engine::new();
        engine.initialize(config(1), inputs).unwrap();
        let allocated: Vec<f64> = engine
            .allocation_records()
            .unwrap()
            .iter()
            .map(|r| r.allocated)
            .collect();
        assert_eq!(allocated, vec![10.0, 2.0]);
        assert_eq!(engine.parameters().unwrap().basin(0).abstraction, 12.0);
    }

    #[test]
    fn integration_failure_moves_to_failed() {
        let mut cfg = config(1);
        cfg.solver.maxiters = 1;
        cfg.update_timestep = 3_600.0;
        let mut engine = Engine::new();
        engine.initialize(cfg, single_basin()).unwrap();
        engine.update().unwrap();
        let err = engine.update().unwrap_err();
        assert!(matches!(err, SimError::Integration { .. }));
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(matches!(engine.update(), Err(SimError::EngineFailed(_))));
        // results recorded so far stay readable
        assert!(!engine.records().unwrap().is_empty());
        assert!(engine.get_current_time().is_ok());
    }
}
