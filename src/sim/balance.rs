//! Basin mass balance: flux terms and the ODE right-hand side.
//!
//! For a free-flow basin `i`:
//!
//! ```text
//! dS/dt = A(S)·(P − E·f_ow(t)) + drainage − infiltration − urban_runoff
//!         + upstream + Σ_j fraction(j→i)·outflow_j − discharge − abstraction
//! ```
//!
//! A controlled basin swaps the curve discharge for the signed managed flux
//! and reads its area through the level axis of its curve. Loss terms are
//! scaled down linearly when storage drops below [`LOW_STORAGE_THRESHOLD`] so
//! that storage cannot be drained below zero.

use super::clock::Clock;
use super::curve::CurveTable;
use super::integrator::RhsComputer;
use super::network::Network;
use super::params::{BasinParameters, ParameterVector};
use super::types::{Basin, BasinKind};

/// Storage (m³) below which losses are reduced proportionally.
pub const LOW_STORAGE_THRESHOLD: f64 = 10.0;

/// Flux terms of one basin (m³/s), every term non-negative.
///
/// Also used as cumulative volumes (m³) by the water balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct BasinFluxes {
    pub precipitation: f64,
    pub evaporation: f64,
    pub drainage: f64,
    pub infiltration: f64,
    pub urban_runoff: f64,
    pub upstream: f64,
    /// Water routed in from upstream basins.
    pub inflow: f64,
    /// Curve discharge or managed release leaving the basin.
    pub outflow: f64,
    /// Positive part of the managed flux.
    pub managed_supply: f64,
    pub abstraction: f64,
}

impl BasinFluxes {
    /// Sum of inflow terms.
    pub fn gains(&self) -> f64 {
        self.precipitation + self.drainage + self.upstream + self.inflow + self.managed_supply
    }

    /// Sum of outflow terms.
    pub fn losses(&self) -> f64 {
        self.evaporation + self.infiltration + self.urban_runoff + self.outflow + self.abstraction
    }

    /// Net storage change rate.
    pub fn net(&self) -> f64 {
        self.gains() - self.losses()
    }

    /// `self += w · other`, term by term.
    pub fn add_scaled(&mut self, other: &BasinFluxes, w: f64) {
        self.precipitation += w * other.precipitation;
        self.evaporation += w * other.evaporation;
        self.drainage += w * other.drainage;
        self.infiltration += w * other.infiltration;
        self.urban_runoff += w * other.urban_runoff;
        self.upstream += w * other.upstream;
        self.inflow += w * other.inflow;
        self.outflow += w * other.outflow;
        self.managed_supply += w * other.managed_supply;
        self.abstraction += w * other.abstraction;
    }
}

/// Scale on loss terms at low storage, in `[0, 1]`.
pub fn reduction_factor(storage: f64) -> f64 {
    (storage / LOW_STORAGE_THRESHOLD).clamp(0.0, 1.0)
}

/// Static structure of the basin network: basins, their curves and edges.
///
/// Holds no time-varying state. Every evaluation takes the storages and the
/// parameter vector explicitly.
#[derive(Debug, Clone)]
pub struct BalanceModel {
    basins: Vec<Basin>,
    curves: Vec<CurveTable>,
    network: Network,
    open_water_factor: [f64; 12],
    clock: Clock,
}

impl BalanceModel {
    /// Assembles a model; `curves[i]` and network index `i` belong to `basins[i]`.
    pub fn new(
        basins: Vec<Basin>,
        curves: Vec<CurveTable>,
        network: Network,
        open_water_factor: [f64; 12],
        clock: Clock,
    ) -> Self {
        Self {
            basins,
            curves,
            network,
            open_water_factor,
            clock,
        }
    }

    /// Number of basins.
    pub fn len(&self) -> usize {
        self.basins.len()
    }

    /// Returns `true` if the model has no basins.
    pub fn is_empty(&self) -> bool {
        self.basins.is_empty()
    }

    /// Static properties of basin `i`.
    pub fn basin(&self, i: usize) -> &Basin {
        &self.basins[i]
    }

    /// Storage curve of basin `i`.
    pub fn curve(&self, i: usize) -> &CurveTable {
        &self.curves[i]
    }

    /// Routing network between the basins.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Calendar of the run.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Open-water evaporation factor of the month containing `t`.
    ///
    /// Steps never cross a month start, so the factor at a step's start
    /// holds over the whole step.
    pub fn open_water_factor(&self, t: f64) -> f64 {
        self.open_water_factor[self.clock.month_index(t)]
    }

    /// Surface area of basin `i` at `storage`.
    pub fn area(&self, i: usize, storage: f64) -> f64 {
        let curve = &self.curves[i];
        match self.basins[i].kind {
            BasinKind::FreeFlow => curve.lookup_area(storage),
            BasinKind::Controlled => curve.lookup_area_at_level(curve.lookup_level(storage)),
        }
        .max(0.0)
    }

    /// Water level of basin `i` at `storage`.
    pub fn level(&self, i: usize, storage: f64) -> f64 {
        self.curves[i].lookup_level(storage)
    }

    /// Water leaving basin `i` downstream (m³/s).
    pub fn outflow(&self, i: usize, storage: f64, params: &BasinParameters) -> f64 {
        let q = match self.basins[i].kind {
            BasinKind::FreeFlow => params.discharge,
            BasinKind::Controlled => (-params.managed_release).max(0.0),
        };
        q.max(0.0) * reduction_factor(storage)
    }

    /// Outflow of every basin.
    pub fn outflows(&self, u: &[f64], params: &ParameterVector) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.outflow(i, u[i], params.basin(i)))
            .collect()
    }

    /// Flux breakdown of basin `i` under the open-water factor `open_water`.
    ///
    /// `outflows` must come from [`BalanceModel::outflows`] for the same
    /// state and parameters.
    pub fn fluxes(
        &self,
        i: usize,
        open_water: f64,
        u: &[f64],
        outflows: &[f64],
        params: &ParameterVector,
    ) -> BasinFluxes {
        let storage = u[i];
        let p = params.basin(i);
        let area = self.area(i, storage);
        let factor = reduction_factor(storage);
        let managed_supply = match self.basins[i].kind {
            BasinKind::Controlled => p.managed_release.max(0.0),
            BasinKind::FreeFlow => 0.0,
        };

        BasinFluxes {
            precipitation: area * p.precipitation.max(0.0),
            evaporation: area * p.evaporation.max(0.0) * open_water * factor,
            drainage: p.drainage.max(0.0),
            infiltration: p.infiltration.max(0.0) * factor,
            urban_runoff: p.urban_runoff.max(0.0) * factor,
            upstream: p.upstream.max(0.0),
            inflow: self.network.routed_inflow(i, outflows),
            outflow: outflows[i],
            managed_supply,
            abstraction: p.abstraction.max(0.0) * factor,
        }
    }

    /// Flux breakdown of every basin.
    pub fn all_fluxes(
        &self,
        open_water: f64,
        u: &[f64],
        params: &ParameterVector,
    ) -> Vec<BasinFluxes> {
        let outflows = self.outflows(u, params);
        (0..self.len())
            .map(|i| self.fluxes(i, open_water, u, &outflows, params))
            .collect()
    }

    /// Storage derivatives. Reads `params`, writes only `du`.
    pub fn rhs(&self, open_water: f64, u: &[f64], params: &ParameterVector, du: &mut [f64]) {
        let outflows = self.outflows(u, params);
        for (i, d) in du.iter_mut().enumerate() {
            *d = self.fluxes(i, open_water, u, &outflows, params).net();
        }
    }

    /// Binds a parameter vector for a step starting at `t_start`, giving the
    /// integrator its right-hand side.
    ///
    /// The open-water factor is fixed at `t_start`: a stage evaluated exactly
    /// on the next month start still belongs to the current step.
    pub fn with_params<'a>(&'a self, params: &'a ParameterVector, t_start: f64) -> BoundRhs<'a> {
        BoundRhs {
            model: self,
            params,
            open_water: self.open_water_factor(t_start),
        }
    }
}

/// A [`BalanceModel`] paired with the parameters and open-water factor held
/// over the current step.
pub struct BoundRhs<'a> {
    model: &'a BalanceModel,
    params: &'a ParameterVector,
    open_water: f64,
}

impl RhsComputer for BoundRhs<'_> {
    fn dimension(&self) -> usize {
        self.model.len()
    }

    fn compute_rhs(&self, _t: f64, u: &[f64], du: &mut [f64]) {
        self.model.rhs(self.open_water, u, self.params, du);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::curve::CurveSample;
    use crate::sim::network::Edge;
    use crate::sim::params::BasinField;
    use chrono::NaiveDate;

    fn clock() -> Clock {
        let start = NaiveDate::from_ymd_opt(2021, 6, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        Clock::new(start, start + chrono::TimeDelta::days(10))
    }

    fn curve() -> CurveTable {
        CurveTable::build(&[
            CurveSample::new(0.0, 0.0, 0.0, 0.0),
            CurveSample::new(1_000.0, 100.0, 1.0, 1.0),
            CurveSample::new(3_000.0, 300.0, 3.0, 2.0),
        ])
        .unwrap()
    }

    fn basin(id: i32, kind: BasinKind) -> Basin {
        Basin {
            id,
            kind,
            initial_storage: 500.0,
            target_volume: None,
            max_level: None,
            depth: None,
        }
    }

    fn two_basin_model(kind_b: BasinKind) -> BalanceModel {
        let network = Network::build(
            &[Edge {
                from: 1,
                to: 2,
                fraction: 0.5,
            }],
            &[1, 2],
        )
        .unwrap();
        BalanceModel::new(
            vec![basin(1, BasinKind::FreeFlow), basin(2, kind_b)],
            vec![curve(), curve()],
            network,
            [1.0; 12],
            clock(),
        )
    }

    #[test]
    fn free_flow_rhs_combines_terms() {
        let model = two_basin_model(BasinKind::FreeFlow);
        let mut params = ParameterVector::new(vec![1, 2]);
        params.set(0, BasinField::Precipitation, 0.01);
        params.set(0, BasinField::Evaporation, 0.004);
        params.set(0, BasinField::Drainage, 2.0);
        params.set(0, BasinField::Infiltration, 0.5);
        params.set(0, BasinField::Upstream, 1.0);
        params.set(0, BasinField::Discharge, 2.0);
        params.set(0, BasinField::Abstraction, 0.25);

        let u = [1_000.0, 1_000.0];
        let mut du = [0.0; 2];
        model.rhs(1.0, &u, &params, &mut du);
        // 100·(0.01 − 0.004) + 2 − 0.5 + 1 − 2 − 0.25
        assert!((du[0] - 0.85).abs() < 1e-12);
        // half of basin 1's discharge arrives downstream
        assert!((du[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn controlled_basin_uses_signed_managed_flux() {
        let model = two_basin_model(BasinKind::Controlled);
        let mut params = ParameterVector::new(vec![1, 2]);
        params.set(1, BasinField::Discharge, 99.0);
        params.set(1, BasinField::ManagedRelease, -0.7);
        let f = model.all_fluxes(1.0, &[1_000.0, 1_000.0], &params);
        assert!((f[1].outflow - 0.7).abs() < 1e-12);
        assert_eq!(f[1].managed_supply, 0.0);

        params.set(1, BasinField::ManagedRelease, 0.3);
        let f = model.all_fluxes(1.0, &[1_000.0, 1_000.0], &params);
        assert_eq!(f[1].outflow, 0.0);
        assert!((f[1].net() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn controlled_area_follows_level_axis() {
        let model = two_basin_model(BasinKind::Controlled);
        assert!((model.area(1, 2_000.0) - 200.0).abs() < 1e-9);
        assert!((model.area(0, 2_000.0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn losses_vanish_at_empty_storage() {
        let model = two_basin_model(BasinKind::FreeFlow);
        let mut params = ParameterVector::new(vec![1, 2]);
        params.set(0, BasinField::Discharge, 5.0);
        params.set(0, BasinField::Infiltration, 5.0);
        let f = model.all_fluxes(1.0, &[0.0, 0.0], &params);
        assert_eq!(f[0].losses(), 0.0);
        let f = model.all_fluxes(1.0, &[5.0, 0.0], &params);
        assert!((f[0].outflow - 2.5).abs() < 1e-12);
    }

    #[test]
    fn evaporation_uses_monthly_factor() {
        let network = Network::build(&[], &[1]).unwrap();
        let mut factors = [1.0; 12];
        factors[5] = 2.0;
        let model = BalanceModel::new(
            vec![basin(1, BasinKind::FreeFlow)],
            vec![curve()],
            network,
            factors,
            clock(),
        );
        let mut params = ParameterVector::new(vec![1]);
        params.set(0, BasinField::Evaporation, 0.001);
        let f = model.all_fluxes(model.open_water_factor(0.0), &[1_000.0], &params);
        assert!((f[0].evaporation - 0.2).abs() < 1e-12);
    }

    #[test]
    fn rhs_leaves_params_untouched() {
        let model = two_basin_model(BasinKind::FreeFlow);
        let mut params = ParameterVector::new(vec![1, 2]);
        params.set(0, BasinField::Discharge, 1.0);
        let before = params.clone();
        let rhs = model.with_params(&params, 0.0);
        let mut du = [0.0; 2];
        rhs.compute_rhs(0.0, &[700.0, 10.0], &mut du);
        assert_eq!(rhs.dimension(), 2);
        assert_eq!(params, before);
    }
}
