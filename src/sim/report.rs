//! Post-hoc conservation report computed from the water balance.

use std::fmt;

use serde::Serialize;

use super::bookkeeping::WaterBalance;

/// Aggregate mass-balance figures of a run.
///
/// Computed from the cumulative flux volumes so that the report and the
/// exported per-basin balance always agree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceReport {
    /// Number of basins.
    pub basins: usize,
    /// Total storage at the start (m³).
    pub initial_storage: f64,
    /// Total storage now (m³).
    pub final_storage: f64,
    /// Water entering basins from outside the network (m³).
    pub external_inflow: f64,
    /// Water leaving basins other than by routing (m³).
    pub external_outflow: f64,
    /// Water routed between basins (m³).
    pub routed: f64,
    /// Total volume granted to users (m³).
    pub abstraction: f64,
    /// Largest per-basin balance error (m³, absolute).
    pub max_abs_error: f64,
    /// Sum of absolute per-basin balance errors over total throughput.
    pub relative_error: f64,
    /// Basins whose storage exceeded the calibrated curve range.
    pub basins_above_curve: usize,
    /// Accepted solver steps.
    pub steps: usize,
    /// Forcing updates applied.
    pub forcing_updates: usize,
}

impl BalanceReport {
    /// Builds the report from the balance and the current storages.
    ///
    /// # Arguments
    ///
    /// * `balance` - Cumulative flux volumes
    /// * `storage` - Current storage per basin, in balance order
    /// * `basins_above_curve` - Basins flagged for leaving their curve's range
    /// * `forcing_updates` - Number of forcing updates applied
    pub fn from_balance(
        balance: &WaterBalance,
        storage: &[f64],
        basins_above_curve: usize,
        forcing_updates: usize,
    ) -> Self {
        let mut report = Self {
            basins: balance.len(),
            basins_above_curve,
            steps: balance.steps(),
            forcing_updates,
            ..Self::default()
        };

        let mut abs_error_sum = 0.0;
        let mut throughput = 0.0;
        for (i, &s) in storage.iter().enumerate().take(balance.len()) {
            let v = balance.volumes(i);
            report.initial_storage += balance.initial_storage(i);
            report.final_storage += s;
            report.external_inflow += v.gains() - v.inflow;
            report.routed += v.inflow;
            report.abstraction += v.abstraction;
            // routed water leaves as outflow; count only what leaves the network
            report.external_outflow += v.losses();

            let err = balance.balance_error(i, s).abs();
            abs_error_sum += err;
            report.max_abs_error = report.max_abs_error.max(err);
            throughput += v.gains() + v.losses();
        }
        report.external_outflow -= report.routed;

        report.relative_error = if throughput > 0.0 {
            abs_error_sum / throughput
        } else {
            0.0
        };
        report
    }

    /// `final − initial − (in − out)` over the whole network (m³).
    pub fn network_error(&self) -> f64 {
        self.final_storage - self.initial_storage - (self.external_inflow - self.external_outflow)
    }
}

impl fmt::Display for BalanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Water Balance Report ---")?;
        writeln!(f, "Basins:                {}", self.basins)?;
        writeln!(f, "Initial storage:       {:.2} m³", self.initial_storage)?;
        writeln!(f, "Final storage:         {:.2} m³", self.final_storage)?;
        writeln!(f, "External inflow:       {:.2} m³", self.external_inflow)?;
        writeln!(f, "External outflow:      {:.2} m³", self.external_outflow)?;
        writeln!(f, "Routed between basins: {:.2} m³", self.routed)?;
        writeln!(f, "Abstracted by users:   {:.2} m³", self.abstraction)?;
        writeln!(
            f,
            "Balance error:         {:.3e} m³ max ({:.3e} relative)",
            self.max_abs_error, self.relative_error
        )?;
        writeln!(f, "Above curve range:     {}", self.basins_above_curve)?;
        write!(
            f,
            "Solver steps:          {} ({} forcing updates)",
            self.steps, self.forcing_updates
        )
    }
}
