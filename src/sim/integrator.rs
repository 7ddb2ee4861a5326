//! Explicit Runge-Kutta integrators for the storage ODE.
//!
//! Two schemes are available:
//!
//! - `rk4`: classical fourth-order Runge-Kutta with a fixed step.
//! - `bs3`: Bogacki-Shampine 3(2) with embedded error estimate and
//!   adaptive step size.
//!
//! ```text
//! BS3 tableau
//!   0   |
//!  1/2  | 1/2
//!  3/4  | 0    3/4
//!   1   | 2/9  1/3  4/9
//! ------+---------------------
//!       | 2/9  1/3  4/9  0       (3rd order)
//!       | 7/24 1/4  1/3  1/8     (2nd order)
//! ```
//!
//! Every accepted step keeps its stages with their quadrature weights, so the
//! caller can integrate any quantity that is linear in the right-hand side
//! (the per-term water balance) consistently with the state update.

use crate::config::SolverConfig;
use crate::error::{SimError, SimResult};

use super::schedule::TIME_EPS;

/// Right-hand side `du/dt = f(t, u)`.
///
/// Implementations must be free of side effects; the integrator may evaluate
/// them at rejected trial states.
pub trait RhsComputer {
    /// Length of the state vector.
    fn dimension(&self) -> usize;

    /// Writes `f(t, u)` into `du`.
    fn compute_rhs(&self, t: f64, u: &[f64], du: &mut [f64]);
}

/// Step-size strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Algorithm {
    /// Fixed-step classical Runge-Kutta.
    Rk4 {
        /// Step size (s).
        dt: f64,
    },
    /// Adaptive Bogacki-Shampine 3(2).
    Bs3 {
        abstol: f64,
        reltol: f64,
        /// Smallest step accepted before giving up (s).
        dtmin: f64,
    },
}

/// One stage of an accepted step.
#[derive(Debug, Clone)]
pub struct Stage {
    pub time: f64,
    pub state: Vec<f64>,
    /// Quadrature weight, step size included (s).
    pub weight: f64,
}

/// Step counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    pub accepted: usize,
    pub rejected: usize,
}

const BS3_SAFETY: f64 = 0.9;
const BS3_MIN_FACTOR: f64 = 0.2;
const BS3_MAX_FACTOR: f64 = 5.0;

/// Stateful integrator: remembers its step-size proposal and statistics.
#[derive(Debug, Clone)]
pub struct Integrator {
    algorithm: Algorithm,
    /// Proposed size of the next step.
    h: f64,
    maxiters: usize,
    iterations: usize,
    stats: StepStats,
    stages: Vec<Stage>,
}

impl Integrator {
    /// Creates an integrator with initial step `dt`.
    pub fn new(algorithm: Algorithm, dt: f64, maxiters: usize) -> Self {
        Self {
            algorithm,
            h: dt,
            maxiters,
            iterations: 0,
            stats: StepStats::default(),
            stages: Vec::new(),
        }
    }

    /// Builds the integrator named by `solver.algorithm`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unknown algorithm name.
    pub fn from_config(solver: &SolverConfig) -> SimResult<Self> {
        let algorithm = match solver.algorithm.as_str() {
            "rk4" => Algorithm::Rk4 { dt: solver.dt },
            "bs3" => Algorithm::Bs3 {
                abstol: solver.abstol,
                reltol: solver.reltol,
                dtmin: solver.dtmin,
            },
            other => {
                return Err(SimError::config(
                    "solver.algorithm",
                    format!("unknown algorithm \"{other}\""),
                ));
            }
        };
        Ok(Self::new(algorithm, solver.dt, solver.maxiters))
    }

    /// Short name of the algorithm, for logs.
    pub fn name(&self) -> &'static str {
        match self.algorithm {
            Algorithm::Rk4 { .. } => "RK4",
            Algorithm::Bs3 { .. } => "BS3",
        }
    }

    /// Step counters since creation.
    pub fn stats(&self) -> StepStats {
        self.stats
    }

    /// Stages of the last accepted step.
    pub fn last_stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Advances `u` from `t` by one accepted step, never past `t_stop`.
    ///
    /// Returns the new time. A step ending within [`TIME_EPS`] of `t_stop`
    /// lands exactly on it.
    ///
    /// # Errors
    ///
    /// Returns `Integration` if the step count exceeds `maxiters`, the
    /// adaptive step falls below `dtmin`, or the state becomes non-finite.
    pub fn step<R: RhsComputer>(
        &mut self,
        rhs: &R,
        t: f64,
        u: &mut Vec<f64>,
        t_stop: f64,
    ) -> SimResult<f64> {
        self.stages.clear();
        if t_stop - t <= TIME_EPS {
            return Ok(t);
        }
        match self.algorithm {
            Algorithm::Rk4 { dt } => self.step_rk4(rhs, t, u, t_stop, dt),
            Algorithm::Bs3 {
                abstol,
                reltol,
                dtmin,
            } => self.step_bs3(rhs, t, u, t_stop, (abstol, reltol, dtmin)),
        }
    }

    fn count_iteration(&mut self, t: f64) -> SimResult<()> {
        self.iterations += 1;
        if self.iterations > self.maxiters {
            return Err(SimError::Integration {
                time: t,
                message: format!("maximum number of iterations ({}) exceeded", self.maxiters),
            });
        }
        Ok(())
    }

    fn step_rk4<R: RhsComputer>(
        &mut self,
        rhs: &R,
        t: f64,
        u: &mut Vec<f64>,
        t_stop: f64,
        dt: f64,
    ) -> SimResult<f64> {
        self.count_iteration(t)?;
        let h = snap(t, dt, t_stop);
        let n = u.len();

        let mut k1 = vec![0.0; n];
        rhs.compute_rhs(t, u, &mut k1);
        let y2 = axpy(u, h / 2.0, &k1);
        let mut k2 = vec![0.0; n];
        rhs.compute_rhs(t + h / 2.0, &y2, &mut k2);
        let y3 = axpy(u, h / 2.0, &k2);
        let mut k3 = vec![0.0; n];
        rhs.compute_rhs(t + h / 2.0, &y3, &mut k3);
        let y4 = axpy(u, h, &k3);
        let mut k4 = vec![0.0; n];
        rhs.compute_rhs(t + h, &y4, &mut k4);

        let next: Vec<f64> = (0..n)
            .map(|i| u[i] + h * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]) / 6.0)
            .collect();
        if next.iter().any(|v| !v.is_finite()) {
            return Err(SimError::Integration {
                time: t,
                message: "state became non-finite".into(),
            });
        }

        self.stages = vec![
            Stage {
                time: t,
                state: u.clone(),
                weight: h / 6.0,
            },
            Stage {
                time: t + h / 2.0,
                state: y2,
                weight: h / 3.0,
            },
            Stage {
                time: t + h / 2.0,
                state: y3,
                weight: h / 3.0,
            },
            Stage {
                time: t + h,
                state: y4,
                weight: h / 6.0,
            },
        ];
        *u = next;
        self.stats.accepted += 1;
        Ok(land(t, h, t_stop))
    }

    fn step_bs3<R: RhsComputer>(
        &mut self,
        rhs: &R,
        t: f64,
        u: &mut Vec<f64>,
        t_stop: f64,
        (abstol, reltol, dtmin): (f64, f64, f64),
    ) -> SimResult<f64> {
        let n = u.len();
        let mut k1 = vec![0.0; n];
        rhs.compute_rhs(t, u, &mut k1);

        loop {
            self.count_iteration(t)?;
            let h = snap(t, self.h, t_stop);
            let clipped = h < self.h;

            let y2 = axpy(u, h / 2.0, &k1);
            let mut k2 = vec![0.0; n];
            rhs.compute_rhs(t + h / 2.0, &y2, &mut k2);
            let y3 = axpy(u, 0.75 * h, &k2);
            let mut k3 = vec![0.0; n];
            rhs.compute_rhs(t + 0.75 * h, &y3, &mut k3);
            let next: Vec<f64> = (0..n)
                .map(|i| u[i] + h * (2.0 / 9.0 * k1[i] + k2[i] / 3.0 + 4.0 / 9.0 * k3[i]))
                .collect();
            let mut k4 = vec![0.0; n];
            rhs.compute_rhs(t + h, &next, &mut k4);

            let mut sum = 0.0;
            for i in 0..n {
                let e = h
                    * (-5.0 / 72.0 * k1[i] + k2[i] / 12.0 + k3[i] / 9.0 - k4[i] / 8.0);
                let scale = abstol + reltol * u[i].abs().max(next[i].abs());
                sum += (e / scale).powi(2);
            }
            let err = if n == 0 { 0.0 } else { (sum / n as f64).sqrt() };
            let err = if err.is_finite() && next.iter().all(|v| v.is_finite()) {
                err
            } else {
                f64::INFINITY
            };

            if err <= 1.0 {
                let factor = if err == 0.0 {
                    BS3_MAX_FACTOR
                } else {
                    (BS3_SAFETY * err.powf(-1.0 / 3.0)).clamp(BS3_MIN_FACTOR, BS3_MAX_FACTOR)
                };
                let proposal = h * factor;
                self.h = if clipped { self.h.max(proposal) } else { proposal };
                self.stages = vec![
                    Stage {
                        time: t,
                        state: u.clone(),
                        weight: h * 2.0 / 9.0,
                    },
                    Stage {
                        time: t + h / 2.0,
                        state: y2,
                        weight: h / 3.0,
                    },
                    Stage {
                        time: t + 0.75 * h,
                        state: y3,
                        weight: h * 4.0 / 9.0,
                    },
                ];
                *u = next;
                self.stats.accepted += 1;
                return Ok(land(t, h, t_stop));
            }

            self.stats.rejected += 1;
            let factor = if err.is_finite() {
                (BS3_SAFETY * err.powf(-1.0 / 3.0)).max(BS3_MIN_FACTOR)
            } else {
                BS3_MIN_FACTOR
            };
            let shrunk = h * factor;
            if shrunk < dtmin {
                return Err(SimError::Integration {
                    time: t,
                    message: format!(
                        "step size {shrunk:.3e}s fell below dtmin {dtmin:.3e}s (error norm {err:.3e})"
                    ),
                });
            }
            self.h = shrunk;
        }
    }
}

/// Step size from `t` with proposal `h`, clipped so it ends at or before `t_stop`.
fn snap(t: f64, h: f64, t_stop: f64) -> f64 {
    let remaining = t_stop - t;
    if h >= remaining - TIME_EPS {
        remaining
    } else {
        h
    }
}

/// Time after a step of `h` from `t`; exactly `t_stop` when it ends there.
fn land(t: f64, h: f64, t_stop: f64) -> f64 {
    let next = t + h;
    if (t_stop - next).abs() <= TIME_EPS {
        t_stop
    } else {
        next
    }
}

/// `u + a·k`.
fn axpy(u: &[f64], a: f64, k: &[f64]) -> Vec<f64> {
    u.iter().zip(k).map(|(ui, ki)| ui + a * ki).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// du/dt = -λ·u
    struct Decay(f64);

    impl RhsComputer for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn compute_rhs(&self, _t: f64, u: &[f64], du: &mut [f64]) {
            du[0] = -self.0 * u[0];
        }
    }

    /// du/dt = c
    struct Constant(f64);

    impl RhsComputer for Constant {
        fn dimension(&self) -> usize {
            1
        }

        fn compute_rhs(&self, _t: f64, _u: &[f64], du: &mut [f64]) {
            du[0] = self.0;
        }
    }

    fn bs3(abstol: f64) -> Integrator {
        Integrator::new(
            Algorithm::Bs3 {
                abstol,
                reltol: abstol,
                dtmin: 1e-9,
            },
            0.1,
            100_000,
        )
    }

    fn integrate(integrator: &mut Integrator, rhs: &impl RhsComputer, u: &mut Vec<f64>, end: f64) {
        let mut t = 0.0;
        while t < end {
            t = integrator.step(rhs, t, u, end).unwrap();
        }
        assert_eq!(t, end);
    }

    #[test]
    fn rk4_is_exact_for_constant_rate() {
        let mut integrator = Integrator::new(Algorithm::Rk4 { dt: 86_400.0 }, 86_400.0, 10);
        let mut u = vec![1e6];
        let t = integrator.step(&Constant(-2.5), 0.0, &mut u, 86_400.0).unwrap();
        assert_eq!(t, 86_400.0);
        assert_eq!(u[0], 1e6 - 2.5 * 86_400.0);
    }

    #[test]
    fn rk4_matches_exponential_decay() {
        let mut integrator = Integrator::new(Algorithm::Rk4 { dt: 0.01 }, 0.01, 10_000);
        let mut u = vec![1.0];
        integrate(&mut integrator, &Decay(1.0), &mut u, 1.0);
        assert!((u[0] - (-1.0_f64).exp()).abs() < 1e-9);
        assert_eq!(integrator.stats().accepted, 100);
    }

    #[test]
    fn bs3_meets_tolerance() {
        let mut integrator = bs3(1e-8);
        let mut u = vec![1.0];
        integrate(&mut integrator, &Decay(2.0), &mut u, 3.0);
        assert!((u[0] - (-6.0_f64).exp()).abs() < 1e-6);
        assert_eq!(integrator.name(), "BS3");
    }

    #[test]
    fn steps_never_cross_stop_time() {
        let mut integrator = Integrator::new(Algorithm::Rk4 { dt: 0.3 }, 0.3, 100);
        let mut u = vec![1.0];
        let t = integrator.step(&Decay(1.0), 0.0, &mut u, 0.2).unwrap();
        assert_eq!(t, 0.2);
    }

    #[test]
    fn stage_weights_reproduce_state_update() {
        for mut integrator in [
            Integrator::new(Algorithm::Rk4 { dt: 0.5 }, 0.5, 100),
            bs3(1e-6),
        ] {
            let rhs = Decay(0.7);
            let mut u = vec![3.0];
            let before = u[0];
            integrator.step(&rhs, 0.0, &mut u, 10.0).unwrap();
            let mut du = [0.0];
            let mut quadrature = 0.0;
            for stage in integrator.last_stages() {
                rhs.compute_rhs(stage.time, &stage.state, &mut du);
                quadrature += stage.weight * du[0];
            }
            assert!((before + quadrature - u[0]).abs() < 1e-12);
        }
    }

    #[test]
    fn maxiters_is_enforced() {
        let mut integrator = Integrator::new(Algorithm::Rk4 { dt: 0.1 }, 0.1, 3);
        let mut u = vec![1.0];
        let mut t = 0.0;
        for _ in 0..3 {
            t = integrator.step(&Decay(1.0), t, &mut u, 1.0).unwrap();
        }
        let err = integrator.step(&Decay(1.0), t, &mut u, 1.0).unwrap_err();
        assert!(matches!(err, SimError::Integration { .. }));
    }

    #[test]
    fn bs3_fails_on_non_finite_rates() {
        let mut integrator = Integrator::new(
            Algorithm::Bs3 {
                abstol: 1e-6,
                reltol: 1e-6,
                dtmin: 1e-3,
            },
            1.0,
            1_000,
        );
        let mut u = vec![1.0];
        let err = integrator
            .step(&Constant(f64::NAN), 0.0, &mut u, 10.0)
            .unwrap_err();
        assert!(err.to_string().contains("dtmin"));
        assert_eq!(u, vec![1.0]);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let solver = SolverConfig {
            algorithm: "euler".into(),
            ..SolverConfig::default()
        };
        assert!(Integrator::from_config(&solver).is_err());
    }
}
