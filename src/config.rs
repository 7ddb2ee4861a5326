//! TOML-based run configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Top-level run configuration parsed from TOML.
///
/// `starttime` and `endtime` are required; every other field has a default.
/// Load from TOML with [`ScenarioConfig::from_toml_file`], or build one in
/// code with [`ScenarioConfig::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Start of the run (ISO-8601, e.g. `"2020-01-01T00:00:00"`).
    pub starttime: NaiveDateTime,
    /// End of the run.
    pub endtime: NaiveDateTime,
    /// Forcing-refresh cadence in seconds.
    #[serde(default = "default_update_timestep")]
    pub update_timestep: f64,
    /// Extra output times, in seconds since `starttime`.
    #[serde(default)]
    pub saveat: Vec<f64>,
    /// Record output immediately before / after each forcing update.
    #[serde(default = "default_save_positions")]
    pub save_positions: (bool, bool),
    /// Directory holding the input tables.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Directory receiving exported results.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Numerical solver settings.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Open-water evaporation settings.
    #[serde(default)]
    pub evaporation: EvaporationConfig,
    /// Demand allocation settings.
    #[serde(default)]
    pub allocation: AllocationConfig,
}

fn default_update_timestep() -> f64 {
    86_400.0
}

fn default_save_positions() -> (bool, bool) {
    (false, true)
}

fn default_input_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// Numerical solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// `"bs3"` (adaptive Bogacki-Shampine 3(2)) or `"rk4"` (fixed step).
    pub algorithm: String,
    /// Step size in seconds for `rk4`; initial step guess for `bs3`.
    pub dt: f64,
    /// Absolute error tolerance (m³).
    pub abstol: f64,
    /// Relative error tolerance.
    pub reltol: f64,
    /// Smallest error-controlled step before the solver gives up (seconds).
    pub dtmin: f64,
    /// Maximum number of attempted steps over the whole run.
    pub maxiters: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            algorithm: "bs3".to_string(),
            dt: 3_600.0,
            abstol: 1e-6,
            reltol: 1e-6,
            dtmin: 1e-3,
            maxiters: 1_000_000,
        }
    }
}

/// Open-water evaporation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaporationConfig {
    /// Multiplier on potential evaporation per calendar month (January first).
    pub open_water_factor: [f64; 12],
}

impl Default for EvaporationConfig {
    fn default() -> Self {
        Self {
            open_water_factor: [
                0.50, 0.70, 1.00, 1.20, 1.30, 1.30, 1.30, 1.25, 1.20, 1.00, 0.80, 0.60,
            ],
        }
    }
}

impl EvaporationConfig {
    /// A factor of one in every month.
    pub fn neutral() -> Self {
        Self {
            open_water_factor: [1.0; 12],
        }
    }
}

/// Demand allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocationConfig {
    /// Split available water between users at every forcing update.
    pub use_allocation: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            use_allocation: true,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"solver.abstol"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl ScenarioConfig {
    /// Creates a configuration with default settings between two timestamps.
    pub fn new(starttime: NaiveDateTime, endtime: NaiveDateTime) -> Self {
        Self {
            starttime,
            endtime,
            update_timestep: default_update_timestep(),
            saveat: Vec::new(),
            save_positions: default_save_positions(),
            input_dir: default_input_dir(),
            results_dir: default_results_dir(),
            solver: SolverConfig::default(),
            evaporation: EvaporationConfig::default(),
            allocation: AllocationConfig::default(),
        }
    }

    /// Run length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        (self.endtime - self.starttime).num_milliseconds() as f64 / 1_000.0
    }

    /// Parses a configuration from a TOML file.
    ///
    /// Relative `input_dir` and `results_dir` are resolved against the
    /// directory containing the file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        let mut cfg = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            if cfg.input_dir.is_relative() {
                cfg.input_dir = dir.join(&cfg.input_dir);
            }
            if cfg.results_dir.is_relative() {
                cfg.results_dir = dir.join(&cfg.results_dir);
            }
        }
        Ok(cfg)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.endtime <= self.starttime {
            errors.push(ConfigError {
                field: "endtime".into(),
                message: "must be after starttime".into(),
            });
        }
        if !(self.update_timestep.is_finite() && self.update_timestep > 0.0) {
            errors.push(ConfigError {
                field: "update_timestep".into(),
                message: "must be a finite number > 0".into(),
            });
        }
        let duration = self.duration_seconds();
        if let Some(t) = self
            .saveat
            .iter()
            .find(|t| !t.is_finite() || **t < 0.0 || **t > duration)
        {
            errors.push(ConfigError {
                field: "saveat".into(),
                message: format!("{t} is outside the run [0, {duration}]"),
            });
        }

        let s = &self.solver;
        if s.algorithm != "bs3" && s.algorithm != "rk4" {
            errors.push(ConfigError {
                field: "solver.algorithm".into(),
                message: format!("must be \"bs3\" or \"rk4\", got \"{}\"", s.algorithm),
            });
        }
        if !(s.dt.is_finite() && s.dt > 0.0) {
            errors.push(ConfigError {
                field: "solver.dt".into(),
                message: "must be > 0".into(),
            });
        }
        if s.abstol.is_nan() || s.abstol <= 0.0 {
            errors.push(ConfigError {
                field: "solver.abstol".into(),
                message: "must be > 0".into(),
            });
        }
        if s.reltol.is_nan() || s.reltol <= 0.0 {
            errors.push(ConfigError {
                field: "solver.reltol".into(),
                message: "must be > 0".into(),
            });
        }
        if s.dtmin.is_nan() || s.dtmin < 0.0 {
            errors.push(ConfigError {
                field: "solver.dtmin".into(),
                message: "must be >= 0".into(),
            });
        }
        if s.maxiters == 0 {
            errors.push(ConfigError {
                field: "solver.maxiters".into(),
                message: "must be > 0".into(),
            });
        }

        if let Some(f) = self
            .evaporation
            .open_water_factor
            .iter()
            .find(|f| !f.is_finite() || **f < 0.0)
        {
            errors.push(ConfigError {
                field: "evaporation.open_water_factor".into(),
                message: format!("factors must be finite and >= 0, got {f}"),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jan(day: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2020, 1, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    #[test]
    fn new_config_is_valid() {
        let cfg = ScenarioConfig::new(jan(1), jan(11));
        let errors = cfg.validate();
        assert!(errors.is_empty(), "default config should be valid: {errors:?}");
        assert_eq!(cfg.duration_seconds(), 10.0 * 86_400.0);
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
starttime = "2020-01-01T00:00:00"
endtime = "2020-03-01T00:00:00"
update_timestep = 43200.0
saveat = [3600.0, 7200.0]
save_positions = [true, true]

[solver]
algorithm = "rk4"
dt = 600.0
abstol = 1e-5
reltol = 1e-5
dtmin = 0.01
maxiters = 5000

[evaporation]
open_water_factor = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]

[allocation]
use_allocation = false
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.update_timestep), Some(43_200.0));
        assert_eq!(cfg.as_ref().map(|c| c.save_positions), Some((true, true)));
        assert_eq!(cfg.as_ref().map(|c| &*c.solver.algorithm), Some("rk4"));
        assert_eq!(
            cfg.as_ref().map(|c| c.allocation.use_allocation),
            Some(false)
        );
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
starttime = "2020-01-01T00:00:00"
endtime = "2020-01-02T00:00:00"
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).ok();
        assert_eq!(cfg.as_ref().map(|c| c.update_timestep), Some(86_400.0));
        assert_eq!(cfg.as_ref().map(|c| c.save_positions), Some((false, true)));
        assert_eq!(cfg.as_ref().map(|c| &*c.solver.algorithm), Some("bs3"));
        assert_eq!(cfg.as_ref().map(|c| c.allocation.use_allocation), Some(true));
    }

    #[test]
    fn missing_starttime_is_rejected() {
        let toml = r#"endtime = "2020-01-02T00:00:00""#;
        let err = ScenarioConfig::from_toml_str(toml).unwrap_err();
        assert_eq!(err.field, "toml");
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
starttime = "2020-01-01T00:00:00"
endtime = "2020-01-02T00:00:00"
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_reversed_times() {
        let cfg = ScenarioConfig::new(jan(5), jan(1));
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "endtime"));
    }

    #[test]
    fn validation_catches_bad_solver() {
        let mut cfg = ScenarioConfig::new(jan(1), jan(2));
        cfg.solver.algorithm = "euler".to_string();
        cfg.solver.abstol = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "solver.algorithm"));
        assert!(errors.iter().any(|e| e.field == "solver.abstol"));
    }

    #[test]
    fn validation_catches_saveat_outside_run() {
        let mut cfg = ScenarioConfig::new(jan(1), jan(2));
        cfg.saveat = vec![100.0, 200_000.0];
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "saveat"));
    }

    #[test]
    fn validation_catches_zero_update_timestep() {
        let mut cfg = ScenarioConfig::new(jan(1), jan(2));
        cfg.update_timestep = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "update_timestep"));
    }
}
