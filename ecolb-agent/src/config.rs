//! Agent configuration
//!
//! Layers, lowest first:
//! - built-in defaults
//! - TOML file (`<config dir>/ecolb/agent.toml` or `--config`)
//! - command line flags

use crate::metrics::power::{Driver, SimulatedPower};
use crate::metrics::{SysPaths, DEFAULT_BENCHMARK};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Parser)]
#[command(name = "ecolb-agent", version, about = "Per-host energy telemetry agent")]
pub struct Cli {
    /// Host id reported to the controller (defaults to the hostname)
    pub host_id: Option<String>,

    /// Controller telemetry address, host:port
    #[arg(long)]
    pub controller: Option<String>,

    #[arg(long)]
    pub interval_ms: Option<u64>,

    #[arg(long, value_enum)]
    pub driver: Option<Driver>,

    /// Fleet-wide score normalization constant
    #[arg(long)]
    pub benchmark: Option<f64>,

    /// Simulated model: idle watts
    #[arg(long)]
    pub sim_baseline: Option<f64>,

    /// Simulated model: watts per utilization percent
    #[arg(long)]
    pub sim_slope: Option<f64>,

    /// Fixed hardware efficiency multiplier
    #[arg(long)]
    pub hw_factor: Option<f64>,

    /// Draw the hardware multiplier from 1 ± variance at startup
    #[arg(long)]
    pub hw_variance: Option<f64>,

    /// Write every sample to this CSV file
    #[arg(long)]
    pub csv_log: Option<PathBuf>,

    /// Agent TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub host_id: Option<String>,
    pub controller: String,
    pub interval_ms: u64,
    pub driver: Driver,
    pub benchmark: f64,
    pub sim_baseline_watts: f64,
    pub sim_slope: f64,
    pub hw_factor: Option<f64>,
    pub hw_variance: f64,
    pub csv_log: Option<PathBuf>,
    pub proc_stat: PathBuf,
    pub rapl_energy: PathBuf,
    pub hwmon_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let paths = SysPaths::default();
        let sim = SimulatedPower::default();
        Self {
            host_id: None,
            controller: "127.0.0.1:50001".to_string(),
            interval_ms: 500,
            driver: Driver::Intel,
            benchmark: DEFAULT_BENCHMARK,
            sim_baseline_watts: sim.baseline_watts,
            sim_slope: sim.slope,
            hw_factor: None,
            hw_variance: 0.0,
            csv_log: None,
            proc_stat: paths.proc_stat,
            rapl_energy: paths.rapl_energy,
            hwmon_root: paths.hwmon_root,
        }
    }
}

impl AgentConfig {
    /// Default config file location.
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ecolb").join("agent.toml"))
    }

    /// Parse a TOML file. A missing file at the default location is not an
    /// error; a missing explicit one is.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, named) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::config_file_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !named && !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml { path, source })
    }

    pub fn apply_cli(&mut self, cli: Cli) {
        if cli.host_id.is_some() {
            self.host_id = cli.host_id;
        }
        if let Some(v) = cli.controller {
            self.controller = v;
        }
        if let Some(v) = cli.interval_ms {
            self.interval_ms = v;
        }
        if let Some(v) = cli.driver {
            self.driver = v;
        }
        if let Some(v) = cli.benchmark {
            self.benchmark = v;
        }
        if let Some(v) = cli.sim_baseline {
            self.sim_baseline_watts = v;
        }
        if let Some(v) = cli.sim_slope {
            self.sim_slope = v;
        }
        if cli.hw_factor.is_some() {
            self.hw_factor = cli.hw_factor;
        }
        if let Some(v) = cli.hw_variance {
            self.hw_variance = v;
        }
        if cli.csv_log.is_some() {
            self.csv_log = cli.csv_log;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = &self.host_id {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("host id is empty".into()));
            }
            if id.contains(',') {
                return Err(ConfigError::Invalid(format!("host id {id:?} contains a comma")));
            }
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be positive".into()));
        }
        if !(self.benchmark.is_finite() && self.benchmark > 0.0) {
            return Err(ConfigError::Invalid(format!("benchmark {} must be positive", self.benchmark)));
        }
        if self.sim_baseline_watts < 0.0 || self.sim_slope < 0.0 {
            return Err(ConfigError::Invalid("simulated power model must be non-negative".into()));
        }
        if let Some(f) = self.hw_factor {
            if !(f.is_finite() && f > 0.0) {
                return Err(ConfigError::Invalid(format!("hw_factor {f} must be positive")));
            }
        }
        if !(0.0..1.0).contains(&self.hw_variance) {
            return Err(ConfigError::Invalid(format!("hw_variance {} outside [0, 1)", self.hw_variance)));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sim_model(&self) -> SimulatedPower {
        SimulatedPower { baseline_watts: self.sim_baseline_watts, slope: self.sim_slope }
    }

    pub fn sys_paths(&self) -> SysPaths {
        SysPaths {
            proc_stat: self.proc_stat.clone(),
            rapl_energy: self.rapl_energy.clone(),
            hwmon_root: self.hwmon_root.clone(),
        }
    }
}
