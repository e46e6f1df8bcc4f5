//! Power sources.
//!
//! Hardware sources return `Ok(None)` when they have no reading for this
//! interval yet; the sampler then uses the simulated model.

use super::CounterReadError;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub trait PowerSource: Send {
    fn name(&self) -> &'static str;

    /// Average watts over the last `elapsed`.
    fn read(&mut self, elapsed: Duration) -> Result<Option<f64>, CounterReadError>;
}

/// Which power source a host uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Intel RAPL cumulative energy counter
    #[default]
    Intel,
    /// AMD zenpower hwmon rails
    Amd,
    /// No hardware, simulated model only
    Sim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Hardware(&'static str),
    Simulated,
}

impl PowerMode {
    pub fn source(&self) -> &'static str {
        match self {
            PowerMode::Hardware(name) => *name,
            PowerMode::Simulated => "model",
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerMode::Hardware(_) => f.write_str("REAL"),
            PowerMode::Simulated => f.write_str("SIM"),
        }
    }
}

fn read_counter(path: &Path) -> Result<u64, CounterReadError> {
    let text = std::fs::read_to_string(path).map_err(|source| CounterReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.trim().parse().map_err(|_| CounterReadError::Parse {
        path: path.to_path_buf(),
        detail: format!("not an integer: {:?}", text.trim()),
    })
}

/// Cumulative energy counter in microjoules (`energy_uj`).
#[derive(Debug)]
pub struct RaplSource {
    path: PathBuf,
    last: Option<u64>,
}

impl RaplSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), last: None }
    }
}

impl PowerSource for RaplSource {
    fn name(&self) -> &'static str {
        "rapl"
    }

    fn read(&mut self, elapsed: Duration) -> Result<Option<f64>, CounterReadError> {
        let cur = match read_counter(&self.path) {
            Ok(v) => v,
            Err(e) => {
                // the next good read starts over, energy across the gap is unknown
                self.last = None;
                return Err(e);
            }
        };
        let Some(prev) = self.last.replace(cur) else {
            return Ok(None);
        };
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Ok(None);
        }
        // a reset or wrap gives a zero delta, never negative power
        let delta_uj = cur.saturating_sub(prev) as f64;
        Ok(Some(delta_uj / 1_000_000.0 / secs))
    }
}

/// Instantaneous rails summed (zenpower: core + SoC, microwatts).
#[derive(Debug)]
pub struct MultiRailSource {
    dir: PathBuf,
    rails: Vec<u32>,
}

impl MultiRailSource {
    pub fn zenpower(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), rails: vec![1, 2] }
    }
}

impl PowerSource for MultiRailSource {
    fn name(&self) -> &'static str {
        "zenpower"
    }

    fn read(&mut self, _elapsed: Duration) -> Result<Option<f64>, CounterReadError> {
        let mut microwatts = 0u64;
        for rail in &self.rails {
            microwatts += read_counter(&self.dir.join(format!("power{rail}_input")))?;
        }
        Ok(Some(microwatts as f64 / 1_000_000.0))
    }
}

/// `baseline + slope * utilization`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedPower {
    pub baseline_watts: f64,
    pub slope: f64,
}

impl Default for SimulatedPower {
    fn default() -> Self {
        Self { baseline_watts: 10.0, slope: 0.5 }
    }
}

impl SimulatedPower {
    pub fn watts(&self, utilization: f64) -> f64 {
        self.baseline_watts + self.slope * utilization
    }
}
