//! Host metric sampling for ecolb agents
//!
//! Produces one efficiency sample per interval:
//! - CPU utilization from `/proc/stat` deltas
//! - Power from RAPL, zenpower rails, or the simulated model
//! - Score = useful work per watt, scaled by a fleet-wide benchmark

pub mod cpu;
pub mod power;

use crate::discovery;
use cpu::CpuSampler;
use power::{Driver, MultiRailSource, PowerMode, PowerSource, RaplSource, SimulatedPower};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const UTIL_FLOOR: f64 = 1.0;
pub const POWER_FLOOR: f64 = 0.001;
pub const DEFAULT_BENCHMARK: f64 = 100.0;

#[derive(Debug, Error)]
pub enum CounterReadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
}

/// `max(util, 1) * benchmark / max(power, 0.001)`
pub fn efficiency_score(utilization: f64, power_watts: f64, benchmark: f64) -> f64 {
    (utilization.max(UTIL_FLOOR) * benchmark) / power_watts.max(POWER_FLOOR)
}

/// Per-process power multiplier. A configured factor wins; otherwise one
/// draw in `[1 - variance, 1 + variance]`.
pub fn hardware_factor(configured: Option<f64>, variance: f64) -> f64 {
    if let Some(f) = configured {
        return f;
    }
    if variance <= 0.0 {
        return 1.0;
    }
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => {
            let unit = (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64;
            1.0 - variance + 2.0 * variance * unit
        }
        Err(e) => {
            warn!(error = %e, "no randomness available, hardware factor fixed at 1.0");
            1.0
        }
    }
}

/// Kernel files the sampler reads. Overridable for tests.
#[derive(Debug, Clone)]
pub struct SysPaths {
    pub proc_stat: PathBuf,
    pub rapl_energy: PathBuf,
    pub hwmon_root: PathBuf,
}

impl Default for SysPaths {
    fn default() -> Self {
        Self {
            proc_stat: "/proc/stat".into(),
            rapl_energy: "/sys/class/powercap/intel-rapl/intel-rapl:0/energy_uj".into(),
            hwmon_root: "/sys/class/hwmon".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub utilization: f64,
    pub power_watts: f64,
    pub score: f64,
    pub mode: PowerMode,
}

pub struct MetricSampler {
    cpu: CpuSampler,
    power: Option<Box<dyn PowerSource>>,
    sim: SimulatedPower,
    hw_factor: f64,
    benchmark: f64,
    cpu_failing: bool,
    power_failing: bool,
    failed_reads: u64,
}

impl MetricSampler {
    pub fn new(
        cpu: CpuSampler,
        power: Option<Box<dyn PowerSource>>,
        sim: SimulatedPower,
        hw_factor: f64,
        benchmark: f64,
    ) -> Self {
        Self {
            cpu,
            power,
            sim,
            hw_factor,
            benchmark,
            cpu_failing: false,
            power_failing: false,
            failed_reads: 0,
        }
    }

    /// Pick the power source for `driver`. AMD without a zenpower device
    /// runs simulated.
    pub fn for_driver(
        driver: Driver,
        paths: &SysPaths,
        sim: SimulatedPower,
        hw_factor: f64,
        benchmark: f64,
    ) -> Self {
        let power: Option<Box<dyn PowerSource>> = match driver {
            Driver::Intel => Some(Box::new(RaplSource::new(&paths.rapl_energy))),
            Driver::Amd => match discovery::find_hwmon(&paths.hwmon_root, "zenpower") {
                Some(dir) => {
                    info!(hwmon = %dir.display(), "zenpower found");
                    Some(Box::new(MultiRailSource::zenpower(dir)))
                }
                None => {
                    error!("AMD driver selected but zenpower not found, falling back to simulation");
                    None
                }
            },
            Driver::Sim => None,
        };
        Self::new(CpuSampler::new(&paths.proc_stat), power, sim, hw_factor, benchmark)
    }

    pub fn hw_factor(&self) -> f64 {
        self.hw_factor
    }

    /// Counter reads that failed since start, CPU and power together.
    pub fn failed_reads(&self) -> u64 {
        self.failed_reads
    }

    /// One interval. `None` while the utilization baseline is being taken.
    pub fn sample(&mut self, elapsed: Duration) -> Option<Sample> {
        let utilization = match self.cpu.read() {
            Ok(u) => {
                if self.cpu_failing {
                    info!("cpu counters readable again");
                    self.cpu_failing = false;
                }
                u
            }
            Err(e) => {
                self.failed_reads += 1;
                if self.cpu_failing {
                    debug!(error = %e, "cpu counters still unreadable");
                } else {
                    warn!(error = %e, "cpu utilization unavailable, reporting 0");
                    self.cpu_failing = true;
                }
                // no baseline yet means nothing to report either way
                self.cpu.has_baseline().then_some(0.0)
            }
        };

        // read even on the baseline interval so energy counters get primed
        let measured = self.read_power(elapsed);
        let utilization = utilization?;

        let (raw, mode) = match measured {
            Some(reading) => reading,
            None => (self.sim.watts(utilization), PowerMode::Simulated),
        };
        let power_watts = raw * self.hw_factor;

        Some(Sample {
            utilization,
            power_watts,
            score: efficiency_score(utilization, power_watts, self.benchmark),
            mode,
        })
    }

    fn read_power(&mut self, elapsed: Duration) -> Option<(f64, PowerMode)> {
        let src = self.power.as_mut()?;
        match src.read(elapsed) {
            Ok(w) => {
                if self.power_failing {
                    info!(source = src.name(), "power counter readable again");
                    self.power_failing = false;
                }
                w.map(|w| (w, PowerMode::Hardware(src.name())))
            }
            Err(e) => {
                self.failed_reads += 1;
                if self.power_failing {
                    debug!(source = src.name(), error = %e, "power counter still unreadable");
                } else {
                    warn!(source = src.name(), error = %e, "power counter unavailable, using simulated model");
                    self.power_failing = true;
                }
                None
            }
        }
    }
}
