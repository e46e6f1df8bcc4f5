use crate::connection::{RetryPolicy, DEFAULT_ELECTION_ID, DEFAULT_RETRY_BUDGET};
use crate::device::PipelineProgram;
use crate::error::{ControllerError, ControllerResult};
use crate::models::Bindings;
use crate::policy::{PolicyKind, DEFAULT_BUSY_THRESHOLD};
use crate::reconciler::TableSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "ECOLB_CONTROLLER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "controller.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// gRPC P4Runtime, e.g. BMv2 `simple_switch_grpc`
    #[default]
    #[serde(alias = "bmv2")]
    P4runtime,
    Sim,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConf {
    pub backend: DeviceBackend,
    /// Control endpoint, `host:port`.
    pub address: String,
    pub device_id: u64,
    pub election_id: u64,
    pub p4info: PathBuf,
    pub device_config: PathBuf,
}

impl Default for DeviceConf {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::P4runtime,
            address: "127.0.0.1:50051".into(),
            device_id: 0,
            election_id: DEFAULT_ELECTION_ID,
            p4info: "build/load_balance.p4info.bin".into(),
            device_config: "build/load_balance.json".into(),
        }
    }
}

impl DeviceConf {
    pub fn program(&self) -> PipelineProgram {
        PipelineProgram { p4info: self.p4info.clone(), device_config: self.device_config.clone() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// UDP address telemetry is received on.
    pub listen: String,
    /// N: how many ranked hosts get a table slot.
    pub fan_out: usize,
    pub busy_threshold: f64,
    pub policy: PolicyKind,
    pub table: TableSpec,
    pub device: DeviceConf,
    pub retry_budget: u32,
    pub backoff_ms: u64,
    pub verify_after_write: bool,
    pub health_log_every: u64,
    pub bindings: Bindings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:50001".into(),
            fan_out: 2,
            busy_threshold: DEFAULT_BUSY_THRESHOLD,
            policy: PolicyKind::Tiered,
            table: TableSpec::default(),
            device: DeviceConf::default(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            backoff_ms: 2000,
            verify_after_write: true,
            health_log_every: 50,
            bindings: Bindings::new(),
        }
    }
}

impl ControllerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { attempts: self.retry_budget, backoff: Duration::from_millis(self.backoff_ms) }
    }

    pub fn validate(&self) -> ControllerResult<()> {
        if self.fan_out == 0 {
            return Err(ControllerError::Config("fan_out must be at least 1".into()));
        }
        if self.fan_out > self.table.capacity {
            return Err(ControllerError::Config(format!(
                "fan_out {} exceeds table capacity {}",
                self.fan_out, self.table.capacity
            )));
        }
        if !(self.busy_threshold > 0.0 && self.busy_threshold <= 100.0) {
            return Err(ControllerError::Config(format!(
                "busy_threshold {} outside (0, 100]",
                self.busy_threshold
            )));
        }
        if self.retry_budget == 0 {
            return Err(ControllerError::Config("retry_budget must be at least 1".into()));
        }
        if self.bindings.is_empty() {
            warn!("no host bindings configured; every ranked host will be skipped");
        }
        Ok(())
    }

    pub fn from_yaml(text: &str) -> ControllerResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ControllerError::Config(e.to_string()))
    }
}

/// Load the controller config.
///
/// Path precedence: explicit argument, then `ECOLB_CONTROLLER_CONFIG`, then
/// `controller.yaml`. A missing default file yields defaults; a missing
/// explicitly named file is an error.
pub fn load_config(explicit: Option<&Path>) -> ControllerResult<ControllerConfig> {
    let (path, named) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match std::env::var(CONFIG_ENV) {
            Ok(p) => (PathBuf::from(p), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        },
    };

    if !path.exists() {
        if named {
            return Err(ControllerError::Config(format!("config file {} not found", path.display())));
        }
        warn!(path = %path.display(), "no config file, using defaults");
        return Ok(ControllerConfig::default());
    }

    let text = std::fs::read_to_string(&path)?;
    let cfg = ControllerConfig::from_yaml(&text)?;
    info!(path = %path.display(), hosts = cfg.bindings.len(), "config loaded");
    Ok(cfg)
}
