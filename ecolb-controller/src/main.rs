/*!
 * ECOLB CONTROLLER - Controller entry point
 *
 * ROLE: load config, bring up the switch session (retries + pipeline), then
 * loop on UDP telemetry: registry -> ranking -> forwarding table.
 *
 * A connection failure at startup is fatal: we exit before the loop.
 */

use anyhow::{Context, Result};
use clap::Parser;
use ecolb_controller::config::{load_config, DeviceBackend};
use ecolb_controller::device::{ForwardingDevice, P4RuntimeDevice, SimSwitch};
use ecolb_controller::policy::PolicyKind;
use ecolb_controller::reconciler::TableReconciler;
use ecolb_controller::{ConnectionManager, ControlLoop};
use std::net::UdpSocket;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ecolb-controller", version, about = "Energy-aware load balancer controller")]
struct Cli {
    /// YAML config file (falls back to $ECOLB_CONTROLLER_CONFIG, then controller.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telemetry listen address, overrides the config
    #[arg(long)]
    listen: Option<String>,

    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    /// Number of hosts that get a table slot
    #[arg(long)]
    fan_out: Option<usize>,

    /// Use the in-memory switch instead of a real device
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ecolb_controller=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref()).context("loading controller config")?;
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    if let Some(policy) = cli.policy {
        cfg.policy = policy;
    }
    if let Some(n) = cli.fan_out {
        cfg.fan_out = n;
    }
    if cli.dry_run {
        cfg.device.backend = DeviceBackend::Sim;
    }
    cfg.validate()?;

    let device: Box<dyn ForwardingDevice> = match cfg.device.backend {
        DeviceBackend::Sim => Box::new(SimSwitch::new(cfg.table.capacity)),
        DeviceBackend::P4runtime => {
            Box::new(P4RuntimeDevice::new().context("preparing P4Runtime client")?)
        }
    };
    info!(
        backend = ?cfg.device.backend,
        address = %cfg.device.address,
        policy = ?cfg.policy,
        fan_out = cfg.fan_out,
        busy_threshold = cfg.busy_threshold,
        hosts = cfg.bindings.len(),
        "starting controller"
    );

    let mut conn = ConnectionManager::new(device, cfg.retry_policy(), cfg.device.election_id);
    if let Err(e) = conn.establish(&cfg.device.address, cfg.device.device_id, &cfg.device.program()) {
        error!(error = %e, "startup failed");
        return Err(e.into());
    }

    let socket = UdpSocket::bind(&cfg.listen)
        .with_context(|| format!("binding telemetry socket {}", cfg.listen))?;

    let mut control = ControlLoop::new(
        conn,
        cfg.policy.build(cfg.busy_threshold),
        cfg.fan_out,
        TableReconciler::new(cfg.table.clone(), cfg.verify_after_write),
        cfg.bindings.clone(),
    )
    .with_health_log_every(cfg.health_log_every);

    control.run(&socket)?;
    Ok(())
}
