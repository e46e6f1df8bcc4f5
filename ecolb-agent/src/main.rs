//! ecolb agent - per-host energy telemetry
//!
//! Every interval:
//! - samples CPU utilization and power draw
//! - computes the efficiency score
//! - sends `host,score,util` to the controller over UDP (fire-and-forget)
//! - optionally appends the sample to a CSV log

mod config;
mod discovery;
mod metrics;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use config::{AgentConfig, Cli};
use metrics::{hardware_factor, MetricSampler};
use std::time::{Duration, Instant};
use telemetry::{CsvLog, TelemetryReporter};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main agent state
struct Agent {
    host_id: String,
    period: Duration,
    sampler: MetricSampler,
    reporter: TelemetryReporter,
    csv: Option<CsvLog>,
}

impl Agent {
    async fn new(cfg: AgentConfig) -> Result<Self> {
        let host_id = cfg.host_id.clone().unwrap_or_else(discovery::host_id);
        if host_id.contains(',') || host_id.is_empty() {
            anyhow::bail!("host id {host_id:?} cannot be sent on the wire");
        }

        let factor = hardware_factor(cfg.hw_factor, cfg.hw_variance);
        let sampler = MetricSampler::for_driver(
            cfg.driver,
            &cfg.sys_paths(),
            cfg.sim_model(),
            factor,
            cfg.benchmark,
        );

        let reporter = TelemetryReporter::connect(&cfg.controller)
            .await
            .with_context(|| format!("Failed to set up telemetry to {}", cfg.controller))?;

        let csv = match &cfg.csv_log {
            Some(path) => match CsvLog::create(path) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "csv log unavailable, continuing without it");
                    None
                }
            },
            None => None,
        };

        info!(
            host = %host_id,
            controller = %reporter.target(),
            driver = ?cfg.driver,
            interval_ms = cfg.interval_ms,
            hw_factor = format_args!("{:.3}", sampler.hw_factor()),
            "agent initialized"
        );

        Ok(Agent { host_id, period: cfg.interval(), sampler, reporter, csv })
    }

    /// One interval: sample, send, log.
    async fn tick(&mut self, elapsed: Duration) {
        let Some(sample) = self.sampler.sample(elapsed) else {
            debug!("taking baseline, nothing sent");
            return;
        };

        self.reporter.send(&self.host_id, &sample).await;
        if let Some(csv) = self.csv.as_mut() {
            csv.append(chrono::Utc::now(), &self.host_id, &sample);
            if !csv.is_active() {
                self.csv = None;
            }
        }
        info!(
            mode = %sample.mode,
            source = sample.mode.source(),
            host = %self.host_id,
            score = format_args!("{:.3}", sample.score),
            util = format_args!("{:.1}", sample.utilization),
            power_w = format_args!("{:.1}", sample.power_watts),
            "sample"
        );
    }

    async fn run(&mut self) -> Result<()> {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last);
                    last = now;
                    self.tick(elapsed).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(
                        sent = self.reporter.sent(),
                        dropped = self.reporter.dropped(),
                        failed_reads = self.sampler.failed_reads(),
                        "shutting down"
                    );
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ecolb_agent=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = AgentConfig::load(cli.config.as_deref()).context("Failed to load agent config")?;
    cfg.apply_cli(cli);
    cfg.validate()?;

    let mut agent = Agent::new(cfg).await.context("Failed to create agent")?;
    agent.run().await.context("Agent execution failed")?;
    Ok(())
}
