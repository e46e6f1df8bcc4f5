//! ecolb workload - gives backend hosts something measurable to do
//!
//! - `serve`: UDP request server, burns `--work-ms` of CPU per request
//! - `load`: sends requests at a fixed rate and counts which server answered

mod load;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ecolb-workload", version, about = "Workload server and load generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer requests after burning CPU
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// CPU burn per request
        #[arg(long, default_value_t = 20)]
        work_ms: u64,
        /// Identity in replies (defaults to the hostname)
        #[arg(long)]
        id: Option<String>,
    },
    /// Generate requests against a (load-balanced) address
    Load {
        /// host:port
        target: String,
        /// Requests per second
        #[arg(long, default_value_t = 50)]
        rate: u32,
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
        #[arg(long, default_value_t = 1000)]
        grace_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve { port, work_ms, id } => {
            let identity = id.unwrap_or_else(|| gethostname::gethostname().to_string_lossy().to_string());
            let mut server =
                server::RequestServer::bind(&format!("0.0.0.0:{port}"), identity, Duration::from_millis(work_ms)).await?;
            tokio::select! {
                r = server.serve(None) => { r?; }
                _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
            }
        }
        Command::Load { target, rate, duration_secs, grace_ms } => {
            let plan = load::LoadPlan {
                target,
                rate,
                duration: Duration::from_secs(duration_secs),
                grace: Duration::from_millis(grace_ms),
            };
            load::run(&plan).await?;
        }
    }
    Ok(())
}
