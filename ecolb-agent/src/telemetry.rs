//! Telemetry out: one UDP datagram per sample, plus an optional CSV log.

use crate::metrics::Sample;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const CSV_HEADER: &str = "timestamp,host,cpu_util,power_watts,efficiency_score,mode";

/// `host,score,util` with 4 and 2 decimals.
pub fn encode_report(host_id: &str, score: f64, utilization: f64) -> String {
    format!("{host_id},{score:.4},{utilization:.2}")
}

/// Fire-and-forget sender. A failed send is logged and forgotten.
pub struct TelemetryReporter {
    socket: UdpSocket,
    target: SocketAddr,
    sent: u64,
    dropped: u64,
}

impl TelemetryReporter {
    pub async fn connect(target: &str) -> io::Result<Self> {
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {target}")))?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self { socket, target, sent: 0, dropped: 0 })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Returns whether the datagram left the socket; never retries.
    pub async fn send(&mut self, host_id: &str, sample: &Sample) -> bool {
        let msg = encode_report(host_id, sample.score, sample.utilization);
        match self.socket.send_to(msg.as_bytes(), self.target).await {
            Ok(_) => {
                self.sent += 1;
                debug!(dest = %self.target, %msg, "telemetry sent");
                true
            }
            Err(e) => {
                self.dropped += 1;
                warn!(dest = %self.target, error = %e, "telemetry send failed, dropped");
                false
            }
        }
    }
}

/// Per-interval sample log. The first write error disables it.
pub struct CsvLog {
    path: PathBuf,
    out: Option<BufWriter<File>>,
}

impl CsvLog {
    /// Truncate `path` and write the header.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{CSV_HEADER}")?;
        out.flush()?;
        Ok(Self { path: path.to_path_buf(), out: Some(out) })
    }

    pub fn is_active(&self) -> bool {
        self.out.is_some()
    }

    pub fn append(&mut self, at: DateTime<Utc>, host_id: &str, sample: &Sample) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let row = writeln!(
            out,
            "{},{},{:.2},{:.2},{:.4},{}",
            at.to_rfc3339(),
            host_id,
            sample.utilization,
            sample.power_watts,
            sample.score,
            sample.mode
        )
        .and_then(|_| out.flush());

        if let Err(e) = row {
            warn!(path = %self.path.display(), error = %e, "csv log write failed, disabling");
            self.out = None;
        }
    }
}
