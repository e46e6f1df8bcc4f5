//! Open-loop load generator: fixed request rate, replies tallied per server.

use crate::server::REPLY_PREFIX;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub sent: u64,
    /// Replies per answering server id.
    pub replies: BTreeMap<String, u64>,
}

impl LoadReport {
    pub fn received(&self) -> u64 {
        self.replies.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub target: String,
    pub rate: u32,
    pub duration: Duration,
    /// How long to keep collecting replies after the last request.
    pub grace: Duration,
}

pub async fn run(plan: &LoadPlan) -> Result<LoadReport> {
    let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
    socket.connect(&plan.target).await?;

    let rx = socket.clone();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let collector = tokio::spawn(async move {
        let mut replies = BTreeMap::<String, u64>::new();
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                r = rx.recv(&mut buf) => match r {
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]);
                        let id = text.strip_prefix(REPLY_PREFIX).unwrap_or("unknown").trim().to_string();
                        *replies.entry(id).or_default() += 1;
                    }
                    Err(e) => debug!(error = %e, "receive failed"),
                },
            }
        }
        replies
    });

    let period = Duration::from_secs_f64(1.0 / f64::from(plan.rate.max(1)));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let total = (plan.duration.as_secs_f64() * f64::from(plan.rate)).ceil() as u64;

    info!(dest = %plan.target, rate = plan.rate, requests = total, "load started");
    let mut sent = 0u64;
    while sent < total {
        ticker.tick().await;
        if let Err(e) = socket.send(format!("req {sent}").as_bytes()).await {
            debug!(error = %e, "request not sent");
        }
        sent += 1;
    }

    tokio::time::sleep(plan.grace).await;
    let _ = stop_tx.send(());
    let replies = collector.await?;
    let report = LoadReport { sent, replies };
    info!(sent = report.sent, received = report.received(), per_server = ?report.replies, "load finished");
    Ok(report)
}
