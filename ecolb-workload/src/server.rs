//! Request server: burn CPU for a fixed time, answer `Reply from <id>`.

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const REPLY_PREFIX: &str = "Reply from ";

/// Spin for `work`. Deliberately busy, the point is measurable CPU load.
pub fn burn(work: Duration) {
    let end = Instant::now() + work;
    let mut x: u64 = 1;
    while Instant::now() < end {
        x = std::hint::black_box(x.wrapping_mul(6364136223846793005).wrapping_add(1));
    }
}

pub struct RequestServer {
    socket: UdpSocket,
    identity: String,
    work: Duration,
    served: u64,
}

impl RequestServer {
    pub async fn bind(addr: &str, identity: String, work: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, id = %identity, work_ms = work.as_millis() as u64, "workload server listening");
        Ok(Self { socket, identity, work, served: 0 })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests one at a time. `limit` bounds the count (tests).
    /// Returns the number served.
    pub async fn serve(&mut self, limit: Option<u64>) -> Result<u64> {
        let reply = format!("{REPLY_PREFIX}{}", self.identity);
        let mut buf = [0u8; 1024];

        while limit.map_or(true, |l| self.served < l) {
            let (_, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    continue;
                }
            };

            if !self.work.is_zero() {
                let work = self.work;
                tokio::task::spawn_blocking(move || burn(work)).await?;
            }
            if let Err(e) = self.socket.send_to(reply.as_bytes(), peer).await {
                debug!(%peer, error = %e, "reply dropped");
            }
            self.served += 1;
        }
        Ok(self.served)
    }
}
