/*!
Loopback telemetry receiver

Binds an ephemeral UDP port on 127.0.0.1 and records every datagram it
receives, so reporters can be tested without a running controller.
*/

use anyhow::{Context, Result};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDatagram {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

impl CapturedDatagram {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub struct TelemetryCapture {
    socket: UdpSocket,
    addr: SocketAddr,
    received: Vec<CapturedDatagram>,
}

impl TelemetryCapture {
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").context("binding capture socket")?;
        let addr = socket.local_addr()?;
        Ok(Self { socket, addr, received: Vec::new() })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a raw datagram to the capture, as a reporter would.
    pub fn inject(&self, payload: &[u8]) -> Result<()> {
        let tx = UdpSocket::bind("127.0.0.1:0")?;
        tx.send_to(payload, self.addr())?;
        Ok(())
    }

    /// Wait for the next datagram, `None` on timeout.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<CapturedDatagram>> {
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; 2048];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let d = CapturedDatagram { from, payload: buf[..len].to_vec() };
                self.received.push(d.clone());
                Ok(Some(d))
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Collect datagrams until `count` have arrived or `timeout` elapses.
    pub fn wait_for(&mut self, count: usize, timeout: Duration) -> Result<&[CapturedDatagram]> {
        let deadline = Instant::now() + timeout;
        while self.received.len() < count {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() || self.recv_timeout(left)?.is_none() {
                break;
            }
        }
        Ok(&self.received)
    }

    pub fn received(&self) -> &[CapturedDatagram] {
        &self.received
    }

    pub fn clear(&mut self) {
        self.received.clear();
    }
}
