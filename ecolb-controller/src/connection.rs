//! Control session to the forwarding device.
//!
//! `Disconnected -> Connecting -> Connected -> PipelineInstalled -> Ready`,
//! or `Failed` once the retry budget is spent. A session is only handed out
//! in `Ready`, so no rule write can precede the pipeline install. There is
//! no reconnection once `Ready`.

use crate::device::{DeviceError, ForwardingDevice, PipelineProgram, Session};
use crate::error::ControllerError;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_RETRY_BUDGET: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_ELECTION_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    PipelineInstalled,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: DEFAULT_RETRY_BUDGET, backoff: DEFAULT_BACKOFF }
    }
}

pub struct ConnectionManager<D> {
    device: D,
    state: ConnectionState,
    session: Option<Session>,
    retry: RetryPolicy,
    election_id: u64,
}

impl<D: ForwardingDevice> ConnectionManager<D> {
    pub fn new(device: D, retry: RetryPolicy, election_id: u64) -> Self {
        Self {
            device,
            state: ConnectionState::Disconnected,
            session: None,
            retry,
            election_id,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn transition(&mut self, next: ConnectionState) {
        info!(from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    /// Run the whole startup sequence: connect with retries, handshake,
    /// install the pipeline. Any error leaves the manager in `Failed`.
    pub fn establish(
        &mut self,
        address: &str,
        device_id: u64,
        program: &PipelineProgram,
    ) -> Result<(), ControllerError> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }

        let session = self.connect(address, device_id)?;

        if let Err(e) = self.device.install_pipeline(&session, program) {
            error!(error = %e, "pipeline install failed");
            self.transition(ConnectionState::Failed);
            return Err(ControllerError::Pipeline(e));
        }
        self.transition(ConnectionState::PipelineInstalled);

        self.session = Some(session);
        self.transition(ConnectionState::Ready);
        Ok(())
    }

    fn connect(&mut self, address: &str, device_id: u64) -> Result<Session, ControllerError> {
        let attempts = self.retry.attempts.max(1);
        let mut last = DeviceError::Unreachable {
            address: address.to_string(),
            reason: "no attempt made".into(),
        };

        for attempt in 1..=attempts {
            self.transition(ConnectionState::Connecting);
            match self.try_connect(address, device_id) {
                Ok(session) => {
                    info!(address, attempt, election_id = self.election_id, "connected to forwarding device");
                    self.transition(ConnectionState::Connected);
                    return Ok(session);
                }
                Err(e) => {
                    warn!(address, attempt, attempts, error = %e, "device not ready");
                    last = e;
                    self.transition(ConnectionState::Disconnected);
                    if attempt < attempts && !self.retry.backoff.is_zero() {
                        std::thread::sleep(self.retry.backoff);
                    }
                }
            }
        }

        error!(address, attempts, "giving up on forwarding device");
        self.transition(ConnectionState::Failed);
        Err(ControllerError::ConnectionExhausted { attempts, last })
    }

    fn try_connect(&mut self, address: &str, device_id: u64) -> Result<Session, DeviceError> {
        let session = self.device.connect(address, device_id)?;
        self.device.handshake(&session, self.election_id)?;
        Ok(session)
    }

    /// Device and session, only once `Ready`.
    pub fn ready(&mut self) -> Result<(&mut D, &Session), ControllerError> {
        match (self.state, self.session.as_ref()) {
            (ConnectionState::Ready, Some(session)) => Ok((&mut self.device, session)),
            (state, _) => Err(ControllerError::NotReady(state)),
        }
    }
}
