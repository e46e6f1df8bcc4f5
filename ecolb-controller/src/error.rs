//! Controller error types.
//!
//! Only startup failures surface as `ControllerError`; everything that can
//! go wrong in the steady-state loop is recovered where it happens.

use crate::connection::ConnectionState;
use crate::device::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("forwarding device unreachable after {attempts} attempts: {last}")]
    ConnectionExhausted { attempts: u32, last: DeviceError },

    #[error("pipeline install failed: {0}")]
    Pipeline(DeviceError),

    #[error("connection not ready (state {0:?})")]
    NotReady(ConnectionState),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
