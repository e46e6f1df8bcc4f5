//! Forwarding device interface.
//!
//! The device is an external collaborator: the controller only connects,
//! asserts its session identity, pushes the pipeline once and then writes
//! table rules. Error signalling from real devices cannot reliably tell
//! "already exists" apart from other faults, so callers treat every write
//! error the same way.

pub mod p4runtime;
pub mod sim;

pub use p4runtime::P4RuntimeDevice;
pub use sim::SimSwitch;

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("no forwarding pipeline installed")]
    NoPipeline,
    #[error("device io: {0}")]
    Io(String),
}

/// Handle to an established control session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub address: String,
    pub device_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    Insert,
    Modify,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Insert => f.write_str("INSERT"),
            WriteMode::Modify => f.write_str("MODIFY"),
        }
    }
}

/// Compiled program pushed to the device once per session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineProgram {
    /// Binary P4Info describing tables and actions.
    pub p4info: PathBuf,
    /// Target-specific device config (BMv2 JSON).
    pub device_config: PathBuf,
}

/// Exact-match rule keyed by slot index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub table: String,
    pub match_field: String,
    pub match_value: u32,
    pub action: String,
    /// Ordered (name, value) pairs in textual form (MAC, dotted IPv4, decimal).
    pub params: Vec<(String, String)>,
}

impl TableEntry {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

pub trait ForwardingDevice {
    fn connect(&mut self, address: &str, device_id: u64) -> Result<Session, DeviceError>;

    /// Assert this controller's session identity / election id.
    fn handshake(&mut self, session: &Session, election_id: u64) -> Result<(), DeviceError>;

    fn install_pipeline(
        &mut self,
        session: &Session,
        program: &PipelineProgram,
    ) -> Result<(), DeviceError>;

    fn write_rule(
        &mut self,
        session: &Session,
        entry: &TableEntry,
        mode: WriteMode,
    ) -> Result<(), DeviceError>;

    fn read_rule_count(&mut self, session: &Session, table: &str) -> Result<usize, DeviceError>;
}

impl<D: ForwardingDevice + ?Sized> ForwardingDevice for Box<D> {
    fn connect(&mut self, address: &str, device_id: u64) -> Result<Session, DeviceError> {
        (**self).connect(address, device_id)
    }

    fn handshake(&mut self, session: &Session, election_id: u64) -> Result<(), DeviceError> {
        (**self).handshake(session, election_id)
    }

    fn install_pipeline(
        &mut self,
        session: &Session,
        program: &PipelineProgram,
    ) -> Result<(), DeviceError> {
        (**self).install_pipeline(session, program)
    }

    fn write_rule(
        &mut self,
        session: &Session,
        entry: &TableEntry,
        mode: WriteMode,
    ) -> Result<(), DeviceError> {
        (**self).write_rule(session, entry, mode)
    }

    fn read_rule_count(&mut self, session: &Session, table: &str) -> Result<usize, DeviceError> {
        (**self).read_rule_count(session, table)
    }
}
