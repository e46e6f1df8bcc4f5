//! ecolb controller: collects host telemetry, ranks hosts and keeps the
//! forwarding table's next-hop slots pointed at the best ones.

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod health;
pub mod listener;
pub mod models;
pub mod policy;
pub mod reconciler;
pub mod state;

pub use connection::{ConnectionManager, ConnectionState, RetryPolicy};
pub use error::{ControllerError, ControllerResult};
pub use listener::ControlLoop;
