//! node-transport: the request/response seam to addressable field nodes
//!
//! This crate defines the four primitives the device layer consumes (identity fetch,
//! register access, register enumeration, command execution) plus the status push
//! stream. Frame encoding and the bus reactor live behind the [`Transport`] trait.
//! The default build enables a `mock` backend so the device layer and CLI can run
//! on any host without hardware attached.

mod types;
pub use types::{
    Command, NodeId, Reply, Status, StatusPush, Timestamp, MODE_OFFLINE, STATUS_RECORD_LEN,
};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Transport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockIdentity, MockTransport};
