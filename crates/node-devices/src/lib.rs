//! node-devices: stateful model of field nodes 0..=127
//!
//! A [`Node`] caches its identity for one boot session and drops it when status
//! pushes show a restart. [`StatusRegistry`] fans status changes out to
//! subscribers. Catalog devices expose their I/O through table-driven [`Channel`]s.

pub mod codec;
pub use codec::{RegisterType, RegisterValue, PAYLOAD_LEN, REGISTER_RECORD_LEN};

mod error;
pub use error::{EncodingError, NodeError, Result};

mod status;
pub use status::{Health, Mode, StatusMachine, Transition};

mod registry;
pub use registry::{
    subscriber_fn, FnSubscriber, StatusChange, StatusRegistry, StatusSubscriber, StatusTracker,
    SubscriberKey,
};

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};

mod session;
pub use session::{Session, SessionConfig, DEFAULT_LIST_LIMIT};

mod node;
pub use node::{Node, NodeInfo, Version, IDENTITY_RECORD_MIN};

mod channel;
pub use channel::Channel;

pub mod catalog;
pub use catalog::{Device, DeviceKind, DeviceModel};

mod types;
pub use types::*;

mod loader;
pub use loader::{load_fleet_file, parse_fleet, Fleet, FleetDevice};
