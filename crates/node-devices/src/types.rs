use crate::DeviceKind;
use serde::{Deserialize, Serialize};

/// Fleet descriptor: which catalog device sits at which node id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct FleetConfig {
    /// Upper bound on register enumeration per node.
    #[serde(default)]
    pub list_registers_limit: Option<u16>,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct NodeEntry {
    pub id: u8,
    pub kind: DeviceKind,
    #[serde(default)]
    pub label: Option<String>,
}
