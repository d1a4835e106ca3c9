use crate::types::{FleetConfig, NodeEntry};
use crate::{Device, MetricsHub, Session, SessionConfig};
use anyhow::{bail, Context};
use node_transport::{NodeId, Transport};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Read a fleet descriptor; `.json` files are parsed as JSON, anything else as YAML.
pub fn load_fleet_file(path: impl AsRef<Path>) -> anyhow::Result<FleetConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading fleet: {}", path.display()))?;
    let config: FleetConfig = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw).with_context(|| format!("parsing json: {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?
    };
    config
        .validate()
        .with_context(|| format!("validating fleet: {}", path.display()))?;
    Ok(config)
}

pub fn parse_fleet(yaml: &str) -> anyhow::Result<FleetConfig> {
    let config: FleetConfig = serde_yaml::from_str(yaml).context("parsing fleet yaml")?;
    config.validate()?;
    Ok(config)
}

impl FleetConfig {
    /// Node ids must be in range and unique.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.nodes {
            if NodeId::new(entry.id).is_none() {
                bail!("node id {} out of range 0..={}", entry.id, NodeId::MAX);
            }
            if !seen.insert(entry.id) {
                bail!("node id {} listed twice", entry.id);
            }
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(limit) = self.list_registers_limit {
            config.list_registers_limit = limit;
        }
        config
    }
}

pub struct FleetDevice {
    pub label: Option<String>,
    pub device: Device,
}

/// Catalog devices built from a descriptor, sharing one session.
pub struct Fleet {
    pub session: Session,
    pub devices: BTreeMap<NodeId, FleetDevice>,
}

impl Fleet {
    pub fn from_config(
        transport: Arc<dyn Transport>,
        config: &FleetConfig,
    ) -> anyhow::Result<Self> {
        Self::build(Session::new(transport, config.session_config()), config)
    }

    pub fn with_metrics(
        transport: Arc<dyn Transport>,
        config: &FleetConfig,
        metrics: MetricsHub,
    ) -> anyhow::Result<Self> {
        Self::build(
            Session::with_metrics(transport, config.session_config(), metrics),
            config,
        )
    }

    fn build(session: Session, config: &FleetConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let devices = config
            .nodes
            .iter()
            .filter_map(|NodeEntry { id, kind, label }| {
                let id = NodeId::new(*id)?;
                let device = Device::new(*kind, id, &session);
                Some((
                    id,
                    FleetDevice {
                        label: label.clone(),
                        device,
                    },
                ))
            })
            .collect();
        tracing::info!(nodes = config.nodes.len(), "fleet loaded");
        Ok(Self { session, devices })
    }

    pub fn get(&self, id: NodeId) -> Option<&FleetDevice> {
        self.devices.get(&id)
    }

    /// Check every device's reported identity against its catalog entry.
    pub async fn verify(&self) -> Vec<(NodeId, crate::Result<()>)> {
        let checks = self.devices.iter().map(|(id, entry)| async move {
            (*id, entry.device.check_identity().await.map(|_| ()))
        });
        futures::future::join_all(checks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceKind, NodeError};
    use node_transport::{MockIdentity, MockTransport};

    const FLEET: &str = r#"
list_registers_limit: 64
nodes:
  - id: 3
    kind: vpe6060
    label: pump counters
  - id: 12
    kind: vpe6080
"#;

    #[test]
    fn parses_descriptor() {
        let config = parse_fleet(FLEET).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].kind, DeviceKind::Vpe6060);
        assert_eq!(config.nodes[0].label.as_deref(), Some("pump counters"));
        assert_eq!(config.session_config().list_registers_limit, 64);
    }

    #[test]
    fn rejects_bad_ids() {
        let err = parse_fleet("nodes:\n  - id: 128\n    kind: vpe6030\n").unwrap_err();
        assert!(err.to_string().contains("out of range"));
        let dup = "nodes:\n  - {id: 4, kind: vpe6030}\n  - {id: 4, kind: vpe6040}\n";
        assert!(parse_fleet(dup).unwrap_err().to_string().contains("twice"));
        assert!(parse_fleet("nodes:\n  - {id: 4, kind: vpe9999}\n").is_err());
    }

    #[test]
    fn loads_json_file() {
        let path = std::env::temp_dir().join(format!("fleet-{}.json", std::process::id()));
        fs::write(&path, r#"{"nodes":[{"id":7,"kind":"vpe6190"}]}"#).unwrap();
        let config = load_fleet_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.nodes[0].id, 7);
        assert_eq!(config.list_registers_limit, None);
    }

    #[tokio::test]
    async fn builds_and_verifies_devices() {
        let bus = Arc::new(MockTransport::new());
        bus.add_node(NodeId::new(3).unwrap(), &MockIdentity::named("com.widgetlords.mio.6060"));
        bus.add_node(NodeId::new(12).unwrap(), &MockIdentity::named("com.widgetlords.mio.6040"));
        let fleet = Fleet::from_config(bus, &parse_fleet(FLEET).unwrap()).unwrap();
        assert_eq!(fleet.devices.len(), 2);
        let counters = fleet.get(NodeId::new(3).unwrap()).unwrap();
        assert_eq!(counters.device.channels().len(), 4);

        let results = fleet.verify().await;
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(NodeError::WrongNode { .. })));
    }
}
