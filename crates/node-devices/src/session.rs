use crate::{MetricsHub, StatusRegistry};
use node_transport::Transport;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Upper bound on register enumeration; the index space is 16 bits wide.
pub const DEFAULT_LIST_LIMIT: u16 = u16::MAX;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub list_registers_limit: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            list_registers_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

/// Everything a node needs from its environment: the bus, the shared status
/// registry, metrics and limits. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    registry: Arc<StatusRegistry>,
    metrics: Option<MetricsHub>,
    config: SessionConfig,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            transport,
            registry: Arc::new(StatusRegistry::new()),
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        metrics: MetricsHub,
    ) -> Self {
        Self {
            transport,
            registry: Arc::new(StatusRegistry::with_metrics(metrics.dev.clone())),
            metrics: Some(metrics),
            config,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Start delivering the transport's status pushes. Returns `None` if the push
    /// stream was already taken.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let pushes = self.transport.status_pushes()?;
        let registry = self.registry.clone();
        tracing::info!("status delivery started");
        Some(tokio::spawn(async move { registry.run(pushes).await }))
    }
}
