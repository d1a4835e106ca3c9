use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub identity_fetches: IntCounter,
    pub register_accesses: IntCounter,
    pub transport_errors: IntCounter,
    pub status_pushes: IntCounter,
    pub info_invalidations: IntCounter,
    pub nodes_online: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let identity_fetches = counter("node_identity_fetches", "Identity fetches issued")?;
        let register_accesses = counter("node_register_accesses", "Register accesses issued")?;
        let transport_errors =
            counter("node_transport_errors", "Requests failed with a transport error")?;
        let status_pushes = counter("node_status_pushes", "Status pushes delivered")?;
        let info_invalidations =
            counter("node_info_invalidations", "Cached identities dropped on restart or offline")?;
        let nodes_online = IntGauge::new("node_online", "Nodes currently reporting online")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let dev = DeviceMetrics {
            identity_fetches,
            register_accesses,
            transport_errors,
            status_pushes,
            info_invalidations,
            nodes_online,
        };
        let registry = Registry::new();
        let _ = registry.register(Box::new(dev.identity_fetches.clone()));
        let _ = registry.register(Box::new(dev.register_accesses.clone()));
        let _ = registry.register(Box::new(dev.transport_errors.clone()));
        let _ = registry.register(Box::new(dev.status_pushes.clone()));
        let _ = registry.register(Box::new(dev.info_invalidations.clone()));
        let _ = registry.register(Box::new(dev.nodes_online.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
