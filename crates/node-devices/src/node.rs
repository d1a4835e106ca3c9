//! A single field node: cached identity, liveness and raw register access.

use crate::codec::{self, RegisterValue};
use crate::{DeviceMetrics, EncodingError, NodeError, Result, Session, StatusMachine, StatusTracker};
use node_transport::{Command, NodeId, Reply, Status};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Bytes of the identity record this layer reads (everything up to the certificate).
pub const IDENTITY_RECORD_MIN: usize = 96;
const NAME_OFFSET: usize = 32;
const NAME_LEN: usize = 51;
const CERTIFICATE_OFFSET: usize = 96;
const CERTIFICATE_LEN: usize = 222;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// Identity of a node, valid for one boot session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeInfo {
    pub protocol_version: Version,
    pub hardware_version: Version,
    pub software_version: Version,
    pub software_vcs_revision_id: u64,
    pub unique_id: [u8; 16],
    pub name: String,
    pub software_image_crc: u64,
    pub certificate_of_authenticity: Vec<u8>,
}

impl NodeInfo {
    /// Decode the naturally aligned identity record: versions at 0..6, revision id at 8,
    /// unique id at 16, name at 32, image CRC at 88, certificate from 96.
    pub fn from_record(bytes: &[u8]) -> core::result::Result<Self, EncodingError> {
        if bytes.len() < IDENTITY_RECORD_MIN {
            return Err(EncodingError::Length {
                expected: IDENTITY_RECORD_MIN,
                actual: bytes.len(),
            });
        }
        let version = |i: usize| Version {
            major: bytes[i],
            minor: bytes[i + 1],
        };
        let u64_at = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i..i + 8]);
            u64::from_le_bytes(buf)
        };
        let mut unique_id = [0u8; 16];
        unique_id.copy_from_slice(&bytes[16..32]);

        let raw_name = &bytes[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = std::str::from_utf8(&raw_name[..end])
            .map_err(|_| EncodingError::Text)?
            .to_string();

        let cert_end = bytes.len().min(CERTIFICATE_OFFSET + CERTIFICATE_LEN);
        Ok(Self {
            protocol_version: version(0),
            hardware_version: version(2),
            software_version: version(4),
            software_vcs_revision_id: u64_at(8),
            unique_id,
            name,
            software_image_crc: u64_at(88),
            certificate_of_authenticity: bytes[CERTIFICATE_OFFSET..cert_end].to_vec(),
        })
    }
}

#[derive(Default)]
struct InfoSlot {
    cached: Option<NodeInfo>,
    /// Bumped on every invalidation so a fetch that straddles one is not cached.
    generation: u64,
}

struct NodeState {
    id: NodeId,
    machine: Mutex<StatusMachine>,
    info: Mutex<InfoSlot>,
    metrics: Option<DeviceMetrics>,
}

impl NodeState {
    fn invalidate(&self) {
        let mut slot = self.info.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if slot.cached.take().is_some() {
            info!(node = %self.id, "cached identity invalidated");
        }
    }
}

impl StatusTracker for NodeState {
    fn apply(&self, status: Status) {
        let (transition, was_online, is_online) = {
            let mut machine = self.machine.lock();
            let was_online = machine.is_online();
            let transition = machine.on_status(status);
            (transition, was_online, machine.is_online())
        };
        if let Some(m) = &self.metrics {
            match (was_online, is_online) {
                (false, true) => m.nodes_online.inc(),
                (true, false) => m.nodes_online.dec(),
                _ => {}
            }
            if transition.invalidate_info {
                m.info_invalidations.inc();
            }
        }
        if transition.invalidate_info {
            debug!(
                node = %self.id,
                old_uptime = transition.old.uptime,
                new_uptime = transition.new.uptime,
                mode = transition.new.mode,
                "boot session ended"
            );
            self.invalidate();
        }
    }
}

pub struct Node {
    id: NodeId,
    state: Arc<NodeState>,
    fetch: tokio::sync::Mutex<()>,
    session: Session,
}

impl Node {
    /// Create a node and attach its status tracker to the session registry.
    pub fn new(id: NodeId, session: &Session) -> Arc<Self> {
        let state = Arc::new(NodeState {
            id,
            machine: Mutex::new(StatusMachine::new()),
            info: Mutex::new(InfoSlot::default()),
            metrics: session.metrics().map(|m| m.dev.clone()),
        });
        let tracker: Weak<NodeState> = Arc::downgrade(&state);
        session.registry().attach(id, tracker);
        Arc::new(Self {
            id,
            state,
            fetch: tokio::sync::Mutex::new(()),
            session: session.clone(),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn status(&self) -> Option<Status> {
        self.state.machine.lock().last()
    }

    pub fn is_online(&self) -> bool {
        self.state.machine.lock().is_online()
    }

    pub fn cached_info(&self) -> Option<NodeInfo> {
        self.state.info.lock().cached.clone()
    }

    pub fn invalidate_info(&self) {
        self.state.invalidate();
    }

    /// Identity of the node, fetched once per boot session. Concurrent callers
    /// share a single in-flight fetch.
    pub async fn get_info(&self) -> Result<NodeInfo> {
        if let Some(info) = self.cached_info() {
            return Ok(info);
        }
        let _guard = self.fetch.lock().await;
        let generation = {
            let slot = self.state.info.lock();
            if let Some(info) = &slot.cached {
                return Ok(info.clone());
            }
            slot.generation
        };

        debug!(node = %self.id, "fetching identity");
        if let Some(m) = &self.state.metrics {
            m.identity_fetches.inc();
        }
        let reply = self.session.transport().fetch_identity(self.id).await;
        self.check(&reply)?;
        let info = NodeInfo::from_record(&reply.payload)?;

        let mut slot = self.state.info.lock();
        if slot.generation == generation {
            slot.cached = Some(info.clone());
        }
        Ok(info)
    }

    /// Read (`None`) or write one register and return the node's response value.
    pub async fn register_access(
        &self,
        name: &str,
        value: Option<&RegisterValue>,
    ) -> Result<RegisterValue> {
        let empty = RegisterValue::Empty;
        let request = codec::encode(value.unwrap_or(&empty))?;
        debug!(node = %self.id, register = name, ty = %request_type(value), "register access");
        if let Some(m) = &self.state.metrics {
            m.register_accesses.inc();
        }
        let reply = self
            .session
            .transport()
            .register_access(self.id, name, &request)
            .await;
        self.check(&reply)?;
        Ok(codec::decode(&reply.payload)?)
    }

    /// Enumerate register names in node order until an empty name or the session limit.
    pub async fn list_registers(&self) -> Result<Vec<String>> {
        let limit = self.session.config().list_registers_limit;
        let mut names = Vec::new();
        for index in 0..limit {
            let reply = self
                .session
                .transport()
                .list_register_name(self.id, index)
                .await;
            self.check(&reply)?;
            let end = reply
                .payload
                .iter()
                .rposition(|&b| b != 0)
                .map_or(0, |p| p + 1);
            if end == 0 {
                break;
            }
            names.push(String::from_utf8_lossy(&reply.payload[..end]).into_owned());
        }
        debug!(node = %self.id, count = names.len(), "registers listed");
        Ok(names)
    }

    /// Issue a raw command; the reply is returned as the transport produced it.
    pub async fn execute_command(&self, command: Command, payload: &[u8]) -> Reply {
        debug!(node = %self.id, command = command.code(), "execute command");
        self.session
            .transport()
            .execute_command(self.id, command.code(), payload)
            .await
    }

    /// Restart the node, optionally after `delay`. The delay is sent in seconds,
    /// rounded up and saturating at `u16::MAX`.
    pub async fn reboot(&self, delay: Option<Duration>) -> Reply {
        let payload = delay
            .map(|d| {
                let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
                u16::try_from(secs)
                    .unwrap_or(u16::MAX)
                    .to_le_bytes()
                    .to_vec()
            })
            .unwrap_or_default();
        self.execute_command(Command::Restart, &payload).await
    }

    pub async fn store_persistent_states(&self) -> Result<()> {
        let reply = self
            .execute_command(Command::StorePersistentStates, &[])
            .await;
        self.check(&reply)
    }

    pub async fn factory_reset(&self) -> Result<()> {
        let reply = self.execute_command(Command::FactoryReset, &[]).await;
        self.check(&reply)
    }

    fn check(&self, reply: &Reply) -> Result<()> {
        let checked = NodeError::check(reply.code);
        if checked.is_err() {
            if let Some(m) = &self.state.metrics {
                m.transport_errors.inc();
            }
            debug!(node = %self.id, code = reply.code, "transport reported failure");
        }
        checked
    }
}

fn request_type(value: Option<&RegisterValue>) -> codec::RegisterType {
    value.map_or(codec::RegisterType::Empty, RegisterValue::ty)
}

impl Drop for Node {
    fn drop(&mut self) {
        let addr = Arc::as_ptr(&self.state) as *const () as usize;
        self.session.registry().detach(self.id, addr);
        if let Some(m) = &self.state.metrics {
            if self.state.machine.lock().is_online() {
                m.nodes_online.dec();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionConfig;
    use node_transport::{MockIdentity, MockTransport, StatusPush, MODE_OFFLINE};

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn st(uptime: u32, mode: u8) -> Status {
        Status {
            uptime,
            mode,
            ..Default::default()
        }
    }

    fn setup(node: u8, name: &str) -> (Arc<MockTransport>, Session) {
        let bus = Arc::new(MockTransport::new());
        bus.add_node(id(node), &MockIdentity::named(name));
        let session = Session::new(bus.clone(), SessionConfig::default());
        (bus, session)
    }

    #[test]
    fn identity_record_decodes() {
        let mut ident = MockIdentity::named("com.widgetlords.mio.6060");
        ident.hardware_version = (2, 1);
        ident.software_vcs_revision_id = 0xdead_beef;
        ident.unique_id = [7; 16];
        ident.software_image_crc = 42;
        let mut record = ident.to_record();
        record.extend_from_slice(&[1, 2, 3]);

        let info = NodeInfo::from_record(&record).unwrap();
        assert_eq!(info.name, "com.widgetlords.mio.6060");
        assert_eq!(info.protocol_version, Version { major: 1, minor: 0 });
        assert_eq!(info.hardware_version, Version { major: 2, minor: 1 });
        assert_eq!(info.software_vcs_revision_id, 0xdead_beef);
        assert_eq!(info.unique_id, [7; 16]);
        assert_eq!(info.software_image_crc, 42);
        assert_eq!(info.certificate_of_authenticity, vec![1, 2, 3]);
    }

    #[test]
    fn short_identity_record_fails() {
        assert!(matches!(
            NodeInfo::from_record(&[0u8; 40]),
            Err(EncodingError::Length { actual: 40, .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_get_info_shares_one_fetch() {
        let (bus, session) = setup(1, "a");
        let node = Node::new(id(1), &session);
        let (a, b) = tokio::join!(node.get_info(), node.get_info());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(bus.identity_fetches(), 1);
        node.get_info().await.unwrap();
        assert_eq!(bus.identity_fetches(), 1);
    }

    #[tokio::test]
    async fn transport_error_is_negated() {
        let (bus, session) = setup(1, "a");
        bus.fail_node(id(1), Some(110));
        let node = Node::new(id(1), &session);
        assert!(matches!(node.get_info().await, Err(NodeError::Internal(110))));
        assert!(matches!(
            node.register_access("x", None).await,
            Err(NodeError::Internal(110))
        ));
    }

    #[tokio::test]
    async fn uptime_regression_forces_refetch() {
        let (bus, session) = setup(3, "a");
        let node = Node::new(id(3), &session);
        let registry = session.registry();

        registry
            .deliver(&StatusPush::new(id(3), &st(0, 0), &st(10, 0)))
            .unwrap();
        node.get_info().await.unwrap();
        assert_eq!(bus.identity_fetches(), 1);
        assert!(node.is_online());

        registry
            .deliver(&StatusPush::new(id(3), &st(10, 0), &st(2, 0)))
            .unwrap();
        assert!(node.cached_info().is_none());
        node.get_info().await.unwrap();
        assert_eq!(bus.identity_fetches(), 2);
    }

    #[tokio::test]
    async fn offline_then_online_invalidates_twice() {
        let (bus, session) = setup(3, "a");
        let node = Node::new(id(3), &session);
        let registry = session.registry();
        registry
            .deliver(&StatusPush::new(id(3), &st(0, 0), &st(5, 0)))
            .unwrap();
        node.get_info().await.unwrap();

        registry
            .deliver(&StatusPush::new(id(3), &st(5, 0), &st(6, MODE_OFFLINE)))
            .unwrap();
        assert!(!node.is_online());
        assert!(node.cached_info().is_none());
        node.get_info().await.unwrap();

        registry
            .deliver(&StatusPush::new(id(3), &st(6, MODE_OFFLINE), &st(7, 0)))
            .unwrap();
        assert!(node.is_online());
        assert!(node.cached_info().is_none());
        node.get_info().await.unwrap();
        assert_eq!(bus.identity_fetches(), 3);
    }

    #[tokio::test]
    async fn dropped_node_detaches() {
        let (_bus, session) = setup(3, "a");
        let node = Node::new(id(3), &session);
        drop(node);
        assert!(session
            .registry()
            .deliver(&StatusPush::new(id(3), &st(0, 0), &st(1, 0)))
            .is_ok());
    }

    #[tokio::test]
    async fn dropping_online_node_releases_gauge() {
        let bus = Arc::new(MockTransport::new());
        bus.add_node(id(3), &MockIdentity::named("a"));
        let hub = crate::MetricsHub::new().unwrap();
        let session = Session::with_metrics(bus, SessionConfig::default(), hub.clone());
        let online = Node::new(id(3), &session);
        let silent = Node::new(id(4), &session);
        session
            .registry()
            .deliver(&StatusPush::new(id(3), &st(0, 0), &st(1, 0)))
            .unwrap();
        assert_eq!(hub.dev.nodes_online.get(), 1);

        drop(silent);
        assert_eq!(hub.dev.nodes_online.get(), 1);
        drop(online);
        assert_eq!(hub.dev.nodes_online.get(), 0);
    }

    #[tokio::test]
    async fn register_round_trip_through_bus() {
        let (bus, session) = setup(2, "a");
        let node = Node::new(id(2), &session);
        let written = node
            .register_access("ch1.mode", Some(&RegisterValue::Uint8(vec![2])))
            .await
            .unwrap();
        assert_eq!(written, RegisterValue::Uint8(vec![2]));
        let read = node.register_access("ch1.mode", None).await.unwrap();
        assert_eq!(read.as_unsigned(), Some(vec![2]));
        assert_eq!(bus.accesses().len(), 2);
    }

    #[tokio::test]
    async fn list_registers_stops_at_empty_name() {
        let (bus, session) = setup(2, "a");
        let empty = codec::encode(&RegisterValue::Empty).unwrap().to_vec();
        bus.set_register(id(2), "a", empty.clone());
        bus.set_register(id(2), "bb", empty);
        let node = Node::new(id(2), &session);
        assert_eq!(node.list_registers().await.unwrap(), vec!["a", "bb"]);
        assert_eq!(bus.list_requests(), 3);
    }

    #[tokio::test]
    async fn list_registers_honours_limit() {
        let bus = Arc::new(MockTransport::new());
        bus.add_node(id(2), &MockIdentity::named("a"));
        for name in ["a", "b", "c"] {
            bus.set_register(id(2), name, vec![0; codec::REGISTER_RECORD_LEN]);
        }
        let session = Session::new(
            bus.clone(),
            SessionConfig {
                list_registers_limit: 2,
            },
        );
        let node = Node::new(id(2), &session);
        assert_eq!(node.list_registers().await.unwrap(), vec!["a", "b"]);
        assert_eq!(bus.list_requests(), 2);
    }

    #[tokio::test]
    async fn reboot_payloads() {
        let (bus, session) = setup(9, "a");
        let node = Node::new(id(9), &session);
        assert_eq!(node.reboot(None).await.code, 0);
        node.reboot(Some(Duration::from_secs(300))).await;
        node.reboot(Some(Duration::from_secs(100_000))).await;
        node.reboot(Some(Duration::from_millis(500))).await;
        node.reboot(Some(Duration::ZERO)).await;
        let cmds = bus.commands();
        assert_eq!(cmds[0], (id(9), 65535, vec![]));
        assert_eq!(cmds[1], (id(9), 65535, vec![0x2c, 0x01]));
        assert_eq!(cmds[2], (id(9), 65535, vec![0xff, 0xff]));
        assert_eq!(cmds[3], (id(9), 65535, vec![0x01, 0x00]));
        assert_eq!(cmds[4], (id(9), 65535, vec![0x00, 0x00]));
    }

    #[tokio::test]
    async fn command_failures_surface() {
        let (bus, session) = setup(9, "a");
        let node = Node::new(id(9), &session);
        assert!(node.store_persistent_states().await.is_ok());
        bus.fail_node(id(9), Some(5));
        assert!(matches!(
            node.factory_reset().await,
            Err(NodeError::Internal(5))
        ));
        assert_eq!(node.reboot(None).await.code, -5);
    }
}
