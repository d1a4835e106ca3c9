use crate::{NodeId, Reply, Status, StatusPush, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

const ENOENT: i32 = 2;

/// Identity fields a mock node reports, laid out like the bus's identity record.
#[derive(Clone, Debug, Default)]
pub struct MockIdentity {
    pub name: String,
    pub protocol_version: (u8, u8),
    pub hardware_version: (u8, u8),
    pub software_version: (u8, u8),
    pub software_vcs_revision_id: u64,
    pub unique_id: [u8; 16],
    pub software_image_crc: u64,
}

impl MockIdentity {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            protocol_version: (1, 0),
            ..Default::default()
        }
    }

    /// Naturally aligned record: versions at 0, revision at 8, uid at 16, name at 32,
    /// CRC at 88, certificate from 96.
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = vec![0u8; 96];
        out[0] = self.protocol_version.0;
        out[1] = self.protocol_version.1;
        out[2] = self.hardware_version.0;
        out[3] = self.hardware_version.1;
        out[4] = self.software_version.0;
        out[5] = self.software_version.1;
        out[8..16].copy_from_slice(&self.software_vcs_revision_id.to_le_bytes());
        out[16..32].copy_from_slice(&self.unique_id);
        let name = self.name.as_bytes();
        let n = name.len().min(51);
        out[32..32 + n].copy_from_slice(&name[..n]);
        out[88..96].copy_from_slice(&self.software_image_crc.to_le_bytes());
        out
    }
}

#[derive(Default)]
struct MockNode {
    identity: Vec<u8>,
    registers: BTreeMap<String, Vec<u8>>,
    failing: Option<i32>,
    failing_registers: HashMap<String, i32>,
}

#[derive(Default)]
struct MockState {
    nodes: HashMap<NodeId, MockNode>,
    identity_fetches: usize,
    accesses: Vec<(NodeId, String)>,
    list_requests: usize,
    commands: Vec<(NodeId, u16, Vec<u8>)>,
}

/// An in-process bus. Registers echo writes and answer empty requests with the
/// last stored record; enumeration walks register names in sorted order.
pub struct MockTransport {
    state: Mutex<MockState>,
    push_tx: UnboundedSender<StatusPush>,
    push_rx: Mutex<Option<UnboundedReceiver<StatusPush>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MockState::default()),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
        }
    }

    pub fn add_node(&self, node: NodeId, identity: &MockIdentity) {
        let mut state = self.state.lock();
        let entry = state.nodes.entry(node).or_default();
        entry.identity = identity.to_record();
    }

    /// Preload a register with a full register record.
    pub fn set_register(&self, node: NodeId, name: &str, record: Vec<u8>) {
        let mut state = self.state.lock();
        let entry = state.nodes.entry(node).or_default();
        entry.registers.insert(name.to_string(), record);
    }

    pub fn register(&self, node: NodeId, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.nodes.get(&node)?.registers.get(name).cloned()
    }

    /// Make every request to `node` fail with `errno` (`None` clears it).
    pub fn fail_node(&self, node: NodeId, errno: Option<i32>) {
        let mut state = self.state.lock();
        state.nodes.entry(node).or_default().failing = errno;
    }

    pub fn fail_register(&self, node: NodeId, name: &str, errno: i32) {
        let mut state = self.state.lock();
        state
            .nodes
            .entry(node)
            .or_default()
            .failing_registers
            .insert(name.to_string(), errno);
    }

    pub fn identity_fetches(&self) -> usize {
        self.state.lock().identity_fetches
    }

    pub fn accesses(&self) -> Vec<(NodeId, String)> {
        self.state.lock().accesses.clone()
    }

    pub fn list_requests(&self) -> usize {
        self.state.lock().list_requests
    }

    pub fn commands(&self) -> Vec<(NodeId, u16, Vec<u8>)> {
        self.state.lock().commands.clone()
    }

    /// Emit a status change on the push stream.
    pub fn push_status(&self, node: NodeId, old: Status, new: Status) -> crate::Result<()> {
        trace!(%node, uptime = new.uptime, mode = new.mode, "mock status push");
        self.push_tx
            .send(StatusPush::new(node, &old, &new))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_identity(&self, node: NodeId) -> Reply {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.identity_fetches += 1;
        match state.nodes.get(&node) {
            Some(MockNode {
                failing: Some(errno),
                ..
            }) => Reply::err(*errno),
            Some(n) => Reply::ok(n.identity.clone()),
            None => Reply::err(ENOENT),
        }
    }

    async fn register_access(&self, node: NodeId, name: &str, request: &[u8]) -> Reply {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.accesses.push((node, name.to_string()));
        trace!(%node, register = name, tag = request.first().copied(), "mock register access");
        let Some(n) = state.nodes.get_mut(&node) else {
            debug!(%node, "mock access to unknown node");
            return Reply::err(ENOENT);
        };
        if let Some(errno) = n.failing.or_else(|| n.failing_registers.get(name).copied()) {
            debug!(%node, register = name, errno, "mock injected failure");
            return Reply::err(errno);
        }
        // Tag 0 is an empty request: a read.
        if request.first().copied().unwrap_or(0) == 0 {
            let current = n
                .registers
                .get(name)
                .cloned()
                .unwrap_or_else(|| request.to_vec());
            return Reply::ok(current);
        }
        n.registers.insert(name.to_string(), request.to_vec());
        Reply::ok(request.to_vec())
    }

    async fn list_register_name(&self, node: NodeId, index: u16) -> Reply {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.list_requests += 1;
        match state.nodes.get(&node) {
            Some(MockNode {
                failing: Some(errno),
                ..
            }) => Reply::err(*errno),
            Some(n) => Reply::ok(
                n.registers
                    .keys()
                    .nth(index as usize)
                    .map(|k| k.as_bytes().to_vec())
                    .unwrap_or_default(),
            ),
            None => Reply::err(ENOENT),
        }
    }

    async fn execute_command(&self, node: NodeId, command: u16, payload: &[u8]) -> Reply {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.commands.push((node, command, payload.to_vec()));
        trace!(%node, command, "mock command");
        match state.nodes.get(&node) {
            Some(n) => match n.failing {
                Some(errno) => Reply::err(errno),
                None => Reply::ok(Vec::new()),
            },
            None => Reply::err(ENOENT),
        }
    }

    fn status_pushes(&self) -> Option<UnboundedReceiver<StatusPush>> {
        self.push_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[tokio::test]
    async fn identity_record_carries_name() {
        let bus = MockTransport::new();
        bus.add_node(id(4), &MockIdentity::named("com.example.node"));
        let reply = bus.fetch_identity(id(4)).await;
        assert_eq!(reply.code, 0);
        assert_eq!(reply.payload.len(), 96);
        assert_eq!(&reply.payload[32..48], b"com.example.node");
        assert_eq!(bus.identity_fetches(), 1);
    }

    #[tokio::test]
    async fn unknown_node_reports_enoent() {
        let bus = MockTransport::new();
        assert_eq!(bus.fetch_identity(id(9)).await.code, -ENOENT);
    }

    #[tokio::test]
    async fn writes_are_echoed_and_read_back() {
        let bus = MockTransport::new();
        bus.add_node(id(1), &MockIdentity::named("n"));
        let mut write = vec![0u8; 8];
        write[0] = 11;
        write[1] = 1;
        write[3] = 42;
        assert_eq!(bus.register_access(id(1), "x", &write).await.payload, write);
        let read = bus.register_access(id(1), "x", &[0u8; 8]).await;
        assert_eq!(read.payload, write);
        assert_eq!(bus.accesses().len(), 2);
    }

    #[tokio::test]
    async fn push_stream_is_taken_once() -> anyhow::Result<()> {
        let bus = MockTransport::new();
        let mut rx = bus.status_pushes().ok_or_else(|| anyhow::anyhow!("taken"))?;
        assert!(bus.status_pushes().is_none());
        bus.push_status(id(2), Status::default(), Status::default())?;
        let push = rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        assert_eq!(push.node_id, id(2));
        Ok(())
    }
}
