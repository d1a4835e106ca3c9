use crate::TransportError;
use core::fmt;
use time::OffsetDateTime;

/// Mode value a node reports when it is offline.
pub const MODE_OFFLINE: u8 = 7;

/// Size of one status record on the push stream (7 bytes padded to 8).
pub const STATUS_RECORD_LEN: usize = 8;

/// 7-bit node address (0..=127)
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(u8);

impl NodeId {
    pub const MAX: u8 = 127;

    pub fn new(id: u8) -> Option<Self> {
        if id <= Self::MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn raw(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u16> for NodeId {
    type Error = TransportError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(NodeId::new)
            .ok_or(TransportError::InvalidNodeId(value))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion of one transport request: errno-style code plus response bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reply {
    pub code: i32,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self { code: 0, payload }
    }

    pub fn err(errno: i32) -> Self {
        Self {
            code: -errno.abs(),
            payload: Vec::new(),
        }
    }

    pub fn is_err(&self) -> bool {
        self.code < 0
    }
}

/// Periodic status a node publishes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Status {
    pub uptime: u32,
    pub health: u8,
    pub mode: u8,
    pub vendor_status: u8,
}

impl Status {
    pub fn is_offline(&self) -> bool {
        self.mode == MODE_OFFLINE
    }

    /// Decode a little-endian status record. Padding beyond byte 7 is ignored.
    pub fn from_record(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 7 {
            return Err(TransportError::InvalidRecord("status shorter than 7 bytes"));
        }
        let mut uptime = [0u8; 4];
        uptime.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            uptime: u32::from_le_bytes(uptime),
            health: bytes[4],
            mode: bytes[5],
            vendor_status: bytes[6],
        })
    }

    pub fn to_record(&self) -> [u8; STATUS_RECORD_LEN] {
        let mut out = [0u8; STATUS_RECORD_LEN];
        out[..4].copy_from_slice(&self.uptime.to_le_bytes());
        out[4] = self.health;
        out[5] = self.mode;
        out[6] = self.vendor_status;
        out
    }
}

/// Raw status change as delivered by the bus; records are undecoded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusPush {
    pub node_id: NodeId,
    pub old: Vec<u8>,
    pub new: Vec<u8>,
    pub received: Timestamp,
}

impl StatusPush {
    pub fn new(node_id: NodeId, old: &Status, new: &Status) -> Self {
        Self {
            node_id,
            old: old.to_record().to_vec(),
            new: new.to_record().to_vec(),
            received: Timestamp::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

/// Standard command codes understood by every node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    StorePersistentStates,
    EmergencyStop,
    FactoryReset,
    BeginSoftwareUpdate,
    PowerOff,
    Restart,
}

impl Command {
    pub fn code(self) -> u16 {
        match self {
            Command::StorePersistentStates => 65530,
            Command::EmergencyStop => 65531,
            Command::FactoryReset => 65532,
            Command::BeginSoftwareUpdate => 65533,
            Command::PowerOff => 65534,
            Command::Restart => 65535,
        }
    }
}
