use node_transport::{Status, MODE_OFFLINE};

/// Operating mode a node reports in its status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Operational,
    Initialization,
    Maintenance,
    SoftwareUpdate,
    Offline,
    Other(u8),
}

impl From<u8> for Mode {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Mode::Operational,
            1 => Mode::Initialization,
            2 => Mode::Maintenance,
            3 => Mode::SoftwareUpdate,
            MODE_OFFLINE => Mode::Offline,
            other => Mode::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Health {
    Nominal,
    Advisory,
    Caution,
    Warning,
    Other(u8),
}

impl From<u8> for Health {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Health::Nominal,
            1 => Health::Advisory,
            2 => Health::Caution,
            3 => Health::Warning,
            other => Health::Other(other),
        }
    }
}

/// Outcome of applying one status update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    pub old: Status,
    pub new: Status,
    /// Cached identity belongs to a boot session that has ended.
    pub invalidate_info: bool,
}

/// Liveness tracker for one node.
#[derive(Clone, Debug, Default)]
pub struct StatusMachine {
    last: Option<Status>,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status(&mut self, new: Status) -> Transition {
        let (old, invalidate_info) = match self.last {
            None => (new, false),
            Some(old) => {
                let invalidate = if new.mode == MODE_OFFLINE {
                    true
                } else if old.mode == MODE_OFFLINE {
                    // came back online
                    true
                } else {
                    // uptime regressed: rebooted without an observed offline frame
                    new.uptime < old.uptime
                };
                (old, invalidate)
            }
        };
        self.last = Some(new);
        Transition {
            old,
            new,
            invalidate_info,
        }
    }

    pub fn last(&self) -> Option<Status> {
        self.last
    }

    pub fn is_online(&self) -> bool {
        matches!(self.last, Some(s) if s.mode != MODE_OFFLINE)
    }
}
