//! Status subscriber registry and push delivery.

use crate::DeviceMetrics;
use async_trait::async_trait;
use node_transport::{NodeId, Status, StatusPush, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace, warn};

/// Slot index of the wildcard subscriber set.
const WILDCARD_SLOT: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SubscriberKey {
    Node(NodeId),
    /// Every node.
    Any,
}

impl SubscriberKey {
    fn slot(self) -> usize {
        match self {
            SubscriberKey::Node(id) => usize::from(id.raw()),
            SubscriberKey::Any => WILDCARD_SLOT,
        }
    }
}

impl From<NodeId> for SubscriberKey {
    fn from(id: NodeId) -> Self {
        SubscriberKey::Node(id)
    }
}

/// One observed status change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusChange {
    pub node_id: NodeId,
    pub old: Status,
    pub new: Status,
    /// When the bus received the push; dispatch time for direct dispatches.
    pub received: Timestamp,
}

/// Asynchronous observer of status changes. Each delivery runs as its own task.
#[async_trait]
pub trait StatusSubscriber: Send + Sync + 'static {
    async fn on_status(&self, change: StatusChange) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a subscriber.
pub struct FnSubscriber<F>(F);

#[async_trait]
impl<F, Fut> StatusSubscriber for FnSubscriber<F>
where
    F: Fn(StatusChange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_status(&self, change: StatusChange) -> anyhow::Result<()> {
        (self.0)(change).await
    }
}

pub fn subscriber_fn<F, Fut>(f: F) -> Arc<dyn StatusSubscriber>
where
    F: Fn(StatusChange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnSubscriber(f))
}

/// Synchronous status hook a node installs under its own id. Runs on the
/// delivery path, before any subscriber task is spawned.
pub trait StatusTracker: Send + Sync {
    fn apply(&self, status: Status);
}

type Handle = Arc<dyn StatusSubscriber>;

fn handle_addr(handle: &Handle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

pub struct StatusRegistry {
    subscribers: RwLock<Vec<HashMap<usize, Handle>>>,
    trackers: RwLock<HashMap<NodeId, HashMap<usize, Weak<dyn StatusTracker>>>>,
    metrics: Option<DeviceMetrics>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new((0..=WILDCARD_SLOT).map(|_| HashMap::new()).collect()),
            trackers: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(metrics: DeviceMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new()
        }
    }

    /// Add a subscriber; subscribing the same handle twice is a no-op.
    pub fn subscribe(&self, key: impl Into<SubscriberKey>, handle: Handle) {
        let key = key.into();
        self.subscribers.write()[key.slot()].insert(handle_addr(&handle), handle);
    }

    pub fn unsubscribe(&self, key: impl Into<SubscriberKey>, handle: &Handle) {
        let key = key.into();
        self.subscribers.write()[key.slot()].remove(&handle_addr(handle));
    }

    pub fn subscriber_count(&self, key: impl Into<SubscriberKey>) -> usize {
        self.subscribers.read()[key.into().slot()].len()
    }

    pub fn attach(&self, node_id: NodeId, tracker: Weak<dyn StatusTracker>) {
        let addr = Weak::as_ptr(&tracker) as *const () as usize;
        self.trackers
            .write()
            .entry(node_id)
            .or_default()
            .insert(addr, tracker);
    }

    /// Remove the tracker whose allocation starts at `addr`.
    pub fn detach(&self, node_id: NodeId, addr: usize) {
        let mut trackers = self.trackers.write();
        if let Some(set) = trackers.get_mut(&node_id) {
            set.remove(&addr);
            if set.is_empty() {
                trackers.remove(&node_id);
            }
        }
    }

    /// Fan a change out: subscribers of `node_id` first, then wildcard subscribers.
    /// Each call runs as a detached task; failures are logged and dropped.
    pub fn dispatch(&self, node_id: NodeId, old: Status, new: Status) {
        self.fan_out(StatusChange {
            node_id,
            old,
            new,
            received: Timestamp::now(),
        });
    }

    fn fan_out(&self, change: StatusChange) {
        let node_id = change.node_id;
        let handles: Vec<Handle> = {
            let subs = self.subscribers.read();
            subs[usize::from(node_id.raw())]
                .values()
                .chain(subs[WILDCARD_SLOT].values())
                .cloned()
                .collect()
        };
        if handles.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(node = %node_id, "no runtime, status change not dispatched");
            return;
        };
        for handle in handles {
            runtime.spawn(async move {
                if let Err(e) = handle.on_status(change).await {
                    warn!(node = %node_id, error = %e, "status subscriber failed");
                }
            });
        }
    }

    /// Decode one push, update the node trackers, then dispatch.
    pub fn deliver(&self, push: &StatusPush) -> node_transport::Result<()> {
        let old = Status::from_record(&push.old)?;
        let new = Status::from_record(&push.new)?;
        if let Some(m) = &self.metrics {
            m.status_pushes.inc();
        }
        trace!(node = %push.node_id, uptime = new.uptime, mode = new.mode, "status push");

        let (live, dead) = {
            let trackers = self.trackers.read();
            let mut live = Vec::new();
            let mut dead = false;
            for tracker in trackers.get(&push.node_id).into_iter().flat_map(|s| s.values()) {
                match tracker.upgrade() {
                    Some(t) => live.push(t),
                    None => dead = true,
                }
            }
            (live, dead)
        };
        if dead {
            self.prune(push.node_id);
        }
        for tracker in live {
            tracker.apply(new);
        }

        self.fan_out(StatusChange {
            node_id: push.node_id,
            old,
            new,
            received: push.received,
        });
        Ok(())
    }

    fn prune(&self, node_id: NodeId) {
        let mut trackers = self.trackers.write();
        if let Some(set) = trackers.get_mut(&node_id) {
            set.retain(|_, t| t.strong_count() > 0);
        }
    }

    /// Deliver pushes in arrival order until the stream closes.
    pub async fn run(&self, mut pushes: UnboundedReceiver<StatusPush>) {
        while let Some(push) = pushes.recv().await {
            if let Err(e) = self.deliver(&push) {
                warn!(node = %push.node_id, error = %e, "dropping malformed status push");
            }
        }
        debug!("status push stream closed");
    }
}
