use crate::{NodeId, Reply, StatusPush};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// The asynchronous request/response interface a field bus exposes.
///
/// Every request resolves to a [`Reply`]; a negative `code` is an errno-style
/// failure reported by the bus. Timeouts and retries are the implementor's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the identity record of a node.
    async fn fetch_identity(&self, node: NodeId) -> Reply;

    /// Read or write one named register. `request` is a full register record.
    async fn register_access(&self, node: NodeId, name: &str, request: &[u8]) -> Reply;

    /// Fetch the register name at `index`; an empty payload marks the end of the list.
    async fn list_register_name(&self, node: NodeId, index: u16) -> Reply;

    /// Execute a numbered command with an opaque parameter payload.
    async fn execute_command(&self, node: NodeId, command: u16, payload: &[u8]) -> Reply;

    /// Hand out the status push stream. Returns `None` once it has been taken.
    fn status_pushes(&self) -> Option<UnboundedReceiver<StatusPush>>;
}
