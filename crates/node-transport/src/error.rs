use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node id out of range: {0}")]
    InvalidNodeId(u16),
    #[error("status push channel closed")]
    Closed,
    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),
}
