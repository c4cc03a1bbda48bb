use thiserror::Error;

/// Failures surfaced by the node façade. Expected conditions (duplicate
/// peer, missing pin, full table) are plain variants, never panics.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node not initialized, call begin() first")]
    Uninitialized,

    #[error("peer already exists")]
    PeerExists,

    #[error("peer table full")]
    PeerTableFull,

    #[error("not found")]
    NotFound,

    #[error("no peers registered")]
    NoPeers,

    #[error("invalid MAC address")]
    InvalidMac,

    #[error("transport error: {0}")]
    Transport(anyhow::Error),

    #[error("persistence error: {0}")]
    Persistence(anyhow::Error),
}

impl NodeError {
    /// Variant check without matching on the payload, for tests and callers
    /// that only branch on the class of failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, NodeError::Transport(_))
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, NodeError::Persistence(_))
    }
}
