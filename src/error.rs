//! Error taxonomy, one enum per failure domain.

use thiserror::Error;

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(#[source] anyhow::Error),

    #[error("failed to send frame: {0}")]
    Send(#[source] anyhow::Error),

    #[error("ping failed: {0}")]
    Ping(#[source] anyhow::Error),

    #[error("not connected")]
    NotConnected,
}

/// Frame decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope has no type field")]
    MissingType,

    #[error("unknown envelope type {0:?}")]
    UnknownType(String),
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("unknown session {0}")]
    UnknownSession(String),
}

/// Top-level client failures surfaced through the public API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signaling(#[from] crate::calls::SignalingError),
}
