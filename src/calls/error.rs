//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("another call is already active")]
    Busy,

    #[error("no active call")]
    NoActiveCall,

    #[error(transparent)]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("media engine failure: {0}")]
    Media(#[source] anyhow::Error),
}
