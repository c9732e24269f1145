//! Media engine seam.
//!
//! The core drives negotiation through this interface and never implements
//! media internals itself. A concrete engine (WebRTC stack, test double)
//! reports its local candidates and connectivity changes through the event
//! channel returned by the factory.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::envelope::IceCandidateData;

/// Connectivity state reported by the engine's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaConnectionState {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum MediaEngineEvent {
    /// A locally gathered ICE candidate ready to be signaled to the peer.
    LocalCandidate(IceCandidateData),
    ConnectionState(MediaConnectionState),
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Produces (and applies locally) an offer session description.
    async fn create_offer(&self, video: bool) -> Result<String, anyhow::Error>;

    /// Produces (and applies locally) an answer honoring the offer.
    async fn create_answer(&self, video: bool) -> Result<String, anyhow::Error>;

    async fn set_remote_description(&self, sdp: &str) -> Result<(), anyhow::Error>;

    async fn add_ice_candidate(&self, candidate: &IceCandidateData) -> Result<(), anyhow::Error>;

    /// Releases the engine. Idempotent.
    async fn close(&self);
}

/// Creates one engine per call, with its stream of events.
#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    async fn create_engine(
        &self,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::Receiver<MediaEngineEvent>), anyhow::Error>;
}
