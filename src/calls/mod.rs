//! Call signaling over the relay connection.
//!
//! Sequences the offer/answer/ICE exchange for one peer call at a time and
//! maps transport/media events onto call lifecycle transitions.
//!
//! - [`CallPhase`] & [`CallInfo`]: the call state machine
//! - [`MediaEngine`]: the seam to the actual media/negotiation stack
//! - [`CallManager`]: orchestrates signaling envelopes and state

mod error;
mod manager;
mod media;
mod state;

pub use error::SignalingError;
pub use manager::{CallLogRecord, CallManager};
pub use media::{MediaConnectionState, MediaEngine, MediaEngineEvent, MediaEngineFactory};
pub use state::{CallInfo, CallPhase, CallTransition, InvalidTransition};
