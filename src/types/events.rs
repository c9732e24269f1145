//! Typed event fan-out.
//!
//! Collaborators subscribe to the channels they care about; the core never
//! knows who is listening. Each event type gets its own broadcast channel so
//! subscribers receive strongly-typed values instead of dictionary payloads.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::calls::CallPhase;
use crate::types::message::Message;
use crate::types::session::Presence;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with one broadcast channel per event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Connection events
    (connected, Arc<Connected>),
    (disconnected, Arc<Disconnected>),

    // Session events
    (session_updated, Arc<SessionUpdated>),
    (new_message, Arc<NewMessage>),
    (session_archived, Arc<SessionArchivedEvent>),
    (session_restored, Arc<SessionRestoredEvent>),
    (presence_updated, Arc<PresenceUpdated>),

    // Call events
    (incoming_call, Arc<IncomingCall>),
    (call_state_changed, Arc<CallStateChanged>),
    (call_ended, Arc<CallEnded>),
    (signaling_failure, Arc<SignalingFailure>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Connected;

#[derive(Debug, Clone)]
pub struct Disconnected {
    /// False once the reconnect budget is exhausted or the disconnect was
    /// deliberate.
    pub will_retry: bool,
}

#[derive(Debug, Clone)]
pub struct SessionUpdated {
    pub session_id: String,
}

/// A message from the remote participant was appended (used by collaborators
/// for alerts; own echoes never produce this).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: String,
    pub message: Message,
}

#[derive(Debug, Clone)]
pub struct SessionArchivedEvent {
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct SessionRestoredEvent {
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct PresenceUpdated {
    pub session_id: String,
    pub presence: Presence,
}

#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub call_id: String,
    pub session_id: String,
    pub peer_name: String,
    pub video: bool,
}

#[derive(Debug, Clone)]
pub struct CallStateChanged {
    pub call_id: String,
    pub phase: CallPhase,
}

#[derive(Debug, Clone)]
pub struct CallEnded {
    pub call_id: String,
    pub session_id: String,
    pub duration_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SignalingFailure {
    pub call_id: Option<String>,
    pub reason: String,
}
