//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::call::CallDirection;

/// Current phase of the (single) call slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallPhase {
    /// No call in progress.
    #[default]
    Idle,
    /// Inbound offer received, waiting for accept or decline.
    Incoming,
    /// Offer being prepared/sent, waiting for the remote answer.
    Outgoing,
    /// Descriptions exchanged, media connection being established.
    Connecting,
    /// Media flowing; duration counter running.
    Connected,
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    /// Local offer produced and sent (caller side).
    OfferSent,
    /// Local accept: answer produced and sent (callee side).
    LocalAccepted,
    /// Remote answer applied (caller side).
    AnswerReceived,
    /// Media engine reports a connected transport (callee side).
    MediaConnected,
    /// Any exit back to idle: hangup, remote end, decline, media failure.
    Ended,
}

/// Full call session information.
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    pub call_id: String,
    pub session_id: String,
    pub peer_name: String,
    pub video: bool,
    pub direction: CallDirection,
    pub created_at: DateTime<Utc>,
    pub phase: CallPhase,
}

impl CallInfo {
    pub fn new_outgoing(call_id: String, session_id: String, peer_name: String, video: bool) -> Self {
        Self {
            call_id,
            session_id,
            peer_name,
            video,
            direction: CallDirection::Outgoing,
            created_at: Utc::now(),
            phase: CallPhase::Outgoing,
        }
    }

    pub fn new_incoming(call_id: String, session_id: String, peer_name: String, video: bool) -> Self {
        Self {
            call_id,
            session_id,
            peer_name,
            video,
            direction: CallDirection::Incoming,
            created_at: Utc::now(),
            phase: CallPhase::Incoming,
        }
    }

    /// Apply a state transition. Returns an error (leaving the state
    /// untouched) if the transition is not a legal edge from the current
    /// phase.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let next = match (self.phase, transition) {
            (CallPhase::Outgoing, CallTransition::OfferSent) => CallPhase::Connecting,
            (CallPhase::Incoming, CallTransition::LocalAccepted) => CallPhase::Connecting,
            (CallPhase::Connecting, CallTransition::AnswerReceived) => CallPhase::Connected,
            (CallPhase::Connecting, CallTransition::MediaConnected) => CallPhase::Connected,
            (
                CallPhase::Incoming
                | CallPhase::Outgoing
                | CallPhase::Connecting
                | CallPhase::Connected,
                CallTransition::Ended,
            ) => CallPhase::Idle,
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_phase: format!("{current:?}"),
                    attempted: format!("{attempted:?}"),
                });
            }
        };
        self.phase = next;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_phase: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in phase {}",
            self.attempted, self.current_phase
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> CallInfo {
        CallInfo::new_outgoing("C1".into(), "A".into(), "peer".into(), false)
    }

    fn incoming() -> CallInfo {
        CallInfo::new_incoming("C2".into(), "A".into(), "peer".into(), true)
    }

    /// Caller flow: Outgoing -> Connecting -> Connected -> Idle.
    #[test]
    fn outgoing_call_flow() {
        let mut call = outgoing();
        call.apply_transition(CallTransition::OfferSent).unwrap();
        assert_eq!(call.phase, CallPhase::Connecting);
        call.apply_transition(CallTransition::AnswerReceived).unwrap();
        assert_eq!(call.phase, CallPhase::Connected);
        call.apply_transition(CallTransition::Ended).unwrap();
        assert_eq!(call.phase, CallPhase::Idle);
    }

    /// Callee flow: Incoming -> Connecting -> Connected -> Idle.
    #[test]
    fn incoming_call_flow() {
        let mut call = incoming();
        call.apply_transition(CallTransition::LocalAccepted).unwrap();
        assert_eq!(call.phase, CallPhase::Connecting);
        call.apply_transition(CallTransition::MediaConnected).unwrap();
        assert_eq!(call.phase, CallPhase::Connected);
        call.apply_transition(CallTransition::Ended).unwrap();
        assert_eq!(call.phase, CallPhase::Idle);
    }

    /// Declining drops straight back to idle from Incoming.
    #[test]
    fn decline_from_incoming() {
        let mut call = incoming();
        call.apply_transition(CallTransition::Ended).unwrap();
        assert_eq!(call.phase, CallPhase::Idle);
    }

    #[test]
    fn illegal_transitions_leave_state_untouched() {
        let mut call = outgoing();
        // Cannot accept or connect from Outgoing.
        assert!(call.apply_transition(CallTransition::LocalAccepted).is_err());
        assert!(call.apply_transition(CallTransition::AnswerReceived).is_err());
        assert_eq!(call.phase, CallPhase::Outgoing);

        let mut call = incoming();
        assert!(call.apply_transition(CallTransition::OfferSent).is_err());
        assert!(call.apply_transition(CallTransition::MediaConnected).is_err());
        assert_eq!(call.phase, CallPhase::Incoming);
    }

    #[test]
    fn connected_rejects_duplicate_connect_transitions() {
        let mut call = outgoing();
        call.apply_transition(CallTransition::OfferSent).unwrap();
        call.apply_transition(CallTransition::AnswerReceived).unwrap();
        assert!(call.apply_transition(CallTransition::MediaConnected).is_err());
        assert_eq!(call.phase, CallPhase::Connected);
    }
}
