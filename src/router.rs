//! Inbound envelope routing.
//!
//! The dispatch task consults one table mapping the wire `type` to the
//! component that owns it. Keeping the table data-driven (rather than a
//! match in the dispatch loop) keeps the loop stable as envelope types are
//! added.

use std::collections::HashMap;

use log::debug;

use crate::envelope::Envelope;

/// The component an inbound envelope is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Session/message state: [`crate::store::SessionStore::apply_inbound`].
    Session,
    /// Call signaling: [`crate::calls::CallManager::handle_signal`].
    Call,
    /// Understood but intentionally not delivered anywhere (client-to-server
    /// types echoed back, or types with no inbound meaning).
    Ignore,
}

pub struct Router {
    table: HashMap<&'static str, Route>,
}

impl Router {
    pub fn new() -> Self {
        let mut table = HashMap::new();

        for kind in [
            "registered",
            "sessions",
            "history",
            "chat",
            "file",
            "call_log",
            "client_status",
            "session_closed",
            "session_archived",
        ] {
            table.insert(kind, Route::Session);
        }
        for kind in [
            "call_offer",
            "call_answer",
            "ice_candidate",
            "call_end",
            "call_reject",
        ] {
            table.insert(kind, Route::Call);
        }
        // Client-to-server types; the relay should never push these.
        for kind in [
            "register",
            "get_client_status",
            "close_session",
            "archive_session",
            "restore_session",
        ] {
            table.insert(kind, Route::Ignore);
        }

        Self { table }
    }

    /// Looks up the destination for an envelope. Unmapped types are ignored
    /// with a diagnostic; they never fail the dispatch loop.
    pub fn route(&self, envelope: &Envelope) -> Route {
        match self.table.get(envelope.kind()) {
            Some(route) => *route,
            None => {
                debug!(target: "Router", "no route for envelope type {}", envelope.kind());
                Route::Ignore
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
