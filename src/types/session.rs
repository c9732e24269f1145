//! Session model: one conversation thread with a remote participant.

use serde::Serialize;

use super::message::Message;

/// Last-known presence of the remote client in a session. Always overwritten
/// wholesale by `client_status` envelopes (last-write-wins, never merged).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presence {
    pub client_name: String,
    pub status: String,
    pub last_seen_ms: Option<i64>,
}

impl Presence {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

/// A conversation thread, identified by an opaque server-assigned id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    pub session_id: String,
    /// Ordered ascending by timestamp; arrival order preserved for equal
    /// timestamps.
    pub log: Vec<Message>,
    pub presence: Option<Presence>,
}

impl Session {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            log: Vec::new(),
            presence: None,
        }
    }

    /// Inserts keeping the log sorted by timestamp, after any existing
    /// messages with an equal timestamp (stable for equal keys).
    pub fn insert_ordered(&mut self, message: Message) {
        let idx = self
            .log
            .partition_point(|m| m.timestamp_ms <= message.timestamp_ms);
        self.log.insert(idx, message);
    }

    /// Last-known identity of the remote participant, derived from the log:
    /// the most recent sender that is not us.
    pub fn remote_participant(&self, local_identity: &str) -> Option<&str> {
        self.log
            .iter()
            .rev()
            .map(|m| m.sender.as_str())
            .find(|s| !s.is_empty() && *s != local_identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::MessagePayload;

    fn chat(sender: &str, body: &str, ts: i64) -> Message {
        Message::new(
            sender.into(),
            None,
            MessagePayload::Text { body: body.into() },
            ts,
        )
    }

    #[test]
    fn insert_ordered_sorts_by_timestamp() {
        let mut s = Session::new("A".into());
        s.insert_ordered(chat("x", "second", 2000));
        s.insert_ordered(chat("x", "first", 1000));
        s.insert_ordered(chat("x", "third", 3000));
        let bodies: Vec<_> = s
            .log
            .iter()
            .map(|m| match &m.payload {
                MessagePayload::Text { body } => body.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[test]
    fn equal_timestamps_preserve_arrival_order() {
        let mut s = Session::new("A".into());
        s.insert_ordered(chat("x", "a", 1000));
        s.insert_ordered(chat("x", "b", 1000));
        s.insert_ordered(chat("x", "c", 1000));
        let bodies: Vec<_> = s
            .log
            .iter()
            .map(|m| match &m.payload {
                MessagePayload::Text { body } => body.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(bodies, ["a", "b", "c"]);
    }

    #[test]
    fn remote_participant_skips_local_identity() {
        let mut s = Session::new("A".into());
        s.insert_ordered(chat("peer-1", "hi", 1000));
        s.insert_ordered(chat("me", "hello", 2000));
        assert_eq!(s.remote_participant("me"), Some("peer-1"));
        assert_eq!(s.remote_participant("peer-1"), Some("me"));
    }
}
