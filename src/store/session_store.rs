//! In-memory session state with optimistic-message reconciliation.
//!
//! All mutation funnels through [`SessionStore::apply_inbound`] and the
//! explicit send/close/archive methods; the client serializes calls on its
//! single dispatch task, so the store itself needs no interior locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::envelope::Envelope;
use crate::error::StoreError;
use crate::store::dedup::DedupWindow;
use crate::store::traits::KeyValueStore;
use crate::types::events::{
    EventBus, NewMessage, PresenceUpdated, SessionArchivedEvent, SessionRestoredEvent,
    SessionUpdated,
};
use crate::types::message::{Message, MessagePayload, normalize_timestamp_ms, now_ms};
use crate::types::session::{Presence, Session};

const ARCHIVED_KEY: &str = "archived_sessions";

fn read_position_key(session_id: &str) -> String {
    format!("read_position/{session_id}")
}

/// Lifecycle of an optimistic entry. Entries leave the pending map as soon as
/// they are confirmed or failed; the log keeps the confirmed message in its
/// original position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    session_id: String,
    timestamp_ms: i64,
    /// Text body for chats, file name for files.
    token: String,
}

#[derive(Debug)]
struct PendingEntry {
    message_id: u64,
    state: PendingState,
}

/// A file reference returned by the out-of-band upload endpoint.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub file_name: String,
    pub file_url: String,
    pub mime_type: String,
    pub size: u64,
}

pub struct SessionStore {
    local_identity: String,
    kv: Arc<dyn KeyValueStore>,
    bus: Arc<EventBus>,
    sessions: HashMap<String, Session>,
    archived: HashSet<String>,
    dedup: DedupWindow,
    pending: HashMap<PendingKey, PendingEntry>,
    /// Currently focused session, if any. Cleared when that session is
    /// archived.
    focus: Option<String>,
}

impl SessionStore {
    pub async fn new(
        local_identity: impl Into<String>,
        kv: Arc<dyn KeyValueStore>,
        bus: Arc<EventBus>,
    ) -> Result<Self, StoreError> {
        let archived = match kv.get(ARCHIVED_KEY).await? {
            Some(raw) => serde_json::from_str::<HashSet<String>>(&raw).unwrap_or_else(|e| {
                warn!(target: "Store", "discarding unreadable archive list: {e}");
                HashSet::new()
            }),
            None => HashSet::new(),
        };
        Ok(Self {
            local_identity: local_identity.into(),
            kv,
            bus,
            sessions: HashMap::new(),
            archived,
            dedup: DedupWindow::default(),
            pending: HashMap::new(),
            focus: None,
        })
    }

    // ---- accessors -------------------------------------------------------

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Sessions in the active view (everything not archived).
    pub fn active_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions
            .values()
            .filter(|s| !self.archived.contains(&s.session_id))
    }

    pub fn is_archived(&self, session_id: &str) -> bool {
        self.archived.contains(session_id)
    }

    pub fn archived_ids(&self) -> impl Iterator<Item = &str> {
        self.archived.iter().map(String::as_str)
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn set_focus(&mut self, session_id: Option<String>) {
        self.focus = session_id;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ---- inbound ---------------------------------------------------------

    /// The single mutation entry point for server-pushed envelopes. Malformed
    /// or out-of-place envelopes are dropped with a diagnostic, never
    /// propagated.
    pub async fn apply_inbound(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::Registered { session_uuid } => {
                if let Some(id) = session_uuid {
                    self.ensure_session(id);
                }
            }
            Envelope::Sessions { sessions } => {
                for reference in sessions {
                    self.ensure_session(&reference.session_uuid);
                }
            }
            Envelope::History {
                session_uuid,
                messages,
            } => {
                let received_at = now_ms();
                let log: Vec<Message> = messages
                    .iter()
                    .filter_map(|entry| {
                        let message = Message::from_history(entry, received_at);
                        if message.is_none() {
                            warn!(target: "Store", "dropping unusable history entry of type {:?}", entry.kind);
                        }
                        message
                    })
                    .collect();
                // Wholesale replacement, preserving the server's order.
                self.ensure_session(session_uuid).log = log;
                self.notify_updated(session_uuid);
            }
            Envelope::Chat {
                session_uuid,
                target_session,
                from,
                to,
                message,
                timestamp,
            } => {
                let Some(session_id) = session_uuid.as_deref().or(target_session.as_deref())
                else {
                    warn!(target: "Store", "dropping chat without a session id");
                    return;
                };
                let session_id = session_id.to_string();
                let msg = Message::new(
                    from.clone().unwrap_or_default(),
                    to.clone(),
                    MessagePayload::Text {
                        body: message.clone(),
                    },
                    normalize_timestamp_ms(*timestamp, now_ms()),
                );
                self.reconcile_inbound(&session_id, msg);
            }
            Envelope::File {
                session_uuid,
                target_session,
                from,
                to,
                file_name,
                file_url,
                mime_type,
                size,
                timestamp,
            } => {
                let Some(session_id) = session_uuid.as_deref().or(target_session.as_deref())
                else {
                    warn!(target: "Store", "dropping file message without a session id");
                    return;
                };
                let session_id = session_id.to_string();
                let msg = Message::new(
                    from.clone().unwrap_or_default(),
                    to.clone(),
                    MessagePayload::File {
                        file_name: file_name.clone(),
                        file_url: file_url.clone(),
                        mime_type: mime_type.clone(),
                        size: *size,
                    },
                    normalize_timestamp_ms(*timestamp, now_ms()),
                );
                self.reconcile_inbound(&session_id, msg);
            }
            Envelope::CallLog {
                session_uuid,
                call_duration,
                timestamp,
                from,
            } => {
                // Call completions are naturally unique; never deduplicated.
                let msg = Message::new(
                    from.clone().unwrap_or_default(),
                    None,
                    MessagePayload::CallLog {
                        duration_secs: *call_duration,
                    },
                    normalize_timestamp_ms(*timestamp, now_ms()),
                );
                self.ensure_session(session_uuid).insert_ordered(msg);
                self.notify_updated(session_uuid);
            }
            Envelope::ClientStatus {
                session_uuid,
                client_name,
                status,
                last_seen,
            } => {
                let presence = Presence {
                    client_name: client_name.clone(),
                    status: status.clone(),
                    last_seen_ms: *last_seen,
                };
                // Last write wins, never merged.
                self.ensure_session(session_uuid).presence = Some(presence.clone());
                let _ = self.bus.presence_updated.send(Arc::new(PresenceUpdated {
                    session_id: session_uuid.clone(),
                    presence,
                }));
            }
            Envelope::SessionClosed { session_uuid }
            | Envelope::SessionArchived { session_uuid } => {
                self.archive_locally(session_uuid).await;
            }
            other => {
                debug!(target: "Store", "ignoring envelope of type {}", other.kind());
            }
        }
    }

    /// De-dup, pending reconciliation, and append logic shared by chat and
    /// file envelopes.
    fn reconcile_inbound(&mut self, session_id: &str, incoming: Message) {
        let fingerprint = incoming.fingerprint();
        if !self.dedup.insert(fingerprint) {
            debug!(target: "Store", "dropping replayed message in session {session_id}");
            return;
        }

        let own_echo = incoming.sender == self.local_identity;
        if own_echo {
            if let Some(token) = incoming.pending_token() {
                let key = PendingKey {
                    session_id: session_id.to_string(),
                    timestamp_ms: incoming.timestamp_ms,
                    token,
                };
                if let Some(mut entry) = self.pending.remove(&key) {
                    entry.state = PendingState::Confirmed;
                    self.confirm_in_place(session_id, entry.message_id, incoming);
                    return;
                }
            }
        }

        let session = self.ensure_session(session_id);
        let duplicate = session.log.iter().any(|m| {
            m.timestamp_ms == incoming.timestamp_ms
                && m.sender == incoming.sender
                && m.payload == incoming.payload
        });
        if duplicate {
            debug!(target: "Store", "dropping equivalent message in session {session_id}");
            return;
        }

        session.insert_ordered(incoming.clone());
        self.notify_updated(session_id);
        if !own_echo {
            let _ = self.bus.new_message.send(Arc::new(NewMessage {
                session_id: session_id.to_string(),
                message: incoming,
            }));
        }
    }

    /// Replaces a pending entry with its server-confirmed form, preserving
    /// the local identity and list position.
    fn confirm_in_place(&mut self, session_id: &str, message_id: u64, confirmed: Message) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            warn!(target: "Store", "pending entry for unknown session {session_id}");
            return;
        };
        match session.log.iter_mut().find(|m| m.id == message_id) {
            Some(slot) => {
                slot.pending = false;
                // The server copy may carry fields we did not have at send
                // time (e.g. the final file URL).
                slot.payload = confirmed.payload;
                slot.recipient = confirmed.recipient.or(slot.recipient.take());
            }
            None => {
                // Invariant restored by construction: the confirmed message
                // simply takes a fresh slot.
                warn!(target: "Store", "pending message {message_id} vanished from log; appending server copy");
                session.insert_ordered(confirmed);
            }
        }
        self.notify_updated(session_id);
    }

    // ---- outbound --------------------------------------------------------

    /// Optimistically appends a chat message and returns the envelope to put
    /// on the wire. The entry is reconciled when the echo arrives, or removed
    /// via [`SessionStore::fail_pending`].
    pub fn send_chat(&mut self, session_id: &str, text: impl Into<String>) -> Envelope {
        let text = text.into();
        let timestamp_ms = now_ms();
        let message = Message {
            pending: true,
            ..Message::new(
                self.local_identity.clone(),
                None,
                MessagePayload::Text { body: text.clone() },
                timestamp_ms,
            )
        };
        self.register_pending(session_id, timestamp_ms, text.clone(), message);

        Envelope::Chat {
            session_uuid: None,
            target_session: Some(session_id.to_string()),
            from: Some(self.local_identity.clone()),
            to: None,
            message: text,
            timestamp: timestamp_ms,
        }
    }

    /// Same optimistic-then-reconcile pattern as [`SessionStore::send_chat`],
    /// keyed by file name because the content is not available synchronously.
    pub fn send_file(&mut self, session_id: &str, file: FileRef) -> Envelope {
        let timestamp_ms = now_ms();
        let message = Message {
            pending: true,
            ..Message::new(
                self.local_identity.clone(),
                None,
                MessagePayload::File {
                    file_name: file.file_name.clone(),
                    file_url: file.file_url.clone(),
                    mime_type: file.mime_type.clone(),
                    size: file.size,
                },
                timestamp_ms,
            )
        };
        self.register_pending(session_id, timestamp_ms, file.file_name.clone(), message);

        Envelope::File {
            session_uuid: None,
            target_session: Some(session_id.to_string()),
            from: Some(self.local_identity.clone()),
            to: None,
            file_name: file.file_name,
            file_url: file.file_url,
            mime_type: file.mime_type,
            size: file.size,
            timestamp: timestamp_ms,
        }
    }

    fn register_pending(
        &mut self,
        session_id: &str,
        timestamp_ms: i64,
        token: String,
        message: Message,
    ) {
        let key = PendingKey {
            session_id: session_id.to_string(),
            timestamp_ms,
            token,
        };
        // At most one pending entry per key: a duplicate is overwritten in
        // place and its stale optimistic message removed from the log.
        if let Some(stale) = self.pending.remove(&key) {
            warn!(target: "Store", "duplicate pending key in session {session_id}; replacing entry {}", stale.message_id);
            if let Some(session) = self.sessions.get_mut(session_id) {
                session.log.retain(|m| m.id != stale.message_id);
            }
        }
        self.pending.insert(
            key,
            PendingEntry {
                message_id: message.id,
                state: PendingState::Pending,
            },
        );
        self.ensure_session(session_id).insert_ordered(message);
        self.notify_updated(session_id);
    }

    /// Removes an unconfirmed optimistic entry (send failure or timeout).
    pub fn fail_pending(&mut self, session_id: &str, timestamp_ms: i64, token: &str) {
        let key = PendingKey {
            session_id: session_id.to_string(),
            timestamp_ms,
            token: token.to_string(),
        };
        if let Some(mut entry) = self.pending.remove(&key) {
            entry.state = PendingState::Failed;
            if let Some(session) = self.sessions.get_mut(session_id) {
                session.log.retain(|m| m.id != entry.message_id);
            }
            self.notify_updated(session_id);
        }
    }

    /// Drops every unconfirmed optimistic entry. Called on deliberate
    /// disconnect; the pending map is per-connection transient state.
    pub fn fail_all_pending(&mut self) {
        let entries: Vec<(PendingKey, PendingEntry)> = self.pending.drain().collect();
        for (key, entry) in entries {
            if let Some(session) = self.sessions.get_mut(&key.session_id) {
                session.log.retain(|m| m.id != entry.message_id);
            }
            self.notify_updated(&key.session_id);
        }
    }

    /// Appends the record of a locally completed call.
    pub fn append_call_log(&mut self, session_id: &str, duration_secs: i64, timestamp_ms: i64) {
        let message = Message::new(
            self.local_identity.clone(),
            None,
            MessagePayload::CallLog { duration_secs },
            timestamp_ms,
        );
        self.ensure_session(session_id).insert_ordered(message);
        self.notify_updated(session_id);
    }

    /// Local close: the active-view transition happens immediately so the UI
    /// does not wait for the round trip; the server's own `session_closed`
    /// push reconciles to the same state.
    pub async fn close_session(&mut self, session_id: &str) -> Envelope {
        self.archive_locally(session_id).await;
        Envelope::CloseSession {
            session_uuid: session_id.to_string(),
        }
    }

    pub async fn archive_session(&mut self, session_id: &str) -> Envelope {
        self.archive_locally(session_id).await;
        Envelope::ArchiveSession {
            session_uuid: session_id.to_string(),
        }
    }

    pub async fn restore_session(&mut self, session_id: &str) -> Envelope {
        if self.archived.remove(session_id) {
            self.persist_archived().await;
            let _ = self
                .bus
                .session_restored
                .send(Arc::new(SessionRestoredEvent {
                    session_id: session_id.to_string(),
                }));
        }
        Envelope::RestoreSession {
            session_uuid: session_id.to_string(),
        }
    }

    /// Records the read-position bookmark for a session: the timestamp of the
    /// newest message currently in its log.
    pub async fn mark_read(&mut self, session_id: &str) -> Result<(), StoreError> {
        let Some(session) = self.sessions.get(session_id) else {
            return Err(StoreError::UnknownSession(session_id.to_string()));
        };
        let Some(last) = session.log.last().map(|m| m.timestamp_ms) else {
            return Ok(());
        };
        self.kv
            .put(&read_position_key(session_id), &last.to_string())
            .await
    }

    pub async fn read_position(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .kv
            .get(&read_position_key(session_id))
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    /// Builds the presence query for a session.
    pub fn presence_query(&self, session_id: &str) -> Envelope {
        Envelope::GetClientStatus {
            session_uuid: session_id.to_string(),
        }
    }

    // ---- internals -------------------------------------------------------

    fn ensure_session(&mut self, session_id: &str) -> &mut Session {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string()))
    }

    async fn archive_locally(&mut self, session_id: &str) {
        if !self.archived.insert(session_id.to_string()) {
            return;
        }
        if self.focus.as_deref() == Some(session_id) {
            self.focus = None;
        }
        self.persist_archived().await;
        let _ = self
            .bus
            .session_archived
            .send(Arc::new(SessionArchivedEvent {
                session_id: session_id.to_string(),
            }));
    }

    async fn persist_archived(&self) {
        let raw = serde_json::to_string(&self.archived).unwrap_or_default();
        if let Err(e) = self.kv.put(ARCHIVED_KEY, &raw).await {
            warn!(target: "Store", "failed to persist archive list: {e}");
        }
    }

    fn notify_updated(&self, session_id: &str) {
        let _ = self.bus.session_updated.send(Arc::new(SessionUpdated {
            session_id: session_id.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::MemoryStore;

    async fn store_with(identity: &str) -> SessionStore {
        SessionStore::new(
            identity,
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new()),
        )
        .await
        .unwrap()
    }

    fn inbound_chat(session: &str, from: &str, body: &str, ts: i64) -> Envelope {
        Envelope::Chat {
            session_uuid: Some(session.into()),
            target_session: None,
            from: Some(from.into()),
            to: None,
            message: body.into(),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn duplicate_inbound_chat_is_applied_once() {
        let mut store = store_with("me").await;
        let env = inbound_chat("A", "peer", "hello", 1_700_000_000);
        store.apply_inbound(&env).await;
        store.apply_inbound(&env).await;
        store.apply_inbound(&env).await;
        assert_eq!(store.session("A").unwrap().log.len(), 1);
    }

    #[tokio::test]
    async fn optimistic_chat_is_confirmed_in_place() {
        let mut store = store_with("me").await;
        store.apply_inbound(&inbound_chat("A", "peer", "before", 1)).await;

        let out = store.send_chat("A", "optimistic");
        let (ts, body) = match &out {
            Envelope::Chat {
                timestamp, message, ..
            } => (*timestamp, message.clone()),
            other => panic!("unexpected outbound: {other:?}"),
        };
        let log = &store.session("A").unwrap().log;
        assert_eq!(log.len(), 2);
        let optimistic_id = log.last().unwrap().id;
        assert!(log.last().unwrap().pending);
        assert_eq!(store.pending_count(), 1);

        // Server echo with the same key resolves the pending entry in place.
        store.apply_inbound(&inbound_chat("A", "me", &body, ts)).await;
        let log = &store.session("A").unwrap().log;
        assert_eq!(log.len(), 2, "echo must not duplicate the entry");
        let confirmed = log.last().unwrap();
        assert_eq!(confirmed.id, optimistic_id, "identity must be preserved");
        assert!(!confirmed.pending);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_pending_entry_is_removed() {
        let mut store = store_with("me").await;
        let out = store.send_chat("A", "will fail");
        let ts = match out {
            Envelope::Chat { timestamp, .. } => timestamp,
            _ => unreachable!(),
        };
        assert_eq!(store.session("A").unwrap().log.len(), 1);
        store.fail_pending("A", ts, "will fail");
        assert_eq!(store.session("A").unwrap().log.len(), 0);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn history_replaces_log_wholesale_and_normalizes_seconds() {
        let mut store = store_with("me").await;
        store.apply_inbound(&inbound_chat("A", "peer", "old", 1)).await;

        let env = Envelope::parse(
            r#"{"type":"history","session_uuid":"A","messages":[
                {"from":"X","to":"Y","type":"chat","message":"hi","timestamp":1700000000}
            ]}"#,
        )
        .unwrap();
        store.apply_inbound(&env).await;

        let log = &store.session("A").unwrap().log;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(log[0].sender, "X");
    }

    #[tokio::test]
    async fn sessions_listing_creates_empty_logs() {
        let mut store = store_with("me").await;
        let env = Envelope::parse(
            r#"{"type":"sessions","sessions":[{"session_uuid":"A"},{"session_uuid":"B"}]}"#,
        )
        .unwrap();
        store.apply_inbound(&env).await;
        assert!(store.session("A").unwrap().log.is_empty());
        assert!(store.session("B").unwrap().log.is_empty());
        assert_eq!(store.active_sessions().count(), 2);
    }

    #[tokio::test]
    async fn call_logs_are_never_deduplicated() {
        let mut store = store_with("me").await;
        let env = Envelope::CallLog {
            session_uuid: "A".into(),
            call_duration: 30,
            timestamp: 1_700_000_000,
            from: Some("peer".into()),
        };
        store.apply_inbound(&env).await;
        store.apply_inbound(&env).await;
        assert_eq!(store.session("A").unwrap().log.len(), 2);
    }

    #[tokio::test]
    async fn client_status_is_last_write_wins() {
        let mut store = store_with("me").await;
        let online = Envelope::ClientStatus {
            session_uuid: "A".into(),
            client_name: "peer".into(),
            status: "online".into(),
            last_seen: None,
        };
        let offline = Envelope::ClientStatus {
            session_uuid: "A".into(),
            client_name: "peer".into(),
            status: "offline".into(),
            last_seen: Some(1_700_000_000_000),
        };
        store.apply_inbound(&online).await;
        assert!(store.session("A").unwrap().presence.as_ref().unwrap().is_online());
        store.apply_inbound(&offline).await;
        let presence = store.session("A").unwrap().presence.as_ref().unwrap();
        assert!(!presence.is_online());
        assert_eq!(presence.last_seen_ms, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn archive_clears_focus_and_persists() {
        let kv = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let mut store = SessionStore::new("me", kv.clone(), bus.clone())
            .await
            .unwrap();
        store.apply_inbound(&inbound_chat("A", "peer", "hi", 1)).await;
        store.set_focus(Some("A".into()));

        store
            .apply_inbound(&Envelope::SessionClosed {
                session_uuid: "A".into(),
            })
            .await;
        assert!(store.is_archived("A"));
        assert_eq!(store.focus(), None);
        assert_eq!(store.active_sessions().count(), 0);
        // The log survives archival.
        assert_eq!(store.session("A").unwrap().log.len(), 1);

        // A fresh store over the same backend sees the archive set.
        let reloaded = SessionStore::new("me", kv, bus).await.unwrap();
        assert!(reloaded.is_archived("A"));
    }

    #[tokio::test]
    async fn restore_returns_session_to_active_view() {
        let mut store = store_with("me").await;
        store.apply_inbound(&inbound_chat("A", "peer", "hi", 1)).await;
        store.archive_session("A").await;
        assert!(store.is_archived("A"));

        let env = store.restore_session("A").await;
        assert_eq!(
            env,
            Envelope::RestoreSession {
                session_uuid: "A".into()
            }
        );
        assert!(!store.is_archived("A"));
        assert_eq!(store.active_sessions().count(), 1);
    }

    #[tokio::test]
    async fn foreign_message_emits_new_message_but_echo_does_not() {
        let store_bus = Arc::new(EventBus::new());
        let mut store = SessionStore::new("me", Arc::new(MemoryStore::new()), store_bus.clone())
            .await
            .unwrap();
        let mut inbox = store_bus.new_message.subscribe();

        store.apply_inbound(&inbound_chat("A", "peer", "hi", 1)).await;
        assert_eq!(inbox.try_recv().unwrap().session_id, "A");

        let out = store.send_chat("A", "mine");
        let ts = match out {
            Envelope::Chat { timestamp, .. } => timestamp,
            _ => unreachable!(),
        };
        store.apply_inbound(&inbound_chat("A", "me", "mine", ts)).await;
        assert!(inbox.try_recv().is_err(), "own echo must not alert");
    }

    #[tokio::test]
    async fn mark_read_persists_last_timestamp() {
        let mut store = store_with("me").await;
        store
            .apply_inbound(&inbound_chat("A", "peer", "hi", 1_700_000_000))
            .await;
        store.mark_read("A").await.unwrap();
        assert_eq!(
            store.read_position("A").await.unwrap(),
            Some(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn mark_read_rejects_unknown_sessions() {
        let mut store = store_with("me").await;
        match store.mark_read("nope").await {
            Err(StoreError::UnknownSession(id)) => assert_eq!(id, "nope"),
            other => panic!("expected UnknownSession, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_clears_all_pending_entries() {
        let mut store = store_with("me").await;
        store.send_chat("A", "one");
        store.send_chat("B", "two");
        assert_eq!(store.pending_count(), 2);
        store.fail_all_pending();
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.session("A").unwrap().log.len(), 0);
        assert_eq!(store.session("B").unwrap().log.len(), 0);
    }
}
