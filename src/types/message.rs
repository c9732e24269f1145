//! Message model and timestamp normalization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::envelope::HistoryEntry;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-local message identity. Stable per object and
/// independent of any server round-trip, so an optimistic entry keeps its
/// identity when the echo confirms it.
pub fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Wall-clock now in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Coarse payload discriminator, also part of the de-dup fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    Chat,
    File,
    CallLog,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MessagePayload {
    Text {
        body: String,
    },
    File {
        file_name: String,
        file_url: String,
        mime_type: String,
        size: u64,
    },
    CallLog {
        duration_secs: i64,
    },
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Text { .. } => MessageKind::Chat,
            MessagePayload::File { .. } => MessageKind::File,
            MessagePayload::CallLog { .. } => MessageKind::CallLog,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: u64,
    pub sender: String,
    /// Advisory only; routing is done by session id.
    pub recipient: Option<String>,
    pub payload: MessagePayload,
    pub timestamp_ms: i64,
    /// True while this is an optimistic entry awaiting the server echo.
    pub pending: bool,
}

impl Message {
    pub fn new(
        sender: String,
        recipient: Option<String>,
        payload: MessagePayload,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: next_message_id(),
            sender,
            recipient,
            payload,
            timestamp_ms,
            pending: false,
        }
    }

    /// Builds a message from one `history` element. Returns `None` for
    /// entries whose `type` has no constructible payload; the caller drops
    /// those with a diagnostic.
    pub fn from_history(entry: &HistoryEntry, received_at_ms: i64) -> Option<Self> {
        let payload = match entry.kind.as_str() {
            "chat" => MessagePayload::Text {
                body: entry.message.clone()?,
            },
            "file" => MessagePayload::File {
                file_name: entry.file_name.clone()?,
                file_url: entry.file_url.clone().unwrap_or_default(),
                mime_type: entry.mime_type.clone().unwrap_or_default(),
                size: entry.size.unwrap_or(0),
            },
            "call_log" => MessagePayload::CallLog {
                duration_secs: entry.call_duration.unwrap_or(0),
            },
            _ => return None,
        };
        Some(Self::new(
            entry.from.clone().unwrap_or_default(),
            entry.to.clone(),
            payload,
            normalize_timestamp_ms(entry.timestamp, received_at_ms),
        ))
    }

    /// The de-dup fingerprint of this message.
    pub fn fingerprint(&self) -> Fingerprint {
        let (content, file_url) = match &self.payload {
            MessagePayload::Text { body } => (body.clone(), String::new()),
            MessagePayload::File {
                file_name,
                file_url,
                ..
            } => (file_name.clone(), file_url.clone()),
            MessagePayload::CallLog { duration_secs } => (duration_secs.to_string(), String::new()),
        };
        Fingerprint {
            timestamp_ms: self.timestamp_ms,
            sender: self.sender.clone(),
            content,
            file_url,
            kind: self.payload.kind(),
        }
    }

    /// The token used to match this message against a pending optimistic
    /// entry: the text body for chats, the file name for files (the file
    /// content is not available synchronously on send).
    pub fn pending_token(&self) -> Option<String> {
        match &self.payload {
            MessagePayload::Text { body } => Some(body.clone()),
            MessagePayload::File { file_name, .. } => Some(file_name.clone()),
            MessagePayload::CallLog { .. } => None,
        }
    }
}

/// Derived de-duplication key for inbound chat/file envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub timestamp_ms: i64,
    pub sender: String,
    pub content: String,
    pub file_url: String,
    pub kind: MessageKind,
}

/// Normalizes a peer-supplied timestamp to milliseconds. Peers variously
/// encode seconds, milliseconds, or microseconds; the digit count of the raw
/// integer is the discriminator: 1-10 digits are seconds, 11-13 are
/// milliseconds, 14-16 are microseconds. Anything else (including
/// non-positive values) falls back to the local receipt time.
pub fn normalize_timestamp_ms(raw: i64, fallback_ms: i64) -> i64 {
    if raw <= 0 {
        return fallback_ms;
    }
    match digits(raw) {
        1..=10 => raw * 1000,
        11..=13 => raw,
        14..=16 => raw / 1000,
        _ => fallback_ms,
    }
}

fn digits(mut v: i64) -> u32 {
    let mut n = 1;
    while v >= 10 {
        v /= 10;
        n += 1;
    }
    n
}
