//! Wire envelopes.
//!
//! Every frame on the relay socket is one JSON object tagged by its `type`
//! field. The enum below is the single source of truth for the wire schema;
//! field names that the relay spells in camelCase carry explicit renames.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Envelope types this client understands. A frame whose `type` is absent
/// from this list parses to [`ProtocolError::UnknownType`] so callers can
/// drop it quietly instead of treating it as corruption.
pub const KNOWN_TYPES: &[&str] = &[
    "register",
    "registered",
    "sessions",
    "history",
    "chat",
    "file",
    "call_log",
    "client_status",
    "get_client_status",
    "session_closed",
    "session_archived",
    "close_session",
    "archive_session",
    "restore_session",
    "call_offer",
    "call_answer",
    "ice_candidate",
    "call_end",
    "call_reject",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Announces this client to the relay. Sent once per connection.
    Register {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "isAdmin", default)]
        is_admin: bool,
        #[serde(default)]
        name: String,
    },
    /// Relay acknowledgment of a register.
    Registered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_uuid: Option<String>,
    },
    /// Listing of the sessions currently known to the relay.
    Sessions {
        #[serde(default)]
        sessions: Vec<SessionRef>,
    },
    /// Full message backlog for one session. Replaces any local log.
    History {
        session_uuid: String,
        #[serde(default)]
        messages: Vec<HistoryEntry>,
    },
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_uuid: Option<String>,
        #[serde(
            rename = "targetSession",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_session: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        message: String,
        #[serde(default)]
        timestamp: i64,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_uuid: Option<String>,
        #[serde(
            rename = "targetSession",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_session: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileUrl", default)]
        file_url: String,
        #[serde(rename = "mimeType", default)]
        mime_type: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        timestamp: i64,
    },
    CallLog {
        session_uuid: String,
        #[serde(rename = "callDuration", default)]
        call_duration: i64,
        #[serde(default)]
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    /// Presence snapshot for one session's remote participant.
    ClientStatus {
        session_uuid: String,
        client_name: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<i64>,
    },
    GetClientStatus {
        session_uuid: String,
    },
    SessionClosed {
        session_uuid: String,
    },
    SessionArchived {
        session_uuid: String,
    },
    CloseSession {
        session_uuid: String,
    },
    ArchiveSession {
        session_uuid: String,
    },
    RestoreSession {
        session_uuid: String,
    },
    CallOffer {
        sdp: String,
        #[serde(rename = "callId")]
        call_id: String,
        session_uuid: String,
        #[serde(rename = "hasVideo", default)]
        has_video: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    CallAnswer {
        sdp: String,
        #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        session_uuid: String,
        #[serde(rename = "hasVideo", default)]
        has_video: bool,
    },
    IceCandidate {
        candidate: IceCandidateData,
        session_uuid: String,
        #[serde(rename = "callId")]
        call_id: String,
    },
    CallEnd {
        session_uuid: String,
        #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    CallReject {
        #[serde(rename = "callId")]
        call_id: String,
        session_uuid: String,
    },
}

/// One element of a `sessions` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_uuid: String,
}

/// One element of a `history` backlog. Everything except the discriminator is
/// optional on the wire; unusable entries are dropped at conversion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "fileUrl", default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        rename = "callDuration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub call_duration: Option<i64>,
    #[serde(default)]
    pub timestamp: i64,
}

/// ICE candidate payload, forwarded verbatim between media engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateData {
    pub candidate: String,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u32>,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

impl Envelope {
    /// Decodes one frame. Distinguishes a well-formed frame of an unknown
    /// type (dropped quietly upstream) from a genuinely malformed one.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The wire `type` discriminator of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Register { .. } => "register",
            Envelope::Registered { .. } => "registered",
            Envelope::Sessions { .. } => "sessions",
            Envelope::History { .. } => "history",
            Envelope::Chat { .. } => "chat",
            Envelope::File { .. } => "file",
            Envelope::CallLog { .. } => "call_log",
            Envelope::ClientStatus { .. } => "client_status",
            Envelope::GetClientStatus { .. } => "get_client_status",
            Envelope::SessionClosed { .. } => "session_closed",
            Envelope::SessionArchived { .. } => "session_archived",
            Envelope::CloseSession { .. } => "close_session",
            Envelope::ArchiveSession { .. } => "archive_session",
            Envelope::RestoreSession { .. } => "restore_session",
            Envelope::CallOffer { .. } => "call_offer",
            Envelope::CallAnswer { .. } => "call_answer",
            Envelope::IceCandidate { .. } => "ice_candidate",
            Envelope::CallEnd { .. } => "call_end",
            Envelope::CallReject { .. } => "call_reject",
        }
    }

    /// Serializes for the wire.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
