//! Gateway event vocabulary
//!
//! Inbound client events and outbound server events as tagged unions,
//! validated at the boundary before anything reaches the router. The tag is
//! the `event` field; variant names are kebab-case on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{MessageKind, MessageRecord, PresenceState, Room};

/// First frame of every connection: `{"event":"hello","token":"..."}`.
///
/// Kept out of [`ClientEvent`] so an authenticated connection can never
/// re-handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HelloFrame {
    Hello { token: String },
}

/// Inbound events a connected client may emit.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: i64,
    },
    LeaveRoom {
        room_id: i64,
    },
    SendMessage {
        room_id: i64,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        attachment_ref: Option<String>,
        /// Client-generated correlation token, echoed in the resulting
        /// broadcast or error so failed sends are distinguishable.
        #[serde(default)]
        client_ref: Option<String>,
    },
    EditMessage {
        message_id: i64,
        content: String,
    },
    RecallMessage {
        message_id: i64,
    },
    /// Local delete: hides the message for this principal only.
    DeleteMessage {
        message_id: i64,
    },
    Typing {
        room_id: i64,
        is_typing: bool,
    },
    MarkRead {
        room_id: i64,
    },
}

impl ClientEvent {
    /// Wire name, used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SendMessage { .. } => "send-message",
            Self::EditMessage { .. } => "edit-message",
            Self::RecallMessage { .. } => "recall-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::Typing { .. } => "typing",
            Self::MarkRead { .. } => "mark-read",
        }
    }

    /// Correlation token, if this event kind carries one.
    pub fn client_ref(&self) -> Option<&str> {
        match self {
            Self::SendMessage { client_ref, .. } => client_ref.as_deref(),
            _ => None,
        }
    }
}

/// Outbound events delivered to subscribed connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Handshake ack: who the connection authenticated as and which rooms
    /// it was auto-subscribed to.
    Ready {
        user_id: i64,
        display_name: String,
        room_ids: Vec<i64>,
    },
    /// Ack to a principal whose membership in a room just became live
    /// (direct join or approved request).
    RoomJoined { room: Room },
    /// A room was created with this principal as an initial member.
    RoomCreated { room: Room },
    NewMessage {
        message: MessageRecord,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    MessageEdited {
        message_id: i64,
        room_id: i64,
        content: String,
        edited_at: DateTime<Utc>,
    },
    /// Content intentionally omitted: the tombstone is all anyone gets.
    MessageRecalled { message_id: i64, room_id: i64 },
    /// Delivered only to the hiding principal's own connections.
    MessageDeleted { message_id: i64 },
    UserTyping {
        room_id: i64,
        user_id: i64,
        display_name: String,
        is_typing: bool,
    },
    UserJoined {
        room_id: i64,
        user_id: i64,
        display_name: String,
    },
    UserLeft {
        room_id: i64,
        user_id: i64,
        display_name: String,
    },
    PresenceChanged {
        user_id: i64,
        display_name: String,
        state: PresenceState,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen_at: Option<DateTime<Utc>>,
    },
    /// Delivered only to the originating connection.
    Error {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
}

impl ServerEvent {
    /// Wire name, used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::RoomJoined { .. } => "room-joined",
            Self::RoomCreated { .. } => "room-created",
            Self::NewMessage { .. } => "new-message",
            Self::MessageEdited { .. } => "message-edited",
            Self::MessageRecalled { .. } => "message-recalled",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::UserTyping { .. } => "user-typing",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::PresenceChanged { .. } => "presence-changed",
            Self::Error { .. } => "error",
        }
    }

    /// Build the error event for a failed inbound event.
    pub fn from_error(error: &crate::error::AppError, client_ref: Option<&str>) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            message: error.client_message(),
            client_ref: client_ref.map(ToOwned::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_parse_from_kebab_case_tags() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","room_id":7,"content":"hi","client_ref":"c1"}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage {
                room_id,
                ref content,
                kind,
                ref client_ref,
                ..
            } => {
                assert_eq!(room_id, 7);
                assert_eq!(content, "hi");
                assert_eq!(kind, MessageKind::Text);
                assert_eq!(client_ref.as_deref(), Some("c1"));
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }

        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"typing","room_id":7,"is_typing":true}"#).unwrap();
        assert_eq!(event.name(), "typing");
    }

    #[test]
    fn unknown_event_tags_are_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"shutdown"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"room_id":1}"#).is_err());
    }

    #[test]
    fn hello_is_not_a_client_event() {
        assert!(
            serde_json::from_str::<ClientEvent>(r#"{"event":"hello","token":"t"}"#).is_err()
        );
        assert!(serde_json::from_str::<HelloFrame>(r#"{"event":"hello","token":"t"}"#).is_ok());
    }

    #[test]
    fn recalled_broadcast_omits_content() {
        let event = ServerEvent::MessageRecalled {
            message_id: 5,
            room_id: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message-recalled");
        assert_eq!(json["message_id"], 5);
        assert!(json.get("content").is_none());
    }

    #[test]
    fn error_event_carries_taxonomy_kind_and_ref() {
        let err = crate::error::AppError::Forbidden("not a member".into());
        let event = ServerEvent::from_error(&err, Some("c9"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["kind"], "authorization-denied");
        assert_eq!(json["client_ref"], "c9");
    }
}
