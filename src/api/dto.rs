//! Request and response shapes for the HTTP surface

use serde::{Deserialize, Serialize};

use crate::data::{MessageRecord, PresenceState, Room, RoomMember, UnreadCount};

/// POST /api/rooms
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// "public" (default) or "private"
    #[serde(default)]
    pub visibility: Option<String>,
    /// Users added as plain members alongside the creator-admin.
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

/// GET /api/rooms/:room_id
#[derive(Debug, Serialize)]
pub struct RoomDetailResponse {
    pub room: Room,
    pub members: Vec<MemberEntry>,
}

/// One member-list row, decorated with live presence.
#[derive(Debug, Serialize)]
pub struct MemberEntry {
    #[serde(flatten)]
    pub member: RoomMember,
    pub presence: PresenceState,
}

/// GET /api/rooms/:room_id/messages
#[derive(Debug, Deserialize)]
pub struct PageParams {
    /// Return messages with ids strictly below this one.
    pub before_id: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    /// Oldest first, ready for display.
    pub messages: Vec<MessageRecord>,
}

/// POST /api/rooms/:room_id/read
#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    /// Receipts recorded by this call; 0 when already up to date.
    pub newly_read: u64,
}

/// GET /api/unread
#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread_counts: Vec<UnreadCount>,
}

/// POST /api/rooms/:room_id/join-requests
#[derive(Debug, Deserialize)]
pub struct CreateJoinRequest {
    #[serde(default)]
    pub message: Option<String>,
}
