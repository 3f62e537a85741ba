//! Data models
//!
//! Rust structs representing database entities plus the joined row shapes
//! the API and gateway hand out. Entity ids are SQLite rowids (stable,
//! monotonically increasing integers); timestamps use chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Users
// =============================================================================

/// A chat principal.
///
/// Credentials are owned by the external identity service; this row carries
/// only what the chat core needs. `last_seen_at` is persisted on the
/// offline transition; presence itself is process-local and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl User {
    /// Name to render in member lists and broadcasts.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Presence of a principal, derived from the session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

impl PresenceState {
    pub fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

// =============================================================================
// Rooms
// =============================================================================

/// A named conversation scope.
///
/// `updated_at` is bumped on every new message and drives room-list
/// ordering. Rooms are never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Visibility: public, private
    pub visibility: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn is_private(&self) -> bool {
        self.visibility == Visibility::Private.as_str()
    }
}

/// Room visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// Room plus the requesting user's membership flag, for room listings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RoomOverview {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub visibility: String,
    pub created_by: i64,
    pub creator_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_member: bool,
}

// =============================================================================
// Memberships
// =============================================================================

/// Membership role, ordered by authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Moderator,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "moderator" => Some(Self::Moderator),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    /// May this role review join requests and remove members?
    pub fn can_moderate(&self) -> bool {
        matches!(self, Self::Admin | Self::Moderator)
    }
}

/// One (room, user, role) relation.
///
/// `last_read_at` doubles as the read watermark: everything at or before it
/// counts as read for this member in this room.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub room_id: i64,
    pub user_id: i64,
    /// Role: admin, moderator, member
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: DateTime<Utc>,
}

/// Member-list row: membership joined with the user it belongs to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RoomMember {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl RoomMember {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

/// One row of the append-only message log.
///
/// Recall clears `content` and sets `is_recalled`; the row itself is never
/// deleted so ordering and references stay intact.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    pub author_id: i64,
    pub content: String,
    /// Kind: text, image, file, system
    pub kind: String,
    pub attachment_ref: Option<String>,
    pub is_edited: bool,
    pub is_recalled: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Message joined with its author's name and read count — the shape pages
/// and broadcasts carry.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub room_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub kind: String,
    pub attachment_ref: Option<String>,
    pub is_edited: bool,
    pub is_recalled: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub read_count: i64,
}

/// One reader of a message, ordered by `read_at` in queries.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageReader {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub read_at: DateTime<Utc>,
}

/// Unread tally for one room.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UnreadCount {
    pub room_id: i64,
    pub room_name: String,
    pub unread: i64,
}

// =============================================================================
// Join requests
// =============================================================================

/// Join-request status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Admission request for a private room.
///
/// Terminal once approved or rejected; at most one pending request per
/// (room, requester).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JoinRequest {
    pub id: i64,
    pub room_id: i64,
    pub requester_id: i64,
    pub message: Option<String>,
    /// Status: pending, approved, rejected
    pub status: String,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Pending-list row: request joined with the requester's name.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JoinRequestRecord {
    pub id: i64,
    pub room_id: i64,
    pub requester_id: i64,
    pub requester_name: String,
    pub message: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Notifications
// =============================================================================

/// Offline-member notification, enqueued when a message lands in a room
/// while the member has no live connection.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub room_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
