//! Join-request workflow
//!
//! Admission state machine for private rooms: pending → approved creates a
//! membership atomically; pending → rejected is terminal. Public rooms are
//! joined directly and never accept requests.

use std::sync::Arc;

use crate::data::{Database, JoinRequest, JoinRequestRecord, Role, Room};
use crate::error::AppError;
use crate::service::MembershipIndex;

/// Join-request service
pub struct JoinRequests {
    db: Arc<Database>,
    memberships: Arc<MembershipIndex>,
}

impl JoinRequests {
    pub fn new(db: Arc<Database>, memberships: Arc<MembershipIndex>) -> Self {
        Self { db, memberships }
    }

    /// File a request to join a private room.
    ///
    /// # Errors
    /// - `NotFound` if the room does not exist
    /// - `InvalidState` if the room is public, the requester already
    ///   belongs, or a request is already pending
    pub async fn request(
        &self,
        room_id: i64,
        requester_id: i64,
        message: Option<&str>,
    ) -> Result<JoinRequest, AppError> {
        let room = self
            .db
            .get_room(room_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if !room.is_private() {
            return Err(AppError::InvalidState(
                "Public rooms are joined directly".to_string(),
            ));
        }

        if self.memberships.is_member(room_id, requester_id).await? {
            return Err(AppError::InvalidState(
                "You are already a member of this room".to_string(),
            ));
        }

        let request = self
            .db
            .insert_join_request(room_id, requester_id, message)
            .await?;

        tracing::info!(
            room_id,
            requester_id,
            request_id = request.id,
            "join request filed"
        );

        Ok(request)
    }

    /// Pending requests for a room; reviewer must be admin or moderator.
    pub async fn pending(
        &self,
        room_id: i64,
        reviewer_id: i64,
    ) -> Result<Vec<JoinRequestRecord>, AppError> {
        self.db
            .get_room(room_id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.memberships.require_moderator(room_id, reviewer_id).await?;

        self.db.list_pending_requests(room_id).await
    }

    /// Approve a pending request: membership row and status flip in one
    /// transaction, then the index mirror is updated.
    ///
    /// # Returns
    /// The room and the approved request, so the caller can notify and
    /// subscribe the requester.
    pub async fn approve(
        &self,
        request_id: i64,
        reviewer_id: i64,
    ) -> Result<(Room, JoinRequest), AppError> {
        let request = self
            .db
            .get_join_request(request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let room = self
            .db
            .get_room(request.room_id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.memberships
            .require_moderator(room.id, reviewer_id)
            .await?;

        self.db.approve_join_request(&request, reviewer_id).await?;
        self.memberships
            .apply_added(room.id, request.requester_id, Role::Member)
            .await;

        tracing::info!(
            room_id = room.id,
            requester_id = request.requester_id,
            reviewer_id,
            "join request approved"
        );

        let request = self
            .db
            .get_join_request(request_id)
            .await?
            .ok_or(AppError::NotFound)?;

        Ok((room, request))
    }

    /// Reject a pending request. Terminal; nobody is notified.
    pub async fn reject(&self, request_id: i64, reviewer_id: i64) -> Result<(), AppError> {
        let request = self
            .db
            .get_join_request(request_id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.memberships
            .require_moderator(request.room_id, reviewer_id)
            .await?;

        self.db.reject_join_request(request_id, reviewer_id).await?;

        tracing::info!(
            room_id = request.room_id,
            requester_id = request.requester_id,
            reviewer_id,
            "join request rejected"
        );

        Ok(())
    }
}
