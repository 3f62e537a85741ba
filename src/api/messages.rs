//! Read-state endpoints
//!
//! Pull-based counterpart to the gateway's mark-read event: unread tallies
//! and per-message reader lists.

use axum::{
    Json,
    extract::{Path, State},
};

use super::dto::UnreadResponse;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::MessageReader;
use crate::error::AppError;
use crate::service::ReadTracker;

/// GET /api/unread
///
/// Unread count per room for the caller, computed off the watermark.
pub async fn unread_counts(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<Json<UnreadResponse>, AppError> {
    let tracker = ReadTracker::new(state.db.clone());
    let unread_counts = tracker.unread_counts(principal.user_id).await?;

    Ok(Json(UnreadResponse { unread_counts }))
}

/// GET /api/messages/:message_id/readers
///
/// Who has read a message, earliest first. The caller must be a member of
/// the message's room.
pub async fn message_readers(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(message_id): Path<i64>,
) -> Result<Json<Vec<MessageReader>>, AppError> {
    let message = state
        .db
        .get_message(message_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if !state
        .memberships
        .is_member(message.room_id, principal.user_id)
        .await?
    {
        return Err(AppError::Forbidden(
            "You are not a member of this room".to_string(),
        ));
    }

    let tracker = ReadTracker::new(state.db.clone());
    let readers = tracker.readers_of(message_id).await?;

    Ok(Json(readers))
}
