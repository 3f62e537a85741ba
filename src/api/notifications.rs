//! Notification endpoints
//!
//! Feed of the per-offline-member notifications queued by the fanout
//! engine while the user had no live connection.

use axum::{Json, extract::State};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::Notification;
use crate::error::AppError;

const NOTIFICATION_PAGE_SIZE: u32 = 50;

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = state
        .db
        .list_notifications(principal.user_id, NOTIFICATION_PAGE_SIZE)
        .await?;

    Ok(Json(notifications))
}
