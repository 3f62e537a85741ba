//! Join-request endpoints
//!
//! HTTP surface of the private-room admission workflow. Approval reuses
//! the router so the requester's live connections are subscribed and the
//! room hears `user-joined` exactly as it would for a direct join.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::dto::CreateJoinRequest;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::{JoinRequest, JoinRequestRecord};
use crate::error::AppError;
use crate::service::JoinRequests;

/// POST /api/rooms/:room_id/join-requests
pub async fn create_join_request(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
    Json(request): Json<CreateJoinRequest>,
) -> Result<(StatusCode, Json<JoinRequest>), AppError> {
    let service = JoinRequests::new(state.db.clone(), state.memberships.clone());
    let created = service
        .request(room_id, principal.user_id, request.message.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/rooms/:room_id/join-requests
///
/// Pending requests, oldest first. Admin or moderator only.
pub async fn list_join_requests(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
) -> Result<Json<Vec<JoinRequestRecord>>, AppError> {
    let service = JoinRequests::new(state.db.clone(), state.memberships.clone());
    let pending = service.pending(room_id, principal.user_id).await?;

    Ok(Json(pending))
}

/// POST /api/join-requests/:request_id/approve
pub async fn approve_join_request(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(request_id): Path<i64>,
) -> Result<Json<JoinRequest>, AppError> {
    let service = JoinRequests::new(state.db.clone(), state.memberships.clone());
    let (room, request) = service.approve(request_id, principal.user_id).await?;

    state
        .router
        .after_admission(&room, request.requester_id)
        .await?;

    Ok(Json(request))
}

/// POST /api/join-requests/:request_id/reject
pub async fn reject_join_request(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(request_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let service = JoinRequests::new(state.db.clone(), state.memberships.clone());
    service.reject(request_id, principal.user_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
