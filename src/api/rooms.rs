//! Room endpoints
//!
//! Thin handlers over the services and the event router; every mutation
//! that touches live state goes through the router so fanout and per-room
//! serialization hold regardless of transport.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use super::dto::{
    CreateRoomRequest, MarkReadResponse, MemberEntry, MessagesResponse, PageParams,
    RoomDetailResponse,
};
use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::{PresenceState, Room, RoomOverview, Visibility};
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::service::MessageLog;

/// GET /api/rooms
///
/// All rooms, most recently active first, with a membership flag for the
/// caller.
pub async fn list_rooms(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<Json<Vec<RoomOverview>>, AppError> {
    let rooms = state.db.list_rooms(principal.user_id).await?;
    Ok(Json(rooms))
}

/// POST /api/rooms
///
/// Create a room: creator becomes admin, optional initial members come in
/// as plain members, and the opening system message lands in the log — all
/// in one transaction. Initial members with a live connection are
/// subscribed and told about the room.
pub async fn create_room(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/api/rooms"])
        .start_timer();

    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Room name is required".to_string()));
    }

    let visibility = match request.visibility.as_deref() {
        None => Visibility::Public,
        Some(value) => Visibility::parse(value).ok_or_else(|| {
            AppError::Validation("visibility must be \"public\" or \"private\"".to_string())
        })?,
    };

    let creator = state
        .db
        .get_user(principal.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let room = state
        .db
        .create_room_with_members(
            name,
            request.description.as_deref(),
            visibility,
            &creator,
            &request.member_ids,
        )
        .await?;

    state
        .router
        .after_room_created(&room, &request.member_ids)
        .await;

    tracing::info!(room_id = room.id, creator = creator.id, "room created");
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/rooms", "201"])
        .inc();

    Ok((StatusCode::CREATED, Json(room)))
}

/// GET /api/rooms/:room_id
///
/// Room details plus the ordered member list, decorated with live presence.
/// Members only.
pub async fn get_room(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
) -> Result<Json<RoomDetailResponse>, AppError> {
    if !state
        .memberships
        .is_member(room_id, principal.user_id)
        .await?
    {
        return Err(AppError::Forbidden(
            "You are not a member of this room".to_string(),
        ));
    }

    let room = state
        .db
        .get_room(room_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let members = state.memberships.list_members(room_id).await?;

    let member_ids: Vec<i64> = members.iter().map(|m| m.user_id).collect();
    let online = state.registry.online_among(&member_ids).await;

    let members = members
        .into_iter()
        .map(|member| MemberEntry {
            presence: PresenceState::from_online(online.contains(&member.user_id)),
            member,
        })
        .collect();

    Ok(Json(RoomDetailResponse { room, members }))
}

/// POST /api/rooms/:room_id/join
pub async fn join_room(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
) -> Result<Json<Room>, AppError> {
    let room = state.router.join_room(&principal, room_id).await?;
    Ok(Json(room))
}

/// POST /api/rooms/:room_id/leave
pub async fn leave_room(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.router.leave_room(&principal, room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/rooms/:room_id/members/:user_id
///
/// Admin-initiated removal; removing yourself is rejected (leave instead).
pub async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((room_id, user_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    state
        .router
        .remove_member(&principal, room_id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/rooms/:room_id/messages
///
/// Keyset-paged log slice for the caller, oldest first. Members only;
/// messages the caller has locally hidden are absent.
pub async fn room_messages(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<MessagesResponse>, AppError> {
    if !state
        .memberships
        .is_member(room_id, principal.user_id)
        .await?
    {
        return Err(AppError::Forbidden(
            "You are not a member of this room".to_string(),
        ));
    }

    let log = MessageLog::new(state.db.clone(), &state.config.rooms);
    let messages = log
        .page(room_id, principal.user_id, params.before_id, params.limit)
        .await?;

    Ok(Json(MessagesResponse { messages }))
}

/// POST /api/rooms/:room_id/read
pub async fn mark_room_read(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(room_id): Path<i64>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let newly_read = state.router.mark_read(&principal, room_id).await?;
    Ok(Json(MarkReadResponse { newly_read }))
}
