//! API layer
//!
//! HTTP handlers for:
//! - Room and membership operations
//! - Message paging and read state
//! - Join-request workflow
//! - Notifications
//! - Metrics (Prometheus)
//!
//! The gateway (WebSocket) endpoint lives in `crate::realtime`.

mod dto;
mod join_requests;
mod messages;
pub mod metrics;
mod notifications;
mod rooms;

pub use dto::*;
pub use metrics::metrics_router;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;

/// Routes nested under `/api`.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/:room_id", get(rooms::get_room))
        .route("/rooms/:room_id/join", post(rooms::join_room))
        .route("/rooms/:room_id/leave", post(rooms::leave_room))
        .route(
            "/rooms/:room_id/members/:user_id",
            delete(rooms::remove_member),
        )
        .route("/rooms/:room_id/messages", get(rooms::room_messages))
        .route("/rooms/:room_id/read", post(rooms::mark_room_read))
        .route(
            "/rooms/:room_id/join-requests",
            get(join_requests::list_join_requests).post(join_requests::create_join_request),
        )
        .route(
            "/join-requests/:request_id/approve",
            post(join_requests::approve_join_request),
        )
        .route(
            "/join-requests/:request_id/reject",
            post(join_requests::reject_join_request),
        )
        .route("/unread", get(messages::unread_counts))
        .route("/messages/:message_id/readers", get(messages::message_readers))
        .route("/notifications", get(notifications::list_notifications))
}
