//! Event router / fanout engine
//!
//! One dispatcher for every inbound event: authorize against the membership
//! index, mutate the log/store, then fan out to the sessions subscribed to
//! the affected room.
//!
//! Work for a given room is serialized behind a per-room mutex, held across
//! authorize → mutate → fanout, so a membership removal can never interleave
//! with a send in the same room, and delivery order always matches append
//! order. Unrelated rooms proceed in parallel. mark-read and local deletes
//! touch only per-member state and take no room lock.
//!
//! Persist-then-broadcast is mandatory: a mutation that fails storage never
//! produces a fanout; the failure goes back to the originating connection
//! alone as a structured `error` event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use super::event::{ClientEvent, ServerEvent};
use super::registry::{ConnectionId, SessionRegistry};
use crate::auth::Principal;
use crate::data::{Database, Message, MessageKind, MessageRecord, PresenceState, Role, Room};
use crate::error::AppError;
use crate::service::{MembershipIndex, MessageLog, ReadTracker};

/// The fanout core.
pub struct EventRouter {
    db: Arc<Database>,
    registry: Arc<SessionRegistry>,
    memberships: Arc<MembershipIndex>,
    log: MessageLog,
    reads: ReadTracker,
    room_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl EventRouter {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<SessionRegistry>,
        memberships: Arc<MembershipIndex>,
        log: MessageLog,
        reads: ReadTracker,
    ) -> Self {
        Self {
            db,
            registry,
            memberships,
            log,
            reads,
            room_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the serialization lock for one room.
    async fn lock_room(&self, room_id: i64) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.room_locks.lock().await;
            locks.entry(room_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Bring an authenticated connection online: auto-subscribe it to every
    /// room of its principal, ack with `ready`, and on the online edge fan
    /// presence out to those rooms.
    pub async fn connect(
        &self,
        principal: &Principal,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerEvent>), AppError> {
        // The token may outlive the account; resolve it against storage.
        let user = self
            .db
            .get_user(principal.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let room_ids = self.memberships.room_ids_for(user.id).await?;

        let connection_id = SessionRegistry::new_connection_id();
        let (rx, first_connection) = self
            .registry
            .register(&connection_id, user.id, principal.name(), &room_ids)
            .await;

        self.registry
            .send_to_connection(
                &connection_id,
                &ServerEvent::Ready {
                    user_id: user.id,
                    display_name: principal.name().to_string(),
                    room_ids: room_ids.clone(),
                },
            )
            .await;

        if first_connection {
            let presence = ServerEvent::PresenceChanged {
                user_id: user.id,
                display_name: principal.name().to_string(),
                state: PresenceState::Online,
                last_seen_at: None,
            };
            for room_id in &room_ids {
                self.registry
                    .broadcast_room(*room_id, &presence, Some(user.id))
                    .await;
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = user.id,
            rooms = room_ids.len(),
            "gateway connection registered"
        );

        Ok((connection_id, rx))
    }

    /// Tear a connection down; on the offline edge persist `last_seen_at`
    /// and fan presence out to the principal's rooms.
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        let Some((principal_id, was_last)) = self.registry.unregister(connection_id).await else {
            return;
        };

        tracing::info!(
            connection_id = %connection_id,
            user_id = principal_id,
            offline = was_last,
            "gateway connection closed"
        );

        if !was_last {
            return;
        }

        let now = Utc::now();
        if let Err(error) = self.db.touch_last_seen(principal_id, now).await {
            tracing::warn!(%error, user_id = principal_id, "failed to persist last_seen_at");
        }

        let (display_name, room_ids) = match self.offline_fanout_targets(principal_id).await {
            Ok(targets) => targets,
            Err(error) => {
                tracing::warn!(%error, user_id = principal_id, "failed to fan out presence");
                return;
            }
        };

        let presence = ServerEvent::PresenceChanged {
            user_id: principal_id,
            display_name,
            state: PresenceState::Offline,
            last_seen_at: Some(now),
        };
        for room_id in room_ids {
            self.registry
                .broadcast_room(room_id, &presence, Some(principal_id))
                .await;
        }
    }

    async fn offline_fanout_targets(
        &self,
        principal_id: i64,
    ) -> Result<(String, Vec<i64>), AppError> {
        let user = self
            .db
            .get_user(principal_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let room_ids = self.memberships.room_ids_for(principal_id).await?;
        Ok((user.name().to_string(), room_ids))
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    /// Route one inbound event. Failures are reported to the originating
    /// connection only, as a structured `error` event; nothing is retried.
    pub async fn dispatch(
        &self,
        connection_id: &ConnectionId,
        principal: &Principal,
        event: ClientEvent,
    ) {
        crate::metrics::GATEWAY_EVENTS_TOTAL
            .with_label_values(&[event.name()])
            .inc();

        let event_name = event.name();
        let client_ref = event.client_ref().map(ToOwned::to_owned);

        let result = match event {
            ClientEvent::JoinRoom { room_id } => {
                self.join_room(principal, room_id).await.map(|_| ())
            }
            ClientEvent::LeaveRoom { room_id } => self.leave_room(principal, room_id).await,
            ClientEvent::SendMessage {
                room_id,
                content,
                kind,
                attachment_ref,
                client_ref,
            } => self
                .send_message(
                    principal,
                    room_id,
                    &content,
                    kind,
                    attachment_ref.as_deref(),
                    client_ref,
                )
                .await
                .map(|_| ()),
            ClientEvent::EditMessage {
                message_id,
                content,
            } => self
                .edit_message(principal, message_id, &content)
                .await
                .map(|_| ()),
            ClientEvent::RecallMessage { message_id } => self
                .recall_message(principal, message_id)
                .await
                .map(|_| ()),
            ClientEvent::DeleteMessage { message_id } => self
                .delete_message_local(principal, message_id)
                .await
                .map(|_| ()),
            ClientEvent::Typing {
                room_id,
                is_typing,
            } => self.typing(principal, room_id, is_typing).await,
            ClientEvent::MarkRead { room_id } => {
                self.mark_read(principal, room_id).await.map(|_| ())
            }
        };

        if let Err(error) = result {
            tracing::debug!(
                %error,
                event = event_name,
                user_id = principal.user_id,
                "gateway event rejected"
            );
            crate::metrics::ERRORS_TOTAL
                .with_label_values(&[error.kind(), "gateway"])
                .inc();
            self.registry
                .send_to_connection(
                    connection_id,
                    &ServerEvent::from_error(&error, client_ref.as_deref()),
                )
                .await;
        }
    }

    // =========================================================================
    // Room membership events
    // =========================================================================

    /// Join a room.
    ///
    /// Already a member: idempotent — subscriptions are refreshed and the
    /// ack re-sent, but no membership row or broadcast is produced. The
    /// only two self-heal paths that may create a membership here are the
    /// room's creator (as admin) and any principal on a public room (as
    /// member); everything else is denied.
    pub async fn join_room(&self, principal: &Principal, room_id: i64) -> Result<Room, AppError> {
        let _guard = self.lock_room(room_id).await;

        let room = self.db.get_room(room_id).await?.ok_or(AppError::NotFound)?;

        if self.memberships.is_member(room_id, principal.user_id).await? {
            self.registry
                .subscribe_principal(principal.user_id, room_id)
                .await;
            self.registry
                .send_to_principal(principal.user_id, &ServerEvent::RoomJoined { room: room.clone() })
                .await;
            return Ok(room);
        }

        let role = if room.created_by == principal.user_id {
            Role::Admin
        } else if !room.is_private() {
            Role::Member
        } else {
            return Err(AppError::Forbidden(
                "Access denied to private room".to_string(),
            ));
        };

        self.memberships.add(room_id, principal.user_id, role).await?;
        self.registry
            .subscribe_principal(principal.user_id, room_id)
            .await;

        self.registry
            .send_to_principal(principal.user_id, &ServerEvent::RoomJoined { room: room.clone() })
            .await;
        self.registry
            .broadcast_room(
                room_id,
                &ServerEvent::UserJoined {
                    room_id,
                    user_id: principal.user_id,
                    display_name: principal.name().to_string(),
                },
                Some(principal.user_id),
            )
            .await;

        tracing::info!(room_id, user_id = principal.user_id, role = role.as_str(), "joined room");

        Ok(room)
    }

    /// Leave a room: membership row removed, a system message appended to
    /// the log, `user-left` fanned out to the remaining members.
    pub async fn leave_room(&self, principal: &Principal, room_id: i64) -> Result<(), AppError> {
        let _guard = self.lock_room(room_id).await;

        self.db.get_room(room_id).await?.ok_or(AppError::NotFound)?;

        if !self.memberships.is_member(room_id, principal.user_id).await? {
            return Err(AppError::Forbidden(
                "You are not a member of this room".to_string(),
            ));
        }

        self.memberships.remove(room_id, principal.user_id).await?;
        self.registry
            .unsubscribe_principal(principal.user_id, room_id)
            .await;

        let system = self
            .log
            .append(
                room_id,
                principal.user_id,
                &format!("{} left the room", principal.name()),
                MessageKind::System,
                None,
            )
            .await?;

        self.registry
            .broadcast_room(
                room_id,
                &ServerEvent::NewMessage {
                    message: system,
                    client_ref: None,
                },
                None,
            )
            .await;
        self.registry
            .broadcast_room(
                room_id,
                &ServerEvent::UserLeft {
                    room_id,
                    user_id: principal.user_id,
                    display_name: principal.name().to_string(),
                },
                None,
            )
            .await;

        tracing::info!(room_id, user_id = principal.user_id, "left room");

        Ok(())
    }

    /// Admin-initiated removal. Removing yourself is not a removal — leave
    /// instead.
    pub async fn remove_member(
        &self,
        actor: &Principal,
        room_id: i64,
        target_id: i64,
    ) -> Result<(), AppError> {
        let _guard = self.lock_room(room_id).await;

        self.db.get_room(room_id).await?.ok_or(AppError::NotFound)?;

        match self.memberships.role_of(room_id, actor.user_id).await? {
            Some(Role::Admin) => {}
            Some(_) => {
                return Err(AppError::Forbidden(
                    "Only admins can remove members".to_string(),
                ));
            }
            None => {
                return Err(AppError::Forbidden(
                    "You are not a member of this room".to_string(),
                ));
            }
        }

        if target_id == actor.user_id {
            return Err(AppError::Validation("Cannot remove yourself".to_string()));
        }

        let target = self
            .db
            .get_user(target_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if !self.memberships.remove(room_id, target_id).await? {
            return Err(AppError::NotFound);
        }
        self.registry.unsubscribe_principal(target_id, room_id).await;

        let system = self
            .log
            .append(
                room_id,
                actor.user_id,
                &format!("{} removed {} from the room", actor.name(), target.name()),
                MessageKind::System,
                None,
            )
            .await?;

        self.registry
            .broadcast_room(
                room_id,
                &ServerEvent::NewMessage {
                    message: system,
                    client_ref: None,
                },
                None,
            )
            .await;
        self.registry
            .broadcast_room(
                room_id,
                &ServerEvent::UserLeft {
                    room_id,
                    user_id: target_id,
                    display_name: target.name().to_string(),
                },
                None,
            )
            .await;

        tracing::info!(room_id, target_id, actor_id = actor.user_id, "member removed");

        Ok(())
    }

    // =========================================================================
    // Message events
    // =========================================================================

    /// Send a message: append under the room lock, broadcast to the whole
    /// room, then queue notifications for members with no live connection.
    pub async fn send_message(
        &self,
        principal: &Principal,
        room_id: i64,
        content: &str,
        kind: MessageKind,
        attachment_ref: Option<&str>,
        client_ref: Option<String>,
    ) -> Result<MessageRecord, AppError> {
        if kind == MessageKind::System {
            return Err(AppError::Validation(
                "System messages cannot be sent by clients".to_string(),
            ));
        }

        let (record, offline_members) = {
            let _guard = self.lock_room(room_id).await;

            if !self.memberships.is_member(room_id, principal.user_id).await? {
                return Err(AppError::Forbidden(
                    "You are not a member of this room".to_string(),
                ));
            }

            let record = self
                .log
                .append(room_id, principal.user_id, content, kind, attachment_ref)
                .await?;

            self.registry
                .broadcast_room(
                    room_id,
                    &ServerEvent::NewMessage {
                        message: record.clone(),
                        client_ref,
                    },
                    None,
                )
                .await;

            // Snapshot the offline set while membership is stable; the
            // notification writes happen outside the critical section.
            let member_ids = self.memberships.member_ids(room_id).await?;
            let online = self.registry.online_among(&member_ids).await;
            let offline_members: Vec<i64> = member_ids
                .into_iter()
                .filter(|id| *id != principal.user_id && !online.contains(id))
                .collect();

            (record, offline_members)
        };

        self.db
            .insert_notifications(
                &offline_members,
                "new_message",
                &format!("New message from {}", principal.name()),
                Some(&record.content),
                Some(room_id),
            )
            .await?;

        Ok(record)
    }

    /// Edit a message; author-only, window-checked inside the log.
    pub async fn edit_message(
        &self,
        principal: &Principal,
        message_id: i64,
        content: &str,
    ) -> Result<MessageRecord, AppError> {
        // Resolve the room first so the check-and-mutate runs serialized.
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let _guard = self.lock_room(message.room_id).await;

        let record = self.log.edit(message_id, principal.user_id, content).await?;

        self.registry
            .broadcast_room(
                message.room_id,
                &ServerEvent::MessageEdited {
                    message_id,
                    room_id: message.room_id,
                    content: record.content.clone(),
                    edited_at: record.edited_at.unwrap_or_else(Utc::now),
                },
                None,
            )
            .await;

        Ok(record)
    }

    /// Recall a message: shared tombstone, everyone sees the same
    /// placeholder. The broadcast intentionally carries no content.
    pub async fn recall_message(
        &self,
        principal: &Principal,
        message_id: i64,
    ) -> Result<Message, AppError> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let _guard = self.lock_room(message.room_id).await;

        let recalled = self.log.recall(message_id, principal.user_id).await?;

        self.registry
            .broadcast_room(
                message.room_id,
                &ServerEvent::MessageRecalled {
                    message_id,
                    room_id: message.room_id,
                },
                None,
            )
            .await;

        tracing::info!(message_id, room_id = message.room_id, "message recalled");

        Ok(recalled)
    }

    /// Local delete: per-viewer filter, no room serialization needed
    /// because no shared state changes. Echoed to the principal's own
    /// connections only.
    pub async fn delete_message_local(
        &self,
        principal: &Principal,
        message_id: i64,
    ) -> Result<(), AppError> {
        self.log
            .hide_for_viewer(message_id, principal.user_id)
            .await?;

        self.registry
            .send_to_principal(principal.user_id, &ServerEvent::MessageDeleted { message_id })
            .await;

        Ok(())
    }

    /// Typing indicator: membership-gated, nothing persisted, room minus
    /// the sender.
    pub async fn typing(
        &self,
        principal: &Principal,
        room_id: i64,
        is_typing: bool,
    ) -> Result<(), AppError> {
        let _guard = self.lock_room(room_id).await;

        if !self.memberships.is_member(room_id, principal.user_id).await? {
            return Err(AppError::Forbidden(
                "You are not a member of this room".to_string(),
            ));
        }

        self.registry
            .broadcast_room(
                room_id,
                &ServerEvent::UserTyping {
                    room_id,
                    user_id: principal.user_id,
                    display_name: principal.name().to_string(),
                    is_typing,
                },
                Some(principal.user_id),
            )
            .await;

        Ok(())
    }

    /// Mark a room read. Per-member state only; no room lock, no broadcast
    /// — read state is pull-based.
    pub async fn mark_read(&self, principal: &Principal, room_id: i64) -> Result<u64, AppError> {
        if !self.memberships.is_member(room_id, principal.user_id).await? {
            return Err(AppError::Forbidden(
                "You are not a member of this room".to_string(),
            ));
        }

        self.reads.mark_read(room_id, principal.user_id).await
    }

    // =========================================================================
    // HTTP-originated notifications
    // =========================================================================

    /// Wire a freshly created room into the live world: subscribe every
    /// initial member's connections and tell them about the room.
    pub async fn after_room_created(&self, room: &Room, initial_member_ids: &[i64]) {
        self.memberships.invalidate(room.id).await;

        self.registry
            .subscribe_principal(room.created_by, room.id)
            .await;

        for member_id in initial_member_ids {
            if *member_id == room.created_by {
                continue;
            }
            self.registry.subscribe_principal(*member_id, room.id).await;
            self.registry
                .send_to_principal(*member_id, &ServerEvent::RoomCreated { room: room.clone() })
                .await;
        }
    }

    /// Wire an approved join request into the live world: subscribe the
    /// requester, ack them, and announce them to the room.
    pub async fn after_admission(&self, room: &Room, requester_id: i64) -> Result<(), AppError> {
        let requester = self
            .db
            .get_user(requester_id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.registry.subscribe_principal(requester_id, room.id).await;
        self.registry
            .send_to_principal(requester_id, &ServerEvent::RoomJoined { room: room.clone() })
            .await;
        self.registry
            .broadcast_room(
                room.id,
                &ServerEvent::UserJoined {
                    room_id: room.id,
                    user_id: requester_id,
                    display_name: requester.name().to_string(),
                },
                Some(requester_id),
            )
            .await;

        Ok(())
    }
}
