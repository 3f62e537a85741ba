//! Message log
//!
//! Append-only per-room log with edit/recall windows, per-viewer hides,
//! and keyset pagination. Rows are never physically deleted: recall
//! tombstones a message for everyone, a hide suppresses it for one viewer.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::RoomsConfig;
use crate::data::{Database, Message, MessageKind, MessageRecord};
use crate::error::AppError;

/// Hard cap on page size; the default page is smaller.
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_PAGE_SIZE: u32 = 50;

/// Message log service
pub struct MessageLog {
    db: Arc<Database>,
    edit_window: Duration,
    recall_window: Duration,
}

impl MessageLog {
    pub fn new(db: Arc<Database>, rooms: &RoomsConfig) -> Self {
        Self {
            db,
            edit_window: Duration::seconds(rooms.edit_window_seconds as i64),
            recall_window: Duration::seconds(rooms.recall_window_seconds as i64),
        }
    }

    /// Append a message to a room's log.
    ///
    /// The caller is responsible for having authorized the author; this
    /// only validates the payload.
    pub async fn append(
        &self,
        room_id: i64,
        author_id: i64,
        content: &str,
        kind: MessageKind,
        attachment_ref: Option<&str>,
    ) -> Result<MessageRecord, AppError> {
        let content = content.trim();
        if content.is_empty() && attachment_ref.is_none() {
            return Err(AppError::Validation(
                "Message content or attachment is required".to_string(),
            ));
        }

        let message = self
            .db
            .insert_message(room_id, author_id, content, kind, attachment_ref)
            .await?;

        self.db
            .get_message_record(message.id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Overwrite a message's content.
    ///
    /// Only the author may edit, only inside the edit window, and never
    /// after a recall. No edit history is retained.
    pub async fn edit(
        &self,
        message_id: i64,
        editor_id: i64,
        new_content: &str,
    ) -> Result<MessageRecord, AppError> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(AppError::Validation(
                "Message content is required".to_string(),
            ));
        }

        let message = self.require_author(message_id, editor_id).await?;

        if message.is_recalled {
            return Err(AppError::InvalidState(
                "Message has been recalled".to_string(),
            ));
        }

        let now = Utc::now();
        if now - message.created_at > self.edit_window {
            return Err(AppError::InvalidState(format!(
                "Edit window of {} seconds has expired",
                self.edit_window.num_seconds()
            )));
        }

        self.db
            .apply_message_edit(message_id, new_content, now)
            .await?;

        self.db
            .get_message_record(message_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Tombstone a message for every viewer.
    ///
    /// Only the author may recall, only inside the recall window, and a
    /// recall is irreversible — a second attempt fails.
    pub async fn recall(&self, message_id: i64, caller_id: i64) -> Result<Message, AppError> {
        let message = self.require_author(message_id, caller_id).await?;

        if message.is_recalled {
            return Err(AppError::InvalidState(
                "Message has already been recalled".to_string(),
            ));
        }

        if Utc::now() - message.created_at > self.recall_window {
            return Err(AppError::InvalidState(format!(
                "Recall window of {} seconds has expired",
                self.recall_window.num_seconds()
            )));
        }

        self.db.apply_message_recall(message_id).await?;

        self.db.get_message(message_id).await?.ok_or(AppError::NotFound)
    }

    /// Hide a message for one viewer. No membership check beyond the
    /// message existing — the hide set never affects anyone else.
    pub async fn hide_for_viewer(
        &self,
        message_id: i64,
        viewer_id: i64,
    ) -> Result<Message, AppError> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.db.hide_message_for(message_id, viewer_id).await?;

        Ok(message)
    }

    /// One page of a room's log for a viewer: fetched newest-first keyed on
    /// the monotonic message id, returned oldest-first for display.
    pub async fn page(
        &self,
        room_id: i64,
        viewer_id: i64,
        before_id: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE).max(1);

        let mut messages = self
            .db
            .page_messages(room_id, viewer_id, before_id, limit)
            .await?;
        messages.reverse();

        Ok(messages)
    }

    async fn require_author(&self, message_id: i64, user_id: i64) -> Result<Message, AppError> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if message.author_id != user_id {
            return Err(AppError::Forbidden(
                "Only the author may do that".to_string(),
            ));
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{User, Visibility};
    use tempfile::TempDir;

    fn test_rooms_config(edit_seconds: u64, recall_seconds: u64) -> RoomsConfig {
        RoomsConfig {
            edit_window_seconds: edit_seconds,
            recall_window_seconds: recall_seconds,
        }
    }

    async fn log_fixture(
        edit_seconds: u64,
        recall_seconds: u64,
    ) -> (Arc<Database>, MessageLog, User, i64, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let author = db.insert_user("author", None).await.unwrap();
        let room = db
            .create_room_with_members("general", None, Visibility::Public, &author, &[])
            .await
            .unwrap();
        let log = MessageLog::new(db.clone(), &test_rooms_config(edit_seconds, recall_seconds));
        (db, log, author, room.id, temp_dir)
    }

    #[tokio::test]
    async fn append_rejects_empty_content() {
        let (_db, log, author, room_id, _guard) = log_fixture(300, 120).await;

        let err = log
            .append(room_id, author.id, "   ", MessageKind::Text, None)
            .await
            .expect_err("blank message must fail");
        assert!(matches!(err, AppError::Validation(_)));

        // An attachment alone is enough
        log.append(room_id, author.id, "", MessageKind::File, Some("blob:1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn edit_inside_window_succeeds() {
        let (_db, log, author, room_id, _guard) = log_fixture(300, 120).await;

        let message = log
            .append(room_id, author.id, "helo", MessageKind::Text, None)
            .await
            .unwrap();

        let edited = log.edit(message.id, author.id, "hello").await.unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "hello");
        assert!(edited.edited_at.is_some());
    }

    #[tokio::test]
    async fn edit_outside_window_fails_with_invalid_state() {
        // Zero-second window: the boundary has always just passed.
        let (_db, log, author, room_id, _guard) = log_fixture(0, 0).await;

        let message = log
            .append(room_id, author.id, "too late", MessageKind::Text, None)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let err = log
            .edit(message.id, author.id, "nope")
            .await
            .expect_err("edit after the window must fail");
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn only_author_may_edit_or_recall() {
        let (db, log, author, room_id, _guard) = log_fixture(300, 120).await;

        let stranger = db.insert_user("stranger", None).await.unwrap();
        let message = log
            .append(room_id, author.id, "mine", MessageKind::Text, None)
            .await
            .unwrap();

        assert!(matches!(
            log.edit(message.id, stranger.id, "hijack").await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            log.recall(message.id, stranger.id).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn recall_is_irreversible_and_idempotent_safe() {
        let (_db, log, author, room_id, _guard) = log_fixture(300, 120).await;

        let message = log
            .append(room_id, author.id, "oops", MessageKind::Text, None)
            .await
            .unwrap();

        let recalled = log.recall(message.id, author.id).await.unwrap();
        assert!(recalled.is_recalled);
        assert_eq!(recalled.content, "");

        // Second recall never double-applies
        let err = log
            .recall(message.id, author.id)
            .await
            .expect_err("second recall must fail");
        assert!(matches!(err, AppError::InvalidState(_)));

        // A recalled message can no longer be edited
        let err = log
            .edit(message.id, author.id, "resurrect")
            .await
            .expect_err("edit after recall must fail");
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn recalled_message_pages_as_tombstone() {
        let (_db, log, author, room_id, _guard) = log_fixture(300, 120).await;

        let message = log
            .append(room_id, author.id, "hello", MessageKind::Text, None)
            .await
            .unwrap();
        log.recall(message.id, author.id).await.unwrap();

        let page = log.page(room_id, author.id, None, None).await.unwrap();
        let tombstone = page.iter().find(|m| m.id == message.id).unwrap();
        assert!(tombstone.is_recalled);
        assert_eq!(tombstone.content, "");
    }

    #[tokio::test]
    async fn hide_does_not_touch_other_viewers() {
        let (db, log, author, room_id, _guard) = log_fixture(300, 120).await;

        let viewer = db.insert_user("viewer", None).await.unwrap();
        db.insert_membership(room_id, viewer.id, crate::data::Role::Member)
            .await
            .unwrap();

        let message = log
            .append(room_id, author.id, "visible", MessageKind::Text, None)
            .await
            .unwrap();

        log.hide_for_viewer(message.id, viewer.id).await.unwrap();

        let viewer_page = log.page(room_id, viewer.id, None, None).await.unwrap();
        assert!(viewer_page.iter().all(|m| m.id != message.id));

        let author_page = log.page(room_id, author.id, None, None).await.unwrap();
        assert!(author_page.iter().any(|m| m.id == message.id));
    }

    #[tokio::test]
    async fn hide_of_unknown_message_is_not_found() {
        let (_db, log, author, _room_id, _guard) = log_fixture(300, 120).await;

        assert!(matches!(
            log.hide_for_viewer(9999, author.id).await,
            Err(AppError::NotFound)
        ));
    }
}
