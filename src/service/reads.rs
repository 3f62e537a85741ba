//! Read/unread tracking
//!
//! A per-member watermark on the membership row answers "how many unread"
//! in O(1) per room; receipt rows answer "who has read this message".
//! Marking read reconciles both in a single transaction.

use std::sync::Arc;

use chrono::Utc;

use crate::data::{Database, MessageReader, UnreadCount};
use crate::error::AppError;

/// Read-state tracker
pub struct ReadTracker {
    db: Arc<Database>,
}

impl ReadTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Advance the member's watermark to now and backfill receipt rows for
    /// messages authored by others. Idempotent.
    ///
    /// # Returns
    /// Number of newly recorded receipts.
    pub async fn mark_read(&self, room_id: i64, member_id: i64) -> Result<u64, AppError> {
        let inserted = self.db.mark_room_read(room_id, member_id, Utc::now()).await?;

        if inserted > 0 {
            tracing::debug!(room_id, member_id, receipts = inserted, "read state advanced");
        }

        Ok(inserted)
    }

    /// Unread tallies per room: messages newer than the watermark, authored
    /// by someone else.
    pub async fn unread_counts(&self, member_id: i64) -> Result<Vec<UnreadCount>, AppError> {
        self.db.unread_counts(member_id).await
    }

    /// Readers of one message, earliest first.
    pub async fn readers_of(&self, message_id: i64) -> Result<Vec<MessageReader>, AppError> {
        self.db.readers_of(message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MessageKind, Visibility};
    use tempfile::TempDir;

    #[tokio::test]
    async fn unread_counts_follow_the_watermark() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let author = db.insert_user("author", None).await.unwrap();
        let reader = db.insert_user("reader", None).await.unwrap();
        let room = db
            .create_room_with_members("general", None, Visibility::Public, &author, &[reader.id])
            .await
            .unwrap();

        let tracker = ReadTracker::new(db.clone());

        // Fresh member: nothing newer than the join watermark yet.
        assert!(tracker.unread_counts(reader.id).await.unwrap().is_empty());
        tracker.mark_read(room.id, reader.id).await.unwrap();

        // Each message from a different author adds exactly one.
        db.insert_message(room.id, author.id, "one", MessageKind::Text, None)
            .await
            .unwrap();
        let counts = tracker.unread_counts(reader.id).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].unread, 1);

        db.insert_message(room.id, author.id, "two", MessageKind::Text, None)
            .await
            .unwrap();
        let counts = tracker.unread_counts(reader.id).await.unwrap();
        assert_eq!(counts[0].unread, 2);

        // Own messages never count.
        db.insert_message(room.id, reader.id, "mine", MessageKind::Text, None)
            .await
            .unwrap();
        let counts = tracker.unread_counts(reader.id).await.unwrap();
        assert_eq!(counts[0].unread, 2);

        // Marking read zeroes the room.
        tracker.mark_read(room.id, reader.id).await.unwrap();
        assert!(tracker.unread_counts(reader.id).await.unwrap().is_empty());
    }
}
