//! SQLite database operations
//!
//! All database access goes through this module. Queries are runtime-checked
//! sqlx with explicit binds; every logical mutation that spans rows runs in
//! a single transaction so partial application cannot be observed.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database at `path`.
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user row for a principal known to the identity service.
    pub async fn insert_user(
        &self,
        username: &str,
        display_name: Option<&str>,
    ) -> Result<User, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (username, display_name, created_at) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(display_name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_user(result.last_insert_rowid())
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Record when a principal was last seen; called on the offline edge.
    pub async fn touch_last_seen(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_seen_at = ? WHERE id = ?")
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    /// Create a room with its creator as admin, optional initial members,
    /// and an opening system message — all or nothing.
    ///
    /// # Errors
    /// `NotFound` if any initial member id does not exist; the transaction
    /// is rolled back and no partial membership survives.
    pub async fn create_room_with_members(
        &self,
        name: &str,
        description: Option<&str>,
        visibility: Visibility,
        creator: &User,
        initial_member_ids: &[i64],
    ) -> Result<Room, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO rooms (name, description, visibility, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(visibility.as_str())
        .bind(creator.id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let room_id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id, role, joined_at, last_read_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(room_id)
        .bind(creator.id)
        .bind(Role::Admin.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for member_id in initial_member_ids {
            if *member_id == creator.id {
                continue;
            }

            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ?")
                .bind(member_id)
                .fetch_one(&mut *tx)
                .await?;
            if exists == 0 {
                return Err(AppError::NotFound);
            }

            sqlx::query(
                r#"
                INSERT INTO room_members (room_id, user_id, role, joined_at, last_read_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (room_id, user_id) DO NOTHING
                "#,
            )
            .bind(room_id)
            .bind(member_id)
            .bind(Role::Member.as_str())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO messages (room_id, author_id, content, kind, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(room_id)
        .bind(creator.id)
        .bind(format!("{} created the room", creator.name()))
        .bind(MessageKind::System.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        crate::metrics::ROOMS_TOTAL.inc();

        self.get_room(room_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn get_room(&self, id: i64) -> Result<Option<Room>, AppError> {
        let room = sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(room)
    }

    /// All rooms, most recently active first, with a membership flag for
    /// the given viewer.
    pub async fn list_rooms(&self, viewer_id: i64) -> Result<Vec<RoomOverview>, AppError> {
        let rooms = sqlx::query_as::<_, RoomOverview>(
            r#"
            SELECT
                r.id, r.name, r.description, r.visibility, r.created_by,
                COALESCE(u.display_name, u.username) AS creator_name,
                r.created_at, r.updated_at,
                EXISTS (
                    SELECT 1 FROM room_members rm
                    WHERE rm.room_id = r.id AND rm.user_id = ?
                ) AS is_member
            FROM rooms r
            JOIN users u ON r.created_by = u.id
            ORDER BY r.updated_at DESC, r.created_at DESC
            "#,
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }

    // =========================================================================
    // Memberships
    // =========================================================================

    pub async fn get_membership(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> Result<Option<Membership>, AppError> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT * FROM room_members WHERE room_id = ? AND user_id = ?",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    /// Insert a membership row if absent.
    ///
    /// # Returns
    /// `true` if the row was inserted, `false` if it already existed —
    /// the idempotent upsert the join-room self-heal path relies on.
    pub async fn insert_membership(
        &self,
        room_id: i64,
        user_id: i64,
        role: Role,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id, role, joined_at, last_read_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a membership row.
    ///
    /// # Returns
    /// `true` if a row was removed.
    pub async fn delete_membership(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM room_members WHERE room_id = ? AND user_id = ?")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Ordered member list: admins, then moderators, then members, then
    /// alphabetical by rendered name. This ordering is a stable contract
    /// for member-list rendering.
    pub async fn list_members(&self, room_id: i64) -> Result<Vec<RoomMember>, AppError> {
        let members = sqlx::query_as::<_, RoomMember>(
            r#"
            SELECT
                u.id AS user_id, u.username, u.display_name,
                rm.role, rm.joined_at, u.last_seen_at
            FROM room_members rm
            JOIN users u ON rm.user_id = u.id
            WHERE rm.room_id = ?
            ORDER BY
                CASE rm.role
                    WHEN 'admin' THEN 0
                    WHEN 'moderator' THEN 1
                    ELSE 2
                END,
                COALESCE(u.display_name, u.username) COLLATE NOCASE ASC
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    /// All membership rows of one room; used to mirror the room into the
    /// membership cache.
    pub async fn memberships_for_room(&self, room_id: i64) -> Result<Vec<Membership>, AppError> {
        let rows =
            sqlx::query_as::<_, Membership>("SELECT * FROM room_members WHERE room_id = ?")
                .bind(room_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows)
    }

    /// Ids of every room the user belongs to.
    pub async fn room_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        let ids =
            sqlx::query_scalar::<_, i64>("SELECT room_id FROM room_members WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append a message and bump the room's activity timestamp in one
    /// transaction.
    pub async fn insert_message(
        &self,
        room_id: i64,
        author_id: i64,
        content: &str,
        kind: MessageKind,
        attachment_ref: Option<&str>,
    ) -> Result<Message, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO messages (room_id, author_id, content, kind, attachment_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(room_id)
        .bind(author_id)
        .bind(content)
        .bind(kind.as_str())
        .bind(attachment_ref)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let message_id = result.last_insert_rowid();

        sqlx::query("UPDATE rooms SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(room_id)
            .execute(&mut *tx)
            .await?;

        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        crate::metrics::MESSAGES_TOTAL.inc();

        Ok(message)
    }

    pub async fn get_message(&self, id: i64) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    /// Fetch a message joined with its author name and read count.
    pub async fn get_message_record(&self, id: i64) -> Result<Option<MessageRecord>, AppError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT
                m.id, m.room_id, m.author_id,
                COALESCE(u.display_name, u.username) AS author_name,
                m.content, m.kind, m.attachment_ref,
                m.is_edited, m.is_recalled, m.created_at, m.edited_at,
                (SELECT COUNT(*) FROM message_reads mr WHERE mr.message_id = m.id) AS read_count
            FROM messages m
            JOIN users u ON m.author_id = u.id
            WHERE m.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// One page of a room's log, newest first, keyed on the monotonic
    /// message id so concurrent inserts can't skip or duplicate rows.
    /// Messages the viewer has locally hidden are filtered out here.
    pub async fn page_messages(
        &self,
        room_id: i64,
        viewer_id: i64,
        before_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let messages = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT
                m.id, m.room_id, m.author_id,
                COALESCE(u.display_name, u.username) AS author_name,
                m.content, m.kind, m.attachment_ref,
                m.is_edited, m.is_recalled, m.created_at, m.edited_at,
                (SELECT COUNT(*) FROM message_reads mr WHERE mr.message_id = m.id) AS read_count
            FROM messages m
            JOIN users u ON m.author_id = u.id
            WHERE m.room_id = ?
              AND (? IS NULL OR m.id < ?)
              AND NOT EXISTS (
                  SELECT 1 FROM message_hides h
                  WHERE h.message_id = m.id AND h.user_id = ?
              )
            ORDER BY m.id DESC
            LIMIT ?
            "#,
        )
        .bind(room_id)
        .bind(before_id)
        .bind(before_id)
        .bind(viewer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Overwrite a message's content after an authorized edit.
    pub async fn apply_message_edit(
        &self,
        message_id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE messages SET content = ?, is_edited = 1, edited_at = ? WHERE id = ?",
        )
        .bind(content)
        .bind(edited_at)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Tombstone a message: clear content, mark recalled. Irreversible.
    pub async fn apply_message_recall(&self, message_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE messages SET is_recalled = 1, content = '' WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Hide a message for one viewer only. Re-hiding refreshes the
    /// timestamp, so the operation is idempotent.
    pub async fn hide_message_for(&self, message_id: i64, user_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO message_hides (message_id, user_id, hidden_at)
            VALUES (?, ?, ?)
            ON CONFLICT (message_id, user_id) DO UPDATE SET hidden_at = excluded.hidden_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Read state
    // =========================================================================

    /// Advance the member's watermark and reconcile receipt rows for every
    /// message authored by others that the member had not yet read, in one
    /// transaction. Idempotent: re-marking with no new messages is a no-op.
    ///
    /// # Returns
    /// Number of receipt rows inserted.
    pub async fn mark_room_read(
        &self,
        room_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE room_members SET last_read_at = ? WHERE room_id = ? AND user_id = ?")
            .bind(at)
            .bind(room_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            SELECT m.id, ?, ?
            FROM messages m
            WHERE m.room_id = ?
              AND m.author_id != ?
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads mr
                  WHERE mr.message_id = m.id AND mr.user_id = ?
              )
            "#,
        )
        .bind(user_id)
        .bind(at)
        .bind(room_id)
        .bind(user_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(inserted.rows_affected())
    }

    /// Unread tallies per room for one member: messages newer than the
    /// watermark and authored by someone else.
    pub async fn unread_counts(&self, user_id: i64) -> Result<Vec<UnreadCount>, AppError> {
        let counts = sqlx::query_as::<_, UnreadCount>(
            r#"
            SELECT
                rm.room_id,
                r.name AS room_name,
                COUNT(m.id) AS unread
            FROM room_members rm
            JOIN rooms r ON rm.room_id = r.id
            JOIN messages m ON m.room_id = rm.room_id AND m.created_at > rm.last_read_at
            WHERE rm.user_id = ? AND m.author_id != ?
            GROUP BY rm.room_id, r.name
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    /// Who has read a message, earliest reader first.
    pub async fn readers_of(&self, message_id: i64) -> Result<Vec<MessageReader>, AppError> {
        let readers = sqlx::query_as::<_, MessageReader>(
            r#"
            SELECT u.id AS user_id, u.username, u.display_name, mr.read_at
            FROM message_reads mr
            JOIN users u ON mr.user_id = u.id
            WHERE mr.message_id = ?
            ORDER BY mr.read_at ASC
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(readers)
    }

    // =========================================================================
    // Join requests
    // =========================================================================

    /// File an admission request.
    ///
    /// # Errors
    /// `InvalidState` if a pending request already exists for this
    /// (room, requester) pair — enforced by a partial unique index.
    pub async fn insert_join_request(
        &self,
        room_id: i64,
        requester_id: i64,
        message: Option<&str>,
    ) -> Result<JoinRequest, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO join_requests (room_id, requester_id, message, status, created_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(room_id)
        .bind(requester_id)
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::InvalidState(
                    "A join request for this room is already pending".to_string(),
                ));
            }
            Err(other) => return Err(other.into()),
        };

        self.get_join_request(result.last_insert_rowid())
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn get_join_request(&self, id: i64) -> Result<Option<JoinRequest>, AppError> {
        let request =
            sqlx::query_as::<_, JoinRequest>("SELECT * FROM join_requests WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(request)
    }

    /// Pending requests for a room, oldest first, with requester names.
    pub async fn list_pending_requests(
        &self,
        room_id: i64,
    ) -> Result<Vec<JoinRequestRecord>, AppError> {
        let requests = sqlx::query_as::<_, JoinRequestRecord>(
            r#"
            SELECT
                jr.id, jr.room_id, jr.requester_id,
                COALESCE(u.display_name, u.username) AS requester_name,
                jr.message, jr.status, jr.created_at
            FROM join_requests jr
            JOIN users u ON jr.requester_id = u.id
            WHERE jr.room_id = ? AND jr.status = 'pending'
            ORDER BY jr.created_at ASC
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    /// Approve a pending request and create the membership row atomically.
    ///
    /// # Errors
    /// `InvalidState` if the request is no longer pending.
    pub async fn approve_join_request(
        &self,
        request: &JoinRequest,
        reviewer_id: i64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE join_requests
            SET status = 'approved', reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reviewer_id)
        .bind(now)
        .bind(request.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(
                "Join request has already been reviewed".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id, role, joined_at, last_read_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(request.room_id)
        .bind(request.requester_id)
        .bind(Role::Member.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Reject a pending request. Terminal; nobody is notified.
    ///
    /// # Errors
    /// `InvalidState` if the request is no longer pending.
    pub async fn reject_join_request(
        &self,
        request_id: i64,
        reviewer_id: i64,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE join_requests
            SET status = 'rejected', reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reviewer_id)
        .bind(Utc::now())
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidState(
                "Join request has already been reviewed".to_string(),
            ));
        }

        Ok(())
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Enqueue one notification per listed user.
    pub async fn insert_notifications(
        &self,
        user_ids: &[i64],
        kind: &str,
        title: &str,
        body: Option<&str>,
        room_id: Option<i64>,
    ) -> Result<(), AppError> {
        if user_ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for user_id in user_ids {
            sqlx::query(
                r#"
                INSERT INTO notifications (user_id, kind, title, body, room_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(kind)
            .bind(title)
            .bind(body)
            .bind(room_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Recent notifications for one user, newest first.
    pub async fn list_notifications(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }
}
