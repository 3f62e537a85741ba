//! Room membership index
//!
//! Authorization checks run on every gateway event, so membership reads are
//! served from a memory-mirrored cache over the durable rows. The cache is
//! updated in the same breath as every mutation — room mutations are
//! serialized by the event router, so no authorization check can observe a
//! stale entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::data::{Database, Membership, Role, RoomMember};
use crate::error::AppError;

/// Memory-mirrored room → (member → role) index.
pub struct MembershipIndex {
    db: Arc<Database>,
    cache: RwLock<HashMap<i64, Arc<HashMap<i64, Role>>>>,
}

impl MembershipIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Role of a user in a room, if any.
    pub async fn role_of(&self, room_id: i64, user_id: i64) -> Result<Option<Role>, AppError> {
        let entry = self.entry(room_id).await?;
        Ok(entry.get(&user_id).copied())
    }

    pub async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        Ok(self.role_of(room_id, user_id).await?.is_some())
    }

    /// Fail with `Forbidden` unless the user holds a moderating role.
    pub async fn require_moderator(&self, room_id: i64, user_id: i64) -> Result<Role, AppError> {
        match self.role_of(room_id, user_id).await? {
            Some(role) if role.can_moderate() => Ok(role),
            Some(_) => Err(AppError::Forbidden(
                "Admin or moderator role required".to_string(),
            )),
            None => Err(AppError::Forbidden(
                "You are not a member of this room".to_string(),
            )),
        }
    }

    /// Ids of every member of a room (unordered).
    pub async fn member_ids(&self, room_id: i64) -> Result<Vec<i64>, AppError> {
        let entry = self.entry(room_id).await?;
        Ok(entry.keys().copied().collect())
    }

    /// Ordered member list (admins, moderators, members, then name);
    /// ordering lives in the storage query.
    pub async fn list_members(&self, room_id: i64) -> Result<Vec<RoomMember>, AppError> {
        self.db.list_members(room_id).await
    }

    /// Ids of every room the user belongs to.
    pub async fn room_ids_for(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        self.db.room_ids_for_user(user_id).await
    }

    /// Add a membership row and mirror it.
    ///
    /// # Returns
    /// `true` if the row was created, `false` if it already existed.
    pub async fn add(&self, room_id: i64, user_id: i64, role: Role) -> Result<bool, AppError> {
        let inserted = self.db.insert_membership(room_id, user_id, role).await?;
        if inserted {
            self.apply_added(room_id, user_id, role).await;
        }
        Ok(inserted)
    }

    /// Remove a membership row and its mirror entry.
    ///
    /// # Returns
    /// `true` if a row was removed.
    pub async fn remove(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        let removed = self.db.delete_membership(room_id, user_id).await?;
        if removed {
            let mut cache = self.cache.write().await;
            if let Some(entry) = cache.get(&room_id) {
                let mut updated = entry.as_ref().clone();
                updated.remove(&user_id);
                cache.insert(room_id, Arc::new(updated));
            }
        }
        Ok(removed)
    }

    /// Mirror a membership created outside this index (multi-row
    /// transactions commit first, then apply their delta here).
    pub async fn apply_added(&self, room_id: i64, user_id: i64, role: Role) {
        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.get(&room_id) {
            let mut updated = entry.as_ref().clone();
            updated.insert(user_id, role);
            cache.insert(room_id, Arc::new(updated));
        }
    }

    /// Drop a room's mirror entry; the next read reloads it from storage.
    pub async fn invalidate(&self, room_id: i64) {
        let mut cache = self.cache.write().await;
        cache.remove(&room_id);
        crate::metrics::MEMBERSHIP_CACHE_ROOMS
            .with_label_values(&["mirrored"])
            .set(cache.len() as i64);
    }

    /// Fetch the room's mirror entry, loading it from storage on first use.
    async fn entry(&self, room_id: i64) -> Result<Arc<HashMap<i64, Role>>, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&room_id) {
                return Ok(entry.clone());
            }
        }

        let rows = self.db.memberships_for_room(room_id).await?;
        let entry = Arc::new(roles_by_user(&rows));

        let mut cache = self.cache.write().await;
        // Another task may have loaded (or mutated) the entry while we were
        // reading storage; theirs is at least as fresh.
        let entry = cache.entry(room_id).or_insert(entry).clone();
        crate::metrics::MEMBERSHIP_CACHE_ROOMS
            .with_label_values(&["mirrored"])
            .set(cache.len() as i64);

        Ok(entry)
    }
}

fn roles_by_user(rows: &[Membership]) -> HashMap<i64, Role> {
    rows.iter()
        .filter_map(|row| Role::parse(&row.role).map(|role| (row.user_id, role)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Visibility;
    use tempfile::TempDir;

    async fn index_with_room() -> (Arc<Database>, MembershipIndex, i64, i64, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let admin = db.insert_user("admin", None).await.unwrap();
        let room = db
            .create_room_with_members("general", None, Visibility::Public, &admin, &[])
            .await
            .unwrap();

        let index = MembershipIndex::new(db.clone());
        (db, index, room.id, admin.id, temp_dir)
    }

    #[tokio::test]
    async fn cache_tracks_mutations() {
        let (db, index, room_id, admin_id, _guard) = index_with_room().await;

        assert_eq!(index.role_of(room_id, admin_id).await.unwrap(), Some(Role::Admin));

        let user = db.insert_user("bob", None).await.unwrap();
        assert!(!index.is_member(room_id, user.id).await.unwrap());

        assert!(index.add(room_id, user.id, Role::Member).await.unwrap());
        assert_eq!(index.role_of(room_id, user.id).await.unwrap(), Some(Role::Member));

        // Second add is a no-op
        assert!(!index.add(room_id, user.id, Role::Member).await.unwrap());

        assert!(index.remove(room_id, user.id).await.unwrap());
        assert!(!index.is_member(room_id, user.id).await.unwrap());

        // The mirror matches storage after the churn
        assert!(db.get_membership(room_id, user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_added_mirrors_external_transactions() {
        let (db, index, room_id, _admin_id, _guard) = index_with_room().await;

        let user = db.insert_user("carol", None).await.unwrap();
        // Warm the cache, then write behind its back the way the
        // join-request approval transaction does.
        assert!(!index.is_member(room_id, user.id).await.unwrap());
        db.insert_membership(room_id, user.id, Role::Member)
            .await
            .unwrap();

        index.apply_added(room_id, user.id, Role::Member).await;
        assert!(index.is_member(room_id, user.id).await.unwrap());
    }

    #[tokio::test]
    async fn moderator_gate() {
        let (db, index, room_id, admin_id, _guard) = index_with_room().await;

        assert!(index.require_moderator(room_id, admin_id).await.is_ok());

        let user = db.insert_user("dave", None).await.unwrap();
        index.add(room_id, user.id, Role::Member).await.unwrap();
        assert!(matches!(
            index.require_moderator(room_id, user.id).await,
            Err(AppError::Forbidden(_))
        ));

        let outsider = db.insert_user("eve", None).await.unwrap();
        assert!(matches!(
            index.require_moderator(room_id, outsider.id).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
