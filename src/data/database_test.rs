//! Database tests

use super::*;
use crate::error::AppError;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

async fn seed_user(db: &Database, username: &str) -> User {
    db.insert_user(username, Some(&format!("{} Display", username)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_user_insert_and_lookup() {
    let (db, _temp_dir) = create_test_db().await;

    let user = seed_user(&db, "ada").await;
    assert_eq!(user.username, "ada");

    let by_id = db.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(by_id.username, "ada");

    let by_name = db.get_user_by_username("ada").await.unwrap().unwrap();
    assert_eq!(by_name.id, user.id);

    assert!(db.get_user_by_username("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_room_creation_is_atomic() {
    let (db, _temp_dir) = create_test_db().await;

    let creator = seed_user(&db, "creator").await;
    let member = seed_user(&db, "member").await;

    // A nonexistent initial member rolls the whole creation back.
    let err = db
        .create_room_with_members("broken", None, Visibility::Public, &creator, &[member.id, 999])
        .await
        .expect_err("unknown member id must fail");
    assert!(matches!(err, AppError::NotFound));
    assert!(db.list_rooms(creator.id).await.unwrap().is_empty());
    assert!(db
        .get_membership(1, creator.id)
        .await
        .unwrap()
        .is_none());

    // A valid creation produces the room, both memberships, and the
    // opening system message.
    let room = db
        .create_room_with_members(
            "general",
            Some("the lobby"),
            Visibility::Public,
            &creator,
            &[member.id],
        )
        .await
        .unwrap();

    let creator_membership = db
        .get_membership(room.id, creator.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creator_membership.role, Role::Admin.as_str());

    let member_membership = db
        .get_membership(room.id, member.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(member_membership.role, Role::Member.as_str());

    let page = db
        .page_messages(room.id, creator.id, None, 10)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].kind, MessageKind::System.as_str());
}

#[tokio::test]
async fn test_member_ordering_contract() {
    let (db, _temp_dir) = create_test_db().await;

    let admin = seed_user(&db, "zed").await;
    let room = db
        .create_room_with_members("team", None, Visibility::Private, &admin, &[])
        .await
        .unwrap();

    let moderator = db.insert_user("mallory", Some("Mallory")).await.unwrap();
    let member_b = db.insert_user("bob", Some("Bob")).await.unwrap();
    let member_a = db.insert_user("alice", Some("Alice")).await.unwrap();

    db.insert_membership(room.id, moderator.id, Role::Moderator)
        .await
        .unwrap();
    db.insert_membership(room.id, member_b.id, Role::Member)
        .await
        .unwrap();
    db.insert_membership(room.id, member_a.id, Role::Member)
        .await
        .unwrap();

    let members = db.list_members(room.id).await.unwrap();
    let names: Vec<&str> = members.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["zed Display", "Mallory", "Alice", "Bob"]);
}

#[tokio::test]
async fn test_membership_upsert_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;

    let admin = seed_user(&db, "admin").await;
    let joiner = seed_user(&db, "joiner").await;
    let room = db
        .create_room_with_members("general", None, Visibility::Public, &admin, &[])
        .await
        .unwrap();

    assert!(db
        .insert_membership(room.id, joiner.id, Role::Member)
        .await
        .unwrap());
    assert!(!db
        .insert_membership(room.id, joiner.id, Role::Member)
        .await
        .unwrap());

    assert!(db.delete_membership(room.id, joiner.id).await.unwrap());
    assert!(!db.delete_membership(room.id, joiner.id).await.unwrap());
}

#[tokio::test]
async fn test_message_append_bumps_room_activity() {
    let (db, _temp_dir) = create_test_db().await;

    let author = seed_user(&db, "author").await;
    let room = db
        .create_room_with_members("general", None, Visibility::Public, &author, &[])
        .await
        .unwrap();

    let message = db
        .insert_message(room.id, author.id, "hello", MessageKind::Text, None)
        .await
        .unwrap();
    assert!(!message.is_edited);
    assert!(!message.is_recalled);

    let bumped = db.get_room(room.id).await.unwrap().unwrap();
    assert!(bumped.updated_at >= room.updated_at);
}

#[tokio::test]
async fn test_keyset_pagination_is_stable() {
    let (db, _temp_dir) = create_test_db().await;

    let author = seed_user(&db, "author").await;
    let room = db
        .create_room_with_members("general", None, Visibility::Public, &author, &[])
        .await
        .unwrap();

    let mut ids = Vec::new();
    for n in 0..5 {
        let message = db
            .insert_message(room.id, author.id, &format!("m{n}"), MessageKind::Text, None)
            .await
            .unwrap();
        ids.push(message.id);
    }

    // First page: the three newest, descending by id.
    let page = db
        .page_messages(room.id, author.id, None, 3)
        .await
        .unwrap();
    assert_eq!(page.len(), 3);
    assert_eq!(page[0].id, ids[4]);
    assert_eq!(page[2].id, ids[2]);

    // Second page keys off the oldest id of the first; an insert in
    // between must not shift it.
    db.insert_message(room.id, author.id, "late", MessageKind::Text, None)
        .await
        .unwrap();
    let page2 = db
        .page_messages(room.id, author.id, Some(page[2].id), 3)
        .await
        .unwrap();
    assert_eq!(page2[0].id, ids[1]);
    assert_eq!(page2[1].id, ids[0]);
}

#[tokio::test]
async fn test_hide_is_per_viewer() {
    let (db, _temp_dir) = create_test_db().await;

    let author = seed_user(&db, "author").await;
    let other = seed_user(&db, "other").await;
    let room = db
        .create_room_with_members("general", None, Visibility::Public, &author, &[other.id])
        .await
        .unwrap();

    let message = db
        .insert_message(room.id, author.id, "now you see me", MessageKind::Text, None)
        .await
        .unwrap();

    db.hide_message_for(message.id, other.id).await.unwrap();
    // Idempotent
    db.hide_message_for(message.id, other.id).await.unwrap();

    let hidden_view = db
        .page_messages(room.id, other.id, None, 10)
        .await
        .unwrap();
    assert!(hidden_view.iter().all(|m| m.id != message.id));

    let author_view = db
        .page_messages(room.id, author.id, None, 10)
        .await
        .unwrap();
    assert!(author_view.iter().any(|m| m.id == message.id));
}

#[tokio::test]
async fn test_mark_read_reconciles_receipts() {
    let (db, _temp_dir) = create_test_db().await;

    let author = seed_user(&db, "author").await;
    let reader = seed_user(&db, "reader").await;
    let room = db
        .create_room_with_members("general", None, Visibility::Public, &author, &[reader.id])
        .await
        .unwrap();

    let m1 = db
        .insert_message(room.id, author.id, "one", MessageKind::Text, None)
        .await
        .unwrap();
    db.insert_message(room.id, reader.id, "mine", MessageKind::Text, None)
        .await
        .unwrap();

    let unread = db.unread_counts(reader.id).await.unwrap();
    assert_eq!(unread.len(), 1);
    // Only m1: the opening system message shares the join watermark's
    // timestamp, and the reader's own message never counts.
    assert_eq!(unread[0].unread, 1);

    // Receipt reconciliation covers the whole history authored by others,
    // watermark or not: the system message and m1.
    let inserted = db
        .mark_room_read(room.id, reader.id, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    assert!(db.unread_counts(reader.id).await.unwrap().is_empty());

    // Idempotent: nothing new to reconcile.
    let inserted = db
        .mark_room_read(room.id, reader.id, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(inserted, 0);

    let readers = db.readers_of(m1.id).await.unwrap();
    assert_eq!(readers.len(), 1);
    assert_eq!(readers[0].user_id, reader.id);
}

#[tokio::test]
async fn test_join_request_single_pending() {
    let (db, _temp_dir) = create_test_db().await;

    let admin = seed_user(&db, "admin").await;
    let requester = seed_user(&db, "requester").await;
    let room = db
        .create_room_with_members("team", None, Visibility::Private, &admin, &[])
        .await
        .unwrap();

    let request = db
        .insert_join_request(room.id, requester.id, Some("please add me"))
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending.as_str());

    let err = db
        .insert_join_request(room.id, requester.id, None)
        .await
        .expect_err("duplicate pending request must fail");
    assert!(matches!(err, AppError::InvalidState(_)));

    let pending = db.list_pending_requests(room.id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].requester_id, requester.id);

    db.approve_join_request(&request, admin.id).await.unwrap();

    let approved = db.get_join_request(request.id).await.unwrap().unwrap();
    assert_eq!(approved.status, RequestStatus::Approved.as_str());
    assert_eq!(approved.reviewed_by, Some(admin.id));
    assert!(db
        .get_membership(room.id, requester.id)
        .await
        .unwrap()
        .is_some());

    // Terminal: a second review fails.
    let err = db
        .approve_join_request(&request, admin.id)
        .await
        .expect_err("re-approval must fail");
    assert!(matches!(err, AppError::InvalidState(_)));

    // With the pending request resolved, a new one may be filed.
    db.insert_join_request(room.id, requester.id, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_notifications_round_trip() {
    let (db, _temp_dir) = create_test_db().await;

    let user = seed_user(&db, "sleepy").await;

    db.insert_notifications(
        &[user.id],
        "new_message",
        "New message from ada",
        Some("hello"),
        None,
    )
    .await
    .unwrap();

    let notifications = db.list_notifications(user.id, 10).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "new_message");
    assert_eq!(notifications[0].body.as_deref(), Some("hello"));
}
