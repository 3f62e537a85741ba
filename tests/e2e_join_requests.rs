//! E2E tests for the private-room admission workflow

mod common;

use common::TestServer;
use serde_json::Value;

struct Scenario {
    server: TestServer,
    admin_token: String,
    requester_token: String,
    requester_id: i64,
    room_id: i64,
}

async fn scenario() -> Scenario {
    let server = TestServer::new().await;
    let (_admin, admin_token) = server.create_user("admin").await;
    let (requester, requester_token) = server.create_user("requester").await;

    let room: Value = server
        .client
        .post(server.url("/api/rooms"))
        .header("Authorization", format!("Bearer {}", admin_token))
        .json(&serde_json::json!({ "name": "team", "visibility": "private" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    Scenario {
        room_id: room["id"].as_i64().unwrap(),
        requester_id: requester.id,
        server,
        admin_token,
        requester_token,
    }
}

#[tokio::test]
async fn request_approve_unlocks_sending() {
    let s = scenario().await;

    // The requester cannot read the room yet.
    let response = s
        .server
        .client
        .get(s.server.url(&format!("/api/rooms/{}/messages", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.requester_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // File the request.
    let response = s
        .server
        .client
        .post(s.server.url(&format!("/api/rooms/{}/join-requests", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.requester_token))
        .json(&serde_json::json!({ "message": "please add me" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let request: Value = response.json().await.unwrap();
    assert_eq!(request["status"], "pending");

    // It shows up in the admin's pending list.
    let pending: Vec<Value> = s
        .server
        .client
        .get(s.server.url(&format!("/api/rooms/{}/join-requests", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.admin_token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["message"], "please add me");
    assert_eq!(pending[0]["requester_id"], s.requester_id);

    // Approve: membership appears, status flips.
    let approved: Value = s
        .server
        .client
        .post(s.server.url(&format!(
            "/api/join-requests/{}/approve",
            request["id"].as_i64().unwrap()
        )))
        .header("Authorization", format!("Bearer {}", s.admin_token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(approved["status"], "approved");

    assert!(s
        .server
        .state
        .db
        .get_membership(s.room_id, s.requester_id)
        .await
        .unwrap()
        .is_some());

    // What previously failed with authorization-denied now succeeds.
    let response = s
        .server
        .client
        .get(s.server.url(&format!("/api/rooms/{}/messages", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.requester_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn duplicate_pending_requests_conflict() {
    let s = scenario().await;

    let first = s
        .server
        .client
        .post(s.server.url(&format!("/api/rooms/{}/join-requests", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.requester_token))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);

    let second = s
        .server
        .client
        .post(s.server.url(&format!("/api/rooms/{}/join-requests", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.requester_token))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);

    let body: Value = second.json().await.unwrap();
    assert_eq!(body["kind"], "invalid-state");
}

#[tokio::test]
async fn public_rooms_reject_requests() {
    let server = TestServer::new().await;
    let (_creator, creator_token) = server.create_user("creator").await;
    let (_visitor, visitor_token) = server.create_user("visitor").await;

    let room: Value = server
        .client
        .post(server.url("/api/rooms"))
        .header("Authorization", format!("Bearer {}", creator_token))
        .json(&serde_json::json!({ "name": "lobby" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = server
        .client
        .post(server.url(&format!(
            "/api/rooms/{}/join-requests",
            room["id"].as_i64().unwrap()
        )))
        .header("Authorization", format!("Bearer {}", visitor_token))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn review_is_gated_and_terminal() {
    let s = scenario().await;
    let (_bystander, bystander_token) = s.server.create_user("bystander").await;

    let request: Value = s
        .server
        .client
        .post(s.server.url(&format!("/api/rooms/{}/join-requests", s.room_id)))
        .header("Authorization", format!("Bearer {}", s.requester_token))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let request_id = request["id"].as_i64().unwrap();

    // Pending list and review are for moderating roles only.
    let response = s
        .server
        .client
        .get(s.server.url(&format!("/api/rooms/{}/join-requests", s.room_id)))
        .header("Authorization", format!("Bearer {}", bystander_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = s
        .server
        .client
        .post(s.server.url(&format!("/api/join-requests/{}/reject", request_id)))
        .header("Authorization", format!("Bearer {}", bystander_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Reject is terminal: no membership, and re-review conflicts.
    let response = s
        .server
        .client
        .post(s.server.url(&format!("/api/join-requests/{}/reject", request_id)))
        .header("Authorization", format!("Bearer {}", s.admin_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    assert!(s
        .server
        .state
        .db
        .get_membership(s.room_id, s.requester_id)
        .await
        .unwrap()
        .is_none());

    let response = s
        .server
        .client
        .post(s.server.url(&format!("/api/join-requests/{}/approve", request_id)))
        .header("Authorization", format!("Bearer {}", s.admin_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}
