mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::Value;
use shared::models::Timestamp;

fn id_of(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn buyer_and_seller_exchange_messages_about_a_listing() {
    let app = TestApp::new().await;
    let seller = app.user("Ana").await;
    let buyer = app.user("Bruno").await;
    let listing = app.listing(&seller, "Bicicleta").await;

    let (status, conversation) = app.start_conversation(&buyer, listing).await;
    assert_eq!(status, StatusCode::CREATED);
    let conversation_id = id_of(&conversation);

    let (status, again) = app.start_conversation(&buyer, listing).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&again), conversation_id);

    let (status, inbox) = app.call("GET", "/api/conversations", Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK);
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 1);
    let last = inbox[0]["last_message"]["content"].as_str().unwrap();
    assert!(last.contains("Bicicleta"));

    let later_buyer = app.user("Carla").await;
    let other_listing = app.listing(&seller, "Capacete").await;
    let (status, later) = app.start_conversation(&later_buyer, other_listing).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, reply) = app
        .send_message(&seller, &conversation_id, "  Ainda disponível  ")
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["content"], "Ainda disponível");
    assert_eq!(reply["receiver_id"], buyer.id.to_string());
    assert_eq!(reply["seen"], false);

    let (_, inbox) = app.call("GET", "/api/conversations", Some(&seller), None).await;
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 2);
    assert_eq!(id_of(&inbox[0]), conversation_id);
    assert_eq!(id_of(&inbox[1]), id_of(&later));
    let bumped: Timestamp = serde_json::from_value(inbox[0]["last_message_at"].clone()).unwrap();
    let replied: Timestamp = serde_json::from_value(reply["created_at"].clone()).unwrap();
    assert!(bumped >= replied);
    assert_eq!(inbox[0]["last_message"]["id"], reply["id"]);

    let (status, messages) = app.messages(&buyer, &conversation_id).await;
    assert_eq!(status, StatusCode::OK);
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["sender_id"], buyer.id.to_string());
    assert!(messages[0]["content"].as_str().unwrap().contains("Bicicleta"));
    assert_eq!(messages[1]["content"], "Ainda disponível");
    let first: Timestamp = serde_json::from_value(messages[0]["created_at"].clone()).unwrap();
    let second: Timestamp = serde_json::from_value(messages[1]["created_at"].clone()).unwrap();
    assert!(first <= second);
}

#[tokio::test]
async fn owner_cannot_open_a_conversation_on_their_own_listing() {
    let app = TestApp::new().await;
    let seller = app.user("Ana").await;
    let listing = app.listing(&seller, "Sofá").await;

    let (status, problem) = app.start_conversation(&seller, listing).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(problem["code"], "forbidden");

    let (_, inbox) = app.call("GET", "/api/conversations", Some(&seller), None).await;
    assert!(inbox.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_listing_is_not_found() {
    let app = TestApp::new().await;
    let buyer = app.user("Bruno").await;

    let (status, _) = app.start_conversation(&buyer, uuid::Uuid::new_v4()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_messages_are_rejected_without_writing() {
    let app = TestApp::new().await;
    let seller = app.user("Ana").await;
    let buyer = app.user("Bruno").await;
    let listing = app.listing(&seller, "Mesa").await;
    let (_, conversation) = app.start_conversation(&buyer, listing).await;
    let conversation_id = id_of(&conversation);

    let (status, problem) = app.send_message(&buyer, &conversation_id, "   \n\t").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["code"], "invalid_argument");

    let (_, messages) = app.messages(&buyer, &conversation_id).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn outsiders_cannot_read_or_write_a_conversation() {
    let app = TestApp::new().await;
    let seller = app.user("Ana").await;
    let buyer = app.user("Bruno").await;
    let outsider = app.user("Carla").await;
    let listing = app.listing(&seller, "Cadeira").await;
    let (_, conversation) = app.start_conversation(&buyer, listing).await;
    let conversation_id = id_of(&conversation);

    let (status, _) = app.send_message(&outsider, &conversation_id, "oi").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.messages(&outsider, &conversation_id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, messages) = app.messages(&buyer, &conversation_id).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn mark_seen_only_flips_messages_addressed_to_the_caller() {
    let app = TestApp::new().await;
    let seller = app.user("Ana").await;
    let buyer = app.user("Bruno").await;
    let listing = app.listing(&seller, "Lâmpada").await;
    let (_, conversation) = app.start_conversation(&buyer, listing).await;
    let conversation_id = id_of(&conversation);
    app.send_message(&buyer, &conversation_id, "ainda tem?").await;

    let uri = format!("/api/conversations/{conversation_id}/seen");
    let (status, seen) = app.call("POST", &uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(seen["updated"].as_array().unwrap().is_empty());

    let (status, seen) = app.call("POST", &uri, Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen["updated"].as_array().unwrap().len(), 2);

    let (_, seen) = app.call("POST", &uri, Some(&seller), None).await;
    assert!(seen["updated"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn requests_without_a_session_are_unauthorized() {
    let app = TestApp::new().await;

    let (status, problem) = app.call("GET", "/api/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(problem["status"], 401);
}

#[tokio::test]
async fn malformed_conversation_ids_are_bad_requests() {
    let app = TestApp::new().await;
    let buyer = app.user("Bruno").await;

    let (status, _) = app
        .call("GET", "/api/conversations/not-a-uuid/messages", Some(&buyer), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_conversation_summary_is_visible_to_participants_only() {
    let app = TestApp::new().await;
    let seller = app.user("Ana").await;
    let buyer = app.user("Bruno").await;
    let outsider = app.user("Carla").await;
    let listing = app.listing(&seller, "Tapete").await;
    let (_, conversation) = app.start_conversation(&buyer, listing).await;
    let uri = format!("/api/conversations/{}", id_of(&conversation));

    let (status, summary) = app.call("GET", &uri, Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["listing_id"], listing.to_string());
    assert_eq!(summary["participants"].as_array().unwrap().len(), 2);
    assert!(summary["last_message"]["content"].as_str().unwrap().contains("Tapete"));

    let (status, _) = app.call("GET", &uri, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let missing = format!("/api/conversations/{}", uuid::Uuid::new_v4());
    let (status, _) = app.call("GET", &missing, Some(&seller), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_sessions_are_unauthorized() {
    let app = TestApp::new().await;
    let buyer = app.user("Bruno").await;
    app.store
        .insert_session("expired", buyer.id, chrono::Duration::seconds(-1))
        .await;
    let expired = common::User {
        id: buyer.id,
        token: "expired".to_string(),
    };

    let (status, problem) = app.call("GET", "/api/conversations", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(problem["code"], "unauthenticated");

    let (status, _) = app.call("GET", "/api/conversations", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
}
