mod common;

use axum::http::StatusCode;
use serde_json::json;

/// Register a user, create a workspace and a channel in it; returns
/// `(pool, token, workspace_id, channel_id)`.
async fn setup_channel(pool: sqlx::PgPool) -> (sqlx::PgPool, String, String, String) {
    let username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let token = common::register_and_get_token(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &token, &common::unique_workspace_name()).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone());
    let channel = common::create_channel(app, &token, &workspace_id, "general-talk").await;
    let channel_id = channel["data"]["id"].as_str().unwrap().to_owned();

    (pool, token, workspace_id, channel_id)
}

#[tokio::test]
async fn message_numbers_are_gapless_and_increasing() {
    let pool = common::test_pool().await;
    let (pool, token, workspace_id, channel_id) = setup_channel(pool).await;

    let mut message_nos = Vec::new();
    for i in 0..5 {
        let app = common::create_test_app(pool.clone());
        let body = common::create_message(
            app,
            &token,
            &workspace_id,
            &channel_id,
            &format!("message {i}"),
        )
        .await;
        message_nos.push(body["data"]["messageNo"].as_i64().unwrap());
    }

    assert_eq!(message_nos, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn duplicate_correlation_id_is_idempotent() {
    let pool = common::test_pool().await;
    let (pool, token, workspace_id, channel_id) = setup_channel(pool).await;
    let uri = format!("/workspaces/{workspace_id}/channels/{channel_id}/messages");

    let app = common::create_test_app(pool.clone());
    let (status, first) = common::post_json_authed(
        app,
        &uri,
        &token,
        json!({ "content": "hello", "client_message_correlation_id": "corr-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let app = common::create_test_app(pool);
    let (status, second) = common::post_json_authed(
        app,
        &uri,
        &token,
        json!({ "content": "hello again", "client_message_correlation_id": "corr-1" }),
    )
    .await;

    // A retried send with the same correlation id returns the original
    // message (200, not 201) rather than creating a duplicate.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(second["data"]["content"], "hello");
}

#[tokio::test]
async fn history_is_paged_and_ascending() {
    let pool = common::test_pool().await;
    let (pool, token, workspace_id, channel_id) = setup_channel(pool).await;

    for i in 0..3 {
        let app = common::create_test_app(pool.clone());
        common::create_message(
            app,
            &token,
            &workspace_id,
            &channel_id,
            &format!("message {i}"),
        )
        .await;
    }

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/messages?limit=10"),
        &token,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["messageNo"], 1);
    assert_eq!(messages[2]["messageNo"], 3);
}

#[tokio::test]
async fn update_message_marks_edited() {
    let pool = common::test_pool().await;
    let (pool, token, workspace_id, channel_id) = setup_channel(pool).await;

    let app = common::create_test_app(pool.clone());
    let message =
        common::create_message(app, &token, &workspace_id, &channel_id, "first draft").await;
    let message_id = message["data"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool);
    let (status, body) = common::patch_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/messages/{message_id}"),
        &token,
        json!({ "content": "final draft" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "final draft");
    assert_eq!(body["data"]["isEdited"], true);
    assert_eq!(body["data"]["editCount"], 1);
}

#[tokio::test]
async fn delete_message_preserves_sequence_gaplessness() {
    let pool = common::test_pool().await;
    let (pool, token, workspace_id, channel_id) = setup_channel(pool).await;

    let app = common::create_test_app(pool.clone());
    common::create_message(app, &token, &workspace_id, &channel_id, "first").await;
    let app = common::create_test_app(pool.clone());
    let second =
        common::create_message(app, &token, &workspace_id, &channel_id, "second").await;
    let second_id = second["data"]["id"].as_str().unwrap().to_owned();
    let app = common::create_test_app(pool.clone());
    common::create_message(app, &token, &workspace_id, &channel_id, "third").await;

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/messages/{second_id}"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The deleted message's slot remains present (tombstoned) in history
    // rather than leaving a hole: the history page still has all three
    // message numbers, and the deleted row is emptied and flagged.
    let app = common::create_test_app(pool.clone());
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/messages?limit=10"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    let message_nos: Vec<i64> = messages
        .iter()
        .map(|m| m["messageNo"].as_i64().unwrap())
        .collect();
    assert_eq!(message_nos, vec![1, 2, 3]);

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/messages/{second_id}"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isDeleted"], true);
    assert_eq!(body["data"]["content"], "");
}

#[tokio::test]
async fn create_message_rejected_in_read_only_channel() {
    let pool = common::test_pool().await;
    let (pool, token, workspace_id, channel_id) = setup_channel(pool).await;

    let app = common::create_test_app(pool.clone());
    common::patch_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}"),
        &token,
        json!({ "is_read_only": true }),
    )
    .await;

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/messages"),
        &token,
        json!({ "content": "should not land" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}
