mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn get_current_user_returns_profile() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone());
    let token = common::register_and_get_token(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(app, "/users/@me", &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], username.as_str());
}

#[tokio::test]
async fn update_current_user_changes_display_name() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone());
    let token = common::register_and_get_token(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::patch_json_authed(
        app,
        "/users/@me",
        &token,
        json!({ "display_name": "Ada Lovelace" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["displayName"], "Ada Lovelace");

    let app = common::create_test_app(pool);
    let (_, body) = common::get_authed(app, "/users/@me", &token).await;
    assert_eq!(body["data"]["displayName"], "Ada Lovelace");
}

#[tokio::test]
async fn update_current_user_rejects_invalid_avatar_url() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone());
    let token = common::register_and_get_token(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool);
    let (status, body) = common::patch_json_authed(
        app,
        "/users/@me",
        &token,
        json!({ "avatar_url": "not-a-url" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}
