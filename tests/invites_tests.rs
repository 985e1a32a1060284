mod common;

use axum::http::StatusCode;
use serde_json::json;

async fn setup_workspace(pool: sqlx::PgPool) -> (sqlx::PgPool, String, String) {
    let username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let token = common::register_and_get_token(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &token, &common::unique_workspace_name()).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap().to_owned();

    (pool, token, workspace_id)
}

#[tokio::test]
async fn create_invite_returns_one_time_token() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/invites"),
        &owner_token,
        json!({ "email": "invitee@example.com" }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["token"].is_string());
    assert_eq!(body["data"]["role"], "member");
}

#[tokio::test]
async fn accept_invite_adds_membership() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let invite = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/invites"),
        &owner_token,
        json!({ "email": "invitee@example.com" }),
    )
    .await
    .1;
    let token_str = invite["data"]["token"].as_str().unwrap().to_owned();

    let invitee_username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let invitee_token =
        common::register_and_get_token(app, &invitee_username, "securepassword123").await;

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json_authed(
        app,
        &format!("/invites/{token_str}/accept"),
        &invitee_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let app = common::create_test_app(pool);
    let (status, _) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}"),
        &invitee_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn accept_invite_is_single_use() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let invite = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/invites"),
        &owner_token,
        json!({ "email": "invitee@example.com" }),
    )
    .await
    .1;
    let token_str = invite["data"]["token"].as_str().unwrap().to_owned();

    let first_username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let first_token =
        common::register_and_get_token(app, &first_username, "securepassword123").await;

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json_authed(
        app,
        &format!("/invites/{token_str}/accept"),
        &first_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let second_username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let second_token =
        common::register_and_get_token(app, &second_username, "securepassword123").await;

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json_authed(
        app,
        &format!("/invites/{token_str}/accept"),
        &second_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn create_invite_rejected_for_non_admin() {
    let pool = common::test_pool().await;
    let (pool, _owner_token, workspace_id) = setup_workspace(pool).await;

    let outsider_username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let outsider_token =
        common::register_and_get_token(app, &outsider_username, "securepassword123").await;

    let app = common::create_test_app(pool);
    let (status, _) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/invites"),
        &outsider_token,
        json!({ "email": "invitee@example.com" }),
    )
    .await;

    // Not yet a member of the workspace, so this 404s rather than 403s.
    assert_eq!(status, StatusCode::NOT_FOUND);
}
