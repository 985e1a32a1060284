mod common;

use axum::http::StatusCode;
use serde_json::json;

async fn setup_owner(pool: sqlx::PgPool) -> (sqlx::PgPool, String) {
    let username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let token = common::register_and_get_token(app, &username, "securepassword123").await;
    (pool, token)
}

#[tokio::test]
async fn create_workspace_creates_general_channel() {
    let pool = common::test_pool().await;
    let (pool, token) = setup_owner(pool).await;
    let name = common::unique_workspace_name();

    let app = common::create_test_app(pool.clone());
    let body = common::create_workspace(app, &token, &name).await;
    let workspace_id = body["data"]["id"].as_str().unwrap().to_owned();

    assert_eq!(body["data"]["name"], name.as_str());
    assert_eq!(body["data"]["memberCount"], 1);

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels"),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let channels = body["data"].as_array().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0]["name"], "general");
}

#[tokio::test]
async fn create_workspace_rejects_bad_name() {
    let pool = common::test_pool().await;
    let (pool, token) = setup_owner(pool).await;

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json_authed(
        app,
        "/workspaces",
        &token,
        json!({ "name": "Not A Valid Slug!" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn create_workspace_rejects_duplicate_name() {
    let pool = common::test_pool().await;
    let (pool, token) = setup_owner(pool).await;
    let name = common::unique_workspace_name();

    let app = common::create_test_app(pool.clone());
    common::create_workspace(app, &token, &name).await;

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json_authed(
        app,
        "/workspaces",
        &token,
        json!({ "name": name }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn list_workspaces_only_returns_memberships() {
    let pool = common::test_pool().await;
    let (pool, token_a) = setup_owner(pool).await;
    let (pool, token_b) = setup_owner(pool).await;

    let app = common::create_test_app(pool.clone());
    common::create_workspace(app, &token_a, &common::unique_workspace_name()).await;

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(app, "/workspaces", &token_b).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn get_workspace_forbidden_to_non_members() {
    let pool = common::test_pool().await;
    let (pool, owner_token) = setup_owner(pool).await;
    let (pool, outsider_token) = setup_owner(pool).await;

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &owner_token, &common::unique_workspace_name()).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap();

    // Non-members get 404, not 403, so workspace existence isn't leaked.
    let app = common::create_test_app(pool);
    let (status, _) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}"),
        &outsider_token,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_workspace_requires_owner_or_admin() {
    let pool = common::test_pool().await;
    let (pool, owner_token) = setup_owner(pool).await;
    let name = common::unique_workspace_name();

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &owner_token, &name).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool);
    let (status, body) = common::patch_json_authed(
        app,
        &format!("/workspaces/{workspace_id}"),
        &owner_token,
        json!({ "display_name": "Renamed" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["displayName"], "Renamed");
}

#[tokio::test]
async fn delete_workspace_requires_ownership() {
    let pool = common::test_pool().await;
    let (pool, owner_token) = setup_owner(pool).await;
    let (pool, other_token) = setup_owner(pool).await;

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &owner_token, &common::unique_workspace_name()).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap().to_owned();

    // Another member (not the owner) cannot delete it — but they aren't even a
    // member yet, so this returns 404 rather than 403.
    let app = common::create_test_app(pool.clone());
    let (status, _) =
        common::delete_authed(app, &format!("/workspaces/{workspace_id}"), &other_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let app = common::create_test_app(pool.clone());
    let (status, _) =
        common::delete_authed(app, &format!("/workspaces/{workspace_id}"), &owner_token).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The workspace is gone now.
    let app = common::create_test_app(pool);
    let (status, _) =
        common::get_authed(app, &format!("/workspaces/{workspace_id}"), &owner_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_cannot_leave_workspace() {
    let pool = common::test_pool().await;
    let (pool, owner_token) = setup_owner(pool).await;

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &owner_token, &common::unique_workspace_name()).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool);
    let (status, body) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/leave"),
        &owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn list_members_includes_owner() {
    let pool = common::test_pool().await;
    let (pool, owner_token) = setup_owner(pool).await;

    let app = common::create_test_app(pool.clone());
    let workspace = common::create_workspace(app, &owner_token, &common::unique_workspace_name()).await;
    let workspace_id = workspace["data"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/members"),
        &owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let members = body["data"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["role"], "owner");
}
