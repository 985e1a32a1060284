mod common;

use axum::http::StatusCode;
use serde_json::json;

/// Register a user and create a workspace they own; returns
/// `(pool, token, workspace_id)`.
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
async fn create_channel_requires_workspace_admin() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool);
    let body = common::create_channel(app, &owner_token, &workspace_id, "random").await;

    assert_eq!(body["data"]["name"], "random");
    assert_eq!(body["data"]["channelType"], "public");
}

#[tokio::test]
async fn create_channel_rejected_for_non_admin_member() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    // A second user is not even a workspace member yet, so workspace-scoped
    // operations 404 for them rather than 403.
    let other_username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let other_token =
        common::register_and_get_token(app, &other_username, "securepassword123").await;

    let app = common::create_test_app(pool);
    let (status, _) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels"),
        &other_token,
        json!({ "name": "intruder", "channel_type": "public" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let _ = owner_token;
}

#[tokio::test]
async fn general_channel_cannot_be_deleted() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels"),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let general_id = body["data"][0]["id"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool);
    let (status, body) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{general_id}"),
        &owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn join_and_leave_public_channel() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let channel = common::create_channel(app, &owner_token, &workspace_id, "public-room").await;
    let channel_id = channel["data"]["id"].as_str().unwrap().to_owned();

    // A second member of the workspace (via invite flow substitute: join by
    // being added directly is not exposed, so here we just re-check the
    // owner's own join/leave path on a channel they already created).
    let app = common::create_test_app(pool.clone());
    let (status, _) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/leave"),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let app = common::create_test_app(pool);
    let (status, _) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/join"),
        &owner_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn private_channel_cannot_be_joined_directly() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels"),
        &owner_token,
        json!({ "name": "secret", "channel_type": "private" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let channel_id = body["data"]["id"].as_str().unwrap().to_owned();

    // The owner is already a member (auto-joined on creation); leave it, then
    // confirm a direct rejoin is rejected because it is not public.
    let app = common::create_test_app(pool.clone());
    common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/leave"),
        &owner_token,
    )
    .await;

    let app = common::create_test_app(pool);
    let (status, body) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/join"),
        &owner_token,
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn update_channel_read_only_flag() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let channel = common::create_channel(app, &owner_token, &workspace_id, "announcements").await;
    let channel_id = channel["data"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool);
    let (status, body) = common::patch_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}"),
        &owner_token,
        json!({ "is_read_only": true }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isReadOnly"], true);
}

/// Invites and joins a second user into `workspace_id`, returning their token
/// and user id.
async fn add_second_member(
    pool: sqlx::PgPool,
    owner_token: &str,
    workspace_id: &str,
) -> (String, String) {
    let app = common::create_test_app(pool.clone());
    let invite = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/invites"),
        owner_token,
        json!({ "email": "invitee@example.com" }),
    )
    .await
    .1;
    let token_str = invite["data"]["token"].as_str().unwrap().to_owned();

    let username = common::unique_username();
    let app = common::create_test_app(pool.clone());
    let member_token = common::register_and_get_token(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool.clone());
    common::post_json_authed(app, &format!("/invites/{token_str}/accept"), &member_token, json!({}))
        .await;

    let app = common::create_test_app(pool);
    let (_, body) = common::get_authed(app, "/users/@me", &member_token).await;
    let user_id = body["data"]["id"].as_str().unwrap().to_owned();

    (member_token, user_id)
}

#[tokio::test]
async fn owner_can_remove_channel_member() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let channel = common::create_channel(app, &owner_token, &workspace_id, "team").await;
    let channel_id = channel["data"]["id"].as_str().unwrap().to_owned();

    let (member_token, member_id) =
        add_second_member(pool.clone(), &owner_token, &workspace_id).await;

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/join"),
        &member_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let app = common::create_test_app(pool.clone());
    let (status, _) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/members/{member_id}"),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/members"),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let members = body["data"].as_array().unwrap();
    assert!(members.iter().all(|m| m["userId"] != member_id));
}

#[tokio::test]
async fn non_admin_cannot_remove_channel_member() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let channel = common::create_channel(app, &owner_token, &workspace_id, "team").await;
    let channel_id = channel["data"]["id"].as_str().unwrap().to_owned();

    let (member_token, _) = add_second_member(pool.clone(), &owner_token, &workspace_id).await;

    let app = common::create_test_app(pool.clone());
    common::post_json_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/join"),
        &member_token,
        json!({}),
    )
    .await;

    let app = common::create_test_app(pool);
    let (status, body) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/members/{}", owner_id_placeholder()),
        &member_token,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

fn owner_id_placeholder() -> &'static str {
    // Any well-formed UUID works here: the handler checks the caller's role
    // before it ever looks up the target membership row.
    "00000000-0000-0000-0000-000000000000"
}

#[tokio::test]
async fn cannot_remove_member_from_general_channel() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels"),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let general_id = body["data"][0]["id"].as_str().unwrap().to_owned();

    let (_, member_id) = add_second_member(pool.clone(), &owner_token, &workspace_id).await;

    let app = common::create_test_app(pool);
    let (status, body) = common::delete_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{general_id}/members/{member_id}"),
        &owner_token,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn list_channel_members_includes_creator() {
    let pool = common::test_pool().await;
    let (pool, owner_token, workspace_id) = setup_workspace(pool).await;

    let app = common::create_test_app(pool.clone());
    let channel = common::create_channel(app, &owner_token, &workspace_id, "team").await;
    let channel_id = channel["data"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool);
    let (status, body) = common::get_authed(
        app,
        &format!("/workspaces/{workspace_id}/channels/{channel_id}/members"),
        &owner_token,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let members = body["data"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["role"], "owner");
}
