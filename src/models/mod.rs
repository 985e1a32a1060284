use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserDto {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserDto {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// ============================================================================
// Session (refresh token bookkeeping — supplemental to C1 Token Verifier)
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Role (shared between workspace and channel memberships)
// ============================================================================

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

// ============================================================================
// Workspace
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: Uuid,
    /// Lowercase kebab, globally unique — the slug used in URLs and topics.
    pub name: String,
    pub display_name: Option<String>,
    pub owner_id: Uuid,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceDto {
    pub name: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceDto {
    pub display_name: Option<String>,
    pub is_archived: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkspaceMembership {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDto {
    pub id: Uuid,
    pub name: String,
    pub display_name: Option<String>,
    pub owner_id: Uuid,
    pub is_archived: bool,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Channel
// ============================================================================

/// Every workspace has exactly one channel named `general`; it cannot be
/// deleted (spec DATA MODEL §3).
pub const GENERAL_CHANNEL_NAME: &str = "general";

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "channel_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Public,
    Private,
    Direct,
    GroupDm,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub display_name: Option<String>,
    pub channel_type: ChannelType,
    pub is_archived: bool,
    pub is_read_only: bool,
    pub created_by: Uuid,
    pub member_count: i64,
    pub last_activity: Option<DateTime<Utc>>,
    /// Allocator counter consumed by C3; never exposed directly, only ever
    /// observed indirectly through the `messageNo` of messages it produced.
    #[serde(skip)]
    pub next_message_no: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_general(&self) -> bool {
        self.name == GENERAL_CHANNEL_NAME
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelDto {
    pub name: String,
    pub display_name: Option<String>,
    pub channel_type: ChannelType,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelDto {
    pub display_name: Option<String>,
    pub is_archived: Option<bool>,
    pub is_read_only: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChannelMembership {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub is_muted: bool,
}

// ============================================================================
// Message
// ============================================================================

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "content_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    File,
    Video,
    Audio,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub channel_id: Uuid,
    /// Gapless, strictly-increasing sequence number within the channel
    /// (spec Invariant 1, property P1). Clients order and detect gaps on
    /// this value, never on `createdAt`.
    pub message_no: i64,
    pub user_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub is_edited: bool,
    pub edit_count: i32,
    pub parent_message_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub thread_depth: i32,
    /// Client-chosen idempotency key (spec §7, property P4). Echoed back on
    /// the `message:created` dispatch so the sender can reconcile its
    /// optimistic render; never required to be unique beyond the dedupe
    /// window.
    #[serde(rename = "clientMessageCorrelationId", skip_serializing_if = "Option::is_none")]
    pub client_correlation_id: Option<String>,
    /// Tombstone flag. Deletes never remove the row — doing so would open a
    /// hole in `messageNo` and violate Invariant 1 — they clear `content` and
    /// set this instead.
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageDto {
    pub content: String,
    pub content_type: Option<ContentType>,
    pub parent_message_id: Option<Uuid>,
    pub client_message_correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageDto {
    pub content: String,
}

/// A message enriched with a snapshot of its author, the shape C9 publishes
/// on `message:created` ("full Message + author snapshot").
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithAuthor {
    #[serde(flatten)]
    pub message: Message,
    pub author: AuthorSnapshot,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSnapshot {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<MessageWithAuthor>,
    pub prev_cursor: Option<i64>,
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDirection {
    Before,
    After,
}

// ============================================================================
// Read receipts
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub channel_id: Uuid,
    pub last_read_message_no: i64,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AckDto {
    pub message_no: i64,
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountDto {
    pub channel_id: Uuid,
    pub unread_count: i64,
    pub last_message_no: i64,
    pub last_read_message_no: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummaryDto {
    pub channels: Vec<UnreadCountDto>,
    pub total_unread: i64,
}

// ============================================================================
// Invites
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Invite {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub invited_by: Uuid,
    pub email: String,
    pub role: Role,
    /// SHA-256 of the opaque token handed to the invitee; the raw token is
    /// never stored, only ever returned once at creation time.
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub accepted_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteDto {
    pub email: String,
    pub role: Option<Role>,
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteDto {
    pub token: String,
    pub workspace_id: Uuid,
    pub email: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}
