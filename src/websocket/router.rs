use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{Channel, ChannelType, MessageWithAuthor, Role};
use crate::state::AppState;

use super::event_bus::EventBus;

/// Gateway dispatch names (spec component C9's event-name table). Clients
/// branch on these, never on the Rust variant names below.
pub mod event_names {
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const CHANNEL_CREATED: &str = "channel.created";
    pub const CHANNEL_DELETED: &str = "channel.deleted";
    pub const WORKSPACE_MEMBER_JOINED: &str = "workspace.member.joined";
    pub const WORKSPACE_MEMBER_LEFT: &str = "workspace.member.left";
    pub const CHANNEL_MEMBER_JOINED: &str = "channel.member.joined";
    pub const CHANNEL_MEMBER_LEFT: &str = "channel.member.left";
    pub const READ_RECEIPT_UPDATED: &str = "read_receipt.updated";
    pub const WORKSPACE_DELETED: &str = "workspace.deleted";
    pub const INVITE_ACCEPTED: &str = "invite.accepted";
}

/// Every commit-side domain event the Event Router knows how to translate
/// into one or more gateway dispatches. Pure data — building one never
/// touches the database or the network; `route` is the only side-effecting
/// step.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    MessageCreated { channel_id: Uuid, message: MessageWithAuthor },
    MessageUpdated { channel_id: Uuid, message: MessageWithAuthor },
    MessageDeleted { channel_id: Uuid, message_id: Uuid, message_no: i64 },
    /// `member_user_ids` is only consulted for non-public channels: there's
    /// no workspace-wide topic to announce a private/direct/group_dm channel
    /// on, so each current member learns about it on their own inbox.
    ChannelCreated { workspace_id: Uuid, channel: Channel, member_user_ids: Vec<Uuid> },
    ChannelDeleted {
        workspace_id: Uuid,
        channel_id: Uuid,
        channel_name: String,
        deleted_by: Uuid,
        is_public: bool,
        member_user_ids: Vec<Uuid>,
    },
    WorkspaceMemberJoined { workspace_id: Uuid, user_id: Uuid, role: Role },
    /// Covers both a voluntary leave and a removal; `removed_by` is `Some`
    /// only for a removal, so the affected user's inbox frame can tell the
    /// two apart. `channel_ids` are the channels the user held membership in
    /// within this workspace at the moment of departure, so the Gateway can
    /// locally leave every nested channel topic (spec §4.8, §9 Open
    /// Question 3) without a second round-trip to the membership store.
    WorkspaceMemberLeft {
        workspace_id: Uuid,
        user_id: Uuid,
        removed_by: Option<Uuid>,
        channel_ids: Vec<Uuid>,
    },
    /// `is_public` decides whether this also reaches the new member's own
    /// inbox: a public channel's members are already watching the workspace
    /// topic (or the channel topic once joined), but a private channel has no
    /// workspace-wide surface, so the new member's `user:{id}` inbox is the
    /// only place they'd otherwise learn their own membership landed.
    ChannelMemberJoined { channel_id: Uuid, user_id: Uuid, role: Role, is_public: bool },
    ChannelMemberLeft { channel_id: Uuid, user_id: Uuid },
    /// Routed to the acknowledging user's own inbox, never the channel
    /// topic — nobody but the reader needs to learn where their own read
    /// position advanced to.
    ReadReceiptUpdated { channel_id: Uuid, user_id: Uuid, last_read_message_no: i64 },
    WorkspaceDeleted {
        workspace_id: Uuid,
        deleted_by: Uuid,
        channel_ids: Vec<Uuid>,
        member_user_ids: Vec<Uuid>,
    },
    /// A workspace invite was redeemed. Routed to the workspace topic (so
    /// members see the new arrival) and the new member's own inbox.
    InviteAccepted { workspace_id: Uuid, user_id: Uuid, role: Role },
}

/// Maps a domain event to the `(topic, event_name, payload)` triples it
/// publishes. The mapping is pure — the same event always produces the same
/// triples, regardless of who is subscribed — so it's exercised directly in
/// tests without a live `AppState`.
fn dispatches(event: &DomainEvent) -> Vec<(String, &'static str, Value)> {
    match event {
        DomainEvent::MessageCreated { channel_id, message } => vec![(
            EventBus::channel_topic(*channel_id),
            event_names::MESSAGE_CREATED,
            json!(message),
        )],
        DomainEvent::MessageUpdated { channel_id, message } => vec![(
            EventBus::channel_topic(*channel_id),
            event_names::MESSAGE_UPDATED,
            json!(message),
        )],
        DomainEvent::MessageDeleted { channel_id, message_id, message_no } => vec![(
            EventBus::channel_topic(*channel_id),
            event_names::MESSAGE_DELETED,
            json!({ "messageId": message_id, "messageNo": message_no }),
        )],
        DomainEvent::ChannelCreated { workspace_id, channel, member_user_ids } => {
            let payload = json!(channel);
            if channel.channel_type == ChannelType::Public {
                vec![(EventBus::workspace_topic(*workspace_id), event_names::CHANNEL_CREATED, payload)]
            } else {
                member_user_ids
                    .iter()
                    .map(|uid| (EventBus::user_topic(*uid), event_names::CHANNEL_CREATED, payload.clone()))
                    .collect()
            }
        }
        DomainEvent::ChannelDeleted {
            workspace_id,
            channel_id,
            channel_name,
            deleted_by,
            is_public,
            member_user_ids,
        } => {
            let payload = json!({
                "channelId": channel_id,
                "channelName": channel_name,
                "deletedBy": deleted_by,
            });
            if *is_public {
                vec![(EventBus::workspace_topic(*workspace_id), event_names::CHANNEL_DELETED, payload)]
            } else {
                member_user_ids
                    .iter()
                    .map(|uid| (EventBus::user_topic(*uid), event_names::CHANNEL_DELETED, payload.clone()))
                    .collect()
            }
        }
        DomainEvent::WorkspaceMemberJoined { workspace_id, user_id, role } => vec![(
            EventBus::workspace_topic(*workspace_id),
            event_names::WORKSPACE_MEMBER_JOINED,
            json!({ "userId": user_id, "role": role }),
        )],
        DomainEvent::WorkspaceMemberLeft { workspace_id, user_id, removed_by, channel_ids } => vec![
            (
                EventBus::workspace_topic(*workspace_id),
                event_names::WORKSPACE_MEMBER_LEFT,
                json!({ "userId": user_id, "removedBy": removed_by }),
            ),
            (
                EventBus::user_topic(*user_id),
                event_names::WORKSPACE_MEMBER_LEFT,
                json!({ "workspaceId": workspace_id, "removedBy": removed_by, "channelIds": channel_ids }),
            ),
        ],
        DomainEvent::ChannelMemberJoined { channel_id, user_id, role, is_public } => {
            let mut out = vec![(
                EventBus::channel_topic(*channel_id),
                event_names::CHANNEL_MEMBER_JOINED,
                json!({ "userId": user_id, "role": role }),
            )];
            if !is_public {
                out.push((
                    EventBus::user_topic(*user_id),
                    event_names::CHANNEL_MEMBER_JOINED,
                    json!({ "channelId": channel_id, "userId": user_id, "role": role }),
                ));
            }
            out
        }
        DomainEvent::ChannelMemberLeft { channel_id, user_id } => vec![(
            EventBus::channel_topic(*channel_id),
            event_names::CHANNEL_MEMBER_LEFT,
            json!({ "userId": user_id }),
        )],
        DomainEvent::ReadReceiptUpdated { user_id, channel_id, last_read_message_no } => vec![(
            EventBus::user_topic(*user_id),
            event_names::READ_RECEIPT_UPDATED,
            json!({ "channelId": channel_id, "lastReadMessageNo": last_read_message_no }),
        )],
        DomainEvent::WorkspaceDeleted { workspace_id, deleted_by, channel_ids, member_user_ids } => {
            let mut out = vec![(
                EventBus::workspace_topic(*workspace_id),
                event_names::WORKSPACE_DELETED,
                json!({ "workspaceId": workspace_id, "channelIds": channel_ids, "deletedBy": deleted_by }),
            )];
            out.extend(member_user_ids.iter().map(|uid| {
                (
                    EventBus::user_topic(*uid),
                    event_names::WORKSPACE_DELETED,
                    json!({ "workspaceId": workspace_id, "channelIds": channel_ids, "deletedBy": deleted_by }),
                )
            }));
            out
        }
        DomainEvent::InviteAccepted { workspace_id, user_id, role } => vec![
            (
                EventBus::workspace_topic(*workspace_id),
                event_names::INVITE_ACCEPTED,
                json!({ "userId": user_id, "role": role }),
            ),
            (
                EventBus::user_topic(*user_id),
                event_names::INVITE_ACCEPTED,
                json!({ "workspaceId": workspace_id, "role": role }),
            ),
        ],
    }
}

/// Publishes a domain event to every topic it belongs on and, for membership
/// changes, invalidates the affected cache entry so a revoked member is
/// never admitted on a stale positive (spec component C2's invalidation
/// hook). The invalidation rides the same commit path as the dispatch
/// itself, so cache and room state can never observe the change at
/// different times.
pub async fn route(state: &AppState, event: DomainEvent) {
    match &event {
        DomainEvent::ChannelMemberLeft { channel_id, user_id } => {
            state.membership.invalidate(*user_id, *channel_id).await;
        }
        DomainEvent::WorkspaceMemberLeft { user_id, .. } => {
            state.membership.invalidate_user(*user_id).await;
        }
        DomainEvent::ChannelDeleted { channel_id, .. } => {
            state.membership.invalidate_channel(*channel_id).await;
        }
        DomainEvent::WorkspaceDeleted { member_user_ids, .. } => {
            for user_id in member_user_ids {
                state.membership.invalidate_user(*user_id).await;
            }
        }
        _ => {}
    }

    for (topic, name, payload) in dispatches(&event) {
        state.event_bus.publish(&topic, name, payload).await;
    }
}
