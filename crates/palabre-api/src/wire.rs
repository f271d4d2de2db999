//! Per-source wire shapes and their normalization into the canonical
//! record model.
//!
//! The two backends disagree on almost everything: field casing, timestamp
//! representation, how the chat type is flagged. Each source gets its own
//! DTOs with explicit serde attributes and a pure normalization function;
//! unknown fields are dropped here, never passed through untyped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use palabre_shared::timestamp::{self, NanoTimestamp};
use palabre_shared::types::{
    AccessGroupEntry, ChatType, MemberEntry, MessageInfo, PartyInfo, ProfileHint, PublicKeyB58,
    RawMessageRecord,
};

// ---------------------------------------------------------------------------
// Indexed (GraphQL) source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphAccount {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessageNode {
    #[serde(default)]
    pub encrypted_text: String,
    /// ISO-8601 datetime string.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sender_access_group_owner_public_key: Option<String>,
    #[serde(default)]
    pub recipient_access_group_owner_public_key: Option<String>,
    #[serde(default)]
    pub sender_access_group_public_key: Option<String>,
    #[serde(default)]
    pub recipient_access_group_public_key: Option<String>,
    #[serde(default)]
    pub sender_access_group_key_name: Option<String>,
    #[serde(default)]
    pub recipient_access_group_key_name: Option<String>,
    #[serde(default)]
    pub is_group_chat_message: bool,
    #[serde(default)]
    pub sender: Option<GraphAccount>,
    #[serde(default)]
    pub receiver: Option<GraphAccount>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphPageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessagesConnection {
    #[serde(default)]
    pub nodes: Vec<GraphMessageNode>,
    #[serde(default)]
    pub page_info: GraphPageInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroupMemberNode {
    #[serde(default)]
    pub member_public_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroupMembersConnection {
    #[serde(default)]
    pub nodes: Vec<GraphGroupMemberNode>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphAccessGroupNode {
    #[serde(default)]
    pub members: GraphGroupMembersConnection,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphAccessGroupsConnection {
    #[serde(default)]
    pub nodes: Vec<GraphAccessGroupNode>,
}

pub fn normalize_graph_node(node: &GraphMessageNode) -> RawMessageRecord {
    let chat_type = if node.is_group_chat_message {
        ChatType::GroupChat
    } else {
        ChatType::Dm
    };

    let ts = node
        .timestamp
        .as_deref()
        .map(timestamp::normalize_str)
        .unwrap_or_default();

    RawMessageRecord {
        chat_type,
        sender: PartyInfo {
            owner_public_key: key_or_empty(&node.sender_access_group_owner_public_key),
            access_group_public_key: opt_key(&node.sender_access_group_public_key),
            access_group_key_name: node.sender_access_group_key_name.clone(),
        },
        recipient: PartyInfo {
            owner_public_key: key_or_empty(&node.recipient_access_group_owner_public_key),
            access_group_public_key: opt_key(&node.recipient_access_group_public_key),
            access_group_key_name: node.recipient_access_group_key_name.clone(),
        },
        message: MessageInfo {
            encrypted_hex: node.encrypted_text.clone(),
            timestamp: ts,
            timestamp_string: ts.nanos_string(),
            extra: BTreeMap::new(),
        },
    }
}

/// Profile hints carried on a page of graph nodes, keyed by public key.
pub fn graph_profiles(nodes: &[GraphMessageNode]) -> BTreeMap<PublicKeyB58, ProfileHint> {
    let mut profiles = BTreeMap::new();
    for account in nodes
        .iter()
        .flat_map(|node| [node.sender.as_ref(), node.receiver.as_ref()])
        .flatten()
    {
        let Some(key) = account.public_key.as_deref().filter(|k| !k.is_empty()) else {
            continue;
        };
        profiles.insert(
            PublicKeyB58::new(key),
            ProfileHint {
                username: account.username.clone(),
                profile_pic: account.profile_pic.clone(),
            },
        );
    }
    profiles
}

// ---------------------------------------------------------------------------
// Node (REST) source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NodePartyInfo {
    #[serde(rename = "OwnerPublicKeyBase58Check", default)]
    pub owner_public_key: String,
    #[serde(rename = "AccessGroupPublicKeyBase58Check", default)]
    pub access_group_public_key: Option<String>,
    #[serde(rename = "AccessGroupKeyName", default)]
    pub access_group_key_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeMessageInfo {
    #[serde(rename = "EncryptedText", default)]
    pub encrypted_text: String,
    #[serde(rename = "TimestampNanos", default)]
    pub timestamp_nanos: u64,
    #[serde(rename = "TimestampNanosString", default)]
    pub timestamp_nanos_string: Option<String>,
    #[serde(rename = "ExtraData", default)]
    pub extra_data: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeMessageEntry {
    #[serde(rename = "ChatType", default)]
    pub chat_type: Option<String>,
    #[serde(rename = "SenderInfo")]
    pub sender_info: NodePartyInfo,
    #[serde(rename = "RecipientInfo")]
    pub recipient_info: NodePartyInfo,
    #[serde(rename = "MessageInfo")]
    pub message_info: NodeMessageInfo,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeProfileEntry {
    #[serde(rename = "Username", default)]
    pub username: Option<String>,
    #[serde(rename = "ProfilePic", default)]
    pub profile_pic: Option<String>,
}

/// Response shape shared by the three message endpoints; each uses a
/// different field name for its message list.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeMessagesResponse {
    #[serde(rename = "Messages", default)]
    pub messages: Option<Vec<NodeMessageEntry>>,
    #[serde(rename = "ThreadMessages", default)]
    pub thread_messages: Option<Vec<NodeMessageEntry>>,
    #[serde(rename = "GroupChatMessages", default)]
    pub group_chat_messages: Option<Vec<NodeMessageEntry>>,
    #[serde(rename = "PublicKeyToProfileEntryResponse", default)]
    pub profiles: Option<BTreeMap<String, Option<NodeProfileEntry>>>,
}

impl NodeMessagesResponse {
    pub fn take_messages(self) -> Vec<NodeMessageEntry> {
        self.messages
            .or(self.thread_messages)
            .or(self.group_chat_messages)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeMemberEntry {
    #[serde(rename = "EncryptedKey", default)]
    pub encrypted_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeAccessGroupEntry {
    #[serde(rename = "AccessGroupOwnerPublicKeyBase58Check", default)]
    pub owner_public_key: String,
    #[serde(rename = "AccessGroupKeyName", default)]
    pub key_name: String,
    #[serde(rename = "AccessGroupPublicKeyBase58Check", default)]
    pub group_public_key: String,
    #[serde(rename = "AccessGroupMemberEntryResponse", default)]
    pub member_entry: Option<NodeMemberEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeAccessGroupsResponse {
    #[serde(rename = "AccessGroupsOwned", default)]
    pub owned: Option<Vec<NodeAccessGroupEntry>>,
    #[serde(rename = "AccessGroupsMember", default)]
    pub member: Option<Vec<NodeAccessGroupEntry>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeUserThreadsPayload {
    #[serde(rename = "UserPublicKeyBase58Check")]
    pub user_public_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDmThreadPayload {
    #[serde(rename = "UserGroupOwnerPublicKeyBase58Check")]
    pub user_group_owner_public_key: String,
    #[serde(rename = "UserGroupKeyName")]
    pub user_group_key_name: String,
    #[serde(rename = "PartyGroupOwnerPublicKeyBase58Check")]
    pub party_group_owner_public_key: String,
    #[serde(rename = "PartyGroupKeyName")]
    pub party_group_key_name: String,
    /// Decimal nanoseconds; the endpoint takes it as a string.
    #[serde(rename = "StartTimeStamp")]
    pub start_time_stamp: String,
    #[serde(rename = "MaxMessagesToFetch")]
    pub max_messages_to_fetch: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeGroupThreadPayload {
    #[serde(rename = "UserPublicKeyBase58Check")]
    pub user_public_key: String,
    #[serde(rename = "AccessGroupKeyName")]
    pub access_group_key_name: String,
    #[serde(rename = "StartTimeStamp")]
    pub start_time_stamp: String,
    #[serde(rename = "MaxMessagesToFetch")]
    pub max_messages_to_fetch: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeAccessGroupsPayload {
    #[serde(rename = "PublicKeyBase58Check")]
    pub public_key: String,
}

/// Normalize one node entry. `default_chat_type` is the chat type implied by
/// the endpoint the entry came from; the entry's own ChatType field, when
/// present, wins.
pub fn normalize_node_message(
    entry: &NodeMessageEntry,
    default_chat_type: ChatType,
) -> RawMessageRecord {
    let chat_type = match entry.chat_type.as_deref() {
        Some(value) if value.eq_ignore_ascii_case("groupchat") => ChatType::GroupChat,
        Some(value) if value.eq_ignore_ascii_case("dm") => ChatType::Dm,
        _ => default_chat_type,
    };

    // Prefer the string form: it survives values that overflow the JSON
    // number path in other consumers of this API.
    let ts = match entry.message_info.timestamp_nanos_string.as_deref() {
        Some(s) if !s.is_empty() => timestamp::normalize_str(s),
        _ => NanoTimestamp(entry.message_info.timestamp_nanos),
    };

    RawMessageRecord {
        chat_type,
        sender: normalize_node_party(&entry.sender_info),
        recipient: normalize_node_party(&entry.recipient_info),
        message: MessageInfo {
            encrypted_hex: entry.message_info.encrypted_text.clone(),
            timestamp: ts,
            timestamp_string: ts.nanos_string(),
            extra: entry.message_info.extra_data.clone().unwrap_or_default(),
        },
    }
}

fn normalize_node_party(party: &NodePartyInfo) -> PartyInfo {
    PartyInfo {
        owner_public_key: PublicKeyB58::new(party.owner_public_key.clone()),
        access_group_public_key: opt_key(&party.access_group_public_key),
        access_group_key_name: party.access_group_key_name.clone(),
    }
}

pub fn normalize_node_profiles(
    profiles: Option<BTreeMap<String, Option<NodeProfileEntry>>>,
) -> BTreeMap<PublicKeyB58, ProfileHint> {
    profiles
        .unwrap_or_default()
        .into_iter()
        .map(|(key, entry)| {
            let entry = entry.unwrap_or_default();
            (
                PublicKeyB58::new(key),
                ProfileHint {
                    username: entry.username,
                    profile_pic: entry.profile_pic,
                },
            )
        })
        .collect()
}

pub fn normalize_access_group(entry: &NodeAccessGroupEntry) -> AccessGroupEntry {
    AccessGroupEntry {
        owner_public_key: PublicKeyB58::new(entry.owner_public_key.clone()),
        key_name: entry.key_name.clone(),
        group_public_key: PublicKeyB58::new(entry.group_public_key.clone()),
        member_entry: entry
            .member_entry
            .as_ref()
            .filter(|member| !member.encrypted_key.is_empty())
            .map(|member| MemberEntry {
                encrypted_key_hex: member.encrypted_key.clone(),
            }),
    }
}

fn key_or_empty(value: &Option<String>) -> PublicKeyB58 {
    PublicKeyB58::new(value.clone().unwrap_or_default())
}

fn opt_key(value: &Option<String>) -> Option<PublicKeyB58> {
    value
        .as_deref()
        .filter(|key| !key.is_empty())
        .map(PublicKeyB58::new)
}
