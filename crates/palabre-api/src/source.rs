//! Backend source traits consumed by the engine.
//!
//! Two distinct external services back the engine: an indexed GraphQL
//! source with cursor pagination, and a node REST source paginated by
//! timestamp window. Both hand back records already normalized into the
//! canonical shape, so everything above this seam is backend-agnostic.

use async_trait::async_trait;
use std::collections::BTreeMap;

use palabre_shared::timestamp::NanoTimestamp;
use palabre_shared::types::{
    AccessGroupEntry, ProfileHint, PublicKeyB58, RawMessageRecord,
};

use crate::error::ApiError;

/// Structured filter for the indexed message query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Direct messages between two owner keys, in either direction.
    DmPair {
        user_owner: PublicKeyB58,
        party_owner: PublicKeyB58,
    },
    /// Group-chat messages addressed to one access group.
    Group {
        owner: PublicKeyB58,
        key_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct MessagesQuery {
    pub filter: MessageFilter,
    pub first: u32,
    /// Opaque cursor from a previous page's `end_cursor`.
    pub after: Option<String>,
    /// Exclusive timestamp upper bound, used for window-paginated threads.
    pub before: Option<NanoTimestamp>,
}

#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub records: Vec<RawMessageRecord>,
    pub profiles: BTreeMap<PublicKeyB58, ProfileHint>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Records plus profile hints from a windowed endpoint. The windowed source
/// cannot report whether more pages exist.
#[derive(Debug, Clone, Default)]
pub struct ThreadBatch {
    pub records: Vec<RawMessageRecord>,
    pub profiles: BTreeMap<PublicKeyB58, ProfileHint>,
}

#[derive(Debug, Clone)]
pub struct DmWindowQuery {
    pub user_owner: PublicKeyB58,
    pub user_key_name: String,
    pub party_owner: PublicKeyB58,
    pub party_key_name: String,
    /// Exclusive upper bound for this window.
    pub start_timestamp: NanoTimestamp,
    pub max_messages: u32,
}

#[derive(Debug, Clone)]
pub struct GroupWindowQuery {
    pub owner: PublicKeyB58,
    pub key_name: String,
    pub start_timestamp: NanoTimestamp,
    pub max_messages: u32,
}

/// The primary, cursor-paginated indexed source.
#[async_trait]
pub trait IndexedSource: Send + Sync {
    async fn message_page(&self, query: MessagesQuery) -> Result<MessagePage, ApiError>;

    /// Member keys of one access group, for avatar-stack rendering.
    async fn group_members(
        &self,
        owner: &PublicKeyB58,
        key_name: &str,
        first: u32,
    ) -> Result<Vec<PublicKeyB58>, ApiError>;
}

/// The secondary, timestamp-windowed REST source.
#[async_trait]
pub trait WindowedSource: Send + Sync {
    async fn user_threads(&self, user: &PublicKeyB58) -> Result<ThreadBatch, ApiError>;

    async fn dm_thread_page(&self, query: DmWindowQuery) -> Result<ThreadBatch, ApiError>;

    async fn group_thread_page(&self, query: GroupWindowQuery) -> Result<ThreadBatch, ApiError>;
}

/// Lists the owned and member access groups of one user.
#[async_trait]
pub trait AccessGroupSource: Send + Sync {
    /// Union of owned and member groups. Duplicates are possible; callers
    /// treat the result as a list and scan on (owner, key name).
    async fn all_access_groups(
        &self,
        owner: &PublicKeyB58,
    ) -> Result<Vec<AccessGroupEntry>, ApiError>;
}
