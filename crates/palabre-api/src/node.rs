//! Client for the node REST source: the timestamp-windowed message
//! endpoints and the access-group listing.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use palabre_shared::constants::HTTP_TIMEOUT_SECS;
use palabre_shared::types::{AccessGroupEntry, ChatType, PublicKeyB58};

use crate::error::ApiError;
use crate::source::{
    AccessGroupSource, DmWindowQuery, GroupWindowQuery, ThreadBatch, WindowedSource,
};
use crate::wire::{
    normalize_access_group, normalize_node_message, normalize_node_profiles,
    NodeAccessGroupsPayload, NodeAccessGroupsResponse, NodeDmThreadPayload,
    NodeGroupThreadPayload, NodeMessagesResponse, NodeUserThreadsPayload,
};

const USER_THREADS_PATH: &str = "api/v0/get-all-user-message-threads";
const DM_THREAD_PATH: &str = "api/v0/get-paginated-messages-for-dm-thread";
const GROUP_THREAD_PATH: &str = "api/v0/get-paginated-messages-for-group-chat-thread";
const ACCESS_GROUPS_PATH: &str = "api/v0/get-all-access-groups";

pub struct NodeClient {
    base_url: String,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post_json<P: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &P,
    ) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self.http.post(&url).json(payload).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn batch_from(response: NodeMessagesResponse, chat_type: ChatType) -> ThreadBatch {
        let profiles = normalize_node_profiles(response.profiles.clone());
        let records = response
            .take_messages()
            .iter()
            .map(|entry| normalize_node_message(entry, chat_type))
            .collect();
        ThreadBatch { records, profiles }
    }
}

#[async_trait]
impl WindowedSource for NodeClient {
    async fn user_threads(&self, user: &PublicKeyB58) -> Result<ThreadBatch, ApiError> {
        let payload = NodeUserThreadsPayload {
            user_public_key: user.as_str().to_string(),
        };
        let response: NodeMessagesResponse = self.post_json(USER_THREADS_PATH, &payload).await?;
        // The inbox mixes both chat types; each entry carries its own.
        Ok(Self::batch_from(response, ChatType::Dm))
    }

    async fn dm_thread_page(&self, query: DmWindowQuery) -> Result<ThreadBatch, ApiError> {
        let payload = NodeDmThreadPayload {
            user_group_owner_public_key: query.user_owner.as_str().to_string(),
            user_group_key_name: query.user_key_name,
            party_group_owner_public_key: query.party_owner.as_str().to_string(),
            party_group_key_name: query.party_key_name,
            start_time_stamp: query.start_timestamp.nanos_string(),
            max_messages_to_fetch: query.max_messages,
        };
        let response: NodeMessagesResponse = self.post_json(DM_THREAD_PATH, &payload).await?;
        Ok(Self::batch_from(response, ChatType::Dm))
    }

    async fn group_thread_page(&self, query: GroupWindowQuery) -> Result<ThreadBatch, ApiError> {
        let payload = NodeGroupThreadPayload {
            user_public_key: query.owner.as_str().to_string(),
            access_group_key_name: query.key_name,
            start_time_stamp: query.start_timestamp.nanos_string(),
            max_messages_to_fetch: query.max_messages,
        };
        let response: NodeMessagesResponse = self.post_json(GROUP_THREAD_PATH, &payload).await?;
        Ok(Self::batch_from(response, ChatType::GroupChat))
    }
}

#[async_trait]
impl AccessGroupSource for NodeClient {
    async fn all_access_groups(
        &self,
        owner: &PublicKeyB58,
    ) -> Result<Vec<AccessGroupEntry>, ApiError> {
        let payload = NodeAccessGroupsPayload {
            public_key: owner.as_str().to_string(),
        };
        let response: NodeAccessGroupsResponse =
            self.post_json(ACCESS_GROUPS_PATH, &payload).await?;

        let owned = response.owned.unwrap_or_default();
        let member = response.member.unwrap_or_default();
        Ok(owned
            .iter()
            .chain(member.iter())
            .map(normalize_access_group)
            .collect())
    }
}
