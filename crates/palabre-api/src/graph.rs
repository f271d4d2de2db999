//! Client for the indexed GraphQL message source.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use palabre_shared::constants::HTTP_TIMEOUT_SECS;
use palabre_shared::timestamp::NanoTimestamp;
use palabre_shared::types::PublicKeyB58;

use crate::error::ApiError;
use crate::source::{IndexedSource, MessageFilter, MessagePage, MessagesQuery};
use crate::wire::{
    graph_profiles, normalize_graph_node, GraphAccessGroupsConnection, GraphMessagesConnection,
};

const MESSAGES_QUERY: &str = r#"
query Messages($filter: MessageFilter, $first: Int!, $after: Cursor, $before: Cursor) {
  messages(filter: $filter, orderBy: TIMESTAMP_DESC, first: $first, after: $after, before: $before) {
    nodes {
      encryptedText
      timestamp
      senderAccessGroupOwnerPublicKey
      recipientAccessGroupOwnerPublicKey
      senderAccessGroupPublicKey
      recipientAccessGroupPublicKey
      senderAccessGroupKeyName
      recipientAccessGroupKeyName
      isGroupChatMessage
      sender { username publicKey profilePic }
      receiver { username publicKey profilePic }
    }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const ACCESS_GROUPS_QUERY: &str = r#"
query AccessGroups($filter: AccessGroupFilter, $first: Int!, $after: Cursor) {
  accessGroups(filter: $filter, first: $first, after: $after) {
    nodes {
      members { nodes { memberPublicKey } }
    }
  }
}"#;

#[derive(Debug, Clone, Deserialize)]
struct GraphErrorItem {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphErrorItem>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessagesData {
    #[serde(default)]
    messages: GraphMessagesConnection,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AccessGroupsData {
    #[serde(default)]
    access_groups: GraphAccessGroupsConnection,
}

pub struct GraphClient {
    base_url: String,
    http: reqwest::Client,
}

impl GraphClient {
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

    async fn execute(&self, query: &'static str, variables: Value) -> Result<Value, ApiError> {
        let body = json!({ "query": query, "variables": variables });
        let resp = self.http.post(&self.base_url).json(&body).send().await?;

        // Some gateways only accept GET for queries.
        let resp = if resp.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            debug!(url = %self.base_url, "POST not allowed, retrying as GET");
            let variables_text = variables.to_string();
            self.http
                .get(&self.base_url)
                .query(&[("query", query), ("variables", variables_text.as_str())])
                .send()
                .await?
        } else {
            resp
        };

        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }

        let envelope: GraphEnvelope = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let joined = errors
                .iter()
                .map(|item| item.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::Query(joined));
        }

        envelope
            .data
            .ok_or_else(|| ApiError::Decode("response carried no data".into()))
    }
}

/// Filter clause for the messages query, PostGraphile style.
fn message_filter_value(filter: &MessageFilter, before: Option<NanoTimestamp>) -> Value {
    let mut clauses = Vec::new();
    match filter {
        MessageFilter::DmPair {
            user_owner,
            party_owner,
        } => {
            clauses.push(json!({ "isGroupChatMessage": { "equalTo": false } }));
            clauses.push(json!({ "or": [
                { "and": [
                    { "senderAccessGroupOwnerPublicKey": { "equalTo": user_owner.as_str() } },
                    { "recipientAccessGroupOwnerPublicKey": { "equalTo": party_owner.as_str() } }
                ]},
                { "and": [
                    { "senderAccessGroupOwnerPublicKey": { "equalTo": party_owner.as_str() } },
                    { "recipientAccessGroupOwnerPublicKey": { "equalTo": user_owner.as_str() } }
                ]}
            ]}));
        }
        MessageFilter::Group { owner, key_name } => {
            clauses.push(json!({ "isGroupChatMessage": { "equalTo": true } }));
            clauses.push(json!({ "recipientAccessGroupOwnerPublicKey": { "equalTo": owner.as_str() } }));
            clauses.push(json!({ "recipientAccessGroupKeyName": { "equalTo": key_name } }));
        }
    }
    if let Some(dt) = before.and_then(NanoTimestamp::to_datetime) {
        clauses.push(json!({ "timestamp": { "lessThan": dt.to_rfc3339() } }));
    }
    json!({ "and": clauses })
}

#[async_trait]
impl IndexedSource for GraphClient {
    async fn message_page(&self, query: MessagesQuery) -> Result<MessagePage, ApiError> {
        let variables = json!({
            "filter": message_filter_value(&query.filter, query.before),
            "first": query.first,
            "after": query.after,
            "before": Value::Null,
        });
        let data = self.execute(MESSAGES_QUERY, variables).await?;
        let parsed: MessagesData =
            serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))?;

        let connection = parsed.messages;
        let profiles = graph_profiles(&connection.nodes);
        let records = connection.nodes.iter().map(normalize_graph_node).collect();
        Ok(MessagePage {
            records,
            profiles,
            has_next_page: connection.page_info.has_next_page,
            end_cursor: connection.page_info.end_cursor,
        })
    }

    async fn group_members(
        &self,
        owner: &PublicKeyB58,
        key_name: &str,
        first: u32,
    ) -> Result<Vec<PublicKeyB58>, ApiError> {
        let variables = json!({
            "filter": {
                "accessGroupOwnerPublicKey": { "equalTo": owner.as_str() },
                "accessGroupKeyName": { "equalTo": key_name },
            },
            "first": 1,
            "after": Value::Null,
        });
        let data = self.execute(ACCESS_GROUPS_QUERY, variables).await?;
        let parsed: AccessGroupsData =
            serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))?;

        let members = parsed
            .access_groups
            .nodes
            .into_iter()
            .flat_map(|group| group.members.nodes)
            .filter_map(|member| member.member_public_key)
            .filter(|key| !key.is_empty())
            .map(PublicKeyB58::new)
            .take(first as usize)
            .collect();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dm_filter_covers_both_directions() {
        let filter = MessageFilter::DmPair {
            user_owner: PublicKeyB58::new("BC1YLixUser"),
            party_owner: PublicKeyB58::new("BC1YLixParty"),
        };
        let value = message_filter_value(&filter, None);
        let text = value.to_string();
        // Both orderings of the pair must appear.
        assert_eq!(text.matches("BC1YLixUser").count(), 2);
        assert_eq!(text.matches("BC1YLixParty").count(), 2);
        assert!(text.contains("\"isGroupChatMessage\":{\"equalTo\":false}"));
    }

    #[test]
    fn test_group_filter_carries_window_bound() {
        let filter = MessageFilter::Group {
            owner: PublicKeyB58::new("BC1YLixOwner"),
            key_name: "squad".into(),
        };
        let bound = NanoTimestamp(1_700_000_000_000_000_000);
        let value = message_filter_value(&filter, Some(bound));
        let text = value.to_string();
        assert!(text.contains("\"recipientAccessGroupKeyName\":{\"equalTo\":\"squad\"}"));
        assert!(text.contains("lessThan"));
        assert!(text.contains("2023-11-14T22:13:20"));
    }

    #[test]
    fn test_error_envelope_parses() {
        let envelope: GraphEnvelope = serde_json::from_value(serde_json::json!({
            "errors": [{"message": "syntax error"}]
        }))
        .unwrap();
        assert_eq!(envelope.errors.unwrap()[0].message, "syntax error");
        assert!(envelope.data.is_none());
    }
}
