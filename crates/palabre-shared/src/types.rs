use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::DEFAULT_KEY_NAME;
use crate::error::DecryptError;
use crate::timestamp::NanoTimestamp;

/// A base58-check-encoded public key string.
///
/// Opaque to the engine: compared, hashed and displayed, never decoded.
/// Only the crypto layer turns one into curve bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PublicKeyB58(pub String);

impl PublicKeyB58 {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl std::fmt::Display for PublicKeyB58 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Dm,
    GroupChat,
}

/// One side of a message: the owner identity plus the access-group key it
/// was addressed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyInfo {
    pub owner_public_key: PublicKeyB58,
    pub access_group_public_key: Option<PublicKeyB58>,
    pub access_group_key_name: Option<String>,
}

impl PartyInfo {
    pub fn key_name_or_default(&self) -> &str {
        self.access_group_key_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_KEY_NAME)
    }
}

/// The encrypted payload and its timing, as normalized from either source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageInfo {
    /// Hex-encoded ciphertext. Opaque until decryption.
    pub encrypted_hex: String,
    pub timestamp: NanoTimestamp,
    /// Canonical decimal string of `timestamp`; the per-message identity key.
    pub timestamp_string: String,
    /// Application extras carried through untouched.
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessageRecord {
    pub chat_type: ChatType,
    pub sender: PartyInfo,
    pub recipient: PartyInfo,
    pub message: MessageInfo,
}

/// The group's shared messaging key, ECIES-encrypted to one member's
/// registered messaging public key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberEntry {
    pub encrypted_key_hex: String,
}

/// One owned-or-joined access group. Owned and member groups are unioned
/// into a single list per user; duplicates are possible, so probing is a
/// scan on (owner, key name), never a map lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessGroupEntry {
    pub owner_public_key: PublicKeyB58,
    pub key_name: String,
    pub group_public_key: PublicKeyB58,
    pub member_entry: Option<MemberEntry>,
}

impl AccessGroupEntry {
    pub fn matches(&self, owner: &PublicKeyB58, key_name: &str) -> bool {
        self.owner_public_key == *owner && self.key_name == key_name
    }

    /// The member's wrapped group key, if present and non-empty.
    pub fn member_encrypted_key(&self) -> Option<&str> {
        self.member_entry
            .as_ref()
            .map(|entry| entry.encrypted_key_hex.as_str())
            .filter(|key| !key.is_empty())
    }
}

/// Exactly one of plaintext or a tagged error; a record is never dropped on
/// decryption failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecryptOutcome {
    Plaintext(String),
    Failed(DecryptError),
}

impl DecryptOutcome {
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            DecryptOutcome::Plaintext(text) => Some(text),
            DecryptOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DecryptError> {
        match self {
            DecryptOutcome::Plaintext(_) => None,
            DecryptOutcome::Failed(err) => Some(err),
        }
    }

    pub fn is_missing_group_key(&self) -> bool {
        matches!(
            self,
            DecryptOutcome::Failed(DecryptError::MissingAccessGroupKey)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub raw: RawMessageRecord,
    pub is_sender: bool,
    pub outcome: DecryptOutcome,
}

impl DecryptedMessage {
    pub fn timestamp(&self) -> NanoTimestamp {
        self.raw.message.timestamp
    }

    /// Identity key for merging: the canonical timestamp string.
    pub fn identity_key(&self) -> &str {
        &self.raw.message.timestamp_string
    }
}

/// Conversation key: counterparty owner key plus access-group key name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(counterparty: &PublicKeyB58, key_name: Option<&str>) -> Self {
        let key_name = key_name.filter(|name| !name.is_empty()).unwrap_or(DEFAULT_KEY_NAME);
        Self(format!("{}:{}", counterparty.as_str(), key_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One thread between the user and a counterparty (user or group), messages
/// ordered descending by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub counterparty_owner_key: PublicKeyB58,
    pub chat_type: ChatType,
    pub messages: Vec<DecryptedMessage>,
}

/// Display metadata for a public key, carried alongside fetched pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProfileHint {
    pub username: Option<String>,
    pub profile_pic: Option<String>,
}

/// Where the next page starts. DMs advance by opaque cursor on the indexed
/// source; groups (and every fallback fetch) advance by an exclusive
/// timestamp upper bound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Cursor { after: Option<String> },
    Window { before: Option<NanoTimestamp> },
}

impl PageState {
    pub fn start_cursor() -> Self {
        PageState::Cursor { after: None }
    }

    pub fn start_window() -> Self {
        PageState::Window { before: None }
    }
}
