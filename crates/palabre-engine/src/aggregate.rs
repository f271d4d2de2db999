//! Conversation bucketing and idempotent page merging.

use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use palabre_shared::types::{
    ChatType, Conversation, ConversationKey, DecryptedMessage, PartyInfo,
};

/// The identity a message is filed under: for DMs the other party, for
/// group chats always the group's recipient identity, whoever sent it.
pub fn counterparty_of(msg: &DecryptedMessage) -> &PartyInfo {
    match msg.raw.chat_type {
        ChatType::Dm => {
            if msg.is_sender {
                &msg.raw.recipient
            } else {
                &msg.raw.sender
            }
        }
        ChatType::GroupChat => &msg.raw.recipient,
    }
}

/// Union two message lists for the same conversation, keyed by the
/// canonical timestamp string. Incoming entries overwrite existing ones
/// with the same key, which is how a refreshed decryption replaces a stale
/// one. The result is sorted descending, ties keeping first-seen order,
/// and the operation is idempotent.
pub fn merge(
    existing: &[DecryptedMessage],
    incoming: &[DecryptedMessage],
) -> Vec<DecryptedMessage> {
    let mut merged: Vec<DecryptedMessage> = Vec::with_capacity(existing.len() + incoming.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for msg in existing.iter().chain(incoming) {
        let key = if msg.identity_key().is_empty() {
            // Malformed record with no timestamp identity at all; give it a
            // unique slot rather than colliding on the empty string.
            Uuid::new_v4().to_string()
        } else {
            msg.identity_key().to_string()
        };
        match index.get(&key) {
            Some(&at) => merged[at] = msg.clone(),
            None => {
                index.insert(key, merged.len());
                merged.push(msg.clone());
            }
        }
    }

    merged.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    merged
}

/// Session-owned map of conversations, built up from decrypted batches.
#[derive(Default)]
pub struct ConversationAggregator {
    conversations: BTreeMap<ConversationKey, Conversation>,
}

impl ConversationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket a batch into conversations and merge each bucket into the map.
    pub fn ingest(&mut self, batch: &[DecryptedMessage]) {
        let mut buckets: BTreeMap<ConversationKey, Vec<&DecryptedMessage>> = BTreeMap::new();
        for msg in batch {
            let counterparty = counterparty_of(msg);
            let key = ConversationKey::new(
                &counterparty.owner_public_key,
                counterparty.access_group_key_name.as_deref(),
            );
            buckets.entry(key).or_default().push(msg);
        }

        for (key, msgs) in buckets {
            let incoming: Vec<DecryptedMessage> = msgs.into_iter().cloned().collect();
            match self.conversations.get_mut(&key) {
                Some(conversation) => {
                    conversation.messages = merge(&conversation.messages, &incoming);
                }
                None => {
                    let counterparty = counterparty_of(&incoming[0]);
                    let conversation = Conversation {
                        key: key.clone(),
                        counterparty_owner_key: counterparty.owner_public_key.clone(),
                        chat_type: incoming[0].raw.chat_type,
                        messages: merge(&[], &incoming),
                    };
                    self.conversations.insert(key, conversation);
                }
            }
        }
    }

    pub fn get(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Conversations ordered by most recent message, newest first.
    pub fn sorted_by_recency(&self) -> Vec<&Conversation> {
        let mut conversations: Vec<&Conversation> = self.conversations.values().collect();
        conversations.sort_by_key(|conversation| {
            std::cmp::Reverse(
                conversation
                    .messages
                    .first()
                    .map(|msg| msg.timestamp())
                    .unwrap_or_default(),
            )
        });
        conversations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palabre_shared::timestamp::NanoTimestamp;
    use palabre_shared::types::{
        DecryptOutcome, MessageInfo, PublicKeyB58, RawMessageRecord,
    };
    use std::collections::BTreeMap as StdBTreeMap;

    fn dm(
        sender: &str,
        recipient: &str,
        key_name: &str,
        nanos: u64,
        is_sender: bool,
        text: &str,
    ) -> DecryptedMessage {
        DecryptedMessage {
            raw: RawMessageRecord {
                chat_type: ChatType::Dm,
                sender: PartyInfo {
                    owner_public_key: PublicKeyB58::new(sender),
                    access_group_public_key: None,
                    access_group_key_name: Some(key_name.into()),
                },
                recipient: PartyInfo {
                    owner_public_key: PublicKeyB58::new(recipient),
                    access_group_public_key: None,
                    access_group_key_name: Some(key_name.into()),
                },
                message: MessageInfo {
                    encrypted_hex: "00".into(),
                    timestamp: NanoTimestamp(nanos),
                    timestamp_string: nanos.to_string(),
                    extra: StdBTreeMap::new(),
                },
            },
            is_sender,
            outcome: DecryptOutcome::Plaintext(text.into()),
        }
    }

    fn group(sender: &str, group_owner: &str, key_name: &str, nanos: u64) -> DecryptedMessage {
        let mut msg = dm(sender, group_owner, key_name, nanos, false, "g");
        msg.raw.chat_type = ChatType::GroupChat;
        msg
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = vec![dm("X", "Y", "k1", 3, true, "a"), dm("X", "Y", "k1", 1, true, "b")];
        let b = vec![dm("X", "Y", "k1", 2, true, "c"), dm("X", "Y", "k1", 3, true, "a2")];

        let once = merge(&a, &b);
        let twice = merge(&once, &b);
        assert_eq!(once, twice);

        // Unique identity keys, sorted strictly descending.
        let keys: Vec<&str> = once.iter().map(|m| m.identity_key()).collect();
        assert_eq!(keys, vec!["3", "2", "1"]);
        // Incoming overwrote the record sharing key "3".
        assert_eq!(once[0].outcome.plaintext(), Some("a2"));
    }

    #[test]
    fn test_merge_ties_keep_first_seen_order() {
        let mut first = dm("X", "Y", "k1", 5, true, "first");
        first.raw.message.timestamp_string = "5a".into();
        let mut second = dm("X", "Y", "k1", 5, true, "second");
        second.raw.message.timestamp_string = "5b".into();

        let merged = merge(&[first.clone()], &[second.clone()]);
        assert_eq!(merged[0].outcome.plaintext(), Some("first"));
        assert_eq!(merged[1].outcome.plaintext(), Some("second"));
    }

    #[test]
    fn test_merge_placeholder_for_absent_identity() {
        let mut a = dm("X", "Y", "k1", 0, true, "a");
        a.raw.message.timestamp_string = String::new();
        let mut b = dm("X", "Y", "k1", 0, true, "b");
        b.raw.message.timestamp_string = String::new();

        // Without identity keys, nothing may collide.
        let merged = merge(&[a], &[b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_bucketing_pairs_both_directions() {
        let mut aggregator = ConversationAggregator::new();
        // X's view: one sent to Y, one received from Y, same key name.
        aggregator.ingest(&[
            dm("X", "Y", "k1", 2, true, "sent"),
            dm("Y", "X", "k1", 1, false, "received"),
            dm("Y", "X", "k2", 3, false, "variant"),
        ]);

        assert_eq!(aggregator.len(), 2);
        let key = ConversationKey::new(&PublicKeyB58::new("Y"), Some("k1"));
        let convo = aggregator.get(&key).unwrap();
        assert_eq!(convo.messages.len(), 2);
        assert_eq!(convo.counterparty_owner_key.as_str(), "Y");

        let variant_key = ConversationKey::new(&PublicKeyB58::new("Y"), Some("k2"));
        assert_eq!(aggregator.get(&variant_key).unwrap().messages.len(), 1);
    }

    #[test]
    fn test_group_buckets_on_recipient_identity() {
        let mut aggregator = ConversationAggregator::new();
        aggregator.ingest(&[
            group("A", "G", "squad", 1),
            group("B", "G", "squad", 2),
        ]);

        // Two senders, one group conversation.
        assert_eq!(aggregator.len(), 1);
        let key = ConversationKey::new(&PublicKeyB58::new("G"), Some("squad"));
        let convo = aggregator.get(&key).unwrap();
        assert_eq!(convo.chat_type, ChatType::GroupChat);
        assert_eq!(convo.messages.len(), 2);
    }

    #[test]
    fn test_ingest_twice_does_not_duplicate() {
        let mut aggregator = ConversationAggregator::new();
        let batch = vec![dm("X", "Y", "k1", 1, true, "a"), dm("X", "Y", "k1", 2, true, "b")];
        aggregator.ingest(&batch);
        aggregator.ingest(&batch);

        let key = ConversationKey::new(&PublicKeyB58::new("Y"), Some("k1"));
        assert_eq!(aggregator.get(&key).unwrap().messages.len(), 2);
    }

    #[test]
    fn test_sorted_by_recency() {
        let mut aggregator = ConversationAggregator::new();
        aggregator.ingest(&[
            dm("X", "Old", "k1", 10, true, "old"),
            dm("X", "New", "k1", 20, true, "new"),
        ]);
        let sorted = aggregator.sorted_by_recency();
        assert_eq!(sorted[0].counterparty_owner_key.as_str(), "New");
        assert_eq!(sorted[1].counterparty_owner_key.as_str(), "Old");
    }
}
