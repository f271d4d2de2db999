//! Per-record decryption.
//!
//! Two modes, chosen once per session: delegated (an external signer holds
//! the keys and decrypts opaquely) and local (keys derived on demand from a
//! session-held seed). A record that fails to decrypt is kept with a tagged
//! error, never dropped.

use async_trait::async_trait;
use std::sync::Arc;
use x25519_dalek::StaticSecret;

use palabre_shared::constants::DEFAULT_KEY_NAME;
use palabre_shared::crypto;
use palabre_shared::error::DecryptError;
use palabre_shared::types::{
    AccessGroupEntry, ChatType, DecryptOutcome, DecryptedMessage, PartyInfo, PublicKeyB58,
    RawMessageRecord,
};

use crate::registry::find_group_member_entry;

/// What an external signer needs to decrypt one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedRequest {
    pub encrypted_hex: String,
    pub chat_type: ChatType,
    pub is_sender: bool,
    /// For DMs the counterparty's access-group public key; for group chats
    /// the sender's.
    pub counterparty_public_key: Option<PublicKeyB58>,
    /// Group chats: the recipient group identity.
    pub group_owner_public_key: Option<PublicKeyB58>,
    pub group_key_name: Option<String>,
}

/// External identity service that decrypts on the engine's behalf. The
/// engine only builds the request and interprets the typed error channel.
#[async_trait]
pub trait DelegatedDecryptor: Send + Sync {
    async fn decrypt(&self, request: DelegatedRequest) -> Result<String, DecryptError>;
}

#[derive(Clone)]
pub enum DecryptMode {
    Delegated(Arc<dyn DelegatedDecryptor>),
    Local(LocalKeyring),
}

/// Messaging keys derived on demand from a session-held seed.
#[derive(Clone)]
pub struct LocalKeyring {
    seed: [u8; 32],
}

impl LocalKeyring {
    pub fn new(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    fn messaging_secret(&self) -> StaticSecret {
        crypto::derive_messaging_secret(&self.seed, DEFAULT_KEY_NAME)
    }

    /// The base58-check form of this keyring's messaging public key.
    pub fn messaging_public_key(&self) -> PublicKeyB58 {
        let public = x25519_dalek::PublicKey::from(&self.messaging_secret());
        PublicKeyB58::new(crypto::encode_public_key(&public))
    }
}

pub async fn decrypt_record(
    owner: &PublicKeyB58,
    mode: &DecryptMode,
    groups: &[AccessGroupEntry],
    raw: RawMessageRecord,
) -> DecryptedMessage {
    let is_sender = raw.sender.owner_public_key == *owner;
    let outcome = match mode {
        DecryptMode::Delegated(signer) => {
            match signer.decrypt(delegated_request(&raw, is_sender)).await {
                Ok(text) => DecryptOutcome::Plaintext(text),
                Err(err) => DecryptOutcome::Failed(err),
            }
        }
        DecryptMode::Local(keyring) => match decrypt_local(keyring, groups, &raw, is_sender) {
            Ok(text) => DecryptOutcome::Plaintext(text),
            Err(err) => DecryptOutcome::Failed(err),
        },
    };
    DecryptedMessage {
        raw,
        is_sender,
        outcome,
    }
}

/// The party whose access-group key unlocks a DM: the recipient's when we
/// sent it, the sender's when we received it.
fn dm_counterparty(raw: &RawMessageRecord, is_sender: bool) -> &PartyInfo {
    if is_sender {
        &raw.recipient
    } else {
        &raw.sender
    }
}

fn delegated_request(raw: &RawMessageRecord, is_sender: bool) -> DelegatedRequest {
    match raw.chat_type {
        ChatType::Dm => DelegatedRequest {
            encrypted_hex: raw.message.encrypted_hex.clone(),
            chat_type: raw.chat_type,
            is_sender,
            counterparty_public_key: dm_counterparty(raw, is_sender)
                .access_group_public_key
                .clone(),
            group_owner_public_key: None,
            group_key_name: None,
        },
        ChatType::GroupChat => DelegatedRequest {
            encrypted_hex: raw.message.encrypted_hex.clone(),
            chat_type: raw.chat_type,
            is_sender,
            counterparty_public_key: raw.sender.access_group_public_key.clone(),
            group_owner_public_key: Some(raw.recipient.owner_public_key.clone()),
            group_key_name: Some(raw.recipient.key_name_or_default().to_string()),
        },
    }
}

fn decrypt_local(
    keyring: &LocalKeyring,
    groups: &[AccessGroupEntry],
    raw: &RawMessageRecord,
    is_sender: bool,
) -> Result<String, DecryptError> {
    let ciphertext = hex::decode(raw.message.encrypted_hex.trim())
        .map_err(|e| DecryptError::Failed(format!("invalid ciphertext encoding: {e}")))?;

    let plain = match raw.chat_type {
        ChatType::Dm => {
            let counterparty = dm_counterparty(raw, is_sender);
            let counterparty_key = counterparty.access_group_public_key.as_ref().ok_or_else(
                || DecryptError::Failed("counterparty access group key missing".into()),
            )?;
            let public = crypto::decode_public_key(counterparty_key.as_str())?;
            crypto::ecies_decrypt_shared(&public, &keyring.messaging_secret(), &ciphertext)?
        }
        ChatType::GroupChat => {
            let entry = find_group_member_entry(
                groups,
                &raw.recipient.owner_public_key,
                raw.recipient.key_name_or_default(),
            )
            .ok_or(DecryptError::MissingAccessGroupKey)?;
            let wrapped_hex = entry
                .member_encrypted_key()
                .ok_or(DecryptError::MissingAccessGroupKey)?;
            let wrapped = hex::decode(wrapped_hex)
                .map_err(|e| DecryptError::Failed(format!("invalid wrapped key encoding: {e}")))?;

            // Unwrap the group's shared key, then open the payload under the
            // pairing of the sender's group key and the shared key.
            let group_key = crypto::ecies_decrypt(&keyring.messaging_secret(), &wrapped)?;
            let group_key: [u8; 32] = group_key
                .as_slice()
                .try_into()
                .map_err(|_| DecryptError::Failed("group key has wrong length".into()))?;
            let group_secret = StaticSecret::from(group_key);

            let sender_key = raw.sender.access_group_public_key.as_ref().ok_or_else(
                || DecryptError::Failed("sender access group key missing".into()),
            )?;
            let sender_public = crypto::decode_public_key(sender_key.as_str())?;
            crypto::ecies_decrypt_shared(&sender_public, &group_secret, &ciphertext)?
        }
    };

    String::from_utf8(plain).map_err(|_| DecryptError::Failed("plaintext is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use palabre_shared::timestamp::NanoTimestamp;
    use palabre_shared::types::{MemberEntry, MessageInfo};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use x25519_dalek::PublicKey;

    fn party(owner: &str, group_key: Option<&PublicKeyB58>) -> PartyInfo {
        PartyInfo {
            owner_public_key: PublicKeyB58::new(owner),
            access_group_public_key: group_key.cloned(),
            access_group_key_name: Some(DEFAULT_KEY_NAME.into()),
        }
    }

    fn record(
        chat_type: ChatType,
        sender: PartyInfo,
        recipient: PartyInfo,
        encrypted_hex: &str,
    ) -> RawMessageRecord {
        RawMessageRecord {
            chat_type,
            sender,
            recipient,
            message: MessageInfo {
                encrypted_hex: encrypted_hex.into(),
                timestamp: NanoTimestamp(1),
                timestamp_string: "1".into(),
                extra: BTreeMap::new(),
            },
        }
    }

    struct CapturingDecryptor {
        requests: Mutex<Vec<DelegatedRequest>>,
    }

    #[async_trait]
    impl DelegatedDecryptor for CapturingDecryptor {
        async fn decrypt(&self, request: DelegatedRequest) -> Result<String, DecryptError> {
            self.requests
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(request);
            Ok("captured".into())
        }
    }

    #[tokio::test]
    async fn test_dm_counterparty_selection() {
        let me = PublicKeyB58::new("BC1YLixMe");
        let them = PublicKeyB58::new("BC1YLixThem");
        let my_group_key = PublicKeyB58::new("BC1YLixMyGroupKey");
        let their_group_key = PublicKeyB58::new("BC1YLixTheirGroupKey");

        let signer = Arc::new(CapturingDecryptor {
            requests: Mutex::new(Vec::new()),
        });
        let mode = DecryptMode::Delegated(signer.clone());

        // We are the sender: the recipient's key must be selected.
        let outgoing = record(
            ChatType::Dm,
            party(me.as_str(), Some(&my_group_key)),
            party(them.as_str(), Some(&their_group_key)),
            "00",
        );
        let decrypted = decrypt_record(&me, &mode, &[], outgoing).await;
        assert!(decrypted.is_sender);

        // We are the recipient: the sender's key must be selected.
        let incoming = record(
            ChatType::Dm,
            party(them.as_str(), Some(&their_group_key)),
            party(me.as_str(), Some(&my_group_key)),
            "00",
        );
        let decrypted = decrypt_record(&me, &mode, &[], incoming).await;
        assert!(!decrypted.is_sender);
        assert_eq!(decrypted.outcome.plaintext(), Some("captured"));

        let requests = signer.requests.lock().unwrap();
        assert_eq!(
            requests[0].counterparty_public_key.as_ref(),
            Some(&their_group_key)
        );
        assert_eq!(
            requests[1].counterparty_public_key.as_ref(),
            Some(&their_group_key)
        );
    }

    #[tokio::test]
    async fn test_local_dm_roundtrip_both_roles() {
        let my_seed = [1u8; 32];
        let their_seed = [2u8; 32];
        let me = PublicKeyB58::new("BC1YLixMe");
        let them = PublicKeyB58::new("BC1YLixThem");

        let my_keyring = LocalKeyring::new(my_seed);
        let their_keyring = LocalKeyring::new(their_seed);
        let my_pub = my_keyring.messaging_public_key();
        let their_pub = their_keyring.messaging_public_key();

        // They encrypt to us under the pairing of our public key and their
        // messaging secret.
        let my_curve_pub = crypto::decode_public_key(my_pub.as_str()).unwrap();
        let ciphertext = crypto::ecies_encrypt_shared(
            &my_curve_pub,
            &crypto::derive_messaging_secret(&their_seed, DEFAULT_KEY_NAME),
            b"salut",
        )
        .unwrap();
        let encrypted_hex = hex::encode(&ciphertext);

        let mode = DecryptMode::Local(my_keyring);
        let incoming = record(
            ChatType::Dm,
            party(them.as_str(), Some(&their_pub)),
            party(me.as_str(), Some(&my_pub)),
            &encrypted_hex,
        );
        let decrypted = decrypt_record(&me, &mode, &[], incoming).await;
        assert_eq!(decrypted.outcome.plaintext(), Some("salut"));

        // The sender can reopen the same ciphertext through the recipient's
        // public key.
        let mode = DecryptMode::Local(their_keyring);
        let outgoing = record(
            ChatType::Dm,
            party(them.as_str(), Some(&their_pub)),
            party(me.as_str(), Some(&my_pub)),
            &encrypted_hex,
        );
        let decrypted = decrypt_record(&them, &mode, &[], outgoing).await;
        assert!(decrypted.is_sender);
        assert_eq!(decrypted.outcome.plaintext(), Some("salut"));
    }

    #[tokio::test]
    async fn test_group_without_member_entry_is_missing_key() {
        let me = PublicKeyB58::new("BC1YLixMe");
        let group_owner = PublicKeyB58::new("BC1YLixGroupOwner");
        let sender_key = PublicKeyB58::new("BC1YLixSenderKey");

        let mut recipient = party(group_owner.as_str(), None);
        recipient.access_group_key_name = Some("squad".into());
        let raw = record(
            ChatType::GroupChat,
            party("BC1YLixThem", Some(&sender_key)),
            recipient,
            "00",
        );

        let mode = DecryptMode::Local(LocalKeyring::new([3u8; 32]));
        let decrypted = decrypt_record(&me, &mode, &[], raw.clone()).await;
        assert!(decrypted.outcome.is_missing_group_key());
        // The record survives intact alongside the error.
        assert_eq!(decrypted.raw, raw);
    }

    #[tokio::test]
    async fn test_group_roundtrip_with_member_entry() {
        let my_seed = [4u8; 32];
        let me = PublicKeyB58::new("BC1YLixMe");
        let group_owner = PublicKeyB58::new("BC1YLixGroupOwner");

        let my_keyring = LocalKeyring::new(my_seed);
        let my_curve_pub =
            crypto::decode_public_key(my_keyring.messaging_public_key().as_str()).unwrap();

        // The group's shared secret, wrapped to us as one member.
        let group_secret = crypto::generate_secret();
        let group_public = PublicKey::from(&group_secret);
        let wrapped = crypto::ecies_encrypt(&my_curve_pub, &group_secret.to_bytes()).unwrap();

        // A sender encrypts the payload under the pairing of the group key
        // and their own messaging secret.
        let sender_secret = crypto::generate_secret();
        let sender_public = PublicKey::from(&sender_secret);
        let sender_key_b58 = PublicKeyB58::new(crypto::encode_public_key(&sender_public));
        let ciphertext =
            crypto::ecies_encrypt_shared(&group_public, &sender_secret, b"bonjour le groupe")
                .unwrap();

        let groups = vec![AccessGroupEntry {
            owner_public_key: group_owner.clone(),
            key_name: "squad".into(),
            group_public_key: PublicKeyB58::new(crypto::encode_public_key(&group_public)),
            member_entry: Some(MemberEntry {
                encrypted_key_hex: hex::encode(&wrapped),
            }),
        }];

        let mut recipient = party(group_owner.as_str(), None);
        recipient.access_group_key_name = Some("squad".into());
        let raw = record(
            ChatType::GroupChat,
            party("BC1YLixThem", Some(&sender_key_b58)),
            recipient,
            &hex::encode(&ciphertext),
        );

        let mode = DecryptMode::Local(my_keyring);
        let decrypted = decrypt_record(&me, &mode, &groups, raw).await;
        assert_eq!(decrypted.outcome.plaintext(), Some("bonjour le groupe"));
    }

    #[tokio::test]
    async fn test_bad_ciphertext_keeps_record_with_failure() {
        let me = PublicKeyB58::new("BC1YLixMe");
        let raw = record(
            ChatType::Dm,
            party("BC1YLixThem", None),
            party(me.as_str(), None),
            "not hex at all",
        );
        let mode = DecryptMode::Local(LocalKeyring::new([5u8; 32]));
        let decrypted = decrypt_record(&me, &mode, &[], raw.clone()).await;

        match decrypted.outcome.error() {
            Some(DecryptError::Failed(cause)) => {
                assert!(cause.contains("invalid ciphertext encoding"))
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(decrypted.raw, raw);
    }
}
