use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_ECIES_KEY, KDF_CONTEXT_MESSAGING_KEY, KDF_CONTEXT_SHARED_KEY, NONCE_SIZE,
    PUBKEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

// Wire format of every ECIES blob: ephemeral_pub (32) || nonce (24) || ciphertext.
const ECIES_HEADER: usize = PUBKEY_SIZE + NONCE_SIZE;

fn derive_32(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Derive the messaging secret for one derivation label from a held seed.
pub fn derive_messaging_secret(seed: &[u8; 32], key_name: &str) -> StaticSecret {
    StaticSecret::from(derive_32(
        KDF_CONTEXT_MESSAGING_KEY,
        &[seed, key_name.as_bytes()],
    ))
}

/// Decode a base58-check public key string into an x25519 public key.
///
/// The check-decoded payload may carry a network version prefix; the key is
/// always the trailing 32 bytes.
pub fn decode_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = bs58::decode(encoded)
        .with_check(None)
        .into_vec()
        .map_err(|_| CryptoError::InvalidKeyEncoding)?;
    if bytes.len() < PUBKEY_SIZE {
        return Err(CryptoError::InvalidKeyEncoding);
    }
    let mut key = [0u8; PUBKEY_SIZE];
    key.copy_from_slice(&bytes[bytes.len() - PUBKEY_SIZE..]);
    Ok(PublicKey::from(key))
}

pub fn encode_public_key(key: &PublicKey) -> String {
    bs58::encode(key.as_bytes()).with_check().into_string()
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_secret() -> StaticSecret {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    StaticSecret::from(bytes)
}

/// Encrypt to a recipient public key (single derivation).
///
/// Returns ephemeral_pub || nonce || ciphertext.
pub fn ecies_encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = generate_secret();
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = derive_32(KDF_CONTEXT_ECIES_KEY, &[shared.as_bytes()]);

    let cipher = XChaCha20Poly1305::new(&key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(ECIES_HEADER + ciphertext.len());
    output.extend_from_slice(ephemeral_pub.as_bytes());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt a blob encrypted to this secret's public key (single derivation).
pub fn ecies_decrypt(secret: &StaticSecret, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < ECIES_HEADER {
        return Err(CryptoError::TruncatedCiphertext);
    }
    let mut ephemeral_bytes = [0u8; PUBKEY_SIZE];
    ephemeral_bytes.copy_from_slice(&data[..PUBKEY_SIZE]);
    let ephemeral_pub = PublicKey::from(ephemeral_bytes);

    let shared = secret.diffie_hellman(&ephemeral_pub);
    let key = derive_32(KDF_CONTEXT_ECIES_KEY, &[shared.as_bytes()]);

    let (nonce_bytes, ciphertext) = data[PUBKEY_SIZE..].split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(&key.into());
    let nonce = XNonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Derive the per-counterparty secret both sides of a pairing agree on.
///
/// DH is symmetric, so (my_secret, their_pub) and (their_secret, my_pub)
/// produce the same derived secret.
pub fn shared_secret(secret: &StaticSecret, counterparty: &PublicKey) -> StaticSecret {
    let shared = secret.diffie_hellman(counterparty);
    StaticSecret::from(derive_32(KDF_CONTEXT_SHARED_KEY, &[shared.as_bytes()]))
}

/// Encrypt a message payload under the pairing of a counterparty public key
/// and the sender's secret (double derivation).
pub fn ecies_encrypt_shared(
    counterparty: &PublicKey,
    secret: &StaticSecret,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let derived = shared_secret(secret, counterparty);
    ecies_encrypt(&PublicKey::from(&derived), plaintext)
}

/// Decrypt a message payload under the pairing of a counterparty public key
/// and the requester's secret (double derivation).
pub fn ecies_decrypt_shared(
    counterparty: &PublicKey,
    secret: &StaticSecret,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let derived = shared_secret(secret, counterparty);
    ecies_decrypt(&derived, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecies_roundtrip() {
        let secret = generate_secret();
        let public = PublicKey::from(&secret);
        let plaintext = b"Palabre, palabre!";

        let encrypted = ecies_encrypt(&public, plaintext).unwrap();
        let decrypted = ecies_decrypt(&secret, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret = generate_secret();
        let public = PublicKey::from(&secret);
        let other = generate_secret();

        let encrypted = ecies_encrypt(&public, b"secret message").unwrap();
        assert!(ecies_decrypt(&other, &encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let secret = generate_secret();
        let public = PublicKey::from(&secret);

        let mut encrypted = ecies_encrypt(&public, b"important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(ecies_decrypt(&secret, &encrypted).is_err());
    }

    #[test]
    fn test_truncated_blob_fails() {
        let secret = generate_secret();
        assert!(matches!(
            ecies_decrypt(&secret, &[0u8; 10]),
            Err(CryptoError::TruncatedCiphertext)
        ));
    }

    #[test]
    fn test_shared_roundtrip_both_directions() {
        let alice = generate_secret();
        let alice_pub = PublicKey::from(&alice);
        let bob = generate_secret();
        let bob_pub = PublicKey::from(&bob);

        let encrypted = ecies_encrypt_shared(&bob_pub, &alice, b"hello bob").unwrap();

        // Bob decrypts with Alice as the counterparty.
        let decrypted = ecies_decrypt_shared(&alice_pub, &bob, &encrypted).unwrap();
        assert_eq!(decrypted, b"hello bob");

        // Alice can also reopen her own message.
        let reopened = ecies_decrypt_shared(&bob_pub, &alice, &encrypted).unwrap();
        assert_eq!(reopened, b"hello bob");
    }

    #[test]
    fn test_messaging_secret_deterministic() {
        let seed = [7u8; 32];
        let a = derive_messaging_secret(&seed, "default-key");
        let b = derive_messaging_secret(&seed, "default-key");
        assert_eq!(a.to_bytes(), b.to_bytes());

        let c = derive_messaging_secret(&seed, "other-key");
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn test_public_key_encoding_roundtrip() {
        let secret = generate_secret();
        let public = PublicKey::from(&secret);
        let encoded = encode_public_key(&public);
        let decoded = decode_public_key(&encoded).unwrap();
        assert_eq!(decoded.as_bytes(), public.as_bytes());
    }

    #[test]
    fn test_bad_key_encoding_rejected() {
        assert!(decode_public_key("not base58 0OIl").is_err());
        // Valid base58 but no checksum.
        assert!(decode_public_key("2NEpo7TZRRrLZSi2U").is_err());
    }
}
