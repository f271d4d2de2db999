use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid public key encoding")]
    InvalidKeyEncoding,

    #[error("Ciphertext too short")]
    TruncatedCiphertext,
}

/// Per-message decryption outcome error.
///
/// `MissingAccessGroupKey` is the sentinel the retry coordinator matches on
/// (by variant, never by message text). Everything else is terminal and
/// rendered as a placeholder by display layers.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecryptError {
    #[error("access group key not found for group message")]
    MissingAccessGroupKey,

    #[error("Decryption failed: {0}")]
    Failed(String),
}

impl From<CryptoError> for DecryptError {
    fn from(err: CryptoError) -> Self {
        DecryptError::Failed(err.to_string())
    }
}
