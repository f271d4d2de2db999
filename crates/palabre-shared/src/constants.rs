/// Derivation label for the messaging key derived from a held seed.
/// Also the key name of every direct-message access group.
pub const DEFAULT_KEY_NAME: &str = "default-key";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// x25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Default number of messages requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Upper bound on messages per page accepted from either source
pub const MAX_PAGE_SIZE: u32 = 75;

/// Concurrent in-flight decryptions within one batch
pub const DECRYPT_CONCURRENCY: usize = 16;

/// HTTP request timeout in seconds for both backend clients
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_MESSAGING_KEY: &str = "palabre-messaging-key-v1";
pub const KDF_CONTEXT_ECIES_KEY: &str = "palabre-ecies-key-v1";
pub const KDF_CONTEXT_SHARED_KEY: &str = "palabre-shared-key-v1";
