//! Encrypted-conversation synchronization engine.
//!
//! The pipeline: a [`fetch::ThreadFetcher`] pulls raw encrypted pages from
//! one of two backends, [`retry::decrypt_batch`] turns them into plaintext
//! (refreshing stale access-group keys at most once), and a
//! [`aggregate::ConversationAggregator`] folds the results into ordered,
//! deduplicated conversations. A [`session::Session`] owns all of it for
//! one logged-in identity.

pub mod aggregate;
pub mod decrypt;
pub mod error;
pub mod fetch;
pub mod registry;
pub mod retry;
pub mod session;

pub use aggregate::ConversationAggregator;
pub use decrypt::{DecryptMode, DelegatedDecryptor, DelegatedRequest, LocalKeyring};
pub use error::EngineError;
pub use fetch::{FetchedPage, ThreadFetcher, ThreadSelector};
pub use registry::AccessGroupRegistry;
pub use retry::{decrypt_batch, BatchDecryption};
pub use session::{Liveness, LoadedPage, Session};

use tracing_subscriber::{fmt, EnvFilter};

/// Install a default tracing subscriber for embedders that have none.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("palabre_engine=debug,palabre_api=debug,warn"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
