//! Batch decryption with a single bounded key-refresh retry.

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use palabre_shared::constants::DECRYPT_CONCURRENCY;
use palabre_shared::error::DecryptError;
use palabre_shared::types::{
    AccessGroupEntry, DecryptOutcome, DecryptedMessage, PublicKeyB58, RawMessageRecord,
};

use crate::decrypt::{decrypt_record, DecryptMode};
use crate::error::EngineError;
use crate::registry::AccessGroupRegistry;

pub struct BatchDecryption {
    pub messages: Vec<DecryptedMessage>,
    /// The access-group set the final pass ran against.
    pub groups: Vec<AccessGroupEntry>,
    pub refreshed: bool,
}

/// Decrypt a page of records against the current access-group set.
///
/// If any record reports a missing group key, the registry is refreshed
/// exactly once and the entire batch re-decrypted — not just the failed
/// subset, since the new set may change other outcomes too. Any missing-key
/// outcome that survives the refresh is downgraded to a terminal failure,
/// so the sentinel never escapes a batch and nothing above this layer can
/// loop on it.
pub async fn decrypt_batch(
    owner: &PublicKeyB58,
    mode: &DecryptMode,
    registry: &AccessGroupRegistry,
    records: Vec<RawMessageRecord>,
) -> Result<BatchDecryption, EngineError> {
    let groups = registry.snapshot().await;
    let first = decrypt_all(owner, mode, &groups, records.clone()).await;

    let missing = first
        .iter()
        .filter(|msg| msg.outcome.is_missing_group_key())
        .count();
    if missing == 0 {
        return Ok(BatchDecryption {
            messages: first,
            groups,
            refreshed: false,
        });
    }

    info!(missing, "missing access-group keys, refreshing registry once");
    let fresh = match registry.refresh().await {
        Ok(groups) => groups,
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(err) => {
            warn!(error = %err, "access-group refresh failed, keeping stale set");
            return Ok(BatchDecryption {
                messages: seal_missing(first),
                groups,
                refreshed: false,
            });
        }
    };

    let second = decrypt_all(owner, mode, &fresh, records).await;
    Ok(BatchDecryption {
        messages: seal_missing(second),
        groups: fresh,
        refreshed: true,
    })
}

async fn decrypt_all(
    owner: &PublicKeyB58,
    mode: &DecryptMode,
    groups: &[AccessGroupEntry],
    records: Vec<RawMessageRecord>,
) -> Vec<DecryptedMessage> {
    stream::iter(records)
        .map(|record| decrypt_record(owner, mode, groups, record))
        .buffered(DECRYPT_CONCURRENCY)
        .collect()
        .await
}

fn seal_missing(messages: Vec<DecryptedMessage>) -> Vec<DecryptedMessage> {
    messages
        .into_iter()
        .map(|mut msg| {
            if msg.outcome.is_missing_group_key() {
                msg.outcome = DecryptOutcome::Failed(DecryptError::Failed(
                    DecryptError::MissingAccessGroupKey.to_string(),
                ));
            }
            msg
        })
        .collect()
}
