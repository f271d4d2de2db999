//! Session-owned working set of access groups.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use palabre_api::AccessGroupSource;
use palabre_shared::types::{AccessGroupEntry, PublicKeyB58};

use crate::error::EngineError;
use crate::session::Liveness;

/// The current, possibly stale, union of owned and member access groups.
///
/// Staleness is expected: the retry coordinator refreshes the set when
/// decryption reports a missing group key. The set is replaced wholesale on
/// refresh, never patched.
pub struct AccessGroupRegistry {
    source: Arc<dyn AccessGroupSource>,
    owner: PublicKeyB58,
    liveness: Liveness,
    groups: RwLock<Vec<AccessGroupEntry>>,
}

impl AccessGroupRegistry {
    pub fn new(source: Arc<dyn AccessGroupSource>, owner: PublicKeyB58, liveness: Liveness) -> Self {
        Self {
            source,
            owner,
            liveness,
            groups: RwLock::new(Vec::new()),
        }
    }

    pub async fn snapshot(&self) -> Vec<AccessGroupEntry> {
        self.groups.read().await.clone()
    }

    /// Fetch the full set again and replace the working copy.
    ///
    /// A closed session commits nothing: the fetched set is dropped and the
    /// stale copy stays in place.
    pub async fn refresh(&self) -> Result<Vec<AccessGroupEntry>, EngineError> {
        let fresh = self.source.all_access_groups(&self.owner).await?;
        if !self.liveness.alive() {
            return Err(EngineError::Cancelled);
        }
        debug!(count = fresh.len(), owner = %self.owner.short(), "access groups refreshed");
        let mut groups = self.groups.write().await;
        *groups = fresh.clone();
        Ok(fresh)
    }
}

/// Scan for the entry matching (owner, key name) that carries a usable
/// member key. The set may hold duplicates, so this is a scan, not a map
/// lookup; the first usable entry wins.
pub fn find_group_member_entry<'a>(
    groups: &'a [AccessGroupEntry],
    owner: &PublicKeyB58,
    key_name: &str,
) -> Option<&'a AccessGroupEntry> {
    groups
        .iter()
        .find(|entry| entry.matches(owner, key_name) && entry.member_encrypted_key().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use palabre_shared::types::MemberEntry;

    fn entry(owner: &str, key_name: &str, member_key: Option<&str>) -> AccessGroupEntry {
        AccessGroupEntry {
            owner_public_key: PublicKeyB58::new(owner),
            key_name: key_name.into(),
            group_public_key: PublicKeyB58::new("BC1YLixGroup"),
            member_entry: member_key.map(|key| MemberEntry {
                encrypted_key_hex: key.into(),
            }),
        }
    }

    #[test]
    fn test_find_skips_entries_without_member_key() {
        let owner = PublicKeyB58::new("BC1YLixOwner");
        let groups = vec![
            entry("BC1YLixOwner", "squad", None),
            entry("BC1YLixOwner", "squad", Some("")),
            entry("BC1YLixOwner", "squad", Some("cafe")),
        ];
        let found = find_group_member_entry(&groups, &owner, "squad").unwrap();
        assert_eq!(found.member_encrypted_key(), Some("cafe"));
    }

    #[test]
    fn test_find_requires_both_owner_and_key_name() {
        let owner = PublicKeyB58::new("BC1YLixOwner");
        let groups = vec![
            entry("BC1YLixOther", "squad", Some("cafe")),
            entry("BC1YLixOwner", "crew", Some("cafe")),
        ];
        assert!(find_group_member_entry(&groups, &owner, "squad").is_none());
    }
}
