//! Login-scoped session owning the whole pipeline.
//!
//! One [`Session`] is constructed at login and dropped at logout; nothing
//! in the engine outlives it, and nothing is shared across identities. All
//! state mutation funnels through the sequential fetch → decrypt → merge
//! pipeline, guarded by a liveness flag so work finishing after logout
//! discards its results instead of mutating stale state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use palabre_api::{AccessGroupSource, IndexedSource, WindowedSource};
use palabre_shared::types::{
    Conversation, ConversationKey, DecryptedMessage, PageState, ProfileHint, PublicKeyB58,
};

use crate::aggregate::ConversationAggregator;
use crate::decrypt::DecryptMode;
use crate::error::EngineError;
use crate::fetch::{ThreadFetcher, ThreadSelector};
use crate::registry::AccessGroupRegistry;
use crate::retry::decrypt_batch;

/// Shared flag consulted before every state mutation. Cloned into whatever
/// outlives the screen that started the work.
#[derive(Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// What one thread-page load hands back to the caller.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub messages: Vec<DecryptedMessage>,
    pub profiles: BTreeMap<PublicKeyB58, ProfileHint>,
    pub next: PageState,
    pub has_more: bool,
}

pub struct Session {
    owner: PublicKeyB58,
    mode: DecryptMode,
    registry: AccessGroupRegistry,
    fetcher: ThreadFetcher,
    primary: Arc<dyn IndexedSource>,
    windowed: Arc<dyn WindowedSource>,
    aggregator: Mutex<ConversationAggregator>,
    liveness: Liveness,
}

impl Session {
    pub fn new(
        owner: PublicKeyB58,
        mode: DecryptMode,
        primary: Arc<dyn IndexedSource>,
        windowed: Arc<dyn WindowedSource>,
        access_groups: Arc<dyn AccessGroupSource>,
    ) -> Self {
        let liveness = Liveness::new();
        info!(owner = %owner.short(), "session opened");
        Self {
            registry: AccessGroupRegistry::new(access_groups, owner.clone(), liveness.clone()),
            fetcher: ThreadFetcher::new(primary.clone(), windowed.clone()),
            owner,
            mode,
            primary,
            windowed,
            aggregator: Mutex::new(ConversationAggregator::new()),
            liveness,
        }
    }

    pub fn owner(&self) -> &PublicKeyB58 {
        &self.owner
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Tear down at logout. In-flight work observes the flag and discards
    /// its results.
    pub fn close(&self) {
        info!(owner = %self.owner.short(), "session closed");
        self.liveness.close();
    }

    /// Load one page of a thread: fetch, decrypt (with a single bounded
    /// key-refresh retry), then merge into the conversation map.
    pub async fn load_thread_page(
        &self,
        selector: &ThreadSelector,
        page: &PageState,
    ) -> Result<LoadedPage, EngineError> {
        if !self.liveness.alive() {
            return Err(EngineError::Cancelled);
        }

        let fetched = self.fetcher.fetch_page(selector, page).await?;
        let batch = decrypt_batch(&self.owner, &self.mode, &self.registry, fetched.records).await?;

        if !self.liveness.alive() {
            return Err(EngineError::Cancelled);
        }
        {
            let mut aggregator = self.aggregator.lock().await;
            aggregator.ingest(&batch.messages);
        }

        Ok(LoadedPage {
            messages: batch.messages,
            profiles: fetched.profiles,
            next: fetched.next,
            has_more: fetched.has_more,
        })
    }

    /// Pull the full inbox from the windowed source and rebuild the
    /// conversation list from it.
    pub async fn refresh_inbox(&self) -> Result<Vec<Conversation>, EngineError> {
        if !self.liveness.alive() {
            return Err(EngineError::Cancelled);
        }

        let batch = self.windowed.user_threads(&self.owner).await?;
        let decrypted = decrypt_batch(&self.owner, &self.mode, &self.registry, batch.records).await?;

        if !self.liveness.alive() {
            return Err(EngineError::Cancelled);
        }
        let mut aggregator = self.aggregator.lock().await;
        aggregator.ingest(&decrypted.messages);
        Ok(aggregator
            .sorted_by_recency()
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        let aggregator = self.aggregator.lock().await;
        aggregator
            .sorted_by_recency()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn conversation(&self, key: &ConversationKey) -> Option<Conversation> {
        let aggregator = self.aggregator.lock().await;
        aggregator.get(key).cloned()
    }

    /// Member keys per group for avatar stacks, one lookup per group fanned
    /// out concurrently. Failed lookups are logged and skipped.
    pub async fn group_member_hints(
        &self,
        groups: &[(PublicKeyB58, String)],
        per_group: u32,
    ) -> BTreeMap<(PublicKeyB58, String), Vec<PublicKeyB58>> {
        let lookups = groups.iter().map(|(owner, key_name)| async move {
            match self
                .primary
                .group_members(owner, key_name, per_group)
                .await
            {
                Ok(members) => Some(((owner.clone(), key_name.clone()), members)),
                Err(err) => {
                    warn!(error = %err, group = %owner.short(), "group member lookup failed");
                    None
                }
            }
        });
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
