//! Page fetching for one thread, across two backends.
//!
//! The indexed source is tried first; any failure there (transport, bad
//! body, query error payload) falls back to the windowed REST source. DMs
//! paginate by opaque cursor on the indexed source; group threads advance
//! by timestamp window on both, because the group endpoints do not cursor
//! reliably. Records from either path come back already normalized.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tracing::warn;

use palabre_api::{
    ApiError, DmWindowQuery, GroupWindowQuery, IndexedSource, MessageFilter, MessagesQuery,
    WindowedSource,
};
use palabre_shared::constants::{DEFAULT_KEY_NAME, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use palabre_shared::timestamp::NanoTimestamp;
use palabre_shared::types::{ChatType, PageState, ProfileHint, PublicKeyB58, RawMessageRecord};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadSelector {
    Dm {
        user_owner: PublicKeyB58,
        user_key_name: String,
        party_owner: PublicKeyB58,
        party_key_name: String,
    },
    Group {
        owner: PublicKeyB58,
        key_name: String,
    },
}

impl ThreadSelector {
    pub fn dm(user_owner: PublicKeyB58, party_owner: PublicKeyB58) -> Self {
        ThreadSelector::Dm {
            user_owner,
            user_key_name: DEFAULT_KEY_NAME.into(),
            party_owner,
            party_key_name: DEFAULT_KEY_NAME.into(),
        }
    }

    pub fn group(owner: PublicKeyB58, key_name: impl Into<String>) -> Self {
        ThreadSelector::Group {
            owner,
            key_name: key_name.into(),
        }
    }

    pub fn chat_type(&self) -> ChatType {
        match self {
            ThreadSelector::Dm { .. } => ChatType::Dm,
            ThreadSelector::Group { .. } => ChatType::GroupChat,
        }
    }

    /// The pagination state a fresh load of this thread starts from.
    pub fn initial_page(&self) -> PageState {
        match self {
            ThreadSelector::Dm { .. } => PageState::start_cursor(),
            ThreadSelector::Group { .. } => PageState::start_window(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub records: Vec<RawMessageRecord>,
    pub profiles: BTreeMap<PublicKeyB58, ProfileHint>,
    pub next: PageState,
    pub has_more: bool,
}

pub struct ThreadFetcher {
    primary: Arc<dyn IndexedSource>,
    fallback: Arc<dyn WindowedSource>,
    page_size: u32,
    in_flight: StdMutex<HashSet<ThreadSelector>>,
}

impl ThreadFetcher {
    pub fn new(primary: Arc<dyn IndexedSource>, fallback: Arc<dyn WindowedSource>) -> Self {
        Self {
            primary,
            fallback,
            page_size: DEFAULT_PAGE_SIZE,
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Fetch one page for a thread. At most one fetch per selector may be
    /// outstanding; a second call while one is in flight is rejected with
    /// [`EngineError::FetchInFlight`] and has no effect.
    pub async fn fetch_page(
        &self,
        selector: &ThreadSelector,
        page: &PageState,
    ) -> Result<FetchedPage, EngineError> {
        let _guard = FlightGuard::acquire(&self.in_flight, selector)?;

        match self.try_primary(selector, page).await {
            Ok(fetched) => Ok(fetched),
            Err(err) => {
                warn!(error = %err, "primary source failed, falling back to windowed source");
                self.fallback_page(selector, page)
                    .await
                    .map_err(EngineError::ThreadLoad)
            }
        }
    }

    async fn try_primary(
        &self,
        selector: &ThreadSelector,
        page: &PageState,
    ) -> Result<FetchedPage, ApiError> {
        match selector {
            ThreadSelector::Dm {
                user_owner,
                party_owner,
                ..
            } => {
                let after = match page {
                    PageState::Cursor { after } => after.clone(),
                    PageState::Window { .. } => None,
                };
                let result = self
                    .primary
                    .message_page(MessagesQuery {
                        filter: MessageFilter::DmPair {
                            user_owner: user_owner.clone(),
                            party_owner: party_owner.clone(),
                        },
                        first: self.page_size,
                        after,
                        before: None,
                    })
                    .await?;
                Ok(FetchedPage {
                    records: result.records,
                    profiles: result.profiles,
                    next: PageState::Cursor {
                        after: result.end_cursor,
                    },
                    has_more: result.has_next_page,
                })
            }
            ThreadSelector::Group { owner, key_name } => {
                // Window discipline even on the cursor-capable source.
                let before = window_bound(page);
                let result = self
                    .primary
                    .message_page(MessagesQuery {
                        filter: MessageFilter::Group {
                            owner: owner.clone(),
                            key_name: key_name.clone(),
                        },
                        first: self.page_size,
                        after: None,
                        before: Some(before),
                    })
                    .await?;
                let next_before = oldest_timestamp(&result.records).unwrap_or(before);
                Ok(FetchedPage {
                    has_more: result.has_next_page,
                    records: result.records,
                    profiles: result.profiles,
                    next: PageState::Window {
                        before: Some(next_before),
                    },
                })
            }
        }
    }

    async fn fallback_page(
        &self,
        selector: &ThreadSelector,
        page: &PageState,
    ) -> Result<FetchedPage, ApiError> {
        let before = window_bound(page);
        let batch = match selector {
            ThreadSelector::Dm {
                user_owner,
                user_key_name,
                party_owner,
                party_key_name,
            } => {
                self.fallback
                    .dm_thread_page(DmWindowQuery {
                        user_owner: user_owner.clone(),
                        user_key_name: user_key_name.clone(),
                        party_owner: party_owner.clone(),
                        party_key_name: party_key_name.clone(),
                        start_timestamp: before,
                        max_messages: self.page_size,
                    })
                    .await?
            }
            ThreadSelector::Group { owner, key_name } => {
                self.fallback
                    .group_thread_page(GroupWindowQuery {
                        owner: owner.clone(),
                        key_name: key_name.clone(),
                        start_timestamp: before,
                        max_messages: self.page_size,
                    })
                    .await?
            }
        };

        // The windowed source cannot know whether more pages exist; a full
        // page is the best available signal that they likely do.
        let has_more = batch.records.len() as u32 == self.page_size;
        let next_before = oldest_timestamp(&batch.records).unwrap_or(before);
        Ok(FetchedPage {
            records: batch.records,
            profiles: batch.profiles,
            next: PageState::Window {
                before: Some(next_before),
            },
            has_more,
        })
    }
}

/// The exclusive upper bound for a windowed request. A cursor cannot be
/// translated into a window, so a thread that falls back mid-pagination
/// restarts from now; the merge layer dedupes the overlap.
fn window_bound(page: &PageState) -> NanoTimestamp {
    match page {
        PageState::Window { before: Some(ts) } => *ts,
        _ => NanoTimestamp::now(),
    }
}

fn oldest_timestamp(records: &[RawMessageRecord]) -> Option<NanoTimestamp> {
    records.iter().map(|record| record.message.timestamp).min()
}

struct FlightGuard<'a> {
    set: &'a StdMutex<HashSet<ThreadSelector>>,
    selector: ThreadSelector,
}

impl<'a> FlightGuard<'a> {
    fn acquire(
        set: &'a StdMutex<HashSet<ThreadSelector>>,
        selector: &ThreadSelector,
    ) -> Result<Self, EngineError> {
        let mut in_flight = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(selector.clone()) {
            return Err(EngineError::FetchInFlight);
        }
        Ok(Self {
            set,
            selector: selector.clone(),
        })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.selector);
    }
}
