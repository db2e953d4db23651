//! Turns saved-list notifications into work for the engine.
//!
//! Notification payloads can be stale by the time they are processed, so the
//! list's current membership always wins.

use std::collections::BTreeSet;

use tracing::debug;

use crate::app::Result;
use crate::domain::CachedState;
use crate::store::{CacheStore, ListChange, SavedList};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_fetch: BTreeSet<String>,
    pub to_purge: BTreeSet<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_purge.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    retry_partial: bool,
}

impl Reconciler {
    pub fn new(retry_partial: bool) -> Self {
        Self { retry_partial }
    }

    /// Split a batch against current membership. An added key that is gone
    /// again is dropped, as is a removed key that came back.
    pub fn delta(change: &ListChange, current: &BTreeSet<String>) -> Delta {
        let to_fetch: BTreeSet<String> = change.added.intersection(current).cloned().collect();
        let to_purge: BTreeSet<String> = change.removed.difference(current).cloned().collect();

        let stale = change.added.len() + change.removed.len() - to_fetch.len() - to_purge.len();
        if stale > 0 {
            debug!(stale, "Dropped stale list changes");
        }
        Delta { to_fetch, to_purge }
    }

    /// Whether an item in `state` still needs a download
    pub fn needs_fetch(&self, state: CachedState) -> bool {
        match state {
            CachedState::Complete => false,
            CachedState::Partial => self.retry_partial,
            CachedState::Unknown | CachedState::Failed => true,
        }
    }

    /// Every current key that is not fully cached. A recorded state is only
    /// trusted while the article is still in `cache`.
    pub fn uncached(
        &self,
        list: &dyn SavedList,
        cache: &dyn CacheStore,
    ) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for key in list.current_keys()? {
            let state = list.cached_state(&key)?;
            if self.needs_fetch(state) {
                keys.insert(key);
                continue;
            }
            if !cache.exists(&key)? {
                debug!(key = %key, ?state, "Cached article missing");
                keys.insert(key);
            }
        }
        Ok(keys)
    }
}
