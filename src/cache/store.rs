use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    api::{FetchError, rest::PageFetcher},
    query::{Page, PageMeta, QueryKey},
    record::Record,
    runtime::events::CacheEvent,
    types::{PageNumber, RequestSeq, SubscriberId},
};

use super::{
    deps::DependencyIndex,
    state::{CollectionState, Status},
};

/// Operation rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Page or page size is zero.
    #[error("invalid query key {key}: {reason}")]
    InvalidKey {
        /// Offending key.
        key: QueryKey,
        /// Which component is out of range.
        reason: &'static str,
    },
    /// No entry exists for the key.
    #[error("no cache entry for {0}")]
    UnknownKey(QueryKey),
}

/// What happens to the visible page while a page switch loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSwitch {
    /// Keep showing the previous page until the new one resolves.
    #[default]
    KeepPrevious,
    /// Clear items and meta immediately.
    Clear,
}

/// Staleness and retention rules applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age after which a ready entry is refetched on its next subscription.
    pub stale_after: Duration,
    /// Keep the last good page when a fetch fails.
    pub keep_data_on_error: bool,
    /// Keep entries with no subscribers around for later reactivation.
    pub retain_idle_entries: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            keep_data_on_error: true,
            retain_idle_entries: true,
        }
    }
}

/// A fetch the caller must run and report back through
/// [`CollectionStore::complete_fetch`].
#[derive(Clone)]
pub struct FetchOrder {
    /// Key to fetch.
    pub key: QueryKey,
    /// Request token to hand back.
    pub seq: RequestSeq,
    /// Fetcher of the entry.
    pub fetcher: Arc<dyn PageFetcher>,
}

impl std::fmt::Debug for FetchOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrder")
            .field("key", &self.key)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Result of an invalidation pass.
#[derive(Default)]
pub struct Invalidation {
    /// Every entry marked stale, cascades included.
    pub invalidated: Vec<QueryKey>,
    /// Refetches for the entries that currently have subscribers.
    pub orders: Vec<FetchOrder>,
}

// Page a subscriber keeps seeing after switching to an entry that has not
// resolved yet.
struct Carried {
    items: Vec<Record>,
    meta: PageMeta,
}

struct Viewer {
    tx: watch::Sender<CollectionState>,
    carried: Option<Carried>,
}

struct Entry {
    fetcher: Arc<dyn PageFetcher>,
    state: CollectionState,
    viewers: HashMap<SubscriberId, Viewer>,
    pending: Option<RequestSeq>,
    fetched_at: Option<Instant>,
}

impl Entry {
    fn new(key: QueryKey, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            state: CollectionState::idle(key),
            fetcher,
            viewers: HashMap::new(),
            pending: None,
            fetched_at: None,
        }
    }

    /// Sends the entry state to every viewer, backfilled with the page the
    /// viewer carried over while nothing has resolved here.
    fn publish(&mut self, keep_data_on_error: bool) {
        let settled = match self.state.status {
            Status::Ready => true,
            Status::Errored => !keep_data_on_error,
            Status::Idle | Status::Loading => false,
        };
        for viewer in self.viewers.values_mut() {
            if settled {
                viewer.carried = None;
            }
            viewer.tx.send_replace(view_of(&self.state, viewer.carried.as_ref()));
        }
    }
}

fn view_of(state: &CollectionState, carried: Option<&Carried>) -> CollectionState {
    let mut view = state.clone();
    if let (None, Some(prev)) = (view.meta, carried) {
        view.items = prev.items.clone();
        view.meta = Some(prev.meta);
    }
    view
}

/// Authoritative collection states with request-token bookkeeping.
///
/// Entries are keyed by the full [`QueryKey`]; subscribers of one key share
/// its state. The store performs no I/O: operations that need the network
/// return [`FetchOrder`]s, and only [`CollectionStore::complete_fetch`]
/// applies fetched data.
#[derive(Default)]
pub struct CollectionStore {
    entries: HashMap<QueryKey, Entry>,
    locations: HashMap<SubscriberId, QueryKey>,
    deps: DependencyIndex,
    policy: CachePolicy,
    pending_events: Vec<CacheEvent>,
    next_seq: RequestSeq,
    next_subscriber: SubscriberId,
}

impl CollectionStore {
    /// Empty store applying `policy`.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            next_seq: 1,
            next_subscriber: 1,
            ..Self::default()
        }
    }

    /// Adds a subscriber to `key`, creating its entry on first use.
    ///
    /// A fetch order is returned unless one is already in flight or the
    /// cached page is still fresh. An existing entry keeps its fetcher.
    pub fn subscribe(
        &mut self,
        key: QueryKey,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<(SubscriberId, watch::Receiver<CollectionState>, Option<FetchOrder>), StoreError> {
        validate_key(&key)?;
        self.ensure_entry(&key, fetcher);

        let id = self.next_subscriber;
        self.next_subscriber += 1;

        let policy = self.policy;
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| StoreError::UnknownKey(key.clone()))?;
        let (tx, rx) = watch::channel(entry.state.clone());
        entry.viewers.insert(id, Viewer { tx, carried: None });
        self.locations.insert(id, key.clone());

        let order = if needs_fetch(entry, &policy) {
            Some(self.begin_fetch(&key)?)
        } else {
            None
        };
        Ok((id, rx, order))
    }

    /// Drops subscriber `id`. When it was the last one of its key, any
    /// pending request is abandoned and the entry is marked stale.
    pub fn release(&mut self, id: SubscriberId) {
        let Some(key) = self.locations.remove(&id) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.viewers.remove(&id);
        if entry.viewers.is_empty() {
            self.retire(&key);
        }
    }

    /// Starts a new fetch for `key`; the newest request wins.
    pub fn refetch(&mut self, key: &QueryKey) -> Result<FetchOrder, StoreError> {
        self.begin_fetch(key)
    }

    /// Moves every subscriber of `key` to page `page` of the same
    /// collection.
    ///
    /// Subscribers keep seeing the previous page until the new one resolves
    /// unless `switch` is [`PageSwitch::Clear`]. The entry left behind stays
    /// cached, and its in-flight request is abandoned.
    pub fn set_page(
        &mut self,
        key: &QueryKey,
        page: PageNumber,
        switch: PageSwitch,
    ) -> Result<Option<FetchOrder>, StoreError> {
        let policy = self.policy;
        let source = self
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey(key.clone()))?;
        let target = key.clone().with_page(page);
        validate_key(&target)?;

        if target == *key {
            return if needs_fetch(source, &policy) {
                self.begin_fetch(key).map(Some)
            } else {
                Ok(None)
            };
        }

        let previous = source.state.meta.map(|meta| (source.state.items.clone(), meta));
        let moved: Vec<(SubscriberId, Viewer)> = source.viewers.drain().collect();
        if moved.is_empty() {
            return Ok(None);
        }
        let fetcher = Arc::clone(&source.fetcher);
        debug!(from = %key, to = %target, subscribers = moved.len(), "switching page");

        self.ensure_entry(&target, fetcher);
        for (id, mut viewer) in moved {
            viewer.carried = match (switch, &previous) {
                (PageSwitch::Clear, _) => None,
                (PageSwitch::KeepPrevious, Some((items, meta))) => Some(Carried {
                    items: items.clone(),
                    meta: *meta,
                }),
                (PageSwitch::KeepPrevious, None) => viewer.carried.take(),
            };
            self.locations.insert(id, target.clone());
            if let Some(entry) = self.entries.get_mut(&target) {
                entry.viewers.insert(id, viewer);
            }
        }
        self.retire(key);

        let entry = self
            .entries
            .get_mut(&target)
            .ok_or_else(|| StoreError::UnknownKey(target.clone()))?;
        if entry.viewers.is_empty() {
            return Ok(None);
        }
        if needs_fetch(entry, &policy) {
            self.begin_fetch(&target).map(Some)
        } else {
            entry.publish(policy.keep_data_on_error);
            Ok(None)
        }
    }

    /// Marks every entry whose key matches `predicate` stale, plus entries
    /// that declared a dependency on a matched resource.
    pub fn invalidate(&mut self, predicate: &dyn Fn(&QueryKey) -> bool) -> Invalidation {
        let seed = self
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        self.invalidate_keys(seed, None)
    }

    /// Marks every entry of `resource` stale, plus entries that declared a
    /// dependency on it.
    pub fn invalidate_resource(&mut self, resource: &str) -> Invalidation {
        let seed = self
            .entries
            .keys()
            .filter(|key| key.resource == resource)
            .cloned()
            .collect();
        self.invalidate_keys(seed, Some(resource.to_string()))
    }

    /// Applies the outcome of fetch `seq`. Returns false when the response
    /// was stale and dropped.
    pub fn complete_fetch(
        &mut self,
        key: QueryKey,
        seq: RequestSeq,
        result: Result<Page, FetchError>,
    ) -> bool {
        let keep_data_on_error = self.policy.keep_data_on_error;

        let Some(entry) = self
            .entries
            .get_mut(&key)
            .filter(|entry| entry.pending == Some(seq))
        else {
            debug!(%key, seq, "discarding stale response");
            self.pending_events
                .push(CacheEvent::StaleResponseDiscarded { key, seq });
            return false;
        };
        entry.pending = None;

        let state = &mut entry.state;
        match result {
            Ok(page) => {
                entry.fetched_at = Some(Instant::now());
                state.items = page.data;
                state.meta = Some(page.meta.normalized());
                state.error = None;
                state.status = Status::Ready;
                state.loading = false;
                state.stale = false;
                state.fetched_at_ms = Some(now_ms());
                debug!(%key, seq, "fetch applied");
                self.pending_events
                    .push(CacheEvent::FetchSucceeded { key, seq });
            }
            Err(error) => {
                warn!(%key, seq, %error, "fetch failed");
                if !keep_data_on_error {
                    state.items.clear();
                    state.meta = None;
                }
                state.error = Some(error.clone());
                state.status = Status::Errored;
                state.loading = false;
                self.pending_events
                    .push(CacheEvent::FetchFailed { key, seq, error });
            }
        }
        entry.publish(keep_data_on_error);
        true
    }

    /// Raw entry state, without any carried-over page.
    pub fn state(&self, key: &QueryKey) -> Option<CollectionState> {
        self.entries.get(key).map(|entry| entry.state.clone())
    }

    /// Subscribers currently following `key`.
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.viewers.len())
    }

    /// Key subscriber `id` currently follows.
    pub fn location(&self, id: SubscriberId) -> Option<&QueryKey> {
        self.locations.get(&id)
    }

    /// True when `key` has an entry.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared dependency index.
    pub fn dependencies(&self) -> &DependencyIndex {
        &self.deps
    }

    /// Takes the events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Most recently issued request token.
    pub fn latest_seq(&self) -> RequestSeq {
        self.next_seq.saturating_sub(1)
    }

    fn ensure_entry(&mut self, key: &QueryKey, fetcher: Arc<dyn PageFetcher>) {
        if self.entries.contains_key(key) {
            return;
        }
        self.deps.link(key, fetcher.dependencies(key));
        self.entries
            .insert(key.clone(), Entry::new(key.clone(), fetcher));
    }

    // Called once an entry has lost its last subscriber.
    fn retire(&mut self, key: &QueryKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(seq) = entry.pending.take() {
            debug!(%key, seq, "last subscriber left, abandoning fetch");
            let state = &mut entry.state;
            state.loading = false;
            state.stale = true;
            state.status = state.settled_status();
        }

        if !self.policy.retain_idle_entries {
            self.entries.remove(key);
            self.deps.unlink(key);
            self.pending_events
                .push(CacheEvent::Evicted { key: key.clone() });
        }
    }

    fn invalidate_keys(&mut self, seed: HashSet<QueryKey>, root: Option<String>) -> Invalidation {
        let impacted = self.deps.expand(seed, root);
        let mut out = Invalidation::default();

        for key in impacted {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            entry.state.stale = true;
            let live = !entry.viewers.is_empty();
            debug!(%key, live, "invalidated");

            self.pending_events
                .push(CacheEvent::Invalidated { key: key.clone() });
            if live {
                if let Ok(order) = self.begin_fetch(&key) {
                    out.orders.push(order);
                }
            }
            out.invalidated.push(key);
        }

        out
    }

    fn begin_fetch(&mut self, key: &QueryKey) -> Result<FetchOrder, StoreError> {
        let seq = self.take_next_seq();
        let keep_data_on_error = self.policy.keep_data_on_error;
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey(key.clone()))?;

        if let Some(prev) = entry.pending.replace(seq) {
            debug!(%key, prev, seq, "superseding in-flight fetch");
        }
        entry.state.status = Status::Loading;
        entry.state.loading = true;
        entry.publish(keep_data_on_error);

        self.pending_events.push(CacheEvent::FetchStarted {
            key: key.clone(),
            seq,
        });
        Ok(FetchOrder {
            key: key.clone(),
            seq,
            fetcher: Arc::clone(&entry.fetcher),
        })
    }

    fn take_next_seq(&mut self) -> RequestSeq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

fn needs_fetch(entry: &Entry, policy: &CachePolicy) -> bool {
    if entry.pending.is_some() {
        return false;
    }
    if entry.state.stale || entry.state.status != Status::Ready {
        return true;
    }
    entry
        .fetched_at
        .is_none_or(|at| at.elapsed() >= policy.stale_after)
}

fn validate_key(key: &QueryKey) -> Result<(), StoreError> {
    let reason = if key.page == 0 {
        "page numbers start at 1"
    } else if key.take == 0 {
        "page size must be positive"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidKey {
        key: key.clone(),
        reason,
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
