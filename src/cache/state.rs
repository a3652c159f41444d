//! Per-key collection state.

use crate::{
    api::FetchError,
    query::{PageMeta, QueryKey},
    record::Record,
};

/// Lifecycle of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Never fetched, or the only fetch was cancelled.
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last applied fetch succeeded.
    Ready,
    /// The last applied fetch failed.
    Errored,
}

/// Snapshot of one query key as its subscribers see it.
///
/// After a page switch, `key` is already the new key while `items` and
/// `meta` may still hold the previous page until the new one resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    /// Key the subscriber currently follows.
    pub key: QueryKey,
    /// Lifecycle status.
    pub status: Status,
    /// Items in server order.
    pub items: Vec<Record>,
    /// Pagination metadata of `items`.
    pub meta: Option<PageMeta>,
    /// True while a fetch is in flight.
    pub loading: bool,
    /// Error of the last failed fetch.
    pub error: Option<FetchError>,
    /// Unix milliseconds of the last successful fetch.
    pub fetched_at_ms: Option<u64>,
    /// Marked by invalidation or an abandoned fetch.
    pub stale: bool,
}

impl CollectionState {
    /// Empty state for a key never fetched.
    pub fn idle(key: QueryKey) -> Self {
        Self {
            key,
            status: Status::Idle,
            items: Vec::new(),
            meta: None,
            loading: false,
            error: None,
            fetched_at_ms: None,
            stale: false,
        }
    }

    /// Status to fall back to when a pending fetch is abandoned.
    pub(crate) fn settled_status(&self) -> Status {
        if self.error.is_some() {
            Status::Errored
        } else if self.meta.is_some() {
            Status::Ready
        } else {
            Status::Idle
        }
    }
}
