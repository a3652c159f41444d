//! Runtime event stream payloads.

use crate::{
    api::FetchError,
    query::QueryKey,
    types::RequestSeq,
};

/// Events emitted from the single-writer cache loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A network fetch was issued.
    FetchStarted {
        /// Key being fetched.
        key: QueryKey,
        /// Request token.
        seq: RequestSeq,
    },
    /// A fetch resolved and its page was applied.
    FetchSucceeded {
        /// Key that was fetched.
        key: QueryKey,
        /// Request token.
        seq: RequestSeq,
    },
    /// A fetch was rejected and the error was stored.
    FetchFailed {
        /// Key that was fetched.
        key: QueryKey,
        /// Request token.
        seq: RequestSeq,
        /// Error as reported by the fetcher.
        error: FetchError,
    },
    /// A response arrived after a newer request (or after every
    /// subscriber left) and was dropped.
    StaleResponseDiscarded {
        /// Key of the dropped response.
        key: QueryKey,
        /// Token of the dropped response.
        seq: RequestSeq,
    },
    /// An entry was marked stale.
    Invalidated {
        /// Entry that went stale.
        key: QueryKey,
    },
    /// An idle entry was dropped.
    Evicted {
        /// Entry that was dropped.
        key: QueryKey,
    },
}
