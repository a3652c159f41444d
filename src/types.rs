//! Shared primitive identifiers and counters.

/// Monotonic fetch request token, unique per cache instance.
pub type RequestSeq = u64;
/// Identifier handed to each subscription.
pub type SubscriberId = u64;
/// One-based page number.
pub type PageNumber = u32;
/// Items requested per page (`take` on the wire).
pub type PageSize = u32;
