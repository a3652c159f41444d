//! Paginated collection cache state.

/// Resource dependency index used for cascaded invalidation.
pub mod deps;
/// Collection state published to subscribers.
pub mod state;
/// Single-writer collection store.
pub mod store;
