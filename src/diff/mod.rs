//! Partial-update diffing.

/// Patch computation over record snapshots.
pub mod engine;
/// Tolerant field equality rules.
pub mod equality;
