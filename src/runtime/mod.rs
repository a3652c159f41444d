//! Single-writer async cache runtime and event stream APIs.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle, subscriptions, and command loop implementation.
pub mod handle;
