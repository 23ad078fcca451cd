//! Single-writer sync coordinator and its event stream APIs.

/// Event stream payloads and status snapshots.
pub mod events;
/// Handle and coordinator loop implementation.
pub mod handle;
