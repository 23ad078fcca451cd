//! In-memory catalog mirror and index helpers.

/// Helper index aliases.
pub mod indices;
/// Catalog mirror, deterministic log apply, and watermark tracking.
pub mod store;
