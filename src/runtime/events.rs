//! Coordinator event stream payloads and status snapshots.

use crate::{
    dispatch::DispatchSummary,
    types::{Collection, LogPosition},
};

/// Sync flavour for one run or one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Bulk-read every collection and replace the cache.
    Full,
    /// Fetch and apply log entries past the stored watermarks.
    Incremental,
}

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No sync in flight; cached data is the active dataset.
    Idle,
    /// Loading the persisted cache into the in-memory mirror.
    LoadingCache,
    /// Initial sync in flight.
    Syncing(SyncMode),
    /// Live tail subscription applying entries as they arrive.
    Tailing,
    /// Guard timer fired before initial sync finished; cached data stays
    /// active. Reachable from `Syncing` only.
    TimedOut,
}

/// Point-in-time status snapshot for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Current phase.
    pub phase: SyncPhase,
    /// Initial-sync progress, 0–100.
    pub progress_percent: u8,
    /// Display-ready description of what the engine is doing.
    pub status_text: String,
}

/// Events broadcast from the coordinator loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The coordinator moved to a new phase.
    PhaseChanged {
        /// New phase.
        phase: SyncPhase,
    },
    /// Initial-sync progress advanced.
    Progress {
        /// 0–100.
        percent: u8,
        /// Display-ready description.
        text: String,
    },
    /// One log entry was durably applied to the cache.
    EntryApplied {
        /// Affected collection.
        collection: Collection,
        /// Natural key of the affected entity.
        key: String,
        /// True when the entry was a tombstone.
        deleted: bool,
    },
    /// A collection's watermark advanced.
    WatermarkAdvanced {
        /// Affected collection.
        collection: Collection,
        /// New watermark.
        position: LogPosition,
    },
    /// One-shot, user-visible warning; the engine kept going on cached data.
    Warning {
        /// Display-ready message.
        message: String,
    },
    /// An outbox dispatch run finished.
    BatchesDispatched {
        /// Aggregate outcome.
        summary: DispatchSummary,
    },
}
