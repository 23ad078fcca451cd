//! Collaborator interfaces consumed by the sync engine.
//!
//! The remote catalog service, change-log service, and order write path are
//! implemented elsewhere; the engine only sees these seams. Implementations
//! are injected at spawn as boxed trait objects — there is no ambient or
//! global service state.

use tokio::sync::mpsc;

use crate::{
    catalog::{EntityRecord, SyncLogEntry},
    outbox::{LineItem, OutboxBatch},
    types::{Collection, LogPosition},
};

/// Errors from remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network-level failure; recoverable by falling back to cache.
    Transient(String),
    /// The server understood the request and refused it.
    Rejected(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transient(m) => write!(f, "remote unavailable: {m}"),
            RemoteError::Rejected(m) => write!(f, "remote rejected request: {m}"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Result alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// One page of log entries with the server's tip position at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct LogPage {
    /// Entries strictly after the requested position, in position order.
    pub entries: Vec<SyncLogEntry>,
    /// Tip position observed by the server while serving the page.
    pub new_position: LogPosition,
}

/// Standing subscription delivering new log entries as they occur.
///
/// Backed by a bounded channel; dropping the tail closes the channel, which
/// is the deterministic unsubscribe the producer observes. No callback is
/// ever retained past the tail's lifetime.
pub struct LogTail {
    rx: mpsc::Receiver<SyncLogEntry>,
}

impl LogTail {
    /// Builds a tail plus the sender half the producer feeds.
    pub fn channel(bound: usize) -> (mpsc::Sender<SyncLogEntry>, LogTail) {
        let (tx, rx) = mpsc::channel(bound);
        (tx, LogTail { rx })
    }

    /// Next pushed entry, or `None` once the producer hung up.
    pub async fn recv(&mut self) -> Option<SyncLogEntry> {
        self.rx.recv().await
    }
}

/// Read side of the central catalog: bulk reads plus the change log.
///
/// Calls may block on the network; the runtime invokes them from a blocking
/// worker, never on the coordinator task itself.
pub trait RemoteCatalog: Send {
    /// Reads an entire remote collection.
    fn bulk_read(&mut self, collection: Collection) -> RemoteResult<Vec<EntityRecord>>;

    /// Entries with position strictly greater than `position`.
    fn log_since(&mut self, collection: Collection, position: LogPosition) -> RemoteResult<LogPage>;

    /// Current tip position of a collection's log.
    fn current_position(&mut self, collection: Collection) -> RemoteResult<LogPosition>;

    /// Opens a live tail from just after `from`.
    fn subscribe(&mut self, collection: Collection, from: LogPosition) -> RemoteResult<LogTail>;
}

/// Write side: the server of record for outbox documents.
pub trait OrderGateway: Send {
    /// Commits one line item to the server of record.
    fn commit_line(&mut self, item: &LineItem) -> RemoteResult<()>;

    /// Pushes a sent copy to the backup channel. Best-effort.
    fn push_backup(&mut self, batch: &OutboxBatch) -> RemoteResult<()>;

    /// Fetches previously backed-up batches for operator restore.
    fn fetch_backups(&mut self) -> RemoteResult<Vec<OutboxBatch>>;
}
