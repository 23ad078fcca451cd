//! Offline-first retail catalog sync with a local SQLite cache and outbox.
//!
//! The engine keeps a store-floor device usable without a network: it
//! bootstraps the catalog from cache or a bulk read, stays current through a
//! monotonic change log plus a live tail subscription, persists in-progress
//! form drafts, and drains an outbox of locally authored documents to the
//! server of record with partial-failure recovery.
//!
//! # Examples
//!
//! In-memory mirror usage with [`core::store::CatalogStore`]:
//! ```
//! use tillsync::{
//!     catalog::{EntityRecord, SyncLogEntry},
//!     core::store::CatalogStore,
//!     types::Collection,
//! };
//!
//! let mut store = CatalogStore::new();
//! store.replace_all(
//!     Collection::Products,
//!     vec![EntityRecord::bare("5000112637922", "Cola 330ml")],
//!     7,
//! );
//! store.apply_entry(
//!     Collection::Products,
//!     &SyncLogEntry::tombstone(8, "5000112637922", "server"),
//! );
//! assert!(store.get(Collection::Products, "5000112637922").is_none());
//! assert_eq!(store.watermark(Collection::Products), Some(8));
//! ```
//!
//! Runtime usage with a SQLite store and injected collaborators:
//! ```no_run
//! use tillsync::{
//!     catalog::EntityRecord,
//!     outbox::{LineItem, OutboxBatch},
//!     persist::sqlite::SqliteStore,
//!     remote::{LogPage, LogTail, OrderGateway, RemoteCatalog, RemoteResult},
//!     runtime::{
//!         events::SyncMode,
//!         handle::{spawn_tillsync, SyncConfig},
//!     },
//!     types::{Collection, LogPosition},
//! };
//!
//! struct Catalog;
//! impl RemoteCatalog for Catalog {
//!     fn bulk_read(&mut self, _: Collection) -> RemoteResult<Vec<EntityRecord>> {
//!         Ok(vec![])
//!     }
//!     fn log_since(&mut self, _: Collection, p: LogPosition) -> RemoteResult<LogPage> {
//!         Ok(LogPage { entries: vec![], new_position: p })
//!     }
//!     fn current_position(&mut self, _: Collection) -> RemoteResult<LogPosition> {
//!         Ok(0)
//!     }
//!     fn subscribe(&mut self, _: Collection, _: LogPosition) -> RemoteResult<LogTail> {
//!         let (_tx, tail) = LogTail::channel(16);
//!         Ok(tail)
//!     }
//! }
//!
//! struct Orders;
//! impl OrderGateway for Orders {
//!     fn commit_line(&mut self, _: &LineItem) -> RemoteResult<()> {
//!         Ok(())
//!     }
//!     fn push_backup(&mut self, _: &OutboxBatch) -> RemoteResult<()> {
//!         Ok(())
//!     }
//!     fn fetch_backups(&mut self) -> RemoteResult<Vec<OutboxBatch>> {
//!         Ok(vec![])
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteStore::open("till.db", 1).expect("open store");
//! let handle = spawn_tillsync(store, Box::new(Catalog), Box::new(Orders), SyncConfig::default());
//! handle.run_sync(SyncMode::Incremental).await.expect("sync");
//! println!("{} products cached", handle.collection(Collection::Products).len());
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Cached catalog records and change-log entries.
pub mod catalog;
/// In-memory catalog mirror and index helpers.
pub mod core;
/// Outbox dispatch with partial-failure recovery.
pub mod dispatch;
/// Outbox documents and resumable drafts.
pub mod outbox;
/// Persistence for cache, watermarks, outbox, and drafts.
pub mod persist;
/// Collaborator interfaces implemented outside the engine.
pub mod remote;
/// Single-writer sync coordinator handle and events.
pub mod runtime;
/// Shared primitive types and the collection enum.
pub mod types;
