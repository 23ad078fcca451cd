use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::{HashMap, HashSet};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::{Duration, Instant},
};

use crate::{
    catalog::{EntityRecord, SyncLogEntry},
    core::store::{Applied, CatalogStore},
    dispatch::{self, DispatchSummary, SharedGateway},
    outbox::{BatchStatus, DraftRecord, OutboxBatch, OutboxDraft},
    persist::{sqlite::SqliteStore, PersistError},
    remote::{OrderGateway, RemoteCatalog, RemoteError, RemoteResult},
    types::{BatchId, Collection},
};

use super::events::{SyncEvent, SyncMode, SyncPhase, SyncStatus};

/// Errors surfaced by handle calls.
#[derive(Debug)]
pub enum RuntimeError {
    /// The local store failed; sync cannot proceed without it.
    Persist(PersistError),
    /// A remote collaborator failed in a way the engine could not absorb.
    Remote(RemoteError),
    /// The coordinator loop is gone.
    ChannelClosed,
}

impl From<PersistError> for RuntimeError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

impl From<RemoteError> for RuntimeError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Persist(e) => write!(f, "{e}"),
            RuntimeError::Remote(e) => write!(f, "{e}"),
            RuntimeError::ChannelClosed => f.write_str("sync coordinator is not running"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Guard timer racing the whole initial-sync sequence.
    pub sync_timeout_ms: u64,
    /// Draft autosave coalescing window.
    pub draft_debounce_ms: u64,
    /// Bound of the internal tail funnel channel.
    pub tail_queue_bound: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 30_000,
            draft_debounce_ms: 400,
            tail_queue_bound: 256,
        }
    }
}

type SharedRemote = Arc<Mutex<Box<dyn RemoteCatalog>>>;

struct Shared {
    mirror: RwLock<CatalogStore>,
    status: RwLock<SyncStatus>,
}

/// Cloneable handle to a spawned sync coordinator.
///
/// Mutations and store reads go through the single-writer loop; `status` and
/// the collection accessors read a shared snapshot mirror synchronously so
/// the UI never waits on a sync in flight.
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
    shared: Arc<Shared>,
}

impl Clone for SyncHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Command {
    RunSync {
        mode: SyncMode,
        resp: oneshot::Sender<Result<SyncStatus, RuntimeError>>,
    },
    SaveDraft {
        key: String,
        payload: serde_json::Value,
        resp: oneshot::Sender<()>,
    },
    FlushDrafts {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    LoadDraft {
        key: String,
        resp: oneshot::Sender<Result<Option<DraftRecord>, RuntimeError>>,
    },
    DiscardDraft {
        key: String,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    CreateBatch {
        draft: OutboxDraft,
        resp: oneshot::Sender<Result<OutboxBatch, RuntimeError>>,
    },
    UpdateBatch {
        batch: OutboxBatch,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    ListBatches {
        resp: oneshot::Sender<Result<Vec<OutboxBatch>, RuntimeError>>,
    },
    DeleteBatches {
        ids: Vec<BatchId>,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    CountByStatus {
        status: BatchStatus,
        resp: oneshot::Sender<Result<u32, RuntimeError>>,
    },
    SendBatches {
        ids: Vec<BatchId>,
        resp: oneshot::Sender<Result<DispatchSummary, RuntimeError>>,
    },
    RestoreBackups {
        resp: oneshot::Sender<Result<RemoteResult<Vec<OutboxBatch>>, RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Spawns the sync coordinator and returns its handle.
///
/// The persisted cache is loaded into the mirror immediately so reads work
/// before (and regardless of) any network sync. Collaborators are injected
/// here once; the engine holds no ambient service state.
pub fn spawn_tillsync(
    store: SqliteStore,
    remote: Box<dyn RemoteCatalog>,
    gateway: Box<dyn OrderGateway>,
    config: SyncConfig,
) -> SyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<SyncEvent>(1024);
    let shared = Arc::new(Shared {
        mirror: RwLock::new(CatalogStore::new()),
        status: RwLock::new(SyncStatus {
            phase: SyncPhase::LoadingCache,
            progress_percent: 0,
            status_text: "loading cached data".to_string(),
        }),
    });

    let (tail_tx, mut tail_rx) = mpsc::channel::<(Collection, SyncLogEntry)>(config.tail_queue_bound);

    let mut coord = Coordinator {
        store,
        remote: Arc::new(Mutex::new(remote)),
        gateway: Arc::new(Mutex::new(gateway)),
        shared: Arc::clone(&shared),
        events_tx: events_tx.clone(),
        config,
        tail_tx,
        tail_tasks: Vec::new(),
        pending_drafts: HashMap::new(),
        offered_drafts: HashSet::new(),
        warned: false,
    };

    tokio::spawn(async move {
        if let Err(err) = coord.load_cache() {
            tracing::warn!(%err, "failed to load persisted cache");
            coord.warn_once(format!("local store unavailable: {err}"));
        }
        coord.set_phase(SyncPhase::Idle, String::new());

        let mut draft_deadline = Instant::now();
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if coord.handle_command(cmd, &mut draft_deadline).await {
                        break;
                    }
                }
                entry = tail_rx.recv() => {
                    if let Some((collection, entry)) = entry {
                        coord.apply_tail_entry(collection, entry);
                    }
                }
                _ = tokio::time::sleep_until(draft_deadline), if !coord.pending_drafts.is_empty() => {
                    if let Err(err) = coord.flush_pending_drafts() {
                        tracing::warn!(%err, "draft autosave failed");
                    }
                }
            }
        }

        coord.drop_tails().await;
    });

    SyncHandle {
        cmd_tx,
        events_tx,
        shared,
    }
}

impl SyncHandle {
    /// Subscribes to the coordinator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Point-in-time status snapshot. Never blocks on a sync in flight.
    pub fn status(&self) -> SyncStatus {
        self.shared.status.read().expect("status lock poisoned").clone()
    }

    /// Last-known snapshot of a collection, in stable order.
    pub fn collection(&self, collection: Collection) -> Vec<EntityRecord> {
        self.shared
            .mirror
            .read()
            .expect("mirror lock poisoned")
            .collection_cloned(collection)
    }

    /// Last-known snapshot of one entity by natural key.
    pub fn entity(&self, collection: Collection, key: &str) -> Option<EntityRecord> {
        self.shared
            .mirror
            .read()
            .expect("mirror lock poisoned")
            .get(collection, key)
            .cloned()
    }

    /// Cached records carrying a category code.
    pub fn by_category(&self, collection: Collection, code: &str) -> Vec<EntityRecord> {
        self.shared
            .mirror
            .read()
            .expect("mirror lock poisoned")
            .by_category_cloned(collection, code)
    }

    /// Runs an initial sync and resolves with the resulting status.
    ///
    /// Remote failures and guard-timer expiry resolve `Ok` — the status and
    /// the event stream carry the outcome; only a broken local store errors.
    pub async fn run_sync(&self, mode: SyncMode) -> Result<SyncStatus, RuntimeError> {
        self.request(|resp| Command::RunSync { mode, resp }).await?
    }

    /// Debounced draft save; the last payload within the window wins.
    pub async fn save_draft(
        &self,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), RuntimeError> {
        self.request(|resp| Command::SaveDraft {
            key: key.into(),
            payload,
            resp,
        })
        .await
    }

    /// Forces pending draft saves to disk. Intended for deterministic tests
    /// and teardown paths.
    pub async fn flush_drafts(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::FlushDrafts { resp }).await?
    }

    /// Offers a stored draft back, at most once per engine instance.
    pub async fn load_draft(&self, key: impl Into<String>) -> Result<Option<DraftRecord>, RuntimeError> {
        self.request(|resp| Command::LoadDraft { key: key.into(), resp }).await?
    }

    /// Discards a draft without promoting it.
    pub async fn discard_draft(&self, key: impl Into<String>) -> Result<(), RuntimeError> {
        self.request(|resp| Command::DiscardDraft { key: key.into(), resp }).await?
    }

    /// Authors a new outbox batch; the store assigns its id.
    pub async fn create_batch(&self, draft: OutboxDraft) -> Result<OutboxBatch, RuntimeError> {
        self.request(|resp| Command::CreateBatch { draft, resp }).await?
    }

    /// Rewrites an existing outbox batch.
    pub async fn update_batch(&self, batch: OutboxBatch) -> Result<(), RuntimeError> {
        self.request(|resp| Command::UpdateBatch { batch, resp }).await?
    }

    /// All outbox batches, newest first.
    pub async fn list_batches(&self) -> Result<Vec<OutboxBatch>, RuntimeError> {
        self.request(|resp| Command::ListBatches { resp }).await?
    }

    /// Deletes outbox batches by id.
    pub async fn delete_batches(&self, ids: Vec<BatchId>) -> Result<(), RuntimeError> {
        self.request(|resp| Command::DeleteBatches { ids, resp }).await?
    }

    /// Number of outbox batches in a lifecycle state.
    pub async fn count_by_status(&self, status: BatchStatus) -> Result<u32, RuntimeError> {
        self.request(|resp| Command::CountByStatus { status, resp }).await?
    }

    /// Dispatches the selected batches; always resolves with a summary.
    pub async fn send_batches(&self, ids: Vec<BatchId>) -> Result<DispatchSummary, RuntimeError> {
        self.request(|resp| Command::SendBatches { ids, resp }).await?
    }

    /// Restores sent batches from the backup channel under fresh ids.
    pub async fn restore_from_backup(
        &self,
    ) -> Result<RemoteResult<Vec<OutboxBatch>>, RuntimeError> {
        self.request(|resp| Command::RestoreBackups { resp }).await?
    }

    /// Stops the coordinator, flushing drafts and releasing subscriptions.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T, F>(&self, make: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

struct Coordinator {
    store: SqliteStore,
    remote: SharedRemote,
    gateway: SharedGateway,
    shared: Arc<Shared>,
    events_tx: broadcast::Sender<SyncEvent>,
    config: SyncConfig,
    tail_tx: mpsc::Sender<(Collection, SyncLogEntry)>,
    tail_tasks: Vec<JoinHandle<()>>,
    pending_drafts: HashMap<String, serde_json::Value>,
    offered_drafts: HashSet<String>,
    warned: bool,
}

impl Coordinator {
    fn load_cache(&mut self) -> Result<(), PersistError> {
        let mut mirror = self.shared.mirror.write().expect("mirror lock poisoned");
        for collection in Collection::ALL {
            let entities = self.store.load_collection(collection)?;
            let watermark = self.store.watermark(collection)?;
            mirror.hydrate(collection, entities, watermark);
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command, draft_deadline: &mut Instant) -> bool {
        match cmd {
            Command::RunSync { mode, resp } => {
                let res = self.run_sync(mode).await;
                let _ = resp.send(res);
            }
            Command::SaveDraft { key, payload, resp } => {
                self.pending_drafts.insert(key, payload);
                *draft_deadline = Instant::now() + Duration::from_millis(self.config.draft_debounce_ms);
                let _ = resp.send(());
            }
            Command::FlushDrafts { resp } => {
                let _ = resp.send(self.flush_pending_drafts().map_err(RuntimeError::from));
            }
            Command::LoadDraft { key, resp } => {
                let _ = resp.send(self.load_draft_once(&key));
            }
            Command::DiscardDraft { key, resp } => {
                self.pending_drafts.remove(&key);
                let _ = resp.send(self.store.discard_draft(&key).map_err(RuntimeError::from));
            }
            Command::CreateBatch { draft, resp } => {
                let _ = resp.send(self.create_batch(draft));
            }
            Command::UpdateBatch { batch, resp } => {
                let _ = resp.send(self.store.save_batch(&batch).map_err(RuntimeError::from));
            }
            Command::ListBatches { resp } => {
                let _ = resp.send(self.store.list_batches().map_err(RuntimeError::from));
            }
            Command::DeleteBatches { ids, resp } => {
                let mut out = Ok(());
                for id in ids {
                    if let Err(err) = self.store.delete_batch(id) {
                        out = Err(RuntimeError::from(err));
                        break;
                    }
                }
                let _ = resp.send(out);
            }
            Command::CountByStatus { status, resp } => {
                let _ = resp.send(self.store.count_by_status(status).map_err(RuntimeError::from));
            }
            Command::SendBatches { ids, resp } => {
                let res = dispatch::send_batches(&mut self.store, &self.gateway, &ids)
                    .await
                    .map_err(RuntimeError::from);
                if let Ok(summary) = &res {
                    let _ = self.events_tx.send(SyncEvent::BatchesDispatched { summary: *summary });
                }
                let _ = resp.send(res);
            }
            Command::RestoreBackups { resp } => {
                let res = dispatch::restore_from_backup(&mut self.store, &self.gateway)
                    .await
                    .map_err(RuntimeError::from);
                let _ = resp.send(res);
            }
            Command::Shutdown { resp } => {
                if let Err(err) = self.flush_pending_drafts() {
                    tracing::warn!(%err, "draft flush on shutdown failed");
                }
                self.drop_tails().await;
                let _ = resp.send(());
                return true;
            }
        }

        false
    }

    // ---- initial sync --------------------------------------------------

    async fn run_sync(&mut self, mode: SyncMode) -> Result<SyncStatus, RuntimeError> {
        self.warned = false;
        self.drop_tails().await;
        self.set_phase(SyncPhase::Syncing(mode), "starting sync".to_string());

        let timeout = Duration::from_millis(self.config.sync_timeout_ms);
        match tokio::time::timeout(timeout, self.sync_collections(mode)).await {
            Ok(Ok(())) => {
                self.set_progress(100, "up to date".to_string());
                self.set_phase(SyncPhase::Tailing, "listening for changes".to_string());
            }
            Ok(Err(err)) => {
                // Hard local-store failure; remote errors never land here.
                self.set_phase(SyncPhase::Idle, "sync failed".to_string());
                return Err(err);
            }
            Err(_elapsed) => {
                tracing::warn!(timeout_ms = self.config.sync_timeout_ms, "initial sync timed out");
                self.warn_once("sync timed out; showing previously cached data".to_string());
                self.set_phase(SyncPhase::TimedOut, "sync timed out".to_string());
            }
        }

        // Success or timeout, the live tail continues from whatever
        // watermarks were committed.
        self.open_tails().await;
        Ok(self.shared.status.read().expect("status lock poisoned").clone())
    }

    async fn sync_collections(&mut self, mode: SyncMode) -> Result<(), RuntimeError> {
        let total = Collection::ALL.len() as u32;
        let mut remote_failures = 0u32;

        for (idx, collection) in Collection::ALL.into_iter().enumerate() {
            let percent = ((idx as u32) * 100 / total) as u8;
            self.set_progress(percent, format!("syncing {collection}"));

            let full = match mode {
                SyncMode::Full => true,
                SyncMode::Incremental => {
                    let mirror = self.shared.mirror.read().expect("mirror lock poisoned");
                    mirror.watermark(collection).is_none() || mirror.is_empty(collection)
                }
            };

            let outcome = if full {
                self.full_sync(collection).await
            } else {
                self.incremental_sync(collection).await
            };

            match outcome {
                Ok(()) => {}
                Err(RuntimeError::Remote(err)) => {
                    tracing::warn!(%collection, %err, "sync fell back to cached data");
                    remote_failures += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if remote_failures > 0 {
            self.warn_once("could not reach the catalog server; showing cached data".to_string());
        }
        Ok(())
    }

    /// Bulk-reads one collection and replaces its cache.
    ///
    /// The log tip is captured before the bulk read begins, so the bulk
    /// result is at least as fresh as the recorded watermark and entries
    /// created mid-read arrive through the live tail instead of being lost.
    async fn full_sync(&mut self, collection: Collection) -> Result<(), RuntimeError> {
        let tip = self
            .remote_call(move |r| r.current_position(collection))
            .await
            .map_err(RuntimeError::Remote)?;
        let entities = self
            .remote_call(move |r| r.bulk_read(collection))
            .await
            .map_err(RuntimeError::Remote)?;

        self.store.replace_collection(collection, &entities, tip)?;
        {
            let mut mirror = self.shared.mirror.write().expect("mirror lock poisoned");
            mirror.replace_all(collection, entities, tip);
        }
        let _ = self.events_tx.send(SyncEvent::WatermarkAdvanced { collection, position: tip });
        Ok(())
    }

    async fn incremental_sync(&mut self, collection: Collection) -> Result<(), RuntimeError> {
        let since = self
            .shared
            .mirror
            .read()
            .expect("mirror lock poisoned")
            .watermark(collection)
            .unwrap_or(0);

        let mut page = self
            .remote_call(move |r| r.log_since(collection, since))
            .await
            .map_err(RuntimeError::Remote)?;

        page.entries.sort_by_key(|e| e.position);
        for entry in page.entries {
            self.apply_entry(collection, entry)?;
        }
        Ok(())
    }

    /// Durably applies one log entry, then mirrors it. The watermark only
    /// moves once the sqlite transaction has committed.
    fn apply_entry(&mut self, collection: Collection, entry: SyncLogEntry) -> Result<(), RuntimeError> {
        let skip = {
            let mirror = self.shared.mirror.read().expect("mirror lock poisoned");
            mirror.watermark(collection).is_some_and(|wm| entry.position <= wm)
        };
        if skip {
            return Ok(());
        }

        self.store.apply_entry(collection, &entry)?;

        let applied = {
            let mut mirror = self.shared.mirror.write().expect("mirror lock poisoned");
            mirror.apply_entry(collection, &entry)
        };

        if applied != Applied::Skipped {
            let _ = self.events_tx.send(SyncEvent::EntryApplied {
                collection,
                key: entry.key.clone(),
                deleted: entry.deleted,
            });
        }
        let _ = self.events_tx.send(SyncEvent::WatermarkAdvanced {
            collection,
            position: entry.position,
        });
        Ok(())
    }

    // ---- live tail -----------------------------------------------------

    async fn open_tails(&mut self) {
        self.drop_tails().await;

        for collection in Collection::ALL {
            let from = {
                let mirror = self.shared.mirror.read().expect("mirror lock poisoned");
                mirror.watermark(collection)
            };
            // A collection that has never synced has no tail to continue.
            let Some(from) = from else { continue };

            match self.remote_call(move |r| r.subscribe(collection, from)).await {
                Ok(mut tail) => {
                    let tx = self.tail_tx.clone();
                    self.tail_tasks.push(tokio::spawn(async move {
                        while let Some(entry) = tail.recv().await {
                            if tx.send((collection, entry)).await.is_err() {
                                break;
                            }
                        }
                    }));
                }
                Err(err) => {
                    tracing::warn!(%collection, %err, "live tail subscription failed");
                    self.warn_once("live updates unavailable; data may be stale".to_string());
                }
            }
        }
    }

    fn apply_tail_entry(&mut self, collection: Collection, entry: SyncLogEntry) {
        if let Err(err) = self.apply_entry(collection, entry) {
            tracing::warn!(%collection, %err, "failed to apply pushed entry");
            self.warn_once("local store error while applying updates".to_string());
        }
    }

    /// Cancels the forwarder tasks and waits for each to finish, dropping
    /// their `LogTail` receivers. Producers observe the closed channel as
    /// soon as this returns: the deterministic unsubscribe.
    async fn drop_tails(&mut self) {
        for task in self.tail_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }

    // ---- drafts --------------------------------------------------------

    fn flush_pending_drafts(&mut self) -> Result<(), PersistError> {
        for (key, payload) in std::mem::take(&mut self.pending_drafts) {
            self.store.save_draft(&DraftRecord {
                draft_key: key,
                payload,
                last_saved_at_ms: now_ms(),
            })?;
        }
        Ok(())
    }

    fn load_draft_once(&mut self, key: &str) -> Result<Option<DraftRecord>, RuntimeError> {
        // A pending save is newer than anything on disk.
        self.flush_pending_drafts()?;

        if self.offered_drafts.contains(key) {
            return Ok(None);
        }
        let found = self.store.load_draft(key)?;
        if found.is_some() {
            self.offered_drafts.insert(key.to_string());
        }
        Ok(found)
    }

    // ---- outbox --------------------------------------------------------

    fn create_batch(&mut self, draft: OutboxDraft) -> Result<OutboxBatch, RuntimeError> {
        let batch = OutboxBatch {
            id: self.store.take_batch_id()?,
            created_at_ms: now_ms(),
            status: BatchStatus::Draft,
            supplier_ref: draft.supplier_ref,
            date: draft.date,
            line_items: draft.line_items,
            sent_at_ms: None,
        };
        self.store.save_batch(&batch)?;
        Ok(batch)
    }

    // ---- status plumbing -----------------------------------------------

    fn set_phase(&self, phase: SyncPhase, text: String) {
        {
            let mut status = self.shared.status.write().expect("status lock poisoned");
            status.phase = phase;
            status.status_text = text;
        }
        let _ = self.events_tx.send(SyncEvent::PhaseChanged { phase });
    }

    fn set_progress(&self, percent: u8, text: String) {
        {
            let mut status = self.shared.status.write().expect("status lock poisoned");
            status.progress_percent = percent;
            status.status_text = text.clone();
        }
        let _ = self.events_tx.send(SyncEvent::Progress { percent, text });
    }

    fn warn_once(&mut self, message: String) {
        if self.warned {
            return;
        }
        self.warned = true;
        let _ = self.events_tx.send(SyncEvent::Warning { message });
    }

    fn remote_call<T, F>(&self, f: F) -> impl std::future::Future<Output = RemoteResult<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RemoteCatalog) -> RemoteResult<T> + Send + 'static,
    {
        let remote = Arc::clone(&self.remote);
        async move {
            tokio::task::spawn_blocking(move || {
                let mut guard = remote.blocking_lock();
                f(guard.as_mut())
            })
            .await
            .map_err(|e| RemoteError::Transient(format!("join error: {e}")))?
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
