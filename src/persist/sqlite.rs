//! SQLite-backed local store for cache, watermarks, outbox, and drafts.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    catalog::{EntityRecord, SyncLogEntry},
    outbox::{BatchStatus, DraftRecord, OutboxBatch},
    types::{BatchId, Collection, LogPosition, SchemaVersion},
};

use super::{PersistError, PersistResult};

const META_SCHEMA_VERSION: &str = "schema_version";
const META_NEXT_BATCH_ID: &str = "next_batch_id";

/// Typed persistence over one sqlite database.
///
/// Holds the device's entire offline state: the catalog cache keyed by
/// natural key, per-collection watermarks, the outbox, and form drafts.
/// Opening with a bumped schema version wipes the cache and watermarks
/// (forcing a fresh full sync) but leaves user-authored outbox batches and
/// drafts untouched.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>, schema_version: SchemaVersion) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn, schema_version)
    }

    /// Opens an in-memory store.
    pub fn open_in_memory(schema_version: SchemaVersion) -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, schema_version)
    }

    fn init_connection(conn: Connection, schema_version: SchemaVersion) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let mut store = Self { conn };
        store.reconcile_schema_version(schema_version)?;
        Ok(store)
    }

    fn reconcile_schema_version(&mut self, schema_version: SchemaVersion) -> PersistResult<()> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![META_SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()?;

        let stored_version = stored.and_then(|v| v.parse::<SchemaVersion>().ok());
        if stored_version == Some(schema_version) {
            return Ok(());
        }

        if let Some(old) = stored_version {
            tracing::info!(old, new = schema_version, "schema bump: wiping cache and watermarks");
            self.wipe_catalog()?;
        }

        self.conn.execute(
            "INSERT INTO meta(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![META_SCHEMA_VERSION, schema_version.to_string()],
        )?;
        Ok(())
    }

    /// Deletes all cached entities and watermarks. Outbox and drafts survive.
    pub fn wipe_catalog(&mut self) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cache_entities", [])?;
        tx.execute("DELETE FROM watermarks", [])?;
        tx.commit()?;
        Ok(())
    }

    // ---- catalog cache -------------------------------------------------

    /// Loads a collection's cached records in stable (insertion) order.
    pub fn load_collection(&self, collection: Collection) -> PersistResult<Vec<EntityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM cache_entities WHERE collection = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let payload = row?;
            out.push(serde_json::from_slice::<EntityRecord>(&payload)?);
        }
        Ok(out)
    }

    /// Replaces a collection's rows and sets its watermark to `tip`, in one
    /// transaction so readers never observe a half-replaced collection.
    pub fn replace_collection(
        &mut self,
        collection: Collection,
        entities: &[EntityRecord],
        tip: LogPosition,
    ) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM cache_entities WHERE collection = ?1",
            params![collection.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cache_entities(collection, key, payload) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, key) DO UPDATE SET payload = excluded.payload",
            )?;
            for rec in entities {
                let payload = serde_json::to_vec(rec)?;
                stmt.execute(params![collection.as_str(), rec.key, payload])?;
            }
        }
        upsert_watermark(&tx, collection, tip)?;
        tx.commit()?;
        Ok(())
    }

    /// Durably applies one log entry: the row mutation and the watermark
    /// advance commit atomically (apply-then-advance, never the reverse).
    pub fn apply_entry(&mut self, collection: Collection, entry: &SyncLogEntry) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        if entry.deleted {
            // Removing an absent key is a no-op by design.
            tx.execute(
                "DELETE FROM cache_entities WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), entry.key],
            )?;
        } else if let Some(payload) = &entry.payload {
            let bytes = serde_json::to_vec(payload)?;
            tx.execute(
                "INSERT INTO cache_entities(collection, key, payload) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, key) DO UPDATE SET payload = excluded.payload",
                params![collection.as_str(), entry.key, bytes],
            )?;
        }
        upsert_watermark(&tx, collection, entry.position)?;
        tx.commit()?;
        Ok(())
    }

    // ---- watermarks ----------------------------------------------------

    /// Last applied log position for a collection.
    pub fn watermark(&self, collection: Collection) -> PersistResult<Option<LogPosition>> {
        let pos: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_position FROM watermarks WHERE collection = ?1",
                params![collection.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pos.map(|p| p as LogPosition))
    }

    /// Advances a watermark, clamped to be non-decreasing.
    pub fn advance_watermark(
        &mut self,
        collection: Collection,
        pos: LogPosition,
    ) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        upsert_watermark(&tx, collection, pos)?;
        tx.commit()?;
        Ok(())
    }

    // ---- outbox --------------------------------------------------------

    /// Hands out the next local batch id from the persisted counter.
    ///
    /// A plain `max(id)+1` would recycle ids after the newest batch is
    /// deleted, which the reload-from-backup rule forbids.
    pub fn take_batch_id(&mut self) -> PersistResult<BatchId> {
        let tx = self.conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![META_NEXT_BATCH_ID],
                |row| row.get(0),
            )
            .optional()?;
        // An unparsable counter must not default back to 1: that would
        // recycle ids the counter exists to retire.
        let id: BatchId = match current {
            Some(v) => v
                .parse()
                .map_err(|_| PersistError::Message(format!("corrupt batch id counter: {v}")))?,
            None => 1,
        };
        tx.execute(
            "INSERT INTO meta(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![META_NEXT_BATCH_ID, (id + 1).to_string()],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Inserts or rewrites a batch under its id.
    pub fn save_batch(&mut self, batch: &OutboxBatch) -> PersistResult<()> {
        let line_items = serde_json::to_vec(&batch.line_items)?;
        self.conn.execute(
            "INSERT INTO outbox_batches(id, created_at_ms, status, supplier_ref, date, line_items, sent_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 created_at_ms = excluded.created_at_ms,
                 status = excluded.status,
                 supplier_ref = excluded.supplier_ref,
                 date = excluded.date,
                 line_items = excluded.line_items,
                 sent_at_ms = excluded.sent_at_ms",
            params![
                batch.id as i64,
                batch.created_at_ms,
                batch.status.as_str(),
                batch.supplier_ref,
                batch.date,
                line_items,
                batch.sent_at_ms,
            ],
        )?;
        Ok(())
    }

    /// All batches, newest first.
    pub fn list_batches(&self) -> PersistResult<Vec<OutboxBatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at_ms, status, supplier_ref, date, line_items, sent_at_ms
             FROM outbox_batches ORDER BY created_at_ms DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_batch)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Looks up one batch by id.
    pub fn get_batch(&self, id: BatchId) -> PersistResult<Option<OutboxBatch>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, created_at_ms, status, supplier_ref, date, line_items, sent_at_ms
                 FROM outbox_batches WHERE id = ?1",
                params![id as i64],
                row_to_batch,
            )
            .optional()?;
        found.transpose()
    }

    /// Deletes a batch. Deleting an absent id is a no-op.
    pub fn delete_batch(&mut self, id: BatchId) -> PersistResult<()> {
        self.conn
            .execute("DELETE FROM outbox_batches WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    /// Number of batches in the given lifecycle state.
    pub fn count_by_status(&self, status: BatchStatus) -> PersistResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox_batches WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // ---- drafts --------------------------------------------------------

    /// Writes a draft, overwriting any previous one under the same key.
    pub fn save_draft(&mut self, draft: &DraftRecord) -> PersistResult<()> {
        let payload = serde_json::to_vec(&draft.payload)?;
        self.conn.execute(
            "INSERT INTO drafts(draft_key, payload, last_saved_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(draft_key) DO UPDATE SET
                 payload = excluded.payload,
                 last_saved_at_ms = excluded.last_saved_at_ms",
            params![draft.draft_key, payload, draft.last_saved_at_ms],
        )?;
        Ok(())
    }

    /// Loads a draft by key.
    pub fn load_draft(&self, key: &str) -> PersistResult<Option<DraftRecord>> {
        let row: Option<(Vec<u8>, i64)> = self
            .conn
            .query_row(
                "SELECT payload, last_saved_at_ms FROM drafts WHERE draft_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, last_saved_at_ms)) = row else {
            return Ok(None);
        };
        Ok(Some(DraftRecord {
            draft_key: key.to_string(),
            payload: serde_json::from_slice(&payload)?,
            last_saved_at_ms,
        }))
    }

    /// Removes a draft. Removing an absent key is a no-op.
    pub fn discard_draft(&mut self, key: &str) -> PersistResult<()> {
        self.conn
            .execute("DELETE FROM drafts WHERE draft_key = ?1", params![key])?;
        Ok(())
    }
}

fn upsert_watermark(
    tx: &rusqlite::Transaction<'_>,
    collection: Collection,
    pos: LogPosition,
) -> PersistResult<()> {
    tx.execute(
        "INSERT INTO watermarks(collection, last_position) VALUES (?1, ?2)
         ON CONFLICT(collection) DO UPDATE SET
             last_position = MAX(last_position, excluded.last_position)",
        params![collection.as_str(), pos as i64],
    )?;
    Ok(())
}

fn row_to_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistResult<OutboxBatch>> {
    let id: i64 = row.get(0)?;
    let created_at_ms: i64 = row.get(1)?;
    let status: String = row.get(2)?;
    let supplier_ref: String = row.get(3)?;
    let date: String = row.get(4)?;
    let line_items: Vec<u8> = row.get(5)?;
    let sent_at_ms: Option<i64> = row.get(6)?;

    Ok((|| {
        let status = BatchStatus::from_str_opt(&status)
            .ok_or_else(|| PersistError::Message(format!("unknown batch status: {status}")))?;
        Ok(OutboxBatch {
            id: id as BatchId,
            created_at_ms,
            status,
            supplier_ref,
            date,
            line_items: serde_json::from_slice(&line_items)?,
            sent_at_ms,
        })
    })())
}
