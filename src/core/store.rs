use hashbrown::HashMap;

use crate::{
    catalog::{EntityRecord, SyncLogEntry},
    core::indices::VecIndex,
    types::{Collection, LogPosition},
};

/// Outcome of applying one log entry to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Entry inserted or replaced a record.
    Upserted,
    /// Tombstone removed a record (or removed nothing; still counts).
    Removed,
    /// Entry position was at or below the watermark and was ignored.
    Skipped,
}

#[derive(Debug, Default)]
struct CollectionCache {
    records: HashMap<String, EntityRecord>,
    order: Vec<String>,
    pos: HashMap<String, usize>,
    by_category: VecIndex<String>,
    watermark: Option<LogPosition>,
}

impl CollectionCache {
    fn replace_all(&mut self, entities: Vec<EntityRecord>) {
        self.records.clear();
        self.order.clear();
        self.pos.clear();
        self.by_category.clear();
        for rec in entities {
            self.insert_new(rec);
        }
    }

    fn insert_new(&mut self, rec: EntityRecord) {
        let key = rec.key.clone();
        // Last write wins on duplicate natural keys.
        if self.records.contains_key(&key) {
            self.remove(&key);
        }
        for code in &rec.category_codes {
            self.by_category.entry(code.clone()).or_default().push(key.clone());
        }
        self.pos.insert(key.clone(), self.order.len());
        self.order.push(key.clone());
        self.records.insert(key, rec);
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(rec) = self.records.remove(key) else {
            return false;
        };
        for code in &rec.category_codes {
            if let Some(keys) = self.by_category.get_mut(code) {
                if let Some(idx) = keys.iter().position(|k| k == key) {
                    keys.remove(idx);
                }
                if keys.is_empty() {
                    self.by_category.remove(code);
                }
            }
        }
        if let Some(idx) = self.pos.remove(key) {
            self.order.remove(idx);
            for k in &self.order[idx..] {
                if let Some(p) = self.pos.get_mut(k) {
                    *p -= 1;
                }
            }
        }
        true
    }
}

/// In-memory mirror of the cached catalog, one bucket per collection.
///
/// The mirror is the only view the UI reads from; it is mutated exclusively
/// through `replace_all` (full sync) and `apply_entry` (incremental/tail),
/// and tracks the per-collection watermark alongside the records so the two
/// can never drift apart in memory.
#[derive(Debug, Default)]
pub struct CatalogStore {
    buckets: HashMap<Collection, CollectionCache>,
}

impl CatalogStore {
    /// Empty mirror with no watermarks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one collection from persisted rows without touching its order
    /// of application guarantees. Used once at startup.
    pub fn hydrate(
        &mut self,
        collection: Collection,
        entities: Vec<EntityRecord>,
        watermark: Option<LogPosition>,
    ) {
        let bucket = self.buckets.entry(collection).or_default();
        bucket.replace_all(entities);
        bucket.watermark = watermark;
    }

    /// Atomically replaces a collection's contents (full sync path) and sets
    /// its watermark to the log tip captured before the bulk read.
    pub fn replace_all(
        &mut self,
        collection: Collection,
        entities: Vec<EntityRecord>,
        tip: LogPosition,
    ) {
        let bucket = self.buckets.entry(collection).or_default();
        bucket.replace_all(entities);
        bucket.watermark = Some(bucket.watermark.unwrap_or(0).max(tip));
    }

    /// Applies one log entry: tombstones remove, everything else upserts.
    ///
    /// Entries at or below the watermark are skipped — the bulk read or an
    /// earlier apply already reflects them — which also makes re-delivery
    /// idempotent. The watermark advances to the entry position on apply.
    pub fn apply_entry(&mut self, collection: Collection, entry: &SyncLogEntry) -> Applied {
        let bucket = self.buckets.entry(collection).or_default();
        if let Some(wm) = bucket.watermark {
            if entry.position <= wm {
                return Applied::Skipped;
            }
        }

        let applied = if entry.deleted {
            bucket.remove(&entry.key);
            Applied::Removed
        } else if let Some(payload) = &entry.payload {
            bucket.insert_new(payload.clone());
            Applied::Upserted
        } else {
            // Malformed non-tombstone without payload; advance past it.
            Applied::Skipped
        };

        bucket.watermark = Some(bucket.watermark.unwrap_or(0).max(entry.position));
        applied
    }

    /// Upserts a record outside the log path (hydration helpers, tests).
    pub fn upsert(&mut self, collection: Collection, rec: EntityRecord) {
        self.buckets.entry(collection).or_default().insert_new(rec);
    }

    /// Removes by natural key. Removing an absent key is a no-op.
    pub fn remove(&mut self, collection: Collection, key: &str) -> bool {
        self.buckets
            .get_mut(&collection)
            .map(|b| b.remove(key))
            .unwrap_or(false)
    }

    /// Looks up one record by natural key.
    pub fn get(&self, collection: Collection, key: &str) -> Option<&EntityRecord> {
        self.buckets.get(&collection)?.records.get(key)
    }

    /// Cloned snapshot of a collection in stable order.
    pub fn collection_cloned(&self, collection: Collection) -> Vec<EntityRecord> {
        let Some(bucket) = self.buckets.get(&collection) else {
            return Vec::new();
        };
        bucket
            .order
            .iter()
            .filter_map(|k| bucket.records.get(k).cloned())
            .collect()
    }

    /// Records carrying the given category code, in stable order.
    pub fn by_category_cloned(&self, collection: Collection, code: &str) -> Vec<EntityRecord> {
        let Some(bucket) = self.buckets.get(&collection) else {
            return Vec::new();
        };
        bucket
            .by_category
            .get(code)
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(|k| bucket.records.get(k).cloned())
            .collect()
    }

    /// Number of cached records in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.buckets.get(&collection).map(|b| b.records.len()).unwrap_or(0)
    }

    /// True when the collection holds no records.
    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// Last applied log position for a collection, if any.
    pub fn watermark(&self, collection: Collection) -> Option<LogPosition> {
        self.buckets.get(&collection).and_then(|b| b.watermark)
    }

    /// Advances a watermark, clamped to be non-decreasing. Returns the
    /// effective watermark after the call.
    pub fn advance_watermark(&mut self, collection: Collection, pos: LogPosition) -> LogPosition {
        let bucket = self.buckets.entry(collection).or_default();
        let next = bucket.watermark.unwrap_or(0).max(pos);
        bucket.watermark = Some(next);
        next
    }

    /// Drops all records and watermarks (schema bump path).
    pub fn wipe(&mut self) {
        self.buckets.clear();
    }
}

/// Deterministic reduction of ordered log entries into a keyed map.
///
/// Entries are folded strictly in `position` order; the result for each key
/// is the payload of its highest-position non-tombstone entry, or absence if
/// the highest-position entry is a tombstone. This is the pure-function core
/// of the incremental apply path.
pub fn reduce_log(entries: &[SyncLogEntry]) -> HashMap<String, EntityRecord> {
    let mut sorted: Vec<&SyncLogEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.position);

    let mut out: HashMap<String, EntityRecord> = HashMap::new();
    for entry in sorted {
        if entry.deleted {
            out.remove(&entry.key);
        } else if let Some(payload) = &entry.payload {
            out.insert(entry.key.clone(), payload.clone());
        }
    }
    out
}
