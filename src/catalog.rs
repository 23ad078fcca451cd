//! Cached catalog records and change-log entries.

use serde::{Deserialize, Serialize};

use crate::types::LogPosition;

/// Active promotion window on a product, in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoWindow {
    /// Promotion start, inclusive.
    pub starts_ms: i64,
    /// Promotion end, inclusive.
    pub ends_ms: i64,
    /// Promotional unit price in cents.
    pub promo_price_cents: i64,
}

impl PromoWindow {
    /// Returns true when `now_ms` falls inside the window.
    pub fn active_at(&self, now_ms: i64) -> bool {
        now_ms >= self.starts_ms && now_ms <= self.ends_ms
    }
}

/// Fully materialized cached entity (customer, product, category or BOM row).
///
/// Records are always replaced whole; there is no partial update path.
/// Fields the engine carries but does not interpret live in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Natural business key: `comcode` for customers, `barcode` for products.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Unit price in cents, when the entity carries one.
    pub price_cents: Option<i64>,
    /// Stock on hand, when the entity carries one.
    pub stock: Option<f64>,
    /// Category codes this entity belongs to.
    pub category_codes: Vec<String>,
    /// Active promotion window, if any.
    pub promo: Option<PromoWindow>,
    /// Opaque passthrough fields.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl EntityRecord {
    /// Minimal record with just a key and name; other fields empty.
    pub fn bare(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            price_cents: None,
            stock: None,
            category_codes: Vec::new(),
            promo: None,
            extra: serde_json::Value::Null,
        }
    }
}

/// Immutable change record from a collection's remote log.
///
/// `position` is monotonically increasing per collection and totally orders
/// all entries for that collection. A tombstone has `deleted = true` and no
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Natural key of the affected entity.
    pub key: String,
    /// Replacement record; `None` for tombstones.
    pub payload: Option<EntityRecord>,
    /// True when this entry deletes the entity.
    pub deleted: bool,
    /// Identifier of the producing device or service.
    pub produced_by: String,
    /// Position in the collection's change log.
    pub position: LogPosition,
}

impl SyncLogEntry {
    /// Upsert entry carrying `payload` at `position`.
    pub fn upsert(position: LogPosition, payload: EntityRecord, produced_by: impl Into<String>) -> Self {
        Self {
            key: payload.key.clone(),
            payload: Some(payload),
            deleted: false,
            produced_by: produced_by.into(),
            position,
        }
    }

    /// Tombstone entry removing `key` at `position`.
    pub fn tombstone(position: LogPosition, key: impl Into<String>, produced_by: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: None,
            deleted: true,
            produced_by: produced_by.into(),
            position,
        }
    }
}
