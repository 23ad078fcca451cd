//! Locally authored outbox documents and resumable drafts.

use serde::{Deserialize, Serialize};

use crate::types::BatchId;

/// Lifecycle state of an outbox batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Authored locally, not yet accepted by the server of record.
    Draft,
    /// Every line item durably accepted by the remote write path.
    Sent,
}

impl BatchStatus {
    /// Stable storage name used in sqlite rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Draft => "draft",
            BatchStatus::Sent => "sent",
        }
    }

    /// Parses a stable storage name back into a status.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(BatchStatus::Draft),
            "sent" => Some(BatchStatus::Sent),
            _ => None,
        }
    }
}

/// One received or ordered item inside an outbox batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product barcode.
    pub barcode: String,
    /// Quantity received or ordered.
    pub quantity: f64,
    /// Unit cost in cents, when captured.
    pub unit_cost_cents: Option<i64>,
}

/// Locally authored document pending confirmed transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxBatch {
    /// Locally generated identifier, unique within this store.
    pub id: BatchId,
    /// Creation time in epoch milliseconds.
    pub created_at_ms: i64,
    /// Lifecycle state.
    pub status: BatchStatus,
    /// Supplier reference the batch was received against.
    pub supplier_ref: String,
    /// Business date, ISO `YYYY-MM-DD`.
    pub date: String,
    /// Contained line items, in commit order.
    pub line_items: Vec<LineItem>,
    /// Time every line item was accepted, epoch milliseconds.
    pub sent_at_ms: Option<i64>,
}

/// Insert payload used to author a new [`OutboxBatch`].
///
/// The store assigns the id from its monotonic counter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxDraft {
    /// Supplier reference.
    pub supplier_ref: String,
    /// Business date, ISO `YYYY-MM-DD`.
    pub date: String,
    /// Line items, in commit order.
    pub line_items: Vec<LineItem>,
}

/// Resumable snapshot of in-progress user input.
///
/// At most one per key; overwritten on every debounced save. Never part of
/// the authoritative business record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRecord {
    /// Form identifier the draft belongs to.
    pub draft_key: String,
    /// Opaque form payload.
    pub payload: serde_json::Value,
    /// Last save time in epoch milliseconds.
    pub last_saved_at_ms: i64,
}
