//! Outbox dispatch: committing locally authored batches to the server of
//! record with partial-failure recovery.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::{
    outbox::{BatchStatus, OutboxBatch},
    persist::{sqlite::SqliteStore, PersistResult},
    remote::{OrderGateway, RemoteError, RemoteResult},
    types::BatchId,
};

/// Gateway shared with blocking workers.
pub type SharedGateway = Arc<Mutex<Box<dyn OrderGateway>>>;

/// Aggregate outcome of one dispatch run.
///
/// Dispatch always terminates with a summary; per-batch failures are counted
/// here, never raised past the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    /// Batches fully committed and removed from the outbox.
    pub sent: u32,
    /// Batches that stopped at a failing line item and stayed local.
    pub failed: u32,
}

/// Sends the selected batches, one at a time.
///
/// Per batch, line items are committed strictly in order and the batch fails
/// fast on the first rejected item; batches are independent of each other.
/// A fully committed batch is marked sent, copied to the backup channel
/// (best-effort) and deleted locally. A partially committed batch is
/// rewritten to its not-yet-committed remainder so a retry cannot
/// double-submit, and stays in draft.
pub async fn send_batches(
    store: &mut SqliteStore,
    gateway: &SharedGateway,
    ids: &[BatchId],
) -> PersistResult<DispatchSummary> {
    let mut summary = DispatchSummary::default();

    for &id in ids {
        let Some(mut batch) = store.get_batch(id)? else {
            tracing::warn!(id, "dispatch skipped unknown batch");
            summary.failed += 1;
            continue;
        };

        let mut committed = 0usize;
        let mut item_failure: Option<RemoteError> = None;
        for item in &batch.line_items {
            let item = item.clone();
            match gateway_call(gateway, move |g| g.commit_line(&item)).await {
                Ok(()) => committed += 1,
                Err(err) => {
                    item_failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = item_failure {
            tracing::warn!(id, committed, %err, "batch dispatch stopped at failing item");
            if committed > 0 {
                // Drop committed items so a retry starts at the remainder.
                batch.line_items.drain(..committed);
                store.save_batch(&batch)?;
            }
            summary.failed += 1;
            continue;
        }

        batch.status = BatchStatus::Sent;
        batch.sent_at_ms = Some(now_ms());

        let copy = batch.clone();
        if let Err(err) = gateway_call(gateway, move |g| g.push_backup(&copy)).await {
            // The authoritative write already succeeded; never revert.
            tracing::warn!(id, %err, "backup push failed for sent batch");
        }

        store.delete_batch(id)?;
        summary.sent += 1;
    }

    Ok(summary)
}

/// Restores previously sent batches from the remote backup channel.
///
/// Every restored batch receives a freshly generated local id and is reset
/// to draft with `sent_at_ms` cleared. Reusing the original id would let the
/// live tail or the next full sync observe the batch as already sent and
/// delete it before the operator re-submits.
pub async fn restore_from_backup(
    store: &mut SqliteStore,
    gateway: &SharedGateway,
) -> PersistResult<RemoteResult<Vec<OutboxBatch>>> {
    let fetched = match gateway_call(gateway, |g| g.fetch_backups()).await {
        Ok(batches) => batches,
        Err(err) => return Ok(Err(err)),
    };

    let mut restored = Vec::with_capacity(fetched.len());
    for mut batch in fetched {
        batch.id = store.take_batch_id()?;
        batch.status = BatchStatus::Draft;
        batch.sent_at_ms = None;
        store.save_batch(&batch)?;
        restored.push(batch);
    }
    Ok(Ok(restored))
}

async fn gateway_call<T, F>(gateway: &SharedGateway, f: F) -> RemoteResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn OrderGateway) -> RemoteResult<T> + Send + 'static,
{
    let gateway = Arc::clone(gateway);
    tokio::task::spawn_blocking(move || {
        let mut guard = gateway.blocking_lock();
        f(guard.as_mut())
    })
    .await
    .map_err(|e| RemoteError::Transient(format!("join error: {e}")))?
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
