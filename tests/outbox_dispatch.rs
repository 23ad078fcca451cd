use std::sync::{Arc, Mutex};

use tillsync::{
    dispatch::{restore_from_backup, send_batches, SharedGateway},
    outbox::{BatchStatus, LineItem, OutboxBatch},
    persist::sqlite::SqliteStore,
    remote::{OrderGateway, RemoteError, RemoteResult},
};

#[derive(Default)]
struct GatewayInner {
    committed: Vec<LineItem>,
    backups: Vec<OutboxBatch>,
    fail_barcode: Option<String>,
    fail_backup: bool,
    restorable: Vec<OutboxBatch>,
}

struct FakeGateway(Arc<Mutex<GatewayInner>>);

impl OrderGateway for FakeGateway {
    fn commit_line(&mut self, item: &LineItem) -> RemoteResult<()> {
        let mut inner = self.0.lock().expect("lock");
        if inner.fail_barcode.as_deref() == Some(item.barcode.as_str()) {
            return Err(RemoteError::Transient("link down".to_string()));
        }
        inner.committed.push(item.clone());
        Ok(())
    }

    fn push_backup(&mut self, batch: &OutboxBatch) -> RemoteResult<()> {
        let mut inner = self.0.lock().expect("lock");
        if inner.fail_backup {
            return Err(RemoteError::Transient("backup channel down".to_string()));
        }
        inner.backups.push(batch.clone());
        Ok(())
    }

    fn fetch_backups(&mut self) -> RemoteResult<Vec<OutboxBatch>> {
        Ok(self.0.lock().expect("lock").restorable.clone())
    }
}

fn shared(inner: &Arc<Mutex<GatewayInner>>) -> SharedGateway {
    Arc::new(tokio::sync::Mutex::new(
        Box::new(FakeGateway(Arc::clone(inner))) as Box<dyn OrderGateway>,
    ))
}

fn line(barcode: &str) -> LineItem {
    LineItem {
        barcode: barcode.to_string(),
        quantity: 6.0,
        unit_cost_cents: Some(75),
    }
}

fn author_batch(store: &mut SqliteStore, items: Vec<LineItem>) -> OutboxBatch {
    let batch = OutboxBatch {
        id: store.take_batch_id().expect("id"),
        created_at_ms: 1_000,
        status: BatchStatus::Draft,
        supplier_ref: "ACME-042".to_string(),
        date: "2024-11-03".to_string(),
        line_items: items,
        sent_at_ms: None,
    };
    store.save_batch(&batch).expect("save");
    batch
}

#[tokio::test]
async fn fully_committed_batch_is_sent_backed_up_and_removed() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");
    let inner = Arc::new(Mutex::new(GatewayInner::default()));
    let gateway = shared(&inner);

    let batch = author_batch(&mut store, vec![line("A"), line("B")]);
    let summary = send_batches(&mut store, &gateway, &[batch.id]).await.expect("send");

    assert_eq!((summary.sent, summary.failed), (1, 0));
    assert!(store.get_batch(batch.id).expect("get").is_none());

    let inner = inner.lock().expect("lock");
    assert_eq!(inner.committed.len(), 2);
    assert_eq!(inner.backups.len(), 1);
    assert_eq!(inner.backups[0].status, BatchStatus::Sent);
    assert!(inner.backups[0].sent_at_ms.is_some());
}

#[tokio::test]
async fn failing_item_truncates_batch_to_unsent_remainder() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");
    let inner = Arc::new(Mutex::new(GatewayInner {
        fail_barcode: Some("C".to_string()),
        ..GatewayInner::default()
    }));
    let gateway = shared(&inner);

    let batch = author_batch(&mut store, vec![line("A"), line("B"), line("C"), line("D")]);
    let summary = send_batches(&mut store, &gateway, &[batch.id]).await.expect("send");

    assert_eq!((summary.sent, summary.failed), (0, 1));

    let remaining = store.get_batch(batch.id).expect("get").expect("still local");
    assert_eq!(remaining.status, BatchStatus::Draft);
    assert!(remaining.sent_at_ms.is_none());
    let barcodes: Vec<&str> = remaining.line_items.iter().map(|l| l.barcode.as_str()).collect();
    assert_eq!(barcodes, vec!["C", "D"]);

    // Only the items before the failure reached the server.
    let committed: Vec<String> = inner
        .lock()
        .expect("lock")
        .committed
        .iter()
        .map(|l| l.barcode.clone())
        .collect();
    assert_eq!(committed, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn batches_fail_independently() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");
    let inner = Arc::new(Mutex::new(GatewayInner {
        fail_barcode: Some("X".to_string()),
        ..GatewayInner::default()
    }));
    let gateway = shared(&inner);

    let ok_batch = author_batch(&mut store, vec![line("A"), line("B")]);
    let bad_batch = author_batch(&mut store, vec![line("X"), line("Y")]);

    let summary = send_batches(&mut store, &gateway, &[ok_batch.id, bad_batch.id])
        .await
        .expect("send");

    assert_eq!((summary.sent, summary.failed), (1, 1));
    assert!(store.get_batch(ok_batch.id).expect("get").is_none());

    // First item failed, so the batch keeps all of its original items.
    let kept = store.get_batch(bad_batch.id).expect("get").expect("kept");
    assert_eq!(kept.line_items, bad_batch.line_items);
    assert_eq!(kept.status, BatchStatus::Draft);
}

#[tokio::test]
async fn backup_failure_never_reverts_a_sent_batch() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");
    let inner = Arc::new(Mutex::new(GatewayInner {
        fail_backup: true,
        ..GatewayInner::default()
    }));
    let gateway = shared(&inner);

    let batch = author_batch(&mut store, vec![line("A")]);
    let summary = send_batches(&mut store, &gateway, &[batch.id]).await.expect("send");

    // The authoritative write succeeded; the batch is gone locally.
    assert_eq!((summary.sent, summary.failed), (1, 0));
    assert!(store.get_batch(batch.id).expect("get").is_none());
    assert!(inner.lock().expect("lock").backups.is_empty());
}

#[tokio::test]
async fn unknown_ids_count_as_failures() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");
    let gateway = shared(&Arc::new(Mutex::new(GatewayInner::default())));

    let summary = send_batches(&mut store, &gateway, &[999]).await.expect("send");
    assert_eq!((summary.sent, summary.failed), (0, 1));
}

#[tokio::test]
async fn restored_batches_get_fresh_ids_and_reset_to_draft() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");

    let backed_up = OutboxBatch {
        id: 77,
        created_at_ms: 500,
        status: BatchStatus::Sent,
        supplier_ref: "ACME-042".to_string(),
        date: "2024-10-01".to_string(),
        line_items: vec![line("A"), line("B")],
        sent_at_ms: Some(600),
    };
    let inner = Arc::new(Mutex::new(GatewayInner {
        restorable: vec![backed_up.clone()],
        ..GatewayInner::default()
    }));
    let gateway = shared(&inner);

    let restored = restore_from_backup(&mut store, &gateway)
        .await
        .expect("persist ok")
        .expect("remote ok");

    assert_eq!(restored.len(), 1);
    let restored = &restored[0];
    assert_ne!(restored.id, backed_up.id);
    assert_eq!(restored.status, BatchStatus::Draft);
    assert_eq!(restored.sent_at_ms, None);
    assert_eq!(restored.line_items, backed_up.line_items);

    // The restored copy is persisted and dispatchable again.
    let local = store.get_batch(restored.id).expect("get").expect("saved");
    assert_eq!(local, *restored);
    assert_eq!(store.count_by_status(BatchStatus::Draft).expect("count"), 1);
}

#[tokio::test]
async fn restore_surfaces_remote_failure_without_writing() {
    struct DownGateway;
    impl OrderGateway for DownGateway {
        fn commit_line(&mut self, _: &LineItem) -> RemoteResult<()> {
            Err(RemoteError::Transient("down".to_string()))
        }
        fn push_backup(&mut self, _: &OutboxBatch) -> RemoteResult<()> {
            Err(RemoteError::Transient("down".to_string()))
        }
        fn fetch_backups(&mut self) -> RemoteResult<Vec<OutboxBatch>> {
            Err(RemoteError::Transient("down".to_string()))
        }
    }

    let mut store = SqliteStore::open_in_memory(1).expect("open");
    let gateway: SharedGateway =
        Arc::new(tokio::sync::Mutex::new(Box::new(DownGateway) as Box<dyn OrderGateway>));

    let result = restore_from_backup(&mut store, &gateway).await.expect("persist ok");
    assert!(result.is_err());
    assert!(store.list_batches().expect("list").is_empty());
}
