use tempfile::TempDir;

use tillsync::{
    catalog::{EntityRecord, SyncLogEntry},
    outbox::{BatchStatus, DraftRecord, LineItem, OutboxBatch},
    persist::sqlite::SqliteStore,
    types::Collection,
};

fn product(key: &str, price_cents: i64) -> EntityRecord {
    EntityRecord {
        key: key.to_string(),
        name: format!("Product {key}"),
        price_cents: Some(price_cents),
        stock: Some(4.0),
        category_codes: vec!["GROCERY".to_string()],
        promo: None,
        extra: serde_json::json!({"vat": "standard"}),
    }
}

fn batch(id: u64, created_at_ms: i64) -> OutboxBatch {
    OutboxBatch {
        id,
        created_at_ms,
        status: BatchStatus::Draft,
        supplier_ref: "ACME-042".to_string(),
        date: "2024-11-03".to_string(),
        line_items: vec![LineItem {
            barcode: "5000112637922".to_string(),
            quantity: 12.0,
            unit_cost_cents: Some(80),
        }],
        sent_at_ms: None,
    }
}

#[test]
fn collection_and_watermark_survive_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("till.db");

    {
        let mut store = SqliteStore::open(&db, 1).expect("open");
        store
            .replace_collection(
                Collection::Products,
                &[product("A", 120), product("B", 110)],
                7,
            )
            .expect("replace");
    }

    let store = SqliteStore::open(&db, 1).expect("reopen");
    let loaded = store.load_collection(Collection::Products).expect("load");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].key, "A");
    assert_eq!(loaded[1].key, "B");
    assert_eq!(store.watermark(Collection::Products).expect("wm"), Some(7));
    assert_eq!(store.watermark(Collection::Customers).expect("wm"), None);
}

#[test]
fn apply_entry_commits_row_and_watermark_together() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("till.db");

    {
        let mut store = SqliteStore::open(&db, 1).expect("open");
        store
            .replace_collection(Collection::Products, &[product("A", 120)], 7)
            .expect("replace");
        store
            .apply_entry(
                Collection::Products,
                &SyncLogEntry::upsert(8, product("B", 110), "server"),
            )
            .expect("upsert");
        store
            .apply_entry(
                Collection::Products,
                &SyncLogEntry::tombstone(9, "A", "server"),
            )
            .expect("tombstone");
    }

    let store = SqliteStore::open(&db, 1).expect("reopen");
    let loaded = store.load_collection(Collection::Products).expect("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].key, "B");
    assert_eq!(store.watermark(Collection::Products).expect("wm"), Some(9));
}

#[test]
fn watermark_advance_is_clamped_in_sql() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");
    store.advance_watermark(Collection::Customers, 10).expect("advance");
    store.advance_watermark(Collection::Customers, 3).expect("advance");
    assert_eq!(store.watermark(Collection::Customers).expect("wm"), Some(10));
}

#[test]
fn outbox_lists_newest_first_and_counts_by_status() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");

    let id1 = store.take_batch_id().expect("id");
    let id2 = store.take_batch_id().expect("id");
    store.save_batch(&batch(id1, 1_000)).expect("save");
    store.save_batch(&batch(id2, 2_000)).expect("save");

    let listed = store.list_batches().expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, id2);
    assert_eq!(listed[1].id, id1);

    assert_eq!(store.count_by_status(BatchStatus::Draft).expect("count"), 2);
    assert_eq!(store.count_by_status(BatchStatus::Sent).expect("count"), 0);

    store.delete_batch(id1).expect("delete");
    assert_eq!(store.count_by_status(BatchStatus::Draft).expect("count"), 1);
    // Deleting again is a no-op.
    store.delete_batch(id1).expect("delete twice");
}

#[test]
fn batch_ids_are_never_recycled() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("till.db");

    let first = {
        let mut store = SqliteStore::open(&db, 1).expect("open");
        let id = store.take_batch_id().expect("id");
        store.save_batch(&batch(id, 1_000)).expect("save");
        store.delete_batch(id).expect("delete");
        id
    };

    let mut store = SqliteStore::open(&db, 1).expect("reopen");
    let next = store.take_batch_id().expect("id");
    assert!(next > first, "id {next} must not reuse {first}");
}

#[test]
fn corrupt_batch_counter_is_an_error_not_a_reset() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("till.db");

    {
        let mut store = SqliteStore::open(&db, 1).expect("open");
        let id = store.take_batch_id().expect("id");
        store.save_batch(&batch(id, 1_000)).expect("save");
    }

    {
        let conn = rusqlite::Connection::open(&db).expect("raw open");
        conn.execute(
            "UPDATE meta SET value = 'not-a-number' WHERE key = 'next_batch_id'",
            [],
        )
        .expect("corrupt counter");
    }

    // Defaulting back to 1 here would hand out an id that is already in use.
    let mut store = SqliteStore::open(&db, 1).expect("reopen");
    assert!(store.take_batch_id().is_err());
    assert_eq!(store.list_batches().expect("list").len(), 1);
}

#[test]
fn drafts_roundtrip_and_discard() {
    let mut store = SqliteStore::open_in_memory(1).expect("open");

    let draft = DraftRecord {
        draft_key: "receiving-form".to_string(),
        payload: serde_json::json!({"supplier": "ACME-042", "lines": 3}),
        last_saved_at_ms: 123,
    };
    store.save_draft(&draft).expect("save");

    let loaded = store.load_draft("receiving-form").expect("load").expect("some");
    assert_eq!(loaded, draft);

    // Overwrite wins.
    let newer = DraftRecord {
        payload: serde_json::json!({"supplier": "ACME-042", "lines": 4}),
        last_saved_at_ms: 456,
        ..draft.clone()
    };
    store.save_draft(&newer).expect("save");
    assert_eq!(store.load_draft("receiving-form").expect("load"), Some(newer));

    store.discard_draft("receiving-form").expect("discard");
    assert_eq!(store.load_draft("receiving-form").expect("load"), None);
    store.discard_draft("receiving-form").expect("discard absent");
}

#[test]
fn schema_bump_wipes_catalog_but_keeps_user_work() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("till.db");

    {
        let mut store = SqliteStore::open(&db, 1).expect("open");
        store
            .replace_collection(Collection::Products, &[product("A", 120)], 7)
            .expect("replace");
        let id = store.take_batch_id().expect("id");
        store.save_batch(&batch(id, 1_000)).expect("save");
        store
            .save_draft(&DraftRecord {
                draft_key: "order-form".to_string(),
                payload: serde_json::json!({"qty": 2}),
                last_saved_at_ms: 1,
            })
            .expect("draft");
    }

    let store = SqliteStore::open(&db, 2).expect("reopen with bump");
    assert!(store.load_collection(Collection::Products).expect("load").is_empty());
    assert_eq!(store.watermark(Collection::Products).expect("wm"), None);
    assert_eq!(store.list_batches().expect("list").len(), 1);
    assert!(store.load_draft("order-form").expect("load").is_some());
}

#[test]
fn same_version_reopen_keeps_catalog() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("till.db");

    {
        let mut store = SqliteStore::open(&db, 3).expect("open");
        store
            .replace_collection(Collection::Customers, &[product("C100", 0)], 2)
            .expect("replace");
    }

    let store = SqliteStore::open(&db, 3).expect("reopen");
    assert_eq!(store.load_collection(Collection::Customers).expect("load").len(), 1);
    assert_eq!(store.watermark(Collection::Customers).expect("wm"), Some(2));
}
