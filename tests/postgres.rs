//! Database-backed checks. Each test works inside one transaction on
//! temporary tables and rolls it back.
//!
//! Needs `DB_URL`; run with `cargo test -- --ignored`.
use futures::StreamExt;
use pgbulk::*;
use tokio_postgres::Client;
use tokio_postgres::types::Type;

async fn client() -> Client {
    let _ = env_logger::builder().is_test(true).try_init();
    connect().await.expect("DB_URL must point at a reachable database")
}

fn items() -> Schema {
    Schema::build(
        "items",
        vec![
            Column::new("id", Type::INT8).serial(),
            Column::new("sku", Type::TEXT),
            Column::new("price", Type::INT4),
            Column::new("note", Type::TEXT),
            Column::new("origin", Type::TEXT),
            Column::new("created", Type::TIMESTAMPTZ).auto_now_add(),
        ],
        &["id"],
    )
    .unwrap()
}

const ITEMS: &str = "CREATE TEMP TABLE items (
    id      BIGSERIAL PRIMARY KEY,
    sku     TEXT NOT NULL UNIQUE,
    price   INT4,
    note    TEXT,
    origin  TEXT,
    created TIMESTAMPTZ NOT NULL
)";

fn item(sku: &str, price: i32) -> Record {
    Record::new().with("sku", sku).with("price", price)
}

fn by_sku() -> UpsertOptions {
    UpsertOptions::default().pk_fields(["sku"])
}

async fn price_of(loader: &Loader<'_, '_>, sku: &str) -> Mapping {
    let rows = loader
        .bulk_select(
            &items(),
            &["sku"],
            &["price", "note", "origin"],
            vec![vec![Value::from(sku)]],
            &SelectOptions::default(),
        )
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(rows.len(), 1);
    rows.into_iter().next().unwrap().unwrap()
}

#[tokio::test]
#[ignore]
async fn insert_round_trips_server_generated_keys() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    let batch = vec![item("c", 3), item("a", 1), item("b", 2)];
    let outcome = loader
        .bulk_insert(&items(), &batch, &InsertOptions::default().return_records())
        .await
        .unwrap();
    let inserted = outcome.records.unwrap();
    assert_eq!(outcome.affected, 3);
    assert_eq!(
        inserted.iter().map(|r| r.get("sku").cloned()).collect::<Vec<_>>(),
        vec![Some("c".into()), Some("a".into()), Some("b".into())]
    );
    let ids = inserted
        .iter()
        .map(|r| r.get("id").cloned().unwrap())
        .map(|id| vec![id])
        .collect::<Vec<_>>();
    let mut selected = loader
        .bulk_select(&items(), &["id"], &[], ids, &SelectOptions::default())
        .await
        .unwrap()
        .map(|row| row.unwrap())
        .collect::<Vec<_>>()
        .await;
    selected.sort_by_key(|m| format!("{:?}", m.get("id")));
    let mut expected = inserted.into_iter().map(Record::into_mapping).collect::<Vec<_>>();
    expected.sort_by_key(|m| format!("{:?}", m.get("id")));
    assert_eq!(selected, expected);
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn ignore_conflicts_keeps_existing_rows() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(
        "CREATE TEMP TABLE prices (sku TEXT PRIMARY KEY, price INT4)",
    )
    .await
    .unwrap();
    let schema = Schema::build(
        "prices",
        vec![Column::new("sku", Type::TEXT), Column::new("price", Type::INT4)],
        &["sku"],
    )
    .unwrap();
    let loader = Loader::new(&tx);
    let first = vec![Record::new().with("sku", "a").with("price", 1)];
    loader
        .bulk_insert(&schema, &first, &InsertOptions::default())
        .await
        .unwrap();
    let second = vec![
        Record::new().with("sku", "a").with("price", 2),
        Record::new().with("sku", "b").with("price", 3),
    ];
    let outcome = loader
        .bulk_insert(
            &schema,
            &second,
            &InsertOptions::default().ignore_conflicts().return_records(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);
    assert_eq!(outcome.records.unwrap()[0].get("sku"), Some(&Value::from("b")));
    assert_eq!(
        outcome.skipped,
        vec![Skipped {
            index: 0,
            reason: SkipReason::Conflict
        }]
    );
    let row = tx
        .query_one("SELECT price FROM prices WHERE sku = 'a'", &[])
        .await
        .unwrap();
    assert_eq!(row.get::<_, i32>(0), 1);
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn conflicts_abort_the_batch_without_ignore() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    loader
        .bulk_insert(&items(), &[item("a", 1)], &InsertOptions::default())
        .await
        .unwrap();
    let err = loader
        .bulk_insert(&items(), &[item("z", 9), item("a", 2)], &InsertOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn upsert_with_changed_fields_is_idempotent() {
    for strategy in [UpsertStrategy::OnConflict, UpsertStrategy::Merge] {
        let mut client = client().await;
        let tx = client.transaction().await.unwrap();
        tx.batch_execute(ITEMS).await.unwrap();
        let config = Config::default().upsert_strategy(strategy);
        let loader = Loader::with_config(&tx, config);
        let options = by_sku().changed_fields(["price"]);
        let batch = vec![item("a", 1), item("b", 2)];
        let first = loader.bulk_upsert(&items(), &batch, &options).await.unwrap();
        assert_eq!(first.affected, 2);
        let again = loader.bulk_upsert(&items(), &batch, &options).await.unwrap();
        assert_eq!(again.affected, 0, "{:?}", strategy);
        drop(loader);
        tx.rollback().await.unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn upsert_reports_guarded_records_as_unchanged() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    let options = by_sku().changed_fields(["price"]).return_records();
    loader
        .bulk_upsert(&items(), &[item("a", 1)], &options)
        .await
        .unwrap();
    let outcome = loader
        .bulk_upsert(&items(), &[item("a", 1), item("b", 5)], &options)
        .await
        .unwrap();
    let records = outcome.records.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("price"), Some(&Value::Int(5)));
    assert_eq!(
        outcome.skipped,
        vec![Skipped {
            index: 0,
            reason: SkipReason::Unchanged
        }]
    );
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn insert_only_fields_are_written_once() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    let options = by_sku().insert_only_fields(["origin"]);
    loader
        .bulk_upsert(&items(), &[item("a", 1).with("origin", "first")], &options)
        .await
        .unwrap();
    loader
        .bulk_upsert(&items(), &[item("a", 2).with("origin", "second")], &options)
        .await
        .unwrap();
    let row = price_of(&loader, "a").await;
    assert_eq!(row.get("origin"), Some(&Value::from("first")));
    assert_eq!(row.get("price"), Some(&Value::Int(2)));
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn null_guarded_fields_only_fill_gaps() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    let seed = vec![item("a", 1).with("note", "kept"), item("b", 1)];
    loader
        .bulk_insert(&items(), &seed, &InsertOptions::default())
        .await
        .unwrap();
    let options = UpdateOptions::default()
        .pk_fields(["sku"])
        .update_fields(["price"])
        .null_update_fields(["note"]);
    let batch = vec![
        item("a", 7).with("note", Value::Null),
        item("b", 7).with("note", "filled"),
    ];
    let outcome = loader.bulk_update(&items(), &batch, &options).await.unwrap();
    assert_eq!(outcome.affected, 2);
    let a = price_of(&loader, "a").await;
    let b = price_of(&loader, "b").await;
    assert_eq!(a.get("note"), Some(&Value::from("kept")));
    assert_eq!(a.get("price"), Some(&Value::Int(7)));
    assert_eq!(b.get("note"), Some(&Value::from("filled")));
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn update_ignores_missing_rows_and_reports_them() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    loader
        .bulk_insert(&items(), &[item("a", 1), item("b", 2)], &InsertOptions::default())
        .await
        .unwrap();
    let options = UpdateOptions::default()
        .pk_fields(["sku"])
        .update_fields(["price"])
        .changed_fields(["price"])
        .return_records();
    let batch = vec![item("ghost", 1), item("b", 2), item("a", 10)];
    let outcome = loader.bulk_update(&items(), &batch, &options).await.unwrap();
    assert_eq!(outcome.affected, 1);
    let records = outcome.records.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("price"), Some(&Value::Int(10)));
    assert_eq!(
        outcome.skipped,
        vec![
            Skipped {
                index: 0,
                reason: SkipReason::NoMatch
            },
            Skipped {
                index: 1,
                reason: SkipReason::Unchanged
            },
        ]
    );
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn custom_predicate_restricts_updates() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    loader
        .bulk_insert(&items(), &[item("a", 1), item("b", 50)], &InsertOptions::default())
        .await
        .unwrap();
    let options = UpdateOptions::default()
        .pk_fields(["sku"])
        .update_fields(["price"])
        .custom_predicate(|s| format!("{} < 10", s.target("price")));
    let outcome = loader
        .bulk_update(&items(), &[item("a", 2), item("b", 2)], &options)
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);
    assert_eq!(price_of(&loader, "b").await.get("price"), Some(&Value::Int(50)));
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn change_detection_compares_against_latest_row() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(
        "CREATE TEMP TABLE readings (
            id    BIGSERIAL PRIMARY KEY,
            meter TEXT NOT NULL,
            value TEXT
        )",
    )
    .await
    .unwrap();
    let schema = Schema::build(
        "readings",
        vec![
            Column::new("id", Type::INT8).serial(),
            Column::new("meter", Type::TEXT),
            Column::new("value", Type::TEXT),
        ],
        &["id"],
    )
    .unwrap();
    let reading = |value: &str| Record::new().with("meter", "m1").with("value", value);
    let loader = Loader::new(&tx);
    loader
        .bulk_insert(&schema, &[reading("x"), reading("y")], &InsertOptions::default())
        .await
        .unwrap();
    let options = ChangedOptions::new(["meter"], ["value"])
        .order_field("id")
        .return_records();
    let same = loader
        .bulk_insert_if_changed(&schema, &[reading("y")], &options)
        .await
        .unwrap();
    assert_eq!(same.affected, 0);
    assert_eq!(same.skipped[0].reason, SkipReason::Unchanged);
    let changed = loader
        .bulk_insert_if_changed(&schema, &[reading("z")], &options)
        .await
        .unwrap();
    assert_eq!(changed.affected, 1);
    assert_eq!(
        changed.records.unwrap()[0].get("value"),
        Some(&Value::from("z"))
    );
    let count = tx
        .query_one("SELECT count(*) FROM readings", &[])
        .await
        .unwrap()
        .get::<_, i64>(0);
    assert_eq!(count, 3);
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn composite_select_inline_and_staged() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(
        "CREATE TEMP TABLE points (
            x     INT8,
            y     INT8,
            label TEXT,
            PRIMARY KEY (x, y)
        )",
    )
    .await
    .unwrap();
    let schema = Schema::build(
        "points",
        vec![
            Column::new("x", Type::INT8),
            Column::new("y", Type::INT8),
            Column::new("label", Type::TEXT),
        ],
        &["x", "y"],
    )
    .unwrap();
    let point = |x: i64, y: i64| {
        Record::new()
            .with("x", x)
            .with("y", y)
            .with("label", format!("{}-{}", x, y))
    };
    let filter = || vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3), Value::Int(4)]];
    for limit in [1000, 1] {
        let config = Config {
            inline_filter_limit: limit,
            ..Config::default()
        };
        let loader = Loader::with_config(&tx, config);
        if limit == 1000 {
            let batch = vec![point(1, 2), point(3, 4), point(1, 4), point(3, 2)];
            loader
                .bulk_insert(&schema, &batch, &InsertOptions::default())
                .await
                .unwrap();
        }
        let mut labels = loader
            .bulk_select(&schema, &["x", "y"], &["label"], filter(), &SelectOptions::default().select_for_update())
            .await
            .unwrap()
            .map(|row| row.unwrap().get("label").cloned().unwrap())
            .collect::<Vec<_>>()
            .await;
        labels.sort_by_key(|v| format!("{:?}", v));
        assert_eq!(labels, vec![Value::from("1-2"), Value::from("3-4")]);
    }
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn custom_queries_run_against_the_staging_table() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    let loader = Loader::new(&tx);
    let fields = vec!["sku".to_string(), "price".to_string(), "created".to_string()];
    let outcome = loader
        .bulk_load_with_queries(
            &items(),
            &[item("a", 1), item("b", 2)],
            Some(fields.as_slice()),
            |stage| {
                vec![format!(
                    "INSERT INTO items (sku, price, created) \
                     SELECT sku, price * 10, created FROM {} RETURNING sku, price",
                    stage.ident()
                )]
            },
            true,
        )
        .await
        .unwrap();
    let records = outcome.records.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.get("price") == Some(&Value::Int(20))));
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn change_detection_returns_rows_stored_at_lower_precision() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(
        "CREATE TEMP TABLE samples (
            id     BIGSERIAL PRIMARY KEY,
            sensor TEXT NOT NULL,
            level  FLOAT4,
            taken  TIMESTAMPTZ
        )",
    )
    .await
    .unwrap();
    let schema = Schema::build(
        "samples",
        vec![
            Column::new("id", Type::INT8).serial(),
            Column::new("sensor", Type::TEXT),
            Column::new("level", Type::FLOAT4),
            Column::new("taken", Type::TIMESTAMPTZ),
        ],
        &["id"],
    )
    .unwrap();
    let taken = chrono::DateTime::<chrono::Utc>::from_timestamp(1_700_000_000, 123_456_789).unwrap();
    let sample = |sensor: &str, level: f64| {
        Record::new()
            .with("sensor", sensor)
            .with("level", level)
            .with("taken", taken)
    };
    let batch = vec![sample("s1", 0.1), sample("s2", 0.7)];
    let options = ChangedOptions::new(["sensor"], ["level", "taken"])
        .order_field("id")
        .return_records();
    let loader = Loader::new(&tx);
    let first = loader
        .bulk_insert_if_changed(&schema, &batch, &options)
        .await
        .unwrap();
    assert_eq!(first.affected, 2);
    assert!(first.skipped.is_empty());
    let records = first.records.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("sensor"), Some(&Value::from("s1")));
    assert_eq!(records[0].get("level"), Some(&Value::Float(0.1f32 as f64)));
    assert_eq!(records[1].get("sensor"), Some(&Value::from("s2")));
    let again = loader
        .bulk_insert_if_changed(&schema, &batch, &options)
        .await
        .unwrap();
    assert_eq!(again.affected, 0);
    assert_eq!(again.records.unwrap().len(), 0);
    assert!(again.skipped.iter().all(|s| s.reason == SkipReason::Unchanged));
    assert_eq!(again.skipped.len(), 2);
    drop(loader);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn numeric_columns_round_trip() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(
        "CREATE TEMP TABLE ledger (
            entry  TEXT PRIMARY KEY,
            amount NUMERIC(12, 2)
        )",
    )
    .await
    .unwrap();
    let schema = Schema::build(
        "ledger",
        vec![Column::new("entry", Type::TEXT), Column::new("amount", Type::NUMERIC)],
        &["entry"],
    )
    .unwrap();
    let batch = vec![
        Record::new().with("entry", "a").with("amount", "19.99"),
        Record::new().with("entry", "b").with("amount", 5),
    ];
    let outcome = Loader::new(&tx)
        .bulk_insert(&schema, &batch, &InsertOptions::default().return_records())
        .await
        .unwrap();
    let records = outcome.records.unwrap();
    let amount = |s: &str| Value::Decimal(s.parse::<rust_decimal::Decimal>().unwrap());
    assert_eq!(records[0].get("amount"), Some(&amount("19.99")));
    assert_eq!(records[1].get("amount"), Some(&amount("5.00")));
    tx.rollback().await.unwrap();
}

async fn staging_indexes(tx: &tokio_postgres::Transaction<'_>) -> Vec<String> {
    tx.query(
        "SELECT indexdef FROM pg_indexes WHERE left(tablename, 14) = 'loading_items_'",
        &[],
    )
    .await
    .unwrap()
    .iter()
    .map(|row| row.get::<_, String>(0))
    .collect()
}

#[tokio::test]
#[ignore]
async fn large_batches_index_the_staging_table() {
    let mut client = client().await;
    let tx = client.transaction().await.unwrap();
    tx.batch_execute(ITEMS).await.unwrap();
    Loader::new(&tx)
        .bulk_upsert(&items(), &[item("a", 1), item("b", 2)], &by_sku())
        .await
        .unwrap();
    assert!(staging_indexes(&tx).await.is_empty());
    let config = Config {
        index_threshold: 1,
        ..Config::default()
    };
    let outcome = Loader::with_config(&tx, config)
        .bulk_upsert(&items(), &[item("a", 3), item("c", 4)], &by_sku().return_records())
        .await
        .unwrap();
    assert_eq!(outcome.records.unwrap().len(), 2);
    let defs = staging_indexes(&tx).await;
    assert_eq!(defs.len(), 1);
    assert!(defs[0].contains("(sku)"));
    tx.rollback().await.unwrap();
}
