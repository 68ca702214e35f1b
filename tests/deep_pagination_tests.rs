mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use nestql::{EngineConfig, QueryEngine, QueryOutput, QueryRequest};

use common::{shop_engine_with, RecordingExecutor};

// Bulk dataset: 500 orders, each with one address, statuses cycling 0..2.
async fn bulk_engine(config: EngineConfig) -> (QueryEngine, Arc<RecordingExecutor>) {
    common::init_tracing();
    let store = nestql::SqliteExecutor::in_memory().expect("open sqlite");
    store.execute_batch(common::SHOP_DDL).expect("create schema");
    let mut seed = String::from("INSERT INTO t_customer VALUES (1, 'Alice', 1);\n");
    for i in 1..=500 {
        seed.push_str(&format!(
            "INSERT INTO t_order VALUES ({i}, 'N{i:04}', {}, {}.0, 1, '2024-01-01 00:00:00');\n",
            i % 3,
            i * 10
        ));
        seed.push_str(&format!(
            "INSERT INTO t_order_address VALUES ({i}, {i}, '555-{i:04}', 'Paris');\n"
        ));
    }
    store.execute_batch(&seed).expect("seed data");
    let recorder = Arc::new(RecordingExecutor::new(Arc::new(store)));
    let engine = shop_engine_with(recorder.clone(), config).await;
    recorder.clear();
    (engine, recorder)
}

fn paged_request(page: u64, limit: u64) -> QueryRequest {
    serde_json::from_value(json!({
        "rootSchema": "order",
        "param": {
            "orderBy": [{"column": "id", "direction": "desc"}],
            "page": {"page": page, "limit": limit}
        },
        "result": {"columns": [
            {"type": "column", "column": "id"},
            {"type": "column", "column": "orderNo"}
        ]}
    }))
    .expect("well-formed request")
}

fn paged_ids(output: QueryOutput) -> (i64, Vec<i64>) {
    match output {
        QueryOutput::Paged { count, list } => (
            count,
            list.iter()
                .map(|row| row.get("id").and_then(Value::as_i64).expect("id"))
                .collect(),
        ),
        other => panic!("expected paged output, got {other:?}"),
    }
}

#[tokio::test]
async fn deep_page_switches_to_id_first_two_query_plan() {
    let (engine, recorder) = bulk_engine(EngineConfig {
        deep_page_threshold: 50,
        ..EngineConfig::default()
    })
    .await;

    // Offset 70 crosses the threshold of 50.
    let output = engine.execute(&paged_request(8, 10)).await.unwrap();
    let (count, ids) = paged_ids(output);
    assert_eq!(count, 500);
    assert_eq!(ids, (421..=430).rev().collect::<Vec<i64>>());

    let statements = recorder.statements();
    assert_eq!(statements.len(), 3, "count, id pass, wide fetch: {statements:#?}");
    assert!(statements[0].contains("COUNT"), "{}", statements[0]);
    assert!(
        statements[1].contains("LIMIT 10 OFFSET 70"),
        "the narrow pass carries the offset: {}",
        statements[1]
    );
    assert!(
        statements[2].contains(" IN (") && !statements[2].contains("OFFSET"),
        "the wide fetch is bounded by ids, never by offset: {}",
        statements[2]
    );
    assert!(
        statements[2].contains("ORDER BY"),
        "the IN list does not preserve order: {}",
        statements[2]
    );
}

#[tokio::test]
async fn shallow_page_stays_on_the_direct_plan() {
    let (engine, recorder) = bulk_engine(EngineConfig {
        deep_page_threshold: 50,
        ..EngineConfig::default()
    })
    .await;

    let output = engine.execute(&paged_request(2, 10)).await.unwrap();
    let (count, ids) = paged_ids(output);
    assert_eq!(count, 500);
    assert_eq!(ids, (481..=490).rev().collect::<Vec<i64>>());

    let statements = recorder.statements();
    assert_eq!(statements.len(), 2, "count then direct fetch: {statements:#?}");
    assert!(statements[1].contains("LIMIT 10 OFFSET 10"), "{}", statements[1]);
}

#[tokio::test]
async fn deep_and_direct_plans_return_identical_windows() {
    let (deep_engine, _) = bulk_engine(EngineConfig {
        deep_page_threshold: 50,
        ..EngineConfig::default()
    })
    .await;
    let (direct_engine, _) = bulk_engine(EngineConfig::default()).await;

    for (page, limit) in [(8, 10), (20, 7), (50, 10)] {
        let deep = paged_ids(deep_engine.execute(&paged_request(page, limit)).await.unwrap());
        let direct = paged_ids(
            direct_engine
                .execute(&paged_request(page, limit))
                .await
                .unwrap(),
        );
        assert_eq!(deep, direct, "page {page} limit {limit}");
    }
}

#[tokio::test]
async fn page_limit_is_clamped_to_the_configured_maximum() {
    let (engine, _) = bulk_engine(EngineConfig {
        max_page_limit: 50,
        ..EngineConfig::default()
    })
    .await;

    let output = engine.execute(&paged_request(1, 5_000)).await.unwrap();
    let (count, ids) = paged_ids(output);
    assert_eq!(count, 500);
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn nested_relation_fetch_respects_the_in_batch_size() {
    let (engine, recorder) = bulk_engine(EngineConfig {
        in_batch_size: 7,
        ..EngineConfig::default()
    })
    .await;

    let request: QueryRequest = serde_json::from_value(json!({
        "rootSchema": "order",
        "param": {
            "conditions": {"type": "leaf", "column": "id", "op": "lte", "value": 30},
            "orderBy": [{"column": "id"}]
        },
        "result": {"columns": [
            {"type": "column", "column": "id"},
            {"type": "relation", "key": "address",
             "result": {"schema": "orderAddress", "columns": [
                 {"type": "column", "column": "phone"}
             ]}}
        ]}
    }))
    .unwrap();

    let output = engine.execute(&request).await.unwrap();
    let rows = match output {
        QueryOutput::List(rows) => rows,
        other => panic!("expected list output, got {other:?}"),
    };
    assert_eq!(rows.len(), 30);
    assert_eq!(
        rows[0].get("address"),
        Some(&json!({"phone": "555-0001"}))
    );

    // 30 parent keys in chunks of 7 means five child queries after the
    // primary one.
    let statements = recorder.statements();
    assert_eq!(statements.len(), 6, "{statements:#?}");
    for child in &statements[1..] {
        assert!(child.contains(" IN ("), "{child}");
    }
}
