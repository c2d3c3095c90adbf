use std::sync::Arc;
use std::time::Duration;

use super::common::{
    FakeColumn, FakeSourceAdapter, FakeTable, create_test_db, register_test_connection,
};
use crate::models::{ColumnRef, SampleStatus, SamplingConfig};
use crate::services::{CancelFlag, ConnectionRegistry, MySQLPoolManager, Sampler};
use crate::utils::ApiError;

async fn borrow_handle(
    registry: &ConnectionRegistry,
) -> Arc<crate::services::ConnectionHandle> {
    let id = register_test_connection(registry).await;
    Arc::new(registry.borrow(id).await.unwrap())
}

fn table_with_columns(n: usize) -> FakeTable {
    let columns = (0..n)
        .map(|i| FakeColumn::text(&format!("col_{:03}", i), &["alpha", "beta", "gamma", "delta"]))
        .collect();
    FakeTable::new("wide", columns)
}

fn refs_for(table: &FakeTable) -> Vec<ColumnRef> {
    table
        .columns
        .iter()
        .map(|c| ColumnRef::new("testdb", table.name.clone(), c.info.name.clone()))
        .collect()
}

#[tokio::test]
async fn concurrency_stays_within_the_configured_limit() {
    let pool = create_test_db().await;
    let registry =
        ConnectionRegistry::new(pool, Arc::new(MySQLPoolManager::new()), 10, Duration::from_secs(1));
    let handle = borrow_handle(&registry).await;

    let table = table_with_columns(24);
    let refs = refs_for(&table);
    let adapter = Arc::new(
        FakeSourceAdapter::new("testdb", vec![table]).with_fetch_delay(Duration::from_millis(15)),
    );

    let config = SamplingConfig { max_concurrent_queries: 3, ..Default::default() };
    let sampler = Sampler::new(Duration::from_secs(5));

    let samples = sampler
        .sample(
            adapter.clone(),
            handle,
            &refs,
            &config,
            7,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    assert_eq!(samples.len(), 24);
    assert!(samples.values().all(|s| s.status == SampleStatus::Ok));

    let observed = adapter.observed_max_concurrency();
    assert!(observed <= 3, "observed {} concurrent queries", observed);
    assert!(observed >= 2, "parallelism never materialized");
}

#[tokio::test]
async fn a_failing_column_degrades_without_aborting_the_batch() {
    let pool = create_test_db().await;
    let registry =
        ConnectionRegistry::new(pool, Arc::new(MySQLPoolManager::new()), 10, Duration::from_secs(1));
    let handle = borrow_handle(&registry).await;

    let table = table_with_columns(10);
    let refs = refs_for(&table);
    let adapter =
        Arc::new(FakeSourceAdapter::new("testdb", vec![table]).with_failing_column("col_004"));

    let sampler = Sampler::new(Duration::from_secs(5));
    let samples = sampler
        .sample(
            adapter,
            handle,
            &refs,
            &SamplingConfig::default(),
            7,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    // Every requested column has an entry; only the faulty one failed
    assert_eq!(samples.len(), 10);
    let failed = samples.get(&ColumnRef::new("testdb", "wide", "col_004")).unwrap();
    assert_eq!(failed.status, SampleStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap().contains("col_004"));

    let ok = samples.values().filter(|s| s.status == SampleStatus::Ok).count();
    assert_eq!(ok, 9);
}

#[tokio::test]
async fn entropy_is_computed_when_requested() {
    let pool = create_test_db().await;
    let registry =
        ConnectionRegistry::new(pool, Arc::new(MySQLPoolManager::new()), 10, Duration::from_secs(1));
    let handle = borrow_handle(&registry).await;

    let table = FakeTable::new(
        "t",
        vec![
            FakeColumn::text("four_values", &["a", "b", "c", "d"]),
            FakeColumn::text("constant", &["same", "same", "same"]),
        ],
    );
    let refs = refs_for(&table);
    let adapter = Arc::new(FakeSourceAdapter::new("testdb", vec![table]));

    let config = SamplingConfig { entropy_calculation: true, ..Default::default() };
    let sampler = Sampler::new(Duration::from_secs(5));
    let samples = sampler
        .sample(adapter, handle, &refs, &config, 7, &CancelFlag::new(), |_, _| {})
        .await
        .unwrap();

    let uniform = samples.get(&ColumnRef::new("testdb", "t", "four_values")).unwrap();
    assert_eq!(uniform.entropy, Some(2.0));

    let constant = samples.get(&ColumnRef::new("testdb", "t", "constant")).unwrap();
    assert_eq!(constant.entropy, Some(0.0));
}

#[tokio::test]
async fn sample_size_caps_the_returned_values() {
    let pool = create_test_db().await;
    let registry =
        ConnectionRegistry::new(pool, Arc::new(MySQLPoolManager::new()), 10, Duration::from_secs(1));
    let handle = borrow_handle(&registry).await;

    let many: Vec<String> = (0..50).map(|i| format!("v{}", i)).collect();
    let many_refs: Vec<&str> = many.iter().map(String::as_str).collect();
    let table = FakeTable::new("t", vec![FakeColumn::text("big", &many_refs)]);
    let refs = refs_for(&table);
    let adapter = Arc::new(FakeSourceAdapter::new("testdb", vec![table]));

    let config = SamplingConfig { sample_size: 10, ..Default::default() };
    let sampler = Sampler::new(Duration::from_secs(5));
    let samples = sampler
        .sample(adapter, handle, &refs, &config, 7, &CancelFlag::new(), |_, _| {})
        .await
        .unwrap();

    let sample = samples.get(&ColumnRef::new("testdb", "t", "big")).unwrap();
    assert_eq!(sample.total_rows, 10);
}

#[tokio::test]
async fn cancellation_interrupts_the_batch() {
    let pool = create_test_db().await;
    let registry =
        ConnectionRegistry::new(pool, Arc::new(MySQLPoolManager::new()), 10, Duration::from_secs(1));
    let handle = borrow_handle(&registry).await;

    let table = table_with_columns(8);
    let refs = refs_for(&table);
    let adapter = Arc::new(FakeSourceAdapter::new("testdb", vec![table]));

    let cancel = CancelFlag::new();
    cancel.cancel();

    let sampler = Sampler::new(Duration::from_secs(5));
    let err = sampler
        .sample(adapter, handle, &refs, &SamplingConfig::default(), 7, &cancel, |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Cancelled));
}
