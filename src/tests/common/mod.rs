// Common test utilities and helpers

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::config::ScannerConfig;
use crate::models::{
    ColumnInfo, ColumnRef, CreateConnectionRequest, DriverKind, SamplingConfig, SchemaInfo,
    ScanStatus, TableInfo, TableKind,
};
use crate::services::{
    ConnectionHandle, ConnectionRegistry, DetectionPipeline, DetectionStrategy,
    HeuristicStrategy, MySQLPoolManager, NotificationSink, QuasiIdentifierAnalyzer, RegexStrategy,
    Sampler, ScanOrchestrator, ScanStore, SourceAdapter,
};
use crate::utils::{ApiError, ApiResult};

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// One column of a fake table: metadata plus the values its sampler returns
#[derive(Clone)]
pub struct FakeColumn {
    pub info: ColumnInfo,
    pub values: Vec<Option<String>>,
}

impl FakeColumn {
    pub fn text(name: &str, values: &[&str]) -> Self {
        Self {
            info: ColumnInfo {
                name: name.to_string(),
                data_type: "varchar".to_string(),
                size: Some(255),
                nullable: true,
                primary_key: false,
                foreign_key: false,
                comment: None,
            },
            values: values.iter().map(|v| Some(v.to_string())).collect(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.info.primary_key = true;
        self
    }
}

#[derive(Clone)]
pub struct FakeTable {
    pub name: String,
    pub columns: Vec<FakeColumn>,
}

impl FakeTable {
    pub fn new(name: &str, columns: Vec<FakeColumn>) -> Self {
        Self { name: name.to_string(), columns }
    }
}

/// In-memory stand-in for a target database. Tracks sampling concurrency
/// and call counts so tests can assert scheduling behavior.
pub struct FakeSourceAdapter {
    pub schema_name: String,
    pub tables: Vec<FakeTable>,
    pub fetch_delay: Duration,
    pub failing_columns: HashSet<String>,
    pub fail_metadata: bool,
    pub fetch_calls: AtomicUsize,
    concurrent: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl FakeSourceAdapter {
    pub fn new(schema_name: &str, tables: Vec<FakeTable>) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            tables,
            fetch_delay: Duration::ZERO,
            failing_columns: HashSet::new(),
            fail_metadata: false,
            fetch_calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_failing_column(mut self, column: &str) -> Self {
        self.failing_columns.insert(column.to_string());
        self
    }

    pub fn with_metadata_failure(mut self) -> Self {
        self.fail_metadata = true;
        self
    }

    pub fn observed_max_concurrency(&self) -> usize {
        self.max_concurrent.load(Ordering::Relaxed)
    }

    fn find_column(&self, column: &ColumnRef) -> Option<&FakeColumn> {
        self.tables
            .iter()
            .find(|t| t.name == column.table)?
            .columns
            .iter()
            .find(|c| c.info.name == column.column)
    }
}

#[async_trait]
impl SourceAdapter for FakeSourceAdapter {
    fn driver(&self) -> DriverKind {
        DriverKind::MySql
    }

    async fn extract_schema(
        &self,
        _handle: &ConnectionHandle,
        filter: Option<&[String]>,
    ) -> ApiResult<SchemaInfo> {
        if self.fail_metadata {
            return Err(ApiError::metadata_error("introspection refused by fake source"));
        }

        let tables = self
            .tables
            .iter()
            .filter(|t| match filter {
                Some(allow) if !allow.is_empty() => allow.contains(&t.name),
                _ => true,
            })
            .map(|t| TableInfo {
                name: t.name.clone(),
                kind: TableKind::Table,
                comment: None,
                columns: t.columns.iter().map(|c| c.info.clone()).collect(),
                relationships: Vec::new(),
            })
            .collect();

        let mut schema = SchemaInfo {
            catalog: "def".to_string(),
            schema: self.schema_name.clone(),
            tables,
        };
        schema.sort_tables();
        Ok(schema)
    }

    async fn fetch_values(
        &self,
        _handle: &ConnectionHandle,
        column: &ColumnRef,
        config: &SamplingConfig,
        _seed: u32,
    ) -> ApiResult<Vec<Option<String>>> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);

        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let result = if self.failing_columns.contains(&column.column) {
            Err(ApiError::sampling_error(format!("fake source refuses {}", column)))
        } else {
            match self.find_column(column) {
                Some(fake) => {
                    Ok(fake.values.iter().take(config.sample_size).cloned().collect())
                },
                None => Err(ApiError::sampling_error(format!("unknown column {}", column))),
            }
        };

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Fully wired orchestrator over a fake source, ready to scan
pub struct TestHarness {
    pub pool: SqlitePool,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<ScanStore>,
    pub sink: Arc<NotificationSink>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub connection_id: Uuid,
}

pub async fn register_test_connection(registry: &ConnectionRegistry) -> Uuid {
    registry
        .register(CreateConnectionRequest {
            name: format!("test-{}", Uuid::new_v4()),
            host: "127.0.0.1".to_string(),
            port: 3306,
            database_name: "testdb".to_string(),
            driver: DriverKind::MySql,
            username: "scanner".to_string(),
            password: "secret".to_string(),
            enable_ssl: false,
            max_handles: None,
        })
        .await
        .expect("Failed to register test connection")
        .id
}

pub async fn build_harness(
    adapter: Arc<dyn SourceAdapter>,
    scanner: ScannerConfig,
) -> TestHarness {
    let strategies: Vec<Arc<dyn DetectionStrategy>> =
        vec![Arc::new(HeuristicStrategy::new()), Arc::new(RegexStrategy::new())];
    let pool = create_test_db().await;

    let mysql_pool_manager = Arc::new(MySQLPoolManager::new());
    let registry = Arc::new(ConnectionRegistry::new(
        pool.clone(),
        Arc::clone(&mysql_pool_manager),
        scanner.max_handles_per_connection,
        scanner.handle_acquire_timeout(),
    ));
    let connection_id = register_test_connection(&registry).await;

    let store = Arc::new(ScanStore::new(pool.clone()));
    let sink = Arc::new(NotificationSink::default());
    let sampler = Arc::new(Sampler::new(scanner.query_timeout()));
    let pipeline = Arc::new(DetectionPipeline::new(strategies));

    let orchestrator = Arc::new(
        ScanOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            sampler,
            pipeline,
            Arc::new(QuasiIdentifierAnalyzer::new()),
            Arc::clone(&sink),
            scanner,
        )
        .with_adapter(adapter),
    );

    TestHarness { pool, registry, store, sink, orchestrator, connection_id }
}

/// Poll a job until its status satisfies the predicate or the timeout hits
pub async fn wait_for_status(
    orchestrator: &ScanOrchestrator,
    job_id: Uuid,
    timeout: Duration,
    predicate: impl Fn(ScanStatus) -> bool,
) -> ScanStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = orchestrator
            .status(job_id)
            .await
            .expect("status lookup failed")
            .status;
        if predicate(status) {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for status; last seen {}", status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A scanner config with short timeouts suited to tests
pub fn fast_scanner_config() -> ScannerConfig {
    ScannerConfig {
        worker_count: 2,
        max_queued: 100,
        max_handles_per_connection: 10,
        handle_acquire_timeout_secs: 1,
        query_timeout_secs: 5,
        cancellation_deadline_secs: 5,
    }
}
