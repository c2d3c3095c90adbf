// Source Adapter Module
// Purpose: Provide a unified interface over target-database dialects for
// schema introspection and column sampling.
// Design: Trait object behind Arc; one stateless adapter per driver.

mod mysql;

pub use mysql::MySqlSourceAdapter;

use crate::models::{ColumnRef, DriverKind, SamplingConfig, SchemaInfo};
use crate::services::ConnectionHandle;
use crate::utils::ApiResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Dialect seam between the scan pipeline and a concrete database.
///
/// Implementations are stateless; every call works through a borrowed
/// connection handle.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Driver this adapter speaks
    fn driver(&self) -> DriverKind;

    /// Introspect the connected database.
    ///
    /// `filter` is an optional allow-list of table names. Tables come back
    /// in deterministic (catalog, schema, name) codepoint order with
    /// columns, primary keys, comments, and both directions of foreign-key
    /// relationships resolved. Any underlying read failure surfaces as
    /// MetadataError; partial results are never returned.
    async fn extract_schema(
        &self,
        handle: &ConnectionHandle,
        filter: Option<&[String]>,
    ) -> ApiResult<SchemaInfo>;

    /// Draw up to `config.sample_size` values from one column, without
    /// replacement, nulls included, preserving database-returned order.
    /// `seed` keeps RANDOM draws reproducible within a job.
    async fn fetch_values(
        &self,
        handle: &ConnectionHandle,
        column: &ColumnRef,
        config: &SamplingConfig,
        seed: u32,
    ) -> ApiResult<Vec<Option<String>>>;

    /// Whether in-flight queries of a cancelled job can be interrupted.
    /// When false, queries run to completion and their results are
    /// discarded.
    fn supports_interrupt(&self) -> bool {
        false
    }
}

/// Create the adapter for a driver
pub fn create_adapter(driver: DriverKind) -> Arc<dyn SourceAdapter> {
    match driver {
        DriverKind::MySql => Arc::new(MySqlSourceAdapter::new()),
    }
}
