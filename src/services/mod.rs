pub mod connection_registry;
pub mod detection;
pub mod mysql_client;
pub mod mysql_pool_manager;
pub mod notification;
pub mod orchestrator;
pub mod quasi_identifier;
pub mod report_assembler;
pub mod sampler;
pub mod scan_store;
pub mod source_adapter;

pub use connection_registry::{ConnectionHandle, ConnectionRegistry};
pub use detection::{
    ColumnData, DetectionPipeline, DetectionStrategy, HeuristicStrategy, NerStrategy,
    RegexStrategy,
};
pub use mysql_client::MySQLClient;
pub use mysql_pool_manager::MySQLPoolManager;
pub use notification::{NotificationSink, ProgressReporter};
pub use orchestrator::ScanOrchestrator;
pub use quasi_identifier::QuasiIdentifierAnalyzer;
pub use sampler::Sampler;
pub use scan_store::ScanStore;
pub use source_adapter::{MySqlSourceAdapter, SourceAdapter, create_adapter};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::utils::{ApiError, ApiResult};

/// Per-job cooperative cancellation flag.
///
/// Raised by `cancel()`; long-running stages check it between columns and
/// between pipeline stages and bail out with CancelledError.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Cooperative checkpoint
    pub fn check(&self) -> ApiResult<()> {
        if self.is_cancelled() { Err(ApiError::Cancelled) } else { Ok(()) }
    }
}
