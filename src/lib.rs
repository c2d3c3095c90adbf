//! PrivSense Library
//!
//! Core modules of the PrivSense scan service: connection registry,
//! schema introspection, bounded-parallel sampling, the multi-strategy
//! PII detection pipeline, quasi-identifier analysis, and the scan
//! orchestrator with its persistence and notification layers.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    ConnectionRegistry, DetectionPipeline, HeuristicStrategy, MySQLPoolManager, NerStrategy,
    NotificationSink, QuasiIdentifierAnalyzer, RegexStrategy, Sampler, ScanOrchestrator, ScanStore,
};
pub use utils::{ApiError, ApiResult};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All components are wrapped in Arc for cheap cloning and thread safety.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,

    pub registry: Arc<ConnectionRegistry>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub notification_sink: Arc<NotificationSink>,
}
