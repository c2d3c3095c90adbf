use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::connection::{ConnectionDescriptor, DriverKind};
use super::detection::{DetectionConfig, DetectionResult};
use super::quasi_identifier::{QuasiIdentifierConfig, QuasiIdentifierGroup};
use super::sample::SamplingConfig;

/// Credential-free snapshot of the scanned database
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatabaseInfo {
    pub connection_id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub driver: DriverKind,
}

impl From<&ConnectionDescriptor> for DatabaseInfo {
    fn from(d: &ConnectionDescriptor) -> Self {
        Self {
            connection_id: d.id,
            name: d.name.clone(),
            host: d.host.clone(),
            port: d.port,
            database_name: d.database_name.clone(),
            driver: d.driver,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanSummary {
    pub total_tables: u64,
    pub total_columns: u64,
    pub columns_scanned: u64,
    pub pii_columns_found: u64,
    pub quasi_identifier_groups: u64,
    pub failed_columns: u64,
}

/// Immutable roll-up of a completed scan. Assembled exactly once at job
/// completion; reads return the stored serialization untouched.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplianceReport {
    pub scan_id: Uuid,
    pub database: DatabaseInfo,
    pub summary: ScanSummary,
    pub detection_results: Vec<DetectionResult>,
    pub quasi_identifier_groups: Vec<QuasiIdentifierGroup>,
    pub sampling_config: SamplingConfig,
    pub detection_config: DetectionConfig,
    pub quasi_identifier_config: QuasiIdentifierConfig,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}
