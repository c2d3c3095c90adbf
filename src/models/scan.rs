use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::detection::DetectionConfig;
use super::quasi_identifier::QuasiIdentifierConfig;
use super::sample::SamplingConfig;

/// Scan job lifecycle.
///
/// ```text
/// PENDING -> EXTRACTING_METADATA -> SAMPLING -> DETECTING_PII
///         -> GENERATING_REPORT -> COMPLETED
/// ```
/// Any non-terminal state may move to FAILED or CANCELLED. Transitions are
/// monotonic; COMPLETED, FAILED, and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Pending,
    ExtractingMetadata,
    Sampling,
    DetectingPii,
    GeneratingReport,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::ExtractingMetadata => "EXTRACTING_METADATA",
            Self::Sampling => "SAMPLING",
            Self::DetectingPii => "DETECTING_PII",
            Self::GeneratingReport => "GENERATING_REPORT",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "EXTRACTING_METADATA" => Some(Self::ExtractingMetadata),
            "SAMPLING" => Some(Self::Sampling),
            "DETECTING_PII" => Some(Self::DetectingPii),
            "GENERATING_REPORT" => Some(Self::GeneratingReport),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position on the happy path, used to enforce monotonic progress
    fn ordinal(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::ExtractingMetadata => 1,
            Self::Sampling => 2,
            Self::DetectingPii => 3,
            Self::GeneratingReport => 4,
            Self::Completed => 5,
            Self::Failed | Self::Cancelled => 6,
        }
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Cancelled => true,
            Self::Pending => false,
            _ => next.ordinal() == self.ordinal() + 1,
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan submission payload
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct ScanRequest {
    pub connection_id: Uuid,
    /// Allow-list of table names; empty or absent scans everything
    pub target_tables: Option<Vec<String>>,
    #[serde(default)]
    pub sampling_config: SamplingConfig,
    #[serde(default)]
    pub detection_config: DetectionConfig,
    #[serde(default)]
    pub quasi_identifier_config: QuasiIdentifierConfig,
    /// Client-supplied idempotency key; repeats within the dedup window
    /// return the original job id
    #[validate(length(max = 128))]
    pub request_id: Option<String>,
}

/// A scan job as tracked by the orchestrator and the control store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub status: ScanStatus,
    pub target_tables: Option<Vec<String>>,
    pub sampling_config: SamplingConfig,
    pub detection_config: DetectionConfig,
    pub quasi_identifier_config: QuasiIdentifierConfig,
    pub total_columns: u64,
    pub columns_scanned: u64,
    pub pii_columns_found: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new(request: &ScanRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection_id: request.connection_id,
            status: ScanStatus::Pending,
            target_tables: request.target_tables.clone().filter(|t| !t.is_empty()),
            sampling_config: request.sampling_config.clone(),
            detection_config: request.detection_config.clone(),
            quasi_identifier_config: request.quasi_identifier_config.clone(),
            total_columns: 0,
            columns_scanned: 0,
            pii_columns_found: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Read-only status snapshot handed to external observers
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScanJobStatus {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub status: ScanStatus,
    pub total_columns: u64,
    pub columns_scanned: u64,
    pub pii_columns_found: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ScanJob> for ScanJobStatus {
    fn from(job: &ScanJob) -> Self {
        Self {
            id: job.id,
            connection_id: job.connection_id,
            status: job.status,
            total_columns: job.total_columns,
            columns_scanned: job.columns_scanned,
            pii_columns_found: job.pii_columns_found,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanListFilter {
    pub status: Option<ScanStatus>,
    pub connection_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

/// Status event pushed to the notification sink on every transition and on
/// periodic progress ticks
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScanStatusEvent {
    pub job_id: Uuid,
    pub state: ScanStatus,
    pub progress_percent: Option<f64>,
    pub current_operation: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ScanStatusEvent {
    pub fn transition(job: &ScanJob) -> Self {
        Self {
            job_id: job.id,
            state: job.status,
            progress_percent: None,
            current_operation: None,
            timestamp: Utc::now(),
            error_message: job.error_message.clone(),
        }
    }

    pub fn progress(job_id: Uuid, state: ScanStatus, percent: f64, operation: String) -> Self {
        Self {
            job_id,
            state,
            progress_percent: Some(percent),
            current_operation: Some(operation),
            timestamp: Utc::now(),
            error_message: None,
        }
    }
}
