use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result alias used throughout services and handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified error type for the scan service.
///
/// Variants mirror the failure taxonomy of the pipeline: caller mistakes
/// (Validation/NotFound/...), capacity limits (ResourceExhausted/Busy),
/// per-stage faults (Connection/Metadata/Sampling/Detection/NerService),
/// and terminal outcomes (Cancelled/Persistence/Internal).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Cancel requested on a job that already reached a terminal state
    #[error("{0}")]
    AlreadyTerminal(String),

    /// Report requested for a job that has not completed
    #[error("{0}")]
    NotCompleted(String),

    /// Pool or queue limit hit; retryable with backoff
    #[error("{0}")]
    ResourceExhausted(String),

    /// Operation refused because live handles still exist
    #[error("{0}")]
    Busy(String),

    /// Target database unreachable or refused the connection
    #[error("{0}")]
    Connection(String),

    /// Schema introspection failure; fatal to the job
    #[error("{0}")]
    Metadata(String),

    /// Per-column sampling fault; isolated to the column
    #[error("{0}")]
    Sampling(String),

    /// Strategy-internal fault; the strategy yields an empty result
    #[error("{0}")]
    Detection(String),

    /// NER sidecar failure; absorbed by the circuit breaker
    #[error("{0}")]
    NerService(String),

    /// Expected outcome of a cancel request
    #[error("scan cancelled")]
    Cancelled,

    /// Control-store write failure; fatal to the job's write phase
    #[error("{0}")]
    Persistence(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn connection_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("Connection {} not found", id))
    }

    pub fn scan_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("Scan job {} not found", id))
    }

    pub fn already_terminal(msg: impl Into<String>) -> Self {
        Self::AlreadyTerminal(msg.into())
    }

    pub fn not_completed(msg: impl Into<String>) -> Self {
        Self::NotCompleted(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn metadata_error(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    pub fn sampling_error(msg: impl Into<String>) -> Self {
        Self::Sampling(msg.into())
    }

    pub fn detection_error(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    pub fn ner_error(msg: impl Into<String>) -> Self {
        Self::NerService(msg.into())
    }

    pub fn persistence_error(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable kind for API payloads and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            Self::NotCompleted(_) => "NOT_COMPLETED",
            Self::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Self::Busy(_) => "BUSY",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Metadata(_) => "METADATA_ERROR",
            Self::Sampling(_) => "SAMPLING_ERROR",
            Self::Detection(_) => "DETECTION_ERROR",
            Self::NerService(_) => "NER_SERVICE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyTerminal(_) | Self::Busy(_) | Self::NotCompleted(_) => {
                StatusCode::CONFLICT
            },
            Self::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Cancelled => StatusCode::CONFLICT,
            Self::Connection(_) | Self::NerService(_) => StatusCode::BAD_GATEWAY,
            Self::Metadata(_)
            | Self::Sampling(_)
            | Self::Detection(_)
            | Self::Persistence(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("Record not found".to_string()),
            other => Self::Persistence(format!("Database error: {}", other)),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Caller mistakes stay below error level; everything else is ours
        if status.is_server_error() {
            tracing::error!("{}: {}", self.kind(), self);
        } else {
            tracing::warn!("{}: {}", self.kind(), self);
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
