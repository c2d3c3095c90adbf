use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::schema::ColumnRef;

/// How rows are drawn from a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SamplingMethod {
    Random,
    Systematic,
    Stratified,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SamplingConfig {
    /// Maximum values drawn per column
    pub sample_size: usize,
    pub method: SamplingMethod,
    /// Compute Shannon entropy over non-null values
    pub entropy_calculation: bool,
    /// Per-job cap on concurrent sampling queries
    pub max_concurrent_queries: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            method: SamplingMethod::Random,
            entropy_calculation: false,
            max_concurrent_queries: 5,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_size < 1 {
            return Err("sample_size must be >= 1".to_string());
        }
        if self.max_concurrent_queries < 1 {
            return Err("max_concurrent_queries must be >= 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleStatus {
    Ok,
    Failed,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "FAILED" => Self::Failed,
            _ => Self::Ok,
        }
    }
}

/// Values drawn from one column. Duplicates and nulls are preserved in
/// database-returned order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleData {
    pub column: ColumnRef,
    pub values: Vec<Option<String>>,
    pub null_count: usize,
    pub total_rows: usize,
    /// Shannon entropy (base 2) over non-null values, 4 decimal places
    pub entropy: Option<f64>,
    pub status: SampleStatus,
    pub error_message: Option<String>,
}

impl SampleData {
    pub fn failed(column: ColumnRef, message: impl Into<String>) -> Self {
        Self {
            column,
            values: Vec::new(),
            null_count: 0,
            total_rows: 0,
            entropy: None,
            status: SampleStatus::Failed,
            error_message: Some(message.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SampleStatus::Failed
    }

    pub fn non_null_values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(|v| v.as_deref())
    }

    pub fn non_null_count(&self) -> usize {
        self.total_rows.saturating_sub(self.null_count)
    }

    pub fn null_ratio(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        self.null_count as f64 / self.total_rows as f64
    }

    pub fn distinct_count(&self) -> usize {
        self.non_null_values().collect::<std::collections::HashSet<_>>().len()
    }
}
