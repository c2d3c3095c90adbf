use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::schema::ColumnRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusteringAlgorithm {
    Graph,
    Dbscan,
}

impl ClusteringAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graph => "GRAPH",
            Self::Dbscan => "DBSCAN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "DBSCAN" => Self::Dbscan,
            _ => Self::Graph,
        }
    }
}

impl std::fmt::Display for ClusteringAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct QuasiIdentifierConfig {
    pub enabled: bool,
    /// |correlation| at or above this links two columns
    pub correlation_threshold: f64,
    pub min_distinct_values: usize,
    pub max_distinct_value_ratio: f64,
    pub min_group_size: usize,
    pub max_group_size: usize,
    pub k_anonymity_threshold: f64,
    pub risk_threshold: f64,
    pub algorithm: ClusteringAlgorithm,
}

impl Default for QuasiIdentifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            correlation_threshold: 0.7,
            min_distinct_values: 5,
            max_distinct_value_ratio: 0.8,
            min_group_size: 2,
            max_group_size: 8,
            k_anonymity_threshold: 5.0,
            risk_threshold: 0.7,
            algorithm: ClusteringAlgorithm::Graph,
        }
    }
}

impl QuasiIdentifierConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err("correlation_threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.risk_threshold) {
            return Err("risk_threshold must be within [0, 1]".to_string());
        }
        if self.min_group_size < 2 {
            return Err("min_group_size must be >= 2".to_string());
        }
        if self.max_group_size < self.min_group_size {
            return Err("max_group_size must be >= min_group_size".to_string());
        }
        Ok(())
    }
}

/// Columns that jointly raise re-identification risk
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuasiIdentifierGroup {
    pub columns: Vec<ColumnRef>,
    pub risk_score: f64,
    pub clustering_method: ClusteringAlgorithm,
}
