//! PII detection strategies and the pipeline that chains them.
//!
//! Three independent evaluators look at a column from different angles:
//! metadata keywords (heuristic), value patterns (regex), and a remote
//! entity recognizer (NER). The pipeline runs them in that order with
//! confidence-based short-circuiting and merges their candidates into one
//! DetectionResult per column.

pub mod heuristic;
pub mod ner;
pub mod pipeline;
pub mod regex_rules;

pub use heuristic::HeuristicStrategy;
pub use ner::NerStrategy;
pub use pipeline::DetectionPipeline;
pub use regex_rules::RegexStrategy;

use async_trait::async_trait;

use crate::models::{ColumnInfo, ColumnRef, DetectionMethod, PiiCandidate, SampleData};
use crate::utils::ApiResult;

/// A column under detection: its reference, schema metadata, and sample
#[derive(Debug, Clone)]
pub struct ColumnData {
    pub column: ColumnRef,
    pub info: ColumnInfo,
    pub sample: SampleData,
}

/// A single column evaluator. Strategies are stateless with respect to
/// jobs and safe to share across workers.
#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    fn method(&self) -> DetectionMethod;

    /// Evaluate one column, returning zero or more candidates.
    /// Strategy-internal faults surface as DetectionError and are absorbed
    /// by the pipeline.
    async fn evaluate(&self, data: &ColumnData) -> ApiResult<Vec<PiiCandidate>>;
}
