use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{ColumnData, DetectionStrategy};
use crate::models::{DetectionConfig, DetectionResult, PiiCandidate, PiiType};
use crate::services::CancelFlag;
use crate::utils::{ApiError, ApiResult};

/// Multi-strategy detection pipeline.
///
/// Strategies run in registration order (heuristic, regex, NER) and are
/// sequential within a column so short-circuiting can skip the expensive
/// stages; columns fan out in parallel up to the given limit. A strategy
/// fault degrades to an empty contribution and never aborts the column,
/// and a column fault never aborts the batch.
pub struct DetectionPipeline {
    strategies: Arc<Vec<Arc<dyn DetectionStrategy>>>,
}

impl DetectionPipeline {
    pub fn new(strategies: Vec<Arc<dyn DetectionStrategy>>) -> Self {
        Self { strategies: Arc::new(strategies) }
    }

    pub async fn detect(
        &self,
        columns: Vec<ColumnData>,
        config: &DetectionConfig,
        max_parallel_columns: usize,
        cancel: &CancelFlag,
        mut on_column_done: impl FnMut(usize, usize),
    ) -> ApiResult<Vec<DetectionResult>> {
        let total = columns.len();
        let semaphore = Arc::new(Semaphore::new(max_parallel_columns.max(1)));
        let mut join_set: JoinSet<DetectionResult> = JoinSet::new();
        let mut results = Vec::with_capacity(total);
        let mut done = 0usize;

        for data in columns {
            cancel.check()?;

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ApiError::internal_error("Pipeline semaphore closed"))?;

            while let Some(joined) = join_set.try_join_next() {
                if let Ok(result) = joined {
                    results.push(result);
                }
                done += 1;
                on_column_done(done, total);
            }

            let strategies = Arc::clone(&self.strategies);
            let config = config.clone();

            join_set.spawn(async move {
                let _permit = permit;
                detect_column(&strategies, data, &config).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok(result) = joined {
                results.push(result);
            }
            done += 1;
            on_column_done(done, total);
        }

        cancel.check()?;

        // Deterministic order regardless of completion order
        results.sort_by(|a, b| a.column.cmp(&b.column));

        let pii_found = results.iter().filter(|r| r.has_pii).count();
        tracing::info!("Detection finished: {} columns, {} flagged as PII", results.len(), pii_found);

        Ok(results)
    }
}

/// Run the strategy chain over a single column and select the winner
async fn detect_column(
    strategies: &[Arc<dyn DetectionStrategy>],
    data: ColumnData,
    config: &DetectionConfig,
) -> DetectionResult {
    // A failed sample produces an empty result; strategies never see it
    if data.sample.is_failed() {
        return DetectionResult::empty(data.column, data.sample.status);
    }

    let mut candidates: Vec<PiiCandidate> = Vec::new();

    for strategy in strategies {
        let emitted = match strategy.evaluate(&data).await {
            Ok(emitted) => emitted,
            Err(e) => {
                tracing::warn!(
                    "{} strategy failed on {}: {}",
                    strategy.method(),
                    data.column,
                    e
                );
                Vec::new()
            },
        };

        let stage_threshold = config.stage_threshold(strategy.method());
        let stop_here = config.stop_pipeline_on_high_confidence
            && emitted.iter().any(|c| c.confidence >= stage_threshold);

        candidates.extend(emitted);

        if stop_here {
            tracing::debug!(
                "{} short-circuited the pipeline for {}",
                strategy.method(),
                data.column
            );
            break;
        }
    }

    let winner = select_winner(&candidates);

    let (winning_type, confidence, has_pii) = match winner {
        Some(w) if w.confidence >= config.reporting_threshold => {
            (w.pii_type, w.confidence, true)
        },
        _ => (PiiType::Unknown, 0.0, false),
    };

    DetectionResult {
        column: data.column,
        candidates,
        winning_type,
        confidence,
        has_pii,
        is_quasi_identifier: false,
        quasi_identifier_risk_score: None,
        clustering_method: None,
        correlated_columns: Vec::new(),
        sample_status: data.sample.status,
    }
}

/// Highest-confidence candidate with deterministic tie-breaking:
/// higher method priority (REGEX > HEURISTIC > NER), then lower
/// alphabetical PII type name, then first emitted.
pub(crate) fn select_winner(candidates: &[PiiCandidate]) -> Option<&PiiCandidate> {
    let mut winner: Option<&PiiCandidate> = None;
    for candidate in candidates {
        let Some(current) = winner else {
            winner = Some(candidate);
            continue;
        };
        if beats(candidate, current) {
            winner = Some(candidate);
        }
    }
    winner
}

fn beats(challenger: &PiiCandidate, current: &PiiCandidate) -> bool {
    if challenger.confidence != current.confidence {
        return challenger.confidence > current.confidence;
    }
    if challenger.method.priority() != current.method.priority() {
        return challenger.method.priority() > current.method.priority();
    }
    // Lower alphabetical type name wins; equal keeps the earlier candidate
    challenger.pii_type.as_str() < current.pii_type.as_str()
}
