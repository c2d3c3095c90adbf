//! Quasi-identifier analysis.
//!
//! Finds groups of non-PII columns that are mutually correlated strongly
//! enough to re-identify individuals in combination, and scores each
//! group's re-identification risk from k-anonymity and entropy.

pub mod clustering;
pub mod correlation;

use std::collections::HashMap;

use crate::models::{
    ClusteringAlgorithm, ColumnRef, DetectionResult, QuasiIdentifierConfig, QuasiIdentifierGroup,
};
use crate::services::detection::ColumnData;
use crate::services::sampler::shannon_entropy;

use correlation::{cramers_v, numeric_pairs, paired_values, pearson};

/// Columns below this entropy carry too little identifying power to matter
const MIN_ELIGIBLE_ENTROPY: f64 = 0.3;

/// Weight of the k-anonymity factor in the risk score
const K_ANONYMITY_WEIGHT: f64 = 0.6;
/// Weight of normalized entropy in the risk score
const ENTROPY_WEIGHT: f64 = 0.4;

const NUMERIC_TYPES: &[&str] = &[
    "int", "integer", "bigint", "smallint", "tinyint", "mediumint", "decimal", "numeric", "float",
    "double", "real",
];

struct EligibleColumn<'a> {
    result_index: usize,
    column: &'a ColumnRef,
    values: &'a [Option<String>],
    entropy: f64,
    distinct: usize,
    total_rows: usize,
    numeric: bool,
}

pub struct QuasiIdentifierAnalyzer;

impl QuasiIdentifierAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze the scan's columns and annotate member DetectionResults of
    /// every emitted group in place.
    pub fn analyze(
        &self,
        columns: &[ColumnData],
        results: &mut [DetectionResult],
        sample_size: usize,
        config: &QuasiIdentifierConfig,
    ) -> Vec<QuasiIdentifierGroup> {
        if !config.enabled {
            return Vec::new();
        }

        let eligible = self.eligible_columns(columns, results, config);
        if eligible.len() < config.min_group_size {
            tracing::debug!(
                "Quasi-identifier analysis skipped: {} eligible columns",
                eligible.len()
            );
            return Vec::new();
        }

        let matrix = correlation_matrix(&eligible);
        let member_groups = self.form_groups(&eligible, &matrix, config);

        let mut groups = Vec::new();
        for member_indices in member_groups {
            let members: Vec<&EligibleColumn> =
                member_indices.iter().map(|&i| &eligible[i]).collect();
            let risk = risk_score(&members, sample_size, config);

            if risk < config.risk_threshold {
                tracing::debug!(
                    "Dropping correlated group of {} columns below risk threshold ({:.3})",
                    members.len(),
                    risk
                );
                continue;
            }

            let column_refs: Vec<ColumnRef> =
                members.iter().map(|m| m.column.clone()).collect();

            for member in &members {
                let result = &mut results[member.result_index];
                result.is_quasi_identifier = true;
                result.quasi_identifier_risk_score = Some(risk);
                result.clustering_method = Some(config.algorithm);
                result.correlated_columns = column_refs
                    .iter()
                    .filter(|c| *c != member.column)
                    .cloned()
                    .collect();
            }

            groups.push(QuasiIdentifierGroup {
                columns: column_refs,
                risk_score: risk,
                clustering_method: config.algorithm,
            });
        }

        tracing::info!(
            "Quasi-identifier analysis found {} group(s) among {} eligible columns",
            groups.len(),
            eligible.len()
        );
        groups
    }

    /// Apply the eligibility filter and fix a deterministic column order
    fn eligible_columns<'a>(
        &self,
        columns: &'a [ColumnData],
        results: &[DetectionResult],
        config: &QuasiIdentifierConfig,
    ) -> Vec<EligibleColumn<'a>> {
        let result_index: HashMap<&ColumnRef, usize> =
            results.iter().enumerate().map(|(i, r)| (&r.column, i)).collect();

        let mut eligible: Vec<EligibleColumn<'a>> = columns
            .iter()
            .filter_map(|data| {
                let &index = result_index.get(&data.column)?;
                let result = &results[index];

                if result.has_pii || data.info.primary_key || data.info.foreign_key {
                    return None;
                }
                if data.sample.is_failed() || data.sample.total_rows == 0 {
                    return None;
                }

                let distinct = data.sample.distinct_count();
                if distinct < config.min_distinct_values {
                    return None;
                }
                let ratio = distinct as f64 / data.sample.total_rows as f64;
                if ratio > config.max_distinct_value_ratio {
                    return None;
                }

                let entropy = data
                    .sample
                    .entropy
                    .unwrap_or_else(|| shannon_entropy(data.sample.non_null_values()));
                if entropy < MIN_ELIGIBLE_ENTROPY {
                    return None;
                }

                Some(EligibleColumn {
                    result_index: index,
                    column: &data.column,
                    values: &data.sample.values,
                    entropy,
                    distinct,
                    total_rows: data.sample.total_rows,
                    numeric: is_numeric_column(data),
                })
            })
            .collect();

        // (table, column) ascending: ties in correlation and clustering all
        // resolve through this order
        eligible.sort_by(|a, b| {
            (&a.column.table, &a.column.column).cmp(&(&b.column.table, &b.column.column))
        });
        eligible
    }

    fn form_groups(
        &self,
        eligible: &[EligibleColumn],
        matrix: &[Vec<f64>],
        config: &QuasiIdentifierConfig,
    ) -> Vec<Vec<usize>> {
        let n = eligible.len();
        let candidates = match config.algorithm {
            ClusteringAlgorithm::Graph => clustering::connected_components(n, |a, b| {
                a != b && matrix[a][b] >= config.correlation_threshold
            }),
            ClusteringAlgorithm::Dbscan => {
                let distance = |a: usize, b: usize| 1.0 - matrix[a][b];
                let eps = 1.0 - config.correlation_threshold;
                let clusters = clustering::dbscan(n, distance, eps, config.min_group_size);
                if clusters.is_empty() {
                    // One relaxed retry before giving up
                    clustering::dbscan(n, distance, eps + 0.1, config.min_group_size)
                } else {
                    clusters
                }
            },
        };

        candidates
            .into_iter()
            .filter(|group| {
                group.len() >= config.min_group_size && group.len() <= config.max_group_size
            })
            .collect()
    }
}

impl Default for QuasiIdentifierAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_numeric_column(data: &ColumnData) -> bool {
    let declared = data.info.data_type.to_ascii_lowercase();
    if NUMERIC_TYPES.iter().any(|t| declared.starts_with(t)) {
        return true;
    }
    // Fallback for text-typed columns holding numbers
    let mut any = false;
    for value in data.sample.non_null_values() {
        if value.trim().parse::<f64>().is_err() {
            return false;
        }
        any = true;
    }
    any
}

fn correlation_matrix(eligible: &[EligibleColumn]) -> Vec<Vec<f64>> {
    let n = eligible.len();
    let mut matrix = vec![vec![0.0; n]; n];

    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let rho = column_correlation(&eligible[i], &eligible[j]);
            matrix[i][j] = rho;
            matrix[j][i] = rho;
        }
    }
    matrix
}

fn column_correlation(a: &EligibleColumn, b: &EligibleColumn) -> f64 {
    let pairs = paired_values(a.values, b.values);
    if pairs.len() < 2 {
        return 0.0;
    }

    if a.numeric && b.numeric {
        if let Some((xs, ys)) = numeric_pairs(&pairs) {
            return pearson(&xs, &ys).abs();
        }
    }
    cramers_v(&pairs).abs()
}

/// risk = 0.6 * kAnonymityFactor + 0.4 * normalizedEntropy
fn risk_score(
    members: &[&EligibleColumn],
    sample_size: usize,
    config: &QuasiIdentifierConfig,
) -> f64 {
    let total_rows = members.iter().map(|m| m.total_rows).max().unwrap_or(0).max(1) as f64;

    // Distinct-combination estimate: product of per-column distinct counts,
    // capped at the sample size
    let mut combinations: f64 = 1.0;
    for member in members {
        combinations *= member.distinct.max(1) as f64;
    }
    let combinations = combinations.min(sample_size.max(1) as f64).max(1.0);

    let k_anonymity = total_rows / combinations;
    let k_factor = (config.k_anonymity_threshold / (k_anonymity + 1.0)).min(1.0);

    let mean_entropy =
        members.iter().map(|m| m.entropy).sum::<f64>() / members.len().max(1) as f64;
    let entropy_denom = (sample_size.max(2) as f64).log2();
    let normalized_entropy = (mean_entropy / entropy_denom).clamp(0.0, 1.0);

    K_ANONYMITY_WEIGHT * k_factor + ENTROPY_WEIGHT * normalized_entropy
}
