use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::models::{
    ColumnInfo, ColumnRef, DetectionConfig, DetectionMethod, PiiCandidate, PiiType, SampleData,
    SampleStatus,
};
use crate::services::detection::{ColumnData, DetectionPipeline, DetectionStrategy};
use crate::services::CancelFlag;
use crate::utils::{ApiError, ApiResult};

/// Strategy double that counts invocations and returns a fixed candidate
struct CountingStrategy {
    method: DetectionMethod,
    calls: Arc<AtomicUsize>,
    emit: Option<(PiiType, f64)>,
    fail_on: Option<String>,
}

impl CountingStrategy {
    fn new(method: DetectionMethod, emit: Option<(PiiType, f64)>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self { method, calls: Arc::clone(&calls), emit, fail_on: None }),
            calls,
        )
    }

    fn failing_on(
        method: DetectionMethod,
        column: &str,
        emit: Option<(PiiType, f64)>,
    ) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                method,
                calls: Arc::clone(&calls),
                emit,
                fail_on: Some(column.to_string()),
            }),
            calls,
        )
    }
}

#[async_trait]
impl DetectionStrategy for CountingStrategy {
    fn method(&self) -> DetectionMethod {
        self.method
    }

    async fn evaluate(&self, data: &ColumnData) -> ApiResult<Vec<PiiCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(fail_on) = &self.fail_on {
            if &data.column.column == fail_on {
                return Err(ApiError::detection_error("strategy exploded"));
            }
        }

        Ok(self
            .emit
            .iter()
            .map(|(pii_type, confidence)| PiiCandidate {
                column: data.column.clone(),
                pii_type: *pii_type,
                confidence: *confidence,
                method: self.method,
                evidence: None,
            })
            .collect())
    }
}

fn column(name: &str, values: &[&str]) -> ColumnData {
    let column = ColumnRef::new("app", "users", name);
    let values: Vec<Option<String>> = values.iter().map(|v| Some(v.to_string())).collect();
    let total_rows = values.len();
    ColumnData {
        column: column.clone(),
        info: ColumnInfo {
            name: name.to_string(),
            data_type: "varchar".to_string(),
            size: Some(255),
            nullable: true,
            primary_key: false,
            foreign_key: false,
            comment: None,
        },
        sample: SampleData {
            column,
            values,
            null_count: 0,
            total_rows,
            entropy: None,
            status: SampleStatus::Ok,
            error_message: None,
        },
    }
}

fn failed_column(name: &str) -> ColumnData {
    let mut data = column(name, &[]);
    data.sample = SampleData::failed(data.column.clone(), "boom");
    data
}

#[tokio::test]
async fn high_confidence_heuristic_short_circuits_later_strategies() {
    // users.email_address with no samples: heuristic wins at 0.9 and the
    // regex / NER stages must never be invoked
    let (heuristic, heuristic_calls) =
        CountingStrategy::new(DetectionMethod::Heuristic, Some((PiiType::Email, 0.9)));
    let (regex, regex_calls) = CountingStrategy::new(DetectionMethod::Regex, None);
    let (ner, ner_calls) = CountingStrategy::new(DetectionMethod::Ner, None);

    let pipeline = DetectionPipeline::new(vec![heuristic, regex, ner]);
    let config = DetectionConfig::default();

    let results = pipeline
        .detect(
            vec![column("email_address", &[])],
            &config,
            4,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.has_pii);
    assert_eq!(result.winning_type, PiiType::Email);
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].method, DetectionMethod::Heuristic);

    assert_eq!(heuristic_calls.load(Ordering::SeqCst), 1);
    assert_eq!(regex_calls.load(Ordering::SeqCst), 0, "regex ran despite short-circuit");
    assert_eq!(ner_calls.load(Ordering::SeqCst), 0, "NER ran despite short-circuit");
}

#[tokio::test]
async fn below_threshold_candidates_do_not_short_circuit() {
    // 0.69 is just under the 0.7 heuristic stage threshold
    let (heuristic, _) =
        CountingStrategy::new(DetectionMethod::Heuristic, Some((PiiType::Email, 0.69)));
    let (regex, regex_calls) = CountingStrategy::new(DetectionMethod::Regex, None);

    let pipeline = DetectionPipeline::new(vec![heuristic, regex]);
    let results = pipeline
        .detect(
            vec![column("maybe_email", &[])],
            &DetectionConfig::default(),
            4,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    assert_eq!(regex_calls.load(Ordering::SeqCst), 1);
    // 0.69 still beats the 0.5 reporting threshold
    assert!(results[0].has_pii);
    assert!((results[0].confidence - 0.69).abs() < 1e-9);
}

#[tokio::test]
async fn short_circuit_can_be_disabled() {
    let (heuristic, _) =
        CountingStrategy::new(DetectionMethod::Heuristic, Some((PiiType::Email, 0.95)));
    let (regex, regex_calls) = CountingStrategy::new(DetectionMethod::Regex, None);
    let (ner, ner_calls) = CountingStrategy::new(DetectionMethod::Ner, None);

    let pipeline = DetectionPipeline::new(vec![heuristic, regex, ner]);
    let config =
        DetectionConfig { stop_pipeline_on_high_confidence: false, ..Default::default() };

    pipeline
        .detect(vec![column("email", &[])], &config, 4, &CancelFlag::new(), |_, _| {})
        .await
        .unwrap();

    assert_eq!(regex_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ner_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_samples_produce_empty_results_without_strategy_calls() {
    let (heuristic, heuristic_calls) =
        CountingStrategy::new(DetectionMethod::Heuristic, Some((PiiType::Email, 0.9)));

    let pipeline = DetectionPipeline::new(vec![heuristic]);
    let results = pipeline
        .detect(
            vec![failed_column("broken"), column("email", &[])],
            &DetectionConfig::default(),
            4,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    let broken = results.iter().find(|r| r.column.column == "broken").unwrap();
    assert!(!broken.has_pii);
    assert!(broken.candidates.is_empty());
    assert_eq!(broken.winning_type, PiiType::Unknown);
    assert_eq!(broken.sample_status, SampleStatus::Failed);

    // Only the healthy column reached the strategies
    assert_eq!(heuristic_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn strategy_errors_are_isolated_per_column() {
    let (heuristic, _) = CountingStrategy::failing_on(
        DetectionMethod::Heuristic,
        "cursed",
        Some((PiiType::Email, 0.9)),
    );
    let (regex, _) = CountingStrategy::new(DetectionMethod::Regex, Some((PiiType::Phone, 0.8)));

    let pipeline = DetectionPipeline::new(vec![heuristic, regex]);
    let results = pipeline
        .detect(
            vec![column("cursed", &[]), column("email", &[])],
            &DetectionConfig::default(),
            4,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    // The cursed column still got regex candidates
    let cursed = results.iter().find(|r| r.column.column == "cursed").unwrap();
    assert!(cursed.has_pii);
    assert_eq!(cursed.winning_type, PiiType::Phone);

    let email = results.iter().find(|r| r.column.column == "email").unwrap();
    assert_eq!(email.winning_type, PiiType::Email);
}

#[tokio::test]
async fn all_candidates_are_kept_on_the_result() {
    let (heuristic, _) =
        CountingStrategy::new(DetectionMethod::Heuristic, Some((PiiType::Email, 0.6)));
    let (regex, _) = CountingStrategy::new(DetectionMethod::Regex, Some((PiiType::Phone, 0.9)));

    let pipeline = DetectionPipeline::new(vec![heuristic, regex]);
    let results = pipeline
        .detect(
            vec![column("mixed", &[])],
            &DetectionConfig::default(),
            4,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    let result = &results[0];
    assert_eq!(result.candidates.len(), 2);
    assert_eq!(result.winning_type, PiiType::Phone);
    assert!((result.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn results_come_back_sorted_by_table_and_column() {
    let (heuristic, _) = CountingStrategy::new(DetectionMethod::Heuristic, None);
    let pipeline = DetectionPipeline::new(vec![heuristic]);

    let results = pipeline
        .detect(
            vec![column("zeta", &[]), column("alpha", &[]), column("mid", &[])],
            &DetectionConfig::default(),
            2,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    let names: Vec<&str> = results.iter().map(|r| r.column.column.as_str()).collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn below_reporting_threshold_means_no_pii() {
    let (heuristic, _) =
        CountingStrategy::new(DetectionMethod::Heuristic, Some((PiiType::Email, 0.4)));
    let pipeline = DetectionPipeline::new(vec![heuristic]);

    let results = pipeline
        .detect(
            vec![column("faint", &[])],
            &DetectionConfig::default(),
            4,
            &CancelFlag::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    let result = &results[0];
    assert!(!result.has_pii);
    assert_eq!(result.winning_type, PiiType::Unknown);
    // The candidate itself is still recorded
    assert_eq!(result.candidates.len(), 1);
}
