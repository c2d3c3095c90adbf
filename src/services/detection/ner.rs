//! NER strategy - HTTP client for the external entity-recognizer sidecar.
//!
//! The sidecar is treated as an unreliable collaborator: every call carries
//! a timeout with one retry, a process-wide circuit breaker gates repeated
//! failures, and a health probe (startup + periodic) can disable the
//! strategy entirely until the sidecar reports healthy again.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::{ColumnData, DetectionStrategy};
use crate::config::NerServiceConfig;
use crate::models::{DetectionMethod, PiiCandidate, PiiType};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
struct NerRequest {
    samples: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NerEntity {
    #[allow(dead_code)]
    text: String,
    #[serde(rename = "type")]
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct NerResponse {
    /// Outer list indexed parallel to the submitted samples
    results: Vec<Vec<NerEntity>>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[allow(dead_code)]
    model_loaded: bool,
}

/// Circuit breaker states gating calls to the sidecar
#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Remote entity-recognition strategy
pub struct NerStrategy {
    http_client: Client,
    config: NerServiceConfig,
    /// Process-wide breaker state shared by every job
    circuit: Mutex<CircuitState>,
    /// Latest health-probe verdict; unhealthy disables the strategy until
    /// the next successful probe
    healthy: AtomicBool,
}

impl NerStrategy {
    pub fn new(config: NerServiceConfig) -> Self {
        let http_client = Client::builder()
            .timeout(config.call_timeout())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            config,
            circuit: Mutex::new(CircuitState::Closed { consecutive_failures: 0 }),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Probe `GET /detect-pii/health`. A non-200 response or a status other
    /// than "ok" counts as a circuit-breaker failure.
    pub async fn health_probe(&self) -> bool {
        let url = format!("{}/detect-pii/health", self.config.base_url.trim_end_matches('/'));

        let healthy = match self.http_client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthResponse>().await {
                    Ok(body) => body.status == "ok",
                    Err(e) => {
                        tracing::warn!("NER health response unparseable: {}", e);
                        false
                    },
                }
            },
            Ok(response) => {
                tracing::warn!("NER health probe returned {}", response.status());
                false
            },
            Err(e) => {
                tracing::warn!("NER health probe failed: {}", e);
                false
            },
        };

        self.healthy.store(healthy, Ordering::Relaxed);
        if healthy {
            self.record_success();
            tracing::debug!("NER sidecar healthy");
        } else {
            self.record_failure();
        }
        healthy
    }

    /// Decide whether a call may go out right now. Returns false without
    /// calling while the circuit is OPEN (or a HALF_OPEN probe is already
    /// in flight).
    fn admit_call(&self) -> bool {
        let mut circuit = self.circuit.lock().expect("circuit breaker lock poisoned");
        match *circuit {
            CircuitState::Closed { .. } => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.reset_timeout() {
                    // Admit exactly one probe call
                    *circuit = CircuitState::HalfOpen;
                    tracing::info!("NER circuit moved to HALF_OPEN, admitting probe call");
                    true
                } else {
                    false
                }
            },
        }
    }

    fn record_success(&self) {
        let mut circuit = self.circuit.lock().expect("circuit breaker lock poisoned");
        if !matches!(*circuit, CircuitState::Closed { consecutive_failures: 0 }) {
            tracing::info!("NER circuit CLOSED");
        }
        *circuit = CircuitState::Closed { consecutive_failures: 0 };
    }

    fn record_failure(&self) {
        let mut circuit = self.circuit.lock().expect("circuit breaker lock poisoned");
        *circuit = match *circuit {
            CircuitState::Closed { consecutive_failures } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    tracing::warn!("NER circuit OPEN after {} consecutive failures", failures);
                    CircuitState::Open { since: Instant::now() }
                } else {
                    CircuitState::Closed { consecutive_failures: failures }
                }
            },
            CircuitState::HalfOpen => {
                tracing::warn!("NER probe call failed, circuit OPEN again");
                CircuitState::Open { since: Instant::now() }
            },
            open @ CircuitState::Open { .. } => open,
        };
    }

    /// One POST to /detect-pii with a single retry on timeout or
    /// connection failure
    async fn call_with_retry(&self, samples: &[String]) -> Result<NerResponse, ApiError> {
        match self.call_once(samples).await {
            Ok(response) => Ok(response),
            Err(RequestFailure::Retryable(first)) => {
                tracing::debug!("NER call failed ({}), retrying once", first);
                self.call_once(samples).await.map_err(|e| match e {
                    RequestFailure::Retryable(msg) | RequestFailure::Fatal(msg) => {
                        ApiError::ner_error(msg)
                    },
                })
            },
            Err(RequestFailure::Fatal(msg)) => Err(ApiError::ner_error(msg)),
        }
    }

    async fn call_once(&self, samples: &[String]) -> Result<NerResponse, RequestFailure> {
        let url = format!("{}/detect-pii", self.config.base_url.trim_end_matches('/'));
        let request = NerRequest { samples: samples.to_vec() };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RequestFailure::Retryable(format!(
                        "timeout after {:?}",
                        self.config.call_timeout()
                    ))
                } else if e.is_connect() {
                    RequestFailure::Retryable(format!("connection failed: {}", e))
                } else {
                    RequestFailure::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure::Fatal(format!("NER service returned {}", status)));
        }

        response
            .json::<NerResponse>()
            .await
            .map_err(|e| RequestFailure::Fatal(format!("Unparseable NER response: {}", e)))
    }

    fn candidates_from_response(
        &self,
        data: &ColumnData,
        sample_count: usize,
        response: NerResponse,
    ) -> Vec<PiiCandidate> {
        // label -> (scores, samples containing the label)
        let mut by_type: HashMap<PiiType, (Vec<f64>, usize)> = HashMap::new();

        for entities in response.results.iter().take(sample_count) {
            let mut seen_in_sample: HashMap<PiiType, bool> = HashMap::new();
            for entity in entities {
                let Some(pii_type) = map_entity_label(&entity.label) else {
                    continue;
                };
                let entry = by_type.entry(pii_type).or_insert((Vec::new(), 0));
                entry.0.push(entity.score.clamp(0.0, 1.0));
                seen_in_sample.entry(pii_type).or_insert(true);
            }
            for pii_type in seen_in_sample.keys() {
                if let Some(entry) = by_type.get_mut(pii_type) {
                    entry.1 += 1;
                }
            }
        }

        let mut candidates: Vec<PiiCandidate> = by_type
            .into_iter()
            .filter(|(_, (scores, _))| !scores.is_empty())
            .map(|(pii_type, (scores, covered))| {
                let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                let coverage = covered as f64 / sample_count as f64;
                PiiCandidate {
                    column: data.column.clone(),
                    pii_type,
                    confidence: mean * coverage,
                    method: DetectionMethod::Ner,
                    evidence: Some(format!(
                        "{} entities over {}/{} samples",
                        pii_type, covered, sample_count
                    )),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pii_type.as_str().cmp(b.pii_type.as_str()))
        });
        candidates
    }
}

enum RequestFailure {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
impl DetectionStrategy for NerStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Ner
    }

    async fn evaluate(&self, data: &ColumnData) -> ApiResult<Vec<PiiCandidate>> {
        if !self.config.enabled || !self.is_healthy() {
            return Ok(Vec::new());
        }

        let samples: Vec<String> = data
            .sample
            .non_null_values()
            .take(self.config.max_samples)
            .map(str::to_string)
            .collect();
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        if !self.admit_call() {
            tracing::debug!("NER circuit open, skipping {}", data.column);
            return Ok(Vec::new());
        }

        match self.call_with_retry(&samples).await {
            Ok(response) => {
                self.record_success();
                Ok(self.candidates_from_response(data, samples.len(), response))
            },
            Err(e) => {
                self.record_failure();
                tracing::warn!("NER evaluation of {} failed: {}", data.column, e);
                Ok(Vec::new())
            },
        }
    }
}

/// Fixed mapping from recognizer labels to PII types
fn map_entity_label(label: &str) -> Option<PiiType> {
    match label.to_ascii_uppercase().as_str() {
        "PERSON" | "PER" | "NAME" => Some(PiiType::PersonName),
        "EMAIL" | "EMAIL_ADDRESS" => Some(PiiType::Email),
        "PHONE" | "PHONE_NUMBER" => Some(PiiType::Phone),
        "SSN" | "US_SSN" => Some(PiiType::Ssn),
        "CREDIT_CARD" | "CARD" => Some(PiiType::CreditCard),
        "IP" | "IP_ADDRESS" => Some(PiiType::IpAddress),
        "DATE" | "DATE_TIME" => Some(PiiType::Date),
        "ADDRESS" => Some(PiiType::Address),
        "ORG" | "ORGANIZATION" => Some(PiiType::Organization),
        "LOC" | "LOCATION" | "GPE" => Some(PiiType::Location),
        "ID" | "NATIONAL_ID" | "PASSPORT" => Some(PiiType::NationalId),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_to_pii_types() {
        assert_eq!(map_entity_label("PERSON"), Some(PiiType::PersonName));
        assert_eq!(map_entity_label("email"), Some(PiiType::Email));
        assert_eq!(map_entity_label("GPE"), Some(PiiType::Location));
        assert_eq!(map_entity_label("MISC"), None);
    }

    #[test]
    fn confidence_is_mean_score_times_coverage() {
        let config = NerServiceConfig::default();
        let strategy = NerStrategy::new(config);

        let column = crate::models::ColumnRef::new("app", "users", "bio");
        let data = ColumnData {
            column: column.clone(),
            info: crate::models::ColumnInfo {
                name: "bio".to_string(),
                data_type: "text".to_string(),
                size: None,
                nullable: true,
                primary_key: false,
                foreign_key: false,
                comment: None,
            },
            sample: crate::models::SampleData {
                column,
                values: Vec::new(),
                null_count: 0,
                total_rows: 0,
                entropy: None,
                status: crate::models::SampleStatus::Ok,
                error_message: None,
            },
        };

        // 2 of 4 samples carry a PERSON entity, scores 0.8 and 0.6
        let response = NerResponse {
            results: vec![
                vec![NerEntity { text: "Ada".into(), label: "PERSON".into(), score: 0.8 }],
                vec![],
                vec![NerEntity { text: "Alan".into(), label: "PERSON".into(), score: 0.6 }],
                vec![],
            ],
        };

        let candidates = strategy.candidates_from_response(&data, 4, response);
        assert_eq!(candidates.len(), 1);
        let person = &candidates[0];
        assert_eq!(person.pii_type, PiiType::PersonName);
        // mean(0.8, 0.6) * coverage(2/4) = 0.35
        assert!((person.confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn breaker_opens_after_threshold_and_admits_probe_after_reset() {
        let config = NerServiceConfig {
            failure_threshold: 3,
            reset_timeout_secs: 0,
            ..NerServiceConfig::default()
        };
        let strategy = NerStrategy::new(config);

        assert!(strategy.admit_call());
        strategy.record_failure();
        strategy.record_failure();
        assert!(strategy.admit_call());
        strategy.record_failure();

        // Threshold reached: with a zero reset timeout the next admission is
        // the HALF_OPEN probe, and only one probe may be in flight
        assert!(strategy.admit_call());
        assert!(!strategy.admit_call());

        // Probe failure reopens, probe success closes
        strategy.record_failure();
        assert!(strategy.admit_call());
        strategy.record_success();
        assert!(strategy.admit_call());
        assert!(strategy.admit_call());
    }
}
