use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::quasi_identifier::ClusteringAlgorithm;
use super::sample::SampleStatus;
use super::schema::ColumnRef;

/// Categories of personally identifiable information the pipeline reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiType {
    PersonName,
    Email,
    Ssn,
    Phone,
    CreditCard,
    IpAddress,
    Date,
    Address,
    Organization,
    Location,
    NationalId,
    Unknown,
}

impl PiiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonName => "PERSON_NAME",
            Self::Email => "EMAIL",
            Self::Ssn => "SSN",
            Self::Phone => "PHONE",
            Self::CreditCard => "CREDIT_CARD",
            Self::IpAddress => "IP_ADDRESS",
            Self::Date => "DATE",
            Self::Address => "ADDRESS",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::NationalId => "NATIONAL_ID",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PERSON_NAME" => Self::PersonName,
            "EMAIL" => Self::Email,
            "SSN" => Self::Ssn,
            "PHONE" => Self::Phone,
            "CREDIT_CARD" => Self::CreditCard,
            "IP_ADDRESS" => Self::IpAddress,
            "DATE" => Self::Date,
            "ADDRESS" => Self::Address,
            "ORGANIZATION" => Self::Organization,
            "LOCATION" => Self::Location,
            "NATIONAL_ID" => Self::NationalId,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PiiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionMethod {
    Heuristic,
    Regex,
    Ner,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "HEURISTIC",
            Self::Regex => "REGEX",
            Self::Ner => "NER",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "REGEX" => Self::Regex,
            "NER" => Self::Ner,
            _ => Self::Heuristic,
        }
    }

    /// Tie-break priority between equal-confidence candidates:
    /// REGEX > HEURISTIC > NER
    pub fn priority(&self) -> u8 {
        match self {
            Self::Regex => 3,
            Self::Heuristic => 2,
            Self::Ner => 1,
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tentative PII determination from one strategy; immutable once emitted
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PiiCandidate {
    pub column: ColumnRef,
    pub pii_type: PiiType,
    pub confidence: f64,
    pub method: DetectionMethod,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DetectionConfig {
    pub heuristic_threshold: f64,
    pub regex_threshold: f64,
    pub ner_threshold: f64,
    /// Winning confidence at or above this marks the column as PII
    pub reporting_threshold: f64,
    pub stop_pipeline_on_high_confidence: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            heuristic_threshold: 0.7,
            regex_threshold: 0.8,
            ner_threshold: 0.3,
            reporting_threshold: 0.5,
            stop_pipeline_on_high_confidence: true,
        }
    }
}

impl DetectionConfig {
    pub fn stage_threshold(&self, method: DetectionMethod) -> f64 {
        match method {
            DetectionMethod::Heuristic => self.heuristic_threshold,
            DetectionMethod::Regex => self.regex_threshold,
            DetectionMethod::Ner => self.ner_threshold,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("heuristic_threshold", self.heuristic_threshold),
            ("regex_threshold", self.regex_threshold),
            ("ner_threshold", self.ner_threshold),
            ("reporting_threshold", self.reporting_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(format!("{} must be within [0, 1]", name));
            }
        }
        Ok(())
    }
}

/// Outcome of the detection pipeline for a single column
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DetectionResult {
    pub column: ColumnRef,
    /// Every candidate from every strategy that ran, in emission order
    pub candidates: Vec<PiiCandidate>,
    pub winning_type: PiiType,
    pub confidence: f64,
    pub has_pii: bool,
    pub is_quasi_identifier: bool,
    pub quasi_identifier_risk_score: Option<f64>,
    pub clustering_method: Option<ClusteringAlgorithm>,
    pub correlated_columns: Vec<ColumnRef>,
    pub sample_status: SampleStatus,
}

impl DetectionResult {
    /// Result for a column whose sample could not be drawn
    pub fn empty(column: ColumnRef, sample_status: SampleStatus) -> Self {
        Self {
            column,
            candidates: Vec::new(),
            winning_type: PiiType::Unknown,
            confidence: 0.0,
            has_pii: false,
            is_quasi_identifier: false,
            quasi_identifier_risk_score: None,
            clustering_method: None,
            correlated_columns: Vec::new(),
            sample_status,
        }
    }
}
