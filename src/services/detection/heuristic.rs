use async_trait::async_trait;
use std::collections::HashMap;

use super::{ColumnData, DetectionStrategy};
use crate::models::{DetectionMethod, PiiCandidate, PiiType};
use crate::utils::ApiResult;

/// Curated keyword table: keyword, PII type, base confidence.
///
/// Keywords are matched against lowercased name/comment tokens; multi-word
/// keywords use underscores and match after separator normalization.
const KEYWORDS: &[(&str, PiiType, f64)] = &[
    ("ssn", PiiType::Ssn, 0.95),
    ("social_security", PiiType::Ssn, 0.95),
    ("email", PiiType::Email, 0.9),
    ("mail", PiiType::Email, 0.7),
    ("phone", PiiType::Phone, 0.85),
    ("mobile", PiiType::Phone, 0.8),
    ("telephone", PiiType::Phone, 0.85),
    ("fax", PiiType::Phone, 0.7),
    ("credit_card", PiiType::CreditCard, 0.95),
    ("card_number", PiiType::CreditCard, 0.9),
    ("pan", PiiType::CreditCard, 0.6),
    ("address", PiiType::Address, 0.8),
    ("addr", PiiType::Address, 0.75),
    ("street", PiiType::Address, 0.7),
    ("zip", PiiType::Address, 0.65),
    ("postal", PiiType::Address, 0.65),
    ("city", PiiType::Location, 0.6),
    ("country", PiiType::Location, 0.55),
    ("first_name", PiiType::PersonName, 0.9),
    ("last_name", PiiType::PersonName, 0.9),
    ("full_name", PiiType::PersonName, 0.9),
    ("surname", PiiType::PersonName, 0.85),
    ("given_name", PiiType::PersonName, 0.85),
    ("name", PiiType::PersonName, 0.5),
    ("birth", PiiType::Date, 0.8),
    ("dob", PiiType::Date, 0.85),
    ("birthday", PiiType::Date, 0.85),
    ("ip_address", PiiType::IpAddress, 0.85),
    ("ip", PiiType::IpAddress, 0.5),
    ("passport", PiiType::NationalId, 0.9),
    ("national_id", PiiType::NationalId, 0.9),
    ("tax_id", PiiType::NationalId, 0.85),
    ("company", PiiType::Organization, 0.5),
    ("employer", PiiType::Organization, 0.6),
];

const EXACT_TOKEN_MULTIPLIER: f64 = 1.0;
const NAME_SUBSTRING_MULTIPLIER: f64 = 0.7;
const COMMENT_TOKEN_MULTIPLIER: f64 = 0.6;

/// Metadata-only strategy: scans column name and comment against the
/// keyword table. Cheap, runs first, and usually short-circuits obvious
/// columns before any value ever leaves the database.
pub struct HeuristicStrategy;

impl HeuristicStrategy {
    pub fn new() -> Self {
        Self
    }

    fn evaluate_metadata(&self, data: &ColumnData) -> Vec<PiiCandidate> {
        let name = normalize(&data.info.name);
        let name_tokens = tokenize(&name);
        let comment = data.info.comment.as_deref().map(normalize);
        let comment_tokens: Vec<String> =
            comment.as_deref().map(tokenize).unwrap_or_default();

        // Highest-scoring match per PII type
        let mut best: HashMap<PiiType, (f64, String)> = HashMap::new();

        for &(keyword, pii_type, base) in KEYWORDS {
            let mut score = 0.0;
            let mut evidence = String::new();

            if name_tokens.iter().any(|t| t == keyword) || name == keyword {
                score = base * EXACT_TOKEN_MULTIPLIER;
                evidence = format!("column name token '{}'", keyword);
            } else if name.contains(keyword) {
                score = base * NAME_SUBSTRING_MULTIPLIER;
                evidence = format!("column name contains '{}'", keyword);
            } else if comment_tokens.iter().any(|t| t == keyword) {
                score = base * COMMENT_TOKEN_MULTIPLIER;
                evidence = format!("comment token '{}'", keyword);
            }

            if score > 0.0 {
                let entry = best.entry(pii_type).or_insert((0.0, String::new()));
                if score > entry.0 {
                    *entry = (score, evidence);
                }
            }
        }

        let mut candidates: Vec<PiiCandidate> = best
            .into_iter()
            .map(|(pii_type, (confidence, evidence))| PiiCandidate {
                column: data.column.clone(),
                pii_type,
                confidence,
                method: DetectionMethod::Heuristic,
                evidence: Some(evidence),
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

impl Default for HeuristicStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetectionStrategy for HeuristicStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Heuristic
    }

    async fn evaluate(&self, data: &ColumnData) -> ApiResult<Vec<PiiCandidate>> {
        Ok(self.evaluate_metadata(data))
    }
}

/// Lowercase and collapse separators to underscores so "emailAddress",
/// "email-address" and "EMAIL_ADDRESS" all read the same
fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            out.extend(c.to_lowercase());
        } else {
            prev_lower = false;
            if !out.ends_with('_') {
                out.push('_');
            }
        }
    }
    out.trim_matches('_').to_string()
}

fn tokenize(normalized: &str) -> Vec<String> {
    let tokens: Vec<String> =
        normalized.split('_').filter(|t| !t.is_empty()).map(str::to_string).collect();

    // Adjacent token pairs cover multi-word keywords like "social_security"
    let mut all = tokens.clone();
    for pair in tokens.windows(2) {
        all.push(format!("{}_{}", pair[0], pair[1]));
    }
    all
}
