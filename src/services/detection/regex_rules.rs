use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{ColumnData, DetectionStrategy};
use crate::models::{DetectionMethod, PiiCandidate, PiiType};
use crate::utils::ApiResult;

/// A pattern is only reported when at least this share of non-null values
/// matches it
const MATCH_RATIO: f64 = 0.6;
/// Columns with fewer non-null values than this are skipped entirely
const MIN_NON_NULL: usize = 5;

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

// Area/group/serial exclusions are checked separately; the regex crate has
// no lookahead
static RE_SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$|^\d{9}$").unwrap());

static RE_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?1?[-. (]*\d{3}[-. )]*\d{3}[-. ]*\d{4}$|^\+[1-9]\d{7,14}$").unwrap()
});

static RE_CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d(?:[ -]?\d){12,18}$").unwrap());

static RE_IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)$")
        .unwrap()
});

static RE_IPV6: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{1,4}:){7}[0-9A-Fa-f]{1,4}$|^(?:[0-9A-Fa-f]{0,4}:){1,7}:(?:[0-9A-Fa-f]{1,4}:?){0,6}$")
        .unwrap()
});

static RE_ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])(?:[T ][0-9:.+\-Z]+)?$").unwrap()
});

struct ValuePattern {
    name: &'static str,
    pii_type: PiiType,
    base_confidence: f64,
    regex: &'static Lazy<Regex>,
    validator: Option<fn(&str) -> bool>,
}

static PATTERNS: &[ValuePattern] = &[
    ValuePattern {
        name: "email",
        pii_type: PiiType::Email,
        base_confidence: 0.95,
        regex: &RE_EMAIL,
        validator: None,
    },
    ValuePattern {
        name: "ssn",
        pii_type: PiiType::Ssn,
        base_confidence: 0.9,
        regex: &RE_SSN,
        validator: Some(ssn_is_plausible),
    },
    ValuePattern {
        name: "phone",
        pii_type: PiiType::Phone,
        base_confidence: 0.8,
        regex: &RE_PHONE,
        validator: None,
    },
    ValuePattern {
        name: "credit_card",
        pii_type: PiiType::CreditCard,
        base_confidence: 0.9,
        regex: &RE_CREDIT_CARD,
        validator: Some(luhn_valid),
    },
    ValuePattern {
        name: "ipv4",
        pii_type: PiiType::IpAddress,
        base_confidence: 0.85,
        regex: &RE_IPV4,
        validator: None,
    },
    ValuePattern {
        name: "ipv6",
        pii_type: PiiType::IpAddress,
        base_confidence: 0.85,
        regex: &RE_IPV6,
        validator: Some(ipv6_is_plausible),
    },
    ValuePattern {
        name: "iso_date",
        pii_type: PiiType::Date,
        base_confidence: 0.7,
        regex: &RE_ISO_DATE,
        validator: None,
    },
];

/// Value-pattern strategy: applies the pattern library to the non-null
/// sample values and emits a candidate when a qualified majority matches.
pub struct RegexStrategy;

impl RegexStrategy {
    pub fn new() -> Self {
        Self
    }

    fn evaluate_values(&self, data: &ColumnData) -> Vec<PiiCandidate> {
        let values: Vec<&str> = data.sample.non_null_values().map(str::trim).collect();
        let n = values.len();
        if n < MIN_NON_NULL {
            return Vec::new();
        }

        let required = min_matches(n);
        let mut candidates = Vec::new();

        for pattern in PATTERNS {
            let m = values
                .iter()
                .filter(|v| {
                    pattern.regex.is_match(v)
                        && pattern.validator.map(|check| check(v)).unwrap_or(true)
                })
                .count();

            if m >= required {
                let confidence = pattern.base_confidence * (m as f64 / n as f64);
                candidates.push(PiiCandidate {
                    column: data.column.clone(),
                    pii_type: pattern.pii_type,
                    confidence,
                    method: DetectionMethod::Regex,
                    evidence: Some(format!("pattern '{}' matched {}/{} values", pattern.name, m, n)),
                });
            }
        }

        candidates
    }
}

impl Default for RegexStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetectionStrategy for RegexStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Regex
    }

    async fn evaluate(&self, data: &ColumnData) -> ApiResult<Vec<PiiCandidate>> {
        Ok(self.evaluate_values(data))
    }
}

/// ceil(MATCH_RATIO * n) without floating-point edge cases
fn min_matches(n: usize) -> usize {
    ((3 * n).div_ceil(5)).max(1)
}

/// Luhn checksum over the digits of a candidate card number.
/// The separator-tolerant regex has already shaped the input.
pub fn luhn_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// North American SSN validity exclusions: area 000/666/9xx, group 00,
/// serial 0000 are never issued
pub fn ssn_is_plausible(value: &str) -> bool {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 9 {
        return false;
    }
    let area = &digits[0..3];
    let group = &digits[3..5];
    let serial = &digits[5..9];

    area != "000" && area != "666" && !area.starts_with('9') && group != "00" && serial != "0000"
}

/// The compressed-form IPv6 regex is permissive; require at least two
/// colons and at most one "::"
fn ipv6_is_plausible(value: &str) -> bool {
    value.matches(':').count() >= 2 && value.matches("::").count() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnInfo, ColumnRef, SampleData, SampleStatus};

    fn column_with_values(values: Vec<Option<String>>) -> ColumnData {
        let column = ColumnRef::new("app", "payments", "value");
        let null_count = values.iter().filter(|v| v.is_none()).count();
        let total_rows = values.len();
        ColumnData {
            column: column.clone(),
            info: ColumnInfo {
                name: "value".to_string(),
                data_type: "varchar".to_string(),
                size: Some(64),
                nullable: true,
                primary_key: false,
                foreign_key: false,
                comment: None,
            },
            sample: SampleData {
                column,
                values,
                null_count,
                total_rows,
                entropy: None,
                status: SampleStatus::Ok,
                error_message: None,
            },
        }
    }

    fn evaluate(values: &[&str]) -> Vec<PiiCandidate> {
        let data = column_with_values(values.iter().map(|v| Some(v.to_string())).collect());
        RegexStrategy::new().evaluate_values(&data)
    }

    #[test]
    fn luhn_accepts_known_good_numbers() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(luhn_valid("5500 0000 0000 0004"));
    }

    #[test]
    fn luhn_rejects_bad_checksums_and_lengths() {
        assert!(!luhn_valid("1234-5678-9012-3456"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid("411111"));
    }

    #[test]
    fn credit_card_confidence_counts_only_luhn_valid_values() {
        // Three of five pass Luhn; "hello" and 1234... do not count
        let candidates = evaluate(&[
            "4111 1111 1111 1111",
            "4111-1111-1111-1111",
            "hello",
            "1234-5678-9012-3456",
            "5500 0000 0000 0004",
        ]);
        let card = candidates.iter().find(|c| c.pii_type == PiiType::CreditCard).unwrap();
        assert!((card.confidence - 0.9 * 3.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn luhn_invalid_majority_emits_nothing() {
        // All match the shape but none pass Luhn
        let candidates = evaluate(&[
            "1234-5678-9012-3456",
            "1111 1111 1111 1112",
            "2222 2222 2222 2223",
            "3333 3333 3333 3334",
            "4444 4444 4444 4445",
        ]);
        assert!(candidates.iter().all(|c| c.pii_type != PiiType::CreditCard));
    }

    #[test]
    fn emails_need_a_qualified_majority() {
        let candidates = evaluate(&[
            "alice@example.com",
            "bob@example.org",
            "carol@mail.co.uk",
            "not-an-email",
            "dave@example.net",
        ]);
        // 4/5 matched, above ceil(0.6 * 5) = 3
        let email = candidates.iter().find(|c| c.pii_type == PiiType::Email).unwrap();
        assert!((email.confidence - 0.95 * 4.0 / 5.0).abs() < 1e-9);

        let too_few = evaluate(&[
            "alice@example.com",
            "nope",
            "nada",
            "zilch",
            "bob@example.org",
        ]);
        assert!(too_few.iter().all(|c| c.pii_type != PiiType::Email));
    }

    #[test]
    fn small_samples_are_skipped() {
        let candidates = evaluate(&["alice@example.com", "bob@example.org"]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn ssn_exclusions_apply() {
        assert!(ssn_is_plausible("123-45-6789"));
        assert!(!ssn_is_plausible("000-45-6789"));
        assert!(!ssn_is_plausible("666-45-6789"));
        assert!(!ssn_is_plausible("900-45-6789"));
        assert!(!ssn_is_plausible("123-00-6789"));
        assert!(!ssn_is_plausible("123-45-0000"));
    }

    #[test]
    fn ipv4_majority_is_detected() {
        let candidates = evaluate(&[
            "10.0.0.1",
            "192.168.1.20",
            "172.16.254.3",
            "8.8.8.8",
            "256.1.1.1",
        ]);
        let ip = candidates.iter().find(|c| c.pii_type == PiiType::IpAddress).unwrap();
        assert!((ip.confidence - 0.85 * 4.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn iso_dates_are_detected() {
        let candidates = evaluate(&[
            "1990-04-12",
            "1985-12-01",
            "2001-07-30",
            "1999-02-28",
            "2010-11-15",
        ]);
        let date = candidates.iter().find(|c| c.pii_type == PiiType::Date).unwrap();
        assert!((date.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn min_matches_is_ceil_of_sixty_percent() {
        assert_eq!(min_matches(5), 3);
        assert_eq!(min_matches(6), 4);
        assert_eq!(min_matches(10), 6);
        assert_eq!(min_matches(7), 5); // ceil(4.2)
    }
}
