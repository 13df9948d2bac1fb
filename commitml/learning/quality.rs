#![allow(clippy::cast_precision_loss)]

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ValidationConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::CommitRecord;

static SHA_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{40}$").expect("valid regex"));

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// Check passed.
    Passed,
    /// Check failed; blocks the run when the gate is enforcing.
    Failed,
    /// Suspicious but not blocking.
    Warning,
}

/// Result of one data quality check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub check: String,
    /// Outcome.
    pub status: CheckStatus,
    /// Human-readable summary.
    pub message: String,
    /// Check-specific details.
    pub details: Value,
}

/// Aggregate counts across checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Checks executed.
    pub total_checks: usize,
    /// Checks passed.
    pub passed: usize,
    /// Checks failed.
    pub failed: usize,
    /// Checks with warnings.
    pub warnings: usize,
    /// Passed share in percent, two decimals.
    pub success_rate: f64,
}

/// Full validation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Aggregate counts.
    pub summary: QualitySummary,
    /// Individual results in execution order.
    pub results: Vec<CheckResult>,
    /// Generation time.
    pub timestamp: DateTime<Utc>,
}

impl QualityReport {
    fn from_results(results: Vec<CheckResult>) -> Self {
        let count = |status: CheckStatus| results.iter().filter(|r| r.status == status).count();
        let passed = count(CheckStatus::Passed);
        let failed = count(CheckStatus::Failed);
        let warnings = count(CheckStatus::Warning);
        let total_checks = results.len();
        let success_rate = if total_checks == 0 {
            0.0
        } else {
            round2(passed as f64 / total_checks as f64 * 100.0)
        };
        Self {
            summary: QualitySummary {
                total_checks,
                passed,
                failed,
                warnings,
                success_rate,
            },
            results,
            timestamp: Utc::now(),
        }
    }

    /// True when any check failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Failed checks only.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results
            .iter()
            .filter(|result| result.status == CheckStatus::Failed)
    }

    /// Turns failures into a quality-gate error.
    pub fn enforce(&self) -> PipelineResult<()> {
        if !self.has_failures() {
            return Ok(());
        }
        let failed: Vec<String> = self
            .failures()
            .map(|result| format!("{}: {}", result.check, result.message))
            .collect();
        Err(PipelineError::QualityGate(failed.join("; ")))
    }
}

/// Runs the data quality checks over parsed commit rows.
#[derive(Debug, Clone, Default)]
pub struct QualityValidator {
    config: ValidationConfig,
}

impl QualityValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Runs every check and returns the report.
    #[must_use]
    pub fn validate(&self, records: &[CommitRecord]) -> QualityReport {
        QualityReport::from_results(vec![
            check_identifiers(records),
            check_empty_values(records, self.config.null_threshold),
            check_duplicates(records),
            check_row_count(records, self.config.min_rows),
        ])
    }
}

fn check_identifiers(records: &[CommitRecord]) -> CheckResult {
    let invalid: Vec<&str> = records
        .iter()
        .map(|record| record.commit_sha.as_str())
        .filter(|sha| !SHA_PATTERN.is_match(sha))
        .collect();
    if invalid.is_empty() {
        return CheckResult {
            check: "schema".into(),
            status: CheckStatus::Passed,
            message: "all identifiers are 40-character hex hashes".into(),
            details: json!({ "rows": records.len() }),
        };
    }
    CheckResult {
        check: "schema".into(),
        status: CheckStatus::Failed,
        message: format!("{} invalid SHA hashes", invalid.len()),
        details: json!({
            "invalid": invalid.len(),
            "samples": invalid.iter().take(5).collect::<Vec<_>>(),
        }),
    }
}

fn check_empty_values(records: &[CommitRecord], threshold: f64) -> CheckResult {
    let columns: [(&str, fn(&CommitRecord) -> &str); 4] = [
        ("commit_sha", |r| r.commit_sha.as_str()),
        ("author_name", |r| r.author_name.as_str()),
        ("author_email", |r| r.author_email.as_str()),
        ("message", |r| r.message.as_str()),
    ];
    let total = records.len();
    let mut report = IndexMap::new();
    let mut breached = false;
    for (column, get) in columns {
        let empty = records.iter().filter(|r| get(*r).is_empty()).count();
        let share = if total == 0 { 0.0 } else { empty as f64 / total as f64 };
        breached |= share > threshold;
        report.insert(
            column.to_string(),
            json!({
                "empty_count": empty,
                "empty_percentage": round2(share * 100.0),
                "total_rows": total,
            }),
        );
    }
    let (status, message) = if breached {
        (
            CheckStatus::Failed,
            format!("critical columns exceed {}% empty values", round2(threshold * 100.0)),
        )
    } else {
        (
            CheckStatus::Passed,
            "empty values within threshold".to_string(),
        )
    };
    CheckResult {
        check: "nulls".into(),
        status,
        message,
        details: json!(report),
    }
}

fn check_duplicates(records: &[CommitRecord]) -> CheckResult {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for record in records {
        *counts.entry(record.commit_sha.as_str()).or_default() += 1;
    }
    let duplicate_count: usize = counts.values().map(|n| n - 1).sum();
    if duplicate_count == 0 {
        return CheckResult {
            check: "duplicates".into(),
            status: CheckStatus::Passed,
            message: "no duplicate identifiers".into(),
            details: json!({ "duplicate_count": 0, "total_rows": records.len() }),
        };
    }
    let samples: Vec<&str> = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(sha, _)| *sha)
        .take(5)
        .collect();
    CheckResult {
        check: "duplicates".into(),
        status: CheckStatus::Warning,
        message: format!(
            "found {duplicate_count} duplicate records ({:.2}%)",
            duplicate_count as f64 / records.len() as f64 * 100.0
        ),
        details: json!({
            "duplicate_count": duplicate_count,
            "total_rows": records.len(),
            "sample_duplicates": samples,
        }),
    }
}

fn check_row_count(records: &[CommitRecord], min_rows: usize) -> CheckResult {
    let rows = records.len();
    let details = json!({ "actual_rows": rows, "minimum_required": min_rows });
    if rows < min_rows {
        CheckResult {
            check: "row_count".into(),
            status: CheckStatus::Failed,
            message: format!("insufficient rows: {rows} < {min_rows}"),
            details,
        }
    } else {
        CheckResult {
            check: "row_count".into(),
            status: CheckStatus::Passed,
            message: format!("row count {rows} >= {min_rows}"),
            details,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
