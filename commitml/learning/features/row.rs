#![allow(clippy::cast_precision_loss)]

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::{stats::DatasetStats, text};
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::CommitRecord;

/// Names of the derived columns, in output order.
pub const DERIVED_COLUMNS: [&str; 28] = [
    "message_length",
    "message_word_count",
    "has_issue_reference",
    "has_pr_reference",
    "files_mentioned",
    "hour_of_day",
    "day_of_week",
    "month",
    "is_weekend",
    "is_business_hours",
    "author_name_length",
    "author_email_length",
    "is_bot_author",
    "author_commit_count",
    "total_changes",
    "has_comments",
    "change_ratio",
    "files_per_change",
    "avg_changes_per_file",
    "complexity_score",
    "has_parents",
    "num_parents",
    "is_likely_merge",
    "is_large_commit",
    "is_multi_file",
    "high_deletion_ratio",
    "has_long_message",
    "is_frequent_author",
];

/// Source count columns carried through onto every engineered row.
pub const SOURCE_COLUMNS: [&str; 4] = ["additions", "deletions", "files_changed", "comment_count"];

/// Per-author columns kept beside the derived set: mean comments per commit of the
/// author and whether the author writes from an organisation domain.
pub const AUTHOR_COLUMNS: [&str; 2] = ["author_avg_comments", "is_company_email"];

const LONG_MESSAGE_CHARS: usize = 100;
const FREQUENT_AUTHOR_COMMITS: usize = 5;
const HIGH_DELETION_RATIO: f64 = 0.5;
const BUSINESS_HOURS: std::ops::Range<u32> = 9..17;

/// The 28 derived feature values of one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    /// Message length in characters.
    pub message_length: usize,
    /// Whitespace-delimited words in the message.
    pub message_word_count: usize,
    /// Message references an issue (`#123`).
    pub has_issue_reference: bool,
    /// Message mentions a pull request.
    pub has_pr_reference: bool,
    /// Distinct file-like tokens in the message.
    pub files_mentioned: usize,
    /// Author hour, 0–23 (UTC).
    pub hour_of_day: u32,
    /// Author weekday, 0 = Monday.
    pub day_of_week: u32,
    /// Author month, 1–12.
    pub month: u32,
    /// Saturday or Sunday.
    pub is_weekend: bool,
    /// Hour in `[9, 17)`.
    pub is_business_hours: bool,
    /// Author name length in characters.
    pub author_name_length: usize,
    /// Author email length in characters.
    pub author_email_length: usize,
    /// Bot or CI author.
    pub is_bot_author: bool,
    /// Commits in the table sharing the author email.
    pub author_commit_count: usize,
    /// Additions plus deletions.
    pub total_changes: u64,
    /// At least one comment.
    pub has_comments: bool,
    /// `additions / (total + 1)`.
    pub change_ratio: f64,
    /// `files_changed / (total + 1)`.
    pub files_per_change: f64,
    /// `total / (files_changed + 1)`.
    pub avg_changes_per_file: f64,
    /// `ln(total + 1) * files_changed`.
    pub complexity_score: f64,
    /// At least one parent.
    pub has_parents: bool,
    /// Parent count.
    pub num_parents: usize,
    /// Two or more parents.
    pub is_likely_merge: bool,
    /// Total changes strictly above the dataset median.
    pub is_large_commit: bool,
    /// More than one file changed.
    pub is_multi_file: bool,
    /// `deletions / (total + 1) > 0.5`.
    pub high_deletion_ratio: bool,
    /// Message longer than 100 characters.
    pub has_long_message: bool,
    /// Author has more than 5 commits in the table.
    pub is_frequent_author: bool,
}

impl DerivedFeatures {
    /// Derives every column for the record at `row` using the shared dataset statistics.
    pub fn derive(row: usize, record: &CommitRecord, stats: &DatasetStats) -> PipelineResult<Self> {
        let total = record
            .additions
            .checked_add(record.deletions)
            .ok_or_else(|| PipelineError::numeric(row, "total_changes", "additions + deletions overflows"))?;
        let total_plus_one = total
            .checked_add(1)
            .ok_or_else(|| PipelineError::numeric(row, "total_changes", "total + 1 overflows"))?;
        let files_plus_one = record
            .files_changed
            .checked_add(1)
            .ok_or_else(|| PipelineError::numeric(row, "files_changed", "files_changed + 1 overflows"))?;

        let message_length = text::char_len(&record.message);
        let hour_of_day = record.author_date.hour();
        let day_of_week = record.author_date.weekday().num_days_from_monday();
        let num_parents = record.num_parents();
        let author_commit_count = stats.author_commit_count(&record.author_email).max(1);
        let deletion_ratio = ratio(row, "high_deletion_ratio", record.deletions, total_plus_one)?;

        Ok(Self {
            message_length,
            message_word_count: text::word_count(&record.message),
            has_issue_reference: text::has_issue_reference(&record.message),
            has_pr_reference: text::has_pr_reference(&record.message),
            files_mentioned: text::files_mentioned(&record.message),
            hour_of_day,
            day_of_week,
            month: record.author_date.month(),
            is_weekend: day_of_week >= 5,
            is_business_hours: BUSINESS_HOURS.contains(&hour_of_day),
            author_name_length: text::char_len(&record.author_name),
            author_email_length: text::char_len(&record.author_email),
            is_bot_author: text::is_bot_author(&record.author_name, &record.author_email),
            author_commit_count,
            total_changes: total,
            has_comments: record.comment_count > 0,
            change_ratio: ratio(row, "change_ratio", record.additions, total_plus_one)?,
            files_per_change: ratio(row, "files_per_change", record.files_changed, total_plus_one)?,
            avg_changes_per_file: ratio(row, "avg_changes_per_file", total, files_plus_one)?,
            complexity_score: complexity(row, total_plus_one, record.files_changed)?,
            has_parents: num_parents > 0,
            num_parents,
            is_likely_merge: num_parents >= 2,
            is_large_commit: total as f64 > stats.median_total_changes,
            is_multi_file: record.files_changed > 1,
            high_deletion_ratio: deletion_ratio > HIGH_DELETION_RATIO,
            has_long_message: message_length > LONG_MESSAGE_CHARS,
            is_frequent_author: author_commit_count > FREQUENT_AUTHOR_COMMITS,
        })
    }

    /// Numeric value of a derived column (booleans as 0/1).
    #[must_use]
    pub fn value(&self, column: &str) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        Some(match column {
            "message_length" => self.message_length as f64,
            "message_word_count" => self.message_word_count as f64,
            "has_issue_reference" => flag(self.has_issue_reference),
            "has_pr_reference" => flag(self.has_pr_reference),
            "files_mentioned" => self.files_mentioned as f64,
            "hour_of_day" => f64::from(self.hour_of_day),
            "day_of_week" => f64::from(self.day_of_week),
            "month" => f64::from(self.month),
            "is_weekend" => flag(self.is_weekend),
            "is_business_hours" => flag(self.is_business_hours),
            "author_name_length" => self.author_name_length as f64,
            "author_email_length" => self.author_email_length as f64,
            "is_bot_author" => flag(self.is_bot_author),
            "author_commit_count" => self.author_commit_count as f64,
            "total_changes" => self.total_changes as f64,
            "has_comments" => flag(self.has_comments),
            "change_ratio" => self.change_ratio,
            "files_per_change" => self.files_per_change,
            "avg_changes_per_file" => self.avg_changes_per_file,
            "complexity_score" => self.complexity_score,
            "has_parents" => flag(self.has_parents),
            "num_parents" => self.num_parents as f64,
            "is_likely_merge" => flag(self.is_likely_merge),
            "is_large_commit" => flag(self.is_large_commit),
            "is_multi_file" => flag(self.is_multi_file),
            "high_deletion_ratio" => flag(self.high_deletion_ratio),
            "has_long_message" => flag(self.has_long_message),
            "is_frequent_author" => flag(self.is_frequent_author),
            _ => return None,
        })
    }
}

/// One engineered row: key, carried-through source columns and derived features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Commit identifier.
    pub commit_sha: String,
    /// Source repository label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository: Option<String>,
    /// Added lines.
    pub additions: u64,
    /// Deleted lines.
    pub deletions: u64,
    /// Files touched.
    pub files_changed: u64,
    /// Comment count.
    pub comment_count: u64,
    /// Externally supplied merge label, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_merge: Option<bool>,
    /// Author email domain, lower-cased.
    #[serde(default)]
    pub author_domain: String,
    /// Author domain is an organisation domain.
    #[serde(default)]
    pub is_company_email: bool,
    /// Mean comment count over the author's commits in the table.
    #[serde(default)]
    pub author_avg_comments: f64,
    /// Derived columns.
    #[serde(flatten)]
    pub features: DerivedFeatures,
}

impl FeatureRow {
    /// Numeric value of a source, per-author or derived column.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<f64> {
        match column {
            "additions" => Some(self.additions as f64),
            "deletions" => Some(self.deletions as f64),
            "files_changed" => Some(self.files_changed as f64),
            "comment_count" => Some(self.comment_count as f64),
            "author_avg_comments" => Some(self.author_avg_comments),
            "is_company_email" => Some(f64::from(u8::from(self.is_company_email))),
            other => self.features.value(other),
        }
    }

    /// True when `column` names a source, per-author or derived column.
    #[must_use]
    pub fn has_column(column: &str) -> bool {
        SOURCE_COLUMNS.contains(&column)
            || AUTHOR_COLUMNS.contains(&column)
            || DERIVED_COLUMNS.contains(&column)
    }
}

fn ratio(row: usize, column: &str, numerator: u64, denominator: u64) -> PipelineResult<f64> {
    if denominator == 0 {
        return Err(PipelineError::numeric(row, column, "zero denominator"));
    }
    finite(row, column, numerator as f64 / denominator as f64)
}

fn complexity(row: usize, total_plus_one: u64, files_changed: u64) -> PipelineResult<f64> {
    if total_plus_one == 0 {
        return Err(PipelineError::numeric(row, "complexity_score", "logarithm of zero"));
    }
    finite(
        row,
        "complexity_score",
        (total_plus_one as f64).ln() * files_changed as f64,
    )
}

fn finite(row: usize, column: &str, value: f64) -> PipelineResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::numeric(row, column, format!("non-finite result {value}")))
    }
}
