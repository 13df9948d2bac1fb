#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};

/// One version-control commit, normalised from a flat export row or an API commit object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Content hash identifying the commit.
    pub commit_sha: String,
    /// Commit message (empty when absent).
    #[serde(default)]
    pub message: String,
    /// Author display name.
    #[serde(default)]
    pub author_name: String,
    /// Author email.
    #[serde(default)]
    pub author_email: String,
    /// Author timestamp.
    pub author_date: DateTime<Utc>,
    /// Committer display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_name: Option<String>,
    /// Committer email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_email: Option<String>,
    /// Committer timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_date: Option<DateTime<Utc>>,
    /// Added lines.
    #[serde(default)]
    pub additions: u64,
    /// Deleted lines.
    #[serde(default)]
    pub deletions: u64,
    /// Files touched.
    #[serde(default)]
    pub files_changed: u64,
    /// Review comments attached to the commit.
    #[serde(default)]
    pub comment_count: u64,
    /// Parent commit identifiers, in order.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Repository the commit was fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository: Option<String>,
    /// Externally supplied merge label, when the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_merge: Option<bool>,
}

impl CommitRecord {
    /// Number of parents.
    #[must_use]
    pub fn num_parents(&self) -> usize {
        self.parents.len()
    }

    /// Parses one input row. Both the flat export layout and the nested API layout
    /// (`commit.author.*`, `stats.*`, `parents[].sha`) are accepted.
    pub fn from_value(row: usize, value: &Value) -> PipelineResult<Self> {
        if !value.is_object() {
            return Err(PipelineError::shape(Some(row), "<row>", "expected a JSON object"));
        }
        let reader = RowReader { row, value };
        let commit_sha = reader
            .text("commit_sha", &["/commit_sha", "/sha"])?
            .filter(|sha| !sha.is_empty())
            .ok_or_else(|| PipelineError::shape(Some(row), "commit_sha", "missing identifier"))?;
        let author_date = reader
            .timestamp("author_date", &["/author_date", "/commit/author/date"])?
            .ok_or_else(|| PipelineError::shape(Some(row), "author_date", "missing timestamp"))?;
        Ok(Self {
            commit_sha,
            message: reader
                .text("message", &["/commit_message", "/message", "/commit/message"])?
                .unwrap_or_default(),
            author_name: reader
                .text("author_name", &["/author_name", "/commit/author/name"])?
                .unwrap_or_default(),
            author_email: reader
                .text("author_email", &["/author_email", "/commit/author/email"])?
                .unwrap_or_default(),
            author_date,
            committer_name: reader
                .text("committer_name", &["/committer_name", "/commit/committer/name"])?,
            committer_email: reader
                .text("committer_email", &["/committer_email", "/commit/committer/email"])?,
            committer_date: reader
                .timestamp("committer_date", &["/committer_date", "/commit/committer/date"])?,
            additions: reader.count("additions", &["/additions", "/stats/additions"])?,
            deletions: reader.count("deletions", &["/deletions", "/stats/deletions"])?,
            files_changed: reader.files_changed()?,
            comment_count: reader
                .count("comment_count", &["/comment_count", "/commit/comment_count"])?,
            parents: reader.parents()?,
            source_repository: reader
                .text("source_repository", &["/source_repository", "/repository"])?,
            is_merge: reader.flag("is_merge", &["/is_merge"])?,
        })
    }
}

/// 2^64: the first float that no longer fits a `u64` count.
const COUNT_LIMIT: f64 = 18_446_744_073_709_551_616.0;

struct RowReader<'a> {
    row: usize,
    value: &'a Value,
}

impl RowReader<'_> {
    fn lookup(&self, pointers: &[&str]) -> Option<&Value> {
        pointers
            .iter()
            .filter_map(|pointer| self.value.pointer(pointer))
            .find(|value| !value.is_null())
    }

    fn text(&self, column: &str, pointers: &[&str]) -> PipelineResult<Option<String>> {
        match self.lookup(pointers) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.trim().to_string())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(other) => Err(self.bad(column, format!("expected text, got {}", kind(other)))),
        }
    }

    fn count(&self, column: &str, pointers: &[&str]) -> PipelineResult<u64> {
        match self.lookup(pointers) {
            None => Ok(0),
            Some(value) => self.parse_count(column, value),
        }
    }

    fn parse_count(&self, column: &str, value: &Value) -> PipelineResult<u64> {
        match value {
            Value::Number(number) => {
                if let Some(count) = number.as_u64() {
                    return Ok(count);
                }
                match number.as_f64() {
                    Some(float) if (0.0..COUNT_LIMIT).contains(&float) && float.fract() == 0.0 => {
                        Ok(float as u64)
                    }
                    _ => Err(self.bad(column, format!("expected a non-negative integer, got {number}"))),
                }
            }
            Value::String(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| self.bad(column, format!("expected a non-negative integer, got {text:?}"))),
            other => Err(self.bad(column, format!("expected a count, got {}", kind(other)))),
        }
    }

    fn files_changed(&self) -> PipelineResult<u64> {
        if let Some(value) = self.lookup(&["/files_changed", "/stats/files_changed"]) {
            return self.parse_count("files_changed", value);
        }
        match self.value.pointer("/files") {
            Some(Value::Array(files)) => Ok(files.len() as u64),
            Some(Value::Null) | None => Ok(0),
            Some(other) => Err(self.bad("files_changed", format!("expected a file list, got {}", kind(other)))),
        }
    }

    fn timestamp(&self, column: &str, pointers: &[&str]) -> PipelineResult<Option<DateTime<Utc>>> {
        match self.lookup(pointers) {
            None => Ok(None),
            Some(Value::String(text)) => parse_timestamp(text)
                .map(Some)
                .ok_or_else(|| self.bad(column, format!("unreadable timestamp {text:?}"))),
            Some(other) => Err(self.bad(column, format!("expected a timestamp, got {}", kind(other)))),
        }
    }

    fn flag(&self, column: &str, pointers: &[&str]) -> PipelineResult<Option<bool>> {
        match self.lookup(pointers) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::Number(number)) => match number.as_u64() {
                Some(0) => Ok(Some(false)),
                Some(1) => Ok(Some(true)),
                _ => Err(self.bad(column, format!("expected 0/1, got {number}"))),
            },
            Some(other) => Err(self.bad(column, format!("expected a boolean, got {}", kind(other)))),
        }
    }

    fn parents(&self) -> PipelineResult<Vec<String>> {
        let Some(value) = self.lookup(&["/parents"]) else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            return Err(self.bad("parents", format!("expected a list, got {}", kind(value))));
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(sha) => Ok(sha.trim().to_string()),
                Value::Object(_) => item
                    .get("sha")
                    .and_then(Value::as_str)
                    .map(|sha| sha.trim().to_string())
                    .ok_or_else(|| self.bad("parents", "parent object without `sha`")),
                other => Err(self.bad("parents", format!("unexpected parent entry {}", kind(other)))),
            })
            .collect()
    }

    fn bad(&self, column: &str, reason: impl Into<String>) -> PipelineError {
        PipelineError::shape(Some(self.row), column, reason)
    }
}

/// Parses RFC 3339 timestamps, falling back to naive `YYYY-MM-DD HH:MM:SS[.f]` read as UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn reads_flat_export_row() {
        let row = json!({
            "commit_sha": "a".repeat(40),
            "commit_message": "  Fix parser  ",
            "author_name": "Ada",
            "author_email": "ada@example.com",
            "author_date": "2024-03-02T10:15:00Z",
            "additions": 12,
            "deletions": "3",
            "files_changed": 2,
            "parents": ["p1"],
            "is_merge": 0
        });
        let record = CommitRecord::from_value(0, &row).unwrap();
        assert_eq!(record.message, "Fix parser");
        assert_eq!(record.deletions, 3);
        assert_eq!(record.comment_count, 0);
        assert_eq!(record.num_parents(), 1);
        assert_eq!(record.is_merge, Some(false));
        assert_eq!(record.author_date.hour(), 10);
    }

    #[test]
    fn normalises_api_commit_object() {
        let row = json!({
            "sha": "b".repeat(40),
            "commit": {
                "author": { "name": "Bob", "email": "bob@example.com", "date": "2024-01-05T23:00:00+02:00" },
                "committer": { "name": "GitHub", "email": "noreply@github.com", "date": "2024-01-05T21:00:00Z" },
                "message": "Merge pull request #7 from x/y",
                "comment_count": 4
            },
            "parents": [{ "sha": "p1" }, { "sha": "p2" }],
            "stats": { "additions": 5, "deletions": 1, "total": 6 },
            "files": [{ "filename": "a.rs" }, { "filename": "b.rs" }],
            "source_repository": "facebook/react"
        });
        let record = CommitRecord::from_value(4, &row).unwrap();
        assert_eq!(record.author_name, "Bob");
        assert_eq!(record.author_date.hour(), 21);
        assert_eq!(record.author_date.day(), 5);
        assert_eq!(record.parents, vec!["p1", "p2"]);
        assert_eq!(record.files_changed, 2);
        assert_eq!(record.comment_count, 4);
        assert_eq!(record.committer_name.as_deref(), Some("GitHub"));
        assert_eq!(record.source_repository.as_deref(), Some("facebook/react"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let row = json!({ "sha": "c", "author_date": "2024-01-01 08:00:00" });
        let record = CommitRecord::from_value(0, &row).unwrap();
        assert!(record.message.is_empty());
        assert!(record.parents.is_empty());
        assert_eq!(record.additions + record.deletions + record.files_changed, 0);
    }

    #[test]
    fn rejects_negative_counts_with_row_and_column() {
        let row = json!({ "sha": "c", "author_date": "2024-01-01T00:00:00Z", "additions": -4 });
        let err = CommitRecord::from_value(7, &row).unwrap_err();
        match err {
            PipelineError::InputShape { row, column, .. } => {
                assert_eq!(row, Some(7));
                assert_eq!(column, "additions");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_counts_beyond_u64() {
        let row = json!({ "sha": "c", "author_date": "2024-01-01T00:00:00Z", "deletions": 1e30 });
        let err = CommitRecord::from_value(2, &row).unwrap_err();
        assert!(matches!(err, PipelineError::InputShape { column, .. } if column == "deletions"));
        let row = json!({ "sha": "c", "author_date": "2024-01-01T00:00:00Z", "deletions": 7.0 });
        assert_eq!(CommitRecord::from_value(2, &row).unwrap().deletions, 7);
    }

    #[test]
    fn rejects_missing_identifier_and_timestamp() {
        let err = CommitRecord::from_value(0, &json!({ "author_date": "2024-01-01T00:00:00Z" }))
            .unwrap_err();
        assert!(err.to_string().contains("commit_sha"));
        let err = CommitRecord::from_value(1, &json!({ "sha": "x", "author_date": "yesterday" }))
            .unwrap_err();
        assert!(err.to_string().contains("author_date"));
    }
}
