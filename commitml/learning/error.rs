use thiserror::Error;

/// Errors raised by the commit pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required column is missing or unreadable.
    #[error("input shape error at {}, column `{column}`: {reason}", row_label(.row))]
    InputShape {
        /// Zero-based row index, `None` when the problem is table-wide.
        row: Option<usize>,
        /// Offending column.
        column: String,
        /// What was wrong.
        reason: String,
    },
    /// Fewer than two label classes are available.
    #[error("classification impossible during {stage}: found {classes} distinct label class(es), need 2")]
    ClassificationImpossible {
        /// Stage that detected the condition (`dataset`, `training split`).
        stage: String,
        /// Number of distinct classes observed.
        classes: usize,
    },
    /// A feature derivation fell outside the zero-avoidance conventions.
    #[error("numeric derivation error at row {row}, column `{column}`: {reason}")]
    NumericDerivation {
        /// Zero-based row index.
        row: usize,
        /// Derived column being computed.
        column: String,
        /// What went wrong.
        reason: String,
    },
    /// A stage received no rows.
    #[error("{stage} received an empty table")]
    EmptyInput {
        /// Stage name.
        stage: String,
    },
    /// A value the scaler cannot consume survived into a feature column.
    #[error("non-numeric value in feature column `{column}` at row {row}")]
    NonNumericFeature {
        /// Zero-based row index within the split.
        row: usize,
        /// Feature column.
        column: String,
    },
    /// A configured feature column does not exist on the engineered table.
    #[error("unknown feature column `{0}`")]
    UnknownFeature(String),
    /// Too few rows to form both a training and a held-out split.
    #[error("need at least {required} labelled rows to split, found {found}")]
    InsufficientRows {
        /// Minimum rows required.
        required: usize,
        /// Rows available.
        found: usize,
    },
    /// The data quality gate rejected the input.
    #[error("data quality validation failed: {0}")]
    QualityGate(String),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn shape(row: Option<usize>, column: &str, reason: impl Into<String>) -> Self {
        Self::InputShape {
            row,
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn numeric(row: usize, column: &str, reason: impl Into<String>) -> Self {
        Self::NumericDerivation {
            row,
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

fn row_label(row: &Option<usize>) -> String {
    row.map_or_else(|| "table level".to_string(), |row| format!("row {row}"))
}

/// Result alias used across the learning crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_row_and_column() {
        let err = PipelineError::shape(Some(3), "author_date", "missing");
        assert_eq!(
            err.to_string(),
            "input shape error at row 3, column `author_date`: missing"
        );
        let err = PipelineError::shape(None, "commit_sha", "duplicate");
        assert!(err.to_string().contains("table level"));
        let err = PipelineError::ClassificationImpossible {
            stage: "training split".into(),
            classes: 1,
        };
        assert!(err.to_string().contains("training split"));
    }
}
