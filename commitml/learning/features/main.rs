//! Feature engineering: one engineered row per commit, derived from the row itself and
//! from dataset-wide statistics computed once beforehand.

/// Per-row derivation and the engineered row schema.
pub mod row;
/// Dataset-wide aggregates (median total changes, author commit counts).
pub mod stats;
/// Message and author text heuristics.
pub mod text;

use serde::{Deserialize, Serialize};

pub use row::{DerivedFeatures, FeatureRow, AUTHOR_COLUMNS, DERIVED_COLUMNS, SOURCE_COLUMNS};
pub use stats::DatasetStats;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::CommitTable;

/// Engineered table: rows in input order plus the statistics they were derived with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    /// One row per input commit.
    pub rows: Vec<FeatureRow>,
    /// Shared statistics.
    pub stats: DatasetStats,
}

impl FeatureTable {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names present on every row: source columns, per-author columns, then
    /// the derived ones.
    #[must_use]
    pub fn columns() -> Vec<&'static str> {
        SOURCE_COLUMNS
            .iter()
            .chain(AUTHOR_COLUMNS.iter())
            .chain(DERIVED_COLUMNS.iter())
            .copied()
            .collect()
    }

    /// Every value of one column, in row order.
    pub fn column(&self, name: &str) -> PipelineResult<Vec<f64>> {
        if !FeatureRow::has_column(name) {
            return Err(PipelineError::UnknownFeature(name.to_string()));
        }
        Ok(self.rows.iter().filter_map(|row| row.value(name)).collect())
    }
}

/// Derives the engineered table from a commit table.
pub fn engineer(table: &CommitTable) -> PipelineResult<FeatureTable> {
    if table.is_empty() {
        return Err(PipelineError::EmptyInput {
            stage: "feature engineering".into(),
        });
    }
    let stats = DatasetStats::from_table(table);
    let rows = table
        .records()
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            Ok(FeatureRow {
                commit_sha: record.commit_sha.clone(),
                source_repository: record.source_repository.clone(),
                additions: record.additions,
                deletions: record.deletions,
                files_changed: record.files_changed,
                comment_count: record.comment_count,
                is_merge: record.is_merge,
                author_domain: text::email_domain(&record.author_email),
                is_company_email: text::is_company_email(&record.author_email),
                author_avg_comments: stats.author_avg_comments(&record.author_email),
                features: DerivedFeatures::derive(idx, record, &stats)?,
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(FeatureTable { rows, stats })
}
