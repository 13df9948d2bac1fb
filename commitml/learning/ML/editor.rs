use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::{duplicate_column, LabelSource};
use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureRow, FeatureTable};

/// Class index of non-merge commits.
pub const NON_MERGE: usize = 0;
/// Class index of merge commits.
pub const MERGE: usize = 1;

/// Labelled design matrix drawn from an engineered feature table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    /// Feature column names, in matrix column order.
    pub columns: Vec<String>,
    /// One row per labelled commit.
    pub features: Array2<f64>,
    /// Class index per row.
    pub labels: Vec<usize>,
    /// Commit identifier per row.
    pub commit_shas: Vec<String>,
}

impl Dataset {
    /// Selects `columns` from the table and labels rows per `label`. Rows without a label
    /// under the chosen source are skipped.
    pub fn from_features(
        table: &FeatureTable,
        columns: &[String],
        label: LabelSource,
    ) -> PipelineResult<Self> {
        if let Some(unknown) = columns.iter().find(|c| !FeatureRow::has_column(c)) {
            return Err(PipelineError::UnknownFeature(unknown.clone()));
        }
        if let Some(repeated) = duplicate_column(columns) {
            return Err(PipelineError::Config(format!(
                "feature column `{repeated}` is listed more than once"
            )));
        }
        let labelled: Vec<(usize, &FeatureRow, usize)> = table
            .rows
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| {
                resolve_label(row, label).map(|merge| (idx, row, usize::from(merge)))
            })
            .collect();

        let mut features = Array2::zeros((labelled.len(), columns.len()));
        for (r, (source_row, row, _)) in labelled.iter().enumerate() {
            for (c, column) in columns.iter().enumerate() {
                let value = row
                    .value(column)
                    .ok_or_else(|| PipelineError::UnknownFeature(column.clone()))?;
                if !value.is_finite() {
                    return Err(PipelineError::NonNumericFeature {
                        row: *source_row,
                        column: column.clone(),
                    });
                }
                features[[r, c]] = value;
            }
        }
        Ok(Self {
            columns: columns.to_vec(),
            features,
            labels: labelled.iter().map(|(_, _, label)| *label).collect(),
            commit_shas: labelled
                .iter()
                .map(|(_, row, _)| row.commit_sha.clone())
                .collect(),
        })
    }

    /// Labelled rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when no row carries a label.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Feature dimensionality.
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.columns.len()
    }

    /// Row count per class, ordered by class index.
    #[must_use]
    pub fn class_counts(&self) -> BTreeMap<usize, usize> {
        class_counts(&self.labels)
    }

    /// Copies the given rows, in the given order.
    #[must_use]
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            features: self.features.select(ndarray::Axis(0), rows),
            labels: rows.iter().map(|&r| self.labels[r]).collect(),
            commit_shas: rows.iter().map(|&r| self.commit_shas[r].clone()).collect(),
        }
    }
}

/// Merge label of a row under the given source; `None` when the row is unlabelled.
#[must_use]
pub fn resolve_label(row: &FeatureRow, source: LabelSource) -> Option<bool> {
    let heuristic = row.features.num_parents >= 2;
    match source {
        LabelSource::Heuristic => Some(heuristic),
        LabelSource::ExternalOrHeuristic => Some(row.is_merge.unwrap_or(heuristic)),
        LabelSource::External => row.is_merge,
    }
}

/// Row count per label, ordered by label.
#[must_use]
pub fn class_counts(labels: &[usize]) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::engineer;
    use crate::ingest::CommitTable;
    use serde_json::json;

    fn table() -> FeatureTable {
        let values: Vec<_> = (0..4)
            .map(|i| {
                let parents = if i == 0 { vec!["a", "b"] } else { vec!["a"] };
                let mut row = json!({
                    "sha": format!("{i:040x}"),
                    "author_email": "a@x.io",
                    "author_date": "2024-01-01T10:00:00Z",
                    "additions": i,
                    "parents": parents,
                });
                if i == 1 {
                    row["is_merge"] = json!(true);
                }
                row
            })
            .collect();
        engineer(&CommitTable::from_values(&values).unwrap()).unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn builds_matrix_in_column_order() {
        let dataset =
            Dataset::from_features(&table(), &cols(&["additions", "total_changes"]), LabelSource::Heuristic)
                .unwrap();
        assert_eq!(dataset.features.dim(), (4, 2));
        assert!((dataset.features[[3, 0]] - 3.0).abs() < f64::EPSILON);
        assert_eq!(dataset.labels, vec![MERGE, NON_MERGE, NON_MERGE, NON_MERGE]);
        assert_eq!(dataset.class_counts().get(&NON_MERGE), Some(&3));
    }

    #[test]
    fn label_sources() {
        let table = table();
        let columns = cols(&["additions"]);
        let mixed =
            Dataset::from_features(&table, &columns, LabelSource::ExternalOrHeuristic).unwrap();
        assert_eq!(mixed.labels, vec![MERGE, MERGE, NON_MERGE, NON_MERGE]);
        let external = Dataset::from_features(&table, &columns, LabelSource::External).unwrap();
        assert_eq!(external.len(), 1);
        assert_eq!(external.commit_shas, vec![format!("{:040x}", 1)]);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = Dataset::from_features(&table(), &cols(&["lines_of_code"]), LabelSource::Heuristic)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownFeature(name) if name == "lines_of_code"));
    }

    #[test]
    fn repeated_column_is_rejected() {
        let columns = cols(&["total_changes", "message_length", "total_changes"]);
        let err = Dataset::from_features(&table(), &columns, LabelSource::Heuristic).unwrap_err();
        match err {
            PipelineError::Config(message) => assert!(message.contains("total_changes")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_finite_value_names_table_row() {
        let mut table = table();
        table.rows[1].features.change_ratio = f64::NAN;
        let err = Dataset::from_features(&table, &cols(&["change_ratio"]), LabelSource::External)
            .unwrap_err();
        match err {
            PipelineError::NonNumericFeature { row, column } => {
                assert_eq!(row, 1);
                assert_eq!(column, "change_ratio");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn select_copies_rows() {
        let dataset =
            Dataset::from_features(&table(), &cols(&["additions"]), LabelSource::Heuristic).unwrap();
        let picked = dataset.select(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.labels, vec![NON_MERGE, MERGE]);
        assert!((picked.features[[0, 0]] - 2.0).abs() < f64::EPSILON);
    }
}
