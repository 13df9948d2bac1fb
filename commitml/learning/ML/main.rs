//! Merge-commit classifier: labelled dataset, seeded split, scaler, random forest and evaluation.

/// Labelled design matrix and label resolution.
pub mod editor;
/// Train/test partition and feature standardisation.
pub mod func;
/// Random forest ensemble.
pub mod ml;
/// Evaluation metrics and training reports.
pub mod reporter;
/// CART decision trees, the forest's members.
pub mod submodel;

use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureRow, FeatureTable};
use crate::telemetry::LearningTelemetry;
use editor::Dataset;
use func::{train_test_split, StandardScaler};
use ml::RandomForest;
use reporter::{EvaluationMetrics, TrainingReport};

/// Fitted forest plus everything needed to score new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Fitted ensemble.
    pub forest: RandomForest,
    /// Scaler fitted on the training split.
    pub scaler: StandardScaler,
    /// Feature columns, in the order the forest expects them.
    pub feature_columns: Vec<String>,
}

impl ModelArtifact {
    /// Predicts merge classes for engineered rows.
    pub fn predict_rows(&self, rows: &[FeatureRow]) -> PipelineResult<Vec<usize>> {
        let mut features = Array2::zeros((rows.len(), self.feature_columns.len()));
        for (r, row) in rows.iter().enumerate() {
            for (c, column) in self.feature_columns.iter().enumerate() {
                features[[r, c]] = row
                    .value(column)
                    .ok_or_else(|| PipelineError::UnknownFeature(column.clone()))?;
            }
        }
        let scaled = self.scaler.transform(&features, &self.feature_columns)?;
        Ok(self.forest.predict(&scaled))
    }
}

/// Result of a successful training run.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// Model and preprocessing state.
    pub artifact: ModelArtifact,
    /// Metrics and importances.
    pub report: TrainingReport,
}

/// End-to-end classifier training.
#[derive(Debug, Default)]
pub struct ClassifierPipeline;

impl ClassifierPipeline {
    /// Trains without telemetry.
    pub fn train(&self, table: &FeatureTable, config: &PipelineConfig) -> PipelineResult<TrainedModel> {
        self.train_with_telemetry(table, config, None)
    }

    /// Trains with optional telemetry instrumentation.
    pub fn train_with_telemetry(
        &self,
        table: &FeatureTable,
        config: &PipelineConfig,
        telemetry: Option<&LearningTelemetry>,
    ) -> PipelineResult<TrainedModel> {
        let training = &config.training;
        let dataset = Dataset::from_features(table, &training.feature_columns, training.label)?;
        if dataset.is_empty() {
            return Err(PipelineError::EmptyInput {
                stage: "training".into(),
            });
        }
        log(
            telemetry,
            LogLevel::Info,
            "classifier_dataset_ready",
            json!({
                "rows": dataset.len(),
                "dropped_unlabelled": table.len() - dataset.len(),
                "features": dataset.feature_dim(),
                "class_counts": dataset.class_counts(),
            }),
        );

        let split = train_test_split(&dataset, training)?;
        log(
            telemetry,
            LogLevel::Debug,
            "classifier_split",
            json!({
                "train": split.train.len(),
                "test": split.test.len(),
                "stratified": training.stratify,
                "seed": training.seed,
            }),
        );

        let columns = &split.train.columns;
        let scaler = StandardScaler::fit(&split.train.features, columns)?;
        let train_x = scaler.transform(&split.train.features, columns)?;
        let test_x = scaler.transform(&split.test.features, columns)?;

        log(
            telemetry,
            LogLevel::Debug,
            "classifier_training_start",
            json!({
                "n_trees": config.forest.n_trees,
                "max_depth": config.forest.max_depth,
                "max_features": config.forest.max_features.resolve(dataset.feature_dim()),
            }),
        );
        let forest = RandomForest::fit(&train_x, &split.train.labels, &config.forest)?;

        let metrics = EvaluationMetrics::evaluate(
            &split.test.labels,
            &forest.predict(&test_x),
            &split.train.labels,
            &forest.predict(&train_x),
        );
        let feature_importances: IndexMap<String, f64> = columns
            .iter()
            .cloned()
            .zip(forest.feature_importances().iter().copied())
            .collect();
        let report = TrainingReport {
            model: "random_forest".into(),
            metrics,
            feature_importances,
            n_trees: forest.trees().len(),
        };
        log(
            telemetry,
            LogLevel::Info,
            "classifier_training_complete",
            json!({
                "accuracy": report.metrics.accuracy,
                "f1_score": report.metrics.f1_score,
                "top_features": report.top_features(5),
            }),
        );
        Ok(TrainedModel {
            artifact: ModelArtifact {
                forest,
                scaler,
                feature_columns: columns.clone(),
            },
            report,
        })
    }
}

fn log(
    telemetry: Option<&LearningTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: serde_json::Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForestConfig, LabelSource};
    use crate::features::engineer;
    use crate::ingest::CommitTable;
    use serde_json::{json, Value};

    fn commit(idx: usize, parents: usize) -> Value {
        let merge = parents >= 2;
        let message = if merge {
            format!("Merge pull request #{idx} from team/feature-{idx}")
        } else {
            format!("Fix edge case {idx}")
        };
        let (additions, files) = if merge { (0, 0) } else { (10 + idx, 1 + idx % 3) };
        json!({
            "sha": format!("{idx:040x}"),
            "commit_message": message,
            "author_name": "Dev",
            "author_email": format!("dev{}@example.com", idx % 4),
            "author_date": format!("2024-02-{:02}T{:02}:00:00Z", idx % 28 + 1, idx % 24),
            "additions": additions,
            "deletions": idx % 5,
            "files_changed": files,
            "parents": (0..parents).map(|p| format!("p{idx}-{p}")).collect::<Vec<_>>(),
        })
    }

    fn table(merge_rows: usize, total: usize) -> FeatureTable {
        let values: Vec<_> = (0..total)
            .map(|i| commit(i, if i < merge_rows { 3 } else { 1 }))
            .collect();
        engineer(&CommitTable::from_values(&values).unwrap()).unwrap()
    }

    fn config(n_trees: usize) -> PipelineConfig {
        PipelineConfig {
            forest: ForestConfig {
                n_trees,
                ..ForestConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn ten_row_scenario_trains_and_scores() {
        let table = table(2, 10);
        assert_eq!(table.rows.iter().filter(|r| r.features.is_likely_merge).count(), 2);
        let trained = ClassifierPipeline.train(&table, &config(100)).unwrap();
        let metrics = &trained.report.metrics;
        assert_eq!(metrics.train_samples, 8);
        assert_eq!(metrics.test_samples, 2);
        for value in [metrics.accuracy, metrics.precision, metrics.recall, metrics.f1_score] {
            assert!((0.0..=1.0).contains(&value));
        }
        let importances = &trained.report.feature_importances;
        assert_eq!(importances.len(), PipelineConfig::default().training.feature_columns.len());
        assert!(importances
            .keys()
            .zip(&PipelineConfig::default().training.feature_columns)
            .all(|(a, b)| a == b));
        assert!((importances.values().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn training_is_reproducible() {
        let table = table(6, 30);
        let a = ClassifierPipeline.train(&table, &config(20)).unwrap();
        let b = ClassifierPipeline.train(&table, &config(20)).unwrap();
        assert_eq!(a.artifact, b.artifact);
        assert_eq!(a.report.metrics, b.report.metrics);
    }

    #[test]
    fn single_class_input_is_rejected() {
        let err = ClassifierPipeline.train(&table(0, 12), &config(5)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ClassificationImpossible { classes: 1, .. }
        ));
    }

    #[test]
    fn external_labels_without_values_leave_nothing_to_train() {
        let mut config = config(5);
        config.training.label = LabelSource::External;
        let err = ClassifierPipeline.train(&table(2, 10), &config).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput { .. }));
    }

    #[test]
    fn repeated_feature_column_fails_before_training() {
        let mut config = config(5);
        config.training.feature_columns = ["total_changes", "message_length", "total_changes"]
            .iter()
            .map(|c| (*c).to_string())
            .collect();
        let err = ClassifierPipeline.train(&table(4, 20), &config).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn artifact_scores_engineered_rows() {
        let table = table(8, 32);
        let trained = ClassifierPipeline.train(&table, &config(25)).unwrap();
        let predictions = trained.artifact.predict_rows(&table.rows).unwrap();
        assert_eq!(predictions.len(), 32);
        assert!(predictions.iter().all(|class| *class <= 1));
        assert!(trained.report.metrics.train_accuracy > 0.9);
    }
}
