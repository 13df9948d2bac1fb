#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Top-level pipeline configuration, usually loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Split, label and feature selection.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Random forest hyperparameters.
    #[serde(default)]
    pub forest: ForestConfig,
    /// Data quality gate settings.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Experiment tracker settings.
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl PipelineConfig {
    /// Loads configuration from a TOML file; relative tracking paths resolve against the file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        if config.tracking.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.tracking.root = base.join(&config.tracking.root);
        }
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> PipelineResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| PipelineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> PipelineResult<()> {
        let t = &self.training;
        if !(t.test_ratio > 0.0 && t.test_ratio < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.test_ratio must be in (0, 1), got {}",
                t.test_ratio
            )));
        }
        if t.feature_columns.is_empty() {
            return Err(PipelineError::Config(
                "training.feature_columns must not be empty".into(),
            ));
        }
        if let Some(repeated) = duplicate_column(&t.feature_columns) {
            return Err(PipelineError::Config(format!(
                "training.feature_columns lists `{repeated}` more than once"
            )));
        }
        let f = &self.forest;
        if f.n_trees == 0 {
            return Err(PipelineError::Config("forest.n_trees must be > 0".into()));
        }
        if f.max_depth == 0 {
            return Err(PipelineError::Config("forest.max_depth must be > 0".into()));
        }
        if f.min_samples_split < 2 {
            return Err(PipelineError::Config(
                "forest.min_samples_split must be >= 2".into(),
            ));
        }
        if f.min_samples_leaf == 0 {
            return Err(PipelineError::Config(
                "forest.min_samples_leaf must be >= 1".into(),
            ));
        }
        let v = &self.validation;
        if !(0.0..=1.0).contains(&v.null_threshold) {
            return Err(PipelineError::Config(
                "validation.null_threshold must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// First column name that appears more than once, if any.
pub(crate) fn duplicate_column(columns: &[String]) -> Option<&String> {
    let mut seen = HashSet::with_capacity(columns.len());
    columns.iter().find(|column| !seen.insert(column.as_str()))
}

/// Where the binary merge label comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// `num_parents >= 2`.
    #[default]
    Heuristic,
    /// The record's `is_merge` when present, otherwise the heuristic.
    ExternalOrHeuristic,
    /// Only the record's `is_merge`; unlabelled rows are dropped.
    External,
}

/// Split and feature selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Ordered feature columns fed to the model.
    #[serde(default = "default_feature_columns")]
    pub feature_columns: Vec<String>,
    /// Label source.
    #[serde(default)]
    pub label: LabelSource,
    /// Share of rows held out for evaluation.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    /// Seed for the train/test partition.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Keep class proportions in both splits.
    #[serde(default = "default_true")]
    pub stratify: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            feature_columns: default_feature_columns(),
            label: LabelSource::default(),
            test_ratio: default_test_ratio(),
            seed: default_seed(),
            stratify: true,
        }
    }
}

/// How many features each split considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(n_features))`, at least one.
    #[default]
    Sqrt,
    /// `floor(log2(n_features))`, at least one.
    Log2,
    /// Every feature.
    All,
}

impl MaxFeatures {
    /// Resolves the number of candidate features for `n_features` columns.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            Self::Sqrt => (n_features as f64).sqrt().floor() as usize,
            Self::Log2 => (n_features as f64).log2().floor() as usize,
            Self::All => n_features,
        };
        n.clamp(1, n_features.max(1))
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees.
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    /// Maximum tree depth (root has depth 0).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Minimum samples required to split a node.
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    /// Minimum samples in each leaf.
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Feature sampling per split.
    #[serde(default)]
    pub max_features: MaxFeatures,
    /// Draw a bootstrap sample per tree.
    #[serde(default = "default_true")]
    pub bootstrap: bool,
    /// Seed for tree randomness.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: MaxFeatures::default(),
            bootstrap: true,
            seed: default_seed(),
        }
    }
}

/// Data quality gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum number of rows.
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    /// Maximum share of empty values in critical columns.
    #[serde(default = "default_null_threshold")]
    pub null_threshold: f64,
    /// Abort the run when a check fails.
    #[serde(default = "default_true")]
    pub fail_on_error: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_rows: default_min_rows(),
            null_threshold: default_null_threshold(),
            fail_on_error: true,
        }
    }
}

/// Experiment tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Experiment name stamped on every run.
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Root directory of the file tracker.
    #[serde(default = "default_tracking_root")]
    pub root: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            experiment: default_experiment(),
            root: default_tracking_root(),
        }
    }
}

/// Tracker root used when neither the configuration nor the command line names one.
pub const DEFAULT_TRACKING_ROOT: &str = "commitml/runs";

/// Features used when the configuration does not list any explicitly.
pub const DEFAULT_FEATURE_COLUMNS: [&str; 29] = [
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
    "additions",
    "deletions",
    "files_changed",
    "comment_count",
    "has_comments",
    "change_ratio",
    "files_per_change",
    "avg_changes_per_file",
    "complexity_score",
    "is_large_commit",
    "is_multi_file",
    "high_deletion_ratio",
    "has_long_message",
    "is_frequent_author",
];

fn default_feature_columns() -> Vec<String> {
    DEFAULT_FEATURE_COLUMNS.iter().map(|c| (*c).to_string()).collect()
}

const fn default_test_ratio() -> f64 {
    0.2
}

const fn default_seed() -> u64 {
    42
}

const fn default_true() -> bool {
    true
}

const fn default_n_trees() -> usize {
    100
}

const fn default_max_depth() -> usize {
    10
}

const fn default_min_samples_split() -> usize {
    2
}

const fn default_min_samples_leaf() -> usize {
    1
}

const fn default_min_rows() -> usize {
    10
}

const fn default_null_threshold() -> f64 {
    0.05
}

fn default_experiment() -> String {
    "commit-analysis".into()
}

fn default_tracking_root() -> PathBuf {
    PathBuf::from(DEFAULT_TRACKING_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config.forest.n_trees, 100);
        assert_eq!(config.forest.max_depth, 10);
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.label, LabelSource::Heuristic);
        assert_eq!(config.training.feature_columns.len(), DEFAULT_FEATURE_COLUMNS.len());
    }

    #[test]
    fn parses_overrides() {
        let raw = r#"
            [training]
            feature_columns = ["total_changes", "files_changed"]
            label = "external_or_heuristic"
            stratify = false

            [forest]
            n_trees = 5
            max_features = "all"

            [tracking]
            experiment = "smoke"
        "#;
        let config = PipelineConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.training.feature_columns, vec!["total_changes", "files_changed"]);
        assert_eq!(config.training.label, LabelSource::ExternalOrHeuristic);
        assert!(!config.training.stratify);
        assert_eq!(config.forest.n_trees, 5);
        assert_eq!(config.forest.max_features, MaxFeatures::All);
        assert_eq!(config.forest.min_samples_split, 2);
        assert_eq!(config.tracking.experiment, "smoke");
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[training]\ntest_ratio = 1.5"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("[forest]\nmin_samples_split = 1"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn rejects_repeated_feature_columns() {
        let raw = r#"
            [training]
            feature_columns = ["total_changes", "message_length", "total_changes"]
        "#;
        match PipelineConfig::from_toml_str(raw) {
            Err(PipelineError::Config(message)) => assert!(message.contains("total_changes")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(29), 5);
        assert_eq!(MaxFeatures::Log2.resolve(29), 4);
        assert_eq!(MaxFeatures::All.resolve(29), 29);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
    }
}
