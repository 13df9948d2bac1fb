#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Commit-metadata pipeline: ingestion, data quality checks, feature engineering,
//! merge-commit classification and experiment tracking.

/// Pipeline error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// TOML-backed pipeline configuration.
#[path = "../config.rs"]
pub mod config;

/// Typed commit rows and the commit table.
#[path = "../ingest/main.rs"]
pub mod ingest;

/// Commit export readers and JSON-lines writers.
#[path = "../dataloader.rs"]
pub mod dataloader;

/// Data quality checks run before feature engineering.
#[path = "../quality.rs"]
pub mod quality;

/// Derived commit features.
#[path = "../features/main.rs"]
pub mod features;

/// Merge-commit classifier.
#[path = "../ML/main.rs"]
pub mod classifier;

/// Experiment run tracking.
#[path = "../tracker.rs"]
pub mod tracker;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// High-level orchestration entry point.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use classifier::{
    editor::Dataset, func::StandardScaler, ml::RandomForest, reporter::EvaluationMetrics,
    reporter::TrainingReport, ClassifierPipeline, ModelArtifact, TrainedModel,
};
pub use config::{LabelSource, PipelineConfig};
pub use dataloader::CommitExport;
pub use error::{PipelineError, PipelineResult};
pub use features::{engineer, FeatureRow, FeatureTable};
pub use ingest::{CommitRecord, CommitTable};
pub use orchestration_entry::{export_features, validate_export, CommitPipeline, RunOutcome};
pub use quality::{QualityReport, QualityValidator};
pub use telemetry::{LearningTelemetry, LearningTelemetryBuilder};
pub use tracker::{
    ExperimentRun, ExperimentTracker, FileExperimentTracker, MemoryExperimentTracker, RunSummary,
};
