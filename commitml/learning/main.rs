//! Pipeline orchestration: quality gate, feature engineering, training and run tracking.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    classifier::{reporter::TrainingReport, ClassifierPipeline},
    config::PipelineConfig,
    dataloader::{write_json_lines, CommitExport},
    error::PipelineResult,
    features::{engineer, FeatureTable},
    ingest::{CommitRecord, CommitTable},
    quality::{QualityReport, QualityValidator},
    telemetry::LearningTelemetry,
    tracker::{new_run_id, run_params, ExperimentRun, ExperimentTracker},
};

/// Outcome of a recorded run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Identifier under which the run was recorded.
    pub run_id: String,
    /// Experiment name.
    pub experiment: String,
    /// Commits in the input table.
    pub rows: usize,
    /// Commits with two or more parents.
    pub merge_rows: usize,
    /// Quality report, absent when validation was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    /// Where the engineered table was written, if exported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features_path: Option<PathBuf>,
    /// Metrics and importances.
    pub report: TrainingReport,
}

/// Runs the batch pipeline end to end. Each stage finishes or fails the whole run;
/// nothing reaches the tracker unless every stage succeeded.
pub struct CommitPipeline {
    config: PipelineConfig,
    tracker: Arc<dyn ExperimentTracker>,
    telemetry: Option<LearningTelemetry>,
    classifier: ClassifierPipeline,
    skip_validation: bool,
    features_out: Option<PathBuf>,
}

impl CommitPipeline {
    /// Creates a pipeline recording into `tracker`.
    #[must_use]
    pub fn new(config: PipelineConfig, tracker: Arc<dyn ExperimentTracker>) -> Self {
        Self {
            config,
            tracker,
            telemetry: None,
            classifier: ClassifierPipeline,
            skip_validation: false,
            features_out: None,
        }
    }

    /// Attaches telemetry sinks for structured logging/events.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: LearningTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets telemetry after construction.
    pub fn set_telemetry(&mut self, telemetry: LearningTelemetry) {
        self.telemetry = Some(telemetry);
    }

    /// Bypasses the data quality gate.
    #[must_use]
    pub fn skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// Also writes the engineered table as JSON lines.
    #[must_use]
    pub fn export_features(mut self, path: impl Into<PathBuf>) -> Self {
        self.features_out = Some(path.into());
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the quality checks over parsed rows.
    #[must_use]
    pub fn validate(&self, records: &[CommitRecord]) -> QualityReport {
        let report = QualityValidator::new(self.config.validation.clone()).validate(records);
        let level = if report.has_failures() {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        self.log(
            level,
            "quality_validation_complete",
            json!({ "summary": report.summary }),
        );
        report
    }

    /// Feature engineering only, optionally exporting the table.
    pub fn engineer_features(&self, table: &CommitTable) -> PipelineResult<FeatureTable> {
        let features = engineer(table)?;
        self.log(
            LogLevel::Info,
            "feature_engineering_complete",
            json!({
                "rows": features.len(),
                "columns": FeatureTable::columns().len(),
                "median_total_changes": features.stats.median_total_changes,
                "authors": features.stats.author_counts.len(),
            }),
        );
        if let Some(path) = &self.features_out {
            write_json_lines(path, &features.rows)?;
            self.log(
                LogLevel::Debug,
                "feature_table_exported",
                json!({ "path": path }),
            );
        }
        Ok(features)
    }

    /// Full run from a commit export file.
    pub fn run_export(&self, export: &CommitExport) -> PipelineResult<RunOutcome> {
        let run_id = new_run_id();
        self.stage_event(&run_id, "pipeline.started", json!({ "dataset": export.path() }));
        let result = export
            .read_records()
            .and_then(|records| self.run_records(&run_id, records));
        self.finish(&run_id, result)
    }

    /// Full run from a parsed commit table (validation skipped: the table is already typed).
    pub fn run_table(&self, table: &CommitTable) -> PipelineResult<RunOutcome> {
        let run_id = new_run_id();
        self.stage_event(&run_id, "pipeline.started", json!({ "rows": table.len() }));
        let result = self.train_and_record(&run_id, table, None);
        self.finish(&run_id, result)
    }

    fn run_records(&self, run_id: &str, records: Vec<CommitRecord>) -> PipelineResult<RunOutcome> {
        let quality = if self.skip_validation {
            self.log(LogLevel::Warn, "quality_validation_skipped", json!({}));
            None
        } else {
            let report = self.validate(&records);
            self.stage_event(
                run_id,
                "pipeline.validation.completed",
                json!({ "summary": report.summary }),
            );
            if self.config.validation.fail_on_error {
                report.enforce()?;
            }
            Some(report)
        };
        let table = CommitTable::new(records)?;
        self.train_and_record(run_id, &table, quality)
    }

    fn train_and_record(
        &self,
        run_id: &str,
        table: &CommitTable,
        quality: Option<QualityReport>,
    ) -> PipelineResult<RunOutcome> {
        let features = self.engineer_features(table)?;
        self.stage_event(
            run_id,
            "pipeline.features.completed",
            json!({ "rows": features.len(), "merge_rows": table.merge_count() }),
        );

        let trained = self.classifier.train_with_telemetry(
            &features,
            &self.config,
            self.telemetry.as_ref(),
        )?;
        self.stage_event(
            run_id,
            "pipeline.training.completed",
            json!({ "metrics": trained.report.metrics.as_map() }),
        );

        let run = ExperimentRun::new(
            run_id,
            &self.config.tracking.experiment,
            run_params(&self.config),
            &trained.report,
            trained.artifact,
        );
        self.tracker.record(&run)?;
        self.log(
            LogLevel::Info,
            "run_recorded",
            json!({ "run_id": run_id, "experiment": run.experiment }),
        );
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            experiment: run.experiment,
            rows: table.len(),
            merge_rows: table.merge_count(),
            quality,
            features_path: self.features_out.clone(),
            report: trained.report,
        })
    }

    fn finish(&self, run_id: &str, result: PipelineResult<RunOutcome>) -> PipelineResult<RunOutcome> {
        match &result {
            Ok(outcome) => self.stage_event(
                run_id,
                "pipeline.completed",
                json!({
                    "accuracy": outcome.report.metrics.accuracy,
                    "f1_score": outcome.report.metrics.f1_score,
                }),
            ),
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "pipeline_failed",
                    json!({ "run_id": run_id, "error": err.to_string() }),
                );
                self.stage_event(run_id, "pipeline.failed", json!({ "error": err.to_string() }));
            }
        }
        result
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    fn stage_event(&self, run_id: &str, event_type: &str, payload: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.run_event(run_id, event_type, payload);
        }
    }
}

/// Reads an export and runs only the quality checks.
pub fn validate_export(export: &CommitExport, config: &PipelineConfig) -> PipelineResult<QualityReport> {
    let records = export.read_records()?;
    Ok(QualityValidator::new(config.validation.clone()).validate(&records))
}

/// Reads an export, engineers features and writes them to `out`.
pub fn export_features(export: &CommitExport, out: &Path) -> PipelineResult<FeatureTable> {
    let features = engineer(&export.load_table()?)?;
    write_json_lines(out, &features.rows)?;
    Ok(features)
}
