use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::classifier::{reporter::TrainingReport, ModelArtifact};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

/// One recorded training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRun {
    /// `run-<uuid>`.
    pub run_id: String,
    /// Experiment the run belongs to.
    pub experiment: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Hyperparameters and split settings.
    pub params: IndexMap<String, Value>,
    /// Scalar metrics.
    pub metrics: IndexMap<String, f64>,
    /// Importance per feature column, in configured order.
    pub feature_importances: IndexMap<String, f64>,
    /// Confusion matrix of the held-out split.
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Fitted model and scaler.
    pub artifact: ModelArtifact,
}

impl ExperimentRun {
    /// Assembles a run record.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        experiment: impl Into<String>,
        params: IndexMap<String, Value>,
        report: &TrainingReport,
        artifact: ModelArtifact,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment: experiment.into(),
            created_at: Utc::now(),
            params,
            metrics: report.metrics.as_map(),
            feature_importances: report.feature_importances.clone(),
            confusion_matrix: report.metrics.confusion_matrix.clone(),
            artifact,
        }
    }

    /// Index entry for the run.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            experiment: self.experiment.clone(),
            created_at: self.created_at,
            metrics: self.metrics.clone(),
        }
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Experiment name.
    pub experiment: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Scalar metrics.
    pub metrics: IndexMap<String, f64>,
}

/// Fresh `run-<uuid v4>` identifier.
#[must_use]
pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4())
}

/// Parameter map recorded with each run.
#[must_use]
pub fn run_params(config: &PipelineConfig) -> IndexMap<String, Value> {
    let (t, f) = (&config.training, &config.forest);
    IndexMap::from([
        ("model".to_string(), json!("random_forest")),
        ("n_trees".to_string(), json!(f.n_trees)),
        ("max_depth".to_string(), json!(f.max_depth)),
        ("min_samples_split".to_string(), json!(f.min_samples_split)),
        ("min_samples_leaf".to_string(), json!(f.min_samples_leaf)),
        ("max_features".to_string(), json!(f.max_features)),
        ("bootstrap".to_string(), json!(f.bootstrap)),
        ("forest_seed".to_string(), json!(f.seed)),
        ("test_ratio".to_string(), json!(t.test_ratio)),
        ("split_seed".to_string(), json!(t.seed)),
        ("stratify".to_string(), json!(t.stratify)),
        ("label".to_string(), json!(t.label)),
        ("feature_columns".to_string(), json!(t.feature_columns)),
    ])
}

/// Sink for completed runs, retrievable by identifier.
pub trait ExperimentTracker: Send + Sync {
    /// Persists a run as one unit.
    fn record(&self, run: &ExperimentRun) -> PipelineResult<()>;
    /// Loads a run, `None` when unknown.
    fn fetch(&self, run_id: &str) -> PipelineResult<Option<ExperimentRun>>;
    /// Every recorded run, oldest first.
    fn list(&self) -> PipelineResult<Vec<RunSummary>>;
}

/// File-backed tracker: `runs/<run_id>.json` plus an append-only `index.jsonl`.
#[derive(Debug)]
pub struct FileExperimentTracker {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl FileExperimentTracker {
    /// Opens (creating if needed) a tracker rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("runs"))?;
        Ok(Self {
            root,
            index_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a run document.
    #[must_use]
    pub fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.jsonl")
    }
}

impl ExperimentTracker for FileExperimentTracker {
    fn record(&self, run: &ExperimentRun) -> PipelineResult<()> {
        if !valid_run_id(&run.run_id) {
            return Err(PipelineError::Config(format!("invalid run id `{}`", run.run_id)));
        }
        let _guard = self.index_lock.lock();
        let path = self.run_path(&run.run_id);
        if path.exists() {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("run {} already recorded", run.run_id),
            )));
        }
        let tmp = path.with_extension("json.tmp");
        let written = write_document(&tmp, run)
            .and_then(|()| fs::rename(&tmp, &path).map_err(PipelineError::from));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        // a run missing from the index would never be listed
        if let Err(err) = append_index(&self.index_path(), &run.summary()) {
            let _ = fs::remove_file(&path);
            return Err(err);
        }
        Ok(())
    }

    fn fetch(&self, run_id: &str) -> PipelineResult<Option<ExperimentRun>> {
        if !valid_run_id(run_id) {
            return Ok(None);
        }
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn list(&self) -> PipelineResult<Vec<RunSummary>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut runs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            runs.push(serde_json::from_str(&line)?);
        }
        Ok(runs)
    }
}

/// In-memory tracker for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryExperimentTracker {
    runs: RwLock<IndexMap<String, ExperimentRun>>,
}

impl MemoryExperimentTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded run count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

impl ExperimentTracker for MemoryExperimentTracker {
    fn record(&self, run: &ExperimentRun) -> PipelineResult<()> {
        let mut runs = self.runs.write();
        if runs.contains_key(&run.run_id) {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("run {} already recorded", run.run_id),
            )));
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn fetch(&self, run_id: &str) -> PipelineResult<Option<ExperimentRun>> {
        Ok(self.runs.read().get(run_id).cloned())
    }

    fn list(&self) -> PipelineResult<Vec<RunSummary>> {
        Ok(self.runs.read().values().map(ExperimentRun::summary).collect())
    }
}

fn write_document(path: &Path, run: &ExperimentRun) -> PipelineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, run)?;
    writer.flush()?;
    Ok(())
}

fn append_index(path: &Path, summary: &RunSummary) -> PipelineResult<()> {
    let mut line = serde_json::to_vec(summary)?;
    line.push(b'\n');
    let mut index = OpenOptions::new().create(true).append(true).open(path)?;
    index.write_all(&line)?;
    index.flush()?;
    Ok(())
}

fn valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierPipeline;
    use crate::config::ForestConfig;
    use crate::features::engineer;
    use crate::ingest::CommitTable;
    use tempfile::tempdir;

    fn trained_run() -> ExperimentRun {
        let values: Vec<_> = (0..12)
            .map(|i| {
                let parents = if i < 3 { vec!["a", "b"] } else { vec!["a"] };
                json!({
                    "sha": format!("{i:040x}"),
                    "author_email": "a@x.io",
                    "author_date": "2024-01-01T10:00:00Z",
                    "additions": 3 * i,
                    "parents": parents,
                })
            })
            .collect();
        let table = engineer(&CommitTable::from_values(&values).unwrap()).unwrap();
        let config = PipelineConfig {
            forest: ForestConfig {
                n_trees: 4,
                ..ForestConfig::default()
            },
            ..PipelineConfig::default()
        };
        let trained = ClassifierPipeline.train(&table, &config).unwrap();
        ExperimentRun::new(
            new_run_id(),
            "tests",
            run_params(&config),
            &trained.report,
            trained.artifact,
        )
    }

    #[test]
    fn file_tracker_round_trips_runs() {
        let dir = tempdir().unwrap();
        let tracker = FileExperimentTracker::open(dir.path().join("tracking")).unwrap();
        let run = trained_run();
        tracker.record(&run).unwrap();
        assert!(tracker.run_path(&run.run_id).exists());
        assert!(!tracker.run_path(&run.run_id).with_extension("json.tmp").exists());

        let fetched = tracker.fetch(&run.run_id).unwrap().unwrap();
        assert_eq!(fetched.run_id, run.run_id);
        assert_eq!(fetched.artifact.feature_columns, run.artifact.feature_columns);
        assert_eq!(fetched.artifact.forest.trees().len(), 4);
        assert_eq!(
            fetched.feature_importances.keys().collect::<Vec<_>>(),
            run.feature_importances.keys().collect::<Vec<_>>()
        );
        assert_eq!(fetched.params["n_trees"], json!(4));

        let listed = tracker.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].run_id, run.run_id);
        assert!(tracker.fetch("run-missing").unwrap().is_none());
        assert!(tracker.fetch("../escape").unwrap().is_none());
    }

    #[test]
    fn duplicate_run_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let tracker = FileExperimentTracker::open(dir.path()).unwrap();
        let run = trained_run();
        tracker.record(&run).unwrap();
        assert!(tracker.record(&run).is_err());
        assert_eq!(tracker.list().unwrap().len(), 1);

        let memory = MemoryExperimentTracker::new();
        memory.record(&run).unwrap();
        assert!(memory.record(&run).is_err());
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn failed_index_append_rolls_back_the_run_document() {
        let dir = tempdir().unwrap();
        let tracker = FileExperimentTracker::open(dir.path()).unwrap();
        // a directory where the index file should be makes the append fail
        fs::create_dir(dir.path().join("index.jsonl")).unwrap();
        let run = trained_run();
        assert!(tracker.record(&run).is_err());
        assert!(!tracker.run_path(&run.run_id).exists());
        assert!(!tracker.run_path(&run.run_id).with_extension("json.tmp").exists());
        assert!(tracker.fetch(&run.run_id).unwrap().is_none());
    }

    #[test]
    fn failed_document_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let tracker = FileExperimentTracker::open(dir.path()).unwrap();
        let run = trained_run();
        let tmp = tracker.run_path(&run.run_id).with_extension("json.tmp");
        fs::create_dir(&tmp).unwrap();
        assert!(tracker.record(&run).is_err());
        assert!(!tracker.run_path(&run.run_id).exists());
        assert!(tracker.list().unwrap().is_empty());
    }

    #[test]
    fn memory_tracker_fetches_by_id() {
        let tracker = MemoryExperimentTracker::new();
        assert!(tracker.is_empty());
        let run = trained_run();
        tracker.record(&run).unwrap();
        assert_eq!(tracker.fetch(&run.run_id).unwrap(), Some(run.clone()));
        assert_eq!(tracker.list().unwrap(), vec![run.summary()]);
    }

    #[test]
    fn run_ids_are_prefixed_uuids() {
        let id = new_run_id();
        assert!(id.starts_with("run-"));
        assert_eq!(id.len(), 40);
        assert!(valid_run_id(&id));
    }
}
