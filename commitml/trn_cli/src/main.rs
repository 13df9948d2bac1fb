use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use commitml_learning::{
    export_features, validate_export, CommitExport, CommitPipeline, ExperimentTracker,
    FeatureTable, FileExperimentTracker, LearningTelemetry, PipelineConfig,
};
use serde_json::json;
use shared_event_bus::{EventArchive, FileEventPublisher};
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "cml", version, about = "Commit metadata pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validates, engineers features, trains and records one run.
    Run(RunArgs),
    /// Feature engineering only.
    Features {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Runs the data quality checks and prints the report.
    Validate {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        min_rows: Option<usize>,
    },
    /// Inspects recorded runs.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
        /// Defaults to `tracking.root` of the config.
        #[arg(long, global = true)]
        tracking_dir: Option<PathBuf>,
        #[arg(long, global = true)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    /// Lists the most recent runs.
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Prints one recorded run.
    Show { run_id: String },
    /// Prints stage events from an event log.
    Events {
        #[arg(long)]
        event_log: PathBuf,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `tracking.root` from the config.
    #[arg(long)]
    tracking_dir: Option<PathBuf>,
    #[arg(long, default_value = "commitml/logs")]
    log_dir: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
    #[arg(long)]
    features_out: Option<PathBuf>,
    #[arg(long)]
    skip_validation: bool,
}

fn main() -> ExitCode {
    match dispatch(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Features { dataset, out } => {
            let features = export_features(&CommitExport::new(&dataset), &out)
                .with_context(|| format!("engineering features from {}", dataset.display()))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "rows": features.len(),
                    "columns": FeatureTable::columns().len(),
                    "out": out,
                }))?
            );
            Ok(())
        }
        Commands::Validate {
            dataset,
            config,
            min_rows,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(min_rows) = min_rows {
                config.validation.min_rows = min_rows;
            }
            let report = validate_export(&CommitExport::new(&dataset), &config)
                .with_context(|| format!("validating {}", dataset.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.has_failures() {
                bail!("{} quality check(s) failed", report.summary.failed);
            }
            Ok(())
        }
        Commands::Runs {
            command,
            tracking_dir,
            config,
        } => {
            let root = tracking_root(tracking_dir, &load_config(config.as_deref())?);
            handle_runs(command, &root)
        }
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    anyhow::ensure!(
        args.dataset.exists(),
        "dataset {} not found",
        args.dataset.display()
    );
    let mut config = load_config(args.config.as_deref())?;
    config.tracking.root = tracking_root(args.tracking_dir, &config);

    let log_path = compute_log_path(&args.log_dir)?;
    let mut builder = LearningTelemetry::builder("cml").log_path(&log_path);
    if let Some(path) = &args.event_log {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        builder = builder.event_publisher(Arc::new(publisher));
    }
    let telemetry = builder.build().context("building telemetry")?;
    telemetry.log(
        LogLevel::Info,
        "run_requested",
        json!({ "dataset": args.dataset, "config": args.config }),
    )?;

    let tracker = open_tracker(&config.tracking.root)?;
    let mut pipeline = CommitPipeline::new(config, Arc::new(tracker))
        .with_telemetry(telemetry)
        .skip_validation(args.skip_validation);
    if let Some(out) = args.features_out {
        pipeline = pipeline.export_features(out);
    }

    let outcome = pipeline
        .run_export(&CommitExport::new(&args.dataset))
        .with_context(|| format!("pipeline run over {} failed", args.dataset.display()))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    eprintln!("{}", outcome.report.summary());
    eprintln!("log written to {}", log_path.display());
    Ok(())
}

fn handle_runs(command: RunsCommand, tracking_dir: &Path) -> Result<()> {
    match command {
        RunsCommand::List { limit } => {
            for run in open_tracker(tracking_dir)?.list()?.into_iter().rev().take(limit) {
                let accuracy = run.metrics.get("accuracy").copied().unwrap_or_default();
                let f1 = run.metrics.get("f1_score").copied().unwrap_or_default();
                println!(
                    "{} | {} | {} | accuracy={accuracy:.4} f1={f1:.4}",
                    run.run_id, run.experiment, run.created_at
                );
            }
            Ok(())
        }
        RunsCommand::Show { run_id } => match open_tracker(tracking_dir)?.fetch(&run_id)? {
            Some(run) => {
                println!("{}", serde_json::to_string_pretty(&run)?);
                Ok(())
            }
            None => bail!("run {run_id} not found"),
        },
        RunsCommand::Events {
            event_log,
            run_id,
            limit,
        } => {
            let archive = EventArchive::new(event_log);
            let events = match run_id {
                Some(run_id) => archive.for_run(&run_id)?,
                None => archive.tail(limit)?,
            };
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
    }
}

fn open_tracker(root: &Path) -> Result<FileExperimentTracker> {
    FileExperimentTracker::open(root)
        .with_context(|| format!("opening tracker at {}", root.display()))
}

/// The command-line directory wins over the config's `tracking.root`.
fn tracking_root(cli: Option<PathBuf>, config: &PipelineConfig) -> PathBuf {
    cli.unwrap_or_else(|| config.tracking.root.clone())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Utc::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir).with_context(|| format!("creating log dir {}", dir.display()))?;
    Ok(dir.join(format!(
        "run-{}.log.jsonl",
        now.format("%Y%m%d-%H%M%S%.3f")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "cml",
            "run",
            "--dataset",
            "commits.jsonl",
            "--tracking-dir",
            "track",
            "--skip-validation",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.dataset, PathBuf::from("commits.jsonl"));
                assert_eq!(args.tracking_dir, Some(PathBuf::from("track")));
                assert!(args.skip_validation);
                assert!(args.features_out.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn runs_show_takes_positional_id() {
        let cli = Cli::try_parse_from(["cml", "runs", "show", "run-1", "--tracking-dir", "t"])
            .unwrap();
        match cli.command {
            Commands::Runs {
                command: RunsCommand::Show { run_id },
                tracking_dir,
                config,
            } => {
                assert_eq!(run_id, "run-1");
                assert_eq!(tracking_dir, Some(PathBuf::from("t")));
                assert!(config.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_and_runs_share_the_default_tracking_root() {
        let run = match Cli::try_parse_from(["cml", "run", "--dataset", "c.jsonl"]).unwrap().command {
            Commands::Run(args) => tracking_root(args.tracking_dir, &load_config(None).unwrap()),
            other => panic!("unexpected command {other:?}"),
        };
        let listed = match Cli::try_parse_from(["cml", "runs", "list"]).unwrap().command {
            Commands::Runs {
                tracking_dir,
                config,
                ..
            } => tracking_root(tracking_dir, &load_config(config.as_deref()).unwrap()),
            other => panic!("unexpected command {other:?}"),
        };
        assert_eq!(run, listed);
        assert_eq!(run, PipelineConfig::default().tracking.root);
    }

    #[test]
    fn log_path_is_dated() {
        let tmp = tempdir().unwrap();
        let path = compute_log_path(tmp.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run-") && name.ends_with(".log.jsonl"));
        let day = path.parent().unwrap();
        assert!(day.is_dir());
        let month = day.parent().unwrap();
        let year = month.parent().unwrap();
        let dated: String = [year, month, day]
            .iter()
            .map(|dir| dir.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(&name[4..12], dated);
        assert_eq!(day.parent().unwrap().parent().unwrap().parent().unwrap(), tmp.path());
    }

    #[test]
    fn missing_run_is_an_error() {
        let tmp = tempdir().unwrap();
        let err = handle_runs(
            RunsCommand::Show {
                run_id: "run-unknown".into(),
            },
            tmp.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
