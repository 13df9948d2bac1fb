use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::{CommitRecord, CommitTable};

/// On-disk layout of a commit export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// A single JSON array of rows.
    JsonArray,
    /// One JSON object per line.
    JsonLines,
}

/// File-backed source of raw commit rows.
#[derive(Debug, Clone)]
pub struct CommitExport {
    path: PathBuf,
}

impl CommitExport {
    /// Creates a source for the export at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Export path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every raw row; the layout is detected from the first non-blank byte.
    pub fn read_rows(&self) -> PipelineResult<(ExportFormat, Vec<Value>)> {
        let contents = fs::read_to_string(&self.path)?;
        let trimmed = contents.trim_start();
        if trimmed.starts_with('[') {
            let rows: Vec<Value> = serde_json::from_str(trimmed)?;
            return Ok((ExportFormat::JsonArray, rows));
        }
        let mut rows = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str(line).map_err(|err| {
                PipelineError::shape(
                    Some(rows.len()),
                    "<row>",
                    format!("line {} is not valid JSON: {err}", line_no + 1),
                )
            })?;
            rows.push(row);
        }
        Ok((ExportFormat::JsonLines, rows))
    }

    /// Parses every row into a commit record, without the uniqueness check.
    pub fn read_records(&self) -> PipelineResult<Vec<CommitRecord>> {
        let (_, rows) = self.read_rows()?;
        rows.iter()
            .enumerate()
            .map(|(idx, row)| CommitRecord::from_value(idx, row))
            .collect()
    }

    /// Reads and validates the export into a commit table.
    pub fn load_table(&self) -> PipelineResult<CommitTable> {
        CommitTable::new(self.read_records()?)
    }
}

/// Writes rows as JSON lines, creating parent directories. The file is replaced atomically.
pub fn write_json_lines<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> PipelineResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
