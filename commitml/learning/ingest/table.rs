use std::collections::HashMap;

use serde_json::Value;

use super::record::CommitRecord;
use crate::error::{PipelineError, PipelineResult};

/// Validated, ordered set of commit records with unique identifiers.
#[derive(Debug, Clone, Default)]
pub struct CommitTable {
    records: Vec<CommitRecord>,
}

impl CommitTable {
    /// Builds a table, rejecting duplicate identifiers.
    pub fn new(records: Vec<CommitRecord>) -> PipelineResult<Self> {
        ensure_unique(&records)?;
        Ok(Self { records })
    }

    /// Parses raw JSON rows into a table.
    pub fn from_values(rows: &[Value]) -> PipelineResult<Self> {
        let records = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| CommitRecord::from_value(idx, row))
            .collect::<PipelineResult<Vec<_>>>()?;
        Self::new(records)
    }

    /// Records in input order.
    #[must_use]
    pub fn records(&self) -> &[CommitRecord] {
        &self.records
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows with two or more parents.
    #[must_use]
    pub fn merge_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.num_parents() >= 2)
            .count()
    }

    /// Row count per source repository (`unknown` when absent), sorted by name.
    #[must_use]
    pub fn repository_counts(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            let repo = record.source_repository.as_deref().unwrap_or("unknown");
            *counts.entry(repo).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(repo, count)| (repo.to_string(), count))
            .collect();
        counts.sort();
        counts
    }
}

fn ensure_unique(records: &[CommitRecord]) -> PipelineResult<()> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        if let Some(first) = seen.insert(record.commit_sha.as_str(), idx) {
            return Err(PipelineError::shape(
                Some(idx),
                "commit_sha",
                format!(
                    "duplicate identifier {} (first seen at row {first})",
                    record.commit_sha
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(sha: &str, parents: usize, repo: &str) -> Value {
        json!({
            "sha": sha,
            "author_date": "2024-02-01T12:00:00Z",
            "parents": (0..parents).map(|i| format!("p{i}")).collect::<Vec<_>>(),
            "source_repository": repo,
        })
    }

    #[test]
    fn builds_table_and_summarises() {
        let table = CommitTable::from_values(&[
            row("a", 1, "vercel/next.js"),
            row("b", 2, "vercel/next.js"),
            row("c", 0, "facebook/react"),
        ])
        .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.merge_count(), 1);
        assert_eq!(
            table.repository_counts(),
            vec![("facebook/react".to_string(), 1), ("vercel/next.js".to_string(), 2)]
        );
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let err = CommitTable::from_values(&[row("a", 1, "r"), row("a", 1, "r")]).unwrap_err();
        match err {
            PipelineError::InputShape { row, column, reason } => {
                assert_eq!(row, Some(1));
                assert_eq!(column, "commit_sha");
                assert!(reason.contains("first seen at row 0"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
