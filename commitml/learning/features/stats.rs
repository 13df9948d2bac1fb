#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ingest::CommitTable;

/// Dataset-wide aggregates computed once before row derivation and shared by every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Median of `additions + deletions` across all rows.
    pub median_total_changes: f64,
    /// Commit count per author email.
    pub author_counts: HashMap<String, usize>,
    /// Summed comment count per author email.
    #[serde(default)]
    pub author_comments: HashMap<String, u64>,
    /// Rows the statistics were computed over.
    pub rows: usize,
}

impl DatasetStats {
    /// Single pass over the table. Totals saturate rather than overflow here; the
    /// per-row derivation reports overflowing counts.
    #[must_use]
    pub fn from_table(table: &CommitTable) -> Self {
        let mut totals = Vec::with_capacity(table.len());
        let mut author_counts: HashMap<String, usize> = HashMap::new();
        let mut author_comments: HashMap<String, u64> = HashMap::new();
        for record in table.records() {
            totals.push(record.additions.saturating_add(record.deletions));
            *author_counts.entry(record.author_email.clone()).or_default() += 1;
            let comments = author_comments.entry(record.author_email.clone()).or_default();
            *comments = comments.saturating_add(record.comment_count);
        }
        Self {
            median_total_changes: median(&mut totals),
            author_counts,
            author_comments,
            rows: table.len(),
        }
    }

    /// Rows sharing the author email; at least 1 for any email present in the table.
    #[must_use]
    pub fn author_commit_count(&self, email: &str) -> usize {
        self.author_counts.get(email).copied().unwrap_or(0)
    }

    /// Mean comment count over the author's commits; 0 for an unknown email.
    #[must_use]
    pub fn author_avg_comments(&self, email: &str) -> f64 {
        match (self.author_comments.get(email), self.author_counts.get(email)) {
            (Some(&comments), Some(&commits)) if commits > 0 => comments as f64 / commits as f64,
            _ => 0.0,
        }
    }
}

/// Median with the two middle values averaged for even counts; 0 for an empty slice.
fn median(values: &mut [u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid] as f64
    } else {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(rows: &[(u64, u64, &str)]) -> CommitTable {
        let values: Vec<_> = rows
            .iter()
            .enumerate()
            .map(|(i, (add, del, email))| {
                json!({
                    "sha": format!("c{i}"),
                    "author_date": "2024-01-01T00:00:00Z",
                    "additions": add,
                    "deletions": del,
                    "author_email": email,
                })
            })
            .collect();
        CommitTable::from_values(&values).unwrap()
    }

    #[test]
    fn median_of_odd_and_even_tables() {
        let odd = DatasetStats::from_table(&table(&[(1, 0, "a"), (10, 5, "a"), (3, 1, "b")]));
        assert!((odd.median_total_changes - 4.0).abs() < f64::EPSILON);
        let even = DatasetStats::from_table(&table(&[(1, 0, "a"), (10, 5, "a"), (3, 1, "b"), (6, 0, "c")]));
        assert!((even.median_total_changes - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counts_commits_per_author_email() {
        let stats = DatasetStats::from_table(&table(&[(1, 0, "a"), (1, 0, "a"), (1, 0, "b")]));
        assert_eq!(stats.author_commit_count("a"), 2);
        assert_eq!(stats.author_commit_count("b"), 1);
        assert_eq!(stats.author_commit_count("missing"), 0);
        assert_eq!(stats.rows, 3);
    }

    #[test]
    fn averages_comments_per_author() {
        let values = [("a", 4), ("a", 1), ("b", 0)]
            .iter()
            .enumerate()
            .map(|(i, (email, comments))| {
                json!({
                    "sha": format!("c{i}"),
                    "author_date": "2024-01-01T00:00:00Z",
                    "author_email": email,
                    "comment_count": comments,
                })
            })
            .collect::<Vec<_>>();
        let stats = DatasetStats::from_table(&CommitTable::from_values(&values).unwrap());
        assert!((stats.author_avg_comments("a") - 2.5).abs() < f64::EPSILON);
        assert!(stats.author_avg_comments("b").abs() < f64::EPSILON);
        assert!(stats.author_avg_comments("missing").abs() < f64::EPSILON);
    }

    #[test]
    fn median_is_order_independent() {
        let a = DatasetStats::from_table(&table(&[(9, 0, "a"), (1, 0, "b"), (4, 0, "c")]));
        let b = DatasetStats::from_table(&table(&[(4, 0, "c"), (9, 0, "a"), (1, 0, "b")]));
        assert_eq!(a, b);
    }
}
