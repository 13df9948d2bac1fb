#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Held-out evaluation of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Share of correct held-out predictions.
    pub accuracy: f64,
    /// Support-weighted precision.
    pub precision: f64,
    /// Support-weighted recall.
    pub recall: f64,
    /// Support-weighted F1.
    pub f1_score: f64,
    /// Accuracy on the training split.
    pub train_accuracy: f64,
    /// Rows in the training split.
    pub train_samples: usize,
    /// Rows in the held-out split.
    pub test_samples: usize,
    /// `confusion_matrix[actual][predicted]` over classes 0 and 1.
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl EvaluationMetrics {
    /// Scores held-out predictions; `train_*` describe the fit on the training split.
    #[must_use]
    pub fn evaluate(
        actual: &[usize],
        predicted: &[usize],
        train_actual: &[usize],
        train_predicted: &[usize],
    ) -> Self {
        let (precision, recall, f1_score) = weighted_scores(actual, predicted);
        Self {
            accuracy: accuracy(actual, predicted),
            precision,
            recall,
            f1_score,
            train_accuracy: accuracy(train_actual, train_predicted),
            train_samples: train_actual.len(),
            test_samples: actual.len(),
            confusion_matrix: confusion_matrix(actual, predicted, 2),
        }
    }

    /// Scalar metrics as an ordered map, as handed to the experiment tracker.
    #[must_use]
    pub fn as_map(&self) -> IndexMap<String, f64> {
        IndexMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("precision".to_string(), self.precision),
            ("recall".to_string(), self.recall),
            ("f1_score".to_string(), self.f1_score),
            ("train_accuracy".to_string(), self.train_accuracy),
            ("train_samples".to_string(), self.train_samples as f64),
            ("test_samples".to_string(), self.test_samples as f64),
        ])
    }
}

/// Fraction of matching positions; 0 for empty input.
#[must_use]
pub fn accuracy(actual: &[usize], predicted: &[usize]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| a == p)
        .count();
    correct as f64 / actual.len() as f64
}

/// Precision, recall and F1 per class over the union of actual and predicted labels,
/// averaged with weights equal to each class's support in `actual`. A zero denominator
/// scores 0.
#[must_use]
pub fn weighted_scores(actual: &[usize], predicted: &[usize]) -> (f64, f64, f64) {
    if actual.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let labels: BTreeSet<usize> = actual.iter().chain(predicted).copied().collect();
    let total = actual.len() as f64;
    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for label in labels {
        let tp = actual
            .iter()
            .zip(predicted)
            .filter(|(a, p)| **a == label && **p == label)
            .count() as f64;
        let predicted_pos = predicted.iter().filter(|p| **p == label).count() as f64;
        let support = actual.iter().filter(|a| **a == label).count() as f64;
        let p = safe_div(tp, predicted_pos);
        let r = safe_div(tp, support);
        let f = safe_div(2.0 * p * r, p + r);
        let weight = support / total;
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;
    }
    (precision, recall, f1)
}

/// `matrix[actual][predicted]` counts for classes `0..n_classes`.
#[must_use]
pub fn confusion_matrix(actual: &[usize], predicted: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; n_classes]; n_classes];
    for (&a, &p) in actual.iter().zip(predicted) {
        if a < n_classes && p < n_classes {
            matrix[a][p] += 1;
        }
    }
    matrix
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Summary of a completed training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Model family.
    pub model: String,
    /// Held-out metrics.
    pub metrics: EvaluationMetrics,
    /// Importance per configured feature column, in configured order.
    pub feature_importances: IndexMap<String, f64>,
    /// Trees in the fitted forest.
    pub n_trees: usize,
}

impl TrainingReport {
    /// Columns ranked by importance, highest first.
    #[must_use]
    pub fn top_features(&self, n: usize) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .feature_importances
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[ML] model={} trees={} accuracy={:.4} precision={:.4} recall={:.4} f1={:.4}",
            self.model,
            self.n_trees,
            self.metrics.accuracy,
            self.metrics.precision,
            self.metrics.recall,
            self.metrics.f1_score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn weighted_scores_follow_support() {
        let actual = [0, 0, 0, 1];
        let predicted = [0, 0, 1, 1];
        let (p, r, f) = weighted_scores(&actual, &predicted);
        // class 0: p=1, r=2/3, f=0.8; class 1: p=0.5, r=1, f=2/3.
        assert!(close(p, 0.75 * 1.0 + 0.25 * 0.5));
        assert!(close(r, 0.75 * (2.0 / 3.0) + 0.25 * 1.0));
        assert!(close(f, 0.75 * 0.8 + 0.25 * (2.0 / 3.0)));
        assert!(close(accuracy(&actual, &predicted), 0.75));
    }

    #[test]
    fn zero_division_scores_zero() {
        let (p, r, f) = weighted_scores(&[0, 0], &[1, 1]);
        assert!(close(p, 0.0) && close(r, 0.0) && close(f, 0.0));
        assert!(close(accuracy(&[], &[]), 0.0));
    }

    #[test]
    fn confusion_matrix_is_actual_by_predicted() {
        let matrix = confusion_matrix(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0], 2);
        assert_eq!(matrix, vec![vec![1, 1], vec![1, 2]]);
    }

    #[test]
    fn report_ranks_features() {
        let metrics = EvaluationMetrics::evaluate(&[0, 1], &[0, 1], &[0, 1, 1], &[0, 1, 0]);
        assert!(close(metrics.accuracy, 1.0));
        assert!(close(metrics.train_accuracy, 2.0 / 3.0));
        assert_eq!(metrics.as_map().keys().next().map(String::as_str), Some("accuracy"));
        let report = TrainingReport {
            model: "random_forest".into(),
            metrics,
            feature_importances: IndexMap::from([
                ("a".to_string(), 0.2),
                ("b".to_string(), 0.7),
                ("c".to_string(), 0.1),
            ]),
            n_trees: 3,
        };
        assert_eq!(report.top_features(2), vec![("b", 0.7), ("a", 0.2)]);
        assert!(report.summary().contains("accuracy=1.0000"));
    }
}
