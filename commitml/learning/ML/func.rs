#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::classifier::editor::{class_counts, Dataset};
use crate::config::TrainingConfig;
use crate::error::{PipelineError, PipelineResult};

/// Train and held-out partitions of a dataset.
#[derive(Debug, Clone)]
pub struct Split {
    /// Rows used to fit the scaler and the forest.
    pub train: Dataset,
    /// Held-out rows used for evaluation.
    pub test: Dataset,
}

/// Seeded train/test partition. Identical input and seed give an identical partition.
pub fn train_test_split(dataset: &Dataset, config: &TrainingConfig) -> PipelineResult<Split> {
    let n = dataset.len();
    if n < 2 {
        return Err(PipelineError::InsufficientRows {
            required: 2,
            found: n,
        });
    }
    let counts = dataset.class_counts();
    if counts.len() < 2 {
        return Err(PipelineError::ClassificationImpossible {
            stage: "dataset".into(),
            classes: counts.len(),
        });
    }
    // The epsilon keeps 10 * 0.2 style products from rounding up past the exact share.
    let n_test = ((n as f64 * config.test_ratio - 1e-9).ceil() as usize).clamp(1, n - 1);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let (mut train_rows, mut test_rows) = if config.stratify {
        let quotas = stratified_quotas(&counts, n_test);
        let mut train_rows = Vec::with_capacity(n - n_test);
        let mut test_rows = Vec::with_capacity(n_test);
        for (label, quota) in quotas {
            let mut members: Vec<usize> = (0..n).filter(|&r| dataset.labels[r] == label).collect();
            members.shuffle(&mut rng);
            test_rows.extend_from_slice(&members[..quota]);
            train_rows.extend_from_slice(&members[quota..]);
        }
        (train_rows, test_rows)
    } else {
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut rng);
        let train_rows = rows.split_off(n_test);
        (train_rows, rows)
    };
    train_rows.sort_unstable();
    test_rows.sort_unstable();

    let train = dataset.select(&train_rows);
    let train_classes = class_counts(&train.labels).len();
    if train_classes < 2 {
        return Err(PipelineError::ClassificationImpossible {
            stage: "training split".into(),
            classes: train_classes,
        });
    }
    Ok(Split {
        train,
        test: dataset.select(&test_rows),
    })
}

/// Per-class held-out counts: proportional shares of `n_test`, remainders assigned
/// largest first, never taking a class's last training row.
fn stratified_quotas(counts: &BTreeMap<usize, usize>, n_test: usize) -> BTreeMap<usize, usize> {
    let n: usize = counts.values().sum();
    let mut quotas: BTreeMap<usize, usize> = BTreeMap::new();
    let mut remainders = Vec::with_capacity(counts.len());
    for (&label, &count) in counts {
        let share = n_test * count;
        quotas.insert(label, (share / n).min(count - 1));
        remainders.push((share % n, label));
    }
    // Largest remainder first; lower label wins ties.
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut assigned: usize = quotas.values().sum();
    while assigned < n_test {
        let mut progressed = false;
        for &(_, label) in &remainders {
            if assigned == n_test {
                break;
            }
            let quota = quotas.entry(label).or_default();
            if *quota + 1 < counts[&label] {
                *quota += 1;
                assigned += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    quotas
}

/// Per-column standardisation fitted on training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Column means.
    pub mean: Array1<f64>,
    /// Column population standard deviations (1.0 for constant columns).
    pub scale: Array1<f64>,
}

impl StandardScaler {
    /// Fits means and scales; a non-finite cell is fatal.
    pub fn fit(features: &Array2<f64>, columns: &[String]) -> PipelineResult<Self> {
        if features.nrows() == 0 {
            return Err(PipelineError::EmptyInput {
                stage: "scaler".into(),
            });
        }
        check_finite(features, columns)?;
        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::EmptyInput {
                stage: "scaler".into(),
            })?;
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > 0.0 && std.is_finite() { std } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// Applies the fitted transform to a matrix with the same column layout.
    pub fn transform(&self, features: &Array2<f64>, columns: &[String]) -> PipelineResult<Array2<f64>> {
        if features.ncols() != self.mean.len() {
            return Err(PipelineError::shape(
                None,
                "<features>",
                format!(
                    "scaler fitted on {} columns, got {}",
                    self.mean.len(),
                    features.ncols()
                ),
            ));
        }
        check_finite(features, columns)?;
        Ok((features - &self.mean) / &self.scale)
    }
}

fn check_finite(features: &Array2<f64>, columns: &[String]) -> PipelineResult<()> {
    match features.indexed_iter().find(|(_, value)| !value.is_finite()) {
        Some(((row, col), _)) => Err(PipelineError::NonNumericFeature {
            row,
            column: columns
                .get(col)
                .cloned()
                .unwrap_or_else(|| format!("#{col}")),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::editor::{MERGE, NON_MERGE};
    use ndarray::array;

    fn dataset(labels: Vec<usize>) -> Dataset {
        let n = labels.len();
        Dataset {
            columns: vec!["x".into()],
            features: Array2::from_shape_fn((n, 1), |(r, _)| r as f64),
            commit_shas: (0..n).map(|r| format!("c{r}")).collect(),
            labels,
        }
    }

    fn ten_rows() -> Dataset {
        let mut labels = vec![MERGE, MERGE];
        labels.extend(std::iter::repeat(NON_MERGE).take(8));
        dataset(labels)
    }

    #[test]
    fn stratified_split_keeps_class_shares() {
        let split = train_test_split(&ten_rows(), &TrainingConfig::default()).unwrap();
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.test.class_counts(), BTreeMap::from([(NON_MERGE, 2)]));
        assert_eq!(split.train.class_counts().get(&MERGE), Some(&2));
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let config = TrainingConfig::default();
        let a = train_test_split(&ten_rows(), &config).unwrap();
        let b = train_test_split(&ten_rows(), &config).unwrap();
        assert_eq!(a.test.commit_shas, b.test.commit_shas);
        assert!(a
            .test
            .commit_shas
            .iter()
            .all(|sha| !a.train.commit_shas.contains(sha)));
    }

    #[test]
    fn quotas_use_largest_remainder() {
        let counts = BTreeMap::from([(0, 7), (1, 3)]);
        assert_eq!(stratified_quotas(&counts, 3), BTreeMap::from([(0, 2), (1, 1)]));
        let counts = BTreeMap::from([(0, 9), (1, 1)]);
        assert_eq!(stratified_quotas(&counts, 2), BTreeMap::from([(0, 2), (1, 0)]));
    }

    #[test]
    fn single_class_and_tiny_inputs_fail() {
        let err = train_test_split(&dataset(vec![NON_MERGE; 5]), &TrainingConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ClassificationImpossible { classes: 1, .. }
        ));
        let err = train_test_split(&dataset(vec![MERGE]), &TrainingConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientRows { found: 1, .. }
        ));
    }

    #[test]
    fn scaler_standardises_and_keeps_constant_columns() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let train = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = StandardScaler::fit(&train, &columns).unwrap();
        assert_eq!(scaler.mean, array![2.0, 5.0]);
        assert_eq!(scaler.scale, array![1.0, 1.0]);
        let scaled = scaler.transform(&array![[3.0, 7.0]], &columns).unwrap();
        assert_eq!(scaled, array![[1.0, 2.0]]);
    }

    #[test]
    fn scaler_rejects_non_finite_cells() {
        let columns = vec!["a".to_string(), "ratio".to_string()];
        let err = StandardScaler::fit(&array![[1.0, 2.0], [1.0, f64::NAN]], &columns).unwrap_err();
        match err {
            PipelineError::NonNumericFeature { row, column } => {
                assert_eq!(row, 1);
                assert_eq!(column, "ratio");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
