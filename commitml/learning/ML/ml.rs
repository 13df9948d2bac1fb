#![allow(clippy::cast_precision_loss)]

use ndarray::{Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::classifier::editor::class_counts;
use crate::classifier::submodel::{DecisionTree, TreeParams};
use crate::config::ForestConfig;
use crate::error::{PipelineError, PipelineResult};

/// Bagged ensemble of CART trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fits `config.n_trees` trees. Each tree draws its own seed from a generator seeded
    /// with `config.seed`, so the forest is reproducible for a fixed seed.
    pub fn fit(x: &Array2<f64>, y: &[usize], config: &ForestConfig) -> PipelineResult<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(PipelineError::EmptyInput {
                stage: "forest training".into(),
            });
        }
        if y.len() != n {
            return Err(PipelineError::shape(
                None,
                "<label>",
                format!("{} labels for {n} rows", y.len()),
            ));
        }
        let classes = class_counts(y).len();
        if classes < 2 {
            return Err(PipelineError::ClassificationImpossible {
                stage: "forest training".into(),
                classes,
            });
        }
        let n_classes = y.iter().copied().max().map_or(0, |max| max + 1);
        let n_features = x.ncols();
        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_features: config.max_features.resolve(n_features),
        };

        let mut seeds = ChaCha8Rng::seed_from_u64(config.seed);
        let trees: Vec<DecisionTree> = (0..config.n_trees)
            .map(|_| {
                let mut rng = ChaCha8Rng::seed_from_u64(seeds.gen());
                let sample: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                DecisionTree::fit(x, y, sample, n_classes, params, &mut rng)
            })
            .collect();
        let feature_importances = aggregate_importances(&trees, n_features);
        Ok(Self {
            trees,
            n_features,
            n_classes,
            feature_importances,
        })
    }

    /// Mean of per-tree class probabilities for one sample.
    #[must_use]
    pub fn predict_proba_row(&self, sample: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut mean = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in mean.iter_mut().zip(tree.predict_proba(sample)) {
                *acc += p;
            }
        }
        let n_trees = self.trees.len().max(1) as f64;
        mean.iter_mut().for_each(|p| *p /= n_trees);
        mean
    }

    /// Class probabilities, one row per sample.
    #[must_use]
    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (r, sample) in x.rows().into_iter().enumerate() {
            for (c, p) in self.predict_proba_row(sample).into_iter().enumerate() {
                out[[r, c]] = p;
            }
        }
        out
    }

    /// Most probable class per sample; ties go to the lower class index.
    #[must_use]
    pub fn predict(&self, x: &Array2<f64>) -> Vec<usize> {
        x.rows()
            .into_iter()
            .map(|sample| argmax(&self.predict_proba_row(sample)))
            .collect()
    }

    /// Mean-decrease-impurity importances in feature column order, summing to 1.
    #[must_use]
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Feature dimensionality the forest was fitted on.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Averages the normalised importances of trees that split, then renormalises.
/// Falls back to a uniform vector when no tree split at all.
fn aggregate_importances(trees: &[DecisionTree], n_features: usize) -> Vec<f64> {
    let mut sum = vec![0.0; n_features];
    let mut contributing = 0usize;
    for tree in trees.iter().filter(|tree| tree.has_splits()) {
        contributing += 1;
        for (acc, value) in sum.iter_mut().zip(tree.importances()) {
            *acc += value;
        }
    }
    let total: f64 = sum.iter().sum();
    if contributing == 0 || total <= 0.0 {
        return vec![1.0 / n_features.max(1) as f64; n_features];
    }
    sum.iter().map(|value| value / total).collect()
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaxFeatures;
    use ndarray::Array2;

    fn separable(n: usize) -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_fn((n, 3), |(r, c)| match c {
            0 => r as f64,
            1 => (r % 3) as f64,
            _ => 1.0,
        });
        let y = (0..n).map(|r| usize::from(r >= n / 2)).collect();
        (x, y)
    }

    fn small_forest() -> ForestConfig {
        ForestConfig {
            n_trees: 15,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn importances_sum_to_one_in_column_order() {
        let (x, y) = separable(40);
        let forest = RandomForest::fit(&x, &y, &small_forest()).unwrap();
        let importances = forest.feature_importances();
        assert_eq!(importances.len(), 3);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(importances.iter().all(|v| *v >= 0.0));
        assert!(importances[2].abs() < f64::EPSILON);
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let (x, y) = separable(30);
        let a = RandomForest::fit(&x, &y, &small_forest()).unwrap();
        let b = RandomForest::fit(&x, &y, &small_forest()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.predict(&x), b.predict(&x));
    }

    #[test]
    fn learns_a_separable_boundary() {
        let (x, y) = separable(40);
        let config = ForestConfig {
            n_trees: 5,
            max_features: MaxFeatures::All,
            bootstrap: false,
            ..ForestConfig::default()
        };
        let forest = RandomForest::fit(&x, &y, &config).unwrap();
        assert_eq!(forest.predict(&x), y);
        let proba = forest.predict_proba(&x);
        assert_eq!(proba.dim(), (40, 2));
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn uniform_importances_when_no_tree_splits() {
        let x = Array2::from_elem((6, 4), 2.0);
        let y = vec![0, 1, 0, 1, 0, 1];
        let forest = RandomForest::fit(&x, &y, &small_forest()).unwrap();
        assert!(forest.trees().iter().all(|tree| !tree.has_splits()));
        assert_eq!(forest.feature_importances(), &[0.25; 4]);
    }

    #[test]
    fn single_class_is_rejected() {
        let (x, _) = separable(10);
        let err = RandomForest::fit(&x, &[0; 10], &small_forest()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ClassificationImpossible { classes: 1, .. }
        ));
    }

    #[test]
    fn ties_go_to_the_lower_class() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.2, 0.8]), 1);
    }
}
