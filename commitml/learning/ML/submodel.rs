#![allow(clippy::cast_precision_loss)]

use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth; the root sits at depth 0.
    pub max_depth: usize,
    /// Minimum samples a node needs before it may split.
    pub min_samples_split: usize,
    /// Minimum samples on each side of a split.
    pub min_samples_leaf: usize,
    /// Non-constant features examined per split.
    pub max_features: usize,
}

/// Node of a fitted tree, stored in a flat arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Terminal node holding class probabilities.
    Leaf {
        /// Class distribution of the training samples that reached the node.
        probabilities: Vec<f64>,
        /// Training samples (bootstrap duplicates included).
        samples: usize,
    },
    /// Internal node; `value <= threshold` goes left.
    Split {
        /// Feature column.
        feature: usize,
        /// Decision threshold.
        threshold: f64,
        /// Left child index.
        left: usize,
        /// Right child index.
        right: usize,
        /// Training samples.
        samples: usize,
    },
}

/// CART classification tree grown with Gini impurity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_classes: usize,
    /// Mean-decrease-impurity per feature, normalised to sum 1 (all zero when the tree never split).
    importances: Vec<f64>,
}

struct Grower<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    n_classes: usize,
    params: TreeParams,
    rng: &'a mut ChaCha8Rng,
    nodes: Vec<Node>,
    decrease: Vec<f64>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl DecisionTree {
    /// Grows a tree on the rows in `sample` (duplicates allowed, as produced by bootstrapping).
    #[must_use]
    pub fn fit(
        x: &Array2<f64>,
        y: &[usize],
        sample: Vec<usize>,
        n_classes: usize,
        params: TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut grower = Grower {
            x,
            y,
            n_classes,
            params,
            rng,
            nodes: Vec::new(),
            decrease: vec![0.0; x.ncols()],
        };
        grower.grow(sample, 0);
        let total: f64 = grower.decrease.iter().sum();
        let importances = if total > 0.0 {
            grower.decrease.iter().map(|d| d / total).collect()
        } else {
            vec![0.0; x.ncols()]
        };
        Self {
            nodes: grower.nodes,
            n_classes,
            importances,
        }
    }

    /// Class probabilities for one sample.
    #[must_use]
    pub fn predict_proba(&self, sample: ArrayView1<'_, f64>) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { probabilities, .. } => return probabilities,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if sample[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Normalised impurity decrease per feature.
    #[must_use]
    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    /// True when the tree made at least one split.
    #[must_use]
    pub fn has_splits(&self) -> bool {
        self.nodes.len() > 1
    }

    /// Node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Depth of the deepest leaf.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Number of classes the tree predicts over.
    #[must_use]
    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }
}

impl Grower<'_> {
    fn grow(&mut self, sample: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&sample);
        let n = sample.len();
        let impurity = gini(&counts, n);
        let idx = self.nodes.len();
        let splittable = depth < self.params.max_depth
            && n >= self.params.min_samples_split
            && n >= 2 * self.params.min_samples_leaf
            && impurity > 0.0;
        let candidate = if splittable {
            self.best_split(&sample, &counts, impurity)
        } else {
            None
        };
        let Some(candidate) = candidate else {
            self.nodes.push(Node::Leaf {
                probabilities: probabilities(&counts, n),
                samples: n,
            });
            return idx;
        };

        self.decrease[candidate.feature] += candidate.gain;
        self.nodes.push(Node::Split {
            feature: candidate.feature,
            threshold: candidate.threshold,
            left: 0,
            right: 0,
            samples: n,
        });
        let left_idx = self.grow(candidate.left, depth + 1);
        let right_idx = self.grow(candidate.right, depth + 1);
        if let Node::Split { left, right, .. } = &mut self.nodes[idx] {
            *left = left_idx;
            *right = right_idx;
        }
        idx
    }

    /// Examines shuffled features until `max_features` non-constant ones were tried
    /// and at least one valid split exists, or features run out.
    fn best_split(&mut self, sample: &[usize], counts: &[usize], impurity: f64) -> Option<Candidate> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut *self.rng);
        let n = sample.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<(usize, f64, f64)> = None;
        let mut tried = 0;

        for feature in features {
            if tried >= self.params.max_features && best.is_some() {
                break;
            }
            let mut order: Vec<(f64, usize)> = sample
                .iter()
                .map(|&row| (self.x[[row, feature]], self.y[row]))
                .collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));
            if order[0].0 >= order[n - 1].0 {
                continue;
            }
            tried += 1;

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for i in 1..n {
                let class = order[i - 1].1;
                left[class] += 1;
                right[class] -= 1;
                if order[i - 1].0 >= order[i].0 || i < min_leaf || n - i < min_leaf {
                    continue;
                }
                let weighted = (i as f64).mul_add(gini(&left, i), (n - i) as f64 * gini(&right, n - i));
                let gain = (n as f64).mul_add(impurity, -weighted);
                if best.map_or(true, |(_, _, g)| gain > g) {
                    let (lo, hi) = (order[i - 1].0, order[i].0);
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some((feature, threshold, gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = sample
            .iter()
            .copied()
            .partition(|&row| self.x[[row, feature]] <= threshold);
        Some(Candidate {
            feature,
            threshold,
            gain: gain.max(0.0),
            left,
            right,
        })
    }

    fn class_counts(&self, sample: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &row in sample {
            counts[self.y[row]] += 1;
        }
        counts
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

fn probabilities(counts: &[usize], n: usize) -> Vec<f64> {
    counts
        .iter()
        .map(|&c| if n == 0 { 0.0 } else { c as f64 / n as f64 })
        .collect()
}
