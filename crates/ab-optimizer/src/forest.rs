use crate::error::{OptResult, OptimizerError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Tuning knobs for [`HomogeneousRandomForest`] (spec §4.4 item 2,
/// grounded on `HomogeneousRandomForestRegressionModel`'s model config).
#[derive(Debug, Clone, Copy)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub features_fraction_per_estimator: f64,
    pub samples_fraction_per_estimator: f64,
    pub bootstrap: bool,
    pub n_new_samples_before_refit: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            n_estimators: 10,
            features_fraction_per_estimator: 0.7,
            samples_fraction_per_estimator: 0.9,
            bootstrap: true,
            n_new_samples_before_refit: 5,
            max_depth: 8,
            min_samples_leaf: 2,
        }
    }
}

/// Pooled prediction at one point, computed from the law of total
/// variance over every tree's own prediction (spec §4.4 item 2, exact
/// pooling formula).
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub mean: f64,
    pub variance: f64,
    pub sample_variance: f64,
    pub sample_size: usize,
    pub dof: i64,
}

#[derive(Debug, Clone, Copy)]
struct TreePrediction {
    predicted_value: f64,
    variance: f64,
    sample_variance: f64,
    sample_size: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        mean: f64,
        variance: f64,
        sample_size: usize,
    },
    Split {
        dim: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A single regression tree over a fixed random subset of dimensions,
/// refit only once it has accumulated `n_new_samples_before_refit` new
/// rows since its last fit.
#[derive(Debug, Clone)]
struct DecisionTree {
    dims: Vec<usize>,
    root: Option<Node>,
    max_depth: usize,
    min_samples_leaf: usize,
    n_new_samples_before_refit: usize,
    samples_since_fit: usize,
    fitted: bool,
}

impl DecisionTree {
    fn new(dims: Vec<usize>, max_depth: usize, min_samples_leaf: usize, n_new_samples_before_refit: usize) -> Self {
        DecisionTree {
            dims,
            root: None,
            max_depth,
            min_samples_leaf: min_samples_leaf.max(1),
            n_new_samples_before_refit,
            samples_since_fit: usize::MAX,
            fitted: false,
        }
    }

    fn should_fit(&self, num_selected_observations: usize) -> bool {
        num_selected_observations >= self.min_samples_leaf
            && (!self.fitted || self.samples_since_fit >= self.n_new_samples_before_refit)
    }

    fn fit(&mut self, rows: &[(&[f64], f64)]) {
        if rows.len() < self.min_samples_leaf {
            return;
        }
        let indices: Vec<usize> = (0..rows.len()).collect();
        self.root = Some(self.build(rows, &indices, 0));
        self.fitted = true;
        self.samples_since_fit = 0;
    }

    fn build(&self, rows: &[(&[f64], f64)], indices: &[usize], depth: usize) -> Node {
        let targets: Vec<f64> = indices.iter().map(|&i| rows[i].1).collect();
        let (mean, variance) = mean_variance(&targets);
        let leaf = Node::Leaf {
            mean,
            variance,
            sample_size: indices.len(),
        };
        if depth >= self.max_depth || indices.len() < 2 * self.min_samples_leaf {
            return leaf;
        }

        let mut best: Option<(usize, f64, f64, Vec<usize>, Vec<usize>)> = None;
        for &dim in &self.dims {
            let mut sorted = indices.to_vec();
            sorted.sort_by(|&a, &b| rows[a].0[dim].partial_cmp(&rows[b].0[dim]).unwrap_or(std::cmp::Ordering::Equal));
            for split_at in self.min_samples_leaf..=(sorted.len() - self.min_samples_leaf) {
                let left = &sorted[..split_at];
                let right = &sorted[split_at..];
                let left_targets: Vec<f64> = left.iter().map(|&i| rows[i].1).collect();
                let right_targets: Vec<f64> = right.iter().map(|&i| rows[i].1).collect();
                let (_, lv) = mean_variance(&left_targets);
                let (_, rv) = mean_variance(&right_targets);
                let cost = lv * left.len() as f64 + rv * right.len() as f64;
                let is_better = match &best {
                    Some((_, _, best_cost, _, _)) => cost < *best_cost,
                    None => true,
                };
                if is_better {
                    let threshold = (rows[sorted[split_at - 1]].0[dim] + rows[sorted[split_at]].0[dim]) / 2.0;
                    best = Some((dim, threshold, cost, left.to_vec(), right.to_vec()));
                }
            }
        }

        match best {
            Some((dim, threshold, _, left, right)) if !left.is_empty() && !right.is_empty() => Node::Split {
                dim,
                threshold,
                left: Box::new(self.build(rows, &left, depth + 1)),
                right: Box::new(self.build(rows, &right, depth + 1)),
            },
            _ => leaf,
        }
    }

    fn predict(&self, point: &[f64]) -> Option<TreePrediction> {
        let mut node = self.root.as_ref()?;
        loop {
            match node {
                Node::Leaf { mean, variance, sample_size } => {
                    return Some(TreePrediction {
                        predicted_value: *mean,
                        variance: *variance,
                        sample_variance: *variance,
                        sample_size: *sample_size,
                    });
                }
                Node::Split { dim, threshold, left, right } => {
                    node = if point[*dim] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance)
}

/// A random forest of uniformly configured trees, each over a random
/// dimension subset and row subsample (spec §4.4 item 2,
/// `HomogeneousRandomForestRegressionModel`).
pub struct HomogeneousRandomForest {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
    rng: StdRng,
}

impl HomogeneousRandomForest {
    pub fn new(config: ForestConfig, total_dims: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let features_per_estimator = ((total_dims as f64) * config.features_fraction_per_estimator)
            .ceil()
            .max(1.0) as usize;
        let all_dims: Vec<usize> = (0..total_dims.max(1)).collect();
        let trees = (0..config.n_estimators)
            .map(|_| {
                let mut dims = all_dims.clone();
                dims.shuffle(&mut rng);
                dims.truncate(features_per_estimator.min(dims.len()));
                DecisionTree::new(dims, config.max_depth, config.min_samples_leaf, config.n_new_samples_before_refit)
            })
            .collect();
        HomogeneousRandomForest { config, trees, rng }
    }

    /// Refits every tree whose accumulated new-row count has crossed
    /// `n_new_samples_before_refit`, each on its own row subsample (with
    /// replacement — bootstrap — when configured and the plain subsample
    /// would undersize it).
    pub fn fit(&mut self, points: &[Vec<f64>], targets: &[f64]) {
        let n = points.len();
        if n == 0 {
            return;
        }
        let rows: Vec<(&[f64], f64)> = points.iter().map(|p| p.as_slice()).zip(targets.iter().copied()).collect();
        let n_samples_for_tree = ((self.config.samples_fraction_per_estimator * n as f64).min(n as f64)).ceil() as usize;
        let n_samples_for_tree = n_samples_for_tree.max(1).min(n);

        // Each tree's subsample draw is seeded from its own index, so the
        // per-tree fits are independent and safe to run across a rayon
        // thread pool rather than one at a time.
        let bootstrap = self.config.bootstrap;
        self.trees.par_iter_mut().enumerate().for_each(|(i, tree)| {
            tree.samples_since_fit = tree.samples_since_fit.saturating_add(1);
            if !tree.should_fit(n_samples_for_tree) {
                return;
            }
            let mut subsample_rng = StdRng::seed_from_u64(i as u64 ^ n as u64);
            let mut idx: Vec<usize> = (0..n).collect();
            idx.shuffle(&mut subsample_rng);
            idx.truncate(n_samples_for_tree);
            let selected: Vec<(&[f64], f64)> = if bootstrap && n_samples_for_tree < n {
                (0..n)
                    .map(|_| rows[idx[subsample_rng.gen_range(0..idx.len())]])
                    .collect()
            } else {
                idx.iter().map(|&j| rows[j]).collect()
            };
            tree.fit(&selected);
        });
    }

    /// Pools every tree's own `(mean, variance, sample_variance,
    /// sample_size)` via the law of total variance, with a `1e-7`
    /// numerical floor, into a single prediction.
    pub fn predict(&self, point: &[f64]) -> OptResult<Prediction> {
        let predictions: Vec<TreePrediction> = self.trees.iter().filter_map(|t| t.predict(point)).collect();
        if predictions.is_empty() {
            return Err(OptimizerError::UnableToProduceGuidedSuggestion(
                "no tree in the forest has been fit yet".to_string(),
            ));
        }
        let k = predictions.len() as f64;
        let mean = predictions.iter().map(|p| p.predicted_value).sum::<f64>() / k;
        let mean_sq = predictions.iter().map(|p| p.predicted_value.powi(2)).sum::<f64>() / k;
        let mean_variance = predictions.iter().map(|p| p.variance).sum::<f64>() / k;
        let mean_sample_variance = predictions.iter().map(|p| p.sample_variance).sum::<f64>() / k;
        let law_of_total_variance = mean_sq - mean * mean;
        let variance = mean_variance + law_of_total_variance + 1e-7;
        let sample_variance = mean_sample_variance + law_of_total_variance + 1e-7;
        let sample_size = predictions.len();
        let dof = predictions.iter().map(|p| p.sample_size as i64).sum::<i64>() - sample_size as i64;

        Ok(Prediction {
            mean,
            variance,
            sample_variance,
            sample_size,
            dof,
        })
    }

    /// A small additive noise term, used by callers when the design
    /// matrix conditioning exceeds a threshold (spec §4.4 item 2).
    pub fn jitter(&mut self, scale: f64) -> f64 {
        self.rng.gen_range(-scale..scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forest_predicts_near_a_linear_function() {
        let mut forest = HomogeneousRandomForest::new(ForestConfig::default(), 1, 42);
        let points: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 40.0]).collect();
        let targets: Vec<f64> = points.iter().map(|p| 2.0 * p[0]).collect();
        forest.fit(&points, &targets);
        let prediction = forest.predict(&[0.5]).unwrap();
        assert!((prediction.mean - 1.0).abs() < 0.5);
        assert!(prediction.variance >= 0.0);
        assert!(prediction.sample_size > 0);
    }

    #[test]
    fn unfitted_forest_cannot_predict() {
        let forest = HomogeneousRandomForest::new(ForestConfig::default(), 3, 1);
        assert!(forest.predict(&[0.1, 0.2, 0.3]).is_err());
    }

    #[test]
    fn refit_only_after_enough_new_samples() {
        let mut config = ForestConfig::default();
        config.n_estimators = 1;
        config.n_new_samples_before_refit = 1000;
        let mut forest = HomogeneousRandomForest::new(config, 1, 5);
        let points: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 / 20.0]).collect();
        let targets: Vec<f64> = points.iter().map(|p| p[0]).collect();
        forest.fit(&points, &targets);
        assert!(forest.trees[0].fitted);
        let first_fit_size = match &forest.trees[0].root {
            Some(_) => true,
            None => false,
        };
        assert!(first_fit_size);
        // a second fit call with only a handful more rows should not re-fit
        // (samples_since_fit stays far below n_new_samples_before_refit).
        forest.fit(&points, &targets);
        assert_eq!(forest.trees[0].samples_since_fit, 1);
    }
}
