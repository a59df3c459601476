use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_depth: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            seed: 42,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree stored as a node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    gain: f64,
}

/// Sum of squared errors around the mean, from running sums.
fn sse(sum: f64, sum_sq: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (sum_sq - sum * sum / n as f64).max(0.0)
}

struct TreeBuilder<'a, R> {
    x: &'a [R],
    y: &'a [f64],
    params: &'a ForestParams,
    nodes: Vec<Node>,
    /// Total squared-error decrease credited to each feature
    gains: Vec<f64>,
}

impl<'a, R: AsRef<[f64]>> TreeBuilder<'a, R> {
    fn new(x: &'a [R], y: &'a [f64], params: &'a ForestParams, n_features: usize) -> Self {
        Self {
            x,
            y,
            params,
            nodes: Vec::new(),
            gains: vec![0.0; n_features],
        }
    }

    fn value(&self, sample: usize, feature: usize) -> f64 {
        self.x[sample].as_ref()[feature]
    }

    fn best_split(&self, samples: &mut [usize]) -> Option<BestSplit> {
        let n = samples.len();
        let total_sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let parent = sse(total_sum, total_sq, n);
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut best: Option<BestSplit> = None;
        for feature in 0..self.gains.len() {
            samples.sort_by(|&a, &b| self.value(a, feature).total_cmp(&self.value(b, feature)));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..n {
                let moved = self.y[samples[k - 1]];
                left_sum += moved;
                left_sq += moved * moved;

                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let lo = self.value(samples[k - 1], feature);
                let hi = self.value(samples[k], feature);
                if lo >= hi {
                    continue;
                }

                let gain = parent
                    - sse(left_sum, left_sq, k)
                    - sse(total_sum - left_sum, total_sq - left_sq, n - k);
                if best.map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        position: k,
                        gain,
                    });
                }
            }
        }
        best
    }

    fn leaf(&mut self, samples: &[usize]) -> usize {
        let value = samples.iter().map(|&i| self.y[i]).sum::<f64>() / samples.len() as f64;
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn build(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let n = samples.len();
        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if n < self.params.min_samples_split.max(2) || depth_reached {
            return self.leaf(samples);
        }

        let sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let sum_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();
        if sse(sum, sum_sq, n) <= f64::EPSILON {
            return self.leaf(samples);
        }

        let Some(split) = self.best_split(samples) else {
            return self.leaf(samples);
        };

        // Re-sort on the winning feature so the split position is valid.
        samples.sort_by(|&a, &b| {
            self.value(a, split.feature)
                .total_cmp(&self.value(b, split.feature))
        });
        self.gains[split.feature] += split.gain.max(0.0);

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });
        let (left_samples, right_samples) = samples.split_at_mut(split.position);
        let left = self.build(left_samples, depth + 1);
        let right = self.build(right_samples, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }
}

/// Bagged ensemble of regression trees with impurity-based feature importances.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestRegressor {
    trees: Vec<Tree>,
    importances: Vec<f64>,
    n_features: usize,
}

impl RandomForestRegressor {
    /// Fit on `x` rows against targets `y`.
    ///
    /// Every tree sees a bootstrap sample drawn from a generator seeded with
    /// `params.seed`, so identical input yields an identical forest.
    pub fn fit<R: AsRef<[f64]>>(x: &[R], y: &[f64], params: &ForestParams) -> Result<Self, String> {
        if x.is_empty() {
            return Err("Cannot fit a forest on zero samples".to_string());
        }
        if x.len() != y.len() {
            return Err(format!(
                "Feature rows ({}) and targets ({}) differ in length",
                x.len(),
                y.len()
            ));
        }
        if params.n_trees == 0 {
            return Err("Forest needs at least one tree".to_string());
        }
        let n_features = x[0].as_ref().len();
        if x.iter().any(|row| row.as_ref().len() != n_features) {
            return Err("Feature rows have inconsistent widths".to_string());
        }
        if x.iter().flat_map(|row| row.as_ref()).any(|v| !v.is_finite())
            || y.iter().any(|v| !v.is_finite())
        {
            return Err("Forest input contains non-finite values".to_string());
        }

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let n = x.len();
        let mut trees = Vec::with_capacity(params.n_trees);
        let mut importances = vec![0.0; n_features];

        for _ in 0..params.n_trees {
            let mut samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder::new(x, y, params, n_features);
            builder.build(&mut samples, 0);

            let total: f64 = builder.gains.iter().sum();
            if total > 0.0 {
                for (acc, gain) in importances.iter_mut().zip(&builder.gains) {
                    *acc += gain / total;
                }
            }
            trees.push(Tree {
                nodes: builder.nodes,
            });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            trees,
            importances,
            n_features,
        })
    }

    pub fn predict_one(&self, x: &[f64]) -> f64 {
        if x.len() != self.n_features {
            return f64::NAN;
        }
        self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict<R: AsRef<[f64]>>(&self, x: &[R]) -> Vec<f64> {
        x.iter().map(|row| self.predict_one(row.as_ref())).collect()
    }

    /// Normalized importances; all zero when no tree could split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<[f64; 2]>, Vec<f64>) {
        // Target depends only on feature 0; feature 1 is noise-free filler.
        let x: Vec<[f64; 2]> = (0..40).map(|i| [i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_fit_learns_step_function() {
        let (x, y) = step_data();
        let forest = RandomForestRegressor::fit(&x, &y, &ForestParams::default()).unwrap();

        assert_eq!(forest.n_trees(), 100);
        assert!((forest.predict_one(&[2.0, 2.0]) - 1.0).abs() < 0.5);
        assert!((forest.predict_one(&[37.0, 1.0]) - 5.0).abs() < 0.5);
    }

    #[test]
    fn test_importances_favor_informative_feature() {
        let (x, y) = step_data();
        let forest = RandomForestRegressor::fit(&x, &y, &ForestParams::default()).unwrap();
        let importances = forest.feature_importances();

        assert!(importances.iter().all(|&v| v >= 0.0));
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = step_data();
        let a = RandomForestRegressor::fit(&x, &y, &ForestParams::default()).unwrap();
        let b = RandomForestRegressor::fit(&x, &y, &ForestParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_target_has_zero_importance() {
        let x: Vec<[f64; 1]> = (0..10).map(|i| [i as f64]).collect();
        let y = vec![3.0; 10];
        let forest = RandomForestRegressor::fit(&x, &y, &ForestParams::default()).unwrap();

        assert_eq!(forest.feature_importances(), &[0.0]);
        assert!((forest.predict_one(&[4.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_rejects_mismatched_lengths() {
        let x = vec![[1.0], [2.0]];
        assert!(RandomForestRegressor::fit(&x, &[1.0], &ForestParams::default()).is_err());
    }

    #[test]
    fn test_fit_rejects_non_finite() {
        let x = vec![[1.0], [f64::NAN]];
        assert!(RandomForestRegressor::fit(&x, &[1.0, 2.0], &ForestParams::default()).is_err());
    }

    #[test]
    fn test_max_depth_limits_tree() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_trees: 1,
            max_depth: Some(0),
            ..ForestParams::default()
        };
        let forest = RandomForestRegressor::fit(&x, &y, &params).unwrap();
        assert_eq!(forest.trees[0].nodes.len(), 1);
    }
}
