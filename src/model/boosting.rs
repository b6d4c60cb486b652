//! Gradient boosted regression trees for binary log-loss.
//!
//! Each round fits a tree to the first and second derivatives of the loss
//! with respect to the current log-odds and uses Newton steps
//! `-sum(g) / (sum(h) + lambda)` as leaf values.

use super::{check_fit_input, check_predict_input, Classifier};
use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Probabilities are clamped away from 0 and 1 before taking log-odds
const PROBA_EPS: f64 = 1e-6;
/// Hessian sum below which a node is not split further
const MIN_HESSIAN: f64 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows sampled (without replacement) per round
    pub subsample: f64,
    /// L2 penalty on leaf values
    pub reg_lambda: f64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_leaf: 1,
            subsample: 1.0,
            reg_lambda: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    max_depth: usize,
    min_samples_leaf: usize,
    lambda: f64,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn leaf_value(&self, rows: &[usize]) -> f64 {
        let (g, h) = self.sums(rows);
        -g / (h + self.lambda)
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.lambda)
    }

    fn build(&self, rows: &[usize], depth: usize) -> Node {
        let (_, h) = self.sums(rows);
        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf || h < MIN_HESSIAN {
            return Node::Leaf(self.leaf_value(rows));
        }
        let Some(best) = self.best_split(rows) else {
            return Node::Leaf(self.leaf_value(rows));
        };
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[[i, best.feature]] <= best.threshold);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.build(&left, depth + 1)),
            right: Box::new(self.build(&right, depth + 1)),
        }
    }

    fn best_split(&self, rows: &[usize]) -> Option<BestSplit> {
        let (g_total, h_total) = self.sums(rows);
        let parent = self.score(g_total, h_total);
        let mut best: Option<BestSplit> = None;
        let mut sorted = rows.to_vec();

        for feature in 0..self.x.ncols() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let (mut g_left, mut h_left) = (0.0, 0.0);
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                g_left += self.grad[i];
                h_left += self.hess[i];

                let n_left = pos + 1;
                if n_left < self.min_samples_leaf || sorted.len() - n_left < self.min_samples_leaf {
                    continue;
                }
                let here = self.x[[i, feature]];
                let next = self.x[[sorted[pos + 1], feature]];
                if here == next {
                    continue;
                }
                let gain = self.score(g_left, h_left)
                    + self.score(g_total - g_left, h_total - h_left)
                    - parent;
                if gain > best.as_ref().map_or(1e-12, |b| b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (here + next) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradientBoosting {
    params: GradientBoostingParams,
    seed: u64,
    n_features: usize,
    /// Log-odds of the training base rate
    initial_score: f64,
    trees: Vec<Node>,
}

impl GradientBoosting {
    pub fn new(params: GradientBoostingParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            n_features: 0,
            initial_score: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn params(&self) -> &GradientBoostingParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| {
                self.initial_score
                    + self.params.learning_rate
                        * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let p = &self.params;
        if p.n_estimators == 0 {
            return Err(ChurnError::invalid("n_estimators", 0, "must be at least 1"));
        }
        if p.learning_rate <= 0.0 {
            return Err(ChurnError::invalid("learning_rate", p.learning_rate, "must be positive"));
        }
        if !(p.subsample > 0.0 && p.subsample <= 1.0) {
            return Err(ChurnError::invalid("subsample", p.subsample, "must be in (0, 1]"));
        }
        Ok(())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        check_fit_input(x, y)?;
        self.validate()?;
        let n = x.nrows();
        let y: Vec<f64> = y.iter().map(|&v| v as f64).collect();

        let base_rate = (y.iter().sum::<f64>() / n as f64).clamp(PROBA_EPS, 1.0 - PROBA_EPS);
        self.initial_score = (base_rate / (1.0 - base_rate)).ln();
        self.n_features = x.ncols();
        self.trees.clear();

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n_sample = ((n as f64 * self.params.subsample).ceil() as usize).clamp(1, n);
        let mut scores = vec![self.initial_score; n];
        let mut all_rows: Vec<usize> = (0..n).collect();

        for _ in 0..self.params.n_estimators {
            let mut grad = vec![0.0; n];
            let mut hess = vec![0.0; n];
            for i in 0..n {
                let p = sigmoid(scores[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(PROBA_EPS);
            }

            let rows = if n_sample < n {
                all_rows.shuffle(&mut rng);
                let mut rows = all_rows[..n_sample].to_vec();
                rows.sort_unstable();
                rows
            } else {
                all_rows.clone()
            };

            let builder = TreeBuilder {
                x,
                grad: &grad,
                hess: &hess,
                max_depth: self.params.max_depth,
                min_samples_leaf: self.params.min_samples_leaf.max(1),
                lambda: self.params.reg_lambda,
            };
            let tree = builder.build(&rows, 0);
            for (i, score) in scores.iter_mut().enumerate() {
                *score += self.params.learning_rate * tree.predict(x.row(i));
            }
            self.trees.push(tree);
        }
        debug!(rounds = self.trees.len(), "Fitted gradient boosting");
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted() {
            return Err(ChurnError::NotFitted("GradientBoosting"));
        }
        check_predict_input(x, self.n_features)?;
        Ok(self.raw_scores(x).mapv(sigmoid))
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}
