//! Gradient-boosted multi-class classifier
//!
//! Small deterministic boosted-tree model used by the per-bot predictor:
//! depth-limited weighted least-squares regression trees fit to softmax
//! pseudo-residuals, one tree per class per round. Exact greedy splits
//! make training fully reproducible without an explicit seed.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of action classes (buy = 0, sell = 1, hold = 2)
pub const N_CLASSES: usize = 3;

/// Training hyperparameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoostConfig {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 4,
        }
    }
}

#[derive(Debug, Clone)]
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

/// A single regression tree over pseudo-residuals
#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn fit(
        x: &Array2<f64>,
        residuals: &[f64],
        weights: &[f64],
        indices: &[usize],
        max_depth: usize,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, residuals, weights, indices, max_depth);
        tree
    }

    fn build(
        &mut self,
        x: &Array2<f64>,
        residuals: &[f64],
        weights: &[f64],
        indices: &[usize],
        depth: usize,
    ) -> usize {
        let leaf_value = weighted_mean(residuals, weights, indices);

        if depth == 0 || indices.len() < 2 {
            return self.push(Node::Leaf { value: leaf_value });
        }

        let Some((feature, threshold)) = best_split(x, residuals, weights, indices) else {
            return self.push(Node::Leaf { value: leaf_value });
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| x[[i, feature]] <= threshold);
        if left_idx.is_empty() || right_idx.is_empty() {
            return self.push(Node::Leaf { value: leaf_value });
        }

        // Reserve the slot before recursing so child indices stay stable
        let slot = self.push(Node::Leaf { value: leaf_value });
        let left = self.build(x, residuals, weights, &left_idx, depth - 1);
        let right = self.build(x, residuals, weights, &right_idx, depth - 1);
        self.nodes[slot] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        slot
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut cursor = 0usize;
        loop {
            match &self.nodes[cursor] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    cursor = if row.get(*feature).copied().unwrap_or(0.0) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

fn weighted_mean(values: &[f64], weights: &[f64], indices: &[usize]) -> f64 {
    let mut sum = 0.0;
    let mut total = 0.0;
    for &i in indices {
        sum += weights[i] * values[i];
        total += weights[i];
    }
    if total > 0.0 {
        sum / total
    } else {
        0.0
    }
}

/// Exhaustive greedy split maximizing weighted variance reduction.
/// Ties resolve to the lowest feature index and threshold, keeping
/// training deterministic.
fn best_split(
    x: &Array2<f64>,
    residuals: &[f64],
    weights: &[f64],
    indices: &[usize],
) -> Option<(usize, f64)> {
    let n_features = x.ncols();
    let total_w: f64 = indices.iter().map(|&i| weights[i]).sum();
    let total_s: f64 = indices.iter().map(|&i| weights[i] * residuals[i]).sum();
    if total_w <= 0.0 {
        return None;
    }
    let base_score = total_s * total_s / total_w;

    let mut best: Option<(f64, usize, f64)> = None;

    for feature in 0..n_features {
        let mut ordered: Vec<usize> = indices.to_vec();
        ordered.sort_by(|&a, &b| {
            x[[a, feature]]
                .partial_cmp(&x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_w = 0.0;
        let mut left_s = 0.0;
        for pair in ordered.windows(2) {
            let (i, next) = (pair[0], pair[1]);
            left_w += weights[i];
            left_s += weights[i] * residuals[i];

            let (lo, hi) = (x[[i, feature]], x[[next, feature]]);
            if lo == hi {
                continue;
            }
            let right_w = total_w - left_w;
            if left_w <= 0.0 || right_w <= 0.0 {
                continue;
            }
            let right_s = total_s - left_s;
            let gain = left_s * left_s / left_w + right_s * right_s / right_w - base_score;

            let threshold = (lo + hi) / 2.0;
            let better = match best {
                None => gain > 1e-12,
                Some((best_gain, _, _)) => gain > best_gain + 1e-12,
            };
            if better {
                best = Some((gain, feature, threshold));
            }
        }
    }

    best.map(|(_, feature, threshold)| (feature, threshold))
}

/// Gradient-boosted softmax classifier over [`N_CLASSES`] classes
#[derive(Debug, Clone)]
pub struct GradientBoost {
    config: BoostConfig,
    base_scores: [f64; N_CLASSES],
    rounds: Vec<[RegressionTree; N_CLASSES]>,
}

impl GradientBoost {
    /// Fit on a sample matrix, integer labels in 0..3, and per-sample
    /// weights. Caller guarantees non-empty input with matching lengths.
    pub fn fit(x: &Array2<f64>, labels: &[usize], weights: &[f64], config: BoostConfig) -> Self {
        let n = x.nrows();
        let indices: Vec<usize> = (0..n).collect();

        // Log-prior base scores
        let total_w: f64 = weights.iter().sum();
        let mut base_scores = [0.0f64; N_CLASSES];
        for (class, score) in base_scores.iter_mut().enumerate() {
            let class_w: f64 = indices
                .iter()
                .filter(|&&i| labels[i] == class)
                .map(|&i| weights[i])
                .sum();
            let prior = (class_w / total_w).max(1e-6);
            *score = prior.ln();
        }

        let mut scores: Vec<[f64; N_CLASSES]> = vec![base_scores; n];
        let mut rounds = Vec::with_capacity(config.n_rounds);

        for _ in 0..config.n_rounds {
            let probs: Vec<[f64; N_CLASSES]> = scores.iter().map(|s| softmax(s)).collect();

            let round: [RegressionTree; N_CLASSES] = std::array::from_fn(|class| {
                let residuals: Vec<f64> = (0..n)
                    .map(|i| {
                        let target = if labels[i] == class { 1.0 } else { 0.0 };
                        target - probs[i][class]
                    })
                    .collect();
                RegressionTree::fit(x, &residuals, weights, &indices, config.max_depth)
            });

            for (i, score) in scores.iter_mut().enumerate() {
                let row: Vec<f64> = x.row(i).to_vec();
                for (class, tree) in round.iter().enumerate() {
                    score[class] += config.learning_rate * tree.predict(&row);
                }
            }
            rounds.push(round);
        }

        Self {
            config,
            base_scores,
            rounds,
        }
    }

    /// Class probabilities for one sample
    pub fn predict_proba(&self, row: &[f64]) -> [f64; N_CLASSES] {
        let mut scores = self.base_scores;
        for round in &self.rounds {
            for (class, tree) in round.iter().enumerate() {
                scores[class] += self.config.learning_rate * tree.predict(row);
            }
        }
        softmax(&scores)
    }

    /// Argmax class for one sample
    pub fn predict(&self, row: &[f64]) -> usize {
        let probs = self.predict_proba(row);
        probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

fn softmax(scores: &[f64; N_CLASSES]) -> [f64; N_CLASSES] {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut exp = [0.0f64; N_CLASSES];
    let mut total = 0.0;
    for (i, s) in scores.iter().enumerate() {
        exp[i] = (s - max).exp();
        total += exp[i];
    }
    for e in exp.iter_mut() {
        *e /= total;
    }
    exp
}
