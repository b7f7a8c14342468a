//! Dimensionality reduction — 20D behavioral vectors → 5D embeddings
//!
//! Columns are z-score standardized across the current bot set, then
//! projected through a [`ReductionStrategy`]. The shipped strategy is a
//! linear principal-components projection (power iteration with deflation,
//! seeded for reproducibility); short projections are zero-padded so every
//! embedding is exactly 5-dimensional. Neighborhood tunables are accepted
//! and clamped for nonlinear strategies, which ignore nothing else about
//! the call shape.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Fixed dimensionality of every embedding
pub const EMBEDDING_DIMENSIONS: usize = 5;

/// Per-request reduction tunables
#[derive(Debug, Clone, Copy)]
pub struct ReducerConfig {
    /// Neighborhood size (meaningful only to nonlinear strategies)
    pub n_neighbors: usize,
    /// Minimum embedded distance (meaningful only to nonlinear strategies)
    pub min_dist: f64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            min_dist: 0.1,
        }
    }
}

/// Output of a reduction pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSet {
    pub embeddings: BTreeMap<String, Vec<f64>>,
    pub bot_ids: Vec<String>,
    pub dimensions: usize,
    pub method: String,
}

impl EmbeddingSet {
    fn empty(method: &str) -> Self {
        Self {
            embeddings: BTreeMap::new(),
            bot_ids: Vec::new(),
            dimensions: EMBEDDING_DIMENSIONS,
            method: method.to_string(),
        }
    }
}

/// A projection method selected at construction time
pub trait ReductionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Project the standardized matrix down to at most `target_dim`
    /// columns. Fewer columns are allowed; the caller zero-pads.
    fn project(&self, matrix: &Array2<f64>, target_dim: usize, config: &ReducerConfig)
        -> Array2<f64>;
}

/// Linear principal-components projection
pub struct PrincipalComponents;

impl ReductionStrategy for PrincipalComponents {
    fn name(&self) -> &'static str {
        "pca"
    }

    fn project(
        &self,
        matrix: &Array2<f64>,
        target_dim: usize,
        _config: &ReducerConfig,
    ) -> Array2<f64> {
        let n = matrix.nrows();
        let d = matrix.ncols();
        let k = target_dim.min(n).min(d);
        if n == 0 || k == 0 {
            return Array2::zeros((n, 0));
        }

        // Columns are already centered by standardization
        let mut cov = matrix.t().dot(matrix) / n as f64;
        let mut components = Array2::zeros((d, k));
        let mut rng = StdRng::seed_from_u64(42);

        for c in 0..k {
            let v = dominant_eigenvector(&cov, &mut rng);
            let eigval = v.dot(&cov.dot(&v));

            // Deflate before extracting the next component
            let outer = v
                .clone()
                .insert_axis(Axis(1))
                .dot(&v.clone().insert_axis(Axis(0)));
            cov = &cov - &(outer * eigval);

            components.column_mut(c).assign(&v);
        }

        matrix.dot(&components)
    }
}

/// Power iteration for the leading eigenvector of a symmetric PSD matrix
fn dominant_eigenvector(cov: &Array2<f64>, rng: &mut StdRng) -> Array1<f64> {
    let d = cov.nrows();
    let mut v: Array1<f64> = Array1::from_iter((0..d).map(|_| rng.gen::<f64>() - 0.5));
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        v /= norm;
    } else {
        v[0] = 1.0;
    }

    for _ in 0..200 {
        let w = cov.dot(&v);
        let norm = w.dot(&w).sqrt();
        if norm < 1e-12 {
            // No variance left in this direction
            break;
        }
        let w = w / norm;
        let delta = (&w - &v).mapv(f64::abs).sum();
        v = w;
        if delta < 1e-10 {
            break;
        }
    }
    v
}

/// Projects the feature corpus into the fixed 5D embedding space
pub struct Reducer {
    strategy: Box<dyn ReductionStrategy>,
}

impl Reducer {
    pub fn new() -> Self {
        Self::with_strategy(Box::new(PrincipalComponents))
    }

    pub fn with_strategy(strategy: Box<dyn ReductionStrategy>) -> Self {
        Self { strategy }
    }

    /// Reduce the per-bot feature vectors to 5D embeddings.
    ///
    /// Cross-bot dependency: standardization and projection are computed
    /// over the whole corpus, so embeddings cannot be derived per bot in
    /// isolation.
    pub fn reduce(
        &self,
        features: &BTreeMap<String, Vec<f64>>,
        config: &ReducerConfig,
    ) -> EmbeddingSet {
        if features.is_empty() {
            return EmbeddingSet::empty(self.strategy.name());
        }

        let bot_ids: Vec<String> = features.keys().cloned().collect();
        let n = bot_ids.len();
        let d = features.values().next().map(|v| v.len()).unwrap_or(0);

        let mut matrix = Array2::zeros((n, d));
        for (i, bot_id) in bot_ids.iter().enumerate() {
            for (j, value) in features[bot_id].iter().enumerate().take(d) {
                matrix[[i, j]] = *value;
            }
        }
        standardize(&mut matrix);

        // Very small populations make neighborhoods degenerate
        let effective_neighbors = config.n_neighbors.min(n.saturating_sub(1)).max(1);
        let effective = ReducerConfig {
            n_neighbors: effective_neighbors,
            min_dist: config.min_dist,
        };
        debug!(
            method = self.strategy.name(),
            bots = n,
            n_neighbors = effective.n_neighbors,
            "Reducing feature corpus"
        );

        let projected = self.strategy.project(&matrix, EMBEDDING_DIMENSIONS, &effective);

        // Zero-pad so every embedding is exactly 5D
        let mut embeddings = BTreeMap::new();
        for (i, bot_id) in bot_ids.iter().enumerate() {
            let mut coords = vec![0.0; EMBEDDING_DIMENSIONS];
            for j in 0..projected.ncols().min(EMBEDDING_DIMENSIONS) {
                coords[j] = projected[[i, j]];
            }
            embeddings.insert(bot_id.clone(), coords);
        }

        EmbeddingSet {
            embeddings,
            bot_ids,
            dimensions: EMBEDDING_DIMENSIONS,
            method: self.strategy.name().to_string(),
        }
    }
}

impl Default for Reducer {
    fn default() -> Self {
        Self::new()
    }
}

/// Z-score each column in place, flooring zero stds to 1
fn standardize(matrix: &mut Array2<f64>) {
    let n = matrix.nrows();
    if n == 0 {
        return;
    }
    for mut col in matrix.columns_mut() {
        let m = col.sum() / n as f64;
        let var = col.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n as f64;
        let std = var.sqrt();
        let std = if std == 0.0 { 1.0 } else { std };
        col.mapv_inplace(|v| (v - m) / std);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(n: usize) -> BTreeMap<String, Vec<f64>> {
        let mut features = BTreeMap::new();
        for i in 0..n {
            // Two loose groups along the first dimensions
            let base = if i % 2 == 0 { 1.0 } else { 10.0 };
            let vec: Vec<f64> = (0..20)
                .map(|j| base + (i as f64) * 0.1 + (j as f64) * 0.01)
                .collect();
            features.insert(format!("bot-{i:02}"), vec);
        }
        features
    }

    #[test]
    fn test_empty_corpus() {
        let out = Reducer::new().reduce(&BTreeMap::new(), &ReducerConfig::default());
        assert!(out.embeddings.is_empty());
        assert!(out.bot_ids.is_empty());
        assert_eq!(out.dimensions, EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn test_every_embedding_is_5d() {
        for n in [1, 2, 3, 8, 21] {
            let out = Reducer::new().reduce(&corpus(n), &ReducerConfig::default());
            assert_eq!(out.bot_ids.len(), n);
            for coords in out.embeddings.values() {
                assert_eq!(coords.len(), EMBEDDING_DIMENSIONS);
                assert!(coords.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn test_bot_ids_sorted() {
        let out = Reducer::new().reduce(&corpus(12), &ReducerConfig::default());
        let mut sorted = out.bot_ids.clone();
        sorted.sort();
        assert_eq!(out.bot_ids, sorted);
    }

    #[test]
    fn test_reduction_is_deterministic() {
        let features = corpus(15);
        let a = Reducer::new().reduce(&features, &ReducerConfig::default());
        let b = Reducer::new().reduce(&features, &ReducerConfig::default());
        assert_eq!(a.embeddings, b.embeddings);
    }

    #[test]
    fn test_projection_separates_groups() {
        // The two bases differ by ~9 in every raw dimension; the first
        // principal axis must keep them apart.
        let out = Reducer::new().reduce(&corpus(10), &ReducerConfig::default());
        let low: Vec<f64> = (0..10)
            .step_by(2)
            .map(|i| out.embeddings[&format!("bot-{i:02}")][0])
            .collect();
        let high: Vec<f64> = (1..10)
            .step_by(2)
            .map(|i| out.embeddings[&format!("bot-{i:02}")][0])
            .collect();
        let low_mean = low.iter().sum::<f64>() / low.len() as f64;
        let high_mean = high.iter().sum::<f64>() / high.len() as f64;
        assert!((low_mean - high_mean).abs() > 1.0);
    }

    #[test]
    fn test_zero_variance_columns_survive() {
        let mut features = BTreeMap::new();
        for i in 0..5 {
            features.insert(format!("bot-{i}"), vec![7.0; 20]);
        }
        let out = Reducer::new().reduce(&features, &ReducerConfig::default());
        for coords in out.embeddings.values() {
            assert!(coords.iter().all(|v| v.is_finite()));
        }
    }
}
