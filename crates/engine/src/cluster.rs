//! Archetype clustering — 5D embeddings → behavioral archetypes
//!
//! Partitions the embedded bot population into clusters via a
//! [`ClusterStrategy`] selected at construction: a density strategy that
//! may label outliers as noise (id −1), or a k-means sweep that scores
//! k = 3..=7 by silhouette and keeps the best partition. Each archetype is
//! annotated with its centroid and up to 3 dominant traits drawn from the
//! members' original 20D feature space.

use crate::features::TRAIT_NAMES;
use crate::reduce::EmbeddingSet;
use crate::stats::{median, round_to};
use crate::types::{Archetype, Assignment};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

/// Cluster label reserved for outlier bots
pub const NOISE_LABEL: i32 = -1;

/// Default minimum archetype membership
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 3;

/// Output of a clustering pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOutcome {
    pub archetypes: Vec<Archetype>,
    pub assignments: BTreeMap<String, Assignment>,
    pub noise: Vec<String>,
    pub silhouette_score: f64,
    pub cluster_count: usize,
}

impl ClusterOutcome {
    fn empty() -> Self {
        Self {
            archetypes: Vec::new(),
            assignments: BTreeMap::new(),
            noise: Vec::new(),
            silhouette_score: 0.0,
            cluster_count: 0,
        }
    }
}

/// A partitioning method selected at construction time.
///
/// Returns one label per row: 0..m for cluster members, −1 for noise.
pub trait ClusterStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn assign(&self, points: &Array2<f64>, min_cluster_size: usize) -> Vec<i32>;
}

// ============================================================================
// Density strategy
// ============================================================================

/// Density clustering with a data-derived neighborhood radius.
///
/// The radius is the median distance to each point's min_pts-th nearest
/// neighbor, so dense populations get tight clusters and sparse ones
/// degrade to noise instead of forced membership.
pub struct DensityStrategy;

impl ClusterStrategy for DensityStrategy {
    fn name(&self) -> &'static str {
        "density"
    }

    fn assign(&self, points: &Array2<f64>, min_cluster_size: usize) -> Vec<i32> {
        let n = points.nrows();
        if n == 0 {
            return Vec::new();
        }
        let min_pts = min_cluster_size.max(2);

        let dist = pairwise_distances(points);

        // Adaptive radius: median k-th nearest-neighbor distance
        let kth = min_pts.min(n - 1);
        let kth_dists: Vec<f64> = (0..n)
            .map(|i| {
                let mut row = dist[i].clone();
                row.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                row[kth]
            })
            .collect();
        let eps = median(&kth_dists);

        let neighbors = |i: usize| -> Vec<usize> {
            (0..n).filter(|&j| dist[i][j] <= eps).collect()
        };

        // Standard density expansion; -2 marks unvisited
        let mut labels = vec![-2i32; n];
        let mut cluster_id = 0i32;

        for i in 0..n {
            if labels[i] != -2 {
                continue;
            }
            let seed_neighbors = neighbors(i);
            if seed_neighbors.len() < min_pts {
                labels[i] = NOISE_LABEL;
                continue;
            }

            labels[i] = cluster_id;
            let mut queue: VecDeque<usize> = seed_neighbors.into();
            while let Some(j) = queue.pop_front() {
                if labels[j] == NOISE_LABEL {
                    // Border point adopted by the cluster
                    labels[j] = cluster_id;
                }
                if labels[j] != -2 {
                    continue;
                }
                labels[j] = cluster_id;
                let j_neighbors = neighbors(j);
                if j_neighbors.len() >= min_pts {
                    queue.extend(j_neighbors);
                }
            }
            cluster_id += 1;
        }

        labels
    }
}

// ============================================================================
// K-means sweep strategy
// ============================================================================

/// Partitional fallback: k-means over k = 3..=7, best silhouette wins,
/// ties broken by the lowest k
pub struct KMeansSweep;

impl ClusterStrategy for KMeansSweep {
    fn name(&self) -> &'static str {
        "kmeans_sweep"
    }

    fn assign(&self, points: &Array2<f64>, min_cluster_size: usize) -> Vec<i32> {
        let n = points.nrows();
        let mut best_labels = vec![0i32; n];
        let mut best_score = -1.0f64;

        let max_k = 7.min(n / min_cluster_size.max(1));
        for k in 3..=max_k {
            let labels = kmeans(points, k, 10);
            let distinct = distinct_labels(&labels);
            if distinct.len() > 1 {
                let score = silhouette(points, &labels);
                if score > best_score {
                    best_score = score;
                    best_labels = labels;
                }
            }
        }

        best_labels
    }
}

/// Lloyd's algorithm with k-means++ seeding, best of `n_init` restarts
fn kmeans(points: &Array2<f64>, k: usize, n_init: usize) -> Vec<i32> {
    let mut best_labels = vec![0i32; points.nrows()];
    let mut best_inertia = f64::INFINITY;

    for restart in 0..n_init {
        let seed = 42 + k as u64 * 101 + restart as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        let (labels, inertia) = lloyd(points, k, &mut rng);
        if inertia < best_inertia {
            best_inertia = inertia;
            best_labels = labels;
        }
    }

    best_labels
}

fn lloyd(points: &Array2<f64>, k: usize, rng: &mut StdRng) -> (Vec<i32>, f64) {
    let n = points.nrows();
    let d = points.ncols();
    let mut centroids = kmeans_plus_plus(points, k, rng);
    let mut labels = vec![0usize; n];

    for _ in 0..100 {
        // Assignment step
        for i in 0..n {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = euclidean(points.row(i), centroid.view());
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            labels[i] = best;
        }

        // Update step; empty clusters keep their previous centroid
        let mut shift = 0.0f64;
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|&i| labels[i] == c).collect();
            if members.is_empty() {
                continue;
            }
            let mut updated = Array1::zeros(d);
            for &i in &members {
                updated = updated + points.row(i);
            }
            updated /= members.len() as f64;
            shift = shift.max(euclidean(centroid.view(), updated.view()));
            *centroid = updated;
        }

        if shift < 1e-9 {
            break;
        }
    }

    let inertia: f64 = (0..n)
        .map(|i| {
            let dist = euclidean(points.row(i), centroids[labels[i]].view());
            dist * dist
        })
        .sum();

    (labels.into_iter().map(|l| l as i32).collect(), inertia)
}

fn kmeans_plus_plus(points: &Array2<f64>, k: usize, rng: &mut StdRng) -> Vec<Array1<f64>> {
    let n = points.nrows();
    let mut centroids: Vec<Array1<f64>> = Vec::with_capacity(k);
    centroids.push(points.row(rng.gen_range(0..n)).to_owned());

    while centroids.len() < k {
        let d2: Vec<f64> = (0..n)
            .map(|i| {
                centroids
                    .iter()
                    .map(|c| {
                        let dist = euclidean(points.row(i), c.view());
                        dist * dist
                    })
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = d2.iter().sum();
        if total <= 0.0 {
            // All remaining points coincide with a centroid
            centroids.push(points.row(rng.gen_range(0..n)).to_owned());
            continue;
        }
        let mut target = rng.gen::<f64>() * total;
        let mut chosen = n - 1;
        for (i, weight) in d2.iter().enumerate() {
            target -= weight;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(points.row(chosen).to_owned());
    }

    centroids
}

// ============================================================================
// Clusterer
// ============================================================================

/// Groups embedded bots into annotated archetypes
pub struct ArchetypeClusterer {
    strategy: Box<dyn ClusterStrategy>,
}

impl ArchetypeClusterer {
    pub fn new() -> Self {
        Self::with_strategy(Box::new(DensityStrategy))
    }

    pub fn with_strategy(strategy: Box<dyn ClusterStrategy>) -> Self {
        Self { strategy }
    }

    /// Cluster the embedding set into archetypes.
    ///
    /// `features` is the original 20D corpus; dominant traits are computed
    /// from it, not from the embedding coordinates. Populations smaller
    /// than `2 × min_cluster_size` collapse into a single archetype.
    pub fn cluster(
        &self,
        embeddings: &EmbeddingSet,
        features: &BTreeMap<String, Vec<f64>>,
        min_cluster_size: usize,
    ) -> ClusterOutcome {
        let bot_ids = &embeddings.bot_ids;
        if bot_ids.is_empty() {
            return ClusterOutcome::empty();
        }

        let n = bot_ids.len();
        let dims = embeddings.dimensions;
        let mut matrix = Array2::zeros((n, dims));
        for (i, bot_id) in bot_ids.iter().enumerate() {
            if let Some(coords) = embeddings.embeddings.get(bot_id) {
                for (j, value) in coords.iter().enumerate().take(dims) {
                    matrix[[i, j]] = *value;
                }
            }
        }

        let min_cluster_size = min_cluster_size.max(1);
        let labels = if n < min_cluster_size * 2 {
            debug!(bots = n, min_cluster_size, "Population too small, single archetype");
            vec![0i32; n]
        } else {
            let labels = self.strategy.assign(&matrix, min_cluster_size);
            if labels.iter().any(|l| *l >= 0) {
                labels
            } else {
                // Everything came back as noise; a partition is still owed
                warn!(
                    strategy = self.strategy.name(),
                    "No dense region found, re-running with the k-means sweep"
                );
                KMeansSweep.assign(&matrix, min_cluster_size)
            }
        };

        build_outcome(bot_ids, &matrix, &labels, features)
    }
}

impl Default for ArchetypeClusterer {
    fn default() -> Self {
        Self::new()
    }
}

fn build_outcome(
    bot_ids: &[String],
    matrix: &Array2<f64>,
    labels: &[i32],
    features: &BTreeMap<String, Vec<f64>>,
) -> ClusterOutcome {
    let mut archetypes = Vec::new();
    let mut assignments = BTreeMap::new();

    for label in distinct_labels(labels) {
        let member_indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == label)
            .map(|(i, _)| i)
            .collect();
        let members: Vec<String> = member_indices.iter().map(|&i| bot_ids[i].clone()).collect();

        let mut centroid = Array1::zeros(matrix.ncols());
        for &i in &member_indices {
            centroid = centroid + matrix.row(i);
        }
        centroid /= member_indices.len() as f64;

        for &i in &member_indices {
            assignments.insert(
                bot_ids[i].clone(),
                Assignment {
                    archetype_id: label,
                    distance: euclidean(matrix.row(i), centroid.view()),
                    coords_5d: matrix.row(i).to_vec(),
                },
            );
        }

        archetypes.push(Archetype {
            id: label,
            label: format!("Archetype-{label}"),
            member_bot_ids: members,
            centroid_5d: centroid.to_vec(),
            dominant_traits: dominant_traits(features, &member_indices, bot_ids),
            avg_performance: 0.0,
        });
    }

    let mut noise = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if *label != NOISE_LABEL {
            continue;
        }
        noise.push(bot_ids[i].clone());
        assignments.insert(
            bot_ids[i].clone(),
            Assignment {
                archetype_id: NOISE_LABEL,
                distance: 0.0,
                coords_5d: matrix.row(i).to_vec(),
            },
        );
    }

    // Global silhouette over non-noise points only
    let non_noise: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| **l != NOISE_LABEL)
        .map(|(i, _)| i)
        .collect();
    let non_noise_labels: Vec<i32> = non_noise.iter().map(|&i| labels[i]).collect();
    let silhouette_score = if distinct_labels(&non_noise_labels).len() > 1 && non_noise.len() > 2 {
        let mut sub = Array2::zeros((non_noise.len(), matrix.ncols()));
        for (r, &i) in non_noise.iter().enumerate() {
            sub.row_mut(r).assign(&matrix.row(i));
        }
        round_to(silhouette(&sub, &non_noise_labels), 4)
    } else {
        0.0
    };

    let cluster_count = archetypes.len();
    ClusterOutcome {
        archetypes,
        assignments,
        noise,
        silhouette_score,
        cluster_count,
    }
}

/// Up to 3 trait names for the feature dimensions with the largest
/// absolute mean over the cluster's members
fn dominant_traits(
    features: &BTreeMap<String, Vec<f64>>,
    member_indices: &[usize],
    bot_ids: &[String],
) -> Vec<String> {
    let vectors: Vec<&Vec<f64>> = member_indices
        .iter()
        .filter_map(|&i| features.get(&bot_ids[i]))
        .collect();
    if vectors.is_empty() {
        return Vec::new();
    }

    let dims = vectors.iter().map(|v| v.len()).min().unwrap_or(0).min(TRAIT_NAMES.len());
    let mut means: Vec<(usize, f64)> = (0..dims)
        .map(|j| {
            let sum: f64 = vectors.iter().map(|v| v[j]).sum();
            (j, (sum / vectors.len() as f64).abs())
        })
        .collect();
    means.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    means
        .into_iter()
        .take(3)
        .map(|(j, _)| TRAIT_NAMES[j].to_string())
        .collect()
}

// ============================================================================
// Geometry helpers
// ============================================================================

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn pairwise_distances(points: &Array2<f64>) -> Vec<Vec<f64>> {
    let n = points.nrows();
    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean(points.row(i), points.row(j));
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }
    dist
}

fn distinct_labels(labels: &[i32]) -> Vec<i32> {
    let mut distinct: Vec<i32> = labels.iter().copied().filter(|l| *l >= 0).collect();
    distinct.sort_unstable();
    distinct.dedup();
    distinct
}

/// Mean silhouette coefficient over all points
fn silhouette(points: &Array2<f64>, labels: &[i32]) -> f64 {
    let n = points.nrows();
    let clusters = distinct_labels(labels);
    if clusters.len() < 2 || n < 3 {
        return 0.0;
    }

    let dist = pairwise_distances(points);
    let mut total = 0.0;

    for i in 0..n {
        let own: Vec<usize> = (0..n).filter(|&j| labels[j] == labels[i] && j != i).collect();
        if own.is_empty() {
            // Singleton clusters contribute 0
            continue;
        }
        let a = own.iter().map(|&j| dist[i][j]).sum::<f64>() / own.len() as f64;

        let mut b = f64::INFINITY;
        for &other in &clusters {
            if other == labels[i] {
                continue;
            }
            let foreign: Vec<usize> = (0..n).filter(|&j| labels[j] == other).collect();
            if foreign.is_empty() {
                continue;
            }
            let mean_dist = foreign.iter().map(|&j| dist[i][j]).sum::<f64>() / foreign.len() as f64;
            b = b.min(mean_dist);
        }

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::EMBEDDING_DIMENSIONS;

    /// Three tight groups of `per_group` bots in 5D, plus features
    fn grouped_corpus(per_group: usize) -> (EmbeddingSet, BTreeMap<String, Vec<f64>>) {
        let centers = [
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [10.0, 10.0, 0.0, 0.0, 0.0],
            [0.0, 10.0, 10.0, 0.0, 0.0],
        ];
        let mut embeddings = BTreeMap::new();
        let mut features = BTreeMap::new();
        for (g, center) in centers.iter().enumerate() {
            for i in 0..per_group {
                let id = format!("bot-{g}-{i}");
                let jitter = i as f64 * 0.05;
                let coords: Vec<f64> = center.iter().map(|c| c + jitter).collect();
                embeddings.insert(id.clone(), coords);
                let mut vec = vec![0.0; 20];
                vec[g] = 5.0 + jitter;
                features.insert(id, vec);
            }
        }
        let bot_ids: Vec<String> = embeddings.keys().cloned().collect();
        (
            EmbeddingSet {
                embeddings,
                bot_ids,
                dimensions: EMBEDDING_DIMENSIONS,
                method: "pca".into(),
            },
            features,
        )
    }

    #[test]
    fn test_empty_input() {
        let set = EmbeddingSet {
            embeddings: BTreeMap::new(),
            bot_ids: Vec::new(),
            dimensions: EMBEDDING_DIMENSIONS,
            method: "pca".into(),
        };
        let outcome = ArchetypeClusterer::new().cluster(&set, &BTreeMap::new(), 3);
        assert!(outcome.archetypes.is_empty());
        assert_eq!(outcome.cluster_count, 0);
        assert_eq!(outcome.silhouette_score, 0.0);
    }

    #[test]
    fn test_small_population_single_archetype() {
        let (set, features) = grouped_corpus(1); // 3 bots < 2 × 3
        let outcome = ArchetypeClusterer::new().cluster(&set, &features, 3);
        assert_eq!(outcome.cluster_count, 1);
        assert_eq!(outcome.archetypes[0].member_bot_ids.len(), 3);
        assert!(outcome.noise.is_empty());
        assert_eq!(outcome.silhouette_score, 0.0);
    }

    #[test]
    fn test_density_finds_separated_groups() {
        let (set, features) = grouped_corpus(5); // 15 bots, 3 groups
        let outcome = ArchetypeClusterer::new().cluster(&set, &features, 3);
        assert_eq!(outcome.cluster_count, 3);
        assert!(outcome.silhouette_score > 0.5);
    }

    #[test]
    fn test_assignments_partition_all_bots() {
        let (set, features) = grouped_corpus(7);
        let outcome = ArchetypeClusterer::new().cluster(&set, &features, 3);

        // Every embedded bot gets exactly one assignment
        assert_eq!(outcome.assignments.len(), set.bot_ids.len());

        // Archetype memberships are disjoint and exclude noise bots
        let mut seen = std::collections::HashSet::new();
        for arch in &outcome.archetypes {
            assert!(!arch.member_bot_ids.is_empty());
            for bot in &arch.member_bot_ids {
                assert!(seen.insert(bot.clone()), "bot {bot} in two archetypes");
                assert!(!outcome.noise.contains(bot));
            }
        }
        for bot in &outcome.noise {
            assert_eq!(outcome.assignments[bot].archetype_id, NOISE_LABEL);
        }
    }

    #[test]
    fn test_kmeans_sweep_bounds() {
        let (set, features) = grouped_corpus(7); // 21 bots
        let clusterer = ArchetypeClusterer::with_strategy(Box::new(KMeansSweep));
        let outcome = clusterer.cluster(&set, &features, 3);
        assert!(outcome.cluster_count >= 3 && outcome.cluster_count <= 7);
        assert!(outcome.noise.is_empty());
    }

    #[test]
    fn test_dominant_traits_reflect_member_features() {
        let (set, features) = grouped_corpus(5);
        let outcome = ArchetypeClusterer::new().cluster(&set, &features, 3);
        for arch in &outcome.archetypes {
            assert!(!arch.dominant_traits.is_empty());
            assert!(arch.dominant_traits.len() <= 3);
            // The loud dimension for each group maps into the trait table
            for trait_name in &arch.dominant_traits {
                assert!(TRAIT_NAMES.contains(&trait_name.as_str()));
            }
        }
    }

    #[test]
    fn test_clustering_is_deterministic() {
        let (set, features) = grouped_corpus(6);
        let a = ArchetypeClusterer::new().cluster(&set, &features, 3);
        let b = ArchetypeClusterer::new().cluster(&set, &features, 3);
        assert_eq!(a.cluster_count, b.cluster_count);
        assert_eq!(a.silhouette_score, b.silhouette_score);
        for (arch_a, arch_b) in a.archetypes.iter().zip(b.archetypes.iter()) {
            assert_eq!(arch_a.member_bot_ids, arch_b.member_bot_ids);
        }
    }

    #[test]
    fn test_silhouette_well_separated() {
        let mut points = Array2::zeros((6, 2));
        for i in 0..3 {
            points[[i, 0]] = i as f64 * 0.01;
        }
        for i in 3..6 {
            points[[i, 0]] = 100.0 + i as f64 * 0.01;
        }
        let labels = vec![0, 0, 0, 1, 1, 1];
        assert!(silhouette(&points, &labels) > 0.95);
    }
}
