//! Bot-Intel Engine — competitive-intelligence analytics over bot trade histories
//!
//! Pure analytics core behind the NDJSON worker. Provides:
//! - 20D behavioral feature extraction per bot
//! - 5D embedding + archetype clustering with dominant-trait annotation
//! - Crowding detection with exact binomial significance testing
//! - Niche discovery across the (archetype × regime) grid
//! - Per-bot boosted-tree action predictors with recency weighting
//! - Monte-Carlo four-factor return attribution

pub mod attribution;
pub mod boost;
pub mod cluster;
pub mod crowding;
pub mod features;
pub mod fingerprint;
pub mod niche;
pub mod predictor;
pub mod reduce;
pub mod stats;
pub mod types;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Numeric failure: {0}")]
    Numeric(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

// Re-exports for convenience
pub use attribution::{compute_batch, AttributionRecord, AttributionReport, DEFAULT_PERMUTATIONS};
pub use cluster::{
    ArchetypeClusterer, ClusterOutcome, ClusterStrategy, DensityStrategy, KMeansSweep,
    DEFAULT_MIN_CLUSTER_SIZE, NOISE_LABEL,
};
pub use crowding::{detect_crowding, CrowdingParams, CrowdingReport};
pub use features::{
    extract_features, FeatureExtraction, FEATURE_DIMENSIONS, MIN_TRADES_PER_BOT, TRAIT_NAMES,
};
pub use fingerprint::{build_regime_matrix, RegimeCell, RegimeMatrixReport};
pub use niche::{analyze_niches, NicheReport};
pub use predictor::{
    predict, predict_all, train, InMemoryModelStore, ModelStore, PredictAllOutcome,
    PredictOutcome, TrainOutcome, MIN_TRAINING_SAMPLES,
};
pub use reduce::{
    EmbeddingSet, PrincipalComponents, Reducer, ReducerConfig, ReductionStrategy,
    EMBEDDING_DIMENSIONS,
};
pub use types::*;
