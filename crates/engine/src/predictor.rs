//! Per-bot action prediction — one boosted classifier per bot
//!
//! Models live in a [`ModelStore`] injected by the caller (the dispatcher
//! owns the process-lifetime instance), so tests get isolated stores and a
//! future concurrent dispatcher can serialize per-bot slots. Rejections
//! for thin or degenerate training data are structured results with a
//! machine-readable reason, never errors.

use crate::boost::{BoostConfig, GradientBoost, N_CLASSES};
use crate::stats::round_to;
use crate::{EngineError, EngineResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Minimum samples before a per-bot model is worth fitting
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Exponential recency decay: the i-th sample back from the newest
/// carries weight `0.99^i`
pub const RECENCY_DECAY: f64 = 0.99;

pub const REASON_INSUFFICIENT_DATA: &str = "insufficient_data";
pub const REASON_SINGLE_CLASS: &str = "single_class";
pub const REASON_NO_MODEL: &str = "no_model";

const ACTIONS: [&str; N_CLASSES] = ["buy", "sell", "hold"];

/// A fitted per-bot model plus its training metadata
pub struct TrainedModel {
    pub model: GradientBoost,
    pub sample_count: usize,
}

/// Keyed storage for trained models. The predictor only ever reads and
/// replaces whole entries; retraining overwrites in place.
pub trait ModelStore: Send + Sync {
    fn get(&self, bot_id: &str) -> Option<Arc<TrainedModel>>;
    fn put(&self, bot_id: &str, model: TrainedModel);
}

/// Process-lifetime in-memory store
#[derive(Default)]
pub struct InMemoryModelStore {
    models: RwLock<HashMap<String, Arc<TrainedModel>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for InMemoryModelStore {
    fn get(&self, bot_id: &str) -> Option<Arc<TrainedModel>> {
        self.models.read().unwrap().get(bot_id).cloned()
    }

    fn put(&self, bot_id: &str, model: TrainedModel) {
        self.models
            .write()
            .unwrap()
            .insert(bot_id.to_string(), Arc::new(model));
    }
}

/// Per-class sample counts in a training set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDistribution {
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
}

/// Outcome of a train request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOutcome {
    pub bot_id: String,
    pub trained: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub sample_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_distribution: Option<ClassDistribution>,
}

impl TrainOutcome {
    fn rejected(bot_id: &str, reason: &str, sample_count: usize) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            trained: false,
            reason: Some(reason.to_string()),
            sample_count,
            accuracy: None,
            class_distribution: None,
        }
    }
}

/// Outcome of a predict request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictOutcome {
    pub bot_id: String,
    pub predicted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_prob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_prob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_prob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_accuracy: Option<f64>,
}

/// Outcome of a batched predict request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictAllOutcome {
    pub predictions: BTreeMap<String, PredictOutcome>,
    pub bot_count: usize,
}

/// Synthesized exponential recency weights, newest sample last with
/// weight 1
pub fn recency_weights(n: usize) -> Vec<f64> {
    (0..n).map(|i| RECENCY_DECAY.powi((n - 1 - i) as i32)).collect()
}

/// Fit (or refit) the model for one bot and store it.
///
/// Thin data and single-class labels report `trained: false`; malformed
/// payloads (length mismatches, labels outside 0..=2) are hard errors.
pub fn train(
    store: &dyn ModelStore,
    bot_id: &str,
    features: &[Vec<f64>],
    labels: &[i64],
    sample_weights: Option<&[f64]>,
) -> EngineResult<TrainOutcome> {
    if features.len() < MIN_TRAINING_SAMPLES || labels.len() < MIN_TRAINING_SAMPLES {
        return Ok(TrainOutcome::rejected(
            bot_id,
            REASON_INSUFFICIENT_DATA,
            features.len(),
        ));
    }
    if features.len() != labels.len() {
        return Err(EngineError::InvalidPayload(format!(
            "{} feature rows but {} labels",
            features.len(),
            labels.len()
        )));
    }

    let n = features.len();
    let weights: Vec<f64> = match sample_weights {
        Some(w) => {
            if w.len() != n {
                return Err(EngineError::InvalidPayload(format!(
                    "{} sample weights for {} samples",
                    w.len(),
                    n
                )));
            }
            w.to_vec()
        }
        None => recency_weights(n),
    };

    let labels: Vec<usize> = labels
        .iter()
        .map(|&l| {
            usize::try_from(l)
                .ok()
                .filter(|&l| l < N_CLASSES)
                .ok_or_else(|| EngineError::InvalidPayload(format!("label {l} outside 0..=2")))
        })
        .collect::<EngineResult<_>>()?;

    let distinct: std::collections::HashSet<usize> = labels.iter().copied().collect();
    if distinct.len() < 2 {
        return Ok(TrainOutcome::rejected(bot_id, REASON_SINGLE_CLASS, n));
    }

    let dims = features[0].len();
    if features.iter().any(|row| row.len() != dims) {
        return Err(EngineError::InvalidPayload(
            "feature rows have inconsistent lengths".to_string(),
        ));
    }
    let mut x = Array2::zeros((n, dims));
    for (i, row) in features.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            x[[i, j]] = *value;
        }
    }

    let model = GradientBoost::fit(&x, &labels, &weights, BoostConfig::default());

    // Training-set accuracy
    let correct = (0..n)
        .filter(|&i| model.predict(&features[i]) == labels[i])
        .count();
    let accuracy = correct as f64 / n as f64;

    let count_of = |class: usize| labels.iter().filter(|&&l| l == class).count();
    let distribution = ClassDistribution {
        buy: count_of(0),
        sell: count_of(1),
        hold: count_of(2),
    };

    store.put(
        bot_id,
        TrainedModel {
            model,
            sample_count: n,
        },
    );
    info!(bot_id, samples = n, accuracy, "Trained per-bot model");

    Ok(TrainOutcome {
        bot_id: bot_id.to_string(),
        trained: true,
        reason: None,
        sample_count: n,
        accuracy: Some(round_to(accuracy, 4)),
        class_distribution: Some(distribution),
    })
}

/// Serve buy/sell/hold probabilities for one bot's current features
pub fn predict(store: &dyn ModelStore, bot_id: &str, features: &[f64]) -> PredictOutcome {
    let Some(trained) = store.get(bot_id) else {
        debug!(bot_id, "No trained model for bot");
        return PredictOutcome {
            bot_id: bot_id.to_string(),
            predicted: false,
            reason: Some(REASON_NO_MODEL.to_string()),
            buy_prob: None,
            sell_prob: None,
            hold_prob: None,
            predicted_action: None,
            confidence: None,
            model_accuracy: None,
        };
    };

    let probs = trained.model.predict_proba(features);
    let predicted_class = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);

    PredictOutcome {
        bot_id: bot_id.to_string(),
        predicted: true,
        reason: None,
        buy_prob: Some(round_to(probs[0], 4)),
        sell_prob: Some(round_to(probs[1], 4)),
        hold_prob: Some(round_to(probs[2], 4)),
        predicted_action: Some(ACTIONS[predicted_class].to_string()),
        confidence: Some(round_to(probs[predicted_class], 4)),
        model_accuracy: Some(round_to(trained.sample_count as f64 / 100.0, 2)),
    }
}

/// Batched predictions; bots without a model report `no_model` without
/// aborting the rest of the batch
pub fn predict_all(
    store: &dyn ModelStore,
    features_by_bot: &BTreeMap<String, Vec<f64>>,
) -> PredictAllOutcome {
    let predictions: BTreeMap<String, PredictOutcome> = features_by_bot
        .iter()
        .map(|(bot_id, features)| (bot_id.clone(), predict(store, bot_id, features)))
        .collect();

    let bot_count = predictions.len();
    PredictAllOutcome {
        predictions,
        bot_count,
    }
}
