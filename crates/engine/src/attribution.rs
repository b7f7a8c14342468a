//! Return attribution — four-factor decomposition of each trade's return
//!
//! Every trade is compared against the other trades on its symbol via
//! Monte-Carlo permutation sampling, producing regime, timing, direction,
//! and sizing contributions. After normalization the residual is folded
//! into the timing factor so the four reported numbers always sum exactly
//! to the trade's realized percentage return.

use crate::stats::{mean, median, round_to};
use crate::types::TradeEvent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default Monte-Carlo permutation count
pub const DEFAULT_PERMUTATIONS: usize = 100;

/// Four-factor decomposition for a single trade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionRecord {
    pub trade_id: String,
    pub bot_id: String,
    pub total_return: f64,
    pub regime_contribution: f64,
    pub timing_contribution: f64,
    pub direction_contribution: f64,
    pub sizing_contribution: f64,
    pub return_if_random_entry: f64,
    pub return_if_median_size: f64,
    pub return_if_opposite_direction: f64,
    pub timestamp: i64,
}

/// Output of a batch attribution request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionReport {
    pub attributions: Vec<AttributionRecord>,
    pub trade_count: usize,
}

/// Decompose every trade in the batch
pub fn compute_batch(trades: &[TradeEvent], n_permutations: usize) -> AttributionReport {
    let attributions: Vec<AttributionRecord> = trades
        .iter()
        .map(|trade| attribute_single(trade, trades, n_permutations))
        .collect();

    let trade_count = attributions.len();
    AttributionReport {
        attributions,
        trade_count,
    }
}

fn attribute_single(trade: &TradeEvent, all_trades: &[TradeEvent], n_perms: usize) -> AttributionRecord {
    let pnl_pct = trade.pnl_percentage;

    // Comparison set: every other trade on the same symbol
    let comparables: Vec<&TradeEvent> = all_trades
        .iter()
        .filter(|t| t.symbol == trade.symbol && t.id != trade.id)
        .collect();

    if comparables.is_empty() {
        // No counterfactual context: split evenly across the four factors
        let quarter = pnl_pct / 4.0;
        return build_record(
            trade,
            quarter,
            quarter,
            quarter,
            quarter,
            pnl_pct * 0.5,
            pnl_pct * 0.8,
            -pnl_pct,
        );
    }

    let all_returns: Vec<f64> = comparables.iter().map(|t| t.pnl_percentage).collect();
    let same_regime: Vec<f64> = comparables
        .iter()
        .filter(|t| t.regime == trade.regime)
        .map(|t| t.pnl_percentage)
        .collect();
    let other_regime: Vec<f64> = comparables
        .iter()
        .filter(|t| t.regime != trade.regime)
        .map(|t| t.pnl_percentage)
        .collect();
    let opposite_direction: Vec<f64> = comparables
        .iter()
        .filter(|t| t.direction == trade.direction.opposite())
        .map(|t| t.pnl_percentage)
        .collect();
    let sizes: Vec<f64> = comparables.iter().map(|t| t.quantity).collect();
    let median_size = median(&sizes);

    let mut rng = trade_rng(&trade.id);
    let mut regime_contribs = Vec::with_capacity(n_perms);
    let mut timing_contribs = Vec::with_capacity(n_perms);
    let mut direction_contribs = Vec::with_capacity(n_perms);
    let mut sizing_contribs = Vec::with_capacity(n_perms);

    for _ in 0..n_perms {
        // Regime: same-regime average against the different-regime baseline
        regime_contribs.push(mean(&same_regime) - mean(&other_regime));

        // Timing: against one randomly sampled comparable entry
        let random_return = all_returns[rng.gen_range(0..all_returns.len())];
        timing_contribs.push(pnl_pct - random_return);

        // Direction: against the opposite-direction average
        direction_contribs.push(pnl_pct - mean(&opposite_direction));

        // Sizing: scaled by deviation from the median comparable size
        let contribution = if median_size > 0.0 && trade.quantity > 0.0 {
            let size_ratio = trade.quantity / median_size;
            if size_ratio != 1.0 {
                pnl_pct * (1.0 - 1.0 / size_ratio)
            } else {
                0.0
            }
        } else {
            0.0
        };
        sizing_contribs.push(contribution);
    }

    let raw_regime = mean(&regime_contribs);
    let raw_timing = mean(&timing_contribs);
    let raw_direction = mean(&direction_contribs);
    let raw_sizing = mean(&sizing_contribs);

    // Normalize magnitudes to the realized return, keeping signs, then
    // fold the residual into timing so the sum is exact
    let raw_total = raw_regime.abs() + raw_timing.abs() + raw_direction.abs() + raw_sizing.abs();
    let (regime_c, timing_c, direction_c, sizing_c) = if raw_total > 0.0 {
        let scale = (pnl_pct / raw_total).abs();
        let regime_c = raw_regime * scale;
        let mut timing_c = raw_timing * scale;
        let direction_c = raw_direction * scale;
        let sizing_c = raw_sizing * scale;
        let remainder = pnl_pct - (regime_c + timing_c + direction_c + sizing_c);
        timing_c += remainder;
        (regime_c, timing_c, direction_c, sizing_c)
    } else {
        let quarter = pnl_pct / 4.0;
        (quarter, quarter, quarter, quarter)
    };

    // Counterfactual returns
    let return_if_random = mean(&all_returns);
    let return_if_median = if trade.quantity > 0.0 {
        pnl_pct * (median_size / trade.quantity)
    } else {
        pnl_pct
    };
    let return_if_opposite = -pnl_pct;

    build_record(
        trade,
        regime_c,
        timing_c,
        direction_c,
        sizing_c,
        return_if_random,
        return_if_median,
        return_if_opposite,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    trade: &TradeEvent,
    regime_c: f64,
    timing_c: f64,
    direction_c: f64,
    sizing_c: f64,
    return_if_random: f64,
    return_if_median: f64,
    return_if_opposite: f64,
) -> AttributionRecord {
    AttributionRecord {
        trade_id: trade.id.clone(),
        bot_id: trade.bot_id.clone(),
        total_return: trade.pnl_percentage,
        regime_contribution: regime_c,
        timing_contribution: timing_c,
        direction_contribution: direction_c,
        sizing_contribution: sizing_c,
        return_if_random_entry: round_to(return_if_random, 6),
        return_if_median_size: round_to(return_if_median, 6),
        return_if_opposite_direction: round_to(return_if_opposite, 6),
        timestamp: trade.timestamp,
    }
}

/// Deterministic per-trade RNG seeded from the trade id
fn trade_rng(trade_id: &str) -> StdRng {
    let digest = Sha256::digest(trade_id.as_bytes());
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed_bytes))
}
