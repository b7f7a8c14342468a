//! Behavioral feature extraction — raw trade lists → fixed 20D vectors
//!
//! Each bot's chronological trade history is condensed into one vector of
//! trading-style statistics: frequency, holding-period shape, direction
//! bias, sizing, regime affinity, indicator entry levels, and performance.
//! Bots with fewer than 3 trades carry too little signal and are skipped.

use crate::stats::{mean, population_std, population_variance};
use crate::types::{Direction, Regime, TradeEvent, NEUTRAL_INDICATORS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Fixed dimensionality of every behavioral feature vector
pub const FEATURE_DIMENSIONS: usize = 20;

/// Minimum trades a bot needs before its vector is worth computing
pub const MIN_TRADES_PER_BOT: usize = 3;

/// Human-readable name for each of the 20 feature dimensions, in order.
/// Dominant-trait labeling indexes into this table.
pub const TRAIT_NAMES: [&str; FEATURE_DIMENSIONS] = [
    "high_frequency",
    "long_holding",
    "variable_holding",
    "buy_biased",
    "direction_flipper",
    "large_positions",
    "variable_sizing",
    "trend_up_affinity",
    "trend_down_affinity",
    "range_trader",
    "volatility_seeker",
    "rsi_contrarian",
    "bb_mean_reverter",
    "macd_follower",
    "trend_follower",
    "high_win_rate",
    "high_returns",
    "sharpe_optimizer",
    "low_drawdown",
    "high_confidence",
];

/// Output of a feature-extraction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureExtraction {
    pub features: BTreeMap<String, Vec<f64>>,
    pub bot_count: usize,
    pub dimensions: usize,
}

/// Extract one 20D vector per bot with at least [`MIN_TRADES_PER_BOT`] trades.
///
/// Pure function of its input: identical trade data yields bit-identical
/// vectors.
pub fn extract_features(bot_trades: &HashMap<String, Vec<TradeEvent>>) -> FeatureExtraction {
    let mut features = BTreeMap::new();

    for (bot_id, trades) in bot_trades {
        if trades.len() < MIN_TRADES_PER_BOT {
            debug!(bot_id = %bot_id, trades = trades.len(), "Skipping bot with insufficient trades");
            continue;
        }
        features.insert(bot_id.clone(), bot_vector(trades).to_vec());
    }

    let bot_count = features.len();
    FeatureExtraction {
        features,
        bot_count,
        dimensions: FEATURE_DIMENSIONS,
    }
}

/// Compute the 20 behavioral dimensions for one bot's trade list
fn bot_vector(trades: &[TradeEvent]) -> [f64; FEATURE_DIMENSIONS] {
    let n = trades.len();
    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
    let quantities: Vec<f64> = trades.iter().map(|t| t.quantity).collect();

    // 1. Trade frequency (trades per hour)
    let time_span_hours = if n > 1 {
        let min_ts = trades.iter().map(|t| t.timestamp).min().unwrap_or(0);
        let max_ts = trades.iter().map(|t| t.timestamp).max().unwrap_or(0);
        (max_ts - min_ts) as f64 / 3_600_000.0
    } else {
        1.0
    };
    let trade_freq = n as f64 / time_span_hours.max(0.001);

    // 2-3. Holding period stats (only positive periods carry information)
    let valid_hp: Vec<f64> = trades
        .iter()
        .map(|t| t.holding_period_minutes)
        .filter(|h| *h > 0.0)
        .collect();
    let avg_holding = mean(&valid_hp);
    let hp_std = population_std(&valid_hp);

    // 4. Direction bias (-1 all-sell .. +1 all-buy)
    let buy_count = trades.iter().filter(|t| t.direction == Direction::Buy).count();
    let direction_bias = (2.0 * buy_count as f64 / n as f64) - 1.0;

    // 5. Direction switch rate
    let switches = trades
        .windows(2)
        .filter(|w| w[0].direction != w[1].direction)
        .count();
    let switch_rate = switches as f64 / (n - 1).max(1) as f64;

    // 6-7. Position size stats
    let avg_size = mean(&quantities);
    let size_var = population_variance(&quantities);

    // 8-11. Regime affinities (fraction of trades in each major regime)
    let regime_fraction = |regime: Regime| {
        trades.iter().filter(|t| t.regime == regime).count() as f64 / n as f64
    };
    let trending_up = regime_fraction(Regime::TrendingUp);
    let trending_down = regime_fraction(Regime::TrendingDown);
    let ranging = regime_fraction(Regime::Ranging);
    let volatile = regime_fraction(Regime::Volatile);

    // 12-15. Indicator entry patterns, neutral-filled where absent
    let snapshots: Vec<_> = trades.iter().filter_map(|t| t.indicators.as_ref()).collect();
    let (avg_rsi, avg_bb, avg_macd, avg_trend) = if snapshots.is_empty() {
        (
            NEUTRAL_INDICATORS.rsi14,
            NEUTRAL_INDICATORS.bb_position,
            NEUTRAL_INDICATORS.macd_hist,
            NEUTRAL_INDICATORS.trend_strength,
        )
    } else {
        let avg_of = |f: fn(&crate::types::IndicatorSnapshot) -> f64| {
            let values: Vec<f64> = snapshots.iter().map(|&s| f(s)).collect();
            mean(&values)
        };
        (
            avg_of(|s| s.rsi14.unwrap_or(NEUTRAL_INDICATORS.rsi14)),
            avg_of(|s| s.bb_position.unwrap_or(NEUTRAL_INDICATORS.bb_position)),
            avg_of(|s| s.macd_hist.unwrap_or(NEUTRAL_INDICATORS.macd_hist)),
            avg_of(|s| s.trend_strength.unwrap_or(NEUTRAL_INDICATORS.trend_strength)),
        )
    };

    // 16. Win rate over trades that actually closed with pnl
    let closed: Vec<f64> = pnls.iter().copied().filter(|p| *p != 0.0).collect();
    let wins = closed.iter().filter(|p| **p > 0.0).count();
    let win_rate = wins as f64 / closed.len().max(1) as f64;

    // 17. Average return
    let avg_return = mean(&pnls);

    // 18. Sharpe proxy (mean/std of returns)
    let sharpe_proxy = if n > 1 {
        let std_return = population_std(&pnls);
        if std_return > 0.0 {
            avg_return / std_return
        } else {
            0.0
        }
    } else {
        0.0
    };

    // 19. Max drawdown of the cumulative pnl curve
    let mut cum = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0f64;
    for p in &pnls {
        cum += p;
        peak = peak.max(cum);
        max_dd = max_dd.max(peak - cum);
    }

    // 20. Average confidence (0.5 when never reported)
    let confidences: Vec<f64> = trades.iter().filter_map(|t| t.confidence).collect();
    let avg_conf = if confidences.is_empty() {
        0.5
    } else {
        mean(&confidences)
    };

    [
        trade_freq,
        avg_holding,
        hp_std,
        direction_bias,
        switch_rate,
        avg_size,
        size_var,
        trending_up,
        trending_down,
        ranging,
        volatile,
        avg_rsi,
        avg_bb,
        avg_macd,
        avg_trend,
        win_rate,
        avg_return,
        sharpe_proxy,
        max_dd,
        avg_conf,
    ]
}
