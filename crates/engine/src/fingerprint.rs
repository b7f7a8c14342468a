//! Regime × archetype performance matrix
//!
//! Aggregates per-bot regime performance up to the archetype level so a
//! caller can see how each behavioral group fares across market
//! conditions.

use crate::stats::{mean, round_to};
use crate::types::{Archetype, PerformanceByBotRegime, Regime};
use serde::{Deserialize, Serialize};

/// One (archetype, regime) performance cell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeCell {
    pub archetype_id: i32,
    pub regime: Regime,
    pub avg_return: f64,
    pub win_rate: f64,
    pub trade_count: u64,
    pub sharpe: f64,
}

/// Output of a regime-matrix build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeMatrixReport {
    pub cells: Vec<RegimeCell>,
    pub archetype_count: usize,
    pub regime_count: usize,
}

/// Build the full archetype × regime matrix; bots with zero trades in a
/// regime do not dilute that cell's averages.
pub fn build_regime_matrix(
    archetypes: &[Archetype],
    performance: &PerformanceByBotRegime,
) -> RegimeMatrixReport {
    let mut cells = Vec::with_capacity(archetypes.len() * Regime::ALL.len());

    for archetype in archetypes {
        for regime in Regime::ALL {
            let mut returns = Vec::new();
            let mut win_rates = Vec::new();
            let mut sharpes = Vec::new();
            let mut trade_count = 0u64;

            for bot_id in &archetype.member_bot_ids {
                let perf = performance
                    .get(bot_id)
                    .and_then(|by_regime| by_regime.get(&regime));
                if let Some(perf) = perf {
                    if perf.trade_count > 0 {
                        returns.push(perf.avg_return);
                        win_rates.push(perf.win_rate);
                        sharpes.push(perf.sharpe);
                        trade_count += perf.trade_count;
                    }
                }
            }

            cells.push(RegimeCell {
                archetype_id: archetype.id,
                regime,
                avg_return: round_to(mean(&returns), 6),
                win_rate: round_to(mean(&win_rates), 4),
                trade_count,
                sharpe: round_to(mean(&sharpes), 4),
            });
        }
    }

    RegimeMatrixReport {
        cells,
        archetype_count: archetypes.len(),
        regime_count: Regime::ALL.len(),
    }
}
