//! Niche discovery — exploitation analysis per (archetype, regime) cell
//!
//! Every archetype is crossed with the full 8-regime taxonomy, observed or
//! not. Each cell is classified by participation and returns, and scored
//! so a consumer can take the head of the list as "top opportunities".

use crate::stats::{mean, round_to};
use crate::types::{Archetype, NicheCell, NicheClass, PerformanceByBotRegime, Regime};
use serde::{Deserialize, Serialize};

/// Output of a niche analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicheReport {
    pub cells: Vec<NicheCell>,
    pub total_cells: usize,
    pub underexploited: usize,
    pub overcrowded: usize,
    pub unexplored: usize,
    pub balanced: usize,
    pub timestamp: i64,
}

/// Classify every (archetype, regime) cell.
///
/// Cells come back sorted descending by opportunity score; that ordering
/// is part of the contract.
pub fn analyze_niches(
    archetypes: &[Archetype],
    performance: &PerformanceByBotRegime,
) -> NicheReport {
    let mut cells = Vec::with_capacity(archetypes.len() * Regime::ALL.len());

    for archetype in archetypes {
        let members = &archetype.member_bot_ids;

        for regime in Regime::ALL {
            let mut returns = Vec::new();
            let mut total_trades = 0u64;
            for bot_id in members {
                let perf = performance
                    .get(bot_id)
                    .and_then(|by_regime| by_regime.get(&regime));
                if let Some(perf) = perf {
                    if perf.trade_count > 0 {
                        returns.push(perf.avg_return);
                        total_trades += perf.trade_count;
                    }
                }
            }

            let bot_count = returns.len();
            let avg_performance = mean(&returns);
            let (classification, opportunity_score) =
                classify(bot_count, total_trades, avg_performance, members.len());

            cells.push(NicheCell {
                archetype_id: archetype.id,
                regime,
                classification,
                bot_count,
                avg_performance: round_to(avg_performance, 6),
                total_trades,
                opportunity_score: round_to(opportunity_score, 4),
            });
        }
    }

    // Stable sort: ties keep archetype/regime order
    cells.sort_by(|a, b| {
        b.opportunity_score
            .partial_cmp(&a.opportunity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let count_of = |class: NicheClass| cells.iter().filter(|c| c.classification == class).count();
    NicheReport {
        total_cells: cells.len(),
        underexploited: count_of(NicheClass::Underexploited),
        overcrowded: count_of(NicheClass::Overcrowded),
        unexplored: count_of(NicheClass::Unexplored),
        balanced: count_of(NicheClass::Balanced),
        cells,
        timestamp: 0,
    }
}

/// Decision tree over participation and returns; the rule order matters,
/// first match wins
fn classify(
    bot_count: usize,
    total_trades: u64,
    avg_performance: f64,
    member_count: usize,
) -> (NicheClass, f64) {
    let crowded = bot_count as f64 >= member_count as f64 * 0.6;

    if bot_count == 0 && total_trades == 0 {
        (NicheClass::Unexplored, 0.8)
    } else if bot_count <= 1 && avg_performance > 0.0 {
        (NicheClass::Underexploited, 0.9)
    } else if crowded && avg_performance < 0.0 {
        (NicheClass::Overcrowded, 0.1)
    } else if crowded {
        (NicheClass::Overcrowded, 0.3)
    } else if avg_performance > 0.0 {
        (NicheClass::Underexploited, 0.7)
    } else {
        (NicheClass::Balanced, 0.5)
    }
}
