//! Crowding detection — convergent direction-taking across the bot fleet
//!
//! Within a rolling window ending at the newest trade, each symbol's active
//! bots are reduced to their latest trade. A direction claimed by at least
//! `threshold_ratio` of those bots is tested against a fair-coin null with
//! a one-sided exact binomial test; only p < 0.05 survivors become alerts.

use crate::stats::round_to;
use crate::types::{CrowdingAlert, Direction, Severity, TradeEvent};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, DiscreteCDF};
use std::collections::BTreeMap;
use tracing::debug;

/// Minimum active bots on a symbol before convergence is measurable
pub const MIN_ACTIVE_BOTS: usize = 3;

/// Significance level for the binomial test
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Detector tunables, all overridable per request
#[derive(Debug, Clone, Copy)]
pub struct CrowdingParams {
    pub window_minutes: f64,
    pub threshold_ratio: f64,
    pub total_bots: usize,
}

impl Default for CrowdingParams {
    fn default() -> Self {
        Self {
            window_minutes: 5.0,
            threshold_ratio: 0.6,
            total_bots: 21,
        }
    }
}

/// Output of a crowding scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrowdingReport {
    pub alerts: Vec<CrowdingAlert>,
    pub alert_count: usize,
    pub timestamp: i64,
}

/// Scan recent trades for statistically significant direction convergence.
///
/// Alerts come back sorted by severity, critical first; each alert carries
/// the exact contributing bot ids for auditability.
pub fn detect_crowding(recent_trades: &[TradeEvent], params: &CrowdingParams) -> CrowdingReport {
    if recent_trades.is_empty() {
        return CrowdingReport {
            alerts: Vec::new(),
            alert_count: 0,
            timestamp: 0,
        };
    }

    let now = recent_trades.iter().map(|t| t.timestamp).max().unwrap_or(0);
    let window_start = now - (params.window_minutes * 60_000.0) as i64;

    // One trade per (symbol, bot), keeping the latest within the window
    let mut latest_per_symbol_bot: BTreeMap<&str, BTreeMap<&str, &TradeEvent>> = BTreeMap::new();
    let mut windowed: Vec<&TradeEvent> = recent_trades
        .iter()
        .filter(|t| t.timestamp >= window_start)
        .collect();
    windowed.sort_by_key(|t| t.timestamp);
    for trade in windowed {
        latest_per_symbol_bot
            .entry(trade.symbol.as_str())
            .or_default()
            .insert(trade.bot_id.as_str(), trade);
    }

    let mut alerts = Vec::new();
    for (symbol, by_bot) in &latest_per_symbol_bot {
        let active = by_bot.len();
        if active < MIN_ACTIVE_BOTS {
            continue;
        }

        for direction in [Direction::Buy, Direction::Sell] {
            let bot_ids: Vec<String> = by_bot
                .values()
                .filter(|t| t.direction == direction)
                .map(|t| t.bot_id.clone())
                .collect();
            let k = bot_ids.len();
            let ratio = k as f64 / active as f64;
            if ratio < params.threshold_ratio {
                continue;
            }

            // H0: direction choice is a fair coin flip
            let p_value = binomial_sf(k, active);
            if p_value >= SIGNIFICANCE_LEVEL {
                debug!(symbol = %symbol, direction = direction.label(), ratio, p_value, "Convergence not significant");
                continue;
            }

            alerts.push(CrowdingAlert {
                symbol: symbol.to_string(),
                direction,
                convergence_ratio: round_to(ratio, 4),
                bot_ids,
                p_value: round_to(p_value, 6),
                severity: Severity::from_ratio(ratio),
                window_minutes: params.window_minutes,
                active_bots: active,
                total_bots: params.total_bots,
                timestamp: now,
            });
        }
    }

    alerts.sort_by_key(|a| a.severity.rank());

    let alert_count = alerts.len();
    CrowdingReport {
        alerts,
        alert_count,
        timestamp: now,
    }
}

/// One-sided exact binomial tail: P(X ≥ k) with X ~ Binomial(n, 0.5)
fn binomial_sf(k: usize, n: usize) -> f64 {
    if k == 0 {
        return 1.0;
    }
    match Binomial::new(0.5, n as u64) {
        // sf(x) is P(X > x), so P(X ≥ k) = sf(k − 1)
        Ok(dist) => dist.sf(k as u64 - 1),
        Err(_) => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_trade(bot_id: &str, symbol: &str, direction: Direction, ts: i64) -> TradeEvent {
        TradeEvent {
            id: format!("t-{bot_id}-{ts}"),
            bot_id: bot_id.into(),
            symbol: symbol.into(),
            direction,
            quantity: 1.0,
            timestamp: ts,
            regime: Default::default(),
            pnl: 0.0,
            pnl_percentage: 0.0,
            holding_period_minutes: 0.0,
            confidence: None,
            indicators: None,
        }
    }

    #[test]
    fn test_empty_input() {
        let report = detect_crowding(&[], &CrowdingParams::default());
        assert!(report.alerts.is_empty());
        assert_eq!(report.timestamp, 0);
    }

    #[test]
    fn test_binomial_tail() {
        // P(X ≥ 15) for X ~ Binomial(21, 0.5) = 82160 / 2^21 ≈ 0.0392
        let p = binomial_sf(15, 21);
        assert!((p - 0.039177).abs() < 1e-5);
        assert_eq!(binomial_sf(0, 21), 1.0);
    }

    #[test]
    fn test_fifteen_of_twenty_one_buyers() {
        let now = 1_700_000_000_000i64;
        let mut trades = Vec::new();
        for i in 0..21 {
            let dir = if i < 15 { Direction::Buy } else { Direction::Sell };
            trades.push(make_trade(&format!("bot-{i:02}"), "BTCUSDT", dir, now - i));
        }

        let report = detect_crowding(&trades, &CrowdingParams::default());
        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        assert_eq!(alert.direction, Direction::Buy);
        assert_eq!(alert.severity, Severity::Medium);
        assert!((alert.convergence_ratio - 0.7143).abs() < 1e-9);
        assert!(alert.p_value < 0.05);
        assert_eq!(alert.active_bots, 21);
        assert_eq!(alert.bot_ids.len(), 15);
    }

    #[test]
    fn test_below_threshold_is_silent() {
        // 11 of 21 buying is a majority but under the 0.6 threshold
        let now = 1_700_000_000_000i64;
        let trades: Vec<TradeEvent> = (0..21)
            .map(|i| {
                let dir = if i < 11 { Direction::Buy } else { Direction::Sell };
                make_trade(&format!("bot-{i:02}"), "ETHUSDT", dir, now - i)
            })
            .collect();
        let report = detect_crowding(&trades, &CrowdingParams::default());
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_dedup_keeps_latest_trade_per_bot() {
        // The same bot flips from sell to buy; only the buy counts
        let now = 1_700_000_000_000i64;
        let mut trades = vec![
            make_trade("bot-0", "SOLUSDT", Direction::Sell, now - 60_000),
            make_trade("bot-0", "SOLUSDT", Direction::Buy, now),
        ];
        for i in 1..5 {
            trades.push(make_trade(&format!("bot-{i}"), "SOLUSDT", Direction::Buy, now - i));
        }

        let report = detect_crowding(&trades, &CrowdingParams::default());
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].active_bots, 5);
        assert_eq!(report.alerts[0].bot_ids.len(), 5);
        assert_eq!(report.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_old_trades_fall_outside_window() {
        let now = 1_700_000_000_000i64;
        let mut trades: Vec<TradeEvent> = (0..5)
            .map(|i| make_trade(&format!("bot-{i}"), "BTCUSDT", Direction::Buy, now))
            .collect();
        // 10 minutes stale, outside the 5 minute window
        for i in 5..20 {
            trades.push(make_trade(
                &format!("bot-{i}"),
                "BTCUSDT",
                Direction::Sell,
                now - 10 * 60_000,
            ));
        }

        let report = detect_crowding(&trades, &CrowdingParams::default());
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].direction, Direction::Buy);
        assert_eq!(report.alerts[0].active_bots, 5);
    }

    #[test]
    fn test_fewer_than_three_active_bots_skipped() {
        let now = 1_700_000_000_000i64;
        let trades = vec![
            make_trade("bot-0", "XRPUSDT", Direction::Buy, now),
            make_trade("bot-1", "XRPUSDT", Direction::Buy, now),
        ];
        let report = detect_crowding(&trades, &CrowdingParams::default());
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_alerts_sorted_by_severity() {
        let now = 1_700_000_000_000i64;
        let mut trades = Vec::new();
        // 10/12 buyers on AAA: high, p = 79/4096 ≈ 0.019
        for i in 0..12 {
            let dir = if i < 10 { Direction::Buy } else { Direction::Sell };
            trades.push(make_trade(&format!("a-{i}"), "AAA", dir, now - i));
        }
        // 10/10 buyers on BBB: critical
        for i in 0..10 {
            trades.push(make_trade(&format!("b-{i}"), "BBB", Direction::Buy, now - i));
        }

        let report = detect_crowding(&trades, &CrowdingParams::default());
        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.alerts[0].severity, Severity::Critical);
        assert_eq!(report.alerts[0].symbol, "BBB");
        assert_eq!(report.alerts[1].severity, Severity::High);
    }
}
