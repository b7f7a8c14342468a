//! Types for the intelligence engine
//!
//! Wire-level data model shared by every analytics component. Field names
//! follow the NDJSON protocol (camelCase payload keys, SCREAMING_SNAKE
//! regime labels), so these structs serialize directly into responses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Side of a trade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// The fixed market-regime taxonomy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    #[default]
    Ranging,
    Volatile,
    BreakoutUp,
    BreakoutDown,
    EventDriven,
    Quiet,
}

impl Regime {
    pub const ALL: [Regime; 8] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Ranging,
        Regime::Volatile,
        Regime::BreakoutUp,
        Regime::BreakoutDown,
        Regime::EventDriven,
        Regime::Quiet,
    ];
}

/// Indicator readings captured at trade entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSnapshot {
    pub rsi14: Option<f64>,
    pub bb_position: Option<f64>,
    pub macd_hist: Option<f64>,
    pub trend_strength: Option<f64>,
}

/// Neutral values substituted wherever an indicator reading is absent
#[derive(Debug, Clone, Copy)]
pub struct NeutralIndicators {
    pub rsi14: f64,
    pub bb_position: f64,
    pub macd_hist: f64,
    pub trend_strength: f64,
}

pub const NEUTRAL_INDICATORS: NeutralIndicators = NeutralIndicators {
    rsi14: 50.0,
    bb_position: 0.5,
    macd_hist: 0.0,
    trend_strength: 0.0,
};

/// A single trade event from a bot's history (consumed read-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub regime: Regime,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub pnl_percentage: f64,
    #[serde(default)]
    pub holding_period_minutes: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub indicators: Option<IndicatorSnapshot>,
}

fn default_quantity() -> f64 {
    1.0
}

/// A cluster of bots sharing similar embedded behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub member_bot_ids: Vec<String>,
    #[serde(default, rename = "centroid5D")]
    pub centroid_5d: Vec<f64>,
    #[serde(default)]
    pub dominant_traits: Vec<String>,
    #[serde(default)]
    pub avg_performance: f64,
}

/// Per-bot archetype assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub archetype_id: i32,
    pub distance: f64,
    #[serde(rename = "coords5D")]
    pub coords_5d: Vec<f64>,
}

/// Crowding alert severity, ordered critical-first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Band thresholds on the convergence ratio
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.9 {
            Self::Critical
        } else if ratio >= 0.8 {
            Self::High
        } else if ratio >= 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// One statistically significant direction-convergence event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrowdingAlert {
    pub symbol: String,
    pub direction: Direction,
    pub convergence_ratio: f64,
    pub bot_ids: Vec<String>,
    pub p_value: f64,
    pub severity: Severity,
    pub window_minutes: f64,
    pub active_bots: usize,
    pub total_bots: usize,
    pub timestamp: i64,
}

/// Exploitation level of one (archetype, regime) cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicheClass {
    Unexplored,
    Underexploited,
    Overcrowded,
    Balanced,
}

/// One (archetype, regime) cell with its opportunity classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicheCell {
    pub archetype_id: i32,
    pub regime: Regime,
    pub classification: NicheClass,
    pub bot_count: usize,
    pub avg_performance: f64,
    pub total_trades: u64,
    pub opportunity_score: f64,
}

/// Per-bot performance summary within one regime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimePerformance {
    #[serde(default)]
    pub avg_return: f64,
    #[serde(default)]
    pub trade_count: u64,
    #[serde(default)]
    pub win_rate: f64,
    #[serde(default)]
    pub sharpe: f64,
}

/// botId → regime → performance summary, as supplied by the caller
pub type PerformanceByBotRegime = HashMap<String, HashMap<Regime, RegimePerformance>>;
