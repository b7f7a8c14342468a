//! Bot-Intel — competitive-intelligence analytics worker
//!
//! Long-running request/response loop: one JSON request per line on stdin,
//! one JSON response per line on stdout. All diagnostics go to stderr so
//! the response stream stays strictly newline-delimited JSON.
//!
//! Usage:
//!   bot-intel            — serve requests from stdin
//!   bot-intel --verbose  — same, with debug logging

use clap::Parser;
use engine::types::{Archetype, PerformanceByBotRegime, TradeEvent};
use engine::{
    analyze_niches, build_regime_matrix, compute_batch, detect_crowding, extract_features,
    predict, predict_all, train, ArchetypeClusterer, CrowdingParams, InMemoryModelStore,
    Reducer, ReducerConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "bot-intel")]
#[command(about = "Competitive-intelligence analytics worker", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,bot_intel=debug")
    } else {
        EnvFilter::new("info,engine=info,bot_intel=info")
    };

    // stdout is the response channel; diagnostics go to stderr
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Protocol envelope
// ============================================================================

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    id: Value,
    #[serde(rename = "type")]
    kind: String,
    success: bool,
    payload: Option<Value>,
    error: Option<String>,
    processing_time_ms: u64,
}

/// Closed set of request kinds; every variant has a handler arm, checked
/// at compile time by the exhaustive match in `Dispatcher::dispatch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    HealthPing,
    ExtractFeatures,
    Cluster,
    Train,
    Predict,
    PredictAll,
    Crowding,
    Niches,
    RegimeMatrix,
    ShapleyBatch,
}

impl RequestKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "health:ping" => Some(Self::HealthPing),
            "patterns:extract_features" => Some(Self::ExtractFeatures),
            "patterns:cluster" => Some(Self::Cluster),
            "competitive:train" => Some(Self::Train),
            "competitive:predict" => Some(Self::Predict),
            "competitive:predict_all" => Some(Self::PredictAll),
            "competitive:crowding" => Some(Self::Crowding),
            "competitive:niches" => Some(Self::Niches),
            "fingerprint:regime_matrix" => Some(Self::RegimeMatrix),
            "shapley:batch" => Some(Self::ShapleyBatch),
            _ => None,
        }
    }
}

// ============================================================================
// Request payloads
// ============================================================================

fn default_n_neighbors() -> usize {
    5
}

fn default_min_dist() -> f64 {
    0.1
}

fn default_min_cluster_size() -> usize {
    engine::DEFAULT_MIN_CLUSTER_SIZE
}

fn default_window_minutes() -> f64 {
    5.0
}

fn default_threshold_ratio() -> f64 {
    0.6
}

fn default_total_bots() -> usize {
    21
}

fn default_permutations() -> usize {
    engine::DEFAULT_PERMUTATIONS
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractPayload {
    #[serde(default)]
    bot_trades: HashMap<String, Vec<TradeEvent>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterPayload {
    #[serde(default)]
    features: BTreeMap<String, Vec<f64>>,
    #[serde(default = "default_n_neighbors")]
    n_neighbors: usize,
    #[serde(default = "default_min_dist")]
    min_dist: f64,
    #[serde(default = "default_min_cluster_size")]
    min_cluster_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainPayload {
    #[serde(default)]
    bot_id: String,
    #[serde(default)]
    features: Vec<Vec<f64>>,
    #[serde(default)]
    labels: Vec<i64>,
    #[serde(default)]
    sample_weights: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictPayload {
    #[serde(default)]
    bot_id: String,
    #[serde(default)]
    features: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictAllPayload {
    #[serde(default)]
    predictions: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrowdingPayload {
    #[serde(default)]
    recent_trades: Vec<TradeEvent>,
    #[serde(default = "default_window_minutes")]
    window_minutes: f64,
    #[serde(default = "default_threshold_ratio")]
    threshold_ratio: f64,
    #[serde(default = "default_total_bots")]
    total_bots: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NichesPayload {
    #[serde(default)]
    archetypes: Vec<Archetype>,
    #[serde(default)]
    performance_by_bot_regime: PerformanceByBotRegime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegimeMatrixPayload {
    #[serde(default)]
    archetypes: Vec<Archetype>,
    #[serde(default)]
    bot_performance_by_regime: PerformanceByBotRegime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShapleyPayload {
    #[serde(default)]
    trades: Vec<TradeEvent>,
    #[serde(default = "default_permutations")]
    permutations: usize,
}

/// Missing payloads behave like empty objects
fn parse_payload<T: serde::de::DeserializeOwned>(payload: Value) -> anyhow::Result<T> {
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    };
    Ok(serde_json::from_value(payload)?)
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes requests to the analytics components. Components are built
/// lazily on first use; the model store is the only cross-request state
/// and lives for the process lifetime.
struct Dispatcher {
    reducer: Option<Reducer>,
    clusterer: Option<ArchetypeClusterer>,
    models: InMemoryModelStore,
}

impl Dispatcher {
    fn new() -> Self {
        Self {
            reducer: None,
            clusterer: None,
            models: InMemoryModelStore::new(),
        }
    }

    fn reducer(&mut self) -> &Reducer {
        self.reducer.get_or_insert_with(Reducer::new)
    }

    fn clusterer(&mut self) -> &ArchetypeClusterer {
        self.clusterer.get_or_insert_with(ArchetypeClusterer::new)
    }

    /// Handle one request end to end; never panics, never crashes the loop
    fn handle(&mut self, request: Request) -> Response {
        let start = Instant::now();

        let result = match RequestKind::parse(&request.kind) {
            Some(kind) => self.dispatch(kind, request.payload),
            None => Err(anyhow::anyhow!("Unknown request type: {}", request.kind)),
        };

        let elapsed = (start.elapsed().as_secs_f64() * 1000.0).round() as u64;
        match result {
            Ok(payload) => Response {
                id: request.id,
                kind: format!("{}:result", request.kind),
                success: true,
                payload: Some(payload),
                error: None,
                processing_time_ms: elapsed,
            },
            Err(err) => {
                error!(kind = %request.kind, error = %err, "Request failed");
                Response {
                    id: request.id,
                    kind: format!("{}:error", request.kind),
                    success: false,
                    payload: None,
                    error: Some(err.to_string()),
                    processing_time_ms: elapsed,
                }
            }
        }
    }

    fn dispatch(&mut self, kind: RequestKind, payload: Value) -> anyhow::Result<Value> {
        match kind {
            RequestKind::HealthPing => Ok(json!({
                "status": "ok",
                "version": APP_VERSION,
                "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            })),

            RequestKind::ExtractFeatures => {
                let payload: ExtractPayload = parse_payload(payload)?;
                Ok(serde_json::to_value(extract_features(&payload.bot_trades))?)
            }

            RequestKind::Cluster => {
                let payload: ClusterPayload = parse_payload(payload)?;
                let config = ReducerConfig {
                    n_neighbors: payload.n_neighbors,
                    min_dist: payload.min_dist,
                };
                let embeddings = self.reducer().reduce(&payload.features, &config);
                let outcome = self.clusterer().cluster(
                    &embeddings,
                    &payload.features,
                    payload.min_cluster_size,
                );
                Ok(serde_json::to_value(outcome)?)
            }

            RequestKind::Train => {
                let payload: TrainPayload = parse_payload(payload)?;
                let outcome = train(
                    &self.models,
                    &payload.bot_id,
                    &payload.features,
                    &payload.labels,
                    payload.sample_weights.as_deref(),
                )?;
                Ok(serde_json::to_value(outcome)?)
            }

            RequestKind::Predict => {
                let payload: PredictPayload = parse_payload(payload)?;
                let outcome = predict(&self.models, &payload.bot_id, &payload.features);
                Ok(serde_json::to_value(outcome)?)
            }

            RequestKind::PredictAll => {
                let payload: PredictAllPayload = parse_payload(payload)?;
                let outcome = predict_all(&self.models, &payload.predictions);
                Ok(serde_json::to_value(outcome)?)
            }

            RequestKind::Crowding => {
                let payload: CrowdingPayload = parse_payload(payload)?;
                let params = CrowdingParams {
                    window_minutes: payload.window_minutes,
                    threshold_ratio: payload.threshold_ratio,
                    total_bots: payload.total_bots,
                };
                Ok(serde_json::to_value(detect_crowding(&payload.recent_trades, &params))?)
            }

            RequestKind::Niches => {
                let payload: NichesPayload = parse_payload(payload)?;
                Ok(serde_json::to_value(analyze_niches(
                    &payload.archetypes,
                    &payload.performance_by_bot_regime,
                ))?)
            }

            RequestKind::RegimeMatrix => {
                let payload: RegimeMatrixPayload = parse_payload(payload)?;
                Ok(serde_json::to_value(build_regime_matrix(
                    &payload.archetypes,
                    &payload.bot_performance_by_regime,
                ))?)
            }

            RequestKind::ShapleyBatch => {
                let payload: ShapleyPayload = parse_payload(payload)?;
                Ok(serde_json::to_value(compute_batch(
                    &payload.trades,
                    payload.permutations,
                ))?)
            }
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    info!("Bot-Intel v{} starting...", APP_VERSION);
    info!("Ready for requests on stdin");

    let mut dispatcher = Dispatcher::new();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Invalid JSON request line");
                continue;
            }
        };

        let response = dispatcher.handle(request);
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("Input stream closed, shutting down");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, payload: Value) -> Request {
        Request {
            id: json!("req-1"),
            kind: kind.to_string(),
            payload,
        }
    }

    #[test]
    fn test_request_kind_parse() {
        assert_eq!(RequestKind::parse("health:ping"), Some(RequestKind::HealthPing));
        assert_eq!(RequestKind::parse("shapley:batch"), Some(RequestKind::ShapleyBatch));
        assert_eq!(
            RequestKind::parse("fingerprint:regime_matrix"),
            Some(RequestKind::RegimeMatrix)
        );
        assert_eq!(RequestKind::parse("nope:nothing"), None);
        assert_eq!(RequestKind::parse(""), None);
    }

    #[test]
    fn test_health_ping() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request("health:ping", Value::Null));
        assert!(response.success);
        assert_eq!(response.kind, "health:ping:result");
        let payload = response.payload.unwrap();
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["version"], APP_VERSION);
    }

    #[test]
    fn test_unknown_type_error_envelope() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request("bogus:thing", Value::Null));
        assert!(!response.success);
        assert_eq!(response.kind, "bogus:thing:error");
        assert!(response.payload.is_none());
        assert!(response.error.unwrap().contains("Unknown request type"));
    }

    #[test]
    fn test_malformed_payload_is_error_not_crash() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request(
            "patterns:extract_features",
            json!({"botTrades": "not-a-map"}),
        ));
        assert!(!response.success);
        assert_eq!(response.kind, "patterns:extract_features:error");

        // The dispatcher keeps serving after a bad request
        let response = dispatcher.handle(request("health:ping", Value::Null));
        assert!(response.success);
    }

    #[test]
    fn test_extract_features_request() {
        let mut dispatcher = Dispatcher::new();
        let trades: Vec<Value> = (0..4)
            .map(|i| {
                json!({
                    "id": format!("t{i}"),
                    "botId": "bot-1",
                    "symbol": "BTCUSDT",
                    "direction": "buy",
                    "quantity": 1.0,
                    "timestamp": 1_700_000_000_000i64 + i * 60_000,
                    "regime": "TRENDING_UP",
                    "pnl": 0.5,
                    "pnlPercentage": 0.5,
                    "holdingPeriodMinutes": 10.0,
                })
            })
            .collect();

        let response = dispatcher.handle(request(
            "patterns:extract_features",
            json!({"botTrades": {"bot-1": trades}}),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["botCount"], 1);
        assert_eq!(payload["dimensions"], 20);
        assert_eq!(payload["features"]["bot-1"].as_array().unwrap().len(), 20);
    }

    #[test]
    fn test_cluster_request_with_empty_features() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request("patterns:cluster", json!({"features": {}})));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["clusterCount"], 0);
        assert_eq!(payload["silhouetteScore"], 0.0);
    }

    #[test]
    fn test_train_insufficient_data_is_structured() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request(
            "competitive:train",
            json!({"botId": "bot-1", "features": [[1.0], [2.0]], "labels": [0, 1]}),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["trained"], false);
        assert_eq!(payload["reason"], "insufficient_data");
    }

    #[test]
    fn test_predict_without_model_is_structured() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request(
            "competitive:predict",
            json!({"botId": "ghost", "features": [1.0, 2.0]}),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["predicted"], false);
        assert_eq!(payload["reason"], "no_model");
    }

    #[test]
    fn test_model_cache_spans_requests() {
        let mut dispatcher = Dispatcher::new();

        let features: Vec<Vec<f64>> = (0..12)
            .map(|i| vec![if i % 2 == 0 { 5.0 } else { -5.0 }, i as f64 * 0.1])
            .collect();
        let labels: Vec<i64> = (0..12i64).map(|i| i % 2).collect();
        let response = dispatcher.handle(request(
            "competitive:train",
            json!({"botId": "bot-7", "features": features, "labels": labels}),
        ));
        assert!(response.success);
        assert_eq!(response.payload.unwrap()["trained"], true);

        let response = dispatcher.handle(request(
            "competitive:predict",
            json!({"botId": "bot-7", "features": [5.0, 0.4]}),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["predicted"], true);
        assert_eq!(payload["predictedAction"], "buy");
    }

    #[test]
    fn test_shapley_batch_request() {
        let mut dispatcher = Dispatcher::new();
        let trades = json!([
            {"id": "t1", "botId": "b1", "symbol": "BTCUSDT", "direction": "buy",
             "quantity": 2.0, "timestamp": 1, "regime": "RANGING", "pnlPercentage": 2.0},
            {"id": "t2", "botId": "b2", "symbol": "BTCUSDT", "direction": "sell",
             "quantity": 1.0, "timestamp": 2, "regime": "VOLATILE", "pnlPercentage": -1.0},
        ]);
        let response = dispatcher.handle(request("shapley:batch", json!({"trades": trades})));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["tradeCount"], 2);
        let record = &payload["attributions"][0];
        let sum = record["regimeContribution"].as_f64().unwrap()
            + record["timingContribution"].as_f64().unwrap()
            + record["directionContribution"].as_f64().unwrap()
            + record["sizingContribution"].as_f64().unwrap();
        assert!((sum - record["totalReturn"].as_f64().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_niches_request() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request(
            "competitive:niches",
            json!({
                "archetypes": [{"id": 0, "memberBotIds": ["a", "b", "c"]}],
                "performanceByBotRegime": {}
            }),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["totalCells"], 8);
        assert_eq!(payload["unexplored"], 8);
    }

    #[test]
    fn test_regime_matrix_request() {
        let mut dispatcher = Dispatcher::new();
        let response = dispatcher.handle(request(
            "fingerprint:regime_matrix",
            json!({
                "archetypes": [{"id": 0, "memberBotIds": ["a"]}],
                "botPerformanceByRegime": {
                    "a": {"TRENDING_UP": {"avgReturn": 1.5, "tradeCount": 4, "winRate": 0.75, "sharpe": 1.1}}
                }
            }),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["archetypeCount"], 1);
        assert_eq!(payload["regimeCount"], 8);
        assert_eq!(payload["cells"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_crowding_request() {
        let mut dispatcher = Dispatcher::new();
        let trades: Vec<Value> = (0..21)
            .map(|i| {
                json!({
                    "id": format!("t{i}"),
                    "botId": format!("bot-{i:02}"),
                    "symbol": "BTCUSDT",
                    "direction": if i < 15 { "buy" } else { "sell" },
                    "quantity": 1.0,
                    "timestamp": 1_700_000_000_000i64 - i,
                    "regime": "RANGING",
                })
            })
            .collect();

        let response = dispatcher.handle(request(
            "competitive:crowding",
            json!({"recentTrades": trades}),
        ));
        assert!(response.success);
        let payload = response.payload.unwrap();
        assert_eq!(payload["alertCount"], 1);
        let alert = &payload["alerts"][0];
        assert_eq!(alert["direction"], "buy");
        assert_eq!(alert["severity"], "medium");
        assert!((alert["convergenceRatio"].as_f64().unwrap() - 0.7143).abs() < 1e-9);
    }
}
