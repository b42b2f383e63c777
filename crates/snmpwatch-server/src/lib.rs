//! HTTP read surface for a running monitor.
//!
//! Serves the live sliding windows and the stored aggregate history as JSON.
//! Live data is one array per metric, keyed by metric name and indexed the
//! same way as `times`.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use snmpwatch_core::{
    AggregateRecord, DEFAULT_HISTORY_LIMIT, LiveWindow, MonitorStatus, MonitorView,
};

/// Upper bound for `?limit=` on `/historical-data`.
pub const MAX_HISTORY_LIMIT: usize = 10_000;

/// Shared server state.
struct AppState {
    monitor: MonitorView,
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<String>,
}

/// Missing, unparseable or zero limits fall back to the default.
fn history_limit(raw: Option<&str>) -> usize {
    match raw.and_then(|s| s.trim().parse::<usize>().ok()) {
        Some(0) | None => DEFAULT_HISTORY_LIMIT,
        Some(n) => n.min(MAX_HISTORY_LIMIT),
    }
}

/// `{ "times": [...], "<metric>": [...] }`.
fn live_window_json(live: LiveWindow) -> Value {
    let mut body = Map::new();
    body.insert("times".to_string(), json!(live.times));
    for series in live.series {
        let values = series.values();
        body.insert(series.name, json!(values));
    }
    Value::Object(body)
}

/// One flat row: `{ "id", "timestamp", "<metric>": mean, ... }`.
fn aggregate_row_json(record: AggregateRecord) -> Value {
    let mut row = Map::new();
    row.insert("id".to_string(), json!(record.id));
    row.insert("timestamp".to_string(), json!(record.timestamp));
    for (metric, mean) in record.means {
        row.insert(metric, json!(mean));
    }
    Value::Object(row)
}

async fn handle_data(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(live_window_json(state.monitor.facade().live_window()))
}

async fn handle_historical(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> (StatusCode, Json<Value>) {
    let limit = history_limit(params.limit.as_deref());

    match state.monitor.facade().history(limit).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(Value::Array(rows.into_iter().map(aggregate_row_json).collect())),
        ),
        Err(e) => {
            log::error!("error fetching historical data: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch historical data" })),
            )
        }
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<MonitorStatus> {
    Json(state.monitor.status())
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<Value> {
    let facade = state.monitor.facade();
    Json(json!({
        "name": "snmpwatch",
        "version": snmpwatch_core::VERSION,
        "metrics": facade.metric_names(),
        "window_capacity": facade.window_capacity(),
        "endpoints": {
            "/": "This API index",
            "/data": "Live sliding window: times plus one value array per metric",
            "/historical-data": {
                "method": "GET",
                "description": "Stored aggregate means, oldest first",
                "params": {
                    "limit": format!("Number of rows (at most {MAX_HISTORY_LIMIT}; missing, zero or invalid means {DEFAULT_HISTORY_LIMIT})"),
                }
            },
            "/health": "Monitor counters",
        }
    }))
}

/// Build the axum router.
pub fn build_router(monitor: MonitorView) -> Router {
    let state = Arc::new(AppState { monitor });

    Router::new()
        .route("/", get(handle_index))
        .route("/data", get(handle_data))
        .route("/historical-data", get(handle_historical))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn run_server<F>(
    monitor: MonitorView,
    host: &str,
    port: u16,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(monitor);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("dashboard API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
