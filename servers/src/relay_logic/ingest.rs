//! HTTP ingestion: externally observed events pushed into the relay. These
//! bypass the poller and go straight through the novelty filter to the hub.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};

use lib_relay::core::{Event, EventKind, forward_novel};
use lib_relay::ingestors::{GridReport, HouseReading};

use crate::relay_logic::state::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, String)>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/simulation", post(simulation_handler))
        .route("/webhook", post(webhook_handler))
        .route("/api/thoughts", post(thoughts_handler))
}

#[derive(Debug, Deserialize)]
pub struct SimulationRequest {
    pub data: Vec<HouseReading>,
    #[serde(default)]
    pub weather: Option<String>,
}

/// Dashboard readings in, grid report out (and to every subscriber).
async fn simulation_handler(State(state): State<AppState>, Json(req): Json<SimulationRequest>) -> ApiResult {
    let report = GridReport::from_readings(req.data, req.weather.unwrap_or_else(|| "unknown".to_string()));
    tracing::info!(
        weather = %report.weather,
        houses = report.houses.len(),
        net = report.total_net_energy,
        action = %report.public_grid_action,
        "Simulation data received"
    );

    let payload = report
        .to_payload()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    forward_novel(
        &state.dedup,
        &state.hub,
        EventKind::Telemetry,
        vec![Event::anonymous(EventKind::Telemetry, payload)],
    );

    Ok(Json(json!({
        "message": "Data processed successfully",
        "publicGridAction": report.public_grid_action,
    })))
}

/// One ledger event per call. The transaction hash, when present, is the
/// dedup key, so replayed webhooks are acknowledged but not re-published.
async fn webhook_handler(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    if !body.is_object() {
        return Err((StatusCode::BAD_REQUEST, "expected a JSON object".to_string()));
    }

    let id = ["hash", "transactionHash"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_owned);
    let event = match id {
        Some(id) => Event::new(id, EventKind::LedgerTx, body),
        None => Event::anonymous(EventKind::LedgerTx, body),
    };

    let event_id = event.id.clone();
    match forward_novel(&state.dedup, &state.hub, EventKind::LedgerTx, vec![event]) {
        Some(report) => tracing::info!(id = ?event_id, delivered = report.delivered, "Webhook event relayed"),
        None => tracing::info!(id = ?event_id, "Webhook event already seen"),
    }

    Ok(Json(json!({ "message": "OK - Webhook event" })))
}

#[derive(Debug, Deserialize)]
pub struct ThoughtsRequest {
    #[serde(default)]
    pub thoughts: Option<String>,
    #[serde(default)]
    pub ai_decision: Option<String>,
}

/// Agent decisions, relayed as `info` events.
async fn thoughts_handler(State(state): State<AppState>, Json(req): Json<ThoughtsRequest>) -> ApiResult {
    let Some(text) = req.ai_decision.or(req.thoughts).filter(|t| !t.trim().is_empty()) else {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "expected a non-empty `thoughts` or `ai_decision`".to_string(),
        ));
    };

    forward_novel(
        &state.dedup,
        &state.hub,
        EventKind::Info,
        vec![Event::anonymous(EventKind::Info, Value::String(text))],
    );
    Ok(Json(json!({ "message": "OK" })))
}
