use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use fleetsync_core::catalog::{PERIODS, SECTORS};
use fleetsync_core::{runlog, Step};

use crate::AppState;

const LOG_PAGE: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub step: Option<String>,
    pub sector: Option<usize>,
    pub period: Option<usize>,
    pub mode: Option<String>,
}

/// Every response is well-formed JSON with a `status` field, HTTP 200
/// included on internal failure — the caller is a scheduler that must always
/// get a parsable outcome.
fn respond<T: serde::Serialize>(value: T) -> Json<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Json(value),
        Err(err) => {
            error!("failed to serialize response: {err}");
            Json(json!({
                "status": "error",
                "message": format!("internal serialization failure: {err}"),
            }))
        }
    }
}

pub async fn sync(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncParams>,
) -> Json<Value> {
    if params.mode.as_deref() == Some("cron") {
        let report = state.pipeline.lock().await.run_cron().await;
        return respond(report);
    }

    let step = params
        .step
        .as_deref()
        .and_then(|step| Step::parse(step, params.sector.unwrap_or(0), params.period.unwrap_or(0)));

    match step {
        Some(step) => {
            let report = state.pipeline.lock().await.execute(step).await;
            respond(report)
        }
        // absent or unknown step: the documentation payload, not an error
        None => Json(ready_payload()),
    }
}

pub async fn cron(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = state.pipeline.lock().await.run_cron().await;
    respond(report)
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    match runlog::status_summary(state.store.as_ref()).await {
        Ok(summary) => respond(summary),
        Err(err) => {
            error!("status query failed: {err}");
            Json(json!({ "status": "error", "message": err.to_string() }))
        }
    }
}

pub async fn logs(State(state): State<Arc<AppState>>) -> Json<Value> {
    match runlog::latest_logs(state.store.as_ref(), LOG_PAGE).await {
        Ok(rows) => Json(Value::Array(rows)),
        Err(err) => {
            error!("log query failed: {err}");
            Json(json!({ "status": "error", "message": err.to_string() }))
        }
    }
}

pub fn ready_payload() -> Value {
    json!({
        "status": "ready",
        "message": "fleetsync sync API",
        "config": {
            "sectors": SECTORS.len(),
            "periods": PERIODS.len(),
        },
        "endpoints": {
            "step0": "?step=0 -> planning-type reference data",
            "step1": "?step=1 -> currently-stopped devices",
            "step2": format!("?step=2&sector=0..{} -> equipment records", SECTORS.len() - 1),
            "step2b": format!("?step=2b&sector=0..{} -> visit history", SECTORS.len() - 1),
            "step3": format!("?step=3&period=0..{} -> fault history", PERIODS.len() - 1),
            "step4": "?step=4 -> annual visit-count backfill",
            "step5": "?step=5 -> quotes (manual, outside the chain)",
            "cron": "?mode=cron -> fast refresh (alerts + recent faults)",
        },
        "full_sync_order": format!(
            "0 -> 1 -> 2 (x{sectors}) -> 2b (x{sectors}) -> 3 (x{periods}) -> 4",
            sectors = SECTORS.len(),
            periods = PERIODS.len(),
        ),
    })
}
