//! Run-outcome recording and the read-only aggregate queries behind the
//! status/log endpoints. One `sync_logs` row is appended per run — manual,
//! stepped, or cron — and never updated afterwards.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use fleetsync_store::{StoreError, TableStore};

use crate::catalog::{
    ALERT_TABLE, EQUIPMENT_TABLE, ERROR_SUMMARY_MAX, FAULT_TABLE, RUN_LOG_TABLE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Error,
    Cron,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
            RunStatus::Cron => "cron",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLogEntry {
    pub status: RunStatus,
    pub step: String,
    pub equipment_count: u64,
    pub fault_count: u64,
    pub alert_count: u64,
    pub duration_seconds: f64,
    pub errors: Vec<String>,
}

/// Concatenated diagnostics, capped for the log column. `None` when the run
/// was clean.
pub fn error_summary(errors: &[String]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let joined = errors.join("; ");
    if joined.chars().count() <= ERROR_SUMMARY_MAX {
        Some(joined)
    } else {
        Some(joined.chars().take(ERROR_SUMMARY_MAX).collect())
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Best-effort append. A failed log write must never fail the run it
/// describes; it is traced and dropped.
pub async fn record_run(store: &dyn TableStore, entry: &RunLogEntry) {
    let row = json!({
        "sync_date": now_rfc3339(),
        "status": entry.status.as_str(),
        "step": entry.step,
        "equipements_count": entry.equipment_count,
        "pannes_count": entry.fault_count,
        "arrets_count": entry.alert_count,
        "duration_seconds": (entry.duration_seconds * 10.0).round() / 10.0,
        "error_message": error_summary(&entry.errors),
    });

    if let Err(err) = store.insert(RUN_LOG_TABLE, row).await {
        warn!("failed to record run log entry: {err}");
    }
}

/// Latest run rows, newest first.
pub async fn latest_logs(store: &dyn TableStore, limit: u32) -> Result<Vec<Value>, StoreError> {
    store
        .select(RUN_LOG_TABLE, "*", None, Some("sync_date"), Some(limit))
        .await
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub status: &'static str,
    pub totals: TableTotals,
    pub last_sync: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct TableTotals {
    pub equipements: u64,
    pub pannes: u64,
    pub appareils_arret: u64,
}

/// Dashboard aggregate: per-table exact counts plus the most recent run row.
pub async fn status_summary(store: &dyn TableStore) -> Result<StatusSummary, StoreError> {
    let totals = TableTotals {
        equipements: store.count(EQUIPMENT_TABLE).await?,
        pannes: store.count(FAULT_TABLE).await?,
        appareils_arret: store.count(ALERT_TABLE).await?,
    };
    let last_sync = latest_logs(store, 1).await?.into_iter().next();

    Ok(StatusSummary {
        status: "ok",
        totals,
        last_sync,
    })
}
