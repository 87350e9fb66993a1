//! The pipeline orchestrator: composes the remote procedure client, the
//! field mappers and the sink client into per-step sync operations, owns the
//! session-token cache, and accounts for partial failure. Each call
//! processes exactly one step/cursor unit; the caller drives the chain by
//! re-invoking with the returned `next` pointer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use fleetsync_soap::{extract_records, RawRecord, SoapClient};
use fleetsync_store::{Filter, TableStore};

use crate::catalog::{
    ALERTS_TIMEOUT, ALERT_TABLE, AUTH_ATTEMPTS, AUTH_BACKOFF, AUTH_TIMEOUT, EPOCH,
    EQUIPMENT_TABLE, EQUIPMENT_TIMEOUT, FAULTS_TIMEOUT, FAULT_TABLE, PERIODS, QUOTES_TIMEOUT,
    QUOTE_TABLE, REFERENCE_TABLE, REFERENCE_TIMEOUT, SECTORS, SESSION_MAX_AGE, UPSERT_CHUNK,
};
use crate::entities::{self, MappedRow, RowMapper};
use crate::error::{Result, SyncError};
use crate::runlog::{self, RunLogEntry, RunStatus};
use crate::steps::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Partial,
    Error,
    Ready,
    Done,
}

/// Outcome of one step invocation, returned to the caller as JSON. `next`
/// holds the query string to invoke next, or `None` once the chain is
/// complete.
#[derive(Debug, Serialize)]
pub struct StepReport {
    pub status: ReportStatus,
    pub step: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    pub found: u64,
    pub written: u64,
    pub skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub next: Option<String>,
    pub duration_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct CronReport {
    pub status: ReportStatus,
    pub mode: &'static str,
    pub alerts: u64,
    pub faults: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    /// Wipe the table, then insert row by row. Used for current-truth
    /// feeds with no stable identity.
    ReplaceAll,
    /// Insert-or-merge by key, chunked to the batch ceiling.
    UpsertBatch { conflict_key: &'static str },
    /// Partial update of rows that must already exist.
    UpdateByKey { key_column: &'static str },
}

/// Everything that distinguishes one sync operation from another. The step
/// handlers are this table plus one generic executor, not hand-copied
/// per-entity functions.
#[derive(Clone, Copy)]
struct EntitySpec {
    method: &'static str,
    /// Candidate record tags, tried in order; the reference endpoint answers
    /// under several.
    tags: &'static [&'static str],
    table: &'static str,
    timeout: Duration,
    mode: WriteMode,
    mapper: RowMapper,
    /// Force re-authentication before the call. Historical fault queries
    /// are the slowest calls and get a fresh token each time.
    fresh_token: bool,
    /// Retry the call once with another fresh token on transport/fault
    /// failure.
    retry_once: bool,
}

fn reference_spec() -> EntitySpec {
    EntitySpec {
        method: "get_Synchro_Wtypepla",
        tags: &["tabListeWtypepla", "ST_Wtypepla", "Wtypepla"],
        table: REFERENCE_TABLE,
        timeout: REFERENCE_TIMEOUT,
        mode: WriteMode::ReplaceAll,
        mapper: entities::reference_row,
        fresh_token: false,
        retry_once: false,
    }
}

fn alerts_spec() -> EntitySpec {
    EntitySpec {
        method: "get_AppareilsArret",
        tags: &["tabListeArrets"],
        table: ALERT_TABLE,
        timeout: ALERTS_TIMEOUT,
        mode: WriteMode::ReplaceAll,
        mapper: entities::alert_row,
        fresh_token: false,
        retry_once: false,
    }
}

fn equipment_spec() -> EntitySpec {
    EntitySpec {
        method: "get_Synchro_Wsoucont",
        tags: &["tabListeWsoucont"],
        table: EQUIPMENT_TABLE,
        timeout: EQUIPMENT_TIMEOUT,
        mode: WriteMode::UpsertBatch {
            conflict_key: "id_wsoucont",
        },
        mapper: entities::equipment_row,
        fresh_token: false,
        retry_once: false,
    }
}

fn visit_history_spec() -> EntitySpec {
    EntitySpec {
        method: "get_Synchro_Wsoucont2",
        tags: &["tabListeWsoucont2"],
        table: EQUIPMENT_TABLE,
        timeout: EQUIPMENT_TIMEOUT,
        mode: WriteMode::UpdateByKey {
            key_column: "id_wsoucont",
        },
        mapper: entities::visit_history_row,
        fresh_token: false,
        retry_once: false,
    }
}

fn faults_spec() -> EntitySpec {
    EntitySpec {
        method: "get_Synchro_Wpanne",
        tags: &["tabListeWpanne"],
        table: FAULT_TABLE,
        timeout: FAULTS_TIMEOUT,
        mode: WriteMode::UpsertBatch {
            conflict_key: "id_panne",
        },
        mapper: entities::fault_row,
        fresh_token: true,
        retry_once: true,
    }
}

fn quotes_spec() -> EntitySpec {
    EntitySpec {
        method: "get_Synchro_Wdevis",
        tags: &["tabListeWdevis"],
        table: QUOTE_TABLE,
        timeout: QUOTES_TIMEOUT,
        mode: WriteMode::UpsertBatch {
            conflict_key: "id_devis",
        },
        mapper: entities::quote_row,
        fresh_token: false,
        retry_once: false,
    }
}

#[derive(Debug, Default)]
struct StepOutcome {
    found: u64,
    written: u64,
    skipped: u64,
    errors: Vec<String>,
}

struct Session {
    token: String,
    obtained_at: Instant,
}

impl Session {
    fn fresh(&self) -> bool {
        self.obtained_at.elapsed() < SESSION_MAX_AGE
    }
}

pub struct SyncPipeline {
    client: SoapClient,
    store: Arc<dyn TableStore>,
    account_code: String,
    session: Option<Session>,
}

impl SyncPipeline {
    pub fn new(client: SoapClient, store: Arc<dyn TableStore>, account_code: String) -> Self {
        Self {
            client,
            store,
            account_code,
            session: None,
        }
    }

    pub fn store(&self) -> Arc<dyn TableStore> {
        self.store.clone()
    }

    /// Runs one step/cursor unit and always produces a report; errors are
    /// folded into it, never propagated. Appends a run-log row for every
    /// unit that performs work (cursor-overflow probes do none).
    pub async fn execute(&mut self, step: Step) -> StepReport {
        if step.exhausted() {
            return StepReport {
                status: ReportStatus::Done,
                step: step.label(),
                cursor: step.cursor(),
                found: 0,
                written: 0,
                skipped: 0,
                message: Some(exhausted_message(&step).to_string()),
                errors: Vec::new(),
                next: step.next().map(|next| next.query()),
                duration_seconds: 0.0,
            };
        }

        let started = Instant::now();
        info!(step = step.label(), cursor = ?step.cursor(), "running sync step");
        let outcome = self.run_step_inner(step).await;
        let duration_seconds = started.elapsed().as_secs_f64();

        let report = match outcome {
            Ok(outcome) => {
                let status = if outcome.errors.is_empty() {
                    ReportStatus::Success
                } else {
                    ReportStatus::Partial
                };
                StepReport {
                    status,
                    step: step.label(),
                    cursor: step.cursor(),
                    found: outcome.found,
                    written: outcome.written,
                    skipped: outcome.skipped,
                    message: None,
                    errors: outcome.errors,
                    next: step.next().map(|next| next.query()),
                    duration_seconds,
                }
            }
            Err(err) => {
                warn!(step = step.label(), "sync step failed: {err}");
                StepReport {
                    status: ReportStatus::Error,
                    step: step.label(),
                    cursor: step.cursor(),
                    found: 0,
                    written: 0,
                    skipped: 0,
                    message: Some(err.to_string()),
                    errors: Vec::new(),
                    // no pointer on fatal failure; the caller retries the
                    // same step
                    next: None,
                    duration_seconds,
                }
            }
        };

        self.log_step(&step, &report).await;
        report
    }

    /// Fast path for the hourly trigger: one authentication, alerts plus the
    /// most recent fault period, one run-log row. Section failures are
    /// recorded and do not stop the other section.
    pub async fn run_cron(&mut self) -> CronReport {
        let started = Instant::now();
        let timestamp = runlog::now_rfc3339();

        if let Err(err) = self.ensure_session(true).await {
            let report = CronReport {
                status: ReportStatus::Error,
                mode: "cron",
                alerts: 0,
                faults: 0,
                errors: vec![err.to_string()],
                duration_seconds: started.elapsed().as_secs_f64(),
                timestamp,
            };
            self.log_cron(&report).await;
            return report;
        }

        let mut alerts = 0;
        let mut faults = 0;
        let mut errors = Vec::new();

        match self.sync_entity(alerts_spec(), &[]).await {
            Ok(outcome) => {
                alerts = outcome.written;
                errors.extend(outcome.errors);
            }
            Err(err) => errors.push(format!("alerts: {err}")),
        }

        let mut spec = faults_spec();
        // the session we just opened is fresh enough for the whole fast path
        spec.fresh_token = false;
        let params = [("dhDerniereMajFichier", PERIODS[0].to_string())];
        match self.sync_entity(spec, &params).await {
            Ok(outcome) => {
                faults = outcome.written;
                errors.extend(outcome.errors);
            }
            Err(err) => errors.push(format!("faults: {err}")),
        }

        let status = if errors.is_empty() {
            ReportStatus::Success
        } else {
            ReportStatus::Partial
        };
        let report = CronReport {
            status,
            mode: "cron",
            alerts,
            faults,
            errors,
            duration_seconds: started.elapsed().as_secs_f64(),
            timestamp,
        };
        self.log_cron(&report).await;
        report
    }

    async fn run_step_inner(&mut self, step: Step) -> Result<StepOutcome> {
        match step {
            Step::Reference => {
                let params = [("dhDerniereMajFichier", EPOCH.to_string())];
                self.sync_entity(reference_spec(), &params).await
            }
            Step::Alerts => self.sync_entity(alerts_spec(), &[]).await,
            Step::Equipment(index) => {
                let params = [
                    ("dhDerniereMajFichier", EPOCH.to_string()),
                    ("sListeSecteursTechnicien", SECTORS[index].to_string()),
                ];
                self.sync_entity(equipment_spec(), &params).await
            }
            Step::VisitHistory(index) => {
                let params = [
                    ("dhDerniereMajFichier", EPOCH.to_string()),
                    ("sListeSecteursTechnicien", SECTORS[index].to_string()),
                ];
                self.sync_entity(visit_history_spec(), &params).await
            }
            Step::Faults(index) => {
                let params = [("dhDerniereMajFichier", PERIODS[index].to_string())];
                self.sync_entity(faults_spec(), &params).await
            }
            Step::Backfill => self.backfill_visit_counts().await,
            Step::Quotes => {
                let params = [("dhDerniereMajFichier", EPOCH.to_string())];
                self.sync_entity(quotes_spec(), &params).await
            }
        }
    }

    /// The generic step executor: authenticate, fetch one unit, map, write
    /// per the entity's mode. Key-less records are skipped; write failures
    /// are accumulated and degrade the run to partial, but never abort the
    /// remaining records.
    async fn sync_entity(
        &mut self,
        spec: EntitySpec,
        params: &[(&str, String)],
    ) -> Result<StepOutcome> {
        let records = self.fetch_records(&spec, params).await?;
        let now = runlog::now_rfc3339();

        let mut outcome = StepOutcome {
            found: records.len() as u64,
            ..Default::default()
        };

        let mapped: Vec<MappedRow> = records
            .iter()
            .filter_map(|record| match (spec.mapper)(record, &now) {
                Some(mapped) => Some(mapped),
                None => {
                    outcome.skipped += 1;
                    None
                }
            })
            .collect();

        match spec.mode {
            WriteMode::ReplaceAll => {
                if let Err(err) = self.store.delete_all(spec.table).await {
                    outcome.errors.push(err.to_string());
                }
                for mapped in mapped {
                    match self.store.insert(spec.table, mapped.row).await {
                        Ok(()) => outcome.written += 1,
                        Err(err) => outcome.errors.push(err.to_string()),
                    }
                }
            }
            WriteMode::UpsertBatch { conflict_key } => {
                let rows: Vec<Value> = mapped.into_iter().map(|mapped| mapped.row).collect();
                for chunk in rows.chunks(UPSERT_CHUNK) {
                    match self
                        .store
                        .upsert_batch(spec.table, chunk.to_vec(), conflict_key)
                        .await
                    {
                        Ok(()) => outcome.written += chunk.len() as u64,
                        Err(err) => outcome.errors.push(err.to_string()),
                    }
                }
            }
            WriteMode::UpdateByKey { key_column } => {
                for mapped in mapped {
                    let Some(key) = mapped.key else {
                        outcome.skipped += 1;
                        continue;
                    };
                    match self
                        .store
                        .update_by_key(spec.table, key_column, key, mapped.row)
                        .await
                    {
                        Ok(()) => outcome.written += 1,
                        Err(err) => outcome.errors.push(err.to_string()),
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn fetch_records(
        &mut self,
        spec: &EntitySpec,
        params: &[(&str, String)],
    ) -> Result<Vec<RawRecord>> {
        let token = self.ensure_session(spec.fresh_token).await?;
        let payload = match self
            .client
            .call(spec.method, params, Some(&token), spec.timeout)
            .await
        {
            Ok(payload) => payload,
            Err(err) if spec.retry_once && err.is_retryable() => {
                warn!(
                    method = spec.method,
                    "call failed, retrying once with a fresh token: {err}"
                );
                self.session = None;
                let token = self.ensure_session(true).await?;
                self.client
                    .call(spec.method, params, Some(&token), spec.timeout)
                    .await?
            }
            Err(err) => {
                // a fault may mean the token was rejected; the next run must
                // re-authenticate rather than fail silently again
                self.session = None;
                return Err(err.into());
            }
        };

        for tag in spec.tags {
            let records = extract_records(&payload, tag);
            if !records.is_empty() {
                return Ok(records);
            }
        }
        Ok(Vec::new())
    }

    /// Returns a valid session token, reusing the cached one while it is
    /// fresh. Authentication is retried a bounded number of times with brief
    /// backoff, then surfaced as fatal.
    async fn ensure_session(&mut self, force: bool) -> Result<String> {
        if !force {
            if let Some(session) = &self.session {
                if session.fresh() {
                    return Ok(session.token.clone());
                }
            }
        }

        let mut attempt = 1;
        loop {
            match self
                .client
                .authenticate(&self.account_code, AUTH_TIMEOUT)
                .await
            {
                Ok(token) => {
                    self.session = Some(Session {
                        token: token.clone(),
                        obtained_at: Instant::now(),
                    });
                    return Ok(token);
                }
                Err(err) if attempt < AUTH_ATTEMPTS => {
                    warn!(attempt, "authentication failed, backing off: {err}");
                    tokio::time::sleep(AUTH_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.session = None;
                    return Err(SyncError::Auth(err.to_string()));
                }
            }
        }
    }

    /// Step 4: resolve each equipment row's planning-type code to an annual
    /// visit count through the reference table and write it back. Pure
    /// destination pass, no remote calls.
    async fn backfill_visit_counts(&self) -> Result<StepOutcome> {
        let reference = self
            .store
            .select(REFERENCE_TABLE, "code,nb_visites", None, None, None)
            .await?;
        if reference.is_empty() {
            return Err(SyncError::EmptyReference(REFERENCE_TABLE));
        }

        let mut visit_counts = HashMap::new();
        for row in &reference {
            if let Some(code) = row.get("code").and_then(Value::as_str) {
                visit_counts.insert(
                    code.to_string(),
                    row.get("nb_visites").cloned().unwrap_or(Value::Null),
                );
            }
        }

        let equipment = self
            .store
            .select(
                EQUIPMENT_TABLE,
                "id_wsoucont,typeplanning",
                Some(Filter::not_null("typeplanning")),
                None,
                None,
            )
            .await?;

        let mut outcome = StepOutcome {
            found: equipment.len() as u64,
            ..Default::default()
        };

        for row in &equipment {
            let key = row.get("id_wsoucont").and_then(Value::as_i64);
            let code = row.get("typeplanning").and_then(Value::as_str);
            let (Some(key), Some(code)) = (key, code) else {
                outcome.skipped += 1;
                continue;
            };
            let Some(count) = visit_counts.get(code) else {
                outcome.skipped += 1;
                continue;
            };
            match self
                .store
                .update_by_key(
                    EQUIPMENT_TABLE,
                    "id_wsoucont",
                    key,
                    json!({ "nb_visites_an": count }),
                )
                .await
            {
                Ok(()) => outcome.written += 1,
                Err(err) => outcome.errors.push(err.to_string()),
            }
        }

        Ok(outcome)
    }

    async fn log_step(&self, step: &Step, report: &StepReport) {
        let status = match report.status {
            ReportStatus::Success | ReportStatus::Done => RunStatus::Success,
            ReportStatus::Partial => RunStatus::Partial,
            _ => RunStatus::Error,
        };

        let mut entry = RunLogEntry {
            status,
            step: step.query().trim_start_matches('?').to_string(),
            equipment_count: 0,
            fault_count: 0,
            alert_count: 0,
            duration_seconds: report.duration_seconds,
            errors: report.errors.clone(),
        };
        match step {
            Step::Equipment(_) | Step::VisitHistory(_) | Step::Backfill => {
                entry.equipment_count = report.written;
            }
            Step::Faults(_) => entry.fault_count = report.written,
            Step::Alerts => entry.alert_count = report.written,
            Step::Reference | Step::Quotes => {}
        }
        if let Some(message) = &report.message {
            if report.status == ReportStatus::Error {
                entry.errors.push(message.clone());
            }
        }

        runlog::record_run(self.store.as_ref(), &entry).await;
    }

    async fn log_cron(&self, report: &CronReport) {
        let status = match report.status {
            ReportStatus::Success => RunStatus::Cron,
            ReportStatus::Partial => RunStatus::Partial,
            _ => RunStatus::Error,
        };
        let entry = RunLogEntry {
            status,
            step: "cron".to_string(),
            equipment_count: 0,
            fault_count: report.faults,
            alert_count: report.alerts,
            duration_seconds: report.duration_seconds,
            errors: report.errors.clone(),
        };
        runlog::record_run(self.store.as_ref(), &entry).await;
    }
}

fn exhausted_message(step: &Step) -> &'static str {
    match step {
        Step::Faults(_) => "all periods completed",
        _ => "all sectors completed",
    }
}
