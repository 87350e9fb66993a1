use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use fleetsync_core::catalog::{ALERT_TABLE, EQUIPMENT_TABLE, PERIODS, SECTORS};
use fleetsync_core::{ReportStatus, Step, SyncPipeline};
use fleetsync_soap::{SoapClient, SoapRequest, SoapResponse, SoapTransport};
use fleetsync_store::{Filter, MemoryTableStore, StoreError, TableStore};

const TOKEN_BODY: &str = "<ws:WSID xsi:type=\"xsd:hexBinary\">A1B2C3D4</ws:WSID>";

/// Transport scripted per method name; unknown methods answer an empty
/// envelope (zero records).
#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<String>>,
    fail_once: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        let transport = Self::default();
        transport.script("IdentificationTechnicien", TOKEN_BODY);
        transport
    }

    fn script(&self, method: &str, body: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .entry(method.to_string())
            .or_default()
            .push(body.to_string());
    }

    fn fail_once(&self, method: &str) {
        self.fail_once
            .lock()
            .expect("fail lock")
            .push(method.to_string());
    }

    fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|called| called.as_str() == method)
            .count()
    }
}

fn method_of(action: &str) -> String {
    action
        .trim_matches('"')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl SoapTransport for ScriptedTransport {
    async fn exchange(&self, request: SoapRequest) -> Result<SoapResponse, String> {
        let method = method_of(&request.action);
        self.calls.lock().expect("calls lock").push(method.clone());

        {
            let mut failures = self.fail_once.lock().expect("fail lock");
            if let Some(at) = failures.iter().position(|m| *m == method) {
                failures.remove(at);
                return Err("connection reset".to_string());
            }
        }

        let mut responses = self.responses.lock().expect("responses lock");
        let body = match responses.get_mut(&method) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or_default(),
            None => "<soap:Envelope></soap:Envelope>".to_string(),
        };
        Ok(SoapResponse { status: 200, body })
    }
}

/// Store wrapper that fails the nth insert into one table, for
/// partial-failure accounting.
struct FailingStore {
    inner: MemoryTableStore,
    table: String,
    fail_at: u64,
    inserts: AtomicU64,
}

impl FailingStore {
    fn new(table: &str, fail_at: u64) -> Self {
        Self {
            inner: MemoryTableStore::new(),
            table: table.to_string(),
            fail_at,
            inserts: AtomicU64::new(0),
        }
    }

    async fn rows(&self, table: &str) -> Vec<Value> {
        self.inner.rows(table).await
    }
}

#[async_trait]
impl TableStore for FailingStore {
    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        if table == self.table {
            let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_at {
                return Err(StoreError::Status {
                    table: table.to_string(),
                    status: 500,
                    body: "constraint violation".to_string(),
                });
            }
        }
        self.inner.insert(table, row).await
    }

    async fn upsert_batch(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        self.inner.upsert_batch(table, rows, conflict_key).await
    }

    async fn delete_all(&self, table: &str) -> Result<(), StoreError> {
        self.inner.delete_all(table).await
    }

    async fn update_by_key(
        &self,
        table: &str,
        key_column: &str,
        key: i64,
        fields: Value,
    ) -> Result<(), StoreError> {
        self.inner.update_by_key(table, key_column, key, fields).await
    }

    async fn select(
        &self,
        table: &str,
        columns: &str,
        filter: Option<Filter>,
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError> {
        self.inner
            .select(table, columns, filter, order_desc, limit)
            .await
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        self.inner.count(table).await
    }
}

fn pipeline_with(
    transport: Arc<ScriptedTransport>,
    store: Arc<dyn TableStore>,
) -> SyncPipeline {
    let client = SoapClient::new(transport, "https://example.invalid/ws");
    SyncPipeline::new(client, store, "CODE1".to_string())
}

fn equipment_payload(keys: &[&str]) -> String {
    let mut payload = String::new();
    for key in keys {
        payload.push_str(&format!(
            "<tabListeWsoucont><IDWSOUCONT>{key}</IDWSOUCONT><SECTEUR>1</SECTEUR></tabListeWsoucont>"
        ));
    }
    payload
}

fn alert_payload(count: usize) -> String {
    (0..count)
        .map(|n| {
            format!(
                "<tabListeArrets><nIDSOUCONT>{}</nIDSOUCONT><sMotifAppel>arrêt</sMotifAppel></tabListeArrets>",
                n + 1
            )
        })
        .collect()
}

#[tokio::test]
async fn equipment_step_upserts_keyed_records_and_advances_the_cursor() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("get_Synchro_Wsoucont", &equipment_payload(&["501"]));
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store.clone());

    let report = pipeline.execute(Step::Equipment(0)).await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.found, 1);
    assert_eq!(report.written, 1);
    assert_eq!(report.next.as_deref(), Some("?step=2&sector=1"));

    let rows = store.rows(EQUIPMENT_TABLE).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id_wsoucont"], 501);
}

#[tokio::test]
async fn final_sector_points_at_the_visit_history_step() {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store);

    let report = pipeline.execute(Step::Equipment(SECTORS.len() - 1)).await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.written, 0);
    assert_eq!(report.next.as_deref(), Some("?step=2b&sector=0"));
}

#[tokio::test]
async fn rerunning_the_same_cursor_is_idempotent() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("get_Synchro_Wsoucont", &equipment_payload(&["501", "502"]));
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store.clone());

    pipeline.execute(Step::Equipment(0)).await;
    let first = store.rows(EQUIPMENT_TABLE).await;
    pipeline.execute(Step::Equipment(0)).await;
    let second = store.rows(EQUIPMENT_TABLE).await;

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn records_without_a_parseable_key_are_dropped_and_counted() {
    let transport = Arc::new(ScriptedTransport::new());
    let payload = format!(
        "{}<tabListeWsoucont><IDWSOUCONT>notakey</IDWSOUCONT></tabListeWsoucont>\
         <tabListeWsoucont><SECTEUR>1</SECTEUR></tabListeWsoucont>",
        equipment_payload(&["501", "502"])
    );
    transport.script("get_Synchro_Wsoucont", &payload);
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store.clone());

    let report = pipeline.execute(Step::Equipment(0)).await;
    assert_eq!(report.found, 4);
    assert_eq!(report.written, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(store.rows(EQUIPMENT_TABLE).await.len(), 2);
}

#[tokio::test]
async fn alerts_step_wipes_before_repopulating_even_when_source_is_empty() {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MemoryTableStore::new());
    store
        .insert(ALERT_TABLE, json!({"id_wsoucont": 9, "motif": "stale"}))
        .await
        .expect("seed stale alert");
    let mut pipeline = pipeline_with(transport, store.clone());

    let report = pipeline.execute(Step::Alerts).await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.found, 0);
    assert_eq!(report.next.as_deref(), Some("?step=2&sector=0"));
    assert!(store.rows(ALERT_TABLE).await.is_empty());
}

#[tokio::test]
async fn one_failed_write_degrades_the_run_to_partial_and_keeps_siblings() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("get_AppareilsArret", &alert_payload(3));
    let store = Arc::new(FailingStore::new(ALERT_TABLE, 2));
    let mut pipeline = pipeline_with(transport, store.clone());

    let report = pipeline.execute(Step::Alerts).await;
    assert_eq!(report.status, ReportStatus::Partial);
    assert_eq!(report.found, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(store.rows(ALERT_TABLE).await.len(), 2);

    let logs = store
        .select("sync_logs", "*", None, None, None)
        .await
        .expect("run log rows");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], "partial");
    let message = logs[0]["error_message"].as_str().expect("error summary");
    assert!(!message.is_empty());
    assert!(message.chars().count() <= 500);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_is_fatal_after_bounded_retries() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("IdentificationTechnicien", "<soap:Fault>denied</soap:Fault>");
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport.clone(), store.clone());

    let report = pipeline.execute(Step::Equipment(0)).await;
    assert_eq!(report.status, ReportStatus::Error);
    assert_eq!(report.next, None);
    assert_eq!(transport.calls_to("IdentificationTechnicien"), 3);
    assert!(store.rows(EQUIPMENT_TABLE).await.is_empty());
}

#[tokio::test]
async fn fault_history_retries_once_with_a_fresh_token() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_once("get_Synchro_Wpanne");
    transport.script(
        "get_Synchro_Wpanne",
        "<tabListeWpanne><IDWPANNE>88</IDWPANNE><MOTIF>blocage</MOTIF></tabListeWpanne>",
    );
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport.clone(), store.clone());

    let report = pipeline.execute(Step::Faults(0)).await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.written, 1);
    assert_eq!(transport.calls_to("get_Synchro_Wpanne"), 2);
    assert_eq!(transport.calls_to("IdentificationTechnicien"), 2);
}

#[tokio::test]
async fn overlapping_fault_periods_converge_by_key() {
    let transport = Arc::new(ScriptedTransport::new());
    let overlapping =
        "<tabListeWpanne><IDWPANNE>88</IDWPANNE><ETAT>clôturé</ETAT></tabListeWpanne>";
    transport.script("get_Synchro_Wpanne", overlapping);
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store.clone());

    pipeline.execute(Step::Faults(0)).await;
    pipeline.execute(Step::Faults(1)).await;

    let rows = store.rows("pannes").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id_panne"], 88);
}

#[tokio::test]
async fn visit_history_updates_rows_created_by_the_equipment_step() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("get_Synchro_Wsoucont", &equipment_payload(&["501"]));
    transport.script(
        "get_Synchro_Wsoucont2",
        "<tabListeWsoucont2><IDWSOUCONT>501</IDWSOUCONT><LIB1>VT</LIB1>\
         <DATEPASS1>20250412</DATEPASS1></tabListeWsoucont2>",
    );
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store.clone());

    pipeline.execute(Step::Equipment(0)).await;
    let report = pipeline.execute(Step::VisitHistory(0)).await;
    assert_eq!(report.written, 1);

    let rows = store.rows(EQUIPMENT_TABLE).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["lib1"], "VT");
    assert_eq!(rows[0]["datepass1"], 20250412);
    // the primary columns from step 2 survive the merge
    assert_eq!(rows[0]["id_wsoucont"], 501);
}

#[tokio::test]
async fn backfill_resolves_planning_codes_into_visit_counts() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "get_Synchro_Wsoucont",
        "<tabListeWsoucont><IDWSOUCONT>501</IDWSOUCONT>\
         <TYPEPLANNING>VT4</TYPEPLANNING></tabListeWsoucont>\
         <tabListeWsoucont><IDWSOUCONT>502</IDWSOUCONT></tabListeWsoucont>",
    );
    transport.script(
        "get_Synchro_Wtypepla",
        "<tabListeWtypepla><TYPEPLANNING>VT4</TYPEPLANNING>\
         <NB_VISITES>4</NB_VISITES></tabListeWtypepla>",
    );
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store.clone());

    pipeline.execute(Step::Reference).await;
    pipeline.execute(Step::Equipment(0)).await;
    let report = pipeline.execute(Step::Backfill).await;

    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.written, 1);
    assert_eq!(report.next, None);

    let rows = store.rows(EQUIPMENT_TABLE).await;
    let updated = rows
        .iter()
        .find(|row| row["id_wsoucont"] == 501)
        .expect("row 501 present");
    assert_eq!(updated["nb_visites_an"], 4);
}

#[tokio::test]
async fn backfill_without_reference_data_is_an_error() {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store);

    let report = pipeline.execute(Step::Backfill).await;
    assert_eq!(report.status, ReportStatus::Error);
    assert!(report
        .message
        .as_deref()
        .expect("error message")
        .contains("type_planning"));
}

#[tokio::test]
async fn following_next_from_alerts_visits_the_whole_chain_in_order() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script(
        "get_Synchro_Wtypepla",
        "<tabListeWtypepla><TYPEPLANNING>VT2</TYPEPLANNING>\
         <NB_VISITES>2</NB_VISITES></tabListeWtypepla>",
    );
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport, store);

    // step 0 first so the terminal backfill has reference data
    let report = pipeline.execute(Step::Reference).await;
    let mut next = report.next;

    let mut sectors_visited = 0;
    let mut visit_sectors_visited = 0;
    let mut periods_visited = 0;
    let mut hops = 0;

    while let Some(query) = next {
        let step = parse_query(&query);
        match step {
            Step::Equipment(_) => sectors_visited += 1,
            Step::VisitHistory(_) => visit_sectors_visited += 1,
            Step::Faults(_) => periods_visited += 1,
            _ => {}
        }
        let report = pipeline.execute(step).await;
        assert_ne!(report.status, ReportStatus::Error, "chain must stay clean");
        next = report.next;
        hops += 1;
        assert!(hops < 100, "chain must terminate");
    }

    assert_eq!(sectors_visited, SECTORS.len());
    assert_eq!(visit_sectors_visited, SECTORS.len());
    assert_eq!(periods_visited, PERIODS.len());
}

#[tokio::test]
async fn cron_refreshes_alerts_and_recent_faults_with_one_authentication() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("get_AppareilsArret", &alert_payload(2));
    transport.script(
        "get_Synchro_Wpanne",
        "<tabListeWpanne><IDWPANNE>88</IDWPANNE></tabListeWpanne>",
    );
    let store = Arc::new(MemoryTableStore::new());
    let mut pipeline = pipeline_with(transport.clone(), store.clone());

    let report = pipeline.run_cron().await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.alerts, 2);
    assert_eq!(report.faults, 1);
    assert_eq!(transport.calls_to("IdentificationTechnicien"), 1);

    let logs = store
        .select("sync_logs", "*", None, None, None)
        .await
        .expect("run log rows");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], "cron");
    assert_eq!(logs[0]["pannes_count"], 1);
    assert_eq!(logs[0]["arrets_count"], 2);
}

fn parse_query(query: &str) -> Step {
    let mut step = "";
    let mut sector = 0;
    let mut period = 0;
    for pair in query.trim_start_matches('?').split('&') {
        match pair.split_once('=') {
            Some(("step", value)) => step = value,
            Some(("sector", value)) => sector = value.parse().expect("sector cursor"),
            Some(("period", value)) => period = value.parse().expect("period cursor"),
            _ => {}
        }
    }
    Step::parse(step, sector, period).expect("next pointer must be a valid step")
}
