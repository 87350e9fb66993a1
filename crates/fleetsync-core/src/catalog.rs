//! Fixed operating data for the sync: sector and period lists, endpoint
//! timeouts, batch discipline, and destination table names.

use std::time::Duration;

/// Default source endpoint.
pub const WS_URL: &str =
    "https://ws.progilift.fr/WS_PROGILIFT_20230419_WEB/awws/WS_Progilift_20230419.awws";

/// The fleet partitions used to scope bulk equipment queries.
pub const SECTORS: &[&str] = &[
    "1", "2", "3", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "17", "18", "19",
    "20", "71", "72", "73", "74",
];

/// Historical period boundaries for fault queries, newest first; each is
/// passed as the "modified since" filter of one step-3 call.
pub const PERIODS: &[&str] = &[
    "2025-10-01T00:00:00",
    "2025-07-01T00:00:00",
    "2025-01-01T00:00:00",
    "2024-01-01T00:00:00",
    "2023-01-01T00:00:00",
    "2022-01-01T00:00:00",
    "2020-01-01T00:00:00",
];

/// "Since the beginning" filter for full-snapshot endpoints.
pub const EPOCH: &str = "2000-01-01T00:00:00";

pub const EQUIPMENT_TABLE: &str = "equipements";
pub const FAULT_TABLE: &str = "pannes";
pub const ALERT_TABLE: &str = "appareils_arret";
pub const REFERENCE_TABLE: &str = "type_planning";
pub const QUOTE_TABLE: &str = "devis";
pub const RUN_LOG_TABLE: &str = "sync_logs";

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(15);
pub const REFERENCE_TIMEOUT: Duration = Duration::from_secs(30);
pub const ALERTS_TIMEOUT: Duration = Duration::from_secs(30);
pub const EQUIPMENT_TIMEOUT: Duration = Duration::from_secs(120);
pub const FAULTS_TIMEOUT: Duration = Duration::from_secs(180);
pub const QUOTES_TIMEOUT: Duration = Duration::from_secs(120);

/// Safe ceiling for one upsert call against the destination's payload-size
/// and timeout limits. A hard external constraint, not a tunable.
pub const UPSERT_CHUNK: usize = 30;

/// Session tokens are reused within a run and across closely-spaced runs in
/// the same process, but never past this age.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(240);

pub const AUTH_ATTEMPTS: u32 = 3;
pub const AUTH_BACKOFF: Duration = Duration::from_millis(500);

/// Cap on the concatenated error diagnostics stored with a run-log row.
pub const ERROR_SUMMARY_MAX: usize = 500;
