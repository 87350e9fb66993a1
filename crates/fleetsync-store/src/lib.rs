//! Sink client for the destination table store: a small CRUD surface over
//! PostgREST-style conventions, plus an in-memory implementation of the same
//! trait for tests and dry runs.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryTableStore;
pub use rest::RestTableStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request to {table} failed: {message}")]
    Http { table: String, message: String },

    #[error("store returned HTTP {status} for {table}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },

    #[error("store response for {table} was not decodable: {message}")]
    Decode { table: String, message: String },
}

/// Read filters the pipeline actually issues; the REST implementation maps
/// them onto PostgREST query operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    NotNull(String),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Filter::Eq(column.into(), value.to_string())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Filter::NotNull(column.into())
    }
}

/// Destination CRUD primitives. Write failures carry a short diagnostic
/// (HTTP status plus truncated body) so the orchestrator can surface them in
/// the run log instead of swallowing them.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Single-row insert.
    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError>;

    /// Insert-or-merge by conflict key. Callers chunk the input before
    /// calling; the payload-size ceiling of the REST surface is a hard
    /// external constraint, not something this layer can fix up.
    async fn upsert_batch(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> Result<(), StoreError>;

    /// Unconditional wipe, used only for current-truth tables that are
    /// repopulated in full on every fetch.
    async fn delete_all(&self, table: &str) -> Result<(), StoreError>;

    /// Partial-field update of the rows matching `key_column = key`.
    async fn update_by_key(
        &self,
        table: &str,
        key_column: &str,
        key: i64,
        fields: Value,
    ) -> Result<(), StoreError>;

    /// Filtered projection. `order_desc` sorts newest-first on the named
    /// column when present.
    async fn select(
        &self,
        table: &str,
        columns: &str,
        filter: Option<Filter>,
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Exact row count.
    async fn count(&self, table: &str) -> Result<u64, StoreError>;
}

pub(crate) fn truncate_diagnostic(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}
