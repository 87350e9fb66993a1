//! REST implementation of [`TableStore`] following the destination's
//! PostgREST conventions: POST for insert/upsert (merge signaled via an
//! `on_conflict` directive), DELETE with a filter for wipes, PATCH with a
//! filter for partial updates, GET with `select`/filter/`limit` parameters
//! for reads, and two static credential headers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{truncate_diagnostic, Filter, StoreError, TableStore};

const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RestTableStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl fmt::Debug for RestTableStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RestTableStore")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl RestTableStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("fleetsync/store")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| format!("failed to initialize store HTTP client: {err}"))?;

        let base_url = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn execute_write(
        &self,
        table: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(), StoreError> {
        let response = request.send().await.map_err(|err| StoreError::Http {
            table: table.to_string(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            table: table.to_string(),
            status: status.as_u16(),
            body: truncate_diagnostic(&body),
        })
    }
}

fn filter_query(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(column, value) => (column.clone(), format!("eq.{value}")),
        Filter::NotNull(column) => (column.clone(), "not.is.null".to_string()),
    }
}

#[async_trait]
impl TableStore for RestTableStore {
    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        debug!(table, "store insert");
        let request = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=minimal")
            .timeout(WRITE_TIMEOUT)
            .json(&row);
        self.execute_write(table, request).await
    }

    async fn upsert_batch(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        debug!(table, rows = rows.len(), "store upsert");
        let request = self
            .authed(self.client.post(self.table_url(table)))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .timeout(WRITE_TIMEOUT)
            .json(&rows);
        self.execute_write(table, request).await
    }

    async fn delete_all(&self, table: &str) -> Result<(), StoreError> {
        debug!(table, "store wipe");
        // The REST surface refuses an unfiltered DELETE; every destination
        // table carries a surrogate `id` column, so `id=gte.0` matches all.
        let request = self
            .authed(self.client.delete(self.table_url(table)))
            .query(&[("id", "gte.0")])
            .header("Prefer", "return=minimal")
            .timeout(READ_TIMEOUT);
        self.execute_write(table, request).await
    }

    async fn update_by_key(
        &self,
        table: &str,
        key_column: &str,
        key: i64,
        fields: Value,
    ) -> Result<(), StoreError> {
        let request = self
            .authed(self.client.patch(self.table_url(table)))
            .query(&[(key_column, format!("eq.{key}"))])
            .header("Prefer", "return=minimal")
            .timeout(WRITE_TIMEOUT)
            .json(&fields);
        self.execute_write(table, request).await
    }

    async fn select(
        &self,
        table: &str,
        columns: &str,
        filter: Option<Filter>,
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut query: Vec<(String, String)> = vec![("select".to_string(), columns.to_string())];
        if let Some(filter) = &filter {
            query.push(filter_query(filter));
        }
        if let Some(column) = order_desc {
            query.push(("order".to_string(), format!("{column}.desc")));
        }
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }

        let response = self
            .authed(self.client.get(self.table_url(table)))
            .query(&query)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|err| StoreError::Http {
                table: table.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StoreError::Status {
                table: table.to_string(),
                status: status.as_u16(),
                body: truncate_diagnostic(&body),
            });
        }

        serde_json::from_str(&body).map_err(|err| StoreError::Decode {
            table: table.to_string(),
            message: err.to_string(),
        })
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let response = self
            .authed(self.client.get(self.table_url(table)))
            .query(&[("select", "count")])
            .header("Prefer", "count=exact")
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|err| StoreError::Http {
                table: table.to_string(),
                message: err.to_string(),
            })?;

        // Exact counts ride in the content-range header: `0-24/3573`.
        let total = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(|range| range.rsplit('/').next())
            .and_then(|total| total.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(total)
    }
}
