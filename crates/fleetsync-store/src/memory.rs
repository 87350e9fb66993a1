//! In-process [`TableStore`] used by tests and dry runs. Mirrors the REST
//! surface's observable semantics: merge-by-conflict-key upserts, full-table
//! wipes, PATCH-style field merges, and filtered projections.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::{Filter, StoreError, TableStore};

#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's rows, for assertions.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

fn as_object(row: Value, table: &str) -> Result<Map<String, Value>, StoreError> {
    match row {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode {
            table: table.to_string(),
            message: format!("expected a JSON object row, got {other}"),
        }),
    }
}

fn merge_into(target: &mut Map<String, Value>, fields: &Map<String, Value>) {
    for (key, value) in fields {
        target.insert(key.clone(), value.clone());
    }
}

fn matches_filter(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => match row.get(column) {
            Some(Value::Null) | None => false,
            Some(found) => scalar_string(found) == *value,
        },
        Filter::NotNull(column) => !matches!(row.get(column), Some(Value::Null) | None),
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn project(row: &Value, columns: &str) -> Value {
    if columns == "*" {
        return row.clone();
    }
    let mut out = Map::new();
    for column in columns.split(',') {
        let column = column.trim();
        out.insert(
            column.to_string(),
            row.get(column).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

fn compare_order(left: &Value, right: &Value, column: &str) -> Ordering {
    let left = left.get(column);
    let right = right.get(column);
    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => scalar_string(a).cmp(&scalar_string(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        let row = as_object(row, table)?;
        let mut tables = self.tables.lock().await;
        tables
            .entry(table.to_string())
            .or_default()
            .push(Value::Object(row));
        Ok(())
    }

    async fn upsert_batch(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables.entry(table.to_string()).or_default();

        for row in rows {
            let row = as_object(row, table)?;
            let key = row.get(conflict_key).cloned().unwrap_or(Value::Null);
            let existing = stored.iter().position(|candidate| {
                !key.is_null() && candidate.get(conflict_key) == Some(&key)
            });
            match existing {
                Some(index) => {
                    if let Value::Object(target) = &mut stored[index] {
                        merge_into(target, &row);
                    }
                }
                None => stored.push(Value::Object(row)),
            }
        }
        Ok(())
    }

    async fn delete_all(&self, table: &str) -> Result<(), StoreError> {
        self.tables.lock().await.remove(table);
        Ok(())
    }

    async fn update_by_key(
        &self,
        table: &str,
        key_column: &str,
        key: i64,
        fields: Value,
    ) -> Result<(), StoreError> {
        let fields = as_object(fields, table)?;
        let mut tables = self.tables.lock().await;
        if let Some(stored) = tables.get_mut(table) {
            for row in stored.iter_mut() {
                if row.get(key_column) == Some(&Value::from(key)) {
                    if let Value::Object(target) = row {
                        merge_into(target, &fields);
                    }
                }
            }
        }
        Ok(())
    }

    async fn select(
        &self,
        table: &str,
        columns: &str,
        filter: Option<Filter>,
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|row| filter.as_ref().map_or(true, |f| matches_filter(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(column) = order_desc {
            rows.sort_by(|a, b| compare_order(b, a, column));
        }
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }

        Ok(rows.iter().map(|row| project(row, columns)).collect())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.get(table).map(|rows| rows.len() as u64).unwrap_or(0))
    }
}
