//! The record-store contract the engine persists through.
//!
//! Records are schemaless: an id, a kind tag, an arbitrary data payload, a
//! timestamp and a source label. Queries are conjunctions of field
//! predicates over the built-in fields (`id`, `type`, `source`,
//! `timestamp`) or dotted paths into `data` (e.g. `data.temperature`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reflex_core::Value;

use crate::error::Result;

/// One stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    /// Record kind tag (`type` in queries).
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        data: Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }
}

/// Predicate operators for query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

/// One field predicate. Filters combine conjunctively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub op: QueryOp,
    pub value: Value,
}

impl QueryFilter {
    pub fn new(field: impl Into<String>, op: QueryOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether `record` satisfies this predicate. Unresolvable fields
    /// compare as `Null`.
    pub fn matches(&self, record: &Record) -> bool {
        let field_value = resolve_field(record, &self.field);
        match self.op {
            QueryOp::Eq => field_value == self.value,
            QueryOp::Ne => field_value != self.value,
            QueryOp::Gt => field_value.compare(&self.value) == Some(std::cmp::Ordering::Greater),
            QueryOp::Lt => field_value.compare(&self.value) == Some(std::cmp::Ordering::Less),
            QueryOp::Ge => matches!(
                field_value.compare(&self.value),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            QueryOp::Le => matches!(
                field_value.compare(&self.value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            QueryOp::Contains => string_pred(&field_value, &self.value, |a, b| a.contains(b)),
            QueryOp::StartsWith => {
                string_pred(&field_value, &self.value, |a, b| a.starts_with(b))
            }
            QueryOp::EndsWith => string_pred(&field_value, &self.value, |a, b| a.ends_with(b)),
        }
    }
}

fn string_pred(field: &Value, needle: &Value, pred: impl Fn(&str, &str) -> bool) -> bool {
    match (field.as_str(), needle.as_str()) {
        (Some(a), Some(b)) => pred(a, b),
        _ => false,
    }
}

/// `id`, `type`, `source` and `timestamp` resolve to record metadata
/// (timestamps as epoch milliseconds); `data.*` paths walk the payload.
fn resolve_field(record: &Record, field: &str) -> Value {
    match field {
        "id" => Value::Str(record.id.clone()),
        "type" => Value::Str(record.kind.clone()),
        "source" => Value::Str(record.source.clone()),
        "timestamp" => Value::Int(record.timestamp.timestamp_millis()),
        path => match path.strip_prefix("data.") {
            Some(rest) => rest.split('.').fold(record.data.clone(), |v, key| v.get(key)),
            None if path == "data" => record.data.clone(),
            None => Value::Null,
        },
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Matches before paging.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Storage back-end contract. Implementations serialize access internally;
/// every method takes `&self`.
pub trait Store: Send + Sync {
    /// Insert a record; duplicate ids are rejected.
    fn insert(&self, record: Record) -> Result<()>;

    /// Replace a record's data payload (refreshing its timestamp); returns
    /// false for unknown ids.
    fn update(&self, id: &str, data: Value) -> Result<bool>;

    /// Remove by id; returns false for unknown ids.
    fn remove(&self, id: &str) -> Result<bool>;

    fn find(&self, id: &str) -> Result<Option<Record>>;

    /// Filtered query in insertion order with offset/limit paging.
    fn query(&self, filters: &[QueryFilter], offset: usize, limit: usize) -> Result<QueryPage>;

    fn query_by_kind(&self, kind: &str, offset: usize, limit: usize) -> Result<QueryPage> {
        self.query(
            &[QueryFilter::new("type", QueryOp::Eq, kind)],
            offset,
            limit,
        )
    }

    fn count(&self, filters: &[QueryFilter]) -> Result<usize>;

    fn count_by_kind(&self, kind: &str) -> Result<usize> {
        self.count(&[QueryFilter::new("type", QueryOp::Eq, kind)])
    }

    /// Drop records older than `cutoff`; returns how many were removed.
    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
