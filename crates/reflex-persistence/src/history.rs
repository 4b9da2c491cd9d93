//! Execution and sensor history over any record store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use reflex_core::Value;

use crate::error::Result;
use crate::store::{QueryFilter, QueryOp, QueryPage, Record, Store};

/// Record kind used for rule executions.
pub const KIND_RULE_EXECUTION: &str = "rule_exec";
/// Record kind used for sensor samples.
pub const KIND_SENSOR_DATA: &str = "sensor_data";

/// Writes rule-execution results and sensor samples through a store and
/// answers aggregate queries over them.
pub struct HistoryRecorder {
    store: Arc<dyn Store>,
    source: String,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn Store>, source: impl Into<String>) -> Self {
        Self {
            store,
            source: source.into(),
        }
    }

    /// Record one rule execution.
    pub fn record_rule_execution(
        &self,
        rule_id: &str,
        success: bool,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        let data = serde_json::json!({
            "rule_id": rule_id,
            "success": success,
            "duration_ms": duration_ms,
            "error": error,
        });
        self.store.insert(Record::new(
            Uuid::new_v4().to_string(),
            KIND_RULE_EXECUTION,
            Value::from(&data),
            self.source.clone(),
        ))
    }

    /// Record one sensor sample.
    pub fn record_sensor_sample(&self, sensor_id: &str, value: &Value) -> Result<()> {
        let data = serde_json::json!({
            "sensor_id": sensor_id,
            "value": serde_json::Value::from(value),
        });
        self.store.insert(Record::new(
            Uuid::new_v4().to_string(),
            KIND_SENSOR_DATA,
            Value::from(&data),
            self.source.clone(),
        ))
    }

    /// Execution history, optionally narrowed to one rule.
    pub fn rule_history(
        &self,
        rule_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<QueryPage> {
        let mut filters = vec![QueryFilter::new("type", QueryOp::Eq, KIND_RULE_EXECUTION)];
        if let Some(rule_id) = rule_id {
            filters.push(QueryFilter::new("data.rule_id", QueryOp::Eq, rule_id));
        }
        self.store.query(&filters, offset, limit)
    }

    /// Sample history, optionally narrowed to one sensor.
    pub fn sensor_history(
        &self,
        sensor_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<QueryPage> {
        let mut filters = vec![QueryFilter::new("type", QueryOp::Eq, KIND_SENSOR_DATA)];
        if let Some(sensor_id) = sensor_id {
            filters.push(QueryFilter::new("data.sensor_id", QueryOp::Eq, sensor_id));
        }
        self.store.query(&filters, offset, limit)
    }

    /// Fraction of recorded executions that succeeded; 0.0 with no history.
    pub fn success_rate(&self, rule_id: &str) -> Result<f64> {
        let page = self.rule_history(Some(rule_id), 0, usize::MAX)?;
        if page.records.is_empty() {
            return Ok(0.0);
        }
        let successes = page
            .records
            .iter()
            .filter(|r| r.data.get("success") == Value::Bool(true))
            .count();
        Ok(successes as f64 / page.records.len() as f64)
    }

    /// Mean recorded duration; 0 with no history.
    pub fn average_duration_ms(&self, rule_id: &str) -> Result<u64> {
        let page = self.rule_history(Some(rule_id), 0, usize::MAX)?;
        if page.records.is_empty() {
            return Ok(0);
        }
        let total: u64 = page
            .records
            .iter()
            .filter_map(|r| r.data.get("duration_ms").as_i64())
            .map(|ms| ms.max(0) as u64)
            .sum();
        Ok(total / page.records.len() as u64)
    }

    /// Drop all history older than `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.store.cleanup_before(cutoff)
    }
}
