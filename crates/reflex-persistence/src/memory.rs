//! In-memory record store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use reflex_core::Value;

use crate::error::{Result, StorageError};
use crate::store::{QueryFilter, QueryPage, Record, Store};

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    /// Insertion order of live ids, the iteration order for queries.
    order: Vec<String>,
}

/// Mutex-guarded in-memory store; the default back-end and the reference
/// behavior for the file store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert(&self, record: Record) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.id) {
            return Err(StorageError::Duplicate(record.id));
        }
        inner.order.push(record.id.clone());
        inner.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn update(&self, id: &str, data: Value) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.records.get_mut(id) {
            Some(record) => {
                record.data = data;
                record.timestamp = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.remove(id).is_none() {
            return Ok(false);
        }
        inner.order.retain(|existing| existing != id);
        Ok(true)
    }

    fn find(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.inner.lock().unwrap().records.get(id).cloned())
    }

    fn query(&self, filters: &[QueryFilter], offset: usize, limit: usize) -> Result<QueryPage> {
        let inner = self.inner.lock().unwrap();
        let matches: Vec<&Record> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .collect();
        let total = matches.len();
        let records = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(QueryPage {
            records,
            total,
            offset,
            limit,
        })
    }

    fn count(&self, filters: &[QueryFilter]) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .records
            .values()
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .count())
    }

    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.records.len();
        inner.records.retain(|_, record| record.timestamp >= cutoff);
        let records = &inner.records;
        let kept: Vec<String> = inner
            .order
            .iter()
            .filter(|id| records.contains_key(*id))
            .cloned()
            .collect();
        inner.order = kept;
        Ok(before - inner.records.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QueryOp;

    fn record(id: &str, kind: &str, data: serde_json::Value) -> Record {
        Record::new(id, kind, Value::from(&data), "test")
    }

    #[test]
    fn crud_round_trip() {
        let store = MemoryStore::new();
        store
            .insert(record("r1", "sensor_data", serde_json::json!({"v": 1})))
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);

        assert!(store
            .update("r1", Value::from(&serde_json::json!({"v": 2})))
            .unwrap());
        assert_eq!(store.find("r1").unwrap().unwrap().data.get("v").as_i64(), Some(2));

        assert!(store.remove("r1").unwrap());
        assert!(!store.remove("r1").unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        store.insert(record("r1", "k", serde_json::json!({}))).unwrap();
        assert!(matches!(
            store.insert(record("r1", "k", serde_json::json!({}))),
            Err(StorageError::Duplicate(_))
        ));
    }

    #[test]
    fn query_filters_and_pages_in_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store
                .insert(record(
                    &format!("r{i}"),
                    if i % 2 == 0 { "even" } else { "odd" },
                    serde_json::json!({"n": i}),
                ))
                .unwrap();
        }

        let page = store.query_by_kind("even", 0, 3).unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<&str> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r2", "r4"]);

        let page = store.query_by_kind("even", 3, 3).unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r6", "r8"]);

        let big = store
            .query(&[QueryFilter::new("data.n", QueryOp::Ge, 7)], 0, 100)
            .unwrap();
        assert_eq!(big.total, 3);
    }

    #[test]
    fn cleanup_drops_old_records() {
        let store = MemoryStore::new();
        let mut old = record("old", "k", serde_json::json!({}));
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.insert(old).unwrap();
        store.insert(record("new", "k", serde_json::json!({}))).unwrap();

        let removed = store
            .cleanup_before(Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.find("old").unwrap().is_none());
        assert!(store.find("new").unwrap().is_some());
    }
}
