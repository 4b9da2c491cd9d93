//! JSON-lines file store.
//!
//! Records live in one file, one JSON document per line. The whole file is
//! loaded at open and rewritten on every mutation; suitable for the modest
//! record volumes of rule state and recent history, not as a database.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use reflex_core::Value;

use crate::error::{Result, StorageError};
use crate::store::{QueryFilter, QueryPage, Record, Store};

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    order: Vec<String>,
}

/// File-backed store with the same semantics as [`crate::MemoryStore`].
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open (or create) the store file and load its records. Lines that do
    /// not parse are skipped with a warning, so one corrupt line cannot
    /// take the whole store down.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::default();

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            for (line_no, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Record>(line) {
                    Ok(record) => {
                        inner.order.push(record.id.clone());
                        inner.records.insert(record.id.clone(), record);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), line = line_no + 1, %e, "skipping bad record");
                    }
                }
            }
        }

        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        let mut file = std::fs::File::create(&self.path)?;
        for id in &inner.order {
            if let Some(record) = inner.records.get(id) {
                serde_json::to_writer(&mut file, record)?;
                file.write_all(b"\n")?;
            }
        }
        file.flush()?;
        Ok(())
    }
}

impl Store for FileStore {
    fn insert(&self, record: Record) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.id) {
            return Err(StorageError::Duplicate(record.id));
        }
        inner.order.push(record.id.clone());
        inner.records.insert(record.id.clone(), record);
        self.persist(&inner)
    }

    fn update(&self, id: &str, data: Value) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.records.get_mut(id) {
            Some(record) => {
                record.data = data;
                record.timestamp = Utc::now();
                self.persist(&inner)?;
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
        self.persist(&inner)?;
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
        let removed = before - inner.records.len();
        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, data: serde_json::Value) -> Record {
        Record::new(id, "test_kind", Value::from(&data), "test")
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        {
            let store = FileStore::open(&path).unwrap();
            store.insert(record("r1", serde_json::json!({"v": 1}))).unwrap();
            store.insert(record("r2", serde_json::json!({"v": 2}))).unwrap();
            store.remove("r1").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        let r2 = reopened.find("r2").unwrap().unwrap();
        assert_eq!(r2.data.get("v").as_i64(), Some(2));
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        {
            let store = FileStore::open(&path).unwrap();
            store.insert(record("r1", serde_json::json!({}))).unwrap();
        }
        // Corrupt the file with a partial line.
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{\"id\": \"broken\"\n");
        std::fs::write(&path, text).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        assert!(reopened.find("r1").unwrap().is_some());
    }

    #[test]
    fn update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        let store = FileStore::open(&path).unwrap();
        store.insert(record("r1", serde_json::json!({"v": 1}))).unwrap();
        store
            .update("r1", Value::from(&serde_json::json!({"v": 9})))
            .unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.find("r1").unwrap().unwrap().data.get("v").as_i64(),
            Some(9)
        );
    }
}
