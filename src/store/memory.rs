//! In-process store.

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::store::{Store, StoreResult};

/// Records kept by [`MemoryStore::new`].
pub const DEFAULT_RECORD_CAPACITY: usize = 10_000;

/// Keeps everything in memory. Records are lost on restart.
///
/// Appended records form a ring: once `capacity` is reached the oldest
/// record is evicted for each new one. Keyed values are overwritten in place.
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<VecDeque<Value>>,
    capacity: usize,
    values: DashMap<String, Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECORD_CAPACITY)
    }

    /// Store keeping at most `capacity` records (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            values: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of every retained record, oldest first.
    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .expect("store lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl Store for MemoryStore {
    fn append(&self, record: Value) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut records = self.records.lock().expect("store lock poisoned");
            if records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(record);
            Ok(())
        })
    }

    fn save<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.values.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        Box::pin(async move { Ok(self.values.get(key).map(|v| v.value().clone())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_save() {
        let store = MemoryStore::new();
        store.append(json!({"n": 1})).await.unwrap();
        store.append(json!({"n": 2})).await.unwrap();
        assert_eq!(store.records(), vec![json!({"n": 1}), json!({"n": 2})]);

        assert_eq!(store.get("summary").await.unwrap(), None);
        store.save("summary", json!({"devices": 3})).await.unwrap();
        assert_eq!(store.get("summary").await.unwrap(), Some(json!({"devices": 3})));
    }

    #[tokio::test]
    async fn test_oldest_records_evicted_at_capacity() {
        let store = MemoryStore::with_capacity(3);
        for n in 1..=5 {
            store.append(json!({ "n": n })).await.unwrap();
        }
        assert_eq!(
            store.records(),
            vec![json!({"n": 3}), json!({"n": 4}), json!({"n": 5})]
        );

        // Keyed values are not subject to the record cap.
        for n in 0..5 {
            store.save(&format!("k{n}"), json!(n)).await.unwrap();
        }
        assert_eq!(store.get("k0").await.unwrap(), Some(json!(0)));
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let store = MemoryStore::with_capacity(0);
        assert_eq!(store.capacity(), 1);
        assert_eq!(MemoryStore::new().capacity(), DEFAULT_RECORD_CAPACITY);
    }
}
