// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::action::{Action, QueueEntry};
use super::traits::{ActionQueueStore, ObjectStore, Query, StorageError, StoredObject};

/// In-memory document store. Objects are kept per collection in key order.
pub struct InMemoryStore {
    collections: DashMap<String, BTreeMap<String, Value>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
        }
    }

    /// Number of objects in a collection
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Check if a collection is empty
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Clear all collections
    pub fn clear(&self) {
        self.collections.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|c| c.get(key).cloned()))
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<StoredObject>, StorageError> {
        let Some(objects) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .filter(|(_, value)| query.matches(value))
            .map(|(key, value)| StoredObject {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn create(&self, collection: &str, key: &str, object: Value) -> Result<(), StorageError> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), object);
        Ok(())
    }

    async fn update(&self, collection: &str, key: &str, updates: Value) -> Result<(), StorageError> {
        let mut objects = self
            .collections
            .get_mut(collection)
            .ok_or(StorageError::NotFound)?;
        let existing = objects.get_mut(key).ok_or(StorageError::NotFound)?;

        match (existing, updates) {
            (Value::Object(target), Value::Object(fields)) => {
                for (field, value) in fields {
                    target.insert(field, value);
                }
                Ok(())
            }
            _ => Err(StorageError::Backend(format!(
                "update on {collection}/{key} requires object values"
            ))),
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        if let Some(mut objects) = self.collections.get_mut(collection) {
            objects.remove(key);
        }
        Ok(())
    }
}

/// Non-durable action queue, for tests and hosts without a disk.
pub struct InMemoryActionQueue {
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    next_id: i64,
    entries: BTreeMap<i64, Action>,
}

impl InMemoryActionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Snapshot of queued actions, oldest first
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.inner.lock().entries.values().cloned().collect()
    }
}

impl Default for InMemoryActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionQueueStore for InMemoryActionQueue {
    async fn enqueue(&self, action: &Action) -> Result<i64, StorageError> {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.insert(id, action.clone());
        Ok(id)
    }

    async fn peek_oldest(&self) -> Result<Option<QueueEntry>, StorageError> {
        Ok(self
            .inner
            .lock()
            .entries
            .first_key_value()
            .map(|(id, action)| QueueEntry {
                id: *id,
                action: action.clone(),
            }))
    }

    async fn remove(&self, id: i64) -> Result<(), StorageError> {
        self.inner.lock().entries.remove(&id);
        Ok(())
    }

    async fn len(&self) -> Result<u64, StorageError> {
        Ok(self.inner.lock().entries.len() as u64)
    }
}
