// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::{Action, QueueEntry};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// An object as held by the document store, together with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub value: Value,
}

/// Field-equality filter for [`ObjectStore::find`].
///
/// An empty query matches every object in the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    conditions: Vec<(String, Value)>,
}

impl Query {
    /// Match everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality condition on a top-level field.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    #[must_use]
    pub fn matches(&self, object: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| object.get(field) == Some(expected))
    }
}

/// Generic key-indexed document store over named collections.
///
/// This is the host application's storage engine; the crate only relies on
/// the contract below. `create` overwrites an existing key, `update` merges
/// the given top-level fields into an existing object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError>;
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<StoredObject>, StorageError>;
    async fn create(&self, collection: &str, key: &str, object: Value) -> Result<(), StorageError>;
    async fn update(&self, collection: &str, key: &str, updates: Value) -> Result<(), StorageError>;
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError>;

    /// Fetch several keys at once, skipping missing ones.
    /// Default implementation falls back to sequential gets.
    async fn get_many(&self, collection: &str, keys: &[String]) -> Result<Vec<StoredObject>, StorageError> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(collection, key).await? {
                found.push(StoredObject { key: key.clone(), value });
            }
        }
        Ok(found)
    }
}

/// Durable FIFO of pending actions.
///
/// `peek_oldest` never removes: an action stays queued until `remove` is
/// called after it executed successfully, so a crash mid-execution replays it.
#[async_trait]
pub trait ActionQueueStore: Send + Sync {
    async fn enqueue(&self, action: &Action) -> Result<i64, StorageError>;
    async fn peek_oldest(&self) -> Result<Option<QueueEntry>, StorageError>;
    async fn remove(&self, id: i64) -> Result<(), StorageError>;
    async fn len(&self) -> Result<u64, StorageError>;

    async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }
}
