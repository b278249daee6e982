// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Post-commit storage change events.
//!
//! The host reports every committed write batch as one
//! [`StorageChangeEvent`]. Consumers implement [`StorageChangeListener`]:
//! the sharing [`ChangeWatcher`](adapter::ChangeWatcher) turns changes into
//! queued actions, the sync service records local changes in its operation
//! log.
//!
//! # Event Shape
//!
//! ```text
//! StorageChangeEvent
//!   origin   Local | Sync        # Sync = written while applying a remote batch
//!   changes  [
//!     Create { collection, pk, values }
//!     Modify { collection, pks, updates }
//!     Delete { collection, pks }
//!   ]
//! ```
//!
//! Primary keys are carried as JSON values (`42`, `"a.com/#1"`, or compound
//! `[7, "a.com"]`) and turned into store keys with
//! [`object_key`](crate::storage::object_key).

pub mod adapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Who made the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// The user, on this device
    #[default]
    Local,
    /// The sync engine applying changes from another device
    Sync,
}

/// Kind of a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Modify,
    Delete,
}

impl ChangeOp {
    /// Returns the string representation used in logs and the operation log
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Create => "create",
            ChangeOp::Modify => "modify",
            ChangeOp::Delete => "delete",
        }
    }
}

/// One committed change to one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageChange {
    Create {
        collection: String,
        pk: Value,
        values: Value,
    },
    Modify {
        collection: String,
        pks: Vec<Value>,
        updates: Value,
    },
    Delete {
        collection: String,
        pks: Vec<Value>,
    },
}

impl StorageChange {
    pub fn create(collection: impl Into<String>, pk: Value, values: Value) -> Self {
        Self::Create {
            collection: collection.into(),
            pk,
            values,
        }
    }

    pub fn modify(collection: impl Into<String>, pks: Vec<Value>, updates: Value) -> Self {
        Self::Modify {
            collection: collection.into(),
            pks,
            updates,
        }
    }

    pub fn delete(collection: impl Into<String>, pks: Vec<Value>) -> Self {
        Self::Delete {
            collection: collection.into(),
            pks,
        }
    }

    #[must_use]
    pub fn op(&self) -> ChangeOp {
        match self {
            Self::Create { .. } => ChangeOp::Create,
            Self::Modify { .. } => ChangeOp::Modify,
            Self::Delete { .. } => ChangeOp::Delete,
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. }
            | Self::Modify { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }
}

/// A committed write batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageChangeEvent {
    pub origin: ChangeOrigin,
    pub changes: Vec<StorageChange>,
}

impl StorageChangeEvent {
    pub fn local(changes: Vec<StorageChange>) -> Self {
        Self {
            origin: ChangeOrigin::Local,
            changes,
        }
    }

    pub fn from_sync(changes: Vec<StorageChange>) -> Self {
        Self {
            origin: ChangeOrigin::Sync,
            changes,
        }
    }
}

/// Something reacting to committed writes.
#[async_trait]
pub trait StorageChangeListener: Send + Sync {
    async fn handle_change(&self, event: &StorageChangeEvent) -> Result<()>;
}
