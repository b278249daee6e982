// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine settings, stored in the `syncSettings` collection.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::storage::traits::ObjectStore;
use crate::storage::SYNC_SETTINGS;

pub const LAST_SYNC_TIMESTAMP: &str = "lastSyncTimestamp";
pub const DEVICE_ID: &str = "deviceId";
pub const CONTINUOUS_SYNC_ENABLED: &str = "continuousSyncEnabled";
pub const LOG_CURSOR: &str = "logCursor";

#[derive(Clone)]
pub struct SyncSettingStore {
    store: Arc<dyn ObjectStore>,
}

impl SyncSettingStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn store_setting<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store
            .create(SYNC_SETTINGS, key, json!({"key": key, "value": value}))
            .await?;
        Ok(())
    }

    pub async fn retrieve_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(mut row) = self.store.get(SYNC_SETTINGS, key).await? else {
            return Ok(None);
        };
        match row.get_mut("value").map(serde_json::Value::take) {
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}
