// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation logs for continuous sync.
//!
//! Every local write to a synced collection lands in the [`ClientSyncLog`]
//! marked as needing sync. A sync round pushes those entries to the
//! [`SharedSyncLog`], then pulls what other devices of the same user wrote
//! since this device's cursor.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cdc::StorageChange;
use crate::error::{Result, SharingError};
use crate::remote::UserReference;

/// A local change waiting to be pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientLogEntry {
    pub seq: u64,
    pub created_on: i64,
    pub change: StorageChange,
    pub needs_sync: bool,
}

/// A change as stored in the shared log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLogEntry {
    pub device_id: String,
    pub created_on: i64,
    pub change: StorageChange,
}

/// Entries pulled in one request, plus the cursor to continue from.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedLogBatch {
    pub entries: Vec<SharedLogEntry>,
    pub cursor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub platform: String,
}

/// This device's log of local changes.
#[async_trait]
pub trait ClientSyncLog: Send + Sync {
    async fn append(&self, created_on: i64, changes: &[StorageChange]) -> Result<()>;
    /// Oldest entries still needing sync, at most `limit`.
    async fn get_unsynced(&self, limit: usize) -> Result<Vec<ClientLogEntry>>;
    async fn mark_synced(&self, seqs: &[u64]) -> Result<()>;
}

/// The per-user append-only log shared by all devices.
#[async_trait]
pub trait SharedSyncLog: Send + Sync {
    async fn create_device_id(&self, user: &UserReference, platform: &str) -> Result<String>;
    async fn write_entries(&self, user: &UserReference, entries: Vec<SharedLogEntry>) -> Result<()>;
    /// Entries written by other devices after `cursor`, at most `limit`.
    async fn get_unsynced_entries(
        &self,
        user: &UserReference,
        device_id: &str,
        cursor: u64,
        limit: usize,
    ) -> Result<SharedLogBatch>;
    async fn list_devices(&self, user: &UserReference) -> Result<Vec<DeviceInfo>>;
    async fn remove_device(&self, user: &UserReference, device_id: &str) -> Result<()>;
}

/// In-memory [`ClientSyncLog`].
#[derive(Default)]
pub struct MemoryClientSyncLog {
    entries: Mutex<Vec<ClientLogEntry>>,
}

impl MemoryClientSyncLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ClientLogEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl ClientSyncLog for MemoryClientSyncLog {
    async fn append(&self, created_on: i64, changes: &[StorageChange]) -> Result<()> {
        let mut entries = self.entries.lock();
        for change in changes {
            let seq = entries.last().map_or(1, |e| e.seq + 1);
            entries.push(ClientLogEntry {
                seq,
                created_on,
                change: change.clone(),
                needs_sync: true,
            });
        }
        Ok(())
    }

    async fn get_unsynced(&self, limit: usize) -> Result<Vec<ClientLogEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.needs_sync)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, seqs: &[u64]) -> Result<()> {
        let seqs: BTreeSet<u64> = seqs.iter().copied().collect();
        for entry in self.entries.lock().iter_mut() {
            if seqs.contains(&entry.seq) {
                entry.needs_sync = false;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct UserLog {
    /// Position in the vec + 1 is the cursor value after that entry
    entries: Vec<SharedLogEntry>,
    devices: BTreeMap<String, DeviceInfo>,
}

/// In-memory [`SharedSyncLog`]; one instance can serve several devices.
#[derive(Default)]
pub struct MemorySharedSyncLog {
    users: Mutex<BTreeMap<String, UserLog>>,
}

impl MemorySharedSyncLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a user's log.
    #[must_use]
    pub fn len(&self, user: &UserReference) -> usize {
        self.users.lock().get(&user.id).map_or(0, |log| log.entries.len())
    }
}

#[async_trait]
impl SharedSyncLog for MemorySharedSyncLog {
    async fn create_device_id(&self, user: &UserReference, platform: &str) -> Result<String> {
        let device_id = uuid::Uuid::new_v4().to_string();
        self.users.lock().entry(user.id.clone()).or_default().devices.insert(
            device_id.clone(),
            DeviceInfo {
                device_id: device_id.clone(),
                platform: platform.to_string(),
            },
        );
        Ok(device_id)
    }

    async fn write_entries(&self, user: &UserReference, entries: Vec<SharedLogEntry>) -> Result<()> {
        let mut users = self.users.lock();
        let log = users.entry(user.id.clone()).or_default();
        for entry in &entries {
            if !log.devices.contains_key(&entry.device_id) {
                return Err(SharingError::Sync(format!("unknown device {}", entry.device_id)));
            }
        }
        log.entries.extend(entries);
        Ok(())
    }

    async fn get_unsynced_entries(
        &self,
        user: &UserReference,
        device_id: &str,
        cursor: u64,
        limit: usize,
    ) -> Result<SharedLogBatch> {
        let users = self.users.lock();
        let Some(log) = users.get(&user.id) else {
            return Ok(SharedLogBatch { entries: Vec::new(), cursor });
        };

        let mut entries = Vec::new();
        let mut next = cursor;
        for (index, entry) in log.entries.iter().enumerate().skip(cursor as usize) {
            if entries.len() == limit {
                break;
            }
            next = index as u64 + 1;
            if entry.device_id != device_id {
                entries.push(entry.clone());
            }
        }
        Ok(SharedLogBatch { entries, cursor: next })
    }

    async fn list_devices(&self, user: &UserReference) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .users
            .lock()
            .get(&user.id)
            .map(|log| log.devices.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_device(&self, user: &UserReference, device_id: &str) -> Result<()> {
        if let Some(log) = self.users.lock().get_mut(&user.id) {
            log.devices.remove(device_id);
        }
        Ok(())
    }
}
