// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sharing queue and sync engine.
//!
//! # Example
//!
//! ```
//! use sharing_sync_engine::SharingEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SharingEngineConfig::default();
//! assert_eq!(config.action_retry_interval_secs, 5 * 60);
//! assert_eq!(config.continuous_sync_batch_size, 50);
//!
//! // Durable queue on disk, faster retries
//! let config = SharingEngineConfig {
//!     queue_path: Some("./sharing_queue.db".into()),
//!     action_retry_interval_secs: 30,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the sharing engine.
///
/// All fields have sensible defaults. For production use, set `queue_path`
/// so pending actions survive a process restart.
#[derive(Debug, Clone, Deserialize)]
pub struct SharingEngineConfig {
    /// SQLite file backing the action queue (in-memory queue when unset)
    #[serde(default)]
    pub queue_path: Option<String>,

    /// Delay before a failed drain is retried (default: 5 minutes)
    #[serde(default = "default_action_retry_interval_secs")]
    pub action_retry_interval_secs: u64,

    /// Max list entries per `add-shared-list-entries` action
    #[serde(default = "default_list_entry_chunk_size")]
    pub list_entry_chunk_size: usize,

    /// React to storage changes written by the sync engine itself.
    /// Off by default so synced writes are not pushed back to the backend.
    #[serde(default)]
    pub process_sync_changes: bool,

    /// Base URL for shared note links
    #[serde(default = "default_note_share_base_url")]
    pub note_share_base_url: String,

    /// Max operation-log entries pushed or pulled per round trip
    #[serde(default = "default_continuous_sync_batch_size")]
    pub continuous_sync_batch_size: usize,

    /// Interval between incremental sync rounds once enabled
    #[serde(default = "default_incremental_sync_interval_secs")]
    pub incremental_sync_interval_secs: u64,

    /// How long initial sync waits for the peer to show up
    #[serde(default = "default_initial_sync_channel_timeout_ms")]
    pub initial_sync_channel_timeout_ms: u64,

    /// How long initial sync waits for the next data package
    #[serde(default = "default_initial_sync_package_timeout_ms")]
    pub initial_sync_package_timeout_ms: u64,

    /// How long sync setup waits for a login before giving up
    #[serde(default = "default_auth_wait_ms")]
    pub auth_wait_ms: u64,

    /// Stable device identifier for the operation log (generated when unset)
    #[serde(default)]
    pub device_id: Option<String>,
}

fn default_action_retry_interval_secs() -> u64 { 5 * 60 }
fn default_list_entry_chunk_size() -> usize { 100 }
fn default_note_share_base_url() -> String { "https://memex.social".to_string() }
fn default_continuous_sync_batch_size() -> usize { 50 }
fn default_incremental_sync_interval_secs() -> u64 { 20 * 60 }
fn default_initial_sync_channel_timeout_ms() -> u64 { 30_000 }
fn default_initial_sync_package_timeout_ms() -> u64 { 20_000 }
fn default_auth_wait_ms() -> u64 { 2_000 }

impl Default for SharingEngineConfig {
    fn default() -> Self {
        Self {
            queue_path: None,
            action_retry_interval_secs: default_action_retry_interval_secs(),
            list_entry_chunk_size: default_list_entry_chunk_size(),
            process_sync_changes: false,
            note_share_base_url: default_note_share_base_url(),
            continuous_sync_batch_size: default_continuous_sync_batch_size(),
            incremental_sync_interval_secs: default_incremental_sync_interval_secs(),
            initial_sync_channel_timeout_ms: default_initial_sync_channel_timeout_ms(),
            initial_sync_package_timeout_ms: default_initial_sync_package_timeout_ms(),
            auth_wait_ms: default_auth_wait_ms(),
            device_id: None,
        }
    }
}

impl SharingEngineConfig {
    #[must_use]
    pub fn action_retry_interval(&self) -> Duration {
        Duration::from_secs(self.action_retry_interval_secs)
    }

    #[must_use]
    pub fn incremental_sync_interval(&self) -> Duration {
        Duration::from_secs(self.incremental_sync_interval_secs)
    }

    #[must_use]
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_sync_channel_timeout_ms)
    }

    #[must_use]
    pub fn package_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_sync_package_timeout_ms)
    }

    #[must_use]
    pub fn auth_wait(&self) -> Duration {
        Duration::from_millis(self.auth_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SharingEngineConfig::default();
        assert!(config.queue_path.is_none());
        assert_eq!(config.action_retry_interval(), Duration::from_secs(300));
        assert_eq!(config.list_entry_chunk_size, 100);
        assert!(!config.process_sync_changes);
        assert_eq!(config.auth_wait(), Duration::from_secs(2));
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: SharingEngineConfig = serde_json::from_str(
            r#"{"queue_path": "/tmp/q.db", "action_retry_interval_secs": 10}"#,
        )
        .unwrap();

        assert_eq!(config.queue_path.as_deref(), Some("/tmp/q.db"));
        assert_eq!(config.action_retry_interval_secs, 10);
        assert_eq!(config.continuous_sync_batch_size, 50);
        assert_eq!(config.note_share_base_url, "https://memex.social");
    }
}
