// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content sharing facade.
//!
//! [`ContentSharing`] is what the UI and background callers talk to. It
//! wires together:
//! - the durable action queue and its [`QueueScheduler`]
//! - the [`ActionExecutor`] with its ensured-page cache
//! - the [`ChangeWatcher`] reacting to committed local writes
//! - the [`RemoteEventIngestor`] for pushed user messages
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sharing_sync_engine::{ContentSharing, SharingEngineConfig};
//! use sharing_sync_engine::remote::memory::{InMemoryBackend, RecordingActivityStreams, StaticAuth};
//! use sharing_sync_engine::storage::memory::InMemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() -> sharing_sync_engine::Result<()> {
//! let sharing = ContentSharing::open(
//!     SharingEngineConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryBackend::new()),
//!     Arc::new(StaticAuth::logged_in("user-1")),
//!     Arc::new(RecordingActivityStreams::new()),
//! )
//! .await?;
//!
//! sharing.setup().await;
//! let remote_id = sharing.share_list(1).await;
//! # Ok(())
//! # }
//! ```

pub mod types;
mod api;
mod lifecycle;

pub use types::{ContentSharingEvent, RemoteListInfo};

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::cdc::adapter::ChangeWatcher;
use crate::config::SharingEngineConfig;
use crate::error::Result;
use crate::ingest::RemoteEventIngestor;
use crate::queue::{ActionExecutor, QueueScheduler, SchedulerStatus};
use crate::remote::{ActivityStreams, AuthProvider, ContentSharingBackend};
use crate::storage::local::LocalData;
use crate::storage::memory::InMemoryActionQueue;
use crate::storage::sharing::SharingStore;
use crate::storage::sql::SqliteActionQueue;
use crate::storage::traits::{ActionQueueStore, ObjectStore};

pub struct ContentSharing {
    config: SharingEngineConfig,
    local: LocalData,
    sharing: SharingStore,
    executor: Arc<ActionExecutor>,
    scheduler: Arc<QueueScheduler>,
    watcher: ChangeWatcher,
    ingestor: RemoteEventIngestor,
    events: broadcast::Sender<ContentSharingEvent>,
}

impl ContentSharing {
    /// Build the facade over an already opened action queue.
    pub fn new(
        config: SharingEngineConfig,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn ActionQueueStore>,
        backend: Arc<dyn ContentSharingBackend>,
        auth: Arc<dyn AuthProvider>,
        activity: Arc<dyn ActivityStreams>,
    ) -> Self {
        let local = LocalData::new(store.clone());
        let sharing = SharingStore::new(store);
        let executor = Arc::new(ActionExecutor::new(backend.clone(), auth, activity, sharing.clone()));
        let scheduler = QueueScheduler::new(queue, executor.clone(), config.action_retry_interval());
        let (events, _) = broadcast::channel(256);

        let watcher = ChangeWatcher::new(
            local.clone(),
            sharing.clone(),
            scheduler.clone(),
            events.clone(),
            config.process_sync_changes,
        );
        let ingestor = RemoteEventIngestor::new(backend, local.clone(), sharing.clone());

        Self {
            config,
            local,
            sharing,
            executor,
            scheduler,
            watcher,
            ingestor,
            events,
        }
    }

    /// Build the facade, opening the action queue `config.queue_path`
    /// points at (an in-memory queue when unset).
    pub async fn open(
        config: SharingEngineConfig,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn ContentSharingBackend>,
        auth: Arc<dyn AuthProvider>,
        activity: Arc<dyn ActivityStreams>,
    ) -> Result<Self> {
        let queue: Arc<dyn ActionQueueStore> = match config.queue_path.as_deref() {
            Some(path) => {
                let queue = SqliteActionQueue::open(path).await?;
                info!(path, "Opened durable action queue");
                Arc::new(queue)
            }
            None => Arc::new(InMemoryActionQueue::new()),
        };
        Ok(Self::new(config, store, queue, backend, auth, activity))
    }

    #[must_use]
    pub fn config(&self) -> &SharingEngineConfig {
        &self.config
    }

    #[must_use]
    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    /// Number of actions still waiting in the queue.
    pub async fn pending_action_count(&self) -> Result<u64> {
        self.scheduler.pending_count().await
    }

    /// Subscribe to [`ContentSharingEvent`]s.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ContentSharingEvent> {
        self.events.subscribe()
    }
}
