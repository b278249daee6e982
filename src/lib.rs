// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Sharing Sync Engine
//!
//! Background reconciliation between a local annotation/list database and a
//! remote collaboration backend, plus device-to-device sync of the local
//! database.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ContentSharing facade                    │
//! │  • share / unshare / lookup operations                     │
//! │  • storage-change hook, user-message hook                  │
//! └─────────────────────────────────────────────────────────────┘
//!            │ local writes                    ▲ pushed messages
//!            ▼                                 │
//! ┌──────────────────────────────┐  ┌──────────────────────────┐
//! │     Change-Watcher Adapter   │  │   Remote Event Ingestor  │
//! │  • origin-filtered changes   │  │  • one message at a time │
//! │  • builds Actions            │  │  • materializes rows     │
//! └──────────────────────────────┘  └──────────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Durable Action Queue + Scheduler               │
//! │  • strict FIFO, queueing gate                              │
//! │  • single drain loop, fixed-interval retry timer           │
//! └─────────────────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Action Executor                       │
//! │  • one remote mutation per action                          │
//! │  • identity map, ensured-page cache                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`sync`] module is independent of the queue: it replicates the
//! local collections between devices of the same user, either with a
//! one-off initial transfer or with continuous incremental rounds against
//! a shared operation log. Writes it applies carry
//! [`ChangeOrigin::Sync`](cdc::ChangeOrigin) so the adapter does not push
//! them to the sharing backend again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sharing_sync_engine::{ContentSharing, SharingEngineConfig};
//! use sharing_sync_engine::remote::memory::{InMemoryBackend, RecordingActivityStreams, StaticAuth};
//! use sharing_sync_engine::storage::memory::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> sharing_sync_engine::Result<()> {
//!     let config = SharingEngineConfig {
//!         queue_path: Some("./sharing_queue.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let sharing = ContentSharing::open(
//!         config,
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(InMemoryBackend::new()),
//!         Arc::new(StaticAuth::logged_in("user-1")),
//!         Arc::new(RecordingActivityStreams::new()),
//!     )
//!     .await?;
//!
//!     // Replay what a previous run left queued
//!     sharing.setup().await;
//!
//!     let remote_list_id = sharing.share_list(1).await?;
//!     sharing.share_list_entries(1, None).await?;
//!     sharing.wait_for_sync().await?;
//!     println!("shared as {remote_list_id}");
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`ContentSharing`] facade
//! - [`action`]: the queued [`Action`] sum type and queue-interaction modes
//! - [`queue`]: executor and scheduler
//! - [`cdc`]: storage change events and the change-watcher adapter
//! - [`ingest`]: pushed user messages
//! - [`sync`]: initial and continuous device sync
//! - [`storage`]: object store contract, durable queue, typed views
//! - [`remote`]: backend, auth and activity-stream contracts
//! - [`resilience`]: retry logic

pub mod action;
pub mod cdc;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod queue;
pub mod remote;
pub mod resilience;
pub mod storage;
pub mod sync;

pub use action::{Action, CreatedWhen, QueueEntry, QueueInteraction};
pub use cdc::{ChangeOrigin, StorageChange, StorageChangeEvent, StorageChangeListener};
pub use config::SharingEngineConfig;
pub use coordinator::{ContentSharing, ContentSharingEvent, RemoteListInfo};
pub use error::{Result, SharingError};
pub use ingest::UserMessage;
pub use queue::SchedulerStatus;
pub use storage::traits::{ActionQueueStore, ObjectStore, StorageError};
pub use sync::{SyncEvent, SyncRole, SyncService};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
