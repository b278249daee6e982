// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Startup, draining and the hooks the host feeds events into.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cdc::{StorageChangeEvent, StorageChangeListener};
use crate::error::Result;
use crate::ingest::UserMessage;

use super::ContentSharing;

impl ContentSharing {
    /// Resume whatever a previous process left in the queue.
    ///
    /// Never fails: a drain error is logged and the retry timer takes over.
    #[instrument(skip(self))]
    pub async fn setup(&self) {
        match self.scheduler.pending_count().await {
            Ok(0) => {}
            Ok(pending) => info!(pending, "Resuming queued sharing actions"),
            Err(e) => warn!(error = %e, "Could not count pending sharing actions"),
        }
        if let Err(e) = self.execute_pending_actions().await {
            warn!(error = %e, "Error while executing pending sharing actions");
        }
    }

    /// Resolve once the queue drained and no user message is in flight.
    pub async fn wait_for_sync(&self) -> Result<()> {
        self.scheduler.wait_for_idle().await?;
        self.ingestor.wait_for_idle().await;
        Ok(())
    }

    /// Drain the queue now, or join the drain already running.
    pub async fn execute_pending_actions(&self) -> Result<()> {
        self.scheduler.execute_pending_actions().await
    }

    /// Cancel a pending retry timer and drain right away.
    pub async fn force_pending_actions_retry(&self) -> Result<()> {
        self.scheduler.force_pending_actions_retry().await
    }

    /// Storage hook: call after every committed batch of local writes.
    pub async fn handle_post_storage_change(&self, event: &StorageChangeEvent) -> Result<()> {
        self.watcher.handle_post_storage_change(event).await
    }

    /// Apply one message pushed by the backend.
    pub async fn process_user_message(&self, message: &UserMessage) -> Result<()> {
        self.ingestor.process_user_message(message).await
    }

    /// Feed messages from `messages` into [`Self::process_user_message`]
    /// until the channel closes or the facade is dropped. Failures are
    /// logged; the message is not retried.
    pub fn listen_user_messages(self: &Arc<Self>, mut messages: mpsc::UnboundedReceiver<UserMessage>) -> JoinHandle<()> {
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let Some(this) = this.upgrade() else {
                    break;
                };
                if let Err(e) = this.process_user_message(&message).await {
                    warn!(kind = message.kind(), error = %e, "Dropping user message");
                }
            }
            debug!("User message listener stopped");
        })
    }
}

#[async_trait]
impl StorageChangeListener for ContentSharing {
    async fn handle_change(&self, event: &StorageChangeEvent) -> Result<()> {
        self.handle_post_storage_change(event).await
    }
}
