// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for sharing and sync operations.
//!
//! # Error Categories
//!
//! - [`SharingError::AuthRequired`] - no logged-in user; the current action
//!   is not applied and the queue halts until the next retry
//! - [`SharingError::RemoteCall`] - backend/network failure; triggers retry
//!   scheduling, later actions wait behind the failing one
//! - [`SharingError::NotShared`] - the operation needs a remote mapping that
//!   does not exist; returned straight to the caller, never queued
//! - [`SharingError::BenignRace`] - a remote object vanished between being
//!   referenced and fetched; swallowed by the event ingestor

use thiserror::Error;

use crate::storage::traits::StorageError;

/// Result type alias for sharing operations
pub type Result<T> = std::result::Result<T, SharingError>;

#[derive(Error, Debug)]
pub enum SharingError {
    #[error("tried to execute sharing action without being authenticated")]
    AuthRequired,

    #[error("remote call failed: {0}")]
    RemoteCall(String),

    #[error("not shared: {0}")]
    NotShared(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote object vanished: {0}")]
    BenignRace(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sync failed: {0}")]
    Sync(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl SharingError {
    /// Whether the failure is worth retrying later (as opposed to a caller bug).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::RemoteCall(_) | Self::Storage(_) | Self::Task(_)
        )
    }
}

impl From<tokio::task::JoinError> for SharingError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            SharingError::AuthRequired.to_string(),
            "tried to execute sharing action without being authenticated"
        );
        assert_eq!(
            SharingError::RemoteCall("boom".into()).to_string(),
            "remote call failed: boom"
        );
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SharingError = StorageError::Backend("disk full".into()).into();
        assert!(matches!(err, SharingError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_shared_is_not_retryable() {
        assert!(!SharingError::NotShared("list 1".into()).is_retryable());
        assert!(!SharingError::BenignRace("gone".into()).is_retryable());
    }
}
