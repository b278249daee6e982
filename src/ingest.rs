// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote event ingestion.
//!
//! The backend pushes user messages when something relevant happened on
//! another device or account: the user joined a shared collection, or
//! created an annotation elsewhere. Each message materializes local rows.
//!
//! Messages are processed one at a time behind the `processing` gate. A
//! second message waits for the first to finish, then runs; nothing is
//! batched.
//!
//! If the referenced remote object is gone by the time it is fetched the
//! message is dropped as a benign race.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SharingError};
use crate::metrics;
use crate::remote::{ContentSharingBackend, SharedAnnotationReference, SharedListReference};
use crate::storage::local::{Annotation, LocalData, LocalList};
use crate::storage::sharing::{AnnotationSharingMetadata, SharingStore};

/// Closed vocabulary of pushed user messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UserMessage {
    #[serde(rename_all = "camelCase")]
    JoinedCollection { shared_list_id: String },
    #[serde(rename_all = "camelCase")]
    CreatedAnnotation { shared_annotation_id: String },
}

impl UserMessage {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinedCollection { .. } => "joined-collection",
            Self::CreatedAnnotation { .. } => "created-annotation",
        }
    }
}

/// Local id for an annotation created on another device.
#[must_use]
pub fn annotation_local_id(normalized_page_url: &str, created_when: i64) -> String {
    format!("{normalized_page_url}/#{created_when}")
}

pub struct RemoteEventIngestor {
    backend: Arc<dyn ContentSharingBackend>,
    local: LocalData,
    sharing: SharingStore,
    processing: AsyncMutex<()>,
}

impl RemoteEventIngestor {
    pub fn new(backend: Arc<dyn ContentSharingBackend>, local: LocalData, sharing: SharingStore) -> Self {
        Self {
            backend,
            local,
            sharing,
            processing: AsyncMutex::new(()),
        }
    }

    /// Process one message. Benign races resolve to `Ok(())`.
    #[instrument(skip(self, message), fields(kind = message.kind()))]
    pub async fn process_user_message(&self, message: &UserMessage) -> Result<()> {
        let _processing = self.processing.lock().await;
        let kind = message.kind();

        let result = match message {
            UserMessage::JoinedCollection { shared_list_id } => self.joined_collection(shared_list_id).await,
            UserMessage::CreatedAnnotation { shared_annotation_id } => {
                self.created_annotation(shared_annotation_id).await
            }
        };

        match result {
            Ok(true) => {
                metrics::record_user_message(kind, "applied");
                Ok(())
            }
            Ok(false) => {
                metrics::record_user_message(kind, "skipped");
                Ok(())
            }
            Err(SharingError::BenignRace(what)) => {
                debug!(what, "Remote object vanished before it could be fetched");
                metrics::record_user_message(kind, "vanished");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to process user message");
                metrics::record_user_message(kind, "error");
                Err(e)
            }
        }
    }

    /// Resolve once any in-flight message finished processing.
    pub async fn wait_for_idle(&self) {
        drop(self.processing.lock().await);
    }

    async fn joined_collection(&self, shared_list_id: &str) -> Result<bool> {
        let reference = SharedListReference {
            id: shared_list_id.to_string(),
        };
        let list = self
            .backend
            .get_list_by_reference(&reference)
            .await?
            .ok_or_else(|| SharingError::BenignRace(format!("shared list {shared_list_id}")))?;

        let remote_id = self.backend.shared_list_link_id(&reference);
        if self.sharing.get_local_list_id(&remote_id).await?.is_some() {
            debug!(remote_id, "Joined list already present locally");
            return Ok(false);
        }

        let local_id = self.fresh_list_id().await?;
        self.sharing.store_list_id(local_id, &remote_id).await?;
        self.local
            .insert_custom_list(&LocalList {
                id: local_id,
                name: list.title,
                created_at: Some(crate::queue::now_millis()),
            })
            .await?;

        info!(local_id, remote_id, "Joined shared list");
        Ok(true)
    }

    async fn created_annotation(&self, shared_annotation_id: &str) -> Result<bool> {
        let reference = SharedAnnotationReference {
            id: shared_annotation_id.to_string(),
        };
        let annotation = self
            .backend
            .get_annotation(&reference)
            .await?
            .ok_or_else(|| SharingError::BenignRace(format!("shared annotation {shared_annotation_id}")))?;

        let local_id = annotation_local_id(&annotation.normalized_page_url, annotation.created_when);
        self.sharing
            .store_annotation_metadata(&[AnnotationSharingMetadata {
                local_id: local_id.clone(),
                remote_id: self.backend.shared_annotation_link_id(&reference),
                exclude_from_lists: false,
            }])
            .await?;

        // Selectors travel as serialized JSON
        let selector = annotation
            .selector
            .map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)));
        self.local
            .create_annotation(&Annotation {
                url: local_id.clone(),
                page_url: annotation.normalized_page_url,
                body: annotation.body,
                comment: annotation.comment,
                selector,
                created_when: Some(annotation.created_when),
            })
            .await?;

        info!(local_id, "Materialized remotely created annotation");
        Ok(true)
    }

    /// Current epoch millis, bumped past ids already taken.
    async fn fresh_list_id(&self) -> Result<i64> {
        let mut id = crate::queue::now_millis();
        while self.local.fetch_list_by_id(id).await?.is_some() {
            id += 1;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::InMemoryBackend;
    use crate::remote::{SharedAnnotation, UserReference};
    use crate::storage::memory::InMemoryStore;
    use serde_json::json;

    struct Harness {
        backend: Arc<InMemoryBackend>,
        local: LocalData,
        sharing: SharingStore,
        ingestor: Arc<RemoteEventIngestor>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let backend = Arc::new(InMemoryBackend::new());
        let local = LocalData::new(store.clone());
        let sharing = SharingStore::new(store);
        let ingestor = Arc::new(RemoteEventIngestor::new(backend.clone(), local.clone(), sharing.clone()));
        Harness { backend, local, sharing, ingestor }
    }

    #[test]
    fn test_message_wire_format() {
        let message: UserMessage =
            serde_json::from_value(json!({"type": "joined-collection", "sharedListId": "list-1"})).unwrap();
        assert_eq!(message, UserMessage::JoinedCollection { shared_list_id: "list-1".into() });
        assert_eq!(message.kind(), "joined-collection");

        let value = serde_json::to_value(UserMessage::CreatedAnnotation {
            shared_annotation_id: "annotation-1".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "created-annotation");
        assert_eq!(value["sharedAnnotationId"], "annotation-1");
    }

    #[tokio::test]
    async fn test_joined_collection_creates_local_list_once() {
        let h = harness();
        let reference = h.backend.insert_list("Team reading", &UserReference::new("other"));
        let message = UserMessage::JoinedCollection { shared_list_id: reference.id.clone() };

        h.ingestor.process_user_message(&message).await.unwrap();
        h.ingestor.process_user_message(&message).await.unwrap();

        let lists = h.sharing.get_all_remote_list_ids().await.unwrap();
        assert_eq!(lists.len(), 1);
        let (local_id, remote_id) = lists.into_iter().next().unwrap();
        assert_eq!(remote_id, reference.id);
        let list = h.local.fetch_list_by_id(local_id).await.unwrap().unwrap();
        assert_eq!(list.name, "Team reading");
    }

    #[tokio::test]
    async fn test_created_annotation_materializes_row_and_mapping() {
        let h = harness();
        let reference = h.backend.insert_annotation(SharedAnnotation {
            normalized_page_url: "a.com".into(),
            created_when: 1_234,
            body: Some("quote".into()),
            comment: Some("nice".into()),
            selector: Some(r#"{"quote":"quote"}"#.into()),
            creator: UserReference::new("u1"),
        });

        h.ingestor
            .process_user_message(&UserMessage::CreatedAnnotation {
                shared_annotation_id: reference.id.clone(),
            })
            .await
            .unwrap();

        let annotation = h.local.get_annotation_by_pk("a.com/#1234").await.unwrap().unwrap();
        assert_eq!(annotation.comment.as_deref(), Some("nice"));
        assert_eq!(annotation.selector, Some(json!({"quote": "quote"})));

        let meta = h
            .sharing
            .get_remote_annotation_metadata(&["a.com/#1234".into()])
            .await
            .unwrap();
        assert_eq!(meta["a.com/#1234"].remote_id, reference.id);
        assert!(!meta["a.com/#1234"].exclude_from_lists);
    }

    #[tokio::test]
    async fn test_vanished_remote_objects_are_swallowed() {
        let h = harness();
        h.ingestor
            .process_user_message(&UserMessage::JoinedCollection { shared_list_id: "gone".into() })
            .await
            .unwrap();
        h.ingestor
            .process_user_message(&UserMessage::CreatedAnnotation { shared_annotation_id: "gone".into() })
            .await
            .unwrap();

        assert!(h.sharing.get_all_remote_list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_messages_are_serialized() {
        let h = harness();
        let reference = h.backend.insert_list("Shared", &UserReference::new("other"));
        let message = UserMessage::JoinedCollection { shared_list_id: reference.id.clone() };

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ingestor = h.ingestor.clone();
            let message = message.clone();
            handles.push(tokio::spawn(async move { ingestor.process_user_message(&message).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(h.sharing.get_all_remote_list_ids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let h = harness();
        h.backend.reject_matching(Some(""));
        let result = h
            .ingestor
            .process_user_message(&UserMessage::JoinedCollection { shared_list_id: "x".into() })
            .await;
        assert!(matches!(result, Err(SharingError::RemoteCall(_))));
    }
}
