// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Action executor: turns one [`Action`] into remote calls.
//!
//! Every action resolves the current user first. Without one the action
//! fails with [`SharingError::AuthRequired`] before any remote call, so it is
//! never partially applied.
//!
//! Actions may be replayed after a crash (the queue only removes an entry
//! once it succeeded), so each variant is safe to apply twice: creating
//! entries or annotations again is deduplicated remotely, removals of
//! already-removed objects are no-ops.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use crate::action::{Action, PageInfo};
use crate::error::{Result, SharingError};
use crate::metrics::{self, LatencyTimer};
use crate::remote::{
    ActivityStreams, AuthProvider, ContentSharingBackend, FollowRequest, SharedAnnotationListEntry,
    UserReference,
};
use crate::storage::sharing::{AnnotationSharingMetadata, SharingStore};

pub struct ActionExecutor {
    backend: Arc<dyn ContentSharingBackend>,
    auth: Arc<dyn AuthProvider>,
    activity: Arc<dyn ActivityStreams>,
    sharing: SharingStore,
    /// normalized url → remote page id, for this process only
    ensured_pages: DashMap<String, String>,
}

impl ActionExecutor {
    pub fn new(
        backend: Arc<dyn ContentSharingBackend>,
        auth: Arc<dyn AuthProvider>,
        activity: Arc<dyn ActivityStreams>,
        sharing: SharingStore,
    ) -> Self {
        Self {
            backend,
            auth,
            activity,
            sharing,
            ensured_pages: DashMap::new(),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ContentSharingBackend> {
        &self.backend
    }

    /// The logged-in user, or `AuthRequired`.
    pub async fn require_user(&self) -> Result<UserReference> {
        self.auth.current_user().await?.ok_or(SharingError::AuthRequired)
    }

    /// Remote page id cached earlier in this process, if any.
    #[must_use]
    pub fn cached_page_id(&self, normalized_url: &str) -> Option<String> {
        self.ensured_pages.get(normalized_url).map(|id| id.clone())
    }

    /// Ensure the page exists remotely and cache its id. Cached pages do
    /// not hit the backend again.
    pub async fn ensure_page(&self, page: &PageInfo, user: &UserReference) -> Result<String> {
        if let Some(id) = self.cached_page_id(&page.normalized_url) {
            return Ok(id);
        }

        let reference = self.backend.ensure_page_info(page, user).await?;
        let id = self.backend.shared_page_info_link_id(&reference);
        self.ensured_pages.insert(page.normalized_url.clone(), id.clone());

        // Best-effort: a failed follow is logged and forgotten
        let activity = self.activity.clone();
        let request = FollowRequest {
            entity_type: "sharedPageInfo",
            entity_id: reference.id,
            home_feed: true,
        };
        tokio::spawn(async move {
            if let Err(e) = activity.follow_entity(request).await {
                warn!(error = %e, "Error following page");
            }
        });

        Ok(id)
    }

    /// Execute one action, recording its latency and outcome.
    #[instrument(skip(self, action), fields(kind = action.kind()))]
    pub async fn execute(&self, action: &Action) -> Result<()> {
        let kind = action.kind();
        let _timer = LatencyTimer::new(kind);

        let result = self.apply(action).await;
        metrics::record_action_executed(kind, result.is_ok());
        if let Err(e) = &result {
            warn!(kind, error = %e, "Sharing action failed");
        } else {
            debug!(kind, "Sharing action executed");
        }
        result
    }

    async fn apply(&self, action: &Action) -> Result<()> {
        let user = self.require_user().await?;
        let backend = &self.backend;

        match action {
            Action::EnsurePageInfo { data } => {
                for page in data {
                    if self.ensured_pages.contains_key(&page.normalized_url) {
                        continue;
                    }
                    self.ensure_page(page, &user).await?;
                }
            }

            Action::AddSharedListEntries { remote_list_id, data, .. } => {
                let list = backend.shared_list_reference_from_link_id(remote_list_id);
                backend.create_list_entries(&list, data, &user).await?;
            }

            Action::RemoveSharedListEntry { remote_list_id, normalized_url, .. } => {
                let list = backend.shared_list_reference_from_link_id(remote_list_id);
                backend.remove_list_entries(&list, normalized_url).await?;
            }

            Action::ChangeSharedListTitle { remote_list_id, new_title, .. } => {
                // Empty titles come from list updates that never touched the name
                let Some(title) = new_title.as_deref().filter(|t| !t.is_empty()) else {
                    return Ok(());
                };
                let list = backend.shared_list_reference_from_link_id(remote_list_id);
                backend.update_list_title(&list, title).await?;
            }

            Action::ShareAnnotations { local_list_ids, data } => {
                let remote_list_ids = self.sharing.get_remote_list_ids(local_list_ids).await?;
                let lists: Vec<_> = remote_list_ids
                    .values()
                    .map(|id| backend.shared_list_reference_from_link_id(id))
                    .collect();

                let created = backend.create_annotations(&user, &lists, data).await?;
                let metadata: Vec<_> = created
                    .iter()
                    .map(|(local_id, reference)| AnnotationSharingMetadata {
                        local_id: local_id.clone(),
                        remote_id: backend.shared_annotation_link_id(reference),
                        exclude_from_lists: true,
                    })
                    .collect();
                self.sharing.store_annotation_metadata(&metadata).await?;
            }

            Action::AddAnnotationEntries { remote_list_ids, remote_annotations } => {
                let lists: Vec<_> = remote_list_ids
                    .iter()
                    .map(|id| backend.shared_list_reference_from_link_id(id))
                    .collect();
                let annotations: Vec<_> = remote_annotations
                    .iter()
                    .map(|a| SharedAnnotationListEntry {
                        reference: backend.shared_annotation_reference_from_link_id(&a.remote_id),
                        normalized_page_url: a.normalized_page_url.clone(),
                        created_when: a.created_when,
                    })
                    .collect();
                backend.add_annotations_to_lists(&user, &lists, &annotations).await?;
            }

            Action::RemoveSharedAnnotationListEntries { remote_list_id, remote_annotation_ids } => {
                let lists = [backend.shared_list_reference_from_link_id(remote_list_id)];
                let annotations: Vec<_> = remote_annotation_ids
                    .iter()
                    .map(|id| backend.shared_annotation_reference_from_link_id(id))
                    .collect();
                backend.remove_annotations_from_lists(&lists, &annotations).await?;
            }

            Action::UpdateAnnotationComment { remote_annotation_id, updated_comment, .. } => {
                let annotation = backend.shared_annotation_reference_from_link_id(remote_annotation_id);
                backend.update_annotation_comment(&annotation, updated_comment).await?;
            }

            // Metadata rows were already deleted by whoever queued this
            Action::UnshareAnnotations { remote_annotation_ids } => {
                let annotations: Vec<_> = remote_annotation_ids
                    .iter()
                    .map(|id| backend.shared_annotation_reference_from_link_id(id))
                    .collect();
                backend.remove_annotations(&annotations).await?;
            }
        }

        Ok(())
    }
}
