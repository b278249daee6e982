// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Share, unshare and lookup operations.
//!
//! Mutations never call the backend directly: they queue actions and let
//! the scheduler drain them. The `mode` argument picks how long the caller
//! waits; `None` means the operation's default, listed per method.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use crate::action::{Action, AnnotationData, CreatedWhen, ListEntryData, QueueInteraction};
use crate::error::{Result, SharingError};
use crate::queue::schedule_add_annotation_entries;
use crate::remote::SharedListData;
use crate::storage::local::Annotation;
use crate::storage::sharing::AnnotationSharingMetadata;

use super::{ContentSharing, RemoteListInfo};

impl ContentSharing {
    // ═══════════════════════════════════════════════════════════════════════════
    // Lists
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create the remote counterpart of a local list and return its remote id.
    ///
    /// Runs immediately, not through the queue. A list that is already
    /// shared returns its existing remote id without a remote call.
    #[instrument(skip(self))]
    pub async fn share_list(&self, local_list_id: i64) -> Result<String> {
        let list = self
            .local
            .fetch_list_by_id(local_list_id)
            .await?
            .ok_or_else(|| SharingError::NotFound(format!("list {local_list_id}")))?;
        let user = self.executor.require_user().await?;

        if let Some(remote_id) = self.sharing.get_remote_list_id(local_list_id).await? {
            debug!(remote_id, "List already shared");
            return Ok(remote_id);
        }

        let backend = self.executor.backend();
        let reference = backend
            .create_shared_list(&SharedListData { title: list.name }, &user, local_list_id)
            .await?;
        let remote_id = backend.shared_list_link_id(&reference);
        self.sharing.store_list_id(local_list_id, &remote_id).await?;

        info!(remote_id, "Shared list");
        Ok(remote_id)
    }

    /// Push every page of a shared list, then attach the list-visible shared
    /// annotations on those pages. Default mode: queue-and-return.
    #[instrument(skip(self))]
    pub async fn share_list_entries(&self, local_list_id: i64, mode: Option<QueueInteraction>) -> Result<()> {
        let mode = mode.unwrap_or(QueueInteraction::QueueAndReturn);
        self.executor.require_user().await?;
        let remote_list_id = self
            .sharing
            .get_remote_list_id(local_list_id)
            .await?
            .ok_or_else(|| SharingError::NotShared(format!("list {local_list_id}")))?;

        let entries = self.local.fetch_list_pages_by_id(local_list_id).await?;
        let page_urls: Vec<String> = entries.iter().map(|e| e.page_url.clone()).collect();
        let titles = self.sharing.get_page_titles(&page_urls).await?;

        for chunk in entries.chunks(self.config.list_entry_chunk_size.max(1)) {
            let data = chunk
                .iter()
                .map(|entry| ListEntryData {
                    normalized_url: entry.page_url.clone(),
                    original_url: entry.full_url.clone(),
                    entry_title: titles.get(&entry.page_url).cloned(),
                    created_when: entry.created_at.map_or(CreatedWhen::Now, CreatedWhen::At),
                })
                .collect();
            self.scheduler
                .schedule_action(
                    Action::AddSharedListEntries {
                        local_list_id,
                        remote_list_id: remote_list_id.clone(),
                        data,
                    },
                    mode,
                )
                .await?;
        }

        let annotations = self.local.list_annotations_by_page_urls(&page_urls).await?;
        schedule_add_annotation_entries(&self.sharing, &self.scheduler, &annotations, vec![remote_list_id], mode)
            .await
    }

    pub async fn get_remote_list_id(&self, local_list_id: i64) -> Result<Option<String>> {
        self.sharing.get_remote_list_id(local_list_id).await
    }

    pub async fn get_remote_list_ids(&self, local_list_ids: &[i64]) -> Result<BTreeMap<i64, String>> {
        self.sharing.get_remote_list_ids(local_list_ids).await
    }

    pub async fn are_lists_shared(&self, local_list_ids: &[i64]) -> Result<BTreeMap<i64, bool>> {
        self.sharing.are_lists_shared(local_list_ids).await
    }

    /// Every shared list with its local name. Mappings whose local list is
    /// gone are left out.
    pub async fn get_all_remote_lists(&self) -> Result<Vec<RemoteListInfo>> {
        let mut lists = Vec::new();
        for (local_id, remote_id) in self.sharing.get_all_remote_list_ids().await? {
            match self.local.fetch_list_by_id(local_id).await? {
                Some(list) => lists.push(RemoteListInfo {
                    local_id,
                    remote_id,
                    name: list.name,
                }),
                None => warn!(local_id, remote_id, "Shared list has no local counterpart"),
            }
        }
        Ok(lists)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Annotations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Share one annotation on its own, not attached to any list.
    /// Already-shared annotations are left alone. Default mode: queue-and-await.
    #[instrument(skip(self))]
    pub async fn share_annotation(&self, annotation_url: &str, mode: Option<QueueInteraction>) -> Result<()> {
        let mode = mode.unwrap_or(QueueInteraction::QueueAndAwait);
        let url = annotation_url.to_string();
        let already_shared = self.sharing.get_remote_annotation_ids(std::slice::from_ref(&url)).await?;
        if already_shared.contains_key(&url) {
            debug!("Annotation already shared");
            return Ok(());
        }

        let annotation = self
            .local
            .get_annotation_by_pk(&url)
            .await?
            .ok_or_else(|| SharingError::NotFound(format!("annotation {url}")))?;
        let page = self
            .sharing
            .get_pages(std::slice::from_ref(&annotation.page_url))
            .await?
            .remove(&annotation.page_url)
            .ok_or_else(|| SharingError::NotFound(format!("page {}", annotation.page_url)))?;

        self.scheduler
            .schedule_action(
                Action::EnsurePageInfo {
                    data: vec![page.into_page_info(CreatedWhen::Now)],
                },
                mode,
            )
            .await?;

        let data = BTreeMap::from([(annotation.page_url.clone(), vec![annotation_data(&annotation)?])]);
        self.scheduler
            .schedule_action(
                Action::ShareAnnotations {
                    local_list_ids: Vec::new(),
                    data,
                },
                mode,
            )
            .await
    }

    /// Share several annotations in one `share-annotations` action.
    ///
    /// Annotations that are already shared, or whose privacy level is
    /// protected or lower, are skipped. Default mode: queue-and-await.
    #[instrument(skip(self, annotation_urls), fields(count = annotation_urls.len()))]
    pub async fn share_annotations(&self, annotation_urls: &[String], mode: Option<QueueInteraction>) -> Result<()> {
        let mode = mode.unwrap_or(QueueInteraction::QueueAndAwait);
        let already_shared = self.sharing.get_remote_annotation_ids(annotation_urls).await?;
        let privacy = self.local.get_privacy_levels(annotation_urls).await?;

        let mut data: BTreeMap<String, Vec<AnnotationData>> = BTreeMap::new();
        for annotation in self.local.get_annotations(annotation_urls).await? {
            if already_shared.contains_key(&annotation.url) {
                continue;
            }
            if privacy.get(&annotation.url).is_some_and(|level| !level.is_shareable()) {
                debug!(url = annotation.url, "Skipping annotation below shareable privacy level");
                continue;
            }
            data.entry(annotation.page_url.clone())
                .or_default()
                .push(annotation_data(&annotation)?);
        }
        if data.is_empty() {
            return Ok(());
        }

        let page_urls: Vec<String> = data.keys().cloned().collect();
        let mut pages = self.sharing.get_pages(&page_urls).await?;
        for page_url in &page_urls {
            let Some(page) = pages.remove(page_url) else {
                warn!(page_url, "No page row for shared annotations");
                continue;
            };
            self.scheduler
                .schedule_action(
                    Action::EnsurePageInfo {
                        data: vec![page.into_page_info(CreatedWhen::Now)],
                    },
                    mode,
                )
                .await?;
        }

        self.scheduler
            .schedule_action(
                Action::ShareAnnotations {
                    local_list_ids: Vec::new(),
                    data,
                },
                mode,
            )
            .await
    }

    /// Attach shared annotations to the shared lists their pages are in.
    ///
    /// Clears `excludeFromLists`; only annotations that were excluded
    /// before get new list entries. Default mode: queue-and-return.
    #[instrument(skip(self, annotation_urls), fields(count = annotation_urls.len()))]
    pub async fn share_annotations_to_lists(
        &self,
        annotation_urls: &[String],
        mode: Option<QueueInteraction>,
    ) -> Result<()> {
        let mode = mode.unwrap_or(QueueInteraction::QueueAndReturn);
        let previous = self.sharing.get_remote_annotation_metadata(annotation_urls).await?;
        self.sharing
            .set_annotations_excluded_from_lists(annotation_urls, false)
            .await?;

        let mut by_page: BTreeMap<String, Vec<Annotation>> = BTreeMap::new();
        for annotation in self.local.get_annotations(annotation_urls).await? {
            if previous.get(&annotation.url).is_some_and(|meta| meta.exclude_from_lists) {
                by_page.entry(annotation.page_url.clone()).or_default().push(annotation);
            }
        }

        for (page_url, annotations) in by_page {
            let list_ids = self.local.fetch_list_ids_by_url(&page_url).await?;
            let remote_list_ids: Vec<String> = self
                .sharing
                .get_remote_list_ids(&list_ids)
                .await?
                .into_values()
                .collect();
            schedule_add_annotation_entries(&self.sharing, &self.scheduler, &annotations, remote_list_ids, mode)
                .await?;
        }
        Ok(())
    }

    /// Detach annotations from every shared list their pages are in. They
    /// stay shared on their own. Default mode: queue-and-return.
    #[instrument(skip(self, annotation_urls), fields(count = annotation_urls.len()))]
    pub async fn unshare_annotations_from_lists(
        &self,
        annotation_urls: &[String],
        mode: Option<QueueInteraction>,
    ) -> Result<()> {
        let mode = mode.unwrap_or(QueueInteraction::QueueAndReturn);
        self.sharing
            .set_annotations_excluded_from_lists(annotation_urls, true)
            .await?;

        let remote_ids = self.sharing.get_remote_annotation_ids(annotation_urls).await?;
        let mut by_page: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for annotation in self.local.get_annotations(annotation_urls).await? {
            if let Some(remote_id) = remote_ids.get(&annotation.url) {
                by_page.entry(annotation.page_url).or_default().push(remote_id.clone());
            }
        }

        for (page_url, remote_annotation_ids) in by_page {
            let list_ids = self.local.fetch_list_ids_by_url(&page_url).await?;
            for remote_list_id in self.sharing.get_remote_list_ids(&list_ids).await?.into_values() {
                self.scheduler
                    .schedule_action(
                        Action::RemoveSharedAnnotationListEntries {
                            remote_list_id,
                            remote_annotation_ids: remote_annotation_ids.clone(),
                        },
                        mode,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Forget the annotation's remote mapping and remove it remotely.
    /// Default mode: queue-and-await.
    #[instrument(skip(self))]
    pub async fn unshare_annotation(&self, annotation_url: &str, mode: Option<QueueInteraction>) -> Result<()> {
        let mode = mode.unwrap_or(QueueInteraction::QueueAndAwait);
        let url = annotation_url.to_string();
        let remote_id = self
            .sharing
            .get_remote_annotation_ids(std::slice::from_ref(&url))
            .await?
            .remove(&url)
            .ok_or_else(|| SharingError::NotShared(format!("annotation {url}")))?;

        self.sharing.delete_annotation_metadata(&[url]).await?;
        self.scheduler
            .schedule_action(
                Action::UnshareAnnotations {
                    remote_annotation_ids: vec![remote_id],
                },
                mode,
            )
            .await
    }

    pub async fn get_remote_annotation_ids(&self, annotation_urls: &[String]) -> Result<BTreeMap<String, String>> {
        self.sharing.get_remote_annotation_ids(annotation_urls).await
    }

    pub async fn get_remote_annotation_metadata(
        &self,
        annotation_urls: &[String],
    ) -> Result<BTreeMap<String, AnnotationSharingMetadata>> {
        self.sharing.get_remote_annotation_metadata(annotation_urls).await
    }

    /// Public link of a shared annotation, `None` when it is not shared.
    pub async fn get_remote_annotation_link(&self, annotation_url: &str) -> Result<Option<String>> {
        let url = annotation_url.to_string();
        let remote_id = self
            .sharing
            .get_remote_annotation_ids(std::slice::from_ref(&url))
            .await?
            .remove(&url);
        Ok(remote_id.map(|id| format!("{}/a/{id}", self.config.note_share_base_url.trim_end_matches('/'))))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Pages
    // ═══════════════════════════════════════════════════════════════════════════

    /// Remote id of a page's info record, creating it if needed.
    ///
    /// Within one process a page is only ensured remotely once.
    #[instrument(skip(self))]
    pub async fn ensure_remote_page_id(&self, normalized_url: &str) -> Result<String> {
        let user = self.executor.require_user().await?;
        if let Some(id) = self.executor.cached_page_id(normalized_url) {
            return Ok(id);
        }

        let url = normalized_url.to_string();
        let page = self
            .sharing
            .get_pages(std::slice::from_ref(&url))
            .await?
            .remove(&url)
            .ok_or_else(|| SharingError::NotFound(format!("page {url}")))?;
        self.executor
            .ensure_page(&page.into_page_info(CreatedWhen::Now), &user)
            .await
    }
}

/// Content snapshot for `share-annotations`; selectors travel serialized.
fn annotation_data(annotation: &Annotation) -> Result<AnnotationData> {
    let selector = annotation.selector.as_ref().map(serde_json::to_string).transpose()?;
    Ok(AnnotationData {
        local_id: annotation.url.clone(),
        created_when: annotation.created_when,
        body: annotation.body.clone(),
        comment: annotation.comment.clone(),
        selector,
    })
}
