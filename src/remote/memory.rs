// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory remote collaborators.
//!
//! [`InMemoryBackend`] keeps shared objects in maps and records every call
//! in order, which is what tests assert on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    ActivityStreams, AuthProvider, ContentSharingBackend, FollowRequest, SharedAnnotation,
    SharedAnnotationListEntry, SharedAnnotationReference, SharedList, SharedListData,
    SharedListReference, SharedPageInfoReference, UserReference,
};
use crate::action::{AnnotationData, ListEntryData, PageInfo};
use crate::error::{Result, SharingError};

/// One backend call as observed by [`InMemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub detail: String,
}

#[derive(Default)]
pub struct InMemoryBackend {
    next_id: AtomicU64,
    lists: DashMap<String, SharedList>,
    list_entries: DashMap<String, BTreeSet<String>>,
    annotations: DashMap<String, SharedAnnotation>,
    annotation_lists: DashMap<String, BTreeSet<String>>,
    pages: DashMap<String, SharedPageInfoReference>,
    calls: Mutex<Vec<RecordedCall>>,
    reject: Mutex<Option<String>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the call, then fail it if its detail matches the reject pattern.
    fn record(&self, method: &'static str, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        let rejected = self
            .reject
            .lock()
            .as_deref()
            .is_some_and(|pattern| detail.contains(pattern));
        self.calls.lock().push(RecordedCall {
            method,
            detail: detail.clone(),
        });
        if rejected {
            return Err(SharingError::RemoteCall(format!("{method} rejected: {detail}")));
        }
        Ok(())
    }

    /// Reject every call whose detail contains `pattern` (`None` to stop).
    pub fn reject_matching(&self, pattern: Option<&str>) {
        *self.reject.lock() = pattern.map(str::to_string);
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n}")
    }

    /// Every call so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    #[must_use]
    pub fn list(&self, id: &str) -> Option<SharedList> {
        self.lists.get(id).map(|l| l.clone())
    }

    /// Normalized urls of the entries of a shared list.
    #[must_use]
    pub fn list_entries(&self, id: &str) -> Vec<String> {
        self.list_entries
            .get(id)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn annotation(&self, id: &str) -> Option<SharedAnnotation> {
        self.annotations.get(id).map(|a| a.clone())
    }

    /// Lists a shared annotation is attached to.
    #[must_use]
    pub fn annotation_lists(&self, id: &str) -> Vec<String> {
        self.annotation_lists
            .get(id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed a list as if another user had shared it.
    pub fn insert_list(&self, title: &str, creator: &UserReference) -> SharedListReference {
        let id = self.fresh_id("list");
        self.lists.insert(
            id.clone(),
            SharedList {
                title: title.to_string(),
                creator: creator.clone(),
            },
        );
        SharedListReference { id }
    }

    /// Seed an annotation as if created on another device.
    pub fn insert_annotation(&self, annotation: SharedAnnotation) -> SharedAnnotationReference {
        let id = self.fresh_id("annotation");
        self.annotations.insert(id.clone(), annotation);
        SharedAnnotationReference { id }
    }
}

#[async_trait]
impl ContentSharingBackend for InMemoryBackend {
    async fn create_shared_list(
        &self,
        list: &SharedListData,
        creator: &UserReference,
        local_list_id: i64,
    ) -> Result<SharedListReference> {
        self.record("create_shared_list", local_list_id.to_string())?;
        Ok(self.insert_list(&list.title, creator))
    }

    async fn get_list_by_reference(&self, list: &SharedListReference) -> Result<Option<SharedList>> {
        self.record("get_list_by_reference", list.id.clone())?;
        Ok(self.list(&list.id))
    }

    async fn create_list_entries(
        &self,
        list: &SharedListReference,
        entries: &[ListEntryData],
        _creator: &UserReference,
    ) -> Result<()> {
        self.record("create_list_entries", format!("{} x{}", list.id, entries.len()))?;
        let mut existing = self.list_entries.entry(list.id.clone()).or_default();
        existing.extend(entries.iter().map(|e| e.normalized_url.clone()));
        Ok(())
    }

    async fn remove_list_entries(&self, list: &SharedListReference, normalized_url: &str) -> Result<()> {
        self.record("remove_list_entries", format!("{} {normalized_url}", list.id))?;
        if let Some(mut entries) = self.list_entries.get_mut(&list.id) {
            entries.remove(normalized_url);
        }
        Ok(())
    }

    async fn update_list_title(&self, list: &SharedListReference, title: &str) -> Result<()> {
        self.record("update_list_title", format!("{} {title}", list.id))?;
        if let Some(mut shared) = self.lists.get_mut(&list.id) {
            shared.title = title.to_string();
        }
        Ok(())
    }

    async fn create_annotations(
        &self,
        creator: &UserReference,
        lists: &[SharedListReference],
        annotations_by_page: &BTreeMap<String, Vec<AnnotationData>>,
    ) -> Result<BTreeMap<String, SharedAnnotationReference>> {
        let local_ids: Vec<&str> = annotations_by_page
            .values()
            .flatten()
            .map(|a| a.local_id.as_str())
            .collect();
        self.record("create_annotations", local_ids.join(","))?;

        let mut created = BTreeMap::new();
        for (page_url, annotations) in annotations_by_page {
            for data in annotations {
                let reference = self.insert_annotation(SharedAnnotation {
                    normalized_page_url: page_url.clone(),
                    created_when: data.created_when.unwrap_or_default(),
                    body: data.body.clone(),
                    comment: data.comment.clone(),
                    selector: data.selector.clone(),
                    creator: creator.clone(),
                });
                self.annotation_lists.insert(
                    reference.id.clone(),
                    lists.iter().map(|l| l.id.clone()).collect(),
                );
                created.insert(data.local_id.clone(), reference);
            }
        }
        Ok(created)
    }

    async fn get_annotation(&self, annotation: &SharedAnnotationReference) -> Result<Option<SharedAnnotation>> {
        self.record("get_annotation", annotation.id.clone())?;
        Ok(self.annotation(&annotation.id))
    }

    async fn remove_annotations(&self, annotations: &[SharedAnnotationReference]) -> Result<()> {
        let ids: Vec<&str> = annotations.iter().map(|a| a.id.as_str()).collect();
        self.record("remove_annotations", ids.join(","))?;
        for id in ids {
            self.annotations.remove(id);
            self.annotation_lists.remove(id);
        }
        Ok(())
    }

    async fn add_annotations_to_lists(
        &self,
        _creator: &UserReference,
        lists: &[SharedListReference],
        annotations: &[SharedAnnotationListEntry],
    ) -> Result<()> {
        self.record(
            "add_annotations_to_lists",
            format!("{} lists x{}", lists.len(), annotations.len()),
        )?;
        for entry in annotations {
            let mut attached = self.annotation_lists.entry(entry.reference.id.clone()).or_default();
            attached.extend(lists.iter().map(|l| l.id.clone()));
        }
        Ok(())
    }

    async fn remove_annotations_from_lists(
        &self,
        lists: &[SharedListReference],
        annotations: &[SharedAnnotationReference],
    ) -> Result<()> {
        self.record(
            "remove_annotations_from_lists",
            format!("{} lists x{}", lists.len(), annotations.len()),
        )?;
        for annotation in annotations {
            if let Some(mut attached) = self.annotation_lists.get_mut(&annotation.id) {
                for list in lists {
                    attached.remove(&list.id);
                }
            }
        }
        Ok(())
    }

    async fn update_annotation_comment(&self, annotation: &SharedAnnotationReference, comment: &str) -> Result<()> {
        self.record("update_annotation_comment", format!("{} {comment}", annotation.id))?;
        if let Some(mut shared) = self.annotations.get_mut(&annotation.id) {
            shared.comment = Some(comment.to_string());
        }
        Ok(())
    }

    async fn ensure_page_info(&self, page: &PageInfo, _creator: &UserReference) -> Result<SharedPageInfoReference> {
        self.record("ensure_page_info", page.normalized_url.clone())?;
        if let Some(existing) = self.pages.get(&page.normalized_url) {
            return Ok(existing.clone());
        }
        let reference = SharedPageInfoReference { id: self.fresh_id("page") };
        self.pages.insert(page.normalized_url.clone(), reference.clone());
        Ok(reference)
    }
}

/// Auth provider whose user is set by hand.
pub struct StaticAuth {
    user: watch::Sender<Option<UserReference>>,
}

impl StaticAuth {
    #[must_use]
    pub fn logged_in(user_id: &str) -> Self {
        let (user, _) = watch::channel(Some(UserReference::new(user_id)));
        Self { user }
    }

    #[must_use]
    pub fn logged_out() -> Self {
        let (user, _) = watch::channel(None);
        Self { user }
    }

    pub fn set_user(&self, user: Option<UserReference>) {
        self.user.send_replace(user);
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user(&self) -> Result<Option<UserReference>> {
        Ok(self.user.borrow().clone())
    }

    fn subscribe_changes(&self) -> watch::Receiver<Option<UserReference>> {
        self.user.subscribe()
    }
}

/// Activity stream that remembers what was followed.
#[derive(Default)]
pub struct RecordingActivityStreams {
    followed: Mutex<Vec<FollowRequest>>,
}

impl RecordingActivityStreams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn followed(&self) -> Vec<FollowRequest> {
        self.followed.lock().clone()
    }
}

#[async_trait]
impl ActivityStreams for RecordingActivityStreams {
    async fn follow_entity(&self, request: FollowRequest) -> Result<()> {
        self.followed.lock().push(request);
        Ok(())
    }
}
