// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Contracts of the remote collaborators.
//!
//! - [`ContentSharingBackend`]: the authoritative collaboration service
//!   holding shared lists, list entries, annotations and page infos
//! - [`AuthProvider`]: who is logged in, and a feed of login changes
//! - [`ActivityStreams`]: best-effort follow subscriptions
//!
//! Remote objects are addressed by typed references. The string form of a
//! reference (its "link id") is what the identity map stores and what the
//! queued actions carry; [`ContentSharingBackend`] provides the codecs.
//!
//! [`memory`] ships in-memory implementations of all three.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::action::{AnnotationData, ListEntryData, PageInfo};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserReference {
    pub id: String,
}

impl UserReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedListReference {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedAnnotationReference {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedPageInfoReference {
    pub id: String,
}

/// Payload for creating a shared list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedListData {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedList {
    pub title: String,
    pub creator: UserReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedAnnotation {
    pub normalized_page_url: String,
    pub created_when: i64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    pub creator: UserReference,
}

/// An already-shared annotation being attached to lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAnnotationListEntry {
    pub reference: SharedAnnotationReference,
    pub normalized_page_url: String,
    pub created_when: i64,
}

/// What to follow on the activity stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRequest {
    pub entity_type: &'static str,
    pub entity_id: String,
    pub home_feed: bool,
}

/// The remote collaboration service. Every call is authoritative and
/// individually retryable; failures surface as `SharingError::RemoteCall`.
#[async_trait]
pub trait ContentSharingBackend: Send + Sync {
    async fn create_shared_list(
        &self,
        list: &SharedListData,
        creator: &UserReference,
        local_list_id: i64,
    ) -> Result<SharedListReference>;

    /// `None` when the list no longer exists.
    async fn get_list_by_reference(&self, list: &SharedListReference) -> Result<Option<SharedList>>;

    async fn create_list_entries(
        &self,
        list: &SharedListReference,
        entries: &[ListEntryData],
        creator: &UserReference,
    ) -> Result<()>;

    async fn remove_list_entries(&self, list: &SharedListReference, normalized_url: &str) -> Result<()>;

    async fn update_list_title(&self, list: &SharedListReference, title: &str) -> Result<()>;

    /// Create annotations grouped by page. Returns the new reference per local id.
    async fn create_annotations(
        &self,
        creator: &UserReference,
        lists: &[SharedListReference],
        annotations_by_page: &BTreeMap<String, Vec<AnnotationData>>,
    ) -> Result<BTreeMap<String, SharedAnnotationReference>>;

    /// `None` when the annotation no longer exists.
    async fn get_annotation(&self, annotation: &SharedAnnotationReference) -> Result<Option<SharedAnnotation>>;

    async fn remove_annotations(&self, annotations: &[SharedAnnotationReference]) -> Result<()>;

    async fn add_annotations_to_lists(
        &self,
        creator: &UserReference,
        lists: &[SharedListReference],
        annotations: &[SharedAnnotationListEntry],
    ) -> Result<()>;

    async fn remove_annotations_from_lists(
        &self,
        lists: &[SharedListReference],
        annotations: &[SharedAnnotationReference],
    ) -> Result<()>;

    async fn update_annotation_comment(&self, annotation: &SharedAnnotationReference, comment: &str) -> Result<()>;

    async fn ensure_page_info(&self, page: &PageInfo, creator: &UserReference) -> Result<SharedPageInfoReference>;

    fn shared_list_link_id(&self, list: &SharedListReference) -> String {
        list.id.clone()
    }

    fn shared_list_reference_from_link_id(&self, link_id: &str) -> SharedListReference {
        SharedListReference { id: link_id.to_string() }
    }

    fn shared_annotation_link_id(&self, annotation: &SharedAnnotationReference) -> String {
        annotation.id.clone()
    }

    fn shared_annotation_reference_from_link_id(&self, link_id: &str) -> SharedAnnotationReference {
        SharedAnnotationReference { id: link_id.to_string() }
    }

    fn shared_page_info_link_id(&self, page: &SharedPageInfoReference) -> String {
        page.id.clone()
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<UserReference>>;

    /// Receives the new user (or `None`) on every login change.
    fn subscribe_changes(&self) -> watch::Receiver<Option<UserReference>>;
}

#[async_trait]
pub trait ActivityStreams: Send + Sync {
    async fn follow_entity(&self, request: FollowRequest) -> Result<()>;
}
