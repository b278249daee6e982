// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local↔remote identity map and page lookups.
//!
//! `sharedListMetadata` maps a local list id to the remote list id,
//! `sharedAnnotationMetadata` maps a local annotation id to its remote id
//! plus the `excludeFromLists` flag. Both are keyed by local id, so at most
//! one remote id exists per local id.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::traits::{ObjectStore, Query, StorageError, StoredObject};
use super::{PAGES, SHARED_ANNOTATION_METADATA, SHARED_LIST_METADATA};
use crate::action::{CreatedWhen, PageInfo};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMetadata {
    local_id: i64,
    remote_id: String,
}

/// Sharing state of one annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationSharingMetadata {
    pub local_id: String,
    pub remote_id: String,
    /// Shared on its own but not attached to any list's entries
    pub exclude_from_lists: bool,
}

/// Page row as read from `pages`, renamed to the remote vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    pub normalized_url: String,
    pub original_url: String,
    pub full_title: Option<String>,
}

impl PageDescriptor {
    #[must_use]
    pub fn into_page_info(self, created_when: CreatedWhen) -> PageInfo {
        PageInfo {
            normalized_url: self.normalized_url,
            original_url: self.original_url,
            full_title: self.full_title,
            created_when,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageRow {
    url: String,
    full_url: String,
    #[serde(default)]
    full_title: Option<String>,
}

#[derive(Clone)]
pub struct SharingStore {
    store: Arc<dyn ObjectStore>,
}

impl SharingStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn store_list_id(&self, local_id: i64, remote_id: &str) -> Result<()> {
        let row = ListMetadata {
            local_id,
            remote_id: remote_id.to_string(),
        };
        self.store
            .create(SHARED_LIST_METADATA, &local_id.to_string(), serde_json::to_value(row)?)
            .await?;
        debug!(local_id, remote_id, "Stored list id mapping");
        Ok(())
    }

    pub async fn get_remote_list_id(&self, local_id: i64) -> Result<Option<String>> {
        match self.store.get(SHARED_LIST_METADATA, &local_id.to_string()).await? {
            Some(value) => Ok(Some(serde_json::from_value::<ListMetadata>(value)?.remote_id)),
            None => Ok(None),
        }
    }

    /// Remote ids of the shared lists among `local_ids`. Unshared ones are absent.
    pub async fn get_remote_list_ids(&self, local_ids: &[i64]) -> Result<BTreeMap<i64, String>> {
        let keys: Vec<String> = local_ids.iter().map(ToString::to_string).collect();
        let rows = self.store.get_many(SHARED_LIST_METADATA, &keys).await?;
        list_id_map(rows)
    }

    pub async fn get_local_list_id(&self, remote_id: &str) -> Result<Option<i64>> {
        let rows = self
            .store
            .find(SHARED_LIST_METADATA, &Query::all().eq("remoteId", remote_id))
            .await?;
        match rows.into_iter().next() {
            Some(o) => Ok(Some(serde_json::from_value::<ListMetadata>(o.value)?.local_id)),
            None => Ok(None),
        }
    }

    pub async fn are_lists_shared(&self, local_ids: &[i64]) -> Result<BTreeMap<i64, bool>> {
        let shared = self.get_remote_list_ids(local_ids).await?;
        Ok(local_ids
            .iter()
            .map(|id| (*id, shared.contains_key(id)))
            .collect())
    }

    pub async fn get_all_remote_list_ids(&self) -> Result<BTreeMap<i64, String>> {
        let rows = self.store.find(SHARED_LIST_METADATA, &Query::all()).await?;
        list_id_map(rows)
    }

    pub async fn store_annotation_metadata(&self, rows: &[AnnotationSharingMetadata]) -> Result<()> {
        for row in rows {
            self.store
                .create(SHARED_ANNOTATION_METADATA, &row.local_id, serde_json::to_value(row)?)
                .await?;
        }
        Ok(())
    }

    pub async fn get_remote_annotation_ids(&self, local_ids: &[String]) -> Result<BTreeMap<String, String>> {
        Ok(self
            .get_remote_annotation_metadata(local_ids)
            .await?
            .into_iter()
            .map(|(local_id, meta)| (local_id, meta.remote_id))
            .collect())
    }

    pub async fn get_remote_annotation_metadata(
        &self,
        local_ids: &[String],
    ) -> Result<BTreeMap<String, AnnotationSharingMetadata>> {
        let mut found = BTreeMap::new();
        for o in self.store.get_many(SHARED_ANNOTATION_METADATA, local_ids).await? {
            found.insert(o.key, serde_json::from_value(o.value)?);
        }
        Ok(found)
    }

    /// Flip `excludeFromLists` on every annotation that has metadata.
    pub async fn set_annotations_excluded_from_lists(&self, local_ids: &[String], exclude: bool) -> Result<()> {
        for local_id in local_ids {
            match self
                .store
                .update(SHARED_ANNOTATION_METADATA, local_id, json!({"excludeFromLists": exclude}))
                .await
            {
                Ok(()) | Err(StorageError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub async fn delete_annotation_metadata(&self, local_ids: &[String]) -> Result<()> {
        for local_id in local_ids {
            self.store.delete(SHARED_ANNOTATION_METADATA, local_id).await?;
        }
        Ok(())
    }

    pub async fn get_pages(&self, normalized_urls: &[String]) -> Result<BTreeMap<String, PageDescriptor>> {
        let mut pages = BTreeMap::new();
        for o in self.store.get_many(PAGES, normalized_urls).await? {
            let row: PageRow = serde_json::from_value(o.value)?;
            pages.insert(
                o.key,
                PageDescriptor {
                    normalized_url: row.url,
                    original_url: row.full_url,
                    full_title: row.full_title,
                },
            );
        }
        Ok(pages)
    }

    /// Titles of the pages that have one.
    pub async fn get_page_titles(&self, normalized_urls: &[String]) -> Result<BTreeMap<String, String>> {
        Ok(self
            .get_pages(normalized_urls)
            .await?
            .into_iter()
            .filter_map(|(url, page)| page.full_title.map(|title| (url, title)))
            .collect())
    }
}

fn list_id_map(rows: Vec<StoredObject>) -> Result<BTreeMap<i64, String>> {
    let mut ids = BTreeMap::new();
    for o in rows {
        let row: ListMetadata = serde_json::from_value(o.value)?;
        ids.insert(row.local_id, row.remote_id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStore;

    fn sharing() -> (Arc<InMemoryStore>, SharingStore) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), SharingStore::new(store))
    }

    fn meta(local: &str, remote: &str, exclude: bool) -> AnnotationSharingMetadata {
        AnnotationSharingMetadata {
            local_id: local.into(),
            remote_id: remote.into(),
            exclude_from_lists: exclude,
        }
    }

    #[tokio::test]
    async fn test_list_mapping_both_directions() {
        let (_, sharing) = sharing();
        sharing.store_list_id(1, "remote-1").await.unwrap();
        sharing.store_list_id(2, "remote-2").await.unwrap();

        assert_eq!(sharing.get_remote_list_id(1).await.unwrap().as_deref(), Some("remote-1"));
        assert_eq!(sharing.get_remote_list_id(3).await.unwrap(), None);
        assert_eq!(sharing.get_local_list_id("remote-2").await.unwrap(), Some(2));
        assert_eq!(sharing.get_local_list_id("nope").await.unwrap(), None);

        let shared = sharing.are_lists_shared(&[1, 3]).await.unwrap();
        assert!(shared[&1]);
        assert!(!shared[&3]);

        let ids = sharing.get_remote_list_ids(&[1, 2, 3]).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(sharing.get_all_remote_list_ids().await.unwrap(), ids);
    }

    #[tokio::test]
    async fn test_annotation_metadata_lifecycle() {
        let (_, sharing) = sharing();
        sharing
            .store_annotation_metadata(&[meta("a", "ra", true), meta("b", "rb", true)])
            .await
            .unwrap();

        sharing
            .set_annotations_excluded_from_lists(&["a".into(), "missing".into()], false)
            .await
            .unwrap();
        let all = sharing
            .get_remote_annotation_metadata(&["a".into(), "b".into()])
            .await
            .unwrap();
        assert!(!all["a"].exclude_from_lists);
        assert!(all["b"].exclude_from_lists);

        sharing.delete_annotation_metadata(&["a".into()]).await.unwrap();
        let ids = sharing
            .get_remote_annotation_ids(&["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids["b"], "rb");
    }

    #[tokio::test]
    async fn test_pages_and_titles() {
        let (store, sharing) = sharing();
        store
            .create(PAGES, "a.com", json!({"url": "a.com", "fullUrl": "https://a.com", "fullTitle": "A"}))
            .await
            .unwrap();
        store
            .create(PAGES, "b.com", json!({"url": "b.com", "fullUrl": "https://b.com"}))
            .await
            .unwrap();

        let pages = sharing.get_pages(&["a.com".into(), "b.com".into()]).await.unwrap();
        assert_eq!(pages["a.com"].original_url, "https://a.com");

        let titles = sharing.get_page_titles(&["a.com".into(), "b.com".into()]).await.unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles["a.com"], "A");

        let info = pages["b.com"].clone().into_page_info(CreatedWhen::Now);
        assert_eq!(info.normalized_url, "b.com");
        assert_eq!(info.full_title, None);
    }
}
