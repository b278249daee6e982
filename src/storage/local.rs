// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed access to the host's local collections (lists, list entries,
//! annotations, privacy levels, pages).
//!
//! The host owns these collections; this module only reads them and, for
//! objects arriving from the remote side, creates new rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use super::traits::{ObjectStore, Query, StoredObject};
use super::{object_key, ANNOTATIONS, ANNOTATION_PRIVACY_LEVELS, CUSTOM_LISTS, PAGES, PAGE_LIST_ENTRIES};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalList {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// A page in a list. Primary key is `[list_id, page_url]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListEntry {
    pub list_id: i64,
    pub page_url: String,
    pub full_url: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// A local annotation. `url` is its primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub url: String,
    pub page_url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub selector: Option<Value>,
    #[serde(default)]
    pub created_when: Option<i64>,
}

/// Annotation privacy level as stored by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivacyLevel(pub u16);

impl PrivacyLevel {
    pub const PRIVATE: Self = Self(0);
    pub const PROTECTED: Self = Self(100);
    pub const SHARED: Self = Self(200);
    pub const SHARED_PROTECTED: Self = Self(300);

    /// Anything above `PROTECTED` may be pushed to the remote side.
    #[must_use]
    pub fn is_shareable(self) -> bool {
        self > Self::PROTECTED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyRecord {
    privacy_level: PrivacyLevel,
}

/// Read/write facade over the host's local collections.
#[derive(Clone)]
pub struct LocalData {
    store: Arc<dyn ObjectStore>,
}

impl LocalData {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn fetch_list_by_id(&self, list_id: i64) -> Result<Option<LocalList>> {
        let value = self.store.get(CUSTOM_LISTS, &list_id.to_string()).await?;
        value.map(decode).transpose()
    }

    pub async fn fetch_list_pages_by_id(&self, list_id: i64) -> Result<Vec<PageListEntry>> {
        let objects = self
            .store
            .find(PAGE_LIST_ENTRIES, &Query::all().eq("listId", list_id))
            .await?;
        decode_all(objects)
    }

    /// Ids of every list containing the page.
    pub async fn fetch_list_ids_by_url(&self, page_url: &str) -> Result<Vec<i64>> {
        let entries: Vec<PageListEntry> = decode_all(
            self.store
                .find(PAGE_LIST_ENTRIES, &Query::all().eq("pageUrl", page_url))
                .await?,
        )?;
        Ok(entries.into_iter().map(|e| e.list_id).collect())
    }

    pub async fn insert_custom_list(&self, list: &LocalList) -> Result<()> {
        self.store
            .create(CUSTOM_LISTS, &list.id.to_string(), serde_json::to_value(list)?)
            .await?;
        Ok(())
    }

    pub async fn insert_list_entry(&self, entry: &PageListEntry) -> Result<()> {
        let key = object_key(&json!([entry.list_id, entry.page_url]));
        self.store
            .create(PAGE_LIST_ENTRIES, &key, serde_json::to_value(entry)?)
            .await?;
        Ok(())
    }

    pub async fn list_annotations_by_page_urls(&self, page_urls: &[String]) -> Result<Vec<Annotation>> {
        let mut annotations = Vec::new();
        for page_url in page_urls {
            let objects = self
                .store
                .find(ANNOTATIONS, &Query::all().eq("pageUrl", page_url.as_str()))
                .await?;
            annotations.extend(decode_all::<Annotation>(objects)?);
        }
        Ok(annotations)
    }

    pub async fn get_annotation_by_pk(&self, url: &str) -> Result<Option<Annotation>> {
        self.store.get(ANNOTATIONS, url).await?.map(decode).transpose()
    }

    /// Annotations for the given urls, in the order found. Missing ones are skipped.
    pub async fn get_annotations(&self, urls: &[String]) -> Result<Vec<Annotation>> {
        decode_all(self.store.get_many(ANNOTATIONS, urls).await?)
    }

    pub async fn get_privacy_levels(&self, urls: &[String]) -> Result<BTreeMap<String, PrivacyLevel>> {
        let objects = self.store.get_many(ANNOTATION_PRIVACY_LEVELS, urls).await?;
        let mut levels = BTreeMap::new();
        for object in objects {
            let record: PrivacyRecord = decode(object.value)?;
            levels.insert(object.key, record.privacy_level);
        }
        Ok(levels)
    }

    pub async fn set_privacy_level(&self, url: &str, level: PrivacyLevel) -> Result<()> {
        self.store
            .create(
                ANNOTATION_PRIVACY_LEVELS,
                url,
                json!({"annotation": url, "privacyLevel": level}),
            )
            .await?;
        Ok(())
    }

    pub async fn create_annotation(&self, annotation: &Annotation) -> Result<()> {
        self.store
            .create(ANNOTATIONS, &annotation.url, serde_json::to_value(annotation)?)
            .await?;
        Ok(())
    }

    /// Store a page row (`{url, fullUrl, fullTitle}`).
    pub async fn upsert_page(&self, url: &str, full_url: &str, full_title: Option<&str>) -> Result<()> {
        self.store
            .create(
                PAGES,
                url,
                json!({"url": url, "fullUrl": full_url, "fullTitle": full_title}),
            )
            .await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn decode_all<T: DeserializeOwned>(objects: Vec<StoredObject>) -> Result<Vec<T>> {
    objects.into_iter().map(|o| decode(o.value)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStore;

    fn local() -> LocalData {
        LocalData::new(Arc::new(InMemoryStore::new()))
    }

    fn annotation(url: &str, page_url: &str) -> Annotation {
        Annotation {
            url: url.into(),
            page_url: page_url.into(),
            body: Some("quoted".into()),
            comment: None,
            selector: None,
            created_when: Some(1_000),
        }
    }

    #[tokio::test]
    async fn test_list_roundtrip_and_pages_lookup() {
        let data = local();
        data.insert_custom_list(&LocalList { id: 1, name: "Reading".into(), created_at: None })
            .await
            .unwrap();
        for (list_id, page) in [(1, "a.com"), (1, "b.com"), (2, "a.com")] {
            data.insert_list_entry(&PageListEntry {
                list_id,
                page_url: page.into(),
                full_url: format!("https://{page}"),
                created_at: None,
            })
            .await
            .unwrap();
        }

        let list = data.fetch_list_by_id(1).await.unwrap().unwrap();
        assert_eq!(list.name, "Reading");
        assert!(data.fetch_list_by_id(3).await.unwrap().is_none());

        assert_eq!(data.fetch_list_pages_by_id(1).await.unwrap().len(), 2);
        let mut lists = data.fetch_list_ids_by_url("a.com").await.unwrap();
        lists.sort_unstable();
        assert_eq!(lists, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_annotations_by_page_and_pk() {
        let data = local();
        data.create_annotation(&annotation("a.com/#1", "a.com")).await.unwrap();
        data.create_annotation(&annotation("a.com/#2", "a.com")).await.unwrap();
        data.create_annotation(&annotation("b.com/#3", "b.com")).await.unwrap();

        let on_a = data.list_annotations_by_page_urls(&["a.com".into()]).await.unwrap();
        assert_eq!(on_a.len(), 2);

        let found = data.get_annotation_by_pk("b.com/#3").await.unwrap().unwrap();
        assert_eq!(found.page_url, "b.com");

        let some = data
            .get_annotations(&["a.com/#1".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(some.len(), 1);
    }

    #[tokio::test]
    async fn test_privacy_levels() {
        let data = local();
        data.set_privacy_level("x", PrivacyLevel::PROTECTED).await.unwrap();
        data.set_privacy_level("y", PrivacyLevel::SHARED).await.unwrap();

        let levels = data
            .get_privacy_levels(&["x".into(), "y".into(), "z".into()])
            .await
            .unwrap();
        assert_eq!(levels.len(), 2);
        assert!(!levels["x"].is_shareable());
        assert!(levels["y"].is_shareable());
        assert!(!PrivacyLevel::PRIVATE.is_shareable());
        assert!(PrivacyLevel::SHARED_PROTECTED.is_shareable());
    }
}
