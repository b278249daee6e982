// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change watcher: turns committed local writes into queued sharing actions.
//!
//! | change | collection | queued |
//! |---|---|---|
//! | create | `pageListEntries` | `ensure-page-info`, `add-shared-list-entries`, `add-annotation-entries` |
//! | modify | `customLists` (`name` set) | `change-shared-list-title` |
//! | modify | `annotations` (`comment` set) | `update-annotation-comment` per remote id |
//! | delete | `pageListEntries` | `remove-shared-list-entry`, `remove-shared-annotation-list-entries` |
//! | delete | `annotations` | `unshare-annotations` |
//!
//! Only lists that already have a remote id are considered. Events with
//! [`ChangeOrigin::Sync`] are skipped unless `process_sync_changes` is set,
//! so writes pulled from another device are not pushed back out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{ChangeOrigin, StorageChange, StorageChangeEvent, StorageChangeListener};
use crate::action::{Action, CreatedWhen, ListEntryData, PageInfo, QueueInteraction};
use crate::coordinator::types::ContentSharingEvent;
use crate::error::Result;
use crate::queue::{now_millis, schedule_add_annotation_entries, QueueScheduler};
use crate::storage::local::LocalData;
use crate::storage::sharing::SharingStore;
use crate::storage::{object_key, ANNOTATIONS, CUSTOM_LISTS, PAGE_LIST_ENTRIES};

const MODE: QueueInteraction = QueueInteraction::QueueAndReturn;

pub struct ChangeWatcher {
    local: LocalData,
    sharing: SharingStore,
    scheduler: Arc<QueueScheduler>,
    events: broadcast::Sender<ContentSharingEvent>,
    process_sync_changes: bool,
}

impl ChangeWatcher {
    pub fn new(
        local: LocalData,
        sharing: SharingStore,
        scheduler: Arc<QueueScheduler>,
        events: broadcast::Sender<ContentSharingEvent>,
        process_sync_changes: bool,
    ) -> Self {
        Self {
            local,
            sharing,
            scheduler,
            events,
            process_sync_changes,
        }
    }

    #[instrument(skip(self, event), fields(origin = ?event.origin, changes = event.changes.len()))]
    pub async fn handle_post_storage_change(&self, event: &StorageChangeEvent) -> Result<()> {
        if event.origin == ChangeOrigin::Sync && !self.process_sync_changes {
            debug!("Skipping storage changes written by sync");
            return Ok(());
        }

        for change in &event.changes {
            match change {
                StorageChange::Create { collection, pk, values } if collection == PAGE_LIST_ENTRIES => {
                    self.created_list_entry(pk, values).await?;
                }
                StorageChange::Modify { collection, pks, updates } if collection == CUSTOM_LISTS => {
                    self.modified_list(pks, updates).await?;
                }
                StorageChange::Modify { collection, pks, updates } if collection == ANNOTATIONS => {
                    self.modified_annotation(pks, updates).await?;
                }
                StorageChange::Delete { collection, pks } if collection == PAGE_LIST_ENTRIES => {
                    self.deleted_list_entries(pks).await?;
                }
                StorageChange::Delete { collection, pks } if collection == ANNOTATIONS => {
                    self.deleted_annotations(pks).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn created_list_entry(&self, pk: &Value, values: &Value) -> Result<()> {
        let Some((local_list_id, page_url)) = list_entry_pk(pk) else {
            warn!(?pk, "Ignoring list entry with malformed key");
            return Ok(());
        };
        let Some(remote_list_id) = self.sharing.get_remote_list_id(local_list_id).await? else {
            return Ok(());
        };

        let titles = self.sharing.get_page_titles(std::slice::from_ref(&page_url)).await?;
        let title = titles.get(&page_url).cloned();
        let full_url = values.get("fullUrl").and_then(Value::as_str).unwrap_or(&page_url);
        let original_url = format!("https://{}", normalize_url(full_url));

        self.scheduler
            .schedule_action(
                Action::EnsurePageInfo {
                    data: vec![PageInfo {
                        normalized_url: page_url.clone(),
                        original_url: original_url.clone(),
                        full_title: title.clone(),
                        created_when: CreatedWhen::Now,
                    }],
                },
                MODE,
            )
            .await?;
        self.scheduler
            .schedule_action(
                Action::AddSharedListEntries {
                    local_list_id,
                    remote_list_id: remote_list_id.clone(),
                    data: vec![ListEntryData {
                        normalized_url: page_url.clone(),
                        original_url,
                        entry_title: title,
                        created_when: CreatedWhen::At(now_millis()),
                    }],
                },
                MODE,
            )
            .await?;

        let annotations = self
            .local
            .list_annotations_by_page_urls(std::slice::from_ref(&page_url))
            .await?;
        schedule_add_annotation_entries(
            &self.sharing,
            &self.scheduler,
            &annotations,
            vec![remote_list_id],
            MODE,
        )
        .await?;

        let _ = self.events.send(ContentSharingEvent::PageAddedToSharedList { page_url });
        Ok(())
    }

    async fn modified_list(&self, pks: &[Value], updates: &Value) -> Result<()> {
        let Some(name) = non_empty_str(updates, "name") else {
            return Ok(());
        };

        for pk in pks {
            let Some(local_list_id) = pk.as_i64() else { continue };
            let Some(remote_list_id) = self.sharing.get_remote_list_id(local_list_id).await? else {
                continue;
            };
            self.scheduler
                .schedule_action(
                    Action::ChangeSharedListTitle {
                        local_list_id,
                        remote_list_id,
                        new_title: Some(name.to_string()),
                    },
                    MODE,
                )
                .await?;
        }
        Ok(())
    }

    async fn modified_annotation(&self, pks: &[Value], updates: &Value) -> Result<()> {
        let Some(comment) = non_empty_str(updates, "comment") else {
            return Ok(());
        };

        let local_ids: Vec<String> = pks.iter().map(object_key).collect();
        let remote_ids = self.sharing.get_remote_annotation_ids(&local_ids).await?;
        for (local_annotation_id, remote_annotation_id) in remote_ids {
            self.scheduler
                .schedule_action(
                    Action::UpdateAnnotationComment {
                        local_annotation_id,
                        remote_annotation_id,
                        updated_comment: comment.to_string(),
                    },
                    MODE,
                )
                .await?;
        }
        Ok(())
    }

    async fn deleted_list_entries(&self, pks: &[Value]) -> Result<()> {
        for pk in pks {
            let Some((local_list_id, page_url)) = list_entry_pk(pk) else {
                warn!(?pk, "Ignoring list entry with malformed key");
                continue;
            };
            let Some(remote_list_id) = self.sharing.get_remote_list_id(local_list_id).await? else {
                continue;
            };

            self.scheduler
                .schedule_action(
                    Action::RemoveSharedListEntry {
                        local_list_id,
                        remote_list_id: remote_list_id.clone(),
                        normalized_url: page_url.clone(),
                    },
                    MODE,
                )
                .await?;

            let annotations = self
                .local
                .list_annotations_by_page_urls(std::slice::from_ref(&page_url))
                .await?;
            let local_ids: Vec<String> = annotations.into_iter().map(|a| a.url).collect();
            let remote_ids = self.sharing.get_remote_annotation_ids(&local_ids).await?;
            if !remote_ids.is_empty() {
                self.scheduler
                    .schedule_action(
                        Action::RemoveSharedAnnotationListEntries {
                            remote_list_id,
                            remote_annotation_ids: remote_ids.into_values().collect(),
                        },
                        MODE,
                    )
                    .await?;
            }

            let _ = self.events.send(ContentSharingEvent::PageRemovedFromSharedList { page_url });
        }
        Ok(())
    }

    async fn deleted_annotations(&self, pks: &[Value]) -> Result<()> {
        let local_ids: Vec<String> = pks.iter().map(object_key).collect();
        let remote_ids = self.sharing.get_remote_annotation_ids(&local_ids).await?;
        if remote_ids.is_empty() {
            return Ok(());
        }

        self.scheduler
            .schedule_action(
                Action::UnshareAnnotations {
                    remote_annotation_ids: remote_ids.into_values().collect(),
                },
                MODE,
            )
            .await
    }
}

#[async_trait]
impl StorageChangeListener for ChangeWatcher {
    async fn handle_change(&self, event: &StorageChangeEvent) -> Result<()> {
        self.handle_post_storage_change(event).await
    }
}

/// `[listId, pageUrl]`
fn list_entry_pk(pk: &Value) -> Option<(i64, String)> {
    match pk.as_array()?.as_slice() {
        [list_id, page_url] => Some((list_id.as_i64()?, page_url.as_str()?.to_string())),
        _ => None,
    }
}

fn non_empty_str<'a>(updates: &'a Value, field: &str) -> Option<&'a str> {
    updates.get(field)?.as_str().filter(|s| !s.is_empty())
}

/// Strip scheme, `www.`, fragment and trailing slash from a URL.
pub(crate) fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let parsed = Url::parse(raw)
        .ok()
        .filter(|url| url.has_host())
        .or_else(|| Url::parse(&format!("https://{raw}")).ok());
    let Some(url) = parsed else {
        return raw.split('#').next().unwrap_or(raw).trim_end_matches('/').to_string();
    };

    let host = url.host_str().unwrap_or_default();
    let mut normalized = host.strip_prefix("www.").unwrap_or(host).to_string();
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(url.path());
    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized.trim_end_matches('/').to_string()
}
