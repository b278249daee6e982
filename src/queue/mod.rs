// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sharing action queue: executor and scheduler.

pub mod executor;
pub mod scheduler;

pub use executor::ActionExecutor;
pub use scheduler::{QueueScheduler, SchedulerStatus};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::{Action, QueueInteraction, RemoteAnnotationEntry};
use crate::error::Result;
use crate::storage::local::Annotation;
use crate::storage::sharing::SharingStore;

/// Queue `add-annotation-entries` attaching the already-shared, list-visible
/// annotations among `annotations` to the given remote lists.
///
/// Annotations without a remote id, or shared with `excludeFromLists`, are
/// left out. Nothing is queued when no annotation or no list remains.
pub async fn schedule_add_annotation_entries(
    sharing: &SharingStore,
    scheduler: &Arc<QueueScheduler>,
    annotations: &[Annotation],
    remote_list_ids: Vec<String>,
    mode: QueueInteraction,
) -> Result<()> {
    if annotations.is_empty() || remote_list_ids.is_empty() {
        return Ok(());
    }

    let by_url: BTreeMap<&str, &Annotation> =
        annotations.iter().map(|a| (a.url.as_str(), a)).collect();
    let local_ids: Vec<String> = annotations.iter().map(|a| a.url.clone()).collect();
    let metadata = sharing.get_remote_annotation_metadata(&local_ids).await?;

    let now = now_millis();
    let remote_annotations: Vec<RemoteAnnotationEntry> = metadata
        .into_iter()
        .filter(|(_, meta)| !meta.exclude_from_lists)
        .filter_map(|(local_id, meta)| {
            let annotation = by_url.get(local_id.as_str())?;
            Some(RemoteAnnotationEntry {
                remote_id: meta.remote_id,
                normalized_page_url: annotation.page_url.clone(),
                created_when: annotation.created_when.unwrap_or(now),
            })
        })
        .collect();

    if remote_annotations.is_empty() {
        return Ok(());
    }

    scheduler
        .schedule_action(
            Action::AddAnnotationEntries {
                remote_list_ids,
                remote_annotations,
            },
            mode,
        )
        .await
}

/// Wall clock in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
