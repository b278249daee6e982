// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage: the generic document store contract, the durable action queue,
//! and the typed views the sharing core reads and writes through.
//!
//! Collection names are part of the on-disk contract and must not change
//! between versions.

pub mod traits;
pub mod memory;
pub mod sql;
pub mod local;
pub mod sharing;

use serde_json::Value;

/// User lists (`{id, name, createdAt}`)
pub const CUSTOM_LISTS: &str = "customLists";
/// Pages in lists (`{listId, pageUrl, fullUrl, createdAt}`), pk `[listId, pageUrl]`
pub const PAGE_LIST_ENTRIES: &str = "pageListEntries";
/// Annotations (`{url, pageUrl, body, comment, selector, createdWhen}`)
pub const ANNOTATIONS: &str = "annotations";
/// Per-annotation privacy (`{annotation, privacyLevel}`)
pub const ANNOTATION_PRIVACY_LEVELS: &str = "annotationPrivacyLevels";
/// Page titles/urls (`{url, fullUrl, fullTitle}`)
pub const PAGES: &str = "pages";
/// Local list id → remote list id
pub const SHARED_LIST_METADATA: &str = "sharedListMetadata";
/// Local annotation id → remote annotation id + `excludeFromLists`
pub const SHARED_ANNOTATION_METADATA: &str = "sharedAnnotationMetadata";
/// Queue table holding serialized actions
pub const ACTION_QUEUE: &str = "contentSharingAction";
/// Sync engine settings (last sync time, log cursor, device id)
pub const SYNC_SETTINGS: &str = "syncSettings";

/// Collections replicated by the sync engine.
pub const SYNCED_COLLECTIONS: &[&str] = &[
    CUSTOM_LISTS,
    PAGE_LIST_ENTRIES,
    ANNOTATIONS,
    ANNOTATION_PRIVACY_LEVELS,
    PAGES,
    SHARED_LIST_METADATA,
    SHARED_ANNOTATION_METADATA,
];

/// Turn a primary key as carried by change events into a store key.
///
/// Strings are used as-is, numbers in decimal, compound keys joined by `|`.
#[must_use]
pub fn object_key(pk: &Value) -> String {
    match pk {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(object_key).collect::<Vec<_>>().join("|"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
