// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the content sharing facade.

use serde::Serialize;

/// Broadcast when the change watcher turned a list-entry change into
/// sharing work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentSharingEvent {
    /// A page was added to a list that is shared
    #[serde(rename_all = "camelCase")]
    PageAddedToSharedList { page_url: String },
    /// A page was removed from a list that is shared
    #[serde(rename_all = "camelCase")]
    PageRemovedFromSharedList { page_url: String },
}

impl ContentSharingEvent {
    #[must_use]
    pub fn page_url(&self) -> &str {
        match self {
            Self::PageAddedToSharedList { page_url } | Self::PageRemovedFromSharedList { page_url } => page_url,
        }
    }
}

/// A shared list as seen from this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteListInfo {
    pub local_id: i64,
    pub remote_id: String,
    pub name: String,
}
