// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued sharing actions.
//!
//! An [`Action`] describes exactly one remote mutation, carrying the
//! immutable payload needed to perform it. Actions are persisted in the
//! queue as JSON, so the serialized shape (`"type"` tag, field names) is a
//! storage contract and must stay stable across versions.
//!
//! # Example
//!
//! ```
//! use sharing_sync_engine::Action;
//!
//! let action = Action::ChangeSharedListTitle {
//!     local_list_id: 1,
//!     remote_list_id: "remote-1".into(),
//!     new_title: Some("Reading list".into()),
//! };
//!
//! let json = serde_json::to_value(&action).unwrap();
//! assert_eq!(json["type"], "change-shared-list-title");
//! assert_eq!(action.kind(), "change-shared-list-title");
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker the backend replaces with its own clock.
const NOW_MARKER: &str = "$now";

/// Creation time of a remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedWhen {
    /// Let the backend assign the time (`"$now"` on the wire)
    Now,
    /// Epoch millis
    At(i64),
}

impl Serialize for CreatedWhen {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Now => serializer.serialize_str(NOW_MARKER),
            Self::At(millis) => serializer.serialize_i64(*millis),
        }
    }
}

impl<'de> Deserialize<'de> for CreatedWhen {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(i64),
            Marker(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Self::At(millis)),
            Raw::Marker(marker) if marker == NOW_MARKER => Ok(Self::Now),
            Raw::Marker(other) => Err(serde::de::Error::custom(format!(
                "invalid createdWhen marker: {other}"
            ))),
        }
    }
}

/// Page descriptor pushed by `ensure-page-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub normalized_url: String,
    pub original_url: String,
    #[serde(default)]
    pub full_title: Option<String>,
    pub created_when: CreatedWhen,
}

/// One page in a shared list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntryData {
    pub normalized_url: String,
    pub original_url: String,
    #[serde(default)]
    pub entry_title: Option<String>,
    pub created_when: CreatedWhen,
}

/// Content snapshot of an annotation being shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationData {
    pub local_id: String,
    #[serde(default)]
    pub created_when: Option<i64>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Serialized anchor selector
    #[serde(default)]
    pub selector: Option<String>,
}

/// An already-shared annotation being attached to shared lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAnnotationEntry {
    pub remote_id: String,
    pub normalized_page_url: String,
    pub created_when: i64,
}

/// A queued description of one remote mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    EnsurePageInfo { data: Vec<PageInfo> },

    #[serde(rename_all = "camelCase")]
    AddSharedListEntries {
        local_list_id: i64,
        remote_list_id: String,
        data: Vec<ListEntryData>,
    },

    #[serde(rename_all = "camelCase")]
    RemoveSharedListEntry {
        local_list_id: i64,
        remote_list_id: String,
        normalized_url: String,
    },

    #[serde(rename_all = "camelCase")]
    ChangeSharedListTitle {
        local_list_id: i64,
        remote_list_id: String,
        #[serde(default)]
        new_title: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ShareAnnotations {
        local_list_ids: Vec<i64>,
        /// Annotations keyed by normalized page URL
        data: BTreeMap<String, Vec<AnnotationData>>,
    },

    #[serde(rename_all = "camelCase")]
    UnshareAnnotations { remote_annotation_ids: Vec<String> },

    #[serde(rename_all = "camelCase")]
    AddAnnotationEntries {
        remote_list_ids: Vec<String>,
        remote_annotations: Vec<RemoteAnnotationEntry>,
    },

    #[serde(rename_all = "camelCase")]
    RemoveSharedAnnotationListEntries {
        remote_list_id: String,
        remote_annotation_ids: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    UpdateAnnotationComment {
        local_annotation_id: String,
        remote_annotation_id: String,
        updated_comment: String,
    },
}

impl Action {
    /// Wire name of the variant, used for logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnsurePageInfo { .. } => "ensure-page-info",
            Self::AddSharedListEntries { .. } => "add-shared-list-entries",
            Self::RemoveSharedListEntry { .. } => "remove-shared-list-entry",
            Self::ChangeSharedListTitle { .. } => "change-shared-list-title",
            Self::ShareAnnotations { .. } => "share-annotations",
            Self::UnshareAnnotations { .. } => "unshare-annotations",
            Self::AddAnnotationEntries { .. } => "add-annotation-entries",
            Self::RemoveSharedAnnotationListEntries { .. } => "remove-shared-annotation-list-entries",
            Self::UpdateAnnotationComment { .. } => "update-annotation-comment",
        }
    }
}

/// A persisted action together with its queue-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub action: Action,
}

/// How a call site interacts with the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueInteraction {
    /// Persist, trigger a drain, return without waiting
    #[default]
    QueueAndReturn,
    /// Persist, trigger a drain, wait for it to finish
    QueueAndAwait,
    /// Execute right away without persisting; retry is the caller's job
    SkipQueue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_created_when_wire_format() {
        assert_eq!(serde_json::to_value(CreatedWhen::Now).unwrap(), json!("$now"));
        assert_eq!(serde_json::to_value(CreatedWhen::At(42)).unwrap(), json!(42));

        let now: CreatedWhen = serde_json::from_value(json!("$now")).unwrap();
        assert_eq!(now, CreatedWhen::Now);
        let at: CreatedWhen = serde_json::from_value(json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(at, CreatedWhen::At(1_700_000_000_000));
    }

    #[test]
    fn test_created_when_rejects_unknown_marker() {
        let result: Result<CreatedWhen, _> = serde_json::from_value(json!("yesterday"));
        assert!(result.is_err());
    }

    #[test]
    fn test_action_tag_and_field_names() {
        let action = Action::AddSharedListEntries {
            local_list_id: 7,
            remote_list_id: "r7".into(),
            data: vec![ListEntryData {
                normalized_url: "example.com/a".into(),
                original_url: "https://example.com/a".into(),
                entry_title: None,
                created_when: CreatedWhen::Now,
            }],
        };

        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "add-shared-list-entries");
        assert_eq!(value["localListId"], 7);
        assert_eq!(value["remoteListId"], "r7");
        assert_eq!(value["data"][0]["normalizedUrl"], "example.com/a");
        assert_eq!(value["data"][0]["createdWhen"], "$now");
    }

    #[test]
    fn test_change_title_without_title_parses() {
        let action: Action = serde_json::from_value(json!({
            "type": "change-shared-list-title",
            "localListId": 1,
            "remoteListId": "r1"
        }))
        .unwrap();

        assert_eq!(
            action,
            Action::ChangeSharedListTitle {
                local_list_id: 1,
                remote_list_id: "r1".into(),
                new_title: None,
            }
        );
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let actions = vec![
            Action::EnsurePageInfo { data: vec![] },
            Action::UnshareAnnotations { remote_annotation_ids: vec!["a".into()] },
            Action::RemoveSharedAnnotationListEntries {
                remote_list_id: "l".into(),
                remote_annotation_ids: vec![],
            },
            Action::UpdateAnnotationComment {
                local_annotation_id: "x".into(),
                remote_annotation_id: "y".into(),
                updated_comment: "z".into(),
            },
        ];

        for action in actions {
            let value = serde_json::to_value(&action).unwrap();
            assert_eq!(value["type"], action.kind());
        }
    }

    #[test]
    fn test_default_queue_interaction() {
        assert_eq!(QueueInteraction::default(), QueueInteraction::QueueAndReturn);
    }
}
