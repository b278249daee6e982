//! Property-based tests (fuzzing) for the sharing engine.
//!
//! Uses proptest to generate random/malformed inputs and verify the engine
//! never panics, only returns clean errors, and keeps the queue in order.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::Value;

use sharing_sync_engine::queue::{ActionExecutor, QueueScheduler};
use sharing_sync_engine::remote::memory::{InMemoryBackend, RecordingActivityStreams, StaticAuth};
use sharing_sync_engine::storage::memory::{InMemoryActionQueue, InMemoryStore};
use sharing_sync_engine::storage::object_key;
use sharing_sync_engine::storage::sharing::SharingStore;
use sharing_sync_engine::storage::{ANNOTATIONS, CUSTOM_LISTS, PAGE_LIST_ENTRIES};
use sharing_sync_engine::sync::InitMessage;
use sharing_sync_engine::{
    Action, ContentSharing, QueueInteraction, SharingEngineConfig, StorageChange, StorageChangeEvent,
    UserMessage,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// A change against one of the collections the watcher reacts to.
fn watched_change_strategy() -> impl Strategy<Value = StorageChange> {
    let collection = prop_oneof![
        Just(PAGE_LIST_ENTRIES.to_string()),
        Just(CUSTOM_LISTS.to_string()),
        Just(ANNOTATIONS.to_string()),
    ];
    let pks = prop::collection::vec(arbitrary_json_strategy(), 0..5);

    (collection, 0u8..3, arbitrary_json_strategy(), pks, arbitrary_json_strategy()).prop_map(
        |(collection, op, pk, pks, body)| match op {
            0 => StorageChange::create(collection, pk, body),
            1 => StorageChange::modify(collection, pks, body),
            _ => StorageChange::delete(collection, pks),
        },
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Deserialization Fuzz Tests
// =============================================================================

proptest! {
    /// Queued actions are read back from disk; garbage must fail cleanly
    #[test]
    fn fuzz_action_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = serde_json::from_slice::<Action>(&bytes);
    }

    #[test]
    fn fuzz_action_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let _ = serde_json::from_value::<Action>(json);
    }

    #[test]
    fn fuzz_user_message_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let _ = serde_json::from_value::<UserMessage>(json);
    }

    #[test]
    fn fuzz_change_event_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let _ = serde_json::from_value::<StorageChangeEvent>(json);
    }

    /// Init messages are pasted in by the user
    #[test]
    fn fuzz_init_message_decode(message in ".*") {
        let _ = InitMessage::decode(&message);
    }
}

// =============================================================================
// Key Derivation Tests
// =============================================================================

proptest! {
    #[test]
    fn prop_object_key_never_panics(pk in arbitrary_json_strategy()) {
        let _ = object_key(&pk);
    }

    /// Compound list-entry keys keep both parts
    #[test]
    fn prop_list_entry_key_shape(list_id in any::<i64>(), page in "[a-z]{1,20}\\.com") {
        let key = object_key(&serde_json::json!([list_id, page.clone()]));
        prop_assert_eq!(key, format!("{list_id}|{page}"));
    }
}

// =============================================================================
// Engine Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever order actions are scheduled in is the order the backend
    /// sees them, however the submissions mix awaiting and returning.
    #[test]
    fn prop_queue_preserves_submission_order(
        modes in prop::collection::vec(any::<bool>(), 1..30),
    ) {
        let seen = runtime().block_on(async {
            let backend = Arc::new(InMemoryBackend::new());
            let executor = Arc::new(ActionExecutor::new(
                backend.clone(),
                Arc::new(StaticAuth::logged_in("user-1")),
                Arc::new(RecordingActivityStreams::new()),
                SharingStore::new(Arc::new(InMemoryStore::new())),
            ));
            let scheduler = QueueScheduler::new(
                Arc::new(InMemoryActionQueue::new()),
                executor,
                Duration::from_secs(300),
            );

            for (i, awaits) in modes.iter().enumerate() {
                let mode = if *awaits {
                    QueueInteraction::QueueAndAwait
                } else {
                    QueueInteraction::QueueAndReturn
                };
                let action = Action::ChangeSharedListTitle {
                    local_list_id: 1,
                    remote_list_id: "list-1".into(),
                    new_title: Some(format!("t{i}")),
                };
                scheduler.schedule_action(action, mode).await.unwrap();
            }
            scheduler.wait_for_idle().await.unwrap();

            backend
                .calls()
                .into_iter()
                .filter(|c| c.method == "update_list_title")
                .map(|c| c.detail)
                .collect::<Vec<_>>()
        });

        let expected: Vec<String> = (0..modes.len()).map(|i| format!("list-1 t{i}")).collect();
        prop_assert_eq!(seen, expected);
    }

    /// Malformed change events never fail the storage hook, and without
    /// shared lists nothing gets queued.
    #[test]
    fn prop_storage_hook_tolerates_malformed_changes(
        changes in prop::collection::vec(watched_change_strategy(), 0..8),
    ) {
        let (result, pending) = runtime().block_on(async {
            let queue = Arc::new(InMemoryActionQueue::new());
            let sharing = ContentSharing::new(
                SharingEngineConfig::default(),
                Arc::new(InMemoryStore::new()),
                queue.clone(),
                Arc::new(InMemoryBackend::new()),
                Arc::new(StaticAuth::logged_in("user-1")),
                Arc::new(RecordingActivityStreams::new()),
            );
            let result = sharing
                .handle_post_storage_change(&StorageChangeEvent::local(changes))
                .await;
            (result, queue.actions().len())
        });

        prop_assert!(result.is_ok());
        prop_assert_eq!(pending, 0);
    }
}
