//! Chaos Testing for the Sharing Sync Engine
//!
//! This module tests failure scenarios using:
//! 1. **Failing wrappers** - precise error injection at specific call counts
//!    on the backend, the action queue and the shared sync log
//! 2. **Process restarts** - dropping the facade with work still queued
//! 3. **Auth loss** - the user logging out while actions are queued
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sharing_sync_engine::action::{AnnotationData, ListEntryData, PageInfo};
use sharing_sync_engine::queue::{ActionExecutor, QueueScheduler};
use sharing_sync_engine::remote::memory::{InMemoryBackend, RecordingActivityStreams, StaticAuth};
use sharing_sync_engine::remote::{
    ContentSharingBackend, SharedAnnotation, SharedAnnotationListEntry, SharedAnnotationReference,
    SharedList, SharedListData, SharedListReference, SharedPageInfoReference, UserReference,
};
use sharing_sync_engine::storage::local::{Annotation, LocalData};
use sharing_sync_engine::storage::memory::{InMemoryActionQueue, InMemoryStore};
use sharing_sync_engine::storage::sharing::SharingStore;
use sharing_sync_engine::sync::{
    DeviceInfo, MemoryClientSyncLog, MemorySharedSyncLog, MemorySignalTransport, SharedLogBatch,
    SharedLogEntry, SharedSyncLog,
};
use sharing_sync_engine::{
    Action, ActionQueueStore, ContentSharing, QueueEntry, QueueInteraction, Result, RetryConfig,
    SharingEngineConfig, SharingError, StorageChange, StorageChangeEvent, StorageChangeListener,
    StorageError, SyncService,
};

// =============================================================================
// Failing Wrappers - Precise Error Injection
// =============================================================================

/// Decides which calls fail. Call numbers are 1-indexed.
#[derive(Default)]
struct FailurePlan {
    call_count: AtomicU64,
    fail_on_calls: Vec<u64>,
    fail_all: AtomicBool,
}

impl FailurePlan {
    fn on_calls(fail_on_calls: Vec<u64>) -> Self {
        Self {
            fail_on_calls,
            ..Default::default()
        }
    }

    fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.fail_all.load(Ordering::SeqCst) || self.fail_on_calls.contains(&count)
    }

    fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }
}

/// Backend whose mutating calls fail according to a [`FailurePlan`].
struct FailingBackend {
    inner: Arc<InMemoryBackend>,
    plan: FailurePlan,
}

impl FailingBackend {
    fn new(inner: Arc<InMemoryBackend>, plan: FailurePlan) -> Self {
        Self { inner, plan }
    }

    fn maybe_fail(&self, method: &str) -> Result<()> {
        if self.plan.should_fail() {
            Err(SharingError::RemoteCall(format!("injected failure in {method}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContentSharingBackend for FailingBackend {
    async fn create_shared_list(
        &self,
        list: &SharedListData,
        creator: &UserReference,
        local_list_id: i64,
    ) -> Result<SharedListReference> {
        self.maybe_fail("create_shared_list")?;
        self.inner.create_shared_list(list, creator, local_list_id).await
    }

    async fn get_list_by_reference(&self, list: &SharedListReference) -> Result<Option<SharedList>> {
        self.inner.get_list_by_reference(list).await
    }

    async fn create_list_entries(
        &self,
        list: &SharedListReference,
        entries: &[ListEntryData],
        creator: &UserReference,
    ) -> Result<()> {
        self.maybe_fail("create_list_entries")?;
        self.inner.create_list_entries(list, entries, creator).await
    }

    async fn remove_list_entries(&self, list: &SharedListReference, normalized_url: &str) -> Result<()> {
        self.maybe_fail("remove_list_entries")?;
        self.inner.remove_list_entries(list, normalized_url).await
    }

    async fn update_list_title(&self, list: &SharedListReference, title: &str) -> Result<()> {
        self.maybe_fail("update_list_title")?;
        self.inner.update_list_title(list, title).await
    }

    async fn create_annotations(
        &self,
        creator: &UserReference,
        lists: &[SharedListReference],
        annotations_by_page: &BTreeMap<String, Vec<AnnotationData>>,
    ) -> Result<BTreeMap<String, SharedAnnotationReference>> {
        self.maybe_fail("create_annotations")?;
        self.inner.create_annotations(creator, lists, annotations_by_page).await
    }

    async fn get_annotation(&self, annotation: &SharedAnnotationReference) -> Result<Option<SharedAnnotation>> {
        self.inner.get_annotation(annotation).await
    }

    async fn remove_annotations(&self, annotations: &[SharedAnnotationReference]) -> Result<()> {
        self.maybe_fail("remove_annotations")?;
        self.inner.remove_annotations(annotations).await
    }

    async fn add_annotations_to_lists(
        &self,
        creator: &UserReference,
        lists: &[SharedListReference],
        annotations: &[SharedAnnotationListEntry],
    ) -> Result<()> {
        self.maybe_fail("add_annotations_to_lists")?;
        self.inner.add_annotations_to_lists(creator, lists, annotations).await
    }

    async fn remove_annotations_from_lists(
        &self,
        lists: &[SharedListReference],
        annotations: &[SharedAnnotationReference],
    ) -> Result<()> {
        self.maybe_fail("remove_annotations_from_lists")?;
        self.inner.remove_annotations_from_lists(lists, annotations).await
    }

    async fn update_annotation_comment(&self, annotation: &SharedAnnotationReference, comment: &str) -> Result<()> {
        self.maybe_fail("update_annotation_comment")?;
        self.inner.update_annotation_comment(annotation, comment).await
    }

    async fn ensure_page_info(&self, page: &PageInfo, creator: &UserReference) -> Result<SharedPageInfoReference> {
        self.maybe_fail("ensure_page_info")?;
        self.inner.ensure_page_info(page, creator).await
    }
}

/// Action queue whose `enqueue` fails according to a [`FailurePlan`].
struct FailingActionQueue {
    inner: InMemoryActionQueue,
    plan: FailurePlan,
}

#[async_trait]
impl ActionQueueStore for FailingActionQueue {
    async fn enqueue(&self, action: &Action) -> std::result::Result<i64, StorageError> {
        if self.plan.should_fail() {
            return Err(StorageError::Backend("injected enqueue failure".into()));
        }
        self.inner.enqueue(action).await
    }

    async fn peek_oldest(&self) -> std::result::Result<Option<QueueEntry>, StorageError> {
        self.inner.peek_oldest().await
    }

    async fn remove(&self, id: i64) -> std::result::Result<(), StorageError> {
        self.inner.remove(id).await
    }

    async fn len(&self) -> std::result::Result<u64, StorageError> {
        self.inner.len().await
    }
}

/// Shared log whose writes fail while `plan.fail_all` is set.
struct FailingSharedLog {
    inner: MemorySharedSyncLog,
    plan: FailurePlan,
}

#[async_trait]
impl SharedSyncLog for FailingSharedLog {
    async fn create_device_id(&self, user: &UserReference, platform: &str) -> Result<String> {
        self.inner.create_device_id(user, platform).await
    }

    async fn write_entries(&self, user: &UserReference, entries: Vec<SharedLogEntry>) -> Result<()> {
        if self.plan.should_fail() {
            return Err(SharingError::RemoteCall("shared log unavailable".into()));
        }
        self.inner.write_entries(user, entries).await
    }

    async fn get_unsynced_entries(
        &self,
        user: &UserReference,
        device_id: &str,
        cursor: u64,
        limit: usize,
    ) -> Result<SharedLogBatch> {
        self.inner.get_unsynced_entries(user, device_id, cursor, limit).await
    }

    async fn list_devices(&self, user: &UserReference) -> Result<Vec<DeviceInfo>> {
        self.inner.list_devices(user).await
    }

    async fn remove_device(&self, user: &UserReference, device_id: &str) -> Result<()> {
        self.inner.remove_device(user, device_id).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn title(list: &str, new_title: &str) -> Action {
    Action::ChangeSharedListTitle {
        local_list_id: 1,
        remote_list_id: list.into(),
        new_title: Some(new_title.into()),
    }
}

fn scheduler_over(
    backend: Arc<dyn ContentSharingBackend>,
    auth: Arc<StaticAuth>,
    queue: Arc<dyn ActionQueueStore>,
    retry_interval: Duration,
) -> Arc<QueueScheduler> {
    let sharing = SharingStore::new(Arc::new(InMemoryStore::new()));
    let executor = Arc::new(ActionExecutor::new(
        backend,
        auth,
        Arc::new(RecordingActivityStreams::new()),
        sharing,
    ));
    QueueScheduler::new(queue, executor, retry_interval)
}

fn titles_seen(backend: &InMemoryBackend) -> Vec<String> {
    backend
        .calls()
        .into_iter()
        .filter(|c| c.method == "update_list_title")
        .map(|c| c.detail)
        .collect()
}

// =============================================================================
// Queue failures
// =============================================================================

#[tokio::test]
async fn chaos_rejected_middle_action_blocks_followers() {
    let backend = Arc::new(InMemoryBackend::new());
    let queue = Arc::new(InMemoryActionQueue::new());
    let scheduler = scheduler_over(
        backend.clone(),
        Arc::new(StaticAuth::logged_in("user-1")),
        queue.clone(),
        Duration::from_secs(300),
    );

    queue.enqueue(&title("list-a", "A")).await.unwrap();
    queue.enqueue(&title("list-b", "B")).await.unwrap();
    queue.enqueue(&title("list-c", "C")).await.unwrap();

    backend.reject_matching(Some("list-b"));
    let result = scheduler.execute_pending_actions().await;
    assert!(matches!(result, Err(SharingError::RemoteCall(_))));

    // A is gone, B and C wait in order
    assert_eq!(queue.actions(), vec![title("list-b", "B"), title("list-c", "C")]);
    assert_eq!(titles_seen(&backend), vec!["list-a A", "list-b B"]);

    backend.reject_matching(None);
    scheduler.force_pending_actions_retry().await.unwrap();
    assert!(queue.actions().is_empty());
    assert_eq!(
        titles_seen(&backend),
        vec!["list-a A", "list-b B", "list-b B", "list-c C"]
    );
}

#[tokio::test(start_paused = true)]
async fn chaos_transient_failure_is_retried_by_timer() {
    let inner = Arc::new(InMemoryBackend::new());
    let backend = Arc::new(FailingBackend::new(inner.clone(), FailurePlan::on_calls(vec![1])));
    let queue = Arc::new(InMemoryActionQueue::new());
    let scheduler = scheduler_over(
        backend.clone(),
        Arc::new(StaticAuth::logged_in("user-1")),
        queue.clone(),
        Duration::from_secs(60),
    );

    // Fire-and-forget: the caller never sees the failure
    scheduler
        .schedule_action(title("list-a", "A"), QueueInteraction::QueueAndReturn)
        .await
        .unwrap();
    scheduler.wait_for_idle().await.unwrap();
    assert_eq!(queue.actions().len(), 1);
    assert_eq!(backend.plan.calls(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    scheduler.wait_for_idle().await.unwrap();

    assert!(queue.actions().is_empty());
    assert_eq!(backend.plan.calls(), 2);
    assert_eq!(titles_seen(&inner), vec!["list-a A"]);
}

#[tokio::test]
async fn chaos_logout_halts_queue_without_remote_calls() {
    let backend = Arc::new(InMemoryBackend::new());
    let auth = Arc::new(StaticAuth::logged_in("user-1"));
    let queue = Arc::new(InMemoryActionQueue::new());
    let scheduler = scheduler_over(backend.clone(), auth.clone(), queue.clone(), Duration::from_secs(300));

    auth.set_user(None);
    let result = scheduler
        .schedule_action(title("list-a", "A"), QueueInteraction::QueueAndAwait)
        .await;
    assert!(matches!(result, Err(SharingError::AuthRequired)));
    assert!(backend.calls().is_empty());
    assert_eq!(queue.actions().len(), 1);

    auth.set_user(Some(UserReference::new("user-1")));
    scheduler.force_pending_actions_retry().await.unwrap();
    assert!(queue.actions().is_empty());
    assert_eq!(titles_seen(&backend), vec!["list-a A"]);
}

#[tokio::test]
async fn chaos_enqueue_failure_reaches_caller_and_runs_nothing() {
    let backend = Arc::new(InMemoryBackend::new());
    let queue = Arc::new(FailingActionQueue {
        inner: InMemoryActionQueue::new(),
        plan: FailurePlan::on_calls(vec![2]),
    });
    let scheduler = scheduler_over(
        backend.clone(),
        Arc::new(StaticAuth::logged_in("user-1")),
        queue.clone(),
        Duration::from_secs(300),
    );

    scheduler
        .schedule_action(title("list-a", "A"), QueueInteraction::QueueAndAwait)
        .await
        .unwrap();
    let result = scheduler
        .schedule_action(title("list-b", "B"), QueueInteraction::QueueAndAwait)
        .await;
    assert!(matches!(result, Err(SharingError::Storage(_))));

    scheduler
        .schedule_action(title("list-c", "C"), QueueInteraction::QueueAndAwait)
        .await
        .unwrap();
    assert_eq!(titles_seen(&backend), vec!["list-a A", "list-c C"]);
    assert_eq!(queue.inner.actions().len(), 0);
}

// =============================================================================
// Restarts
// =============================================================================

#[tokio::test]
async fn chaos_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = SharingEngineConfig {
        queue_path: Some(dir.path().join("queue.db").to_string_lossy().to_string()),
        ..Default::default()
    };
    let store = Arc::new(InMemoryStore::new());
    let local = LocalData::new(store.clone());
    local.upsert_page("a.com", "https://a.com", Some("A")).await.unwrap();
    local
        .create_annotation(&Annotation {
            url: "a.com/#1".into(),
            page_url: "a.com".into(),
            body: None,
            comment: Some("note".into()),
            selector: None,
            created_when: Some(1),
        })
        .await
        .unwrap();

    // First run: logged out, actions are persisted but cannot execute
    {
        let backend = Arc::new(InMemoryBackend::new());
        let sharing = ContentSharing::open(
            config.clone(),
            store.clone(),
            backend.clone(),
            Arc::new(StaticAuth::logged_out()),
            Arc::new(RecordingActivityStreams::new()),
        )
        .await
        .unwrap();
        sharing
            .share_annotation("a.com/#1", Some(QueueInteraction::QueueAndReturn))
            .await
            .unwrap();
        sharing.wait_for_sync().await.unwrap();
        assert_eq!(sharing.pending_action_count().await.unwrap(), 2);
        assert!(backend.calls().is_empty());
    }

    // Second run: logged in, setup replays the queue
    let backend = Arc::new(InMemoryBackend::new());
    let sharing = ContentSharing::open(
        config,
        store,
        backend.clone(),
        Arc::new(StaticAuth::logged_in("user-1")),
        Arc::new(RecordingActivityStreams::new()),
    )
    .await
    .unwrap();
    sharing.setup().await;

    assert_eq!(sharing.pending_action_count().await.unwrap(), 0);
    assert_eq!(backend.call_count("ensure_page_info"), 1);
    assert_eq!(backend.call_count("create_annotations"), 1);
    let link = sharing.get_remote_annotation_link("a.com/#1").await.unwrap();
    assert!(link.is_some());
}

// =============================================================================
// Sync failures
// =============================================================================

#[tokio::test]
async fn chaos_shared_log_outage_keeps_entries_unsynced() {
    let shared = Arc::new(FailingSharedLog {
        inner: MemorySharedSyncLog::new(),
        plan: FailurePlan::default(),
    });
    let client_log = Arc::new(MemoryClientSyncLog::new());
    let service = Arc::new(
        SyncService::new(
            &SharingEngineConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticAuth::logged_in("user-1")),
            client_log.clone(),
            shared.clone(),
            Arc::new(MemorySignalTransport::new()),
        )
        .with_retry_config(RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
            max_retries: Some(3),
        }),
    );
    service.enable_continuous_sync().await.unwrap();

    service
        .handle_change(&StorageChangeEvent::local(vec![StorageChange::create(
            "customLists",
            json!(1),
            json!({"id": 1, "name": "Reading"}),
        )]))
        .await
        .unwrap();

    shared.plan.set_fail_all(true);
    assert!(service.force_incremental_sync().await.is_err());
    assert_eq!(shared.plan.calls(), 3);
    assert!(client_log.entries().iter().all(|e| e.needs_sync));

    shared.plan.set_fail_all(false);
    service.force_incremental_sync().await.unwrap();
    assert!(client_log.entries().iter().all(|e| !e.needs_sync));
    assert_eq!(shared.inner.len(&UserReference::new("user-1")), 1);
    service.tear_down();
}
