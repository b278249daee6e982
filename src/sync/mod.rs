// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync reconciliation between two full local databases.
//!
//! Two modes:
//!
//! - **Initial sync** ([`initial`]): a one-time snapshot transfer between two
//!   devices over a [`SignalTransport`], establishing a shared baseline.
//! - **Continuous sync** ([`log`]): periodic rounds that push this device's
//!   unsynced [`ClientSyncLog`] entries to the [`SharedSyncLog`] and pull
//!   what the user's other devices wrote.
//!
//! Both report through a broadcast of [`SyncEvent`]s, relayed verbatim to
//! whoever subscribed.
//!
//! Changes pulled from the shared log are written with
//! [`ChangeOrigin::Sync`](crate::cdc::ChangeOrigin::Sync) and forwarded to
//! the registered change listener, so the sharing queue can tell them apart
//! from the user's own writes.

pub mod initial;
pub mod log;
pub mod settings;

pub use initial::{InitMessage, MemorySignalTransport, Package, SignalChannel, SignalTransport, SyncRole};
pub use log::{
    ClientLogEntry, ClientSyncLog, DeviceInfo, MemoryClientSyncLog, MemorySharedSyncLog, SharedLogBatch,
    SharedLogEntry, SharedSyncLog,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::cdc::{ChangeOrigin, StorageChange, StorageChangeEvent, StorageChangeListener};
use crate::config::SharingEngineConfig;
use crate::error::{Result, SharingError};
use crate::metrics;
use crate::queue::now_millis;
use crate::remote::{AuthProvider, UserReference};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{ObjectStore, StorageError};
use crate::storage::{object_key, SYNCED_COLLECTIONS};
use initial::Transfer;
use settings::{SyncSettingStore, CONTINUOUS_SYNC_ENABLED, DEVICE_ID, LAST_SYNC_TIMESTAMP, LOG_CURSOR};

/// Outcome of an initial sync as seen by its waiters. `None` while the
/// transfer runs; the sender is dropped without a value when it is aborted.
type InitialOutcome = Option<std::result::Result<(), String>>;

struct InitialSync {
    abort: AbortHandle,
    outcome: watch::Receiver<InitialOutcome>,
}

/// Platform name registered with the shared log.
const DEVICE_PLATFORM: &str = "rust";

/// Fixed event vocabulary of the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    Progress {
        role: SyncRole,
        collection: String,
        objects: usize,
    },
    RoleSwitch {
        before: SyncRole,
        after: SyncRole,
    },
    Error {
        error: String,
    },
    Finished,
    ChannelTimeout,
    PackageStalled,
}

/// Host hook run on every object received from another device, right
/// after it arrives and before it is written.
#[async_trait]
pub trait PostReceiveProcessor: Send + Sync {
    /// Return the object to write, or `None` to drop it.
    async fn process(&self, collection: &str, key: &str, object: Value) -> Result<Option<Value>>;
}

pub struct SyncService {
    store: Arc<dyn ObjectStore>,
    auth: Arc<dyn AuthProvider>,
    client_log: Arc<dyn ClientSyncLog>,
    shared_log: Arc<dyn SharedSyncLog>,
    transport: Arc<dyn SignalTransport>,
    processor: Option<Arc<dyn PostReceiveProcessor>>,
    listener: RwLock<Option<Arc<dyn StorageChangeListener>>>,
    settings: SyncSettingStore,
    events: broadcast::Sender<SyncEvent>,
    retry: RetryConfig,
    batch_size: usize,
    interval: Duration,
    channel_timeout: Duration,
    package_timeout: Duration,
    auth_wait: Duration,
    device_id: Option<String>,
    /// The latest initial sync, kept after it finishes so late waiters
    /// still see its outcome
    initial: Mutex<Option<InitialSync>>,
    /// One incremental round at a time
    syncing: AsyncMutex<()>,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    pub fn new(
        config: &SharingEngineConfig,
        store: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthProvider>,
        client_log: Arc<dyn ClientSyncLog>,
        shared_log: Arc<dyn SharedSyncLog>,
        transport: Arc<dyn SignalTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            settings: SyncSettingStore::new(store.clone()),
            store,
            auth,
            client_log,
            shared_log,
            transport,
            processor: None,
            listener: RwLock::new(None),
            events,
            retry: RetryConfig::sync_round(),
            batch_size: config.continuous_sync_batch_size.max(1),
            interval: config.incremental_sync_interval(),
            channel_timeout: config.channel_timeout(),
            package_timeout: config.package_timeout(),
            auth_wait: config.auth_wait(),
            device_id: config.device_id.clone(),
            initial: Mutex::new(None),
            syncing: AsyncMutex::new(()),
            periodic: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_post_receive_processor(mut self, processor: Arc<dyn PostReceiveProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Where changes pulled from other devices are forwarded.
    pub fn set_change_listener(&self, listener: Arc<dyn StorageChangeListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Initial sync
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start an initial sync as the initiator and return the init message
    /// to hand to the other device.
    ///
    /// The initiator sends its data unless `preferred_role` asks to receive,
    /// in which case a `RoleSwitch` event is emitted.
    #[instrument(skip(self))]
    pub async fn request_initial_sync(self: &Arc<Self>, preferred_role: Option<SyncRole>) -> Result<String> {
        let role = preferred_role.unwrap_or(SyncRole::Sender);
        if role != SyncRole::Sender {
            let _ = self.events.send(SyncEvent::RoleSwitch {
                before: SyncRole::Sender,
                after: role,
            });
        }

        let message = InitMessage {
            channel_id: uuid::Uuid::new_v4().to_string(),
            initiator_role: role,
        };
        let channel = self.transport.open_channel(&message.channel_id, true).await?;
        self.start_transfer(channel, role);
        message.encode()
    }

    /// Join an initial sync started on another device.
    #[instrument(skip(self, init_message))]
    pub async fn answer_initial_sync(self: &Arc<Self>, init_message: &str) -> Result<()> {
        let message = InitMessage::decode(init_message)?;
        let channel = self.transport.open_channel(&message.channel_id, false).await?;
        self.start_transfer(channel, message.initiator_role.opposite());
        Ok(())
    }

    /// Wait for the running initial sync to finish.
    ///
    /// Any number of callers may wait; all of them see the same outcome.
    pub async fn wait_for_initial_sync(&self) -> Result<()> {
        let mut outcome = self
            .initial
            .lock()
            .as_ref()
            .map(|sync| sync.outcome.clone())
            .ok_or_else(|| SharingError::Sync("no initial sync in progress".into()))?;

        let finished = outcome.wait_for(Option::is_some).await.ok().and_then(|o| o.clone());
        match finished {
            Some(Ok(())) => Ok(()),
            Some(Err(error)) => Err(SharingError::Sync(error)),
            // Sender dropped before publishing: the task was aborted
            None => Err(SharingError::Sync("initial sync aborted".into())),
        }
    }

    /// Abort the running initial sync. Closing our end makes the peer fail too.
    ///
    /// Pending and later waiters resolve with an abort error.
    pub fn abort_initial_sync(&self) {
        if let Some(sync) = self.initial.lock().as_ref() {
            if !sync.abort.is_finished() {
                info!("Aborting initial sync");
                metrics::record_initial_sync_event("aborted");
                sync.abort.abort();
            }
        }
    }

    fn start_transfer(self: &Arc<Self>, channel: Box<dyn SignalChannel>, role: SyncRole) {
        metrics::record_initial_sync_event("started");
        let (outcome_tx, outcome) = watch::channel(None);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let transfer = Transfer {
                store: this.store.clone(),
                processor: this.processor.clone(),
                events: this.events.clone(),
                channel_timeout: this.channel_timeout,
                package_timeout: this.package_timeout,
            };

            let result = match transfer.run(channel.as_ref(), role).await {
                Ok(()) => this.store_last_sync_timestamp().await,
                Err(e) => Err(e),
            };
            match &result {
                Ok(()) => {
                    info!(?role, "Initial sync finished");
                    metrics::record_initial_sync_event("finished");
                    let _ = this.events.send(SyncEvent::Finished);
                }
                Err(e) => {
                    warn!(?role, error = %e, "Initial sync failed");
                    metrics::record_initial_sync_event("failed");
                    let _ = this.events.send(SyncEvent::Error { error: e.to_string() });
                }
            }
            outcome_tx.send_replace(Some(result.map_err(|e| e.to_string())));
        });

        let sync = InitialSync {
            abort: handle.abort_handle(),
            outcome,
        };
        if let Some(previous) = self.initial.lock().replace(sync) {
            previous.abort.abort();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Continuous sync
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register this device with the shared log and start periodic rounds.
    #[instrument(skip(self))]
    pub async fn enable_continuous_sync(self: &Arc<Self>) -> Result<()> {
        let user = self.require_user().await?;
        let device_id = self.ensure_device_id(&user).await?;
        self.settings.store_setting(CONTINUOUS_SYNC_ENABLED, true).await?;
        self.start_periodic();
        info!(device_id, "Continuous sync enabled");
        Ok(())
    }

    pub async fn is_continuous_sync_enabled(&self) -> Result<bool> {
        Ok(self
            .settings
            .retrieve_setting::<bool>(CONTINUOUS_SYNC_ENABLED)
            .await?
            .unwrap_or(false))
    }

    /// Run one incremental round now. A no-op while continuous sync is off.
    #[instrument(skip(self))]
    pub async fn force_incremental_sync(&self) -> Result<()> {
        if !self.is_continuous_sync_enabled().await? {
            debug!("Continuous sync not enabled, skipping incremental sync");
            return Ok(());
        }

        let _round = self.syncing.lock().await;
        let started = Instant::now();
        let result = self.sync_round().await;
        metrics::record_sync_round(result.is_ok(), started.elapsed());

        match result {
            Ok((pushed, pulled)) => {
                self.store_last_sync_timestamp().await?;
                info!(pushed, pulled, "Incremental sync finished");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Incremental sync failed");
                Err(e)
            }
        }
    }

    /// Resume periodic rounds if enabled, then run a first round once a
    /// user is logged in, waiting briefly for a login if there is none yet.
    pub async fn setup(self: &Arc<Self>) -> Result<()> {
        if self.is_continuous_sync_enabled().await? {
            self.start_periodic();
        }

        let mut auth_changes = self.auth.subscribe_changes();
        if self.sync_if_authenticated().await? {
            return Ok(());
        }

        let _ = tokio::time::timeout(self.auth_wait, auth_changes.changed()).await;
        self.sync_if_authenticated().await?;
        Ok(())
    }

    /// Stop periodic rounds.
    pub fn tear_down(&self) {
        if let Some(handle) = self.periodic.lock().take() {
            handle.abort();
        }
    }

    /// When the last initial or incremental sync succeeded.
    pub async fn retrieve_last_sync_timestamp(&self) -> Result<i64> {
        self.settings
            .retrieve_setting(LAST_SYNC_TIMESTAMP)
            .await?
            .ok_or_else(|| SharingError::NotFound("no last sync timestamp exists".into()))
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let user = self.require_user().await?;
        self.shared_log.list_devices(&user).await
    }

    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let user = self.require_user().await?;
        self.shared_log.remove_device(&user, device_id).await
    }

    async fn sync_if_authenticated(&self) -> Result<bool> {
        if self.auth.current_user().await?.is_none() {
            return Ok(false);
        }
        self.force_incremental_sync().await?;
        Ok(true)
    }

    fn start_periodic(self: &Arc<Self>) {
        let service = Arc::downgrade(self);
        let period = self.interval.max(Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else { break };
                if let Err(e) = service.force_incremental_sync().await {
                    debug!(error = %e, "Periodic sync round failed");
                }
            }
        });

        if let Some(previous) = self.periodic.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Push, then pull. Returns how many entries went each way.
    async fn sync_round(&self) -> Result<(usize, usize)> {
        let user = self.require_user().await?;
        let device_id = self.ensure_device_id(&user).await?;
        let pushed = self.push(&user, &device_id).await?;
        let pulled = self.pull(&user, &device_id).await?;
        Ok((pushed, pulled))
    }

    async fn push(&self, user: &UserReference, device_id: &str) -> Result<usize> {
        let mut pushed = 0;
        loop {
            let batch = self.client_log.get_unsynced(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let seqs: Vec<u64> = batch.iter().map(|e| e.seq).collect();
            let entries: Vec<SharedLogEntry> = batch
                .into_iter()
                .map(|e| SharedLogEntry {
                    device_id: device_id.to_string(),
                    created_on: e.created_on,
                    change: e.change,
                })
                .collect();

            retry("shared_log_write", &self.retry, || async {
                self.shared_log.write_entries(user, entries.clone()).await
            })
            .await?;
            self.client_log.mark_synced(&seqs).await?;

            pushed += seqs.len();
            metrics::record_sync_entries("push", seqs.len());
            if seqs.len() < self.batch_size {
                break;
            }
        }
        Ok(pushed)
    }

    async fn pull(&self, user: &UserReference, device_id: &str) -> Result<usize> {
        let mut pulled = 0;
        loop {
            let cursor: u64 = self.settings.retrieve_setting(LOG_CURSOR).await?.unwrap_or(0);
            let batch = retry("shared_log_read", &self.retry, || async {
                self.shared_log
                    .get_unsynced_entries(user, device_id, cursor, self.batch_size)
                    .await
            })
            .await?;
            if batch.cursor == cursor {
                break;
            }

            let mut applied = Vec::with_capacity(batch.entries.len());
            for entry in &batch.entries {
                if let Some(change) = self.apply_change(&entry.change).await? {
                    applied.push(change);
                }
            }
            self.settings.store_setting(LOG_CURSOR, batch.cursor).await?;

            pulled += batch.entries.len();
            metrics::record_sync_entries("pull", batch.entries.len());
            if !applied.is_empty() {
                self.forward(StorageChangeEvent::from_sync(applied)).await;
            }
        }
        Ok(pulled)
    }

    /// Write one pulled change. Returns the change as applied, or `None`
    /// if the post-receive processor dropped it.
    async fn apply_change(&self, change: &StorageChange) -> Result<Option<StorageChange>> {
        match change {
            StorageChange::Create { collection, pk, values } => {
                let key = object_key(pk);
                let values = match &self.processor {
                    Some(processor) => match processor.process(collection, &key, values.clone()).await? {
                        Some(values) => values,
                        None => return Ok(None),
                    },
                    None => values.clone(),
                };
                self.store.create(collection, &key, values.clone()).await?;
                Ok(Some(StorageChange::create(collection.clone(), pk.clone(), values)))
            }
            StorageChange::Modify { collection, pks, updates } => {
                for pk in pks {
                    match self.store.update(collection, &object_key(pk), updates.clone()).await {
                        Ok(()) => {}
                        // Modified on the other device, deleted here
                        Err(StorageError::NotFound) => debug!(collection, ?pk, "Pulled update for missing object"),
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(Some(change.clone()))
            }
            StorageChange::Delete { collection, pks } => {
                for pk in pks {
                    self.store.delete(collection, &object_key(pk)).await?;
                }
                Ok(Some(change.clone()))
            }
        }
    }

    async fn forward(&self, event: StorageChangeEvent) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            if let Err(e) = listener.handle_change(&event).await {
                warn!(error = %e, "Change listener failed on pulled changes");
            }
        }
    }

    async fn require_user(&self) -> Result<UserReference> {
        self.auth.current_user().await?.ok_or(SharingError::AuthRequired)
    }

    async fn ensure_device_id(&self, user: &UserReference) -> Result<String> {
        if let Some(device_id) = &self.device_id {
            return Ok(device_id.clone());
        }
        if let Some(device_id) = self.settings.retrieve_setting::<String>(DEVICE_ID).await? {
            return Ok(device_id);
        }

        let device_id = self.shared_log.create_device_id(user, DEVICE_PLATFORM).await?;
        self.settings.store_setting(DEVICE_ID, &device_id).await?;
        info!(device_id, "Registered sync device");
        Ok(device_id)
    }

    async fn store_last_sync_timestamp(&self) -> Result<()> {
        self.settings.store_setting(LAST_SYNC_TIMESTAMP, now_millis()).await
    }
}

/// Records local writes to synced collections in the client log.
#[async_trait]
impl StorageChangeListener for SyncService {
    async fn handle_change(&self, event: &StorageChangeEvent) -> Result<()> {
        if event.origin != ChangeOrigin::Local {
            return Ok(());
        }

        let changes: Vec<StorageChange> = event
            .changes
            .iter()
            .filter(|c| SYNCED_COLLECTIONS.contains(&c.collection()))
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(());
        }
        self.client_log.append(now_millis(), &changes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::StaticAuth;
    use crate::storage::memory::InMemoryStore;
    use crate::storage::{ACTION_QUEUE, CUSTOM_LISTS};
    use serde_json::json;

    struct Device {
        store: Arc<InMemoryStore>,
        client_log: Arc<MemoryClientSyncLog>,
        service: Arc<SyncService>,
    }

    fn device(
        shared_log: &Arc<MemorySharedSyncLog>,
        transport: &Arc<MemorySignalTransport>,
        auth: Arc<StaticAuth>,
        batch_size: usize,
    ) -> Device {
        let store = Arc::new(InMemoryStore::new());
        let client_log = Arc::new(MemoryClientSyncLog::new());
        let config = SharingEngineConfig {
            continuous_sync_batch_size: batch_size,
            ..Default::default()
        };
        let service = SyncService::new(
            &config,
            store.clone(),
            auth,
            client_log.clone(),
            shared_log.clone(),
            transport.clone(),
        )
        .with_retry_config(RetryConfig::test());
        Device { store, client_log, service: Arc::new(service) }
    }

    fn list_created(id: i64) -> StorageChangeEvent {
        StorageChangeEvent::local(vec![StorageChange::create(
            CUSTOM_LISTS,
            json!(id),
            json!({"id": id, "name": format!("list {id}")}),
        )])
    }

    /// Listener that remembers every event it saw.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<StorageChangeEvent>>);

    #[async_trait]
    impl StorageChangeListener for Recorder {
        async fn handle_change(&self, event: &StorageChangeEvent) -> Result<()> {
            self.0.lock().push(event.clone());
            Ok(())
        }
    }

    /// Drops annotations, tags lists.
    struct Backfill;

    #[async_trait]
    impl PostReceiveProcessor for Backfill {
        async fn process(&self, collection: &str, _key: &str, mut object: Value) -> Result<Option<Value>> {
            if collection != CUSTOM_LISTS {
                return Ok(None);
            }
            object["backfilled"] = json!(true);
            Ok(Some(object))
        }
    }

    #[tokio::test]
    async fn test_local_changes_recorded_only_for_synced_collections() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let d = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);

        d.service.handle_change(&list_created(1)).await.unwrap();
        d.service
            .handle_change(&StorageChangeEvent::local(vec![StorageChange::create(
                ACTION_QUEUE,
                json!(1),
                json!({}),
            )]))
            .await
            .unwrap();
        d.service.handle_change(&StorageChangeEvent::from_sync(vec![])).await.unwrap();

        assert_eq!(d.client_log.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_incremental_sync_moves_changes_between_devices() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let a = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 2);
        let b = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 2);
        let recorder = Arc::new(Recorder::default());
        b.service.set_change_listener(recorder.clone());

        a.service.enable_continuous_sync().await.unwrap();
        b.service.enable_continuous_sync().await.unwrap();

        for id in 1..=5 {
            let event = list_created(id);
            a.store.create(CUSTOM_LISTS, &id.to_string(), json!({"id": id})).await.unwrap();
            a.service.handle_change(&event).await.unwrap();
        }

        a.service.force_incremental_sync().await.unwrap();
        assert_eq!(shared.len(&UserReference::new("u1")), 5);
        assert!(a.client_log.entries().iter().all(|e| !e.needs_sync));

        b.service.force_incremental_sync().await.unwrap();
        for id in 1..=5 {
            assert!(b.store.get(CUSTOM_LISTS, &id.to_string()).await.unwrap().is_some());
        }
        let forwarded = recorder.0.lock().clone();
        assert!(!forwarded.is_empty());
        assert!(forwarded.iter().all(|e| e.origin == ChangeOrigin::Sync));
        assert_eq!(forwarded.iter().map(|e| e.changes.len()).sum::<usize>(), 5);

        assert!(b.service.retrieve_last_sync_timestamp().await.is_ok());
        b.service.tear_down();
        a.service.tear_down();
    }

    #[tokio::test]
    async fn test_post_receive_processor_enriches_and_drops() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let a = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);
        let b = {
            let store = Arc::new(InMemoryStore::new());
            let service = SyncService::new(
                &SharingEngineConfig::default(),
                store.clone(),
                Arc::new(StaticAuth::logged_in("u1")),
                Arc::new(MemoryClientSyncLog::new()),
                shared.clone(),
                transport.clone(),
            )
            .with_post_receive_processor(Arc::new(Backfill));
            (store, Arc::new(service))
        };

        a.service.enable_continuous_sync().await.unwrap();
        b.1.enable_continuous_sync().await.unwrap();
        a.service
            .handle_change(&StorageChangeEvent::local(vec![
                StorageChange::create(CUSTOM_LISTS, json!(1), json!({"id": 1})),
                StorageChange::create("annotations", json!("a.com/#1"), json!({"url": "a.com/#1"})),
            ]))
            .await
            .unwrap();
        a.service.force_incremental_sync().await.unwrap();
        b.1.force_incremental_sync().await.unwrap();

        let list = b.0.get(CUSTOM_LISTS, "1").await.unwrap().unwrap();
        assert_eq!(list["backfilled"], true);
        assert!(b.0.get("annotations", "a.com/#1").await.unwrap().is_none());
        a.service.tear_down();
        b.1.tear_down();
    }

    #[tokio::test]
    async fn test_force_sync_is_noop_until_enabled_and_timestamp_missing() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let d = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);

        d.service.force_incremental_sync().await.unwrap();
        assert!(matches!(
            d.service.retrieve_last_sync_timestamp().await,
            Err(SharingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_enable_requires_login() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let d = device(&shared, &transport, Arc::new(StaticAuth::logged_out()), 50);

        let result = d.service.enable_continuous_sync().await;
        assert!(matches!(result, Err(SharingError::AuthRequired)));
        assert!(!d.service.is_continuous_sync_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_initial_sync_with_role_switch() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let a = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);
        let b = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);
        b.store.create(CUSTOM_LISTS, "7", json!({"id": 7, "name": "From B"})).await.unwrap();
        let mut a_events = a.service.subscribe();

        // A initiates but wants to receive, so B sends
        let message = a.service.request_initial_sync(Some(SyncRole::Receiver)).await.unwrap();
        b.service.answer_initial_sync(&message).await.unwrap();

        a.service.wait_for_initial_sync().await.unwrap();
        b.service.wait_for_initial_sync().await.unwrap();

        assert!(a.store.get(CUSTOM_LISTS, "7").await.unwrap().is_some());
        assert_eq!(
            a_events.recv().await.unwrap(),
            SyncEvent::RoleSwitch { before: SyncRole::Sender, after: SyncRole::Receiver }
        );
        let mut finished = false;
        while let Ok(event) = a_events.try_recv() {
            finished |= event == SyncEvent::Finished;
        }
        assert!(finished);
        assert!(a.service.retrieve_last_sync_timestamp().await.is_ok());
    }

    #[tokio::test]
    async fn test_abort_releases_pending_waiter() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let a = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);

        // Nobody answers, so the transfer sits waiting for its peer
        a.service.request_initial_sync(None).await.unwrap();
        let service = a.service.clone();
        let waiter = tokio::spawn(async move { service.wait_for_initial_sync().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        a.service.abort_initial_sync();
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter released by abort")
            .unwrap();
        assert!(matches!(result, Err(SharingError::Sync(ref e)) if e.contains("aborted")));

        // Later waiters see the same outcome
        assert!(matches!(
            a.service.wait_for_initial_sync().await,
            Err(SharingError::Sync(ref e)) if e.contains("aborted")
        ));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_outcome() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let a = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);
        let b = device(&shared, &transport, Arc::new(StaticAuth::logged_in("u1")), 50);
        a.store.create(CUSTOM_LISTS, "3", json!({"id": 3, "name": "From A"})).await.unwrap();

        let message = a.service.request_initial_sync(None).await.unwrap();
        let first = tokio::spawn({
            let service = a.service.clone();
            async move { service.wait_for_initial_sync().await }
        });
        let second = tokio::spawn({
            let service = a.service.clone();
            async move { service.wait_for_initial_sync().await }
        });
        b.service.answer_initial_sync(&message).await.unwrap();

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        b.service.wait_for_initial_sync().await.unwrap();
        assert!(b.store.get(CUSTOM_LISTS, "3").await.unwrap().is_some());

        // Aborting a finished sync changes nothing
        a.service.abort_initial_sync();
        a.service.wait_for_initial_sync().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_waits_for_login() {
        let shared = Arc::new(MemorySharedSyncLog::new());
        let transport = Arc::new(MemorySignalTransport::new());
        let auth = Arc::new(StaticAuth::logged_in("u1"));
        let d = device(&shared, &transport, auth.clone(), 50);
        d.service.enable_continuous_sync().await.unwrap();
        d.service.tear_down();
        auth.set_user(None);

        let service = d.service.clone();
        let setup = tokio::spawn(async move { service.setup().await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        auth.set_user(Some(UserReference::new("u1")));
        setup.await.unwrap().unwrap();

        assert!(d.service.retrieve_last_sync_timestamp().await.is_ok());
        d.service.tear_down();
    }
}
