// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Initial sync: one full snapshot transfer between two devices.
//!
//! # Protocol
//!
//! ```text
//! initiator                                   answerer
//!   request_initial_sync(role?) ──init msg──▶ answer_initial_sync(msg)
//!   open_channel(id, initiator)               open_channel(id, answerer)
//!   ◀────────────── wait_for_peer (channel timeout) ──────────────▶
//!   sender:   Objects{collection} × N, Finished
//!   receiver: write each object (package timeout between packages)
//! ```
//!
//! The initiator sends by default. The init message carries the
//! initiator's role so the answerer takes the other one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{PostReceiveProcessor, SyncEvent};
use crate::error::{Result, SharingError};
use crate::metrics;
use crate::storage::traits::{ObjectStore, Query};
use crate::storage::SYNCED_COLLECTIONS;

/// Which way data flows for this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRole {
    Sender,
    Receiver,
}

impl SyncRole {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

/// What the initiator hands to the other device out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub channel_id: String,
    pub initiator_role: SyncRole,
}

impl InitMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(message: &str) -> Result<Self> {
        Ok(serde_json::from_str(message)?)
    }
}

/// One unit of the snapshot stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Package {
    Objects {
        collection: String,
        objects: Vec<(String, Value)>,
    },
    Finished,
}

/// A bidirectional channel between the two devices.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    /// Resolves once the other device opened its end.
    async fn wait_for_peer(&self) -> Result<()>;
    async fn send(&self, package: Package) -> Result<()>;
    /// `None` once the peer went away.
    async fn receive(&self) -> Result<Option<Package>>;
}

/// Opens channels by id. The transport itself (WebRTC, relay server, ...)
/// is the host's choice.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn open_channel(&self, channel_id: &str, initiator: bool) -> Result<Box<dyn SignalChannel>>;
}

/// In-process transport pairing two channel ends by id.
#[derive(Default)]
pub struct MemorySignalTransport {
    pipes: DashMap<String, Arc<Pipe>>,
}

struct Pipe {
    initiator: Mutex<Option<MemoryChannel>>,
    answerer: Mutex<Option<MemoryChannel>>,
}

impl Pipe {
    fn new() -> Self {
        let peers = Arc::new(watch::Sender::new(0u8));
        let (to_answerer, from_initiator) = mpsc::unbounded_channel();
        let (to_initiator, from_answerer) = mpsc::unbounded_channel();
        Self {
            initiator: Mutex::new(Some(MemoryChannel {
                tx: to_answerer,
                rx: AsyncMutex::new(from_answerer),
                peers: peers.clone(),
            })),
            answerer: Mutex::new(Some(MemoryChannel {
                tx: to_initiator,
                rx: AsyncMutex::new(from_initiator),
                peers,
            })),
        }
    }
}

impl MemorySignalTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalTransport for MemorySignalTransport {
    async fn open_channel(&self, channel_id: &str, initiator: bool) -> Result<Box<dyn SignalChannel>> {
        let pipe = self
            .pipes
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Pipe::new()))
            .clone();
        let end = if initiator { &pipe.initiator } else { &pipe.answerer };
        let channel = end
            .lock()
            .take()
            .ok_or_else(|| SharingError::Sync(format!("channel {channel_id} already open")))?;
        channel.peers.send_modify(|n| *n += 1);
        Ok(Box::new(channel))
    }
}

struct MemoryChannel {
    tx: mpsc::UnboundedSender<Package>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Package>>,
    peers: Arc<watch::Sender<u8>>,
}

#[async_trait]
impl SignalChannel for MemoryChannel {
    async fn wait_for_peer(&self) -> Result<()> {
        let mut peers = self.peers.subscribe();
        peers
            .wait_for(|n| *n >= 2)
            .await
            .map_err(|e| SharingError::Sync(e.to_string()))?;
        Ok(())
    }

    async fn send(&self, package: Package) -> Result<()> {
        self.tx
            .send(package)
            .map_err(|_| SharingError::Sync("peer closed the channel".into()))
    }

    async fn receive(&self) -> Result<Option<Package>> {
        Ok(self.rx.lock().await.recv().await)
    }
}

/// Everything one transfer needs besides the channel.
pub(crate) struct Transfer {
    pub store: Arc<dyn ObjectStore>,
    pub processor: Option<Arc<dyn PostReceiveProcessor>>,
    pub events: broadcast::Sender<SyncEvent>,
    pub channel_timeout: Duration,
    pub package_timeout: Duration,
}

impl Transfer {
    pub(crate) async fn run(&self, channel: &dyn SignalChannel, role: SyncRole) -> Result<()> {
        match timeout(self.channel_timeout, channel.wait_for_peer()).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(timeout = ?self.channel_timeout, "Peer never joined initial sync");
                metrics::record_initial_sync_event("channel_timeout");
                let _ = self.events.send(SyncEvent::ChannelTimeout);
                return Err(SharingError::Sync("timed out waiting for peer".into()));
            }
        }
        info!(?role, "Initial sync connected");

        match role {
            SyncRole::Sender => self.send_snapshot(channel).await,
            SyncRole::Receiver => self.receive_snapshot(channel).await,
        }
    }

    async fn send_snapshot(&self, channel: &dyn SignalChannel) -> Result<()> {
        for collection in SYNCED_COLLECTIONS {
            let objects: Vec<(String, Value)> = self
                .store
                .find(collection, &Query::all())
                .await?
                .into_iter()
                .map(|o| (o.key, o.value))
                .collect();
            let count = objects.len();
            channel
                .send(Package::Objects {
                    collection: (*collection).to_string(),
                    objects,
                })
                .await?;
            metrics::record_sync_entries("snapshot_sent", count);
            let _ = self.events.send(SyncEvent::Progress {
                role: SyncRole::Sender,
                collection: (*collection).to_string(),
                objects: count,
            });
        }
        channel.send(Package::Finished).await
    }

    async fn receive_snapshot(&self, channel: &dyn SignalChannel) -> Result<()> {
        loop {
            let package = match timeout(self.package_timeout, channel.receive()).await {
                Ok(package) => package?,
                Err(_) => {
                    warn!(timeout = ?self.package_timeout, "Initial sync package stalled");
                    metrics::record_initial_sync_event("package_stalled");
                    let _ = self.events.send(SyncEvent::PackageStalled);
                    return Err(SharingError::Sync("timed out waiting for next package".into()));
                }
            };

            match package {
                Some(Package::Objects { collection, objects }) => {
                    let count = objects.len();
                    for (key, value) in objects {
                        self.write_object(&collection, &key, value).await?;
                    }
                    metrics::record_sync_entries("snapshot_received", count);
                    let _ = self.events.send(SyncEvent::Progress {
                        role: SyncRole::Receiver,
                        collection,
                        objects: count,
                    });
                }
                Some(Package::Finished) => return Ok(()),
                None => return Err(SharingError::Sync("peer left before finishing".into())),
            }
        }
    }

    async fn write_object(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        let value = match &self.processor {
            Some(processor) => match processor.process(collection, key, value).await? {
                Some(value) => value,
                None => {
                    debug!(collection, key, "Object dropped by post-receive processor");
                    return Ok(());
                }
            },
            None => value,
        };
        self.store.create(collection, key, value).await?;
        Ok(())
    }
}
