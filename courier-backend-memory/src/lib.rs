//! In-memory reference implementation of `courier::Backend`.
//!
//! This stands in for the real storage/queue engine a production deployment
//! would run against. It keeps everything in process memory, so state does
//! not survive a restart; it exists to make the demo binary and integration
//! tests runnable without a database.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier::backend::Backend;
use courier::error::BackendError;
use courier::model::{Channel, ChannelEvent, ChannelLog, MsgIn, MsgOut, Status, StatusTarget, StatusUpdate};
use courier::urn::Urn;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

struct DedupEntry {
    seen_at: DateTime<Utc>,
}

/// Per-channel outbox split by priority class, so `pop_outgoing` can always
/// drain `high` before `bulk` (spec §4.6 step 1: "returns a high-priority
/// message first (reply/response topic), then bulk").
#[derive(Default)]
struct Outbox {
    high: VecDeque<MsgOut>,
    bulk: VecDeque<MsgOut>,
}

impl Outbox {
    fn push_back(&mut self, msg: MsgOut) {
        if msg.high_priority {
            self.high.push_back(msg);
        } else {
            self.bulk.push_back(msg);
        }
    }

    fn push_front(&mut self, msg: MsgOut) {
        if msg.high_priority {
            self.high.push_front(msg);
        } else {
            self.bulk.push_front(msg);
        }
    }

    fn pop_front(&mut self) -> Option<MsgOut> {
        self.high.pop_front().or_else(|| self.bulk.pop_front())
    }
}

pub struct InMemoryBackend {
    channels: DashMap<Uuid, Channel>,
    dedup: DashMap<(Uuid, String), DedupEntry>,
    status_updates: DashMap<Uuid, Vec<StatusUpdate>>,
    channel_events: Mutex<Vec<ChannelEvent>>,
    channel_logs: Mutex<Vec<ChannelLog>>,
    outbox: DashMap<Uuid, Mutex<Outbox>>,
    /// Tracks which channel an outbound message belongs to, so a
    /// `StatusUpdate` addressed by msg uuid alone can still be attributed to
    /// a channel for `was_sent_recently`, and so a later `(channel,
    /// external_id)`-addressed callback can be resolved back to it.
    msg_channel: DashMap<Uuid, Uuid>,
    /// Resolves a provider's own id back to the MsgOut it was assigned to,
    /// populated the first time a status update for that msg carries one.
    external_id_index: DashMap<(Uuid, String), Uuid>,
    contacts: DashMap<Uuid, HashMap<String, Urn>>,
    sent_recently: DashMap<(Uuid, Uuid), DateTime<Utc>>,
    media: DashMap<String, String>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            dedup: DashMap::new(),
            status_updates: DashMap::new(),
            channel_events: Mutex::new(Vec::new()),
            channel_logs: Mutex::new(Vec::new()),
            outbox: DashMap::new(),
            msg_channel: DashMap::new(),
            external_id_index: DashMap::new(),
            contacts: DashMap::new(),
            sent_recently: DashMap::new(),
            media: DashMap::new(),
        }
    }

    /// Seeds a channel, for demo bootstrap and test fixtures.
    pub fn seed_channel(&self, channel: Channel) {
        self.channels.insert(channel.uuid, channel);
    }

    /// Seeds a resolvable provider media id -> URL mapping.
    pub fn seed_media(&self, media_id: impl Into<String>, url: impl Into<String>) {
        self.media.insert(media_id.into(), url.into());
    }

    /// Pushes an outbound message straight into a channel's outbox, as the
    /// flow backend would after deciding to send something. Exposed for
    /// tests and the demo binary; a real backend would receive this over
    /// its own queue/API rather than a direct method call.
    pub fn enqueue_outgoing(&self, msg: MsgOut) {
        self.msg_channel.insert(msg.uuid, msg.channel_uuid);
        self.outbox.entry(msg.channel_uuid).or_default().lock().push_back(msg);
    }

    pub fn status_updates_for(&self, msg_uuid: Uuid) -> Vec<StatusUpdate> {
        self.status_updates.get(&msg_uuid).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn channel_logs(&self) -> Vec<ChannelLog> {
        self.channel_logs.lock().clone()
    }

    pub fn channel_events(&self) -> Vec<ChannelEvent> {
        self.channel_events.lock().clone()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get_channel(&self, channel_type: &str, uuid: Uuid) -> Result<Channel, BackendError> {
        self.channels
            .get(&uuid)
            .filter(|c| c.channel_type == channel_type)
            .map(|c| c.clone())
            .ok_or(BackendError::NotFound)
    }

    async fn get_channel_by_uuid(&self, uuid: Uuid) -> Result<Channel, BackendError> {
        self.channels.get(&uuid).map(|c| c.clone()).ok_or(BackendError::NotFound)
    }

    async fn write_msg(&self, msg: MsgIn, dedup_window_secs: u64) -> Result<(), BackendError> {
        if let Some(external_id) = &msg.external_id {
            let key = (msg.channel_uuid, external_id.clone());
            let now = Utc::now();
            if let Some(entry) = self.dedup.get(&key) {
                let age = now.signed_duration_since(entry.seen_at).num_seconds().max(0) as u64;
                if age < dedup_window_secs {
                    return Err(BackendError::Dedup);
                }
            }
            self.dedup.insert(key, DedupEntry { seen_at: now });
        }
        tracing::debug!(msg_uuid = %msg.uuid, channel_uuid = %msg.channel_uuid, "recorded inbound message");
        Ok(())
    }

    async fn write_status_update(&self, update: StatusUpdate) -> Result<(), BackendError> {
        let msg_uuid = match &update.target {
            StatusTarget::MsgUuid(uuid) => *uuid,
            StatusTarget::ExternalId { channel_uuid, external_id } => self
                .external_id_index
                .get(&(*channel_uuid, external_id.clone()))
                .map(|e| *e)
                .ok_or(BackendError::MsgNotFound)?,
        };

        if let Some(external_id) = &update.external_id {
            if let Some(channel_uuid) = self.msg_channel.get(&msg_uuid).map(|e| *e) {
                self.external_id_index
                    .entry((channel_uuid, external_id.clone()))
                    .or_insert(msg_uuid);
            }
        }

        if matches!(update.status, Status::Wired | Status::Sent) {
            if let Some(channel_uuid) = self.msg_channel.get(&msg_uuid).map(|e| *e) {
                self.sent_recently.entry((channel_uuid, msg_uuid)).or_insert_with(Utc::now);
            }
        }

        self.status_updates.entry(msg_uuid).or_default().push(update);
        Ok(())
    }

    async fn write_channel_event(&self, event: ChannelEvent) -> Result<(), BackendError> {
        self.channel_events.lock().push(event);
        Ok(())
    }

    async fn write_channel_log(&self, log: ChannelLog) -> Result<(), BackendError> {
        self.channel_logs.lock().push(log);
        Ok(())
    }

    async fn pop_outgoing(&self, channel_uuid: Uuid) -> Result<Option<MsgOut>, BackendError> {
        Ok(self.outbox.get(&channel_uuid).and_then(|queue| queue.lock().pop_front()))
    }

    async fn mark_outgoing_handled(&self, _msg_uuid: Uuid) -> Result<(), BackendError> {
        Ok(())
    }

    async fn requeue_outgoing(&self, msg: MsgOut) -> Result<(), BackendError> {
        self.msg_channel.insert(msg.uuid, msg.channel_uuid);
        self.outbox.entry(msg.channel_uuid).or_default().lock().push_front(msg);
        Ok(())
    }

    async fn was_sent_recently(&self, channel_uuid: Uuid, msg_uuid: Uuid) -> Result<bool, BackendError> {
        Ok(self.sent_recently.contains_key(&(channel_uuid, msg_uuid)))
    }

    async fn get_contact(&self, channel_uuid: Uuid, urn: &Urn) -> Result<Option<Urn>, BackendError> {
        Ok(self
            .contacts
            .get(&channel_uuid)
            .and_then(|map| map.get(&urn.identity()).cloned()))
    }

    async fn add_urn_to_contact(&self, channel_uuid: Uuid, old: &Urn, new: Urn) -> Result<(), BackendError> {
        let mut map = self.contacts.entry(channel_uuid).or_default();
        map.insert(old.identity(), new);
        Ok(())
    }

    async fn remove_urn_from_contact(&self, channel_uuid: Uuid, urn: &Urn) -> Result<(), BackendError> {
        if let Some(mut map) = self.contacts.get_mut(&channel_uuid) {
            map.remove(&urn.identity());
        }
        Ok(())
    }

    async fn resolve_media(&self, _channel_uuid: Uuid, media_id: &str) -> Result<String, BackendError> {
        self.media.get(media_id).map(|v| v.clone()).ok_or(BackendError::NotFound)
    }
}
