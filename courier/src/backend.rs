//! The storage/queue contract Courier runs against. The real deployment's
//! backend is out of scope; `courier-backend-memory` is the in-process
//! stand-in used by the demo binary and by integration tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BackendError;
use crate::model::{Channel, ChannelEvent, ChannelLog, MsgIn, MsgOut, StatusUpdate};
use crate::urn::Urn;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Looks up a channel by its type and UUID, for the `/c/:type/:uuid/...`
    /// route shape.
    async fn get_channel(&self, channel_type: &str, uuid: Uuid) -> Result<Channel, BackendError>;

    /// Looks up a channel by UUID alone, for the Sender, which only ever
    /// has a channel id on hand (no channel type, since the outbox is keyed
    /// by UUID).
    async fn get_channel_by_uuid(&self, uuid: Uuid) -> Result<Channel, BackendError>;

    /// Records an inbound message. Returns `BackendError::Dedup` if a message
    /// with the same `external_id` on the same channel was already recorded
    /// within `dedup_window_secs` (resolved by the caller from the channel's
    /// config override or the process default).
    async fn write_msg(&self, msg: MsgIn, dedup_window_secs: u64) -> Result<(), BackendError>;

    /// Records a status transition. When `update` targets a `(channel,
    /// external_id)` pair the backend cannot resolve to a known message
    /// (e.g. a stray or duplicate delivery receipt), returns
    /// `BackendError::MsgNotFound`; the Router treats that as ignorable.
    async fn write_status_update(&self, update: StatusUpdate) -> Result<(), BackendError>;

    async fn write_channel_event(&self, event: ChannelEvent) -> Result<(), BackendError>;

    async fn write_channel_log(&self, log: ChannelLog) -> Result<(), BackendError>;

    /// Pulls the next outbound message for a channel, if any is queued.
    async fn pop_outgoing(&self, channel_uuid: Uuid) -> Result<Option<MsgOut>, BackendError>;

    /// Acknowledges a popped message as handled (terminal success or failure
    /// already recorded via a StatusUpdate).
    async fn mark_outgoing_handled(&self, msg_uuid: Uuid) -> Result<(), BackendError>;

    /// Puts a popped message back at the head of its channel's outbox,
    /// for retry after a backoff delay or a rate limit.
    async fn requeue_outgoing(&self, msg: MsgOut) -> Result<(), BackendError>;

    /// Whether this MsgOut was already wired to the provider, for the
    /// crash-recovery path: a worker that pops the same message twice (after
    /// a crash between the provider call and `mark_outgoing_handled`) must
    /// not send it again.
    async fn was_sent_recently(&self, channel_uuid: Uuid, msg_uuid: Uuid) -> Result<bool, BackendError>;

    async fn get_contact(&self, channel_uuid: Uuid, urn: &Urn) -> Result<Option<Urn>, BackendError>;

    async fn add_urn_to_contact(&self, channel_uuid: Uuid, old: &Urn, new: Urn) -> Result<(), BackendError>;

    async fn remove_urn_from_contact(&self, channel_uuid: Uuid, urn: &Urn) -> Result<(), BackendError>;

    /// Resolves a provider media reference to a fetchable URL, for handlers
    /// whose inbound attachments arrive as opaque media ids.
    async fn resolve_media(&self, channel_uuid: Uuid, media_id: &str) -> Result<String, BackendError>;
}
