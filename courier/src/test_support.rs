//! Minimal `Backend` double for handler unit tests that never touch
//! storage. Every method panics if called — a test that needs backend
//! behavior should use `courier-backend-memory` instead.

use async_trait::async_trait;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::BackendError;
use crate::model::{Channel, ChannelEvent, ChannelLog, MsgIn, MsgOut, StatusUpdate};
use crate::urn::Urn;

pub struct NullBackend;

#[async_trait]
impl Backend for NullBackend {
    async fn get_channel(&self, _channel_type: &str, _uuid: Uuid) -> Result<Channel, BackendError> {
        unimplemented!("NullBackend does not serve channel lookups")
    }

    async fn get_channel_by_uuid(&self, _uuid: Uuid) -> Result<Channel, BackendError> {
        unimplemented!("NullBackend does not serve channel lookups")
    }

    async fn write_msg(&self, _msg: MsgIn, _dedup_window_secs: u64) -> Result<(), BackendError> {
        unimplemented!("NullBackend does not persist")
    }

    async fn write_status_update(&self, _update: StatusUpdate) -> Result<(), BackendError> {
        unimplemented!("NullBackend does not persist")
    }

    async fn write_channel_event(&self, _event: ChannelEvent) -> Result<(), BackendError> {
        unimplemented!("NullBackend does not persist")
    }

    async fn write_channel_log(&self, _log: ChannelLog) -> Result<(), BackendError> {
        unimplemented!("NullBackend does not persist")
    }

    async fn pop_outgoing(&self, _channel_uuid: Uuid) -> Result<Option<MsgOut>, BackendError> {
        unimplemented!("NullBackend has no outbox")
    }

    async fn mark_outgoing_handled(&self, _msg_uuid: Uuid) -> Result<(), BackendError> {
        unimplemented!("NullBackend has no outbox")
    }

    async fn requeue_outgoing(&self, _msg: MsgOut) -> Result<(), BackendError> {
        unimplemented!("NullBackend has no outbox")
    }

    async fn was_sent_recently(&self, _channel_uuid: Uuid, _msg_uuid: Uuid) -> Result<bool, BackendError> {
        unimplemented!("NullBackend does not track sends")
    }

    async fn get_contact(&self, _channel_uuid: Uuid, _urn: &Urn) -> Result<Option<Urn>, BackendError> {
        unimplemented!("NullBackend has no contacts")
    }

    async fn add_urn_to_contact(&self, _channel_uuid: Uuid, _old: &Urn, _new: Urn) -> Result<(), BackendError> {
        unimplemented!("NullBackend has no contacts")
    }

    async fn remove_urn_from_contact(&self, _channel_uuid: Uuid, _urn: &Urn) -> Result<(), BackendError> {
        unimplemented!("NullBackend has no contacts")
    }

    async fn resolve_media(&self, _channel_uuid: Uuid, _media_id: &str) -> Result<String, BackendError> {
        unimplemented!("NullBackend cannot resolve media")
    }
}
