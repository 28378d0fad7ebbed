//! Media classification and per-channel attachment capability limits.

use mime::Mime;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::SendError;
use crate::model::{Attachment, Channel, ChannelLog};
use crate::registry::ChannelHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn classify(content_type: &str) -> Option<Self> {
        let mime: Mime = content_type.parse().ok()?;
        match mime.type_() {
            mime::IMAGE => Some(MediaKind::Image),
            mime::VIDEO => Some(MediaKind::Video),
            mime::AUDIO => Some(MediaKind::Audio),
            _ => Some(MediaKind::Document),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MediaLimit {
    pub max_bytes: u64,
}

/// Per-channel-type ceiling on attachment size by kind. A channel whose
/// handler doesn't support a kind at all leaves the corresponding limit at
/// `max_bytes: 0`, which `check` treats as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaCapabilities {
    pub image: MediaLimit,
    pub video: MediaLimit,
    pub audio: MediaLimit,
    pub document: MediaLimit,
}

impl MediaCapabilities {
    pub fn limit_for(&self, kind: MediaKind) -> MediaLimit {
        match kind {
            MediaKind::Image => self.image,
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
            MediaKind::Document => self.document,
        }
    }

    /// Validates an attachment's content type and, if known, its size
    /// against this channel's capability table.
    pub fn check(&self, attachment: &Attachment, size_bytes: Option<u64>) -> Result<(), SendError> {
        if attachment.is_geo() {
            return Ok(());
        }
        let content_type = attachment
            .content_type
            .as_deref()
            .ok_or_else(|| SendError::MediaUnsupported("missing content type".to_string()))?;
        let kind = MediaKind::classify(content_type)
            .ok_or_else(|| SendError::MediaUnsupported(content_type.to_string()))?;
        let limit = self.limit_for(kind);
        if limit.max_bytes == 0 {
            return Err(SendError::MediaUnsupported(content_type.to_string()));
        }
        if let Some(size) = size_bytes {
            if size > limit.max_bytes {
                return Err(SendError::MediaUnsupported(format!(
                    "{content_type} exceeds {} byte limit",
                    limit.max_bytes
                )));
            }
        }
        Ok(())
    }
}

/// Builds the request used to fetch a provider-authenticated attachment
/// (e.g. one that requires a bearer token to download), falling back to a
/// plain unauthenticated GET when the handler has nothing to add.
pub fn default_attachment_request(client: &reqwest::Client, url: &str) -> reqwest::RequestBuilder {
    client.get(url)
}

/// Proxies a download of a channel-held attachment back to the backend: the
/// channel-held url is first run through `Backend::resolve_media` (so a
/// provider-opaque media id can be rewritten to something fetchable), then
/// the owning handler builds the actual request (attaching provider auth
/// when the handler overrides `build_attachment_request`) so credentials
/// never leak into the attachment url Courier stores. The exchange lands in
/// `log` like any other outbound call.
pub async fn fetch_attachment(
    handler: &dyn ChannelHandler,
    backend: &dyn Backend,
    channel: &Channel,
    channel_uuid: Uuid,
    http: &reqwest::Client,
    url: &str,
    log: &mut ChannelLog,
) -> Result<bytes::Bytes, SendError> {
    let fetch_url = backend
        .resolve_media(channel_uuid, url)
        .await
        .map(|resolved| if resolved.is_empty() { url.to_string() } else { resolved })
        .unwrap_or_else(|_| url.to_string());

    let request = handler.build_attachment_request(channel, &fetch_url, http);
    let response = crate::util::http::send_logged(request, log)
        .await
        .map_err(|e| SendError::ConnectionFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(SendError::ResponseStatus(response.status().as_u16()));
    }
    Ok(response.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_mime_types() {
        assert_eq!(MediaKind::classify("image/jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::classify("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::classify("audio/ogg"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::classify("application/pdf"), Some(MediaKind::Document));
    }

    #[test]
    fn rejects_unsupported_kind() {
        let caps = MediaCapabilities {
            image: MediaLimit { max_bytes: 5_000_000 },
            ..Default::default()
        };
        let attachment = Attachment::media("video/mp4", "https://x/y.mp4");
        assert!(caps.check(&attachment, None).is_err());
    }

    #[test]
    fn rejects_oversized_attachment() {
        let caps = MediaCapabilities {
            image: MediaLimit { max_bytes: 1_000 },
            ..Default::default()
        };
        let attachment = Attachment::media("image/jpeg", "https://x/y.jpg");
        assert!(caps.check(&attachment, Some(2_000)).is_err());
        assert!(caps.check(&attachment, Some(500)).is_ok());
    }

    #[test]
    fn geo_attachments_skip_media_checks() {
        let caps = MediaCapabilities::default();
        assert!(caps.check(&Attachment::geo(1.0, 2.0), None).is_ok());
    }

    struct AuthedHandler;

    #[async_trait::async_trait]
    impl crate::registry::ChannelHandler for AuthedHandler {
        fn channel_type(&self) -> &'static str {
            "authed"
        }
        fn channel_name(&self) -> &'static str {
            "authed test handler"
        }
        fn initialize(&self, _routes: &mut crate::registry::RouteTable) {}
        async fn handle_action(
            &self,
            _action: &str,
            _ctx: &mut crate::registry::ActionContext<'_>,
        ) -> Result<crate::registry::RouterOutcome, crate::error::RouterError> {
            unimplemented!()
        }
        async fn send(
            &self,
            _ctx: &crate::registry::SendContext<'_>,
            _msg: &crate::model::MsgOut,
            _log: &mut ChannelLog,
        ) -> crate::registry::SendOutcome {
            unimplemented!()
        }
        fn build_attachment_request(&self, _channel: &Channel, url: &str, http: &reqwest::Client) -> reqwest::RequestBuilder {
            http.get(url).header("Authorization", "Bearer handler-token")
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct NoRewriteBackend;

    #[async_trait::async_trait]
    impl crate::backend::Backend for NoRewriteBackend {
        async fn get_channel(&self, _channel_type: &str, _uuid: Uuid) -> Result<Channel, crate::error::BackendError> {
            unimplemented!()
        }
        async fn get_channel_by_uuid(&self, _uuid: Uuid) -> Result<Channel, crate::error::BackendError> {
            unimplemented!()
        }
        async fn write_msg(&self, _msg: crate::model::MsgIn, _dedup_window_secs: u64) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn write_status_update(&self, _update: crate::model::StatusUpdate) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn write_channel_event(&self, _event: crate::model::ChannelEvent) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn write_channel_log(&self, _log: ChannelLog) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn pop_outgoing(&self, _channel_uuid: Uuid) -> Result<Option<crate::model::MsgOut>, crate::error::BackendError> {
            unimplemented!()
        }
        async fn mark_outgoing_handled(&self, _msg_uuid: Uuid) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn requeue_outgoing(&self, _msg: crate::model::MsgOut) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn was_sent_recently(&self, _channel_uuid: Uuid, _msg_uuid: Uuid) -> Result<bool, crate::error::BackendError> {
            unimplemented!()
        }
        async fn get_contact(&self, _channel_uuid: Uuid, _urn: &crate::urn::Urn) -> Result<Option<crate::urn::Urn>, crate::error::BackendError> {
            unimplemented!()
        }
        async fn add_urn_to_contact(&self, _channel_uuid: Uuid, _old: &crate::urn::Urn, _new: crate::urn::Urn) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn remove_urn_from_contact(&self, _channel_uuid: Uuid, _urn: &crate::urn::Urn) -> Result<(), crate::error::BackendError> {
            unimplemented!()
        }
        async fn resolve_media(&self, _channel_uuid: Uuid, _media_id: &str) -> Result<String, crate::error::BackendError> {
            Err(crate::error::BackendError::NotFound)
        }
    }

    fn test_channel() -> Channel {
        Channel {
            uuid: Uuid::new_v4(),
            channel_type: "authed".to_string(),
            name: "demo".to_string(),
            address: None,
            config: std::collections::HashMap::new(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn fetch_attachment_uses_the_handlers_authenticated_request() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/media/1"))
            .and(wiremock::matchers::header("Authorization", "Bearer handler-token"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(b"file-bytes".to_vec()))
            .mount(&server)
            .await;

        let backend: std::sync::Arc<dyn crate::backend::Backend> = std::sync::Arc::new(NoRewriteBackend);
        let handler = AuthedHandler;
        let channel = test_channel();
        let http = reqwest::Client::new();
        let mut log = ChannelLog::new(channel.uuid, "attachment_fetch");

        let url = format!("{}/media/1", server.uri());
        let bytes = fetch_attachment(&handler, backend.as_ref(), &channel, channel.uuid, &http, &url, &mut log)
            .await
            .unwrap();

        assert_eq!(bytes.as_ref(), b"file-bytes");
        assert_eq!(log.exchanges.len(), 1);
        assert_eq!(log.exchanges[0].status_code, Some(200));
    }
}
