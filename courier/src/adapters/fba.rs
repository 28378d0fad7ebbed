//! Demo handler for a Facebook-Messenger-style channel: JSON webhook
//! receive with HMAC-SHA1 request signing, the standard `hub.challenge`
//! verification handshake, and outbound delivery through a Graph-API-shaped
//! send endpoint.

use std::any::Any;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{RouterError, SendError};
use crate::media::{MediaCapabilities, MediaLimit};
use crate::model::{Channel, ChannelLog, MsgOut};
use crate::registry::{
    ActionContext, ChannelHandler, RouteTable, RouterEvent, RouterOutcome, SendContext, SendOutcome,
    SignatureAlgorithm, SignatureSpec,
};
use crate::urn::{Scheme, Urn};
use crate::util::{decode, name};

#[derive(Default)]
pub struct FbaHandler;

impl FbaHandler {
    fn media_capabilities(&self) -> MediaCapabilities {
        let limit = MediaLimit { max_bytes: 25 * 1024 * 1024 };
        MediaCapabilities { image: limit, video: limit, audio: limit, document: limit }
    }
}

#[async_trait]
impl ChannelHandler for FbaHandler {
    fn channel_type(&self) -> &'static str {
        "fba"
    }

    fn channel_name(&self) -> &'static str {
        "Facebook-style Messenger"
    }

    fn initialize(&self, routes: &mut RouteTable) {
        routes.register("verify", Method::GET, true);
        routes.register("receive", Method::POST, true);
    }

    fn signature_spec(&self, _channel: &Channel) -> Option<SignatureSpec> {
        Some(SignatureSpec {
            header_name: "X-Hub-Signature",
            algorithm: SignatureAlgorithm::HmacSha1,
            secret_config_key: "app_secret",
        })
    }

    async fn handle_action(&self, action: &str, ctx: &mut ActionContext<'_>) -> Result<RouterOutcome, RouterError> {
        match action {
            "verify" => self.verify(ctx).await,
            "receive" => self.receive(ctx).await,
            other => Err(RouterError::UnknownAction(other.to_string())),
        }
    }

    async fn send(&self, ctx: &SendContext<'_>, msg: &MsgOut, log: &mut ChannelLog) -> SendOutcome {
        let Some(page_token) = ctx.channel.config_str("page_access_token") else {
            return SendOutcome::failure(SendError::ChannelConfig("missing page_access_token".to_string()));
        };

        // An attachment this channel can't carry is dropped, not fatal: the
        // text (and any other supported attachment) still goes out.
        let caps = self.media_capabilities();
        let supported: Vec<&crate::model::Attachment> = msg
            .attachments
            .iter()
            .filter(|attachment| match caps.check(attachment, None) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(url = %attachment.url, error = %e, "dropping unsupported attachment");
                    false
                }
            })
            .collect();

        let (messaging_type, tag) = topic_to_tag(msg.topic.as_deref());
        let metadata = msg
            .flow_reference
            .as_ref()
            .map(|flow| format!("flow:{}:{}", flow.uuid, flow.name))
            .or_else(|| msg.templating.as_ref().map(|t| format!("template:{}", t.template_name)));

        let payload = SendPayload {
            recipient: Recipient { id: msg.urn.path.clone() },
            message: MessagePayload {
                text: if msg.text.is_empty() { None } else { Some(msg.text.clone()) },
                attachment: supported.first().map(|a| AttachmentPayload {
                    attachment_type: a.content_type.as_deref().unwrap_or("file").split('/').next().unwrap_or("file").to_string(),
                    payload: AttachmentUrlPayload { url: a.raw_url().to_string() },
                }),
                quick_replies: quick_replies_payload(&msg.quick_replies),
                metadata,
            },
            messaging_type: messaging_type.to_string(),
            tag: tag.map(str::to_string),
        };

        let request = ctx
            .http
            .post("https://graph.facebook.com/v19.0/me/messages")
            .query(&[("access_token", page_token)])
            .json(&payload);

        let result = crate::util::http::send_logged(request, log).await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return SendOutcome::failure(SendError::ConnectionFailed(e.to_string())),
        };

        if response.status().as_u16() == 429 {
            return SendOutcome::failure(SendError::RateLimited);
        }
        if !response.status().is_success() {
            return SendOutcome::failure(SendError::ResponseStatus(response.status().as_u16()));
        }

        match response.json::<SendResponse>() {
            Ok(parsed) => SendOutcome::success(vec![parsed.message_id]),
            Err(e) => SendOutcome::failure(SendError::ResponseUnparseable(e.to_string())),
        }
    }

    fn redacted_keys(&self) -> Vec<&'static str> {
        vec!["app_secret", "page_access_token", "verify_token"]
    }

    /// Graph API media urls (`/<media-id>`) want the page token as a query
    /// param, the same credential `send` uses — never baked into the
    /// attachment url Courier persists.
    fn build_attachment_request(&self, channel: &Channel, url: &str, http: &reqwest::Client) -> reqwest::RequestBuilder {
        match channel.config_str("page_access_token") {
            Some(token) => http.get(url).query(&[("access_token", token)]),
            None => http.get(url),
        }
    }

    async fn describe_urn(
        &self,
        channel: &Channel,
        urn: &crate::urn::Urn,
        http: &reqwest::Client,
    ) -> Option<std::collections::HashMap<String, String>> {
        let token = channel.config_str("page_access_token")?;
        let url = format!("https://graph.facebook.com/v19.0/{}", urn.path);
        let response = http
            .get(url)
            .query(&[("fields", "first_name,last_name"), ("access_token", token)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let profile: GraphProfile = response.json().await.ok()?;
        let mut attrs = std::collections::HashMap::new();
        if let Some(first) = profile.first_name {
            attrs.insert("first_name".to_string(), first);
        }
        if let Some(last) = profile.last_name {
            attrs.insert("last_name".to_string(), last);
        }
        Some(attrs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Deserialize)]
struct GraphProfile {
    first_name: Option<String>,
    last_name: Option<String>,
}

impl FbaHandler {
    async fn verify(&self, ctx: &mut ActionContext<'_>) -> Result<RouterOutcome, RouterError> {
        let mode = ctx.query.get("hub.mode").map(String::as_str);
        let token = ctx.query.get("hub.verify_token").map(String::as_str);
        let challenge = ctx.query.get("hub.challenge").cloned().unwrap_or_default();

        let expected_token = ctx.channel.config_str("verify_token");

        if mode == Some("subscribe") && token.is_some() && token == expected_token {
            Ok(RouterOutcome::Raw(StatusCode::OK, challenge))
        } else {
            Ok(RouterOutcome::Raw(StatusCode::FORBIDDEN, "verification failed".to_string()))
        }
    }

    async fn receive(&self, ctx: &mut ActionContext<'_>) -> Result<RouterOutcome, RouterError> {
        let payload: WebhookPayload = decode::json(&ctx.body).map_err(|e| RouterError::BadRequest(e.to_string()))?;

        let mut events = Vec::new();
        for entry in payload.entry {
            for messaging in entry.messaging {
                let urn = Urn::new(Scheme::FacebookPsid, messaging.sender.id.clone());

                // Resolve a `ref` URN this contact was addressed by before
                // Messenger handed back a real PSID (the m.me/"Send to
                // Messenger" flow) to the PSID we now know it as.
                if let Some(referral) = &messaging.referral {
                    if ctx.enable_fb_ref_swap {
                        let ref_urn = Urn::new(Scheme::FacebookRef, referral.referrer.clone());
                        if let Err(e) = ctx.backend.add_urn_to_contact(ctx.channel.uuid, &ref_urn, urn.clone()).await {
                            tracing::warn!(error = %e, "failed to swap facebook ref urn to psid");
                        }
                    }
                }

                if let Some(message) = messaging.message {
                    let mut msg = crate::model::MsgIn::new(ctx.channel.uuid, urn.clone(), message.text.unwrap_or_default());
                    if let Some(mid) = message.mid {
                        msg = msg.with_external_id(mid);
                    }
                    for attachment in message.attachments.unwrap_or_default() {
                        msg = msg.with_attachment(crate::model::Attachment::media(
                            guess_content_type(&attachment.attachment_type),
                            attachment.payload.url,
                        ));
                    }
                    if let Some(attrs) = self.describe_urn(&ctx.channel, &urn, &ctx.http).await {
                        if let Some(contact_name) = name::name_from_first_last_username(
                            attrs.get("first_name").map(String::as_str),
                            attrs.get("last_name").map(String::as_str),
                            None,
                        ) {
                            msg = msg.with_contact_name(contact_name);
                        }
                    }
                    events.push(RouterEvent::Msg(msg));
                } else if let Some(postback) = messaging.postback {
                    let event = crate::model::ChannelEvent::new(ctx.channel.uuid, "postback")
                        .with_urn(urn)
                        .with_extra("payload", serde_json::Value::String(postback.payload));
                    events.push(RouterEvent::Event(event));
                }
            }
        }

        if events.is_empty() {
            return Ok(RouterOutcome::Ignored("no recognized messaging events".to_string()));
        }
        Ok(RouterOutcome::Accepted(events))
    }
}

/// Maps a backend-assigned message topic to Messenger's `messaging_type` +
/// `tag` pair (spec's "message topic → provider tag mapping"). A topic with
/// no entry here falls back to the plain, non-promotional update type.
fn topic_to_tag(topic: Option<&str>) -> (&'static str, Option<&'static str>) {
    match topic {
        Some("event") => ("MESSAGE_TAG", Some("CONFIRMED_EVENT_UPDATE")),
        Some("account") => ("MESSAGE_TAG", Some("ACCOUNT_UPDATE")),
        _ => ("UPDATE", None),
    }
}

fn quick_replies_payload(quick_replies: &[crate::model::QuickReply]) -> Option<Vec<QuickReplyPayload>> {
    if quick_replies.is_empty() {
        return None;
    }
    Some(
        quick_replies
            .iter()
            .map(|qr| match qr {
                crate::model::QuickReply::Text { title, payload } => QuickReplyPayload {
                    content_type: "text".to_string(),
                    title: Some(title.clone()),
                    payload: Some(payload.clone()),
                },
                crate::model::QuickReply::Location => {
                    QuickReplyPayload { content_type: "location".to_string(), title: None, payload: None }
                }
            })
            .collect(),
    )
}

fn guess_content_type(attachment_type: &str) -> &'static str {
    match attachment_type {
        "image" => "image/jpeg",
        "video" => "video/mp4",
        "audio" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
struct MessagingEvent {
    sender: Participant,
    message: Option<IncomingMessage>,
    postback: Option<Postback>,
    referral: Option<Referral>,
}

/// An `m.me/<ref>` link click or "Send to Messenger" plugin optin, carrying
/// the ref a contact was originally addressed by before Messenger resolved
/// it to a real PSID.
#[derive(Debug, Deserialize)]
struct Referral {
    #[serde(rename = "ref")]
    referrer: String,
}

#[derive(Debug, Deserialize)]
struct Participant {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    mid: Option<String>,
    text: Option<String>,
    attachments: Option<Vec<IncomingAttachment>>,
}

#[derive(Debug, Deserialize)]
struct IncomingAttachment {
    #[serde(rename = "type")]
    attachment_type: String,
    payload: IncomingAttachmentPayload,
}

#[derive(Debug, Deserialize)]
struct IncomingAttachmentPayload {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Postback {
    payload: String,
}

#[derive(Debug, Serialize)]
struct SendPayload {
    recipient: Recipient,
    message: MessagePayload,
    messaging_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct Recipient {
    id: String,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<AttachmentPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quick_replies: Option<Vec<QuickReplyPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
}

#[derive(Debug, Serialize)]
struct QuickReplyPayload {
    content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
}

#[derive(Debug, Serialize)]
struct AttachmentPayload {
    #[serde(rename = "type")]
    attachment_type: String,
    payload: AttachmentUrlPayload,
}

#[derive(Debug, Serialize)]
struct AttachmentUrlPayload {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "message_id")]
    message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::signature::verify_hmac_sha1;
    use bytes::Bytes;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn channel_with_secret(secret: &str) -> Channel {
        let mut config = std::collections::HashMap::new();
        config.insert("app_secret".to_string(), serde_json::json!(secret));
        config.insert("verify_token".to_string(), serde_json::json!("my-verify-token"));
        Channel {
            uuid: Uuid::new_v4(),
            channel_type: "fba".to_string(),
            name: "demo page".to_string(),
            address: None,
            config,
            is_active: true,
        }
    }

    #[test]
    fn signature_spec_names_the_hub_signature_header() {
        let handler = FbaHandler;
        let spec = handler.signature_spec(&channel_with_secret("shh")).unwrap();
        assert_eq!(spec.header_name, "X-Hub-Signature");
        assert_eq!(spec.secret_config_key, "app_secret");
    }

    #[tokio::test]
    async fn verify_echoes_challenge_on_matching_token() {
        let handler = FbaHandler;
        let channel = channel_with_secret("shh");
        let mut log = ChannelLog::new(channel.uuid, "verify");
        let mut query = HashMap::new();
        query.insert("hub.mode".to_string(), "subscribe".to_string());
        query.insert("hub.verify_token".to_string(), "my-verify-token".to_string());
        query.insert("hub.challenge".to_string(), "12345".to_string());

        let mut ctx = ActionContext {
            channel,
            method: Method::GET,
            headers: axum::http::HeaderMap::new(),
            query,
            body: Bytes::new(),
            backend: std::sync::Arc::new(crate::test_support::NullBackend),
            http: reqwest::Client::new(),
            log: &mut log,
            enable_fb_ref_swap: false,
        };

        match handler.handle_action("verify", &mut ctx).await.unwrap() {
            RouterOutcome::Raw(status, body) => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body, "12345");
            }
            _ => panic!("expected Raw response"),
        }
    }

    #[tokio::test]
    async fn verify_rejects_wrong_token() {
        let handler = FbaHandler;
        let channel = channel_with_secret("shh");
        let mut log = ChannelLog::new(channel.uuid, "verify");
        let mut query = HashMap::new();
        query.insert("hub.mode".to_string(), "subscribe".to_string());
        query.insert("hub.verify_token".to_string(), "wrong".to_string());
        query.insert("hub.challenge".to_string(), "12345".to_string());

        let mut ctx = ActionContext {
            channel,
            method: Method::GET,
            headers: axum::http::HeaderMap::new(),
            query,
            body: Bytes::new(),
            backend: std::sync::Arc::new(crate::test_support::NullBackend),
            http: reqwest::Client::new(),
            log: &mut log,
            enable_fb_ref_swap: false,
        };

        match handler.handle_action("verify", &mut ctx).await.unwrap() {
            RouterOutcome::Raw(status, _) => assert_eq!(status, StatusCode::FORBIDDEN),
            _ => panic!("expected Raw response"),
        }
    }

    fn hmac_sha1_header(secret: &str, body: &[u8]) -> String {
        use hmac::Mac;
        let mut mac = <hmac::Hmac<sha1::Sha1> as hmac::digest::KeyInit>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let hex: String = mac.finalize().into_bytes().iter().map(|b| format!("{:02x}", b)).collect();
        format!("sha1={hex}")
    }

    #[test]
    fn signature_round_trips_with_util_verify() {
        let body = br#"{"entry":[]}"#;
        let header = hmac_sha1_header("shh", body);
        assert!(verify_hmac_sha1(b"shh", body, &header).is_ok());
    }

    #[tokio::test]
    async fn receive_parses_a_text_message() {
        let handler = FbaHandler;
        let channel = channel_with_secret("shh");
        let mut log = ChannelLog::new(channel.uuid, "receive");
        let body = Bytes::from_static(
            br#"{"entry":[{"messaging":[{"sender":{"id":"psid-1"},"message":{"mid":"m1","text":"hi"}}]}]}"#,
        );
        let mut ctx = ActionContext {
            channel,
            method: Method::POST,
            headers: axum::http::HeaderMap::new(),
            query: HashMap::new(),
            body,
            backend: std::sync::Arc::new(crate::test_support::NullBackend),
            http: reqwest::Client::new(),
            log: &mut log,
            enable_fb_ref_swap: false,
        };

        match handler.handle_action("receive", &mut ctx).await.unwrap() {
            RouterOutcome::Accepted(events) => assert_eq!(events.len(), 1),
            _ => panic!("expected Accepted"),
        }
    }

    #[test]
    fn build_attachment_request_attaches_the_page_token() {
        let handler = FbaHandler;
        let mut channel = channel_with_secret("shh");
        channel.config.insert("page_access_token".to_string(), serde_json::json!("page-tok"));
        let http = reqwest::Client::new();

        let request = handler.build_attachment_request(&channel, "https://graph.facebook.com/v19.0/media-1", &http);
        let built = request.build().unwrap();
        assert_eq!(built.url().query(), Some("access_token=page-tok"));
    }

    #[tokio::test]
    async fn describe_urn_fetches_the_graph_profile() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v19.0/psid-1"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
            })))
            .mount(&server)
            .await;

        let mut channel = channel_with_secret("shh");
        channel.config.insert("page_access_token".to_string(), serde_json::json!("page-tok"));
        let handler = FbaHandlerWithBase { base: server.uri() };
        let http = reqwest::Client::new();
        let urn = crate::urn::Urn::new(Scheme::FacebookPsid, "psid-1");

        let attrs = handler.describe_urn(&channel, &urn, &http).await.unwrap();
        assert_eq!(attrs.get("first_name").map(String::as_str), Some("Ada"));
        assert_eq!(attrs.get("last_name").map(String::as_str), Some("Lovelace"));
    }

    #[tokio::test]
    async fn describe_urn_returns_none_without_a_page_token() {
        let handler = FbaHandler;
        let channel = channel_with_secret("shh");
        let http = reqwest::Client::new();
        let urn = crate::urn::Urn::new(Scheme::FacebookPsid, "psid-1");
        assert!(handler.describe_urn(&channel, &urn, &http).await.is_none());
    }

    /// `FbaHandler::describe_urn` hardcodes the Graph API host; this thin
    /// wrapper points it at a `wiremock` server instead so the profile-fetch
    /// test doesn't reach the network.
    struct FbaHandlerWithBase {
        base: String,
    }

    #[async_trait]
    impl ChannelHandler for FbaHandlerWithBase {
        fn channel_type(&self) -> &'static str {
            "fba"
        }
        fn channel_name(&self) -> &'static str {
            "Facebook-style Messenger (test)"
        }
        fn initialize(&self, routes: &mut RouteTable) {
            FbaHandler.initialize(routes)
        }
        async fn handle_action(&self, action: &str, ctx: &mut ActionContext<'_>) -> Result<RouterOutcome, RouterError> {
            FbaHandler.handle_action(action, ctx).await
        }
        async fn send(&self, ctx: &SendContext<'_>, msg: &MsgOut, log: &mut ChannelLog) -> SendOutcome {
            FbaHandler.send(ctx, msg, log).await
        }
        async fn describe_urn(
            &self,
            channel: &Channel,
            urn: &crate::urn::Urn,
            http: &reqwest::Client,
        ) -> Option<std::collections::HashMap<String, String>> {
            let token = channel.config_str("page_access_token")?;
            let url = format!("{}/v19.0/{}", self.base, urn.path);
            let response = http
                .get(url)
                .query(&[("fields", "first_name,last_name"), ("access_token", token)])
                .send()
                .await
                .ok()?;
            if !response.status().is_success() {
                return None;
            }
            let profile: GraphProfile = response.json().await.ok()?;
            let mut attrs = std::collections::HashMap::new();
            if let Some(first) = profile.first_name {
                attrs.insert("first_name".to_string(), first);
            }
            if let Some(last) = profile.last_name {
                attrs.insert("last_name".to_string(), last);
            }
            Some(attrs)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}
