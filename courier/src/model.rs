//! Core data model: channels, messages, status updates, logs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::urn::Urn;

/// A configured instance of a channel type (one aggregator account, one
/// Facebook page, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub uuid: Uuid,
    pub channel_type: String,
    pub name: String,
    pub address: Option<Urn>,
    pub config: HashMap<String, serde_json::Value>,
    pub is_active: bool,
}

impl Channel {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }
}

/// A unit of media attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// `mime/type:url` for files, or `geo:lat,long` for locations.
    pub url: String,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn media(content_type: impl Into<String>, url: impl Into<String>) -> Self {
        let content_type = content_type.into();
        let url = url.into();
        Self {
            url: format!("{}:{}", content_type, url),
            content_type: Some(content_type),
        }
    }

    pub fn geo(lat: f64, long: f64) -> Self {
        Self {
            url: format!("geo:{},{}", lat, long),
            content_type: None,
        }
    }

    pub fn is_geo(&self) -> bool {
        self.url.starts_with("geo:")
    }

    /// The raw URL portion, stripped of the `mime/type:` or `geo:` prefix.
    pub fn raw_url(&self) -> &str {
        match self.url.split_once(':') {
            Some((_, rest)) if !self.is_geo() => rest,
            Some((_, rest)) => rest,
            None => self.url.as_str(),
        }
    }
}

/// An inbound message as received from a provider, normalized for the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgIn {
    pub uuid: Uuid,
    pub channel_uuid: Uuid,
    pub urn: Urn,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub external_id: Option<String>,
    /// Display name the provider handed over alongside the message (a
    /// Messenger profile lookup, a WhatsApp contact card, ...), when the
    /// handler has one. See `util::name::name_from_first_last_username`.
    pub contact_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl MsgIn {
    pub fn new(channel_uuid: Uuid, urn: Urn, text: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            channel_uuid,
            urn,
            text: text.into(),
            attachments: Vec::new(),
            external_id: None,
            contact_name: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Overrides the received-at timestamp with one the provider supplied,
    /// rather than the moment Courier itself observed the webhook.
    pub fn with_received_on(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_contact_name(mut self, contact_name: impl Into<String>) -> Self {
        self.contact_name = Some(contact_name.into());
        self
    }
}

/// A quick-reply option attached to an outbound message: either a plain
/// text button carrying its own payload, or a request for the contact's
/// current location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuickReply {
    Text { title: String, payload: String },
    Location,
}

/// The flow (in the backend sense, not Courier's) that produced this
/// message, carried through so a provider adapter that supports per-message
/// metadata (Messenger's `metadata` field, e.g.) can surface it for
/// debugging on the provider side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReference {
    pub uuid: Uuid,
    pub name: String,
}

/// A provider template to render this message against, plus the variables
/// to substitute into it. Used by channels that require pre-approved
/// message templates for session-less sends (WhatsApp-style business APIs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Templating {
    pub template_name: String,
    pub variables: HashMap<String, String>,
}

/// An outbound message queued for delivery through a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgOut {
    pub uuid: Uuid,
    pub channel_uuid: Uuid,
    pub urn: Urn,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub quick_replies: Vec<QuickReply>,
    /// Loose tag describing why this message is being sent (`"event"`,
    /// `"account"`, ...), mapped to a provider-specific tag by the adapter.
    /// See `util::text` for the segmentation side of outbound sends and each
    /// adapter's own topic → tag table.
    pub topic: Option<String>,
    /// ISO-639-3 (plus optional region) locale the backend composed this
    /// message in; adapters that need ISO-639-1 map it themselves.
    pub locale: Option<String>,
    pub flow_reference: Option<FlowReference>,
    pub templating: Option<Templating>,
    pub high_priority: bool,
    pub response_to_external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MsgOut {
    pub fn new(channel_uuid: Uuid, urn: Urn, text: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            channel_uuid,
            urn,
            text: text.into(),
            attachments: Vec::new(),
            quick_replies: Vec::new(),
            topic: None,
            locale: None,
            flow_reference: None,
            templating: None,
            high_priority: false,
            response_to_external_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    pub fn with_quick_replies(mut self, quick_replies: Vec<QuickReply>) -> Self {
        self.quick_replies = quick_replies;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_flow_reference(mut self, uuid: Uuid, name: impl Into<String>) -> Self {
        self.flow_reference = Some(FlowReference { uuid, name: name.into() });
        self
    }

    pub fn with_templating(mut self, template_name: impl Into<String>, variables: HashMap<String, String>) -> Self {
        self.templating = Some(Templating { template_name: template_name.into(), variables });
        self
    }

    pub fn with_high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    pub fn in_reply_to(mut self, external_id: impl Into<String>) -> Self {
        self.response_to_external_id = Some(external_id.into());
        self
    }
}

/// Lifecycle state of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Queued,
    Wired,
    Sent,
    Delivered,
    Read,
    Errored,
    Failed,
}

impl Status {
    /// Single-letter code used on the wire (`P|Q|W|S|D|R|E|F`), per the
    /// external response contract.
    pub fn code(&self) -> &'static str {
        match self {
            Status::Pending => "P",
            Status::Queued => "Q",
            Status::Wired => "W",
            Status::Sent => "S",
            Status::Delivered => "D",
            Status::Read => "R",
            Status::Errored => "E",
            Status::Failed => "F",
        }
    }
}

/// What a `StatusUpdate` is about: the MsgOut Courier itself minted, or a
/// provider's own id from an out-of-band callback that never carries our
/// uuid back (e.g. an SMS aggregator's delivery receipt addressed only by
/// the id it assigned at submission time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusTarget {
    MsgUuid(Uuid),
    ExternalId { channel_uuid: Uuid, external_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub target: StatusTarget,
    pub status: Status,
    pub external_id: Option<String>,
    pub error_reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StatusUpdate {
    /// A status transition addressed by the MsgOut's own uuid: the normal
    /// case, used by the Sender after it popped and sent a message.
    pub fn for_msg(msg_uuid: Uuid, status: Status) -> Self {
        Self {
            target: StatusTarget::MsgUuid(msg_uuid),
            status,
            external_id: None,
            error_reason: None,
            occurred_at: Utc::now(),
        }
    }

    /// A status transition addressed by `(channel, external_id)`: a later
    /// provider callback (delivery receipt, read receipt) that only knows
    /// the id it was given, not our internal uuid.
    pub fn for_external_id(channel_uuid: Uuid, external_id: impl Into<String>, status: Status) -> Self {
        let external_id = external_id.into();
        Self {
            target: StatusTarget::ExternalId { channel_uuid, external_id: external_id.clone() },
            status,
            external_id: Some(external_id),
            error_reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }
}

/// A channel-side occurrence that isn't a message: delivery receipt outside
/// the Sender's own tracking, opt-outs, verification pings, and the like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel_uuid: Uuid,
    pub urn: Option<Urn>,
    pub event_type: String,
    pub extra: HashMap<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl ChannelEvent {
    pub fn new(channel_uuid: Uuid, event_type: impl Into<String>) -> Self {
        Self {
            channel_uuid,
            urn: None,
            event_type: event_type.into(),
            extra: HashMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_urn(mut self, urn: Urn) -> Self {
        self.urn = Some(urn);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One HTTP round trip recorded into a `ChannelLog`: either the inbound
/// webhook call itself, or one outbound call the core made on its behalf.
/// A single `ChannelLog` accumulates one of these per external call, in the
/// order the calls happened, so a split outbound send (text parts plus an
/// attachment) leaves a trail of every provider call it made rather than
/// only the last one.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: String,
    pub status_code: Option<u16>,
    pub response_headers: Vec<(String, String)>,
    pub response_body: String,
    pub elapsed_ms: u64,
}

/// One record per external interaction (§2: "every request produces exactly
/// one ChannelLog"). `exchanges` is the ordered list of HTTP calls that made
/// up the interaction; secrets are scrubbed from every exchange before a
/// ChannelLog is ever persisted or printed — see `crate::util::redact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLog {
    pub channel_uuid: Uuid,
    pub description: String,
    pub exchanges: Vec<HttpExchange>,
    pub is_error: bool,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ChannelLog {
    pub fn new(channel_uuid: Uuid, description: impl Into<String>) -> Self {
        Self {
            channel_uuid,
            description: description.into(),
            exchanges: Vec::new(),
            is_error: false,
            elapsed_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// Opens a new exchange: the request side of one HTTP call. Paired with
    /// `with_response`/`finish` to fill in the response side once it's known.
    pub fn with_request(mut self, method: impl Into<String>, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.exchanges.push(HttpExchange {
            method: method.into(),
            url: url.into(),
            request_headers: Vec::new(),
            request_body: body.into(),
            status_code: None,
            response_headers: Vec::new(),
            response_body: String::new(),
            elapsed_ms: 0,
        });
        self
    }

    /// Fills in the response side of the most recently opened exchange.
    pub fn with_response(mut self, status_code: u16, body: impl Into<String>) -> Self {
        if let Some(exchange) = self.exchanges.last_mut() {
            exchange.status_code = Some(status_code);
            exchange.response_body = body.into();
        }
        self.is_error = !(200..300).contains(&status_code);
        self
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        if let Some(exchange) = self.exchanges.last_mut() {
            exchange.elapsed_ms = elapsed_ms;
        }
        self.elapsed_ms = elapsed_ms;
        self
    }

    /// Appends a fully-formed exchange built elsewhere (the outbound HTTP
    /// helper), in call order, and rolls its outcome into this log's overall
    /// `is_error` flag — used when a single action makes several outbound
    /// calls (text segments, then an attachment) and every one of them must
    /// survive into the same log.
    pub fn record_exchange(&mut self, exchange: HttpExchange) {
        let ok = matches!(exchange.status_code, Some(code) if (200..300).contains(&code));
        if !ok {
            self.is_error = true;
        }
        self.exchanges.push(exchange);
    }

    /// Closes out the log's top-level outcome (elapsed time, overall
    /// success/failure, and the response recorded against the most recent
    /// exchange) once the action has produced its final HTTP response.
    pub fn finish(&mut self, status_code: u16, body: impl Into<String>, elapsed_ms: u64) {
        self.elapsed_ms = elapsed_ms;
        let body = body.into();
        if let Some(exchange) = self.exchanges.last_mut() {
            exchange.status_code = Some(status_code);
            exchange.response_body = body;
            exchange.elapsed_ms = elapsed_ms;
        }
        self.is_error = !(200..300).contains(&status_code);
    }

    pub fn mark_error(mut self) -> Self {
        self.is_error = true;
        self
    }
}
