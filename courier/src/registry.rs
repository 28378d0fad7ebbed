//! The channel handler contract and the startup-time registry of handlers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use bytes::Bytes;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{RouterError, SendError};
use crate::model::{Channel, ChannelLog, MsgOut};
use crate::urn::Urn;

/// One HTTP action a handler wants the router to expose, e.g. `receive` or
/// `status`. `requires_uuid` picks between the two route shapes spec.md
/// describes: `/c/:channel_type/:channel_uuid/:action` when the provider
/// addresses a specific configured channel in its callback URL, or
/// `/c/:channel_type/:action` when the handler resolves the channel itself
/// from the request body (see `ChannelHandler::resolve_channel`).
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: &'static str,
    pub method: Method,
    pub requires_uuid: bool,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    actions: Vec<ActionSpec>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, method: Method, requires_uuid: bool) {
        self.actions.push(ActionSpec { name, method, requires_uuid });
    }

    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }
}

/// Everything a handler's action logic needs, assembled by the router
/// before dispatch.
pub struct ActionContext<'a> {
    pub channel: Channel,
    pub method: Method,
    pub headers: axum::http::HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    pub backend: Arc<dyn Backend>,
    pub http: reqwest::Client,
    pub log: &'a mut ChannelLog,
    /// Mirrors `CourierConfig::enable_fb_ref_swap`; handlers that implement a
    /// ref-URN-to-real-identity swap (Facebook's `m.me` referral flow) gate
    /// it on this instead of reaching for process-wide config directly.
    pub enable_fb_ref_swap: bool,
}

/// What handling an action produced. The router turns this into an HTTP
/// response; handlers never write one directly, which keeps the response
/// envelope and logging centralized (spec.md's "collect events, build
/// response" rule).
pub enum RouterOutcome {
    /// One or more domain events accepted (messages, statuses, channel
    /// events). The router acknowledges with 200 and a short summary.
    Accepted(Vec<RouterEvent>),
    /// Recognized but intentionally not acted on (e.g. an event type this
    /// handler doesn't model). Still a 200: providers treat non-2xx as
    /// "retry the webhook."
    Ignored(String),
    /// A raw response body the handler must control verbatim, e.g. Facebook's
    /// `hub.challenge` verification echo.
    Raw(axum::http::StatusCode, String),
}

pub enum RouterEvent {
    Msg(crate::model::MsgIn),
    Status(crate::model::StatusUpdate),
    Event(crate::model::ChannelEvent),
}

/// What `ChannelHandler::send` reports back to the Sender. `errors` is
/// non-empty only on partial or total failure; a split message that fails
/// partway through reports the external ids of the parts that made it out
/// plus the error for the part that didn't (see the ordering guarantee in
/// `crate::sender`).
#[derive(Debug, Default)]
pub struct SendOutcome {
    pub external_ids: Vec<String>,
    pub errors: Vec<SendError>,
}

impl SendOutcome {
    pub fn success(external_ids: Vec<String>) -> Self {
        Self { external_ids, errors: Vec::new() }
    }

    pub fn failure(error: SendError) -> Self {
        Self { external_ids: Vec::new(), errors: vec![error] }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct SendContext<'a> {
    pub channel: &'a Channel,
    pub http: &'a reqwest::Client,
}

/// The contract every messaging provider integration implements. Required
/// methods cover identity, route registration, and outbound sending;
/// optional methods default to "not supported" and are overridden only by
/// handlers that need them, which stands in for the narrower per-capability
/// interfaces a downcast-based design would otherwise require.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel_type(&self) -> &'static str;
    fn channel_name(&self) -> &'static str;

    /// Registers the HTTP actions this handler exposes under
    /// `/c/<channel_type>/...`.
    fn initialize(&self, routes: &mut RouteTable);

    /// Handles one inbound HTTP action previously registered via `initialize`.
    async fn handle_action(&self, action: &str, ctx: &mut ActionContext<'_>) -> Result<RouterOutcome, RouterError>;

    /// Delivers one outbound message. Implementations that split long text
    /// or multiple attachments into several provider calls must preserve
    /// the order of `external_ids` to match the order they were sent in.
    async fn send(&self, ctx: &SendContext<'_>, msg: &MsgOut, log: &mut ChannelLog) -> SendOutcome;

    /// If this handler verifies provider signatures, returns the header name
    /// and channel config key holding the shared secret. `None` means this
    /// handler's inbound actions are unauthenticated (e.g. aggregator IP
    /// allowlisting happens upstream of Courier).
    fn signature_spec(&self, _channel: &Channel) -> Option<SignatureSpec> {
        None
    }

    /// Resolves the channel for a no-uuid route shape, when the provider's
    /// payload itself identifies which configured channel it belongs to
    /// (e.g. a Facebook page id in the webhook body).
    async fn resolve_channel(
        &self,
        _backend: &dyn Backend,
        _headers: &axum::http::HeaderMap,
        _body: &Bytes,
    ) -> Option<Channel> {
        None
    }

    /// Config keys this handler stores secrets under, scrubbed from any
    /// ChannelLog before it leaves the process.
    fn redacted_keys(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Profile lookup for a contact, when the provider exposes one (e.g. a
    /// Graph API `/<psid>` call returning a display name). `None` means this
    /// handler has nothing to add beyond the URN itself.
    async fn describe_urn(
        &self,
        _channel: &Channel,
        _urn: &Urn,
        _http: &reqwest::Client,
    ) -> Option<std::collections::HashMap<String, String>> {
        None
    }

    /// Builds the request used to fetch an attachment this channel keeps
    /// behind its own auth (e.g. Meta's `/media/<id>` endpoint, which wants
    /// a bearer token). Defaults to a plain unauthenticated GET, which is
    /// correct for any handler whose attachment URLs are already public.
    fn build_attachment_request(&self, _channel: &Channel, url: &str, http: &reqwest::Client) -> reqwest::RequestBuilder {
        crate::media::default_attachment_request(http, url)
    }

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy)]
pub enum SignatureAlgorithm {
    HmacSha1,
    HmacSha256,
    RsaSha256,
}

#[derive(Debug, Clone)]
pub struct SignatureSpec {
    pub header_name: &'static str,
    pub algorithm: SignatureAlgorithm,
    pub secret_config_key: &'static str,
}

/// Startup-assembled map from channel type tag to handler. Built once via
/// `Registry::builder()` and shared read-only for the life of the process.
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn ChannelHandler>>,
    routes: HashMap<&'static str, RouteTable>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, channel_type: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.get(channel_type).cloned()
    }

    pub fn action_spec(&self, channel_type: &str, action: &str) -> Option<&ActionSpec> {
        self.routes
            .get(channel_type)?
            .actions()
            .iter()
            .find(|spec| spec.name == action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChannelHandler>> {
        self.handlers.values()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<&'static str, Arc<dyn ChannelHandler>>,
    routes: HashMap<&'static str, RouteTable>,
}

impl RegistryBuilder {
    /// Registers a handler. Panics on a duplicate `channel_type`: two
    /// handlers claiming the same route prefix is a startup-time
    /// configuration bug, not something to handle at runtime.
    pub fn register(mut self, handler: Arc<dyn ChannelHandler>) -> Self {
        let key = handler.channel_type();
        let mut routes = RouteTable::new();
        handler.initialize(&mut routes);
        if self.handlers.insert(key, handler).is_some() {
            panic!("duplicate channel handler registered for type {key:?}");
        }
        self.routes.insert(key, routes);
        self
    }

    pub fn build(self) -> Registry {
        Registry { handlers: self.handlers, routes: self.routes }
    }
}
