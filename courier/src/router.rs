//! Ingress HTTP router (C5): a single generic dispatch path shared by every
//! channel handler. Resolves the channel, verifies the provider's signature
//! if the handler declares one, hands off to the handler's action logic,
//! then persists whatever events came back and writes the audit log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::CourierConfig;
use crate::error::RouterError;
use crate::model::ChannelLog;
use crate::registry::{ActionContext, Registry, RouterEvent, RouterOutcome};
use crate::sender::SenderHandle;
use crate::util::redact;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub backend: Arc<dyn Backend>,
    pub config: Arc<CourierConfig>,
    pub http: reqwest::Client,
    pub sender: SenderHandle,
}

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/ready", axum::routing::get(ready))
        .route("/c/{channel_type}/{channel_uuid}/{action}", any(dispatch_with_uuid))
        .route("/c/{channel_type}/{action}", any(dispatch_without_uuid))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn ready() -> &'static str {
    "OK"
}

async fn dispatch_with_uuid(
    State(state): State<AppState>,
    Path((channel_type, channel_uuid, action)): Path<(String, Uuid, String)>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    dispatch(state, channel_type, Some(channel_uuid), action, method, headers, query, body).await
}

async fn dispatch_without_uuid(
    State(state): State<AppState>,
    Path((channel_type, action)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    dispatch(state, channel_type, None, action, method, headers, query, body).await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: AppState,
    channel_type: String,
    channel_uuid: Option<Uuid>,
    action: String,
    method: Method,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: Bytes,
) -> Response {
    match dispatch_inner(state, channel_type, channel_uuid, action, method, headers, query, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_inner(
    state: AppState,
    channel_type: String,
    channel_uuid: Option<Uuid>,
    action: String,
    method: Method,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: Bytes,
) -> Result<Response, RouterError> {
    let handler = state
        .registry
        .get(&channel_type)
        .ok_or(RouterError::ChannelNotFound)?;

    let spec = state
        .registry
        .action_spec(&channel_type, &action)
        .ok_or_else(|| RouterError::UnknownAction(action.clone()))?;

    if spec.requires_uuid != channel_uuid.is_some() {
        return Err(RouterError::UnknownAction(action));
    }
    if spec.method != method {
        return Err(RouterError::BadRequest(format!("{action} does not accept {method}")));
    }

    let channel = match channel_uuid {
        Some(uuid) => state.backend.get_channel(&channel_type, uuid).await?,
        None => handler
            .resolve_channel(state.backend.as_ref(), &headers, &body)
            .await
            .ok_or(RouterError::ChannelNotFound)?,
    };

    let mut log = ChannelLog::new(channel.uuid, action.clone())
        .with_request(method.to_string(), format!("/c/{channel_type}/{action}"), String::new());
    let start = Instant::now();

    if let Some(sig_spec) = handler.signature_spec(&channel) {
        if let Err(e) = verify_signature(&channel, &headers, &body, &sig_spec) {
            log.finish(StatusCode::BAD_REQUEST.as_u16(), e.to_string(), start.elapsed().as_millis() as u64);
            let secrets = collect_secrets(&state.config, handler.as_ref(), &channel);
            let log = redact::scrub(log, &secrets).mark_error();
            state.backend.write_channel_log(log).await?;
            return Err(e);
        }
    }

    let mut ctx = ActionContext {
        channel: channel.clone(),
        method,
        headers,
        query,
        body,
        backend: state.backend.clone(),
        http: state.http.clone(),
        log: &mut log,
        enable_fb_ref_swap: state.config.enable_fb_ref_swap,
    };

    let timeout = Duration::from_secs(state.config.action_timeout_secs);
    let action_result: Result<RouterOutcome, RouterError> =
        match tokio::time::timeout(timeout, handler.handle_action(&action, &mut ctx)).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::Internal("action timed out".to_string())),
        };

    // Every branch below renders a response for the caller and, on the way,
    // fills in the log's outcome fields — a handler error after this point
    // (decode failure, persist failure, action timeout) still has to leave
    // exactly one ChannelLog behind, same as a clean success (per spec.md
    // §2's "every request produces exactly one ChannelLog").
    let response = match action_result {
        Ok(RouterOutcome::Accepted(events)) => match persist_events(&state, &channel, &events).await {
            Ok(outcomes) => {
                let response = crate::util::response::render_accepted(&events, &outcomes);
                log.finish(StatusCode::OK.as_u16(), "accepted".to_string(), start.elapsed().as_millis() as u64);
                response
            }
            Err(e) => {
                log.finish(e.status_code().as_u16(), e.body_text(), start.elapsed().as_millis() as u64);
                e.into_response()
            }
        },
        Ok(RouterOutcome::Ignored(reason)) => {
            let response = crate::util::response::render_ignored(&reason);
            log.finish(StatusCode::OK.as_u16(), reason, start.elapsed().as_millis() as u64);
            response
        }
        Ok(RouterOutcome::Raw(status, body)) => {
            log.finish(status.as_u16(), body.clone(), start.elapsed().as_millis() as u64);
            (status, body).into_response()
        }
        Err(e) => {
            log.finish(e.status_code().as_u16(), e.body_text(), start.elapsed().as_millis() as u64);
            e.into_response()
        }
    };

    let secrets = collect_secrets(&state.config, handler.as_ref(), &channel);
    let log = redact::scrub(log, &secrets);
    state.backend.write_channel_log(log).await?;

    Ok(response)
}

/// Persists every accepted event, reporting per-event whether it was
/// actually written or absorbed as a duplicate/unknown-target no-op.
/// Retried webhooks are the normal case here, not an error: a duplicate
/// inbound message (`BackendError::Dedup`) or a status callback for a
/// message the backend never saw (`BackendError::MsgNotFound`, e.g. a
/// stale external id from a channel that was since reconfigured) must be
/// absorbed quietly rather than surfaced as a 5xx.
async fn persist_events(
    state: &AppState,
    channel: &crate::model::Channel,
    events: &[RouterEvent],
) -> Result<Vec<crate::util::response::PersistOutcome>, RouterError> {
    use crate::util::response::PersistOutcome;

    let dedup_window = state.config.dedup_window_for(&channel.config);
    let mut outcomes = Vec::with_capacity(events.len());
    for event in events {
        let outcome = match event {
            RouterEvent::Msg(msg) => match state.backend.write_msg(msg.clone(), dedup_window).await {
                Ok(()) => PersistOutcome::Written,
                Err(crate::error::BackendError::Dedup) => PersistOutcome::Ignored,
                Err(e) => return Err(e.into()),
            },
            RouterEvent::Status(update) => match state.backend.write_status_update(update.clone()).await {
                Ok(()) => PersistOutcome::Written,
                Err(crate::error::BackendError::MsgNotFound) => PersistOutcome::Ignored,
                Err(e) => return Err(e.into()),
            },
            RouterEvent::Event(event) => {
                state.backend.write_channel_event(event.clone()).await?;
                PersistOutcome::Written
            }
        };
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn collect_secrets(config: &CourierConfig, handler: &dyn crate::registry::ChannelHandler, channel: &crate::model::Channel) -> Vec<String> {
    let mut secrets = config.global_secrets.clone();
    for key in handler.redacted_keys() {
        if let Some(value) = channel.config_str(key) {
            secrets.push(value.to_string());
        }
    }
    secrets
}

fn verify_signature(
    channel: &crate::model::Channel,
    headers: &HeaderMap,
    body: &Bytes,
    spec: &crate::registry::SignatureSpec,
) -> Result<(), RouterError> {
    let header_value = headers
        .get(spec.header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or(RouterError::BadSignature)?;
    let secret = channel
        .config_str(spec.secret_config_key)
        .ok_or_else(|| RouterError::BadRequest("channel missing signing secret".to_string()))?;

    let result = match spec.algorithm {
        crate::registry::SignatureAlgorithm::HmacSha1 => {
            crate::util::signature::verify_hmac_sha1(secret.as_bytes(), body, header_value)
        }
        crate::registry::SignatureAlgorithm::HmacSha256 => {
            crate::util::signature::verify_hmac_sha256(secret.as_bytes(), body, header_value)
        }
        crate::registry::SignatureAlgorithm::RsaSha256 => {
            use base64::Engine;
            match base64::engine::general_purpose::STANDARD.decode(header_value) {
                Ok(sig_bytes) => crate::util::signature::verify_rsa_sha256(&secret, body, &sig_bytes),
                Err(_) => Err(crate::util::signature::SignatureError::Malformed(header_value.to_string())),
            }
        }
    };

    result.map_err(|_| RouterError::BadSignature)
}
