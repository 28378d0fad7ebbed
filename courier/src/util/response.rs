//! The external HTTP response contract: the exact envelope shapes every
//! provider integration's inbound actions return, shared here so no handler
//! has to hand-roll one. The shapes themselves are part of Courier's
//! external contract — providers and the flow engine's own tooling parse
//! them, so field names and the `"type"` discriminant are stable.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::SecondsFormat;
use serde_json::{json, Value};

use crate::model::{ChannelEvent, MsgIn, StatusTarget, StatusUpdate};
use crate::registry::RouterEvent;

/// What happened when the router tried to persist one accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    /// A duplicate inbound message, or a status callback for a message the
    /// backend doesn't know about — both are retried aggressively by
    /// providers and must be absorbed rather than surfaced as an error.
    Ignored,
}

/// Renders the response for a batch of accepted events plus what actually
/// happened persisting each one. When every event was ignored (e.g. a
/// webhook retried after its first delivery already deduped), the response
/// is the plain-text "ignoring" body spec.md calls for instead of an empty
/// data array.
pub fn render_accepted(events: &[RouterEvent], outcomes: &[PersistOutcome]) -> Response {
    let written: Vec<&RouterEvent> = events
        .iter()
        .zip(outcomes)
        .filter(|(_, outcome)| **outcome == PersistOutcome::Written)
        .map(|(event, _)| event)
        .collect();

    if written.is_empty() {
        return (StatusCode::OK, "ignoring duplicate or unrecognized webhook payload").into_response();
    }

    let data: Vec<Value> = written.iter().map(|event| event_json(event)).collect();
    let body = json!({ "message": "Message Accepted", "data": data });
    (StatusCode::OK, axum::Json(body)).into_response()
}

/// Renders a handler-declared "not actionable" result (e.g. a webhook event
/// kind this handler doesn't model at all).
pub fn render_ignored(reason: &str) -> Response {
    (StatusCode::OK, format!("ignoring {reason}")).into_response()
}

fn event_json(event: &RouterEvent) -> Value {
    match event {
        RouterEvent::Msg(msg) => msg_json(msg),
        RouterEvent::Status(update) => status_json(update),
        RouterEvent::Event(event) => event_json_inner(event),
    }
}

fn msg_json(msg: &MsgIn) -> Value {
    json!({
        "type": "msg",
        "channel_uuid": msg.channel_uuid.to_string(),
        "msg_uuid": msg.uuid.to_string(),
        "text": msg.text,
        "urn": msg.urn.to_string(),
        "external_id": msg.external_id,
        "received_on": msg.received_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    })
}

fn status_json(update: &StatusUpdate) -> Value {
    let mut body = json!({
        "type": "status",
        "status": update.status.code(),
    });
    match &update.target {
        StatusTarget::MsgUuid(msg_uuid) => {
            body["msg_id"] = json!(msg_uuid.to_string());
        }
        StatusTarget::ExternalId { channel_uuid, external_id } => {
            body["channel_uuid"] = json!(channel_uuid.to_string());
            body["external_id"] = json!(external_id);
        }
    }
    if let Some(external_id) = &update.external_id {
        body["external_id"] = json!(external_id);
    }
    body
}

fn event_json_inner(event: &ChannelEvent) -> Value {
    json!({
        "type": "event",
        "channel_uuid": event.channel_uuid.to_string(),
        "event_type": event.event_type,
        "urn": event.urn.as_ref().map(|u| u.to_string()),
        "extra": event.extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, MsgIn, Status};
    use crate::urn::{Scheme, Urn};
    use uuid::Uuid;

    #[test]
    fn msg_json_carries_stable_fields() {
        let urn = Urn::new(Scheme::Tel, "+15551234");
        let msg = MsgIn::new(Uuid::new_v4(), urn, "hi").with_external_id("abc");
        let json = msg_json(&msg);
        assert_eq!(json["type"], "msg");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["external_id"], "abc");
        assert!(json["received_on"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn status_json_uses_single_letter_code() {
        let update = StatusUpdate::for_external_id(Uuid::new_v4(), "12345", Status::Delivered);
        let json = status_json(&update);
        assert_eq!(json["status"], "D");
        assert_eq!(json["external_id"], "12345");
    }

    #[test]
    fn all_ignored_events_render_ignoring_text_body() {
        let urn = Urn::new(Scheme::Tel, "+15551234");
        let msg = MsgIn::new(Uuid::new_v4(), urn, "hi").with_external_id("abc");
        let events = vec![RouterEvent::Msg(msg)];
        let outcomes = vec![PersistOutcome::Ignored];
        let response = render_accepted(&events, &outcomes);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn attachment_does_not_affect_msg_json_shape() {
        let urn = Urn::new(Scheme::Tel, "+15551234");
        let msg = MsgIn::new(Uuid::new_v4(), urn, "hi").with_attachment(Attachment::media("image/jpeg", "https://x/y.jpg"));
        let json = msg_json(&msg);
        assert_eq!(json["type"], "msg");
    }
}
