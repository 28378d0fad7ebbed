//! Error taxonomy: outbound send failures, backend failures, and the
//! router-facing error that collapses both into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Outcome kinds a `ChannelHandler::send` can report. Each kind carries its
/// own retry classification, applied by the Sender (see `crate::sender`).
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unexpected response status {0}")]
    ResponseStatus(u16),

    #[error("unexpected response shape: {0}")]
    ResponseUnexpected(String),

    #[error("response could not be parsed: {0}")]
    ResponseUnparseable(String),

    #[error("contact has opted out")]
    ContactStopped,

    #[error("provider rejected message {code}: {desc}")]
    FailedWithReason { code: String, desc: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("channel is misconfigured: {0}")]
    ChannelConfig(String),

    #[error("media type unsupported: {0}")]
    MediaUnsupported(String),
}

impl SendError {
    /// Whether the Sender should retry this send with backoff, or give up
    /// immediately and mark the message Failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::ConnectionFailed(_) | SendError::RateLimited)
    }
}

/// Failure modes of the reference in-memory backend and any future
/// storage-engine implementation of the `Backend` trait.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("duplicate message")]
    Dedup,

    #[error("message not found")]
    MsgNotFound,

    #[error("not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(String),
}

/// Error surfaced by the ingress router back to the HTTP caller.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("channel not found")]
    ChannelNotFound,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid request signature")]
    BadSignature,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// The HTTP status this error renders as. Pulled out of `IntoResponse`
    /// so the router can also attach it to a `ChannelLog` on the failure
    /// path, where it needs the status and body without consuming a
    /// `Response`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::ChannelNotFound => StatusCode::NOT_FOUND,
            RouterError::UnknownAction(_) => StatusCode::NOT_FOUND,
            RouterError::BadSignature => StatusCode::BAD_REQUEST,
            RouterError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RouterError::Backend(BackendError::Dedup) => StatusCode::OK,
            RouterError::Backend(BackendError::MsgNotFound) => StatusCode::NOT_FOUND,
            RouterError::Backend(BackendError::NotFound) => StatusCode::NOT_FOUND,
            RouterError::Backend(BackendError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The response body text. `BadRequest` and `BadSignature` carry the
    /// stable diagnostic prefix spec.md's external contract promises
    /// verbatim (`field '<name>' required`, `not a possible number`, ...);
    /// every other variant's `Display` impl is fine to show as-is.
    pub fn body_text(&self) -> String {
        match self {
            RouterError::BadRequest(msg) => msg.clone(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.body_text();
        (status, body).into_response()
    }
}
