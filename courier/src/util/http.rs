//! Outbound HTTP helper that logs every call into a `ChannelLog`, so
//! handlers get request/response visibility for free instead of hand-rolling
//! it per provider. A handler that makes several calls for one send (split
//! text segments, then an attachment) calls this once per call and every
//! call lands in the same log, in order.

use std::time::Instant;

use bytes::Bytes;
use reqwest::StatusCode;

use crate::model::{ChannelLog, HttpExchange};

/// The buffered response `send_logged` hands back: the body is read to
/// completion up front (so it can be recorded into the exchange), so callers
/// get a plain in-memory view instead of `reqwest::Response`'s streaming one.
pub struct LoggedResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl LoggedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

pub async fn send_logged(
    request: reqwest::RequestBuilder,
    log: &mut ChannelLog,
) -> Result<LoggedResponse, reqwest::Error> {
    let (method, url, request_headers, body) = describe(&request);
    let start = Instant::now();
    let result = request.send().await;

    let mut exchange = HttpExchange {
        method,
        url,
        request_headers,
        request_body: body,
        status_code: None,
        response_headers: Vec::new(),
        response_body: String::new(),
        elapsed_ms: 0,
    };

    let outcome = match result {
        Ok(response) => {
            let status = response.status();
            let headers = header_pairs(response.headers());
            exchange.status_code = Some(status.as_u16());
            exchange.response_headers = headers.clone();
            match response.bytes().await {
                Ok(body) => {
                    exchange.response_body = String::from_utf8_lossy(&body).to_string();
                    Ok(LoggedResponse { status, headers, body })
                }
                Err(e) => {
                    exchange.response_body = e.to_string();
                    Err(e)
                }
            }
        }
        Err(e) => {
            exchange.response_body = e.to_string();
            Err(e)
        }
    };

    exchange.elapsed_ms = start.elapsed().as_millis() as u64;
    log.record_exchange(exchange);
    outcome
}

fn describe(request: &reqwest::RequestBuilder) -> (String, String, Vec<(String, String)>, String) {
    match request.try_clone().and_then(|b| b.build().ok()) {
        Some(built) => (
            built.method().to_string(),
            built.url().to_string(),
            header_pairs(built.headers()),
            built
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default(),
        ),
        None => ("UNKNOWN".to_string(), "UNKNOWN".to_string(), Vec::new(), String::new()),
    }
}

fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("<non-utf8>").to_string()))
        .collect()
}
