//! Secret scrubbing for anything that becomes a `ChannelLog`. Called by the
//! Router and Sender only — a handler never logs a raw secret in the first
//! place, but this is the last line of defense before a log leaves the
//! process.

use crate::model::ChannelLog;

/// Replaces every occurrence of each secret string, in every exchange the
/// log recorded, with a fixed-width placeholder. Order-insensitive, works on
/// substrings so a secret embedded in a query string or an `Authorization`
/// header value is caught either way.
pub fn scrub(mut log: ChannelLog, secrets: &[String]) -> ChannelLog {
    let secrets: Vec<&str> = secrets.iter().map(String::as_str).filter(|s| !s.is_empty()).collect();
    if secrets.is_empty() {
        return log;
    }

    for exchange in log.exchanges.iter_mut() {
        exchange.url = scrub_str(&exchange.url, &secrets);
        exchange.request_body = scrub_str(&exchange.request_body, &secrets);
        exchange.response_body = scrub_str(&exchange.response_body, &secrets);
        for (_, value) in exchange.request_headers.iter_mut() {
            *value = scrub_str(value, &secrets);
        }
        for (_, value) in exchange.response_headers.iter_mut() {
            *value = scrub_str(value, &secrets);
        }
    }
    log
}

fn scrub_str(input: &str, secrets: &[&str]) -> String {
    let mut out = input.to_string();
    for secret in secrets {
        if !out.contains(secret) {
            continue;
        }
        out = out.replace(*secret, "********");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn scrubs_secret_from_all_fields() {
        let log = ChannelLog::new(Uuid::new_v4(), "send")
            .with_request("POST", "https://api.example.com?token=abc123", "Authorization: Bearer abc123")
            .with_response(200, "ok, used token abc123");
        let scrubbed = scrub(log, &["abc123".to_string()]);
        let exchange = &scrubbed.exchanges[0];
        assert!(!exchange.url.contains("abc123"));
        assert!(!exchange.request_body.contains("abc123"));
        assert!(!exchange.response_body.contains("abc123"));
    }

    #[test]
    fn scrubs_every_exchange_in_a_multi_call_log() {
        let mut log = ChannelLog::new(Uuid::new_v4(), "send");
        log.record_exchange(crate::model::HttpExchange {
            method: "POST".to_string(),
            url: "https://api.example.com/1?token=abc123".to_string(),
            request_headers: Vec::new(),
            request_body: String::new(),
            status_code: Some(200),
            response_headers: Vec::new(),
            response_body: String::new(),
            elapsed_ms: 1,
        });
        log.record_exchange(crate::model::HttpExchange {
            method: "POST".to_string(),
            url: "https://api.example.com/2?token=abc123".to_string(),
            request_headers: Vec::new(),
            request_body: String::new(),
            status_code: Some(200),
            response_headers: Vec::new(),
            response_body: String::new(),
            elapsed_ms: 1,
        });
        let scrubbed = scrub(log, &["abc123".to_string()]);
        assert_eq!(scrubbed.exchanges.len(), 2);
        assert!(scrubbed.exchanges.iter().all(|e| !e.url.contains("abc123")));
    }

    #[test]
    fn no_secrets_is_a_no_op() {
        let log = ChannelLog::new(Uuid::new_v4(), "send").with_request("POST", "https://x", "body");
        let original = log.exchanges[0].request_body.clone();
        let scrubbed = scrub(log, &[]);
        assert_eq!(scrubbed.exchanges[0].request_body, original);
    }
}
