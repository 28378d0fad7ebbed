//! Webhook signature verification primitives.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header: {0}")]
    Malformed(String),
    #[error("signature mismatch")]
    Mismatch,
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Verifies a `sha1=<hex>`-style header (Facebook's `X-Hub-Signature`)
/// against an HMAC-SHA1 of the raw body.
pub fn verify_hmac_sha1(secret: &[u8], body: &[u8], header_value: &str) -> Result<(), SignatureError> {
    let hex_sig = header_value
        .strip_prefix("sha1=")
        .ok_or_else(|| SignatureError::Malformed(header_value.to_string()))?;
    verify_hmac::<Hmac<Sha1>>(secret, body, hex_sig)
}

/// Verifies a `sha256=<hex>`-style header (Facebook's `X-Hub-Signature-256`).
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], header_value: &str) -> Result<(), SignatureError> {
    let hex_sig = header_value
        .strip_prefix("sha256=")
        .ok_or_else(|| SignatureError::Malformed(header_value.to_string()))?;
    verify_hmac::<Hmac<Sha256>>(secret, body, hex_sig)
}

fn verify_hmac<M: Mac + hmac::digest::KeyInit>(secret: &[u8], body: &[u8], hex_sig: &str) -> Result<(), SignatureError> {
    let expected = hex_decode(hex_sig).ok_or_else(|| SignatureError::Malformed(hex_sig.to_string()))?;

    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(secret)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(&expected).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Verifies an RSA-PKCS1v15-SHA256 signature, for providers that sign with
/// an asymmetric key instead of a shared secret.
pub fn verify_rsa_sha256(public_key_pem: &str, body: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::pkcs8::DecodePublicKey;
    use rsa::sha2::Sha256 as RsaSha256;
    use rsa::signature::Verifier;
    use rsa::RsaPublicKey;

    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    let verifying_key = VerifyingKey::<RsaSha256>::new(key);
    let sig = Signature::try_from(signature).map_err(|e| SignatureError::Malformed(e.to_string()))?;

    verifying_key
        .verify(body, &sig)
        .map_err(|_| SignatureError::Mismatch)
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmac_sha1_hex(secret: &[u8], body: &[u8]) -> String {
        let mut mac = <Hmac<Sha1> as hmac::digest::KeyInit>::new_from_slice(secret).unwrap();
        mac.update(body);
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    #[test]
    fn accepts_correct_sha1_signature() {
        let secret = b"shh";
        let body = b"{\"hello\":\"world\"}";
        let header = format!("sha1={}", hmac_sha1_hex(secret, body));
        assert!(verify_hmac_sha1(secret, body, &header).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"shh";
        let header = format!("sha1={}", hmac_sha1_hex(secret, b"original"));
        assert!(verify_hmac_sha1(secret, b"tampered", &header).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(verify_hmac_sha1(b"shh", b"body", "not-a-signature").is_err());
    }
}
