//! HMAC signatures on agent requests.
//!
//! Agents sign the raw request body (POST) or the raw query string (GET)
//! with the shared secret and send the hex digest in `X-Agent-Signature`,
//! optionally prefixed with `sha256=`.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Agent-Signature";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AgentSignatureError {
    #[error("agent secret is not configured")]
    NotConfigured,

    #[error("missing X-Agent-Signature header")]
    Missing,

    #[error("signature does not match")]
    Mismatch,
}

impl From<AgentSignatureError> for ApiError {
    fn from(err: AgentSignatureError) -> Self {
        match err {
            AgentSignatureError::NotConfigured => {
                ApiError::ServiceUnavailable("Agent endpoints are not configured".to_string())
            }
            AgentSignatureError::Missing | AgentSignatureError::Mismatch => {
                ApiError::InvalidSignature
            }
        }
    }
}

/// Checks an HMAC-SHA256 signature in raw hex or `sha256=<hex>` form.
pub fn validate_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let sig_hex = signature
        .strip_prefix("sha256=")
        .or_else(|| signature.strip_prefix("SHA256="))
        .unwrap_or(signature);

    let expected = match hex::decode(sig_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Hex signature for `payload`. Used by tests and by agent tooling.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies the signature header of an agent request.
pub fn verify_agent_request(
    secret: Option<&str>,
    headers: &HeaderMap,
    payload: &[u8],
) -> Result<(), AgentSignatureError> {
    let secret = secret.ok_or(AgentSignatureError::NotConfigured)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AgentSignatureError::Missing)?;

    if validate_signature(payload, signature, secret) {
        Ok(())
    } else {
        warn!("Rejected agent request with a bad signature");
        Err(AgentSignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_validate_signature() {
        let body = b"{\"hostname\":\"ws-01\"}";
        let secret = "agent-secret";
        let signature = sign(body, secret);

        assert!(validate_signature(body, &signature, secret));
        assert!(validate_signature(body, &format!("sha256={}", signature), secret));
        assert!(!validate_signature(body, "invalid", secret));
        assert!(!validate_signature(body, &signature, "wrong-secret"));
        assert!(!validate_signature(b"tampered", &signature, secret));
    }

    #[test]
    fn test_verify_agent_request() {
        let body = b"hostname=ws-01";
        let mut headers = HeaderMap::new();

        assert_eq!(
            verify_agent_request(None, &headers, body),
            Err(AgentSignatureError::NotConfigured)
        );
        assert_eq!(
            verify_agent_request(Some("s"), &headers, body),
            Err(AgentSignatureError::Missing)
        );

        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("00ff"));
        assert_eq!(
            verify_agent_request(Some("s"), &headers, body),
            Err(AgentSignatureError::Mismatch)
        );

        let good = HeaderValue::from_str(&sign(body, "s")).unwrap();
        headers.insert(SIGNATURE_HEADER, good);
        assert!(verify_agent_request(Some("s"), &headers, body).is_ok());
    }
}
