//! CSRF tokens for dashboard forms.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use rand::Rng;
use subtle::ConstantTimeEq;
use tower_sessions::Session;

use super::get_session_data;
use crate::error::ApiError;

/// Header carrying the token on HTMX and fetch requests.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// The CSRF token bound to the current admin session.
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Compares a submitted token against the session token.
    pub fn verify(&self, submitted: Option<&str>) -> Result<(), ApiError> {
        match submitted {
            Some(token) if validate_csrf_token(token, &self.0) => Ok(()),
            _ => Err(ApiError::CsrfValidationFailed),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::SessionExpired)?;

        let session_data = get_session_data(&session)
            .await
            .ok_or(ApiError::SessionExpired)?;

        Ok(CsrfToken(session_data.csrf_token))
    }
}

pub fn generate_csrf_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Constant-time comparison.
pub fn validate_csrf_token(submitted: &str, expected: &str) -> bool {
    if submitted.len() != expected.len() {
        return false;
    }
    submitted.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Form field wins over the header.
pub fn extract_csrf_from_form_or_header<'a>(
    form_token: Option<&'a str>,
    header_token: Option<&'a str>,
) -> Option<&'a str> {
    form_token.or(header_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_csrf_token() {
        let token1 = generate_csrf_token();
        let token2 = generate_csrf_token();

        assert_eq!(token1.len(), 32);
        assert_ne!(token1, token2);
        assert!(token1.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn test_validate_csrf_token() {
        let token = generate_csrf_token();
        assert!(validate_csrf_token(&token, &token));
        assert!(!validate_csrf_token(&token, &generate_csrf_token()));
        assert!(!validate_csrf_token(&token, "short"));
    }

    #[test]
    fn test_verify_rejects_missing_token() {
        let csrf = CsrfToken("abc".to_string());
        assert!(csrf.verify(Some("abc")).is_ok());
        assert!(matches!(
            csrf.verify(None),
            Err(ApiError::CsrfValidationFailed)
        ));
        assert!(csrf.verify(Some("abd")).is_err());
    }

    #[test]
    fn test_extract_csrf_priority() {
        assert_eq!(
            extract_csrf_from_form_or_header(Some("form"), Some("header")),
            Some("form")
        );
        assert_eq!(
            extract_csrf_from_form_or_header(None, Some("header")),
            Some("header")
        );
        assert_eq!(extract_csrf_from_form_or_header(None, None), None);
    }
}
