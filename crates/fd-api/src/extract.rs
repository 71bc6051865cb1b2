//! Extractor wrappers whose rejections use the failure envelope.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ApiError;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH-style bodies. Use with `#[serde(default)]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

/// Trims free text and maps blank input to `None`.
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Applies an optional text update: absent keeps the value, blank clears it.
pub fn patch_text(target: &mut Option<String>, update: Option<String>) {
    if let Some(value) = update {
        *target = clean(Some(value));
    }
}

/// Applies an optional nullable update built with [`double_option`].
pub fn patch<T>(target: &mut Option<T>, update: Option<Option<T>>) {
    if let Some(value) = update {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Deserialize)]
    struct Body {
        #[serde(default, deserialize_with = "double_option")]
        owner: Option<Option<Uuid>>,
    }

    #[test]
    fn test_double_option_distinguishes_null_from_absent() {
        let absent: Body = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.owner, None);
        let null: Body = serde_json::from_str(r#"{"owner": null}"#).unwrap();
        assert_eq!(null.owner, Some(None));
    }

    #[test]
    fn test_patch_text() {
        let mut value = Some("old".to_string());
        patch_text(&mut value, None);
        assert_eq!(value.as_deref(), Some("old"));
        patch_text(&mut value, Some("  new ".into()));
        assert_eq!(value.as_deref(), Some("new"));
        patch_text(&mut value, Some("   ".into()));
        assert_eq!(value, None);
    }
}
