//! Uniform result envelope returned by every mutation and query.
//!
//! Serialises as `{"success": true, "data": ...}` or
//! `{"success": false, "error": "...", "code": "..."}` so callers branch on
//! a single `success` flag.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Tagged success/error outcome of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult<T> {
    /// The operation succeeded.
    Success(T),
    /// The operation failed with a message and a machine-readable code.
    Failure {
        error: String,
        code: String,
        details: Option<serde_json::Value>,
    },
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        ActionResult::Success(data)
    }

    pub fn failure(code: impl Into<String>, error: impl Into<String>) -> Self {
        ActionResult::Failure {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Attaches structured details to a failure. No-op on success.
    pub fn with_details(self, details: serde_json::Value) -> Self {
        match self {
            ActionResult::Failure { error, code, .. } => ActionResult::Failure {
                error,
                code,
                details: Some(details),
            },
            success => success,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ActionResult::Success(data) => Some(data),
            ActionResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ActionResult::Success(_) => None,
            ActionResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            ActionResult::Success(data) => Ok(data),
            ActionResult::Failure { error, .. } => Err(error),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for ActionResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => ActionResult::Success(data),
            Err(e) => ActionResult::failure("ERROR", e.to_string()),
        }
    }
}

impl<T: Serialize> Serialize for ActionResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ActionResult::Success(data) => {
                let mut s = serializer.serialize_struct("ActionResult", 2)?;
                s.serialize_field("success", &true)?;
                s.serialize_field("data", data)?;
                s.end()
            }
            ActionResult::Failure {
                error,
                code,
                details,
            } => {
                let len = if details.is_some() { 4 } else { 3 };
                let mut s = serializer.serialize_struct("ActionResult", len)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("error", error)?;
                s.serialize_field("code", code)?;
                if let Some(details) = details {
                    s.serialize_field("details", details)?;
                }
                s.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let result = ActionResult::ok(json!({"id": 7}));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"success": true, "data": {"id": 7}}));
    }

    #[test]
    fn test_failure_shape() {
        let result: ActionResult<()> = ActionResult::failure("NOT_FOUND", "Subnet not found");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"success": false, "error": "Subnet not found", "code": "NOT_FOUND"})
        );
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_failure_with_details() {
        let result: ActionResult<()> = ActionResult::failure("VALIDATION_ERROR", "bad input")
            .with_details(json!({"cidr": ["invalid"]}));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["details"]["cidr"][0], "invalid");
    }

    #[test]
    fn test_from_result() {
        let ok: ActionResult<u32> = Ok::<u32, String>(3).into();
        assert_eq!(ok.data(), Some(&3));

        let err: ActionResult<u32> = Err::<u32, String>("boom".to_string()).into();
        assert!(!err.is_success());
        assert_eq!(err.error(), Some("boom"));
        assert_eq!(err.into_result(), Err("boom".to_string()));
    }
}
