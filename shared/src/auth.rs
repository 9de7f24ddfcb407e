//! Caller identity from the API Gateway Cognito authorizer.
//!
//! Tokens are validated by the authorizer before the Lambda runs; handlers
//! only read the resulting claims.

use crate::{Error, Result};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// User's Cognito subject (UUID)
    pub user_id: String,
    /// User's email
    pub email: Option<String>,
}

/// Extract user from API Gateway request context.
///
/// When using Cognito authorizer, user info is in requestContext.authorizer.claims
pub fn extract_user_from_context(claims: &serde_json::Value) -> Result<AuthenticatedUser> {
    let sub = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Auth("Missing sub claim".to_string()))?;

    let email = claims
        .get("email")
        .or_else(|| claims.get("cognito:username"))
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(AuthenticatedUser {
        user_id: sub.to_string(),
        email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_user() {
        let claims = json!({ "sub": "user-123", "email": "test@example.com" });
        let user = extract_user_from_context(&claims).unwrap();
        assert_eq!(user.user_id, "user-123");
        assert_eq!(user.email.as_deref(), Some("test@example.com"));
    }

    #[test]
    fn test_username_fallback() {
        let claims = json!({ "sub": "user-123", "cognito:username": "asha" });
        let user = extract_user_from_context(&claims).unwrap();
        assert_eq!(user.email.as_deref(), Some("asha"));
    }

    #[test]
    fn test_missing_sub() {
        let err = extract_user_from_context(&json!({ "email": "x@y.z" })).unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(extract_user_from_context(&json!({ "sub": "" })).is_err());
    }
}
