use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - credential may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

/// Session lifecycle failures.
///
/// Only [`SessionError::InvalidCredentials`] and [`SessionError::RenewalFailed`]
/// are meant to reach the user. `AuthorizationExpired` is recovered by the
/// request gate and only surfaces when a replayed call is rejected again.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Too many attempts - please wait before retrying")]
    RateLimited,

    #[error("Authorization expired")]
    AuthorizationExpired,

    #[error("Session expired - please log in again ({0})")]
    RenewalFailed(String),

    #[error("Anti-forgery token rejected")]
    AntiForgeryMismatch,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Whether the application should drop back to its login view.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            SessionError::RenewalFailed(_)
                | SessionError::AntiForgeryMismatch
                | SessionError::NotAuthenticated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, "no"),
            ApiError::AccessDenied(ref b) if b == "no"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "down"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::CONFLICT, "taken"),
            ApiError::InvalidResponse(ref m) if m.contains("409")
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "é".repeat(400); // 800 bytes, multi-byte chars
        match ApiError::from_status(StatusCode::NOT_FOUND, &body) {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("truncated, 800 total bytes"));
                assert!(msg.len() < body.len());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_requires_login() {
        assert!(SessionError::RenewalFailed("gone".into()).requires_login());
        assert!(SessionError::AntiForgeryMismatch.requires_login());
        assert!(!SessionError::InvalidCredentials.requires_login());
        assert!(!SessionError::AuthorizationExpired.requires_login());
    }
}
