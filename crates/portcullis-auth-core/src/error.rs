//! Auth errors

use thiserror::Error;

/// Authentication errors
///
/// The inner strings are for server-side logs only. Nothing here is meant to
/// be shown to the user agent.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing or invalid provider settings (fatal at startup)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Metadata, token or user-info endpoint could not be reached
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Missing or mismatched state, missing code, or provider error parameter
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// Provider rejected the code or the client credentials, or returned
    /// tokens that failed validation
    #[error("token exchange failed: {0}")]
    TokenExchangeFailure(String),

    /// Tampered, expired, revoked or malformed session cookie
    #[error("invalid session token")]
    SessionTokenInvalid,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCallback(_) | Self::TokenExchangeFailure(_) | Self::SessionTokenInvalid => {
                401
            }
            Self::ProviderUnreachable(_) => 503,
            Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCallback(_) | Self::TokenExchangeFailure(_) | Self::SessionTokenInvalid => {
                "AUTHENTICATION_FAILED"
            }
            Self::ProviderUnreachable(_) => "PROVIDER_UNAVAILABLE",
            Self::Configuration(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure leaves the user unauthenticated and able to retry
    /// by starting a new login
    pub fn is_authentication_failure(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Internal(_))
    }

    pub(crate) fn invalid_callback(reason: impl Into<String>) -> Self {
        Self::InvalidCallback(reason.into())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        tracing::warn!(error = %err, "Identity provider request failed");
        Self::ProviderUnreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::invalid_callback("state").status_code(), 401);
        assert_eq!(AuthError::TokenExchangeFailure("x".into()).status_code(), 401);
        assert_eq!(AuthError::ProviderUnreachable("x".into()).status_code(), 503);
        assert_eq!(AuthError::Configuration("x".into()).status_code(), 500);
    }

    #[test]
    fn test_session_invalid_has_no_detail() {
        assert_eq!(AuthError::SessionTokenInvalid.to_string(), "invalid session token");
        assert_eq!(
            AuthError::SessionTokenInvalid.error_code(),
            AuthError::invalid_callback("anything").error_code()
        );
    }
}
