//! Configuration for the Gateway API service.

use std::time::Duration;

use portcullis_auth_core::{GatewayConfig, GroupAllowList, ProviderConfig, SessionConfig};

/// Routes served by the gateway itself
const RESERVED_PATHS: [&str; 5] = ["/login", "/logout", "/me", "/health", "/ready"];

/// Gateway API configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub http_port: u16,

    /// Per-request timeout for non-health routes
    pub request_timeout: Duration,

    /// Provider, session and claim settings
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let or_default = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        // Server
        let http_port = parse(&or_default("HTTP_PORT", "8080"), "HTTP_PORT")?;
        let request_timeout_secs: u64 =
            parse(&or_default("REQUEST_TIMEOUT_SECS", "30"), "REQUEST_TIMEOUT_SECS")?;

        // Cognito configuration
        let client_id = required("COGNITO_CLIENT_ID")?;
        let client_secret = required("COGNITO_CLIENT_SECRET")?;
        let metadata_address = required("COGNITO_METADATA_ADDRESS")?;
        let log_out_url = required("COGNITO_LOGOUT_URL")?;
        let base_url = required("COGNITO_BASE_URL")?;

        let provider_timeout_secs: u64 =
            parse(&or_default("PROVIDER_TIMEOUT_SECS", "10"), "PROVIDER_TIMEOUT_SECS")?;
        let metadata_refresh_secs: u64 =
            parse(&or_default("METADATA_REFRESH_SECS", "3600"), "METADATA_REFRESH_SECS")?;

        let mut provider = ProviderConfig::try_new(
            &client_id,
            &client_secret,
            &metadata_address,
            &log_out_url,
            &base_url,
        )
        .map_err(|e| ConfigError::AuthConfig(e.to_string()))?
        .with_http_timeout(Duration::from_secs(provider_timeout_secs))
        .with_metadata_refresh(Duration::from_secs(metadata_refresh_secs));

        if let Some(scopes) = lookup("OIDC_SCOPES") {
            provider = provider
                .with_scopes(scopes.split_whitespace())
                .map_err(|e| ConfigError::AuthConfig(e.to_string()))?;
        }
        if let Some(path) = lookup("OIDC_CALLBACK_PATH") {
            if RESERVED_PATHS.contains(&path.as_str()) {
                return Err(ConfigError::Invalid("OIDC_CALLBACK_PATH"));
            }
            provider = provider
                .with_callback_path(path)
                .map_err(|e| ConfigError::AuthConfig(e.to_string()))?;
        }

        // Session secret (minimum 32 bytes)
        let session_secret = required("SESSION_SECRET")?;
        if session_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "SESSION_SECRET must be at least 32 characters",
            ));
        }

        // Session duration (default 8 hours)
        let session_duration_hours: u64 =
            parse(&or_default("SESSION_DURATION_HOURS", "8"), "SESSION_DURATION_HOURS")?;
        let session_duration_secs = session_duration_hours
            .checked_mul(3600)
            .ok_or(ConfigError::Invalid("SESSION_DURATION_HOURS"))?;
        let login_state_ttl_secs: u64 =
            parse(&or_default("LOGIN_STATE_TTL_SECS", "300"), "LOGIN_STATE_TTL_SECS")?;
        let cookie_secure: bool = parse(&or_default("COOKIE_SECURE", "true"), "COOKIE_SECURE")?;

        let mut session = SessionConfig::new(session_secret)
            .with_session_duration(Duration::from_secs(session_duration_secs))
            .with_login_state_ttl(Duration::from_secs(login_state_ttl_secs))
            .with_cookie_secure(cookie_secure);
        if let Some(name) = lookup("SESSION_COOKIE_NAME") {
            if !is_cookie_name(&name) {
                return Err(ConfigError::Invalid("SESSION_COOKIE_NAME"));
            }
            session = session.with_cookie_name(name);
        }

        // Claim normalization
        let group_claim_type = or_default("GROUP_CLAIM_TYPE", "groups");
        let allowed_groups = or_default("ALLOWED_GROUPS", "identities");
        let claim_policy = GroupAllowList::new(
            group_claim_type,
            allowed_groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty()),
        );

        let gateway = GatewayConfig::new(provider, session).with_claim_policy(claim_policy);
        gateway
            .validate()
            .map_err(|e| ConfigError::AuthConfig(e.to_string()))?;

        Ok(Self {
            http_port,
            request_timeout: Duration::from_secs(request_timeout_secs),
            gateway,
        })
    }
}

fn parse<T: std::str::FromStr>(value: &str, name: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid(name))
}

fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Auth config error: {0}")]
    AuthConfig(String),
}
