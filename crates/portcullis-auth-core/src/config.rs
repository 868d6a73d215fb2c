//! Configuration types for the gateway
//!
//! All values are resolved once at startup and are immutable afterwards.
//! Request handling never looks configuration up from the environment.

use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::normalize::GroupAllowList;
use crate::AuthError;

/// Scopes requested when none are configured
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];
/// Callback path used when none is configured
pub const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";

/// Longest session lifetime accepted
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(366 * 24 * 60 * 60);
/// Longest pending-login lifetime accepted
pub const MAX_LOGIN_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Longest metadata refresh threshold accepted
pub const MAX_METADATA_REFRESH: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A secret string whose value never appears in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Identity provider settings
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: Secret,
    /// OpenID discovery document address
    pub metadata_address: Url,
    /// Provider end-session endpoint, exactly as configured
    pub log_out_url: String,
    /// Application base URL (post-logout target), exactly as configured
    pub base_url: String,
    /// Requested scopes; always contains `openid`
    pub scopes: BTreeSet<String>,
    /// Path the provider redirects back to after authentication
    pub callback_path: String,
    /// Timeout for every outbound provider call
    pub http_timeout: Duration,
    /// Age after which cached discovery metadata and keys are refreshed
    pub metadata_refresh: Duration,
}

impl ProviderConfig {
    /// Create a validated provider config with default scopes and timings
    pub fn try_new(
        client_id: &str,
        client_secret: &str,
        metadata_address: &str,
        log_out_url: &str,
        base_url: &str,
    ) -> Result<Self, AuthError> {
        if client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client id is required".to_string()));
        }
        if client_secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "client secret is required".to_string(),
            ));
        }

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: Secret::new(client_secret),
            metadata_address: parse_http_url("metadata address", metadata_address)?,
            log_out_url: validated_http_url("logout url", log_out_url)?,
            base_url: validated_http_url("base url", base_url)?,
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            http_timeout: Duration::from_secs(10),
            metadata_refresh: Duration::from_secs(60 * 60),
        })
    }

    /// Replace the requested scopes. `openid` must be among them.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: BTreeSet<String> = scopes
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !scopes.contains("openid") {
            return Err(AuthError::Configuration(
                "scopes must include openid".to_string(),
            ));
        }
        self.scopes = scopes;
        Ok(self)
    }

    /// Set the callback path (must start with `/`)
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Result<Self, AuthError> {
        let path = path.into();
        if !path.starts_with('/') || path.starts_with("//") {
            return Err(AuthError::Configuration(format!(
                "callback path must be an absolute path: {path}"
            )));
        }
        self.callback_path = path;
        Ok(self)
    }

    /// Set the outbound HTTP timeout
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the metadata refresh threshold
    pub fn with_metadata_refresh(mut self, refresh: Duration) -> Self {
        self.metadata_refresh = refresh;
        self
    }

    /// The redirect URI registered at the provider: base URL + callback path
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.callback_path
        )
    }

    /// Space separated scope parameter
    pub fn scope_param(&self) -> String {
        self.scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// Session cookie settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Key material for sealing cookies (at least 32 bytes)
    pub secret: Secret,
    /// Name of the session cookie
    pub cookie_name: String,
    /// Name of the short-lived pending-login cookie
    pub login_cookie_name: String,
    /// Session lifetime
    pub session_duration: Duration,
    /// Lifetime of a pending login (redirect to callback)
    pub login_state_ttl: Duration,
    /// Whether cookies carry the `Secure` attribute
    pub cookie_secure: bool,
}

impl SessionConfig {
    /// Create a session config with default names and lifetimes
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(secret),
            cookie_name: "portcullis_session".to_string(),
            login_cookie_name: "portcullis_login".to_string(),
            session_duration: Duration::from_secs(8 * 60 * 60),
            login_state_ttl: Duration::from_secs(5 * 60),
            cookie_secure: true,
        }
    }

    /// Set the session cookie name
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.login_cookie_name = format!("{name}_login");
        self.cookie_name = name;
        self
    }

    /// Set session duration
    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    /// Set the pending-login lifetime
    pub fn with_login_state_ttl(mut self, ttl: Duration) -> Self {
        self.login_state_ttl = ttl;
        self
    }

    /// Set whether cookies are marked `Secure`
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }
}

/// Everything the gateway needs, resolved once at startup
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Identity provider settings
    pub provider: ProviderConfig,
    /// Session cookie settings
    pub session: SessionConfig,
    /// Claim removal policy applied before a session is minted
    pub claim_policy: GroupAllowList,
}

impl GatewayConfig {
    /// Create a gateway config with the default claim policy
    pub fn new(provider: ProviderConfig, session: SessionConfig) -> Self {
        Self {
            provider,
            session,
            claim_policy: GroupAllowList::default(),
        }
    }

    /// Replace the claim removal policy
    pub fn with_claim_policy(mut self, policy: GroupAllowList) -> Self {
        self.claim_policy = policy;
        self
    }

    /// Check lifetimes and timeouts are non-zero and within bounds
    pub fn validate(&self) -> Result<(), AuthError> {
        check_duration(
            "session duration",
            self.session.session_duration,
            MAX_SESSION_DURATION,
        )?;
        check_duration(
            "login state ttl",
            self.session.login_state_ttl,
            MAX_LOGIN_STATE_TTL,
        )?;
        check_duration(
            "metadata refresh",
            self.provider.metadata_refresh,
            MAX_METADATA_REFRESH,
        )?;
        check_duration(
            "http timeout",
            self.provider.http_timeout,
            MAX_LOGIN_STATE_TTL,
        )
    }
}

fn check_duration(what: &str, value: Duration, max: Duration) -> Result<(), AuthError> {
    if value.is_zero() || value > max {
        return Err(AuthError::Configuration(format!(
            "{what} must be between 1s and {}s",
            max.as_secs()
        )));
    }
    Ok(())
}

/// Validate an http(s) url but keep the configured text unchanged
fn validated_http_url(what: &str, value: &str) -> Result<String, AuthError> {
    parse_http_url(what, value)?;
    Ok(value.trim().to_string())
}

fn parse_http_url(what: &str, value: &str) -> Result<Url, AuthError> {
    let url = Url::parse(value.trim())
        .map_err(|e| AuthError::Configuration(format!("invalid {what}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AuthError::Configuration(format!(
            "{what} must be an absolute http(s) url"
        )));
    }
    Ok(url)
}
