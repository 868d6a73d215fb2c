//! OpenID Connect authorization-code handshake
//!
//! Two phases:
//! 1. [`OidcNegotiator::begin_login`] builds the provider redirect and seals
//!    the per-login secrets (state, nonce, PKCE verifier) into a short-lived
//!    cookie.
//! 2. [`OidcNegotiator::complete_login`] checks the callback against that
//!    cookie, exchanges the code, validates the ID token and merges user-info
//!    claims into an [`Identity`].
//!
//! Failures are never retried; the user starts a new login.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use portcullis_types::{AuthScheme, CallbackParams, Identity, SUBJECT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::ProviderConfig;
use crate::crypto::{constant_time_str_eq, fingerprint, pkce_challenge, random_token, CookieSealer};
use crate::metadata::MetadataCache;
use crate::token::{claims_from_json, IdTokenValidator};
use crate::AuthError;

/// Longest return-to path honoured after login
pub const MAX_RETURN_TO_LEN: usize = 2048;

const STATE_LEN: usize = 32;
const NONCE_LEN: usize = 32;
/// RFC 7636 allows 43..=128 characters
const CODE_VERIFIER_LEN: usize = 64;

/// Where a login negotiation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    /// No session present
    Unauthenticated,
    /// Redirect to the provider issued
    PendingProviderRedirect,
    /// Provider sent the user agent back
    PendingCallback,
    /// Identity established
    Authenticated,
    /// Negotiation failed; the user stays unauthenticated
    Failed,
}

impl std::fmt::Display for LoginPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PendingProviderRedirect => "pending_provider_redirect",
            Self::PendingCallback => "pending_callback",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-login secrets, sealed into the pending-login cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingLogin {
    state: String,
    nonce: String,
    code_verifier: String,
    return_to: String,
    /// Expiration timestamp (milliseconds)
    exp: i64,
}

/// Result of starting a login
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider authorization URL to redirect the user agent to
    pub authorization_url: Url,
    /// Sealed pending-login cookie value
    pub pending_cookie: String,
}

/// Result of a successful callback
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    /// Identity built from ID token and user-info claims, not yet normalized
    pub identity: Identity,
    /// Sanitized path to send the user agent back to
    pub return_to: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Drives the authorization-code handshake against one provider
#[derive(Clone)]
pub struct OidcNegotiator {
    provider: Arc<ProviderConfig>,
    http: reqwest::Client,
    metadata: MetadataCache,
    validator: IdTokenValidator,
    login_sealer: CookieSealer,
    login_ttl: Duration,
    /// Fingerprints of state values that already reached the token exchange
    consumed_states: Cache<String, ()>,
}

impl OidcNegotiator {
    /// Create a negotiator
    pub fn new(
        provider: Arc<ProviderConfig>,
        http: reqwest::Client,
        metadata: MetadataCache,
        login_sealer: CookieSealer,
        login_ttl: Duration,
    ) -> Self {
        let validator = IdTokenValidator::new(
            provider.client_id.clone(),
            metadata.clone(),
            provider.metadata_refresh,
        );
        Self {
            provider,
            http,
            metadata,
            validator,
            login_sealer,
            login_ttl,
            consumed_states: consumed_state_cache(login_ttl),
        }
    }

    /// Provider configuration
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Cached provider metadata
    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Start a login: build the provider redirect and the pending-login cookie.
    ///
    /// # Errors
    /// [`AuthError::ProviderUnreachable`] when no metadata is cached.
    pub async fn begin_login(&self, return_to: Option<&str>) -> Result<LoginRedirect, AuthError> {
        tracing::debug!(phase = %LoginPhase::Unauthenticated, "Starting login");
        let metadata = self.metadata.current().await?;

        let pending = PendingLogin {
            state: random_token(STATE_LEN),
            nonce: random_token(NONCE_LEN),
            code_verifier: random_token(CODE_VERIFIER_LEN),
            return_to: sanitize_return_to(return_to),
            exp: Utc::now()
                .timestamp_millis()
                .saturating_add(duration_millis(self.login_ttl)),
        };

        let mut authorization_url = metadata.authorization_endpoint.clone();
        authorization_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.provider.client_id)
            .append_pair("redirect_uri", &self.provider.redirect_uri())
            .append_pair("scope", &self.provider.scope_param())
            .append_pair("state", &pending.state)
            .append_pair("nonce", &pending.nonce)
            .append_pair("code_challenge", &pkce_challenge(&pending.code_verifier))
            .append_pair("code_challenge_method", "S256");

        let pending_cookie = self.login_sealer.seal(&pending).map_err(|e| {
            tracing::error!("Failed to serialize pending login: {}", e);
            AuthError::Internal("failed to start login".to_string())
        })?;

        tracing::info!(
            phase = %LoginPhase::PendingProviderRedirect,
            state = %fingerprint(&pending.state),
            "Redirecting to identity provider"
        );

        Ok(LoginRedirect {
            authorization_url,
            pending_cookie,
        })
    }

    /// Complete a login from the provider callback.
    ///
    /// `pending_cookie` is the sealed value produced by [`Self::begin_login`].
    /// Each state value completes at most once.
    pub async fn complete_login(
        &self,
        params: &CallbackParams,
        pending_cookie: Option<&str>,
    ) -> Result<CompletedLogin, AuthError> {
        let result = self.complete_login_inner(params, pending_cookie).await;
        match &result {
            Ok(login) => tracing::info!(
                phase = %LoginPhase::Authenticated,
                subject = login.identity.subject().unwrap_or_default(),
                "Login completed"
            ),
            Err(e) => tracing::warn!(
                phase = %LoginPhase::Failed,
                error = %e,
                "Login failed"
            ),
        }
        result
    }

    async fn complete_login_inner(
        &self,
        params: &CallbackParams,
        pending_cookie: Option<&str>,
    ) -> Result<CompletedLogin, AuthError> {
        tracing::debug!(phase = %LoginPhase::PendingCallback, "Provider callback received");

        if params.is_error() {
            let error = params.error.as_deref().unwrap_or_default();
            tracing::debug!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or_default(),
                "Provider returned an error"
            );
            return Err(AuthError::invalid_callback(format!("provider error: {error}")));
        }

        let pending_cookie =
            pending_cookie.ok_or_else(|| AuthError::invalid_callback("no pending login"))?;
        let pending: PendingLogin = self
            .login_sealer
            .open(pending_cookie)
            .map_err(|_| AuthError::invalid_callback("pending login cookie rejected"))?;

        if Utc::now().timestamp_millis() > pending.exp {
            return Err(AuthError::invalid_callback("pending login expired"));
        }

        let state = params
            .state
            .as_deref()
            .ok_or_else(|| AuthError::invalid_callback("missing state"))?;
        if !constant_time_str_eq(state, &pending.state) {
            return Err(AuthError::invalid_callback("state mismatch"));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_callback("missing code"))?;

        let consumed = self
            .consumed_states
            .entry(fingerprint(state))
            .or_insert(())
            .await;
        if !consumed.is_fresh() {
            return Err(AuthError::invalid_callback("state already used"));
        }

        let metadata = self.metadata.current().await?;
        let tokens = self
            .exchange_code(&metadata.discovery.token_endpoint, code, &pending.code_verifier)
            .await?;

        let id_token = tokens
            .id_token
            .ok_or_else(|| AuthError::TokenExchangeFailure("no id token in response".to_string()))?;
        let id_claims = self.validator.validate(&id_token, &pending.nonce).await?;
        let mut claims = claims_from_json(&id_claims);

        if let (Some(endpoint), Some(access_token)) = (
            metadata.discovery.userinfo_endpoint.as_deref(),
            tokens.access_token.as_deref(),
        ) {
            let userinfo = self.fetch_userinfo(endpoint, access_token).await?;
            let id_sub = id_claims.get(SUBJECT).and_then(Value::as_str);
            let info_sub = userinfo.get(SUBJECT).and_then(Value::as_str);
            if id_sub.is_none() || id_sub != info_sub {
                return Err(AuthError::TokenExchangeFailure(
                    "user-info subject does not match id token".to_string(),
                ));
            }
            let mut added = 0usize;
            for claim in claims_from_json(&userinfo) {
                if claims.insert_unique(claim) {
                    added += 1;
                }
            }
            tracing::debug!(added, "Merged user-info claims");
        }

        Ok(CompletedLogin {
            identity: Identity::new(AuthScheme::OpenIdConnect, claims),
            return_to: pending.return_to,
        })
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let redirect_uri = self.provider.redirect_uri();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.provider.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(token_endpoint)
            .basic_auth(
                &self.provider.client_id,
                Some(self.provider.client_secret.expose()),
            )
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            tracing::warn!(
                status = %status,
                error = body.error.as_deref().unwrap_or("unknown"),
                "Token endpoint rejected the code"
            );
            return Err(if status.is_server_error() {
                AuthError::ProviderUnreachable(format!("token endpoint returned {status}"))
            } else {
                AuthError::TokenExchangeFailure(format!("token endpoint returned {status}"))
            });
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            tracing::error!("Failed to parse token response: {}", e);
            AuthError::TokenExchangeFailure("invalid token response".to_string())
        })
    }

    async fn fetch_userinfo(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<Map<String, Value>, AuthError> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "User-info endpoint rejected the access token");
            return Err(if status.is_server_error() {
                AuthError::ProviderUnreachable(format!("user-info endpoint returned {status}"))
            } else {
                AuthError::TokenExchangeFailure(format!("user-info endpoint returned {status}"))
            });
        }

        response.json::<Map<String, Value>>().await.map_err(|e| {
            tracing::error!("Failed to parse user-info response: {}", e);
            AuthError::TokenExchangeFailure("invalid user-info response".to_string())
        })
    }
}

impl std::fmt::Debug for OidcNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcNegotiator")
            .field("provider", &self.provider)
            .field("login_ttl", &self.login_ttl)
            .finish_non_exhaustive()
    }
}

/// Reduce a requested return-to value to a same-origin relative path.
///
/// Anything that is not a plain `/path` (absolute URLs, protocol-relative
/// `//host`, overlong values) becomes `/`. Fragments are dropped.
pub fn sanitize_return_to(input: Option<&str>) -> String {
    let Some(input) = input else {
        return "/".to_string();
    };
    let path = input.split_once('#').map_or(input, |(head, _)| head).trim();

    let acceptable = path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && !path.contains("://")
        && !path.chars().any(char::is_control)
        && path.len() <= MAX_RETURN_TO_LEN;

    if acceptable {
        path.to_string()
    } else {
        "/".to_string()
    }
}

// Bounded by TTL only: an evicted entry would let its state be replayed.
fn consumed_state_cache(login_ttl: Duration) -> Cache<String, ()> {
    Cache::builder().time_to_live(login_ttl).build()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_return_to() {
        assert_eq!(sanitize_return_to(None), "/");
        assert_eq!(sanitize_return_to(Some("")), "/");
        assert_eq!(sanitize_return_to(Some("/reports?year=2024")), "/reports?year=2024");
        assert_eq!(sanitize_return_to(Some("/a#frag")), "/a");
    }

    #[test]
    fn test_sanitize_return_to_rejects_open_redirects() {
        assert_eq!(sanitize_return_to(Some("https://evil.example.com")), "/");
        assert_eq!(sanitize_return_to(Some("//evil.example.com/x")), "/");
        assert_eq!(sanitize_return_to(Some("/\\evil.example.com")), "/");
        assert_eq!(sanitize_return_to(Some("/redirect?to=https://evil")), "/");
        assert_eq!(sanitize_return_to(Some("relative/path")), "/");
        assert_eq!(sanitize_return_to(Some("/a\r\nSet-Cookie: x=y")), "/");
        assert_eq!(sanitize_return_to(Some(&format!("/{}", "a".repeat(3000)))), "/");
    }

    #[test]
    fn test_login_phase_display() {
        assert_eq!(LoginPhase::Unauthenticated.to_string(), "unauthenticated");
        assert_eq!(LoginPhase::PendingProviderRedirect.to_string(), "pending_provider_redirect");
        assert_eq!(LoginPhase::Failed.to_string(), "failed");
    }

    #[test]
    fn test_consumed_states_bounded_by_ttl_only() {
        let cache = consumed_state_cache(Duration::from_secs(300));
        assert_eq!(cache.policy().max_capacity(), None);
        assert_eq!(cache.policy().time_to_live(), Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_consumed_states_kept_under_load() {
        let cache = consumed_state_cache(Duration::from_secs(300));
        for i in 0..120_000 {
            assert!(cache.entry(format!("state-{i}")).or_insert(()).await.is_fresh());
        }
        cache.run_pending_tasks().await;

        for i in (0..120_000).step_by(97) {
            let entry = cache.entry(format!("state-{i}")).or_insert(()).await;
            assert!(!entry.is_fresh(), "state-{i} accepted twice");
        }
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
    }
}
