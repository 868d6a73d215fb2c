//! Gateway: composition root
//!
//! Wires negotiator, session cookie manager and sign-out coordinator
//! together. Every sign-in path runs through [`Gateway::callback`], which
//! normalizes claims before a session is minted.

use std::sync::Arc;
use std::time::Duration;

use portcullis_types::{CallbackParams, Session};

use crate::config::GatewayConfig;
use crate::crypto::CookieKey;
use crate::metadata::MetadataCache;
use crate::negotiator::{LoginRedirect, OidcNegotiator};
use crate::session::{MemoryRevocationStore, RevocationStore, SessionCookieManager, SessionToken};
use crate::signout::SignOutCoordinator;
use crate::AuthError;

/// A completed sign-in
#[derive(Debug, Clone)]
pub struct SignedIn {
    /// New session credential
    pub token: SessionToken,
    /// Where to send the user agent
    pub return_to: String,
}

/// OpenID Connect relying-party gateway
pub struct Gateway<R: RevocationStore = MemoryRevocationStore> {
    config: Arc<GatewayConfig>,
    negotiator: OidcNegotiator,
    sessions: SessionCookieManager<R>,
    sign_out: SignOutCoordinator,
}

impl Gateway {
    /// Connect to the provider with an in-process revocation list.
    ///
    /// # Errors
    /// [`AuthError::Configuration`] when the key is too short, a lifetime is
    /// out of range, or provider metadata cannot be loaded. The process must not start in that case.
    pub async fn connect(config: GatewayConfig) -> Result<Self, AuthError> {
        let revocations = Arc::new(MemoryRevocationStore::new(config.session.session_duration));
        Self::connect_with_store(config, revocations).await
    }
}

impl<R: RevocationStore> Gateway<R> {
    /// Connect to the provider using the given revocation store
    pub async fn connect_with_store(
        config: GatewayConfig,
        revocations: Arc<R>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let http = http_client(config.provider.http_timeout)?;
        let metadata = MetadataCache::load(
            http.clone(),
            config.provider.metadata_address.clone(),
            config.provider.metadata_refresh,
        )
        .await?;

        let gateway = Self::with_metadata(config, http, metadata, revocations)?;
        tracing::info!(
            client_id = %gateway.config.provider.client_id,
            redirect_uri = %gateway.config.provider.redirect_uri(),
            "Gateway connected to identity provider"
        );
        Ok(gateway)
    }

    /// Assemble a gateway around an existing metadata cache
    pub fn with_metadata(
        config: GatewayConfig,
        http: reqwest::Client,
        metadata: MetadataCache,
        revocations: Arc<R>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let key = CookieKey::new(config.session.secret.expose())
            .map_err(|e| AuthError::Configuration(format!("session secret: {e}")))?;

        let provider = Arc::new(config.provider.clone());
        let negotiator = OidcNegotiator::new(
            Arc::clone(&provider),
            http,
            metadata,
            key.sealer("login"),
            config.session.login_state_ttl,
        );
        let sessions = SessionCookieManager::new(
            &key,
            config.session.session_duration,
            Arc::new(config.claim_policy.clone()),
            revocations,
        );
        let sign_out = SignOutCoordinator::new(&provider);

        Ok(Self {
            config: Arc::new(config),
            negotiator,
            sessions,
            sign_out,
        })
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Start a login for an unauthenticated request
    pub async fn challenge(&self, return_to: Option<&str>) -> Result<LoginRedirect, AuthError> {
        self.negotiator.begin_login(return_to).await
    }

    /// Handle the provider callback and mint a session
    pub async fn callback(
        &self,
        params: &CallbackParams,
        pending_cookie: Option<&str>,
    ) -> Result<SignedIn, AuthError> {
        let login = self.negotiator.complete_login(params, pending_cookie).await?;
        let token = self.sessions.establish(login.identity)?;
        Ok(SignedIn {
            token,
            return_to: login.return_to,
        })
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Resolve the session for a request, if any
    pub async fn authenticate(&self, token: Option<&str>) -> Option<Session> {
        self.sessions.read(token?).await
    }

    /// Sign out locally and at the provider; returns the provider redirect
    pub async fn sign_out(&self, token: Option<&str>) -> Result<String, AuthError> {
        self.sign_out.sign_out(&self.sessions, token).await
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Resolved configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Session cookie manager
    pub fn sessions(&self) -> &SessionCookieManager<R> {
        &self.sessions
    }

    /// Whether provider metadata is cached
    pub async fn is_ready(&self) -> bool {
        self.negotiator.metadata().is_ready().await
    }
}

impl<R: RevocationStore> Clone for Gateway<R> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            negotiator: self.negotiator.clone(),
            sessions: self.sessions.clone(),
            sign_out: self.sign_out.clone(),
        }
    }
}

impl<R: RevocationStore> std::fmt::Debug for Gateway<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("negotiator", &self.negotiator)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

/// HTTP client for provider calls; every request is bounded by `timeout`
fn http_client(timeout: Duration) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::Configuration(format!("http client: {e}")))
}
