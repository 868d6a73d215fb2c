//! Provider sign-out
//!
//! Builds `{logOutUrl}?client_id={clientId}&logout_uri={baseUrl}` and
//! invalidates the local session before the redirect is handed back.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::config::ProviderConfig;
use crate::session::{RevocationStore, SessionCookieManager};
use crate::AuthError;

/// Characters that would change the meaning of a query component.
///
/// Everything else (including `:` and `/` in the logout URI) is kept as
/// configured, which is what Cognito expects.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'+')
    .add(b'%')
    .add(b'`');

/// Builds the provider end-session redirect
#[derive(Debug, Clone)]
pub struct SignOutCoordinator {
    log_out_url: String,
    client_id: String,
    base_url: String,
}

impl SignOutCoordinator {
    /// Create a coordinator from provider settings
    pub fn new(provider: &ProviderConfig) -> Self {
        Self {
            log_out_url: provider.log_out_url.clone(),
            client_id: provider.client_id.clone(),
            base_url: provider.base_url.clone(),
        }
    }

    /// Provider end-session URL
    pub fn redirect_target(&self) -> String {
        let separator = if self.log_out_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}client_id={}&logout_uri={}",
            self.log_out_url,
            separator,
            utf8_percent_encode(&self.client_id, QUERY_VALUE),
            utf8_percent_encode(&self.base_url, QUERY_VALUE),
        )
    }

    /// Invalidate the local session, then return the provider redirect.
    ///
    /// A missing or unreadable session token still signs out at the provider.
    pub async fn sign_out<R: RevocationStore>(
        &self,
        sessions: &SessionCookieManager<R>,
        token: Option<&str>,
    ) -> Result<String, AuthError> {
        if let Some(token) = token {
            sessions.invalidate(token).await?;
        }
        tracing::info!(had_session = token.is_some(), "Signing out at identity provider");
        Ok(self.redirect_target())
    }
}
