//! Session cookies
//!
//! A session is an AES-256-GCM sealed payload carrying the normalized claims.
//! The browser can neither read nor forge it. Explicit sign-out is recorded
//! in a revocation store so a copied cookie stops working immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use portcullis_types::{AuthScheme, ClaimSet, Identity, Session, SessionId};
use serde::{Deserialize, Serialize};

use crate::crypto::{CookieKey, CookieSealer};
use crate::normalize::{normalize, RemovalPolicy};
use crate::AuthError;

/// Largest claims payload (serialized JSON) a session may carry.
///
/// Browsers silently drop cookies above ~4 KiB; sealing adds roughly a third.
pub const MAX_CLAIMS_BYTES: usize = 3072;

/// Opaque session credential handed to the user agent
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Cookie value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the cookie value
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Sealed session cookie payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionPayload {
    /// Session id (revocation key)
    sid: SessionId,
    /// How the identity was established
    scheme: AuthScheme,
    /// Normalized claims
    claims: ClaimSet,
    /// Issue timestamp (milliseconds)
    issued: i64,
    /// Expiration timestamp (milliseconds)
    expires: i64,
}

impl SessionPayload {
    fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() > self.expires
    }

    fn into_session(self) -> Option<Session> {
        Some(Session {
            id: self.sid,
            identity: Identity::new(self.scheme, self.claims),
            created_at: DateTime::from_timestamp_millis(self.issued)?,
            expires_at: DateTime::from_timestamp_millis(self.expires)?,
        })
    }
}

/// Storage for revoked session ids
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record a session as revoked until it would have expired anyway
    async fn revoke(&self, id: SessionId, expires_at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Whether a session has been revoked
    async fn is_revoked(&self, id: SessionId) -> Result<bool, AuthError>;
}

/// In-process revocation list.
///
/// Entries expire after the maximum session lifetime, so memory is bounded by
/// the number of sign-outs within one session duration. There is no capacity
/// limit: an evicted entry would bring a signed-out session back.
#[derive(Clone)]
pub struct MemoryRevocationStore {
    revoked: Cache<SessionId, ()>,
}

impl MemoryRevocationStore {
    /// Create a store whose entries live for `max_session_age`
    pub fn new(max_session_age: Duration) -> Self {
        Self {
            revoked: Cache::builder().time_to_live(max_session_age).build(),
        }
    }
}

impl std::fmt::Debug for MemoryRevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRevocationStore")
            .field("entries", &self.revoked.entry_count())
            .finish()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, id: SessionId, _expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        self.revoked.insert(id, ()).await;
        Ok(())
    }

    async fn is_revoked(&self, id: SessionId) -> Result<bool, AuthError> {
        Ok(self.revoked.contains_key(&id))
    }
}

/// Issues, reads and invalidates session cookies
///
/// `establish` is the only way to mint a session and always runs the claim
/// normalizer first.
pub struct SessionCookieManager<R: RevocationStore = MemoryRevocationStore> {
    sealer: CookieSealer,
    session_duration: Duration,
    policy: Arc<dyn RemovalPolicy + Send + Sync>,
    revocations: Arc<R>,
}

impl<R: RevocationStore> SessionCookieManager<R> {
    /// Create a new session cookie manager
    ///
    /// # Arguments
    /// * `key` - Master cookie key; a session-specific key is derived from it
    /// * `session_duration` - How long sessions are valid
    /// * `policy` - Claim removal policy applied on every `establish`
    /// * `revocations` - Revocation store consulted on every `read`
    pub fn new(
        key: &CookieKey,
        session_duration: Duration,
        policy: Arc<dyn RemovalPolicy + Send + Sync>,
        revocations: Arc<R>,
    ) -> Self {
        Self {
            sealer: key.sealer("session"),
            session_duration,
            policy,
            revocations,
        }
    }

    /// Session lifetime
    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Normalize the identity's claims and mint a session token
    pub fn establish(&self, identity: Identity) -> Result<SessionToken, AuthError> {
        let claims = normalize(identity.claims, self.policy.as_ref());

        let claims_len = serde_json::to_vec(&claims)
            .map_err(|e| AuthError::Internal(format!("failed to serialize claims: {e}")))?
            .len();
        if claims_len > MAX_CLAIMS_BYTES {
            tracing::error!(
                claims_len,
                max = MAX_CLAIMS_BYTES,
                "Normalized claims too large for a session cookie"
            );
            return Err(AuthError::Internal(
                "session claims exceed cookie size limit".to_string(),
            ));
        }

        let now = Utc::now().timestamp_millis();
        let duration_ms = i64::try_from(self.session_duration.as_millis()).unwrap_or(i64::MAX);
        let payload = SessionPayload {
            sid: SessionId::new(),
            scheme: identity.scheme,
            claims,
            issued: now,
            expires: now.saturating_add(duration_ms),
        };

        let sealed = self.sealer.seal(&payload).map_err(|e| {
            tracing::error!("Failed to serialize session payload: {}", e);
            AuthError::Internal("failed to create session".to_string())
        })?;

        tracing::debug!(session_id = %payload.sid, "Session established");
        Ok(SessionToken(sealed))
    }

    /// Read a session token.
    ///
    /// Tampered, expired, revoked, malformed and unknown tokens all yield
    /// `None`; callers cannot tell them apart.
    pub async fn read(&self, token: &str) -> Option<Session> {
        let payload = self.open(token)?;

        match self.revocations.is_revoked(payload.sid).await {
            Ok(false) => payload.into_session(),
            Ok(true) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Revocation check failed; treating session as absent");
                None
            }
        }
    }

    /// Invalidate a session token.
    ///
    /// Tokens that do not open are already unusable and are ignored.
    pub async fn invalidate(&self, token: &str) -> Result<(), AuthError> {
        let Some(payload) = self.open(token) else {
            return Ok(());
        };

        let expires_at = DateTime::from_timestamp_millis(payload.expires).unwrap_or_else(Utc::now);
        self.revocations.revoke(payload.sid, expires_at).await?;
        tracing::debug!(session_id = %payload.sid, "Session invalidated");
        Ok(())
    }

    fn open(&self, token: &str) -> Option<SessionPayload> {
        let payload: SessionPayload = self.sealer.open(token).ok()?;
        if payload.is_expired() {
            return None;
        }
        Some(payload)
    }
}

impl<R: RevocationStore> Clone for SessionCookieManager<R> {
    fn clone(&self) -> Self {
        Self {
            sealer: self.sealer.clone(),
            session_duration: self.session_duration,
            policy: Arc::clone(&self.policy),
            revocations: Arc::clone(&self.revocations),
        }
    }
}

impl<R: RevocationStore> std::fmt::Debug for SessionCookieManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookieManager")
            .field("session_duration", &self.session_duration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::GroupAllowList;
    use portcullis_types::{Claim, GROUPS};

    fn manager() -> SessionCookieManager {
        let key = CookieKey::new("s".repeat(32)).unwrap();
        SessionCookieManager::new(
            &key,
            Duration::from_secs(3600),
            Arc::new(GroupAllowList::default()),
            Arc::new(MemoryRevocationStore::new(Duration::from_secs(3600))),
        )
    }

    fn identity() -> Identity {
        Identity::new(
            AuthScheme::OpenIdConnect,
            ClaimSet::from(vec![
                Claim::new("sub", "user-1"),
                Claim::new(GROUPS, "g1"),
                Claim::new(GROUPS, "identities"),
                Claim::new("email", "a@x.com"),
            ]),
        )
    }

    #[tokio::test]
    async fn test_establish_normalizes_claims() {
        let manager = manager();
        let token = manager.establish(identity()).unwrap();

        let session = manager.read(token.as_str()).await.unwrap();
        let groups: Vec<_> = session.identity.claims.find_all(GROUPS).collect();
        assert_eq!(groups, vec![&Claim::new(GROUPS, "identities")]);
        assert_eq!(session.identity.subject(), Some("user-1"));
        assert_eq!(session.identity.email(), Some("a@x.com"));
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn test_token_is_opaque() {
        let token = manager().establish(identity()).unwrap();
        assert!(!token.as_str().contains("a@x.com"));
        assert!(!token.as_str().contains("user-1"));
        assert!(!format!("{token:?}").contains(token.as_str()));
    }

    #[tokio::test]
    async fn test_invalidate_then_read() {
        let manager = manager();
        let token = manager.establish(identity()).unwrap();

        assert!(manager.read(token.as_str()).await.is_some());
        manager.invalidate(token.as_str()).await.unwrap();
        assert!(manager.read(token.as_str()).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_unknown_token_is_noop() {
        assert!(manager().invalidate("not-a-token").await.is_ok());
    }

    #[tokio::test]
    async fn test_other_sessions_survive_invalidate() {
        let manager = manager();
        let a = manager.establish(identity()).unwrap();
        let b = manager.establish(identity()).unwrap();

        manager.invalidate(a.as_str()).await.unwrap();
        assert!(manager.read(a.as_str()).await.is_none());
        assert!(manager.read(b.as_str()).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let manager = manager();
        let past = Utc::now().timestamp_millis() - 1_000;
        let payload = SessionPayload {
            sid: SessionId::new(),
            scheme: AuthScheme::OpenIdConnect,
            claims: ClaimSet::new(),
            issued: past - 3_600_000,
            expires: past,
        };
        let sealed = manager.sealer.seal(&payload).unwrap();

        assert!(manager.read(&sealed).await.is_none());
    }

    #[tokio::test]
    async fn test_tampered_and_unknown_are_indistinguishable() {
        let manager = manager();
        let token = manager.establish(identity()).unwrap().into_string();

        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        assert_eq!(manager.read(&tampered).await, manager.read("v1.bm9wZQ").await);
        assert_eq!(manager.read("").await, None);
    }

    #[tokio::test]
    async fn test_token_from_other_key_rejected() {
        let token = manager().establish(identity()).unwrap();

        let other_key = CookieKey::new("o".repeat(32)).unwrap();
        let other = SessionCookieManager::new(
            &other_key,
            Duration::from_secs(3600),
            Arc::new(GroupAllowList::default()),
            Arc::new(MemoryRevocationStore::new(Duration::from_secs(3600))),
        );
        assert!(other.read(token.as_str()).await.is_none());
    }

    #[tokio::test]
    async fn test_revocations_survive_heavy_sign_out() {
        let store = MemoryRevocationStore::new(Duration::from_secs(3600));
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        let ids: Vec<SessionId> = (0..130_000).map(|_| SessionId::new()).collect();

        for id in &ids {
            store.revoke(*id, expires_at).await.unwrap();
        }
        store.revoked.run_pending_tasks().await;

        let mut forgotten = 0;
        for id in &ids {
            if !store.is_revoked(*id).await.unwrap() {
                forgotten += 1;
            }
        }
        assert_eq!(forgotten, 0);
        assert_eq!(store.revoked.policy().max_capacity(), None);
    }

    #[test]
    fn test_oversized_claims_rejected() {
        let claims: ClaimSet = (0..200)
            .map(|i| Claim::new(format!("custom:attr{i}"), "x".repeat(20)))
            .collect();
        let result = manager().establish(Identity::new(AuthScheme::OpenIdConnect, claims));
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }
}
