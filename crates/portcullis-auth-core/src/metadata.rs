//! Provider metadata (discovery document + signing keys) with process-wide caching
//!
//! Metadata is fetched once at startup and must succeed, so a misconfigured
//! or unreachable provider fails the process instead of every request.
//! Afterwards reads never block on the network: a stale entry is served while
//! a single background refresh replaces it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use crate::AuthError;

/// Subset of the OpenID discovery document the gateway uses
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier (`iss` of ID tokens)
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// JWKS endpoint
    pub jwks_uri: String,
    /// User-info endpoint, when the provider offers one
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// JWKS (JSON Web Key Set) structure
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Individual JWK (JSON Web Key)
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

impl Jwk {
    /// Whether the key can verify RS256 signatures
    fn is_rs256(&self) -> bool {
        self.kty == "RSA"
            && self.alg.as_deref().map_or(true, |alg| alg == "RS256")
            && self.n.is_some()
            && self.e.is_some()
    }
}

/// A fetched, validated metadata snapshot
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    /// Discovery document
    pub discovery: DiscoveryDocument,
    /// Parsed authorization endpoint
    pub authorization_endpoint: Url,
    /// Usable RS256 signing keys
    pub keys: Vec<Jwk>,
    fetched_at: Instant,
}

impl ProviderMetadata {
    /// Find a signing key by key id.
    ///
    /// A token without `kid` is accepted only when the set has exactly one key.
    pub fn key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }

    /// Time since this snapshot was fetched
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Shared metadata cache
///
/// Cheap to clone; all clones share the same snapshot.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    address: Url,
    refresh_after: Duration,
    current: RwLock<Option<Arc<ProviderMetadata>>>,
    refreshing: AtomicBool,
}

impl MetadataCache {
    /// Fetch metadata and keys once.
    ///
    /// # Errors
    /// Any failure here is a [`AuthError::Configuration`]: the gateway must not
    /// start without provider metadata.
    pub async fn load(
        http: reqwest::Client,
        address: Url,
        refresh_after: Duration,
    ) -> Result<Self, AuthError> {
        let cache = Self::empty(http, address, refresh_after);
        cache.refresh().await.map_err(|e| {
            tracing::error!(error = %e, address = %cache.inner.address, "Provider metadata unavailable at startup");
            AuthError::Configuration(format!("provider metadata unavailable: {e}"))
        })?;
        Ok(cache)
    }

    /// A cache with nothing fetched yet
    pub fn empty(http: reqwest::Client, address: Url, refresh_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                address,
                refresh_after,
                current: RwLock::new(None),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Current snapshot.
    ///
    /// Serves a stale snapshot while scheduling a background refresh.
    ///
    /// # Errors
    /// [`AuthError::ProviderUnreachable`] when nothing has been fetched yet.
    pub async fn current(&self) -> Result<Arc<ProviderMetadata>, AuthError> {
        let snapshot = self.inner.current.read().await.clone();
        match snapshot {
            Some(metadata) => {
                if metadata.age() >= self.inner.refresh_after {
                    self.spawn_refresh();
                }
                Ok(metadata)
            }
            None => {
                self.spawn_refresh();
                Err(AuthError::ProviderUnreachable(
                    "no provider metadata cached".to_string(),
                ))
            }
        }
    }

    /// Whether a snapshot is available
    pub async fn is_ready(&self) -> bool {
        self.inner.current.read().await.is_some()
    }

    /// Refresh now if the snapshot is older than `min_age`.
    ///
    /// Used on key rotation (unknown `kid`). The age floor keeps forged key
    /// ids from turning every request into a provider round trip.
    pub async fn refresh_if_older_than(&self, min_age: Duration) -> Result<bool, AuthError> {
        let stale_enough = self
            .inner
            .current
            .read()
            .await
            .as_ref()
            .map_or(true, |m| m.age() >= min_age);
        if !stale_enough {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Fetch discovery document and keys and replace the snapshot
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let metadata = fetch(&self.inner.http, &self.inner.address).await?;
        tracing::debug!(
            issuer = %metadata.discovery.issuer,
            keys = metadata.keys.len(),
            "Provider metadata refreshed"
        );
        *self.inner.current.write().await = Some(Arc::new(metadata));
        Ok(())
    }

    fn spawn_refresh(&self) {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.refresh().await {
                tracing::warn!(error = %e, "Background metadata refresh failed; keeping previous snapshot");
            }
            cache.inner.refreshing.store(false, Ordering::Release);
        });
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("address", &self.inner.address.as_str())
            .field("refresh_after", &self.inner.refresh_after)
            .finish_non_exhaustive()
    }
}

async fn fetch(http: &reqwest::Client, address: &Url) -> Result<ProviderMetadata, AuthError> {
    tracing::debug!("Fetching discovery document from {}", address);
    let discovery: DiscoveryDocument = get_json(http, address.as_str()).await?;

    if discovery.issuer.trim().is_empty()
        || discovery.authorization_endpoint.trim().is_empty()
        || discovery.token_endpoint.trim().is_empty()
        || discovery.jwks_uri.trim().is_empty()
    {
        return Err(AuthError::ProviderUnreachable(
            "discovery document is missing mandatory fields".to_string(),
        ));
    }

    let authorization_endpoint = Url::parse(&discovery.authorization_endpoint).map_err(|e| {
        AuthError::ProviderUnreachable(format!("invalid authorization endpoint: {e}"))
    })?;

    let jwks: Jwks = get_json(http, &discovery.jwks_uri).await?;
    let keys: Vec<Jwk> = jwks.keys.into_iter().filter(Jwk::is_rs256).collect();
    if keys.is_empty() {
        return Err(AuthError::ProviderUnreachable(
            "jwks does not contain usable RS256 keys".to_string(),
        ));
    }

    Ok(ProviderMetadata {
        discovery,
        authorization_endpoint,
        keys,
        fetched_at: Instant::now(),
    })
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<T, AuthError> {
    let response = http.get(url).send().await?;

    if !response.status().is_success() {
        tracing::error!("{} returned status: {}", url, response.status());
        return Err(AuthError::ProviderUnreachable(format!(
            "{url} returned {}",
            response.status()
        )));
    }

    response.json::<T>().await.map_err(|e| {
        tracing::error!("Failed to parse {}: {}", url, e);
        AuthError::ProviderUnreachable(format!("invalid document at {url}"))
    })
}
