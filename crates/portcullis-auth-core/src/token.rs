//! ID token validation against cached provider keys

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use portcullis_types::{Claim, ClaimSet};
use serde_json::{Map, Value};

use crate::crypto::constant_time_str_eq;
use crate::metadata::{Jwk, MetadataCache, ProviderMetadata};
use crate::AuthError;

/// Claims that only carry meaning for the protocol exchange and never
/// become part of an identity
pub const PROTOCOL_CLAIMS: &[&str] = &[
    "nonce",
    "aud",
    "azp",
    "acr",
    "iss",
    "iat",
    "nbf",
    "exp",
    "at_hash",
    "c_hash",
    "auth_time",
    "token_use",
    "jti",
    "origin_jti",
    "event_id",
];

/// Minimum snapshot age before an unknown `kid` may force a metadata refresh
const FORCED_REFRESH_MIN_AGE: Duration = Duration::from_secs(30);

/// Allowed clock skew for `exp`/`nbf`
const LEEWAY_SECS: u64 = 60;

/// Validates ID tokens returned from the token endpoint
///
/// Signature (RS256), issuer, audience and expiry are checked by
/// `jsonwebtoken`; the nonce and `azp` are checked here.
#[derive(Clone)]
pub struct IdTokenValidator {
    client_id: String,
    metadata: MetadataCache,
    /// kid -> decoding key
    key_cache: Cache<String, Arc<DecodingKey>>,
}

impl IdTokenValidator {
    /// Create a validator for tokens issued to `client_id`
    pub fn new(client_id: impl Into<String>, metadata: MetadataCache, key_ttl: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            metadata,
            key_cache: Cache::builder()
                .time_to_live(key_ttl)
                .max_capacity(100)
                .build(),
        }
    }

    /// Validate a token and return its raw claims.
    ///
    /// # Errors
    /// [`AuthError::TokenExchangeFailure`] for any token the gateway must not
    /// trust; [`AuthError::ProviderUnreachable`] when keys cannot be loaded.
    pub async fn validate(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<Map<String, Value>, AuthError> {
        let header = decode_header(id_token).map_err(|e| {
            tracing::debug!("Failed to decode id token header: {}", e);
            rejected("malformed id token")
        })?;

        if header.alg != Algorithm::RS256 {
            tracing::debug!(alg = ?header.alg, "Unsupported id token algorithm");
            return Err(rejected("unsupported id token algorithm"));
        }

        let metadata = self.metadata.current().await?;
        let decoding_key = self.decoding_key(&metadata, header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[metadata.discovery.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = LEEWAY_SECS;

        let token_data = decode::<Map<String, Value>>(id_token, &decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!("Id token validation failed: {}", e);
                rejected("id token validation failed")
            })?;
        let claims = token_data.claims;

        let nonce_ok = claims
            .get("nonce")
            .and_then(Value::as_str)
            .is_some_and(|nonce| constant_time_str_eq(nonce, expected_nonce));
        if !nonce_ok {
            tracing::debug!("Id token nonce mismatch");
            return Err(rejected("nonce mismatch"));
        }

        if let Some(azp) = claims.get("azp").and_then(Value::as_str) {
            if !constant_time_str_eq(azp, &self.client_id) {
                tracing::debug!("Id token azp mismatch");
                return Err(rejected("authorized party mismatch"));
            }
        }

        match claims.get("sub").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => Ok(claims),
            _ => Err(rejected("id token has no subject")),
        }
    }

    /// Resolve the decoding key for `kid`.
    ///
    /// An unknown `kid` triggers at most one rate-limited metadata refresh,
    /// which covers provider key rotation.
    async fn decoding_key(
        &self,
        metadata: &ProviderMetadata,
        kid: Option<&str>,
    ) -> Result<Arc<DecodingKey>, AuthError> {
        if let Some(kid) = kid {
            if let Some(key) = self.key_cache.get(kid).await {
                return Ok(key);
            }
        }

        if let Some(jwk) = metadata.key(kid) {
            return self.cache_key(jwk).await;
        }

        if self.metadata.refresh_if_older_than(FORCED_REFRESH_MIN_AGE).await? {
            self.invalidate_cache();
            let refreshed = self.metadata.current().await?;
            if let Some(jwk) = refreshed.key(kid) {
                return self.cache_key(jwk).await;
            }
        }

        tracing::debug!(kid = ?kid, "Id token signed with unknown key");
        Err(rejected("unknown signing key"))
    }

    async fn cache_key(&self, jwk: &Jwk) -> Result<Arc<DecodingKey>, AuthError> {
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            return Err(rejected("signing key has no rsa components"));
        };
        let key = DecodingKey::from_rsa_components(n, e).map_err(|e| {
            tracing::error!("Failed to create decoding key: {}", e);
            rejected("invalid signing key")
        })?;
        let key = Arc::new(key);
        if let Some(kid) = &jwk.kid {
            self.key_cache.insert(kid.clone(), key.clone()).await;
        }
        Ok(key)
    }

    /// Drop cached decoding keys; called after the key set rotates
    pub fn invalidate_cache(&self) {
        self.key_cache.invalidate_all();
    }
}

impl std::fmt::Debug for IdTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenValidator")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

fn rejected(reason: &str) -> AuthError {
    AuthError::TokenExchangeFailure(reason.to_string())
}

/// Flatten a JSON claims object into a claim set.
///
/// Strings map to one claim, arrays to one claim per element, numbers and
/// booleans to their string form, objects to compact JSON. Nulls and
/// protocol-only claims are dropped.
pub fn claims_from_json(object: &Map<String, Value>) -> ClaimSet {
    let mut claims = ClaimSet::new();
    for (claim_type, value) in object {
        if PROTOCOL_CLAIMS.contains(&claim_type.as_str()) {
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(value) = claim_value(item) {
                        claims.push(Claim::new(claim_type, value));
                    }
                }
            }
            other => {
                if let Some(value) = claim_value(other) {
                    claims.push(Claim::new(claim_type, value));
                }
            }
        }
    }
    claims
}

fn claim_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_flatten_strings_and_arrays() {
        let claims = claims_from_json(&object(json!({
            "sub": "user-1",
            "cognito:groups": ["identities", "admins"],
            "email": "a@x.com",
        })));

        let expected = ClaimSet::from(vec![
            Claim::new("sub", "user-1"),
            Claim::new("cognito:groups", "identities"),
            Claim::new("cognito:groups", "admins"),
            Claim::new("email", "a@x.com"),
        ]);
        assert_eq!(claims, expected);
    }

    #[test]
    fn test_flatten_scalars_and_objects() {
        let claims = claims_from_json(&object(json!({
            "email_verified": true,
            "custom:level": 3,
            "address": {"country": "NL"},
            "middle_name": null,
        })));

        assert_eq!(claims.first_value("email_verified"), Some("true"));
        assert_eq!(claims.first_value("custom:level"), Some("3"));
        assert_eq!(claims.first_value("address"), Some(r#"{"country":"NL"}"#));
        assert_eq!(claims.first_value("middle_name"), None);
        assert_eq!(claims.len(), 3);
    }

    #[test]
    fn test_protocol_claims_stripped() {
        let claims = claims_from_json(&object(json!({
            "sub": "user-1",
            "iss": "https://issuer",
            "aud": "client",
            "exp": 1,
            "iat": 1,
            "nonce": "n",
            "at_hash": "h",
            "token_use": "id",
            "auth_time": 1,
        })));

        assert_eq!(claims, ClaimSet::from(vec![Claim::new("sub", "user-1")]));
    }

    #[tokio::test]
    async fn test_invalidate_cache_drops_keys() {
        let metadata = MetadataCache::empty(
            reqwest::Client::new(),
            url::Url::parse("https://idp.example.com/.well-known/openid-configuration").unwrap(),
            Duration::from_secs(3600),
        );
        let validator = IdTokenValidator::new("client", metadata, Duration::from_secs(3600));
        let jwk = Jwk {
            kid: Some("old-kid".to_string()),
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            n: Some("sXchDaQebHnPiGvy".to_string()),
            e: Some("AQAB".to_string()),
        };

        validator.cache_key(&jwk).await.unwrap();
        assert!(validator.key_cache.get("old-kid").await.is_some());

        validator.invalidate_cache();
        validator.key_cache.run_pending_tasks().await;
        assert!(validator.key_cache.get("old-kid").await.is_none());
    }
}
