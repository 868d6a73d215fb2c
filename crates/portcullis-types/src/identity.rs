//! Identity types

use serde::{Deserialize, Serialize};

use crate::{ClaimSet, EMAIL, SUBJECT};

/// How an identity was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuthScheme {
    /// OpenID Connect authorization-code flow against the configured provider
    OpenIdConnect,
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenIdConnect => write!(f, "oidc"),
        }
    }
}

/// An authenticated principal: its claims plus the scheme that produced them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authentication scheme tag
    pub scheme: AuthScheme,
    /// Claims asserted about the principal
    pub claims: ClaimSet,
}

impl Identity {
    /// Create a new identity
    pub fn new(scheme: AuthScheme, claims: ClaimSet) -> Self {
        Self { scheme, claims }
    }

    /// Subject identifier (`sub` claim)
    pub fn subject(&self) -> Option<&str> {
        self.claims.first_value(SUBJECT)
    }

    /// Email address (`email` claim)
    pub fn email(&self) -> Option<&str> {
        self.claims.first_value(EMAIL)
    }
}
