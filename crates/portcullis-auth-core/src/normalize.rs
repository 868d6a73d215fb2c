//! Claim normalization
//!
//! Strips claims the application does not need from a provider identity
//! before it is sealed into a session cookie. Normalization is a pure
//! function of its inputs.

use std::collections::BTreeSet;

use portcullis_types::{Claim, ClaimSet, GROUPS};

/// Decides which claims are removed during normalization
pub trait RemovalPolicy {
    /// `true` if the claim must be removed
    fn should_remove(&self, claim: &Claim) -> bool;
}

impl<F> RemovalPolicy for F
where
    F: Fn(&Claim) -> bool,
{
    fn should_remove(&self, claim: &Claim) -> bool {
        self(claim)
    }
}

/// Remove every claim for which the policy is true; everything else passes
/// through unchanged.
pub fn normalize<P>(claims: ClaimSet, policy: &P) -> ClaimSet
where
    P: RemovalPolicy + ?Sized,
{
    claims
        .into_iter()
        .filter(|claim| !policy.should_remove(claim))
        .collect()
}

/// Default removal policy: drop group claims whose value is not allow-listed.
///
/// Claims of any other type are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAllowList {
    claim_type: String,
    allowed: BTreeSet<String>,
}

impl GroupAllowList {
    /// Create a policy for the given group claim type and allowed values
    pub fn new<I, S>(claim_type: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            claim_type: claim_type.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// The claim type this policy inspects
    pub fn claim_type(&self) -> &str {
        &self.claim_type
    }

    /// Allowed group values
    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

impl Default for GroupAllowList {
    fn default() -> Self {
        Self::new(GROUPS, ["identities"])
    }
}

impl RemovalPolicy for GroupAllowList {
    fn should_remove(&self, claim: &Claim) -> bool {
        claim.is(&self.claim_type) && !self.allowed.contains(&claim.value)
    }
}
