//! Claim types

use serde::{Deserialize, Serialize};

/// Well-known claim type for the subject identifier
pub const SUBJECT: &str = "sub";
/// Well-known claim type for the email address
pub const EMAIL: &str = "email";
/// Well-known claim type for group membership
pub const GROUPS: &str = "groups";

/// A typed attribute asserted about an identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Namespaced claim type (e.g. `sub`, `email`, `groups`)
    #[serde(rename = "type")]
    pub claim_type: String,
    /// Claim value
    pub value: String,
}

impl Claim {
    /// Create a new claim
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    /// Check whether this claim has the given type
    #[inline]
    pub fn is(&self, claim_type: &str) -> bool {
        self.claim_type == claim_type
    }
}

impl std::fmt::Display for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.claim_type, self.value)
    }
}

/// Unordered collection of claims attached to an identity.
///
/// Several claims may share a type (multi-valued attributes such as groups).
/// Duplicate `(type, value)` pairs are tolerated; equality is by multiset,
/// not by order.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Vec<Claim>);

impl ClaimSet {
    /// Create an empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claims, counting duplicates
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no claims
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add a claim
    pub fn push(&mut self, claim: Claim) {
        self.0.push(claim);
    }

    /// Add a claim unless an identical `(type, value)` pair is already present.
    ///
    /// Returns `true` if the claim was added.
    pub fn insert_unique(&mut self, claim: Claim) -> bool {
        if self.contains(&claim) {
            return false;
        }
        self.0.push(claim);
        true
    }

    /// Iterate over all claims
    pub fn iter(&self) -> std::slice::Iter<'_, Claim> {
        self.0.iter()
    }

    /// Iterate over the claims of one type
    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a Claim> + 'a {
        self.0.iter().filter(move |c| c.is(claim_type))
    }

    /// First value of the given claim type, if any
    pub fn first_value(&self, claim_type: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.is(claim_type))
            .map(|c| c.value.as_str())
    }

    /// Whether the exact `(type, value)` pair is present
    pub fn contains(&self, claim: &Claim) -> bool {
        self.0.iter().any(|c| c == claim)
    }

    /// How many times the exact `(type, value)` pair occurs
    pub fn count(&self, claim: &Claim) -> usize {
        self.0.iter().filter(|c| *c == claim).count()
    }

    /// Keep only the claims matching the predicate
    pub fn retain(&mut self, f: impl FnMut(&Claim) -> bool) {
        self.0.retain(f);
    }

    /// Consume the set and return its claims
    pub fn into_vec(self) -> Vec<Claim> {
        self.0
    }
}

impl PartialEq for ClaimSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.0.iter().all(|c| self.count(c) == other.count(c))
    }
}

impl From<Vec<Claim>> for ClaimSet {
    fn from(claims: Vec<Claim>) -> Self {
        Self(claims)
    }
}

impl FromIterator<Claim> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = Claim>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Claim> for ClaimSet {
    fn extend<I: IntoIterator<Item = Claim>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ClaimSet {
    type Item = Claim;
    type IntoIter = std::vec::IntoIter<Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClaimSet {
    type Item = &'a Claim;
    type IntoIter = std::slice::Iter<'a, Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
