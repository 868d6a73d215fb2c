//! Property-based tests for claim normalization
//!
//! These tests verify:
//! - Removed claims never survive; kept claims keep their multiplicity
//! - Empty input stays empty
//! - Normalization is idempotent

use portcullis_auth_core::{normalize, GroupAllowList, RemovalPolicy};
use portcullis_types::{Claim, ClaimSet, GROUPS};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Claims drawn from a small alphabet so types and values collide often
fn arb_claim() -> impl Strategy<Value = Claim> {
    (
        prop_oneof![
            Just(GROUPS.to_string()),
            Just("email".to_string()),
            Just("sub".to_string()),
            "[a-z:]{1,12}",
        ],
        prop_oneof![
            Just("identities".to_string()),
            Just("g1".to_string()),
            "[a-zA-Z0-9_@.]{0,16}",
        ],
    )
        .prop_map(|(claim_type, value)| Claim::new(claim_type, value))
}

fn arb_claim_set() -> impl Strategy<Value = ClaimSet> {
    prop::collection::vec(arb_claim(), 0..24).prop_map(ClaimSet::from)
}

fn arb_allow_list() -> impl Strategy<Value = GroupAllowList> {
    prop::collection::btree_set("[a-z0-9]{1,10}", 0..4)
        .prop_map(|allowed| GroupAllowList::new(GROUPS, allowed))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: no removed claim survives, every kept claim keeps its count
    #[test]
    fn prop_normalize_removes_exactly_policy_matches(
        claims in arb_claim_set(),
        policy in arb_allow_list(),
    ) {
        let cleaned = normalize(claims.clone(), &policy);

        for claim in cleaned.iter() {
            prop_assert!(!policy.should_remove(claim), "{} should have been removed", claim);
        }
        for claim in claims.iter() {
            let expected = if policy.should_remove(claim) { 0 } else { claims.count(claim) };
            prop_assert_eq!(cleaned.count(claim), expected);
        }
    }

    /// Property: normalize(∅, P) = ∅
    #[test]
    fn prop_normalize_empty(policy in arb_allow_list()) {
        prop_assert!(normalize(ClaimSet::new(), &policy).is_empty());
    }

    /// Property: normalization is idempotent
    #[test]
    fn prop_normalize_idempotent(claims in arb_claim_set(), policy in arb_allow_list()) {
        let once = normalize(claims, &policy);
        let twice = normalize(once.clone(), &policy);
        prop_assert_eq!(once, twice);
    }

    /// Property: arbitrary predicates obey the same contract
    #[test]
    fn prop_normalize_closure_policy(claims in arb_claim_set(), prefix in "[a-z]{0,2}") {
        let policy = |c: &Claim| c.value.starts_with(prefix.as_str());
        let cleaned = normalize(claims.clone(), &policy);

        prop_assert!(cleaned.iter().all(|c| !policy(c)));
        prop_assert_eq!(
            cleaned.len(),
            claims.iter().filter(|c| !policy(*c)).count()
        );
    }
}

#[test]
fn test_concrete_group_filtering() {
    let raw = ClaimSet::from(vec![
        Claim::new("groups", "g1"),
        Claim::new("groups", "identities"),
        Claim::new("email", "a@x.com"),
    ]);

    let cleaned = normalize(raw, &GroupAllowList::default());

    assert_eq!(
        cleaned,
        ClaimSet::from(vec![
            Claim::new("groups", "identities"),
            Claim::new("email", "a@x.com"),
        ])
    );
}
