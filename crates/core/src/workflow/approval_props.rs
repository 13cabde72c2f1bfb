//! Property-based tests for approval chains.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::UserId;

use crate::workflow::approval::{
    Actor, ApprovalPolicy, ApprovalRule, ApprovalState, RuleBasedApprovalPolicy, UserRole,
};
use crate::workflow::error::ApprovalError;

/// Strategy for generating random positive Decimal amounts.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|n| Decimal::new(n, 2))
}

/// Strategy for generating random UserRole values.
fn arb_user_role() -> impl Strategy<Value = UserRole> {
    prop_oneof![
        Just(UserRole::Viewer),
        Just(UserRole::Submitter),
        Just(UserRole::Approver),
        Just(UserRole::Accountant),
        Just(UserRole::Admin),
        Just(UserRole::Owner),
    ]
}

fn tiered_policy() -> RuleBasedApprovalPolicy {
    let rule = |name: &str, min: i64, role: UserRole| ApprovalRule {
        name: name.to_string(),
        min_amount: Some(Decimal::new(min, 0)),
        max_amount: None,
        document_types: vec![],
        required_role: role,
        priority: 0,
    };
    RuleBasedApprovalPolicy::new(vec![
        rule("Manager", 0, UserRole::Approver),
        rule("Controller", 10_000, UserRole::Accountant),
        rule("CFO", 100_000, UserRole::Admin),
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Chains are never empty and never repeat a role.
    #[test]
    fn prop_chain_roles_ascending_and_unique(amount in arb_amount()) {
        let chain = tiered_policy().approval_chain("settlement", amount);
        prop_assert!(!chain.is_empty());
        for pair in chain.windows(2) {
            prop_assert!(pair[0].required_role < pair[1].required_role);
        }
    }

    /// A larger amount never needs fewer approval steps.
    #[test]
    fn prop_chain_monotonic_in_amount(a in arb_amount(), b in arb_amount()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let policy = tiered_policy();
        prop_assert!(
            policy.approval_chain("settlement", low).len()
                <= policy.approval_chain("settlement", high).len()
        );
    }

    /// Role hierarchy decides authority for roles other than Approver.
    #[test]
    fn prop_role_hierarchy(user in arb_user_role(), required in arb_user_role(), amount in arb_amount()) {
        prop_assume!(user != UserRole::Approver);
        let actor = Actor::new(UserId::new(), user);
        let result = actor.can_approve(required, amount);
        if user >= required {
            prop_assert!(result.is_ok());
        } else {
            let is_insufficient = matches!(result, Err(ApprovalError::InsufficientRole { .. }));
            prop_assert!(is_insufficient);
        }
    }

    /// A chain completes after exactly one approval per step by an Owner pool.
    #[test]
    fn prop_chain_completes_after_each_step(amount in arb_amount()) {
        let mut state = ApprovalState::default();
        state.start(tiered_policy().approval_chain("settlement", amount));
        let steps = state.chain.len();
        for i in 0..steps {
            let owner = Actor::new(UserId::new(), UserRole::Owner);
            let complete = state.approve(&owner, amount, None, Utc::now());
            prop_assert_eq!(complete, Ok(i + 1 == steps));
        }
        prop_assert!(state.is_complete());
    }
}
