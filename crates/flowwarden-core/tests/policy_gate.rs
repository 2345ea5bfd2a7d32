// crates/flowwarden-core/tests/policy_gate.rs
// ============================================================================
// Module: Goal-Guard Policy Gate Tests
// Description: Permission intersection, risk routing, and approval tokens.
// ============================================================================
//! ## Overview
//! Covers the FSM outcomes per risk tier, permission and allowlist denials,
//! single-use token consumption, expiry, and the CRITICAL multi-party
//! quorum (one approver approving twice is insufficient).

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use flowwarden_core::ActionId;
use flowwarden_core::AuditLog;
use flowwarden_core::Clock;
use flowwarden_core::GoalGuard;
use flowwarden_core::ManualClock;
use flowwarden_core::Permission;
use flowwarden_core::PolicyAction;
use flowwarden_core::PolicyConfig;
use flowwarden_core::PolicyOutcome;
use flowwarden_core::Principal;
use flowwarden_core::PrincipalId;
use flowwarden_core::PrincipalKind;
use flowwarden_core::Provenance;
use flowwarden_core::RiskTier;
use flowwarden_core::ToolId;
use flowwarden_core::runtime::policy::PolicyDenyReason;

/// Builds a gate over a manual clock so expiry is controllable.
fn gate_with_clock() -> (GoalGuard, Arc<ManualClock>, Arc<AuditLog>) {
    let clock = Arc::new(ManualClock::starting_at(1_000_000_000));
    let audit = Arc::new(AuditLog::new(clock.clone() as Arc<dyn Clock>));
    let gate = GoalGuard::with_config(
        Arc::clone(&audit),
        clock.clone() as Arc<dyn Clock>,
        PolicyConfig::default(),
    );
    (gate, clock, audit)
}

/// Returns a principal holding one permission.
fn principal(permissions: Vec<Permission>) -> Principal {
    Principal {
        principal_id: PrincipalId::new("agent-1"),
        kind: PrincipalKind::Agent,
        permissions,
    }
}

/// Returns an action with the given tier and requirements.
fn action(tier: RiskTier, required: Vec<Permission>) -> PolicyAction {
    PolicyAction {
        action_id: ActionId::new("wf-1:task-1"),
        name: "task-1".to_string(),
        risk_tier: tier,
        required_permissions: required,
        intent: None,
        data_zone: None,
        allowed_tools: None,
    }
}

#[test]
fn low_tier_with_permissions_is_allowed() {
    let (gate, _, audit) = gate_with_clock();
    let required = Permission::new("deploy", "svc");
    let outcome = gate
        .evaluate(
            &principal(vec![required.clone()]),
            &action(RiskTier::Low, vec![required]),
            None,
            Provenance::new("task-1", "policy"),
        )
        .expect("evaluate");
    assert!(matches!(outcome, PolicyOutcome::Allowed { audit_flagged: false }));
    assert_eq!(audit.len(), 1, "every evaluation appends an audit entry");
}

#[test]
fn medium_tier_is_allowed_with_audit_flag() {
    let (gate, _, _) = gate_with_clock();
    let outcome = gate
        .evaluate(
            &principal(Vec::new()),
            &action(RiskTier::Medium, Vec::new()),
            None,
            Provenance::new("task-1", "policy"),
        )
        .expect("evaluate");
    assert!(matches!(outcome, PolicyOutcome::Allowed { audit_flagged: true }));
}

#[test]
fn missing_permission_is_denied() {
    let (gate, _, _) = gate_with_clock();
    let outcome = gate
        .evaluate(
            &principal(vec![Permission::new("deploy", "other-svc")]),
            &action(RiskTier::Low, vec![Permission::new("deploy", "svc")]),
            None,
            Provenance::new("task-1", "policy"),
        )
        .expect("evaluate");
    assert!(matches!(
        outcome,
        PolicyOutcome::Denied { reason: PolicyDenyReason::InsufficientPermissions }
    ));
}

#[test]
fn tool_outside_allowlist_is_denied() {
    let (gate, _, _) = gate_with_clock();
    let mut gated = action(RiskTier::Low, Vec::new());
    gated.allowed_tools = Some(vec![ToolId::new("curl")]);
    let outcome = gate
        .evaluate(
            &principal(Vec::new()),
            &gated,
            Some(&ToolId::new("bash")),
            Provenance::new("task-1", "policy"),
        )
        .expect("evaluate");
    assert!(matches!(outcome, PolicyOutcome::Denied { reason: PolicyDenyReason::ToolNotAllowed }));
}

#[test]
fn high_tier_defers_with_single_use_token() {
    let (gate, _, _) = gate_with_clock();
    let high = action(RiskTier::High, Vec::new());
    let outcome = gate
        .evaluate(&principal(Vec::new()), &high, None, Provenance::new("task-1", "policy"))
        .expect("evaluate");
    let PolicyOutcome::PendingHuman {
        token,
        required_approvals,
        ..
    } = outcome
    else {
        panic!("expected pending_human");
    };
    assert_eq!(required_approvals, 1);
    assert_eq!(token.len(), 32, "128 bits of entropy, hex-encoded");

    let approver = PrincipalId::new("human-1");
    assert!(gate.approve_human_action(&high.action_id, &token, &approver));
    assert!(
        !gate.approve_human_action(&high.action_id, &token, &approver),
        "second approve with a consumed token returns false"
    );
    assert!(
        !gate.approve_human_action(&high.action_id, &token, &PrincipalId::new("human-2")),
        "consumed token rejects every caller"
    );
}

#[test]
fn wrong_token_is_rejected_without_consumption() {
    let (gate, _, _) = gate_with_clock();
    let high = action(RiskTier::High, Vec::new());
    let outcome = gate
        .evaluate(&principal(Vec::new()), &high, None, Provenance::new("task-1", "policy"))
        .expect("evaluate");
    let PolicyOutcome::PendingHuman {
        token,
        ..
    } = outcome
    else {
        panic!("expected pending_human");
    };
    let approver = PrincipalId::new("human-1");
    assert!(!gate.approve_human_action(&high.action_id, "deadbeef", &approver));
    assert!(gate.approve_human_action(&high.action_id, &token, &approver), "token still live");
}

#[test]
fn expired_token_is_rejected_without_consumption() {
    let (gate, clock, _) = gate_with_clock();
    let high = action(RiskTier::High, Vec::new());
    let outcome = gate
        .evaluate(&principal(Vec::new()), &high, None, Provenance::new("task-1", "policy"))
        .expect("evaluate");
    let PolicyOutcome::PendingHuman {
        token,
        ..
    } = outcome
    else {
        panic!("expected pending_human");
    };
    clock.advance_millis(3_600_000 + 1_000);
    assert!(
        !gate.approve_human_action(&high.action_id, &token, &PrincipalId::new("human-1")),
        "expired tokens are rejected"
    );
    let status = gate.approval_status(&high.action_id).expect("status");
    assert!(!status.granted);
}

#[test]
fn critical_requires_two_distinct_approvers() {
    let (gate, _, _) = gate_with_clock();
    let critical = action(RiskTier::Critical, Vec::new());
    let outcome = gate
        .evaluate(&principal(Vec::new()), &critical, None, Provenance::new("task-1", "policy"))
        .expect("evaluate");
    let PolicyOutcome::PendingHuman {
        token,
        required_approvals,
        ..
    } = outcome
    else {
        panic!("expected pending_human");
    };
    assert_eq!(required_approvals, 2);

    let approver = PrincipalId::new("human-1");
    assert!(gate.approve_human_action(&critical.action_id, &token, &approver));
    assert!(
        !gate.approve_human_action(&critical.action_id, &token, &approver),
        "the same approver approving twice is insufficient"
    );
    let status = gate.approval_status(&critical.action_id).expect("status");
    assert!(!status.granted, "quorum not met with one distinct approver");

    assert!(gate.approve_human_action(&critical.action_id, &token, &PrincipalId::new("human-2")));
    let status = gate.approval_status(&critical.action_id).expect("status");
    assert!(status.granted, "two distinct approvers satisfy the quorum");
}

#[test]
fn rejection_moves_action_to_denied() {
    let (gate, _, _) = gate_with_clock();
    let high = action(RiskTier::High, Vec::new());
    let outcome = gate
        .evaluate(&principal(Vec::new()), &high, None, Provenance::new("task-1", "policy"))
        .expect("evaluate");
    let PolicyOutcome::PendingHuman {
        token,
        ..
    } = outcome
    else {
        panic!("expected pending_human");
    };
    assert!(gate.reject_human_action(&high.action_id));
    assert!(
        !gate.approve_human_action(&high.action_id, &token, &PrincipalId::new("human-1")),
        "rejected actions cannot be approved"
    );
    let status = gate.approval_status(&high.action_id).expect("status");
    assert!(status.rejected);
}

#[test]
fn intent_constrained_permission_must_match() {
    use flowwarden_core::Intent;
    let (gate, _, _) = gate_with_clock();
    let mut required = Permission::new("files", "reports");
    required.intent = Some(Intent::Write);
    let mut granted = Permission::new("files", "reports");
    granted.intent = Some(Intent::Read);
    let outcome = gate
        .evaluate(
            &principal(vec![granted]),
            &action(RiskTier::Low, vec![required]),
            None,
            Provenance::new("task-1", "policy"),
        )
        .expect("evaluate");
    assert!(matches!(outcome, PolicyOutcome::Denied { .. }));
}
