// crates/flowwarden-core/src/runtime/policy.rs
// ============================================================================
// Module: Flow Warden Goal-Guard Policy Gate
// Description: Finite-state policy evaluation with risk-tiered human approval.
// Purpose: Screen every action before execution; defer HIGH/CRITICAL to humans.
// Dependencies: crate::{core, runtime::audit_log}, rand, subtle
// ============================================================================

//! ## Overview
//! The gate evaluates `(principal, action, tool)` through permission
//! intersection, tool allowlisting, and risk-tier routing. HIGH and CRITICAL
//! actions suspend behind a freshly minted single-use approval token; token
//! comparison is constant-time and consumption is a compare-and-set under
//! the gate's lock. Every evaluation appends an audit entry. The gate never
//! mutates workflow state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::ActionId;
use crate::core::FailureReason;
use crate::core::PolicyAction;
use crate::core::Principal;
use crate::core::PrincipalId;
use crate::core::Provenance;
use crate::core::RiskTier;
use crate::core::Timestamp;
use crate::core::ToolId;
use crate::interfaces::Clock;
use crate::runtime::audit_log::AuditLog;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default approval token time-to-live in seconds (one hour).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3_600;

/// Default number of distinct human approvers for CRITICAL actions.
pub const DEFAULT_CRITICAL_QUORUM: u32 = 2;

/// Approval token entropy in bytes (128 bits).
const TOKEN_ENTROPY_BYTES: usize = 16;

// ============================================================================
// SECTION: Errors and Outcomes
// ============================================================================

/// Policy gate errors.
#[derive(Debug, Error)]
pub enum PolicyGateError {
    /// The mandatory audit append failed.
    #[error("policy audit append failed: {0}")]
    Audit(String),
}

/// Denial reasons emitted by the gate.
///
/// # Invariants
/// - Labels are stable wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDenyReason {
    /// A required permission is missing.
    InsufficientPermissions,
    /// The supplied tool is outside the action's allowlist.
    ToolNotAllowed,
    /// A human rejected the pending approval.
    Rejected,
}

impl PolicyDenyReason {
    /// Returns the matching failure taxonomy entry.
    #[must_use]
    pub const fn failure_reason(self) -> FailureReason {
        match self {
            Self::InsufficientPermissions | Self::Rejected => {
                FailureReason::InsufficientPermissions
            }
            Self::ToolNotAllowed => FailureReason::ToolNotAllowed,
        }
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// The action may execute.
    Allowed {
        /// True for MEDIUM-tier actions, which execute under an audit flag.
        audit_flagged: bool,
    },
    /// The action is denied.
    Denied {
        /// Denial reason.
        reason: PolicyDenyReason,
    },
    /// The action awaits human approval.
    PendingHuman {
        /// Freshly minted single-use approval token.
        token: String,
        /// Token expiry.
        expires_at: Timestamp,
        /// Distinct approvals required before execution.
        required_approvals: u32,
    },
}

/// Gate FSM states, `idle -> evaluating -> outcome -> idle`.
///
/// # Invariants
/// - The gate always returns to `Idle` after an evaluation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No evaluation in flight.
    Idle,
    /// Evaluation in progress.
    Evaluating,
    /// Last evaluation allowed the action.
    Allowed,
    /// Last evaluation denied the action.
    Denied,
    /// Last evaluation deferred to a human.
    PendingHuman,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Goal-Guard configuration.
///
/// # Invariants
/// - `critical_quorum` is at least 2; one approver can never satisfy it.
#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    /// Approval token time-to-live in seconds.
    pub token_ttl_secs: u64,
    /// Distinct human approvals required for CRITICAL actions.
    pub critical_quorum: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            critical_quorum: DEFAULT_CRITICAL_QUORUM,
        }
    }
}

// ============================================================================
// SECTION: Pending Approvals
// ============================================================================

/// Bookkeeping for one pending human approval.
#[derive(Debug, Clone)]
struct PendingApproval {
    /// Opaque token bound to the action.
    token: String,
    /// Token expiry.
    expires_at: Timestamp,
    /// True once the token has been consumed.
    consumed: bool,
    /// Distinct approvals required.
    required: u32,
    /// Distinct approvers recorded so far.
    approvers: BTreeSet<String>,
    /// True when a human rejected the action.
    rejected: bool,
}

/// Externally visible approval status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStatus {
    /// True once the quorum is satisfied.
    pub granted: bool,
    /// True when a human rejected the action.
    pub rejected: bool,
    /// Distinct approvers recorded so far.
    pub approvers: Vec<String>,
    /// Distinct approvals required.
    pub required_approvals: u32,
    /// Token expiry.
    pub expires_at: Timestamp,
}

// ============================================================================
// SECTION: Goal-Guard Gate
// ============================================================================

/// Risk-tiered policy gate with single-use approval tokens.
///
/// # Invariants
/// - Token consumption is a compare-and-set under the gate lock.
/// - Every evaluation appends exactly one audit entry.
pub struct GoalGuard {
    /// Audit log receiving evaluation entries.
    audit: Arc<AuditLog>,
    /// Clock for token issue and expiry checks.
    clock: Arc<dyn Clock>,
    /// Gate configuration.
    config: PolicyConfig,
    /// FSM state (ceremonial outside evaluations; always returns to idle).
    state: Mutex<GateState>,
    /// Pending approvals keyed by action.
    pending: Mutex<BTreeMap<ActionId, PendingApproval>>,
}

impl GoalGuard {
    /// Creates a gate with the default configuration.
    #[must_use]
    pub fn new(audit: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(audit, clock, PolicyConfig::default())
    }

    /// Creates a gate with an explicit configuration.
    #[must_use]
    pub fn with_config(audit: Arc<AuditLog>, clock: Arc<dyn Clock>, config: PolicyConfig) -> Self {
        Self {
            audit,
            clock,
            config: PolicyConfig {
                token_ttl_secs: config.token_ttl_secs.max(1),
                critical_quorum: config.critical_quorum.max(2),
            },
            state: Mutex::new(GateState::Idle),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the current FSM state.
    #[must_use]
    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluates `(principal, action, tool)` and appends an audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyGateError::Audit`] when the audit append fails; the
    /// evaluation itself cannot fail.
    pub fn evaluate(
        &self,
        principal: &Principal,
        action: &PolicyAction,
        tool: Option<&ToolId>,
        provenance: Provenance,
    ) -> Result<PolicyOutcome, PolicyGateError> {
        self.transition(GateState::Evaluating);
        let outcome = self.decide(principal, action, tool);
        self.transition(match &outcome {
            PolicyOutcome::Allowed {
                ..
            } => GateState::Allowed,
            PolicyOutcome::Denied {
                ..
            } => GateState::Denied,
            PolicyOutcome::PendingHuman {
                ..
            } => GateState::PendingHuman,
        });
        self.audit_evaluation(principal, action, tool, &outcome, provenance)?;
        self.transition(GateState::Idle);
        Ok(outcome)
    }

    /// Records a human approval for a pending action.
    ///
    /// Returns true when the approval was accepted: the token matched, was
    /// unexpired and unconsumed, and the approver is new for the action.
    /// The token is consumed when the quorum completes; afterwards every
    /// call returns false.
    #[must_use]
    pub fn approve_human_action(
        &self,
        action_id: &ActionId,
        token: &str,
        approver: &PrincipalId,
    ) -> bool {
        let now = self.clock.now();
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pending) = guard.get_mut(action_id) else {
            return false;
        };
        if pending.consumed || pending.rejected || now > pending.expires_at {
            return false;
        }
        if !constant_time_eq(&pending.token, token) {
            return false;
        }
        if !pending.approvers.insert(approver.to_string()) {
            return false;
        }
        if pending.approvers.len() >= usize::try_from(pending.required).unwrap_or(usize::MAX) {
            pending.consumed = true;
        }
        true
    }

    /// Rejects a pending action; the gate reports `denied` thereafter.
    ///
    /// Returns true when a pending, unconsumed approval existed.
    #[must_use]
    pub fn reject_human_action(&self, action_id: &ActionId) -> bool {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pending) = guard.get_mut(action_id) else {
            return false;
        };
        if pending.consumed || pending.rejected {
            return false;
        }
        pending.rejected = true;
        pending.consumed = true;
        true
    }

    /// Returns the approval status for a pending action.
    #[must_use]
    pub fn approval_status(&self, action_id: &ActionId) -> Option<ApprovalStatus> {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(action_id).map(|pending| ApprovalStatus {
            granted: pending.consumed && !pending.rejected,
            rejected: pending.rejected,
            approvers: pending.approvers.iter().cloned().collect(),
            required_approvals: pending.required,
            expires_at: pending.expires_at,
        })
    }

    /// Restores a pending approval after a restart, from replayed events.
    pub fn restore_pending(
        &self,
        action_id: ActionId,
        token: String,
        expires_at: Timestamp,
        required_approvals: u32,
    ) {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(action_id).or_insert(PendingApproval {
            token,
            expires_at,
            consumed: false,
            required: required_approvals.max(1),
            approvers: BTreeSet::new(),
            rejected: false,
        });
    }

    /// Applies the permission, allowlist, and risk-tier rules.
    fn decide(
        &self,
        principal: &Principal,
        action: &PolicyAction,
        tool: Option<&ToolId>,
    ) -> PolicyOutcome {
        for required in &action.required_permissions {
            let mut required = required.clone();
            if required.intent.is_none() {
                required.intent = action.intent;
            }
            if required.data_zone.is_none() {
                required.data_zone = action.data_zone;
            }
            let satisfied =
                principal.permissions.iter().any(|granted| granted.satisfies(&required));
            if !satisfied {
                return PolicyOutcome::Denied {
                    reason: PolicyDenyReason::InsufficientPermissions,
                };
            }
        }

        if let Some(allowed) = &action.allowed_tools {
            match tool {
                Some(tool) if allowed.contains(tool) => {}
                _ => {
                    return PolicyOutcome::Denied {
                        reason: PolicyDenyReason::ToolNotAllowed,
                    };
                }
            }
        }

        match action.risk_tier {
            RiskTier::Low => PolicyOutcome::Allowed {
                audit_flagged: false,
            },
            RiskTier::Medium => PolicyOutcome::Allowed {
                audit_flagged: true,
            },
            RiskTier::High => self.defer_to_human(action, 1),
            RiskTier::Critical => self.defer_to_human(action, self.config.critical_quorum),
        }
    }

    /// Mints a pending approval (or returns the live one) for an action.
    fn defer_to_human(&self, action: &PolicyAction, required: u32) -> PolicyOutcome {
        let now = self.clock.now();
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = guard.get(&action.action_id)
            && !existing.consumed
            && !existing.rejected
            && now <= existing.expires_at
        {
            return PolicyOutcome::PendingHuman {
                token: existing.token.clone(),
                expires_at: existing.expires_at,
                required_approvals: existing.required,
            };
        }
        let token = mint_token();
        let ttl_nanos = i128::from(self.config.token_ttl_secs) * 1_000_000_000;
        let expires_at = Timestamp::from_unix_nanos(now.as_unix_nanos().saturating_add(ttl_nanos))
            .unwrap_or(now);
        guard.insert(
            action.action_id.clone(),
            PendingApproval {
                token: token.clone(),
                expires_at,
                consumed: false,
                required: required.max(1),
                approvers: BTreeSet::new(),
                rejected: false,
            },
        );
        PolicyOutcome::PendingHuman {
            token,
            expires_at,
            required_approvals: required.max(1),
        }
    }

    /// Appends the mandatory audit entry for an evaluation.
    fn audit_evaluation(
        &self,
        principal: &Principal,
        action: &PolicyAction,
        tool: Option<&ToolId>,
        outcome: &PolicyOutcome,
        provenance: Provenance,
    ) -> Result<(), PolicyGateError> {
        let (decision, reason, token): (&str, Option<&str>, Option<&str>) = match outcome {
            PolicyOutcome::Allowed {
                audit_flagged,
            } => (if *audit_flagged { "allowed_flagged" } else { "allowed" }, None, None),
            PolicyOutcome::Denied {
                reason,
            } => ("denied", Some(reason.failure_reason().as_str()), None),
            PolicyOutcome::PendingHuman {
                token,
                ..
            } => ("pending_human", None, Some(token.as_str())),
        };
        let after = json!({
            "principal": principal.principal_id.as_str(),
            "action": action.action_id.as_str(),
            "risk_tier": action.risk_tier,
            "tool": tool.map(ToolId::as_str),
            "decision": decision,
            "reason": reason,
            "token": token,
        });
        self.audit
            .append(
                principal.principal_id.as_str(),
                "policy_evaluation",
                Value::Null,
                after,
                provenance,
            )
            .map(drop)
            .map_err(|err| PolicyGateError::Audit(err.to_string()))
    }

    /// Moves the FSM to `next`.
    fn transition(&self, next: GateState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }
}

// ============================================================================
// SECTION: Token Helpers
// ============================================================================

/// Mints an opaque approval token with 128 bits of OS entropy.
fn mint_token() -> String {
    let mut bytes = [0_u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(TOKEN_ENTROPY_BYTES * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Compares two tokens in constant time.
fn constant_time_eq(expected: &str, supplied: &str) -> bool {
    if expected.len() != supplied.len() {
        return false;
    }
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}
