// crates/flowwarden-core/src/core/failure.rs
// ============================================================================
// Module: Flow Warden Failure Taxonomy
// Description: Closed failure taxonomy with stable wire labels.
// Purpose: Represent every recoverable and terminal failure as a value.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every failure in Flow Warden is a value drawn from a closed taxonomy and
//! propagated explicitly. The labels are stable wire strings recorded in task
//! state, events, and audit entries; panics are reserved for invariant
//! violations and terminate the orchestrator process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Failure Reason
// ============================================================================

/// Stable failure taxonomy for task and workflow failures.
///
/// # Invariants
/// - Labels are stable wire strings; variants are never reused or renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// DAG malformed or cyclic; workflow never enters `running`.
    InvalidSpec,
    /// Policy gate denied for missing permissions.
    InsufficientPermissions,
    /// Policy gate denied for a tool outside the allowlist.
    ToolNotAllowed,
    /// Tool input failed schema validation.
    InputSchemaViolation,
    /// Tool output failed schema validation.
    OutputSchemaViolation,
    /// Tool invocation exceeded its timeout.
    Timeout,
    /// Task was cancelled cooperatively.
    Cancelled,
    /// Tool reported an execution failure.
    ToolError,
    /// CRV gate rejected the commit.
    CrvBlocked,
    /// A compensation step failed (pass continues best-effort).
    CompensationFailed,
    /// Audit log failed integrity verification.
    AuditIntegrityFailed,
    /// Optimistic concurrency conflict in the state store.
    StateStoreConflict,
}

impl FailureReason {
    /// Returns the stable wire label for the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSpec => "invalid_spec",
            Self::InsufficientPermissions => "insufficient_permissions",
            Self::ToolNotAllowed => "tool_not_allowed",
            Self::InputSchemaViolation => "input_schema_violation",
            Self::OutputSchemaViolation => "output_schema_violation",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ToolError => "tool_error",
            Self::CrvBlocked => "crv_blocked",
            Self::CompensationFailed => "compensation_failed",
            Self::AuditIntegrityFailed => "audit_integrity_failed",
            Self::StateStoreConflict => "state_store_conflict",
        }
    }

    /// Returns true when the reason is subject to the task retry policy.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::InputSchemaViolation
                | Self::OutputSchemaViolation
                | Self::Timeout
                | Self::Cancelled
                | Self::ToolError
        )
    }
}
