// crates/flowwarden-core/src/core/state.rs
// ============================================================================
// Module: Flow Warden Execution State
// Description: Workflow and task state machine records.
// Purpose: Capture the mutable execution record persisted at every transition.
// Dependencies: serde, crate::core::{failure, identifiers, principal, spec, time}
// ============================================================================

//! ## Overview
//! Workflow state is the mutable half of a workflow: overall status, per-task
//! states, the LIFO compensation stack, and a persistence version used for
//! optimistic concurrency. The orchestrator is the only writer; stores must
//! treat loaded state as untrusted and fail closed on inconsistency.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::failure::FailureReason;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::WorkflowId;
use crate::core::principal::Principal;
use crate::core::spec::WorkflowSpec;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Workflow Status
// ============================================================================

/// Workflow lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Submitted, not yet started.
    Pending,
    /// Actively executing or suspended awaiting approval.
    Running,
    /// Every task succeeded or was skipped.
    Completed,
    /// At least one task failed terminally.
    Failed,
    /// Compensation pass in progress.
    Compensating,
    /// Compensation pass finished.
    Compensated,
    /// Aborted by rollback or integrity failure.
    Aborted,
}

impl WorkflowStatus {
    /// Returns true when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Aborted)
    }

    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Aborted => "aborted",
        }
    }
}

// ============================================================================
// SECTION: Task Phase
// ============================================================================

/// Task lifecycle phase.
///
/// # Invariants
/// - Variants are stable for serialization and store filtering.
/// - `Succeeded` and `Skipped` are the terminal-success phases that release
///   dependent tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Dependencies not yet satisfied.
    Pending,
    /// Dependencies satisfied; eligible for dispatch.
    Ready,
    /// Dispatched and executing.
    Running,
    /// Suspended pending human approval.
    AwaitingApproval,
    /// Completed successfully.
    Succeeded,
    /// Failed terminally.
    Failed,
    /// Skipped because a conditional branch was not selected.
    Skipped,
    /// Side effects undone by the compensation pass.
    Compensated,
}

impl TaskPhase {
    /// Returns true when the phase is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped | Self::Compensated)
    }

    /// Returns true when the phase releases dependent tasks.
    #[must_use]
    pub const fn is_terminal_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Returns the stable wire label for the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Compensated => "compensated",
        }
    }
}

// ============================================================================
// SECTION: Approval State
// ============================================================================

/// Human-approval bookkeeping for a suspended task.
///
/// # Invariants
/// - `token` is opaque; consumption is tracked by the policy gate.
/// - `approvers` lists distinct principals that approved so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalState {
    /// Opaque single-use approval token.
    pub token: String,
    /// Expiry of the token.
    pub expires_at: Timestamp,
    /// Distinct approvers recorded so far.
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Approvals required before the task may run.
    pub required_approvals: u32,
    /// True once the quorum is satisfied.
    #[serde(default)]
    pub granted: bool,
}

// ============================================================================
// SECTION: Task State
// ============================================================================

/// Mutable execution record for one task.
///
/// # Invariants
/// - `attempt` is 1-based and increments on each dispatch of the task body.
/// - `idempotency_key`, once set, is stable across retries of the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Current phase.
    pub phase: TaskPhase,
    /// Attempt counter (0 until first dispatch).
    #[serde(default)]
    pub attempt: u32,
    /// Last failure reason, when any attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureReason>,
    /// Human-readable detail accompanying `last_error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Output payload of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Branch selected by a decision task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Start timestamp of the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// End timestamp of the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    /// Approval bookkeeping while suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalState>,
    /// Idempotency key derived for the task's tool invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl TaskState {
    /// Returns a fresh pending task state.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            phase: TaskPhase::Pending,
            attempt: 0,
            last_error: None,
            error_detail: None,
            output: None,
            branch: None,
            started_at: None,
            ended_at: None,
            approval: None,
            idempotency_key: None,
        }
    }
}

// ============================================================================
// SECTION: Compensation Stack
// ============================================================================

/// Compensation record pushed when a side-effecting task succeeds.
///
/// # Invariants
/// - Records are popped in LIFO order during the compensation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Task whose side effects the record undoes.
    pub task_id: TaskId,
    /// Compensation tool.
    pub tool: ToolId,
    /// Arguments for the compensation tool.
    pub args: Value,
    /// Original inputs of the compensated invocation.
    pub original_inputs: Value,
    /// Result of the compensated invocation.
    pub result: Value,
    /// Registration timestamp (completion order evidence).
    pub registered_at: Timestamp,
}

// ============================================================================
// SECTION: Workflow State
// ============================================================================

/// Mutable execution record for one workflow.
///
/// # Invariants
/// - `version` increases by exactly one on every successful save.
/// - `task_states` contains an entry for every task in `spec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Workflow identifier.
    pub workflow_id: WorkflowId,
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Overall status.
    pub status: WorkflowStatus,
    /// Immutable specification driving the workflow.
    pub spec: WorkflowSpec,
    /// Canonical hash of `spec`, checked on resume.
    pub spec_hash: String,
    /// Principal the workflow executes as.
    pub principal: Principal,
    /// Mutable workflow context exposed read-only to tools.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Per-task execution records.
    pub task_states: BTreeMap<TaskId, TaskState>,
    /// LIFO compensation stack in completion order.
    #[serde(default)]
    pub compensation_stack: Vec<CompensationRecord>,
    /// Submission timestamp.
    pub created_at: Timestamp,
    /// Timestamp of the most recent transition.
    pub updated_at: Timestamp,
    /// Start timestamp, set when the workflow enters `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// End timestamp, set on the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    /// Optimistic concurrency version (starts at 0, bumped per save).
    #[serde(default)]
    pub version: u64,
    /// Monotonic counter backing per-workflow event identifiers.
    #[serde(default)]
    pub event_seq: u64,
}

impl WorkflowState {
    /// Returns the task state for `task_id` when present.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<&TaskState> {
        self.task_states.get(task_id)
    }

    /// Returns true when every task is in a terminal phase.
    #[must_use]
    pub fn all_tasks_terminal(&self) -> bool {
        self.task_states.values().all(|task| task.phase.is_terminal())
    }

    /// Returns true when every task succeeded or was skipped.
    #[must_use]
    pub fn all_tasks_successful(&self) -> bool {
        self.task_states.values().all(|task| task.phase.is_terminal_success())
    }
}

// ============================================================================
// SECTION: Store Filter
// ============================================================================

/// Filter applied by [`crate::interfaces::StateStore::list`].
///
/// # Invariants
/// - Absent fields match everything; present fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFilter {
    /// Match workflows with this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    /// Match workflow identifiers starting with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id_prefix: Option<String>,
}

impl StateFilter {
    /// Returns true when `state` matches the filter.
    #[must_use]
    pub fn matches(&self, state: &WorkflowState) -> bool {
        if let Some(status) = self.status
            && state.status != status
        {
            return false;
        }
        if let Some(prefix) = &self.workflow_id_prefix
            && !state.workflow_id.as_str().starts_with(prefix.as_str())
        {
            return false;
        }
        true
    }
}
