// crates/flowwarden-core/src/core/events.rs
// ============================================================================
// Module: Flow Warden Lifecycle Events
// Description: Closed event kinds and the append-only event record.
// Purpose: Define the per-workflow journal entries persisted ahead of state.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! Events are the write-ahead journal of a workflow: every lifecycle
//! transition is appended before the corresponding state save returns.
//! Replaying a workflow's events reconstructs its execution record, which is
//! how resumption rebuilds in-flight transient state after a crash.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::EventId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WorkflowId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Kind
// ============================================================================

/// Closed set of lifecycle event kinds.
///
/// # Invariants
/// - Labels are stable wire strings; variants are never reused or renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Workflow entered `running`.
    WorkflowStarted,
    /// Workflow reached `completed`.
    WorkflowCompleted,
    /// Workflow reached `failed`.
    WorkflowFailed,
    /// Task attempt dispatched.
    TaskStarted,
    /// Task succeeded.
    TaskCompleted,
    /// Task failed terminally.
    TaskFailed,
    /// Task skipped: conditional branch not selected.
    TaskSkipped,
    /// Task skipped on resume: idempotent success already persisted.
    TaskSkippedIdempotent,
    /// Task suspended pending human approval.
    TaskAwaitingApproval,
    /// Human approval satisfied the quorum.
    ApprovalGranted,
    /// Human approval rejected.
    ApprovalRejected,
    /// Compensation pass started.
    CompensationTriggered,
    /// A compensation step completed.
    CompensationCompleted,
    /// A compensation step failed (pass continues).
    CompensationFailed,
    /// Workflow state persisted outside a task transition.
    StateUpdated,
    /// Policy gate blocked a task.
    PolicyBlocked,
    /// CRV gate blocked a commit.
    CrvBlocked,
    /// Workflow rolled back to a verified snapshot.
    Rollback,
}

impl EventKind {
    /// Returns the stable wire label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskSkipped => "task_skipped",
            Self::TaskSkippedIdempotent => "task_skipped_idempotent",
            Self::TaskAwaitingApproval => "task_awaiting_approval",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalRejected => "approval_rejected",
            Self::CompensationTriggered => "compensation_triggered",
            Self::CompensationCompleted => "compensation_completed",
            Self::CompensationFailed => "compensation_failed",
            Self::StateUpdated => "state_updated",
            Self::PolicyBlocked => "policy_blocked",
            Self::CrvBlocked => "crv_blocked",
            Self::Rollback => "rollback",
        }
    }
}

// ============================================================================
// SECTION: Event Record
// ============================================================================

/// Append-only lifecycle event.
///
/// # Invariants
/// - Events for a workflow are appended in real-time order.
/// - `event_id` is unique within the workflow journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier, unique per workflow.
    pub event_id: EventId,
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Workflow the event belongs to.
    pub workflow_id: WorkflowId,
    /// Task the event refers to, when task-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Free-form metadata map.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Event {
    /// Creates a workflow-scoped event with no metadata.
    #[must_use]
    pub fn workflow(
        event_id: EventId,
        timestamp: Timestamp,
        kind: EventKind,
        workflow_id: WorkflowId,
    ) -> Self {
        Self {
            event_id,
            timestamp,
            kind,
            workflow_id,
            task_id: None,
            metadata: Map::new(),
        }
    }

    /// Creates a task-scoped event with no metadata.
    #[must_use]
    pub fn task(
        event_id: EventId,
        timestamp: Timestamp,
        kind: EventKind,
        workflow_id: WorkflowId,
        task_id: TaskId,
    ) -> Self {
        Self {
            event_id,
            timestamp,
            kind,
            workflow_id,
            task_id: Some(task_id),
            metadata: Map::new(),
        }
    }

    /// Attaches a metadata key/value pair.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
