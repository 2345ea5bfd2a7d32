// crates/flowwarden-core/src/runtime/projector.rs
// ============================================================================
// Module: Flow Warden Event Projector
// Description: Rebuilds workflow state by folding the event journal.
// Purpose: Support resumption and the replay round-trip law.
// Dependencies: crate::core, serde_json
// ============================================================================

//! ## Overview
//! The projector folds a workflow's events over its initial (pending) state,
//! producing an execution record equivalent to the persisted one with
//! metadata timestamps excepted. Resumption uses it to rebuild transient
//! state such as pending approvals after a crash.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::ApprovalState;
use crate::core::Event;
use crate::core::EventKind;
use crate::core::FailureReason;
use crate::core::TaskPhase;
use crate::core::Timestamp;
use crate::core::WorkflowState;
use crate::core::WorkflowStatus;

// ============================================================================
// SECTION: Projection
// ============================================================================

/// Folds `events` over `initial`, returning the projected state.
///
/// `initial` must be the state as persisted at submission (status `pending`,
/// all tasks `pending`). Unknown task references are ignored, matching the
/// journal's append-only, forward-compatible posture.
#[must_use]
pub fn project_state(initial: &WorkflowState, events: &[Event]) -> WorkflowState {
    let mut state = initial.clone();
    for event in events {
        apply_event(&mut state, event);
        state.updated_at = event.timestamp;
    }
    state
}

/// Returns pending approvals visible at the end of the journal:
/// `(task_id, token, expires_at, required_approvals)` tuples for tasks that
/// suspended and were neither granted nor rejected afterwards.
#[must_use]
pub fn pending_approvals(events: &[Event]) -> Vec<(String, String, Option<Timestamp>, u32)> {
    let mut pending: Vec<(String, String, Option<Timestamp>, u32)> = Vec::new();
    for event in events {
        let Some(task_id) = event.task_id.as_ref() else {
            continue;
        };
        match event.kind {
            EventKind::TaskAwaitingApproval => {
                let token = metadata_str(event, "token").unwrap_or_default();
                let expires_at =
                    metadata_str(event, "expires_at").and_then(|text| Timestamp::parse(&text).ok());
                let required = metadata_u64(event, "required_approvals").unwrap_or(1);
                pending.retain(|(existing, ..)| existing.as_str() != task_id.as_str());
                pending.push((
                    task_id.to_string(),
                    token,
                    expires_at,
                    u32::try_from(required).unwrap_or(u32::MAX),
                ));
            }
            EventKind::ApprovalGranted | EventKind::ApprovalRejected => {
                pending.retain(|(existing, ..)| existing.as_str() != task_id.as_str());
            }
            _ => {}
        }
    }
    pending
}

/// Applies one event to the state.
fn apply_event(state: &mut WorkflowState, event: &Event) {
    match event.kind {
        EventKind::WorkflowStarted => {
            state.status = WorkflowStatus::Running;
            state.started_at = Some(event.timestamp);
        }
        EventKind::WorkflowCompleted => {
            state.status = WorkflowStatus::Completed;
            state.ended_at = Some(event.timestamp);
        }
        EventKind::WorkflowFailed => {
            state.status = WorkflowStatus::Failed;
            state.ended_at = Some(event.timestamp);
        }
        EventKind::CompensationTriggered => {
            state.status = WorkflowStatus::Compensating;
        }
        EventKind::Rollback => {
            state.status = WorkflowStatus::Aborted;
        }
        EventKind::StateUpdated => {
            if let Some(status) = metadata_str(event, "status") {
                apply_status_label(state, &status);
            }
        }
        EventKind::TaskStarted => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Running;
                task.started_at = Some(event.timestamp);
                if let Some(attempt) = metadata_u64(event, "attempt") {
                    task.attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
                }
            });
        }
        EventKind::TaskCompleted => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Succeeded;
                task.ended_at = Some(event.timestamp);
                task.output = event.metadata.get("output").cloned();
                task.branch = metadata_str(event, "branch");
                if let Some(key) = metadata_str(event, "idempotency_key") {
                    task.idempotency_key = Some(key);
                }
            });
        }
        EventKind::TaskFailed | EventKind::PolicyBlocked | EventKind::CrvBlocked => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Failed;
                task.ended_at = Some(event.timestamp);
                task.last_error = metadata_str(event, "reason")
                    .and_then(|label| parse_failure_reason(&label));
                task.error_detail = metadata_str(event, "detail");
            });
        }
        EventKind::TaskSkipped => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Skipped;
                task.ended_at = Some(event.timestamp);
            });
        }
        EventKind::TaskSkippedIdempotent => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Succeeded;
            });
        }
        EventKind::TaskAwaitingApproval => {
            let token = metadata_str(event, "token").unwrap_or_default();
            let expires_at = metadata_str(event, "expires_at")
                .and_then(|text| Timestamp::parse(&text).ok())
                .unwrap_or(event.timestamp);
            let required = metadata_u64(event, "required_approvals").unwrap_or(1);
            with_task(state, event, |task| {
                task.phase = TaskPhase::AwaitingApproval;
                task.approval = Some(ApprovalState {
                    token: token.clone(),
                    expires_at,
                    approvers: Vec::new(),
                    required_approvals: u32::try_from(required).unwrap_or(u32::MAX),
                    granted: false,
                });
            });
        }
        EventKind::ApprovalGranted => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Ready;
                if let Some(approval) = task.approval.as_mut() {
                    approval.granted = true;
                }
            });
        }
        EventKind::ApprovalRejected => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Failed;
                task.ended_at = Some(event.timestamp);
                task.last_error = Some(FailureReason::InsufficientPermissions);
            });
        }
        EventKind::CompensationCompleted => {
            with_task(state, event, |task| {
                task.phase = TaskPhase::Compensated;
            });
        }
        EventKind::CompensationFailed => {}
    }
}

/// Applies a status label carried by a `state_updated` event.
fn apply_status_label(state: &mut WorkflowState, label: &str) {
    state.status = match label {
        "pending" => WorkflowStatus::Pending,
        "running" => WorkflowStatus::Running,
        "completed" => WorkflowStatus::Completed,
        "failed" => WorkflowStatus::Failed,
        "compensating" => WorkflowStatus::Compensating,
        "compensated" => WorkflowStatus::Compensated,
        "aborted" => WorkflowStatus::Aborted,
        _ => state.status,
    };
}

/// Mutates the task referenced by the event, ignoring unknown tasks.
fn with_task(
    state: &mut WorkflowState,
    event: &Event,
    apply: impl FnOnce(&mut crate::core::TaskState),
) {
    if let Some(task_id) = event.task_id.as_ref()
        && let Some(task) = state.task_states.get_mut(task_id)
    {
        apply(task);
    }
}

/// Reads a string metadata value.
fn metadata_str(event: &Event, key: &str) -> Option<String> {
    event.metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reads an unsigned integer metadata value.
fn metadata_u64(event: &Event, key: &str) -> Option<u64> {
    event.metadata.get(key).and_then(Value::as_u64)
}

/// Parses a stable failure label back into the taxonomy.
fn parse_failure_reason(label: &str) -> Option<FailureReason> {
    match label {
        "invalid_spec" => Some(FailureReason::InvalidSpec),
        "insufficient_permissions" => Some(FailureReason::InsufficientPermissions),
        "tool_not_allowed" => Some(FailureReason::ToolNotAllowed),
        "input_schema_violation" => Some(FailureReason::InputSchemaViolation),
        "output_schema_violation" => Some(FailureReason::OutputSchemaViolation),
        "timeout" => Some(FailureReason::Timeout),
        "cancelled" => Some(FailureReason::Cancelled),
        "tool_error" => Some(FailureReason::ToolError),
        "crv_blocked" => Some(FailureReason::CrvBlocked),
        "compensation_failed" => Some(FailureReason::CompensationFailed),
        "audit_integrity_failed" => Some(FailureReason::AuditIntegrityFailed),
        "state_store_conflict" => Some(FailureReason::StateStoreConflict),
        _ => None,
    }
}
