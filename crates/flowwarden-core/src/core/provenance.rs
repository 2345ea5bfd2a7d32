// crates/flowwarden-core/src/core/provenance.rs
// ============================================================================
// Module: Flow Warden Provenance
// Description: Task/step provenance attached to audit and memory records.
// Purpose: Tie every recorded decision and memory write back to its origin.
// Dependencies: serde, crate::core::identifiers
// ============================================================================

//! ## Overview
//! Provenance names the task and step that produced a record, optionally
//! linking the originating event. Memory writes require non-empty task and
//! step identifiers; audit entries carry provenance for every decision.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EventId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::TaskId;

// ============================================================================
// SECTION: Provenance
// ============================================================================

/// Origin of an audit entry or memory entry.
///
/// # Invariants
/// - Memory writes reject empty `task_id` or `step_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Task that produced the record.
    pub task_id: TaskId,
    /// Step within the task that produced the record.
    pub step_id: StepId,
    /// Optional originating event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<EventId>,
}

impl Provenance {
    /// Creates provenance for a task step.
    #[must_use]
    pub fn new(task_id: impl Into<TaskId>, step_id: impl Into<StepId>) -> Self {
        Self {
            task_id: task_id.into(),
            step_id: step_id.into(),
            source_event_id: None,
        }
    }

    /// Attaches the originating event identifier.
    #[must_use]
    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.source_event_id = Some(event_id);
        self
    }

    /// Returns true when both mandatory components are non-empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.task_id.is_empty() && !self.step_id.is_empty()
    }
}
