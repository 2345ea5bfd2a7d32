// crates/flowwarden-core/src/core/commit.rs
// ============================================================================
// Module: Flow Warden Commits
// Description: Transient commit object validated by the CRV gate.
// Purpose: Represent a proposed change before it is accepted into state.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A commit is the unit the CRV gate validates: the proposed new value, the
//! optional previous state, and free-form metadata (for example a numeric
//! `confidence`). Commits are transient; only the gate's decision is
//! persisted, in the audit trail.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Commit
// ============================================================================

/// Proposed change submitted to the CRV gate.
///
/// # Invariants
/// - Not persisted independently; its validation result is audited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier, unique within the submitting context.
    pub commit_id: String,
    /// Proposed new value.
    pub data: Value,
    /// Optional previous state for differential validators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Value>,
    /// Optional metadata (for example `confidence`).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Commit {
    /// Creates a commit over `data` with no previous state or metadata.
    #[must_use]
    pub fn new(commit_id: impl Into<String>, data: Value) -> Self {
        Self {
            commit_id: commit_id.into(),
            data,
            previous_state: None,
            metadata: Map::new(),
        }
    }

    /// Attaches the previous state.
    #[must_use]
    pub fn with_previous_state(mut self, previous: Value) -> Self {
        self.previous_state = Some(previous);
        self
    }

    /// Attaches a metadata key/value pair.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the numeric `confidence` metadata value when present.
    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        self.metadata.get("confidence").and_then(Value::as_f64)
    }
}
