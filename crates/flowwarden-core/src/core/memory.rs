// crates/flowwarden-core/src/core/memory.rs
// ============================================================================
// Module: Flow Warden Memory Records
// Description: Immutable memory entries with mandatory provenance.
// Purpose: Define episodic notes, artifacts, and verifiable snapshots.
// Dependencies: serde, crate::core::{identifiers, provenance, time}
// ============================================================================

//! ## Overview
//! Memory entries are immutable after write; an "update" is a new entry.
//! Snapshots carry a `verified` flag flipped only after the post-snapshot
//! state passes CRV, which qualifies them as rollback targets. Entries
//! reference the audit entry that justified them (`source_audit_seq`), never
//! the reverse, keeping the relation directional.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::MemoryEntryId;
use crate::core::identifiers::WorkflowId;
use crate::core::provenance::Provenance;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Memory Entry Kind
// ============================================================================

/// Kind of memory entry.
///
/// # Invariants
/// - Variants are stable for serialization and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEntryKind {
    /// Narrative note recorded during execution.
    EpisodicNote,
    /// Opaque artifact produced by a task.
    Artifact,
    /// State snapshot, a rollback target once verified.
    Snapshot,
}

// ============================================================================
// SECTION: Memory Entry
// ============================================================================

/// Immutable memory entry.
///
/// # Invariants
/// - `provenance.task_id` and `provenance.step_id` are non-empty.
/// - `verified` is meaningful only for snapshots and only transitions
///   `false -> true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Entry identifier.
    pub entry_id: MemoryEntryId,
    /// Workflow the entry belongs to.
    pub workflow_id: WorkflowId,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: MemoryEntryKind,
    /// Deep-copied content.
    pub content: Value,
    /// Mandatory origin of the entry.
    pub provenance: Provenance,
    /// Tags for OR-matched filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Write timestamp.
    pub created_at: Timestamp,
    /// Verification flag for snapshots.
    #[serde(default)]
    pub verified: bool,
    /// Sequence number of the audit entry that justified this write.
    pub source_audit_seq: u64,
}

// ============================================================================
// SECTION: Memory Filter
// ============================================================================

/// Filter for memory reads.
///
/// # Invariants
/// - Scalar filters are ANDed; `tags` match when any tag matches (OR).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    /// Match entries for this workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    /// Match entries whose provenance names this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Match entries whose provenance names this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Match entries of this kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryEntryKind>,
    /// Match entries carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Match entries at or after this timestamp (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    /// Match entries at or before this timestamp (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
}

impl MemoryFilter {
    /// Returns true when `entry` matches every present category.
    #[must_use]
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(workflow_id) = &self.workflow_id
            && entry.workflow_id != *workflow_id
        {
            return false;
        }
        if let Some(task_id) = &self.task_id
            && entry.provenance.task_id.as_str() != task_id.as_str()
        {
            return false;
        }
        if let Some(step_id) = &self.step_id
            && entry.provenance.step_id.as_str() != step_id.as_str()
        {
            return false;
        }
        if let Some(kind) = self.kind
            && entry.kind != kind
        {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| entry.tags.contains(tag)) {
            return false;
        }
        if let Some(from) = &self.from
            && entry.created_at < *from
        {
            return false;
        }
        if let Some(until) = &self.until
            && entry.created_at > *until
        {
            return false;
        }
        true
    }
}

// ============================================================================
// SECTION: Write Options
// ============================================================================

/// Options accepted by a memory write.
///
/// # Invariants
/// - Defaults to an episodic note with no tags or metadata.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriteOptions {
    /// Entry kind; episodic note when absent.
    pub kind: Option<MemoryEntryKind>,
    /// Tags attached to the entry.
    pub tags: Vec<String>,
    /// Metadata attached to the entry.
    pub metadata: Option<Map<String, Value>>,
}

impl MemoryWriteOptions {
    /// Returns options for an episodic note carrying `tags`.
    #[must_use]
    pub fn note_with_tags(tags: Vec<String>) -> Self {
        Self {
            kind: Some(MemoryEntryKind::EpisodicNote),
            tags,
            metadata: None,
        }
    }

    /// Returns options for a snapshot entry.
    #[must_use]
    pub fn snapshot() -> Self {
        Self {
            kind: Some(MemoryEntryKind::Snapshot),
            tags: Vec::new(),
            metadata: None,
        }
    }
}
