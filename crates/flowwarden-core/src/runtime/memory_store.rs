// crates/flowwarden-core/src/runtime/memory_store.rs
// ============================================================================
// Module: Flow Warden Memory Store
// Description: Immutable memory entries with provenance and verified snapshots.
// Purpose: Record episodic notes, artifacts, and rollback-eligible snapshots.
// Dependencies: crate::{core, interfaces, runtime::audit_log}
// ============================================================================

//! ## Overview
//! Every write validates provenance, deep-copies content, and appends a
//! matching audit entry before the memory entry becomes visible; the entry
//! stores the audit sequence it references, keeping the memory-to-audit
//! relation directional. Queries never return null; an empty match is an
//! empty vector.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::MemoryEntry;
use crate::core::MemoryEntryId;
use crate::core::MemoryEntryKind;
use crate::core::MemoryFilter;
use crate::core::MemoryWriteOptions;
use crate::core::Provenance;
use crate::core::WorkflowId;
use crate::interfaces::Clock;
use crate::runtime::audit_log::AuditLog;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Memory store errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Provenance is missing a mandatory component.
    #[error("invalid provenance: task_id and step_id must be non-empty")]
    InvalidProvenance,
    /// The requested entry does not exist.
    #[error("memory entry not found: {0}")]
    NotFound(String),
    /// The entry is not a snapshot.
    #[error("memory entry is not a snapshot: {0}")]
    NotSnapshot(String),
    /// The backing audit append failed.
    #[error("memory audit append failed: {0}")]
    Audit(String),
}

// ============================================================================
// SECTION: Memory Store
// ============================================================================

/// Actor recorded on audit entries produced by memory writes.
const MEMORY_ACTOR: &str = "memory-store";

/// Memory store with immutable entries and verified snapshots.
///
/// # Invariants
/// - Entries are immutable after write; verification only flips
///   `verified: false -> true` on snapshots.
/// - Every entry references the audit entry that justified it.
pub struct MemoryStore {
    /// Audit log receiving a matching entry per write.
    audit: Arc<AuditLog>,
    /// Clock supplying entry timestamps.
    clock: Arc<dyn Clock>,
    /// Stored entries in write order.
    entries: Mutex<Vec<MemoryEntry>>,
}

impl MemoryStore {
    /// Creates an empty memory store.
    #[must_use]
    pub fn new(audit: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            audit,
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Writes a new memory entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidProvenance`] when `provenance` lacks a
    /// task or step id, and [`MemoryError::Audit`] when the matching audit
    /// entry cannot be appended.
    pub fn write(
        &self,
        workflow_id: &WorkflowId,
        content: &Value,
        provenance: Provenance,
        options: MemoryWriteOptions,
    ) -> Result<MemoryEntry, MemoryError> {
        if !provenance.is_complete() {
            return Err(MemoryError::InvalidProvenance);
        }
        let kind = options.kind.unwrap_or(MemoryEntryKind::EpisodicNote);
        let audit_entry = self
            .audit
            .append(
                MEMORY_ACTOR,
                "memory_write",
                Value::Null,
                json!({
                    "workflow_id": workflow_id.as_str(),
                    "kind": kind,
                    "tags": options.tags,
                }),
                provenance.clone(),
            )
            .map_err(|err| MemoryError::Audit(err.to_string()))?;
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = MemoryEntry {
            entry_id: MemoryEntryId::new(format!("mem-{}", guard.len() + 1)),
            workflow_id: workflow_id.clone(),
            kind,
            content: content.clone(),
            provenance,
            tags: options.tags,
            metadata: options.metadata,
            created_at: self.clock.now(),
            verified: false,
            source_audit_seq: audit_entry.seq,
        };
        guard.push(entry.clone());
        Ok(entry)
    }

    /// Returns entries matching `filter`; an empty match is an empty vector.
    #[must_use]
    pub fn read(&self, filter: &MemoryFilter) -> Vec<MemoryEntry> {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.iter().filter(|entry| filter.matches(entry)).cloned().collect()
    }

    /// Returns all entries for a workflow in ascending timestamp order.
    #[must_use]
    pub fn timeline(&self, workflow_id: &WorkflowId) -> Vec<MemoryEntry> {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<MemoryEntry> =
            guard.iter().filter(|entry| entry.workflow_id == *workflow_id).cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    /// Marks a snapshot verified. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] for an unknown entry and
    /// [`MemoryError::NotSnapshot`] when the entry is not a snapshot.
    pub fn mark_verified(&self, entry_id: &MemoryEntryId) -> Result<(), MemoryError> {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = guard
            .iter_mut()
            .find(|entry| entry.entry_id == *entry_id)
            .ok_or_else(|| MemoryError::NotFound(entry_id.to_string()))?;
        if entry.kind != MemoryEntryKind::Snapshot {
            return Err(MemoryError::NotSnapshot(entry_id.to_string()));
        }
        entry.verified = true;
        Ok(())
    }

    /// Returns the most recent verified snapshot for a workflow.
    #[must_use]
    pub fn latest_verified_snapshot(&self, workflow_id: &WorkflowId) -> Option<MemoryEntry> {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .filter(|entry| {
                entry.workflow_id == *workflow_id
                    && entry.kind == MemoryEntryKind::Snapshot
                    && entry.verified
            })
            .max_by_key(|entry| entry.created_at)
            .cloned()
    }
}
