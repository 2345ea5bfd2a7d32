// crates/flowwarden-core/src/core/audit.rs
// ============================================================================
// Module: Flow Warden Audit Records
// Description: Hash-chained audit entry types and content hashing.
// Purpose: Provide tamper-evident records for every state transition and decision.
// Dependencies: serde, crate::core::{hashing, provenance, time}
// ============================================================================

//! ## Overview
//! Each audit entry hashes its own canonical form (minus the hash field) and
//! carries the previous entry's content hash, forming a verifiable chain back
//! to a fixed genesis value. Canonical serialization is RFC 8785 JSON with
//! RFC 3339 nanosecond timestamps, so verification is byte-stable across
//! processes and restarts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashAlgorithm;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::provenance::Provenance;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fixed `previous_hash` of the first chain entry (64 zero hex digits).
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// SECTION: Audit Entry
// ============================================================================

/// Tamper-evident audit entry.
///
/// # Invariants
/// - `content_hash` equals the hash of the canonical entry minus itself.
/// - `previous_hash` equals the prior entry's `content_hash`, or
///   [`GENESIS_HASH`] for sequence 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number within the log.
    pub seq: u64,
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Acting identity recorded for the entry.
    pub actor: String,
    /// Action name recorded for the entry.
    pub action: String,
    /// State before the action.
    pub state_before: Value,
    /// State after the action.
    pub state_after: Value,
    /// Origin of the entry.
    pub provenance: Provenance,
    /// Content hash of the previous entry.
    pub previous_hash: String,
    /// Content hash of this entry.
    pub content_hash: String,
}

/// Borrowed view of an entry with the `content_hash` field removed.
///
/// Field names and order mirror [`AuditEntry`]; RFC 8785 sorts keys, so only
/// the names must match for the digest to be canonical.
#[derive(Serialize)]
struct AuditEntryDigest<'a> {
    /// Sequence number being hashed.
    seq: u64,
    /// Timestamp being hashed.
    timestamp: &'a Timestamp,
    /// Actor being hashed.
    actor: &'a str,
    /// Action being hashed.
    action: &'a str,
    /// Pre-state being hashed.
    state_before: &'a Value,
    /// Post-state being hashed.
    state_after: &'a Value,
    /// Provenance being hashed.
    provenance: &'a Provenance,
    /// Chain link being hashed.
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Computes the content hash of the entry's canonical form minus
    /// `content_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn compute_content_hash(&self, algorithm: HashAlgorithm) -> Result<String, HashError> {
        let digest = hash_canonical_json(
            algorithm,
            &AuditEntryDigest {
                seq: self.seq,
                timestamp: &self.timestamp,
                actor: &self.actor,
                action: &self.action,
                state_before: &self.state_before,
                state_after: &self.state_after,
                provenance: &self.provenance,
                previous_hash: &self.previous_hash,
            },
        )?;
        Ok(digest.value)
    }

    /// Returns true when the stored `content_hash` matches a recomputation.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn verify_content_hash(&self, algorithm: HashAlgorithm) -> Result<bool, HashError> {
        Ok(self.compute_content_hash(algorithm)? == self.content_hash)
    }
}

// ============================================================================
// SECTION: Audit Query
// ============================================================================

/// Filter for audit log queries.
///
/// # Invariants
/// - Absent fields match everything; present fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Match entries recorded by this actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Match entries recording this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Match entries whose provenance names this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Match entries whose provenance names this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Match entries whose provenance links this source event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    /// Match entries at or after this timestamp (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    /// Match entries at or before this timestamp (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
}

impl AuditQuery {
    /// Returns true when `entry` matches every present filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor) = &self.actor
            && entry.actor != *actor
        {
            return false;
        }
        if let Some(action) = &self.action
            && entry.action != *action
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
        if let Some(source) = &self.source_event_id {
            let linked = entry
                .provenance
                .source_event_id
                .as_ref()
                .is_some_and(|event| event.as_str() == source.as_str());
            if !linked {
                return false;
            }
        }
        if let Some(from) = &self.from
            && entry.timestamp < *from
        {
            return false;
        }
        if let Some(until) = &self.until
            && entry.timestamp > *until
        {
            return false;
        }
        true
    }
}
