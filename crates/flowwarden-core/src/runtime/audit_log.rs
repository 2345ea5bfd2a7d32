// crates/flowwarden-core/src/runtime/audit_log.rs
// ============================================================================
// Module: Flow Warden Audit Log
// Description: Append-only, hash-chained audit log with integrity verification.
// Purpose: Record every state transition and gate decision tamper-evidently.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! Appends are globally serialized to preserve the hash chain. The log can
//! run purely in memory or mirror every entry to a JSON-Lines file; loading a
//! persisted log verifies the full chain and fails closed, which is what
//! makes the orchestrator refuse to start against a tampered log.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde_json::Value;
use thiserror::Error;

use crate::core::AuditEntry;
use crate::core::AuditQuery;
use crate::core::GENESIS_HASH;
use crate::core::HashAlgorithm;
use crate::core::Provenance;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Audit log errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The chain failed integrity verification.
    #[error("audit log integrity failure; invalid sequences: {0:?}")]
    IntegrityFailed(Vec<u64>),
    /// The requested entry does not exist.
    #[error("audit entry not found: {0}")]
    NotFound(u64),
    /// Canonical hashing failed.
    #[error("audit hashing failed: {0}")]
    Hashing(String),
    /// Persistence I/O failed.
    #[error("audit log io error: {0}")]
    Io(String),
    /// Stored entries could not be parsed.
    #[error("audit log corruption: {0}")]
    Corrupt(String),
}

// ============================================================================
// SECTION: Audit Log
// ============================================================================

/// Interior state guarded by the append lock.
#[derive(Debug, Default)]
struct AuditLogInner {
    /// Chain entries in sequence order.
    entries: Vec<AuditEntry>,
    /// Optional JSON-Lines mirror.
    sink: Option<PathBuf>,
}

/// Append-only, hash-chained audit log.
///
/// # Invariants
/// - `entries[n].previous_hash == entries[n - 1].content_hash` for `n > 0`.
/// - `entries[0].previous_hash == GENESIS_HASH`.
/// - Appends are globally serialized.
pub struct AuditLog {
    /// Hash algorithm for content hashes.
    algorithm: HashAlgorithm,
    /// Clock supplying entry timestamps.
    clock: Arc<dyn Clock>,
    /// Guarded chain state.
    inner: Mutex<AuditLogInner>,
}

impl AuditLog {
    /// Creates an in-memory audit log.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            algorithm: DEFAULT_HASH_ALGORITHM,
            clock,
            inner: Mutex::new(AuditLogInner::default()),
        }
    }

    /// Opens a file-backed audit log, verifying any persisted chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::IntegrityFailed`] when the persisted chain does
    /// not verify, [`AuditError::Corrupt`] when entries cannot be parsed, and
    /// [`AuditError::Io`] on filesystem failure.
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let path = path.into();
        let entries = load_entries(&path)?;
        let log = Self {
            algorithm: DEFAULT_HASH_ALGORITHM,
            clock,
            inner: Mutex::new(AuditLogInner {
                entries,
                sink: Some(path),
            }),
        };
        let (valid, invalid) = log.verify_all()?;
        if !valid {
            return Err(AuditError::IntegrityFailed(invalid));
        }
        Ok(log)
    }

    /// Appends an entry, extending the hash chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Hashing`] when canonicalization fails and
    /// [`AuditError::Io`] when the persisted mirror cannot be written.
    pub fn append(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        state_before: Value,
        state_after: Value,
        provenance: Provenance,
    ) -> Result<AuditEntry, AuditError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = guard.entries.len() as u64;
        let previous_hash = guard
            .entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |entry| entry.content_hash.clone());
        let mut entry = AuditEntry {
            seq,
            timestamp: self.clock.now(),
            actor: actor.into(),
            action: action.into(),
            state_before,
            state_after,
            provenance,
            previous_hash,
            content_hash: String::new(),
        };
        entry.content_hash = entry
            .compute_content_hash(self.algorithm)
            .map_err(|err| AuditError::Hashing(err.to_string()))?;
        if let Some(path) = guard.sink.clone() {
            persist_entry(&path, &entry)?;
        }
        guard.entries.push(entry.clone());
        Ok(entry)
    }

    /// Verifies one entry's content hash and chain link.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::NotFound`] for an unknown sequence and
    /// [`AuditError::Hashing`] when recomputation fails.
    pub fn verify_entry(&self, seq: u64) -> Result<bool, AuditError> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let index = usize::try_from(seq).map_err(|_| AuditError::NotFound(seq))?;
        let entry = guard.entries.get(index).ok_or(AuditError::NotFound(seq))?;
        let content_ok = entry
            .verify_content_hash(self.algorithm)
            .map_err(|err| AuditError::Hashing(err.to_string()))?;
        let link_ok = if index == 0 {
            entry.previous_hash == GENESIS_HASH
        } else {
            guard
                .entries
                .get(index - 1)
                .is_some_and(|previous| entry.previous_hash == previous.content_hash)
        };
        Ok(content_ok && link_ok && entry.seq == seq)
    }

    /// Walks the full chain, returning validity and invalid sequences.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Hashing`] when recomputation fails.
    pub fn verify_all(&self) -> Result<(bool, Vec<u64>), AuditError> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut invalid = Vec::new();
        let mut expected_previous = GENESIS_HASH.to_string();
        for (index, entry) in guard.entries.iter().enumerate() {
            let content_ok = entry
                .verify_content_hash(self.algorithm)
                .map_err(|err| AuditError::Hashing(err.to_string()))?;
            let link_ok = entry.previous_hash == expected_previous;
            let seq_ok = entry.seq == index as u64;
            if !(content_ok && link_ok && seq_ok) {
                invalid.push(entry.seq);
            }
            expected_previous = entry.content_hash.clone();
        }
        Ok((invalid.is_empty(), invalid))
    }

    /// Returns entries matching `query`, in sequence order.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entries.iter().filter(|entry| query.matches(entry)).cloned().collect()
    }

    /// Returns a copy of every entry in sequence order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entries.clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entries.len()
    }

    /// Returns true when the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Persistence Helpers
// ============================================================================

/// Loads persisted entries from a JSON-Lines file.
fn load_entries(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AuditError::Io(err.to_string())),
    };
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(line)
            .map_err(|err| AuditError::Corrupt(format!("bad audit line: {err}")))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Appends one entry to the JSON-Lines mirror, synced before returning.
fn persist_entry(path: &Path, entry: &AuditEntry) -> Result<(), AuditError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| AuditError::Io(err.to_string()))?;
    }
    let line =
        serde_json::to_string(entry).map_err(|err| AuditError::Io(format!("serialize: {err}")))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| AuditError::Io(err.to_string()))?;
    file.write_all(line.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all())
        .map_err(|err| AuditError::Io(err.to_string()))?;
    Ok(())
}
