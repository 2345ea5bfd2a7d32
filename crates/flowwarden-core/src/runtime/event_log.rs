// crates/flowwarden-core/src/runtime/event_log.rs
// ============================================================================
// Module: Flow Warden Event Logs
// Description: In-memory and filesystem JSON-Lines event journals.
// Purpose: Persist lifecycle events ahead of state writes, append-only.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The filesystem journal stores one directory per tenant and workflow with
//! an `events.log` file in JSON-Lines format. Appends are flushed and synced
//! before returning so a state save never outruns its journal entry.
//! Rotation only renames the closed segment (`events-<n>.log`) and opens a
//! fresh file; nothing is edited in place, and reads stitch segments in
//! order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::core::Event;
use crate::core::TenantId;
use crate::core::WorkflowId;
use crate::interfaces::EventLog;
use crate::interfaces::EventLogError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default rotation threshold per journal segment (bytes).
pub const DEFAULT_ROTATION_BYTES: u64 = 100 * 1024 * 1024;

/// Active journal filename within a workflow directory.
const ACTIVE_SEGMENT: &str = "events.log";

// ============================================================================
// SECTION: In-Memory Event Log
// ============================================================================

/// Key scoping a journal to its tenant.
type JournalKey = (TenantId, WorkflowId);

/// In-memory event log for tests and development.
///
/// # Invariants
/// - Events are stored in append order per workflow.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    /// Journals keyed by tenant and workflow.
    journals: Arc<Mutex<BTreeMap<JournalKey, Vec<Event>>>>,
}

impl InMemoryEventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, tenant_id: TenantId, event: &Event) -> Result<(), EventLogError> {
        let mut guard = self.journals.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry((tenant_id, event.workflow_id.clone())).or_default().push(event.clone());
        Ok(())
    }

    fn read(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<Event>, EventLogError> {
        let guard = self.journals.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&(tenant_id, workflow_id.clone())).cloned().unwrap_or_default())
    }
}

// ============================================================================
// SECTION: Filesystem Event Log
// ============================================================================

/// Filesystem JSON-Lines event log.
///
/// # Invariants
/// - Appends for a workflow are serialized through the interior mutex.
/// - Segments are only ever renamed, never rewritten.
#[derive(Debug)]
pub struct FsEventLog {
    /// Base directory holding per-tenant, per-workflow journals.
    base_dir: PathBuf,
    /// Rotation threshold in bytes.
    rotation_bytes: u64,
    /// Append serialization lock.
    append_lock: Mutex<()>,
}

impl FsEventLog {
    /// Creates a filesystem event log rooted at `base_dir` with the default
    /// rotation threshold.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_rotation(base_dir, DEFAULT_ROTATION_BYTES)
    }

    /// Creates a filesystem event log with an explicit rotation threshold.
    #[must_use]
    pub fn with_rotation(base_dir: impl Into<PathBuf>, rotation_bytes: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            rotation_bytes: rotation_bytes.max(1),
            append_lock: Mutex::new(()),
        }
    }

    /// Returns the journal directory for a workflow.
    fn workflow_dir(&self, tenant_id: TenantId, workflow_id: &WorkflowId) -> PathBuf {
        self.base_dir.join(tenant_id.to_string()).join(workflow_id.as_str())
    }

    /// Rotates the active segment when it exceeds the threshold.
    fn rotate_if_needed(&self, dir: &Path) -> Result<(), EventLogError> {
        let active = dir.join(ACTIVE_SEGMENT);
        let Ok(meta) = fs::metadata(&active) else {
            return Ok(());
        };
        if meta.len() < self.rotation_bytes {
            return Ok(());
        }
        let next_index = rotated_segments(dir)?.last().map_or(1, |(index, _)| index + 1);
        let rotated = dir.join(format!("events-{next_index}.log"));
        fs::rename(&active, &rotated)
            .map_err(|err| EventLogError::AppendFailed(format!("rotate failed: {err}")))?;
        Ok(())
    }
}

/// Lists rotated segments in a workflow directory, ordered by index.
fn rotated_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, EventLogError> {
    let mut segments = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(segments),
    };
    for entry in entries {
        let entry = entry.map_err(|err| EventLogError::ReadFailed(err.to_string()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(stem) = name.strip_prefix("events-")
            && let Some(index) = stem.strip_suffix(".log")
            && let Ok(index) = index.parse::<u64>()
        {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

/// Parses one JSON-Lines segment into events.
fn read_segment(path: &Path) -> Result<Vec<Event>, EventLogError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(EventLogError::ReadFailed(err.to_string())),
    };
    let mut events = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(line)
            .map_err(|err| EventLogError::Corrupt(format!("bad event line: {err}")))?;
        events.push(event);
    }
    Ok(events)
}

impl EventLog for FsEventLog {
    fn append(&self, tenant_id: TenantId, event: &Event) -> Result<(), EventLogError> {
        let _guard = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = self.workflow_dir(tenant_id, &event.workflow_id);
        fs::create_dir_all(&dir).map_err(|err| EventLogError::AppendFailed(err.to_string()))?;
        self.rotate_if_needed(&dir)?;
        let line = serde_json::to_string(event)
            .map_err(|err| EventLogError::AppendFailed(format!("serialize failed: {err}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(ACTIVE_SEGMENT))
            .map_err(|err| EventLogError::AppendFailed(err.to_string()))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all())
            .map_err(|err| EventLogError::AppendFailed(err.to_string()))?;
        Ok(())
    }

    fn read(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<Event>, EventLogError> {
        let dir = self.workflow_dir(tenant_id, workflow_id);
        let mut events = Vec::new();
        for (_, path) in rotated_segments(&dir)? {
            events.extend(read_segment(&path)?);
        }
        events.extend(read_segment(&dir.join(ACTIVE_SEGMENT))?);
        Ok(events)
    }
}
