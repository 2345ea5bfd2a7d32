// crates/flowwarden-core/src/interfaces/mod.rs
// ============================================================================
// Module: Flow Warden Interfaces
// Description: Backend-agnostic interfaces for storage, journaling, tools, and time.
// Purpose: Define the contract surfaces used by the Flow Warden runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how Flow Warden integrates with external systems without
//! embedding backend-specific details. Implementations must be deterministic
//! where the contract says so and fail closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::CachedToolResult;
use crate::core::Event;
use crate::core::EventKind;
use crate::core::FailureReason;
use crate::core::MemoryEntry;
use crate::core::StateFilter;
use crate::core::StepId;
use crate::core::TaskId;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::ToolDescriptor;
use crate::core::WorkflowId;
use crate::core::WorkflowState;

// ============================================================================
// SECTION: State Store
// ============================================================================

/// Workflow state store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested workflow does not exist.
    #[error("workflow state not found: {0}")]
    NotFound(String),
    /// Optimistic concurrency version mismatch.
    #[error("workflow state version conflict: {0}")]
    Conflict(String),
    /// Backend temporarily unavailable; callers may retry.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("state store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("state store invalid data: {0}")]
    Invalid(String),
    /// Store I/O error.
    #[error("state store io error: {0}")]
    Io(String),
}

/// Durable mapping of `(tenant_id, workflow_id)` to workflow state.
///
/// Writes are atomic per call. Reads are consistent with the most recent
/// committed write within the same tenant.
pub trait StateStore: Send + Sync {
    /// Saves workflow state, enforcing the optimistic version check.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the stored version does not
    /// match `state.version`, and other [`StoreError`] variants on backend
    /// failure.
    fn save(&self, state: &WorkflowState) -> Result<(), StoreError>;

    /// Loads workflow state by tenant and workflow identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails; a missing workflow is
    /// `Ok(None)`.
    fn load(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowState>, StoreError>;

    /// Lists workflow states for a tenant matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend query fails.
    fn list(&self, tenant_id: TenantId, filter: &StateFilter)
    -> Result<Vec<WorkflowState>, StoreError>;
}

// ============================================================================
// SECTION: Event Log
// ============================================================================

/// Event log errors.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Append failed; fatal to the current task attempt.
    #[error("event log append failed: {0}")]
    AppendFailed(String),
    /// Read failed.
    #[error("event log read failed: {0}")]
    ReadFailed(String),
    /// Stored events are corrupted.
    #[error("event log corruption: {0}")]
    Corrupt(String),
}

/// Append-only per-workflow event journal.
///
/// Appends for a given workflow are serialized and flushed durable before
/// the corresponding state save returns (write-ahead discipline).
pub trait EventLog: Send + Sync {
    /// Appends an event to the workflow's journal.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::AppendFailed`] when the event could not be
    /// made durable.
    fn append(&self, tenant_id: TenantId, event: &Event) -> Result<(), EventLogError>;

    /// Reads the workflow's journal in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] when reading fails.
    fn read(&self, tenant_id: TenantId, workflow_id: &WorkflowId)
    -> Result<Vec<Event>, EventLogError>;
}

// ============================================================================
// SECTION: Tool Result Cache
// ============================================================================

/// Tool result cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache backend failure.
    #[error("tool result cache error: {0}")]
    Backend(String),
    /// Attempted to cache a failed result.
    #[error("refusing to cache unsuccessful result for key {0}")]
    UnsuccessfulResult(String),
}

/// Idempotency-keyed cache of successful tool results.
pub trait ToolResultCache: Send + Sync {
    /// Returns the cached record for `key`, with `replayed` set true.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the backend fails.
    fn get(&self, key: &str) -> Result<Option<CachedToolResult>, CacheError>;

    /// Stores a successful result under its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnsuccessfulResult`] when `result.success` is
    /// false and [`CacheError::Backend`] on backend failure.
    fn set(&self, result: &CachedToolResult) -> Result<(), CacheError>;

    /// Returns true when a record exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the backend fails.
    fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the backend fails.
    fn clear(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the backend fails.
    fn clear_all(&self) -> Result<(), CacheError>;
}

// ============================================================================
// SECTION: Tool
// ============================================================================

/// Failure reported by a tool invocation or compensation hook.
#[derive(Debug, Error)]
pub enum ToolFailure {
    /// The tool reported an execution error.
    #[error("tool execution failed: {0}")]
    Execution(String),
    /// The tool does not support the requested compensation.
    #[error("tool does not support compensation")]
    CompensationUnsupported,
}

/// Read-only context supplied to a tool invocation.
///
/// # Invariants
/// - `context` is a snapshot; mutations by the tool are discarded.
#[derive(Debug, Clone)]
pub struct ToolInvocationContext {
    /// Tenant the invocation belongs to.
    pub tenant_id: TenantId,
    /// Workflow the invocation belongs to.
    pub workflow_id: WorkflowId,
    /// Task being executed.
    pub task_id: TaskId,
    /// Step within the task.
    pub step_id: StepId,
    /// 1-based attempt counter.
    pub attempt: u32,
    /// Snapshot of the workflow context map.
    pub context: Map<String, Value>,
}

/// Opaque tool behind the capability record.
///
/// The execution layer wraps `invoke` with idempotency, schema validation,
/// and timeout handling; tools must not implement those concerns themselves.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's capability descriptor.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Executes the tool over validated inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ToolFailure::Execution`] when the tool fails.
    async fn invoke(
        &self,
        inputs: &Value,
        ctx: &ToolInvocationContext,
    ) -> Result<Value, ToolFailure>;

    /// Undoes the side effects of a prior successful invocation.
    ///
    /// # Errors
    ///
    /// Returns [`ToolFailure::CompensationUnsupported`] unless the tool
    /// declares compensation, and [`ToolFailure::Execution`] when the
    /// compensation itself fails.
    async fn compensate(
        &self,
        _original_inputs: &Value,
        _result: &Value,
    ) -> Result<(), ToolFailure> {
        Err(ToolFailure::CompensationUnsupported)
    }
}

// ============================================================================
// SECTION: Restore Hook
// ============================================================================

/// Restore hook errors.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The application could not reapply the snapshot.
    #[error("snapshot restore failed: {0}")]
    Failed(String),
}

/// Application-supplied hook that reapplies a verified snapshot.
pub trait RestoreHook: Send + Sync {
    /// Restores the state encapsulated by `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError`] when the snapshot cannot be reapplied.
    fn restore(&self, snapshot: &MemoryEntry) -> Result<(), RestoreError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock seam; the engine never reads time directly.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

// ============================================================================
// SECTION: Telemetry Sink
// ============================================================================

/// Structured telemetry event emitted by the orchestrator.
///
/// # Invariants
/// - Payloads never embed tool inputs or outputs, only identifiers and
///   classifications.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A task attempt was dispatched.
    TaskDispatched {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// A task attempt failed and will be retried.
    TaskRetried {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Failure classification.
        reason: FailureReason,
        /// Backoff delay before the next attempt, in milliseconds.
        delay_ms: u64,
    },
    /// A gate (policy or CRV) reached a decision.
    GateDecision {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task identifier.
        task_id: TaskId,
        /// Gate label (`policy` or the CRV gate name).
        gate: String,
        /// Stable decision label.
        decision: String,
    },
    /// A compensation step finished.
    CompensationStep {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Task whose side effects were compensated.
        task_id: TaskId,
        /// Whether the step succeeded.
        succeeded: bool,
    },
    /// A lifecycle event was journaled.
    EventAppended {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Event kind appended.
        kind: EventKind,
    },
}

/// Observability seam; implementations must be non-blocking and must not
/// fail the caller.
pub trait TelemetrySink: Send + Sync {
    /// Records a telemetry event.
    fn record(&self, event: &TelemetryEvent);
}

/// Telemetry sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: &TelemetryEvent) {}
}
