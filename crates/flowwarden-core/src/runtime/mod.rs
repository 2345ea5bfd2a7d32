// crates/flowwarden-core/src/runtime/mod.rs
// ============================================================================
// Module: Flow Warden Runtime
// Description: Orchestration engine, gates, logs, stores, and reflexion.
// Purpose: Execute workflows against the interfaces with the six invariants enforced.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the engine behavior over the pure data model:
//! the orchestrator is the single canonical execution path, and every
//! external surface must drive workflows through it to preserve the
//! durability, idempotency, and audit guarantees.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit_log;
pub mod cache;
pub mod clock;
pub mod crv;
pub mod event_log;
pub mod memory_store;
pub mod orchestrator;
pub mod policy;
pub mod projector;
pub mod reflexion;
pub mod store;
pub mod tool_exec;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit_log::AuditError;
pub use audit_log::AuditLog;
pub use cache::InMemoryToolResultCache;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use crv::CrvGate;
pub use crv::GateChain;
pub use crv::GateError;
pub use crv::GateReport;
pub use crv::ValidationFailureCode;
pub use crv::Validator;
pub use event_log::DEFAULT_ROTATION_BYTES;
pub use event_log::FsEventLog;
pub use event_log::InMemoryEventLog;
pub use memory_store::MemoryError;
pub use memory_store::MemoryStore;
pub use orchestrator::DEFAULT_MAX_CONCURRENT_TASKS;
pub use orchestrator::Orchestrator;
pub use orchestrator::OrchestratorBuilder;
pub use orchestrator::OrchestratorConfig;
pub use orchestrator::OrchestratorError;
pub use policy::ApprovalStatus;
pub use policy::DEFAULT_CRITICAL_QUORUM;
pub use policy::DEFAULT_TOKEN_TTL_SECS;
pub use policy::GateState;
pub use policy::GoalGuard;
pub use policy::PolicyConfig;
pub use policy::PolicyDenyReason;
pub use policy::PolicyGateError;
pub use policy::PolicyOutcome;
pub use projector::pending_approvals;
pub use projector::project_state;
pub use reflexion::FailureReport;
pub use reflexion::MAX_FIX_ATTEMPTS;
pub use reflexion::Postmortem;
pub use reflexion::ProposedFix;
pub use reflexion::ReflexionEngine;
pub use reflexion::ReflexionError;
pub use reflexion::SandboxConfig;
pub use reflexion::SandboxReport;
pub use store::InMemoryStateStore;
pub use tool_exec::COMPENSATION_STEP_ID;
pub use tool_exec::DEFAULT_TOOL_TIMEOUT_MS;
pub use tool_exec::ToolError;
pub use tool_exec::ToolExecutionLayer;
pub use tool_exec::ToolExecutionOutcome;
pub use tool_exec::ToolExecutionRequest;
pub use tool_exec::ToolRegistry;
