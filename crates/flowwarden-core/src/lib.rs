// crates/flowwarden-core/src/lib.rs
// ============================================================================
// Module: Flow Warden Core Library
// Description: Public API surface for the Flow Warden orchestration core.
// Purpose: Expose core types, interfaces, and runtime components.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Flow Warden core provides governed, durable workflow orchestration:
//! a DAG scheduler with policy gating, CRV commit validation, hash-chained
//! auditing, idempotent tool execution with saga compensation, and verified
//! snapshots for rollback. It is backend-agnostic and integrates through
//! explicit interfaces rather than embedding into agent frameworks.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CacheError;
pub use interfaces::Clock;
pub use interfaces::EventLog;
pub use interfaces::EventLogError;
pub use interfaces::NoopTelemetry;
pub use interfaces::RestoreError;
pub use interfaces::RestoreHook;
pub use interfaces::StateStore;
pub use interfaces::StoreError;
pub use interfaces::TelemetryEvent;
pub use interfaces::TelemetrySink;
pub use interfaces::Tool;
pub use interfaces::ToolFailure;
pub use interfaces::ToolInvocationContext;
pub use interfaces::ToolResultCache;
pub use runtime::AuditError;
pub use runtime::AuditLog;
pub use runtime::CrvGate;
pub use runtime::FsEventLog;
pub use runtime::GateChain;
pub use runtime::GateError;
pub use runtime::GateReport;
pub use runtime::GoalGuard;
pub use runtime::InMemoryEventLog;
pub use runtime::InMemoryStateStore;
pub use runtime::InMemoryToolResultCache;
pub use runtime::ManualClock;
pub use runtime::MemoryError;
pub use runtime::MemoryStore;
pub use runtime::Orchestrator;
pub use runtime::OrchestratorBuilder;
pub use runtime::OrchestratorConfig;
pub use runtime::OrchestratorError;
pub use runtime::PolicyConfig;
pub use runtime::PolicyOutcome;
pub use runtime::ReflexionEngine;
pub use runtime::SystemClock;
pub use runtime::ToolError;
pub use runtime::ToolExecutionLayer;
pub use runtime::ToolExecutionRequest;
pub use runtime::ToolRegistry;
pub use runtime::ValidationFailureCode;
pub use runtime::Validator;
