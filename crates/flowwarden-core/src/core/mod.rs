// crates/flowwarden-core/src/core/mod.rs
// ============================================================================
// Module: Flow Warden Core Types
// Description: Canonical data model for workflows, tasks, and governance records.
// Purpose: Group the pure data types shared by every runtime component.
// Dependencies: crate::core submodules
// ============================================================================

//! ## Overview
//! The core module holds the pure data model: identifiers, timestamps,
//! canonical hashing, specifications, execution state, lifecycle events,
//! audit and memory records, principals, commits, and tool descriptors. No
//! I/O lives here; runtime behavior is implemented under
//! [`crate::runtime`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod commit;
pub mod events;
pub mod failure;
pub mod hashing;
pub mod identifiers;
pub mod memory;
pub mod principal;
pub mod provenance;
pub mod spec;
pub mod state;
pub mod time;
pub mod tool;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEntry;
pub use audit::AuditQuery;
pub use audit::GENESIS_HASH;
pub use commit::Commit;
pub use events::Event;
pub use events::EventKind;
pub use failure::FailureReason;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use identifiers::ActionId;
pub use identifiers::EventId;
pub use identifiers::MemoryEntryId;
pub use identifiers::PrincipalId;
pub use identifiers::StepId;
pub use identifiers::TaskId;
pub use identifiers::TenantId;
pub use identifiers::ToolId;
pub use identifiers::WorkflowId;
pub use memory::MemoryEntry;
pub use memory::MemoryEntryKind;
pub use memory::MemoryFilter;
pub use memory::MemoryWriteOptions;
pub use principal::DataZone;
pub use principal::Intent;
pub use principal::Permission;
pub use principal::PolicyAction;
pub use principal::Principal;
pub use principal::PrincipalKind;
pub use principal::RiskTier;
pub use provenance::Provenance;
pub use spec::CompensationSpec;
pub use spec::DependencySpec;
pub use spec::RetryPolicy;
pub use spec::SpecError;
pub use spec::TaskKind;
pub use spec::TaskSpec;
pub use spec::WorkflowSpec;
pub use state::ApprovalState;
pub use state::CompensationRecord;
pub use state::StateFilter;
pub use state::TaskPhase;
pub use state::TaskState;
pub use state::WorkflowState;
pub use state::WorkflowStatus;
pub use time::TimeError;
pub use time::Timestamp;
pub use tool::CachedToolResult;
pub use tool::CompensationMode;
pub use tool::IdempotencyStrategy;
pub use tool::ToolCompensation;
pub use tool::ToolDescriptor;
