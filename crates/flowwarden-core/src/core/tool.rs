// crates/flowwarden-core/src/core/tool.rs
// ============================================================================
// Module: Flow Warden Tool Model
// Description: Tool capability descriptors, idempotency strategies, and results.
// Purpose: Describe opaque tools so the execution layer can wrap them safely.
// Dependencies: serde, crate::core::identifiers
// ============================================================================

//! ## Overview
//! Tools are heterogeneous and loaded at configuration time; the execution
//! layer depends only on the capability record declared here, never on
//! tool-specific types. The descriptor names the schemas, side-effect flag,
//! idempotency strategy, and optional compensation capability.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::ToolId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Idempotency Strategy
// ============================================================================

/// How repeated invocations of a tool are made safe.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStrategy {
    /// Replay the cached result keyed by the idempotency key (default for
    /// side-effecting tools).
    CacheReplay,
    /// The tool is naturally safe to rerun.
    Natural,
    /// The caller supplies a unique request id per attempt.
    RequestId,
    /// No idempotency handling.
    None,
}

// ============================================================================
// SECTION: Compensation Capability
// ============================================================================

/// Compensation execution mode.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationMode {
    /// Compensation runs only when explicitly invoked by an operator.
    Manual,
    /// Compensation runs automatically during the saga pass.
    Automatic,
}

/// Compensation capability declared by a tool.
///
/// # Invariants
/// - `supported` gates whether the tool's `compensate` hook may be called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCompensation {
    /// Whether the tool supports compensation.
    pub supported: bool,
    /// Execution mode.
    pub mode: CompensationMode,
    /// Maximum compensation retries.
    #[serde(default)]
    pub max_retries: u32,
    /// Compensation timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// SECTION: Tool Descriptor
// ============================================================================

/// Capability record describing an opaque tool.
///
/// # Invariants
/// - Schemas, when present, are JSON Schema documents.
/// - Side-effecting tools default to the `cache_replay` strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool identifier.
    pub tool_id: ToolId,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Input JSON schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Output JSON schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Whether invocations mutate external systems.
    pub has_side_effects: bool,
    /// Idempotency strategy.
    pub idempotency: IdempotencyStrategy,
    /// Optional compensation capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<ToolCompensation>,
    /// Invocation timeout in milliseconds, overriding the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolDescriptor {
    /// Creates a descriptor for a pure tool with no schemas.
    #[must_use]
    pub fn pure(tool_id: impl Into<ToolId>, name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            name: name.into(),
            description: String::new(),
            input_schema: None,
            output_schema: None,
            has_side_effects: false,
            idempotency: IdempotencyStrategy::Natural,
            compensation: None,
            timeout_ms: None,
        }
    }

    /// Creates a descriptor for a side-effecting tool with cache replay.
    #[must_use]
    pub fn side_effecting(tool_id: impl Into<ToolId>, name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            name: name.into(),
            description: String::new(),
            input_schema: None,
            output_schema: None,
            has_side_effects: true,
            idempotency: IdempotencyStrategy::CacheReplay,
            compensation: None,
            timeout_ms: None,
        }
    }

    /// Returns true when the tool declares usable compensation.
    #[must_use]
    pub fn supports_compensation(&self) -> bool {
        self.compensation.as_ref().is_some_and(|capability| capability.supported)
    }
}

// ============================================================================
// SECTION: Cached Tool Result
// ============================================================================

/// Result record stored in the tool-result cache.
///
/// # Invariants
/// - Only successful invocations are stored.
/// - `replayed` is false at rest; the cache sets it true on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToolResult {
    /// Idempotency key the record is stored under.
    pub idempotency_key: String,
    /// Success flag (always true for stored records).
    pub success: bool,
    /// Result payload.
    pub data: Value,
    /// Error detail (unused for stored records, kept for wire parity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Cache write timestamp.
    pub cached_at: Timestamp,
    /// True when the record was returned from cache rather than computed.
    #[serde(default)]
    pub replayed: bool,
}
