// crates/flowwarden-core/src/runtime/tool_exec.rs
// ============================================================================
// Module: Flow Warden Tool Execution Layer
// Description: Idempotency, schema validation, timeout, and compensation wrapping.
// Purpose: Make arbitrary opaque tools safe to invoke and safe to retry.
// Dependencies: crate::{core, interfaces}, jsonschema, tokio
// ============================================================================

//! ## Overview
//! Every invocation derives a 256-bit idempotency key from the canonical
//! form of `(task_id, step_id, tool_id, args)`. Side-effecting tools replay
//! cached results instead of re-running; inputs and outputs are validated
//! against the tool's declared schemas; invocations run under a cooperative
//! timeout. Failures are never cached.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

use crate::core::CachedToolResult;
use crate::core::CompensationRecord;
use crate::core::FailureReason;
use crate::core::IdempotencyStrategy;
use crate::core::StepId;
use crate::core::TaskId;
use crate::core::ToolId;
use crate::core::hashing::invocation_key;
use crate::interfaces::CacheError;
use crate::interfaces::Clock;
use crate::interfaces::Tool;
use crate::interfaces::ToolInvocationContext;
use crate::interfaces::ToolResultCache;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default tool invocation timeout in milliseconds.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// Step identifier used for compensation invocations.
pub const COMPENSATION_STEP_ID: &str = "compensate";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under the identifier.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// Inputs failed the declared input schema.
    #[error("input schema violation: {0}")]
    InputSchemaViolation(String),
    /// Output failed the declared output schema.
    #[error("output schema violation: {0}")]
    OutputSchemaViolation(String),
    /// The invocation exceeded its timeout.
    #[error("tool invocation timed out after {timeout_ms} ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
    /// The invocation was cancelled cooperatively.
    #[error("tool invocation cancelled")]
    Cancelled,
    /// The tool reported an execution failure.
    #[error("tool execution failed: {0}")]
    Execution(String),
    /// A declared schema failed to compile.
    #[error("tool schema failed to compile: {0}")]
    SchemaCompile(String),
    /// Idempotency key derivation failed.
    #[error("idempotency key derivation failed: {0}")]
    Hashing(String),
    /// The result cache failed.
    #[error("tool result cache failed: {0}")]
    Cache(#[from] CacheError),
}

impl ToolError {
    /// Returns the matching failure taxonomy entry.
    #[must_use]
    pub const fn failure_reason(&self) -> FailureReason {
        match self {
            Self::InputSchemaViolation(_) => FailureReason::InputSchemaViolation,
            Self::OutputSchemaViolation(_) => FailureReason::OutputSchemaViolation,
            Self::Timeout {
                ..
            } => FailureReason::Timeout,
            Self::Cancelled => FailureReason::Cancelled,
            Self::NotFound(_)
            | Self::Execution(_)
            | Self::SchemaCompile(_)
            | Self::Hashing(_)
            | Self::Cache(_) => FailureReason::ToolError,
        }
    }
}

// ============================================================================
// SECTION: Tool Registry
// ============================================================================

/// Registry mapping tool identifiers to capability records.
///
/// # Invariants
/// - Later registrations under the same identifier overwrite earlier ones.
#[derive(Default)]
pub struct ToolRegistry {
    /// Registered tools.
    tools: Mutex<BTreeMap<ToolId, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its descriptor identifier.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let tool_id = tool.descriptor().tool_id.clone();
        let mut guard = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        guard.insert(tool_id, tool);
    }

    /// Resolves a tool by identifier.
    #[must_use]
    pub fn get(&self, tool_id: &ToolId) -> Option<Arc<dyn Tool>> {
        let guard = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(tool_id).cloned()
    }

    /// Returns true when a tool is registered under `tool_id`.
    #[must_use]
    pub fn contains(&self, tool_id: &ToolId) -> bool {
        let guard = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        guard.contains_key(tool_id)
    }
}

// ============================================================================
// SECTION: Requests and Outcomes
// ============================================================================

/// One tool invocation request.
#[derive(Debug, Clone)]
pub struct ToolExecutionRequest {
    /// Tool to invoke.
    pub tool_id: ToolId,
    /// Invocation inputs.
    pub inputs: Value,
    /// Invocation context (identifiers, attempt, workflow context snapshot).
    pub ctx: ToolInvocationContext,
    /// Timeout override from the task specification.
    pub timeout_ms: Option<u64>,
    /// Caller-supplied request id for the `request_id` strategy.
    pub request_id: Option<String>,
    /// Explicit idempotency key overriding derivation.
    pub explicit_key: Option<String>,
    /// Cooperative cancellation signal.
    pub cancel: Option<watch::Receiver<bool>>,
}

/// Outcome of a wrapped tool invocation.
#[derive(Debug, Clone)]
pub struct ToolExecutionOutcome {
    /// Validated output payload.
    pub data: Value,
    /// Idempotency key of the invocation.
    pub idempotency_key: String,
    /// True when the result was replayed from cache.
    pub replayed: bool,
    /// True when the tool declares usable compensation.
    pub compensation_available: bool,
}

// ============================================================================
// SECTION: Execution Layer
// ============================================================================

/// Wrapper enforcing idempotency, schema validation, and timeouts.
///
/// # Invariants
/// - Only successful side-effecting results enter the cache.
/// - Equal idempotency keys return equal results without re-invoking the tool.
pub struct ToolExecutionLayer {
    /// Tool registry.
    registry: Arc<ToolRegistry>,
    /// Optional idempotency cache.
    cache: Option<Arc<dyn ToolResultCache>>,
    /// Clock for cache record timestamps.
    clock: Arc<dyn Clock>,
    /// Default invocation timeout in milliseconds.
    default_timeout_ms: u64,
}

impl ToolExecutionLayer {
    /// Creates an execution layer over a registry and optional cache.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Option<Arc<dyn ToolResultCache>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            cache,
            clock,
            default_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
        }
    }

    /// Overrides the default invocation timeout.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms.max(1);
        self
    }

    /// Derives the idempotency key for an invocation; see
    /// [`crate::core::hashing::invocation_key`] for the tuple contract.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Hashing`] when canonicalization fails.
    pub fn idempotency_key(
        task_id: &TaskId,
        step_id: &StepId,
        tool_id: &ToolId,
        args: &Value,
        request_id: Option<&str>,
    ) -> Result<String, ToolError> {
        invocation_key(task_id, step_id, tool_id, args, request_id)
            .map_err(|err| ToolError::Hashing(err.to_string()))
    }

    /// Executes a tool invocation under the full wrapping algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] for unknown tools, schema violations, timeout,
    /// cancellation, execution failure, or cache failure.
    pub async fn execute(
        &self,
        request: ToolExecutionRequest,
    ) -> Result<ToolExecutionOutcome, ToolError> {
        let tool = self
            .registry
            .get(&request.tool_id)
            .ok_or_else(|| ToolError::NotFound(request.tool_id.to_string()))?;
        let descriptor = tool.descriptor().clone();

        let key = match &request.explicit_key {
            Some(key) => key.clone(),
            None => Self::idempotency_key(
                &request.ctx.task_id,
                &request.ctx.step_id,
                &request.tool_id,
                &request.inputs,
                request.request_id.as_deref(),
            )?,
        };

        let cache_eligible = descriptor.has_side_effects
            && matches!(
                descriptor.idempotency,
                IdempotencyStrategy::CacheReplay | IdempotencyStrategy::RequestId
            );

        if cache_eligible
            && let Some(cache) = &self.cache
            && let Some(record) = cache.get(&key)?
        {
            return Ok(ToolExecutionOutcome {
                data: record.data,
                idempotency_key: key,
                replayed: true,
                compensation_available: false,
            });
        }

        if let Some(schema) = &descriptor.input_schema {
            validate_against_schema(schema, &request.inputs)
                .map_err(ToolError::InputSchemaViolation)?;
        }

        let timeout_ms = request
            .timeout_ms
            .or(descriptor.timeout_ms)
            .unwrap_or(self.default_timeout_ms)
            .max(1);
        let data =
            invoke_with_deadline(tool.as_ref(), &request, timeout_ms).await?;

        if let Some(schema) = &descriptor.output_schema {
            validate_against_schema(schema, &data).map_err(ToolError::OutputSchemaViolation)?;
        }

        if cache_eligible && let Some(cache) = &self.cache {
            cache.set(&CachedToolResult {
                idempotency_key: key.clone(),
                success: true,
                data: data.clone(),
                error: None,
                metadata: Map::new(),
                cached_at: self.clock.now(),
                replayed: false,
            })?;
        }

        Ok(ToolExecutionOutcome {
            data,
            idempotency_key: key,
            replayed: false,
            compensation_available: descriptor.supports_compensation(),
        })
    }

    /// Returns true when the registered tool declares usable compensation.
    #[must_use]
    pub fn registry_supports_compensation(&self, tool_id: &ToolId) -> bool {
        self.registry.get(tool_id).is_some_and(|tool| tool.descriptor().supports_compensation())
    }

    /// Executes one compensation record through the layer.
    ///
    /// A record with null `args` whose tool declares a compensation hook runs
    /// the hook directly; otherwise the compensation tool is invoked like any
    /// other tool with `{args, original_inputs, result}` inputs, which keeps
    /// idempotency in force for compensations too.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the compensation tool is unknown or fails.
    pub async fn compensate(
        &self,
        record: &CompensationRecord,
        ctx: ToolInvocationContext,
    ) -> Result<(), ToolError> {
        let tool = self
            .registry
            .get(&record.tool)
            .ok_or_else(|| ToolError::NotFound(record.tool.to_string()))?;
        let descriptor = tool.descriptor().clone();

        if record.args.is_null() && descriptor.supports_compensation() {
            let timeout_ms = descriptor
                .compensation
                .as_ref()
                .and_then(|capability| capability.timeout_ms)
                .unwrap_or(self.default_timeout_ms)
                .max(1);
            let hook = tool.compensate(&record.original_inputs, &record.result);
            return match tokio::time::timeout(Duration::from_millis(timeout_ms), hook).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(ToolError::Execution(err.to_string())),
                Err(_) => Err(ToolError::Timeout {
                    timeout_ms,
                }),
            };
        }

        let inputs = json!({
            "args": record.args,
            "original_inputs": record.original_inputs,
            "result": record.result,
        });
        let request = ToolExecutionRequest {
            tool_id: record.tool.clone(),
            inputs,
            ctx: ToolInvocationContext {
                step_id: StepId::new(COMPENSATION_STEP_ID),
                ..ctx
            },
            timeout_ms: None,
            request_id: None,
            explicit_key: None,
            cancel: None,
        };
        self.execute(request).await.map(drop)
    }
}

// ============================================================================
// SECTION: Invocation Helpers
// ============================================================================

/// Runs the tool under its timeout and optional cancellation signal.
async fn invoke_with_deadline(
    tool: &dyn Tool,
    request: &ToolExecutionRequest,
    timeout_ms: u64,
) -> Result<Value, ToolError> {
    let invocation = tool.invoke(&request.inputs, &request.ctx);
    let deadline = Duration::from_millis(timeout_ms);
    match request.cancel.clone() {
        Some(cancel) => {
            tokio::select! {
                outcome = tokio::time::timeout(deadline, invocation) => match outcome {
                    Ok(Ok(data)) => Ok(data),
                    Ok(Err(err)) => Err(ToolError::Execution(err.to_string())),
                    Err(_) => Err(ToolError::Timeout { timeout_ms }),
                },
                () = wait_cancelled(cancel) => Err(ToolError::Cancelled),
            }
        }
        None => match tokio::time::timeout(deadline, invocation).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(err)) => Err(ToolError::Execution(err.to_string())),
            Err(_) => Err(ToolError::Timeout {
                timeout_ms,
            }),
        },
    }
}

/// Completes when the cancellation signal fires; pends forever when the
/// sender is gone (a dropped sender must not cancel in-flight work).
async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Validates a value against a JSON schema, returning the failure detail.
fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), String> {
    let compiled = jsonschema::validator_for(schema).map_err(|err| err.to_string())?;
    compiled.validate(value).map_err(|err| err.to_string())
}
