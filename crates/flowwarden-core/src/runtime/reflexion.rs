// crates/flowwarden-core/src/runtime/reflexion.rs
// ============================================================================
// Module: Flow Warden Reflexion Engine
// Description: Failure postmortems with bounded, sandbox-validated fixes.
// Purpose: Propose at most one vetted remediation per failure, capped per task.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Reflexion analyzes a task failure, classifies it against the failure
//! taxonomy, and proposes at most one bounded fix: an alternate tool from
//! the task's allowlist, a CRV confidence-threshold adjustment inside hard
//! bounds, or a dependency-preserving step reordering. A fix is promoted
//! only after a process-internal sandbox run passes the policy gate, the
//! CRV gate, and the chaos checks (double-apply idempotency, rollback
//! safety, boundary conditions). Three fix attempts per task, then the
//! engine refuses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::Commit;
use crate::core::FailureReason;
use crate::core::MemoryWriteOptions;
use crate::core::PolicyAction;
use crate::core::Principal;
use crate::core::Provenance;
use crate::core::TaskId;
use crate::core::ToolId;
use crate::core::WorkflowId;
use crate::core::spec::WorkflowSpec;
use crate::interfaces::Clock;
use crate::interfaces::Tool;
use crate::interfaces::ToolInvocationContext;
use crate::runtime::audit_log::AuditLog;
use crate::runtime::cache::InMemoryToolResultCache;
use crate::runtime::crv::GateChain;
use crate::runtime::memory_store::MemoryStore;
use crate::runtime::policy::GoalGuard;
use crate::runtime::policy::PolicyOutcome;
use crate::runtime::tool_exec::ToolExecutionLayer;
use crate::runtime::tool_exec::ToolExecutionRequest;
use crate::runtime::tool_exec::ToolRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum fix attempts per task before the engine refuses.
pub const MAX_FIX_ATTEMPTS: u32 = 3;

/// Hard lower bound for a proposed CRV confidence threshold.
pub const MIN_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Hard upper bound for a proposed CRV confidence threshold.
pub const MAX_CONFIDENCE_THRESHOLD: f64 = 1.0;

/// Maximum relative change allowed against the original threshold.
pub const MAX_RELATIVE_THRESHOLD_CHANGE: f64 = 0.2;

// ============================================================================
// SECTION: Reports and Fixes
// ============================================================================

/// Failure handed to the engine for analysis.
#[derive(Debug, Clone)]
pub struct FailureReport {
    /// Workflow the failure occurred in.
    pub workflow_id: WorkflowId,
    /// Failing task.
    pub task_id: TaskId,
    /// Taxonomy classification of the failure.
    pub error: FailureReason,
    /// Human-readable failure detail.
    pub detail: String,
    /// Free-form failure context (for example the active CRV threshold).
    pub context: Value,
}

/// Bounded fix proposals.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposedFix {
    /// Swap the task's tool for another entry of its allowlist.
    AlternateTool {
        /// Task whose tool is swapped.
        task_id: TaskId,
        /// Replacement tool.
        tool: ToolId,
    },
    /// Adjust a CRV confidence threshold within hard and relative bounds.
    CrvThreshold {
        /// Original threshold.
        original: f64,
        /// Proposed threshold.
        proposed: f64,
    },
    /// Reorder workflow steps, preserving every dependency edge.
    StepReordering {
        /// Proposed complete task order.
        order: Vec<TaskId>,
    },
}

/// Structured postmortem for one failure.
#[derive(Debug, Clone)]
pub struct Postmortem {
    /// Workflow the failure occurred in.
    pub workflow_id: WorkflowId,
    /// Failing task.
    pub task_id: TaskId,
    /// Taxonomy classification.
    pub classification: FailureReason,
    /// Narrative summary.
    pub summary: String,
    /// At most one bounded fix.
    pub proposed_fix: Option<ProposedFix>,
}

/// Sandbox validation outcome for a proposed fix.
#[derive(Debug, Clone)]
pub struct SandboxReport {
    /// Policy gate allowed the fix.
    pub policy_allowed: bool,
    /// CRV accepted the sandbox result.
    pub crv_passed: bool,
    /// Named chaos checks and their outcomes.
    pub chaos_checks: Vec<(String, bool)>,
}

impl SandboxReport {
    /// Returns true when every gate and chaos check passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.policy_allowed && self.crv_passed && self.chaos_checks.iter().all(|(_, ok)| *ok)
    }
}

/// Reflexion errors.
#[derive(Debug, Error)]
pub enum ReflexionError {
    /// The per-task fix budget is exhausted.
    #[error("fix attempts exhausted for task: {0}")]
    AttemptsExhausted(String),
    /// The proposed fix violates its bounds.
    #[error("invalid fix: {0}")]
    InvalidFix(String),
    /// The sandbox could not be assembled.
    #[error("sandbox failure: {0}")]
    Sandbox(String),
}

// ============================================================================
// SECTION: Sandbox Configuration
// ============================================================================

/// Process-internal sandbox inputs supplied by the host.
pub struct SandboxConfig {
    /// Principal the sandboxed run executes as.
    pub principal: Principal,
    /// Action evaluated by the sandbox policy gate.
    pub action: PolicyAction,
    /// CRV chain the sandbox result must pass.
    pub gates: Option<Arc<GateChain>>,
    /// Probe tool exercised by the chaos checks.
    pub probe_tool: Arc<dyn Tool>,
    /// Inputs for the probe tool.
    pub probe_inputs: Value,
    /// Clock for sandbox records.
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// SECTION: Reflexion Engine
// ============================================================================

/// Bounded-fix reflexion engine.
///
/// # Invariants
/// - At most [`MAX_FIX_ATTEMPTS`] promotions are attempted per task.
#[derive(Default)]
pub struct ReflexionEngine {
    /// Fix attempts recorded per task.
    attempts: Mutex<BTreeMap<TaskId, u32>>,
}

impl ReflexionEngine {
    /// Creates an engine with a fresh attempt ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces a postmortem with at most one bounded fix proposal.
    #[must_use]
    pub fn analyze(&self, spec: &WorkflowSpec, report: &FailureReport) -> Postmortem {
        let proposed_fix = match report.error {
            FailureReason::ToolError | FailureReason::Timeout => {
                propose_alternate_tool(spec, &report.task_id)
            }
            FailureReason::CrvBlocked => propose_threshold_adjustment(&report.context),
            _ => None,
        };
        Postmortem {
            workflow_id: report.workflow_id.clone(),
            task_id: report.task_id.clone(),
            classification: report.error,
            summary: format!(
                "task {} failed with {}: {}",
                report.task_id,
                report.error.as_str(),
                report.detail
            ),
            proposed_fix,
        }
    }

    /// Checks a fix against its hard bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ReflexionError::InvalidFix`] describing the violation.
    pub fn validate_fix(&self, spec: &WorkflowSpec, fix: &ProposedFix) -> Result<(), ReflexionError> {
        match fix {
            ProposedFix::AlternateTool {
                task_id,
                tool,
            } => {
                let task = spec.task(task_id).ok_or_else(|| {
                    ReflexionError::InvalidFix(format!("unknown task {task_id}"))
                })?;
                let allowed = task
                    .allowed_tools
                    .as_ref()
                    .is_some_and(|allowed| allowed.contains(tool));
                if !allowed {
                    return Err(ReflexionError::InvalidFix(format!(
                        "tool {tool} is not in the allowlist of task {task_id}"
                    )));
                }
                Ok(())
            }
            ProposedFix::CrvThreshold {
                original,
                proposed,
            } => {
                if !(MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD).contains(proposed) {
                    return Err(ReflexionError::InvalidFix(format!(
                        "threshold {proposed} outside [{MIN_CONFIDENCE_THRESHOLD}, {MAX_CONFIDENCE_THRESHOLD}]"
                    )));
                }
                let relative = ((proposed - original) / original).abs();
                if relative > MAX_RELATIVE_THRESHOLD_CHANGE {
                    return Err(ReflexionError::InvalidFix(format!(
                        "threshold change {relative:.3} exceeds ±{MAX_RELATIVE_THRESHOLD_CHANGE}"
                    )));
                }
                Ok(())
            }
            ProposedFix::StepReordering {
                order,
            } => validate_reordering(spec, order),
        }
    }

    /// Validates a fix inside the process-internal sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`ReflexionError::InvalidFix`] for out-of-bounds fixes and
    /// [`ReflexionError::Sandbox`] when the sandbox cannot run.
    pub async fn validate_in_sandbox(
        &self,
        spec: &WorkflowSpec,
        fix: &ProposedFix,
        sandbox: &SandboxConfig,
    ) -> Result<SandboxReport, ReflexionError> {
        self.validate_fix(spec, fix)?;

        let audit = Arc::new(AuditLog::new(Arc::clone(&sandbox.clock)));
        let policy = GoalGuard::new(Arc::clone(&audit), Arc::clone(&sandbox.clock));
        let outcome = policy
            .evaluate(
                &sandbox.principal,
                &sandbox.action,
                Some(&sandbox.probe_tool.descriptor().tool_id),
                Provenance::new("reflexion", "sandbox"),
            )
            .map_err(|err| ReflexionError::Sandbox(err.to_string()))?;
        let policy_allowed = matches!(outcome, PolicyOutcome::Allowed { .. });

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::clone(&sandbox.probe_tool));
        let cache: Arc<dyn crate::interfaces::ToolResultCache> =
            Arc::new(InMemoryToolResultCache::new());
        let layer =
            ToolExecutionLayer::new(Arc::clone(&registry), Some(cache), Arc::clone(&sandbox.clock));
        let probe_request = || ToolExecutionRequest {
            tool_id: sandbox.probe_tool.descriptor().tool_id.clone(),
            inputs: sandbox.probe_inputs.clone(),
            ctx: ToolInvocationContext {
                tenant_id: sandbox.principal_tenant(),
                workflow_id: WorkflowId::new("reflexion-sandbox"),
                task_id: TaskId::new("probe"),
                step_id: crate::core::StepId::new("sandbox"),
                attempt: 1,
                context: serde_json::Map::new(),
            },
            timeout_ms: None,
            request_id: None,
            explicit_key: None,
            cancel: None,
        };

        let first = layer
            .execute(probe_request())
            .await
            .map_err(|err| ReflexionError::Sandbox(err.to_string()))?;

        let crv_passed = sandbox.gates.as_ref().is_none_or(|gates| {
            let commit = Commit::new("sandbox-probe", first.data.clone());
            GateChain::blocking_report(&gates.evaluate(&commit)).is_none()
        });

        let mut chaos_checks = Vec::new();

        // Double-apply: re-executing with the same key must replay, not rerun.
        let second = layer
            .execute(probe_request())
            .await
            .map_err(|err| ReflexionError::Sandbox(err.to_string()))?;
        let double_apply_safe = if sandbox.probe_tool.descriptor().has_side_effects {
            second.replayed && second.data == first.data
        } else {
            second.data == first.data
        };
        chaos_checks.push(("double_apply_idempotency".to_string(), double_apply_safe));

        // Rollback safety: a verified snapshot must be recoverable.
        let memory = MemoryStore::new(Arc::clone(&audit), Arc::clone(&sandbox.clock));
        let snapshot_ok = memory
            .write(
                &WorkflowId::new("reflexion-sandbox"),
                &json!({"probe": first.data}),
                Provenance::new("probe", "sandbox"),
                MemoryWriteOptions::snapshot(),
            )
            .map_err(|err| ReflexionError::Sandbox(err.to_string()))
            .and_then(|entry| {
                memory
                    .mark_verified(&entry.entry_id)
                    .map_err(|err| ReflexionError::Sandbox(err.to_string()))?;
                Ok(memory
                    .latest_verified_snapshot(&WorkflowId::new("reflexion-sandbox"))
                    .is_some_and(|snapshot| snapshot.entry_id == entry.entry_id))
            })
            .unwrap_or(false);
        chaos_checks.push(("rollback_safety".to_string(), snapshot_ok));

        // Boundary conditions: threshold fixes must sit inside hard bounds.
        let boundary_ok = match fix {
            ProposedFix::CrvThreshold {
                proposed,
                ..
            } => (MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD).contains(proposed),
            ProposedFix::AlternateTool {
                ..
            }
            | ProposedFix::StepReordering {
                ..
            } => true,
        };
        chaos_checks.push(("boundary_conditions".to_string(), boundary_ok));

        Ok(SandboxReport {
            policy_allowed,
            crv_passed,
            chaos_checks,
        })
    }

    /// Promotes a fix when its sandbox report passed; consumes one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ReflexionError::AttemptsExhausted`] once the per-task cap
    /// is reached.
    pub fn promote(
        &self,
        task_id: &TaskId,
        report: &SandboxReport,
    ) -> Result<bool, ReflexionError> {
        let mut guard = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let attempts = guard.entry(task_id.clone()).or_insert(0);
        if *attempts >= MAX_FIX_ATTEMPTS {
            return Err(ReflexionError::AttemptsExhausted(task_id.to_string()));
        }
        *attempts += 1;
        Ok(report.all_passed())
    }

    /// Returns the attempts consumed for a task.
    #[must_use]
    pub fn attempts_for(&self, task_id: &TaskId) -> u32 {
        let guard = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(task_id).copied().unwrap_or(0)
    }
}

impl SandboxConfig {
    /// Returns the fixed sandbox tenant.
    fn principal_tenant(&self) -> crate::core::TenantId {
        crate::core::TenantId::new(std::num::NonZeroU64::MIN)
    }
}

// ============================================================================
// SECTION: Proposal Helpers
// ============================================================================

/// Proposes the first allowlisted tool different from the current one.
fn propose_alternate_tool(spec: &WorkflowSpec, task_id: &TaskId) -> Option<ProposedFix> {
    let task = spec.task(task_id)?;
    let allowed = task.allowed_tools.as_ref()?;
    let current = task.tool.as_ref();
    allowed.iter().find(|candidate| Some(*candidate) != current).map(|tool| {
        ProposedFix::AlternateTool {
            task_id: task_id.clone(),
            tool: tool.clone(),
        }
    })
}

/// Proposes loosening the CRV threshold by the maximum relative step.
fn propose_threshold_adjustment(context: &Value) -> Option<ProposedFix> {
    let original = context.get("crv_threshold").and_then(Value::as_f64)?;
    let proposed = (original * (1.0 - MAX_RELATIVE_THRESHOLD_CHANGE))
        .max(MIN_CONFIDENCE_THRESHOLD)
        .min(MAX_CONFIDENCE_THRESHOLD);
    let relative = ((proposed - original) / original).abs();
    if relative > MAX_RELATIVE_THRESHOLD_CHANGE {
        return None;
    }
    Some(ProposedFix::CrvThreshold {
        original,
        proposed,
    })
}

/// Validates a complete, dependency-preserving, cycle-free reordering.
fn validate_reordering(spec: &WorkflowSpec, order: &[TaskId]) -> Result<(), ReflexionError> {
    if order.len() != spec.tasks.len() {
        return Err(ReflexionError::InvalidFix("reordering must cover every task".to_string()));
    }
    let mut position: BTreeMap<&TaskId, usize> = BTreeMap::new();
    for (index, task_id) in order.iter().enumerate() {
        if spec.task(task_id).is_none() {
            return Err(ReflexionError::InvalidFix(format!("unknown task {task_id}")));
        }
        if position.insert(task_id, index).is_some() {
            return Err(ReflexionError::InvalidFix(format!("duplicate task {task_id}")));
        }
    }
    for (task_id, edges) in &spec.dependencies {
        let Some(task_pos) = position.get(task_id) else {
            continue;
        };
        for edge in edges {
            if let Some(dep_pos) = position.get(&edge.task)
                && dep_pos >= task_pos
            {
                return Err(ReflexionError::InvalidFix(format!(
                    "reordering places {task_id} before its dependency {}",
                    edge.task
                )));
            }
        }
    }
    Ok(())
}
