// crates/flowwarden-core/src/core/spec.rs
// ============================================================================
// Module: Flow Warden Workflow Specification
// Description: Workflow and task specifications with DAG validation.
// Purpose: Define the immutable workflow contract validated before execution.
// Dependencies: serde, crate::core::{hashing, identifiers, principal}
// ============================================================================

//! ## Overview
//! A workflow specification is the immutable half of a workflow: an ordered
//! list of task specifications plus a dependency mapping. Validation rejects
//! duplicate tasks, unknown references, and cycles before any state is
//! persisted, so an invalid specification never enters `running`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::HashAlgorithm;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::WorkflowId;
use crate::core::principal::Permission;
use crate::core::principal::RiskTier;

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Retry policy applied to failed task attempts.
///
/// # Invariants
/// - `max_attempts` counts the first attempt; `1` means no retry.
/// - Delay before attempt `n` (n >= 2) is
///   `backoff_ms * backoff_multiplier^(n - 2)`, optionally jittered ±25 %.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_ms: u64,
    /// Multiplier applied per additional attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to apply ±25 % jitter to each delay.
    #[serde(default)]
    pub jitter: bool,
}

/// Returns the default backoff multiplier.
const fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Returns the un-jittered delay in milliseconds before attempt `attempt`.
    ///
    /// `attempt` is 1-based; the first attempt has no delay.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        reason = "Delay is clamped to [0, u64::MAX] before conversion."
    )]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let exponent = attempt.saturating_sub(2);
        let factor = self.backoff_multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let delay = (self.backoff_ms as f64) * factor;
        if delay.is_finite() && delay >= 0.0 {
            if delay >= u64::MAX as f64 { u64::MAX } else { delay as u64 }
        } else {
            0
        }
    }
}

// ============================================================================
// SECTION: Compensation and Dependencies
// ============================================================================

/// Compensation descriptor declared on a task specification.
///
/// # Invariants
/// - `tool` must resolve through the tool registry at compensation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationSpec {
    /// Tool invoked to undo the task's side effects.
    pub tool: ToolId,
    /// Arguments passed to the compensation tool.
    #[serde(default)]
    pub args: Value,
}

/// A single dependency edge, optionally conditioned on a decision branch.
///
/// # Invariants
/// - `branch` may only be set when the referenced task is a decision task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Task that must reach a terminal-success phase first.
    pub task: TaskId,
    /// Optional decision branch the predecessor must have selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl DependencySpec {
    /// Creates an unconditional dependency on `task`.
    #[must_use]
    pub fn on(task: impl Into<TaskId>) -> Self {
        Self {
            task: task.into(),
            branch: None,
        }
    }

    /// Creates a dependency conditioned on a decision branch.
    #[must_use]
    pub fn on_branch(task: impl Into<TaskId>, branch: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            branch: Some(branch.into()),
        }
    }
}

// ============================================================================
// SECTION: Task Specification
// ============================================================================

/// Task kind deciding how the orchestrator drives the task.
///
/// # Invariants
/// - Variants are a closed set; serialization tags are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Side-effecting or computational task executed through a tool.
    Action,
    /// Task whose output selects a branch gating conditional dependents.
    Decision,
    /// Join node over a sub-DAG of child tasks.
    Parallel {
        /// Child task identifiers; all must terminate before the parent does.
        children: Vec<TaskId>,
    },
}

/// Specification of a single task within a workflow.
///
/// # Invariants
/// - `task_id` is unique within the workflow.
/// - `tool` is required for `action` and `decision` kinds at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task identifier.
    pub task_id: TaskId,
    /// Human-readable task name.
    pub name: String,
    /// Task kind.
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Tool resolved through the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolId>,
    /// Tool input map.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Optional JSON schema the task output must conform to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Optional retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Optional timeout in milliseconds overriding the orchestrator default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Optional risk tier; `LOW` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<RiskTier>,
    /// Permissions the executing principal must hold.
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
    /// Optional tool allowlist for the policy gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<ToolId>>,
    /// Optional compensation descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationSpec>,
    /// Optional explicit idempotency key overriding derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

// ============================================================================
// SECTION: Workflow Specification
// ============================================================================

/// Immutable workflow specification.
///
/// # Invariants
/// - Task identifiers are unique; every dependency references a defined task.
/// - The dependency graph (including parallel parent/child edges) is acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Workflow identifier.
    pub workflow_id: WorkflowId,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional goal statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Optional constraints statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    /// Optional success criteria statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    /// Ordered task specifications.
    pub tasks: Vec<TaskSpec>,
    /// Dependency mapping: task id to prerequisite edges.
    #[serde(default)]
    pub dependencies: BTreeMap<TaskId, Vec<DependencySpec>>,
}

// ============================================================================
// SECTION: Specification Errors
// ============================================================================

/// Workflow specification validation errors.
///
/// # Invariants
/// - All variants surface as the `invalid_spec` failure reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// The workflow declares no tasks.
    #[error("workflow declares no tasks")]
    EmptyWorkflow,
    /// A task identifier appears more than once.
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),
    /// A dependency mapping keys a task that does not exist.
    #[error("dependency mapping references unknown task: {0}")]
    UnknownTask(String),
    /// A dependency edge references a task that does not exist.
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// Dependent task id.
        task: String,
        /// Missing prerequisite task id.
        dependency: String,
    },
    /// A task depends on itself.
    #[error("task {0} depends on itself")]
    SelfDependency(String),
    /// A branch condition targets a task that is not a decision.
    #[error("task {task} declares branch condition on non-decision task {dependency}")]
    BranchOnNonDecision {
        /// Dependent task id.
        task: String,
        /// Non-decision prerequisite task id.
        dependency: String,
    },
    /// A parallel task lists an unknown or duplicate child.
    #[error("parallel task {task} has invalid child {child}")]
    InvalidParallelChild {
        /// Parallel parent task id.
        task: String,
        /// Offending child task id.
        child: String,
    },
    /// The dependency graph contains a cycle.
    #[error("dependency cycle involving tasks: {0:?}")]
    CycleDetected(Vec<String>),
}

// ============================================================================
// SECTION: Validation
// ============================================================================

impl WorkflowSpec {
    /// Validates the specification: uniqueness, references, and acyclicity.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] describing the first violation found.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.tasks.is_empty() {
            return Err(SpecError::EmptyWorkflow);
        }

        let mut kinds: BTreeMap<&TaskId, &TaskKind> = BTreeMap::new();
        for task in &self.tasks {
            if kinds.insert(&task.task_id, &task.kind).is_some() {
                return Err(SpecError::DuplicateTask(task.task_id.to_string()));
            }
        }

        for (task_id, edges) in &self.dependencies {
            if !kinds.contains_key(task_id) {
                return Err(SpecError::UnknownTask(task_id.to_string()));
            }
            for edge in edges {
                if edge.task == *task_id {
                    return Err(SpecError::SelfDependency(task_id.to_string()));
                }
                match kinds.get(&edge.task) {
                    None => {
                        return Err(SpecError::UnknownDependency {
                            task: task_id.to_string(),
                            dependency: edge.task.to_string(),
                        });
                    }
                    Some(kind) => {
                        if edge.branch.is_some() && !matches!(kind, TaskKind::Decision) {
                            return Err(SpecError::BranchOnNonDecision {
                                task: task_id.to_string(),
                                dependency: edge.task.to_string(),
                            });
                        }
                    }
                }
            }
        }

        for task in &self.tasks {
            if let TaskKind::Parallel {
                children,
            } = &task.kind
            {
                let mut seen: BTreeSet<&TaskId> = BTreeSet::new();
                for child in children {
                    let known = kinds.contains_key(child);
                    if !known || *child == task.task_id || !seen.insert(child) {
                        return Err(SpecError::InvalidParallelChild {
                            task: task.task_id.to_string(),
                            child: child.to_string(),
                        });
                    }
                }
            }
        }

        self.topological_order().map(drop)
    }

    /// Returns a topological ordering of the task graph.
    ///
    /// Parallel parent/child edges are included so a cycle through a sub-DAG
    /// is also rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::CycleDetected`] when no ordering exists.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, SpecError> {
        let edges = self.edge_map();
        let mut in_degree: BTreeMap<&TaskId, usize> =
            self.tasks.iter().map(|task| (&task.task_id, 0)).collect();
        for targets in edges.values() {
            for target in targets {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&TaskId> = self
            .tasks
            .iter()
            .map(|task| &task.task_id)
            .filter(|id| in_degree.get(*id).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.clone());
            if let Some(targets) = edges.get(current) {
                for target in targets {
                    if let Some(degree) = in_degree.get_mut(target) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*target);
                        }
                    }
                }
            }
        }

        if order.len() == self.tasks.len() {
            Ok(order)
        } else {
            let remaining = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            Err(SpecError::CycleDetected(remaining))
        }
    }

    /// Returns the task specification for `task_id` when defined.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|task| task.task_id == *task_id)
    }

    /// Returns the dependency edges declared for `task_id`.
    #[must_use]
    pub fn dependencies_of(&self, task_id: &TaskId) -> &[DependencySpec] {
        self.dependencies.get(task_id).map_or(&[], Vec::as_slice)
    }

    /// Returns the parallel parent of `task_id`, when one exists.
    #[must_use]
    pub fn parallel_parent(&self, task_id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|task| {
            matches!(&task.kind, TaskKind::Parallel { children } if children.contains(task_id))
        })
    }

    /// Hashes the canonical form of the specification.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn canonical_hash_with(&self, algorithm: HashAlgorithm) -> Result<HashDigest, HashError> {
        hash_canonical_json(algorithm, self)
    }

    /// Builds the forward edge map `prerequisite -> dependents`, including
    /// parallel parent-to-child edges.
    fn edge_map(&self) -> BTreeMap<&TaskId, Vec<&TaskId>> {
        let mut edges: BTreeMap<&TaskId, Vec<&TaskId>> = BTreeMap::new();
        for (task_id, deps) in &self.dependencies {
            for edge in deps {
                edges.entry(&edge.task).or_default().push(task_id);
            }
        }
        for task in &self.tasks {
            if let TaskKind::Parallel {
                children,
            } = &task.kind
            {
                for child in children {
                    edges.entry(&task.task_id).or_default().push(child);
                }
            }
        }
        edges
    }
}
