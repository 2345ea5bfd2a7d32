// crates/flowwarden-core/src/runtime/orchestrator.rs
// ============================================================================
// Module: Flow Warden Orchestrator
// Description: DAG execution engine with policy, CRV, saga, resume, and rollback.
// Purpose: Drive workflows from submission to a terminal state under the six invariants.
// Dependencies: crate::{core, interfaces, runtime}, tokio, rand
// ============================================================================

//! ## Overview
//! The orchestrator is the single canonical execution path: it owns every
//! mutation of workflow and task state, persists at each transition behind a
//! write-ahead event append, and coordinates the policy gate, CRV gates,
//! memory store, and compensation stack. Ready tasks execute concurrently up
//! to a configurable ceiling; suspension points (approval, tool I/O, backoff)
//! never block the dispatcher for other tasks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::ApprovalState;
use crate::core::CompensationRecord;
use crate::core::Event;
use crate::core::EventKind;
use crate::core::FailureReason;
use crate::core::MemoryWriteOptions;
use crate::core::PolicyAction;
use crate::core::PrincipalId;
use crate::core::Provenance;
use crate::core::RiskTier;
use crate::core::SpecError;
use crate::core::StepId;
use crate::core::TaskId;
use crate::core::TaskKind;
use crate::core::TaskPhase;
use crate::core::TaskSpec;
use crate::core::TenantId;
use crate::core::WorkflowId;
use crate::core::WorkflowState;
use crate::core::WorkflowStatus;
use crate::core::commit::Commit;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::identifiers::ActionId;
use crate::core::principal::Principal;
use crate::core::spec::WorkflowSpec;
use crate::interfaces::Clock;
use crate::interfaces::EventLog;
use crate::interfaces::EventLogError;
use crate::interfaces::NoopTelemetry;
use crate::interfaces::RestoreHook;
use crate::interfaces::StateStore;
use crate::interfaces::StoreError;
use crate::interfaces::TelemetryEvent;
use crate::interfaces::TelemetrySink;
use crate::interfaces::ToolInvocationContext;
use crate::runtime::audit_log::AuditLog;
use crate::runtime::crv::GateChain;
use crate::runtime::memory_store::MemoryStore;
use crate::runtime::policy::GoalGuard;
use crate::runtime::policy::PolicyOutcome;
use crate::runtime::projector;
use crate::runtime::tool_exec::ToolExecutionLayer;
use crate::runtime::tool_exec::ToolExecutionRequest;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default per-workflow concurrency ceiling.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 16;

/// Orchestrator configuration.
///
/// # Invariants
/// - `max_concurrent_tasks` is at least 1.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Concurrency ceiling for ready-task dispatch within one workflow.
    pub max_concurrent_tasks: usize,
    /// When true, compensation failures do not halt the saga pass.
    pub compensation_best_effort: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            compensation_best_effort: true,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The workflow specification failed validation.
    #[error("invalid workflow spec: {0}")]
    InvalidSpec(#[from] SpecError),
    /// State store failure.
    #[error("state store failure: {0}")]
    Store(#[from] StoreError),
    /// Event log failure.
    #[error("event log failure: {0}")]
    EventLog(#[from] EventLogError),
    /// Audit append failure.
    #[error("audit append failure: {0}")]
    Audit(String),
    /// The audit chain failed integrity verification.
    #[error("audit integrity failure; invalid sequences: {0:?}")]
    AuditIntegrity(Vec<u64>),
    /// Memory store failure.
    #[error("memory store failure: {0}")]
    Memory(String),
    /// The workflow does not exist.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),
    /// A workflow with the same identifier already exists.
    #[error("workflow already exists: {0}")]
    WorkflowExists(String),
    /// The persisted spec hash does not match the loaded spec.
    #[error("spec hash mismatch for workflow {workflow_id}")]
    SpecMismatch {
        /// Workflow whose spec drifted.
        workflow_id: String,
    },
    /// No verified snapshot exists for rollback.
    #[error("no verified snapshot for workflow: {0}")]
    NoVerifiedSnapshot(String),
    /// The restore hook failed or is missing.
    #[error("snapshot restore failed: {0}")]
    Restore(String),
    /// The referenced task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// The task is not awaiting approval.
    #[error("task not awaiting approval: {0}")]
    NotAwaitingApproval(String),
    /// Internal invariant violation.
    #[error("internal orchestrator failure: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for the orchestrator.
///
/// # Invariants
/// - `build` succeeds only when every mandatory collaborator is supplied.
#[derive(Default)]
pub struct OrchestratorBuilder {
    /// Workflow state store.
    state_store: Option<Arc<dyn StateStore>>,
    /// Lifecycle event log.
    event_log: Option<Arc<dyn EventLog>>,
    /// Hash-chained audit log.
    audit: Option<Arc<AuditLog>>,
    /// Memory store.
    memory: Option<Arc<MemoryStore>>,
    /// Tool execution layer.
    tools: Option<Arc<ToolExecutionLayer>>,
    /// Goal-Guard policy gate.
    policy: Option<Arc<GoalGuard>>,
    /// Clock.
    clock: Option<Arc<dyn Clock>>,
    /// Optional pre-commit CRV chain over task inputs.
    pre_commit_gates: Option<Arc<GateChain>>,
    /// Optional post-commit CRV chain over task outputs.
    post_commit_gates: Option<Arc<GateChain>>,
    /// Telemetry sink (no-op by default).
    telemetry: Option<Arc<dyn TelemetrySink>>,
    /// Optional rollback restore hook.
    restore_hook: Option<Arc<dyn RestoreHook>>,
    /// Configuration.
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    /// Sets the state store.
    #[must_use]
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Sets the event log.
    #[must_use]
    pub fn event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Sets the audit log.
    #[must_use]
    pub fn audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Sets the memory store.
    #[must_use]
    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Sets the tool execution layer.
    #[must_use]
    pub fn tools(mut self, tools: Arc<ToolExecutionLayer>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Sets the policy gate.
    #[must_use]
    pub fn policy(mut self, policy: Arc<GoalGuard>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the pre-commit CRV chain.
    #[must_use]
    pub fn pre_commit_gates(mut self, gates: Arc<GateChain>) -> Self {
        self.pre_commit_gates = Some(gates);
        self
    }

    /// Sets the post-commit CRV chain.
    #[must_use]
    pub fn post_commit_gates(mut self, gates: Arc<GateChain>) -> Self {
        self.post_commit_gates = Some(gates);
        self
    }

    /// Sets the telemetry sink.
    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets the rollback restore hook.
    #[must_use]
    pub fn restore_hook(mut self, hook: Arc<dyn RestoreHook>) -> Self {
        self.restore_hook = Some(hook);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Internal`] naming the first missing
    /// mandatory collaborator.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        /// Resolves a mandatory collaborator or names it in the error.
        fn required<T>(value: Option<T>, name: &str) -> Result<T, OrchestratorError> {
            value.ok_or_else(|| OrchestratorError::Internal(format!("missing collaborator: {name}")))
        }
        Ok(Orchestrator {
            inner: Arc::new(Inner {
                state_store: required(self.state_store, "state_store")?,
                event_log: required(self.event_log, "event_log")?,
                audit: required(self.audit, "audit")?,
                memory: required(self.memory, "memory")?,
                tools: required(self.tools, "tools")?,
                policy: required(self.policy, "policy")?,
                clock: required(self.clock, "clock")?,
                pre_commit_gates: self.pre_commit_gates,
                post_commit_gates: self.post_commit_gates,
                telemetry: self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry)),
                restore_hook: self.restore_hook,
                config: OrchestratorConfig {
                    max_concurrent_tasks: self.config.max_concurrent_tasks.max(1),
                    compensation_best_effort: self.config.compensation_best_effort,
                },
            }),
        })
    }
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Immutable collaborator set shared with spawned task units.
struct Inner {
    /// Workflow state store.
    state_store: Arc<dyn StateStore>,
    /// Lifecycle event log.
    event_log: Arc<dyn EventLog>,
    /// Hash-chained audit log.
    audit: Arc<AuditLog>,
    /// Memory store.
    memory: Arc<MemoryStore>,
    /// Tool execution layer.
    tools: Arc<ToolExecutionLayer>,
    /// Goal-Guard policy gate.
    policy: Arc<GoalGuard>,
    /// Clock.
    clock: Arc<dyn Clock>,
    /// Optional pre-commit CRV chain.
    pre_commit_gates: Option<Arc<GateChain>>,
    /// Optional post-commit CRV chain.
    post_commit_gates: Option<Arc<GateChain>>,
    /// Telemetry sink.
    telemetry: Arc<dyn TelemetrySink>,
    /// Optional rollback restore hook.
    restore_hook: Option<Arc<dyn RestoreHook>>,
    /// Configuration.
    config: OrchestratorConfig,
}

/// Shared mutable execution context for one driven workflow.
struct ExecContext {
    /// Tenant the workflow belongs to.
    tenant_id: TenantId,
    /// Guarded workflow state; every transition persists under this lock.
    state: tokio::sync::Mutex<WorkflowState>,
}

/// Workflow orchestration engine.
///
/// # Invariants
/// - The orchestrator exclusively owns workflow and task state mutation.
/// - Every transition is journaled before the state save returns.
pub struct Orchestrator {
    /// Shared collaborator set.
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Validates and persists a new workflow in `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidSpec`] for a malformed DAG and
    /// [`OrchestratorError::WorkflowExists`] for a duplicate identifier.
    pub fn submit(
        &self,
        tenant_id: TenantId,
        spec: WorkflowSpec,
        principal: Principal,
    ) -> Result<WorkflowState, OrchestratorError> {
        spec.validate()?;
        if self.inner.state_store.load(tenant_id, &spec.workflow_id)?.is_some() {
            return Err(OrchestratorError::WorkflowExists(spec.workflow_id.to_string()));
        }
        let spec_hash = spec
            .canonical_hash_with(DEFAULT_HASH_ALGORITHM)
            .map_err(|err| OrchestratorError::Internal(err.to_string()))?
            .value;
        let now = self.inner.clock.now();
        let task_states = spec
            .tasks
            .iter()
            .map(|task| (task.task_id.clone(), crate::core::TaskState::pending()))
            .collect();
        let mut state = WorkflowState {
            workflow_id: spec.workflow_id.clone(),
            tenant_id,
            status: WorkflowStatus::Pending,
            spec,
            spec_hash,
            principal,
            context: serde_json::Map::new(),
            task_states,
            compensation_stack: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            version: 0,
            event_seq: 0,
        };
        self.inner.persist(&mut state)?;
        self.inner
            .audit
            .append(
                state.principal.principal_id.as_str(),
                "workflow_submitted",
                Value::Null,
                json!({"workflow_id": state.workflow_id.as_str(), "spec_hash": state.spec_hash}),
                Provenance::new(state.workflow_id.as_str(), "submit"),
            )
            .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
        Ok(state)
    }

    /// Drives a workflow until it terminates or suspends on approvals.
    ///
    /// Returns the workflow status at quiescence: terminal, or `running`
    /// when tasks are suspended awaiting approval.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] for structural failures; task-level
    /// failures are absorbed into workflow status per the taxonomy.
    pub async fn run(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        let mut state = self.load_required(tenant_id, workflow_id)?;
        self.verify_audit_or_abort(&mut state)?;

        match state.status {
            WorkflowStatus::Completed | WorkflowStatus::Compensated | WorkflowStatus::Aborted => {
                return Ok(state.status);
            }
            WorkflowStatus::Failed | WorkflowStatus::Compensating => {
                let ctx = Arc::new(ExecContext {
                    tenant_id,
                    state: tokio::sync::Mutex::new(state),
                });
                run_compensation_pass(&self.inner, &ctx).await?;
                let state = ctx.state.lock().await;
                return Ok(state.status);
            }
            WorkflowStatus::Pending | WorkflowStatus::Running => {}
        }

        self.drive(tenant_id, state).await
    }

    /// Resumes a workflow after a restart.
    ///
    /// Verifies the audit chain and the spec hash, re-queues tasks caught in
    /// `running`, and replays the event journal to restore pending approvals
    /// before re-entering the execution loop. A workflow already in a
    /// terminal status is returned unchanged; resuming it journals nothing.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AuditIntegrity`] when the chain fails
    /// verification and [`OrchestratorError::SpecMismatch`] on spec drift.
    pub async fn resume(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        let mut state = self.load_required(tenant_id, workflow_id)?;
        self.verify_audit_or_abort(&mut state)?;
        if state.status.is_terminal() {
            return Ok(state.status);
        }

        let spec_hash = state
            .spec
            .canonical_hash_with(DEFAULT_HASH_ALGORITHM)
            .map_err(|err| OrchestratorError::Internal(err.to_string()))?
            .value;
        if spec_hash != state.spec_hash {
            return Err(OrchestratorError::SpecMismatch {
                workflow_id: workflow_id.to_string(),
            });
        }

        let mut requeued = false;
        let mut already_done = Vec::new();
        for (task_id, task) in &mut state.task_states {
            if task.phase == TaskPhase::Running {
                task.phase = TaskPhase::Ready;
                requeued = true;
            } else if task.phase == TaskPhase::Succeeded && task.idempotency_key.is_some() {
                already_done.push(task_id.clone());
            }
        }
        // The skip notice marks work found already durable while in-flight
        // tasks are re-queued. An idle resume (nothing caught in `running`)
        // journals nothing and persists nothing: there was no transition.
        if requeued {
            for task_id in already_done {
                self.inner.emit(
                    &mut state,
                    EventKind::TaskSkippedIdempotent,
                    Some(task_id),
                    json!({}),
                )?;
            }
            self.inner.persist(&mut state)?;
        }

        let events = self.inner.event_log.read(tenant_id, workflow_id)?;
        for (task_id, token, expires_at, required) in projector::pending_approvals(&events) {
            let action_id = task_action_id(workflow_id, &TaskId::new(task_id));
            self.inner.policy.restore_pending(
                action_id,
                token,
                expires_at.unwrap_or_else(|| self.inner.clock.now()),
                required,
            );
        }

        self.run(tenant_id, workflow_id).await
    }

    /// Records a human approval for a suspended task.
    ///
    /// Returns true when the approval was accepted. When the quorum
    /// completes, the task transitions to `ready`; call [`Self::run`] to
    /// continue execution.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskNotFound`] /
    /// [`OrchestratorError::NotAwaitingApproval`] for invalid targets.
    pub fn approve_task(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
        token: &str,
        approver: &PrincipalId,
    ) -> Result<bool, OrchestratorError> {
        let mut state = self.load_required(tenant_id, workflow_id)?;
        let task = state
            .task_states
            .get(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if task.phase != TaskPhase::AwaitingApproval {
            return Err(OrchestratorError::NotAwaitingApproval(task_id.to_string()));
        }

        let action_id = task_action_id(workflow_id, task_id);
        let accepted = self.inner.policy.approve_human_action(&action_id, token, approver);
        if !accepted {
            return Ok(false);
        }

        let status = self.inner.policy.approval_status(&action_id);
        let granted = status.as_ref().is_some_and(|status| status.granted);
        if let Some(task) = state.task_states.get_mut(task_id)
            && let Some(approval) = task.approval.as_mut()
        {
            approval.approvers = status.map(|status| status.approvers).unwrap_or_default();
            if granted {
                approval.granted = true;
                task.phase = TaskPhase::Ready;
            }
        }
        if granted {
            let event = self.inner.emit(
                &mut state,
                EventKind::ApprovalGranted,
                Some(task_id.clone()),
                json!({"approver": approver.as_str()}),
            )?;
            self.inner.audit_task(
                &state,
                task_id,
                "approval_granted",
                json!({"phase": "awaiting_approval"}),
                json!({"phase": "ready", "approver": approver.as_str()}),
                Some(event.event_id.clone()),
            )?;
        }
        self.inner.persist(&mut state)?;
        Ok(accepted)
    }

    /// Rejects a suspended task; it fails and the workflow unwinds on the
    /// next [`Self::run`].
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskNotFound`] /
    /// [`OrchestratorError::NotAwaitingApproval`] for invalid targets.
    pub fn reject_task(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.load_required(tenant_id, workflow_id)?;
        let task = state
            .task_states
            .get(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if task.phase != TaskPhase::AwaitingApproval {
            return Err(OrchestratorError::NotAwaitingApproval(task_id.to_string()));
        }
        let action_id = task_action_id(workflow_id, task_id);
        let _ = self.inner.policy.reject_human_action(&action_id);
        if let Some(task) = state.task_states.get_mut(task_id) {
            task.phase = TaskPhase::Failed;
            task.last_error = Some(FailureReason::InsufficientPermissions);
            task.error_detail = Some("human approval rejected".to_string());
            task.ended_at = Some(self.inner.clock.now());
        }
        let event = self.inner.emit(
            &mut state,
            EventKind::ApprovalRejected,
            Some(task_id.clone()),
            json!({}),
        )?;
        self.inner.audit_task(
            &state,
            task_id,
            "approval_rejected",
            json!({"phase": "awaiting_approval"}),
            json!({"phase": "failed"}),
            Some(event.event_id.clone()),
        )?;
        self.inner.persist(&mut state)?;
        Ok(())
    }

    /// Rolls the workflow back to its latest verified snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoVerifiedSnapshot`] when none exists
    /// and [`OrchestratorError::Restore`] when the hook fails or is absent.
    pub fn rollback(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<(), OrchestratorError> {
        let mut state = self.load_required(tenant_id, workflow_id)?;
        let snapshot = self
            .inner
            .memory
            .latest_verified_snapshot(workflow_id)
            .ok_or_else(|| OrchestratorError::NoVerifiedSnapshot(workflow_id.to_string()))?;
        let hook = self
            .inner
            .restore_hook
            .as_ref()
            .ok_or_else(|| OrchestratorError::Restore("no restore hook configured".to_string()))?;
        hook.restore(&snapshot).map_err(|err| OrchestratorError::Restore(err.to_string()))?;

        let before = json!({"status": state.status.as_str()});
        let after = json!({
            "snapshot_id": snapshot.entry_id.as_str(),
            "snapshot_audit_seq": snapshot.source_audit_seq,
        });
        let event = self.inner.emit(
            &mut state,
            EventKind::Rollback,
            None,
            json!({"snapshot_id": snapshot.entry_id.as_str()}),
        )?;
        self.inner
            .audit
            .append(
                state.principal.principal_id.as_str(),
                "rollback",
                before,
                after,
                Provenance::new(workflow_id.as_str(), "rollback")
                    .with_event(event.event_id.clone()),
            )
            .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
        state.status = WorkflowStatus::Aborted;
        state.ended_at = Some(self.inner.clock.now());
        self.inner.persist(&mut state)?;
        Ok(())
    }

    /// Loads a workflow or fails with `WorkflowNotFound`.
    fn load_required(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowState, OrchestratorError> {
        self.inner
            .state_store
            .load(tenant_id, workflow_id)?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Verifies the audit chain; on failure marks the workflow aborted.
    fn verify_audit_or_abort(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        let (valid, invalid) = self
            .inner
            .audit
            .verify_all()
            .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
        if valid {
            return Ok(());
        }
        state.status = WorkflowStatus::Aborted;
        state.ended_at = Some(self.inner.clock.now());
        self.inner.persist(state)?;
        Err(OrchestratorError::AuditIntegrity(invalid))
    }

    /// Runs the execution loop to quiescence.
    async fn drive(
        &self,
        tenant_id: TenantId,
        mut state: WorkflowState,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        if state.status == WorkflowStatus::Pending {
            state.status = WorkflowStatus::Running;
            state.started_at = Some(self.inner.clock.now());
            let spec_hash = state.spec_hash.clone();
            let event = self.inner.emit(
                &mut state,
                EventKind::WorkflowStarted,
                None,
                json!({"spec_hash": spec_hash}),
            )?;
            self.inner
                .audit
                .append(
                    state.principal.principal_id.as_str(),
                    "workflow_started",
                    json!({"status": "pending"}),
                    json!({"status": "running"}),
                    Provenance::new(state.workflow_id.as_str(), "start")
                        .with_event(event.event_id.clone()),
                )
                .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
            self.inner.persist(&mut state)?;
        }

        let ctx = Arc::new(ExecContext {
            tenant_id,
            state: tokio::sync::Mutex::new(state),
        });
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent_tasks));
        let mut join_set: JoinSet<Result<(), OrchestratorError>> = JoinSet::new();
        let mut dispatched: BTreeSet<TaskId> = BTreeSet::new();

        loop {
            let ready = {
                let mut guard = ctx.state.lock().await;
                release_ready_tasks(&self.inner, &ctx, &mut guard)?
            };
            for task_id in ready {
                if dispatched.contains(&task_id) {
                    continue;
                }
                dispatched.insert(task_id.clone());
                let inner = Arc::clone(&self.inner);
                let ctx = Arc::clone(&ctx);
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|err| OrchestratorError::Internal(err.to_string()))?;
                    execute_task(&inner, &ctx, &task_id).await
                });
            }

            match join_set.join_next().await {
                Some(joined) => {
                    joined.map_err(|err| OrchestratorError::Internal(err.to_string()))??;
                }
                None => break,
            }
        }

        self.finish(&ctx).await
    }

    /// Applies the terminal transition after the loop reaches quiescence.
    async fn finish(&self, ctx: &Arc<ExecContext>) -> Result<WorkflowStatus, OrchestratorError> {
        let suspended = {
            let guard = ctx.state.lock().await;
            guard.task_states.values().any(|task| task.phase == TaskPhase::AwaitingApproval)
        };
        if suspended {
            let guard = ctx.state.lock().await;
            return Ok(guard.status);
        }

        let all_successful = {
            let mut guard = ctx.state.lock().await;
            if !guard.all_tasks_terminal() {
                return Err(OrchestratorError::Internal(
                    "execution loop quiesced with non-terminal tasks".to_string(),
                ));
            }
            let all_successful = guard.all_tasks_successful();
            if all_successful {
                guard.status = WorkflowStatus::Completed;
                guard.ended_at = Some(self.inner.clock.now());
                let event =
                    self.inner.emit(&mut guard, EventKind::WorkflowCompleted, None, json!({}))?;
                self.inner
                    .audit
                    .append(
                        guard.principal.principal_id.as_str(),
                        "workflow_completed",
                        json!({"status": "running"}),
                        json!({"status": "completed"}),
                        Provenance::new(guard.workflow_id.as_str(), "finish")
                            .with_event(event.event_id.clone()),
                    )
                    .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
            } else {
                guard.status = WorkflowStatus::Failed;
                guard.ended_at = Some(self.inner.clock.now());
                let event =
                    self.inner.emit(&mut guard, EventKind::WorkflowFailed, None, json!({}))?;
                self.inner
                    .audit
                    .append(
                        guard.principal.principal_id.as_str(),
                        "workflow_failed",
                        json!({"status": "running"}),
                        json!({"status": "failed"}),
                        Provenance::new(guard.workflow_id.as_str(), "finish")
                            .with_event(event.event_id.clone()),
                    )
                    .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
            }
            self.inner.persist(&mut guard)?;
            all_successful
        };

        if !all_successful {
            run_compensation_pass(&self.inner, ctx).await?;
        }
        let guard = ctx.state.lock().await;
        Ok(guard.status)
    }
}

// ============================================================================
// SECTION: Inner Helpers
// ============================================================================

impl Inner {
    /// Persists state, retrying a version conflict once with a fresh load.
    fn persist(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        state.updated_at = self.clock.now();
        match self.state_store.save(state) {
            Ok(()) => {
                state.version = state.version.saturating_add(1);
                Ok(())
            }
            Err(StoreError::Conflict(_)) => {
                let fresh = self
                    .state_store
                    .load(state.tenant_id, &state.workflow_id)?
                    .ok_or_else(|| {
                        OrchestratorError::WorkflowNotFound(state.workflow_id.to_string())
                    })?;
                state.version = fresh.version;
                self.state_store.save(state)?;
                state.version = state.version.saturating_add(1);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Appends a lifecycle event ahead of the state save.
    fn emit(
        &self,
        state: &mut WorkflowState,
        kind: EventKind,
        task_id: Option<TaskId>,
        metadata: Value,
    ) -> Result<Event, OrchestratorError> {
        state.event_seq = state.event_seq.saturating_add(1);
        let mut event = Event {
            event_id: crate::core::EventId::new(format!("evt-{}", state.event_seq)),
            timestamp: self.clock.now(),
            kind,
            workflow_id: state.workflow_id.clone(),
            task_id,
            metadata: serde_json::Map::new(),
        };
        if let Value::Object(map) = metadata {
            event.metadata = map;
        }
        self.event_log.append(state.tenant_id, &event)?;
        self.telemetry.record(&TelemetryEvent::EventAppended {
            workflow_id: state.workflow_id.clone(),
            kind,
        });
        Ok(event)
    }

    /// Appends a task-scoped audit entry.
    fn audit_task(
        &self,
        state: &WorkflowState,
        task_id: &TaskId,
        action: &str,
        before: Value,
        after: Value,
        source_event: Option<crate::core::EventId>,
    ) -> Result<(), OrchestratorError> {
        let mut provenance = Provenance::new(task_id.as_str(), action);
        if let Some(event_id) = source_event {
            provenance = provenance.with_event(event_id);
        }
        self.audit
            .append(state.principal.principal_id.as_str(), action, before, after, provenance)
            .map(drop)
            .map_err(|err| OrchestratorError::Audit(err.to_string()))
    }

    /// Writes a lifecycle memory note.
    fn memory_note(
        &self,
        state: &WorkflowState,
        task_id: &TaskId,
        note: Value,
        source_event: Option<crate::core::EventId>,
    ) -> Result<(), OrchestratorError> {
        let mut provenance = Provenance::new(task_id.as_str(), "lifecycle");
        if let Some(event_id) = source_event {
            provenance = provenance.with_event(event_id);
        }
        self.memory
            .write(
                &state.workflow_id,
                &note,
                provenance,
                MemoryWriteOptions::note_with_tags(vec!["task_lifecycle".to_string()]),
            )
            .map(drop)
            .map_err(|err| OrchestratorError::Memory(err.to_string()))
    }
}

/// Builds the policy action identifier for a task.
fn task_action_id(workflow_id: &WorkflowId, task_id: &TaskId) -> ActionId {
    ActionId::new(format!("{workflow_id}:{task_id}"))
}

// ============================================================================
// SECTION: Ready-Set Computation
// ============================================================================

/// Releases newly-ready tasks, propagating skips and joining parallel
/// parents. Returns tasks eligible for dispatch.
fn release_ready_tasks(
    inner: &Arc<Inner>,
    _ctx: &Arc<ExecContext>,
    state: &mut WorkflowState,
) -> Result<Vec<TaskId>, OrchestratorError> {
    let mut eligible = Vec::new();
    let mut changed = true;
    while changed {
        changed = false;
        let task_ids: Vec<TaskId> = state.spec.tasks.iter().map(|task| task.task_id.clone()).collect();
        for task_id in task_ids {
            let phase = state
                .task_states
                .get(&task_id)
                .map(|task| task.phase)
                .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
            match phase {
                TaskPhase::Pending => {
                    match dependency_disposition(state, &task_id) {
                        Disposition::Wait => {}
                        Disposition::Eligible => {
                            if let Some(task) = state.task_states.get_mut(&task_id) {
                                task.phase = TaskPhase::Ready;
                            }
                            eligible.push(task_id.clone());
                            changed = true;
                        }
                        Disposition::Skip => {
                            mark_skipped(inner, state, &task_id)?;
                            changed = true;
                        }
                        Disposition::Cascade => {
                            mark_cascade_failed(inner, state, &task_id)?;
                            changed = true;
                        }
                    }
                }
                TaskPhase::Ready => {
                    if !eligible.contains(&task_id) {
                        eligible.push(task_id.clone());
                    }
                }
                TaskPhase::Running => {
                    if join_parallel_parent(inner, state, &task_id)? {
                        changed = true;
                    }
                }
                TaskPhase::AwaitingApproval
                | TaskPhase::Succeeded
                | TaskPhase::Failed
                | TaskPhase::Skipped
                | TaskPhase::Compensated => {}
            }
        }
    }
    Ok(eligible)
}

/// Dependency evaluation result for a pending task.
enum Disposition {
    /// Dependencies not yet settled.
    Wait,
    /// All dependencies satisfied; the task may dispatch.
    Eligible,
    /// A conditional branch was not selected; skip the task.
    Skip,
    /// An upstream task failed; the task can never run.
    Cascade,
}

/// Evaluates the dependency edges and parallel parentage of `task_id`.
fn dependency_disposition(state: &WorkflowState, task_id: &TaskId) -> Disposition {
    if let Some(parent) = state.spec.parallel_parent(task_id) {
        match state.task_states.get(&parent.task_id).map(|task| task.phase) {
            Some(TaskPhase::Running) => {}
            Some(TaskPhase::Failed | TaskPhase::Compensated) => return Disposition::Cascade,
            _ => return Disposition::Wait,
        }
    }
    for edge in state.spec.dependencies_of(task_id) {
        let Some(dep) = state.task_states.get(&edge.task) else {
            return Disposition::Wait;
        };
        match dep.phase {
            phase if phase.is_terminal_success() => {
                if let Some(branch) = &edge.branch {
                    if dep.phase == TaskPhase::Skipped {
                        return Disposition::Skip;
                    }
                    if dep.branch.as_deref() != Some(branch.as_str()) {
                        return Disposition::Skip;
                    }
                }
            }
            TaskPhase::Failed | TaskPhase::Compensated => return Disposition::Cascade,
            _ => return Disposition::Wait,
        }
    }
    Disposition::Eligible
}

/// Marks a task skipped because its conditional branch was not selected.
fn mark_skipped(
    inner: &Arc<Inner>,
    state: &mut WorkflowState,
    task_id: &TaskId,
) -> Result<(), OrchestratorError> {
    if let Some(task) = state.task_states.get_mut(task_id) {
        task.phase = TaskPhase::Skipped;
        task.ended_at = Some(inner.clock.now());
    }
    let event = inner.emit(state, EventKind::TaskSkipped, Some(task_id.clone()), json!({}))?;
    inner.audit_task(
        state,
        task_id,
        "task_skipped",
        json!({"phase": "pending"}),
        json!({"phase": "skipped"}),
        Some(event.event_id),
    )?;
    inner.persist(state)
}

/// Fails a task whose upstream dependency failed.
fn mark_cascade_failed(
    inner: &Arc<Inner>,
    state: &mut WorkflowState,
    task_id: &TaskId,
) -> Result<(), OrchestratorError> {
    if let Some(task) = state.task_states.get_mut(task_id) {
        task.phase = TaskPhase::Failed;
        task.last_error = Some(FailureReason::Cancelled);
        task.error_detail = Some("upstream dependency failed".to_string());
        task.ended_at = Some(inner.clock.now());
    }
    let event = inner.emit(
        state,
        EventKind::TaskFailed,
        Some(task_id.clone()),
        json!({"reason": FailureReason::Cancelled.as_str(), "detail": "upstream dependency failed"}),
    )?;
    inner.audit_task(
        state,
        task_id,
        "task_failed",
        json!({"phase": "pending"}),
        json!({"phase": "failed", "reason": FailureReason::Cancelled.as_str()}),
        Some(event.event_id),
    )?;
    inner.persist(state)
}

/// Joins a running parallel parent whose children have all terminated.
fn join_parallel_parent(
    inner: &Arc<Inner>,
    state: &mut WorkflowState,
    task_id: &TaskId,
) -> Result<bool, OrchestratorError> {
    let Some(task_spec) = state.spec.task(task_id) else {
        return Ok(false);
    };
    let TaskKind::Parallel {
        children,
    } = &task_spec.kind
    else {
        return Ok(false);
    };
    let children = children.clone();
    let all_terminal = children
        .iter()
        .all(|child| state.task_states.get(child).is_some_and(|task| task.phase.is_terminal()));
    if !all_terminal {
        return Ok(false);
    }
    let all_successful = children.iter().all(|child| {
        state.task_states.get(child).is_some_and(|task| task.phase.is_terminal_success())
    });
    if all_successful {
        if let Some(task) = state.task_states.get_mut(task_id) {
            task.phase = TaskPhase::Succeeded;
            task.ended_at = Some(inner.clock.now());
        }
        let event =
            inner.emit(state, EventKind::TaskCompleted, Some(task_id.clone()), json!({}))?;
        inner.audit_task(
            state,
            task_id,
            "task_completed",
            json!({"phase": "running"}),
            json!({"phase": "succeeded"}),
            Some(event.event_id),
        )?;
    } else {
        let child_reason = children
            .iter()
            .filter_map(|child| state.task_states.get(child))
            .find_map(|task| task.last_error)
            .unwrap_or(FailureReason::ToolError);
        if let Some(task) = state.task_states.get_mut(task_id) {
            task.phase = TaskPhase::Failed;
            task.last_error = Some(child_reason);
            task.error_detail = Some("child task failed".to_string());
            task.ended_at = Some(inner.clock.now());
        }
        let event = inner.emit(
            state,
            EventKind::TaskFailed,
            Some(task_id.clone()),
            json!({"reason": child_reason.as_str(), "detail": "child task failed"}),
        )?;
        inner.audit_task(
            state,
            task_id,
            "task_failed",
            json!({"phase": "running"}),
            json!({"phase": "failed", "reason": child_reason.as_str()}),
            Some(event.event_id),
        )?;
    }
    inner.persist(state)?;
    Ok(true)
}

// ============================================================================
// SECTION: Task Execution
// ============================================================================

/// Executes one dispatched task: policy, pre-commit CRV, the retry loop
/// around the tool layer, post-commit CRV, and the terminal transition.
#[allow(
    clippy::too_many_lines,
    reason = "Maintain a single linear flow for ordered state updates and auditability."
)]
async fn execute_task(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    task_id: &TaskId,
) -> Result<(), OrchestratorError> {
    let (task_spec, principal, workflow_id, context_snapshot, already_approved) = {
        let guard = ctx.state.lock().await;
        let task_spec = guard
            .spec
            .task(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        let task = guard
            .task_states
            .get(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if task.phase != TaskPhase::Ready {
            return Ok(());
        }
        let already_approved = task.approval.as_ref().is_some_and(|approval| approval.granted);
        (
            task_spec,
            guard.principal.clone(),
            guard.workflow_id.clone(),
            guard.context.clone(),
            already_approved,
        )
    };

    if !already_approved
        && !evaluate_policy_gate(inner, ctx, task_id, &task_spec, &principal, &workflow_id).await?
    {
        return Ok(());
    }

    if let Some(gates) = inner.pre_commit_gates.as_ref().filter(|gates| !gates.is_empty()) {
        let commit = Commit::new(
            format!("{task_id}-inputs"),
            Value::Object(task_spec.inputs.clone()),
        );
        let reports = gates.evaluate(&commit);
        if let Some(report) = GateChain::blocking_report(&reports) {
            let detail = report.reasons.join("; ");
            let code = report.failure_code.map(|code| code.as_str().to_string());
            fail_task_blocked(inner, ctx, task_id, &detail, code.as_deref(), "pre_commit").await?;
            return Ok(());
        }
    }

    let max_attempts = task_spec.retry.as_ref().map_or(1, |retry| retry.max_attempts.max(1));
    loop {
        let attempt = {
            let mut guard = ctx.state.lock().await;
            let attempt = {
                let task = guard
                    .task_states
                    .get_mut(task_id)
                    .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
                task.phase = TaskPhase::Running;
                task.attempt = task.attempt.saturating_add(1);
                task.started_at = Some(inner.clock.now());
                task.attempt
            };
            let event = inner.emit(
                &mut guard,
                EventKind::TaskStarted,
                Some(task_id.clone()),
                json!({"attempt": attempt}),
            )?;
            inner.memory_note(
                &guard,
                task_id,
                json!({"event": "task_started", "attempt": attempt}),
                Some(event.event_id.clone()),
            )?;
            inner.persist(&mut guard)?;
            attempt
        };
        inner.telemetry.record(&TelemetryEvent::TaskDispatched {
            workflow_id: workflow_id.clone(),
            task_id: task_id.clone(),
            attempt,
        });

        if matches!(task_spec.kind, TaskKind::Parallel { .. }) {
            // Parallel parents stay running; the loop joins them once every
            // child has terminated.
            return Ok(());
        }

        let Some(tool_id) = task_spec.tool.clone() else {
            succeed_task(inner, ctx, task_id, &task_spec, Value::Null, attempt, None, false)
                .await?;
            return Ok(());
        };

        let request = ToolExecutionRequest {
            tool_id,
            inputs: Value::Object(task_spec.inputs.clone()),
            ctx: ToolInvocationContext {
                tenant_id: ctx.tenant_id,
                workflow_id: workflow_id.clone(),
                task_id: task_id.clone(),
                step_id: StepId::new("invoke"),
                attempt,
                context: context_snapshot.clone(),
            },
            timeout_ms: task_spec.timeout_ms,
            request_id: None,
            explicit_key: task_spec.idempotency_key.clone(),
            cancel: None,
        };

        match inner.tools.execute(request).await {
            Ok(outcome) => {
                if let Some(gates) =
                    inner.post_commit_gates.as_ref().filter(|gates| !gates.is_empty())
                {
                    let commit =
                        Commit::new(format!("{task_id}-output"), outcome.data.clone());
                    let reports = gates.evaluate(&commit);
                    if let Some(report) = GateChain::blocking_report(&reports) {
                        let detail = report.reasons.join("; ");
                        let code = report.failure_code.map(|code| code.as_str().to_string());
                        compensate_current_task(inner, ctx, task_id, &task_spec, &outcome.data)
                            .await?;
                        fail_task_blocked(
                            inner,
                            ctx,
                            task_id,
                            &detail,
                            code.as_deref(),
                            "post_commit",
                        )
                        .await?;
                        return Ok(());
                    }
                }
                succeed_task(
                    inner,
                    ctx,
                    task_id,
                    &task_spec,
                    outcome.data,
                    attempt,
                    Some(outcome.idempotency_key),
                    outcome.compensation_available,
                )
                .await?;
                return Ok(());
            }
            Err(err) => {
                let reason = err.failure_reason();
                let retryable =
                    reason.is_retryable() && attempt < max_attempts && task_spec.retry.is_some();
                if retryable {
                    let retry = task_spec
                        .retry
                        .as_ref()
                        .ok_or_else(|| OrchestratorError::Internal("retry policy vanished".into()))?;
                    let delay_ms = jittered_delay_ms(retry, attempt.saturating_add(1));
                    inner.telemetry.record(&TelemetryEvent::TaskRetried {
                        workflow_id: workflow_id.clone(),
                        task_id: task_id.clone(),
                        reason,
                        delay_ms,
                    });
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    continue;
                }
                fail_task(inner, ctx, task_id, reason, &err.to_string()).await?;
                return Ok(());
            }
        }
    }
}

/// Evaluates the policy gate for a task. Returns true when execution may
/// proceed; on denial or suspension the task state is already updated.
async fn evaluate_policy_gate(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    task_id: &TaskId,
    task_spec: &TaskSpec,
    principal: &Principal,
    workflow_id: &WorkflowId,
) -> Result<bool, OrchestratorError> {
    let action = PolicyAction {
        action_id: task_action_id(workflow_id, task_id),
        name: task_spec.name.clone(),
        risk_tier: task_spec.risk_tier.unwrap_or(RiskTier::Low),
        required_permissions: task_spec.required_permissions.clone(),
        intent: None,
        data_zone: None,
        allowed_tools: task_spec.allowed_tools.clone(),
    };
    let outcome = inner
        .policy
        .evaluate(
            principal,
            &action,
            task_spec.tool.as_ref(),
            Provenance::new(task_id.as_str(), "policy"),
        )
        .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
    let decision_label = match &outcome {
        PolicyOutcome::Allowed { .. } => "allowed",
        PolicyOutcome::Denied { .. } => "denied",
        PolicyOutcome::PendingHuman { .. } => "pending_human",
    };
    inner.telemetry.record(&TelemetryEvent::GateDecision {
        workflow_id: workflow_id.clone(),
        task_id: task_id.clone(),
        gate: "policy".to_string(),
        decision: decision_label.to_string(),
    });
    match outcome {
        PolicyOutcome::Allowed { .. } => Ok(true),
        PolicyOutcome::Denied { reason } => {
            let failure = reason.failure_reason();
            let mut guard = ctx.state.lock().await;
            if let Some(task) = guard.task_states.get_mut(task_id) {
                task.phase = TaskPhase::Failed;
                task.last_error = Some(failure);
                task.error_detail = Some("policy gate denied".to_string());
                task.ended_at = Some(inner.clock.now());
            }
            let event = inner.emit(
                &mut guard,
                EventKind::PolicyBlocked,
                Some(task_id.clone()),
                json!({"reason": failure.as_str(), "detail": "policy gate denied"}),
            )?;
            inner.memory_note(
                &guard,
                task_id,
                json!({"event": "policy_blocked", "reason": failure.as_str()}),
                Some(event.event_id.clone()),
            )?;
            inner.persist(&mut guard)?;
            Ok(false)
        }
        PolicyOutcome::PendingHuman { token, expires_at, required_approvals } => {
            let mut guard = ctx.state.lock().await;
            if let Some(task) = guard.task_states.get_mut(task_id) {
                task.phase = TaskPhase::AwaitingApproval;
                task.approval = Some(ApprovalState {
                    token: token.clone(),
                    expires_at,
                    approvers: Vec::new(),
                    required_approvals,
                    granted: false,
                });
            }
            let event = inner.emit(
                &mut guard,
                EventKind::TaskAwaitingApproval,
                Some(task_id.clone()),
                json!({
                    "token": token,
                    "expires_at": expires_at.to_rfc3339(),
                    "required_approvals": required_approvals,
                }),
            )?;
            inner.memory_note(
                &guard,
                task_id,
                json!({"event": "awaiting_approval", "required_approvals": required_approvals}),
                Some(event.event_id.clone()),
            )?;
            inner.persist(&mut guard)?;
            Ok(false)
        }
    }
}

/// Marks a task succeeded and registers its compensation.
#[allow(
    clippy::too_many_arguments,
    reason = "Terminal transition bundles every persisted attribute in one place."
)]
async fn succeed_task(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    task_id: &TaskId,
    task_spec: &TaskSpec,
    data: Value,
    attempt: u32,
    idempotency_key: Option<String>,
    tool_compensation_available: bool,
) -> Result<(), OrchestratorError> {
    let mut guard = ctx.state.lock().await;
    let branch = if matches!(task_spec.kind, TaskKind::Decision) {
        data.get("branch").and_then(Value::as_str).map(str::to_string)
    } else {
        None
    };
    if let Some(task) = guard.task_states.get_mut(task_id) {
        task.phase = TaskPhase::Succeeded;
        task.output = Some(data.clone());
        task.branch = branch.clone();
        task.idempotency_key = idempotency_key.clone();
        task.ended_at = Some(inner.clock.now());
    }

    let already_registered =
        guard.compensation_stack.iter().any(|record| record.task_id == *task_id);
    if !already_registered {
        let record = task_spec.compensation.as_ref().map_or_else(
            || {
                task_spec.tool.as_ref().filter(|_| tool_compensation_available).map(|tool| {
                    CompensationRecord {
                        task_id: task_id.clone(),
                        tool: tool.clone(),
                        args: Value::Null,
                        original_inputs: Value::Object(task_spec.inputs.clone()),
                        result: data.clone(),
                        registered_at: inner.clock.now(),
                    }
                })
            },
            |compensation| {
                Some(CompensationRecord {
                    task_id: task_id.clone(),
                    tool: compensation.tool.clone(),
                    args: compensation.args.clone(),
                    original_inputs: Value::Object(task_spec.inputs.clone()),
                    result: data.clone(),
                    registered_at: inner.clock.now(),
                })
            },
        );
        if let Some(record) = record {
            guard.compensation_stack.push(record);
        }
    }

    let mut metadata = json!({"attempt": attempt, "output": data});
    if let Some(branch) = &branch
        && let Some(map) = metadata.as_object_mut()
    {
        map.insert("branch".to_string(), json!(branch));
    }
    if let Some(key) = &idempotency_key
        && let Some(map) = metadata.as_object_mut()
    {
        map.insert("idempotency_key".to_string(), json!(key));
    }
    let event = inner.emit(&mut guard, EventKind::TaskCompleted, Some(task_id.clone()), metadata)?;
    inner.memory_note(
        &guard,
        task_id,
        json!({"event": "task_completed", "attempt": attempt}),
        Some(event.event_id.clone()),
    )?;
    inner.audit_task(
        &guard,
        task_id,
        "task_completed",
        json!({"phase": "running"}),
        json!({"phase": "succeeded", "attempt": attempt}),
        Some(event.event_id),
    )?;
    inner.persist(&mut guard)?;
    Ok(())
}

/// Marks a task failed with a taxonomy reason.
async fn fail_task(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    task_id: &TaskId,
    reason: FailureReason,
    detail: &str,
) -> Result<(), OrchestratorError> {
    let mut guard = ctx.state.lock().await;
    if let Some(task) = guard.task_states.get_mut(task_id) {
        task.phase = TaskPhase::Failed;
        task.last_error = Some(reason);
        task.error_detail = Some(detail.to_string());
        task.ended_at = Some(inner.clock.now());
    }
    let event = inner.emit(
        &mut guard,
        EventKind::TaskFailed,
        Some(task_id.clone()),
        json!({"reason": reason.as_str(), "detail": detail}),
    )?;
    inner.memory_note(
        &guard,
        task_id,
        json!({"event": "task_failed", "reason": reason.as_str()}),
        Some(event.event_id.clone()),
    )?;
    inner.audit_task(
        &guard,
        task_id,
        "task_failed",
        json!({"phase": "running"}),
        json!({"phase": "failed", "reason": reason.as_str()}),
        Some(event.event_id),
    )?;
    inner.persist(&mut guard)?;
    Ok(())
}

/// Marks a task failed because a CRV gate blocked its commit.
async fn fail_task_blocked(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    task_id: &TaskId,
    detail: &str,
    failure_code: Option<&str>,
    stage: &str,
) -> Result<(), OrchestratorError> {
    let mut guard = ctx.state.lock().await;
    if let Some(task) = guard.task_states.get_mut(task_id) {
        task.phase = TaskPhase::Failed;
        task.last_error = Some(FailureReason::CrvBlocked);
        task.error_detail = Some(detail.to_string());
        task.ended_at = Some(inner.clock.now());
    }
    let event = inner.emit(
        &mut guard,
        EventKind::CrvBlocked,
        Some(task_id.clone()),
        json!({
            "reason": FailureReason::CrvBlocked.as_str(),
            "detail": detail,
            "failure_code": failure_code,
            "stage": stage,
        }),
    )?;
    inner.telemetry.record(&TelemetryEvent::GateDecision {
        workflow_id: guard.workflow_id.clone(),
        task_id: task_id.clone(),
        gate: format!("crv_{stage}"),
        decision: "blocked".to_string(),
    });
    inner.memory_note(
        &guard,
        task_id,
        json!({"event": "crv_blocked", "failure_code": failure_code}),
        Some(event.event_id.clone()),
    )?;
    inner.audit_task(
        &guard,
        task_id,
        "crv_blocked",
        json!({"phase": "running"}),
        json!({"phase": "failed", "failure_code": failure_code, "stage": stage}),
        Some(event.event_id),
    )?;
    inner.persist(&mut guard)?;
    Ok(())
}

/// Compensates the current task's own side effect after a CRV block.
async fn compensate_current_task(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    task_id: &TaskId,
    task_spec: &TaskSpec,
    data: &Value,
) -> Result<(), OrchestratorError> {
    let record = task_spec.compensation.as_ref().map_or_else(
        || {
            task_spec.tool.as_ref().map(|tool| CompensationRecord {
                task_id: task_id.clone(),
                tool: tool.clone(),
                args: Value::Null,
                original_inputs: Value::Object(task_spec.inputs.clone()),
                result: data.clone(),
                registered_at: inner.clock.now(),
            })
        },
        |compensation| {
            Some(CompensationRecord {
                task_id: task_id.clone(),
                tool: compensation.tool.clone(),
                args: compensation.args.clone(),
                original_inputs: Value::Object(task_spec.inputs.clone()),
                result: data.clone(),
                registered_at: inner.clock.now(),
            })
        },
    );
    let Some(record) = record else {
        return Ok(());
    };
    if task_spec.compensation.is_none() {
        // Hook-based compensation only runs when the tool declares it.
        let supported = inner.tools_supports_compensation(&record.tool);
        if !supported {
            return Ok(());
        }
    }
    if let Err(err) = execute_one_compensation(inner, ctx, &record).await {
        let mut guard = ctx.state.lock().await;
        let event = inner.emit(
            &mut guard,
            EventKind::CompensationFailed,
            Some(task_id.clone()),
            json!({"detail": err.to_string()}),
        )?;
        inner.audit_task(
            &guard,
            task_id,
            "compensation_failed",
            json!({"tool": record.tool.as_str()}),
            json!({"detail": err.to_string()}),
            Some(event.event_id),
        )?;
        inner.persist(&mut guard)?;
    }
    Ok(())
}

/// Jittered retry delay for `attempt` (±25 % when jitter is enabled).
fn jittered_delay_ms(retry: &crate::core::RetryPolicy, attempt: u32) -> u64 {
    let base = retry.delay_ms(attempt);
    if !retry.jitter || base == 0 {
        return base;
    }
    let factor = 0.75 + rand::thread_rng().r#gen::<f64>() * 0.5;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        reason = "Jitter factor keeps the product within [0.75, 1.25] of a u64."
    )]
    let jittered = ((base as f64) * factor).round() as u64;
    jittered.max(1)
}

// ============================================================================
// SECTION: Compensation Pass
// ============================================================================

/// Runs the saga pass: pops compensation records in LIFO order and executes
/// each through the tool layer, best-effort.
async fn run_compensation_pass(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
) -> Result<(), OrchestratorError> {
    {
        let mut guard = ctx.state.lock().await;
        match guard.status {
            WorkflowStatus::Failed => {
                guard.status = WorkflowStatus::Compensating;
                let event =
                    inner.emit(&mut guard, EventKind::CompensationTriggered, None, json!({}))?;
                inner
                    .audit
                    .append(
                        guard.principal.principal_id.as_str(),
                        "compensation_triggered",
                        json!({"status": "failed"}),
                        json!({"status": "compensating"}),
                        Provenance::new(guard.workflow_id.as_str(), "compensate")
                            .with_event(event.event_id.clone()),
                    )
                    .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
                inner.persist(&mut guard)?;
            }
            WorkflowStatus::Compensating => {}
            _ => return Ok(()),
        }
    }

    loop {
        let record = {
            let mut guard = ctx.state.lock().await;
            let record = guard.compensation_stack.pop();
            if record.is_some() {
                inner.persist(&mut guard)?;
            }
            record
        };
        let Some(record) = record else {
            break;
        };
        if let Err(err) = execute_one_compensation(inner, ctx, &record).await {
            let halt = !inner.config.compensation_best_effort;
            let mut guard = ctx.state.lock().await;
            let event = inner.emit(
                &mut guard,
                EventKind::CompensationFailed,
                Some(record.task_id.clone()),
                json!({"detail": err.to_string()}),
            )?;
            inner.audit_task(
                &guard,
                &record.task_id,
                "compensation_failed",
                json!({"tool": record.tool.as_str()}),
                json!({"detail": err.to_string()}),
                Some(event.event_id),
            )?;
            inner.telemetry.record(&TelemetryEvent::CompensationStep {
                workflow_id: guard.workflow_id.clone(),
                task_id: record.task_id.clone(),
                succeeded: false,
            });
            inner.persist(&mut guard)?;
            if halt {
                guard.status = WorkflowStatus::Failed;
                inner.persist(&mut guard)?;
                return Ok(());
            }
        }
    }

    let mut guard = ctx.state.lock().await;
    guard.status = WorkflowStatus::Compensated;
    guard.ended_at = Some(inner.clock.now());
    let event = inner.emit(
        &mut guard,
        EventKind::StateUpdated,
        None,
        json!({"status": WorkflowStatus::Compensated.as_str()}),
    )?;
    inner
        .audit
        .append(
            guard.principal.principal_id.as_str(),
            "compensation_completed",
            json!({"status": "compensating"}),
            json!({"status": "compensated"}),
            Provenance::new(guard.workflow_id.as_str(), "compensate")
                .with_event(event.event_id.clone()),
        )
        .map_err(|err| OrchestratorError::Audit(err.to_string()))?;
    inner.persist(&mut guard)?;
    Ok(())
}

/// Executes one compensation record, emitting its completion event.
async fn execute_one_compensation(
    inner: &Arc<Inner>,
    ctx: &Arc<ExecContext>,
    record: &CompensationRecord,
) -> Result<(), OrchestratorError> {
    let (workflow_id, context_snapshot) = {
        let guard = ctx.state.lock().await;
        (guard.workflow_id.clone(), guard.context.clone())
    };
    let invocation_ctx = ToolInvocationContext {
        tenant_id: ctx.tenant_id,
        workflow_id: workflow_id.clone(),
        task_id: record.task_id.clone(),
        step_id: StepId::new("compensate"),
        attempt: 1,
        context: context_snapshot,
    };
    inner
        .tools
        .compensate(record, invocation_ctx)
        .await
        .map_err(|err| OrchestratorError::Internal(err.to_string()))?;

    let mut guard = ctx.state.lock().await;
    if let Some(task) = guard.task_states.get_mut(&record.task_id)
        && task.phase == TaskPhase::Succeeded
    {
        task.phase = TaskPhase::Compensated;
    }
    let event = inner.emit(
        &mut guard,
        EventKind::CompensationCompleted,
        Some(record.task_id.clone()),
        json!({"tool": record.tool.as_str()}),
    )?;
    inner.audit_task(
        &guard,
        &record.task_id,
        "compensation_completed",
        json!({"tool": record.tool.as_str()}),
        json!({"compensated": true}),
        Some(event.event_id),
    )?;
    inner.telemetry.record(&TelemetryEvent::CompensationStep {
        workflow_id: guard.workflow_id.clone(),
        task_id: record.task_id.clone(),
        succeeded: true,
    });
    inner.persist(&mut guard)?;
    Ok(())
}

impl Inner {
    /// Returns true when the registered tool declares usable compensation.
    fn tools_supports_compensation(&self, tool_id: &crate::core::ToolId) -> bool {
        self.tools.registry_supports_compensation(tool_id)
    }
}
