// crates/flowwarden-core/tests/common/mod.rs
// ============================================================================
// Module: Shared Test Harness
// Description: In-memory orchestrator assembly and scriptable stub tools.
// ============================================================================

//! Shared fixtures: a fully in-memory orchestrator harness, scriptable stub
//! tools with invocation counters, and workflow spec builders.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers; each test binary uses a subset."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use flowwarden_core::AuditLog;
use flowwarden_core::GateChain;
use flowwarden_core::GoalGuard;
use flowwarden_core::InMemoryEventLog;
use flowwarden_core::InMemoryStateStore;
use flowwarden_core::InMemoryToolResultCache;
use flowwarden_core::MemoryStore;
use flowwarden_core::Orchestrator;
use flowwarden_core::OrchestratorConfig;
use flowwarden_core::Permission;
use flowwarden_core::PolicyConfig;
use flowwarden_core::Principal;
use flowwarden_core::PrincipalId;
use flowwarden_core::PrincipalKind;
use flowwarden_core::SystemClock;
use flowwarden_core::TenantId;
use flowwarden_core::Tool;
use flowwarden_core::ToolDescriptor;
use flowwarden_core::ToolExecutionLayer;
use flowwarden_core::ToolFailure;
use flowwarden_core::ToolInvocationContext;
use flowwarden_core::ToolRegistry;
use flowwarden_core::spec::DependencySpec;
use flowwarden_core::spec::TaskKind;
use flowwarden_core::spec::TaskSpec;
use flowwarden_core::spec::WorkflowSpec;
use serde_json::Value;

// ============================================================================
// SECTION: Stub Tools
// ============================================================================

/// Behavior function: `(invocation_number, inputs) -> result`.
pub type StubBehavior = dyn Fn(u32, &Value) -> Result<Value, ToolFailure> + Send + Sync;

/// Scriptable tool with an invocation counter and compensation recorder.
pub struct StubTool {
    /// Capability descriptor.
    descriptor: ToolDescriptor,
    /// Number of `invoke` calls so far.
    invocations: Arc<AtomicU32>,
    /// Scripted behavior.
    behavior: Box<StubBehavior>,
    /// Recorded `(original_inputs, result)` compensation calls.
    compensations: Arc<Mutex<Vec<(Value, Value)>>>,
}

impl StubTool {
    /// Creates a stub with scripted behavior.
    pub fn new(
        descriptor: ToolDescriptor,
        behavior: impl Fn(u32, &Value) -> Result<Value, ToolFailure> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            invocations: Arc::new(AtomicU32::new(0)),
            behavior: Box::new(behavior),
            compensations: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Creates a side-effecting stub that always returns `output`.
    pub fn succeeding(tool_id: &str, output: Value) -> Arc<Self> {
        Self::new(ToolDescriptor::side_effecting(tool_id, tool_id), move |_, _| Ok(output.clone()))
    }

    /// Returns the invocation count.
    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Returns recorded compensation calls.
    pub fn recorded_compensations(&self) -> Vec<(Value, Value)> {
        self.compensations.lock().expect("compensations lock").clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        inputs: &Value,
        _ctx: &ToolInvocationContext,
    ) -> Result<Value, ToolFailure> {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        (self.behavior)(invocation, inputs)
    }

    async fn compensate(
        &self,
        original_inputs: &Value,
        result: &Value,
    ) -> Result<(), ToolFailure> {
        self.compensations
            .lock()
            .expect("compensations lock")
            .push((original_inputs.clone(), result.clone()));
        Ok(())
    }
}

/// Tool recording the order of its invocations' `args` payloads; used as a
/// task-level compensation target to observe LIFO ordering.
pub struct RecorderTool {
    /// Capability descriptor.
    descriptor: ToolDescriptor,
    /// Recorded invocation inputs in call order.
    calls: Arc<Mutex<Vec<Value>>>,
}

impl RecorderTool {
    /// Creates a recorder tool with the given identifier.
    pub fn new(tool_id: &str) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ToolDescriptor::side_effecting(tool_id, tool_id),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Returns recorded inputs in call order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Tool for RecorderTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        inputs: &Value,
        _ctx: &ToolInvocationContext,
    ) -> Result<Value, ToolFailure> {
        self.calls.lock().expect("calls lock").push(inputs.clone());
        Ok(serde_json::json!({"ok": true}))
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Fully in-memory orchestrator assembly.
pub struct Harness {
    /// Tenant used by the harness.
    pub tenant: TenantId,
    /// State store.
    pub store: Arc<InMemoryStateStore>,
    /// Event log.
    pub events: Arc<InMemoryEventLog>,
    /// Audit log.
    pub audit: Arc<AuditLog>,
    /// Memory store.
    pub memory: Arc<MemoryStore>,
    /// Idempotency cache.
    pub cache: Arc<InMemoryToolResultCache>,
    /// Tool registry.
    pub registry: Arc<ToolRegistry>,
    /// Policy gate.
    pub policy: Arc<GoalGuard>,
    /// Orchestrator under test.
    pub orchestrator: Orchestrator,
}

/// Harness construction knobs.
#[derive(Default)]
pub struct HarnessOptions {
    /// Post-commit CRV chain.
    pub post_commit_gates: Option<GateChain>,
    /// Pre-commit CRV chain.
    pub pre_commit_gates: Option<GateChain>,
    /// Orchestrator configuration override.
    pub config: Option<OrchestratorConfig>,
    /// Policy configuration override.
    pub policy_config: Option<PolicyConfig>,
    /// Restore hook for rollback tests.
    pub restore_hook: Option<Arc<dyn flowwarden_core::RestoreHook>>,
}

/// Builds a harness over shared component instances, so a second harness
/// over the same stores models an orchestrator restart.
pub fn harness_over(
    store: Arc<InMemoryStateStore>,
    events: Arc<InMemoryEventLog>,
    audit: Arc<AuditLog>,
    memory: Arc<MemoryStore>,
    cache: Arc<InMemoryToolResultCache>,
    registry: Arc<ToolRegistry>,
    options: HarnessOptions,
) -> Harness {
    let clock = Arc::new(SystemClock);
    let policy = Arc::new(GoalGuard::with_config(
        Arc::clone(&audit),
        clock.clone() as Arc<dyn flowwarden_core::Clock>,
        options.policy_config.unwrap_or_default(),
    ));
    let tools = Arc::new(ToolExecutionLayer::new(
        Arc::clone(&registry),
        Some(cache.clone() as Arc<dyn flowwarden_core::ToolResultCache>),
        clock.clone() as Arc<dyn flowwarden_core::Clock>,
    ));
    let mut builder = Orchestrator::builder()
        .state_store(store.clone() as Arc<dyn flowwarden_core::StateStore>)
        .event_log(events.clone() as Arc<dyn flowwarden_core::EventLog>)
        .audit(Arc::clone(&audit))
        .memory(Arc::clone(&memory))
        .tools(Arc::clone(&tools))
        .policy(Arc::clone(&policy))
        .clock(clock as Arc<dyn flowwarden_core::Clock>)
        .config(options.config.unwrap_or_default());
    if let Some(gates) = options.post_commit_gates {
        builder = builder.post_commit_gates(Arc::new(gates));
    }
    if let Some(gates) = options.pre_commit_gates {
        builder = builder.pre_commit_gates(Arc::new(gates));
    }
    if let Some(hook) = options.restore_hook {
        builder = builder.restore_hook(hook);
    }
    let orchestrator = builder.build().expect("orchestrator build");
    Harness {
        tenant: TenantId::from_raw(1).expect("tenant"),
        store,
        events,
        audit,
        memory,
        cache,
        registry,
        policy,
        orchestrator,
    }
}

/// Builds a fresh harness with default options.
pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

/// Builds a fresh harness with explicit options.
pub fn harness_with(options: HarnessOptions) -> Harness {
    let clock = Arc::new(SystemClock);
    let audit = Arc::new(AuditLog::new(clock.clone() as Arc<dyn flowwarden_core::Clock>));
    let memory = Arc::new(MemoryStore::new(
        Arc::clone(&audit),
        clock as Arc<dyn flowwarden_core::Clock>,
    ));
    harness_over(
        Arc::new(InMemoryStateStore::new()),
        Arc::new(InMemoryEventLog::new()),
        audit,
        memory,
        Arc::new(InMemoryToolResultCache::new()),
        Arc::new(ToolRegistry::new()),
        options,
    )
}

// ============================================================================
// SECTION: Spec Builders
// ============================================================================

/// Returns a principal holding the given permissions.
pub fn principal_with(permissions: Vec<Permission>) -> Principal {
    Principal {
        principal_id: PrincipalId::new("agent-1"),
        kind: PrincipalKind::Agent,
        permissions,
    }
}

/// Returns an agent principal with no permissions.
pub fn agent_principal() -> Principal {
    principal_with(Vec::new())
}

/// Builds an action task bound to a tool.
pub fn action_task(task_id: &str, tool: &str) -> TaskSpec {
    TaskSpec {
        task_id: task_id.into(),
        name: task_id.to_string(),
        kind: TaskKind::Action,
        tool: Some(tool.into()),
        inputs: serde_json::Map::new(),
        output_schema: None,
        retry: None,
        timeout_ms: None,
        risk_tier: None,
        required_permissions: Vec::new(),
        allowed_tools: None,
        compensation: None,
        idempotency_key: None,
    }
}

/// Builds a linear workflow `tasks[0] -> tasks[1] -> ...` over one tool.
pub fn linear_spec(workflow_id: &str, task_ids: &[&str], tool: &str) -> WorkflowSpec {
    let tasks = task_ids.iter().map(|task_id| action_task(task_id, tool)).collect();
    let mut dependencies = std::collections::BTreeMap::new();
    for pair in task_ids.windows(2) {
        dependencies.insert(pair[1].into(), vec![DependencySpec::on(pair[0])]);
    }
    WorkflowSpec {
        workflow_id: workflow_id.into(),
        name: workflow_id.to_string(),
        goal: None,
        constraints: None,
        success_criteria: None,
        tasks,
        dependencies,
    }
}
