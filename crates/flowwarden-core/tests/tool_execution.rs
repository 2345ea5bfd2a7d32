// crates/flowwarden-core/tests/tool_execution.rs
// ============================================================================
// Module: Tool Execution Layer Tests
// Description: Idempotency keys, cache replay, schema checks, and timeouts.
// ============================================================================
//! ## Overview
//! Covers the wrapping algorithm: key derivation over normalized inputs,
//! replay of cached side-effecting results, cache bypass for pure tools,
//! never-cached failures, schema violations at both boundaries, and the
//! cooperative timeout.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::sync::Arc;

use common::StubTool;
use flowwarden_core::Clock;
use flowwarden_core::InMemoryToolResultCache;
use flowwarden_core::StepId;
use flowwarden_core::SystemClock;
use flowwarden_core::TaskId;
use flowwarden_core::TenantId;
use flowwarden_core::ToolDescriptor;
use flowwarden_core::ToolError;
use flowwarden_core::ToolExecutionLayer;
use flowwarden_core::ToolExecutionRequest;
use flowwarden_core::ToolFailure;
use flowwarden_core::ToolId;
use flowwarden_core::ToolInvocationContext;
use flowwarden_core::ToolRegistry;
use flowwarden_core::ToolResultCache;
use serde_json::Value;
use serde_json::json;

/// Builds a layer over a fresh registry and cache.
fn layer() -> (ToolExecutionLayer, Arc<ToolRegistry>, Arc<InMemoryToolResultCache>) {
    let registry = Arc::new(ToolRegistry::new());
    let cache = Arc::new(InMemoryToolResultCache::new());
    let layer = ToolExecutionLayer::new(
        Arc::clone(&registry),
        Some(cache.clone() as Arc<dyn ToolResultCache>),
        Arc::new(SystemClock) as Arc<dyn Clock>,
    );
    (layer, registry, cache)
}

/// Builds an invocation context for the given step.
fn ctx(task: &str, step: &str) -> ToolInvocationContext {
    ToolInvocationContext {
        tenant_id: TenantId::from_raw(1).expect("tenant"),
        workflow_id: "wf-1".into(),
        task_id: task.into(),
        step_id: step.into(),
        attempt: 1,
        context: serde_json::Map::new(),
    }
}

/// Builds a request with default knobs.
fn request(tool: &str, inputs: Value) -> ToolExecutionRequest {
    ToolExecutionRequest {
        tool_id: tool.into(),
        inputs,
        ctx: ctx("task-1", "invoke"),
        timeout_ms: None,
        request_id: None,
        explicit_key: None,
        cancel: None,
    }
}

#[test]
fn idempotency_key_ignores_object_key_order() {
    let args_a = json!({"b": 2, "a": 1, "nested": {"y": 2, "x": 1}});
    let args_b = json!({"a": 1, "nested": {"x": 1, "y": 2}, "b": 2});
    let key_a = ToolExecutionLayer::idempotency_key(
        &TaskId::new("t"),
        &StepId::new("s"),
        &ToolId::new("tool"),
        &args_a,
        None,
    )
    .expect("key a");
    let key_b = ToolExecutionLayer::idempotency_key(
        &TaskId::new("t"),
        &StepId::new("s"),
        &ToolId::new("tool"),
        &args_b,
        None,
    )
    .expect("key b");
    assert_eq!(key_a, key_b);
    assert_eq!(key_a.len(), 64, "256-bit key, hex-encoded");
}

#[test]
fn idempotency_key_distinguishes_tuple_components() {
    let args = json!({"a": 1});
    let base = ToolExecutionLayer::idempotency_key(
        &TaskId::new("t"),
        &StepId::new("s"),
        &ToolId::new("tool"),
        &args,
        None,
    )
    .expect("key");
    for (task, step, tool) in [("t2", "s", "tool"), ("t", "s2", "tool"), ("t", "s", "tool2")] {
        let other = ToolExecutionLayer::idempotency_key(
            &TaskId::new(task),
            &StepId::new(step),
            &ToolId::new(tool),
            &args,
            None,
        )
        .expect("key");
        assert_ne!(base, other);
    }
    let arrays_differ = ToolExecutionLayer::idempotency_key(
        &TaskId::new("t"),
        &StepId::new("s"),
        &ToolId::new("tool"),
        &json!({"a": [1, 2]}),
        None,
    )
    .expect("key");
    let arrays_reordered = ToolExecutionLayer::idempotency_key(
        &TaskId::new("t"),
        &StepId::new("s"),
        &ToolId::new("tool"),
        &json!({"a": [2, 1]}),
        None,
    )
    .expect("key");
    assert_ne!(arrays_differ, arrays_reordered, "array order is preserved");
}

#[tokio::test]
async fn side_effecting_results_replay_from_cache() {
    let (layer, registry, cache) = layer();
    let tool = StubTool::succeeding("writer", json!({"ok": true}));
    registry.register(tool.clone());

    let first = layer.execute(request("writer", json!({"k": "v"}))).await.expect("first");
    assert!(!first.replayed);
    assert!(cache.has(&first.idempotency_key).expect("has"));

    let second = layer.execute(request("writer", json!({"k": "v"}))).await.expect("second");
    assert!(second.replayed, "equal keys replay the cached record");
    assert_eq!(second.data, first.data);
    assert_eq!(tool.invocation_count(), 1, "the underlying tool runs at most once");
}

#[tokio::test]
async fn pure_tools_bypass_the_cache() {
    let (layer, registry, cache) = layer();
    let tool = StubTool::new(ToolDescriptor::pure("reader", "reader"), |_, _| {
        Ok(json!({"ok": true}))
    });
    registry.register(tool.clone());

    let first = layer.execute(request("reader", json!({}))).await.expect("first");
    let second = layer.execute(request("reader", json!({}))).await.expect("second");
    assert!(!first.replayed);
    assert!(!second.replayed, "a tool without side effects is never read from cache");
    assert_eq!(tool.invocation_count(), 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn failures_are_never_cached() {
    let (layer, registry, cache) = layer();
    let tool = StubTool::new(ToolDescriptor::side_effecting("flaky", "flaky"), |_, _| {
        Err(ToolFailure::Execution("boom".to_string()))
    });
    registry.register(tool.clone());

    let err = layer.execute(request("flaky", json!({}))).await.unwrap_err();
    assert!(matches!(err, ToolError::Execution(_)));
    assert!(cache.is_empty(), "failures never enter the cache");

    let err = layer.execute(request("flaky", json!({}))).await.unwrap_err();
    assert!(matches!(err, ToolError::Execution(_)));
    assert_eq!(tool.invocation_count(), 2, "no replay of failures");
}

#[tokio::test]
async fn input_schema_violation_is_reported() {
    let (layer, registry, _) = layer();
    let mut descriptor = ToolDescriptor::side_effecting("strict", "strict");
    descriptor.input_schema = Some(json!({
        "type": "object",
        "required": ["name"],
        "properties": {"name": {"type": "string"}}
    }));
    registry.register(StubTool::new(descriptor, |_, _| Ok(json!({"ok": true}))));

    let err = layer.execute(request("strict", json!({"name": 42}))).await.unwrap_err();
    assert!(matches!(err, ToolError::InputSchemaViolation(_)));
}

#[tokio::test]
async fn output_schema_violation_is_reported() {
    let (layer, registry, cache) = layer();
    let mut descriptor = ToolDescriptor::side_effecting("sloppy", "sloppy");
    descriptor.output_schema = Some(json!({
        "type": "object",
        "required": ["ok"],
        "properties": {"ok": {"type": "boolean"}}
    }));
    registry.register(StubTool::new(descriptor, |_, _| Ok(json!({"ok": "yes"}))));

    let err = layer.execute(request("sloppy", json!({}))).await.unwrap_err();
    assert!(matches!(err, ToolError::OutputSchemaViolation(_)));
    assert!(cache.is_empty(), "schema-invalid output is not cached");
}

#[tokio::test]
async fn slow_tools_time_out() {
    let (layer, registry, _) = layer();
    let mut descriptor = ToolDescriptor::side_effecting("slow", "slow");
    descriptor.timeout_ms = Some(20);
    registry.register(SlowTool::new(descriptor));

    let err = layer.execute(request("slow", json!({}))).await.unwrap_err();
    assert!(matches!(err, ToolError::Timeout { timeout_ms: 20 }));
}

#[tokio::test]
async fn unknown_tool_is_reported() {
    let (layer, _, _) = layer();
    let err = layer.execute(request("ghost", json!({}))).await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));
}

#[tokio::test]
async fn request_id_strategy_keys_each_attempt_separately() {
    let (layer, registry, _) = layer();
    let mut descriptor = ToolDescriptor::side_effecting("mailer", "mailer");
    descriptor.idempotency = flowwarden_core::IdempotencyStrategy::RequestId;
    let tool = StubTool::new(descriptor, |invocation, _| Ok(json!({"n": invocation})));
    registry.register(tool.clone());

    let mut first = request("mailer", json!({}));
    first.request_id = Some("req-1".to_string());
    let mut second = request("mailer", json!({}));
    second.request_id = Some("req-2".to_string());
    let mut repeat = request("mailer", json!({}));
    repeat.request_id = Some("req-1".to_string());

    let first = layer.execute(first).await.expect("first");
    let second = layer.execute(second).await.expect("second");
    let repeat = layer.execute(repeat).await.expect("repeat");

    assert_ne!(first.idempotency_key, second.idempotency_key);
    assert_eq!(first.idempotency_key, repeat.idempotency_key);
    assert!(repeat.replayed);
    assert_eq!(tool.invocation_count(), 2);
}

// ============================================================================
// SECTION: Slow Tool Fixture
// ============================================================================

/// Tool that sleeps well past any test timeout.
struct SlowTool {
    /// Capability descriptor.
    descriptor: ToolDescriptor,
}

impl SlowTool {
    /// Creates the fixture.
    fn new(descriptor: ToolDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
        })
    }
}

#[async_trait::async_trait]
impl flowwarden_core::Tool for SlowTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        _inputs: &Value,
        _ctx: &ToolInvocationContext,
    ) -> Result<Value, ToolFailure> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(json!({"ok": true}))
    }
}
