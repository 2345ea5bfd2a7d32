// crates/flowwarden-core/tests/orchestrator_guards.rs
// ============================================================================
// Module: Orchestrator Gate Tests
// Description: CRV blocking, policy denial, approvals, and saga ordering.
// ============================================================================
//! ## Overview
//! Covers the governance paths: a post-commit CRV block failing the task and
//! unwinding earlier side effects in LIFO order, policy denial, and the
//! HIGH-risk human approval flow with single-use tokens.

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

use common::HarnessOptions;
use common::RecorderTool;
use common::StubTool;
use common::agent_principal;
use common::harness;
use common::harness_with;
use common::linear_spec;
use flowwarden_core::CrvGate;
use flowwarden_core::EventKind;
use flowwarden_core::EventLog;
use flowwarden_core::FailureReason;
use flowwarden_core::GateChain;
use flowwarden_core::PrincipalId;
use flowwarden_core::RiskTier;
use flowwarden_core::StateStore;
use flowwarden_core::TaskPhase;
use flowwarden_core::ValidationFailureCode;
use flowwarden_core::Validator;
use flowwarden_core::WorkflowId;
use flowwarden_core::WorkflowStatus;
use flowwarden_core::spec::CompensationSpec;
use serde_json::json;

#[tokio::test]
async fn crv_block_fails_task_and_compensates_in_lifo_order() {
    let post_gate = CrvGate::new(
        "post",
        vec![Validator::range("positive", "/value", Some(0.0), None).expect("range")],
    );
    let fixture = harness_with(HarnessOptions {
        post_commit_gates: Some(GateChain::new(vec![post_gate])),
        ..HarnessOptions::default()
    });

    let undo = RecorderTool::new("undo");
    fixture.registry.register(undo.clone());
    // a and b succeed (value 1), c returns a negative value and is blocked.
    fixture.registry.register(StubTool::new(
        flowwarden_core::ToolDescriptor::side_effecting("step", "step"),
        |invocation, _| {
            if invocation < 3 { Ok(json!({"value": 1})) } else { Ok(json!({"value": -5})) }
        },
    ));

    let mut spec = linear_spec("wf-1", &["a", "b", "c"], "step");
    for task in &mut spec.tasks {
        task.compensation = Some(CompensationSpec {
            tool: "undo".into(),
            args: json!({"undoing": task.task_id.as_str()}),
        });
    }
    fixture.orchestrator.submit(fixture.tenant, spec, agent_principal()).expect("submit");
    let status = fixture
        .orchestrator
        .run(fixture.tenant, &WorkflowId::new("wf-1"))
        .await
        .expect("run");
    assert_eq!(status, WorkflowStatus::Compensated);

    let state = fixture
        .store
        .load(fixture.tenant, &WorkflowId::new("wf-1"))
        .expect("load")
        .expect("state");
    let blocked = state.task(&"c".into()).expect("task c");
    assert_eq!(blocked.phase, TaskPhase::Failed);
    assert_eq!(blocked.last_error, Some(FailureReason::CrvBlocked));

    let events = fixture.events.read(fixture.tenant, &WorkflowId::new("wf-1")).expect("events");
    let crv_blocked = events
        .iter()
        .find(|event| event.kind == EventKind::CrvBlocked)
        .expect("crv_blocked event");
    assert_eq!(
        crv_blocked.metadata.get("failure_code").and_then(serde_json::Value::as_str),
        Some(ValidationFailureCode::OutOfScope.as_str())
    );

    // LIFO: c's own compensation fires at block time, then b, then a.
    let undo_order: Vec<String> = undo
        .calls()
        .iter()
        .filter_map(|inputs| {
            inputs
                .get("args")
                .and_then(|args| args.get("undoing"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .collect();
    assert_eq!(undo_order, vec!["c", "b", "a"], "reverse completion order");

    let compensated = state.task(&"a".into()).expect("task a");
    assert_eq!(compensated.phase, TaskPhase::Compensated);
}

#[tokio::test]
async fn policy_denial_fails_the_task_and_unwinds() {
    let fixture = harness();
    fixture.registry.register(StubTool::succeeding("noop", json!({"ok": true})));

    let mut spec = linear_spec("wf-2", &["a", "b"], "noop");
    if let Some(task) = spec.tasks.iter_mut().find(|task| task.task_id == "b".into()) {
        task.required_permissions = vec![flowwarden_core::Permission::new("deploy", "prod")];
    }
    fixture.orchestrator.submit(fixture.tenant, spec, agent_principal()).expect("submit");
    let status = fixture
        .orchestrator
        .run(fixture.tenant, &WorkflowId::new("wf-2"))
        .await
        .expect("run");
    assert_eq!(status, WorkflowStatus::Compensated);

    let state = fixture
        .store
        .load(fixture.tenant, &WorkflowId::new("wf-2"))
        .expect("load")
        .expect("state");
    let denied = state.task(&"b".into()).expect("task b");
    assert_eq!(denied.phase, TaskPhase::Failed);
    assert_eq!(denied.last_error, Some(FailureReason::InsufficientPermissions));

    let events = fixture.events.read(fixture.tenant, &WorkflowId::new("wf-2")).expect("events");
    assert!(events.iter().any(|event| event.kind == EventKind::PolicyBlocked));
}

#[tokio::test]
async fn high_risk_task_suspends_then_resumes_on_approval() {
    let fixture = harness();
    fixture.registry.register(StubTool::succeeding("noop", json!({"ok": true})));

    // a -> b run freely; c is HIGH risk and suspends.
    let mut spec = linear_spec("wf-3", &["a", "b", "c"], "noop");
    if let Some(task) = spec.tasks.iter_mut().find(|task| task.task_id == "c".into()) {
        task.risk_tier = Some(RiskTier::High);
    }
    fixture.orchestrator.submit(fixture.tenant, spec, agent_principal()).expect("submit");

    let workflow_id = WorkflowId::new("wf-3");
    let status = fixture.orchestrator.run(fixture.tenant, &workflow_id).await.expect("run");
    assert_eq!(status, WorkflowStatus::Running, "suspended awaiting approval");

    let state =
        fixture.store.load(fixture.tenant, &workflow_id).expect("load").expect("state");
    assert_eq!(state.task(&"a".into()).expect("a").phase, TaskPhase::Succeeded);
    assert_eq!(state.task(&"b".into()).expect("b").phase, TaskPhase::Succeeded);
    let suspended = state.task(&"c".into()).expect("c");
    assert_eq!(suspended.phase, TaskPhase::AwaitingApproval);
    let token = suspended.approval.as_ref().expect("approval state").token.clone();

    // Approve once: accepted; the same token a second time: rejected.
    let approver = PrincipalId::new("human-1");
    let accepted = fixture
        .orchestrator
        .approve_task(fixture.tenant, &workflow_id, &"c".into(), &token, &approver)
        .expect("approve");
    assert!(accepted);
    let repeated = fixture
        .orchestrator
        .approve_task(fixture.tenant, &workflow_id, &"c".into(), &token, &approver);
    assert!(
        matches!(repeated, Ok(false) | Err(_)),
        "a consumed token never approves again"
    );

    let status = fixture.orchestrator.run(fixture.tenant, &workflow_id).await.expect("resume");
    assert_eq!(status, WorkflowStatus::Completed);

    // Exactly one task_started(c), after the approval was granted.
    let events = fixture.events.read(fixture.tenant, &workflow_id).expect("events");
    let c_starts = events
        .iter()
        .filter(|event| {
            event.kind == EventKind::TaskStarted
                && event.task_id.as_ref().is_some_and(|task| task.as_str() == "c")
        })
        .count();
    assert_eq!(c_starts, 1);
    let awaiting_index = events
        .iter()
        .position(|event| event.kind == EventKind::TaskAwaitingApproval)
        .expect("awaiting event");
    let granted_index = events
        .iter()
        .position(|event| event.kind == EventKind::ApprovalGranted)
        .expect("granted event");
    let start_index = events
        .iter()
        .position(|event| {
            event.kind == EventKind::TaskStarted
                && event.task_id.as_ref().is_some_and(|task| task.as_str() == "c")
        })
        .expect("start event");
    assert!(awaiting_index < granted_index && granted_index < start_index);

    // The audit trail captured the evaluate -> pending -> approved sequence.
    let audit_actions: Vec<String> =
        fixture.audit.entries().iter().map(|entry| entry.action.clone()).collect();
    assert!(audit_actions.contains(&"policy_evaluation".to_string()));
    assert!(audit_actions.contains(&"approval_granted".to_string()));
}

#[tokio::test]
async fn rejected_approval_fails_the_task() {
    let fixture = harness();
    fixture.registry.register(StubTool::succeeding("noop", json!({"ok": true})));
    let mut spec = linear_spec("wf-4", &["danger"], "noop");
    if let Some(task) = spec.tasks.first_mut() {
        task.risk_tier = Some(RiskTier::High);
    }
    fixture.orchestrator.submit(fixture.tenant, spec, agent_principal()).expect("submit");

    let workflow_id = WorkflowId::new("wf-4");
    let status = fixture.orchestrator.run(fixture.tenant, &workflow_id).await.expect("run");
    assert_eq!(status, WorkflowStatus::Running);

    fixture
        .orchestrator
        .reject_task(fixture.tenant, &workflow_id, &"danger".into())
        .expect("reject");
    let status = fixture.orchestrator.run(fixture.tenant, &workflow_id).await.expect("finish");
    assert_eq!(status, WorkflowStatus::Compensated);

    let state =
        fixture.store.load(fixture.tenant, &workflow_id).expect("load").expect("state");
    assert_eq!(state.task(&"danger".into()).expect("task").phase, TaskPhase::Failed);
}

#[tokio::test]
async fn decision_branch_skips_the_untaken_path() {
    let fixture = harness();
    fixture.registry.register(StubTool::new(
        flowwarden_core::ToolDescriptor::pure("decide", "decide"),
        |_, _| Ok(json!({"branch": "left"})),
    ));
    fixture.registry.register(StubTool::succeeding("noop", json!({"ok": true})));

    let mut spec = linear_spec("wf-5", &["choose", "left", "right"], "noop");
    if let Some(task) = spec.tasks.iter_mut().find(|task| task.task_id == "choose".into()) {
        task.kind = flowwarden_core::spec::TaskKind::Decision;
        task.tool = Some("decide".into());
    }
    spec.dependencies.clear();
    spec.dependencies.insert(
        "left".into(),
        vec![flowwarden_core::spec::DependencySpec::on_branch("choose", "left")],
    );
    spec.dependencies.insert(
        "right".into(),
        vec![flowwarden_core::spec::DependencySpec::on_branch("choose", "right")],
    );
    fixture.orchestrator.submit(fixture.tenant, spec, agent_principal()).expect("submit");
    let status = fixture
        .orchestrator
        .run(fixture.tenant, &WorkflowId::new("wf-5"))
        .await
        .expect("run");
    assert_eq!(status, WorkflowStatus::Completed);

    let state = fixture
        .store
        .load(fixture.tenant, &WorkflowId::new("wf-5"))
        .expect("load")
        .expect("state");
    assert_eq!(state.task(&"choose".into()).expect("choose").branch.as_deref(), Some("left"));
    assert_eq!(state.task(&"left".into()).expect("left").phase, TaskPhase::Succeeded);
    assert_eq!(state.task(&"right".into()).expect("right").phase, TaskPhase::Skipped);
}

#[tokio::test]
async fn parallel_parent_joins_after_children() {
    let fixture = harness();
    fixture.registry.register(StubTool::succeeding("noop", json!({"ok": true})));

    let mut spec = linear_spec("wf-6", &["fan", "x", "y", "after"], "noop");
    if let Some(task) = spec.tasks.iter_mut().find(|task| task.task_id == "fan".into()) {
        task.kind = flowwarden_core::spec::TaskKind::Parallel {
            children: vec!["x".into(), "y".into()],
        };
        task.tool = None;
    }
    spec.dependencies.clear();
    spec.dependencies
        .insert("after".into(), vec![flowwarden_core::spec::DependencySpec::on("fan")]);
    fixture.orchestrator.submit(fixture.tenant, spec, agent_principal()).expect("submit");
    let status = fixture
        .orchestrator
        .run(fixture.tenant, &WorkflowId::new("wf-6"))
        .await
        .expect("run");
    assert_eq!(status, WorkflowStatus::Completed);

    let state = fixture
        .store
        .load(fixture.tenant, &WorkflowId::new("wf-6"))
        .expect("load")
        .expect("state");
    for task in ["fan", "x", "y", "after"] {
        assert_eq!(state.task(&task.into()).expect(task).phase, TaskPhase::Succeeded);
    }

    // The parent completed only after both children.
    let events = fixture.events.read(fixture.tenant, &WorkflowId::new("wf-6")).expect("events");
    let completion_order: Vec<String> = events
        .iter()
        .filter(|event| event.kind == EventKind::TaskCompleted)
        .filter_map(|event| event.task_id.as_ref().map(ToString::to_string))
        .collect();
    let fan_pos = completion_order.iter().position(|id| id == "fan").expect("fan completed");
    let x_pos = completion_order.iter().position(|id| id == "x").expect("x completed");
    let y_pos = completion_order.iter().position(|id| id == "y").expect("y completed");
    assert!(fan_pos > x_pos && fan_pos > y_pos);
}
