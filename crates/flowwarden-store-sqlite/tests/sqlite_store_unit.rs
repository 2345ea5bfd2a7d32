// crates/flowwarden-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Unit Tests
// Description: Round trips, transactional saves, conflicts, and the cache.
// ============================================================================
//! ## Overview
//! Exercises the durable backends against real database files: full state
//! round trips including task rows, optimistic version conflicts, tenant
//! isolation, list filtering, and the durable idempotency cache.

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

use std::collections::BTreeMap;

use flowwarden_core::CachedToolResult;
use flowwarden_core::FailureReason;
use flowwarden_core::Principal;
use flowwarden_core::PrincipalId;
use flowwarden_core::PrincipalKind;
use flowwarden_core::StateFilter;
use flowwarden_core::StateStore;
use flowwarden_core::StoreError;
use flowwarden_core::TaskPhase;
use flowwarden_core::TaskState;
use flowwarden_core::TenantId;
use flowwarden_core::Timestamp;
use flowwarden_core::ToolResultCache;
use flowwarden_core::WorkflowId;
use flowwarden_core::WorkflowState;
use flowwarden_core::WorkflowStatus;
use flowwarden_core::spec::DependencySpec;
use flowwarden_core::spec::TaskKind;
use flowwarden_core::spec::TaskSpec;
use flowwarden_core::spec::WorkflowSpec;
use flowwarden_store_sqlite::SqliteStateStore;
use flowwarden_store_sqlite::SqliteStoreConfig;
use flowwarden_store_sqlite::SqliteToolResultCache;
use serde_json::json;

/// Builds a two-task workflow state for round-trip tests.
fn sample_state(workflow_id: &str, tenant: TenantId) -> WorkflowState {
    let spec = WorkflowSpec {
        workflow_id: workflow_id.into(),
        name: workflow_id.to_string(),
        goal: Some("round trip".to_string()),
        constraints: None,
        success_criteria: None,
        tasks: vec![
            TaskSpec {
                task_id: "a".into(),
                name: "a".to_string(),
                kind: TaskKind::Action,
                tool: Some("noop".into()),
                inputs: serde_json::Map::new(),
                output_schema: None,
                retry: None,
                timeout_ms: None,
                risk_tier: None,
                required_permissions: Vec::new(),
                allowed_tools: None,
                compensation: None,
                idempotency_key: None,
            },
            TaskSpec {
                task_id: "b".into(),
                name: "b".to_string(),
                kind: TaskKind::Action,
                tool: Some("noop".into()),
                inputs: serde_json::Map::new(),
                output_schema: None,
                retry: None,
                timeout_ms: None,
                risk_tier: None,
                required_permissions: Vec::new(),
                allowed_tools: None,
                compensation: None,
                idempotency_key: None,
            },
        ],
        dependencies: BTreeMap::from([("b".into(), vec![DependencySpec::on("a")])]),
    };
    let now = Timestamp::from_unix_millis(1_700_000_000_000).expect("timestamp");
    let mut task_states = BTreeMap::new();
    let mut done = TaskState::pending();
    done.phase = TaskPhase::Succeeded;
    done.attempt = 2;
    done.output = Some(json!({"ok": true}));
    done.idempotency_key = Some("k".repeat(64));
    done.started_at = Some(now);
    done.ended_at = Some(now);
    task_states.insert("a".into(), done);
    let mut failed = TaskState::pending();
    failed.phase = TaskPhase::Failed;
    failed.attempt = 1;
    failed.last_error = Some(FailureReason::ToolError);
    failed.error_detail = Some("boom".to_string());
    task_states.insert("b".into(), failed);
    WorkflowState {
        workflow_id: WorkflowId::new(workflow_id),
        tenant_id: tenant,
        status: WorkflowStatus::Failed,
        spec_hash: "h".repeat(64),
        spec,
        principal: Principal {
            principal_id: PrincipalId::new("agent-1"),
            kind: PrincipalKind::Agent,
            permissions: Vec::new(),
        },
        context: serde_json::Map::new(),
        task_states,
        compensation_stack: Vec::new(),
        created_at: now,
        updated_at: now,
        started_at: Some(now),
        ended_at: None,
        version: 0,
        event_seq: 9,
    }
}

/// Opens a store in a fresh temp directory.
fn open_store(dir: &tempfile::TempDir) -> SqliteStateStore {
    let config = SqliteStoreConfig::new(dir.path().join("state.db"));
    SqliteStateStore::open(&config).expect("open store")
}

#[test]
fn save_and_load_round_trip_preserves_tasks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let tenant = TenantId::from_raw(1).expect("tenant");
    let state = sample_state("wf-1", tenant);
    store.save(&state).expect("save");

    let loaded = store.load(tenant, &WorkflowId::new("wf-1")).expect("load").expect("state");
    assert_eq!(loaded.status, WorkflowStatus::Failed);
    assert_eq!(loaded.version, 1, "save bumps the stored version");
    assert_eq!(loaded.event_seq, 9);
    assert_eq!(loaded.task_states.len(), 2);
    let task_a = loaded.task_states.get(&"a".into()).expect("task a");
    assert_eq!(task_a.phase, TaskPhase::Succeeded);
    assert_eq!(task_a.attempt, 2);
    assert_eq!(task_a.output, Some(json!({"ok": true})));
    let task_b = loaded.task_states.get(&"b".into()).expect("task b");
    assert_eq!(task_b.last_error, Some(FailureReason::ToolError));
    assert_eq!(task_b.error_detail.as_deref(), Some("boom"));
}

#[test]
fn stale_version_save_conflicts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let tenant = TenantId::from_raw(1).expect("tenant");
    let state = sample_state("wf-1", tenant);
    store.save(&state).expect("first save");

    // Presenting the original version 0 again is now stale.
    let result = store.save(&state);
    assert!(matches!(result, Err(StoreError::Conflict(_))));

    // Saving the freshly loaded copy succeeds.
    let loaded = store.load(tenant, &WorkflowId::new("wf-1")).expect("load").expect("state");
    store.save(&loaded).expect("save fresh copy");
}

#[test]
fn tenants_are_isolated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let tenant_a = TenantId::from_raw(1).expect("tenant");
    let tenant_b = TenantId::from_raw(2).expect("tenant");
    store.save(&sample_state("wf-1", tenant_a)).expect("save");

    assert!(store.load(tenant_b, &WorkflowId::new("wf-1")).expect("load").is_none());
    assert!(store.list(tenant_b, &StateFilter::default()).expect("list").is_empty());
}

#[test]
fn list_filters_by_status_and_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let tenant = TenantId::from_raw(1).expect("tenant");
    store.save(&sample_state("wf-alpha", tenant)).expect("save");
    let mut completed = sample_state("wf-beta", tenant);
    completed.status = WorkflowStatus::Completed;
    store.save(&completed).expect("save");
    let mut other = sample_state("job-1", tenant);
    other.status = WorkflowStatus::Completed;
    store.save(&other).expect("save");

    let failed = store
        .list(
            tenant,
            &StateFilter {
                status: Some(WorkflowStatus::Failed),
                workflow_id_prefix: None,
            },
        )
        .expect("list");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].workflow_id.as_str(), "wf-alpha");

    let prefixed = store
        .list(
            tenant,
            &StateFilter {
                status: Some(WorkflowStatus::Completed),
                workflow_id_prefix: Some("wf-".to_string()),
            },
        )
        .expect("list");
    assert_eq!(prefixed.len(), 1);
    assert_eq!(prefixed[0].workflow_id.as_str(), "wf-beta");
}

#[test]
fn reopening_the_database_preserves_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tenant = TenantId::from_raw(1).expect("tenant");
    {
        let store = open_store(&dir);
        store.save(&sample_state("wf-1", tenant)).expect("save");
    }
    let reopened = open_store(&dir);
    let loaded =
        reopened.load(tenant, &WorkflowId::new("wf-1")).expect("load").expect("state");
    assert_eq!(loaded.workflow_id.as_str(), "wf-1");
}

// ============================================================================
// SECTION: Durable Cache
// ============================================================================

#[test]
fn cache_round_trips_and_sets_replayed_on_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = SqliteToolResultCache::open(dir.path().join("cache.db")).expect("open cache");
    let record = CachedToolResult {
        idempotency_key: "k".repeat(64),
        success: true,
        data: json!({"ok": true}),
        error: None,
        metadata: serde_json::Map::new(),
        cached_at: Timestamp::from_unix_millis(1_700_000_000_000).expect("timestamp"),
        replayed: false,
    };
    cache.set(&record).expect("set");
    assert!(cache.has(&record.idempotency_key).expect("has"));

    let replay = cache.get(&record.idempotency_key).expect("get").expect("record");
    assert!(replay.replayed, "reads mark the record replayed");
    assert_eq!(replay.data, record.data);

    cache.clear(&record.idempotency_key).expect("clear");
    assert!(!cache.has(&record.idempotency_key).expect("has"));
}

#[test]
fn cache_refuses_unsuccessful_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = SqliteToolResultCache::open(dir.path().join("cache.db")).expect("open cache");
    let record = CachedToolResult {
        idempotency_key: "k".repeat(64),
        success: false,
        data: json!(null),
        error: Some("failed".to_string()),
        metadata: serde_json::Map::new(),
        cached_at: Timestamp::from_unix_millis(0).expect("timestamp"),
        replayed: false,
    };
    assert!(cache.set(&record).is_err());
    assert!(!cache.has(&record.idempotency_key).expect("has"));
}

#[test]
fn cache_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    {
        let cache = SqliteToolResultCache::open(&path).expect("open cache");
        cache
            .set(&CachedToolResult {
                idempotency_key: "key-1".to_string(),
                success: true,
                data: json!({"n": 1}),
                error: None,
                metadata: serde_json::Map::new(),
                cached_at: Timestamp::from_unix_millis(0).expect("timestamp"),
                replayed: false,
            })
            .expect("set");
    }
    let reopened = SqliteToolResultCache::open(&path).expect("reopen cache");
    let record = reopened.get("key-1").expect("get").expect("record");
    assert_eq!(record.data, json!({"n": 1}));
}
