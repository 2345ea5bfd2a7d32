// crates/flowwarden-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Unit Tests
// Description: Exit-code mapping and command validation tests.
// ============================================================================

//! Unit tests for the CLI dispatcher.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::io::Write;

use super::*;

#[test]
fn exit_codes_are_stable() {
    assert_eq!(CliError::Config("x".to_string()).exit_code(), 1);
    assert_eq!(CliError::AuditIntegrity("x".to_string()).exit_code(), 2);
    assert_eq!(CliError::StoreUnavailable("x".to_string()).exit_code(), 3);
    assert_eq!(CliError::Internal("x".to_string()).exit_code(), 4);
}

#[test]
fn store_errors_map_to_exit_codes() {
    let unavailable: CliError = StoreError::Unavailable("down".to_string()).into();
    assert_eq!(unavailable.exit_code(), 3);
    let conflict: CliError = StoreError::Conflict("stale".to_string()).into();
    assert_eq!(conflict.exit_code(), 4);
}

#[test]
fn parse_status_accepts_every_label() {
    for label in
        ["pending", "running", "completed", "failed", "compensating", "compensated", "aborted"]
    {
        assert!(parse_status(label).is_ok(), "label {label} should parse");
    }
    assert!(parse_status("nonsense").is_err());
}

#[test]
fn validate_accepts_well_formed_spec() {
    let spec = serde_json::json!({
        "workflow_id": "wf-1",
        "name": "demo",
        "tasks": [
            {"task_id": "a", "name": "a", "kind": "action"},
            {"task_id": "b", "name": "b", "kind": "action"}
        ],
        "dependencies": {"b": [{"task": "a"}]}
    });
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(spec.to_string().as_bytes()).expect("write spec");
    let result = command_validate(file.path());
    assert!(result.is_ok());
}

#[test]
fn validate_rejects_cyclic_spec() {
    let spec = serde_json::json!({
        "workflow_id": "wf-1",
        "name": "demo",
        "tasks": [
            {"task_id": "a", "name": "a", "kind": "action"},
            {"task_id": "b", "name": "b", "kind": "action"}
        ],
        "dependencies": {
            "a": [{"task": "b"}],
            "b": [{"task": "a"}]
        }
    });
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(spec.to_string().as_bytes()).expect("write spec");
    let result = command_validate(file.path());
    assert!(matches!(result, Err(CliError::Config(_))));
}

#[test]
fn verify_audit_flags_tampered_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit.log");
    {
        let log = AuditLog::open(&path, Arc::new(SystemClock)).expect("open audit");
        log.append(
            "tester",
            "noop",
            serde_json::Value::Null,
            serde_json::json!({"ok": true}),
            flowwarden_core::Provenance::new("task", "step"),
        )
        .expect("append");
    }
    // Flip one byte in the persisted chain.
    let mut text = std::fs::read_to_string(&path).expect("read chain");
    text = text.replace("noop", "oops");
    std::fs::write(&path, text).expect("rewrite chain");

    let result = command_verify_audit(None, Some(path));
    assert!(matches!(result, Err(CliError::AuditIntegrity(_))));
}
