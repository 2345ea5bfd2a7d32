// crates/flowwarden-core/tests/crv_gate.rs
// ============================================================================
// Module: CRV Gate Tests
// Description: Validator pipeline ordering, blocking semantics, and codes.
// ============================================================================
//! ## Overview
//! Exercises the built-in validators, the ordered blocking pipeline, the
//! confidence threshold, and chain composition.

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

use flowwarden_core::Commit;
use flowwarden_core::CrvGate;
use flowwarden_core::GateChain;
use flowwarden_core::ValidationFailureCode;
use flowwarden_core::Validator;
use serde_json::json;

#[test]
fn all_validators_passing_emits_passed() {
    let gate = CrvGate::new(
        "post",
        vec![
            Validator::not_null(),
            Validator::range("positive", "/value", Some(0.0), None).expect("range"),
        ],
    );
    let report = gate.evaluate(&Commit::new("c1", json!({"value": 5})));
    assert!(report.passed);
    assert!(!report.blocked);
    assert!(report.reasons.is_empty());
}

#[test]
fn first_failure_blocks_and_halts() {
    let gate = CrvGate::new(
        "post",
        vec![
            Validator::not_null(),
            Validator::range("positive", "/value", Some(0.0), None).expect("range"),
            Validator::predicate(
                "never_reached",
                "should not run after a block",
                ValidationFailureCode::Conflict,
                |_| false,
            ),
        ],
    );
    let report = gate.evaluate(&Commit::new("c1", json!({"value": -5})));
    assert!(!report.passed);
    assert!(report.blocked);
    assert_eq!(report.failure_code, Some(ValidationFailureCode::OutOfScope));
    assert_eq!(report.reasons.len(), 1, "pipeline halts at the blocking validator");
}

#[test]
fn non_blocking_gate_collects_every_reason() {
    let gate = CrvGate::new(
        "advisory",
        vec![
            Validator::range("positive", "/value", Some(0.0), None).expect("range"),
            Validator::regex("id_shape", "/id", "^[a-z]+-[0-9]+$").expect("regex"),
        ],
    )
    .block_on_failure(false);
    let report = gate.evaluate(&Commit::new("c1", json!({"value": -1, "id": "BAD"})));
    assert!(!report.passed);
    assert!(!report.blocked);
    assert_eq!(report.reasons.len(), 2);
    assert!(report.failure_code.is_none());
}

#[test]
fn not_null_blocks_null_data() {
    let gate = CrvGate::new("post", vec![Validator::not_null()]);
    let report = gate.evaluate(&Commit::new("c1", json!(null)));
    assert!(report.blocked);
    assert_eq!(report.failure_code, Some(ValidationFailureCode::MissingData));
    assert!(report.remediation.is_some());
}

#[test]
fn schema_validator_blocks_nonconforming_data() {
    let schema = json!({
        "type": "object",
        "required": ["name"],
        "properties": {"name": {"type": "string"}}
    });
    let gate =
        CrvGate::new("post", vec![Validator::schema("shape", &schema).expect("schema compile")]);
    assert!(gate.evaluate(&Commit::new("c1", json!({"name": "ok"}))).passed);
    let report = gate.evaluate(&Commit::new("c2", json!({"name": 7})));
    assert!(report.blocked);
}

#[test]
fn max_size_blocks_oversized_payloads() {
    let gate = CrvGate::new("post", vec![Validator::max_size(16)]);
    assert!(gate.evaluate(&Commit::new("c1", json!({"a": 1}))).passed);
    let report = gate.evaluate(&Commit::new("c2", json!({"data": "x".repeat(64)})));
    assert!(report.blocked);
    assert_eq!(report.failure_code, Some(ValidationFailureCode::OutOfScope));
}

#[test]
fn range_compares_integer_and_float_representations_equally() {
    let gate = CrvGate::new(
        "post",
        vec![Validator::range("bounded", "/v", Some(1.0), Some(1.0)).expect("range")],
    );
    assert!(gate.evaluate(&Commit::new("c1", json!({"v": 1}))).passed);
    assert!(gate.evaluate(&Commit::new("c2", json!({"v": 1.0}))).passed);
    assert!(gate.evaluate(&Commit::new("c3", json!({"v": 1.5}))).blocked);
}

#[test]
fn regex_validator_matches_strings_only() {
    let gate =
        CrvGate::new("post", vec![Validator::regex("shape", "/id", "^wf-[0-9]+$").expect("regex")]);
    assert!(gate.evaluate(&Commit::new("c1", json!({"id": "wf-42"}))).passed);
    assert!(gate.evaluate(&Commit::new("c2", json!({"id": 42}))).blocked);
    assert!(gate.evaluate(&Commit::new("c3", json!({"id": "task-42"}))).blocked);
}

#[test]
fn custom_failure_code_overrides_default() {
    let gate = CrvGate::new(
        "post",
        vec![
            Validator::range("bounded", "/v", Some(0.0), None)
                .expect("range")
                .with_failure_code(ValidationFailureCode::Conflict),
        ],
    );
    let report = gate.evaluate(&Commit::new("c1", json!({"v": -1})));
    assert_eq!(report.failure_code, Some(ValidationFailureCode::Conflict));
}

#[test]
fn required_confidence_blocks_low_confidence_commits() {
    let gate = CrvGate::new("post", vec![Validator::not_null()]).with_required_confidence(0.8);
    let confident = Commit::new("c1", json!({"x": 1})).with_metadata("confidence", json!(0.95));
    assert!(gate.evaluate(&confident).passed);

    let hesitant = Commit::new("c2", json!({"x": 1})).with_metadata("confidence", json!(0.5));
    let report = gate.evaluate(&hesitant);
    assert!(report.blocked);
    assert_eq!(report.failure_code, Some(ValidationFailureCode::LowConfidence));

    let missing = Commit::new("c3", json!({"x": 1}));
    assert!(gate.evaluate(&missing).blocked, "absent confidence counts as zero");
}

#[test]
fn chain_blocks_when_any_member_blocks() {
    let chain = GateChain::new(vec![
        CrvGate::new("first", vec![Validator::not_null()]),
        CrvGate::new(
            "second",
            vec![Validator::range("positive", "/v", Some(0.0), None).expect("range")],
        ),
        CrvGate::new(
            "third",
            vec![Validator::predicate(
                "never_reached",
                "chain halts before this gate",
                ValidationFailureCode::Conflict,
                |_| false,
            )],
        ),
    ]);
    let reports = chain.evaluate(&Commit::new("c1", json!({"v": -3})));
    assert_eq!(reports.len(), 2, "chain halts at the blocking member");
    let blocking = GateChain::blocking_report(&reports).expect("blocking report");
    assert_eq!(blocking.gate, "second");
}

#[test]
fn chain_passes_when_every_member_passes() {
    let chain = GateChain::new(vec![
        CrvGate::new("first", vec![Validator::not_null()]),
        CrvGate::new(
            "second",
            vec![Validator::range("positive", "/v", Some(0.0), None).expect("range")],
        ),
    ]);
    let reports = chain.evaluate(&Commit::new("c1", json!({"v": 3})));
    assert_eq!(reports.len(), 2);
    assert!(GateChain::blocking_report(&reports).is_none());
}
