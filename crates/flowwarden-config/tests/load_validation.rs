// crates/flowwarden-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load and Validation Tests
// Description: TOML parsing, environment overrides, and fail-closed ranges.
// ============================================================================
//! ## Overview
//! Covers strict parsing (unknown fields rejected), the recognized
//! environment overrides, and range validation that fails closed instead of
//! clamping.

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
use std::path::PathBuf;

use flowwarden_config::Config;
use flowwarden_config::ConfigError;
use flowwarden_config::StateStoreType;

/// Returns a lookup closure over a fixed variable map.
fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: BTreeMap<String, String> =
        pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect();
    move |name| map.get(name).cloned()
}

#[test]
fn defaults_validate() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.orchestrator.max_concurrent_tasks_per_workflow, 16);
    assert_eq!(config.orchestrator.default_task_timeout_ms, 30_000);
    assert_eq!(config.orchestrator.approval_token_ttl_sec, 3_600);
    assert!(config.orchestrator.compensation_best_effort);
    assert_eq!(config.orchestrator.critical_approval_quorum, 2);
}

#[test]
fn toml_round_trip_parses_every_section() {
    let config = Config::from_toml_str(
        r#"
        audit_log_dir = "/var/lib/flowwarden/audit"

        [state_store]
        type = "relational"
        path = "/var/lib/flowwarden/state.db"
        journal_mode = "wal"
        sync_mode = "full"

        [event_log]
        dir = "/var/lib/flowwarden/events"
        rotation_bytes = 1048576

        [orchestrator]
        default_task_timeout_ms = 10000
        max_concurrent_tasks_per_workflow = 8
        approval_token_ttl_sec = 600
        crv_required_confidence = 0.8
        compensation_best_effort = false
        critical_approval_quorum = 3
        "#,
    )
    .expect("parse");
    assert!(config.validate().is_ok());
    assert_eq!(config.state_store.store_type, StateStoreType::Relational);
    assert_eq!(config.audit_log_file(), PathBuf::from("/var/lib/flowwarden/audit/audit.log"));
    assert_eq!(config.orchestrator.critical_approval_quorum, 3);
    let sqlite = config.state_store.sqlite_config().expect("sqlite config");
    assert_eq!(sqlite.path, PathBuf::from("/var/lib/flowwarden/state.db"));
}

#[test]
fn unknown_fields_fail_closed() {
    let result = Config::from_toml_str("surprise = true\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn env_overrides_apply_with_exact_names() {
    let mut config = Config::default();
    config
        .apply_env_overrides(env_from(&[
            ("STATE_STORE_TYPE", "relational"),
            ("STATE_STORE_PATH", "/tmp/state.db"),
            ("EVENT_LOG_DIR", "/tmp/events"),
            ("AUDIT_LOG_DIR", "/tmp/audit"),
            ("DEFAULT_TASK_TIMEOUT_MS", "5000"),
            ("MAX_CONCURRENT_TASKS_PER_WORKFLOW", "4"),
            ("APPROVAL_TOKEN_TTL_SEC", "120"),
            ("CRV_REQUIRED_CONFIDENCE", "0.75"),
            ("COMPENSATION_BEST_EFFORT", "false"),
        ]))
        .expect("overrides");
    assert!(config.validate().is_ok());
    assert_eq!(config.state_store.store_type, StateStoreType::Relational);
    assert_eq!(config.state_store.path, Some(PathBuf::from("/tmp/state.db")));
    assert_eq!(config.event_log.dir, PathBuf::from("/tmp/events"));
    assert_eq!(config.orchestrator.default_task_timeout_ms, 5_000);
    assert_eq!(config.orchestrator.max_concurrent_tasks_per_workflow, 4);
    assert_eq!(config.orchestrator.approval_token_ttl_sec, 120);
    assert_eq!(config.orchestrator.crv_required_confidence, Some(0.75));
    assert!(!config.orchestrator.compensation_best_effort);
}

#[test]
fn unparseable_env_override_is_rejected() {
    let mut config = Config::default();
    let result =
        config.apply_env_overrides(env_from(&[("DEFAULT_TASK_TIMEOUT_MS", "soon")]));
    assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));

    let result = config.apply_env_overrides(env_from(&[("STATE_STORE_TYPE", "postgres")]));
    assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
}

#[test]
fn relational_backend_requires_a_path() {
    let mut config = Config::default();
    config
        .apply_env_overrides(env_from(&[("STATE_STORE_TYPE", "relational")]))
        .expect("override");
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn out_of_range_values_fail_closed() {
    let mut config = Config::default();
    config.orchestrator.default_task_timeout_ms = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.orchestrator.max_concurrent_tasks_per_workflow = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.orchestrator.max_concurrent_tasks_per_workflow = 1_000_000;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.orchestrator.crv_required_confidence = Some(1.5);
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.orchestrator.critical_approval_quorum = 1;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.event_log.rotation_bytes = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn config_file_loads_from_disk_with_size_limit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flowwarden.toml");
    std::fs::write(&path, "[orchestrator]\ndefault_task_timeout_ms = 1000\n").expect("write");
    let config = Config::from_file(&path).expect("load");
    assert_eq!(config.orchestrator.default_task_timeout_ms, 1_000);
}
