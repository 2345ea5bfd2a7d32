// crates/flowwarden-config/src/config.rs
// ============================================================================
// Module: Flow Warden Configuration
// Description: Configuration model, TOML loading, and environment overrides.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: flowwarden-core, flowwarden-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! The configuration model mirrors the orchestrator's external interface:
//! state store selection, event and audit log directories, and the
//! orchestrator tunables. Environment variables override file values using
//! the exact names the core recognizes. Every load ends in `validate`,
//! which rejects out-of-range values instead of clamping them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use flowwarden_core::runtime::event_log::DEFAULT_ROTATION_BYTES;
use flowwarden_core::runtime::policy::DEFAULT_CRITICAL_QUORUM;
use flowwarden_core::runtime::policy::DEFAULT_TOKEN_TTL_SECS;
use flowwarden_store_sqlite::SqliteStoreConfig;
use flowwarden_store_sqlite::SqliteStoreMode;
use flowwarden_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "flowwarden.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "FLOWWARDEN_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Maximum total path length accepted in config values.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum accepted task timeout in milliseconds.
pub(crate) const MIN_TASK_TIMEOUT_MS: u64 = 1;
/// Maximum accepted task timeout in milliseconds.
pub(crate) const MAX_TASK_TIMEOUT_MS: u64 = 3_600_000;
/// Maximum accepted per-workflow concurrency ceiling.
pub(crate) const MAX_CONCURRENT_TASKS: usize = 1_024;
/// Maximum accepted approval token TTL in seconds.
pub(crate) const MAX_TOKEN_TTL_SECS: u64 = 86_400;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The config file exceeds the size limit.
    #[error("config file too large: {actual} bytes (max {max})")]
    TooLarge {
        /// Maximum allowed bytes.
        max: u64,
        /// Actual file size in bytes.
        actual: u64,
    },
    /// The config file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// An environment override failed to parse.
    #[error("invalid environment override {variable}: {detail}")]
    InvalidEnv {
        /// Offending variable name.
        variable: String,
        /// Parse failure detail.
        detail: String,
    },
    /// A value is outside its accepted range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: State Store Section
// ============================================================================

/// Selected state store backend.
///
/// # Invariants
/// - Values map 1:1 to the `STATE_STORE_TYPE` environment values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreType {
    /// In-memory store (development and tests).
    #[default]
    Memory,
    /// Durable relational store (SQLite).
    Relational,
}

/// State store configuration.
///
/// # Invariants
/// - `path` is required when `store_type` is `relational`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateStoreConfig {
    /// Backend selection.
    #[serde(default, rename = "type")]
    pub store_type: StateStoreType,
    /// Database path for the relational backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `SQLite` journal mode for the relational backend.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode for the relational backend.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl StateStoreConfig {
    /// Builds the `SQLite` store configuration for the relational backend.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        self.path.as_ref().map(|path| {
            let mut config = SqliteStoreConfig::new(path);
            config.journal_mode = self.journal_mode;
            config.sync_mode = self.sync_mode;
            config
        })
    }
}

// ============================================================================
// SECTION: Event Log Section
// ============================================================================

/// Event log configuration.
///
/// # Invariants
/// - `dir` is required; journals live under `<dir>/<tenant>/<workflow>/`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventLogConfig {
    /// Base directory for per-workflow journals.
    pub dir: PathBuf,
    /// Rotation threshold per segment in bytes.
    #[serde(default = "default_rotation_bytes")]
    pub rotation_bytes: u64,
}

/// Returns the default journal rotation threshold.
const fn default_rotation_bytes() -> u64 {
    DEFAULT_ROTATION_BYTES
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("events"),
            rotation_bytes: DEFAULT_ROTATION_BYTES,
        }
    }
}

// ============================================================================
// SECTION: Orchestrator Section
// ============================================================================

/// Orchestrator tunables.
///
/// # Invariants
/// - All values pass `validate` bounds before use.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSection {
    /// Default task timeout in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub default_task_timeout_ms: u64,
    /// Per-workflow concurrency ceiling.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks_per_workflow: usize,
    /// Approval token TTL in seconds.
    #[serde(default = "default_token_ttl")]
    pub approval_token_ttl_sec: u64,
    /// Optional required CRV confidence threshold.
    #[serde(default)]
    pub crv_required_confidence: Option<f64>,
    /// Whether compensation failures halt the saga pass.
    #[serde(default = "default_best_effort")]
    pub compensation_best_effort: bool,
    /// Distinct human approvals required for CRITICAL actions.
    #[serde(default = "default_critical_quorum")]
    pub critical_approval_quorum: u32,
}

/// Returns the default task timeout.
const fn default_task_timeout_ms() -> u64 {
    30_000
}

/// Returns the default per-workflow concurrency ceiling.
const fn default_max_concurrent() -> usize {
    16
}

/// Returns the default approval token TTL.
const fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

/// Returns the default compensation mode.
const fn default_best_effort() -> bool {
    true
}

/// Returns the default CRITICAL approval quorum.
const fn default_critical_quorum() -> u32 {
    DEFAULT_CRITICAL_QUORUM
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: default_task_timeout_ms(),
            max_concurrent_tasks_per_workflow: default_max_concurrent(),
            approval_token_ttl_sec: default_token_ttl(),
            crv_required_confidence: None,
            compensation_best_effort: default_best_effort(),
            critical_approval_quorum: default_critical_quorum(),
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Complete orchestrator configuration.
///
/// # Invariants
/// - Always passes `validate` before a process acts on it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// State store section.
    #[serde(default)]
    pub state_store: StateStoreConfig,
    /// Event log section.
    #[serde(default)]
    pub event_log: EventLogConfig,
    /// Audit log directory (the chain file lives at `<dir>/audit.log`).
    #[serde(default = "default_audit_dir")]
    pub audit_log_dir: PathBuf,
    /// Orchestrator tunables.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

/// Returns the default audit log directory.
fn default_audit_dir() -> PathBuf {
    PathBuf::from("audit")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_store: StateStoreConfig::default(),
            event_log: EventLogConfig::default(),
            audit_log_dir: default_audit_dir(),
            orchestrator: OrchestratorSection::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a file, the `FLOWWARDEN_CONFIG` path, or the
    /// default filename, then applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on I/O, parse, override, or range failures.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path.map(Path::to_path_buf).or_else(|| {
            env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
        });
        let mut config = match resolved {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_NAME);
                if default.is_file() { Self::from_file(&default)? } else { Self::default() }
            }
        };
        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML file with the size limit enforced.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on I/O or parse failure.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                max: MAX_CONFIG_FILE_SIZE,
                actual: metadata.len(),
            });
        }
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid TOML or
    /// contains unknown fields.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies the environment overrides the core recognizes.
    ///
    /// The lookup function is injected so tests can override hermetically.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("STATE_STORE_TYPE") {
            self.state_store.store_type = match value.as_str() {
                "memory" => StateStoreType::Memory,
                "relational" => StateStoreType::Relational,
                other => {
                    return Err(ConfigError::InvalidEnv {
                        variable: "STATE_STORE_TYPE".to_string(),
                        detail: format!("unknown backend: {other}"),
                    });
                }
            };
        }
        if let Some(value) = lookup("STATE_STORE_PATH") {
            self.state_store.path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("EVENT_LOG_DIR") {
            self.event_log.dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("AUDIT_LOG_DIR") {
            self.audit_log_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("DEFAULT_TASK_TIMEOUT_MS") {
            self.orchestrator.default_task_timeout_ms =
                parse_env("DEFAULT_TASK_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("MAX_CONCURRENT_TASKS_PER_WORKFLOW") {
            self.orchestrator.max_concurrent_tasks_per_workflow =
                parse_env("MAX_CONCURRENT_TASKS_PER_WORKFLOW", &value)?;
        }
        if let Some(value) = lookup("APPROVAL_TOKEN_TTL_SEC") {
            self.orchestrator.approval_token_ttl_sec = parse_env("APPROVAL_TOKEN_TTL_SEC", &value)?;
        }
        if let Some(value) = lookup("CRV_REQUIRED_CONFIDENCE") {
            self.orchestrator.crv_required_confidence =
                Some(parse_env("CRV_REQUIRED_CONFIDENCE", &value)?);
        }
        if let Some(value) = lookup("COMPENSATION_BEST_EFFORT") {
            self.orchestrator.compensation_best_effort =
                parse_env("COMPENSATION_BEST_EFFORT", &value)?;
        }
        Ok(())
    }

    /// Validates every value against its accepted range. Fail closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_store.store_type == StateStoreType::Relational
            && self.state_store.path.is_none()
        {
            return Err(ConfigError::Invalid(
                "state_store.path is required for the relational backend".to_string(),
            ));
        }
        validate_path_length("state_store.path", self.state_store.path.as_deref())?;
        validate_path_length("event_log.dir", Some(&self.event_log.dir))?;
        validate_path_length("audit_log_dir", Some(&self.audit_log_dir))?;
        if self.event_log.rotation_bytes == 0 {
            return Err(ConfigError::Invalid(
                "event_log.rotation_bytes must be greater than zero".to_string(),
            ));
        }
        let timeout = self.orchestrator.default_task_timeout_ms;
        if !(MIN_TASK_TIMEOUT_MS..=MAX_TASK_TIMEOUT_MS).contains(&timeout) {
            return Err(ConfigError::Invalid(format!(
                "default_task_timeout_ms out of range: {timeout}"
            )));
        }
        let concurrency = self.orchestrator.max_concurrent_tasks_per_workflow;
        if concurrency == 0 || concurrency > MAX_CONCURRENT_TASKS {
            return Err(ConfigError::Invalid(format!(
                "max_concurrent_tasks_per_workflow out of range: {concurrency}"
            )));
        }
        let ttl = self.orchestrator.approval_token_ttl_sec;
        if ttl == 0 || ttl > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "approval_token_ttl_sec out of range: {ttl}"
            )));
        }
        if let Some(confidence) = self.orchestrator.crv_required_confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(ConfigError::Invalid(format!(
                "crv_required_confidence out of range: {confidence}"
            )));
        }
        if self.orchestrator.critical_approval_quorum < 2 {
            return Err(ConfigError::Invalid(
                "critical_approval_quorum must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the audit chain file path.
    #[must_use]
    pub fn audit_log_file(&self) -> PathBuf {
        self.audit_log_dir.join("audit.log")
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses one environment override value.
fn parse_env<T: std::str::FromStr>(variable: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|err: T::Err| ConfigError::InvalidEnv {
        variable: variable.to_string(),
        detail: err.to_string(),
    })
}

/// Rejects paths longer than the accepted maximum.
fn validate_path_length(field: &str, path: Option<&Path>) -> Result<(), ConfigError> {
    if let Some(path) = path
        && path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH
    {
        return Err(ConfigError::Invalid(format!("{field} exceeds maximum path length")));
    }
    Ok(())
}
