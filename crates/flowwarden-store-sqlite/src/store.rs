// crates/flowwarden-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Workflow State Store
// Description: Durable StateStore backed by SQLite WAL.
// Purpose: Persist workflow and task rows atomically with optimistic versioning.
// Dependencies: flowwarden-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each save runs a single transaction covering the workflow row and every
//! task row, enforcing the optimistic version check inside the transaction.
//! Loads reassemble the state from both tables and fail closed on rows that
//! do not parse. Database contents are treated as untrusted input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use flowwarden_core::ApprovalState;
use flowwarden_core::CompensationRecord;
use flowwarden_core::FailureReason;
use flowwarden_core::Principal;
use flowwarden_core::StateFilter;
use flowwarden_core::StateStore;
use flowwarden_core::StoreError;
use flowwarden_core::TaskId;
use flowwarden_core::TaskPhase;
use flowwarden_core::TaskState;
use flowwarden_core::TenantId;
use flowwarden_core::Timestamp;
use flowwarden_core::WorkflowId;
use flowwarden_core::WorkflowState;
use flowwarden_core::WorkflowStatus;
use flowwarden_core::spec::WorkflowSpec;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` workflow state store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw workflow payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// `SQLite` reports the database busy or locked.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Optimistic version conflict.
    #[error("sqlite store version conflict: {0}")]
    Conflict(String),
    /// Store corruption or unparseable rows.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Invalid(message),
            SqliteStoreError::Busy(message) => Self::Unavailable(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Classifies a rusqlite error, separating busy/locked from the rest.
fn classify_db_error(err: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = err
        && matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    {
        return SqliteStoreError::Busy(err.to_string());
    }
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed workflow state store with WAL support.
///
/// # Invariants
/// - Saves run one transaction covering the workflow row and all task rows.
/// - Connection access is serialized through a mutex, matching the
///   per-workflow write serialization contract.
#[derive(Clone)]
pub struct SqliteStateStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Opens an `SQLite`-backed workflow state store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
        let connection = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|err| classify_db_error(&err))?;
        connection
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(|err| classify_db_error(&err))?;
        connection
            .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
            .map_err(|err| classify_db_error(&err))?;
        connection
            .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
            .map_err(|err| classify_db_error(&err))?;
        connection
            .pragma_update(None, "foreign_keys", "on")
            .map_err(|err| classify_db_error(&err))?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Saves state inside one transaction, enforcing the version check.
    fn save_state(&self, state: &WorkflowState) -> Result<(), SqliteStoreError> {
        let mut guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.transaction().map_err(|err| classify_db_error(&err))?;

        let stored_version: Option<u64> = tx
            .query_row(
                "SELECT version FROM workflow_states WHERE tenant_id = ?1 AND workflow_id = ?2",
                params![tenant_param(state.tenant_id), state.workflow_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|err| classify_db_error(&err))?
            .map(|version| u64::try_from(version).unwrap_or(0));
        if let Some(stored) = stored_version
            && stored != state.version
        {
            return Err(SqliteStoreError::Conflict(format!(
                "workflow {} at version {stored}, save presented {}",
                state.workflow_id, state.version
            )));
        }

        let spec_json = to_json(&state.spec)?;
        let principal_json = to_json(&state.principal)?;
        let context_json = to_json(&state.context)?;
        let compensation_json = to_json(&state.compensation_stack)?;
        let next_version = i64::try_from(state.version.saturating_add(1))
            .map_err(|_| SqliteStoreError::Invalid("version overflow".to_string()))?;
        let event_seq = i64::try_from(state.event_seq)
            .map_err(|_| SqliteStoreError::Invalid("event_seq overflow".to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO workflow_states (
                tenant_id, workflow_id, status, spec_json, spec_hash, principal_json,
                context_json, compensation_json, created_at, updated_at, started_at,
                ended_at, version, event_seq
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                tenant_param(state.tenant_id),
                state.workflow_id.as_str(),
                state.status.as_str(),
                spec_json,
                state.spec_hash,
                principal_json,
                context_json,
                compensation_json,
                state.created_at.to_rfc3339(),
                state.updated_at.to_rfc3339(),
                state.started_at.map(|ts| ts.to_rfc3339()),
                state.ended_at.map(|ts| ts.to_rfc3339()),
                next_version,
                event_seq,
            ],
        )
        .map_err(|err| classify_db_error(&err))?;

        tx.execute(
            "DELETE FROM task_states WHERE tenant_id = ?1 AND workflow_id = ?2",
            params![tenant_param(state.tenant_id), state.workflow_id.as_str()],
        )
        .map_err(|err| classify_db_error(&err))?;

        for (task_id, task) in &state.task_states {
            let output_json = task.output.as_ref().map(to_json_value).transpose()?;
            let approval_json = task.approval.as_ref().map(to_json).transpose()?;
            tx.execute(
                "INSERT INTO task_states (
                    tenant_id, workflow_id, task_id, phase, attempt, error, error_detail,
                    output_json, branch, idempotency_key, approval_json, started_at, ended_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    tenant_param(state.tenant_id),
                    state.workflow_id.as_str(),
                    task_id.as_str(),
                    task.phase.as_str(),
                    i64::from(task.attempt),
                    task.last_error.map(FailureReason::as_str),
                    task.error_detail.as_deref(),
                    output_json,
                    task.branch.as_deref(),
                    task.idempotency_key.as_deref(),
                    approval_json,
                    task.started_at.map(|ts| ts.to_rfc3339()),
                    task.ended_at.map(|ts| ts.to_rfc3339()),
                ],
            )
            .map_err(|err| classify_db_error(&err))?;
        }

        tx.commit().map_err(|err| classify_db_error(&err))?;
        Ok(())
    }

    /// Loads one workflow and its task rows.
    fn load_state(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowState>, SqliteStoreError> {
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let row = guard
            .query_row(
                "SELECT status, spec_json, spec_hash, principal_json, context_json,
                        compensation_json, created_at, updated_at, started_at, ended_at,
                        version, event_seq
                 FROM workflow_states WHERE tenant_id = ?1 AND workflow_id = ?2",
                params![tenant_param(tenant_id), workflow_id.as_str()],
                WorkflowRow::from_row,
            )
            .optional()
            .map_err(|err| classify_db_error(&err))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut state = row.into_state(tenant_id, workflow_id)?;

        let mut stmt = guard
            .prepare(
                "SELECT task_id, phase, attempt, error, error_detail, output_json, branch,
                        idempotency_key, approval_json, started_at, ended_at
                 FROM task_states WHERE tenant_id = ?1 AND workflow_id = ?2",
            )
            .map_err(|err| classify_db_error(&err))?;
        let rows = stmt
            .query_map(
                params![tenant_param(tenant_id), workflow_id.as_str()],
                TaskRow::from_row,
            )
            .map_err(|err| classify_db_error(&err))?;
        for row in rows {
            let row = row.map_err(|err| classify_db_error(&err))?;
            let (task_id, task_state) = row.into_task()?;
            state.task_states.insert(task_id, task_state);
        }
        Ok(Some(state))
    }

    /// Lists workflows for a tenant matching the filter.
    fn list_states(
        &self,
        tenant_id: TenantId,
        filter: &StateFilter,
    ) -> Result<Vec<WorkflowState>, SqliteStoreError> {
        let workflow_ids: Vec<String> = {
            let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stmt = guard
                .prepare(
                    "SELECT workflow_id FROM workflow_states WHERE tenant_id = ?1
                     ORDER BY workflow_id",
                )
                .map_err(|err| classify_db_error(&err))?;
            let rows = stmt
                .query_map(params![tenant_param(tenant_id)], |row| row.get::<_, String>(0))
                .map_err(|err| classify_db_error(&err))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|err| classify_db_error(&err))?);
            }
            ids
        };

        let mut states = Vec::new();
        for id in workflow_ids {
            let workflow_id = WorkflowId::new(id);
            if let Some(state) = self.load_state(tenant_id, &workflow_id)?
                && filter.matches(&state)
            {
                states.push(state);
            }
        }
        Ok(states)
    }
}

impl StateStore for SqliteStateStore {
    fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.save_state(state).map_err(StoreError::from)
    }

    fn load(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowState>, StoreError> {
        self.load_state(tenant_id, workflow_id).map_err(StoreError::from)
    }

    fn list(
        &self,
        tenant_id: TenantId,
        filter: &StateFilter,
    ) -> Result<Vec<WorkflowState>, StoreError> {
        self.list_states(tenant_id, filter).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates tables and indexes, verifying the stored schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS workflow_states (
                tenant_id INTEGER NOT NULL,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                spec_hash TEXT NOT NULL,
                principal_json TEXT NOT NULL,
                context_json TEXT NOT NULL,
                compensation_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                version INTEGER NOT NULL,
                event_seq INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, workflow_id)
            );
            CREATE TABLE IF NOT EXISTS task_states (
                tenant_id INTEGER NOT NULL,
                workflow_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                error TEXT,
                error_detail TEXT,
                output_json TEXT,
                branch TEXT,
                idempotency_key TEXT,
                approval_json TEXT,
                started_at TEXT,
                ended_at TEXT,
                PRIMARY KEY (tenant_id, workflow_id, task_id),
                FOREIGN KEY (tenant_id, workflow_id)
                    REFERENCES workflow_states (tenant_id, workflow_id)
                    ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_workflow_states_tenant_status
                ON workflow_states (tenant_id, status);
            CREATE INDEX IF NOT EXISTS idx_task_states_workflow_phase
                ON task_states (workflow_id, phase);",
        )
        .map_err(|err| classify_db_error(&err))?;

    let stored: Option<i64> = connection
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| classify_db_error(&err))?;
    match stored {
        None => {
            connection
                .execute(
                    "INSERT INTO store_meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )
                .map_err(|err| classify_db_error(&err))?;
            Ok(())
        }
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(version) => Err(SqliteStoreError::Invalid(format!(
            "schema version mismatch: stored {version}, expected {SCHEMA_VERSION}"
        ))),
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Raw workflow row prior to fail-closed parsing.
struct WorkflowRow {
    /// Stored status label.
    status: String,
    /// Stored specification JSON.
    spec_json: String,
    /// Stored canonical spec hash.
    spec_hash: String,
    /// Stored principal JSON.
    principal_json: String,
    /// Stored context JSON.
    context_json: String,
    /// Stored compensation stack JSON.
    compensation_json: String,
    /// Stored creation timestamp.
    created_at: String,
    /// Stored update timestamp.
    updated_at: String,
    /// Stored start timestamp.
    started_at: Option<String>,
    /// Stored end timestamp.
    ended_at: Option<String>,
    /// Stored version.
    version: i64,
    /// Stored event sequence counter.
    event_seq: i64,
}

impl WorkflowRow {
    /// Maps a rusqlite row into the raw struct.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            status: row.get(0)?,
            spec_json: row.get(1)?,
            spec_hash: row.get(2)?,
            principal_json: row.get(3)?,
            context_json: row.get(4)?,
            compensation_json: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            started_at: row.get(8)?,
            ended_at: row.get(9)?,
            version: row.get(10)?,
            event_seq: row.get(11)?,
        })
    }

    /// Parses the raw row into workflow state, failing closed.
    fn into_state(
        self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowState, SqliteStoreError> {
        let spec: WorkflowSpec = from_json(&self.spec_json)?;
        if spec.workflow_id != *workflow_id {
            return Err(SqliteStoreError::Invalid(
                "workflow_id mismatch between key and payload".to_string(),
            ));
        }
        let principal: Principal = from_json(&self.principal_json)?;
        let context = from_json(&self.context_json)?;
        let compensation_stack: Vec<CompensationRecord> = from_json(&self.compensation_json)?;
        Ok(WorkflowState {
            workflow_id: workflow_id.clone(),
            tenant_id,
            status: parse_status(&self.status)?,
            spec,
            spec_hash: self.spec_hash,
            principal,
            context,
            task_states: std::collections::BTreeMap::new(),
            compensation_stack,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            ended_at: self.ended_at.as_deref().map(parse_timestamp).transpose()?,
            version: u64::try_from(self.version)
                .map_err(|_| SqliteStoreError::Corrupt("negative version".to_string()))?,
            event_seq: u64::try_from(self.event_seq)
                .map_err(|_| SqliteStoreError::Corrupt("negative event_seq".to_string()))?,
        })
    }
}

/// Raw task row prior to fail-closed parsing.
struct TaskRow {
    /// Stored task identifier.
    task_id: String,
    /// Stored phase label.
    phase: String,
    /// Stored attempt counter.
    attempt: i64,
    /// Stored failure label.
    error: Option<String>,
    /// Stored failure detail.
    error_detail: Option<String>,
    /// Stored output JSON.
    output_json: Option<String>,
    /// Stored decision branch.
    branch: Option<String>,
    /// Stored idempotency key.
    idempotency_key: Option<String>,
    /// Stored approval JSON.
    approval_json: Option<String>,
    /// Stored start timestamp.
    started_at: Option<String>,
    /// Stored end timestamp.
    ended_at: Option<String>,
}

impl TaskRow {
    /// Maps a rusqlite row into the raw struct.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            phase: row.get(1)?,
            attempt: row.get(2)?,
            error: row.get(3)?,
            error_detail: row.get(4)?,
            output_json: row.get(5)?,
            branch: row.get(6)?,
            idempotency_key: row.get(7)?,
            approval_json: row.get(8)?,
            started_at: row.get(9)?,
            ended_at: row.get(10)?,
        })
    }

    /// Parses the raw row into a task state, failing closed.
    fn into_task(self) -> Result<(TaskId, TaskState), SqliteStoreError> {
        let approval: Option<ApprovalState> =
            self.approval_json.as_deref().map(from_json).transpose()?;
        let output = self.output_json.as_deref().map(from_json).transpose()?;
        Ok((
            TaskId::new(self.task_id),
            TaskState {
                phase: parse_phase(&self.phase)?,
                attempt: u32::try_from(self.attempt)
                    .map_err(|_| SqliteStoreError::Corrupt("negative attempt".to_string()))?,
                last_error: self.error.as_deref().map(parse_failure).transpose()?,
                error_detail: self.error_detail,
                output,
                branch: self.branch,
                started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
                ended_at: self.ended_at.as_deref().map(parse_timestamp).transpose()?,
                approval,
                idempotency_key: self.idempotency_key,
            },
        ))
    }
}

// ============================================================================
// SECTION: Parsing Helpers
// ============================================================================

/// Converts a tenant id to its storage integer.
fn tenant_param(tenant_id: TenantId) -> i64 {
    i64::try_from(tenant_id.get()).unwrap_or(i64::MAX)
}

/// Serializes a value to JSON text.
fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Serializes a JSON value to text.
fn to_json_value(value: &serde_json::Value) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Deserializes JSON text, failing closed.
fn from_json<T: for<'de> serde::Deserialize<'de>>(text: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Parses an RFC 3339 timestamp column.
fn parse_timestamp(text: &str) -> Result<Timestamp, SqliteStoreError> {
    Timestamp::parse(text).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Parses a stored workflow status label.
fn parse_status(label: &str) -> Result<WorkflowStatus, SqliteStoreError> {
    match label {
        "pending" => Ok(WorkflowStatus::Pending),
        "running" => Ok(WorkflowStatus::Running),
        "completed" => Ok(WorkflowStatus::Completed),
        "failed" => Ok(WorkflowStatus::Failed),
        "compensating" => Ok(WorkflowStatus::Compensating),
        "compensated" => Ok(WorkflowStatus::Compensated),
        "aborted" => Ok(WorkflowStatus::Aborted),
        other => Err(SqliteStoreError::Corrupt(format!("unknown workflow status: {other}"))),
    }
}

/// Parses a stored task phase label.
fn parse_phase(label: &str) -> Result<TaskPhase, SqliteStoreError> {
    match label {
        "pending" => Ok(TaskPhase::Pending),
        "ready" => Ok(TaskPhase::Ready),
        "running" => Ok(TaskPhase::Running),
        "awaiting_approval" => Ok(TaskPhase::AwaitingApproval),
        "succeeded" => Ok(TaskPhase::Succeeded),
        "failed" => Ok(TaskPhase::Failed),
        "skipped" => Ok(TaskPhase::Skipped),
        "compensated" => Ok(TaskPhase::Compensated),
        other => Err(SqliteStoreError::Corrupt(format!("unknown task phase: {other}"))),
    }
}

/// Parses a stored failure label.
fn parse_failure(label: &str) -> Result<FailureReason, SqliteStoreError> {
    serde_json::from_value(serde_json::Value::String(label.to_string()))
        .map_err(|_| SqliteStoreError::Corrupt(format!("unknown failure reason: {label}")))
}
