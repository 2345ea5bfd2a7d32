// crates/flowwarden-cli/src/main.rs
// ============================================================================
// Module: Flow Warden CLI Entry Point
// Description: Command dispatcher for spec validation, audit checks, and status.
// Purpose: Provide the orchestrator process surface with stable exit codes.
// Dependencies: clap, flowwarden-config, flowwarden-core, flowwarden-store-sqlite
// ============================================================================

//! ## Overview
//! The Flow Warden CLI covers the operational tasks that do not require tool
//! plugins: validating workflow specifications, verifying a persisted audit
//! chain, and listing workflow states. Hosts embedding the orchestrator link
//! `flowwarden-core` directly; this binary maps failures to the stable
//! process exit codes (0 ok, 1 configuration, 2 audit integrity, 3 state
//! store unavailable, 4 internal invariant).

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use flowwarden_config::Config;
use flowwarden_config::ConfigError;
use flowwarden_config::StateStoreType;
use flowwarden_core::AuditError;
use flowwarden_core::AuditLog;
use flowwarden_core::StateFilter;
use flowwarden_core::StateStore;
use flowwarden_core::StoreError;
use flowwarden_core::SystemClock;
use flowwarden_core::TenantId;
use flowwarden_core::WorkflowStatus;
use flowwarden_core::spec::WorkflowSpec;
use flowwarden_store_sqlite::SqliteStateStore;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a workflow specification JSON input.
const MAX_SPEC_BYTES: u64 = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Errors and Exit Codes
// ============================================================================

/// CLI errors carrying their process exit code.
#[derive(Debug, Error)]
enum CliError {
    /// Unrecoverable configuration or input error (exit 1).
    #[error("configuration error: {0}")]
    Config(String),
    /// Audit log integrity failure (exit 2).
    #[error("audit integrity failure: {0}")]
    AuditIntegrity(String),
    /// State store unavailable (exit 3).
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),
    /// Internal invariant violation (exit 4).
    #[error("internal failure: {0}")]
    Internal(String),
}

impl CliError {
    /// Returns the stable process exit code for the error.
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            Self::AuditIntegrity(_) => 2,
            Self::StoreUnavailable(_) => 3,
            Self::Internal(_) => 4,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<AuditError> for CliError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::IntegrityFailed(_) | AuditError::Corrupt(_) => {
                Self::AuditIntegrity(err.to_string())
            }
            AuditError::NotFound(_) | AuditError::Hashing(_) | AuditError::Io(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Io(_) => {
                Self::StoreUnavailable(err.to_string())
            }
            StoreError::NotFound(_)
            | StoreError::Conflict(_)
            | StoreError::Corrupt(_)
            | StoreError::Invalid(_) => Self::Internal(err.to_string()),
        }
    }
}

/// CLI result alias.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Command Model
// ============================================================================

/// Flow Warden orchestrator command line.
#[derive(Debug, Parser)]
#[command(name = "flowwarden", about = "Governed, durable workflow orchestration")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Validates a workflow specification file.
    Validate {
        /// Path to the workflow specification JSON.
        #[arg(long)]
        spec: PathBuf,
    },
    /// Verifies the persisted audit chain.
    VerifyAudit {
        /// Explicit audit chain file; defaults to the configured path.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Lists workflow states for a tenant.
    Status {
        /// Tenant identifier (>= 1).
        #[arg(long)]
        tenant: u64,
        /// Filter by workflow status label.
        #[arg(long)]
        status: Option<String>,
    },
    /// Validates the configuration file and exits.
    ConfigValidate,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            write_stderr_line(&err.to_string());
            ExitCode::from(err.exit_code())
        }
    }
}

/// Dispatches the parsed command.
fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Validate {
            spec,
        } => command_validate(&spec),
        Command::VerifyAudit {
            path,
        } => command_verify_audit(cli.config.as_deref(), path),
        Command::Status {
            tenant,
            status,
        } => command_status(cli.config.as_deref(), tenant, status.as_deref()),
        Command::ConfigValidate => {
            Config::load(cli.config.as_deref())?;
            write_stdout_line("configuration ok");
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Validates a workflow specification file.
fn command_validate(path: &std::path::Path) -> CliResult<ExitCode> {
    let metadata =
        fs::metadata(path).map_err(|err| CliError::Config(format!("cannot read spec: {err}")))?;
    if metadata.len() > MAX_SPEC_BYTES {
        return Err(CliError::Config(format!(
            "spec file too large: {} bytes (max {MAX_SPEC_BYTES})",
            metadata.len()
        )));
    }
    let text = fs::read_to_string(path)
        .map_err(|err| CliError::Config(format!("cannot read spec: {err}")))?;
    let spec: WorkflowSpec = serde_json::from_str(&text)
        .map_err(|err| CliError::Config(format!("spec parse error: {err}")))?;
    spec.validate().map_err(|err| CliError::Config(format!("invalid spec: {err}")))?;
    write_stdout_line(&format!("spec ok: {} tasks", spec.tasks.len()));
    Ok(ExitCode::SUCCESS)
}

/// Verifies the persisted audit chain; refuses on integrity failure.
fn command_verify_audit(
    config_path: Option<&std::path::Path>,
    explicit: Option<PathBuf>,
) -> CliResult<ExitCode> {
    let path = match explicit {
        Some(path) => path,
        None => Config::load(config_path)?.audit_log_file(),
    };
    let log = AuditLog::open(path, Arc::new(SystemClock))?;
    let (valid, invalid) = log.verify_all()?;
    if !valid {
        return Err(CliError::AuditIntegrity(format!("invalid sequences: {invalid:?}")));
    }
    write_stdout_line(&format!("audit chain ok: {} entries", log.len()));
    Ok(ExitCode::SUCCESS)
}

/// Lists workflow states for a tenant.
fn command_status(
    config_path: Option<&std::path::Path>,
    tenant: u64,
    status: Option<&str>,
) -> CliResult<ExitCode> {
    let config = Config::load(config_path)?;
    let tenant_id = TenantId::from_raw(tenant)
        .ok_or_else(|| CliError::Config("tenant must be >= 1".to_string()))?;
    if config.state_store.store_type != StateStoreType::Relational {
        return Err(CliError::Config(
            "status requires the relational state store".to_string(),
        ));
    }
    let sqlite_config = config
        .state_store
        .sqlite_config()
        .ok_or_else(|| CliError::Config("state_store.path is not configured".to_string()))?;
    let store = SqliteStateStore::open(&sqlite_config)
        .map_err(|err| CliError::StoreUnavailable(err.to_string()))?;
    let filter = StateFilter {
        status: status.map(parse_status).transpose()?,
        workflow_id_prefix: None,
    };
    let states = store.list(tenant_id, &filter)?;
    for state in &states {
        write_stdout_line(&format!(
            "{}\t{}\tversion={}",
            state.workflow_id,
            state.status.as_str(),
            state.version
        ));
    }
    write_stdout_line(&format!("{} workflows", states.len()));
    Ok(ExitCode::SUCCESS)
}

/// Parses a status filter label.
fn parse_status(label: &str) -> CliResult<WorkflowStatus> {
    match label {
        "pending" => Ok(WorkflowStatus::Pending),
        "running" => Ok(WorkflowStatus::Running),
        "completed" => Ok(WorkflowStatus::Completed),
        "failed" => Ok(WorkflowStatus::Failed),
        "compensating" => Ok(WorkflowStatus::Compensating),
        "compensated" => Ok(WorkflowStatus::Compensated),
        "aborted" => Ok(WorkflowStatus::Aborted),
        other => Err(CliError::Config(format!("unknown status: {other}"))),
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a line to stdout, ignoring pipe errors.
#[allow(clippy::print_stdout, reason = "CLI output surface; failures are ignored by design.")]
fn write_stdout_line(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}

/// Writes a line to stderr, ignoring pipe errors.
#[allow(clippy::print_stderr, reason = "CLI diagnostics surface; failures are ignored by design.")]
fn write_stderr_line(line: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{line}");
}
