// crates/flowwarden-store-sqlite/src/cache.rs
// ============================================================================
// Module: SQLite Tool Result Cache
// Description: Durable idempotency cache over the store database.
// Purpose: Keep successful tool results across orchestrator restarts.
// Dependencies: flowwarden-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! The durable cache shares the store's fail-closed posture: records that do
//! not parse are treated as corruption, and unsuccessful results are refused
//! at the API boundary. Durability is what makes cache replay correct across
//! orchestrator restarts inside a retry window.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use flowwarden_core::CacheError;
use flowwarden_core::CachedToolResult;
use flowwarden_core::ToolResultCache;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;

// ============================================================================
// SECTION: Cache
// ============================================================================

/// `SQLite`-backed tool result cache.
///
/// # Invariants
/// - Stored records always have `success == true`.
#[derive(Clone)]
pub struct SqliteToolResultCache {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteToolResultCache {
    /// Opens a durable cache at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the database cannot be opened or
    /// initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| CacheError::Backend(err.to_string()))?;
        }
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|err| CacheError::Backend(err.to_string()))?;
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS tool_result_cache (
                    idempotency_key TEXT PRIMARY KEY,
                    record_json TEXT NOT NULL
                );",
            )
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }
}

impl ToolResultCache for SqliteToolResultCache {
    fn get(&self, key: &str) -> Result<Option<CachedToolResult>, CacheError> {
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let record_json: Option<String> = guard
            .query_row(
                "SELECT record_json FROM tool_result_cache WHERE idempotency_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        record_json
            .map(|text| {
                let mut record: CachedToolResult = serde_json::from_str(&text)
                    .map_err(|err| CacheError::Backend(format!("corrupt cache record: {err}")))?;
                record.replayed = true;
                Ok(record)
            })
            .transpose()
    }

    fn set(&self, result: &CachedToolResult) -> Result<(), CacheError> {
        if !result.success {
            return Err(CacheError::UnsuccessfulResult(result.idempotency_key.clone()));
        }
        let mut stored = result.clone();
        stored.replayed = false;
        let record_json = serde_json::to_string(&stored)
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .execute(
                "INSERT OR REPLACE INTO tool_result_cache (idempotency_key, record_json)
                 VALUES (?1, ?2)",
                params![stored.idempotency_key, record_json],
            )
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM tool_result_cache WHERE idempotency_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(count > 0)
    }

    fn clear(&self, key: &str) -> Result<(), CacheError> {
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .execute("DELETE FROM tool_result_cache WHERE idempotency_key = ?1", params![key])
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(())
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .execute("DELETE FROM tool_result_cache", [])
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(())
    }
}
