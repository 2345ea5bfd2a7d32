// crates/flowwarden-core/src/runtime/cache.rs
// ============================================================================
// Module: Flow Warden In-Memory Tool Result Cache
// Description: Idempotency-keyed cache of successful tool results.
// Purpose: Replay prior side-effecting results instead of re-invoking tools.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The cache stores only successful results. Reads return a copy with
//! `replayed` set true so callers can distinguish replays from fresh
//! invocations. Durability is optional for a single run but required across
//! restarts during a retry window; the SQLite-backed implementation in the
//! store crate provides that.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::core::CachedToolResult;
use crate::interfaces::CacheError;
use crate::interfaces::ToolResultCache;

// ============================================================================
// SECTION: In-Memory Cache
// ============================================================================

/// In-memory tool result cache.
///
/// # Invariants
/// - Stored records always have `success == true` and `replayed == false`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryToolResultCache {
    /// Records keyed by idempotency key.
    records: Arc<Mutex<BTreeMap<String, CachedToolResult>>>,
}

impl InMemoryToolResultCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ToolResultCache for InMemoryToolResultCache {
    fn get(&self, key: &str) -> Result<Option<CachedToolResult>, CacheError> {
        let guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).map(|record| {
            let mut replay = record.clone();
            replay.replayed = true;
            replay
        }))
    }

    fn set(&self, result: &CachedToolResult) -> Result<(), CacheError> {
        if !result.success {
            return Err(CacheError::UnsuccessfulResult(result.idempotency_key.clone()));
        }
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stored = result.clone();
        stored.replayed = false;
        guard.insert(stored.idempotency_key.clone(), stored);
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        let guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.contains_key(key))
    }

    fn clear(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        Ok(())
    }
}
