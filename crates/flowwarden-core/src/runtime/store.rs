// crates/flowwarden-core/src/runtime/store.rs
// ============================================================================
// Module: Flow Warden In-Memory State Store
// Description: Mutex-guarded in-memory StateStore for tests and development.
// Purpose: Provide a store interchangeable with the durable relational backend.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The in-memory store mirrors the durable backend's contract: atomic saves,
//! tenant-scoped reads, and the optimistic version check. Saves bump the
//! persisted version by one; a caller presenting a stale version receives
//! `Conflict` and must reload.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::core::StateFilter;
use crate::core::TenantId;
use crate::core::WorkflowId;
use crate::core::WorkflowState;
use crate::interfaces::StateStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Key scoping a workflow to its tenant.
type StateKey = (TenantId, WorkflowId);

/// In-memory workflow state store.
///
/// # Invariants
/// - Saves are atomic under the interior mutex.
/// - The stored `version` is authoritative for conflict detection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    /// Tenant-scoped state map.
    states: Arc<Mutex<BTreeMap<StateKey, WorkflowState>>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored workflows (all tenants).
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no workflow is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for InMemoryStateStore {
    fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let mut guard = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (state.tenant_id, state.workflow_id.clone());
        if let Some(existing) = guard.get(&key)
            && existing.version != state.version
        {
            return Err(StoreError::Conflict(format!(
                "workflow {} at version {}, save presented {}",
                state.workflow_id, existing.version, state.version
            )));
        }
        let mut persisted = state.clone();
        persisted.version = persisted.version.saturating_add(1);
        guard.insert(key, persisted);
        Ok(())
    }

    fn load(
        &self,
        tenant_id: TenantId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowState>, StoreError> {
        let guard = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&(tenant_id, workflow_id.clone())).cloned())
    }

    fn list(
        &self,
        tenant_id: TenantId,
        filter: &StateFilter,
    ) -> Result<Vec<WorkflowState>, StoreError> {
        let guard = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .iter()
            .filter(|((tenant, _), _)| *tenant == tenant_id)
            .map(|(_, state)| state)
            .filter(|state| filter.matches(state))
            .cloned()
            .collect())
    }
}
