// crates/flowwarden-store-sqlite/src/lib.rs
// ============================================================================
// Module: Flow Warden SQLite Store Library
// Description: Durable relational StateStore and ToolResultCache backends.
// Purpose: Persist workflow state and idempotency records across restarts.
// Dependencies: flowwarden-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides the production persistence backends: a WAL-backed
//! SQLite [`flowwarden_core::StateStore`] whose saves run one transaction
//! over the workflow row and all task rows, and a durable
//! [`flowwarden_core::ToolResultCache`] for idempotency records that must
//! survive orchestrator restarts during a retry window. Loads fail closed on
//! inconsistent rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cache;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::SqliteToolResultCache;
pub use store::SqliteStateStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
