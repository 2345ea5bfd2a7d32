// crates/flowwarden-config/src/lib.rs
// ============================================================================
// Module: Flow Warden Config Library
// Description: Configuration loading and validation for the orchestrator.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: flowwarden-core, flowwarden-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size limits, then
//! overridden by the environment variables the core recognizes. Missing or
//! invalid configuration fails closed; an orchestrator process never starts
//! on a configuration it cannot fully validate.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::Config;
pub use config::ConfigError;
pub use config::EventLogConfig;
pub use config::OrchestratorSection;
pub use config::StateStoreConfig;
pub use config::StateStoreType;
