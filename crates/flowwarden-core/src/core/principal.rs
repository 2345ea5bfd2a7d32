// crates/flowwarden-core/src/core/principal.rs
// ============================================================================
// Module: Flow Warden Principals and Actions
// Description: Principals, permissions, risk tiers, and policy action records.
// Purpose: Provide the inputs evaluated by the Goal-Guard policy gate.
// Dependencies: serde, crate::core::identifiers
// ============================================================================

//! ## Overview
//! A principal is the acting identity behind a task attempt: an agent, a
//! human, or a service. Permissions are matched structurally against the
//! permissions an action requires; risk tiers route actions to automatic
//! approval, audited approval, or human approval.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ActionId;
use crate::core::identifiers::PrincipalId;
use crate::core::identifiers::ToolId;

// ============================================================================
// SECTION: Risk Tier
// ============================================================================

/// Risk tier attached to actions and task specifications.
///
/// # Invariants
/// - Variants are stable for serialization and policy routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    /// Automatically allowed.
    #[default]
    Low,
    /// Allowed with an audit flag.
    Medium,
    /// Requires a single human approval.
    High,
    /// Requires multi-party human approval.
    Critical,
}

// ============================================================================
// SECTION: Intent and Data Zone
// ============================================================================

/// Declared intent of an action.
///
/// # Invariants
/// - Variants are stable for serialization and permission matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Read-only access.
    Read,
    /// Mutating write access.
    Write,
    /// Destructive delete access.
    Delete,
    /// Execution of a tool or program.
    Execute,
    /// Administrative operation.
    Admin,
}

/// Data sensitivity zone an action touches.
///
/// # Invariants
/// - Variants are stable for serialization and permission matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataZone {
    /// Publicly visible data.
    Public,
    /// Internal data.
    Internal,
    /// Confidential data.
    Confidential,
    /// Restricted data.
    Restricted,
}

// ============================================================================
// SECTION: Permissions
// ============================================================================

/// A single permission grant or requirement.
///
/// # Invariants
/// - `action` and `resource` are always matched; `intent` and `data_zone`
///   are matched only when the requirement specifies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Action name the permission covers.
    pub action: String,
    /// Resource the permission covers.
    pub resource: String,
    /// Optional intent constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Optional data-zone constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_zone: Option<DataZone>,
    /// Optional free-form conditions, not interpreted by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Value>,
}

impl Permission {
    /// Creates a permission over an action and resource with no constraints.
    #[must_use]
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            intent: None,
            data_zone: None,
            conditions: None,
        }
    }

    /// Returns true when this grant satisfies the `required` permission.
    ///
    /// Action and resource must match exactly. Intent and data zone are
    /// checked only when the requirement specifies them; a grant without a
    /// constraint satisfies any required value for that dimension.
    #[must_use]
    pub fn satisfies(&self, required: &Self) -> bool {
        if self.action != required.action || self.resource != required.resource {
            return false;
        }
        if let Some(required_intent) = required.intent
            && self.intent.is_some_and(|granted| granted != required_intent)
        {
            return false;
        }
        if let Some(required_zone) = required.data_zone
            && self.data_zone.is_some_and(|granted| granted != required_zone)
        {
            return false;
        }
        true
    }
}

// ============================================================================
// SECTION: Principal
// ============================================================================

/// Kind of acting identity.
///
/// # Invariants
/// - Variants are stable for serialization and approval accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Autonomous agent.
    Agent,
    /// Human operator.
    Human,
    /// Backend service.
    Service,
}

/// Acting identity evaluated by the policy gate.
///
/// # Invariants
/// - Permissions are grants; they never widen when serialized and reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub principal_id: PrincipalId,
    /// Principal kind.
    pub kind: PrincipalKind,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
}

// ============================================================================
// SECTION: Policy Action
// ============================================================================

/// Action submitted to the policy gate for evaluation.
///
/// # Invariants
/// - `required_permissions` must all be satisfied by the principal.
/// - When `allowed_tools` is present, the supplied tool must be listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAction {
    /// Action identifier.
    pub action_id: ActionId,
    /// Human-readable action name.
    pub name: String,
    /// Risk tier routing the action.
    pub risk_tier: RiskTier,
    /// Permissions the principal must hold.
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
    /// Optional declared intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// Optional data zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_zone: Option<DataZone>,
    /// Optional tool allowlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<ToolId>>,
}
