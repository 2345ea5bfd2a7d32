// crates/flowwarden-core/src/core/hashing.rs
// ============================================================================
// Module: Flow Warden Canonical Hashing
// Description: Bounded RFC 8785 canonicalization, digests, and invocation keys.
// Purpose: Give the audit chain and the idempotency layer one byte-stable hash path.
// Dependencies: serde, serde_json, serde_jcs, sha2, crate::core::identifiers
// ============================================================================

//! ## Overview
//! Two subsystems stand on this module: the audit chain, whose entries hash
//! their own canonical form, and the tool execution layer, whose 256-bit
//! idempotency keys are content addresses over normalized invocation tuples.
//! Both therefore share a single canonicalization path: RFC 8785 (JCS)
//! serialization with an optional size bound enforced before any digest is
//! computed, so an oversized payload is rejected instead of hashed. Binary
//! payloads hash directly over raw bytes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::identifiers::StepId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Hash algorithms accepted for Flow Warden digests.
///
/// # Invariants
/// - Variants are stable for serialization; audit chains and idempotency
///   keys produced under one algorithm never verify under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 (the 256-bit key width the idempotency contract requires).
    Sha256,
}

/// Default hash algorithm for Flow Warden.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while canonicalizing or hashing.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed (non-finite floats, serializer errors).
    #[error("canonical json serialization failed: {0}")]
    Canonicalization(String),
    /// Canonical payload exceeded the caller-imposed size bound.
    #[error("canonical payload too large: {actual} bytes (limit {limit})")]
    SizeLimitExceeded {
        /// Maximum allowed canonical size in bytes.
        limit: usize,
        /// Actual canonical size in bytes.
        actual: usize,
    },
}

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash.
///
/// # Invariants
/// - `value` is lowercase hex over the full digest width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a digest record from raw digest bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: bytes.iter().map(|byte| format!("{byte:02x}")).collect(),
        }
    }
}

// ============================================================================
// SECTION: Canonical JSON
// ============================================================================

/// Canonicalizes a value, enforcing an optional size bound before any
/// caller sees the bytes. Every public canonicalization path routes here.
fn canonical_bytes_checked<T: Serialize + ?Sized>(
    value: &T,
    limit: Option<usize>,
) -> Result<Vec<u8>, HashError> {
    let bytes =
        serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    if let Some(limit) = limit
        && bytes.len() > limit
    {
        return Err(HashError::SizeLimitExceeded {
            limit,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Returns the unbounded RFC 8785 canonical bytes of a value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    canonical_bytes_checked(value, None)
}

/// Returns the canonical bytes of a value, rejecting payloads larger than
/// `limit` bytes.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails and
/// [`HashError::SizeLimitExceeded`] when the canonical form exceeds `limit`.
pub fn canonical_json_bytes_with_limit<T: Serialize + ?Sized>(
    value: &T,
    limit: usize,
) -> Result<Vec<u8>, HashError> {
    canonical_bytes_checked(value, Some(limit))
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Hashes raw bytes under the given algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            HashDigest::new(HashAlgorithm::Sha256, &Sha256::digest(bytes))
        }
    }
}

/// Hashes the unbounded canonical form of a value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    Ok(hash_bytes(algorithm, &canonical_bytes_checked(value, None)?))
}

/// Hashes the canonical form of a value with a size bound in force.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails and
/// [`HashError::SizeLimitExceeded`] when the canonical form exceeds `limit`.
pub fn hash_canonical_json_with_limit<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
    limit: usize,
) -> Result<HashDigest, HashError> {
    Ok(hash_bytes(algorithm, &canonical_bytes_checked(value, Some(limit))?))
}

// ============================================================================
// SECTION: Invocation Keys
// ============================================================================

/// Derives the 256-bit idempotency key for a tool invocation.
///
/// The key is the lowercase-hex SHA-256 of the canonical tuple
/// `{args, request_id?, step_id, task_id, tool_id}`; RFC 8785 supplies the
/// recursive object-key ordering the normalization rules require, while
/// arrays and primitive types are preserved as given. The optional
/// `request_id` participates only for tools using the `request_id`
/// idempotency strategy, making each attempt its own key.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the tuple cannot be
/// canonicalized.
pub fn invocation_key(
    task_id: &TaskId,
    step_id: &StepId,
    tool_id: &ToolId,
    args: &Value,
    request_id: Option<&str>,
) -> Result<String, HashError> {
    let mut tuple = Map::new();
    tuple.insert("task_id".to_string(), json!(task_id.as_str()));
    tuple.insert("step_id".to_string(), json!(step_id.as_str()));
    tuple.insert("tool_id".to_string(), json!(tool_id.as_str()));
    tuple.insert("args".to_string(), args.clone());
    if let Some(request_id) = request_id {
        tuple.insert("request_id".to_string(), json!(request_id));
    }
    Ok(hash_canonical_json(DEFAULT_HASH_ALGORITHM, &Value::Object(tuple))?.value)
}
