// crates/flowwarden-core/src/runtime/crv.rs
// ============================================================================
// Module: Flow Warden CRV Gate
// Description: Ordered validator pipeline over candidate commits.
// Purpose: Pass or block proposed commits with taxonomy-coded reasons.
// Dependencies: crate::core, bigdecimal, jsonschema, regex
// ============================================================================

//! ## Overview
//! A CRV gate evaluates validators in declaration order over a candidate
//! commit. The gate has no side effects beyond its decision; the
//! orchestrator translates a block into rejecting the commit and recording
//! the audit entry. Numeric range checks go through `bigdecimal` so `1` and
//! `1.0` compare equal and precision is never lost.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::str::FromStr;

use bigdecimal::BigDecimal;
use jsonschema::Validator as SchemaValidator;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::Commit;
use crate::core::hashing::HashError;
use crate::core::hashing::canonical_json_bytes_with_limit;

// ============================================================================
// SECTION: Failure Codes
// ============================================================================

/// Closed taxonomy of CRV failure codes.
///
/// # Invariants
/// - Labels are stable wire strings; variants are never reused or renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationFailureCode {
    /// The producing tool failed.
    ToolError,
    /// Confidence below the required threshold.
    LowConfidence,
    /// The commit conflicts with existing state.
    Conflict,
    /// The commit is not reproducible.
    NonDeterminism,
    /// The commit violates policy.
    PolicyViolation,
    /// Required data is missing.
    MissingData,
    /// The commit is outside the accepted range or scope.
    OutOfScope,
}

impl ValidationFailureCode {
    /// Returns the stable wire label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolError => "TOOL_ERROR",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::Conflict => "CONFLICT",
            Self::NonDeterminism => "NON_DETERMINISM",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::MissingData => "MISSING_DATA",
            Self::OutOfScope => "OUT_OF_SCOPE",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while constructing validators.
#[derive(Debug, Error)]
pub enum GateError {
    /// The supplied JSON schema does not compile.
    #[error("invalid validator schema: {0}")]
    InvalidSchema(String),
    /// The supplied regular expression does not compile.
    #[error("invalid validator regex: {0}")]
    InvalidRegex(String),
    /// The supplied numeric bound is not representable.
    #[error("invalid validator range bound: {0}")]
    InvalidRange(String),
}

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Check function evaluated over a commit; `Err` carries the failure detail.
type CheckFn = Box<dyn Fn(&Commit) -> Result<(), String> + Send + Sync>;

/// A named validation step within a CRV gate.
///
/// # Invariants
/// - Validators are pure; they never mutate the commit.
pub struct Validator {
    /// Validator name used in reports.
    name: String,
    /// Stable failure reason prefix.
    failure_reason: String,
    /// Failure code emitted when this validator blocks.
    failure_code: ValidationFailureCode,
    /// Optional remediation hint.
    remediation: Option<String>,
    /// The check itself.
    check: CheckFn,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("failure_code", &self.failure_code)
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Creates a validator from a custom predicate.
    #[must_use]
    pub fn predicate(
        name: impl Into<String>,
        failure_reason: impl Into<String>,
        failure_code: ValidationFailureCode,
        check: impl Fn(&Commit) -> bool + Send + Sync + 'static,
    ) -> Self {
        let reason = failure_reason.into();
        let reason_for_check = reason.clone();
        Self {
            name: name.into(),
            failure_reason: reason,
            failure_code,
            remediation: None,
            check: Box::new(move |commit| {
                if check(commit) { Ok(()) } else { Err(reason_for_check.clone()) }
            }),
        }
    }

    /// Creates a validator rejecting null or absent data.
    #[must_use]
    pub fn not_null() -> Self {
        Self {
            name: "not_null".to_string(),
            failure_reason: "commit data must not be null".to_string(),
            failure_code: ValidationFailureCode::MissingData,
            remediation: Some("populate the commit data before submitting".to_string()),
            check: Box::new(|commit| {
                if commit.data.is_null() {
                    Err("commit data is null".to_string())
                } else {
                    Ok(())
                }
            }),
        }
    }

    /// Creates a schema-conformance validator.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidSchema`] when the schema does not compile.
    pub fn schema(name: impl Into<String>, schema: &Value) -> Result<Self, GateError> {
        let compiled: SchemaValidator = jsonschema::validator_for(schema)
            .map_err(|err| GateError::InvalidSchema(err.to_string()))?;
        Ok(Self {
            name: name.into(),
            failure_reason: "commit data does not conform to schema".to_string(),
            failure_code: ValidationFailureCode::OutOfScope,
            remediation: Some("produce output matching the declared schema".to_string()),
            check: Box::new(move |commit| match compiled.validate(&commit.data) {
                Ok(()) => Ok(()),
                Err(err) => Err(err.to_string()),
            }),
        })
    }

    /// Creates a validator bounding the canonical size of the commit data.
    #[must_use]
    pub fn max_size(max_bytes: usize) -> Self {
        Self {
            name: "max_size".to_string(),
            failure_reason: format!("commit data exceeds {max_bytes} canonical bytes"),
            failure_code: ValidationFailureCode::OutOfScope,
            remediation: Some("reduce the commit payload".to_string()),
            check: Box::new(move |commit| {
                match canonical_json_bytes_with_limit(&commit.data, max_bytes) {
                    Ok(_) => Ok(()),
                    Err(HashError::SizeLimitExceeded {
                        limit,
                        actual,
                    }) => Err(format!("{actual} bytes exceeds limit {limit}")),
                    Err(err) => Err(format!("canonicalization failed: {err}")),
                }
            }),
        }
    }

    /// Creates a numeric range validator over a JSON pointer into the data.
    ///
    /// Bounds are inclusive; an absent bound is unbounded on that side.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidRange`] when a bound is not representable
    /// as a decimal.
    pub fn range(
        name: impl Into<String>,
        pointer: impl Into<String>,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self, GateError> {
        let pointer = pointer.into();
        let min = min
            .map(|bound| {
                BigDecimal::try_from(bound).map_err(|err| GateError::InvalidRange(err.to_string()))
            })
            .transpose()?;
        let max = max
            .map(|bound| {
                BigDecimal::try_from(bound).map_err(|err| GateError::InvalidRange(err.to_string()))
            })
            .transpose()?;
        Ok(Self {
            name: name.into(),
            failure_reason: format!("value at '{pointer}' outside accepted range"),
            failure_code: ValidationFailureCode::OutOfScope,
            remediation: Some("produce a value within the accepted range".to_string()),
            check: Box::new(move |commit| {
                let target = resolve_pointer(&commit.data, &pointer)
                    .ok_or_else(|| format!("no value at pointer '{pointer}'"))?;
                let number = target
                    .as_number()
                    .ok_or_else(|| format!("value at '{pointer}' is not numeric"))?;
                let value = BigDecimal::from_str(&number.to_string())
                    .map_err(|err| format!("unparseable number at '{pointer}': {err}"))?;
                if let Some(min) = &min
                    && value < *min
                {
                    return Err(format!("{value} below minimum {min}"));
                }
                if let Some(max) = &max
                    && value > *max
                {
                    return Err(format!("{value} above maximum {max}"));
                }
                Ok(())
            }),
        })
    }

    /// Creates a regex validator over a string field addressed by pointer.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidRegex`] when the pattern does not compile.
    pub fn regex(
        name: impl Into<String>,
        pointer: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, GateError> {
        let pointer = pointer.into();
        let compiled = Regex::new(pattern).map_err(|err| GateError::InvalidRegex(err.to_string()))?;
        Ok(Self {
            name: name.into(),
            failure_reason: format!("value at '{pointer}' does not match pattern"),
            failure_code: ValidationFailureCode::OutOfScope,
            remediation: None,
            check: Box::new(move |commit| {
                let target = resolve_pointer(&commit.data, &pointer)
                    .ok_or_else(|| format!("no value at pointer '{pointer}'"))?;
                let text = target
                    .as_str()
                    .ok_or_else(|| format!("value at '{pointer}' is not a string"))?;
                if compiled.is_match(text) {
                    Ok(())
                } else {
                    Err(format!("'{text}' does not match pattern"))
                }
            }),
        })
    }

    /// Overrides the failure code emitted when the validator blocks.
    #[must_use]
    pub fn with_failure_code(mut self, code: ValidationFailureCode) -> Self {
        self.failure_code = code;
        self
    }

    /// Attaches a remediation hint to the validator.
    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// Returns the validator name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Resolves a JSON pointer, treating the empty pointer as the whole value.
fn resolve_pointer<'a>(data: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() { Some(data) } else { data.pointer(pointer) }
}

// ============================================================================
// SECTION: Gate Report
// ============================================================================

/// Decision emitted by a CRV gate.
///
/// # Invariants
/// - `blocked` implies `passed == false` and a populated `failure_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    /// Gate name.
    pub gate: String,
    /// True when every validator passed.
    pub passed: bool,
    /// True when evaluation halted on a blocking failure.
    pub blocked: bool,
    /// Failure code of the blocking validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<ValidationFailureCode>,
    /// Failure reasons in evaluation order.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Remediation hint from the blocking validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl GateReport {
    /// Returns a passing report for `gate`.
    #[must_use]
    pub fn passing(gate: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed: true,
            blocked: false,
            failure_code: None,
            reasons: Vec::new(),
            remediation: None,
        }
    }
}

// ============================================================================
// SECTION: CRV Gate
// ============================================================================

/// Ordered validator pipeline with blocking semantics.
///
/// # Invariants
/// - Validators are evaluated in declaration order.
/// - The gate emits its decision and nothing else.
#[derive(Debug)]
pub struct CrvGate {
    /// Gate name used in reports and audit entries.
    name: String,
    /// Ordered validators.
    validators: Vec<Validator>,
    /// Whether the first failure halts evaluation and blocks the commit.
    block_on_failure: bool,
    /// Optional minimum `confidence` metadata value.
    required_confidence: Option<f64>,
}

impl CrvGate {
    /// Creates a blocking gate with the given validators.
    #[must_use]
    pub fn new(name: impl Into<String>, validators: Vec<Validator>) -> Self {
        Self {
            name: name.into(),
            validators,
            block_on_failure: true,
            required_confidence: None,
        }
    }

    /// Sets whether failures block (default true).
    #[must_use]
    pub const fn block_on_failure(mut self, block: bool) -> Self {
        self.block_on_failure = block;
        self
    }

    /// Requires a minimum `confidence` metadata value on commits.
    #[must_use]
    pub const fn with_required_confidence(mut self, threshold: f64) -> Self {
        self.required_confidence = Some(threshold);
        self
    }

    /// Returns the gate name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured confidence threshold, when any.
    #[must_use]
    pub const fn required_confidence(&self) -> Option<f64> {
        self.required_confidence
    }

    /// Evaluates the pipeline over a commit.
    #[must_use]
    pub fn evaluate(&self, commit: &Commit) -> GateReport {
        let mut reasons = Vec::new();

        if let Some(threshold) = self.required_confidence {
            let confidence = commit.confidence().unwrap_or(0.0);
            if confidence < threshold {
                let reason =
                    format!("confidence {confidence} below required threshold {threshold}");
                if self.block_on_failure {
                    return GateReport {
                        gate: self.name.clone(),
                        passed: false,
                        blocked: true,
                        failure_code: Some(ValidationFailureCode::LowConfidence),
                        reasons: vec![reason],
                        remediation: Some("raise confidence or lower the threshold".to_string()),
                    };
                }
                reasons.push(reason);
            }
        }

        for validator in &self.validators {
            if let Err(detail) = (validator.check)(commit) {
                let reason = format!("{}: {}: {detail}", validator.name, validator.failure_reason);
                if self.block_on_failure {
                    return GateReport {
                        gate: self.name.clone(),
                        passed: false,
                        blocked: true,
                        failure_code: Some(validator.failure_code),
                        reasons: vec![reason],
                        remediation: validator.remediation.clone(),
                    };
                }
                reasons.push(reason);
            }
        }

        if reasons.is_empty() {
            GateReport::passing(self.name.clone())
        } else {
            GateReport {
                gate: self.name.clone(),
                passed: false,
                blocked: false,
                failure_code: None,
                reasons,
                remediation: None,
            }
        }
    }
}

// ============================================================================
// SECTION: Gate Chain
// ============================================================================

/// Sequential composition of CRV gates.
///
/// # Invariants
/// - Evaluation halts at the first blocking gate.
#[derive(Debug, Default)]
pub struct GateChain {
    /// Member gates in evaluation order.
    gates: Vec<CrvGate>,
}

impl GateChain {
    /// Creates a chain from member gates.
    #[must_use]
    pub fn new(gates: Vec<CrvGate>) -> Self {
        Self {
            gates,
        }
    }

    /// Returns true when the chain has no gates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Evaluates every gate in order, halting on the first block.
    ///
    /// Returns the reports produced so far; the last report carries the
    /// blocking decision when the chain blocked.
    #[must_use]
    pub fn evaluate(&self, commit: &Commit) -> Vec<GateReport> {
        let mut reports = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let report = gate.evaluate(commit);
            let blocked = report.blocked;
            reports.push(report);
            if blocked {
                break;
            }
        }
        reports
    }

    /// Returns the blocking report from `reports`, when any.
    #[must_use]
    pub fn blocking_report(reports: &[GateReport]) -> Option<&GateReport> {
        reports.iter().find(|report| report.blocked)
    }
}
