// crates/flowwarden-core/src/core/time.rs
// ============================================================================
// Module: Flow Warden Time Model
// Description: Canonical RFC 3339 timestamps for events, audit entries, and memory.
// Purpose: Provide deterministic, replayable time values across Flow Warden records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Flow Warden embeds explicit wall-clock timestamps in every persisted record.
//! Serialization is RFC 3339 with a fixed nine-digit fractional second so the
//! canonical (RFC 8785) byte form of any record is stable across
//! serialize/deserialize round trips. The engine never reads the wall clock
//! directly; hosts supply time through the [`crate::interfaces::Clock`] seam.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;
use thiserror::Error;
use time::OffsetDateTime;
use time::UtcOffset;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when constructing or parsing timestamps.
#[derive(Debug, Error)]
pub enum TimeError {
    /// The supplied value is outside the representable range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
    /// The supplied text is not valid RFC 3339.
    #[error("invalid rfc 3339 timestamp: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in Flow Warden events, audit entries, and memory.
///
/// # Invariants
/// - Always UTC; offsets are normalized at construction.
/// - Serializes as RFC 3339 with exactly nine fractional-second digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Unix epoch timestamp.
    pub const UNIX_EPOCH: Self = Self(OffsetDateTime::UNIX_EPOCH);

    /// Creates a timestamp from unix nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] when the value cannot be represented.
    pub fn from_unix_nanos(nanos: i128) -> Result<Self, TimeError> {
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map(|value| Self(value.to_offset(UtcOffset::UTC)))
            .map_err(|err| TimeError::OutOfRange(err.to_string()))
    }

    /// Creates a timestamp from unix milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] when the value cannot be represented.
    pub fn from_unix_millis(millis: i64) -> Result<Self, TimeError> {
        Self::from_unix_nanos(i128::from(millis) * 1_000_000)
    }

    /// Wraps an [`OffsetDateTime`], normalizing to UTC.
    #[must_use]
    pub fn from_datetime(value: OffsetDateTime) -> Self {
        Self(value.to_offset(UtcOffset::UTC))
    }

    /// Parses an RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] when the text is not valid RFC 3339.
    pub fn parse(text: &str) -> Result<Self, TimeError> {
        OffsetDateTime::parse(text, &Rfc3339)
            .map(Self::from_datetime)
            .map_err(|err| TimeError::Parse(err.to_string()))
    }

    /// Returns the timestamp as unix nanoseconds.
    #[must_use]
    pub const fn as_unix_nanos(&self) -> i128 {
        self.0.unix_timestamp_nanos()
    }

    /// Returns the timestamp as unix milliseconds (saturating on overflow).
    #[must_use]
    pub fn as_unix_millis(&self) -> i64 {
        i64::try_from(self.0.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    /// Formats the timestamp as canonical RFC 3339 with nine fractional digits.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        let date = self.0.date();
        let time = self.0.time();
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
            date.year(),
            u8::from(date.month()),
            date.day(),
            time.hour(),
            time.minute(),
            time.second(),
            time.nanosecond()
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(DeError::custom)
    }
}
