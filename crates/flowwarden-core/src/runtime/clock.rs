// crates/flowwarden-core/src/runtime/clock.rs
// ============================================================================
// Module: Flow Warden Clocks
// Description: System and manually-advanced clock implementations.
// Purpose: Supply timestamps through the Clock seam for runtime and tests.
// Dependencies: crate::{core, interfaces}, time
// ============================================================================

//! ## Overview
//! The system clock reads UTC wall time; the manual clock is advanced
//! explicitly by tests so timestamps (and therefore canonical hashes) are
//! reproducible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;

use time::OffsetDateTime;

use crate::core::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Clock backed by the operating system's UTC wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_datetime(OffsetDateTime::now_utc())
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Manually-advanced clock for deterministic tests.
///
/// # Invariants
/// - Time only moves forward; `advance` takes a non-negative delta.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix nanoseconds.
    nanos: Mutex<i128>,
}

impl ManualClock {
    /// Creates a manual clock starting at the unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manual clock starting at `nanos` past the epoch.
    #[must_use]
    pub fn starting_at(nanos: i128) -> Self {
        Self {
            nanos: Mutex::new(nanos),
        }
    }

    /// Advances the clock by `delta_nanos`.
    pub fn advance_nanos(&self, delta_nanos: i128) {
        let mut guard = self.nanos.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.saturating_add(delta_nanos.max(0));
    }

    /// Advances the clock by `delta_millis`.
    pub fn advance_millis(&self, delta_millis: i64) {
        self.advance_nanos(i128::from(delta_millis) * 1_000_000);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let nanos = *self.nanos.lock().unwrap_or_else(PoisonError::into_inner);
        Timestamp::from_unix_nanos(nanos).unwrap_or(Timestamp::UNIX_EPOCH)
    }
}
