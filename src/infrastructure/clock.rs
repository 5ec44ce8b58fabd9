//! Clock adapters for time operations.
//!
//! The in-process store computes entry expiry and the circuit breaker its
//! recovery timeout from a [`Clock`]. Production code uses [`SystemClock`];
//! tests use `MockClock` (in `crate::infrastructure::mocks`, available with
//! the `test-helpers` feature) to step through TTLs and rate windows without
//! sleeping.

use crate::application::ports::Clock;
use std::time::Instant;

/// System clock implementation using `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
