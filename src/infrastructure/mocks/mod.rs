//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of the gateway and the limiter.

pub mod clock;
pub mod faulty_store;

pub use clock::MockClock;
pub use faulty_store::{FaultyStore, StoreOp};
