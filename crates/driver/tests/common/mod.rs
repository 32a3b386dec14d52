//! Shared test infrastructure for driver-core tests.

pub mod harness;

pub use harness::{FakeNna, SharedHw, TestContext};
