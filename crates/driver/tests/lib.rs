//! # Driver core testing library
//!
//! Central entry point for the driver-core test suite. It organises the
//! shared mock-hardware infrastructure and the per-module unit tests.

/// Shared test infrastructure.
///
/// Provides a register-accurate mock of the accelerator (`FakeNna`), a
/// `TestContext` that owns a probed device on top of it, and submission
/// builders for multi-core workloads.
pub mod common;

/// Unit and scenario tests for the driver core.
pub mod unit;
