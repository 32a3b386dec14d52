//! # Driver core unit tests
//!
//! Scenario and property tests for the scheduler and workload-execution
//! core, driven through the mock hardware in `common::harness`.

/// Clock calibration (one-shot watchdog measurement).
pub mod calib;
/// Cancellation by command-id mask.
pub mod cancel;
/// Hardware-bypass submissions.
pub mod hw_bypass;
/// Interrupt decode, error classification and reset minimality.
pub mod irq;
/// Resource ledger allocation/queue/release properties.
pub mod ledger;
/// Low-latency queueing (software kick).
pub mod low_latency;
/// On-chip mapping adapter surface.
pub mod onchip;
/// Priority lottery, round robin and end-to-end scheduling.
pub mod scheduler;
/// Statistics monotonicity across the device lifetime.
pub mod stats;
/// Suspend/resume with in-flight workloads.
pub mod suspend;
/// Software watchdog expiry.
pub mod swd;
