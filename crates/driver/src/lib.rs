//! Multi-core neural network accelerator driver core.
//!
//! This crate implements the scheduler and workload-execution core of a
//! kernel-mode driver for a multi-core inference accelerator with the
//! following:
//! 1. **Resources:** free/busy ledger over up to 8 compute cores and their
//!    Workload Managers, with low-latency double-buffering.
//! 2. **Scheduling:** priority lottery with starvation avoidance, per-session
//!    round robin, and a forced-sequence debug mode.
//! 3. **Dispatch:** MMU context switching, per-workload register
//!    configuration, watchdog programming and the hardware kick.
//! 4. **Interrupts:** top/bottom-half event decode, severity-classified
//!    error recovery (none/WM/MMU/full reset) and response handling.
//! 5. **Power:** lazy per-core power-up, timer-based idle power-down, and a
//!    one-shot watchdog-driven clock calibration.
//!
//! The embedder supplies MMIO, time and delay through the
//! [`Platform`](io::Platform) trait, serializes access to the
//! [`Device`](device::Device), and forwards interrupts to the two IRQ entry
//! points.

/// Common types, capacity constants, errors and the scheduling PRNG.
pub mod common;
/// Driver configuration (tunables, mode enums, defaults).
pub mod config;
/// The device: ownership root, dispatcher and command lifecycle.
pub mod device;
/// Hardware control: WM configuration, power/reset, interrupts, calibration.
pub mod hw;
/// Register I/O over the platform MMIO window, with pdump tracing.
pub mod io;
/// MMU adapter: hardware contexts, TLB maintenance, fault decode.
pub mod mmu;
/// Control-register map (offsets, fields, event sets, pseudo-bits).
pub mod regs;
/// Priority scheduler and the resource ledger.
pub mod sched;
/// Sessions, buffers, commands and responses.
pub mod session;
/// Device, core and WM statistics.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// The accelerator device; construct with `Device::probe`.
pub use crate::device::Device;
/// Driver error type.
pub use crate::common::CoreError;
/// Platform services trait implemented by the embedder.
pub use crate::io::Platform;
